pub(crate) mod exam_parser;
pub(crate) mod extraction;
pub(crate) mod llm;
pub(crate) mod ocr;
pub(crate) mod pdf;
pub(crate) mod structured;
