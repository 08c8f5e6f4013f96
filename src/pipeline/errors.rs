use thiserror::Error;

use crate::models::ExamId;
use crate::repositories::StoreError;
use crate::services::exam_parser::ParseError;

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("unsupported file type for '{filename}'; allowed: {allowed}")]
    UnsupportedFormat { filename: String, allowed: String },
    #[error("file too large ({size} bytes); maximum size is {max_mb}MB")]
    FileTooLarge { size: u64, max_mb: u64 },
    #[error("failed to extract text from file: {detail}")]
    UploadRejected { detail: String },
    #[error("failed to parse exam: {detail}")]
    ParseRejected { detail: String },
    #[error("exam {0} not found")]
    NotFound(ExamId),
    #[error("no results found for exam {0}")]
    ResultsNotFound(ExamId),
    #[error("exam {0} not parsed; parse the exam first")]
    NotYetParsed(ExamId),
    #[error("question index {index} out of range; exam has {total} questions")]
    IndexOutOfRange { index: usize, total: usize },
    #[error(transparent)]
    Parser(ParseError),
    #[error(transparent)]
    Store(StoreError),
}

impl From<ParseError> for PipelineError {
    fn from(err: ParseError) -> Self {
        Self::Parser(err)
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}
