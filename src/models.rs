use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

/// Opaque exam identifier, minted once at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct ExamId(String);

impl ExamId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ExamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for ExamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for ExamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum DocumentFormat {
    Pdf,
    Png,
    Jpg,
    Jpeg,
    Txt,
}

impl DocumentFormat {
    const ALL: [DocumentFormat; 5] = [Self::Pdf, Self::Png, Self::Jpg, Self::Jpeg, Self::Txt];

    pub(crate) fn extension(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Png => "png",
            Self::Jpg => "jpg",
            Self::Jpeg => "jpeg",
            Self::Txt => "txt",
        }
    }

    /// Dotted suffix, the shape clients see as `file_type`.
    pub(crate) fn suffix(self) -> String {
        format!(".{}", self.extension())
    }

    /// Parses a bare or dotted tag such as `pdf` or `.JPG`.
    pub(crate) fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().trim_start_matches('.').to_ascii_lowercase();
        Self::ALL.into_iter().find(|format| format.extension() == tag)
    }

    /// Case-insensitive suffix match of `filename` against the enabled extensions.
    pub(crate) fn from_filename(filename: &str, allowed: &[String]) -> Option<Self> {
        let lowered = filename.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|format| {
            allowed.iter().any(|ext| ext == format.extension())
                && lowered.ends_with(&format.suffix())
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuestionAnswer {
    pub(crate) question: String,
    pub(crate) correct_answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct StudentAnswer {
    pub(crate) question_index: usize,
    pub(crate) answer: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct QuestionGrade {
    pub(crate) question_index: usize,
    pub(crate) question: String,
    pub(crate) correct_answer: String,
    pub(crate) student_answer: String,
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
    pub(crate) explanation: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct GradingResult {
    pub(crate) question_grades: Vec<QuestionGrade>,
    pub(crate) final_score: f64,
    pub(crate) correct_count: usize,
    pub(crate) total_questions: usize,
}

/// The uploaded document, kept verbatim next to its derived artifacts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RawDocument {
    pub(crate) filename: String,
    pub(crate) format: DocumentFormat,
    pub(crate) bytes: Vec<u8>,
    pub(crate) sha256: String,
}

/// Input to `ExamStore::create`: an upload whose text has already been extracted.
#[derive(Debug, Clone)]
pub(crate) struct NewExam {
    pub(crate) raw_document: RawDocument,
    pub(crate) extracted_text: String,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Exam {
    pub(crate) id: ExamId,
    pub(crate) raw_document: RawDocument,
    pub(crate) extracted_text: String,
    pub(crate) questions: Option<Vec<QuestionAnswer>>,
    pub(crate) grading_result: Option<GradingResult>,
    pub(crate) created_at: OffsetDateTime,
}

impl Exam {
    pub(crate) fn status(&self) -> ExamStatus {
        ExamStatus {
            uploaded: true,
            text_extracted: !self.extracted_text.is_empty(),
            parsed: self.questions.is_some(),
            graded: self.grading_result.is_some(),
            total_questions: self.questions.as_ref().map(Vec::len),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum ProcessingStage {
    Uploaded,
    TextExtracted,
    Parsed,
    Graded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExamStatus {
    pub(crate) uploaded: bool,
    pub(crate) text_extracted: bool,
    pub(crate) parsed: bool,
    pub(crate) graded: bool,
    pub(crate) total_questions: Option<usize>,
}

impl ExamStatus {
    /// Furthest stage whose flag holds.
    pub(crate) fn processing_stage(&self) -> ProcessingStage {
        if self.graded {
            ProcessingStage::Graded
        } else if self.parsed {
            ProcessingStage::Parsed
        } else if self.text_extracted {
            ProcessingStage::TextExtracted
        } else {
            ProcessingStage::Uploaded
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_allowed() -> Vec<String> {
        ["pdf", "png", "jpg", "jpeg", "txt"].iter().map(|ext| ext.to_string()).collect()
    }

    #[test]
    fn format_from_filename_is_case_insensitive() {
        let allowed = all_allowed();
        assert_eq!(DocumentFormat::from_filename("Exam.PDF", &allowed), Some(DocumentFormat::Pdf));
        assert_eq!(DocumentFormat::from_filename("scan.jpeg", &allowed), Some(DocumentFormat::Jpeg));
        assert_eq!(DocumentFormat::from_filename("scan.JPG", &allowed), Some(DocumentFormat::Jpg));
        assert_eq!(DocumentFormat::from_filename("notes.txt", &allowed), Some(DocumentFormat::Txt));
        assert_eq!(DocumentFormat::from_filename("exam.docx", &allowed), None);
        assert_eq!(DocumentFormat::from_filename("pdf", &allowed), None);
    }

    #[test]
    fn format_from_tag_accepts_dotted_tags() {
        assert_eq!(DocumentFormat::from_tag(".JPG"), Some(DocumentFormat::Jpg));
        assert_eq!(DocumentFormat::from_tag("txt"), Some(DocumentFormat::Txt));
        assert_eq!(DocumentFormat::from_tag("gif"), None);
    }

    #[test]
    fn format_respects_narrowed_allow_list() {
        let allowed = vec!["txt".to_string()];
        assert_eq!(DocumentFormat::from_filename("exam.pdf", &allowed), None);
        assert_eq!(DocumentFormat::from_filename("exam.txt", &allowed), Some(DocumentFormat::Txt));
    }

    #[test]
    fn processing_stage_follows_furthest_flag() {
        let mut status = ExamStatus {
            uploaded: true,
            text_extracted: true,
            parsed: false,
            graded: false,
            total_questions: None,
        };
        assert_eq!(status.processing_stage(), ProcessingStage::TextExtracted);

        status.parsed = true;
        assert_eq!(status.processing_stage(), ProcessingStage::Parsed);

        status.graded = true;
        assert_eq!(status.processing_stage(), ProcessingStage::Graded);
    }

    #[test]
    fn exam_ids_are_unique() {
        assert_ne!(ExamId::generate(), ExamId::generate());
    }
}
