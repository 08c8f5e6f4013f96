use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::{
    ExamId, ExamStatus, GradingResult, ProcessingStage, QuestionAnswer, QuestionGrade,
    StudentAnswer,
};

#[derive(Debug, Serialize)]
pub(crate) struct UploadResponse {
    pub(crate) exam_id: ExamId,
    pub(crate) message: String,
    pub(crate) file_type: String,
    pub(crate) file_size: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct ParseResponse {
    pub(crate) exam_id: ExamId,
    pub(crate) questions: Vec<QuestionAnswer>,
    pub(crate) total_questions: usize,
}

impl ParseResponse {
    pub(crate) fn new(exam_id: ExamId, questions: Vec<QuestionAnswer>) -> Self {
        Self { exam_id, total_questions: questions.len(), questions }
    }
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct GradeRequest {
    #[serde(alias = "examId")]
    #[validate(length(min = 1, message = "exam_id must not be empty"))]
    pub(crate) exam_id: String,
    #[serde(default, alias = "studentAnswers")]
    #[validate(length(min = 1, message = "student_answers must contain at least one answer"))]
    pub(crate) student_answers: Vec<StudentAnswer>,
}

/// Grade payload shared by the grade and results endpoints.
#[derive(Debug, Serialize)]
pub(crate) struct GradeResponse {
    pub(crate) exam_id: ExamId,
    pub(crate) question_grades: Vec<QuestionGrade>,
    pub(crate) final_score: f64,
    pub(crate) total_questions: usize,
    pub(crate) correct_answers: usize,
}

impl GradeResponse {
    pub(crate) fn new(exam_id: ExamId, result: GradingResult) -> Self {
        Self {
            exam_id,
            question_grades: result.question_grades,
            final_score: result.final_score,
            total_questions: result.total_questions,
            correct_answers: result.correct_count,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusResponse {
    pub(crate) exam_id: ExamId,
    pub(crate) uploaded: bool,
    pub(crate) text_extracted: bool,
    pub(crate) parsed: bool,
    pub(crate) graded: bool,
    pub(crate) processing_stage: ProcessingStage,
    pub(crate) total_questions: Option<usize>,
}

impl StatusResponse {
    pub(crate) fn new(exam_id: ExamId, status: ExamStatus) -> Self {
        Self {
            exam_id,
            uploaded: status.uploaded,
            text_extracted: status.text_extracted,
            parsed: status.parsed,
            graded: status.graded,
            processing_stage: status.processing_stage(),
            total_questions: status.total_questions,
        }
    }
}
