mod aggregate;
mod errors;
#[cfg(test)]
mod tests;

use std::sync::Arc;

use sha2::{Digest, Sha256};

use crate::core::metrics;
use crate::models::{
    DocumentFormat, ExamId, ExamStatus, GradingResult, NewExam, QuestionAnswer, QuestionGrade,
    RawDocument, StudentAnswer,
};
use crate::repositories::ExamStore;
use crate::services::exam_parser::{ExamParser, ParseError};
use crate::services::extraction::TextExtractor;
use crate::services::structured;

pub(crate) use aggregate::{aggregate, GradeSummary};
pub(crate) use errors::PipelineError;

const MIN_UPLOAD_TEXT_CHARS: usize = 10;

#[derive(Debug, Clone)]
pub(crate) struct UploadLimits {
    pub(crate) max_bytes: u64,
    pub(crate) allowed_extensions: Vec<String>,
}

impl UploadLimits {
    pub(crate) fn max_mb(&self) -> u64 {
        self.max_bytes / (1024 * 1024)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct UploadReceipt {
    pub(crate) exam_id: ExamId,
    pub(crate) file_type: DocumentFormat,
    pub(crate) file_size: u64,
}

/// Drives an exam through upload, parse, and grade.
///
/// Holds no per-exam state of its own: everything lives in the store. Parse and grade hold the
/// store's per-exam guard while calling the generative service, so concurrent requests for the
/// same exam pay for one generation and all observe the stored artifact.
#[derive(Clone)]
pub(crate) struct ExamPipeline {
    store: Arc<dyn ExamStore>,
    extractor: TextExtractor,
    parser: ExamParser,
    limits: UploadLimits,
}

impl ExamPipeline {
    pub(crate) fn new(
        store: Arc<dyn ExamStore>,
        extractor: TextExtractor,
        parser: ExamParser,
        limits: UploadLimits,
    ) -> Self {
        Self { store, extractor, parser, limits }
    }

    pub(crate) fn store(&self) -> &Arc<dyn ExamStore> {
        &self.store
    }

    pub(crate) fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    /// Resolves the document format from the filename against the enabled extensions.
    pub(crate) fn check_format(&self, filename: &str) -> Result<DocumentFormat, PipelineError> {
        DocumentFormat::from_filename(filename, &self.limits.allowed_extensions).ok_or_else(|| {
            metrics::record_upload("unknown", "unsupported");
            PipelineError::UnsupportedFormat {
                filename: filename.to_string(),
                allowed: self.limits.allowed_extensions.join(", "),
            }
        })
    }

    pub(crate) async fn upload(
        &self,
        bytes: Vec<u8>,
        filename: &str,
    ) -> Result<UploadReceipt, PipelineError> {
        let format = self.check_format(filename)?;

        let file_size = bytes.len() as u64;
        if file_size > self.limits.max_bytes {
            metrics::record_upload(format.extension(), "too_large");
            return Err(PipelineError::FileTooLarge { size: file_size, max_mb: self.limits.max_mb() });
        }

        tracing::info!(filename, file_type = format.extension(), file_size, "Extracting exam text");
        let text = match self.extractor.extract(&bytes, format.extension()).await {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(filename, error = %err, "Text extraction failed");
                metrics::record_upload(format.extension(), "rejected");
                return Err(PipelineError::UploadRejected { detail: err.to_string() });
            }
        };

        let chars = text.trim().chars().count();
        if chars < MIN_UPLOAD_TEXT_CHARS {
            tracing::warn!(filename, chars, "Too little text extracted from upload");
            metrics::record_upload(format.extension(), "rejected");
            return Err(PipelineError::UploadRejected {
                detail: format!(
                    "only {chars} characters extracted, at least {MIN_UPLOAD_TEXT_CHARS} \
                     required; make sure the file contains readable text. Extracted: '{}'",
                    structured::preview(&text, 100)
                ),
            });
        }

        let sha256 = hex::encode(Sha256::digest(&bytes));
        let exam_id = self
            .store
            .create(NewExam {
                raw_document: RawDocument {
                    filename: filename.to_string(),
                    format,
                    bytes,
                    sha256,
                },
                extracted_text: text,
            })
            .await?;

        metrics::record_upload(format.extension(), "accepted");
        tracing::info!(exam_id = %exam_id, chars, "Exam uploaded");
        Ok(UploadReceipt { exam_id, file_type: format, file_size })
    }

    pub(crate) async fn parse(&self, id: &ExamId) -> Result<Vec<QuestionAnswer>, PipelineError> {
        let exam = self.store.get(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if let Some(questions) = exam.questions {
            metrics::record_cache_hit("parse");
            return Ok(questions);
        }

        let _guard = self.store.lock(id).await;

        // Another request may have parsed while we waited.
        let exam = self.store.get(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if let Some(questions) = exam.questions {
            metrics::record_cache_hit("parse");
            return Ok(questions);
        }

        let questions = match self.parser.parse_questions(&exam.extracted_text).await {
            Ok(questions) if questions.is_empty() => {
                tracing::warn!(exam_id = %id, "No questions found in exam text");
                return Err(PipelineError::ParseRejected {
                    detail: "no questions found in the exam text".to_string(),
                });
            }
            Ok(questions) => questions,
            Err(err @ ParseError::NoRecognizableQuestions { .. }) => {
                return Err(PipelineError::ParseRejected { detail: err.to_string() });
            }
            Err(err) => return Err(err.into()),
        };

        let stored = self.store.set_questions_once(id, questions).await?;
        tracing::info!(exam_id = %id, questions = stored.len(), "Exam parsed");
        Ok(stored)
    }

    pub(crate) async fn grade(
        &self,
        id: &ExamId,
        answers: &[StudentAnswer],
    ) -> Result<GradingResult, PipelineError> {
        let exam = self.store.get(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        let questions = exam.questions.ok_or_else(|| PipelineError::NotYetParsed(id.clone()))?;
        check_indexes(answers, questions.len())?;
        if let Some(result) = exam.grading_result {
            metrics::record_cache_hit("grade");
            return Ok(result);
        }

        let _guard = self.store.lock(id).await;

        let exam = self.store.get(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        if let Some(result) = exam.grading_result {
            metrics::record_cache_hit("grade");
            return Ok(result);
        }

        tracing::info!(exam_id = %id, answers = answers.len(), "Grading exam");
        let mut question_grades = Vec::with_capacity(answers.len());
        for answer in answers {
            let question = &questions[answer.question_index];
            let assessment = self
                .parser
                .grade_answer(&question.question, &question.correct_answer, &answer.answer)
                .await
                .map_err(|err| {
                    tracing::error!(
                        exam_id = %id,
                        question_index = answer.question_index,
                        error = %err,
                        "Grading failed"
                    );
                    err
                })?;

            question_grades.push(QuestionGrade {
                question_index: answer.question_index,
                question: question.question.clone(),
                correct_answer: question.correct_answer.clone(),
                student_answer: answer.answer.clone(),
                score: assessment.score,
                is_correct: assessment.is_correct,
                explanation: assessment.explanation,
            });
        }

        let GradeSummary { final_score, correct_count } = aggregate(&question_grades);
        let result = GradingResult {
            question_grades,
            final_score,
            correct_count,
            total_questions: questions.len(),
        };

        let stored = self.store.set_results_once(id, result).await?;
        tracing::info!(
            exam_id = %id,
            final_score = stored.final_score,
            correct = stored.correct_count,
            "Exam graded"
        );
        Ok(stored)
    }

    pub(crate) async fn results(&self, id: &ExamId) -> Result<GradingResult, PipelineError> {
        let exam = self.store.get(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))?;
        exam.grading_result.ok_or_else(|| PipelineError::ResultsNotFound(id.clone()))
    }

    pub(crate) async fn status(&self, id: &ExamId) -> Result<ExamStatus, PipelineError> {
        self.store.get_status(id).await?.ok_or_else(|| PipelineError::NotFound(id.clone()))
    }
}

fn check_indexes(answers: &[StudentAnswer], total: usize) -> Result<(), PipelineError> {
    match answers.iter().find(|answer| answer.question_index >= total) {
        Some(answer) => Err(PipelineError::IndexOutOfRange { index: answer.question_index, total }),
        None => Ok(()),
    }
}
