use async_trait::async_trait;
use thiserror::Error;

use crate::models::{Exam, ExamId, ExamStatus, GradingResult, NewExam, QuestionAnswer};
use crate::repositories::locks::ExamGuard;

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("exam {0} not found")]
    NotFound(ExamId),
    #[error("exam {id} cannot store {stage} before {requires}")]
    StageOrder { id: ExamId, stage: &'static str, requires: &'static str },
    #[error("stored exam {id} is unreadable: {reason}")]
    Corrupted { id: ExamId, reason: String },
    #[error("exam store backend failed: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum StoreHealth {
    Healthy,
    Unhealthy(String),
}

/// Keyed persistence for exams and their stage artifacts.
///
/// Artifacts are written at most once: `set_*_once` on a field that already holds a value
/// leaves it untouched and returns the stored value. `lock` hands out a per-exam guard so
/// callers can serialize expensive stage work on one exam while other exams proceed.
#[async_trait]
pub(crate) trait ExamStore: Send + Sync {
    fn backend(&self) -> &'static str;

    async fn create(&self, exam: NewExam) -> Result<ExamId, StoreError>;

    async fn get(&self, id: &ExamId) -> Result<Option<Exam>, StoreError>;

    async fn set_questions_once(
        &self,
        id: &ExamId,
        questions: Vec<QuestionAnswer>,
    ) -> Result<Vec<QuestionAnswer>, StoreError>;

    async fn set_results_once(
        &self,
        id: &ExamId,
        result: GradingResult,
    ) -> Result<GradingResult, StoreError>;

    async fn get_status(&self, id: &ExamId) -> Result<Option<ExamStatus>, StoreError> {
        Ok(self.get(id).await?.map(|exam| exam.status()))
    }

    async fn lock(&self, id: &ExamId) -> ExamGuard;

    async fn health(&self) -> StoreHealth {
        StoreHealth::Healthy
    }
}
