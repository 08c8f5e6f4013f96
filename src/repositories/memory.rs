use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::models::{Exam, ExamId, GradingResult, NewExam, QuestionAnswer};
use crate::repositories::exams::{ExamStore, StoreError};
use crate::repositories::locks::{ExamGuard, ExamLocks};

/// Process-local store. Contents do not survive a restart.
#[derive(Debug, Default)]
pub(crate) struct MemoryExamStore {
    exams: RwLock<HashMap<ExamId, Exam>>,
    locks: ExamLocks,
}

impl MemoryExamStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExamStore for MemoryExamStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn create(&self, exam: NewExam) -> Result<ExamId, StoreError> {
        let id = ExamId::generate();
        let record = Exam {
            id: id.clone(),
            raw_document: exam.raw_document,
            extracted_text: exam.extracted_text,
            questions: None,
            grading_result: None,
            created_at: OffsetDateTime::now_utc(),
        };

        self.exams.write().await.insert(id.clone(), record);
        Ok(id)
    }

    async fn get(&self, id: &ExamId) -> Result<Option<Exam>, StoreError> {
        Ok(self.exams.read().await.get(id).cloned())
    }

    async fn set_questions_once(
        &self,
        id: &ExamId,
        questions: Vec<QuestionAnswer>,
    ) -> Result<Vec<QuestionAnswer>, StoreError> {
        let mut exams = self.exams.write().await;
        let exam = exams.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;

        Ok(exam.questions.get_or_insert(questions).clone())
    }

    async fn set_results_once(
        &self,
        id: &ExamId,
        result: GradingResult,
    ) -> Result<GradingResult, StoreError> {
        let mut exams = self.exams.write().await;
        let exam = exams.get_mut(id).ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if exam.questions.is_none() {
            return Err(StoreError::StageOrder {
                id: id.clone(),
                stage: "grading results",
                requires: "questions",
            });
        }

        Ok(exam.grading_result.get_or_insert(result).clone())
    }

    async fn lock(&self, id: &ExamId) -> ExamGuard {
        self.locks.acquire(id).await
    }
}
