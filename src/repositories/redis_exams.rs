use std::collections::HashMap;

use async_trait::async_trait;
use redis::{AsyncCommands, Script, Value};
use serde::de::DeserializeOwned;
use time::OffsetDateTime;

use crate::core::redis::{RedisHandle, RedisHealth};
use crate::models::{
    DocumentFormat, Exam, ExamId, ExamStatus, GradingResult, NewExam, QuestionAnswer, RawDocument,
};
use crate::repositories::exams::{ExamStore, StoreError, StoreHealth};
use crate::repositories::locks::{ExamGuard, ExamLocks};

const FIELD_FILENAME: &str = "filename";
const FIELD_FORMAT: &str = "format";
const FIELD_RAW: &str = "raw";
const FIELD_SHA256: &str = "sha256";
const FIELD_TEXT: &str = "extracted_text";
const FIELD_CREATED_AT: &str = "created_at";
const FIELD_QUESTIONS: &str = "questions";
const FIELD_RESULTS: &str = "grading_result";

/// Writes ARGV[2] into field ARGV[1] unless it is already set, then returns the stored
/// value. -1 means the exam does not exist, -2 that prerequisite field ARGV[3] is unset.
const SET_ONCE_SCRIPT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
    return -1
end
if ARGV[3] ~= "" and redis.call("HEXISTS", KEYS[1], ARGV[3]) == 0 then
    return -2
end
redis.call("HSETNX", KEYS[1], ARGV[1], ARGV[2])
return redis.call("HGET", KEYS[1], ARGV[1])
"#;

/// One redis hash per exam. Once-only writes go through a Lua script so they hold across
/// processes.
///
/// The per-exam `lock` is local to this process. Replicas racing on the same exam each call
/// the generative service, and the set-once script keeps whichever value landed first.
pub(crate) struct RedisExamStore {
    redis: RedisHandle,
    ttl_seconds: u64,
    locks: ExamLocks,
    set_once: Script,
}

impl RedisExamStore {
    pub(crate) fn new(redis: RedisHandle, ttl_seconds: u64) -> Self {
        Self {
            redis,
            ttl_seconds,
            locks: ExamLocks::default(),
            set_once: Script::new(SET_ONCE_SCRIPT),
        }
    }

    async fn set_once<T: serde::Serialize + DeserializeOwned>(
        &self,
        id: &ExamId,
        field: &'static str,
        requires: &'static str,
        value: &T,
    ) -> Result<T, StoreError> {
        let encoded =
            serde_json::to_string(value).map_err(|err| StoreError::Backend(err.to_string()))?;
        let mut conn = self.redis.connection().await.map_err(backend)?;

        let reply: Value = self
            .set_once
            .key(exam_key(id))
            .arg(field)
            .arg(encoded)
            .arg(requires)
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        match reply {
            Value::Int(-1) => Err(StoreError::NotFound(id.clone())),
            Value::Int(-2) => Err(StoreError::StageOrder { id: id.clone(), stage: field, requires }),
            Value::Data(bytes) => decode_json(id, field, &bytes),
            other => Err(StoreError::Backend(format!("unexpected set-once reply: {other:?}"))),
        }
    }
}

#[async_trait]
impl ExamStore for RedisExamStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn create(&self, exam: NewExam) -> Result<ExamId, StoreError> {
        let id = ExamId::generate();
        let key = exam_key(&id);
        let created_at = OffsetDateTime::now_utc().unix_timestamp().to_string();
        let document = exam.raw_document;

        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("HSET")
            .arg(&key)
            .arg(FIELD_FILENAME)
            .arg(&document.filename)
            .arg(FIELD_FORMAT)
            .arg(document.format.extension())
            .arg(FIELD_RAW)
            .arg(&document.bytes[..])
            .arg(FIELD_SHA256)
            .arg(&document.sha256)
            .arg(FIELD_TEXT)
            .arg(&exam.extracted_text)
            .arg(FIELD_CREATED_AT)
            .arg(&created_at)
            .ignore();
        if self.ttl_seconds > 0 {
            pipe.cmd("EXPIRE").arg(&key).arg(self.ttl_seconds).ignore();
        }

        let mut conn = self.redis.connection().await.map_err(backend)?;
        let () = pipe.query_async(&mut conn).await.map_err(backend)?;
        Ok(id)
    }

    async fn get(&self, id: &ExamId) -> Result<Option<Exam>, StoreError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let mut fields: HashMap<String, Vec<u8>> =
            conn.hgetall(exam_key(id)).await.map_err(backend)?;
        if fields.is_empty() {
            return Ok(None);
        }

        let filename = take_text(&mut fields, id, FIELD_FILENAME)?;
        let format_tag = take_text(&mut fields, id, FIELD_FORMAT)?;
        let format = DocumentFormat::from_tag(&format_tag)
            .ok_or_else(|| corrupted(id, format!("unknown format {format_tag}")))?;
        let sha256 = take_text(&mut fields, id, FIELD_SHA256)?;
        let extracted_text = take_text(&mut fields, id, FIELD_TEXT)?;
        let created_at = take_text(&mut fields, id, FIELD_CREATED_AT)?
            .parse::<i64>()
            .ok()
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok())
            .ok_or_else(|| corrupted(id, "invalid created_at".to_string()))?;
        let bytes = fields.remove(FIELD_RAW).unwrap_or_default();

        let questions = fields
            .remove(FIELD_QUESTIONS)
            .map(|raw| decode_json::<Vec<QuestionAnswer>>(id, FIELD_QUESTIONS, &raw))
            .transpose()?;
        let grading_result = fields
            .remove(FIELD_RESULTS)
            .map(|raw| decode_json::<GradingResult>(id, FIELD_RESULTS, &raw))
            .transpose()?;

        Ok(Some(Exam {
            id: id.clone(),
            raw_document: RawDocument { filename, format, bytes, sha256 },
            extracted_text,
            questions,
            grading_result,
            created_at,
        }))
    }

    async fn set_questions_once(
        &self,
        id: &ExamId,
        questions: Vec<QuestionAnswer>,
    ) -> Result<Vec<QuestionAnswer>, StoreError> {
        self.set_once(id, FIELD_QUESTIONS, FIELD_TEXT, &questions).await
    }

    async fn set_results_once(
        &self,
        id: &ExamId,
        result: GradingResult,
    ) -> Result<GradingResult, StoreError> {
        self.set_once(id, FIELD_RESULTS, FIELD_QUESTIONS, &result).await
    }

    async fn get_status(&self, id: &ExamId) -> Result<Option<ExamStatus>, StoreError> {
        let mut conn = self.redis.connection().await.map_err(backend)?;
        let key = exam_key(id);
        let (has_text, questions, graded): (bool, Option<Vec<u8>>, bool) = redis::pipe()
            .hexists(&key, FIELD_TEXT)
            .hget(&key, FIELD_QUESTIONS)
            .hexists(&key, FIELD_RESULTS)
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        if !has_text {
            return Ok(None);
        }
        let total_questions = questions
            .map(|raw| decode_json::<Vec<QuestionAnswer>>(id, FIELD_QUESTIONS, &raw))
            .transpose()?
            .map(|questions| questions.len());

        Ok(Some(ExamStatus {
            uploaded: true,
            text_extracted: true,
            parsed: total_questions.is_some(),
            graded,
            total_questions,
        }))
    }

    async fn lock(&self, id: &ExamId) -> ExamGuard {
        self.locks.acquire(id).await
    }

    async fn health(&self) -> StoreHealth {
        match self.redis.health().await {
            RedisHealth::Healthy => StoreHealth::Healthy,
            RedisHealth::Disconnected => StoreHealth::Unhealthy("disconnected".to_string()),
            RedisHealth::Unhealthy(error) => StoreHealth::Unhealthy(error),
        }
    }
}

fn exam_key(id: &ExamId) -> String {
    format!("exam:{id}")
}

fn take_text(
    fields: &mut HashMap<String, Vec<u8>>,
    id: &ExamId,
    name: &str,
) -> Result<String, StoreError> {
    let bytes = fields.remove(name).ok_or_else(|| corrupted(id, format!("missing {name}")))?;
    String::from_utf8(bytes).map_err(|err| corrupted(id, format!("{name}: {err}")))
}

fn decode_json<T: DeserializeOwned>(id: &ExamId, field: &str, raw: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(raw).map_err(|err| corrupted(id, format!("{field}: {err}")))
}

fn corrupted(id: &ExamId, reason: String) -> StoreError {
    StoreError::Corrupted { id: id.clone(), reason }
}

fn backend(err: redis::RedisError) -> StoreError {
    tracing::error!(error = %err, "Redis exam store error");
    StoreError::Backend(err.to_string())
}
