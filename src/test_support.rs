use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request},
    Router,
};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::api;
use crate::core::{config::Settings, state::AppState};
use crate::models::{
    DocumentFormat, GradingResult, NewExam, QuestionAnswer, QuestionGrade, RawDocument,
};
use crate::pipeline::{self, ExamPipeline, UploadLimits};
use crate::repositories::MemoryExamStore;
use crate::services::exam_parser::{ExamParser, ParserOptions};
use crate::services::extraction::TextExtractor;
use crate::services::llm::{GenerationError, GenerationOptions, TextGenerator};
use crate::services::ocr::{OcrEngine, OcrRegion};
use crate::services::pdf::{PdfRasterizer, RasterizeOptions};

pub(crate) const MULTIPART_BOUNDARY: &str = "exam-grader-test-boundary";

const ENV_OVERRIDES: &[&str] = &[
    "ALLOWED_EXTENSIONS",
    "MAX_UPLOAD_SIZE_MB",
    "OCR_LANGUAGE",
    "STORE_BACKEND",
    "EXAM_TTL_SECONDS",
    "API_PREFIX",
    "LLM_BASE_URL",
    "LLM_MODEL",
    "LLM_PARSE_MAX_TOKENS",
    "LLM_GRADE_MAX_TOKENS",
    "LLM_TEMPERATURE",
    "LLM_REQUEST_TIMEOUT",
    "PDF_MAX_PAGES",
];

pub(crate) struct TestContext {
    pub(crate) state: AppState,
    pub(crate) app: Router,
    _guard: OwnedMutexGuard<()>,
}

pub(crate) async fn env_lock() -> OwnedMutexGuard<()> {
    static LOCK: OnceLock<Arc<Mutex<()>>> = OnceLock::new();
    let lock = LOCK.get_or_init(|| Arc::new(Mutex::new(()))).clone();
    lock.lock_owned().await
}

pub(crate) fn set_test_env() {
    std::env::set_var("EXAM_GRADER_ENV", "test");
    std::env::set_var("EXAM_GRADER_STRICT_CONFIG", "0");
    std::env::set_var("PROMETHEUS_ENABLED", "0");
    std::env::set_var("LLM_API_KEY", "");
    for name in ENV_OVERRIDES {
        std::env::remove_var(name);
    }
}

/// App wired to an in-memory store, echoing OCR and the given generator.
pub(crate) async fn setup_test_context(generator: Arc<ScriptedGenerator>) -> TestContext {
    let guard = env_lock().await;
    set_test_env();

    let settings = Settings::load().expect("settings");
    let limits = UploadLimits {
        max_bytes: settings.upload().max_upload_bytes(),
        allowed_extensions: settings.upload().allowed_extensions.clone(),
    };
    let pipeline = build_pipeline(generator, limits);

    let state = AppState::new(settings, pipeline);
    let app = api::router::router(state.clone());

    TestContext { state, app, _guard: guard }
}

pub(crate) fn test_pipeline(generator: Arc<ScriptedGenerator>) -> ExamPipeline {
    build_pipeline(
        generator,
        UploadLimits {
            max_bytes: 1024 * 1024,
            allowed_extensions: ["pdf", "png", "jpg", "jpeg", "txt"].map(String::from).to_vec(),
        },
    )
}

fn build_pipeline(generator: Arc<ScriptedGenerator>, limits: UploadLimits) -> ExamPipeline {
    let extractor = TextExtractor::new(
        Arc::new(FakeOcr::echo()),
        Arc::new(FakePdfRasterizer::texts(["1. What is 2+2? Answer: 4"])),
        3,
    );
    let parser = ExamParser::new(generator, parser_options());
    ExamPipeline::new(Arc::new(MemoryExamStore::new()), extractor, parser, limits)
}

pub(crate) fn parser_options() -> ParserOptions {
    let options = GenerationOptions {
        max_tokens: 256,
        temperature: 0.1,
        timeout: Duration::from_secs(5),
    };
    ParserOptions { parse: options, grade: options }
}

/// Generator that replays canned replies in order and counts calls.
pub(crate) struct ScriptedGenerator {
    replies: StdMutex<VecDeque<Result<String, GenerationError>>>,
    calls: AtomicUsize,
    delay: Option<Duration>,
    configured: bool,
}

impl ScriptedGenerator {
    pub(crate) fn with_replies<I, S>(replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self::scripted(replies.into_iter().map(|reply| Ok(reply.into())).collect(), None))
    }

    /// Like `with_replies`, but every call sleeps first so concurrent callers overlap.
    pub(crate) fn delayed<I, S>(delay: Duration, replies: I) -> Arc<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Arc::new(Self::scripted(
            replies.into_iter().map(|reply| Ok(reply.into())).collect(),
            Some(delay),
        ))
    }

    pub(crate) fn failing(error: GenerationError) -> Arc<Self> {
        Arc::new(Self::scripted(VecDeque::from([Err(error)]), None))
    }

    /// Replies in order; `Err` entries fail that call.
    pub(crate) fn sequence(replies: Vec<Result<String, GenerationError>>) -> Arc<Self> {
        Arc::new(Self::scripted(replies.into(), None))
    }

    pub(crate) fn unconfigured() -> Arc<Self> {
        Arc::new(Self { configured: false, ..Self::scripted(VecDeque::new(), None) })
    }

    fn scripted(replies: VecDeque<Result<String, GenerationError>>, delay: Option<Duration>) -> Self {
        Self { replies: StdMutex::new(replies), calls: AtomicUsize::new(0), delay, configured: true }
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(
        &self,
        _prompt: &str,
        _options: GenerationOptions,
    ) -> Result<String, GenerationError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.replies
            .lock()
            .expect("replies lock")
            .pop_front()
            .unwrap_or_else(|| Err(GenerationError::Transport("no scripted reply left".to_string())))
    }
}

enum OcrMode {
    Echo,
    EchoFailingOn(String),
    Regions(Vec<String>),
    Failing(String),
}

/// OCR stand-in. `echo` reads the image bytes back as text.
pub(crate) struct FakeOcr {
    mode: OcrMode,
    languages: Vec<String>,
}

impl FakeOcr {
    fn with_mode(mode: OcrMode) -> Self {
        Self { mode, languages: vec!["en".to_string()] }
    }

    pub(crate) fn echo() -> Self {
        Self::with_mode(OcrMode::Echo)
    }

    pub(crate) fn echo_failing_on(marker: &str) -> Self {
        Self::with_mode(OcrMode::EchoFailingOn(marker.to_string()))
    }

    pub(crate) fn regions<const N: usize>(regions: [&str; N]) -> Self {
        Self::with_mode(OcrMode::Regions(regions.map(String::from).to_vec()))
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self::with_mode(OcrMode::Failing(message.to_string()))
    }
}

fn region(text: String) -> OcrRegion {
    OcrRegion { text, confidence: Some(0.99) }
}

#[async_trait]
impl OcrEngine for FakeOcr {
    fn languages(&self) -> &[String] {
        &self.languages
    }

    async fn recognize(&self, image: &[u8]) -> anyhow::Result<Vec<OcrRegion>> {
        let text = String::from_utf8_lossy(image).into_owned();
        match &self.mode {
            OcrMode::Echo => Ok(vec![region(text)]),
            OcrMode::EchoFailingOn(marker) if text.contains(marker.as_str()) => {
                Err(anyhow!("unreadable page"))
            }
            OcrMode::EchoFailingOn(_) => Ok(vec![region(text)]),
            OcrMode::Regions(regions) => Ok(regions.iter().cloned().map(region).collect()),
            OcrMode::Failing(message) => Err(anyhow!(message.clone())),
        }
    }
}

/// Rasterizer stand-in whose page images are plain text bytes.
pub(crate) struct FakePdfRasterizer {
    pages: Result<Vec<Vec<u8>>, String>,
}

impl FakePdfRasterizer {
    pub(crate) fn pages(count: usize) -> Self {
        Self { pages: Ok(vec![Vec::new(); count]) }
    }

    pub(crate) fn texts<const N: usize>(texts: [&str; N]) -> Self {
        Self { pages: Ok(texts.iter().map(|text| text.as_bytes().to_vec()).collect()) }
    }

    pub(crate) fn failing(message: &str) -> Self {
        Self { pages: Err(message.to_string()) }
    }
}

#[async_trait]
impl PdfRasterizer for FakePdfRasterizer {
    async fn rasterize(
        &self,
        _pdf: &[u8],
        options: RasterizeOptions,
    ) -> anyhow::Result<Vec<Vec<u8>>> {
        match &self.pages {
            Ok(pages) => Ok(pages.iter().take(options.max_pages as usize).cloned().collect()),
            Err(message) => Err(anyhow!(message.clone())),
        }
    }
}

pub(crate) fn new_exam(filename: &str, text: &str) -> NewExam {
    let format = filename
        .rsplit_once('.')
        .and_then(|(_, extension)| DocumentFormat::from_tag(extension))
        .unwrap_or(DocumentFormat::Txt);
    let bytes = text.as_bytes().to_vec();

    NewExam {
        raw_document: RawDocument {
            filename: filename.to_string(),
            format,
            sha256: hex::encode(Sha256::digest(&bytes)),
            bytes,
        },
        extracted_text: text.to_string(),
    }
}

pub(crate) fn question(question: &str, correct_answer: &str) -> QuestionAnswer {
    QuestionAnswer { question: question.to_string(), correct_answer: correct_answer.to_string() }
}

pub(crate) fn grade(question_index: usize, score: f64) -> QuestionGrade {
    QuestionGrade {
        question_index,
        question: format!("Q{question_index}"),
        correct_answer: "A".to_string(),
        student_answer: "A".to_string(),
        score,
        is_correct: score == 100.0,
        explanation: "scripted".to_string(),
    }
}

pub(crate) fn sample_result(scores: &[f64]) -> GradingResult {
    let question_grades: Vec<_> =
        scores.iter().enumerate().map(|(index, score)| grade(index, *score)).collect();
    let summary = pipeline::aggregate(&question_grades);

    GradingResult {
        total_questions: question_grades.len(),
        question_grades,
        final_score: summary.final_score,
        correct_count: summary.correct_count,
    }
}

pub(crate) fn json_request(method: Method, uri: &str, body: Option<serde_json::Value>) -> Request<Body> {
    let builder = Request::builder().method(method).uri(uri);

    if let Some(body) = body {
        let bytes = serde_json::to_vec(&body).expect("serialize body");
        builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(bytes))
            .expect("request body")
    } else {
        builder.body(Body::empty()).expect("request body")
    }
}

pub(crate) fn multipart_request(uri: &str, field: &str, filename: &str, content: &[u8]) -> Request<Body> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{MULTIPART_BOUNDARY}\r\n").as_bytes());
    body.extend_from_slice(
        format!("Content-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\n")
            .as_bytes(),
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(content);
    body.extend_from_slice(format!("\r\n--{MULTIPART_BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={MULTIPART_BOUNDARY}"),
        )
        .body(Body::from(body))
        .expect("multipart request")
}

pub(crate) async fn read_json(response: axum::response::Response<Body>) -> serde_json::Value {
    let body = to_bytes(response.into_body(), usize::MAX).await.expect("response body");
    serde_json::from_slice(&body).unwrap_or_else(|err| {
        let body_text = String::from_utf8_lossy(&body);
        panic!("json parse: {err}; body: {body_text}");
    })
}
