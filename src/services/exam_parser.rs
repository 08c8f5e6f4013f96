use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{Map, Value};
use thiserror::Error;

use crate::core::config::AiSettings;
use crate::core::metrics;
use crate::models::QuestionAnswer;
use crate::services::llm::{GenerationError, GenerationOptions, TextGenerator};
use crate::services::structured::{self, PayloadError};

pub(crate) const MIN_EXAM_TEXT_CHARS: usize = 20;
const MISSING_EXPLANATION: &str = "No explanation provided";
const PREVIEW_CHARS: usize = 200;

#[derive(Debug, Error)]
pub(crate) enum ParseError {
    #[error(
        "exam text is too short or empty ({chars} characters after trimming, at least {min} \
         required); make sure the file contains readable exam content"
    )]
    EmptyInput { chars: usize, min: usize },
    #[error("generative service is not configured; set LLM_API_KEY and restart the service")]
    UpstreamUnconfigured,
    #[error("{0}")]
    Upstream(GenerationError),
    #[error("invalid response from the generative service: {source}. Response preview: {preview}")]
    MalformedUpstreamResponse { source: PayloadError, preview: String },
    #[error(
        "generative service returned {items} item(s) but none had both 'question' and \
         'correct_answer'; the exam format may not be recognized. First item: {sample}"
    )]
    NoRecognizableQuestions { items: usize, sample: String },
}

impl From<GenerationError> for ParseError {
    fn from(err: GenerationError) -> Self {
        match err {
            GenerationError::Unconfigured => Self::UpstreamUnconfigured,
            other => Self::Upstream(other),
        }
    }
}

/// Normalized verdict for one student answer.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct AnswerAssessment {
    pub(crate) score: f64,
    pub(crate) is_correct: bool,
    pub(crate) explanation: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct ParserOptions {
    pub(crate) parse: GenerationOptions,
    pub(crate) grade: GenerationOptions,
}

impl ParserOptions {
    pub(crate) fn from_settings(ai: &AiSettings) -> Self {
        let timeout = Duration::from_secs(ai.request_timeout);
        Self {
            parse: GenerationOptions {
                max_tokens: ai.parse_max_tokens,
                temperature: ai.temperature,
                timeout,
            },
            grade: GenerationOptions {
                max_tokens: ai.grade_max_tokens,
                temperature: ai.temperature,
                timeout,
            },
        }
    }
}

/// Turns generative replies into questions and grades.
#[derive(Clone)]
pub(crate) struct ExamParser {
    generator: Arc<dyn TextGenerator>,
    options: ParserOptions,
}

impl ExamParser {
    pub(crate) fn new(generator: Arc<dyn TextGenerator>, options: ParserOptions) -> Self {
        Self { generator, options }
    }

    pub(crate) async fn parse_questions(
        &self,
        text: &str,
    ) -> Result<Vec<QuestionAnswer>, ParseError> {
        let chars = text.trim().chars().count();
        if chars < MIN_EXAM_TEXT_CHARS {
            tracing::warn!(chars, "Exam text is too short to parse");
            return Err(ParseError::EmptyInput { chars, min: MIN_EXAM_TEXT_CHARS });
        }
        if !self.generator.is_configured() {
            return Err(ParseError::UpstreamUnconfigured);
        }

        tracing::info!(chars, model = %self.generator.model(), "Parsing exam text");
        tracing::debug!(preview = %structured::preview(text, 1000), "Exam text preview");

        let reply = self.call("parse", &parse_prompt(text), self.options.parse).await?;
        let items = structured::extract_json_array(&reply).map_err(|source| {
            tracing::error!(error = %source, preview = %structured::preview(&reply, 1000), "Undecodable parse reply");
            ParseError::MalformedUpstreamResponse {
                source,
                preview: structured::preview(&reply, PREVIEW_CHARS),
            }
        })?;

        let questions = collect_questions(&items);
        if questions.is_empty() && !items.is_empty() {
            let sample = items[0].to_string();
            tracing::error!(items = items.len(), sample = %sample, "No usable questions in reply");
            return Err(ParseError::NoRecognizableQuestions {
                items: items.len(),
                sample: structured::preview(&sample, PREVIEW_CHARS),
            });
        }

        tracing::info!(
            items = items.len(),
            questions = questions.len(),
            "Parsed questions from generative reply"
        );
        Ok(questions)
    }

    pub(crate) async fn grade_answer(
        &self,
        question: &str,
        correct_answer: &str,
        student_answer: &str,
    ) -> Result<AnswerAssessment, ParseError> {
        if !self.generator.is_configured() {
            return Err(ParseError::UpstreamUnconfigured);
        }

        let prompt = grade_prompt(question, correct_answer, student_answer);
        let reply = self.call("grade", &prompt, self.options.grade).await?;

        let malformed = |source: PayloadError| {
            tracing::error!(error = %source, preview = %structured::preview(&reply, 500), "Undecodable grade reply");
            ParseError::MalformedUpstreamResponse {
                source,
                preview: structured::preview(&reply, PREVIEW_CHARS),
            }
        };

        let fields = structured::extract_json_object(&reply).map_err(malformed)?;
        assess(&fields).map_err(malformed)
    }

    async fn call(
        &self,
        operation: &'static str,
        prompt: &str,
        options: GenerationOptions,
    ) -> Result<String, ParseError> {
        let timer = Instant::now();
        let result = self.generator.generate(prompt, options).await;
        let elapsed = timer.elapsed().as_secs_f64();

        match result {
            Ok(reply) => {
                metrics::record_llm_request(operation, "success", elapsed);
                tracing::debug!(
                    operation,
                    duration_seconds = elapsed,
                    preview = %structured::preview(&reply, 500),
                    "Raw generative reply"
                );
                Ok(reply)
            }
            Err(err) => {
                metrics::record_llm_request(operation, "failed", elapsed);
                tracing::error!(operation, duration_seconds = elapsed, error = %err, "Generative call failed");
                Err(err.into())
            }
        }
    }
}

/// Keeps object elements carrying both keys; anything else is skipped with a warning.
fn collect_questions(items: &[Value]) -> Vec<QuestionAnswer> {
    items
        .iter()
        .enumerate()
        .filter_map(|(idx, item)| {
            let Some(object) = item.as_object() else {
                tracing::warn!(index = idx, "Skipping non-object item");
                return None;
            };
            match (object.get("question"), object.get("correct_answer")) {
                (Some(question), Some(answer)) => Some(QuestionAnswer {
                    question: coerce_text(question),
                    correct_answer: coerce_text(answer),
                }),
                _ => {
                    let keys: Vec<&str> = object.keys().map(String::as_str).collect();
                    tracing::warn!(index = idx, ?keys, "Skipping item without question/correct_answer");
                    None
                }
            }
        })
        .collect()
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.trim().to_string(),
        other => other.to_string().trim().to_string(),
    }
}

fn assess(fields: &Map<String, Value>) -> Result<AnswerAssessment, PayloadError> {
    let raw_score = match fields.get("score") {
        None | Some(Value::Null) => 0.0,
        Some(Value::Number(number)) => number.as_f64().unwrap_or(f64::NAN),
        Some(Value::String(text)) => text.trim().parse::<f64>().unwrap_or(f64::NAN),
        Some(_) => f64::NAN,
    };
    if !raw_score.is_finite() {
        return Err(PayloadError::InvalidJson {
            reason: format!("score is not a number: {}", fields.get("score").unwrap_or(&Value::Null)),
        });
    }

    let score = raw_score.clamp(0.0, 100.0);
    let flagged = match fields.get("is_correct") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => text.trim().eq_ignore_ascii_case("true"),
        _ => false,
    };
    let explanation = match fields.get("explanation") {
        None | Some(Value::Null) => MISSING_EXPLANATION.to_string(),
        Some(value) => coerce_text(value),
    };

    Ok(AnswerAssessment { score, is_correct: flagged || score == 100.0, explanation })
}

fn parse_prompt(text: &str) -> String {
    format!(
        r#"You are an expert at reading exam documents. Extract every question and its correct answer from the exam text below.

EXAM TEXT:
{text}

INSTRUCTIONS:
1. Find ALL questions (numbered items, sentences ending in a question mark, or other clear question patterns).
2. For each question, extract the full question text and its correct answer.
3. The exam may be written in Hebrew, English, or a mix; read it accordingly.
4. Answers may follow each question or be collected at the end of the exam.
5. Multi-part questions (a, b, c) may be kept together or split into separate entries.
6. Return an empty array [] only if there is truly no question in the text.

Reply with ONLY a JSON array in exactly this shape, with no text before or after it:
[
  {{"question": "Question text", "correct_answer": "Correct answer text"}}
]

JSON OUTPUT:"#
    )
}

fn grade_prompt(question: &str, correct_answer: &str, student_answer: &str) -> String {
    format!(
        r#"You are an expert exam grader. Grade the student's answer against the correct answer.

QUESTION:
{question}

CORRECT ANSWER:
{correct_answer}

STUDENT ANSWER:
{student_answer}

SCORING GUIDELINES (partial credit is allowed):
- 100: correct, or equivalent to the correct answer
- 80-99: mostly correct with minor issues
- 60-79: partially correct
- 40-59: some relevant content but mostly incorrect
- 20-39: minimal relevant content
- 0-19: incorrect or no answer

Reply with ONLY a JSON object in exactly this shape:
{{"score": 85.5, "is_correct": false, "explanation": "One or two sentences explaining the score"}}

"score" is a number from 0 to 100 and "is_correct" is true only when the score is 100.

JSON OUTPUT:"#
    )
}
