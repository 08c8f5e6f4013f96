use std::time::Duration;

use super::*;
use crate::models::ProcessingStage;
use crate::services::llm::GenerationError;
use crate::test_support::{test_pipeline, ScriptedGenerator};

const EXAM_TEXT: &str = "1. What is 2+2? Answer: 4\n\
                         2. Capital of France? Answer: Paris\n\
                         3. Largest planet? Answer: Jupiter";

const PARSE_REPLY: &str = r#"```json
[
  {"question": "What is 2+2?", "correct_answer": "4"},
  {"question": "Capital of France?", "correct_answer": "Paris"},
  {"question": "Largest planet?", "correct_answer": "Jupiter"}
]
```"#;

fn answer(question_index: usize, answer: &str) -> StudentAnswer {
    StudentAnswer { question_index, answer: answer.to_string() }
}

fn verdict(score: f64, is_correct: bool) -> String {
    format!(r#"{{"score": {score}, "is_correct": {is_correct}, "explanation": "checked"}}"#)
}

async fn uploaded(pipeline: &ExamPipeline) -> ExamId {
    pipeline
        .upload(EXAM_TEXT.as_bytes().to_vec(), "exam.txt")
        .await
        .expect("upload")
        .exam_id
}

#[tokio::test]
async fn upload_extracts_text_and_reports_receipt() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));

    let receipt = pipeline.upload(EXAM_TEXT.as_bytes().to_vec(), "Exam.TXT").await.expect("upload");

    assert_eq!(receipt.file_type, DocumentFormat::Txt);
    assert_eq!(receipt.file_size, EXAM_TEXT.len() as u64);
    let exam = pipeline.store().get(&receipt.exam_id).await.unwrap().expect("stored exam");
    assert_eq!(exam.extracted_text, EXAM_TEXT);
    assert_eq!(exam.raw_document.filename, "Exam.TXT");
    assert_eq!(exam.raw_document.sha256.len(), 64);
    let status = pipeline.status(&receipt.exam_id).await.expect("status");
    assert_eq!(status.processing_stage(), ProcessingStage::TextExtracted);
}

#[tokio::test]
async fn upload_pdf_goes_through_rasterizer_and_ocr() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));

    let receipt = pipeline.upload(b"%PDF-1.4 fake".to_vec(), "exam.pdf").await.expect("upload");

    let exam = pipeline.store().get(&receipt.exam_id).await.unwrap().expect("stored exam");
    assert_eq!(receipt.file_type, DocumentFormat::Pdf);
    assert_eq!(exam.extracted_text, "1. What is 2+2? Answer: 4");
}

#[tokio::test]
async fn upload_rejects_unknown_extension() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));

    let err = pipeline.upload(EXAM_TEXT.as_bytes().to_vec(), "exam.docx").await.unwrap_err();

    match err {
        PipelineError::UnsupportedFormat { filename, allowed } => {
            assert_eq!(filename, "exam.docx");
            assert!(allowed.contains("pdf"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn upload_rejects_oversized_file() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));
    let bytes = vec![b'a'; 1024 * 1024 + 1];

    let err = pipeline.upload(bytes, "exam.txt").await.unwrap_err();

    assert!(matches!(err, PipelineError::FileTooLarge { size, max_mb: 1 } if size == 1024 * 1024 + 1));
}

#[tokio::test]
async fn upload_at_exact_limit_is_accepted() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));
    let bytes = vec![b'a'; 1024 * 1024];

    let receipt = pipeline.upload(bytes, "exam.txt").await.expect("upload");

    assert_eq!(receipt.file_size, 1024 * 1024);
}

#[tokio::test]
async fn upload_rejects_too_little_text() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));

    let err = pipeline.upload(b"  hi  \n".to_vec(), "exam.txt").await.unwrap_err();

    match err {
        PipelineError::UploadRejected { detail } => assert!(detail.contains("2 characters")),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn parse_unknown_exam_is_not_found() {
    let generator = ScriptedGenerator::with_replies([PARSE_REPLY]);
    let pipeline = test_pipeline(generator.clone());

    let err = pipeline.parse(&ExamId::from("missing")).await.unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(id) if id.as_str() == "missing"));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn parse_is_computed_once() {
    let generator = ScriptedGenerator::with_replies([PARSE_REPLY]);
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;

    let first = pipeline.parse(&id).await.expect("first parse");
    let second = pipeline.parse(&id).await.expect("second parse");

    assert_eq!(first.len(), 3);
    assert_eq!(first, second);
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn concurrent_parse_calls_generator_once() {
    let generator = ScriptedGenerator::delayed(Duration::from_millis(50), [PARSE_REPLY, "[]"]);
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;

    let (first, second) = tokio::join!(pipeline.parse(&id), pipeline.parse(&id));

    assert_eq!(first.expect("first"), second.expect("second"));
    assert_eq!(generator.calls(), 1);
}

#[tokio::test]
async fn parse_with_no_questions_is_rejected_and_not_stored() {
    let generator = ScriptedGenerator::with_replies(["[]", PARSE_REPLY]);
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;

    let err = pipeline.parse(&id).await.unwrap_err();
    assert!(matches!(err, PipelineError::ParseRejected { .. }));
    assert!(!pipeline.status(&id).await.unwrap().parsed);

    let questions = pipeline.parse(&id).await.expect("retry parse");
    assert_eq!(questions.len(), 3);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn parse_with_unrecognized_items_is_rejected() {
    let generator = ScriptedGenerator::with_replies([r#"[{"q": "What?", "a": "That"}]"#]);
    let pipeline = test_pipeline(generator);
    let id = uploaded(&pipeline).await;

    let err = pipeline.parse(&id).await.unwrap_err();

    assert!(matches!(err, PipelineError::ParseRejected { .. }));
}

#[tokio::test]
async fn parse_of_short_text_never_reaches_generator() {
    let generator = ScriptedGenerator::with_replies([PARSE_REPLY]);
    let pipeline = test_pipeline(generator.clone());
    let id = pipeline.upload(b"Q1? A: yes".to_vec(), "exam.txt").await.expect("upload").exam_id;

    let err = pipeline.parse(&id).await.unwrap_err();

    assert!(matches!(err, PipelineError::Parser(ParseError::EmptyInput { chars: 10, .. })));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn grade_before_parse_is_rejected() {
    let generator = ScriptedGenerator::with_replies(Vec::<String>::new());
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;

    let err = pipeline.grade(&id, &[answer(0, "4")]).await.unwrap_err();

    assert!(matches!(err, PipelineError::NotYetParsed(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn grade_rejects_index_equal_to_question_count() {
    let generator = ScriptedGenerator::with_replies([PARSE_REPLY.to_string(), verdict(100.0, true)]);
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;
    pipeline.parse(&id).await.expect("parse");

    let err = pipeline.grade(&id, &[answer(0, "4"), answer(3, "Mars")]).await.unwrap_err();
    assert!(matches!(err, PipelineError::IndexOutOfRange { index: 3, total: 3 }));
    assert_eq!(generator.calls(), 1);

    let result = pipeline.grade(&id, &[answer(2, "Jupiter")]).await.expect("last index grades");
    assert_eq!(result.question_grades[0].question_index, 2);
}

#[tokio::test]
async fn grades_follow_submission_order() {
    let generator = ScriptedGenerator::with_replies([
        PARSE_REPLY.to_string(),
        verdict(100.0, true),
        verdict(0.0, false),
        verdict(50.0, false),
    ]);
    let pipeline = test_pipeline(generator);
    let id = uploaded(&pipeline).await;
    pipeline.parse(&id).await.expect("parse");

    let result = pipeline
        .grade(&id, &[answer(2, "Jupiter"), answer(0, "5"), answer(1, "Lyon")])
        .await
        .expect("grade");

    let order: Vec<_> = result.question_grades.iter().map(|grade| grade.question_index).collect();
    assert_eq!(order, vec![2, 0, 1]);
    assert_eq!(result.question_grades[0].question, "Largest planet?");
    assert_eq!(result.question_grades[1].student_answer, "5");
    assert_eq!(result.final_score, 50.0);
    assert_eq!(result.correct_count, 1);
    assert_eq!(result.total_questions, 3);
}

#[tokio::test]
async fn text_exam_end_to_end() {
    let generator = ScriptedGenerator::with_replies([
        r#"[{"question": "What is 2+2?", "correct_answer": "4"}]"#.to_string(),
        verdict(100.0, true),
    ]);
    let pipeline = test_pipeline(generator);

    let receipt = pipeline
        .upload(b"1. What is 2+2? Answer: 4".to_vec(), "exam.txt")
        .await
        .expect("upload");
    let questions = pipeline.parse(&receipt.exam_id).await.expect("parse");
    let result = pipeline.grade(&receipt.exam_id, &[answer(0, "4")]).await.expect("grade");

    assert_eq!(
        questions,
        vec![QuestionAnswer {
            question: "What is 2+2?".to_string(),
            correct_answer: "4".to_string(),
        }]
    );
    assert_eq!(result.final_score, 100.0);
    assert_eq!(result.correct_count, 1);
    assert_eq!(pipeline.results(&receipt.exam_id).await.expect("results"), result);
    let status = pipeline.status(&receipt.exam_id).await.expect("status");
    assert_eq!(status.processing_stage(), ProcessingStage::Graded);
    assert_eq!(status.total_questions, Some(1));
}

#[tokio::test]
async fn regrading_returns_stored_result() {
    let generator = ScriptedGenerator::with_replies([PARSE_REPLY.to_string(), verdict(80.0, false)]);
    let pipeline = test_pipeline(generator.clone());
    let id = uploaded(&pipeline).await;
    pipeline.parse(&id).await.expect("parse");

    let first = pipeline.grade(&id, &[answer(0, "4")]).await.expect("grade");
    let second = pipeline.grade(&id, &[answer(1, "Paris")]).await.expect("regrade");

    assert_eq!(first, second);
    assert_eq!(generator.calls(), 2);
}

#[tokio::test]
async fn failure_mid_batch_stores_nothing() {
    let generator = ScriptedGenerator::sequence(vec![
        Ok(PARSE_REPLY.to_string()),
        Ok(verdict(100.0, true)),
        Err(GenerationError::Timeout(Duration::from_secs(30))),
    ]);
    let pipeline = test_pipeline(generator);
    let id = uploaded(&pipeline).await;
    pipeline.parse(&id).await.expect("parse");

    let err = pipeline.grade(&id, &[answer(0, "4"), answer(1, "Paris")]).await.unwrap_err();

    assert!(matches!(
        err,
        PipelineError::Parser(ParseError::Upstream(GenerationError::Timeout(_)))
    ));
    assert!(!pipeline.status(&id).await.unwrap().graded);
    assert!(matches!(pipeline.results(&id).await, Err(PipelineError::ResultsNotFound(_))));
}

#[tokio::test]
async fn status_of_unknown_exam_is_not_found() {
    let pipeline = test_pipeline(ScriptedGenerator::with_replies(Vec::<String>::new()));

    let err = pipeline.status(&ExamId::from("nope")).await.unwrap_err();

    assert!(matches!(err, PipelineError::NotFound(_)));
}
