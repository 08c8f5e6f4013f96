use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, State},
    http::StatusCode,
    Json,
};
use validator::Validate;

use crate::api::errors::ApiError;
use crate::core::state::AppState;
use crate::models::ExamId;
use crate::pipeline::PipelineError;
use crate::schemas::exam::{
    GradeRequest, GradeResponse, ParseResponse, StatusResponse, UploadResponse,
};

pub(super) async fn upload_exam(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<UploadResponse>), ApiError> {
    let pipeline = state.pipeline();
    let limits = pipeline.limits();
    let mut upload: Option<(String, Vec<u8>)> = None;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .filter(|name| !name.trim().is_empty())
            .ok_or_else(|| ApiError::BadRequest("Uploaded file has no filename".to_string()))?;
        pipeline.check_format(&filename)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field
            .chunk()
            .await
            .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
        {
            let next_size = bytes.len() as u64 + chunk.len() as u64;
            if next_size > limits.max_bytes {
                return Err(PipelineError::FileTooLarge {
                    size: next_size,
                    max_mb: limits.max_mb(),
                }
                .into());
            }
            bytes.extend_from_slice(&chunk);
        }
        upload = Some((filename, bytes));
        break;
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;
    let receipt = pipeline.upload(bytes, &filename).await?;

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            exam_id: receipt.exam_id,
            message: "Exam uploaded and text extracted successfully".to_string(),
            file_type: receipt.file_type.suffix(),
            file_size: receipt.file_size,
        }),
    ))
}

pub(super) async fn parse_exam(
    Path(exam_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<ParseResponse>, ApiError> {
    let exam_id = ExamId::from(exam_id);
    let questions = state.pipeline().parse(&exam_id).await?;

    Ok(Json(ParseResponse::new(exam_id, questions)))
}

pub(super) async fn grade_exam(
    Path(exam_id): Path<String>,
    State(state): State<AppState>,
    payload: Result<Json<GradeRequest>, JsonRejection>,
) -> Result<Json<GradeResponse>, ApiError> {
    let Json(payload) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    payload.validate().map_err(|e| ApiError::BadRequest(e.to_string()))?;

    if payload.exam_id != exam_id {
        return Err(ApiError::BadRequest(format!(
            "Exam ID mismatch: path has '{exam_id}' but body has '{}'",
            payload.exam_id
        )));
    }

    let exam_id = ExamId::from(exam_id);
    let result = state.pipeline().grade(&exam_id, &payload.student_answers).await?;

    Ok(Json(GradeResponse::new(exam_id, result)))
}

pub(super) async fn get_results(
    Path(exam_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<GradeResponse>, ApiError> {
    let exam_id = ExamId::from(exam_id);
    let result = state.pipeline().results(&exam_id).await?;

    Ok(Json(GradeResponse::new(exam_id, result)))
}

pub(super) async fn get_status(
    Path(exam_id): Path<String>,
    State(state): State<AppState>,
) -> Result<Json<StatusResponse>, ApiError> {
    let exam_id = ExamId::from(exam_id);
    let status = state.pipeline().status(&exam_id).await?;

    Ok(Json(StatusResponse::new(exam_id, status)))
}
