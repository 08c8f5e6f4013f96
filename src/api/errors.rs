use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::pipeline::PipelineError;
use crate::services::exam_parser::ParseError;

#[derive(Debug, Serialize)]
struct ErrorResponse {
    status: u16,
    detail: String,
}

#[derive(Debug)]
pub(crate) enum ApiError {
    BadRequest(String),
    NotFound(String),
    BadGateway(String),
    ServiceUnavailable(String),
    Internal(String),
}

impl ApiError {
    /// Log the underlying error with context and return an `Internal` variant.
    pub(crate) fn internal(err: impl std::fmt::Display, context: &str) -> Self {
        tracing::error!(error = %err, "{context}");
        Self::Internal(context.to_string())
    }

    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::BadGateway(_) => StatusCode::BAD_GATEWAY,
            ApiError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::NotFound(_) | PipelineError::ResultsNotFound(_) => {
                Self::NotFound(err.to_string())
            }
            PipelineError::Parser(
                ParseError::UpstreamUnconfigured | ParseError::Upstream(_),
            ) => Self::ServiceUnavailable(err.to_string()),
            PipelineError::Parser(ParseError::MalformedUpstreamResponse { .. }) => {
                Self::BadGateway(err.to_string())
            }
            PipelineError::Store(err) => Self::internal(err, "Exam store failed"),
            PipelineError::UnsupportedFormat { .. }
            | PipelineError::FileTooLarge { .. }
            | PipelineError::UploadRejected { .. }
            | PipelineError::ParseRejected { .. }
            | PipelineError::NotYetParsed(_)
            | PipelineError::IndexOutOfRange { .. }
            | PipelineError::Parser(_) => Self::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let detail = match self {
            ApiError::BadGateway(message) => {
                tracing::error!(error = %message, "Upstream returned an unusable reply");
                message
            }
            ApiError::ServiceUnavailable(message) => {
                tracing::error!(error = %message, "Service unavailable");
                message
            }
            // `internal()` already logged the cause; client errors are not logged.
            ApiError::Internal(message)
            | ApiError::BadRequest(message)
            | ApiError::NotFound(message) => message,
        };

        (status, Json(ErrorResponse { status: status.as_u16(), detail })).into_response()
    }
}
