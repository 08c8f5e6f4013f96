mod handlers;

use axum::{routing::get, routing::post, Router};

use crate::core::state::AppState;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(handlers::upload_exam))
        .route("/:exam_id/parse", post(handlers::parse_exam))
        .route("/:exam_id/grade", post(handlers::grade_exam))
        .route("/:exam_id/results", get(handlers::get_results))
        .route("/:exam_id/status", get(handlers::get_status))
}
