pub(crate) mod api;
pub(crate) mod core;
pub(crate) mod models;
pub(crate) mod pipeline;
pub(crate) mod repositories;
pub(crate) mod schemas;
pub(crate) mod services;

#[cfg(test)]
mod test_support;

use std::sync::Arc;

use crate::core::config::{Settings, StoreBackend};
use crate::core::{redis::RedisHandle, state::AppState, telemetry};
use crate::pipeline::{ExamPipeline, UploadLimits};
use crate::repositories::{ExamStore, MemoryExamStore, RedisExamStore};
use crate::services::exam_parser::{ExamParser, ParserOptions};
use crate::services::extraction::TextExtractor;
use crate::services::llm::ChatCompletionsClient;
use crate::services::ocr::HttpOcrEngine;
use crate::services::pdf::PopplerRasterizer;

pub async fn run() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    telemetry::init_tracing(&settings)?;
    core::metrics::init(&settings)?;

    let (store, redis) = build_store(&settings).await?;
    let pipeline = build_pipeline(&settings, store)?;
    if !settings.ai().is_configured() {
        tracing::warn!("LLM_API_KEY is not set; parse and grade requests will be refused");
    }

    let state = AppState::new(settings, pipeline);
    let app = api::router::router(state.clone());
    let listener = tokio::net::TcpListener::bind(state.settings().server_addr()).await?;

    tracing::info!(
        host = %state.settings().server_host(),
        port = state.settings().server_port(),
        environment = %state.settings().runtime().environment.as_str(),
        store = state.settings().store_backend().as_str(),
        "Exam grader listening"
    );

    let result =
        axum::serve(listener, app).with_graceful_shutdown(core::shutdown::shutdown_signal()).await;

    if let Some(redis) = redis {
        redis.disconnect().await;
        tracing::info!("Redis disconnected");
    }

    result?;

    Ok(())
}

async fn build_store(
    settings: &Settings,
) -> anyhow::Result<(Arc<dyn ExamStore>, Option<RedisHandle>)> {
    match settings.store_backend() {
        StoreBackend::Memory => {
            tracing::info!("Using in-memory exam store; exams are lost on restart");
            Ok((Arc::new(MemoryExamStore::new()), None))
        }
        StoreBackend::Redis => {
            let redis = RedisHandle::new(settings.redis().redis_url());
            redis.connect().await?;
            tracing::info!("Redis connected successfully");
            let store = RedisExamStore::new(redis.clone(), settings.exam_ttl_seconds());
            Ok((Arc::new(store), Some(redis)))
        }
    }
}

fn build_pipeline(settings: &Settings, store: Arc<dyn ExamStore>) -> anyhow::Result<ExamPipeline> {
    let generator = Arc::new(ChatCompletionsClient::from_settings(settings)?);
    let ocr = Arc::new(HttpOcrEngine::from_settings(settings)?);
    let rasterizer = Arc::new(PopplerRasterizer::from_settings(settings));

    let extractor = TextExtractor::new(ocr, rasterizer, settings.pdf().max_pages);
    let parser = ExamParser::new(generator, ParserOptions::from_settings(settings.ai()));
    let limits = UploadLimits {
        max_bytes: settings.upload().max_upload_bytes(),
        allowed_extensions: settings.upload().allowed_extensions.clone(),
    };

    Ok(ExamPipeline::new(store, extractor, parser, limits))
}
