use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

use crate::core::config::Settings;

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub(crate) fn init(settings: &Settings) -> anyhow::Result<()> {
    if !settings.telemetry().prometheus_enabled || PROM_HANDLE.get().is_some() {
        return Ok(());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROM_HANDLE.set(handle);
    Ok(())
}

pub(crate) fn render() -> Option<String> {
    PROM_HANDLE.get().map(|handle| handle.render())
}

pub(crate) fn record_upload(file_type: &str, outcome: &'static str) {
    metrics::counter!(
        "exam_uploads_total",
        "file_type" => file_type.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub(crate) fn record_llm_request(operation: &'static str, outcome: &'static str, seconds: f64) {
    metrics::counter!("llm_requests_total", "operation" => operation, "outcome" => outcome)
        .increment(1);
    metrics::histogram!("llm_request_duration_seconds", "operation" => operation).record(seconds);
}

pub(crate) fn record_ocr_pages(pages: usize) {
    metrics::counter!("ocr_pages_total").increment(pages as u64);
}

pub(crate) fn record_cache_hit(stage: &'static str) {
    metrics::counter!("pipeline_cache_hits_total", "stage" => stage).increment(1);
}
