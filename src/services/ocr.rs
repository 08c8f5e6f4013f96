use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde_json::Value;

use crate::core::config::Settings;

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct OcrRegion {
    pub(crate) text: String,
    pub(crate) confidence: Option<f64>,
}

/// Image bytes in, recognized text regions out, in reading order.
#[async_trait]
pub(crate) trait OcrEngine: Send + Sync {
    fn languages(&self) -> &[String];

    async fn recognize(&self, image: &[u8]) -> Result<Vec<OcrRegion>>;
}

/// OCR engine reached over HTTP. The service receives the image as multipart `file`
/// together with the configured `languages` and answers with recognized regions.
#[derive(Debug, Clone)]
pub(crate) struct HttpOcrEngine {
    client: Client,
    base_url: String,
    api_key: String,
    languages: Vec<String>,
}

impl HttpOcrEngine {
    pub(crate) fn from_settings(settings: &Settings) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(20))
            .timeout(Duration::from_secs(settings.ocr().timeout_seconds))
            .build()
            .context("Failed to build OCR HTTP client")?;

        Ok(Self {
            client,
            base_url: settings.ocr().base_url.trim_end_matches('/').to_string(),
            api_key: settings.ocr().api_key.clone(),
            languages: settings.ocr().languages.clone(),
        })
    }
}

#[async_trait]
impl OcrEngine for HttpOcrEngine {
    fn languages(&self) -> &[String] {
        &self.languages
    }

    async fn recognize(&self, image: &[u8]) -> Result<Vec<OcrRegion>> {
        let endpoint = format!("{}/ocr", self.base_url);
        let form = Form::new()
            .part("file", Part::bytes(image.to_vec()).file_name("page.png"))
            .text("languages", self.languages.join(","));

        let mut request = self.client.post(&endpoint).multipart(form);
        if !self.api_key.is_empty() {
            request = request.header("X-Api-Key", &self.api_key);
        }

        let response = request.send().await.context("Failed to call OCR service")?;
        let status = response.status();
        let raw_body = response.text().await.context("Failed to read OCR response")?;

        let parsed: Value = serde_json::from_str(&raw_body).map_err(|err| {
            anyhow::anyhow!(
                "OCR service returned non-JSON body (status {}): {}: {}",
                status,
                err,
                raw_body
            )
        })?;

        if !status.is_success() {
            return Err(anyhow::anyhow!(
                "OCR service failed (status {}): {}",
                status,
                extract_error_message(&parsed)
            ));
        }

        extract_regions(&parsed).ok_or_else(|| {
            anyhow::anyhow!("OCR service response has no recognizable regions: {raw_body}")
        })
    }
}

/// Accepts `{"regions": [...]}`, a bare region array, or EasyOCR-style
/// `[[bbox, text, confidence], ...]` rows.
pub(crate) fn extract_regions(payload: &Value) -> Option<Vec<OcrRegion>> {
    let items = payload
        .get("regions")
        .or_else(|| payload.get("results"))
        .unwrap_or(payload)
        .as_array()?;

    Some(items.iter().filter_map(parse_region).collect())
}

fn parse_region(item: &Value) -> Option<OcrRegion> {
    match item {
        Value::Object(map) => {
            let text = map.get("text").and_then(Value::as_str)?;
            let confidence = map
                .get("confidence")
                .or_else(|| map.get("score"))
                .and_then(Value::as_f64);
            Some(OcrRegion { text: text.to_string(), confidence })
        }
        Value::Array(row) => {
            let text = row.get(1).and_then(Value::as_str)?;
            let confidence = row.get(2).and_then(Value::as_f64);
            Some(OcrRegion { text: text.to_string(), confidence })
        }
        _ => None,
    }
}

fn extract_error_message(payload: &Value) -> String {
    payload
        .get("detail")
        .and_then(Value::as_str)
        .or_else(|| payload.get("message").and_then(Value::as_str))
        .or_else(|| payload.get("error").and_then(Value::as_str))
        .unwrap_or("unknown_error")
        .to_string()
}
