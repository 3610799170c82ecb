//! Plate text recognizer adapter (OCR over HTTP)
//!
//! Speaks the OCR.space `parse/image` API: multipart upload of the crop plus
//! form options, JSON response with `ParsedResults[].ParsedText`. Text is
//! returned raw; normalization is the pipeline's job.

use crate::domain::error::VisionError;
use crate::infra::config::Config;
use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::debug;

/// OCR capability: image crop in, best-effort text out
#[async_trait]
pub trait PlateRecognizer: Send + Sync {
    /// `Ok(None)` means the service answered but found no text
    async fn recognize(&self, crop_jpeg: Bytes) -> Result<Option<String>, VisionError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct OcrResponse {
    #[serde(default)]
    parsed_results: Option<Vec<ParsedResult>>,
    #[serde(default)]
    is_errored_on_processing: bool,
    /// String or array of strings depending on the failure
    #[serde(default)]
    error_message: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ParsedResult {
    #[serde(default)]
    parsed_text: Option<String>,
}

/// Pull the first result's text out of a decoded response
fn extract_text(response: OcrResponse) -> Result<Option<String>, VisionError> {
    if response.is_errored_on_processing {
        let message = match response.error_message {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join("; "),
            Some(other) => other.to_string(),
            None => "processing error".to_string(),
        };
        return Err(VisionError::RecognitionService(message));
    }

    Ok(response
        .parsed_results
        .and_then(|results| results.into_iter().next())
        .and_then(|first| first.parsed_text))
}

/// OCR.space client with a bounded request timeout
pub struct OcrSpaceClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    language: String,
    engine: u8,
    timeout: Duration,
}

impl OcrSpaceClient {
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.recognizer_timeout())
            .build()
            .context("failed to build recognizer HTTP client")?;

        Ok(Self {
            client,
            endpoint: config.recognizer_endpoint().to_string(),
            api_key: config.recognizer_api_key().to_string(),
            language: config.recognizer_language().to_string(),
            engine: config.recognizer_engine(),
            timeout: config.recognizer_timeout(),
        })
    }

    fn form(&self, crop_jpeg: Bytes) -> Result<Form, VisionError> {
        let part = Part::bytes(crop_jpeg.to_vec())
            .file_name("crop.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| VisionError::RecognitionService(e.to_string()))?;

        Ok(Form::new()
            .text("apikey", self.api_key.clone())
            .text("language", self.language.clone())
            .text("isOverlayRequired", "false")
            .text("detectOrientation", "true")
            .text("scale", "true")
            .text("OCREngine", self.engine.to_string())
            .part("filename", part))
    }
}

#[async_trait]
impl PlateRecognizer for OcrSpaceClient {
    async fn recognize(&self, crop_jpeg: Bytes) -> Result<Option<String>, VisionError> {
        let start = Instant::now();
        let form = self.form(crop_jpeg)?;

        let response =
            self.client.post(&self.endpoint).multipart(form).send().await.map_err(|e| {
                if e.is_timeout() {
                    VisionError::RecognitionTimeout(self.timeout.as_millis() as u64)
                } else {
                    VisionError::RecognitionService(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(VisionError::RecognitionService(format!("HTTP {}", status.as_u16())));
        }

        let body: OcrResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                VisionError::RecognitionTimeout(self.timeout.as_millis() as u64)
            } else {
                VisionError::RecognitionService(format!("malformed response: {e}"))
            }
        })?;

        let text = extract_text(body)?;
        debug!(
            latency_ms = %start.elapsed().as_millis(),
            has_text = %text.is_some(),
            "ocr_response"
        );
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(body: &str) -> Result<Option<String>, VisionError> {
        extract_text(serde_json::from_str(body).unwrap())
    }

    #[test]
    fn test_extracts_first_result_raw() {
        let body = r#"{
            "ParsedResults": [
                {"ParsedText": "xyz 123\r\n", "FileParseExitCode": 1},
                {"ParsedText": "ignored"}
            ],
            "OCRExitCode": 1,
            "IsErroredOnProcessing": false
        }"#;
        assert_eq!(parse(body).unwrap(), Some("xyz 123\r\n".to_string()));
    }

    #[test]
    fn test_no_results_is_none() {
        assert_eq!(parse(r#"{"IsErroredOnProcessing": false}"#).unwrap(), None);
        assert_eq!(parse(r#"{"ParsedResults": []}"#).unwrap(), None);
        assert_eq!(parse(r#"{"ParsedResults": [{}]}"#).unwrap(), None);
    }

    #[test]
    fn test_provider_error_string() {
        let body = r#"{"IsErroredOnProcessing": true, "ErrorMessage": "Timed out waiting for results"}"#;
        match parse(body) {
            Err(VisionError::RecognitionService(msg)) => {
                assert!(msg.contains("Timed out"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_provider_error_array() {
        let body = r#"{"IsErroredOnProcessing": true, "ErrorMessage": ["E101", "bad file"]}"#;
        match parse(body) {
            Err(VisionError::RecognitionService(msg)) => assert_eq!(msg, "E101; bad file"),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn test_malformed_json_rejected() {
        let parsed: Result<OcrResponse, _> = serde_json::from_str("<html>busy</html>");
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_error() {
        let config = Config::from_toml_str(
            "[recognizer]\nendpoint = \"http://127.0.0.1:1/parse/image\"\ntimeout_ms = 500\n",
            "inline".into(),
        )
        .unwrap();
        let client = OcrSpaceClient::new(&config).unwrap();

        let result = client.recognize(Bytes::from_static(b"\xff\xd8jpeg")).await;
        assert!(result.is_err());
    }
}
