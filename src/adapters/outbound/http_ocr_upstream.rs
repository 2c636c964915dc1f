//! HTTP OCR Upstream
//!
//! Implements OcrUpstream against the OCR microservice's REST API.

use crate::domain::entities::{OcrRequest, OcrResult};
use crate::domain::errors::GatewayError;
use crate::domain::ports::OcrUpstream;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use std::time::Duration;

const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest upstream body excerpt kept in error messages.
const MAX_ERROR_BODY: usize = 200;

/// Wire format of `POST /ocr`.
#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    text: String,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    language: Option<String>,
    /// Either a region count or the list of regions
    #[serde(default)]
    regions: Option<serde_json::Value>,
}

impl RecognizeResponse {
    fn into_result(self, fallback_language: &str) -> OcrResult {
        let detected_regions = match &self.regions {
            Some(serde_json::Value::Number(n)) => n.as_u64().unwrap_or(0) as u32,
            Some(serde_json::Value::Array(items)) => items.len() as u32,
            _ => 0,
        };
        OcrResult {
            text: self.text,
            confidence: self.confidence,
            processing_time_ms: 0,
            language: self
                .language
                .unwrap_or_else(|| fallback_language.to_string()),
            detected_regions,
        }
    }
}

/// OCR service reached over HTTP with an optional bearer token.
pub struct HttpOcrUpstream {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpOcrUpstream {
    pub fn new(base_url: &str, api_key: Option<String>) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| GatewayError::Upstream {
                status: None,
                message: format!("failed to build HTTP client: {}", e),
            })?;
        Ok(Self::with_client(client, base_url, api_key))
    }

    pub fn with_client(client: reqwest::Client, base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.is_empty()),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }
}

fn transport_error(e: reqwest::Error) -> GatewayError {
    GatewayError::Upstream {
        status: e.status().map(|s| s.as_u16()),
        message: e.to_string(),
    }
}

fn excerpt(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

#[async_trait]
impl OcrUpstream for HttpOcrUpstream {
    async fn recognize(&self, request: &OcrRequest) -> Result<OcrResult, GatewayError> {
        let image = Part::bytes(request.image.to_vec())
            .file_name(request.file_name.clone())
            .mime_str(&request.content_type)
            .map_err(|e| GatewayError::InvalidInput(format!("invalid content type: {}", e)))?;
        let languages = serde_json::to_string(&request.languages).map_err(|e| {
            GatewayError::InvalidInput(format!("invalid languages: {}", e))
        })?;
        let form = Form::new().part("image", image).text("languages", languages);

        let response = self
            .authorize(self.client.post(format!("{}/ocr", self.base_url)))
            .multipart(form)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), body = %excerpt(&body), "OCR service rejected request");
            return Err(GatewayError::InvalidInput(
                "image was rejected by the OCR service".to_string(),
            ));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Upstream {
                status: Some(status.as_u16()),
                message: excerpt(&body),
            });
        }

        let parsed: RecognizeResponse =
            response.json().await.map_err(|e| GatewayError::Upstream {
                status: Some(status.as_u16()),
                message: format!("malformed OCR response: {}", e),
            })?;

        let fallback = request.languages.first().map(String::as_str).unwrap_or("en");
        Ok(parsed.into_result(fallback))
    }

    async fn health(&self) -> bool {
        let request = self
            .authorize(self.client.get(format!("{}/health", self.base_url)))
            .timeout(HEALTH_TIMEOUT);
        match request.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                tracing::debug!("OCR health probe failed: {}", e);
                false
            }
        }
    }
}
