//! Background removal service interface and its HTTP client.

use async_trait::async_trait;
use bytes::Bytes;
use cutout_config::{OutputFormat, ProcessingMode, ServiceConfig};
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

/// Shown when a failure carries no usable message.
pub const GENERIC_FAILURE: &str = "Failed to process image";

/// Parameters sent along with every image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessParams {
    pub mode: ProcessingMode,
    pub format: OutputFormat,
    pub quality: u8,
    /// Only set in remote mode.
    pub api_key: Option<String>,
}

/// The image handed to the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceImage {
    pub name: String,
    pub media_type: String,
    pub bytes: Bytes,
}

/// A failed processing call.
///
/// `detail` is the structured message from the response payload, `message`
/// the transport-level description.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessFailure {
    pub detail: Option<String>,
    pub message: Option<String>,
}

impl ProcessFailure {
    pub fn with_detail(detail: impl Into<String>) -> Self {
        Self {
            detail: Some(detail.into()),
            message: None,
        }
    }

    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            detail: None,
            message: Some(message.into()),
        }
    }

    /// Structured detail, else the raw message, else the generic fallback.
    pub fn describe(&self) -> String {
        [self.detail.as_deref(), self.message.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or(GENERIC_FAILURE)
            .to_string()
    }
}

impl std::fmt::Display for ProcessFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.describe())
    }
}

impl std::error::Error for ProcessFailure {}

impl From<reqwest::Error> for ProcessFailure {
    fn from(e: reqwest::Error) -> Self {
        Self::with_message(e.to_string())
    }
}

/// Removes the background of one image.
///
/// Implementations:
/// - `HttpRemover`: the self-hosted backend or the hosted API
#[async_trait]
pub trait BackgroundRemover: Send + Sync {
    async fn remove_background(
        &self,
        source: &SourceImage,
        params: &ProcessParams,
    ) -> Result<Bytes, ProcessFailure>;

    /// Provider name for logging
    fn name(&self) -> &str;
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: Option<serde_json::Value>,
}

/// Pull a readable message out of an error response body.
fn parse_error_detail(body: &str) -> Option<String> {
    let parsed: ErrorBody = serde_json::from_str(body).ok()?;
    match parsed.detail? {
        serde_json::Value::String(s) => Some(s),
        serde_json::Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// HTTP client for the `/remove-background`, `/health` and `/usage` endpoints.
pub struct HttpRemover {
    client: Client,
    service: ServiceConfig,
}

impl HttpRemover {
    pub fn new(service: ServiceConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs))
            .build()?;
        Ok(Self { client, service })
    }

    fn url(&self, mode: ProcessingMode, path: &str) -> String {
        format!("{}/{}", self.service.base_url(mode).trim_end_matches('/'), path)
    }

    /// Turn a non-2xx response into a failure, preferring its `detail`.
    async fn failure_from(response: reqwest::Response) -> ProcessFailure {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        ProcessFailure {
            detail: parse_error_detail(&body),
            message: Some(format!("Request failed with status code {}", status.as_u16())),
        }
    }

    /// `GET /health` of the service backing `mode`.
    pub async fn health(&self, mode: ProcessingMode) -> Result<serde_json::Value, ProcessFailure> {
        let response = self.client.get(self.url(mode, "health")).send().await?;
        if !response.status().is_success() {
            return Err(Self::failure_from(response).await);
        }
        Ok(response.json().await?)
    }

    /// `GET /usage` for an API key on the hosted API.
    pub async fn usage(&self, api_key: &str) -> Result<serde_json::Value, ProcessFailure> {
        let response = self
            .client
            .get(self.url(ProcessingMode::Remote, "usage"))
            .query(&[("api_key", api_key)])
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::failure_from(response).await);
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl BackgroundRemover for HttpRemover {
    async fn remove_background(
        &self,
        source: &SourceImage,
        params: &ProcessParams,
    ) -> Result<Bytes, ProcessFailure> {
        let file = Part::bytes(source.bytes.to_vec())
            .file_name(source.name.clone())
            .mime_str(&source.media_type)?;

        let mut form = Form::new()
            .part("file", file)
            .text("format", params.format.as_str())
            .text("quality", params.quality.to_string());

        if let Some(ref api_key) = params.api_key {
            form = form.text("api_key", api_key.clone());
        }

        let response = self
            .client
            .post(self.url(params.mode, "remove-background"))
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::failure_from(response).await);
        }

        Ok(response.bytes().await?)
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_prefers_detail() {
        let failure = ProcessFailure {
            detail: Some("quota exceeded".to_string()),
            message: Some("Request failed with status code 429".to_string()),
        };
        assert_eq!(failure.describe(), "quota exceeded");
        assert_eq!(failure.to_string(), "quota exceeded");
    }

    #[test]
    fn test_describe_falls_back_to_message() {
        let failure = ProcessFailure {
            detail: Some("   ".to_string()),
            message: Some("connection refused".to_string()),
        };
        assert_eq!(failure.describe(), "connection refused");
    }

    #[test]
    fn test_describe_generic_fallback() {
        assert_eq!(ProcessFailure::default().describe(), GENERIC_FAILURE);
    }

    #[test]
    fn test_parse_error_detail() {
        assert_eq!(
            parse_error_detail(r#"{"detail": "Invalid API key"}"#),
            Some("Invalid API key".to_string())
        );
        assert_eq!(parse_error_detail(r#"{"detail": null}"#), None);
        assert_eq!(parse_error_detail("<html>bad gateway</html>"), None);
        assert_eq!(
            parse_error_detail(r#"{"detail": [{"msg": "field required"}]}"#),
            Some(r#"[{"msg":"field required"}]"#.to_string())
        );
    }

    #[test]
    fn test_url_joins_base_and_path() {
        let service = ServiceConfig {
            local_url: "http://localhost:8000/api/".to_string(),
            remote_url: "https://remote.test/api".to_string(),
            request_timeout_secs: 5,
        };
        let remover = HttpRemover::new(service).unwrap();
        assert_eq!(
            remover.url(ProcessingMode::Local, "remove-background"),
            "http://localhost:8000/api/remove-background"
        );
        assert_eq!(
            remover.url(ProcessingMode::Remote, "health"),
            "https://remote.test/api/health"
        );
    }
}
