//! Provider seams used by the insight pipeline.
//!
//! The concrete HTTP clients live in `gemini` and `openrouter`; the pipeline
//! only sees these traits so tests can substitute scripted providers.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("provider not configured")]
    NotConfigured,
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("provider error ({status}): {message}")]
    Other { status: u16, message: String },
}

impl ProviderError {
    /// Worth retrying against the same provider after a pause
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_) | ProviderError::ServiceUnavailable(_)
        )
    }

    /// Eligible for handing the request to the secondary provider
    pub fn is_failover(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited(_)
                | ProviderError::QuotaExceeded(_)
                | ProviderError::ServiceUnavailable(_)
                | ProviderError::NotConfigured
        )
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::QuotaExceeded(_) => "quota_exceeded",
            ProviderError::ServiceUnavailable(_) => "service_unavailable",
            ProviderError::Unauthorized(_) => "unauthorized",
            ProviderError::BadRequest(_) => "bad_request",
            ProviderError::NotConfigured => "not_configured",
            ProviderError::Network(_) => "network",
            ProviderError::InvalidResponse(_) => "invalid_response",
            ProviderError::Other { .. } => "other",
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return classify_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            return ProviderError::InvalidResponse(err.to_string());
        }
        ProviderError::Network(err.to_string())
    }
}

/// Map a non-success HTTP status (and body) to an error class
pub fn classify_status(status: u16, body: &str) -> ProviderError {
    let message = body.chars().take(300).collect::<String>();
    match status {
        429 => {
            let lower = body.to_lowercase();
            if lower.contains("resource_exhausted") || lower.contains("quota") {
                ProviderError::QuotaExceeded(message)
            } else {
                ProviderError::RateLimited(message)
            }
        }
        502 | 503 | 504 => ProviderError::ServiceUnavailable(message),
        401 | 403 => ProviderError::Unauthorized(message),
        400 => ProviderError::BadRequest(message),
        _ => ProviderError::Other { status, message },
    }
}

/// Binary image returned inline by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub bytes: Vec<u8>,
}

impl ImagePayload {
    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, ProviderError> {
        let bytes = STANDARD
            .decode(data.trim())
            .map_err(|e| ProviderError::InvalidResponse(format!("bad image data: {}", e)))?;
        Ok(Self {
            mime_type: mime_type.to_string(),
            bytes,
        })
    }

    /// Render as a `data:` URL suitable for embedding in a chat message
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PrimaryReply {
    pub text: String,
    pub image: Option<ImagePayload>,
}

/// OpenAI-style chat message for the secondary provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionMessage {
    pub role: String,
    pub content: String,
}

impl CompletionMessage {
    pub fn new(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait PrimaryProvider: Send + Sync {
    /// Generate text (and possibly an inline image) for a single prompt
    async fn generate(&self, prompt: &str) -> Result<PrimaryReply, ProviderError>;

    /// Generate an illustration for a short description
    async fn generate_image(&self, description: &str) -> Result<ImagePayload, ProviderError>;
}

#[async_trait]
pub trait FallbackProvider: Send + Sync {
    async fn complete(
        &self,
        model: &str,
        messages: &[CompletionMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError>;
}

#[async_trait]
pub trait Connectivity: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Fixed answer, for tests and for an explicit offline mode
pub struct StaticConnectivity(pub bool);

#[async_trait]
impl Connectivity for StaticConnectivity {
    async fn is_online(&self) -> bool {
        self.0
    }
}

/// Online if a TCP connection to `host:port` opens within the timeout
pub struct ProbeConnectivity {
    pub address: String,
    pub timeout: Duration,
}

impl Default for ProbeConnectivity {
    fn default() -> Self {
        Self {
            address: "generativelanguage.googleapis.com:443".to_string(),
            timeout: Duration::from_secs(3),
        }
    }
}

#[async_trait]
impl Connectivity for ProbeConnectivity {
    async fn is_online(&self) -> bool {
        matches!(
            tokio::time::timeout(self.timeout, tokio::net::TcpStream::connect(&self.address)).await,
            Ok(Ok(_))
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert!(matches!(classify_status(429, "slow down"), ProviderError::RateLimited(_)));
        assert!(matches!(
            classify_status(429, r#"{"error":{"status":"RESOURCE_EXHAUSTED"}}"#),
            ProviderError::QuotaExceeded(_)
        ));
        assert!(matches!(classify_status(503, ""), ProviderError::ServiceUnavailable(_)));
        assert!(matches!(classify_status(401, ""), ProviderError::Unauthorized(_)));
        assert!(matches!(classify_status(400, ""), ProviderError::BadRequest(_)));
        assert_eq!(
            classify_status(418, "teapot"),
            ProviderError::Other { status: 418, message: "teapot".to_string() }
        );
    }

    #[test]
    fn test_error_classes() {
        assert!(ProviderError::RateLimited(String::new()).is_transient());
        assert!(ProviderError::ServiceUnavailable(String::new()).is_transient());
        assert!(!ProviderError::QuotaExceeded(String::new()).is_transient());
        assert!(ProviderError::QuotaExceeded(String::new()).is_failover());
        assert!(ProviderError::NotConfigured.is_failover());
        assert!(!ProviderError::Unauthorized(String::new()).is_failover());
        assert!(!ProviderError::BadRequest(String::new()).is_failover());
    }

    #[test]
    fn test_image_payload_data_url() {
        let image = ImagePayload::from_base64("image/png", "aGVsbG8=").unwrap();
        assert_eq!(image.bytes, b"hello");
        assert_eq!(image.to_data_url(), "data:image/png;base64,aGVsbG8=");
        assert!(ImagePayload::from_base64("image/png", "%%%").is_err());
    }

    #[tokio::test]
    async fn test_static_connectivity() {
        assert!(StaticConnectivity(true).is_online().await);
        assert!(!StaticConnectivity(false).is_online().await);
    }
}
