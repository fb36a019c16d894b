use crate::providers::{classify_status, ImagePayload, PrimaryProvider, PrimaryReply, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

// Model constants
pub const GEMINI_FLASH: &str = "gemini-3-flash-preview";
pub const GEMINI_FLASH_IMAGE: &str = "gemini-2.5-flash-image";

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Serialize)]
struct Content {
    role: String,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct GeminiError {
    error: ErrorDetails,
}

#[derive(Debug, Deserialize)]
struct ErrorDetails {
    message: String,
    #[serde(default)]
    status: String,
}

pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    image_model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: &str, model: &str, image_model: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            model: model.to_string(),
            image_model: image_model.to_string(),
            base_url: GEMINI_API_BASE.to_string(),
        })
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &str,
        with_image: bool,
    ) -> Result<PrimaryReply, ProviderError> {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: prompt.to_string() }],
            }],
            generation_config: with_image.then(|| GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };

        let url = format!("{}/models/{}:generateContent", self.base_url, model);
        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(error_from_body(status, &error_text));
        }

        let body: GenerateContentResponse = response.json().await?;
        reply_from_response(body)
    }
}

/// Classify an error body, preferring the structured `status` field
fn error_from_body(status: u16, body: &str) -> ProviderError {
    if let Ok(parsed) = serde_json::from_str::<GeminiError>(body) {
        let detail = format!("{} {}", parsed.error.status, parsed.error.message);
        return classify_status(status, detail.trim());
    }
    classify_status(status, body)
}

/// Join the text parts of the first candidate and pick up its first inline image
fn reply_from_response(body: GenerateContentResponse) -> Result<PrimaryReply, ProviderError> {
    let parts = body
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts)
        .ok_or_else(|| ProviderError::InvalidResponse("No candidates in response".to_string()))?;

    let mut texts = Vec::new();
    let mut image = None;
    for part in parts {
        if let Some(text) = part.text {
            texts.push(text);
        }
        if image.is_none() {
            if let Some(inline) = part.inline_data {
                image = Some(ImagePayload::from_base64(&inline.mime_type, &inline.data)?);
            }
        }
    }

    let text = texts.join("").trim().to_string();
    if text.is_empty() && image.is_none() {
        return Err(ProviderError::InvalidResponse("Empty response".to_string()));
    }

    Ok(PrimaryReply { text, image })
}

#[async_trait]
impl PrimaryProvider for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<PrimaryReply, ProviderError> {
        self.generate_content(&self.model, prompt, false).await
    }

    async fn generate_image(&self, description: &str) -> Result<ImagePayload, ProviderError> {
        let prompt = format!(
            "Create a clean, minimal illustration for a body-language analysis report: {}",
            description
        );
        let reply = self.generate_content(&self.image_model, &prompt, true).await?;
        reply
            .image
            .ok_or_else(|| ProviderError::InvalidResponse("No image in response".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Result<PrimaryReply, ProviderError> {
        reply_from_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_reply_joins_text_parts() {
        let reply = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Anxiety rose "},{"text":"at 40s."}]}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.text, "Anxiety rose at 40s.");
        assert!(reply.image.is_none());
    }

    #[test]
    fn test_reply_with_inline_image() {
        let reply = parse(
            r#"{"candidates":[{"content":{"parts":[{"text":"Here"},{"inlineData":{"mimeType":"image/png","data":"aGVsbG8="}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(reply.image.unwrap().bytes, b"hello");
    }

    #[test]
    fn test_empty_candidates_is_invalid() {
        assert!(matches!(parse(r#"{"candidates":[]}"#), Err(ProviderError::InvalidResponse(_))));
        assert!(matches!(
            parse(r#"{"candidates":[{"content":{"parts":[]}}]}"#),
            Err(ProviderError::InvalidResponse(_))
        ));
    }

    #[test]
    fn test_structured_quota_error() {
        let body = r#"{"error":{"code":429,"message":"Quota exceeded for metric","status":"RESOURCE_EXHAUSTED"}}"#;
        assert!(matches!(error_from_body(429, body), ProviderError::QuotaExceeded(_)));
        assert!(matches!(error_from_body(503, "overloaded"), ProviderError::ServiceUnavailable(_)));
    }

    #[test]
    fn test_request_serializes_image_modalities() {
        let request = GenerateContentRequest {
            contents: vec![Content {
                role: "user".to_string(),
                parts: vec![Part { text: "hi".to_string() }],
            }],
            generation_config: Some(GenerationConfig {
                response_modalities: vec!["TEXT".to_string(), "IMAGE".to_string()],
            }),
        };
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["generationConfig"]["responseModalities"][1], "IMAGE");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "hi");
    }
}
