use crate::providers::{classify_status, CompletionMessage, FallbackProvider, ProviderError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const OPENROUTER_API_BASE: &str = "https://openrouter.ai/api/v1";

/// Free models tried when the user has not picked one
pub const DEFAULT_FALLBACK_MODELS: &[&str] = &[
    "google/gemini-2.0-flash-exp:free",
    "meta-llama/llama-3.3-70b-instruct:free",
    "mistralai/mistral-small-3.1-24b-instruct:free",
    "deepseek/deepseek-chat-v3-0324:free",
];

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [CompletionMessage],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub prompt: String,
    pub completion: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenRouterModel {
    pub id: String,
    pub name: String,
    pub pricing: ModelPricing,
    #[serde(default)]
    pub context_length: u64,
}

impl OpenRouterModel {
    /// `:free` suffix, or zero prompt and completion pricing
    pub fn is_free(&self) -> bool {
        let zero = |price: &str| price.trim().parse::<f64>().map(|p| p == 0.0).unwrap_or(false);
        self.id.to_lowercase().contains(":free")
            || (zero(&self.pricing.prompt) && zero(&self.pricing.completion))
    }
}

#[derive(Debug, Deserialize)]
struct ModelList {
    data: Vec<OpenRouterModel>,
}

pub struct OpenRouterClient {
    client: Client,
    api_key: String,
    referer: String,
    title: String,
    timeout: Duration,
}

impl OpenRouterClient {
    pub fn new(api_key: &str, referer: &str, title: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        Ok(Self {
            client,
            api_key: api_key.to_string(),
            referer: referer.to_string(),
            title: title.to_string(),
            timeout,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Check the key against the auth endpoint. Rejected keys are `Ok(false)`.
    pub async fn validate_key(&self) -> Result<bool, ProviderError> {
        let response = self
            .client
            .get(format!("{}/auth/key", OPENROUTER_API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(true);
        }
        match status.as_u16() {
            401 | 403 => Ok(false),
            code => {
                let error_text = response.text().await.unwrap_or_default();
                Err(classify_status(code, &error_text))
            }
        }
    }

    pub async fn list_models(&self) -> Result<Vec<OpenRouterModel>, ProviderError> {
        let response = self
            .client
            .get(format!("{}/models", OPENROUTER_API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let list: ModelList = response.json().await?;
        Ok(list.data)
    }

    pub async fn list_free_models(&self) -> Result<Vec<OpenRouterModel>, ProviderError> {
        Ok(free_models(self.list_models().await?))
    }
}

pub fn free_models(models: Vec<OpenRouterModel>) -> Vec<OpenRouterModel> {
    models.into_iter().filter(|m| m.is_free()).collect()
}

fn completion_text(body: ChatCompletionResponse) -> Result<String, ProviderError> {
    body.choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty())
        .ok_or_else(|| ProviderError::InvalidResponse("No response from OpenRouter".to_string()))
}

#[async_trait]
impl FallbackProvider for OpenRouterClient {
    async fn complete(
        &self,
        model: &str,
        messages: &[CompletionMessage],
        temperature: f32,
        max_tokens: u32,
    ) -> Result<String, ProviderError> {
        let request = ChatCompletionRequest {
            model,
            messages,
            temperature,
            max_tokens,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", OPENROUTER_API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("HTTP-Referer", &self.referer)
            .header("X-Title", &self.title)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &error_text));
        }

        let completion: ChatCompletionResponse = response.json().await?;
        completion_text(completion)
    }
}
