use crate::gemini::{GEMINI_FLASH, GEMINI_FLASH_IMAGE};
use crate::openrouter::DEFAULT_FALLBACK_MODELS;
use crate::store::CredentialStore;
use rand::Rng;
use std::time::Duration;

pub const APP_REFERER: &str = "https://neurosignal.app";
pub const APP_TITLE: &str = "NeuroSignal";

/// Exponential backoff with symmetric jitter for transient primary errors
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub max_jitter: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_jitter: Duration::from_millis(500),
            max_retries: 2,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            base_delay: Duration::ZERO,
            max_jitter: Duration::ZERO,
            max_retries,
        }
    }

    /// Delay before retry number `retry` (0-based): `base * 2^retry ± jitter`
    pub fn delay_for(&self, retry: u32) -> Duration {
        let jitter = if self.max_jitter.is_zero() {
            0.0
        } else {
            rand::rng().random_range(-1.0..=1.0) * self.max_jitter.as_secs_f64()
        };
        self.delay_with_jitter(retry, jitter)
    }

    fn delay_with_jitter(&self, retry: u32, jitter_secs: f64) -> Duration {
        let exp = self.base_delay.as_secs_f64() * 2f64.powi(retry.min(16) as i32);
        Duration::from_secs_f64((exp + jitter_secs).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightConfig {
    pub primary_api_key: Option<String>,
    pub primary_model: String,
    pub primary_image_model: String,
    pub fallback_api_key: Option<String>,
    pub selected_fallback_model: Option<String>,
    pub default_fallback_models: Vec<String>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    pub referer: String,
    pub title: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for InsightConfig {
    fn default() -> Self {
        Self {
            primary_api_key: None,
            primary_model: GEMINI_FLASH.to_string(),
            primary_image_model: GEMINI_FLASH_IMAGE.to_string(),
            fallback_api_key: None,
            selected_fallback_model: None,
            default_fallback_models: DEFAULT_FALLBACK_MODELS.iter().map(|m| m.to_string()).collect(),
            retry: RetryPolicy::default(),
            request_timeout: Duration::from_secs(60),
            referer: APP_REFERER.to_string(),
            title: APP_TITLE.to_string(),
            temperature: 0.7,
            max_tokens: 1024,
        }
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl InsightConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.primary_api_key = env_value("GEMINI_API_KEY").or_else(|| env_value("API_KEY"));
        if let Some(model) = env_value("NEUROSIGNAL_PRIMARY_MODEL") {
            config.primary_model = model;
        }
        config.fallback_api_key = env_value("OPENROUTER_API_KEY");
        config.selected_fallback_model = env_value("NEUROSIGNAL_FALLBACK_MODEL");
        config
    }

    /// Stored key and model win over the environment
    pub fn with_stored_credentials(mut self, creds: &CredentialStore) -> rusqlite::Result<Self> {
        if let Some(key) = creds.api_key()? {
            self.fallback_api_key = Some(key);
        }
        if let Some(model) = creds.selected_model()? {
            self.selected_fallback_model = Some(model);
        }
        Ok(self)
    }

    /// Selected model first, then the defaults, without duplicates
    pub fn fallback_models(&self) -> Vec<String> {
        let mut models: Vec<String> = Vec::new();
        let candidates = self
            .selected_fallback_model
            .iter()
            .chain(self.default_fallback_models.iter());
        for model in candidates {
            let model = model.trim();
            if !model.is_empty() && !models.iter().any(|m| m == model) {
                models.push(model.to_string());
            }
        }
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Store;
    use std::sync::Arc;

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_with_jitter(0, 0.0), Duration::from_secs(1));
        assert_eq!(policy.delay_with_jitter(1, 0.0), Duration::from_secs(2));
        assert_eq!(policy.delay_with_jitter(2, 0.25), Duration::from_millis(4250));
    }

    #[test]
    fn test_jittered_delay_within_bounds() {
        let policy = RetryPolicy::default();
        for _ in 0..50 {
            let d = policy.delay_for(1);
            assert!(d >= Duration::from_millis(1500) && d <= Duration::from_millis(2500));
        }
    }

    #[test]
    fn test_delay_never_negative() {
        let policy = RetryPolicy {
            base_delay: Duration::from_millis(100),
            max_jitter: Duration::from_millis(500),
            max_retries: 2,
        };
        assert_eq!(policy.delay_with_jitter(0, -0.5), Duration::ZERO);
        assert_eq!(RetryPolicy::immediate(2).delay_for(3), Duration::ZERO);
    }

    #[test]
    fn test_fallback_model_order() {
        let config = InsightConfig {
            selected_fallback_model: Some("b".to_string()),
            default_fallback_models: vec!["a".into(), "b".into(), "c".into(), "a".into()],
            ..Default::default()
        };
        assert_eq!(config.fallback_models(), vec!["b", "a", "c"]);

        let none_selected = InsightConfig {
            selected_fallback_model: None,
            default_fallback_models: vec!["a".into(), "".into()],
            ..Default::default()
        };
        assert_eq!(none_selected.fallback_models(), vec!["a"]);
    }

    #[test]
    fn test_stored_credentials_overlay() {
        let creds = CredentialStore::new(Arc::new(Store::open_in_memory().unwrap()));
        creds.set_api_key("stored-key").unwrap();
        let config = InsightConfig {
            fallback_api_key: Some("env-key".into()),
            selected_fallback_model: Some("env-model".into()),
            ..Default::default()
        }
        .with_stored_credentials(&creds)
        .unwrap();
        assert_eq!(config.fallback_api_key.as_deref(), Some("stored-key"));
        assert_eq!(config.selected_fallback_model.as_deref(), Some("env-model"));
    }
}
