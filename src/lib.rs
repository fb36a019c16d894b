pub mod chat;
pub mod classifier;
pub mod config;
pub mod export;
pub mod gemini;
pub mod logging;
pub mod metrics;
pub mod openrouter;
pub mod pipeline;
pub mod providers;
pub mod session;
pub mod simulator;
pub mod store;
pub mod user;

use chat::{ChatExchange, ChatMessage};
use config::InsightConfig;
use gemini::GeminiClient;
use openrouter::{OpenRouterClient, OpenRouterModel};
use pipeline::{InsightPipeline, InsightResponse};
use providers::{FallbackProvider, PrimaryProvider, ProbeConnectivity};
use session::{Session, SessionSummary};
use std::path::Path;
use std::sync::Arc;
use store::{CredentialStore, KeyStatus, SessionStore, Store};

/// Handles shared by the commands below
#[derive(Clone)]
pub struct AppState {
    pub sessions: SessionStore,
    pub credentials: CredentialStore,
}

impl AppState {
    pub fn from_store(store: Store) -> Self {
        let store = Arc::new(store);
        Self {
            sessions: SessionStore::new(store.clone()),
            credentials: CredentialStore::new(store),
        }
    }
}

// ============ Setup ============

pub fn init_app(db_path: &Path) -> Result<AppState, String> {
    if let Err(e) = logging::init_logging() {
        log::warn!("Failed to initialize log file: {}", e);
    }

    // Keep the last 7 days of log files
    let _ = logging::cleanup_old_logs();

    let store = Store::open(db_path).map_err(|e| e.to_string())?;
    logging::log_storage(None, &format!("Opened store at {}", db_path.display()));
    Ok(AppState::from_store(store))
}

// ============ Journal ============

pub fn save_session(state: &AppState, session: &Session) -> Result<(), String> {
    state.sessions.save(session).map_err(|e| e.to_string())
}

pub fn load_journal(state: &AppState, user_id: &str) -> Result<Vec<Session>, String> {
    state.sessions.load_for_user(user_id).map_err(|e| e.to_string())
}

pub fn get_session(state: &AppState, session_id: &str) -> Result<Session, String> {
    state
        .sessions
        .get(session_id)
        .map_err(|e| e.to_string())?
        .ok_or_else(|| format!("Session not found: {}", session_id))
}

pub fn delete_session(state: &AppState, session_id: &str) -> Result<bool, String> {
    state.sessions.delete(session_id).map_err(|e| e.to_string())
}

// ============ Backup provider key ============

/// Backup provider client using the configured headers and request timeout
pub fn fallback_client(config: &InsightConfig, api_key: &str) -> Result<OpenRouterClient, String> {
    OpenRouterClient::new(api_key.trim(), &config.referer, &config.title, config.request_timeout)
        .map_err(|e| e.to_string())
}

pub async fn validate_and_save_key(state: &AppState, api_key: &str) -> Result<bool, String> {
    let client = fallback_client(&InsightConfig::from_env(), api_key)?;

    let valid = client.validate_key().await.map_err(|e| e.to_string())?;
    if valid {
        state.credentials.set_api_key(api_key).map_err(|e| e.to_string())?;
        state
            .credentials
            .set_key_status(KeyStatus::Valid)
            .map_err(|e| e.to_string())?;
        logging::log_storage(None, "OpenRouter key validated and saved");
    } else {
        state
            .credentials
            .set_key_status(KeyStatus::Invalid)
            .map_err(|e| e.to_string())?;
        logging::log_storage(None, "OpenRouter key rejected");
    }
    Ok(valid)
}

pub fn remove_key(state: &AppState) -> Result<(), String> {
    state.credentials.clear_api_key().map_err(|e| e.to_string())
}

pub fn select_fallback_model(state: &AppState, model: &str) -> Result<(), String> {
    state
        .credentials
        .set_selected_model(model)
        .map_err(|e| e.to_string())
}

pub async fn list_free_models(state: &AppState) -> Result<Vec<OpenRouterModel>, String> {
    let key = state
        .credentials
        .api_key()
        .map_err(|e| e.to_string())?
        .ok_or("No OpenRouter key saved")?;
    let client = fallback_client(&InsightConfig::from_env(), &key)?;
    client.list_free_models().await.map_err(|e| e.to_string())
}

// ============ Insights ============

/// Pipeline wired to the real providers, using the environment plus any
/// stored backup credentials
pub fn build_pipeline(state: &AppState) -> Result<InsightPipeline, String> {
    let config = InsightConfig::from_env()
        .with_stored_credentials(&state.credentials)
        .map_err(|e| e.to_string())?;

    let primary: Option<Arc<dyn PrimaryProvider>> = match &config.primary_api_key {
        Some(key) => Some(Arc::new(
            GeminiClient::new(key, &config.primary_model, &config.primary_image_model, config.request_timeout)
                .map_err(|e| e.to_string())?,
        )),
        None => None,
    };

    let fallback: Option<Arc<dyn FallbackProvider>> = match &config.fallback_api_key {
        Some(key) => Some(Arc::new(fallback_client(&config, key)?)),
        None => None,
    };

    Ok(InsightPipeline::new(
        config,
        primary,
        fallback,
        Arc::new(ProbeConnectivity::default()),
    ))
}

pub async fn ask_about_session(
    state: &AppState,
    pipeline: &InsightPipeline,
    session_id: &str,
    query: &str,
    history: &[ChatMessage],
) -> Result<InsightResponse, String> {
    let session = get_session(state, session_id)?;
    logging::log_pipeline(Some(session_id), &format!("Question: {}", query));
    let summary = SessionSummary::from_session(&session);
    Ok(pipeline.request_insight(query, &summary, history).await)
}

/// One question in an ongoing chat about a session. The earlier messages go
/// along as history; the reply is appended unless the chat was reset while
/// the request was in flight.
pub async fn chat_turn(
    state: &AppState,
    pipeline: &InsightPipeline,
    chat: &mut ChatExchange,
    session_id: &str,
    query: &str,
) -> Result<InsightResponse, String> {
    let history = chat.messages().to_vec();
    let turn = chat.begin_turn(query);
    let response = ask_about_session(state, pipeline, session_id, query, &history).await?;
    if !chat.complete_turn(turn, &response) {
        logging::log_pipeline(Some(session_id), "Chat was reset, reply discarded");
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InsightSource;
    use crate::providers::{CompletionMessage, ProviderError, StaticConnectivity};
    use crate::session::SessionTracker;
    use crate::simulator::initial_sample;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    fn state() -> AppState {
        AppState::from_store(Store::open_in_memory().unwrap())
    }

    fn session(user: &str) -> Session {
        let mut tracker = SessionTracker::new();
        for _ in 0..3 {
            tracker.ingest(initial_sample());
        }
        tracker.finish(user, Some("Practice".into()), None)
    }

    #[test]
    fn test_journal_commands() {
        let state = state();
        let s = session("user-a");
        save_session(&state, &s).unwrap();
        save_session(&state, &session("user-b")).unwrap();

        let journal = load_journal(&state, "user-a").unwrap();
        assert_eq!(journal, vec![s.clone()]);
        assert!(delete_session(&state, &s.id).unwrap());
        assert!(get_session(&state, &s.id).is_err());
    }

    #[test]
    fn test_select_model() {
        let state = state();
        select_fallback_model(&state, "x:free").unwrap();
        assert_eq!(state.credentials.selected_model().unwrap().as_deref(), Some("x:free"));
    }

    #[tokio::test]
    async fn test_ask_offline_answers_locally() {
        let state = state();
        let s = session("user-a");
        save_session(&state, &s).unwrap();

        let pipeline = InsightPipeline::new(
            InsightConfig::default(),
            None,
            None,
            Arc::new(StaticConnectivity(false)),
        );
        let response = ask_about_session(&state, &pipeline, &s.id, "How calm was I?", &[])
            .await
            .unwrap();
        assert_eq!(response.source, InsightSource::Local);
        assert!(ask_about_session(&state, &pipeline, "missing", "q", &[]).await.is_err());
    }

    struct RecordingFallback {
        seen: Mutex<Vec<Vec<CompletionMessage>>>,
    }

    #[async_trait]
    impl FallbackProvider for RecordingFallback {
        async fn complete(
            &self,
            _model: &str,
            messages: &[CompletionMessage],
            _temperature: f32,
            _max_tokens: u32,
        ) -> Result<String, ProviderError> {
            let mut seen = self.seen.lock().unwrap();
            seen.push(messages.to_vec());
            Ok(format!("reply {}", seen.len()))
        }
    }

    #[tokio::test]
    async fn test_chat_history_reaches_backup_provider() {
        let state = state();
        let s = session("user-a");
        save_session(&state, &s).unwrap();

        let recorder = Arc::new(RecordingFallback { seen: Mutex::new(Vec::new()) });
        let fallback: Arc<dyn FallbackProvider> = recorder.clone();
        let config = InsightConfig {
            primary_api_key: None,
            default_fallback_models: vec!["m:free".into()],
            ..Default::default()
        };
        let pipeline = InsightPipeline::new(
            config,
            None,
            Some(fallback),
            Arc::new(StaticConnectivity(true)),
        );

        let mut chat = ChatExchange::default();
        chat_turn(&state, &pipeline, &mut chat, &s.id, "When was I most anxious?")
            .await
            .unwrap();
        chat_turn(&state, &pipeline, &mut chat, &s.id, "And why?")
            .await
            .unwrap();

        assert_eq!(chat.messages().len(), 4);
        assert_eq!(chat.messages()[3].text, "reply 2");

        let seen = recorder.seen.lock().unwrap();
        let first: Vec<&str> = seen[0].iter().map(|m| m.role.as_str()).collect();
        assert_eq!(first, vec!["system", "user"]);

        let second: Vec<(&str, &str)> = seen[1]
            .iter()
            .skip(1)
            .map(|m| (m.role.as_str(), m.content.as_str()))
            .collect();
        assert_eq!(
            second,
            vec![
                ("user", "When was I most anxious?"),
                ("assistant", "reply 1"),
                ("user", "And why?"),
            ]
        );
    }

    #[tokio::test]
    async fn test_chat_reset_starts_without_history() {
        let state = state();
        let s = session("user-a");
        save_session(&state, &s).unwrap();
        let pipeline = InsightPipeline::new(
            InsightConfig::default(),
            None,
            None,
            Arc::new(StaticConnectivity(false)),
        );

        let mut chat = ChatExchange::default();
        chat_turn(&state, &pipeline, &mut chat, &s.id, "First").await.unwrap();
        chat.reset();
        chat_turn(&state, &pipeline, &mut chat, &s.id, "Second").await.unwrap();
        assert_eq!(chat.messages().len(), 2);
        assert_eq!(chat.messages()[0].text, "Second");
    }

    #[test]
    fn test_fallback_client_uses_configured_timeout() {
        let config = InsightConfig {
            request_timeout: Duration::from_secs(7),
            ..Default::default()
        };
        let client = fallback_client(&config, "key").unwrap();
        assert_eq!(client.timeout(), Duration::from_secs(7));
    }
}
