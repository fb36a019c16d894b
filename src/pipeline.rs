//! Insight requests against a recorded session.
//!
//! A request moves through a small state machine: connectivity check,
//! primary provider (with backoff on transient errors), the secondary
//! provider's model chain, and finally a local summary built from the
//! session averages. Every path ends in text; nothing is returned as an
//! error to the caller.

use crate::chat::{ChatMessage, ChatRole};
use crate::config::InsightConfig;
use crate::logging;
use crate::metrics::Averages;
use crate::providers::{
    CompletionMessage, Connectivity, FallbackProvider, ImagePayload, PrimaryProvider, PrimaryReply,
    ProviderError,
};
use crate::session::SessionSummary;
use serde::Serialize;
use std::sync::Arc;

pub const GENERIC_ERROR_TEXT: &str = "Sorry, I encountered an error analyzing the data.";
pub const OFFLINE_NOTE: &str = "You appear to be offline, so here is a summary computed on this device.";
pub const PRIMARY_UNAVAILABLE_NOTE: &str =
    "The analysis service is unavailable right now, so here is a summary computed on this device.";
pub const FALLBACK_EXHAUSTED_NOTE: &str =
    "The analysis service and all backup models are unavailable right now, so here is a summary computed on this device.";

const VISUAL_MARKER: &str = "[VISUAL:";
/// Prior chat messages carried into a prompt
const HISTORY_LIMIT: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "source", rename_all = "lowercase")]
pub enum InsightSource {
    Primary,
    Fallback { model: String },
    Local,
}

impl InsightSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            InsightSource::Primary => "primary",
            InsightSource::Fallback { .. } => "fallback",
            InsightSource::Local => "local",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsightResponse {
    pub text: String,
    pub image: Option<ImagePayload>,
    pub source: InsightSource,
}

impl InsightResponse {
    fn local(text: String) -> Self {
        Self {
            text,
            image: None,
            source: InsightSource::Local,
        }
    }
}

enum Stage {
    CheckConnectivity,
    Primary,
    Fallback,
    Local(&'static str),
    Apology,
    Done(InsightResponse),
}

pub struct InsightPipeline {
    config: InsightConfig,
    primary: Option<Arc<dyn PrimaryProvider>>,
    fallback: Option<Arc<dyn FallbackProvider>>,
    connectivity: Arc<dyn Connectivity>,
}

impl InsightPipeline {
    pub fn new(
        config: InsightConfig,
        primary: Option<Arc<dyn PrimaryProvider>>,
        fallback: Option<Arc<dyn FallbackProvider>>,
        connectivity: Arc<dyn Connectivity>,
    ) -> Self {
        Self {
            config,
            primary,
            fallback,
            connectivity,
        }
    }

    pub fn config(&self) -> &InsightConfig {
        &self.config
    }

    pub async fn request_insight(
        &self,
        query: &str,
        summary: &SessionSummary,
        history: &[ChatMessage],
    ) -> InsightResponse {
        let prompt = build_prompt(query, summary, history);
        let mut stage = Stage::CheckConnectivity;

        loop {
            stage = match stage {
                Stage::CheckConnectivity => {
                    if self.connectivity.is_online().await {
                        Stage::Primary
                    } else {
                        logging::log_pipeline(None, "Offline, answering locally");
                        Stage::Local(OFFLINE_NOTE)
                    }
                }
                Stage::Primary => match self.call_primary(&prompt).await {
                    Ok(reply) => Stage::Done(self.finish_primary(reply).await),
                    Err(e) if e.is_failover() && self.fallback.is_some() => {
                        logging::log_pipeline(None, &format!("Primary failed ({}), trying backup models", e.kind()));
                        Stage::Fallback
                    }
                    Err(e) if e.is_failover() => {
                        logging::log_pipeline(None, &format!("Primary failed ({}), no backup configured", e.kind()));
                        Stage::Local(PRIMARY_UNAVAILABLE_NOTE)
                    }
                    Err(e) => {
                        logging::log_error(None, &format!("Primary request failed: {}", e));
                        Stage::Apology
                    }
                },
                Stage::Fallback => match self.call_fallback_chain(query, summary, history).await {
                    Some(response) => Stage::Done(response),
                    None => Stage::Local(FALLBACK_EXHAUSTED_NOTE),
                },
                Stage::Local(note) => Stage::Done(InsightResponse::local(format!(
                    "{}\n\n{}",
                    note,
                    local_summary(&summary.averages)
                ))),
                Stage::Apology => Stage::Done(InsightResponse::local(GENERIC_ERROR_TEXT.to_string())),
                Stage::Done(response) => {
                    logging::log_pipeline(None, &format!("Answered from {}", response.source.as_str()));
                    return response;
                }
            };
        }
    }

    async fn call_primary(&self, prompt: &str) -> Result<PrimaryReply, ProviderError> {
        let primary = match (&self.primary, &self.config.primary_api_key) {
            (Some(p), Some(_)) => p,
            _ => return Err(ProviderError::NotConfigured),
        };

        let mut retry = 0;
        loop {
            match primary.generate(prompt).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_transient() && retry < self.config.retry.max_retries => {
                    let delay = self.config.retry.delay_for(retry);
                    logging::log_pipeline(
                        None,
                        &format!("Primary {} (retry {} in {:?})", e.kind(), retry + 1, delay),
                    );
                    tokio::time::sleep(delay).await;
                    retry += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Strip the visual marker and fetch its illustration if the reply
    /// did not already carry one. Image failures are dropped.
    async fn finish_primary(&self, reply: PrimaryReply) -> InsightResponse {
        let (text, visual) = extract_visual_request(&reply.text);
        let mut image = reply.image;

        if image.is_none() {
            if let (Some(description), Some(primary)) = (visual, &self.primary) {
                match primary.generate_image(&description).await {
                    Ok(payload) => image = Some(payload),
                    Err(e) => logging::log_pipeline(None, &format!("Image request dropped: {}", e.kind())),
                }
            }
        }

        InsightResponse {
            text,
            image,
            source: InsightSource::Primary,
        }
    }

    /// One attempt per model, in order; first success wins
    async fn call_fallback_chain(
        &self,
        query: &str,
        summary: &SessionSummary,
        history: &[ChatMessage],
    ) -> Option<InsightResponse> {
        let fallback = self.fallback.as_ref()?;
        let messages = build_completion_messages(query, summary, history);

        for model in self.config.fallback_models() {
            match fallback
                .complete(&model, &messages, self.config.temperature, self.config.max_tokens)
                .await
            {
                Ok(text) => {
                    let (text, _) = extract_visual_request(&text);
                    return Some(InsightResponse {
                        text,
                        image: None,
                        source: InsightSource::Fallback { model },
                    });
                }
                Err(e) => {
                    logging::log_pipeline(None, &format!("Backup model {} failed: {}", model, e.kind()));
                }
            }
        }
        None
    }
}

fn session_context(summary: &SessionSummary) -> String {
    let a = &summary.averages;
    let timeline = summary
        .sampled_timeline
        .iter()
        .map(|t| {
            format!(
                "Time: {:.0}s | Anx: {:.0} | Stress: {:.0} | Conf: {:.0}",
                t.timestamp, t.anxiety, t.stress, t.confidence
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    format!(
        "Session Summary:\n\
         Total Duration: {} seconds.\n\
         Averages:\n\
         - Anxiety: {}\n\
         - Stress: {}\n\
         - Confidence: {}\n\
         - Deception Hints: {}\n\
         - Excitement: {}\n\
         - Aggression: {}\n\n\
         Timeline Data Sample (every 5 seconds):\n{}",
        summary.duration,
        a.anxiety,
        a.stress,
        a.confidence,
        a.deception,
        a.excitement,
        a.aggression,
        if timeline.is_empty() { "(no samples)".to_string() } else { timeline }
    )
}

const ANALYST_ROLE: &str = "You are an expert Body Language and Voice Analyst AI. You are analyzing a user's session data.";

const ANSWER_RULES: &str = "Answer the user specifically based on the data. Keep it concise, professional, and insightful. \
If the user asks \"Why did X happen at Y time?\", look at the timeline around that timestamp. \
If a simple chart or diagram would genuinely help, end your answer with one line of the form [VISUAL: short description].";

fn recent_history(history: &[ChatMessage]) -> &[ChatMessage] {
    &history[history.len().saturating_sub(HISTORY_LIMIT)..]
}

pub fn build_prompt(query: &str, summary: &SessionSummary, history: &[ChatMessage]) -> String {
    let mut prompt = format!("{}\n\n{}\n\n", ANALYST_ROLE, session_context(summary));

    let recent = recent_history(history);
    if !recent.is_empty() {
        prompt.push_str("Conversation so far:\n");
        for message in recent {
            let who = match message.role {
                ChatRole::User => "User",
                ChatRole::Model => "Analyst",
            };
            prompt.push_str(&format!("{}: {}\n", who, message.text));
        }
        prompt.push('\n');
    }

    prompt.push_str(&format!("User Question: \"{}\"\n\n{}", query, ANSWER_RULES));
    prompt
}

/// System context, recent history and the question, for the secondary provider
pub fn build_completion_messages(
    query: &str,
    summary: &SessionSummary,
    history: &[ChatMessage],
) -> Vec<CompletionMessage> {
    let mut messages = vec![CompletionMessage::new(
        "system",
        format!("{}\n\n{}\n\n{}", ANALYST_ROLE, session_context(summary), ANSWER_RULES),
    )];
    for message in recent_history(history) {
        let role = match message.role {
            ChatRole::User => "user",
            ChatRole::Model => "assistant",
        };
        messages.push(CompletionMessage::new(role, message.text.clone()));
    }
    messages.push(CompletionMessage::new("user", query));
    messages
}

/// Remove a `[VISUAL: ...]` marker, returning the cleaned text and the
/// marker's description
pub fn extract_visual_request(text: &str) -> (String, Option<String>) {
    let Some(start) = text.find(VISUAL_MARKER) else {
        return (text.trim().to_string(), None);
    };
    let after = &text[start + VISUAL_MARKER.len()..];
    let Some(end) = after.find(']') else {
        return (text.trim().to_string(), None);
    };

    let description = after[..end].trim().to_string();
    let cleaned = format!("{}{}", &text[..start], &after[end + 1..])
        .trim()
        .to_string();
    let description = (!description.is_empty()).then_some(description);
    (cleaned, description)
}

/// Fixed threshold sentences over the session averages
pub fn local_summary(averages: &Averages) -> String {
    let mut lines = Vec::new();

    if averages.anxiety > 60 {
        lines.push(format!("Anxiety was elevated for much of the session (average {}).", averages.anxiety));
    } else if averages.anxiety < 30 {
        lines.push(format!("Anxiety stayed low (average {}).", averages.anxiety));
    } else {
        lines.push(format!("Anxiety was moderate (average {}).", averages.anxiety));
    }

    if averages.stress > 60 {
        lines.push(format!("Stress indicators ran high (average {}), suggesting sustained pressure.", averages.stress));
    } else if averages.stress < 30 {
        lines.push(format!("Stress indicators were low (average {}).", averages.stress));
    }

    if averages.confidence > 70 {
        lines.push(format!("Confidence was strong throughout (average {}).", averages.confidence));
    } else if averages.confidence < 40 {
        lines.push(format!("Confidence was subdued (average {}).", averages.confidence));
    }

    if averages.deception > 50 {
        lines.push(format!(
            "Deception hints appeared frequently (average {}); treat this as a prompt for follow-up questions, not proof.",
            averages.deception
        ));
    }

    if averages.aggression > 50 {
        lines.push(format!("Signs of agitation or aggression were noticeable (average {}).", averages.aggression));
    }

    if averages.boredom > 60 {
        lines.push(format!("Engagement dropped off, with boredom averaging {}.", averages.boredom));
    }

    lines.join(" ")
}
