use crate::pipeline::InsightResponse;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Model,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: ChatRole,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
}

impl ChatMessage {
    fn new(role: ChatRole, text: &str, image_url: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role,
            text: text.to_string(),
            image_url,
            timestamp: Utc::now().timestamp_millis(),
        }
    }
}

/// Ticket for a request in flight, tied to the exchange's epoch
#[derive(Debug, Clone)]
pub struct PendingTurn {
    epoch: u64,
    pub query: String,
}

/// Append-only conversation about one session. `reset` starts a new epoch;
/// replies to turns begun before it are discarded.
#[derive(Debug, Default)]
pub struct ChatExchange {
    messages: Vec<ChatMessage>,
    epoch: u64,
}

impl ChatExchange {
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn begin_turn(&mut self, query: &str) -> PendingTurn {
        self.messages.push(ChatMessage::new(ChatRole::User, query, None));
        PendingTurn {
            epoch: self.epoch,
            query: query.to_string(),
        }
    }

    /// Append the reply; false (and nothing appended) if the exchange was
    /// reset since the turn began
    pub fn complete_turn(&mut self, pending: PendingTurn, response: &InsightResponse) -> bool {
        if pending.epoch != self.epoch {
            return false;
        }
        let image_url = response.image.as_ref().map(|i| i.to_data_url());
        self.messages
            .push(ChatMessage::new(ChatRole::Model, &response.text, image_url));
        true
    }

    pub fn reset(&mut self) {
        self.messages.clear();
        self.epoch += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::InsightSource;
    use crate::providers::ImagePayload;

    fn reply(text: &str) -> InsightResponse {
        InsightResponse {
            text: text.to_string(),
            image: None,
            source: InsightSource::Primary,
        }
    }

    #[test]
    fn test_turn_appends_both_messages() {
        let mut chat = ChatExchange::default();
        let turn = chat.begin_turn("Why the spike?");
        assert_eq!(chat.messages().len(), 1);
        assert!(chat.complete_turn(turn, &reply("Stress rose.")));
        let roles: Vec<ChatRole> = chat.messages().iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![ChatRole::User, ChatRole::Model]);
        assert_eq!(chat.messages()[1].text, "Stress rose.");
    }

    #[test]
    fn test_reply_after_reset_is_discarded() {
        let mut chat = ChatExchange::default();
        let turn = chat.begin_turn("Question");
        chat.reset();
        assert!(!chat.complete_turn(turn, &reply("late")));
        assert!(chat.messages().is_empty());
        assert_eq!(chat.epoch(), 1);
    }

    #[test]
    fn test_image_reply_becomes_data_url() {
        let mut chat = ChatExchange::default();
        let turn = chat.begin_turn("Show me");
        let mut response = reply("Here");
        response.image = Some(ImagePayload {
            mime_type: "image/png".into(),
            bytes: b"hello".to_vec(),
        });
        chat.complete_turn(turn, &response);
        assert_eq!(
            chat.messages()[1].image_url.as_deref(),
            Some("data:image/png;base64,aGVsbG8=")
        );
    }
}
