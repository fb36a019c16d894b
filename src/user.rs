use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub name: String,
}

impl User {
    /// Identity derived from the email alone; a blank name falls back to
    /// the local part of the address.
    pub fn from_email(email: &str, name: Option<&str>) -> Self {
        let email = email.trim().to_string();
        let name = name
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());
        Self {
            id: STANDARD.encode(email.as_bytes()),
            email,
            name,
        }
    }
}
