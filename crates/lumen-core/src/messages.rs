use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the session transcript.
///
/// Assistant content grows as content fragments arrive; artifacts are attached
/// in arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub artifacts: Vec<Artifact>,
    pub created_at: DateTime<Utc>,
}

/// Structured output attached to an assistant message (tables, charts, maps...).
/// The payload is opaque to the client core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl Message {
    pub fn user(text: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            artifacts: Vec::new(),
            created_at,
        }
    }

    pub fn assistant(created_at: DateTime<Utc>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            artifacts: Vec::new(),
            created_at,
        }
    }

    pub fn is_assistant(&self) -> bool {
        self.role == Role::Assistant
    }
}
