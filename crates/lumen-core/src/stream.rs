use serde::{Deserialize, Serialize};

use crate::ids::ConversationId;
use crate::messages::Artifact;

/// One decoded record of the response body.
///
/// Wire shape: `{"type": "<kind>", "data": {...}}`, one object per line.
/// Records arrive as `progress* (content | artifact)* (complete | error)`, but
/// the decoder does not enforce that order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Backend status update; payload is opaque.
    Progress(serde_json::Value),
    Content {
        #[serde(default)]
        text: String,
    },
    Artifact(Artifact),
    /// Error raised deliberately by the remote service.
    Error {
        #[serde(default = "unknown_error")]
        message: String,
    },
    Complete {
        #[serde(default)]
        conversation_id: Option<ConversationId>,
    },
}

fn unknown_error() -> String {
    "unknown error".to_string()
}

impl StreamEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Progress(_) => "progress",
            Self::Content { .. } => "content",
            Self::Artifact(_) => "artifact",
            Self::Error { .. } => "error",
            Self::Complete { .. } => "complete",
        }
    }

    /// Events after which the server sends nothing meaningful for this turn.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Error { .. } | Self::Complete { .. })
    }
}
