use serde::{Deserialize, Serialize};

use lumen_core::ids::ConversationId;
use lumen_core::messages::Message;

/// Snapshot of one chat session as seen by presentation layers.
///
/// Only the reducer produces new values; everything else reads snapshots.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub messages: Vec<Message>,
    pub conversation_id: Option<ConversationId>,
    pub is_connected: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    /// Latest progress payload of the turn in flight.
    pub progress: Option<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Streaming,
}

impl SessionState {
    pub fn phase(&self) -> SessionPhase {
        match (self.is_loading, self.is_connected) {
            (false, _) => SessionPhase::Idle,
            (true, false) => SessionPhase::Connecting,
            (true, true) => SessionPhase::Streaming,
        }
    }

    /// Assistant message of the current turn, if it has started.
    pub fn current_assistant(&self) -> Option<&Message> {
        self.messages.last().filter(|m| m.is_assistant())
    }
}
