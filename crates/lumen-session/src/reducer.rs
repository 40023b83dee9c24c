//! Pure session state transitions.
//!
//! `reduce` never performs I/O and never reads a clock: timestamps travel in
//! the actions, so replaying the same actions always yields the same state.
//!
//! ```text
//! Idle --SendMessage--> Connecting --ConnectionOpened--> Streaming
//! Streaming --Complete | ConnectionError | Cancel--> Idle
//! any --Reset--> Idle (initial state)
//! ```
//!
//! Actions that require a turn in flight are ignored when nothing is loading.

use chrono::{DateTime, Utc};

use lumen_core::ids::ConversationId;
use lumen_core::messages::{Artifact, Message};

use crate::state::SessionState;

#[derive(Clone, Debug, PartialEq)]
pub enum Action {
    SendMessage { text: String, at: DateTime<Utc> },
    ConnectionOpened,
    Progress(serde_json::Value),
    ContentChunk { text: String, at: DateTime<Utc> },
    ArtifactReceived { artifact: Artifact, at: DateTime<Utc> },
    ConnectionError { message: String },
    /// `None` keeps the current conversation id (implicit completion).
    Complete { conversation_id: Option<ConversationId> },
    Cancel,
    Reset,
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::ConnectionOpened => "connection_opened",
            Self::Progress(_) => "progress",
            Self::ContentChunk { .. } => "content_chunk",
            Self::ArtifactReceived { .. } => "artifact_received",
            Self::ConnectionError { .. } => "connection_error",
            Self::Complete { .. } => "complete",
            Self::Cancel => "cancel",
            Self::Reset => "reset",
        }
    }

    fn requires_loading(&self) -> bool {
        matches!(
            self,
            Self::ConnectionOpened
                | Self::Progress(_)
                | Self::ContentChunk { .. }
                | Self::ArtifactReceived { .. }
                | Self::Complete { .. }
                | Self::Cancel
        )
    }
}

pub fn reduce(state: &SessionState, action: Action) -> SessionState {
    if action.requires_loading() && !state.is_loading {
        return state.clone();
    }

    let mut next = state.clone();
    match action {
        Action::SendMessage { text, at } => {
            next.messages.push(Message::user(text, at));
            next.is_loading = true;
            next.error = None;
            next.progress = None;
        }
        Action::ConnectionOpened => {
            next.is_connected = true;
        }
        Action::Progress(payload) => {
            next.progress = Some(payload);
        }
        Action::ContentChunk { text, at } => {
            current_assistant(&mut next, at).content.push_str(&text);
        }
        Action::ArtifactReceived { artifact, at } => {
            current_assistant(&mut next, at).artifacts.push(artifact);
        }
        Action::ConnectionError { message } => {
            next.error = Some(message);
            end_turn(&mut next);
        }
        Action::Complete { conversation_id } => {
            if conversation_id.is_some() {
                next.conversation_id = conversation_id;
            }
            end_turn(&mut next);
        }
        Action::Cancel => {
            end_turn(&mut next);
        }
        Action::Reset => return SessionState::default(),
    }
    next
}

fn end_turn(state: &mut SessionState) {
    state.is_loading = false;
    state.is_connected = false;
    state.progress = None;
}

/// The assistant message of the turn in flight, created on first use.
fn current_assistant(state: &mut SessionState, at: DateTime<Utc>) -> &mut Message {
    let needs_new = !state.messages.last().is_some_and(Message::is_assistant);
    if needs_new {
        state.messages.push(Message::assistant(at));
    }
    let last = state.messages.len() - 1;
    &mut state.messages[last]
}
