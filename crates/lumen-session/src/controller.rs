use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use lumen_core::errors::TransportError;
use lumen_core::ids::{ConversationId, TurnId};
use lumen_core::stream::StreamEvent;
use lumen_core::transport::{ChatRequest, Transport};
use lumen_transport::{DecodedStream, ErrorReporter, TracingReporter};

use crate::reducer::Action;
use crate::state::SessionState;
use crate::store::SessionStore;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    #[error("a message is already in flight")]
    Busy,
    #[error("message is empty")]
    EmptyMessage,
}

/// How a turn ended, as seen by the caller of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed { conversation_id: Option<ConversationId> },
    Failed { message: String },
    Cancelled,
}

struct ActiveTurn {
    id: TurnId,
    cancel: CancellationToken,
}

type ActiveSlot = Arc<Mutex<Option<ActiveTurn>>>;

/// Drives one chat session: opens the transport, decodes the response and
/// feeds actions into the store.
///
/// At most one turn is in flight. A turn may only dispatch while it still
/// owns the active slot, so nothing from a turn reaches the store once it
/// has been cancelled or reset. Lock order is slot, then store.
#[derive(Clone)]
pub struct SessionController {
    transport: Arc<dyn Transport>,
    store: SessionStore,
    active: ActiveSlot,
    reporter: Arc<dyn ErrorReporter>,
    idle_timeout: Option<Duration>,
}

impl SessionController {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            store: SessionStore::new(),
            active: Arc::new(Mutex::new(None)),
            reporter: Arc::new(TracingReporter),
            idle_timeout: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ErrorReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn state(&self) -> Arc<SessionState> {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<SessionState>> {
        self.store.subscribe()
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn is_busy(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Send one user message and stream the reply into the session state.
    ///
    /// Resolves when the turn ends. `conversation_id` falls back to the one
    /// recorded in the state. Dropping the returned future cancels the turn.
    pub async fn send_message(
        &self,
        text: impl Into<String>,
        conversation_id: Option<ConversationId>,
    ) -> Result<TurnOutcome, SessionError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }

        let turn_id = TurnId::new();
        let cancel = CancellationToken::new();
        let request = {
            let mut active = self.active.lock();
            if active.is_some() {
                return Err(SessionError::Busy);
            }
            *active = Some(ActiveTurn {
                id: turn_id.clone(),
                cancel: cancel.clone(),
            });
            let conversation_id = conversation_id.or(self.store.snapshot().conversation_id);
            self.store.dispatch(Action::SendMessage {
                text: text.clone(),
                at: Utc::now(),
            });
            ChatRequest::new(text, conversation_id)
        };

        let _guard = TurnGuard {
            active: &self.active,
            store: &self.store,
            turn_id: &turn_id,
        };

        let span = info_span!("turn", turn_id = %turn_id, conversation_id = ?request.conversation_id);
        let outcome = self.run_turn(&turn_id, &cancel, &request).instrument(span).await;
        Ok(outcome)
    }

    async fn run_turn(
        &self,
        turn_id: &TurnId,
        cancel: &CancellationToken,
        request: &ChatRequest,
    ) -> TurnOutcome {
        debug!(transport = self.transport.name(), "opening response stream");
        let body = match self.transport.open(request, cancel).await {
            Ok(body) => body,
            Err(TransportError::Cancelled) => return TurnOutcome::Cancelled,
            Err(e) => {
                warn!(error_kind = e.error_kind(), error = %e, "connection failed");
                return self.fail(turn_id, e.to_string());
            }
        };

        if !self.dispatch_for(turn_id, Action::ConnectionOpened) {
            return TurnOutcome::Cancelled;
        }

        let mut events = DecodedStream::new(body, cancel.clone(), self.reporter.clone());
        if let Some(idle) = self.idle_timeout {
            events = events.with_idle_timeout(idle);
        }

        while let Some(item) = events.next().await {
            let action = match item {
                Ok(StreamEvent::Progress(payload)) => Action::Progress(payload),
                Ok(StreamEvent::Content { text }) => Action::ContentChunk {
                    text,
                    at: Utc::now(),
                },
                Ok(StreamEvent::Artifact(artifact)) => Action::ArtifactReceived {
                    artifact,
                    at: Utc::now(),
                },
                Ok(StreamEvent::Error { message }) => {
                    warn!(error = %message, "server reported error");
                    return self.fail(turn_id, message);
                }
                Ok(StreamEvent::Complete { conversation_id }) => {
                    return self.complete(turn_id, conversation_id);
                }
                Err(e) => {
                    warn!(error_kind = e.error_kind(), error = %e, "response stream failed");
                    return self.fail(turn_id, e.to_string());
                }
            };
            if !self.dispatch_for(turn_id, action) {
                return TurnOutcome::Cancelled;
            }
        }

        if cancel.is_cancelled() {
            return TurnOutcome::Cancelled;
        }
        debug!("stream ended without completion record");
        self.complete(turn_id, None)
    }

    /// Cancel the turn in flight. Returns false when there was none.
    pub fn cancel(&self) -> bool {
        let mut active = self.active.lock();
        abandon(&mut active, &self.store)
    }

    /// Cancel any turn in flight and return the session to its initial state.
    pub fn reset(&self) {
        let mut active = self.active.lock();
        abandon(&mut active, &self.store);
        self.store.dispatch(Action::Reset);
        info!("session reset");
    }

    fn dispatch_for(&self, turn_id: &TurnId, action: Action) -> bool {
        let active = self.active.lock();
        if !owns(&active, turn_id) {
            return false;
        }
        self.store.dispatch(action);
        true
    }

    /// Dispatch the terminal action of a turn and release the slot.
    fn finish(&self, turn_id: &TurnId, action: Action) -> Option<Arc<SessionState>> {
        let mut active = self.active.lock();
        if !owns(&active, turn_id) {
            return None;
        }
        *active = None;
        Some(self.store.dispatch(action))
    }

    fn fail(&self, turn_id: &TurnId, message: String) -> TurnOutcome {
        match self.finish(turn_id, Action::ConnectionError { message: message.clone() }) {
            Some(_) => TurnOutcome::Failed { message },
            None => TurnOutcome::Cancelled,
        }
    }

    fn complete(&self, turn_id: &TurnId, conversation_id: Option<ConversationId>) -> TurnOutcome {
        match self.finish(turn_id, Action::Complete { conversation_id }) {
            Some(state) => {
                info!(conversation_id = ?state.conversation_id, "turn complete");
                TurnOutcome::Completed {
                    conversation_id: state.conversation_id,
                }
            }
            None => TurnOutcome::Cancelled,
        }
    }
}

fn owns(active: &Option<ActiveTurn>, turn_id: &TurnId) -> bool {
    active.as_ref().is_some_and(|turn| &turn.id == turn_id)
}

fn abandon(active: &mut Option<ActiveTurn>, store: &SessionStore) -> bool {
    let Some(turn) = active.take() else {
        return false;
    };
    turn.cancel.cancel();
    store.dispatch(Action::Cancel);
    info!(turn_id = %turn.id, "turn cancelled");
    true
}

/// Cancels its turn if `send_message` is dropped before the turn ends.
struct TurnGuard<'a> {
    active: &'a Mutex<Option<ActiveTurn>>,
    store: &'a SessionStore,
    turn_id: &'a TurnId,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.active.lock();
        if owns(&active, self.turn_id) {
            abandon(&mut active, self.store);
        }
    }
}
