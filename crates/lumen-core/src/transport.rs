use std::pin::Pin;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::TransportError;
use crate::ids::ConversationId;

/// Body of the outbound chat request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation_id: Option<ConversationId>,
    #[serde(default)]
    pub mode: ChatMode,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatMode {
    /// Let the backend pick the analysis strategy.
    #[default]
    Auto,
}

impl ChatRequest {
    pub fn new(message: impl Into<String>, conversation_id: Option<ConversationId>) -> Self {
        Self {
            message: message.into(),
            conversation_id,
            mode: ChatMode::Auto,
        }
    }
}

/// Raw response body, chunked as it arrived from the network.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Opens a streaming response for a chat request.
///
/// Implementations must resolve to `TransportError::Cancelled` promptly once
/// `cancel` fires, and must not touch session state.
#[async_trait]
pub trait Transport: Send + Sync {
    fn name(&self) -> &str;

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError>;
}
