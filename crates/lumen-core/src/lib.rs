//! Shared types for the lumen chat client: wire request and stream event
//! shapes, transcript messages, the transport seam and its error taxonomy.

pub mod errors;
pub mod ids;
pub mod messages;
pub mod retry;
pub mod stream;
pub mod transport;

pub use errors::{ParseError, TransportError};
pub use ids::{ConversationId, TurnId};
pub use messages::{Artifact, Message, Role};
pub use retry::RetryPolicy;
pub use stream::StreamEvent;
pub use transport::{ByteStream, ChatMode, ChatRequest, Transport};
