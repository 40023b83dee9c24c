/// Typed error hierarchy for transport operations.
/// Classifies errors as retryable (server, network), terminal (client) or
/// user-initiated (cancelled).
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    // Terminal, never retried
    #[error("request rejected ({status}): {message}")]
    ClientError { status: u16, message: String },

    // Retryable
    #[error("server error ({status}): {message}")]
    ServerError { status: u16, message: String },
    #[error("network error: {0}")]
    NetworkError(String),

    // Committed stream failures
    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("cancelled")]
    Cancelled,
}

impl TransportError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ServerError { .. } | Self::NetworkError(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ClientError { .. } => "client_error",
            Self::ServerError { .. } => "server_error",
            Self::NetworkError(_) => "network_error",
            Self::StreamInterrupted(_) => "stream_interrupted",
            Self::Cancelled => "cancelled",
        }
    }

    /// Classify a non-success HTTP status into the appropriate error variant.
    ///
    /// Anything outside 5xx is treated as terminal.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = status_message(status, body);
        match status {
            500..=599 => Self::ServerError { status, message },
            _ => Self::ClientError { status, message },
        }
    }
}

/// Prefer a `message`/`detail`/`error` string from a JSON error body, then the
/// raw body, then a generic description of the status.
fn status_message(status: u16, body: &str) -> String {
    let body = body.trim();
    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(body) {
        for key in ["message", "detail", "error"] {
            if let Some(text) = map.get(key).and_then(|v| v.as_str()) {
                return text.to_string();
            }
        }
    }
    if body.is_empty() {
        format!("HTTP status {status}")
    } else {
        body.to_string()
    }
}

/// A single frame that could not be decoded into a stream event.
///
/// Recovered locally by the decoder; never surfaced as a session error.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("malformed frame: {reason}")]
pub struct ParseError {
    pub line: String,
    pub reason: String,
}

impl ParseError {
    pub fn new(line: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            line: line.into(),
            reason: reason.into(),
        }
    }
}
