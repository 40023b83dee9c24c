use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::Stream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, trace, warn};

use lumen_core::errors::{ParseError, TransportError};
use lumen_core::stream::StreamEvent;
use lumen_core::transport::ByteStream;

const MAX_LOGGED_LINE: usize = 200;

/// Receives frames the decoder had to drop.
pub trait ErrorReporter: Send + Sync {
    fn report(&self, error: &ParseError);
}

/// Default reporter: logs dropped frames at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingReporter;

impl ErrorReporter for TracingReporter {
    fn report(&self, error: &ParseError) {
        warn!(
            reason = %error.reason,
            line = %truncate(&error.line, MAX_LOGGED_LINE),
            "dropping malformed stream frame"
        );
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Reassembles newline-delimited JSON records from arbitrarily split chunks.
///
/// Bytes are buffered until a `\n` arrives, so records (and multi-byte
/// characters) split across chunk boundaries decode intact. Blank lines are
/// skipped. Each result is either a decoded event or the frame that failed.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and decode every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Result<StreamEvent, ParseError>> {
        self.buffer.extend_from_slice(chunk);

        let mut results = Vec::new();
        let mut start = 0;
        while let Some(pos) = self.buffer[start..].iter().position(|b| *b == b'\n') {
            let end = start + pos;
            if let Some(result) = parse_line(&self.buffer[start..end]) {
                results.push(result);
            }
            start = end + 1;
        }
        self.buffer.drain(..start);

        results
    }

    /// Decode whatever unterminated fragment is left once the source ends.
    pub fn finish(&mut self) -> Option<Result<StreamEvent, ParseError>> {
        let rest = std::mem::take(&mut self.buffer);
        parse_line(&rest)
    }

    /// Bytes held back waiting for a newline.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }
}

fn parse_line(raw: &[u8]) -> Option<Result<StreamEvent, ParseError>> {
    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        Err(e) => {
            return Some(Err(ParseError::new(
                String::from_utf8_lossy(raw).trim(),
                e.to_string(),
            )))
        }
    };

    let line = text.trim();
    if line.is_empty() {
        return None;
    }

    Some(serde_json::from_str(line).map_err(|e| ParseError::new(line, e.to_string())))
}

struct IdleTimer {
    deadline: Pin<Box<tokio::time::Sleep>>,
    duration: Duration,
}

/// Wraps an open response body and yields decoded events in arrival order.
///
/// Ends when the body ends or the cancellation token fires. On cancellation
/// the body is dropped immediately (releasing the connection) and any
/// already-decoded but undelivered events are discarded. A body read failure
/// or idle timeout yields one `StreamInterrupted` error, then the stream ends.
pub struct DecodedStream {
    inner: Option<ByteStream>,
    decoder: FrameDecoder,
    pending: VecDeque<StreamEvent>,
    reporter: Arc<dyn ErrorReporter>,
    cancel: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    idle: Option<IdleTimer>,
}

impl DecodedStream {
    pub fn new(body: ByteStream, cancel: CancellationToken, reporter: Arc<dyn ErrorReporter>) -> Self {
        Self {
            inner: Some(body),
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            reporter,
            cancelled: Box::pin(cancel.clone().cancelled_owned()),
            cancel,
            idle: None,
        }
    }

    /// Fail the stream if no chunk arrives for `duration`. Must be called
    /// from within a tokio runtime.
    pub fn with_idle_timeout(mut self, duration: Duration) -> Self {
        self.idle = Some(IdleTimer {
            deadline: Box::pin(tokio::time::sleep(duration)),
            duration,
        });
        self
    }

    fn release(&mut self) {
        if self.inner.take().is_some() {
            debug!("response body released");
        }
        self.pending.clear();
    }

    fn absorb(&mut self, result: Result<StreamEvent, ParseError>) {
        match result {
            Ok(event) => {
                trace!(kind = event.kind(), "decoded stream event");
                self.pending.push_back(event);
            }
            Err(error) => self.reporter.report(&error),
        }
    }
}

impl Stream for DecodedStream {
    type Item = Result<StreamEvent, TransportError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.cancel.is_cancelled() || this.cancelled.as_mut().poll(cx).is_ready() {
                this.release();
                return Poll::Ready(None);
            }

            if let Some(event) = this.pending.pop_front() {
                return Poll::Ready(Some(Ok(event)));
            }

            let Some(inner) = this.inner.as_mut() else {
                return Poll::Ready(None);
            };

            match inner.as_mut().poll_next(cx) {
                Poll::Ready(Some(Ok(chunk))) => {
                    if let Some(idle) = this.idle.as_mut() {
                        let next = tokio::time::Instant::now() + idle.duration;
                        idle.deadline.as_mut().reset(next);
                    }
                    for result in this.decoder.push(&chunk) {
                        this.absorb(result);
                    }
                }
                Poll::Ready(Some(Err(error))) => {
                    this.release();
                    let error = match error {
                        TransportError::Cancelled => return Poll::Ready(None),
                        TransportError::StreamInterrupted(msg) => TransportError::StreamInterrupted(msg),
                        other => TransportError::StreamInterrupted(other.to_string()),
                    };
                    return Poll::Ready(Some(Err(error)));
                }
                Poll::Ready(None) => {
                    this.inner = None;
                    if let Some(result) = this.decoder.finish() {
                        this.absorb(result);
                    }
                }
                Poll::Pending => {
                    if let Some(idle) = this.idle.as_mut() {
                        if idle.deadline.as_mut().poll(cx).is_ready() {
                            let millis = idle.duration.as_millis();
                            this.release();
                            return Poll::Ready(Some(Err(TransportError::StreamInterrupted(
                                format!("idle timeout after {millis}ms"),
                            ))));
                        }
                    }
                    return Poll::Pending;
                }
            }
        }
    }
}
