use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use lumen_core::errors::TransportError;
use lumen_core::transport::{ByteStream, ChatRequest, Transport};

/// Pre-programmed responses for deterministic testing without sockets.
pub enum MockResponse {
    /// Open successfully and yield these body chunks, then end.
    Chunks(Vec<Bytes>),
    /// Yield these chunks, then keep the body open forever.
    ChunksThenHang(Vec<Bytes>),
    /// Yield these chunks, then fail the body read.
    ChunksThenError(Vec<Bytes>, TransportError),
    /// Fail the attempt itself.
    Error(TransportError),
    /// Never respond; resolves only through cancellation.
    Hang,
    /// Wait a duration, then resolve the inner response.
    Delay(Duration, Box<MockResponse>),
}

impl MockResponse {
    /// One chunk per element, passed through untouched.
    pub fn chunks(chunks: &[&str]) -> Self {
        Self::Chunks(to_bytes(chunks))
    }

    /// One chunk holding every line, each newline-terminated.
    pub fn lines(lines: &[&str]) -> Self {
        Self::Chunks(vec![Bytes::from(join_lines(lines))])
    }

    /// Newline-terminated lines, one chunk each, then an open body.
    pub fn lines_then_hang(lines: &[&str]) -> Self {
        Self::ChunksThenHang(lines.iter().map(|l| Bytes::from(format!("{l}\n"))).collect())
    }

    pub fn delayed(delay: Duration, inner: MockResponse) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

fn to_bytes(chunks: &[&str]) -> Vec<Bytes> {
    chunks.iter().map(|c| Bytes::copy_from_slice(c.as_bytes())).collect()
}

fn join_lines(lines: &[&str]) -> String {
    lines.iter().map(|l| format!("{l}\n")).collect()
}

/// Transport that replays scripted responses in order, one per `open` call.
pub struct MockTransport {
    responses: Mutex<VecDeque<MockResponse>>,
    calls: Mutex<Vec<Instant>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl MockTransport {
    pub fn new(responses: Vec<MockResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// When each `open` call started, on the tokio clock.
    pub fn call_times(&self) -> Vec<Instant> {
        self.calls.lock().clone()
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    fn name(&self) -> &str {
        "mock"
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let idx = {
            let mut calls = self.calls.lock();
            calls.push(Instant::now());
            calls.len() - 1
        };
        self.requests.lock().push(request.clone());

        let next = self.responses.lock().pop_front();
        let Some(response) = next else {
            return Err(TransportError::ClientError {
                status: 0,
                message: format!("MockTransport: no response configured for call {idx}"),
            });
        };

        resolve_response(response, cancel).await
    }
}

fn ok_chunks(chunks: Vec<Bytes>) -> impl futures::Stream<Item = Result<Bytes, TransportError>> + Send {
    stream::iter(chunks.into_iter().map(Ok))
}

/// Resolve a MockResponse, handling Delay by sleeping first.
/// Unrolls nested delays iteratively to avoid recursive async.
async fn resolve_response(
    response: MockResponse,
    cancel: &CancellationToken,
) -> Result<ByteStream, TransportError> {
    let mut current = response;
    loop {
        match current {
            MockResponse::Chunks(chunks) => {
                return Ok(Box::pin(ok_chunks(chunks)));
            }
            MockResponse::ChunksThenHang(chunks) => {
                let body = ok_chunks(chunks).chain(stream::pending());
                return Ok(Box::pin(body));
            }
            MockResponse::ChunksThenError(chunks, error) => {
                let body = ok_chunks(chunks).chain(stream::once(async move { Err(error) }));
                return Ok(Box::pin(body));
            }
            MockResponse::Error(e) => return Err(e),
            MockResponse::Hang => {
                cancel.cancelled().await;
                return Err(TransportError::Cancelled);
            }
            MockResponse::Delay(duration, inner) => {
                tokio::select! {
                    () = cancel.cancelled() => return Err(TransportError::Cancelled),
                    () = tokio::time::sleep(duration) => {}
                }
                current = *inner;
            }
        }
    }
}
