use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use lumen_core::errors::TransportError;
use lumen_core::retry::RetryPolicy;
use lumen_core::transport::{ByteStream, ChatRequest, Transport};

/// Wraps a Transport with retry and exponential backoff.
///
/// - Server errors (5xx) and network failures are retried up to
///   `policy.max_retries` times, waiting `base_delay * 2^attempt` in between
/// - Client errors (4xx) fail immediately
/// - Cancellation aborts an attempt or backoff wait in progress and always
///   yields `TransportError::Cancelled`
/// - Once a body is returned the stream is committed; body failures are the
///   caller's concern
pub struct ReliableTransport<T: Transport> {
    inner: T,
    policy: RetryPolicy,
    total_retries: AtomicU64,
}

impl<T: Transport> ReliableTransport<T> {
    pub fn new(inner: T, policy: RetryPolicy) -> Self {
        Self {
            inner,
            policy,
            total_retries: AtomicU64::new(0),
        }
    }

    pub fn with_defaults(inner: T) -> Self {
        Self::new(inner, RetryPolicy::default())
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    /// Retries taken over the lifetime of this transport.
    pub fn total_retries(&self) -> u64 {
        self.total_retries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl<T: Transport> Transport for ReliableTransport<T> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let mut last_error: Option<TransportError> = None;

        for attempt in 0..=self.policy.max_retries {
            if cancel.is_cancelled() {
                info!(attempt = attempt + 1, "request cancelled before attempt");
                return Err(TransportError::Cancelled);
            }

            let result = tokio::select! {
                biased;
                () = cancel.cancelled() => Err(TransportError::Cancelled),
                result = self.inner.open(request, cancel) => result,
            };

            match result {
                Ok(body) => {
                    debug!(attempt = attempt + 1, "response stream opened");
                    return Ok(body);
                }
                Err(TransportError::Cancelled) => {
                    info!(attempt = attempt + 1, "request cancelled during attempt");
                    return Err(TransportError::Cancelled);
                }
                Err(e) if !e.is_retryable() => {
                    warn!(error = %e, kind = e.error_kind(), "request failed, not retrying");
                    return Err(e);
                }
                Err(e) if attempt == self.policy.max_retries => {
                    warn!(
                        attempts = attempt + 1,
                        error = %e,
                        kind = e.error_kind(),
                        "request failed, retries exhausted"
                    );
                    return Err(e);
                }
                Err(e) => {
                    let delay = self.policy.delay_for_attempt(attempt);
                    self.total_retries.fetch_add(1, Ordering::Relaxed);

                    warn!(
                        attempt = attempt + 1,
                        max_retries = self.policy.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after error"
                    );

                    last_error = Some(e);

                    tokio::select! {
                        biased;
                        () = cancel.cancelled() => {
                            info!(attempt = attempt + 1, "request cancelled during backoff");
                            return Err(TransportError::Cancelled);
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::NetworkError("max retries exceeded".into())))
    }
}
