use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use lumen_core::errors::TransportError;
use lumen_core::transport::{ByteStream, ChatRequest, Transport};

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Single-attempt HTTP transport: POSTs the chat request as JSON and hands
/// back the chunked response body. Retry policy lives in `ReliableTransport`.
pub struct HttpTransport {
    client: Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_connect_timeout(endpoint, DEFAULT_CONNECT_TIMEOUT)
    }

    pub fn with_connect_timeout(
        endpoint: impl Into<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| TransportError::NetworkError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn open(
        &self,
        request: &ChatRequest,
        cancel: &CancellationToken,
    ) -> Result<ByteStream, TransportError> {
        let send = self
            .client
            .post(&self.endpoint)
            .header("accept", "application/x-ndjson")
            .json(request)
            .send();

        let resp = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(TransportError::Cancelled),
            resp = send => resp.map_err(|e| TransportError::NetworkError(e.to_string()))?,
        };

        let status = resp.status();
        if !status.is_success() {
            let body = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(TransportError::Cancelled),
                body = resp.text() => body.unwrap_or_default(),
            };
            return Err(TransportError::from_status(status.as_u16(), &body));
        }

        debug!(status = status.as_u16(), "response headers received");

        let body = resp
            .bytes_stream()
            .map(|chunk| chunk.map_err(|e| TransportError::StreamInterrupted(e.to_string())));

        Ok(Box::pin(body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn drain(mut body: ByteStream) -> String {
        let mut out = Vec::new();
        while let Some(chunk) = body.next().await {
            out.extend_from_slice(&chunk.unwrap());
        }
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn posts_json_and_streams_body() {
        let server = MockServer::start().await;
        let body = "{\"type\":\"content\",\"data\":{\"text\":\"hi\"}}\n{\"type\":\"complete\",\"data\":{\"conversation_id\":42}}\n";

        Mock::given(method("POST"))
            .and(path("/api/chat/stream"))
            .and(header("content-type", "application/json"))
            .and(body_json(serde_json::json!({"message": "Analyze data", "mode": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .expect(1)
            .mount(&server)
            .await;

        let transport = HttpTransport::new(format!("{}/api/chat/stream", server.uri())).unwrap();
        let stream = transport
            .open(&ChatRequest::new("Analyze data", None), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(drain(stream).await, body);
    }

    #[tokio::test]
    async fn client_status_maps_to_client_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(422).set_body_json(serde_json::json!({"detail": "empty message"})))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let err = transport
            .open(&ChatRequest::new("", None), &CancellationToken::new())
            .await
            .err();

        assert_eq!(
            err,
            Some(TransportError::ClientError {
                status: 422,
                message: "empty message".into()
            })
        );
    }

    #[tokio::test]
    async fn server_status_maps_to_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let err = transport
            .open(&ChatRequest::new("hi", None), &CancellationToken::new())
            .await
            .err();

        assert!(matches!(err, Some(TransportError::ServerError { status: 503, .. })));
    }

    #[tokio::test]
    async fn refused_connection_is_network_error() {
        // bind then drop to get a port with nothing listening
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let transport = HttpTransport::new(format!("http://{addr}/chat")).unwrap();
        let err = transport
            .open(&ChatRequest::new("hi", None), &CancellationToken::new())
            .await
            .err();

        assert!(matches!(err, Some(TransportError::NetworkError(_))), "got: {err:?}");
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(30)))
            .mount(&server)
            .await;

        let transport = HttpTransport::new(server.uri()).unwrap();
        let cancel = CancellationToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let started = std::time::Instant::now();
        let err = transport.open(&ChatRequest::new("hi", None), &cancel).await.err();
        canceller.await.unwrap();

        assert_eq!(err, Some(TransportError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn endpoint_accessor() {
        let transport = HttpTransport::new("http://localhost:8000/api/chat").unwrap();
        assert_eq!(transport.endpoint(), "http://localhost:8000/api/chat");
        assert_eq!(transport.name(), "http");
    }
}
