//! [`Transport`] implementations and the tower adapter that puts one at the
//! bottom of the delivery stack.
//!
//! - [`SimulatedTransport`]: logs and records each send, never touches the network
//! - [`NetworkTransport`]: HTTP via `reqwest`, TCP via `tokio::net::TcpStream`

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use async_trait::async_trait;
use conduit_core::{DestinationConfig, HttpDestination, HttpMethod, TcpDestination};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tower::Service;
use tracing::{debug, info};

use crate::service::delivery::{Delivery, DispatchError};
use crate::traits::Transport;

/// MLLP start-of-block byte.
pub const MLLP_START: u8 = 0x0B;
/// MLLP end-of-block bytes.
pub const MLLP_END: [u8; 2] = [0x1C, 0x0D];

/// Renders a message for the wire: strings as-is, anything else as JSON.
#[must_use]
pub fn wire_bytes(payload: &Value) -> Vec<u8> {
    match payload {
        Value::String(text) => text.as_bytes().to_vec(),
        other => other.to_string().into_bytes(),
    }
}

/// Wraps `body` in an MLLP block.
#[must_use]
pub fn mllp_frame(body: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(body.len() + 3);
    framed.push(MLLP_START);
    framed.extend_from_slice(body);
    framed.extend_from_slice(&MLLP_END);
    framed
}

// ---------------------------------------------------------------------------
// SimulatedTransport
// ---------------------------------------------------------------------------

/// A send captured by [`SimulatedTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct SentMessage {
    pub destination: DestinationConfig,
    pub payload: Value,
}

/// Transport that logs each send and keeps it in memory.
#[derive(Debug, Default)]
pub struct SimulatedTransport {
    sent: Mutex<Vec<SentMessage>>,
}

impl SimulatedTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every send so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<SentMessage> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    async fn send(
        &self,
        destination: &DestinationConfig,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        match destination {
            DestinationConfig::Http(http) => {
                info!(url = %http.url, method = http.method.as_str(), "simulated HTTP delivery");
            }
            DestinationConfig::Tcp(tcp) => {
                info!(
                    host = %tcp.host,
                    port = tcp.port,
                    use_framing = tcp.use_framing,
                    "simulated TCP delivery"
                );
            }
            DestinationConfig::Unrecognized { kind, .. } => {
                return Err(DispatchError::Unsupported { kind: kind.clone() });
            }
        }
        self.sent.lock().push(SentMessage {
            destination: destination.clone(),
            payload: payload.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// NetworkTransport
// ---------------------------------------------------------------------------

/// Transport that performs real HTTP requests and TCP writes.
#[derive(Debug, Clone, Default)]
pub struct NetworkTransport {
    client: reqwest::Client,
}

impl NetworkTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    async fn send_http(&self, http: &HttpDestination, payload: &Value) -> Result<(), DispatchError> {
        let method = match http.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };
        let mut request = self.client.request(method, &http.url).json(payload);
        for (name, value) in http.headers.iter().flatten() {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().await.map_err(DispatchError::transport)?;
        let status = response.status();
        debug!(url = %http.url, status = status.as_u16(), "HTTP delivery response");
        response
            .error_for_status()
            .map(drop)
            .map_err(DispatchError::transport)
    }

    async fn send_tcp(tcp: &TcpDestination, payload: &Value) -> Result<(), DispatchError> {
        let body = wire_bytes(payload);
        let bytes = if tcp.use_framing {
            mllp_frame(&body)
        } else {
            body
        };
        let mut stream = TcpStream::connect((tcp.host.as_str(), tcp.port))
            .await
            .map_err(|e| DispatchError::transport(format!("connect {}:{}: {e}", tcp.host, tcp.port)))?;
        stream
            .write_all(&bytes)
            .await
            .map_err(DispatchError::transport)?;
        stream.shutdown().await.map_err(DispatchError::transport)?;
        debug!(host = %tcp.host, port = tcp.port, bytes = bytes.len(), "TCP delivery written");
        Ok(())
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    async fn send(
        &self,
        destination: &DestinationConfig,
        payload: &Value,
    ) -> Result<(), DispatchError> {
        match destination {
            DestinationConfig::Http(http) => self.send_http(http, payload).await,
            DestinationConfig::Tcp(tcp) => Self::send_tcp(tcp, payload).await,
            DestinationConfig::Unrecognized { kind, .. } => {
                Err(DispatchError::Unsupported { kind: kind.clone() })
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TransportService
// ---------------------------------------------------------------------------

/// Innermost service of the delivery stack: hands the delivery to a transport.
#[derive(Clone)]
pub struct TransportService {
    transport: Arc<dyn Transport>,
}

impl TransportService {
    #[must_use]
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl Service<Delivery> for TransportService {
    type Response = ();
    type Error = DispatchError;
    type Future = Pin<Box<dyn Future<Output = Result<(), DispatchError>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, delivery: Delivery) -> Self::Future {
        let transport = Arc::clone(&self.transport);
        Box::pin(async move {
            transport
                .send(&delivery.destination, &delivery.payload)
                .await
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    use super::*;

    #[test]
    fn framing_wraps_body() {
        assert_eq!(mllp_frame(b"MSH"), vec![0x0B, b'M', b'S', b'H', 0x1C, 0x0D]);
        assert_eq!(wire_bytes(&json!("MSH|")), b"MSH|".to_vec());
        assert_eq!(wire_bytes(&json!({"a": 1})), br#"{"a":1}"#.to_vec());
    }

    #[tokio::test]
    async fn simulated_transport_records_sends() {
        let transport = SimulatedTransport::new();
        let destination = DestinationConfig::http("http://downstream");
        transport.send(&destination, &json!({"x": 1})).await.unwrap();

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].destination, destination);
        assert_eq!(sent[0].payload, json!({"x": 1}));
    }

    #[tokio::test]
    async fn simulated_transport_rejects_unknown_types() {
        let transport = SimulatedTransport::new();
        let destination: DestinationConfig =
            serde_json::from_value(json!({"type": "smtp", "to": "x@y"})).unwrap();
        let err = transport.send(&destination, &json!({})).await.unwrap_err();
        assert_eq!(err, DispatchError::Unsupported { kind: "smtp".to_string() });
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn network_transport_writes_framed_tcp() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let reader = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut received = Vec::new();
            socket.read_to_end(&mut received).await.unwrap();
            received
        });

        NetworkTransport::new()
            .send(
                &DestinationConfig::tcp("127.0.0.1", port, true),
                &json!("MSH|^~\\&|"),
            )
            .await
            .unwrap();

        let received = reader.await.unwrap();
        assert_eq!(received, mllp_frame(b"MSH|^~\\&|"));
    }

    #[tokio::test]
    async fn network_transport_reports_connect_failure() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = NetworkTransport::new()
            .send(&DestinationConfig::tcp("127.0.0.1", port, false), &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport { .. }));
    }
}
