//! Pooled provider streaming connections
//!
//! Pre-establishes WebSocket connections to the recognition/synthesis
//! services so per-call handshake latency is amortized across calls. A
//! member holds one duplex stream; checking it out hands exclusive use to a
//! call, and errors during use discard the member rather than returning it.

use async_trait::async_trait;
use futures::SinkExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::http::Request;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::pool::ResourceFactory;
use crate::PoolError;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// One pre-established provider connection
pub struct ProviderConnection {
    stream: Mutex<Option<WsStream>>,
}

impl std::fmt::Debug for ProviderConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConnection").finish_non_exhaustive()
    }
}

impl ProviderConnection {
    fn new(stream: WsStream) -> Self {
        Self {
            stream: Mutex::new(Some(stream)),
        }
    }

    /// Take exclusive ownership of the stream for the duration of a call.
    ///
    /// After `take`, the member reads as unhealthy and will be replaced by
    /// the health pass once discarded.
    pub async fn take(&self) -> Option<WsStream> {
        self.stream.lock().await.take()
    }

    pub async fn is_open(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    pub async fn close(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = stream.send(Message::Close(None)).await;
            let _ = stream.close(None).await;
        }
    }
}

/// Dials provider WebSocket endpoints
pub struct ConnectionFactory {
    url: String,
    /// Header name/value pairs added to the handshake (auth)
    headers: Vec<(String, String)>,
}

impl ConnectionFactory {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl ResourceFactory for ConnectionFactory {
    type Resource = ProviderConnection;

    async fn create(&self) -> Result<ProviderConnection, PoolError> {
        let mut request = Request::builder()
            .uri(&self.url)
            .header("host", host_of(&self.url))
            .header("upgrade", "websocket")
            .header("connection", "Upgrade")
            .header("sec-websocket-version", "13")
            .header(
                "sec-websocket-key",
                tokio_tungstenite::tungstenite::handshake::client::generate_key(),
            );
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let request = request
            .body(())
            .map_err(|e| PoolError::Create(format!("bad connection request: {}", e)))?;

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| PoolError::Create(format!("connect {} failed: {}", self.url, e)))?;

        tracing::debug!(url = %self.url, "Established provider connection");
        Ok(ProviderConnection::new(stream))
    }

    async fn is_healthy(&self, resource: &ProviderConnection) -> bool {
        resource.is_open().await
    }

    async fn destroy(&self, resource: &ProviderConnection) {
        resource.close().await;
    }
}

fn host_of(url: &str) -> String {
    url.trim_start_matches("wss://")
        .trim_start_matches("ws://")
        .split('/')
        .next()
        .unwrap_or_default()
        .to_string()
}
