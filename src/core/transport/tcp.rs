//! TCP client transport implementation

use super::{Link, LinkState, TransportError, TransportEvent, TransportTrait, TransportType, READ_BUFFER_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP connection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TcpConfig {
    /// Host address
    pub host: String,
    /// Port number
    pub port: u16,
    /// Connection timeout in seconds
    pub timeout_secs: u64,
}

impl TcpConfig {
    /// Create a new TCP configuration
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            host: host.to_string(),
            port,
            timeout_secs: 10,
        }
    }

    /// Set timeout
    #[must_use]
    pub fn timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// `host:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TcpConfig {
    fn default() -> Self {
        Self::new("127.0.0.1", 9000)
    }
}

/// TCP client transport
pub struct TcpTransport {
    config: TcpConfig,
    link: Arc<Link>,
    writer: AsyncMutex<Option<OwnedWriteHalf>>,
    cancel: Mutex<CancellationToken>,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub fn new(config: TcpConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            config,
            link: Arc::new(Link::new(events)),
            writer: AsyncMutex::new(None),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    async fn open(&self) -> Result<TcpStream, TransportError> {
        let addr = self.config.address();

        let stream = tokio::time::timeout(
            Duration::from_secs(self.config.timeout_secs),
            TcpStream::connect(&addr),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.config.timeout_secs))?
        .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        // Set TCP_NODELAY for lower latency
        stream.set_nodelay(true)?;

        Ok(stream)
    }
}

#[async_trait]
impl TransportTrait for TcpTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.link.begin_connect()?;

        let stream = match self.open().await {
            Ok(stream) => stream,
            Err(e) => {
                self.link.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };

        let (reader, writer) = stream.into_split();
        *self.writer.lock().await = Some(writer);

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        self.link.connected();
        info!("Connected to {}", self.config.address());

        tokio::spawn(receive_loop(reader, self.link.clone(), token));
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let mut guard = self.writer.lock().await;
        let Some(writer) = guard.as_mut() else {
            return false;
        };

        match writer.write_all(data).await {
            Ok(()) => true,
            Err(e) => {
                warn!("Send to {} failed: {}", self.config.address(), e);
                drop(guard);
                self.cancel.lock().cancel();
                self.link.notify_disconnected(true).await;
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.link.begin_disconnect();
        self.cancel.lock().cancel();

        if let Some(mut writer) = self.writer.lock().await.take() {
            writer.shutdown().await.ok();
            debug!("Closed connection to {}", self.config.address());
        }

        self.link.notify_disconnected(false).await;
        self.link.set_state(LinkState::Disconnected);
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::TcpClient
    }

    fn connection_info(&self) -> String {
        self.config.address()
    }
}

async fn receive_loop(mut reader: OwnedReadHalf, link: Arc<Link>, token: CancellationToken) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            result = reader.read(&mut buffer) => match result {
                Ok(0) => {
                    info!("Connection closed by peer");
                    link.notify_disconnected(true).await;
                    break;
                }
                Ok(n) => {
                    let event = TransportEvent::Data {
                        peer: None,
                        data: Bytes::copy_from_slice(&buffer[..n]),
                    };
                    if !link.emit(event).await {
                        break;
                    }
                }
                Err(e) => {
                    warn!("Receive failed: {}", e);
                    link.notify_disconnected(true).await;
                    break;
                }
            }
        }
    }
}
