//! Transport layer for different connection types
//!
//! Supports:
//! - Raw TCP client connections
//! - TCP server with multi-client broadcast
//! - Serial ports (RS-232, RS-485, USB-Serial)
//!
//! Every transport reports inbound data and lifecycle changes as
//! [`TransportEvent`]s on the channel it was created with.

mod serial;
mod server;
mod tcp;

pub use serial::{list_ports, SerialConfig, SerialFlowControl, SerialParity, SerialTransport};
pub use server::{server_status, ServerConfig, TcpServerTransport};
pub use tcp::{TcpConfig, TcpTransport};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of a transport's event channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Read buffer size for receive loops
pub(crate) const READ_BUFFER_SIZE: usize = 4096;

/// Connection parameters, one variant per transport kind
#[derive(Debug, Clone)]
pub enum Transport {
    /// Outbound TCP connection
    TcpClient(TcpConfig),
    /// Listening TCP server
    TcpServer(ServerConfig),
    /// Serial port connection
    Serial(SerialConfig),
}

impl Transport {
    /// Transport kind of these parameters
    pub fn transport_type(&self) -> TransportType {
        match self {
            Self::TcpClient(_) => TransportType::TcpClient,
            Self::TcpServer(_) => TransportType::TcpServer,
            Self::Serial(_) => TransportType::Serial,
        }
    }
}

/// Transport type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportType {
    /// TCP client
    TcpClient,
    /// TCP server
    TcpServer,
    /// Serial port
    Serial,
}

impl fmt::Display for TransportType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TcpClient => write!(f, "TCP Client"),
            Self::TcpServer => write!(f, "TCP Server"),
            Self::Serial => write!(f, "Serial"),
        }
    }
}

/// Connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// No connection
    #[default]
    Disconnected,
    /// Connect in progress
    Connecting,
    /// Connected
    Connected,
    /// Disconnect in progress
    Disconnecting,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Disconnecting => write!(f, "Disconnecting"),
        }
    }
}

/// Transport error types
#[derive(Error, Debug)]
pub enum TransportError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Connection timeout
    #[error("Connection timeout after {0} seconds")]
    Timeout(u64),

    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Port already in use
    #[error("Port already in use: {0}")]
    PortInUse(String),

    /// Connect called on a live transport
    #[error("Already connected")]
    AlreadyConnected,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Event emitted by a transport
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Inbound chunk, exactly as read
    Data {
        /// Sending peer (server variant only)
        peer: Option<String>,
        /// Received bytes
        data: Bytes,
    },
    /// A client connected to the server
    ClientConnected(String),
    /// A client left the server
    ClientDisconnected(String),
    /// Serial input lines changed
    ModemLinesChanged(ModemLines),
    /// The connection ended; fired at most once per connection
    Disconnected {
        /// True when the peer or the device ended the connection
        remote: bool,
    },
}

/// Create an event channel for one transport
pub fn event_channel() -> (mpsc::Sender<TransportEvent>, mpsc::Receiver<TransportEvent>) {
    mpsc::channel(EVENT_CHANNEL_CAPACITY)
}

/// Transport trait for all connection types
#[async_trait]
pub trait TransportTrait: Send + Sync {
    /// Connect to the target; state stays Disconnected on failure
    async fn connect(&self) -> Result<(), TransportError>;

    /// Send data; false when not connected or on I/O failure
    async fn send(&self, data: &[u8]) -> bool;

    /// Release the connection. Idempotent.
    async fn disconnect(&self);

    /// Current lifecycle state
    fn state(&self) -> LinkState;

    /// Check if connected
    fn is_connected(&self) -> bool {
        self.state() == LinkState::Connected
    }

    /// Get transport type
    fn transport_type(&self) -> TransportType;

    /// Get connection info string
    fn connection_info(&self) -> String;

    /// Set DTR line state (for serial)
    async fn set_dtr(&self, _state: bool) -> Result<(), TransportError> {
        Ok(())
    }

    /// Set RTS line state (for serial)
    async fn set_rts(&self, _state: bool) -> Result<(), TransportError> {
        Ok(())
    }

    /// Get modem lines state (for serial)
    fn modem_lines(&self) -> Option<ModemLines> {
        None
    }
}

/// Modem control lines state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModemLines {
    /// Data Terminal Ready
    pub dtr: bool,
    /// Request To Send
    pub rts: bool,
    /// Clear To Send
    pub cts: bool,
    /// Data Set Ready
    pub dsr: bool,
    /// Data Carrier Detect
    pub dcd: bool,
}

/// Create a transport instance from configuration
pub fn create_transport(
    config: Transport,
    events: mpsc::Sender<TransportEvent>,
) -> Arc<dyn TransportTrait> {
    match config {
        Transport::TcpClient(cfg) => Arc::new(TcpTransport::new(cfg, events)),
        Transport::TcpServer(cfg) => Arc::new(TcpServerTransport::new(cfg, events)),
        Transport::Serial(cfg) => Arc::new(SerialTransport::new(cfg, events)),
    }
}

/// One-shot guard for the disconnect notification.
///
/// Armed on connect; only the first `fire` after arming wins.
#[derive(Debug, Default)]
pub struct DisconnectLatch {
    armed: AtomicBool,
}

impl DisconnectLatch {
    /// Arm for a new connection
    pub fn arm(&self) {
        self.armed.store(true, Ordering::SeqCst);
    }

    /// Returns true for the first caller only
    pub fn fire(&self) -> bool {
        self.armed.swap(false, Ordering::SeqCst)
    }
}

/// State, latch and event sender shared by a transport and its tasks
#[derive(Debug)]
pub(crate) struct Link {
    state: RwLock<LinkState>,
    latch: DisconnectLatch,
    events: mpsc::Sender<TransportEvent>,
}

impl Link {
    pub(crate) fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            state: RwLock::new(LinkState::Disconnected),
            latch: DisconnectLatch::default(),
            events,
        }
    }

    pub(crate) fn state(&self) -> LinkState {
        *self.state.read()
    }

    pub(crate) fn set_state(&self, state: LinkState) {
        *self.state.write() = state;
    }

    /// Move Disconnected -> Connecting, or fail if a connection is live
    pub(crate) fn begin_connect(&self) -> Result<(), TransportError> {
        let mut state = self.state.write();
        if *state != LinkState::Disconnected {
            return Err(TransportError::AlreadyConnected);
        }
        *state = LinkState::Connecting;
        Ok(())
    }

    pub(crate) fn connected(&self) {
        self.latch.arm();
        self.set_state(LinkState::Connected);
    }

    /// Roll back a connect attempt without emitting an event
    pub(crate) fn abort_connect(&self) {
        self.latch.fire();
        self.set_state(LinkState::Disconnected);
    }

    pub(crate) fn begin_disconnect(&self) {
        let mut state = self.state.write();
        if *state == LinkState::Connected {
            *state = LinkState::Disconnecting;
        }
    }

    pub(crate) async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    pub(crate) fn blocking_emit(&self, event: TransportEvent) -> bool {
        self.events.blocking_send(event).is_ok()
    }

    fn mark_lost(&self) -> bool {
        if self.latch.fire() {
            self.set_state(LinkState::Disconnected);
            true
        } else {
            false
        }
    }

    /// Fire the disconnect notification if this connection has not yet
    pub(crate) async fn notify_disconnected(&self, remote: bool) {
        if self.mark_lost() {
            self.emit(TransportEvent::Disconnected { remote }).await;
        }
    }

    /// Same as `notify_disconnected`, from a non-async thread
    pub(crate) fn blocking_notify_disconnected(&self, remote: bool) {
        if self.mark_lost() {
            self.blocking_emit(TransportEvent::Disconnected { remote });
        }
    }
}
