//! TCP server transport: accepts any number of clients and broadcasts sends

use super::{Link, LinkState, TransportError, TransportEvent, TransportTrait, TransportType, READ_BUFFER_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// TCP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address
    pub bind_addr: String,
    /// Listening port (0 picks a free port)
    pub port: u16,
}

impl ServerConfig {
    /// Listen on all interfaces
    pub fn new(port: u16) -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port,
        }
    }

    /// Set bind address
    #[must_use]
    pub fn bind_addr(mut self, addr: &str) -> Self {
        self.bind_addr = addr.to_string();
        self
    }

    /// `addr:port`
    pub fn address(&self) -> String {
        format!("{}:{}", self.bind_addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(9000)
    }
}

/// Status text for a listening server
pub fn server_status(clients: usize) -> String {
    match clients {
        0 => "Server - listening".to_string(),
        1 => "Server - 1 client".to_string(),
        n => format!("Server - {n} clients"),
    }
}

struct ClientHandle {
    writer: Arc<AsyncMutex<OwnedWriteHalf>>,
    cancel: CancellationToken,
}

/// Connected clients keyed by peer address
#[derive(Default)]
struct ClientTable {
    clients: Mutex<BTreeMap<String, ClientHandle>>,
}

impl ClientTable {
    fn insert(&self, peer: String, handle: ClientHandle) {
        self.clients.lock().insert(peer, handle);
    }

    /// Remove a client, returning true if it was still registered
    fn remove(&self, peer: &str) -> bool {
        match self.clients.lock().remove(peer) {
            Some(handle) => {
                handle.cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn writers(&self) -> Vec<(String, Arc<AsyncMutex<OwnedWriteHalf>>)> {
        self.clients
            .lock()
            .iter()
            .map(|(peer, handle)| (peer.clone(), handle.writer.clone()))
            .collect()
    }

    fn drain(&self) -> Vec<ClientHandle> {
        std::mem::take(&mut *self.clients.lock()).into_values().collect()
    }

    fn peers(&self) -> Vec<String> {
        self.clients.lock().keys().cloned().collect()
    }

    fn len(&self) -> usize {
        self.clients.lock().len()
    }
}

/// TCP server transport
pub struct TcpServerTransport {
    config: ServerConfig,
    link: Arc<Link>,
    clients: Arc<ClientTable>,
    cancel: Mutex<CancellationToken>,
    local_addr: RwLock<Option<SocketAddr>>,
}

impl TcpServerTransport {
    /// Create a new server transport
    pub fn new(config: ServerConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            config,
            link: Arc::new(Link::new(events)),
            clients: Arc::new(ClientTable::default()),
            cancel: Mutex::new(CancellationToken::new()),
            local_addr: RwLock::new(None),
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Peer addresses of connected clients
    pub fn client_peers(&self) -> Vec<String> {
        self.clients.peers()
    }

    /// Bound address while listening
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.read()
    }

    async fn bind(&self) -> Result<TcpListener, TransportError> {
        let addr = self.config.address();
        TcpListener::bind(&addr).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::AddrInUse => TransportError::PortInUse(addr),
            std::io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(addr),
            _ => TransportError::ConnectionFailed(format!("{addr}: {e}")),
        })
    }
}

#[async_trait]
impl TransportTrait for TcpServerTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.link.begin_connect()?;

        let listener = match self.bind().await {
            Ok(listener) => listener,
            Err(e) => {
                self.link.set_state(LinkState::Disconnected);
                return Err(e);
            }
        };

        let local = listener.local_addr().ok();
        *self.local_addr.write() = local;

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        self.link.connected();
        info!("Listening on {}", local.map_or_else(|| self.config.address(), |a| a.to_string()));

        tokio::spawn(accept_loop(listener, self.link.clone(), self.clients.clone(), token));
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let writers = self.clients.writers();
        if writers.is_empty() {
            return false;
        }

        let results = join_all(writers.into_iter().map(|(peer, writer)| async move {
            let result = writer.lock().await.write_all(data).await;
            (peer, result)
        }))
        .await;

        let mut delivered = false;
        for (peer, result) in results {
            match result {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!("Send to client {} failed: {}", peer, e);
                    if self.clients.remove(&peer) {
                        self.link.emit(TransportEvent::ClientDisconnected(peer)).await;
                    }
                }
            }
        }

        delivered
    }

    async fn disconnect(&self) {
        self.link.begin_disconnect();
        self.cancel.lock().cancel();

        for handle in self.clients.drain() {
            handle.cancel.cancel();
            handle.writer.lock().await.shutdown().await.ok();
        }
        *self.local_addr.write() = None;

        self.link.notify_disconnected(false).await;
        self.link.set_state(LinkState::Disconnected);
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::TcpServer
    }

    fn connection_info(&self) -> String {
        match self.local_addr() {
            Some(addr) => addr.to_string(),
            None => self.config.address(),
        }
    }
}

async fn accept_loop(listener: TcpListener, link: Arc<Link>, clients: Arc<ClientTable>, token: CancellationToken) {
    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let peer = addr.to_string();
                    stream.set_nodelay(true).ok();
                    let (reader, writer) = stream.into_split();

                    let client_token = token.child_token();
                    clients.insert(peer.clone(), ClientHandle {
                        writer: Arc::new(AsyncMutex::new(writer)),
                        cancel: client_token.clone(),
                    });

                    info!("Client connected: {}", peer);
                    link.emit(TransportEvent::ClientConnected(peer.clone())).await;

                    tokio::spawn(client_loop(reader, peer, link.clone(), clients.clone(), client_token));
                }
                Err(e) => warn!("Accept failed: {}", e),
            }
        }
    }
    debug!("Accept loop stopped");
}

async fn client_loop(
    mut reader: OwnedReadHalf,
    peer: String,
    link: Arc<Link>,
    clients: Arc<ClientTable>,
    token: CancellationToken,
) {
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];

    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            result = reader.read(&mut buffer) => match result {
                Ok(0) => break,
                Ok(n) => {
                    let event = TransportEvent::Data {
                        peer: Some(peer.clone()),
                        data: Bytes::copy_from_slice(&buffer[..n]),
                    };
                    if !link.emit(event).await {
                        return;
                    }
                }
                Err(e) => {
                    debug!("Receive from client {} failed: {}", peer, e);
                    break;
                }
            }
        }
    }

    if clients.remove(&peer) {
        info!("Client disconnected: {}", peer);
        link.emit(TransportEvent::ClientDisconnected(peer)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::event_channel;
    use tokio::net::TcpStream;

    async fn listening() -> (TcpServerTransport, mpsc::Receiver<TransportEvent>, SocketAddr) {
        let (tx, rx) = event_channel();
        let server = TcpServerTransport::new(ServerConfig::new(0).bind_addr("127.0.0.1"), tx);
        server.connect().await.unwrap();
        let addr = server.local_addr().unwrap();
        (server, rx, addr)
    }

    async fn expect_client_connected(rx: &mut mpsc::Receiver<TransportEvent>) -> String {
        match rx.recv().await {
            Some(TransportEvent::ClientConnected(peer)) => peer,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_status_text() {
        assert_eq!(server_status(0), "Server - listening");
        assert_eq!(server_status(1), "Server - 1 client");
        assert_eq!(server_status(3), "Server - 3 clients");
    }

    #[tokio::test]
    async fn test_send_without_clients_fails() {
        let (server, _rx, _) = listening().await;
        assert!(server.is_connected());
        assert!(!server.send(b"x").await);
        server.disconnect().await;
    }

    #[tokio::test]
    async fn test_broadcast_to_all_clients() {
        let (server, mut rx, addr) = listening().await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        expect_client_connected(&mut rx).await;
        let mut b = TcpStream::connect(addr).await.unwrap();
        expect_client_connected(&mut rx).await;
        assert_eq!(server.client_count(), 2);

        assert!(server.send(b"hi").await);

        let mut buf = [0u8; 2];
        a.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
        b.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");

        server.disconnect().await;
    }

    #[tokio::test]
    async fn test_data_tagged_with_peer() {
        let (server, mut rx, addr) = listening().await;

        let mut client = TcpStream::connect(addr).await.unwrap();
        let peer = expect_client_connected(&mut rx).await;
        assert_eq!(peer, client.local_addr().unwrap().to_string());

        client.write_all(&[0x02, 0x03]).await.unwrap();
        match rx.recv().await {
            Some(TransportEvent::Data { peer: Some(from), data }) => {
                assert_eq!(from, peer);
                assert_eq!(&data[..], &[0x02, 0x03]);
            }
            other => panic!("unexpected event: {other:?}"),
        }

        server.disconnect().await;
    }

    #[tokio::test]
    async fn test_client_leave_is_separate_from_lifecycle() {
        let (server, mut rx, addr) = listening().await;

        let client = TcpStream::connect(addr).await.unwrap();
        let peer = expect_client_connected(&mut rx).await;
        drop(client);

        assert_eq!(rx.recv().await, Some(TransportEvent::ClientDisconnected(peer)));
        assert!(server.is_connected());
        assert_eq!(server.client_count(), 0);

        server.disconnect().await;
        assert_eq!(rx.recv().await, Some(TransportEvent::Disconnected { remote: false }));
    }

    #[tokio::test]
    async fn test_port_in_use() {
        let (server, _rx, addr) = listening().await;

        let (tx, _rx2) = event_channel();
        let second = TcpServerTransport::new(ServerConfig::new(addr.port()).bind_addr("127.0.0.1"), tx);
        assert!(matches!(second.connect().await, Err(TransportError::PortInUse(_))));
        assert_eq!(second.state(), LinkState::Disconnected);

        server.disconnect().await;
    }
}
