//! Session management for handling connections
//!
//! A Session owns at most one live transport, the log, the statistics, the
//! message list and the reaction engine. Front-ends drive it through a small
//! operation surface and observe it through [`SessionEvent`]s.
//!
//! Each successful connect starts a new epoch. Background tasks (event pump,
//! statistics ticker, reaction cascades) are bound to the epoch they were
//! started in and stop acting once it ends.

use crate::core::codec;
use crate::core::logger::{Direction, LogEntry, LogStore};
use crate::core::message::{MessageDefinition, ReactionRule};
use crate::core::reaction::{ReactionEngine, ResponseSink};
use crate::core::statistics::{ConnectionStatistics, StatisticsSnapshot};
use crate::core::store::{MessageStore, StorageModel, StoreError};
use crate::core::transport::{
    create_transport, event_channel, server_status, ModemLines, Transport, TransportError, TransportEvent,
    TransportTrait, TransportType,
};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Statistics refresh period
pub const STATISTICS_INTERVAL: Duration = Duration::from_secs(1);

/// Session events
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// An entry was appended to the log
    LogAppended {
        /// Index in the log
        index: usize,
        /// The entry
        entry: LogEntry,
    },
    /// Connection status text changed
    StatusChanged(String),
    /// Serial input lines changed
    ModemLinesChanged(ModemLines),
    /// Periodic statistics refresh
    StatisticsTick(StatisticsSnapshot),
}

#[derive(Clone)]
struct ActiveConnection {
    epoch: u64,
    transport: Arc<dyn TransportTrait>,
    config: Transport,
    cancel: CancellationToken,
}

struct SessionInner {
    active: RwLock<Option<ActiveConnection>>,
    epoch: AtomicU64,
    live_epoch: AtomicU64,
    lifecycle: AsyncMutex<()>,
    log: LogStore,
    stats: Mutex<ConnectionStatistics>,
    engine: ReactionEngine,
    messages: RwLock<Vec<MessageDefinition>>,
    clients: RwLock<Vec<String>>,
    store: Option<MessageStore>,
    events: broadcast::Sender<SessionEvent>,
}

/// Active session
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    /// Create a session without persistence
    pub fn new() -> Self {
        Self::build(None, Vec::new(), Vec::new())
    }

    /// Create a session backed by a message store, loading its contents
    pub fn with_store(store: MessageStore) -> Result<Self, StoreError> {
        let (messages, rules) = store.load()?.into_definitions();
        info!(
            "Loaded {} messages and {} reactions from {}",
            messages.len(),
            rules.len(),
            store.path().display()
        );
        Ok(Self::build(Some(store), messages, rules))
    }

    fn build(store: Option<MessageStore>, messages: Vec<MessageDefinition>, rules: Vec<ReactionRule>) -> Self {
        let (events, _) = broadcast::channel(1024);

        Self {
            inner: Arc::new(SessionInner {
                active: RwLock::new(None),
                epoch: AtomicU64::new(0),
                live_epoch: AtomicU64::new(0),
                lifecycle: AsyncMutex::new(()),
                log: LogStore::new(),
                stats: Mutex::new(ConnectionStatistics::new()),
                engine: ReactionEngine::new(rules),
                messages: RwLock::new(messages),
                clients: RwLock::new(Vec::new()),
                store,
                events,
            }),
        }
    }

    /// Subscribe to session events
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.inner.events.subscribe()
    }

    /// Connect with the given transport configuration
    pub async fn connect(&self, config: Transport) -> Result<(), TransportError> {
        let _lifecycle = self.inner.lifecycle.lock().await;

        if self.inner.active.read().is_some() {
            self.inner.log_line(&format!("[ERR] Failed to connect: {}", TransportError::AlreadyConnected));
            return Err(TransportError::AlreadyConnected);
        }

        let (tx, rx) = event_channel();
        let transport = create_transport(config.clone(), tx);

        if let Err(e) = transport.connect().await {
            warn!("Connect failed: {}", e);
            self.inner.log_line(&format!("[ERR] Failed to connect: {e}"));
            return Err(e);
        }

        let epoch = self.inner.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();

        self.inner.stats.lock().reset();
        self.inner.clients.write().clear();
        *self.inner.active.write() = Some(ActiveConnection {
            epoch,
            transport: transport.clone(),
            config: config.clone(),
            cancel: cancel.clone(),
        });
        self.inner.live_epoch.store(epoch, Ordering::SeqCst);

        let opened = match &config {
            Transport::TcpClient(cfg) => format!("[SYS] Connected to {}", cfg.address()),
            Transport::TcpServer(_) => format!("[SYS] Server started on {}", transport.connection_info()),
            Transport::Serial(cfg) => format!("[SYS] Serial port {} opened at {} baud", cfg.port, cfg.baud_rate),
        };
        self.inner.log_line(&opened);
        self.inner.publish_status();
        debug!("Connection epoch {} started", epoch);

        tokio::spawn(pump_events(self.inner.clone(), rx, epoch, cancel.clone()));
        tokio::spawn(tick_statistics(self.inner.clone(), cancel));

        Ok(())
    }

    /// Disconnect the live connection. Idempotent.
    pub async fn disconnect(&self) {
        let _lifecycle = self.inner.lifecycle.lock().await;

        let Some(epoch) = self.inner.active.read().as_ref().map(|active| active.epoch) else {
            return;
        };

        if let Some(active) = self.inner.finish(epoch, false) {
            active.transport.disconnect().await;
        }
    }

    /// Whether a connection is live
    pub fn is_connected(&self) -> bool {
        self.inner.active.read().is_some()
    }

    /// Kind of the live connection
    pub fn transport_type(&self) -> Option<TransportType> {
        self.inner.active.read().as_ref().map(|active| active.config.transport_type())
    }

    /// Epoch of the live connection
    pub fn epoch(&self) -> Option<u64> {
        self.inner.active.read().as_ref().map(|active| active.epoch)
    }

    /// Status text, e.g. `Server - 2 clients`
    pub fn status_text(&self) -> String {
        self.inner.status_text()
    }

    /// Peers connected to the server
    pub fn clients(&self) -> Vec<String> {
        self.inner.clients.read().clone()
    }

    /// Send a predefined message
    pub async fn send_message(&self, message: &MessageDefinition) -> bool {
        self.inner.send_bytes(&message.bytes(), &message.name).await
    }

    /// Send quick-send text with `<..>` hex or macro spans.
    ///
    /// Returns whether the bytes were sent and how many spans were
    /// malformed and sent as literal text.
    pub async fn send_raw(&self, text: &str) -> (bool, usize) {
        let parsed = codec::mixed_input_parse(text);

        if parsed.invalid_spans > 0 {
            self.inner.log_line(&format!(
                "[SYS] {} invalid <...> span(s) sent as text",
                parsed.invalid_spans
            ));
        }
        if parsed.bytes.is_empty() {
            return (false, parsed.invalid_spans);
        }

        let sent = self.inner.send_bytes(&parsed.bytes, "Quick send").await;
        (sent, parsed.invalid_spans)
    }

    /// Set DTR on a serial connection
    pub async fn set_dtr(&self, state: bool) -> Result<(), TransportError> {
        match self.inner.current_transport() {
            Some(transport) => transport.set_dtr(state).await,
            None => Ok(()),
        }
    }

    /// Set RTS on a serial connection
    pub async fn set_rts(&self, state: bool) -> Result<(), TransportError> {
        match self.inner.current_transport() {
            Some(transport) => transport.set_rts(state).await,
            None => Ok(()),
        }
    }

    /// Modem lines of a serial connection
    pub fn modem_lines(&self) -> Option<ModemLines> {
        self.inner.current_transport().and_then(|t| t.modem_lines())
    }

    /// Session log
    pub fn log(&self) -> &LogStore {
        &self.inner.log
    }

    /// Append an operator note (`[DIR] text`, SYS by default)
    pub fn log_line(&self, line: &str) -> usize {
        self.inner.log_line(line)
    }

    /// Clear the log
    pub fn clear_log(&self) {
        self.inner.log.clear();
    }

    /// Current statistics
    pub fn statistics(&self) -> StatisticsSnapshot {
        self.inner.stats.lock().snapshot()
    }

    /// Statistics text summary
    pub fn statistics_summary(&self) -> String {
        self.inner.stats.lock().summary()
    }

    /// Predefined messages
    pub fn messages(&self) -> Vec<MessageDefinition> {
        self.inner.messages.read().clone()
    }

    /// Add a predefined message
    pub fn add_message(&self, message: MessageDefinition) -> Result<(), StoreError> {
        self.inner.messages.write().push(message);
        self.inner.persist()
    }

    /// Replace the predefined message at `index`
    pub fn update_message(&self, index: usize, message: MessageDefinition) -> Result<bool, StoreError> {
        let updated = match self.inner.messages.write().get_mut(index) {
            Some(slot) => {
                *slot = message;
                true
            }
            None => false,
        };
        if updated {
            self.inner.persist()?;
        }
        Ok(updated)
    }

    /// Remove the predefined message at `index`
    pub fn remove_message(&self, index: usize) -> Result<Option<MessageDefinition>, StoreError> {
        let removed = {
            let mut messages = self.inner.messages.write();
            (index < messages.len()).then(|| messages.remove(index))
        };
        if removed.is_some() {
            self.inner.persist()?;
        }
        Ok(removed)
    }

    /// Reaction rules in list order
    pub fn rules(&self) -> Vec<ReactionRule> {
        self.inner.engine.rules()
    }

    /// Reaction engine
    pub fn engine(&self) -> &ReactionEngine {
        &self.inner.engine
    }

    /// Add a reaction rule
    pub fn add_rule(&self, rule: ReactionRule) -> Result<(), StoreError> {
        self.inner.engine.add_rule(rule);
        self.inner.persist()
    }

    /// Replace the reaction rule at `index`
    pub fn update_rule(&self, index: usize, rule: ReactionRule) -> Result<bool, StoreError> {
        let updated = self.inner.engine.update_rule(index, rule);
        if updated {
            self.inner.persist()?;
        }
        Ok(updated)
    }

    /// Remove the reaction rule at `index`
    pub fn remove_rule(&self, index: usize) -> Result<Option<ReactionRule>, StoreError> {
        let removed = self.inner.engine.remove_rule(index);
        if removed.is_some() {
            self.inner.persist()?;
        }
        Ok(removed)
    }

    /// Pause or resume the reaction rule at `index`
    pub fn set_rule_paused(&self, index: usize, paused: bool) -> Result<bool, StoreError> {
        let updated = self.inner.engine.set_rule_paused(index, paused);
        if updated {
            self.inner.persist()?;
        }
        Ok(updated)
    }
}

impl SessionInner {
    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn append(&self, entry: LogEntry) -> usize {
        let index = self.log.append(entry.clone());
        self.publish(SessionEvent::LogAppended { index, entry });
        index
    }

    fn log_line(&self, line: &str) -> usize {
        let (index, entry) = self.log.append_line(line);
        self.publish(SessionEvent::LogAppended { index, entry });
        index
    }

    fn status_text(&self) -> String {
        let active = self.active.read();
        match active.as_ref().map(|a| &a.config) {
            None => "Disconnected".to_string(),
            Some(Transport::TcpClient(_)) => "Connected".to_string(),
            Some(Transport::TcpServer(_)) => server_status(self.clients.read().len()),
            Some(Transport::Serial(cfg)) => format!("Connected ({})", cfg.port),
        }
    }

    fn publish_status(&self) {
        self.publish(SessionEvent::StatusChanged(self.status_text()));
    }

    fn current_transport(&self) -> Option<Arc<dyn TransportTrait>> {
        self.active.read().as_ref().map(|active| active.transport.clone())
    }

    fn transport_for(&self, epoch: u64) -> Option<Arc<dyn TransportTrait>> {
        if self.live_epoch.load(Ordering::SeqCst) != epoch {
            return None;
        }
        self.active
            .read()
            .as_ref()
            .filter(|active| active.epoch == epoch)
            .map(|active| active.transport.clone())
    }

    /// End `epoch` exactly once, returning the connection to release
    fn finish(&self, epoch: u64, remote: bool) -> Option<ActiveConnection> {
        self.live_epoch
            .compare_exchange(epoch, 0, Ordering::SeqCst, Ordering::SeqCst)
            .ok()?;

        let active = self.active.write().take()?;
        active.cancel.cancel();
        self.stats.lock().end_connection();
        self.clients.write().clear();

        let line = match (active.config.transport_type(), remote) {
            (TransportType::Serial, true) => "[SYS] Serial port disconnected (error)",
            (TransportType::Serial, false) => "[SYS] Serial port closed",
            (TransportType::TcpServer, _) => "[SYS] Server stopped",
            (TransportType::TcpClient, true) => "[SYS] Disconnected by remote host",
            (TransportType::TcpClient, false) => "[SYS] Disconnected",
        };
        self.log_line(line);
        self.publish_status();
        debug!("Connection epoch {} ended (remote: {})", epoch, remote);

        Some(active)
    }

    async fn send_bytes(&self, data: &[u8], name: &str) -> bool {
        match self.current_transport() {
            Some(transport) => self.transmit(transport.as_ref(), data, name).await,
            None => {
                self.log_line(&format!("[ERR] Failed to send \"{name}\" - not connected"));
                false
            }
        }
    }

    async fn transmit(&self, transport: &dyn TransportTrait, data: &[u8], name: &str) -> bool {
        let reason = self.send_failure_reason(transport);

        if transport.send(data).await {
            self.stats.lock().record_sent(data.len());
            self.append(LogEntry::data(Direction::Tx, data, name));
            true
        } else {
            self.stats.lock().record_error();
            self.log_line(&format!("[ERR] Failed to send \"{name}\" - {reason}"));
            false
        }
    }

    /// Why a send on `transport` would fail, judged before the attempt
    fn send_failure_reason(&self, transport: &dyn TransportTrait) -> &'static str {
        if !transport.is_connected() {
            "not connected"
        } else if transport.transport_type() == TransportType::TcpServer && self.clients.read().is_empty() {
            "no clients connected"
        } else {
            "write failed"
        }
    }

    fn on_data(self: &Arc<Self>, epoch: u64, peer: Option<String>, data: &[u8], cancel: &CancellationToken) {
        if self.live_epoch.load(Ordering::SeqCst) != epoch {
            debug!("Dropping {} bytes from ended epoch {}", data.len(), epoch);
            return;
        }

        self.stats.lock().record_received(data.len());
        self.append(LogEntry::data(Direction::Rx, data, peer.as_deref().unwrap_or_default()));

        let hex = codec::bytes_to_hex(data);
        let sink: Arc<dyn ResponseSink> = self.clone();
        self.engine.evaluate(&hex, epoch, sink, cancel.clone());
    }

    fn persist(&self) -> Result<(), StoreError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let model = StorageModel::from_definitions(&self.messages.read(), &self.engine.snapshot());
        store.save(&model)
    }
}

#[async_trait]
impl ResponseSink for SessionInner {
    async fn send_reaction(&self, epoch: u64, rule: &ReactionRule) -> bool {
        let Some(transport) = self.transport_for(epoch) else {
            debug!("Dropping reaction '{}' from ended epoch {}", rule.response.name, epoch);
            return false;
        };

        self.log_line(&format!(
            "[SYS] Reaction triggered for '{}' -> sending '{}'",
            rule.trigger(),
            rule.response.content()
        ));
        self.transmit(transport.as_ref(), &rule.response.bytes(), &rule.response.name).await
    }
}

async fn pump_events(
    inner: Arc<SessionInner>,
    mut events: mpsc::Receiver<TransportEvent>,
    epoch: u64,
    cancel: CancellationToken,
) {
    while let Some(event) = events.recv().await {
        match event {
            TransportEvent::Data { peer, data } => inner.on_data(epoch, peer, &data, &cancel),
            TransportEvent::ClientConnected(peer) => {
                inner.clients.write().push(peer.clone());
                inner.log_line(&format!("[SYS] Client connected: {peer}"));
                inner.publish_status();
            }
            TransportEvent::ClientDisconnected(peer) => {
                inner.clients.write().retain(|p| p != &peer);
                inner.log_line(&format!("[SYS] Client disconnected: {peer}"));
                inner.publish_status();
            }
            TransportEvent::ModemLinesChanged(lines) => inner.publish(SessionEvent::ModemLinesChanged(lines)),
            TransportEvent::Disconnected { remote } => {
                if let Some(active) = inner.finish(epoch, remote) {
                    active.transport.disconnect().await;
                }
                break;
            }
        }
    }
}

async fn tick_statistics(inner: Arc<SessionInner>, cancel: CancellationToken) {
    let mut interval = tokio::time::interval(STATISTICS_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let snapshot = {
                    let mut stats = inner.stats.lock();
                    stats.tick();
                    stats.snapshot()
                };
                inner.publish(SessionEvent::StatisticsTick(snapshot));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::{ServerConfig, TcpConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn wait_for(session: &Session, predicate: impl Fn(&LogEntry) -> bool) -> LogEntry {
        for _ in 0..200 {
            if let Some(entry) = session.log().entries().into_iter().find(|e| predicate(e)) {
                return entry;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("log entry never appeared: {:?}", session.log().entries());
    }

    #[tokio::test]
    async fn test_send_while_disconnected_logs_error() {
        let session = Session::new();
        let msg = MessageDefinition::new("Poll", "01").unwrap();

        assert!(!session.send_message(&msg).await);
        let entries = session.log().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].direction, Direction::Err);
        assert_eq!(entries[0].message, "Failed to send \"Poll\" - not connected");
        assert_eq!(session.status_text(), "Disconnected");
    }

    #[tokio::test]
    async fn test_connect_failure_logged() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let session = Session::new();
        assert!(session.connect(Transport::TcpClient(TcpConfig::new("127.0.0.1", port))).await.is_err());
        assert!(!session.is_connected());

        let entries = session.log().entries();
        assert_eq!(entries[0].direction, Direction::Err);
        assert!(entries[0].message.starts_with("Failed to connect:"));
    }

    #[tokio::test]
    async fn test_client_roundtrip_and_reaction() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = Session::new();
        session
            .add_rule(ReactionRule::new("4142", MessageDefinition::new("Ack", "06").unwrap()).unwrap())
            .unwrap();

        session.connect(Transport::TcpClient(TcpConfig::new("127.0.0.1", port))).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        assert_eq!(session.status_text(), "Connected");
        assert_eq!(session.epoch(), Some(1));

        peer.write_all(b"AB").await.unwrap();
        let mut reply = [0u8; 1];
        peer.read_exact(&mut reply).await.unwrap();
        assert_eq!(reply, [0x06]);

        let rx = wait_for(&session, |e| e.direction == Direction::Rx).await;
        assert_eq!(rx.hex_data, "41 42");
        wait_for(&session, |e| e.direction == Direction::Tx && e.message == "Ack").await;

        let stats = session.statistics();
        assert_eq!(stats.bytes_received, 2);

        session.disconnect().await;
        session.disconnect().await;
        assert!(!session.is_connected());
        let closes = session.log().entries().iter().filter(|e| e.message == "Disconnected").count();
        assert_eq!(closes, 1);
    }

    #[tokio::test]
    async fn test_remote_close_ends_epoch() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let session = Session::new();
        session.connect(Transport::TcpClient(TcpConfig::new("127.0.0.1", port))).await.unwrap();
        let (peer, _) = listener.accept().await.unwrap();
        drop(peer);

        wait_for(&session, |e| e.message == "Disconnected by remote host").await;
        assert!(!session.is_connected());
        assert!(!session.statistics().is_connected);
    }

    #[tokio::test]
    async fn test_server_status_tracks_clients() {
        let session = Session::new();
        let mut events = session.subscribe();
        session
            .connect(Transport::TcpServer(ServerConfig::new(0).bind_addr("127.0.0.1")))
            .await
            .unwrap();
        assert_eq!(session.status_text(), "Server - listening");

        let info = session.log().entries()[0].message.clone();
        let addr = info.trim_start_matches("Server started on ").to_string();
        let _client = tokio::net::TcpStream::connect(&addr).await.unwrap();

        loop {
            match events.recv().await.unwrap() {
                SessionEvent::StatusChanged(text) if text == "Server - 1 client" => break,
                _ => {}
            }
        }
        assert_eq!(session.clients().len(), 1);

        session.disconnect().await;
        assert_eq!(session.status_text(), "Disconnected");
        assert!(session.clients().is_empty());
    }

    #[tokio::test]
    async fn test_send_raw_counts_invalid_spans() {
        let session = Session::new();
        let (sent, invalid) = session.send_raw("A<ZZ>B").await;
        assert!(!sent);
        assert_eq!(invalid, 1);
        assert_eq!(session.log().entries()[0].direction, Direction::Sys);
    }

    #[tokio::test]
    async fn test_rule_crud_persists() {
        let dir = tempfile::tempdir().unwrap();
        let store = MessageStore::new(dir.path().join("store.json"));

        let session = Session::with_store(store.clone()).unwrap();
        session.add_message(MessageDefinition::new("Poll", "05").unwrap()).unwrap();
        session
            .add_rule(ReactionRule::new("05", MessageDefinition::new("Ack", "06").unwrap()).unwrap())
            .unwrap();
        assert!(session.set_rule_paused(0, true).unwrap());

        let reloaded = Session::with_store(store).unwrap();
        assert_eq!(reloaded.messages().len(), 1);
        assert_eq!(reloaded.rules().len(), 1);
        assert!(reloaded.rules()[0].response.is_paused);

        assert!(reloaded.remove_message(0).unwrap().is_some());
        assert!(reloaded.remove_message(0).unwrap().is_none());
    }
    #[tokio::test]
    async fn test_stale_epoch_reaction_is_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Transport::TcpClient(TcpConfig::new("127.0.0.1", port));
        let rule = ReactionRule::new("41", MessageDefinition::new("Ack", "06").unwrap()).unwrap();

        let session = Session::new();
        session.connect(config.clone()).await.unwrap();
        let (_first, _) = listener.accept().await.unwrap();
        let old_epoch = session.epoch().unwrap();
        session.disconnect().await;

        session.connect(config).await.unwrap();
        let (_second, _) = listener.accept().await.unwrap();
        assert_eq!(session.epoch(), Some(old_epoch + 1));

        let logged = session.log().len();
        assert!(!session.inner.send_reaction(old_epoch, &rule).await);
        assert_eq!(session.log().len(), logged);

        let stats = session.statistics();
        assert_eq!(stats.bytes_sent, 0);
        assert_eq!(stats.error_count, 0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_delayed_reaction_does_not_cross_epochs() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let config = Transport::TcpClient(TcpConfig::new("127.0.0.1", port));

        let session = Session::new();
        let ack = MessageDefinition::new("Ack", "06").unwrap().delay_ms(300);
        session.add_rule(ReactionRule::new("41", ack).unwrap()).unwrap();

        session.connect(config.clone()).await.unwrap();
        let (mut first, _) = listener.accept().await.unwrap();
        first.write_all(b"A").await.unwrap();
        wait_for(&session, |e| e.direction == Direction::Rx).await;
        session.disconnect().await;

        session.connect(config).await.unwrap();
        let (mut second, _) = listener.accept().await.unwrap();

        let mut buffer = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_millis(600), second.read(&mut buffer)).await;
        assert!(read.is_err(), "stale reaction reached the new connection");

        let entries = session.log().entries();
        assert!(!entries.iter().any(|e| e.message.starts_with("Reaction triggered")));
        assert!(!entries.iter().any(|e| e.direction == Direction::Tx));
        assert_eq!(session.statistics().bytes_sent, 0);

        session.disconnect().await;
    }

    #[tokio::test]
    async fn test_data_from_ended_epoch_is_dropped() {
        let session = Session::new();
        session
            .add_rule(ReactionRule::new("4142", MessageDefinition::new("Ack", "06").unwrap()).unwrap())
            .unwrap();

        session.inner.on_data(4, None, b"AB", &CancellationToken::new());

        assert!(session.log().is_empty());
        assert_eq!(session.statistics().bytes_received, 0);
    }

    #[tokio::test]
    async fn test_server_send_without_clients_reports_reason() {
        let session = Session::new();
        session
            .connect(Transport::TcpServer(ServerConfig::new(0).bind_addr("127.0.0.1")))
            .await
            .unwrap();

        let (sent, _) = session.send_raw("<01>").await;
        assert!(!sent);

        let last = session.log().entries().pop().unwrap();
        assert_eq!(last.direction, Direction::Err);
        assert_eq!(last.message, "Failed to send \"Quick send\" - no clients connected");
        assert_eq!(session.statistics().error_count, 1);

        session.disconnect().await;
    }
}
