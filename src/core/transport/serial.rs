//! Serial port transport implementation
//!
//! The port is read on a dedicated blocking thread with a short timeout so
//! cancellation is observed promptly. Input lines (CTS/DSR/CD) are polled on
//! the same thread.

use super::{Link, LinkState, ModemLines, TransportError, TransportEvent, TransportTrait, TransportType, READ_BUFFER_SIZE};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{Read, Write};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Read timeout; bounds how long the reader takes to notice cancellation
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Serial port flow control type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialFlowControl {
    /// No flow control
    #[default]
    None,
    /// Hardware flow control (RTS/CTS)
    Hardware,
    /// Software flow control (XON/XOFF)
    Software,
}

/// Serial port parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SerialParity {
    /// No parity
    #[default]
    None,
    /// Odd parity
    Odd,
    /// Even parity
    Even,
}

impl SerialParity {
    /// Single-letter code used in `8N1` notation
    pub fn letter(&self) -> char {
        match self {
            Self::None => 'N',
            Self::Odd => 'O',
            Self::Even => 'E',
        }
    }
}

impl std::str::FromStr for SerialParity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "none" | "n" => Ok(Self::None),
            "odd" | "o" => Ok(Self::Odd),
            "even" | "e" => Ok(Self::Even),
            other => Err(format!("Unknown parity: {other}")),
        }
    }
}

/// Serial port configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialConfig {
    /// Port name (e.g., COM3, /dev/ttyUSB0)
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Data bits (5, 6, 7, 8)
    pub data_bits: u8,
    /// Stop bits (1, 2)
    pub stop_bits: u8,
    /// Parity
    pub parity: SerialParity,
    /// Flow control
    pub flow_control: SerialFlowControl,
}

impl SerialConfig {
    /// Create a new serial configuration with default settings
    pub fn new(port: &str, baud_rate: u32) -> Self {
        Self {
            port: port.to_string(),
            baud_rate,
            data_bits: 8,
            stop_bits: 1,
            parity: SerialParity::None,
            flow_control: SerialFlowControl::None,
        }
    }

    /// Set data bits
    #[must_use]
    pub fn data_bits(mut self, bits: u8) -> Self {
        self.data_bits = bits;
        self
    }

    /// Set stop bits
    #[must_use]
    pub fn stop_bits(mut self, bits: u8) -> Self {
        self.stop_bits = bits;
        self
    }

    /// Set parity
    #[must_use]
    pub fn parity(mut self, parity: SerialParity) -> Self {
        self.parity = parity;
        self
    }

    /// Set flow control
    #[must_use]
    pub fn flow_control(mut self, flow: SerialFlowControl) -> Self {
        self.flow_control = flow;
        self
    }

    /// Frame format, e.g. `8N1`
    pub fn frame(&self) -> String {
        format!("{}{}{}", self.data_bits, self.parity.letter(), self.stop_bits)
    }

    /// Check the frame settings before opening the port
    pub fn validate(&self) -> Result<(), TransportError> {
        if self.port.trim().is_empty() {
            return Err(TransportError::InvalidConfiguration("port name is empty".into()));
        }
        if self.baud_rate == 0 {
            return Err(TransportError::InvalidConfiguration("baud rate must be positive".into()));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(TransportError::InvalidConfiguration(format!(
                "unsupported data bits: {}",
                self.data_bits
            )));
        }
        if !matches!(self.stop_bits, 1 | 2) {
            return Err(TransportError::InvalidConfiguration(format!(
                "unsupported stop bits: {}",
                self.stop_bits
            )));
        }
        Ok(())
    }

    fn open(&self) -> Result<Box<dyn SerialPort>, TransportError> {
        let data_bits = match self.data_bits {
            5 => DataBits::Five,
            6 => DataBits::Six,
            7 => DataBits::Seven,
            _ => DataBits::Eight,
        };

        let stop_bits = match self.stop_bits {
            2 => StopBits::Two,
            _ => StopBits::One,
        };

        let parity = match self.parity {
            SerialParity::Odd => Parity::Odd,
            SerialParity::Even => Parity::Even,
            SerialParity::None => Parity::None,
        };

        let flow_control = match self.flow_control {
            SerialFlowControl::Hardware => FlowControl::Hardware,
            SerialFlowControl::Software => FlowControl::Software,
            SerialFlowControl::None => FlowControl::None,
        };

        serialport::new(&self.port, self.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(flow_control)
            .timeout(READ_TIMEOUT)
            .open()
            .map_err(|e| map_serial_error(&self.port, e))
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new("COM1", 9600)
    }
}

fn map_serial_error(port: &str, e: serialport::Error) -> TransportError {
    match e.kind() {
        serialport::ErrorKind::NoDevice => TransportError::PortNotFound(port.to_string()),
        serialport::ErrorKind::InvalidInput => TransportError::InvalidConfiguration(e.to_string()),
        serialport::ErrorKind::Io(io_kind) => match io_kind {
            std::io::ErrorKind::NotFound => TransportError::PortNotFound(port.to_string()),
            std::io::ErrorKind::PermissionDenied => TransportError::PermissionDenied(port.to_string()),
            std::io::ErrorKind::AddrInUse | std::io::ErrorKind::WouldBlock => {
                TransportError::PortInUse(port.to_string())
            }
            _ => TransportError::ConnectionFailed(e.to_string()),
        },
        _ => TransportError::ConnectionFailed(e.to_string()),
    }
}

/// Serial port transport
pub struct SerialTransport {
    config: SerialConfig,
    link: Arc<Link>,
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    cancel: Mutex<CancellationToken>,
    reader: Mutex<Option<JoinHandle<()>>>,
    modem_lines: Arc<RwLock<ModemLines>>,
}

impl SerialTransport {
    /// Create a new serial transport
    pub fn new(config: SerialConfig, events: mpsc::Sender<TransportEvent>) -> Self {
        Self {
            config,
            link: Arc::new(Link::new(events)),
            port: Arc::new(Mutex::new(None)),
            cancel: Mutex::new(CancellationToken::new()),
            reader: Mutex::new(None),
            modem_lines: Arc::new(RwLock::new(ModemLines::default())),
        }
    }

    /// Port configuration
    pub fn config(&self) -> &SerialConfig {
        &self.config
    }

    /// Open the device and return a cloned handle for the reader
    async fn open(&self) -> Result<Box<dyn SerialPort>, TransportError> {
        self.config.validate()?;

        let config = self.config.clone();
        let port = tokio::task::spawn_blocking(move || config.open())
            .await
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))??;

        let mut reader_port = port
            .try_clone()
            .map_err(|e| map_serial_error(&self.config.port, e))?;

        *self.modem_lines.write() = ModemLines::default();
        poll_input_lines(reader_port.as_mut(), &self.modem_lines);
        *self.port.lock() = Some(port);

        Ok(reader_port)
    }

    /// Start the read thread. The link must already be armed.
    fn start_reader(&self, reader_port: Box<dyn SerialPort>) -> Result<(), TransportError> {
        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        let link = self.link.clone();
        let lines = self.modem_lines.clone();
        let handle = std::thread::Builder::new()
            .name(format!("serial-{}", self.config.port))
            .spawn(move || read_loop(reader_port, link, lines, token))?;
        *self.reader.lock() = Some(handle);

        Ok(())
    }

    fn with_port<T>(&self, f: impl FnOnce(&mut dyn SerialPort) -> serialport::Result<T>) -> Result<Option<T>, TransportError> {
        let mut guard = self.port.lock();
        match guard.as_mut() {
            Some(port) => f(port.as_mut()).map(Some).map_err(|e| map_serial_error(&self.config.port, e)),
            None => Ok(None),
        }
    }

    async fn fail(&self) {
        self.cancel.lock().cancel();
        self.link.notify_disconnected(true).await;
    }
}

#[async_trait]
impl TransportTrait for SerialTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.link.begin_connect()?;

        let reader_port = match self.open().await {
            Ok(port) => port,
            Err(e) => {
                self.port.lock().take();
                self.link.abort_connect();
                return Err(e);
            }
        };

        self.link.connected();
        if let Err(e) = self.start_reader(reader_port) {
            self.port.lock().take();
            self.link.abort_connect();
            return Err(e);
        }

        info!("Opened {} at {} baud ({})", self.config.port, self.config.baud_rate, self.config.frame());
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> bool {
        if !self.is_connected() {
            return false;
        }

        let port = self.port.clone();
        let data = data.to_vec();
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = port.lock();
            match guard.as_mut() {
                Some(port) => port.write_all(&data).and_then(|()| port.flush()).map(|()| true),
                None => Ok(false),
            }
        })
        .await;

        match result {
            Ok(Ok(sent)) => sent,
            Ok(Err(e)) => {
                warn!("Write to {} failed: {}", self.config.port, e);
                self.fail().await;
                false
            }
            Err(e) => {
                warn!("Write task for {} failed: {}", self.config.port, e);
                false
            }
        }
    }

    async fn disconnect(&self) {
        self.link.begin_disconnect();
        self.cancel.lock().cancel();

        let reader = self.reader.lock().take();
        if let Some(handle) = reader {
            tokio::task::spawn_blocking(move || handle.join()).await.ok();
        }
        if self.port.lock().take().is_some() {
            debug!("Closed {}", self.config.port);
        }

        self.link.notify_disconnected(false).await;
        self.link.set_state(LinkState::Disconnected);
    }

    fn state(&self) -> LinkState {
        self.link.state()
    }

    fn transport_type(&self) -> TransportType {
        TransportType::Serial
    }

    fn connection_info(&self) -> String {
        format!("{} @ {} baud ({})", self.config.port, self.config.baud_rate, self.config.frame())
    }

    async fn set_dtr(&self, state: bool) -> Result<(), TransportError> {
        if self.with_port(|port| port.write_data_terminal_ready(state))?.is_some() {
            self.modem_lines.write().dtr = state;
        }
        Ok(())
    }

    async fn set_rts(&self, state: bool) -> Result<(), TransportError> {
        if self.with_port(|port| port.write_request_to_send(state))?.is_some() {
            self.modem_lines.write().rts = state;
        }
        Ok(())
    }

    fn modem_lines(&self) -> Option<ModemLines> {
        Some(*self.modem_lines.read())
    }
}

/// Read CTS/DSR/CD, returning the new state if any changed.
///
/// Unreadable lines keep their last value.
fn poll_input_lines(port: &mut dyn SerialPort, shared: &RwLock<ModemLines>) -> Option<ModemLines> {
    let mut lines = *shared.read();
    let before = lines;

    if let Ok(cts) = port.read_clear_to_send() {
        lines.cts = cts;
    }
    if let Ok(dsr) = port.read_data_set_ready() {
        lines.dsr = dsr;
    }
    if let Ok(dcd) = port.read_carrier_detect() {
        lines.dcd = dcd;
    }

    if lines == before {
        return None;
    }

    let mut current = shared.write();
    current.cts = lines.cts;
    current.dsr = lines.dsr;
    current.dcd = lines.dcd;
    Some(*current)
}

fn read_loop(mut port: Box<dyn SerialPort>, link: Arc<Link>, lines: Arc<RwLock<ModemLines>>, token: CancellationToken) {
    let mut buffer = [0u8; READ_BUFFER_SIZE];

    while !token.is_cancelled() {
        match port.read(&mut buffer) {
            Ok(0) => {}
            Ok(n) => {
                let event = TransportEvent::Data {
                    peer: None,
                    data: Bytes::copy_from_slice(&buffer[..n]),
                };
                if !link.blocking_emit(event) {
                    break;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => {}
            Err(e) => {
                if !token.is_cancelled() {
                    warn!("Serial read failed: {}", e);
                    link.blocking_notify_disconnected(true);
                }
                break;
            }
        }

        if let Some(changed) = poll_input_lines(port.as_mut(), &lines) {
            debug!("Modem lines changed: {:?}", changed);
            link.blocking_emit(TransportEvent::ModemLinesChanged(changed));
        }
    }
}

/// List available serial ports
pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>, TransportError> {
    serialport::available_ports().map_err(|e| TransportError::Io(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::transport::event_channel;

    #[test]
    fn test_frame_and_info() {
        let config = SerialConfig::new("/dev/ttyUSB0", 115200)
            .data_bits(7)
            .parity(SerialParity::Even)
            .stop_bits(2);
        assert_eq!(config.frame(), "7E2");

        let (tx, _rx) = event_channel();
        let transport = SerialTransport::new(config, tx);
        assert_eq!(transport.connection_info(), "/dev/ttyUSB0 @ 115200 baud (7E2)");
        assert_eq!(transport.transport_type(), TransportType::Serial);
    }

    #[test]
    fn test_validate() {
        assert!(SerialConfig::default().validate().is_ok());
        assert!(SerialConfig::new("COM3", 9600).data_bits(9).validate().is_err());
        assert!(SerialConfig::new("COM3", 9600).stop_bits(3).validate().is_err());
        assert!(SerialConfig::new("COM3", 0).validate().is_err());
        assert!(SerialConfig::new(" ", 9600).validate().is_err());
    }

    #[test]
    fn test_parity_parse() {
        assert_eq!("E".parse::<SerialParity>(), Ok(SerialParity::Even));
        assert_eq!("none".parse::<SerialParity>(), Ok(SerialParity::None));
        assert!("mark".parse::<SerialParity>().is_err());
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_open() {
        let (tx, _rx) = event_channel();
        let transport = SerialTransport::new(SerialConfig::new("COM3", 9600).data_bits(4), tx);

        assert!(matches!(
            transport.connect().await,
            Err(TransportError::InvalidConfiguration(_))
        ));
        assert_eq!(transport.state(), LinkState::Disconnected);
        assert!(!transport.send(b"x").await);
    }

    #[tokio::test]
    async fn test_missing_port_fails() {
        let (tx, _rx) = event_channel();
        let transport = SerialTransport::new(SerialConfig::new("/dev/quintilink-missing-port", 9600), tx);

        assert!(transport.connect().await.is_err());
        assert_eq!(transport.state(), LinkState::Disconnected);

        transport.disconnect().await;
        assert_eq!(transport.state(), LinkState::Disconnected);
    }
}
