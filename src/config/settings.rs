//! Persisted connection settings

use crate::core::transport::{SerialConfig, SerialParity, ServerConfig, TcpConfig, Transport};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;
use tracing::warn;

/// Default settings file name
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Number of quick-send history entries kept
pub const QUICK_SEND_HISTORY_LIMIT: usize = 20;

/// Settings errors
#[derive(Debug, Error)]
pub enum SettingsError {
    /// Could not determine the config directory
    #[error("Could not determine config directory")]
    NoConfigDir,

    /// File could not be written
    #[error("Settings I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings could not be encoded
    #[error("Settings serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Connection mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionMode {
    /// Outbound TCP
    #[default]
    TcpClient,
    /// Listening TCP server
    TcpServer,
    /// Serial line
    Serial,
}

/// Last-used connection parameters and quick-send state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// Connection mode
    pub mode: ConnectionMode,
    /// TCP host
    pub host: String,
    /// TCP port (client target or server listen port)
    pub port: u16,
    /// Serial port name
    pub serial_port_name: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Parity
    pub parity: SerialParity,
    /// Data bits
    pub data_bits: u8,
    /// Stop bits
    pub stop_bits: u8,
    /// Recent quick-send inputs, newest first
    pub quick_send_history: Vec<String>,
    /// Pinned quick-send snippets
    pub quick_send_pinned_snippets: Vec<String>,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            mode: ConnectionMode::TcpClient,
            host: "127.0.0.1".to_string(),
            port: 9000,
            serial_port_name: "COM1".to_string(),
            baud_rate: 9600,
            parity: SerialParity::None,
            data_bits: 8,
            stop_bits: 1,
            quick_send_history: Vec::new(),
            quick_send_pinned_snippets: Vec::new(),
        }
    }
}

impl ConnectionSettings {
    /// Load from the config directory
    pub fn load() -> Self {
        match super::config_dir() {
            Some(dir) => Self::load_from(&dir.join(SETTINGS_FILE_NAME)),
            None => Self::default(),
        }
    }

    /// Load from a file; missing or unreadable files yield defaults
    pub fn load_from(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Could not read settings {}: {}", path.display(), e);
                }
                return Self::default();
            }
        };

        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!("Ignoring corrupt settings {}: {}", path.display(), e);
            Self::default()
        })
    }

    /// Save to the config directory
    pub fn save(&self) -> Result<(), SettingsError> {
        let dir = super::config_dir().ok_or(SettingsError::NoConfigDir)?;
        std::fs::create_dir_all(&dir)?;
        self.save_to(&dir.join(SETTINGS_FILE_NAME))
    }

    /// Save to a file as pretty JSON
    pub fn save_to(&self, path: &Path) -> Result<(), SettingsError> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Connect parameters for the stored mode
    pub fn to_transport(&self) -> Transport {
        match self.mode {
            ConnectionMode::TcpClient => Transport::TcpClient(TcpConfig::new(&self.host, self.port)),
            ConnectionMode::TcpServer => Transport::TcpServer(ServerConfig::new(self.port)),
            ConnectionMode::Serial => Transport::Serial(
                SerialConfig::new(&self.serial_port_name, self.baud_rate)
                    .data_bits(self.data_bits)
                    .stop_bits(self.stop_bits)
                    .parity(self.parity),
            ),
        }
    }

    /// Record a quick-send input at the front of the history
    pub fn push_quick_send(&mut self, text: &str) {
        if text.trim().is_empty() {
            return;
        }
        self.quick_send_history.retain(|entry| entry != text);
        self.quick_send_history.insert(0, text.to_string());
        self.quick_send_history.truncate(QUICK_SEND_HISTORY_LIMIT);
    }

    /// Pin a snippet; returns false if it was already pinned
    pub fn pin_snippet(&mut self, text: &str) -> bool {
        if text.trim().is_empty() || self.quick_send_pinned_snippets.iter().any(|s| s == text) {
            return false;
        }
        self.quick_send_pinned_snippets.push(text.to_string());
        true
    }

    /// Unpin a snippet; returns false if it was not pinned
    pub fn unpin_snippet(&mut self, text: &str) -> bool {
        let before = self.quick_send_pinned_snippets.len();
        self.quick_send_pinned_snippets.retain(|s| s != text);
        self.quick_send_pinned_snippets.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = ConnectionSettings::default();
        assert_eq!(settings.host, "127.0.0.1");
        assert_eq!(settings.port, 9000);
        assert_eq!(settings.serial_port_name, "COM1");
        assert_eq!(settings.baud_rate, 9600);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);

        let mut settings = ConnectionSettings {
            mode: ConnectionMode::Serial,
            serial_port_name: "/dev/ttyUSB0".into(),
            baud_rate: 115200,
            parity: SerialParity::Even,
            ..ConnectionSettings::default()
        };
        settings.push_quick_send("AT<CR>");
        settings.save_to(&path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"serialPortName\": \"/dev/ttyUSB0\""));
        assert!(raw.contains("\"mode\": \"serial\""));

        assert_eq!(ConnectionSettings::load_from(&path), settings);
    }

    #[test]
    fn test_missing_and_corrupt_yield_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        assert_eq!(ConnectionSettings::load_from(&path), ConnectionSettings::default());

        std::fs::write(&path, "not json").unwrap();
        assert_eq!(ConnectionSettings::load_from(&path), ConnectionSettings::default());
    }

    #[test]
    fn test_partial_document_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE_NAME);
        std::fs::write(&path, r#"{ "host": "10.0.0.5" }"#).unwrap();

        let settings = ConnectionSettings::load_from(&path);
        assert_eq!(settings.host, "10.0.0.5");
        assert_eq!(settings.port, 9000);
    }

    #[test]
    fn test_quick_send_history() {
        let mut settings = ConnectionSettings::default();
        for i in 0..25 {
            settings.push_quick_send(&format!("cmd{i}"));
        }
        settings.push_quick_send("cmd10");
        settings.push_quick_send("   ");

        assert_eq!(settings.quick_send_history.len(), QUICK_SEND_HISTORY_LIMIT);
        assert_eq!(settings.quick_send_history[0], "cmd10");
        assert_eq!(settings.quick_send_history[1], "cmd24");
        assert_eq!(settings.quick_send_history.iter().filter(|s| *s == "cmd10").count(), 1);
    }

    #[test]
    fn test_pinned_snippets() {
        let mut settings = ConnectionSettings::default();
        assert!(settings.pin_snippet("<02>PING<03>"));
        assert!(!settings.pin_snippet("<02>PING<03>"));
        assert!(settings.unpin_snippet("<02>PING<03>"));
        assert!(!settings.unpin_snippet("<02>PING<03>"));
    }

    #[test]
    fn test_to_transport() {
        let settings = ConnectionSettings {
            mode: ConnectionMode::TcpServer,
            port: 7000,
            ..ConnectionSettings::default()
        };
        match settings.to_transport() {
            Transport::TcpServer(cfg) => assert_eq!(cfg.port, 7000),
            other => panic!("unexpected transport: {other:?}"),
        }
    }
}
