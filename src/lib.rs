//! # Quintilink Core Library
//!
//! A byte-oriented communication terminal library:
//! - TCP client connections
//! - TCP server with multi-client broadcast
//! - Serial ports (RS-232, RS-485, USB-Serial adapters)
//!
//! ## Features
//!
//! - Lossless byte / hex / annotated-ASCII codec with control-code macros
//! - Predefined messages and automatic reactions to inbound patterns
//! - Throughput statistics
//! - Searchable, exportable session log with bookmarks
//! - CLI with exit codes
//!
//! ## Example
//!
//! ```rust,no_run
//! use quintilink_core::{Session, SessionEvent, TcpConfig, Transport};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = Session::new();
//!     session.connect(Transport::TcpClient(TcpConfig::new("127.0.0.1", 9000))).await?;
//!
//!     let (sent, _invalid) = session.send_raw("AT<CR><LF>").await;
//!     assert!(sent);
//!
//!     let mut rx = session.subscribe();
//!     while let Ok(event) = rx.recv().await {
//!         if let SessionEvent::LogAppended { entry, .. } = event {
//!             println!("{}", entry.to_text());
//!         }
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod core;

// Re-exports for convenience
pub use crate::cli::ExitCodes;
pub use crate::config::{ConnectionMode, ConnectionSettings};
pub use crate::core::codec::{CodecError, MixedInput};
pub use crate::core::logger::{Direction, ExportFormat, LogEntry, LogFilter, LogStore, SearchDirection, SearchQuery};
pub use crate::core::message::{DefinitionError, MessageDefinition, ReactionRule};
pub use crate::core::reaction::{ReactionEngine, ResponseSink};
pub use crate::core::session::{Session, SessionEvent};
pub use crate::core::statistics::{ConnectionStatistics, QualityStatus, StatisticsSnapshot};
pub use crate::core::store::{MessageStore, StoreError};
pub use crate::core::transport::{
    SerialConfig, SerialFlowControl, SerialParity, ServerConfig, TcpConfig, Transport, TransportError,
    TransportEvent, TransportType,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
