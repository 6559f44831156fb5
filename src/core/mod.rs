//! Core module containing the main functionality of Quintilink
//!
//! This module provides:
//! - Transport layer (TCP client, TCP server, serial)
//! - Codec for hex / annotated ASCII / mixed quick-send input
//! - Message templates and reaction rules
//! - Reaction engine with priority-ordered cascades
//! - Connection statistics
//! - Log store with bookmarks, search and export
//! - JSON message store
//! - Byte-level payload comparison
//! - Session management tying the above together

pub mod codec;
pub mod compare;
pub mod logger;
pub mod message;
pub mod reaction;
pub mod session;
pub mod statistics;
pub mod store;
pub mod transport;
