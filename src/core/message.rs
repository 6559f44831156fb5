//! Message templates and reaction rules
//!
//! A [`MessageDefinition`] stores its payload as canonical hex only; the
//! spaced-hex and annotated-ASCII forms are derived on demand.

use crate::core::codec::{self, CodecError};
use serde::Serialize;
use thiserror::Error;

/// Errors raised when building definitions from editor input
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// Message name is empty
    #[error("Message name must not be empty")]
    EmptyName,

    /// Reaction trigger is empty
    #[error("Reaction trigger must not be empty")]
    EmptyTrigger,

    /// Malformed hex content
    #[error(transparent)]
    Format(#[from] CodecError),
}

/// A named, sendable byte payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageDefinition {
    /// Display name
    pub name: String,
    content: String,
    /// Delay before sending when used as a reaction response
    pub delay_ms: u64,
    /// Paused reactions are skipped
    pub is_paused: bool,
    /// Higher priority reactions run first
    pub priority: i32,
    /// Stop the reaction cascade after this one runs
    pub stop_after_match: bool,
}

impl MessageDefinition {
    /// Create a message from hex text (separators allowed)
    pub fn new(name: &str, hex: &str) -> Result<Self, DefinitionError> {
        if name.trim().is_empty() {
            return Err(DefinitionError::EmptyName);
        }

        let bytes = codec::hex_to_bytes(hex)?;

        Ok(Self {
            name: name.to_string(),
            content: codec::bytes_to_hex(&bytes),
            delay_ms: 0,
            is_paused: false,
            priority: 0,
            stop_after_match: false,
        })
    }

    /// Create a message from annotated ASCII (e.g. `"AT<CR><LF>"`)
    pub fn from_ascii(name: &str, text: &str) -> Result<Self, DefinitionError> {
        let bytes = codec::macro_ascii_to_bytes(text);
        Self::from_bytes(name, &bytes)
    }

    /// Create a message from raw bytes
    pub fn from_bytes(name: &str, bytes: &[u8]) -> Result<Self, DefinitionError> {
        Self::new(name, &codec::bytes_to_hex(bytes))
    }

    /// Set delay
    #[must_use]
    pub fn delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Set priority
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set paused state
    #[must_use]
    pub fn paused(mut self, paused: bool) -> Self {
        self.is_paused = paused;
        self
    }

    /// Set stop-after-match
    #[must_use]
    pub fn stop_after_match(mut self, stop: bool) -> Self {
        self.stop_after_match = stop;
        self
    }

    /// Canonical hex content
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Replace the content from hex text
    pub fn set_content(&mut self, hex: &str) -> Result<(), CodecError> {
        let bytes = codec::hex_to_bytes(hex)?;
        self.content = codec::bytes_to_hex(&bytes);
        Ok(())
    }

    /// Payload bytes
    pub fn bytes(&self) -> Vec<u8> {
        // Content is canonical by construction
        codec::hex_to_bytes(&self.content).unwrap_or_default()
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.content.len() / 2
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Spaced hex view (`"0D 0A"`)
    pub fn display_hex(&self) -> String {
        codec::bytes_to_spaced_hex(&self.bytes())
    }

    /// Annotated ASCII view (`"OK<CR><LF>"`)
    pub fn display_ascii(&self) -> String {
        codec::bytes_to_macro_ascii(&self.bytes())
    }
}

/// An automatic response to an inbound byte pattern
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionRule {
    trigger: String,
    /// Message sent when the trigger matches
    pub response: MessageDefinition,
}

impl ReactionRule {
    /// Create a rule from hex trigger text (separators allowed)
    pub fn new(trigger: &str, response: MessageDefinition) -> Result<Self, DefinitionError> {
        let bytes = codec::hex_to_bytes(trigger)?;
        if bytes.is_empty() {
            return Err(DefinitionError::EmptyTrigger);
        }

        Ok(Self {
            trigger: codec::bytes_to_hex(&bytes),
            response,
        })
    }

    /// Canonical hex trigger
    pub fn trigger(&self) -> &str {
        &self.trigger
    }

    /// Trigger rendered as annotated ASCII
    pub fn trigger_ascii(&self) -> String {
        codec::hex_to_bytes(&self.trigger)
            .map(|bytes| codec::bytes_to_macro_ascii(&bytes))
            .unwrap_or_default()
    }

    /// Exact, case-insensitive trigger match
    pub fn matches_exact(&self, inbound_hex: &str) -> bool {
        self.trigger.eq_ignore_ascii_case(inbound_hex)
    }

    /// Case-insensitive prefix match
    pub fn matches_prefix(&self, inbound_hex: &str) -> bool {
        let trigger = self.trigger.as_bytes();
        let inbound = inbound_hex.as_bytes();
        inbound.len() >= trigger.len() && inbound[..trigger.len()].eq_ignore_ascii_case(trigger)
    }
}
