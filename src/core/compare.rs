//! Byte-level comparison of two payloads

use crate::core::message::MessageDefinition;
use serde::Serialize;
use std::fmt;

/// One differing position
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteDifference {
    /// Byte offset
    pub position: usize,
    /// Byte in the first payload, if it is that long
    pub left: Option<u8>,
    /// Byte in the second payload, if it is that long
    pub right: Option<u8>,
}

impl fmt::Display for ByteDifference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.left, self.right) {
            (None, Some(b)) => write!(f, "Position {}: first ended, second has {:02X}", self.position, b),
            (Some(a), None) => write!(f, "Position {}: first has {:02X}, second ended", self.position, a),
            (Some(a), Some(b)) => write!(f, "Position {}: {:02X} != {:02X}", self.position, a, b),
            (None, None) => write!(f, "Position {}", self.position),
        }
    }
}

/// Comparison result
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HexComparison {
    /// Differing positions in order
    pub differences: Vec<ByteDifference>,
    /// Length of the longer payload
    pub total_bytes: usize,
    /// Number of differing positions
    pub different_bytes: usize,
}

impl HexComparison {
    /// Share of identical positions, 0 when both payloads are empty
    pub fn similarity_percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.total_bytes - self.different_bytes) as f64 * 100.0 / self.total_bytes as f64
    }

    /// Whether the payloads are identical
    pub fn is_identical(&self) -> bool {
        self.different_bytes == 0
    }
}

/// Compare two byte buffers position by position
pub fn compare(left: &[u8], right: &[u8]) -> HexComparison {
    let total_bytes = left.len().max(right.len());

    let differences: Vec<ByteDifference> = (0..total_bytes)
        .filter_map(|position| {
            let a = left.get(position).copied();
            let b = right.get(position).copied();
            (a != b).then_some(ByteDifference { position, left: a, right: b })
        })
        .collect();

    HexComparison {
        different_bytes: differences.len(),
        differences,
        total_bytes,
    }
}

/// Compare the payloads of two messages
pub fn compare_messages(left: &MessageDefinition, right: &MessageDefinition) -> HexComparison {
    compare(&left.bytes(), &right.bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identical() {
        let result = compare(b"ABC", b"ABC");
        assert!(result.is_identical());
        assert_eq!(result.similarity_percentage(), 100.0);
    }

    #[test]
    fn test_length_mismatch() {
        let result = compare(&[0x01, 0x02], &[0x01, 0x03, 0x04]);
        assert_eq!(result.total_bytes, 3);
        assert_eq!(result.different_bytes, 2);
        assert_eq!(result.differences[1], ByteDifference { position: 2, left: None, right: Some(0x04) });
        assert_eq!(result.differences[0].to_string(), "Position 1: 02 != 03");
        assert!((result.similarity_percentage() - 33.333).abs() < 0.01);
    }

    #[test]
    fn test_empty() {
        let result = compare(&[], &[]);
        assert_eq!(result.similarity_percentage(), 0.0);
        assert!(result.is_identical());
    }

    #[test]
    fn test_messages() {
        let a = MessageDefinition::new("a", "0D0A").unwrap();
        let b = MessageDefinition::new("b", "0D").unwrap();
        let result = compare_messages(&a, &b);
        assert_eq!(result.differences[0].to_string(), "Position 1: first has 0A, second ended");
    }
}
