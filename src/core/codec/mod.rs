//! Byte codec for encoding/decoding terminal data
//!
//! Supports the representations used across the terminal:
//! - Canonical hex (storage form, `"0D0A"`)
//! - Spaced hex (display form, `"0D 0A"`)
//! - Annotated ASCII with control-code macros (`"OK<CR><LF>"`)
//! - Mixed text/hex quick-send input (`"AT<0D 0A>"`)

mod hex;
mod macros;
mod mixed;

pub use self::hex::{bytes_to_hex, bytes_to_spaced_hex, compact_hex, hex_to_bytes, is_canonical_hex};
pub use macros::{
    byte_to_macro_token, bytes_to_macro_ascii, lookup_macro, macro_ascii_to_bytes, macro_tokens,
};
pub use mixed::{mixed_input_parse, MixedInput};

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// Hex digit count is odd after stripping separators
    #[error("Invalid hex length: {0} digits (must be even)")]
    OddLength(usize),

    /// Invalid character
    #[error("Invalid hex character '{0}' at position {1}")]
    InvalidCharacter(char, usize),
}

/// Format bytes as a hexdump (like xxd)
pub fn hexdump(data: &[u8], bytes_per_line: usize) -> String {
    let bytes_per_line = bytes_per_line.max(1);
    let mut output = String::new();

    for (offset, chunk) in data.chunks(bytes_per_line).enumerate() {
        output.push_str(&format!("{:08X}  ", offset * bytes_per_line));
        output.push_str(&format!("{:<width$}", bytes_to_spaced_hex(chunk), width = bytes_per_line * 3 - 1));
        output.push_str("  |");
        for &byte in chunk {
            if byte.is_ascii_graphic() || byte == b' ' {
                output.push(byte as char);
            } else {
                output.push('.');
            }
        }
        output.push_str("|\n");
    }

    output
}
