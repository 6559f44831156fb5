//! Canonical hexadecimal conversions
//!
//! Canonical hex is uppercase, two digits per byte, with no separators.
//! It is the storage form for message content and reaction triggers.

use super::CodecError;

/// Encode bytes as canonical hex (e.g. `"48656C6C6F"`)
pub fn bytes_to_hex(data: &[u8]) -> String {
    hex::encode_upper(data)
}

/// Encode bytes as spaced display hex (e.g. `"48 65 6C 6C 6F"`)
pub fn bytes_to_spaced_hex(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len() * 3);
    for (i, byte) in data.iter().enumerate() {
        if i > 0 {
            output.push(' ');
        }
        output.push_str(&format!("{:02X}", byte));
    }
    output
}

/// Strip everything that is not a hex digit and uppercase the rest.
///
/// The result is not guaranteed to have an even length.
pub fn compact_hex(text: &str) -> String {
    text.chars()
        .filter(char::is_ascii_hexdigit)
        .map(|c| c.to_ascii_uppercase())
        .collect()
}

/// Decode hex text into bytes.
///
/// Separators, prefixes and any other non-hex characters are stripped first,
/// so `"0D 0A"`, `"0d-0a"` and `"0D0A"` all decode to `[0x0D, 0x0A]`.
pub fn hex_to_bytes(text: &str) -> Result<Vec<u8>, CodecError> {
    let cleaned = compact_hex(text);

    if cleaned.len() % 2 != 0 {
        return Err(CodecError::OddLength(cleaned.len()));
    }

    hex::decode(&cleaned).map_err(|e| match e {
        hex::FromHexError::InvalidHexCharacter { c, index } => {
            CodecError::InvalidCharacter(c, index)
        }
        _ => CodecError::OddLength(cleaned.len()),
    })
}

/// Check whether `text` is already canonical hex
pub fn is_canonical_hex(text: &str) -> bool {
    text.len() % 2 == 0
        && text
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'A'..=b'F').contains(&b))
}
