//! Mixed text/hex input parsing
//!
//! Free text where `<...>` spans carry either raw hex (`<0D 0A>`,
//! `<0x0d,0x0a>`, `<0D-0A>`) or a macro token (`<CR>`). Used by the
//! quick-send surface.

use super::macros::{lookup_macro, push_ascii};

/// Result of parsing mixed input
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MixedInput {
    /// Bytes to transmit
    pub bytes: Vec<u8>,
    /// Number of `<...>` spans that were neither hex nor a known macro
    pub invalid_spans: usize,
}

/// Parse mixed text/hex input.
///
/// A `<...>` span that is neither valid hex-like content nor a known macro
/// is emitted as literal text and counted in [`MixedInput::invalid_spans`].
/// An unterminated `<` is literal text and is not counted.
pub fn mixed_input_parse(text: &str) -> MixedInput {
    let mut result = MixedInput {
        bytes: Vec::with_capacity(text.len()),
        invalid_spans: 0,
    };

    let mut i = 0;
    while i < text.len() {
        let rest = &text[i..];

        let Some(open) = rest.find('<') else {
            push_literal(&mut result.bytes, rest);
            break;
        };
        push_literal(&mut result.bytes, &rest[..open]);

        let after_open = &rest[open + 1..];
        let Some(close) = after_open.find('>') else {
            push_literal(&mut result.bytes, &rest[open..]);
            break;
        };

        let inner = &after_open[..close];
        let span = &rest[open..open + close + 2];

        if let Some(bytes) = parse_hex_like(inner) {
            result.bytes.extend_from_slice(&bytes);
        } else if let Some(byte) = lookup_macro(span) {
            result.bytes.push(byte);
        } else {
            result.invalid_spans += 1;
            push_literal(&mut result.bytes, span);
        }

        i += open + close + 2;
    }

    result
}

fn push_literal(output: &mut Vec<u8>, text: &str) {
    for c in text.chars() {
        push_ascii(output, c);
    }
}

/// Parse the inside of a `<...>` span as hex.
///
/// Accepts spaces, commas, dashes and `0x` prefixes between digit pairs.
/// Any other character, an empty span or an odd digit count rejects it.
fn parse_hex_like(inner: &str) -> Option<Vec<u8>> {
    let lowered = inner.to_ascii_lowercase().replace("0x", "");

    let mut digits = String::with_capacity(lowered.len());
    for c in lowered.chars() {
        match c {
            ' ' | ',' | '-' => {}
            c if c.is_ascii_hexdigit() => digits.push(c),
            _ => return None,
        }
    }

    if digits.is_empty() || digits.len() % 2 != 0 {
        return None;
    }

    hex::decode(digits).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_span() {
        let parsed = mixed_input_parse("A<0D 0A>B");
        assert_eq!(parsed.bytes, vec![0x41, 0x0D, 0x0A, 0x42]);
        assert_eq!(parsed.invalid_spans, 0);
    }

    #[test]
    fn test_invalid_span_is_literal() {
        let parsed = mixed_input_parse("A<ZZ>B");
        assert_eq!(parsed.bytes, b"A<ZZ>B");
        assert_eq!(parsed.invalid_spans, 1);
    }

    #[test]
    fn test_hex_span_separators() {
        assert_eq!(mixed_input_parse("<0x0d,0x0A>").bytes, vec![0x0D, 0x0A]);
        assert_eq!(mixed_input_parse("<0D-0A>").bytes, vec![0x0D, 0x0A]);
        assert_eq!(mixed_input_parse("<ff>").bytes, vec![0xFF]);
    }

    #[test]
    fn test_macro_span() {
        let parsed = mixed_input_parse("AT<CR><lf>");
        assert_eq!(parsed.bytes, b"AT\r\n");
        assert_eq!(parsed.invalid_spans, 0);

        // Contains non-hex letters, so it is a macro rather than 0xAC
        assert_eq!(mixed_input_parse("<ACK>").bytes, vec![0x06]);
    }

    #[test]
    fn test_odd_hex_span_is_invalid() {
        let parsed = mixed_input_parse("<ABC>");
        assert_eq!(parsed.bytes, b"<ABC>");
        assert_eq!(parsed.invalid_spans, 1);
    }

    #[test]
    fn test_empty_and_unterminated() {
        assert_eq!(mixed_input_parse(""), MixedInput::default());

        let parsed = mixed_input_parse("<>");
        assert_eq!(parsed.bytes, b"<>");
        assert_eq!(parsed.invalid_spans, 1);

        let parsed = mixed_input_parse("x<0D");
        assert_eq!(parsed.bytes, b"x<0D");
        assert_eq!(parsed.invalid_spans, 0);
    }

    #[test]
    fn test_multiple_spans() {
        let parsed = mixed_input_parse("<02>DATA<03><QQ>");
        assert_eq!(parsed.bytes, b"\x02DATA\x03<QQ>");
        assert_eq!(parsed.invalid_spans, 1);
    }
}
