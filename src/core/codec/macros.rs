//! Named control-code macros (`<CR>`, `<LF>`, `<STX>`, ...)
//!
//! The table is ordered: when several names map to the same byte the first
//! entry is the canonical one used when rendering bytes back to text.

use once_cell::sync::Lazy;
use std::borrow::Cow;
use std::collections::HashMap;

/// Ordered (token, byte) pairs
const MACRO_TABLE: &[(&str, u8)] = &[
    ("<NUL>", 0x00),
    ("<NULL>", 0x00),
    ("<SOH>", 0x01),
    ("<STX>", 0x02),
    ("<ETX>", 0x03),
    ("<EOT>", 0x04),
    ("<ENQ>", 0x05),
    ("<ACK>", 0x06),
    ("<BEL>", 0x07),
    ("<BELL>", 0x07),
    ("<BS>", 0x08),
    ("<HT>", 0x09),
    ("<TAB>", 0x09),
    ("<LF>", 0x0A),
    ("<NL>", 0x0A),
    ("<VT>", 0x0B),
    ("<FF>", 0x0C),
    ("<CR>", 0x0D),
    ("<SO>", 0x0E),
    ("<SI>", 0x0F),
    ("<DLE>", 0x10),
    ("<DC1>", 0x11),
    ("<XON>", 0x11),
    ("<DC2>", 0x12),
    ("<DC3>", 0x13),
    ("<XOFF>", 0x13),
    ("<DC4>", 0x14),
    ("<NAK>", 0x15),
    ("<SYN>", 0x16),
    ("<ETB>", 0x17),
    ("<CAN>", 0x18),
    ("<EM>", 0x19),
    ("<SUB>", 0x1A),
    ("<ESC>", 0x1B),
    ("<FS>", 0x1C),
    ("<GS>", 0x1D),
    ("<RS>", 0x1E),
    ("<US>", 0x1F),
    ("<SP>", 0x20),
    ("<DEL>", 0x7F),
];

/// Bidirectional index over [`MACRO_TABLE`], built once
struct MacroIndex {
    by_byte: [Option<&'static str>; 256],
    by_token: HashMap<String, u8>,
}

static INDEX: Lazy<MacroIndex> = Lazy::new(|| {
    let mut by_byte = [None; 256];
    let mut by_token = HashMap::with_capacity(MACRO_TABLE.len());

    for &(token, byte) in MACRO_TABLE {
        let slot = &mut by_byte[usize::from(byte)];
        if slot.is_none() {
            *slot = Some(token);
        }
        by_token.insert(token.to_ascii_uppercase(), byte);
    }

    MacroIndex { by_byte, by_token }
});

/// All macro tokens in table order
pub fn macro_tokens() -> impl Iterator<Item = &'static str> {
    MACRO_TABLE.iter().map(|(token, _)| *token)
}

/// Look up a `<TOKEN>` (case-insensitive, brackets included)
pub fn lookup_macro(token: &str) -> Option<u8> {
    INDEX.by_token.get(&token.to_ascii_uppercase()).copied()
}

/// Render one byte as its annotated ASCII form.
///
/// Returns the canonical macro alias if the byte has one, the literal
/// character if it is printable ASCII, or a `[XX]` escape otherwise.
pub fn byte_to_macro_token(byte: u8) -> Cow<'static, str> {
    if let Some(token) = INDEX.by_byte[usize::from(byte)] {
        return Cow::Borrowed(token);
    }

    if (0x20..=0x7E).contains(&byte) {
        Cow::Owned(char::from(byte).to_string())
    } else {
        Cow::Owned(format!("[{:02X}]", byte))
    }
}

/// Render a buffer as annotated ASCII (e.g. `"OK<CR><LF>"`)
pub fn bytes_to_macro_ascii(data: &[u8]) -> String {
    let mut output = String::with_capacity(data.len());
    for &byte in data {
        output.push_str(&byte_to_macro_token(byte));
    }
    output
}

/// Expand annotated ASCII back into bytes.
///
/// Known `<TOKEN>` spans expand to their byte. An unknown span or an
/// unterminated `<` is kept as literal text, one character at a time.
/// Never fails.
pub fn macro_ascii_to_bytes(text: &str) -> Vec<u8> {
    let mut output = Vec::with_capacity(text.len());
    let mut i = 0;

    while i < text.len() {
        let rest = &text[i..];

        if rest.starts_with('<') {
            if let Some(close) = rest.find('>') {
                if let Some(byte) = lookup_macro(&rest[..=close]) {
                    output.push(byte);
                    i += close + 1;
                    continue;
                }
            }
        }

        // `i` always sits on a char boundary
        let Some(c) = rest.chars().next() else { break };
        push_ascii(&mut output, c);
        i += c.len_utf8();
    }

    output
}

/// Append a character using ASCII encoder semantics (`?` for non-ASCII)
pub(crate) fn push_ascii(output: &mut Vec<u8>, c: char) {
    if c.is_ascii() {
        output.push(c as u8);
    } else {
        output.push(b'?');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_priority() {
        assert_eq!(byte_to_macro_token(0x0D), "<CR>");
        assert_eq!(byte_to_macro_token(0x41), "A");
        assert_eq!(byte_to_macro_token(0x01), "<SOH>");
        assert_eq!(byte_to_macro_token(0x80), "[80]");
        assert_eq!(byte_to_macro_token(0x20), "<SP>");
    }

    #[test]
    fn test_first_alias_wins() {
        assert_eq!(byte_to_macro_token(0x0A), "<LF>");
        assert_eq!(byte_to_macro_token(0x00), "<NUL>");
        assert_eq!(byte_to_macro_token(0x11), "<DC1>");
        assert_eq!(byte_to_macro_token(0x07), "<BEL>");
    }

    #[test]
    fn test_expand_case_insensitive() {
        assert_eq!(macro_ascii_to_bytes("OK<cr><Lf>"), b"OK\r\n");
        assert_eq!(macro_ascii_to_bytes("<nl><xoff>"), vec![0x0A, 0x13]);
    }

    #[test]
    fn test_unknown_and_unterminated_pass_through() {
        assert_eq!(macro_ascii_to_bytes("a<FOO>b"), b"a<FOO>b");
        assert_eq!(macro_ascii_to_bytes("x<CR"), b"x<CR");
        assert_eq!(macro_ascii_to_bytes("<<CR>"), b"<\r");
        assert_eq!(macro_ascii_to_bytes(""), Vec::<u8>::new());
    }

    #[test]
    fn test_non_ascii_becomes_question_mark() {
        assert_eq!(macro_ascii_to_bytes("é<CR>"), b"?\r");
    }

    #[test]
    fn test_every_macro_byte_round_trips() {
        for &(_, byte) in MACRO_TABLE {
            let token = byte_to_macro_token(byte);
            assert_eq!(macro_ascii_to_bytes(&token), vec![byte], "byte {byte:02X}");
        }
    }

    #[test]
    fn test_buffer_rendering() {
        assert_eq!(bytes_to_macro_ascii(b"OK\r\n"), "OK<CR><LF>");
        assert_eq!(bytes_to_macro_ascii(&[0x02, 0x41, 0xFE, 0x03]), "<STX>A[FE]<ETX>");
    }

    #[test]
    fn test_tokens_listed_in_order() {
        let tokens: Vec<_> = macro_tokens().take(3).collect();
        assert_eq!(tokens, ["<NUL>", "<NULL>", "<SOH>"]);
    }
}
