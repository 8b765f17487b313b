//! Text normalization applied before chunking.
//!
//! Collapses every run of whitespace into a single space, drops
//! non-printable control characters, and trims both ends. The result is
//! what chunk offsets refer to.

use crate::error::RagError;

/// Normalize extracted text.
///
/// # Example
///
/// ```rust
/// use knowledge_rag_core::normalize::normalize;
///
/// assert_eq!(normalize("  Hello,\n\n\tworld!\u{7}  "), "Hello, world!");
/// ```
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;

    for c in raw.chars() {
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if c.is_control() || is_invisible_format(c) {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        out.push(c);
    }

    out
}

/// Validate that `bytes` are text and borrow them as `&str`.
///
/// Returns [`RagError::UnsupportedContent`] for content that is not text:
/// invalid UTF-8, or UTF-8 that contains NUL bytes (a reliable sign of a
/// binary file). A leading byte-order mark is skipped.
pub fn decode_text(bytes: &[u8]) -> Result<&str, RagError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    if bytes.contains(&0) {
        return Err(RagError::UnsupportedContent(
            "binary content (NUL bytes)".to_string(),
        ));
    }
    std::str::from_utf8(bytes)
        .map_err(|e| RagError::UnsupportedContent(format!("not valid UTF-8 text: {}", e)))
}

/// Zero-width and byte-order-mark characters that render as nothing.
fn is_invisible_format(c: char) -> bool {
    matches!(c, '\u{200B}' | '\u{200C}' | '\u{200D}' | '\u{FEFF}')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collapses_whitespace_runs() {
        assert_eq!(normalize("a  b\n\nc\t\td"), "a b c d");
    }

    #[test]
    fn test_trims_ends() {
        assert_eq!(normalize("\n\n  text  \r\n"), "text");
    }

    #[test]
    fn test_strips_control_characters() {
        assert_eq!(normalize("be\u{7}ll\u{1b}[0m"), "bell[0m");
    }

    #[test]
    fn test_control_between_words_keeps_single_space() {
        assert_eq!(normalize("one \u{0} two"), "one two");
    }

    #[test]
    fn test_keeps_cjk_and_punctuation() {
        assert_eq!(normalize("这是 一个\n测试。 ok?"), "这是 一个 测试。 ok?");
    }

    #[test]
    fn test_empty_and_blank() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize(" \n\t "), "");
    }

    #[test]
    fn test_decode_rejects_binary() {
        let err = decode_text(b"PK\x03\x04\x00\x00binary").unwrap_err();
        assert!(matches!(err, RagError::UnsupportedContent(_)));
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        let err = decode_text(&[0xff, 0xfe, 0x41]).unwrap_err();
        assert!(matches!(err, RagError::UnsupportedContent(_)));
    }

    #[test]
    fn test_decode_skips_bom() {
        let text = decode_text(b"\xEF\xBB\xBFhello  world").unwrap();
        assert_eq!(normalize(text), "hello world");
    }
}
