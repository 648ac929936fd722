use std::borrow::Cow;

use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

/// Returns true for the C0 control bytes that XML 1.0 forbids in a document.
///
/// Tab (0x09), line feed (0x0A) and carriage return (0x0D) are the only C0
/// characters XML accepts; everything else below 0x20 is rejected by a
/// conforming parser.
#[inline]
fn is_invalid_xml_byte(b: u8) -> bool {
    matches!(b, 0x00..=0x08 | 0x0b..=0x0c | 0x0e..=0x1f)
}

/// Removes control characters XML 1.0 does not allow from raw feed bytes.
///
/// Strips U+0000–U+0008, U+000B–U+000C and U+000E–U+001F. These are all
/// single-byte ASCII values, which never occur inside a multi-byte UTF-8
/// sequence, so working on bytes is safe for UTF-8 input and leaves any other
/// encoding problem in place for the XML loader to report.
///
/// Returns `Cow::Borrowed` when nothing needs removing.
///
/// # Examples
///
/// ```
/// use feedscope::util::strip_invalid_xml_chars;
///
/// assert_eq!(&*strip_invalid_xml_chars(b"<a>\x01ok</a>"), b"<a>ok</a>");
/// ```
pub fn strip_invalid_xml_chars(raw: &[u8]) -> Cow<'_, [u8]> {
    if !raw.iter().any(|&b| is_invalid_xml_byte(b)) {
        return Cow::Borrowed(raw);
    }

    Cow::Owned(
        raw.iter()
            .copied()
            .filter(|&b| !is_invalid_xml_byte(b))
            .collect(),
    )
}

/// Text flavour of [`strip_invalid_xml_chars`].
pub fn sanitize_xml_text(text: &str) -> Cow<'_, str> {
    if !text.bytes().any(is_invalid_xml_byte) {
        return Cow::Borrowed(text);
    }
    Cow::Owned(text.chars().filter(|&c| !(c.is_ascii() && is_invalid_xml_byte(c as u8))).collect())
}

/// Display width of a string in terminal columns (CJK and emoji count as 2).
pub fn display_width(s: &str) -> usize {
    UnicodeWidthStr::width(s)
}

const ELLIPSIS: &str = "...";
const ELLIPSIS_WIDTH: usize = 3;

/// Truncates a string so it fits in `max_width` terminal columns.
///
/// When the string is cut, "..." is appended and counted against the width.
/// Widths of 3 columns or fewer get as many characters as fit, with no
/// ellipsis. Strings that already fit are returned borrowed.
///
/// # Examples
///
/// ```
/// use feedscope::util::truncate_to_width;
///
/// assert_eq!(truncate_to_width("Short", 10), "Short");
/// assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
/// assert_eq!(truncate_to_width("Test", 2), "Te");
/// ```
pub fn truncate_to_width(s: &str, max_width: usize) -> Cow<'_, str> {
    if display_width(s) <= max_width {
        return Cow::Borrowed(s);
    }

    let (budget, suffix) = if max_width <= ELLIPSIS_WIDTH {
        (max_width, "")
    } else {
        (max_width - ELLIPSIS_WIDTH, ELLIPSIS)
    };

    let mut used = 0;
    let mut end = 0;
    for (idx, c) in s.char_indices() {
        let w = UnicodeWidthChar::width(c).unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        end = idx + c.len_utf8();
    }

    Cow::Owned(format!("{}{}", &s[..end], suffix))
}

#[inline]
fn is_terminal_control(b: u8) -> bool {
    b == 0x1b || b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// SEC-001: Strip terminal control characters and ANSI escape sequences.
///
/// Feed titles, links and parser diagnostics can echo attacker-controlled
/// bytes; this keeps them from driving the terminal when printed.
///
/// Removes C0 controls other than tab/LF/CR, DEL, CSI sequences
/// (`ESC [` … final byte 0x40–0x7E), OSC sequences (`ESC ]` … BEL or `ESC \`)
/// and any bare ESC.
///
/// Returns `Cow::Borrowed` when the input is already clean.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| is_terminal_control(b)) {
        return Cow::Borrowed(s);
    }

    let len = bytes.len();
    let mut out = String::with_capacity(len);
    let mut i = 0;
    let mut run_start = 0;

    while i < len {
        let b = bytes[i];
        if !is_terminal_control(b) {
            i += 1;
            continue;
        }

        // Control bytes are ASCII, so the run boundary is always a char boundary.
        out.push_str(&s[run_start..i]);

        if b == 0x1b && bytes.get(i + 1) == Some(&b'[') {
            i += 2;
            while i < len {
                let c = bytes[i];
                i += 1;
                if (0x40..=0x7e).contains(&c) {
                    break;
                }
            }
        } else if b == 0x1b && bytes.get(i + 1) == Some(&b']') {
            i += 2;
            while i < len {
                if bytes[i] == 0x07 {
                    i += 1;
                    break;
                }
                if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                    i += 2;
                    break;
                }
                i += 1;
            }
        } else {
            i += 1;
        }
        run_start = i;
    }
    out.push_str(&s[run_start..]);

    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_strip_invalid_xml_chars_clean_input_borrowed() {
        let input = b"<rss version=\"2.0\">\n\t<channel/>\r\n</rss>";
        let result = strip_invalid_xml_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(&*result, &input[..]);
    }

    #[test]
    fn test_strip_invalid_xml_chars_removes_forbidden_ranges() {
        let input = b"a\x00b\x08c\x0bd\x0ce\x0ef\x1fg";
        assert_eq!(&*strip_invalid_xml_chars(input), b"abcdefg");
    }

    #[test]
    fn test_strip_invalid_xml_chars_keeps_whitespace() {
        let input = b"\x01line\tone\nline two\r\n";
        assert_eq!(&*strip_invalid_xml_chars(input), b"line\tone\nline two\r\n");
    }

    #[test]
    fn test_strip_invalid_xml_chars_keeps_multibyte_utf8() {
        let input = "日本\u{1}語".as_bytes();
        assert_eq!(&*strip_invalid_xml_chars(input), "日本語".as_bytes());
    }

    #[test]
    fn test_strip_invalid_xml_chars_passes_invalid_utf8_through() {
        let input = b"\xff\xfe\x02<x/>";
        assert_eq!(&*strip_invalid_xml_chars(input), b"\xff\xfe<x/>");
    }

    #[test]
    fn test_sanitize_xml_text() {
        assert_eq!(sanitize_xml_text("ti\u{1}tle\u{1f}"), "title");
        assert!(matches!(sanitize_xml_text("clean"), Cow::Borrowed(_)));
        // DEL is legal XML and is left alone
        assert_eq!(sanitize_xml_text("a\u{7f}b"), "a\u{7f}b");
    }

    proptest! {
        #[test]
        fn prop_sanitized_bytes_never_contain_forbidden(raw in proptest::collection::vec(any::<u8>(), 0..256)) {
            let cleaned = strip_invalid_xml_chars(&raw);
            prop_assert!(cleaned.iter().all(|&b| !is_invalid_xml_byte(b)));
        }

        #[test]
        fn prop_sanitized_text_never_contains_forbidden(text in any::<String>()) {
            let cleaned = sanitize_xml_text(&text);
            prop_assert!(!cleaned.bytes().any(is_invalid_xml_byte));
        }
    }

    #[test]
    fn test_truncation() {
        assert_eq!(truncate_to_width("Hello World", 8), "Hello...");
        assert_eq!(truncate_to_width("Short", 10), "Short");
        assert_eq!(truncate_to_width("12345", 5), "12345");
        assert_eq!(truncate_to_width("Testing", 4), "T...");
    }

    #[test]
    fn test_truncation_narrow_widths() {
        assert_eq!(truncate_to_width("Test", 0), "");
        assert_eq!(truncate_to_width("Test", 1), "T");
        assert_eq!(truncate_to_width("Test", 3), "Tes");
        assert_eq!(truncate_to_width("你好", 1), "");
        assert_eq!(truncate_to_width("你好", 3), "你");
    }

    #[test]
    fn test_truncation_cjk() {
        assert_eq!(truncate_to_width("你好世界", 7), "你好...");
        assert_eq!(truncate_to_width("你好世界", 5), "你...");
    }

    #[test]
    fn test_strip_control_chars_clean_borrowed() {
        let input = "line1\nline2\ttabbed\r\n";
        assert!(matches!(strip_control_chars(input), Cow::Borrowed(_)));
    }

    #[test]
    fn test_strip_control_chars_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_control_chars("\x1b]0;title\x07safe"), "safe");
        assert_eq!(strip_control_chars("\x1b]0;title\x1b\\safe"), "safe");
        assert_eq!(strip_control_chars("a\x1bb\x7fc\x00d"), "abcd");
        assert_eq!(strip_control_chars("日本 \x1b[1m語\x1b[0m"), "日本 語");
    }
}
