#![forbid(unsafe_code)]

//! Entity escaping for C14N output.
//!
//! - Text: `&` → `&amp;`, `<` → `&lt;`, `>` → `&gt;`, `\r` → `&#xD;`
//! - Attribute values: `&`, `<`, `"`, `\t`, `\n` and `\r`
//! - PI data: `\r` → `&#xD;`
//!
//! All helpers append to a byte buffer so the canonicalizer can assemble
//! one event's output without intermediate strings.

/// Append text content escaped per C14N rules.
pub fn push_text(out: &mut Vec<u8>, s: &str) {
    push_escaped(out, s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '>' => Some("&gt;"),
        '\r' => Some("&#xD;"),
        _ => None,
    });
}

/// Append an attribute value escaped per C14N rules.
pub fn push_attr(out: &mut Vec<u8>, s: &str) {
    push_escaped(out, s, |ch| match ch {
        '&' => Some("&amp;"),
        '<' => Some("&lt;"),
        '"' => Some("&quot;"),
        '\t' => Some("&#x9;"),
        '\n' => Some("&#xA;"),
        '\r' => Some("&#xD;"),
        _ => None,
    });
}

/// Append processing-instruction data.
pub fn push_pi(out: &mut Vec<u8>, s: &str) {
    push_escaped(out, s, |ch| (ch == '\r').then_some("&#xD;"));
}

fn push_escaped(out: &mut Vec<u8>, s: &str, entity: impl Fn(char) -> Option<&'static str>) {
    let mut start = 0;
    for (i, ch) in s.char_indices() {
        if let Some(replacement) = entity(ch) {
            out.extend_from_slice(s[start..i].as_bytes());
            out.extend_from_slice(replacement.as_bytes());
            start = i + ch.len_utf8();
        }
    }
    out.extend_from_slice(s[start..].as_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> String {
        let mut out = Vec::new();
        push_text(&mut out, s);
        String::from_utf8(out).unwrap()
    }

    fn attr(s: &str) -> String {
        let mut out = Vec::new();
        push_attr(&mut out, s);
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_escape_text() {
        assert_eq!(text("hello"), "hello");
        assert_eq!(text("a&b<c>d"), "a&amp;b&lt;c&gt;d");
        assert_eq!(text("line\rend"), "line&#xD;end");
        assert_eq!(text("quote\"tab\t"), "quote\"tab\t");
    }

    #[test]
    fn test_escape_attr() {
        assert_eq!(attr("hello"), "hello");
        assert_eq!(attr("a&b\"c>"), "a&amp;b&quot;c>");
        assert_eq!(attr("a\tb\nc\rd"), "a&#x9;b&#xA;c&#xD;d");
    }

    #[test]
    fn test_escape_keeps_multibyte() {
        assert_eq!(text("åäö<ü"), "åäö&lt;ü");
        let mut out = Vec::new();
        push_pi(&mut out, "x\ry");
        assert_eq!(out, b"x&#xD;y");
    }
}
