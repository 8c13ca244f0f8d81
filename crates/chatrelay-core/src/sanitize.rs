//! Normalization applied to every inbound text field before it is stored
//! or broadcast.
//!
//! 1. Trim leading/trailing ASCII whitespace.
//! 2. Map `\n`, `\r`, `\t` to a single space.
//! 3. Drop every other code point below U+0020.
//! 4. Bound the result to `max` code points.
//! 5. HTML-escape `& < > " '`.
//!
//! The bound in step 4 is applied to the escaped output: characters are
//! taken in order and kept only while their escaped form still fits, so an
//! entity reference is never cut in half and the returned string is never
//! longer than `max` code points.

/// Sanitize `input`, returning at most `max` code points of escaped text.
pub fn sanitize(input: &str, max: usize) -> String {
    let trimmed = input.trim_matches(|c: char| c.is_ascii_whitespace());

    let mut out = String::with_capacity(trimmed.len().min(max.saturating_mul(4)));
    let mut used = 0usize;

    for c in trimmed.chars().filter_map(normalize_char) {
        let piece = escape_char(c);
        let width = piece.chars().count();
        if used + width > max {
            break;
        }
        out.push_str(&piece);
        used += width;
    }

    out
}

fn normalize_char(c: char) -> Option<char> {
    match c {
        '\n' | '\r' | '\t' => Some(' '),
        c if (c as u32) < 0x20 => None,
        c => Some(c),
    }
}

fn escape_char(c: char) -> std::borrow::Cow<'static, str> {
    match c {
        '&' => "&amp;".into(),
        '<' => "&lt;".into(),
        '>' => "&gt;".into(),
        '"' => "&#34;".into(),
        '\'' => "&#39;".into(),
        c => c.to_string().into(),
    }
}
