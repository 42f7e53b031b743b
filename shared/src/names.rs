//! Display-name normalization.
//!
//! Player names in the log carry color markup (`^1`, `^7`, ...) and
//! decorative brackets or symbols that vary between the chat feed, the
//! userinfo feed and the status roster. The normalized form is the join
//! key everything else agrees on: markup stripped, case folded, and all
//! non-alphanumeric characters removed.

/// Normalizes a raw display name into the log join key.
///
/// Returns an empty string for names that carry no usable characters;
/// callers must reject empty keys.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars().peekable();

    while let Some(c) = chars.next() {
        // A caret swallows the following character, whatever it is.
        if c == '^' {
            chars.next();
            continue;
        }
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        }
    }

    out
}

/// Strips a single trailing color code (`^x`) left on roster names.
pub fn strip_trailing_color(raw: &str) -> &str {
    let trimmed = raw.trim();
    let mut chars = trimmed.char_indices().rev();
    if let (Some(_), Some((idx, '^'))) = (chars.next(), chars.next()) {
        return trimmed[..idx].trim_end();
    }
    trimmed
}
