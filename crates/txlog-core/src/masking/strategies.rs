// ABOUTME: String masking strategies for full, partial, and email redaction
// ABOUTME: Character-aware helpers that never reveal an entire value
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 txlog contributors

use crate::constants::masking::{MASK_CHAR, REDACTION_TOKEN, SENSITIVE_HEADERS};

/// Replace the whole value with the fixed-width redaction token
#[must_use]
pub fn full_mask(_value: &str) -> String {
    REDACTION_TOKEN.to_owned()
}

/// Keep `show_first` leading and `show_last` trailing characters and replace
/// every interior character with `*`.
///
/// At most `len - 1` characters are ever revealed: when the requested reveal
/// covers the whole value, `show_last` shrinks first, then `show_first`.
///
/// ```
/// use txlog_core::masking::partial_mask;
///
/// assert_eq!(partial_mask("abcdefgh", 2, 2), "ab****gh");
/// assert_eq!(partial_mask("abc", 2, 2), "ab*");
/// ```
#[must_use]
pub fn partial_mask(value: &str, show_first: usize, show_last: usize) -> String {
    let chars: Vec<char> = value.chars().collect();
    if chars.is_empty() {
        return String::new();
    }
    let (first, last) = clamp_reveal(chars.len(), show_first, show_last);
    let hidden = chars.len() - first - last;

    let mut masked = String::with_capacity(value.len());
    masked.extend(&chars[..first]);
    masked.extend(std::iter::repeat(MASK_CHAR).take(hidden));
    masked.extend(&chars[chars.len() - last..]);
    masked
}

/// Mask the username half of an email address and keep the domain verbatim.
///
/// The username keeps `show_first` leading and `show_last` trailing characters
/// around the fixed-width redaction token, so the masked form does not leak the
/// username length. Single-character usernames become the bare token. Values
/// without `@` fall back to [`partial_mask`].
///
/// ```
/// use txlog_core::masking::email_mask;
///
/// assert_eq!(email_mask("ana.banana@example.com", 2, 2), "an*******na@example.com");
/// assert_eq!(email_mask("a@x.y", 2, 2), "*******@x.y");
/// ```
#[must_use]
pub fn email_mask(value: &str, show_first: usize, show_last: usize) -> String {
    let Some(at) = value.rfind('@') else {
        return partial_mask(value, show_first, show_last);
    };
    let (username, domain_with_at) = value.split_at(at);
    let chars: Vec<char> = username.chars().collect();

    if chars.len() <= 1 {
        return format!("{REDACTION_TOKEN}{domain_with_at}");
    }

    let (first, last) = clamp_reveal(chars.len(), show_first, show_last);
    let mut masked = String::with_capacity(value.len() + REDACTION_TOKEN.len());
    masked.extend(&chars[..first]);
    masked.push_str(REDACTION_TOKEN);
    masked.extend(&chars[chars.len() - last..]);
    masked.push_str(domain_with_at);
    masked
}

/// Redact the values of sensitive HTTP headers.
///
/// Header names are compared case-insensitively; non-sensitive headers pass
/// through unchanged and in order.
pub fn mask_headers<'a, I>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            let value = if SENSITIVE_HEADERS.contains(&lowered.as_str()) {
                REDACTION_TOKEN.to_owned()
            } else {
                value.to_owned()
            };
            (name.to_owned(), value)
        })
        .collect()
}

/// Limit the reveal so at least one character of `len` stays hidden
fn clamp_reveal(len: usize, show_first: usize, show_last: usize) -> (usize, usize) {
    let budget = len.saturating_sub(1);
    let mut first = show_first.min(budget);
    let mut last = show_last.min(budget);
    if first + last > budget {
        let excess = first + last - budget;
        let from_last = excess.min(last);
        last -= from_last;
        first -= excess - from_last;
    }
    (first, last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_mask_keeps_edges() {
        assert_eq!(partial_mask("abcdefgh", 2, 2), "ab****gh");
        assert_eq!(partial_mask("abcdefgh", 0, 0), "********");
        assert_eq!(partial_mask("abcdefgh", 3, 0), "abc*****");
    }

    #[test]
    fn partial_mask_never_reveals_everything() {
        assert_eq!(partial_mask("abcd", 2, 2), "ab*d");
        assert_eq!(partial_mask("ab", 5, 5), "a*");
        assert_eq!(partial_mask("a", 1, 1), "*");
        assert_eq!(partial_mask("", 1, 1), "");
    }

    #[test]
    fn partial_mask_is_character_aware() {
        assert_eq!(partial_mask("ñandú", 1, 1), "ñ***ú");
    }

    #[test]
    fn email_mask_preserves_domain() {
        assert_eq!(
            email_mask("ana.banana@example.com", 2, 2),
            "an*******na@example.com"
        );
    }

    #[test]
    fn email_mask_single_char_username() {
        let masked = email_mask("a@x.y", 2, 2);
        assert!(masked.ends_with("@x.y"));
        let username = masked.trim_end_matches("@x.y");
        assert!(!username.contains('@'));
        assert_eq!(username, REDACTION_TOKEN);
    }

    #[test]
    fn email_mask_short_username_degrades() {
        assert_eq!(email_mask("ab@x.y", 2, 2), "a*******@x.y");
    }

    #[test]
    fn email_mask_without_at_falls_back_to_partial() {
        assert_eq!(email_mask("abcdef", 1, 1), "a****f");
    }

    #[test]
    fn full_mask_is_fixed_width() {
        assert_eq!(full_mask("x"), REDACTION_TOKEN);
        assert_eq!(full_mask("a much longer secret value"), REDACTION_TOKEN);
    }

    #[test]
    fn sensitive_headers_are_redacted() {
        let headers = [
            ("Authorization", "Bearer secret"),
            ("Content-Type", "application/json"),
        ];
        let masked = mask_headers(headers);
        assert_eq!(masked[0].1, REDACTION_TOKEN);
        assert_eq!(masked[1].1, "application/json");
    }
}
