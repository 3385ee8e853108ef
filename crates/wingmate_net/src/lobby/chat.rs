//! Chat text rules and the typing banner.

use wingmate_shared::constants::TYPING_BANNER_NAMES;

/// Name the local peer appears under in typing lists.
pub const LOCAL_TYPING_NAME: &str = "You";

/// Trims `text` and caps it at `max_chars` characters.
///
/// Returns `None` for empty or whitespace-only text. Senders and receivers both
/// apply this, so a peer that skips it on send is still cleaned up on receipt.
#[must_use]
pub fn prepare_chat(text: &str, max_chars: usize) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.chars().take(max_chars).collect())
}

/// One-line summary of who is typing, or `None` when nobody is.
///
/// ```text
/// ["Ana"]                      -> "Ana is typing..."
/// ["You"]                      -> "You are typing..."
/// ["Ana", "Bo"]                -> "Ana, Bo are typing..."
/// ["Ana", "Bo", "Cy", "Di"]    -> "Ana, Bo, Cy and others are typing..."
/// ```
#[must_use]
pub fn typing_banner<S: AsRef<str>>(names: &[S]) -> Option<String> {
    let first = names.first()?;
    let shown = names.len().min(TYPING_BANNER_NAMES);
    let mut banner = names[..shown]
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<_>>()
        .join(", ");

    if names.len() > TYPING_BANNER_NAMES {
        banner.push_str(" and others");
    }
    if names.len() == 1 && first.as_ref() != LOCAL_TYPING_NAME {
        banner.push_str(" is typing...");
    } else {
        banner.push_str(" are typing...");
    }
    Some(banner)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_is_trimmed_and_truncated() {
        assert_eq!(prepare_chat("  hello  ", 128).as_deref(), Some("hello"));
        assert_eq!(prepare_chat(" \t\n ", 128), None);
        assert_eq!(prepare_chat("", 128), None);
        let long = "a".repeat(200);
        assert_eq!(prepare_chat(&long, 128).map(|s| s.len()), Some(128));
    }

    #[test]
    fn test_truncation_counts_characters_not_bytes() {
        let text = "ß".repeat(130);
        let prepared = prepare_chat(&text, 128).unwrap();
        assert_eq!(prepared.chars().count(), 128);
    }

    #[test]
    fn test_banner_grammar() {
        assert_eq!(typing_banner::<&str>(&[]), None);
        assert_eq!(typing_banner(&["Ana"]).as_deref(), Some("Ana is typing..."));
        assert_eq!(typing_banner(&["You"]).as_deref(), Some("You are typing..."));
        assert_eq!(
            typing_banner(&["Ana", "Bo", "Cy"]).as_deref(),
            Some("Ana, Bo, Cy are typing...")
        );
        assert_eq!(
            typing_banner(&["Ana", "Bo", "Cy", "Di"]).as_deref(),
            Some("Ana, Bo, Cy and others are typing...")
        );
    }
}
