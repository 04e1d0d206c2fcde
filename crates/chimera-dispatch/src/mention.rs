//! Personality mention extraction.
//!
//! A mention is `@` followed by a name-or-alias token, anywhere in the
//! message. The first mention picks the responder; the marker itself is
//! removed from the text handed to the LLM so the model never sees the
//! addressing syntax.

/// Extract the first `@mention` token and return `(mention, remaining)`.
///
/// Platform user/role mentions (`<@123>`, `<@&456>`) are not personality
/// mentions and are skipped.
pub fn extract_mention(content: &str) -> Option<(String, String)> {
    let mut search_from = 0;
    while let Some(rel) = content[search_from..].find('@') {
        let at = search_from + rel;
        if content[..at].ends_with('<') {
            search_from = at + 1;
            continue;
        }
        let after = &content[at + 1..];
        let end = after
            .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-'))
            .unwrap_or(after.len());
        if end == 0 {
            // Bare '@' with no token.
            search_from = at + 1;
            continue;
        }

        let mention = after[..end].to_string();
        let mut remaining = String::with_capacity(content.len());
        remaining.push_str(content[..at].trim_end());
        let tail = after[end..].trim_start();
        if !remaining.is_empty() && !tail.is_empty() {
            remaining.push(' ');
        }
        remaining.push_str(tail);
        return Some((mention, remaining));
    }
    None
}
