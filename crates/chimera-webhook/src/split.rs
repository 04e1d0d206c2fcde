//! Splits long outbound replies at safe boundaries.
//!
//! Boundary preference per chunk: paragraph break, else a sentence end
//! within the last fifth of the window, else whitespace, else a hard cut on
//! a char boundary. Fenced code blocks survive splitting: an open fence is
//! closed before the chunk boundary and reopened (with its language tag) at
//! the start of the next chunk. The inserted sentinels are the only
//! difference between the concatenated chunks and the original text.

/// Reserved headroom per chunk for the close sentinel plus a reopen marker
/// with its language tag.
const FENCE_RESERVE: usize = 32;

pub fn split_message(text: &str, max: usize) -> Vec<String> {
    if text.len() <= max {
        return vec![text.to_string()];
    }

    let budget = max.saturating_sub(FENCE_RESERVE).max(1);
    let mut chunks = Vec::new();
    let mut fence: Option<String> = None;
    let mut rest = text;

    while !rest.is_empty() {
        let reopen = fence.as_ref().map(|lang| format!("```{lang}\n"));

        if rest.len() <= budget {
            let mut chunk = reopen.unwrap_or_default();
            chunk.push_str(rest);
            chunks.push(chunk);
            break;
        }

        let window_end = floor_char_boundary(rest, budget);
        let split_at = find_split(&rest[..window_end]).unwrap_or(window_end);
        let (head, tail) = rest.split_at(split_at);

        fence = track_fences(fence, head);

        let mut chunk = reopen.unwrap_or_default();
        chunk.push_str(head);
        if fence.is_some() {
            chunk.push_str("\n```");
        }
        chunks.push(chunk);
        rest = tail;
    }

    chunks
}

/// Best split position within the window, or `None` to hard-cut at its end.
fn find_split(window: &str) -> Option<usize> {
    // Paragraph break: split after it so the blank line stays with the head.
    if let Some(pos) = window.rfind("\n\n") {
        if pos > 0 {
            return Some(pos + 2);
        }
    }

    // Sentence end, but only inside the last 20% — an early sentence break
    // would fragment the output into shreds.
    let tail_start = window.len() * 4 / 5;
    let sentence = [". ", ".\n", "! ", "!\n", "? ", "?\n"]
        .iter()
        .filter_map(|pat| window.rfind(pat).map(|p| p + pat.len()))
        .max();
    if let Some(pos) = sentence {
        if pos > tail_start {
            return Some(pos);
        }
    }

    // Any whitespace, keeping the separator with the head.
    if let Some((pos, ch)) = window
        .char_indices()
        .rev()
        .find(|(_, c)| c.is_whitespace())
    {
        if pos > 0 {
            return Some(pos + ch.len_utf8());
        }
    }

    None
}

/// Walk `segment` line by line, toggling the open-fence state. Returns the
/// language of the fence left open at the end, if any.
fn track_fences(mut fence: Option<String>, segment: &str) -> Option<String> {
    for line in segment.split('\n') {
        let trimmed = line.trim_start();
        if let Some(after) = trimmed.strip_prefix("```") {
            fence = match fence {
                Some(_) => None,
                None => Some(after.trim().to_string()),
            };
        }
    }
    fence
}

fn floor_char_boundary(s: &str, mut index: usize) -> usize {
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}
