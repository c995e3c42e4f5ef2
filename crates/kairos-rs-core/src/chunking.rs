//! Splitting long replies to fit the messenger's per-message limit.

/// Split `text` into pieces of at most `max_chars` characters.
///
/// Each cut prefers, in order, a paragraph break, a line break, a sentence
/// end, then a space, and falls back to a hard cut. Pieces are trimmed and
/// empty pieces are dropped.
pub fn chunk_message(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text.trim();

    while !rest.is_empty() {
        if rest.chars().count() <= max_chars {
            chunks.push(rest.to_string());
            break;
        }
        let limit = byte_offset(rest, max_chars);
        let window = &rest[..limit];
        let cut = best_cut(window).unwrap_or(limit);
        let piece = rest[..cut].trim();
        if !piece.is_empty() {
            chunks.push(piece.to_string());
        }
        rest = rest[cut..].trim_start();
    }
    chunks
}

/// Byte offset of the `chars`-th character.
fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len())
}

/// End of the preferred break inside `window`, never at offset zero.
fn best_cut(window: &str) -> Option<usize> {
    if let Some(idx) = window.rfind("\n\n").filter(|idx| *idx > 0) {
        return Some(idx);
    }
    if let Some(idx) = window.rfind('\n').filter(|idx| *idx > 0) {
        return Some(idx);
    }
    let sentence_end = [". ", "! ", "? "]
        .iter()
        .filter_map(|marker| window.rfind(marker))
        .max();
    if let Some(idx) = sentence_end {
        return Some(idx + 1);
    }
    window.rfind(' ').filter(|idx| *idx > 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(chunk_message("  hello  ", 10), vec!["hello"]);
        assert!(chunk_message("   ", 10).is_empty());
    }

    #[test]
    fn prefers_paragraph_then_sentence_breaks() {
        let text = "First para.\n\nSecond para is longer.";
        assert_eq!(
            chunk_message(text, 20),
            vec!["First para.", "Second para is", "longer."]
        );
        assert_eq!(
            chunk_message("One. Two three four.", 12),
            vec!["One.", "Two three", "four."]
        );
    }

    #[test]
    fn hard_cuts_unbroken_runs_on_char_boundaries() {
        let chunks = chunk_message("ééééé", 2);
        assert_eq!(chunks, vec!["éé", "éé", "é"]);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 2);
        }
    }
}
