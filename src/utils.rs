// ABOUTME: Shared text helpers for platform adapters.
// ABOUTME: Splits long replies into platform-sized chunks at line and word boundaries.

/// Split long text into chunks of at most `max_bytes`, preferring line breaks,
/// then word breaks, then raw character boundaries.
pub fn chunk_message(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes || max_bytes == 0 {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        // If adding this line would exceed limit, save current chunk
        if !current.is_empty() && current.len() + line.len() + 1 > max_bytes {
            chunks.push(current.trim().to_string());
            current = String::new();
        }

        if line.len() <= max_bytes {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            continue;
        }

        // Line alone is too long: flush and split it at word boundaries
        if !current.is_empty() {
            chunks.push(current.trim().to_string());
            current = String::new();
        }
        let mut line_part = String::new();
        for word in line.split_whitespace() {
            for piece in split_word(word, max_bytes) {
                if !line_part.is_empty() && line_part.len() + piece.len() + 1 > max_bytes {
                    chunks.push(std::mem::take(&mut line_part));
                }
                if !line_part.is_empty() {
                    line_part.push(' ');
                }
                line_part.push_str(piece);
            }
        }
        current = line_part;
    }

    if !current.trim().is_empty() {
        chunks.push(current.trim().to_string());
    }
    chunks.retain(|c| !c.is_empty());
    chunks
}

/// Break a single word longer than `max_bytes` on char boundaries
fn split_word(word: &str, max_bytes: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = word;
    while rest.len() > max_bytes {
        let mut cut = max_bytes;
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        if cut == 0 {
            // max_bytes smaller than one char: emit the char whole
            cut = rest.chars().next().map(char::len_utf8).unwrap_or(rest.len());
        }
        pieces.push(&rest[..cut]);
        rest = &rest[cut..];
    }
    if !rest.is_empty() {
        pieces.push(rest);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        assert_eq!(chunk_message("hello", 100), vec!["hello"]);
    }

    #[test]
    fn test_splits_at_line_boundaries() {
        let text = "first line\nsecond line\nthird line";
        let chunks = chunk_message(text, 22);
        assert_eq!(chunks, vec!["first line\nsecond line", "third line"]);
    }

    #[test]
    fn test_long_line_splits_at_words() {
        let text = "alpha beta gamma delta epsilon";
        let chunks = chunk_message(text, 12);
        assert!(chunks.iter().all(|c| c.len() <= 12), "{chunks:?}");
        assert_eq!(chunks.join(" "), text);
    }

    #[test]
    fn test_overlong_word_is_hard_split() {
        let text = "x".repeat(25);
        let chunks = chunk_message(&text, 10);
        assert_eq!(chunks.len(), 3);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn test_multibyte_words_split_on_char_boundaries() {
        let text = "é".repeat(10);
        let chunks = chunk_message(&text, 5);
        assert!(chunks.iter().all(|c| c.len() <= 5));
        assert_eq!(chunks.concat(), text);
    }
}
