//! Text chunking for speech synthesis.
//!
//! Words are packed greedily into chunks of at most `max_length` characters
//! (Unicode scalar values), joined by single spaces. A sentence's closing
//! period stays on its word and sentence ends never force a chunk break, so
//! words flow across sentences. Words are whitespace-delimited and never
//! split further: "end.Next", "1.1" and "e.g." each stay one word, and
//! rejoining the chunks with spaces gives back the original words. A single
//! word longer than `max_length` is emitted whole as its own chunk.

/// Split `text` into ordered chunks of at most `max_length` characters.
///
/// Pure and deterministic. Empty or whitespace-only input yields no chunks.
pub fn chunk_text(text: &str, max_length: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in words(text) {
        let word_len = word.chars().count();
        if current.is_empty() {
            current.push_str(word);
            current_len = word_len;
        } else if current_len + 1 + word_len <= max_length {
            current.push(' ');
            current.push_str(word);
            current_len += 1 + word_len;
        } else {
            chunks.push(std::mem::take(&mut current));
            current.push_str(word);
            current_len = word_len;
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

/// Words in reading order.
fn words(text: &str) -> impl Iterator<Item = &str> {
    text.split_whitespace()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_words_greedily() {
        assert_eq!(
            chunk_text("This is a test text", 10),
            vec!["This is a", "test text"]
        );
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk_text("", 10).is_empty());
        assert!(chunk_text("   \n\t ", 10).is_empty());
    }

    #[test]
    fn overlong_word_is_emitted_whole() {
        let chunks = chunk_text("a supercalifragilistic b", 5);
        assert_eq!(chunks, vec!["a", "supercalifragilistic", "b"]);
    }

    #[test]
    fn sentences_flow_into_one_chunk() {
        assert_eq!(chunk_text("One. Two. Three.", 200), vec!["One. Two. Three."]);
    }

    #[test]
    fn glued_periods_stay_inside_their_word() {
        assert_eq!(chunk_text("end.Next word", 200), vec!["end.Next word"]);
        assert_eq!(
            chunk_text("See Figure 1.1, e.g. here.", 12),
            vec!["See Figure", "1.1, e.g.", "here."]
        );
    }

    #[test]
    fn exact_fit_stays_in_chunk() {
        // "abcd efgh" is exactly 9 characters
        assert_eq!(chunk_text("abcd efgh ij", 9), vec!["abcd efgh", "ij"]);
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        // Each word is 4 chars but 8 bytes.
        let chunks = chunk_text("éééé éééé", 9);
        assert_eq!(chunks, vec!["éééé éééé"]);
    }

    #[test]
    fn deterministic() {
        let text = "The quick brown fox. Jumps over the lazy dog. Again and again.";
        assert_eq!(chunk_text(text, 17), chunk_text(text, 17));
    }

    #[test]
    fn rejoining_reconstructs_words_and_respects_limit() {
        let text = "Lorem ipsum dolor sit amet consectetur adipiscing elit sed do \
                    eiusmod tempor incididunt ut labore et dolore magna aliqua \
                    antidisestablishmentarianism ut enim.Ad minim veniam, e.g. \
                    Figure 2.3 and v1.2.3 shown.";
        let original: Vec<&str> = text.split_whitespace().collect();
        for max in 1..=60 {
            let chunks = chunk_text(text, max);
            let rejoined = chunks.join(" ");
            let words: Vec<&str> = rejoined.split_whitespace().collect();
            assert_eq!(words, original, "max={max}");
            for chunk in &chunks {
                let len = chunk.chars().count();
                assert!(
                    len <= max || !chunk.contains(' '),
                    "max={max}: chunk {chunk:?} is {len} chars"
                );
            }
        }
    }
}
