/// Splits normalized text into bounded, overlapping segments on word
/// boundaries. Overlap preserves context for entity mentions spanning a cut
/// point.
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
}

impl Chunker {
    #[must_use]
    pub fn new(max_chars: usize, overlap_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            overlap_chars,
        }
    }

    /// Greedy word packing. No chunk exceeds `max_chars` except when a single
    /// word is itself longer than the budget, in which case that word becomes
    /// its own oversized chunk. Each chunk after the first begins with the
    /// longest whole-word suffix of the previous chunk that fits in
    /// `overlap_chars`.
    #[must_use]
    pub fn split(&self, text: &str) -> Vec<String> {
        let mut chunks: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut current_len = 0usize;

        for token in text.split_whitespace() {
            let token_len = token.chars().count();
            let needed = if current.is_empty() {
                token_len
            } else {
                current_len + 1 + token_len
            };

            if !current.is_empty() && needed > self.max_chars {
                chunks.push(std::mem::take(&mut current));

                // Leave room for the incoming token; an oversized token gets
                // no overlap and stands alone.
                let budget = self
                    .overlap_chars
                    .min(self.max_chars.saturating_sub(token_len + 1));
                current = overlap_suffix(chunks.last().map_or("", String::as_str), budget);
                current_len = current.chars().count();

                if !current.is_empty() {
                    current.push(' ');
                    current_len += 1;
                }
                current.push_str(token);
                current_len += token_len;
            } else {
                if !current.is_empty() {
                    current.push(' ');
                    current_len += 1;
                }
                current.push_str(token);
                current_len = needed;
            }
        }

        if !current.is_empty() {
            chunks.push(current);
        }

        tracing::debug!(
            chunks = chunks.len(),
            max_chars = self.max_chars,
            overlap = self.overlap_chars,
            "text chunked"
        );

        chunks
    }
}

/// The longest whole-word suffix of `text` fitting within `budget` chars.
fn overlap_suffix(text: &str, budget: usize) -> String {
    if budget == 0 {
        return String::new();
    }

    let mut suffix: Vec<&str> = Vec::new();
    let mut len = 0usize;

    for word in text.split(' ').rev() {
        let word_len = word.chars().count();
        let needed = if suffix.is_empty() {
            word_len
        } else {
            len + 1 + word_len
        };
        if needed > budget {
            break;
        }
        suffix.push(word);
        len = needed;
    }

    suffix.reverse();
    suffix.join(" ")
}
