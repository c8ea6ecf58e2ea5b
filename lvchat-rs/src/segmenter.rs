//! Sentence segmentation for streamed and complete model output.
//!
//! A sentence ends at `.`, `!` or `?` followed by whitespace. Streamed text
//! arrives in arbitrary fragments, so a terminal mark sitting at the very end
//! of the buffer is held until the next fragment (or [`SentenceSegmenter::flush`])
//! shows whether it really closes the sentence. That keeps `3.5` or `e.g.`
//! split across fragments intact and makes incremental feeding produce exactly
//! what [`split_sentences`] produces for the final text.
//!
//! Sentences are returned verbatim: the whitespace that separates two
//! sentences is carried at the start of the second one. Callers trim before
//! speaking.

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

/// Byte offsets just past every terminal mark that is followed by whitespace.
fn boundaries(text: &str) -> Vec<usize> {
    let mut cuts = Vec::new();
    let mut chars = text.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        if !is_terminal(c) {
            continue;
        }
        if let Some(&(_, next)) = chars.peek() {
            if next.is_whitespace() {
                cuts.push(i + c.len_utf8());
            }
        }
    }
    cuts
}

/// Split complete text into sentences in one pass.
///
/// Empty and whitespace-only pieces are dropped.
pub fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut start = 0;
    for cut in boundaries(text) {
        push_non_blank(&mut sentences, &text[start..cut]);
        start = cut;
    }
    push_non_blank(&mut sentences, &text[start..]);
    sentences
}

fn push_non_blank(out: &mut Vec<String>, piece: &str) {
    if !piece.trim().is_empty() {
        out.push(piece.to_string());
    }
}

/// Incremental splitter over a growing text buffer.
#[derive(Debug, Default)]
pub struct SentenceSegmenter {
    buffer: String,
}

impl SentenceSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a fragment and return every sentence completed so far.
    /// Unfinished trailing text stays buffered.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);

        let cuts = boundaries(&self.buffer);
        let Some(&last) = cuts.last() else {
            return Vec::new();
        };

        let mut sentences = Vec::with_capacity(cuts.len());
        let mut start = 0;
        for cut in cuts {
            push_non_blank(&mut sentences, &self.buffer[start..cut]);
            start = cut;
        }
        self.buffer.drain(..last);
        sentences
    }

    /// End of stream: return whatever is left, unless it is blank.
    pub fn flush(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    /// Text received but not yet emitted.
    pub fn pending(&self) -> &str {
        &self.buffer
    }
}
