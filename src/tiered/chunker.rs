//! Fixed-size text splitting with overlap

/// Splits text into overlapping chunks of at most `chunk_size` characters.
///
/// A chunk that would cut the text mid-way is shortened to its last space when
/// that space lies beyond 80% of the chunk, so most chunks end on a word
/// boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Default for TextSplitter {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

impl TextSplitter {
    /// `chunk_overlap` is clamped below `chunk_size` so splitting always advances
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    pub fn split_text(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let soft_break = self.chunk_size * 4 / 5;
        let mut chunks = Vec::new();

        let mut start = 0;
        while start < chars.len() {
            let end = (start + self.chunk_size).min(chars.len());
            let mut window = &chars[start..end];
            let mut advance = step;

            if end < chars.len() {
                if let Some(last_space) = window.iter().rposition(|c| *c == ' ') {
                    if last_space > soft_break {
                        window = &window[..last_space];
                        // resume from the shortened end so no text is skipped
                        advance = last_space.saturating_sub(self.chunk_overlap).max(1);
                    }
                }
            }

            chunks.push(window.iter().collect());
            start += advance;
        }

        chunks
    }
}
