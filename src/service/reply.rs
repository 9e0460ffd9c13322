//! Assistant reply and its fragment view

use serde::Serialize;

/// Text returned to the caller for one turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reply {
    pub text: String,
    /// True when the text is a canned message rather than model output
    pub degraded: bool,
}

impl Reply {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            degraded: false,
        }
    }

    pub fn degraded(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            degraded: true,
        }
    }

    /// Finite sequence of fragments of at most `max_chars` characters.
    ///
    /// Each call starts from the beginning; concatenating the fragments
    /// yields the full text.
    pub fn fragments(&self, max_chars: usize) -> Fragments<'_> {
        Fragments {
            rest: &self.text,
            max_chars: max_chars.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Fragments<'a> {
    rest: &'a str,
    max_chars: usize,
}

impl<'a> Iterator for Fragments<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.rest.is_empty() {
            return None;
        }
        let cut = self
            .rest
            .char_indices()
            .nth(self.max_chars)
            .map_or(self.rest.len(), |(i, _)| i);
        let (head, tail) = self.rest.split_at(cut);
        self.rest = tail;
        Some(head)
    }
}
