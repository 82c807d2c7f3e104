//! Folds text deltas for one attempt into a single growing string.

use crate::event::StreamEvent;

/// The accumulated answer after a delta has been applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Accumulated<'a> {
    /// Every delta so far, concatenated in arrival order.
    pub text: &'a str,
    /// True only for the output of the very first delta.
    pub is_first: bool,
}

/// Per-attempt accumulator state. Dropped when the attempt ends.
#[derive(Debug, Default, Clone)]
pub struct Accumulator {
    has_started: bool,
    text: String,
    deltas: usize,
}

impl Accumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Only `TextDelta` produces a new value.
    pub fn apply(&mut self, event: &StreamEvent) -> Option<Accumulated<'_>> {
        let StreamEvent::TextDelta { delta } = event else {
            return None;
        };
        let is_first = !self.has_started;
        self.has_started = true;
        self.text.push_str(delta);
        self.deltas += 1;
        Some(Accumulated { text: &self.text, is_first })
    }

    pub fn has_started(&self) -> bool {
        self.has_started
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Number of deltas folded in so far.
    pub fn delta_count(&self) -> usize {
        self.deltas
    }
}
