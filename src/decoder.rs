//! Frame decoder: raw byte chunks in, complete text lines out.
//!
//! Chunks may split a line, a `\r\n` pair, or a multi-byte UTF-8 code point
//! anywhere. The decoder carries the unfinished tail of each across calls and
//! only yields a line once its `\n` has been seen (or [`FrameDecoder::finish`]
//! is called). Invalid byte sequences become U+FFFD; decoding never fails.

const REPLACEMENT: char = '\u{FFFD}';

#[derive(Debug, Default)]
pub struct FrameDecoder {
    /// Bytes of a code point that was cut off at the end of the last chunk.
    pending: Vec<u8>,
    /// Text of the current, not yet terminated line.
    line: String,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk, returning every line it completed, in order.
    ///
    /// Returned lines carry neither the `\n` nor a trailing `\r`.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(chunk);

        let mut lines = Vec::new();
        let mut rest = &bytes[..];
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    self.push_text(valid, &mut lines);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    if let Ok(text) = std::str::from_utf8(valid) {
                        self.push_text(text, &mut lines);
                    }
                    match e.error_len() {
                        Some(bad) => {
                            self.push_text(&REPLACEMENT.to_string(), &mut lines);
                            rest = &after[bad..];
                        }
                        None => {
                            // Truncated code point at the end of the chunk.
                            self.pending = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        lines
    }

    /// Signal end of stream. Yields the buffered partial line, if any.
    ///
    /// A dangling incomplete code point is flushed as U+FFFD first. After this
    /// the decoder is empty and may be reused.
    pub fn finish(&mut self) -> Option<String> {
        if !self.pending.is_empty() {
            self.pending.clear();
            self.line.push(REPLACEMENT);
        }
        if self.line.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.line);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }

    /// True when nothing is buffered.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty() && self.line.is_empty()
    }

    fn push_text(&mut self, text: &str, lines: &mut Vec<String>) {
        let mut segments = text.split('\n');
        // `split` always yields at least one segment.
        if let Some(first) = segments.next() {
            self.line.push_str(first);
        }
        for segment in segments {
            let mut done = std::mem::replace(&mut self.line, segment.to_string());
            if done.ends_with('\r') {
                done.pop();
            }
            lines.push(done);
        }
    }
}

/// Decode a whole byte buffer in one go. Equivalent to a single `feed`
/// followed by `finish`.
pub fn decode_all(bytes: &[u8]) -> Vec<String> {
    let mut decoder = FrameDecoder::new();
    let mut lines = decoder.feed(bytes);
    lines.extend(decoder.finish());
    lines
}
