//! Output capture helpers.
//!
//! A job can print for an hour; only the tail is worth keeping on the
//! execution record. [`LineBuffer`] keeps the most recent N lines, and
//! [`truncate_text`] bounds free-text fields such as error messages.

use std::collections::VecDeque;

/// Keeps the most recent `capacity` lines, discarding the oldest.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: VecDeque<String>,
    capacity: usize,
    seen: usize,
}

impl LineBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
            seen: 0,
        }
    }

    pub fn push(&mut self, line: String) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
        self.seen += 1;
    }

    /// Total lines pushed, including evicted ones.
    pub fn seen(&self) -> usize {
        self.seen
    }

    pub fn into_lines(self) -> Vec<String> {
        self.lines.into()
    }
}

/// Decode one raw output line: lossy UTF-8, ANSI escapes stripped, trailing
/// whitespace and line terminators removed.
pub fn clean_line(raw: &[u8]) -> String {
    let stripped = strip_ansi_escapes::strip(raw);
    String::from_utf8_lossy(&stripped).trim_end().to_string()
}

/// Truncate `text` to at most `max_chars` characters using middle-omission.
///
/// The head usually names what failed and the tail says how, so both are
/// kept:
///
/// ```text
/// <first max_chars/2 chars> … [N chars omitted] … <last max_chars/2 chars>
/// ```
///
/// Splits on character boundaries, never inside a multi-byte sequence.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.len() <= max_chars {
        return text.to_owned();
    }

    let chars: Vec<char> = text.chars().collect();
    let total = chars.len();
    if total <= max_chars {
        return text.to_owned();
    }

    let half = max_chars / 2;
    let head: String = chars[..half].iter().collect();
    let tail: String = chars[total - half..].iter().collect();
    let omitted = total - 2 * half;

    format!("{head} … [{omitted} chars omitted] … {tail}")
}
