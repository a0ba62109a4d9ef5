//! Bounded sliding window over recent subprocess output.

use std::collections::VecDeque;
use std::sync::LazyLock;

use regex::Regex;

/// Default number of non-blank lines kept for pattern detection.
pub const DEFAULT_WINDOW_LINES: usize = 50;

/// CSI sequences (colors, cursor movement) and OSC sequences (titles, links).
static ANSI_ESCAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .unwrap()
});

/// Recent non-blank output lines, oldest first.
///
/// Output arrives in arbitrary chunks, so a line may be split across chunks.
/// The unterminated tail is kept as `partial` and is part of [`lines`](Self::lines),
/// which lets prompts that wait on the same line (`Allow? [y/n] `) be detected.
#[derive(Debug, Clone)]
pub struct OutputWindow {
    lines: VecDeque<String>,
    partial: String,
    capacity: usize,
}

impl OutputWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            partial: String::new(),
            capacity: capacity.max(1),
        }
    }

    /// Append a chunk of raw output.
    pub fn push_chunk(&mut self, chunk: &str) {
        let mut segments = chunk.split('\n');
        if let Some(first) = segments.next() {
            self.partial.push_str(first);
        }
        for segment in segments {
            let completed = std::mem::replace(&mut self.partial, segment.to_string());
            self.push_line(&completed);
        }
    }

    /// Snapshot of the window, including the unterminated tail if it has content.
    pub fn lines(&self) -> Vec<String> {
        let mut snapshot: Vec<String> = self.lines.iter().cloned().collect();
        let tail = clean(&self.partial);
        if !tail.trim().is_empty() {
            snapshot.push(tail);
            if snapshot.len() > self.capacity {
                snapshot.remove(0);
            }
        }
        snapshot
    }

    pub fn clear(&mut self) {
        self.lines.clear();
        self.partial.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty() && self.partial.trim().is_empty()
    }

    fn push_line(&mut self, raw: &str) {
        let line = clean(raw);
        if line.trim().is_empty() {
            return;
        }
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }
}

fn clean(raw: &str) -> String {
    let stripped = ANSI_ESCAPE.replace_all(raw, "");
    stripped.trim_end_matches('\r').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_only_non_blank_lines() {
        let mut window = OutputWindow::new(10);
        window.push_chunk("first\n\n   \nsecond\n");
        assert_eq!(window.lines(), vec!["first", "second"]);
    }

    #[test]
    fn joins_lines_split_across_chunks() {
        let mut window = OutputWindow::new(10);
        window.push_chunk("Allow this ");
        window.push_chunk("tool? [y/n]\nnext");
        assert_eq!(window.lines(), vec!["Allow this tool? [y/n]", "next"]);
    }

    /// A prompt waiting for input on the same line is visible before its newline.
    #[test]
    fn unterminated_tail_is_visible() {
        let mut window = OutputWindow::new(10);
        window.push_chunk("Do you want to allow this? (y/n) ");
        assert_eq!(window.lines(), vec!["Do you want to allow this? (y/n) "]);
    }

    #[test]
    fn drops_oldest_over_capacity() {
        let mut window = OutputWindow::new(3);
        for i in 0..5 {
            window.push_chunk(&format!("line {i}\n"));
        }
        window.push_chunk("tail");
        assert_eq!(window.lines(), vec!["line 3", "line 4", "tail"]);
    }

    #[test]
    fn strips_ansi_and_carriage_returns() {
        let mut window = OutputWindow::new(10);
        window.push_chunk("\x1b[1;33mAllow this tool?\x1b[0m [y/n]\r\n");
        assert_eq!(window.lines(), vec!["Allow this tool? [y/n]"]);
    }

    #[test]
    fn clear_discards_lines_and_tail() {
        let mut window = OutputWindow::new(10);
        window.push_chunk("one\ntwo");
        assert!(!window.is_empty());
        window.clear();
        assert!(window.is_empty());
        assert!(window.lines().is_empty());
    }
}
