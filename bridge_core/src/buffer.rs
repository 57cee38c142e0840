//! Local edit buffer backed by ropey.
//!
//! Hosts that have no editing surface of their own (the terminal host, tests)
//! keep the user's text here and hand full snapshots to the session after
//! every edit.

use ropey::Rope;
use std::fs;
use std::io::{self, BufReader};
use std::path::Path;

/// A rope-backed text buffer that produces full-text snapshots.
#[derive(Debug, Clone)]
pub struct TextBuffer {
    rope: Rope,
}

impl TextBuffer {
    /// Creates a text buffer from a string.
    pub fn from_str(text: &str) -> Self {
        Self {
            rope: Rope::from_str(text),
        }
    }

    /// Loads a text buffer from a file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = fs::File::open(path)?;
        let rope = Rope::from_reader(BufReader::new(file))?;
        Ok(Self { rope })
    }

    /// Appends `line` as a new last line.
    pub fn push_line(&mut self, line: &str) {
        let end = self.rope.len_chars();
        if end > 0 && self.rope.char(end - 1) != '\n' {
            self.rope.insert_char(end, '\n');
        }
        let end = self.rope.len_chars();
        self.rope.insert(end, line);
    }

    /// Removes the last line together with the newline that introduced it.
    /// Returns the removed line, or `None` for an empty buffer.
    pub fn pop_line(&mut self) -> Option<String> {
        if self.rope.len_chars() == 0 {
            return None;
        }
        let mut last = self.rope.len_lines() - 1;
        // A trailing newline leaves an empty final line; drop that first.
        if self.rope.line(last).len_chars() == 0 && last > 0 {
            last -= 1;
        }
        let mut start = self.rope.line_to_char(last);
        let line = self.rope.line(last).to_string();
        if start > 0 {
            start -= 1;
        }
        self.rope.remove(start..self.rope.len_chars());
        Some(line.trim_end_matches('\n').to_string())
    }

    /// Returns the entire buffer as a string.
    pub fn to_string(&self) -> String {
        self.rope.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join("ls_bridge_buffer_test.py");
        fs::write(&path, "import os\n").unwrap();
        let buf = TextBuffer::from_file(&path).unwrap();
        assert_eq!(buf.to_string(), "import os\n");
        fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_push_line() {
        let mut buf = TextBuffer::from_str("");
        buf.push_line("import os");
        buf.push_line("print(os.name)");
        assert_eq!(buf.to_string(), "import os\nprint(os.name)");
    }

    #[test]
    fn test_push_line_after_trailing_newline() {
        let mut buf = TextBuffer::from_str("a\n");
        buf.push_line("b");
        assert_eq!(buf.to_string(), "a\nb");
    }

    #[test]
    fn test_pop_line() {
        let mut buf = TextBuffer::from_str("a\nb\nc");
        assert_eq!(buf.pop_line(), Some("c".to_string()));
        assert_eq!(buf.to_string(), "a\nb");
        assert_eq!(buf.pop_line(), Some("b".to_string()));
        assert_eq!(buf.pop_line(), Some("a".to_string()));
        assert_eq!(buf.to_string(), "");
        assert_eq!(buf.pop_line(), None);
    }

    #[test]
    fn test_pop_line_with_trailing_newline() {
        let mut buf = TextBuffer::from_str("a\nb\n");
        assert_eq!(buf.pop_line(), Some("b".to_string()));
        assert_eq!(buf.to_string(), "a");
    }
}
