//! Line reassembly for incrementally delivered HTTP bodies.
//!
//! Chunk boundaries from the transport do not line up with the line-based
//! framing both providers use, and may split a UTF-8 sequence. Bytes are
//! buffered until a full line is available.

#[derive(Debug, Default)]
pub(crate) struct LineBuffer {
    buf: Vec<u8>,
}

impl LineBuffer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Next complete line with its terminator (and any `\r`) removed
    pub(crate) fn next_line(&mut self) -> Option<String> {
        let pos = self.buf.iter().position(|&b| b == b'\n')?;
        let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8_lossy(&line).into_owned())
    }

    /// Whatever is left once the transport has closed
    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.buf);
        Some(String::from_utf8_lossy(&rest).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_across_chunks() {
        let mut lines = LineBuffer::new();
        lines.push(b"{\"a\":");
        assert_eq!(lines.next_line(), None);
        lines.push(b"1}\n{\"b\"");
        assert_eq!(lines.next_line().as_deref(), Some("{\"a\":1}"));
        assert_eq!(lines.next_line(), None);
        lines.push(b":2}\r\n");
        assert_eq!(lines.next_line().as_deref(), Some("{\"b\":2}"));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn test_multibyte_char_split() {
        let text = "caf\u{e9}\n".as_bytes();
        let mut lines = LineBuffer::new();
        lines.push(&text[..4]);
        lines.push(&text[4..]);
        assert_eq!(lines.next_line().as_deref(), Some("caf\u{e9}"));
    }

    #[test]
    fn test_finish_returns_unterminated_tail() {
        let mut lines = LineBuffer::new();
        lines.push(b"tail");
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.finish().as_deref(), Some("tail"));
        assert_eq!(lines.finish(), None);
    }
}
