//! Push-based newline framing.

/// Reassembles newline-delimited lines from arbitrarily split chunks.
///
/// Only the trailing partial line is buffered. Empty lines are skipped. A
/// `\r` before the `\n` is stripped unless the buffer is [`verbatim`].
///
/// [`verbatim`]: LineBuffer::verbatim
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
    keep_cr: bool,
}

impl LineBuffer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep a trailing `\r` so CRLF input is reproduced byte for byte.
    #[must_use]
    pub fn verbatim() -> Self {
        Self {
            partial: Vec::new(),
            keep_cr: true,
        }
    }

    /// Feed a chunk; returns every line it completes, in arrival order.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        let mut lines = Vec::new();
        let mut rest = chunk;
        while let Some(pos) = rest.iter().position(|&b| b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            let line = if self.partial.is_empty() {
                head.to_vec()
            } else {
                let mut line = std::mem::take(&mut self.partial);
                line.extend_from_slice(head);
                line
            };
            if let Some(line) = self.finish_line(line) {
                lines.push(line);
            }
            rest = &tail[1..];
        }
        self.partial.extend_from_slice(rest);
        lines
    }

    /// Flush the trailing unterminated line, if any.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        let line = std::mem::take(&mut self.partial);
        self.finish_line(line)
    }

    fn finish_line(&self, mut line: Vec<u8>) -> Option<Vec<u8>> {
        if !self.keep_cr && line.last() == Some(&b'\r') {
            line.pop();
        }
        (!line.is_empty()).then_some(line)
    }
}
