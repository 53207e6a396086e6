/// Incremental decoder that turns raw network byte chunks into complete text
/// lines. Chunks are not aligned to protocol frames: a chunk may end in the
/// middle of a line or in the middle of a multi-byte UTF-8 character, so both
/// the undecoded byte tail and the unterminated text tail are carried between
/// calls.
pub struct LineReader {
    /// Bytes held back because the last chunk ended mid UTF-8 sequence.
    carry: Vec<u8>,
    /// Decoded text not yet terminated by a newline.
    partial: String,
}

impl LineReader {
    pub fn new() -> Self {
        Self {
            carry: Vec::new(),
            partial: String::new(),
        }
    }

    /// Feed one network chunk and drain every line it completes.
    /// Line terminators (`\n` or `\r\n`) are stripped. Text after the last
    /// newline stays buffered until a later chunk terminates it.
    pub fn push_chunk(&mut self, chunk: &[u8]) -> Vec<String> {
        self.carry.extend_from_slice(chunk);
        let decoded = self.decode_available();
        self.partial.push_str(&decoded);
        self.drain_lines()
    }

    /// Flush whatever remains at end of stream. A response may end without a
    /// trailing newline, so a non-empty remainder still counts as a line.
    pub fn finish(&mut self) -> Option<String> {
        if !self.carry.is_empty() {
            // An incomplete UTF-8 sequence at end of stream cannot be decoded.
            tracing::warn!(
                bytes = self.carry.len(),
                "dropping undecodable byte tail at stream end"
            );
            self.carry.clear();
        }
        if self.partial.is_empty() {
            None
        } else {
            let mut line = std::mem::take(&mut self.partial);
            if line.ends_with('\r') {
                line.pop();
            }
            Some(line)
        }
    }

    /// Decode the maximal valid UTF-8 prefix of the carry buffer, keeping an
    /// incomplete trailing sequence for the next chunk. Truly invalid bytes
    /// are replaced with U+FFFD.
    fn decode_available(&mut self) -> String {
        let mut out = String::new();
        let mut buf = std::mem::take(&mut self.carry);
        loop {
            match std::str::from_utf8(&buf) {
                Ok(text) => {
                    out.push_str(text);
                    buf.clear();
                    break;
                }
                Err(err) => {
                    let valid = err.valid_up_to();
                    out.push_str(std::str::from_utf8(&buf[..valid]).unwrap_or_default());
                    match err.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            buf.drain(..valid + bad);
                        }
                        None => {
                            // Incomplete sequence at the end: wait for more bytes.
                            buf.drain(..valid);
                            break;
                        }
                    }
                }
            }
        }
        self.carry = buf;
        out
    }

    fn drain_lines(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.find('\n') {
            let mut line: String = self.partial.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }
}

impl Default for LineReader {
    fn default() -> Self {
        Self::new()
    }
}
