//! Reassembles newline-terminated lines from arbitrarily split byte chunks

/// Buffers partial lines (and partial UTF-8 sequences) across chunk boundaries
#[derive(Debug, Default)]
pub struct LineReassembler {
    /// Text after the last newline seen so far
    pending: String,
    /// Trailing bytes of an incomplete UTF-8 sequence
    incomplete_utf8: Vec<u8>,
}

impl LineReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completes, without the `\n`
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let text = self.decode(chunk);

        let mut lines = Vec::new();
        let mut rest = text.as_str();
        while let Some(pos) = rest.find('\n') {
            let mut line = std::mem::take(&mut self.pending);
            line.push_str(&rest[..pos]);
            lines.push(line);
            rest = &rest[pos + 1..];
        }
        self.pending.push_str(rest);

        lines
    }

    /// Emit the remaining fragment once the transfer has ended
    pub fn flush(&mut self) -> Option<String> {
        if !self.incomplete_utf8.is_empty() {
            let bytes = std::mem::take(&mut self.incomplete_utf8);
            self.pending.push_str(&String::from_utf8_lossy(&bytes));
        }
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }

    /// Whether a partial line is waiting for more input
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty() || !self.incomplete_utf8.is_empty()
    }

    fn decode(&mut self, chunk: &[u8]) -> String {
        decode_utf8(&mut self.incomplete_utf8, chunk)
    }
}

/// Decode `carry` followed by `chunk`, leaving a trailing incomplete
/// sequence in `carry`. Invalid sequences become U+FFFD.
pub(crate) fn decode_utf8(carry: &mut Vec<u8>, chunk: &[u8]) -> String {
    let mut bytes = std::mem::take(carry);
    bytes.extend_from_slice(chunk);

    let mut text = String::with_capacity(bytes.len());
    let mut input = bytes.as_slice();
    loop {
        match std::str::from_utf8(input) {
            Ok(valid) => {
                text.push_str(valid);
                break;
            }
            Err(e) => {
                let (valid, after) = input.split_at(e.valid_up_to());
                // valid_up_to guarantees this prefix decodes
                text.push_str(std::str::from_utf8(valid).unwrap_or_default());
                match e.error_len() {
                    Some(len) => {
                        text.push(char::REPLACEMENT_CHARACTER);
                        input = &after[len..];
                    }
                    None => {
                        // Sequence continues in the next chunk
                        *carry = after.to_vec();
                        break;
                    }
                }
            }
        }
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect_all<B: AsRef<[u8]>>(chunks: &[B]) -> Vec<String> {
        let mut reassembler = LineReassembler::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            lines.extend(reassembler.feed(chunk.as_ref()));
        }
        lines.extend(reassembler.flush());
        lines
    }

    #[test]
    fn test_single_chunk_lines() {
        let lines = collect_all(&["event: output\ndata: {}\n\n"]);
        assert_eq!(lines, vec!["event: output", "data: {}", ""]);
    }

    #[test]
    fn test_prefix_split_across_chunks() {
        let lines = collect_all(&["eve", "nt: session\nda", "ta: {\"session_id\":\"s\"}\n"]);
        assert_eq!(lines, vec!["event: session", "data: {\"session_id\":\"s\"}"]);
    }

    #[test]
    fn test_flush_emits_unterminated_line() {
        let mut reassembler = LineReassembler::new();
        assert!(reassembler.feed(b"data: [DONE]").is_empty());
        assert!(reassembler.has_pending());
        assert_eq!(reassembler.flush().as_deref(), Some("data: [DONE]"));
        assert_eq!(reassembler.flush(), None);
    }

    #[test]
    fn test_flush_without_fragment() {
        let mut reassembler = LineReassembler::new();
        assert_eq!(reassembler.feed(b"a\n"), vec!["a"]);
        assert_eq!(reassembler.flush(), None);
    }

    #[test]
    fn test_multibyte_character_split() {
        let text = "data: {\"data\":\"héllo ✓\"}\n";
        let bytes = text.as_bytes();
        // Split inside the three-byte check mark
        let pos = text.find('✓').unwrap() + 1;
        let lines = collect_all(&[&bytes[..pos], &bytes[pos..]]);
        assert_eq!(lines, vec!["data: {\"data\":\"héllo ✓\"}"]);
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let lines = collect_all(&[b"a\xffb\n".as_slice()]);
        assert_eq!(lines, vec!["a\u{fffd}b"]);
    }

    #[test]
    fn test_every_split_point_matches_single_chunk() {
        let text = "event: output\ndata: {\"tag\":\"thinking\",\"data\":\"ä\"}\n\nevent: message\ndata: {\"content\":\"→ ok\"}\ntrailing";
        let bytes = text.as_bytes();
        let expected = collect_all(&[bytes]);

        for split in 0..=bytes.len() {
            let lines = collect_all(&[&bytes[..split], &bytes[split..]]);
            assert_eq!(lines, expected, "split at {split}");
        }

        // One byte at a time
        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(collect_all(&singles), expected);
    }
}
