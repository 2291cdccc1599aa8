//! Line assembly from raw subprocess output.
//!
//! Output arrives in arbitrary chunks: a read may end mid-line or even in the
//! middle of a multi-byte UTF-8 sequence. Bytes are buffered until a newline
//! completes a line, and only complete lines are decoded, so the produced
//! messages do not depend on where the chunk boundaries fall.

use crate::config::SaltinelMarkers;
use crate::saltinel::SaltinelFramer;
use illuminator_proto::Message;

/// Groups raw output bytes into [`Message`]s.
#[derive(Debug)]
pub struct LineAssembler {
    pending: Vec<u8>,
    framer: SaltinelFramer,
    strip_ansi: bool,
}

impl LineAssembler {
    /// Creates an assembler recognizing the given saltinel markers.
    /// ANSI escapes are stripped unless disabled.
    pub fn new(markers: SaltinelMarkers) -> Self {
        Self {
            pending: Vec::new(),
            framer: SaltinelFramer::new(markers),
            strip_ansi: true,
        }
    }

    /// Enables or disables ANSI escape removal (useful for PTY output).
    pub fn with_ansi_stripping(mut self, enabled: bool) -> Self {
        self.strip_ansi = enabled;
        self
    }

    /// Consumes a chunk and returns every message it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Message> {
        self.pending.extend_from_slice(chunk);

        let mut messages = Vec::new();
        let mut consumed = 0;
        while let Some(offset) = self.pending[consumed..].iter().position(|b| *b == b'\n') {
            let end = consumed + offset;
            let line = self.decode(&self.pending[consumed..end]);
            consumed = end + 1;
            messages.extend(self.framer.push_line(line));
        }
        self.pending.drain(..consumed);
        messages
    }

    /// Ends the stream, flushing whatever is still buffered.
    ///
    /// A trailing partial line is emitted only if it has content. An open
    /// saltinel block is flushed as an unterminated message.
    pub fn finish(&mut self) -> Vec<Message> {
        let mut messages = Vec::new();
        if !self.pending.is_empty() {
            let line = self.decode(&self.pending);
            self.pending.clear();
            if !line.trim().is_empty() {
                messages.extend(self.framer.push_line(line));
            }
        }
        messages.extend(self.framer.finish());
        messages
    }

    /// Discards all state so the assembler can serve a new run.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.framer.reset();
    }

    /// Decodes one line, dropping the terminator and any carriage return.
    fn decode(&self, raw: &[u8]) -> String {
        let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
        if self.strip_ansi {
            let stripped = strip_ansi_escapes::strip(raw);
            String::from_utf8_lossy(&stripped).into_owned()
        } else {
            String::from_utf8_lossy(raw).into_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use illuminator_proto::Frame;

    const STREAM: &str = "hello\r\n<<SALTINEL>>\nUIATargetHasGoneAWOLException\n<<SALTINEL>>\nw\u{f6}rld\n";

    fn assemble(chunks: &[&[u8]]) -> Vec<Message> {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        let mut messages = Vec::new();
        for chunk in chunks {
            messages.extend(assembler.feed(chunk));
        }
        messages.extend(assembler.finish());
        messages
    }

    #[test]
    fn test_chunk_boundaries_do_not_change_output() {
        let bytes = STREAM.as_bytes();
        let whole = assemble(&[bytes]);

        for split in 0..=bytes.len() {
            let (a, b) = bytes.split_at(split);
            assert_eq!(assemble(&[a, b]), whole, "split at byte {split}");
        }

        let singles: Vec<&[u8]> = bytes.chunks(1).collect();
        assert_eq!(assemble(&singles), whole);
    }

    #[test]
    fn test_stream_produces_plain_inner_plain() {
        let messages = assemble(&[STREAM.as_bytes()]);

        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0], Message::line("hello"));
        assert_eq!(messages[1].frame(), Frame::Saltinel);
        assert_eq!(messages[1].lines(), ["UIATargetHasGoneAWOLException"]);
        assert_eq!(messages[2].full_line(), "w\u{f6}rld");
    }

    #[test]
    fn test_line_waits_for_newline() {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        assert!(assembler.feed(b"par").is_empty());
        assert!(assembler.feed(b"tial").is_empty());
        assert_eq!(assembler.feed(b" line\n"), vec![Message::line("partial line")]);
    }

    #[test]
    fn test_finish_flushes_partial_line() {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        assembler.feed(b"done\nno newline");
        assert_eq!(assembler.finish(), vec![Message::line("no newline")]);
    }

    #[test]
    fn test_finish_skips_empty_trailing_buffer() {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        assembler.feed(b"done\n\r");
        assert!(assembler.finish().is_empty());
    }

    #[test]
    fn test_blank_lines_inside_stream_are_kept() {
        let messages = assemble(&[b"a\n\nb\n"]);
        assert_eq!(
            messages,
            vec![Message::line("a"), Message::line(""), Message::line("b")]
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let mut assembler =
            LineAssembler::new(SaltinelMarkers::default()).with_ansi_stripping(false);
        let messages = assembler.feed(b"bad \xff byte\n");
        assert_eq!(messages[0].full_line(), "bad \u{fffd} byte");
    }

    #[test]
    fn test_ansi_stripping() {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        let messages = assembler.feed(b"\x1b[32mgreen\x1b[0m\n");
        assert_eq!(messages, vec![Message::line("green")]);

        let mut raw = LineAssembler::new(SaltinelMarkers::default()).with_ansi_stripping(false);
        let messages = raw.feed(b"\x1b[1mbold\n");
        assert_eq!(messages[0].full_line(), "\u{1b}[1mbold");
    }

    #[test]
    fn test_unterminated_block_flushed_at_end() {
        let messages = assemble(&[b"<<SALTINEL>>\ncut off\n"]);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].frame(), Frame::Unterminated);
        assert_eq!(messages[0].lines(), ["cut off"]);
    }

    #[test]
    fn test_reset_clears_partial_state() {
        let mut assembler = LineAssembler::new(SaltinelMarkers::default());
        assembler.feed(b"<<SALTINEL>>\ninner\nhalf");
        assembler.reset();

        assert!(assembler.finish().is_empty());
        assert_eq!(assembler.feed(b"fresh\n"), vec![Message::line("fresh")]);
    }
}
