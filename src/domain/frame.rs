//! Frame model and stream decoder for the east side.
//!
//! TCP is a *stream* protocol: a single `read()` call may return a partial
//! line, several lines, or a line coalesced with binary data. This module
//! buffers incoming bytes and cuts them into discrete [`Frame`]s.
//!
//! # Text vs. opaque framing
//!
//! The east port carries two kinds of traffic on the same socket: the
//! line-oriented administrative protocol, and binary device protocols that
//! some clients tunnel straight through. There is no fixed framing byte, so
//! the decoder uses a printability heuristic:
//!
//! - A chunk made entirely of printable ASCII is line-buffered: complete
//!   newline-terminated lines become [`Frame::Line`]s, the unterminated tail
//!   is retained for the next chunk.
//! - A chunk containing any non-printable byte is flushed immediately,
//!   together with whatever was pending, as a single [`Frame::Opaque`] —
//!   embedded newlines are deliberately *not* split.
//!
//! The decoder is sans-IO: the connection handler owns the socket reads and
//! calls [`FrameDecoder::feed`] with each chunk, so the framing logic is
//! testable without any sockets.

/// One logical unit received from an east peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A printable-ASCII line, trailing newline included.
    Line(Vec<u8>),
    /// A chunk containing non-printable bytes, passed through verbatim.
    Opaque(Vec<u8>),
}

impl Frame {
    /// The frame payload, whichever kind it is.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Frame::Line(b) | Frame::Opaque(b) => b,
        }
    }
}

/// Returns `true` for the printable-ASCII set used by the framing
/// heuristic: `0x20..=0x7E` plus tab, newline, carriage return, vertical
/// tab, and form feed.
fn is_printable(byte: u8) -> bool {
    matches!(byte, 0x20..=0x7E | b'\t' | b'\n' | b'\r' | 0x0B | 0x0C)
}

/// Incremental frame decoder over a sequence of received chunks.
///
/// Feed it chunks in arrival order; it yields the same frames regardless of
/// how the byte stream was split across reads. Bytes still pending when the
/// peer closes at a non-frame boundary are simply dropped — an abrupt close
/// mid-line is not recoverable data.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes one received chunk and returns every frame it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        if chunk.iter().copied().all(is_printable) {
            self.pending.extend_from_slice(chunk);

            let mut frames = Vec::new();
            let mut start = 0;
            while let Some(pos) = self.pending[start..].iter().position(|&b| b == b'\n') {
                let end = start + pos + 1; // include the newline byte
                frames.push(Frame::Line(self.pending[start..end].to_vec()));
                start = end;
            }
            self.pending.drain(..start);
            frames
        } else {
            // Looks binary. Might be a tunnelled device protocol — flush
            // everything as one frame, no line splitting.
            let mut payload = std::mem::take(&mut self.pending);
            payload.extend_from_slice(chunk);
            vec![Frame::Opaque(payload)]
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    /// Decodes `chunks` and returns the concatenated frame list.
    fn decode_all(chunks: &[&[u8]]) -> Vec<Frame> {
        let mut dec = FrameDecoder::new();
        chunks.iter().flat_map(|c| dec.feed(c)).collect()
    }

    #[test]
    fn test_single_line_in_one_chunk() {
        let frames = decode_all(&[b"hello\n"]);
        assert_eq!(frames, vec![Frame::Line(b"hello\n".to_vec())]);
    }

    #[test]
    fn test_multiple_lines_in_one_chunk() {
        let frames = decode_all(&[b"a\nb\nc\n"]);
        assert_eq!(
            frames,
            vec![
                Frame::Line(b"a\n".to_vec()),
                Frame::Line(b"b\n".to_vec()),
                Frame::Line(b"c\n".to_vec()),
            ]
        );
    }

    #[test]
    fn test_chunk_boundary_independence() {
        // The same byte stream split at arbitrary points must decode to the
        // same frame sequence as a single read.
        let whole = decode_all(&[b"?ping\nversion 1.0\nDS\n"]);
        let split = decode_all(&[b"?pi", b"ng\nver", b"sion 1.0", b"\nDS", b"\n"]);
        assert_eq!(whole, split);
        assert_eq!(whole.len(), 3);
    }

    #[test]
    fn test_partial_line_is_buffered_not_yielded() {
        let mut dec = FrameDecoder::new();
        assert!(dec.feed(b"no newline yet").is_empty());
        assert!(dec.feed(b" still none").is_empty());
        let frames = dec.feed(b" done\n");
        assert_eq!(frames, vec![Frame::Line(b"no newline yet still none done\n".to_vec())]);
    }

    #[test]
    fn test_bare_newline_yields_empty_line() {
        let frames = decode_all(&[b"\n"]);
        assert_eq!(frames, vec![Frame::Line(b"\n".to_vec())]);
    }

    #[test]
    fn test_binary_chunk_yields_opaque_frame() {
        let frames = decode_all(&[&[0x01, 0x02, 0x03]]);
        assert_eq!(frames, vec![Frame::Opaque(vec![0x01, 0x02, 0x03])]);
    }

    #[test]
    fn test_binary_chunk_combines_with_pending_text() {
        let mut dec = FrameDecoder::new();
        assert!(dec.feed(b"partial").is_empty());
        let frames = dec.feed(&[b'X', 0x00, b'Y']);
        assert_eq!(frames, vec![Frame::Opaque(b"partial\x58\x00\x59".to_vec())]);
    }

    #[test]
    fn test_binary_chunk_not_split_on_embedded_newline() {
        let frames = decode_all(&[&[0x01, b'\n', 0x02, b'\n', 0x03]]);
        assert_eq!(frames, vec![Frame::Opaque(vec![0x01, b'\n', 0x02, b'\n', 0x03])]);
    }

    #[test]
    fn test_binary_flush_resets_pending_buffer() {
        let mut dec = FrameDecoder::new();
        dec.feed(b"abc");
        dec.feed(&[0xFF]);
        // Pending was flushed with the binary chunk; the next line starts clean.
        let frames = dec.feed(b"xyz\n");
        assert_eq!(frames, vec![Frame::Line(b"xyz\n".to_vec())]);
    }

    #[test]
    fn test_text_then_binary_then_text_frames_never_merge() {
        let frames = decode_all(&[b"cmd\n", &[0x00, 0x01], b"more\n"]);
        assert_eq!(
            frames,
            vec![
                Frame::Line(b"cmd\n".to_vec()),
                Frame::Opaque(vec![0x00, 0x01]),
                Frame::Line(b"more\n".to_vec()),
            ]
        );
    }

    #[test]
    fn test_whitespace_control_bytes_count_as_printable() {
        // \t and \r are part of the printable set and must not trip the
        // binary branch.
        let frames = decode_all(&[b"a\tb\r\n"]);
        assert_eq!(frames, vec![Frame::Line(b"a\tb\r\n".to_vec())]);
    }

    #[test]
    fn test_empty_chunk_yields_nothing() {
        // An empty read means EOF at the transport level; fed here it must
        // simply produce no frames.
        assert!(decode_all(&[b""]).is_empty());
    }

    #[test]
    fn test_frame_as_bytes() {
        assert_eq!(Frame::Line(b"x\n".to_vec()).as_bytes(), b"x\n");
        assert_eq!(Frame::Opaque(vec![0x00]).as_bytes(), &[0x00]);
    }
}
