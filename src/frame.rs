//! Frame decoder: byte fragments in, `data:` frames out.
//!
//! Fragments arrive on arbitrary boundaries. The decoder keeps one text buffer
//! and yields a frame only once its `\n\n` terminator has been seen, so a
//! frame is never split or duplicated however the transport chunks it.

/// Line prefix that marks an event payload.
pub const DATA_PREFIX: &str = "data: ";

/// Blank-line terminator between frames.
pub const FRAME_TERMINATOR: &str = "\n\n";

/// One decoded logical unit: the text following [`DATA_PREFIX`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamFrame {
    payload: String,
}

impl StreamFrame {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
        }
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// Incremental decoder for `data: ...\n\n` framed streams.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: String,
    /// Trailing bytes of an incomplete UTF-8 sequence.
    pending: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw byte fragment and iterate the frames it completes.
    ///
    /// A multi-byte character cut by the fragment boundary is held back until
    /// the rest of it arrives. Invalid sequences decode to U+FFFD.
    pub fn push_bytes(&mut self, fragment: &[u8]) -> Frames<'_> {
        self.pending.extend_from_slice(fragment);
        let mut consumed = 0;
        loop {
            match std::str::from_utf8(&self.pending[consumed..]) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    consumed = self.pending.len();
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    let good = &self.pending[consumed..consumed + valid];
                    // valid_up_to guarantees this slice is UTF-8
                    self.buffer.push_str(&String::from_utf8_lossy(good));
                    consumed += valid;
                    match e.error_len() {
                        Some(bad) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            consumed += bad;
                        }
                        None => break,
                    }
                }
            }
        }
        self.pending.drain(..consumed);
        Frames { decoder: self }
    }

    /// Append an already-decoded text fragment.
    pub fn push_str(&mut self, fragment: &str) -> Frames<'_> {
        self.buffer.push_str(fragment);
        Frames { decoder: self }
    }

    /// Bytes and text retained but not yet terminated.
    pub fn remainder(&self) -> &str {
        &self.buffer
    }

    /// End of stream. Returns the unterminated remainder, if any, so the
    /// caller can log it. It is never a frame.
    pub fn finish(self) -> Option<String> {
        let mut rest = self.buffer;
        if !self.pending.is_empty() {
            rest.push_str(&String::from_utf8_lossy(&self.pending));
        }
        if rest.trim().is_empty() {
            None
        } else {
            Some(rest)
        }
    }

    fn next_frame(&mut self) -> Option<StreamFrame> {
        loop {
            let end = self.buffer.find(FRAME_TERMINATOR)?;
            let segment: String = self.buffer.drain(..end + FRAME_TERMINATOR.len()).collect();
            let segment = &segment[..end];
            let Some(payload) = segment.strip_prefix(DATA_PREFIX) else {
                tracing::trace!(segment, "dropping non-data segment");
                continue;
            };
            if payload.trim().is_empty() {
                continue;
            }
            return Some(StreamFrame::new(payload));
        }
    }
}

/// Lazy iterator over the frames completed by the latest fragment.
///
/// Frames not pulled before the iterator is dropped stay buffered and are
/// yielded by the next push.
pub struct Frames<'a> {
    decoder: &'a mut FrameDecoder,
}

impl Iterator for Frames<'_> {
    type Item = StreamFrame;

    fn next(&mut self) -> Option<StreamFrame> {
        self.decoder.next_frame()
    }
}

/// Decode a complete in-memory body. Convenience for tests and fixtures.
pub fn decode_all(body: &str) -> Vec<StreamFrame> {
    let mut decoder = FrameDecoder::new();
    decoder.push_str(body).collect()
}
