use std::char::REPLACEMENT_CHARACTER;

/// Incremental UTF-8 decoder for chunked response bodies.
///
/// A multi-byte character split across chunk boundaries is held back until its remaining bytes
/// arrive. Invalid sequences decode to U+FFFD instead of failing the stream.
#[derive(Debug, Default, Clone)]
pub struct Utf8StreamDecoder {
    pending: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes as much of `pending + chunk` as forms complete characters.
    pub fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);

        let mut decoded = String::with_capacity(self.pending.len());
        let mut offset = 0;

        while offset < self.pending.len() {
            match std::str::from_utf8(&self.pending[offset..]) {
                Ok(valid) => {
                    decoded.push_str(valid);
                    offset = self.pending.len();
                }
                Err(error) => {
                    let valid_end = offset + error.valid_up_to();
                    decoded.push_str(&String::from_utf8_lossy(&self.pending[offset..valid_end]));

                    match error.error_len() {
                        Some(invalid_len) => {
                            decoded.push(REPLACEMENT_CHARACTER);
                            offset = valid_end + invalid_len;
                        }
                        // Truncated sequence at the end: wait for the next chunk.
                        None => {
                            offset = valid_end;
                            break;
                        }
                    }
                }
            }
        }

        self.pending.drain(..offset);
        decoded
    }

    /// Ends the stream. A dangling partial sequence becomes one U+FFFD.
    pub fn finish(&mut self) -> String {
        if self.pending.is_empty() {
            return String::new();
        }

        self.pending.clear();
        REPLACEMENT_CHARACTER.to_string()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }
}
