//! Reassembly of UTF-8 text split across reads

/// Longest UTF-8 encoding of one character
const UTF_MAX: usize = 4;

/// Re-joins multi-byte characters that a read split in two
///
/// Bytes that fail to decode within the last three bytes of the buffer are
/// held back and prepended to the next chunk. An undecodable byte further
/// from the end cannot be a split character; it is passed through as a raw
/// byte so the terminal can render it as it sees fit.
#[derive(Debug, Default)]
pub struct Utf8Reassembler {
    pending: Vec<u8>,
}

impl Utf8Reassembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the bytes ready to send
    pub fn push(&mut self, chunk: &[u8]) -> Vec<u8> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut out = Vec::with_capacity(buf.len());
        let mut i = 0;
        while i < buf.len() {
            match std::str::from_utf8(&buf[i..]) {
                Ok(_) => {
                    out.extend_from_slice(&buf[i..]);
                    i = buf.len();
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    out.extend_from_slice(&buf[i..i + valid]);
                    i += valid;

                    if buf.len() - i < UTF_MAX {
                        self.pending.extend_from_slice(&buf[i..]);
                        break;
                    }

                    out.push(buf[i]);
                    i += 1;
                }
            }
        }
        out
    }

    /// Bytes held back for the next chunk
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    /// Release whatever is still held back (end of stream)
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.pending)
    }
}
