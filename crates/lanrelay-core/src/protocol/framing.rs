//! Optional length-prefixed framing for transfer streams.
//!
//! Wire format per frame:
//! ```text
//! [payload_len:4 big-endian][payload:N]
//! ```
//!
//! Transfer streams are unframed by default: each OS-level read is delivered
//! as one payload. When both ends enable framing, a sender may split one
//! payload across many writes and the receiver still delivers it whole.
//!
//! Unframed streams are decoded with [`Utf8StreamDecoder`], which holds back
//! a multi-byte character cut by a read boundary until the rest arrives.

use thiserror::Error;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Largest payload a single frame may carry (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Errors produced by frame encoding or decoding.
#[derive(Debug, Error, PartialEq)]
pub enum FramingError {
    /// A payload (outbound) or a declared length (inbound) exceeds [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {max}-byte limit")]
    FrameTooLarge { len: usize, max: usize },
}

/// Prepends the 4-byte length prefix to `payload`.
///
/// # Errors
///
/// Returns [`FramingError::FrameTooLarge`] if `payload` exceeds [`MAX_FRAME_LEN`].
pub fn encode_frame(payload: &[u8]) -> Result<Vec<u8>, FramingError> {
    if payload.len() > MAX_FRAME_LEN {
        return Err(FramingError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let mut buf = Vec::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Reassembles frames from arbitrarily split stream reads.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every frame that is now complete, in order.
    ///
    /// Incomplete trailing data stays buffered for the next call.
    ///
    /// # Errors
    ///
    /// Returns [`FramingError::FrameTooLarge`] when a declared length exceeds
    /// [`MAX_FRAME_LEN`]. The stream is unrecoverable after this error.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>, FramingError> {
        self.buf.extend_from_slice(bytes);

        let mut frames = Vec::new();
        loop {
            if self.buf.len() < LENGTH_PREFIX_SIZE {
                break;
            }
            let declared =
                u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
            if declared > MAX_FRAME_LEN {
                return Err(FramingError::FrameTooLarge {
                    len: declared,
                    max: MAX_FRAME_LEN,
                });
            }
            let total = LENGTH_PREFIX_SIZE + declared;
            if self.buf.len() < total {
                break;
            }
            frames.push(self.buf[LENGTH_PREFIX_SIZE..total].to_vec());
            self.buf.drain(..total);
        }
        Ok(frames)
    }

    /// Number of buffered bytes not yet part of a complete frame.
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }
}

/// Decodes UTF-8 text from arbitrarily split stream reads.
///
/// An incomplete trailing sequence is carried into the next call. Only bytes
/// that can never form a valid character become U+FFFD.
#[derive(Debug, Default)]
pub struct Utf8StreamDecoder {
    carry: Vec<u8>,
}

impl Utf8StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns all text that is now complete.
    pub fn push(&mut self, bytes: &[u8]) -> String {
        let mut input = std::mem::take(&mut self.carry);
        input.extend_from_slice(bytes);

        let mut out = String::with_capacity(input.len());
        let mut rest = input.as_slice();
        loop {
            match std::str::from_utf8(rest) {
                Ok(valid) => {
                    out.push_str(valid);
                    break;
                }
                Err(e) => {
                    let (valid, after) = rest.split_at(e.valid_up_to());
                    out.push_str(&String::from_utf8_lossy(valid));
                    match e.error_len() {
                        Some(bad) => {
                            out.push(char::REPLACEMENT_CHARACTER);
                            rest = &after[bad..];
                        }
                        None => {
                            self.carry = after.to_vec();
                            break;
                        }
                    }
                }
            }
        }
        out
    }

    /// Drains a sequence left incomplete at end of stream, lossily decoded.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let tail = String::from_utf8_lossy(&self.carry).into_owned();
        self.carry.clear();
        Some(tail)
    }

    /// Number of bytes held back waiting for the rest of a character.
    pub fn pending_len(&self) -> usize {
        self.carry.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
