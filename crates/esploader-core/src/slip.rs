//! SLIP framing codec
//!
//! The bootloader delimits command and response packets with SLIP
//! framing (RFC 1055 byte stuffing). The encoder produces one complete
//! frame per packet; the decoder is incremental and keeps partial-frame
//! state between reads, since the transport hands us arbitrary chunks.

use crate::error::{Error, Result};

/// Frame delimiter
pub const END: u8 = 0xC0;
/// Escape introducer
pub const ESC: u8 = 0xDB;
/// Escaped END
pub const ESC_END: u8 = 0xDC;
/// Escaped ESC
pub const ESC_ESC: u8 = 0xDD;

/// Encode one packet as a SLIP frame
pub fn encode(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(payload.len() + 2);
    out.push(END);
    for &b in payload {
        match b {
            END => out.extend_from_slice(&[ESC, ESC_END]),
            ESC => out.extend_from_slice(&[ESC, ESC_ESC]),
            _ => out.push(b),
        }
    }
    out.push(END);
    out
}

/// Decoder state between bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// Waiting for the opening END of the next frame
    Idle,
    /// Inside a frame, collecting payload bytes
    InFrame,
    /// Inside a frame, after an ESC byte
    Escaped,
}

/// Incremental SLIP frame decoder
///
/// Holds buffered partial-frame state; [`SlipDecoder::reset`] discards
/// it, which is what an input flush does across a link-layer restart.
#[derive(Debug)]
pub struct SlipDecoder {
    state: State,
    buf: Vec<u8>,
}

impl SlipDecoder {
    /// Create a decoder waiting for the start of a frame
    pub fn new() -> Self {
        Self {
            state: State::Idle,
            buf: Vec::new(),
        }
    }

    /// Drop all partial-frame state
    pub fn reset(&mut self) {
        self.state = State::Idle;
        self.buf.clear();
    }

    /// Whether a frame is partially buffered
    pub fn mid_frame(&self) -> bool {
        self.state != State::Idle
    }

    /// Feed one byte; returns a complete frame payload when one closes
    ///
    /// Bytes outside a frame that are not the frame delimiter indicate a
    /// desynchronized stream (stale bytes from a previous protocol
    /// epoch, or line noise) and fail with [`Error::FramingDesync`].
    pub fn feed(&mut self, byte: u8) -> Result<Option<Vec<u8>>> {
        match self.state {
            State::Idle => match byte {
                END => {
                    self.state = State::InFrame;
                    Ok(None)
                }
                other => Err(Error::FramingDesync {
                    byte: other,
                    at: "head of frame",
                }),
            },
            State::InFrame => match byte {
                END => {
                    // Empty frames are delimiter runs, not packets
                    if self.buf.is_empty() {
                        return Ok(None);
                    }
                    self.state = State::Idle;
                    Ok(Some(std::mem::take(&mut self.buf)))
                }
                ESC => {
                    self.state = State::Escaped;
                    Ok(None)
                }
                other => {
                    self.buf.push(other);
                    Ok(None)
                }
            },
            State::Escaped => {
                let decoded = match byte {
                    ESC_END => END,
                    ESC_ESC => ESC,
                    other => {
                        return Err(Error::FramingDesync {
                            byte: other,
                            at: "escape sequence",
                        })
                    }
                };
                self.buf.push(decoded);
                self.state = State::InFrame;
                Ok(None)
            }
        }
    }

    /// Feed a chunk, collecting every frame that completes within it
    pub fn feed_all(&mut self, bytes: &[u8]) -> Result<Vec<Vec<u8>>> {
        let mut frames = Vec::new();
        for &b in bytes {
            if let Some(frame) = self.feed(b)? {
                frames.push(frame);
            }
        }
        Ok(frames)
    }
}

impl Default for SlipDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_wraps_and_escapes() {
        assert_eq!(encode(&[0x01, 0x02]), vec![END, 0x01, 0x02, END]);
        assert_eq!(
            encode(&[END, ESC]),
            vec![END, ESC, ESC_END, ESC, ESC_ESC, END]
        );
    }

    #[test]
    fn decode_roundtrip() {
        let payload = [0x00, 0xC0, 0xDB, 0x7F, 0xC0];
        let mut dec = SlipDecoder::new();
        let frames = dec.feed_all(&encode(&payload)).unwrap();
        assert_eq!(frames, vec![payload.to_vec()]);
    }

    #[test]
    fn partial_feeds_keep_state() {
        let wire = encode(&[0xAA, 0xBB, 0xCC]);
        let (head, tail) = wire.split_at(3);
        let mut dec = SlipDecoder::new();
        assert!(dec.feed_all(head).unwrap().is_empty());
        assert!(dec.mid_frame());
        let frames = dec.feed_all(tail).unwrap();
        assert_eq!(frames, vec![vec![0xAA, 0xBB, 0xCC]]);
        assert!(!dec.mid_frame());
    }

    #[test]
    fn back_to_back_frames() {
        let mut wire = encode(&[0x01]);
        wire.extend_from_slice(&encode(&[0x02]));
        let mut dec = SlipDecoder::new();
        let frames = dec.feed_all(&wire).unwrap();
        assert_eq!(frames, vec![vec![0x01], vec![0x02]]);
    }

    #[test]
    fn stale_byte_outside_frame_is_a_desync() {
        let mut dec = SlipDecoder::new();
        match dec.feed(0x55) {
            Err(Error::FramingDesync { byte: 0x55, .. }) => {}
            other => panic!("expected FramingDesync, got {:?}", other),
        }
    }

    #[test]
    fn invalid_escape_is_a_desync() {
        let mut dec = SlipDecoder::new();
        dec.feed(END).unwrap();
        dec.feed(ESC).unwrap();
        assert!(matches!(
            dec.feed(0x00),
            Err(Error::FramingDesync { byte: 0x00, .. })
        ));
    }

    #[test]
    fn reset_discards_partial_frame() {
        let mut dec = SlipDecoder::new();
        dec.feed(END).unwrap();
        dec.feed(0x11).unwrap();
        dec.reset();
        assert!(!dec.mid_frame());
        // After reset the decoder accepts a fresh frame from the start
        let frames = dec.feed_all(&encode(&[0x22])).unwrap();
        assert_eq!(frames, vec![vec![0x22]]);
    }
}
