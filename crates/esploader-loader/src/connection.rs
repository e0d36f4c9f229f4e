//! A transport plus the framing state riding on it

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use esploader_core::error::{Error, Result};
use esploader_core::protocol::{self, Response};
use esploader_core::slip::{self, SlipDecoder};
use esploader_core::Transport;

/// One open link to a loader: the transport handle and the SLIP
/// decoder state that belongs to the current protocol epoch
///
/// The decoder state is scoped to this struct on purpose: the stub
/// handoff discards it wholesale instead of carrying it across the
/// link-layer restart.
pub struct Connection {
    transport: Box<dyn Transport>,
    decoder: SlipDecoder,
    /// Frames decoded but not yet consumed
    pending: VecDeque<Vec<u8>>,
    trace_enabled: bool,
}

impl Connection {
    /// Wrap a transport with fresh framing state
    pub fn new(transport: Box<dyn Transport>, trace_enabled: bool) -> Self {
        Self {
            transport,
            decoder: SlipDecoder::new(),
            pending: VecDeque::new(),
            trace_enabled,
        }
    }

    /// Whether wire tracing is on
    pub fn trace_enabled(&self) -> bool {
        self.trace_enabled
    }

    /// Tear the connection apart for a session handoff
    pub(crate) fn into_parts(self) -> (Box<dyn Transport>, bool) {
        (self.transport, self.trace_enabled)
    }

    pub(crate) fn uses_usb_jtag_serial(&self) -> bool {
        self.transport.uses_usb_jtag_serial()
    }

    pub(crate) fn baud_rate(&self) -> Option<u32> {
        self.transport.baud_rate()
    }

    /// Put the chip into its bootloader via the transport control lines
    pub fn enter_bootloader(&mut self) -> Result<()> {
        self.transport.enter_bootloader()
    }

    /// Reset the chip into its application
    pub fn hard_reset(&mut self) -> Result<()> {
        self.transport.hard_reset()
    }

    /// Change the transport baud rate
    pub fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.transport.set_baud_rate(baud)
    }

    /// Discard buffered input and all partial-frame state
    ///
    /// This is the resynchronization step: after it, the next byte read
    /// must be the head of a fresh frame.
    pub fn flush_input(&mut self) -> Result<()> {
        self.transport.reset_input_buffer()?;
        self.decoder.reset();
        self.pending.clear();
        Ok(())
    }

    /// Send one SLIP-framed packet
    pub fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        if self.trace_enabled {
            log::trace!("W {}", hex(payload));
        }
        self.transport.write_all(&slip::encode(payload))
    }

    /// Receive one SLIP frame payload, waiting at most `timeout`
    pub fn read_frame(&mut self, timeout: Duration) -> Result<Vec<u8>> {
        if let Some(frame) = self.pending.pop_front() {
            if self.trace_enabled {
                log::trace!("R {}", hex(&frame));
            }
            return Ok(frame);
        }

        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 256];
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::Timeout)?;
            let n = self.transport.read(&mut buf, remaining)?;
            if n == 0 {
                // In-memory transports return instantly; don't spin hot
                std::thread::sleep(Duration::from_millis(1));
                continue;
            }
            let mut frames = self.decoder.feed_all(&buf[..n])?;
            if frames.is_empty() {
                continue;
            }
            let first = frames.remove(0);
            self.pending.extend(frames);
            if self.trace_enabled {
                log::trace!("R {}", hex(&first));
            }
            return Ok(first);
        }
    }

    /// Issue one command and return the matching response
    ///
    /// Frames that are not a response to `cmd` (stale sync echoes,
    /// responses from an earlier command that timed out) are skipped
    /// until the deadline.
    pub fn command(
        &mut self,
        cmd: u8,
        data: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<Response> {
        self.write_frame(&protocol::encode_request(cmd, data, checksum))?;

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(Instant::now())
                .ok_or(Error::Timeout)?;
            let frame = self.read_frame(remaining)?;
            match Response::parse(&frame) {
                Ok(resp) if resp.cmd == cmd => return Ok(resp),
                Ok(resp) => {
                    log::debug!(
                        "Skipping response to 0x{:02X} while waiting for 0x{:02X}",
                        resp.cmd,
                        cmd
                    );
                }
                Err(e) => {
                    log::debug!("Skipping unparseable frame: {}", e);
                }
            }
        }
    }
}

/// Hex-dump a packet for trace logging
pub(crate) fn hex(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 3);
    for (i, b) in data.iter().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        out.push_str(&format!("{:02X}", b));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_dump_format() {
        assert_eq!(hex(&[0xC0, 0x00, 0xFF]), "C0 00 FF");
        assert_eq!(hex(&[]), "");
    }
}
