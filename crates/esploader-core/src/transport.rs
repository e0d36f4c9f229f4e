//! Byte transport abstraction
//!
//! Sessions own exactly one transport at a time and move it across the
//! stub handoff. Implementations live in `esploader-serial` (hardware)
//! and `esploader-dummy` (in-memory emulation).

use std::time::Duration;

use crate::error::Result;

/// A raw byte stream to a bootloader
pub trait Transport: Send {
    /// Write the whole buffer
    fn write_all(&mut self, data: &[u8]) -> Result<()>;

    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// Returns the number of bytes read; 0 means the timeout elapsed
    /// with nothing available.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Discard every byte received but not yet read
    ///
    /// This is the resynchronization primitive the stub handoff depends
    /// on: bytes buffered before a link-layer restart belong to a
    /// protocol epoch that no longer exists.
    fn reset_input_buffer(&mut self) -> Result<()>;

    /// Change the link baud rate
    fn set_baud_rate(&mut self, baud: u32) -> Result<()>;

    /// Current link baud rate, if the transport has one
    fn baud_rate(&self) -> Option<u32> {
        None
    }

    /// Toggle the control lines that put the chip into its bootloader
    ///
    /// Default is a no-op for transports with no control lines.
    fn enter_bootloader(&mut self) -> Result<()> {
        Ok(())
    }

    /// Reset the chip into its application
    ///
    /// Default is a no-op for transports with no control lines.
    fn hard_reset(&mut self) -> Result<()> {
        Ok(())
    }

    /// Whether this port is the chip's own USB-Serial/JTAG peripheral
    ///
    /// Connecting through it requires feeding the watchdogs before a
    /// stub upload, since the peripheral resets with the chip.
    fn uses_usb_jtag_serial(&self) -> bool {
        false
    }
}
