//! Error types shared across the esploader crates

use thiserror::Error;

/// Errors raised by the loader protocol and session layers
#[derive(Debug, Error)]
pub enum Error {
    /// A requested SPI flash pin lies outside the chip's GPIO range
    #[error("SPI pin numbers must be in the range 0-{max}: invalid pin(s) {pins:?}")]
    InvalidSpiPins {
        /// The offending pin numbers, in the order given by the caller
        pins: Vec<u8>,
        /// Highest valid GPIO index for this chip
        max: u8,
    },

    /// Failed to open or configure the underlying port
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The session's port has been closed; no further I/O is possible
    #[error("port is closed")]
    PortClosed,

    /// The framing layer saw bytes inconsistent with the SLIP stream
    ///
    /// Distinct from generic I/O errors: the usual cause is a missed
    /// input flush across a link-layer restart, so callers can advise
    /// re-flushing or reconnecting.
    #[error("SLIP stream desynchronized: unexpected byte 0x{byte:02X} at {at}")]
    FramingDesync {
        /// The byte that broke the frame structure
        byte: u8,
        /// Position in the frame grammar where it was seen
        at: &'static str,
    },

    /// The running loader rejected the command as unknown
    #[error("command 0x{0:02X} is not supported by the running loader")]
    UnsupportedCommand(u8),

    /// The loader returned a failure status word
    #[error("command 0x{cmd:02X} failed with status code 0x{code:02X}")]
    Status {
        /// Command opcode that failed
        cmd: u8,
        /// Error code from the second status byte
        code: u8,
    },

    /// A response frame did not have the expected shape
    #[error("invalid response to command 0x{cmd:02X}: {reason}")]
    InvalidResponse {
        /// Command opcode the response was for
        cmd: u8,
        /// What was wrong with it
        reason: &'static str,
    },

    /// No response frame arrived in time
    #[error("timeout waiting for a response frame")]
    Timeout,

    /// Could not bring the bootloader into a known command state
    #[error("failed to sync with the bootloader")]
    SyncFailed,

    /// The bootloader reported a chip id we have no descriptor for
    #[error("unknown chip id {0} (no chip descriptor registered)")]
    UnknownChip(u32),

    /// The uploaded flasher stub did not greet us after starting
    #[error("flasher stub did not send its greeting after launch")]
    BadStubGreeting,

    /// Stub upload was requested while secure download mode is active
    #[error("the flasher stub cannot run in secure download mode")]
    StubInSecureDownloadMode,

    /// Flash contents did not match after writing
    #[error("MD5 mismatch after flash write: expected {expected}, device returned {actual}")]
    Md5Mismatch {
        /// Hex digest of the data we wrote
        expected: String,
        /// Hex digest the device computed
        actual: String,
    },

    /// I/O error during communication
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

/// Result type alias using the shared error type
pub type Result<T> = std::result::Result<T, Error>;
