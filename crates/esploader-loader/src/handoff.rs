//! The ROM-to-stub session handoff
//!
//! Uploading the flasher stub restarts the device's link layer. The
//! handoff therefore moves the transport and the replicated session
//! state into a fresh stub-tier session through an explicit snapshot,
//! and discards all framing state before the stub is spoken to. The
//! old ROM session is consumed; the type system makes using it again
//! impossible.

use esploader_core::chip;
use esploader_core::error::{Error, Result};
use esploader_core::Transport;

use crate::connection::Connection;
use crate::loader::{CapabilityCache, Loader};

/// The total transfer record of a session handoff
///
/// Every field a stub session inherits from its ROM predecessor is
/// listed here; nothing is copied implicitly. Framing state is absent
/// on purpose: it belongs to the protocol epoch that ended when the
/// stub started, so the new session begins from a fresh decoder and a
/// flushed transport.
pub struct SessionSnapshot {
    /// The transport handle, exclusively owned by the new session
    pub transport: Box<dyn Transport>,
    /// Whether the chip is in secure download mode
    pub secure_download_mode: bool,
    /// Whether wire tracing is on
    pub trace_enabled: bool,
    /// The capability cache, transferred by value
    pub cache: CapabilityCache,
}

/// Builds a stub-tier session out of a handoff snapshot
pub type StubConstructor = fn(SessionSnapshot) -> Result<Loader>;

/// One family's entry in the stub constructor registry
pub struct StubEntry {
    /// The chip id the entry serves
    pub image_chip_id: u32,
    /// Constructor for that family's stub session
    pub build: StubConstructor,
}

/// Stub constructors, keyed by chip id
///
/// Resolved at handoff time; adding a family means adding a row.
pub static STUB_LOADERS: &[StubEntry] = &[
    StubEntry {
        image_chip_id: 13,
        build: esp32c6_stub,
    },
    StubEntry {
        image_chip_id: 16,
        build: esp32h2_stub,
    },
    StubEntry {
        image_chip_id: 25,
        build: esp32h21_stub,
    },
];

/// Look up the stub constructor for a chip id
pub fn stub_constructor(image_chip_id: u32) -> Option<StubConstructor> {
    STUB_LOADERS
        .iter()
        .find(|entry| entry.image_chip_id == image_chip_id)
        .map(|entry| entry.build)
}

/// Hand an open ROM session over to the already-running stub
///
/// The caller must have uploaded and started the stub first (see
/// [`Loader::run_stub`], which does both). Consumes the ROM session;
/// on failure no stub session exists and the handoff must not be
/// retried without re-uploading the stub.
pub fn start_stub(rom: Loader) -> Result<Loader> {
    let chip_id = rom.chip().image_chip_id;
    let build = stub_constructor(chip_id).ok_or(Error::UnknownChip(chip_id))?;
    let snapshot = rom.into_snapshot()?;
    build(snapshot)
}

fn stub_loader(image_chip_id: u32, snapshot: SessionSnapshot) -> Result<Loader> {
    let chip = chip::lookup(image_chip_id).ok_or(Error::UnknownChip(image_chip_id))?;
    let mut conn = Connection::new(snapshot.transport, snapshot.trace_enabled);
    // Bytes buffered before the stub started belong to a dead protocol
    // epoch; drop them before the first command or the frame decoder
    // would misread them as a frame head
    conn.flush_input()?;
    log::debug!("Session handed off to the {} stub", chip.name);
    Ok(Loader::from_handoff(
        conn,
        chip,
        snapshot.secure_download_mode,
        snapshot.cache,
    ))
}

fn esp32c6_stub(snapshot: SessionSnapshot) -> Result<Loader> {
    stub_loader(13, snapshot)
}

fn esp32h2_stub(snapshot: SessionSnapshot) -> Result<Loader> {
    stub_loader(16, snapshot)
}

fn esp32h21_stub(snapshot: SessionSnapshot) -> Result<Loader> {
    stub_loader(25, snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_chip_family_has_a_stub_constructor() {
        for chip in chip::CHIPS {
            assert!(
                stub_constructor(chip.image_chip_id).is_some(),
                "no stub constructor registered for {}",
                chip.name
            );
        }
    }

    #[test]
    fn registry_keys_are_unique() {
        for (i, a) in STUB_LOADERS.iter().enumerate() {
            for b in &STUB_LOADERS[i + 1..] {
                assert_ne!(a.image_chip_id, b.image_chip_id);
            }
        }
    }

    #[test]
    fn unknown_chip_id_has_no_constructor() {
        assert!(stub_constructor(99).is_none());
    }
}
