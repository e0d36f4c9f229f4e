//! esploader-loader - Bootloader sessions and the stub handoff
//!
//! This crate owns the live side of the protocol:
//!
//! - [`Connection`]: one transport plus the SLIP framing state riding
//!   on it,
//! - [`Loader`]: a session against either the ROM bootloader or the
//!   uploaded flasher stub, presenting the same capability surface in
//!   both tiers,
//! - chip detection (security-info chip id, resolved against the
//!   descriptor registry),
//! - the stub [`handoff`]: an explicit session snapshot moved into a
//!   stub-tier session through a per-family constructor registry,
//! - flash programming built on whichever tier is active.
//!
//! A session is created with [`Loader::connect`], optionally upgraded
//! with [`Loader::run_stub`], and owns its transport exclusively until
//! [`Loader::close`] or drop.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod connection;
mod flash;
pub mod handoff;
mod loader;
mod stub;

pub use connection::Connection;
pub use flash::{ProgressCallbacks, SpiPins};
pub use handoff::{start_stub, SessionSnapshot, StubEntry};
pub use loader::{CapabilityCache, ConnectOptions, Loader, LoaderTier};
pub use stub::{StubImage, StubImageError};
