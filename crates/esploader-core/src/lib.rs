//! esploader-core - Chip model and wire protocol for the esploader
//! serial flasher
//!
//! This crate holds everything the loader session layer builds on but
//! that performs no I/O itself:
//!
//! - the [`chip`] descriptor model and registry (what a hardware family
//!   is: identifiers, register addresses, capability queries),
//! - the [`protocol`] packet codecs and command constants,
//! - the [`slip`] framing codec with its incremental decoder,
//! - the [`Transport`](transport::Transport) trait that hardware and
//!   emulated byte streams implement,
//! - the shared [`Error`] taxonomy.
//!
//! # Example
//!
//! ```
//! use esploader_core::chip;
//!
//! let c6 = chip::lookup(13).unwrap();
//! assert_eq!(c6.name, "ESP32-C6");
//! assert_eq!(c6.description(), "ESP32-C6 (QFN40) (revision v0.0)");
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod chip;
pub mod error;
pub mod protocol;
pub mod slip;
pub mod transport;

pub use error::{Error, Result};
pub use transport::Transport;
