//! Chip descriptor types

use core::fmt;

use super::features::ChipFeatures;
use crate::error::{Error, Result};

/// Watchdog register block for one chip family
///
/// Absolute register addresses and the unlock key are protocol-level
/// contract data: they must match the target silicon exactly and are
/// never derived from runtime state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WdtRegs {
    /// RTC watchdog config register (RWDT_CONFIG0)
    pub config0: u32,
    /// RTC watchdog write-protect register (RWDT_WPROTECT)
    pub wprotect: u32,
    /// Super watchdog config register (SWD_CONFIG)
    pub swd_config: u32,
    /// Super watchdog write-protect register (SWD_WPROTECT)
    pub swd_wprotect: u32,
    /// Bit in `swd_config` that enables automatic feeding
    pub swd_auto_feed_en: u32,
    /// Write-protect unlock key, shared by RWDT and SWD on these chips
    pub wkey: u32,
}

/// Crystal frequency of a chip family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrystalFreq {
    /// The family ships with a single fixed crystal
    Fixed(u32),
    /// The frequency must be measured against the host clock
    Probe,
}

impl fmt::Display for CrystalFreq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrystalFreq::Fixed(mhz) => write!(f, "{}MHz", mhz),
            CrystalFreq::Probe => write!(f, "unknown (probe required)"),
        }
    }
}

/// Non-fatal advisory produced by SPI pin validation
///
/// Advisories never fail validation; callers decide how to surface them
/// (the session layer logs them as warnings).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PinAdvisory {
    /// The pin that is shared with the USB-Serial/JTAG peripheral
    pub pin: u8,
}

impl fmt::Display for PinAdvisory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GPIO {} is used by USB-Serial/JTAG, consider using other pins for SPI flash connection",
            self.pin
        )
    }
}

/// Fixed capability record for one hardware family
///
/// Every field is a compile-time constant; descriptors are registered
/// once in [`super::registry::CHIPS`] and looked up by the chip id the
/// bootloader reports. No I/O happens here.
#[derive(Debug)]
pub struct ChipDescriptor {
    /// Marketing name of the family, e.g. "ESP32-H21"
    pub name: &'static str,
    /// Chip id carried in firmware image headers and security info
    pub image_chip_id: u32,
    /// UF2 firmware packaging family id
    pub uf2_family_id: u32,
    /// Watchdog register block
    pub wdt: WdtRegs,
    /// Flash-write block size of the ROM loader
    pub flash_write_size: u32,
    /// Length of the status word on ROM loader responses
    pub status_bytes_len: usize,
    /// Crystal frequency
    pub crystal: CrystalFreq,
    /// Highest valid GPIO index for SPI flash pin selection
    pub spi_pin_max: u8,
    /// Pins shared with the USB-Serial/JTAG peripheral
    pub usb_jtag_pins: &'static [u8],
    /// Radio/peripheral capabilities
    pub features: ChipFeatures,
    /// Package-version to marketing-name table
    pub packages: &'static [(u32, &'static str)],
}

impl ChipDescriptor {
    /// Package version of the silicon
    ///
    /// The shipped families have no distinguishable packages and report
    /// a constant 0, meaning "no revision information".
    pub fn package_version(&self) -> u32 {
        0
    }

    /// Major silicon revision
    pub fn major_version(&self) -> u32 {
        0
    }

    /// Minor silicon revision
    pub fn minor_version(&self) -> u32 {
        0
    }

    /// Human-readable chip description
    ///
    /// Unknown package versions resolve to an "unknown <family>" label
    /// rather than failing.
    pub fn description(&self) -> String {
        let pkg = self.package_version();
        let name = self
            .packages
            .iter()
            .find(|(v, _)| *v == pkg)
            .map(|(_, n)| (*n).to_string())
            .unwrap_or_else(|| format!("unknown {}", self.name));
        format!(
            "{} (revision v{}.{})",
            name,
            self.major_version(),
            self.minor_version()
        )
    }

    /// Feature tags in display order
    pub fn feature_tags(&self) -> Vec<&'static str> {
        self.features.tags()
    }

    /// Validate an SPI flash pin selection against this chip's GPIO range
    ///
    /// Fails with [`Error::InvalidSpiPins`] if any pin lies outside the
    /// range. Pins shared with the USB-Serial/JTAG peripheral produce one
    /// advisory each but still validate; an empty selection is a no-op.
    /// Duplicates are treated as a set.
    pub fn check_spi_pins(&self, pins: &[u8]) -> Result<Vec<PinAdvisory>> {
        let bad: Vec<u8> = pins.iter().copied().filter(|p| *p > self.spi_pin_max).collect();
        if !bad.is_empty() {
            return Err(Error::InvalidSpiPins {
                pins: bad,
                max: self.spi_pin_max,
            });
        }

        let advisories = self
            .usb_jtag_pins
            .iter()
            .copied()
            .filter(|reserved| pins.contains(reserved))
            .map(|pin| PinAdvisory { pin })
            .collect();
        Ok(advisories)
    }
}
