//! Static chip descriptor registry
//!
//! One entry per supported hardware family, keyed by the chip id the
//! bootloader reports. Adding a family is a data addition here, not a
//! new type.

use super::features::ChipFeatures;
use super::types::{ChipDescriptor, CrystalFreq, WdtRegs};

/// Flash-write block size of the ROM loaders
pub const ROM_FLASH_WRITE_SIZE: u32 = 0x400;
/// Status word length on ROM loader responses for these families
pub const ROM_STATUS_BYTES_LENGTH: usize = 4;

/// Low-power watchdog register base, shared by the supported families
const DR_REG_LP_WDT_BASE: u32 = 0x600B_1C00;

/// Write-protect unlock key, same for RWDT and SWD on these chips
const LP_WDT_WKEY: u32 = 0x50D8_3AA1;

const ESP32C6: ChipDescriptor = ChipDescriptor {
    name: "ESP32-C6",
    image_chip_id: 13,
    uf2_family_id: 0x540D_DF62,
    wdt: WdtRegs {
        config0: DR_REG_LP_WDT_BASE,
        wprotect: DR_REG_LP_WDT_BASE + 0x0018,
        swd_config: DR_REG_LP_WDT_BASE + 0x001C,
        swd_wprotect: DR_REG_LP_WDT_BASE + 0x0020,
        swd_auto_feed_en: 1 << 18,
        wkey: LP_WDT_WKEY,
    },
    flash_write_size: ROM_FLASH_WRITE_SIZE,
    status_bytes_len: ROM_STATUS_BYTES_LENGTH,
    crystal: CrystalFreq::Fixed(40),
    spi_pin_max: 30,
    usb_jtag_pins: &[12, 13],
    features: ChipFeatures::WIFI6
        .union(ChipFeatures::BT5)
        .union(ChipFeatures::IEEE802154),
    packages: &[(0, "ESP32-C6 (QFN40)"), (1, "ESP32-C6FH4 (QFN32)")],
};

const ESP32H2: ChipDescriptor = ChipDescriptor {
    name: "ESP32-H2",
    image_chip_id: 16,
    uf2_family_id: 0x3327_26F6,
    wdt: WdtRegs {
        config0: DR_REG_LP_WDT_BASE,
        wprotect: DR_REG_LP_WDT_BASE + 0x001C,
        swd_config: DR_REG_LP_WDT_BASE + 0x0020,
        swd_wprotect: DR_REG_LP_WDT_BASE + 0x0024,
        swd_auto_feed_en: 1 << 18,
        wkey: LP_WDT_WKEY,
    },
    flash_write_size: ROM_FLASH_WRITE_SIZE,
    status_bytes_len: ROM_STATUS_BYTES_LENGTH,
    crystal: CrystalFreq::Fixed(32),
    spi_pin_max: 27,
    usb_jtag_pins: &[26, 27],
    features: ChipFeatures::BLE.union(ChipFeatures::IEEE802154),
    packages: &[(0, "ESP32-H2")],
};

const ESP32H21: ChipDescriptor = ChipDescriptor {
    name: "ESP32-H21",
    image_chip_id: 25,
    uf2_family_id: 0xB6DD_00AF,
    wdt: WdtRegs {
        config0: DR_REG_LP_WDT_BASE,
        wprotect: DR_REG_LP_WDT_BASE + 0x001C,
        swd_config: DR_REG_LP_WDT_BASE + 0x0020,
        swd_wprotect: DR_REG_LP_WDT_BASE + 0x0024,
        swd_auto_feed_en: 1 << 18,
        wkey: LP_WDT_WKEY,
    },
    flash_write_size: ROM_FLASH_WRITE_SIZE,
    status_bytes_len: ROM_STATUS_BYTES_LENGTH,
    crystal: CrystalFreq::Fixed(32),
    spi_pin_max: 27,
    usb_jtag_pins: &[26, 27],
    features: ChipFeatures::BLE.union(ChipFeatures::IEEE802154),
    packages: &[(0, "ESP32-H21")],
};

/// All supported chip families
pub static CHIPS: &[&ChipDescriptor] = &[&ESP32C6, &ESP32H2, &ESP32H21];

/// Look up a descriptor by the chip id the bootloader reported
pub fn lookup(image_chip_id: u32) -> Option<&'static ChipDescriptor> {
    CHIPS
        .iter()
        .copied()
        .find(|chip| chip.image_chip_id == image_chip_id)
}

/// Look up a descriptor by family name (case-insensitive)
pub fn find_by_name(name: &str) -> Option<&'static ChipDescriptor> {
    CHIPS
        .iter()
        .copied()
        .find(|chip| chip.name.eq_ignore_ascii_case(name))
}
