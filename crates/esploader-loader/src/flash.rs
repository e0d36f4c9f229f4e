//! Flash programming over a live session
//!
//! These operations run on whichever tier the session is in; the tier
//! decides the write block size and status word length, and the stub
//! additionally answers the MD5 check with a raw digest where the ROM
//! sends ASCII hex.

use std::str::FromStr;
use std::time::Duration;

use esploader_core::error::{Error, Result};
use esploader_core::protocol::{self, cmd};
use md5::{Digest, Md5};

use crate::loader::{Loader, DEFAULT_TIMEOUT};

const ERASE_SECONDS_PER_MB: u64 = 30;
const WRITE_SECONDS_PER_MB: u64 = 40;
const MD5_SECONDS_PER_MB: u64 = 8;
/// Worst-case full chip erase
const CHIP_ERASE_TIMEOUT: Duration = Duration::from_secs(120);

/// Scale a per-megabyte timeout to an operation size
fn timeout_for_size(seconds_per_mb: u64, size: usize) -> Duration {
    let scaled = seconds_per_mb as f64 * size as f64 / (1024.0 * 1024.0);
    DEFAULT_TIMEOUT.max(Duration::from_secs_f64(scaled.ceil().max(1.0)))
}

/// Progress reporting hooks for long flash writes
pub trait ProgressCallbacks {
    /// A write of `total` bytes at `addr` is starting
    fn init(&mut self, addr: u32, total: usize);
    /// `current` bytes have been sent so far
    fn update(&mut self, current: usize);
    /// The write finished
    fn finish(&mut self);
}

/// An alternate SPI flash pin assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpiPins {
    /// Clock
    pub clk: u8,
    /// MISO
    pub q: u8,
    /// MOSI
    pub d: u8,
    /// Hold
    pub hd: u8,
    /// Chip select
    pub cs: u8,
}

impl SpiPins {
    /// The pins as a list, for range validation
    pub fn pins(&self) -> [u8; 5] {
        [self.clk, self.q, self.d, self.hd, self.cs]
    }

    /// Pack the assignment into the SPI_ATTACH argument word
    pub fn encode(&self) -> u32 {
        u32::from(self.clk)
            | u32::from(self.q) << 6
            | u32::from(self.d) << 12
            | u32::from(self.hd) << 18
            | u32::from(self.cs) << 24
    }
}

impl FromStr for SpiPins {
    type Err = String;

    /// Parse "CLK,Q,D,HD,CS"
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected five comma-separated pins (CLK,Q,D,HD,CS), got {:?}",
                s
            ));
        }
        let mut pins = [0u8; 5];
        for (slot, field) in pins.iter_mut().zip(&fields) {
            *slot = field
                .trim()
                .parse()
                .map_err(|_| format!("invalid pin number: {:?}", field))?;
        }
        Ok(SpiPins {
            clk: pins[0],
            q: pins[1],
            d: pins[2],
            hd: pins[3],
            cs: pins[4],
        })
    }
}

impl Loader {
    /// Begin a flash write of `size` bytes at `offset`
    ///
    /// The ROM erases the region during this command, so the timeout
    /// scales with the size.
    pub fn flash_begin(&mut self, size: u32, offset: u32) -> Result<()> {
        let write_size = self.flash_write_size();
        let blocks = (size + write_size - 1) / write_size;
        let mut data = Vec::with_capacity(20);
        data.extend_from_slice(&size.to_le_bytes());
        data.extend_from_slice(&blocks.to_le_bytes());
        data.extend_from_slice(&write_size.to_le_bytes());
        data.extend_from_slice(&offset.to_le_bytes());
        if !self.is_stub() {
            // ROM loaders take a fifth word selecting encrypted writes
            data.extend_from_slice(&0u32.to_le_bytes());
        }
        let timeout = timeout_for_size(ERASE_SECONDS_PER_MB, size as usize);
        self.check_command(cmd::FLASH_BEGIN, &data, 0, timeout)?;
        Ok(())
    }

    /// Send one flash write block
    pub fn flash_data(&mut self, seq: u32, block: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(16 + block.len());
        data.extend_from_slice(&(block.len() as u32).to_le_bytes());
        data.extend_from_slice(&seq.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(block);
        let timeout = timeout_for_size(WRITE_SECONDS_PER_MB, block.len());
        self.check_command(cmd::FLASH_DATA, &data, protocol::checksum(block), timeout)?;
        Ok(())
    }

    /// Finish a flash write, optionally rebooting into the application
    pub fn flash_end(&mut self, reboot: bool) -> Result<()> {
        let data = u32::from(!reboot).to_le_bytes();
        self.check_command(cmd::FLASH_END, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Attach the SPI flash, optionally on alternate pins
    ///
    /// A pin assignment is validated against the chip's GPIO range
    /// before anything is sent; reserved-pin advisories are logged but
    /// do not block the attach.
    pub fn flash_spi_attach(&mut self, pins: Option<SpiPins>) -> Result<()> {
        if let Some(pins) = &pins {
            self.validate_spi_pins(&pins.pins())?;
        }
        let arg = pins.map(|p| p.encode()).unwrap_or(0);
        let mut data = arg.to_le_bytes().to_vec();
        if !self.is_stub() {
            data.extend_from_slice(&0u32.to_le_bytes());
        }
        self.check_command(cmd::SPI_ATTACH, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Write `data` to flash at `addr`, chunked by the tier's block size
    ///
    /// The final block is padded with 0xFF up to the block size, which
    /// leaves the padding bytes erased.
    pub fn write_flash(
        &mut self,
        addr: u32,
        data: &[u8],
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<()> {
        let write_size = self.flash_write_size() as usize;
        log::info!(
            "Writing {} bytes at 0x{:08X} ({} byte blocks)",
            data.len(),
            addr,
            write_size
        );
        self.flash_begin(data.len() as u32, addr)?;
        if let Some(p) = progress.as_mut() {
            p.init(addr, data.len());
        }
        let mut written = 0usize;
        for (seq, chunk) in data.chunks(write_size).enumerate() {
            let mut block = chunk.to_vec();
            block.resize(write_size, 0xFF);
            self.flash_data(seq as u32, &block)?;
            written += chunk.len();
            if let Some(p) = progress.as_mut() {
                p.update(written);
            }
        }
        if let Some(p) = progress.as_mut() {
            p.finish();
        }
        Ok(())
    }

    /// Ask the device for an MD5 digest and compare it to `data`
    ///
    /// The stub answers with the 16 raw digest bytes, the ROM with 32
    /// ASCII hex characters.
    pub fn check_flash_md5(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        let mut request = Vec::with_capacity(16);
        request.extend_from_slice(&addr.to_le_bytes());
        request.extend_from_slice(&(data.len() as u32).to_le_bytes());
        request.extend_from_slice(&[0; 8]);
        let timeout = timeout_for_size(MD5_SECONDS_PER_MB, data.len());
        let (_, body) = self.check_command(cmd::SPI_FLASH_MD5, &request, 0, timeout)?;

        let actual = match body.len() {
            16 => hex_of(&body),
            32 => String::from_utf8(body.clone())
                .map_err(|_| Error::InvalidResponse {
                    cmd: cmd::SPI_FLASH_MD5,
                    reason: "digest is not ASCII hex",
                })?
                .to_lowercase(),
            _ => {
                return Err(Error::InvalidResponse {
                    cmd: cmd::SPI_FLASH_MD5,
                    reason: "unexpected digest length",
                })
            }
        };

        let mut hasher = Md5::new();
        hasher.update(data);
        let expected = hex_of(&hasher.finalize());

        if actual != expected {
            return Err(Error::Md5Mismatch { expected, actual });
        }
        log::info!("Flash MD5 verified ({} bytes at 0x{:08X})", data.len(), addr);
        Ok(())
    }

    /// Erase the entire flash
    ///
    /// Only the stub implements this; on a ROM session it fails
    /// client-side instead of round-tripping a command the ROM would
    /// refuse anyway.
    pub fn erase_flash(&mut self) -> Result<()> {
        if !self.is_stub() {
            return Err(Error::UnsupportedCommand(cmd::ERASE_FLASH));
        }
        log::info!("Erasing entire flash (this can take a while)");
        self.check_command(cmd::ERASE_FLASH, &[], 0, CHIP_ERASE_TIMEOUT)?;
        Ok(())
    }
}

fn hex_of(digest: &[u8]) -> String {
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ConnectOptions;
    use crate::stub::StubImage;
    use esploader_dummy::{DummyRom, Recording};

    fn options() -> ConnectOptions {
        ConnectOptions {
            trace: false,
            enter_bootloader: false,
            sync_attempts: 2,
        }
    }

    fn stub_image() -> StubImage {
        StubImage {
            entry: 0x4038_0000,
            text_start: 0x4038_0000,
            text: vec![0x73, 0x00, 0x10, 0x00],
            data_start: 0,
            data: Vec::new(),
        }
    }

    struct Counting {
        inits: usize,
        updates: usize,
        finishes: usize,
        last: usize,
    }

    impl ProgressCallbacks for Counting {
        fn init(&mut self, _addr: u32, _total: usize) {
            self.inits += 1;
        }
        fn update(&mut self, current: usize) {
            self.updates += 1;
            self.last = current;
        }
        fn finish(&mut self) {
            self.finishes += 1;
        }
    }

    #[test]
    fn spi_pins_parse_and_encode() {
        let pins: SpiPins = "6,17,8,11,16".parse().unwrap();
        assert_eq!(pins.pins(), [6, 17, 8, 11, 16]);
        assert_eq!(
            pins.encode(),
            6 | 17 << 6 | 8 << 12 | 11 << 18 | 16 << 24
        );
        assert!("1,2,3".parse::<SpiPins>().is_err());
        assert!("a,b,c,d,e".parse::<SpiPins>().is_err());
    }

    #[test]
    fn spi_attach_validates_pins_first() {
        let (recording, events) = Recording::new(DummyRom::new(25));
        let mut rom = Loader::connect(Box::new(recording), &options()).unwrap();
        let mark = events.lock().unwrap().len();
        // Pin 28 is out of range on an 0-27 family: nothing is sent
        let pins = SpiPins {
            clk: 6,
            q: 28,
            d: 8,
            hd: 11,
            cs: 16,
        };
        assert!(matches!(
            rom.flash_spi_attach(Some(pins)),
            Err(Error::InvalidSpiPins { .. })
        ));
        assert_eq!(events.lock().unwrap().len(), mark);

        // A valid assignment goes through
        let pins = SpiPins {
            clk: 6,
            q: 17,
            d: 8,
            hd: 11,
            cs: 16,
        };
        rom.flash_spi_attach(Some(pins)).unwrap();
    }

    #[test]
    fn write_flash_via_rom_tier_and_verify() {
        let dummy = DummyRom::new(13);
        let flash = dummy.flash_handle();
        let mut rom = Loader::connect(Box::new(dummy), &options()).unwrap();

        let payload: Vec<u8> = (0..2500u32).map(|i| (i % 251) as u8).collect();
        let mut progress = Counting {
            inits: 0,
            updates: 0,
            finishes: 0,
            last: 0,
        };
        rom.write_flash(0x1000, &payload, Some(&mut progress)).unwrap();
        rom.flash_end(false).unwrap();

        assert_eq!(&flash.lock().unwrap()[0x1000..0x1000 + 2500], &payload[..]);
        // 2500 bytes in 0x400 blocks is three blocks
        assert_eq!(progress.inits, 1);
        assert_eq!(progress.updates, 3);
        assert_eq!(progress.finishes, 1);
        assert_eq!(progress.last, 2500);

        // The ROM answers the digest as ASCII hex
        rom.check_flash_md5(0x1000, &payload).unwrap();
        let mut wrong = payload.clone();
        wrong[0] ^= 0xFF;
        assert!(matches!(
            rom.check_flash_md5(0x1000, &wrong),
            Err(Error::Md5Mismatch { .. })
        ));
    }

    #[test]
    fn write_flash_via_stub_tier_and_verify() {
        let dummy = DummyRom::new(16);
        let flash = dummy.flash_handle();
        let rom = Loader::connect(Box::new(dummy), &options()).unwrap();
        let mut stub = rom.run_stub(&stub_image()).unwrap();

        let payload = vec![0xA5u8; 600];
        stub.write_flash(0, &payload, None).unwrap();
        stub.flash_end(false).unwrap();
        assert_eq!(&flash.lock().unwrap()[..600], &payload[..]);

        // The stub answers the digest as raw bytes
        stub.check_flash_md5(0, &payload).unwrap();

        stub.erase_flash().unwrap();
        assert!(flash.lock().unwrap().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn erase_flash_is_refused_on_the_rom_tier() {
        let (recording, events) = Recording::new(DummyRom::new(25));
        let mut rom = Loader::connect(Box::new(recording), &options()).unwrap();
        let mark = events.lock().unwrap().len();
        assert!(matches!(
            rom.erase_flash(),
            Err(Error::UnsupportedCommand(c)) if c == cmd::ERASE_FLASH
        ));
        // Refused client-side: no wire traffic
        assert_eq!(events.lock().unwrap().len(), mark);
    }

    #[test]
    fn timeouts_scale_with_size() {
        assert_eq!(timeout_for_size(8, 0), DEFAULT_TIMEOUT);
        assert!(timeout_for_size(8, 4 * 1024 * 1024) >= Duration::from_secs(32));
    }
}
