//! Bootloader sessions

use std::time::Duration;

use esploader_core::chip::{self, ChipDescriptor, CrystalFreq};
use esploader_core::error::{Error, Result};
use esploader_core::protocol::{self, cmd, SecurityInfo};
use esploader_core::Transport;

use crate::connection::Connection;
use crate::handoff;
use crate::stub::StubImage;

/// Timeout for ordinary commands
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(3);
/// Timeout for one sync exchange
const SYNC_TIMEOUT: Duration = Duration::from_millis(100);

/// Which protocol tier is serving the session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderTier {
    /// Commands served by the chip's boot ROM
    Rom,
    /// Commands served by the uploaded flasher stub
    Stub,
}

/// Memoized results of expensive capability queries
///
/// Copied by value across the stub handoff so the two sessions never
/// share cache storage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityCache {
    /// Security info block, including the chip id
    pub security_info: Option<SecurityInfo>,
    /// Contents of the chip-identification register
    pub chip_magic: Option<u32>,
}

/// Options for [`Loader::connect`]
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Log wire traffic at trace level
    pub trace: bool,
    /// Toggle the control lines to enter the bootloader first
    pub enter_bootloader: bool,
    /// How many sync attempts before giving up
    pub sync_attempts: usize,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            trace: false,
            enter_bootloader: true,
            sync_attempts: 7,
        }
    }
}

/// A session against a live bootloader
///
/// Both tiers present the same capability surface; the tier only
/// changes the block size and status word the wire commands use.
/// Exactly one `Loader` owns the transport at any time, and the stub
/// handoff moves that ownership rather than sharing it.
pub struct Loader {
    conn: Option<Connection>,
    chip: &'static ChipDescriptor,
    tier: LoaderTier,
    flash_write_size: u32,
    status_bytes_len: usize,
    secure_download_mode: bool,
    cache: CapabilityCache,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("chip", &self.chip.name)
            .field("tier", &self.tier)
            .field("flash_write_size", &self.flash_write_size)
            .field("status_bytes_len", &self.status_bytes_len)
            .field("secure_download_mode", &self.secure_download_mode)
            .field("connected", &self.conn.is_some())
            .finish()
    }
}

impl Loader {
    /// Connect to the ROM bootloader on `transport` and detect the chip
    ///
    /// Runs the sync-retry loop, queries the security info block for
    /// the chip id, resolves it against the descriptor registry, and
    /// probes for secure download mode.
    pub fn connect(transport: Box<dyn Transport>, options: &ConnectOptions) -> Result<Loader> {
        let mut conn = Connection::new(transport, options.trace);
        if options.enter_bootloader {
            conn.enter_bootloader()?;
        }
        sync(&mut conn, options.sync_attempts)?;

        // The chip id in the security info block keys the registry
        let resp = conn.command(cmd::GET_SECURITY_INFO, &[], 0, DEFAULT_TIMEOUT)?;
        let body = split_status(
            cmd::GET_SECURITY_INFO,
            &resp.data,
            chip::ROM_STATUS_BYTES_LENGTH,
        )?;
        let info = SecurityInfo::parse(&body)?;
        let chip = chip::lookup(info.chip_id).ok_or(Error::UnknownChip(info.chip_id))?;

        let mut loader = Loader {
            conn: Some(conn),
            chip,
            tier: LoaderTier::Rom,
            flash_write_size: chip.flash_write_size,
            status_bytes_len: chip.status_bytes_len,
            secure_download_mode: false,
            cache: CapabilityCache {
                security_info: Some(info),
                chip_magic: None,
            },
        };

        // A loader in secure download mode refuses register reads
        match loader.read_reg(protocol::CHIP_MAGIC_REG_ADDR) {
            Ok(magic) => loader.cache.chip_magic = Some(magic),
            Err(Error::UnsupportedCommand(_)) => {
                log::warn!("Chip is in secure download mode; capabilities are limited");
                loader.secure_download_mode = true;
            }
            Err(e) => return Err(e),
        }

        log::info!("Detected {}", loader.chip_description());

        // The USB-Serial/JTAG peripheral resets with the chip, so the
        // watchdogs must not fire while we hold it in the bootloader
        let usb_jtag = loader
            .conn
            .as_ref()
            .is_some_and(|c| c.uses_usb_jtag_serial());
        if usb_jtag && !loader.secure_download_mode {
            loader.disable_watchdogs()?;
        }

        Ok(loader)
    }

    /// The detected chip's descriptor
    pub fn chip(&self) -> &'static ChipDescriptor {
        self.chip
    }

    /// Which tier is serving this session
    pub fn tier(&self) -> LoaderTier {
        self.tier
    }

    /// Whether the flasher stub is serving this session
    pub fn is_stub(&self) -> bool {
        self.tier == LoaderTier::Stub
    }

    /// Whether the chip is in secure download mode
    pub fn secure_download_mode(&self) -> bool {
        self.secure_download_mode
    }

    /// Whether wire tracing is on
    pub fn trace_enabled(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.trace_enabled())
    }

    /// The session's capability cache
    pub fn capability_cache(&self) -> &CapabilityCache {
        &self.cache
    }

    /// Flash-write block size of the active tier
    pub fn flash_write_size(&self) -> u32 {
        self.flash_write_size
    }

    /// Status word length of the active tier
    pub fn status_bytes_len(&self) -> usize {
        self.status_bytes_len
    }

    /// Human-readable chip description
    pub fn chip_description(&self) -> String {
        self.chip.description()
    }

    /// Feature tags of the detected chip, in display order
    pub fn feature_tags(&self) -> Vec<&'static str> {
        self.chip.feature_tags()
    }

    /// Crystal frequency of the detected chip
    pub fn crystal_freq(&self) -> CrystalFreq {
        self.chip.crystal
    }

    /// Validate an SPI flash pin selection, logging any advisories
    ///
    /// Advisories are warnings only; the selection is still accepted.
    pub fn validate_spi_pins(&self, pins: &[u8]) -> Result<()> {
        for advisory in self.chip.check_spi_pins(pins)? {
            log::warn!("{}", advisory);
        }
        Ok(())
    }

    /// Release the transport; every later operation fails fast
    pub fn close(&mut self) {
        if self.conn.take().is_some() {
            log::debug!("Session closed; transport released");
        }
    }

    /// Reset the chip into its application
    pub fn hard_reset(&mut self) -> Result<()> {
        self.conn_mut()?.hard_reset()
    }

    pub(crate) fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.conn.as_mut().ok_or(Error::PortClosed)
    }

    /// Build the stub-tier session out of a handoff snapshot
    pub(crate) fn from_handoff(
        conn: Connection,
        chip: &'static ChipDescriptor,
        secure_download_mode: bool,
        cache: CapabilityCache,
    ) -> Loader {
        Loader {
            conn: Some(conn),
            chip,
            tier: LoaderTier::Stub,
            flash_write_size: protocol::STUB_FLASH_WRITE_SIZE,
            status_bytes_len: protocol::STUB_STATUS_BYTES_LENGTH,
            secure_download_mode,
            cache,
        }
    }

    /// Consume this session into the total transfer record for handoff
    ///
    /// Fails with a connection error if the transport has already been
    /// closed; a handoff cannot be retried, so callers must treat that
    /// as fatal.
    pub fn into_snapshot(mut self) -> Result<handoff::SessionSnapshot> {
        let conn = self.conn.take().ok_or(Error::PortClosed)?;
        let (transport, trace_enabled) = conn.into_parts();
        Ok(handoff::SessionSnapshot {
            transport,
            secure_download_mode: self.secure_download_mode,
            trace_enabled,
            cache: self.cache.clone(),
        })
    }

    /// Issue a command and check its status word against the active tier
    pub(crate) fn check_command(
        &mut self,
        cmd: u8,
        data: &[u8],
        checksum: u32,
        timeout: Duration,
    ) -> Result<(u32, Vec<u8>)> {
        let status_len = self.status_bytes_len;
        let resp = self.conn_mut()?.command(cmd, data, checksum, timeout)?;
        let body = split_status(cmd, &resp.data, status_len)?;
        Ok((resp.value, body))
    }

    /// Read a 32-bit register
    pub fn read_reg(&mut self, addr: u32) -> Result<u32> {
        let (value, _) = self.check_command(cmd::READ_REG, &addr.to_le_bytes(), 0, DEFAULT_TIMEOUT)?;
        Ok(value)
    }

    /// Write a 32-bit register
    pub fn write_reg(&mut self, addr: u32, value: u32) -> Result<()> {
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&addr.to_le_bytes());
        data.extend_from_slice(&value.to_le_bytes());
        data.extend_from_slice(&u32::MAX.to_le_bytes()); // write mask
        data.extend_from_slice(&0u32.to_le_bytes()); // post-write delay
        self.check_command(cmd::WRITE_REG, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Security info block, memoized after the first query
    pub fn get_security_info(&mut self) -> Result<SecurityInfo> {
        if let Some(info) = self.cache.security_info {
            return Ok(info);
        }
        let (_, body) = self.check_command(cmd::GET_SECURITY_INFO, &[], 0, DEFAULT_TIMEOUT)?;
        let info = SecurityInfo::parse(&body)?;
        self.cache.security_info = Some(info);
        Ok(info)
    }

    /// Chip id as reported by the bootloader
    pub fn chip_id(&mut self) -> Result<u32> {
        Ok(self.get_security_info()?.chip_id)
    }

    /// Keep the RTC and super watchdogs from resetting the chip
    ///
    /// Uses the descriptor's register block: unlock, disable the RTC
    /// watchdog, then turn on automatic feeding of the super watchdog.
    pub fn disable_watchdogs(&mut self) -> Result<()> {
        log::debug!("Disabling watchdogs on {}", self.chip.name);
        let wdt = self.chip.wdt;
        self.write_reg(wdt.wprotect, wdt.wkey)?;
        self.write_reg(wdt.config0, 0)?;
        self.write_reg(wdt.wprotect, 0)?;
        self.write_reg(wdt.swd_wprotect, wdt.wkey)?;
        let swd_conf = self.read_reg(wdt.swd_config)?;
        self.write_reg(wdt.swd_config, swd_conf | wdt.swd_auto_feed_en)?;
        self.write_reg(wdt.swd_wprotect, 0)?;
        Ok(())
    }

    /// Begin a RAM download
    pub fn mem_begin(
        &mut self,
        total_size: u32,
        blocks: u32,
        block_size: u32,
        offset: u32,
    ) -> Result<()> {
        let mut data = Vec::with_capacity(16);
        data.extend_from_slice(&total_size.to_le_bytes());
        data.extend_from_slice(&blocks.to_le_bytes());
        data.extend_from_slice(&block_size.to_le_bytes());
        data.extend_from_slice(&offset.to_le_bytes());
        self.check_command(cmd::MEM_BEGIN, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Send one RAM download block
    pub fn mem_data(&mut self, seq: u32, block: &[u8]) -> Result<()> {
        let mut data = Vec::with_capacity(16 + block.len());
        data.extend_from_slice(&(block.len() as u32).to_le_bytes());
        data.extend_from_slice(&seq.to_le_bytes());
        data.extend_from_slice(&[0; 8]);
        data.extend_from_slice(block);
        self.check_command(cmd::MEM_DATA, &data, protocol::checksum(block), DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Finish a RAM download, jumping to `entry` if it is nonzero
    pub fn mem_end(&mut self, entry: u32) -> Result<()> {
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&u32::from(entry == 0).to_le_bytes());
        data.extend_from_slice(&entry.to_le_bytes());
        self.check_command(cmd::MEM_END, &data, 0, DEFAULT_TIMEOUT)?;
        Ok(())
    }

    /// Upload the flasher stub and hand the session over to it
    ///
    /// Consumes the ROM session; on success all further operations go
    /// through the returned stub session, which answers the identical
    /// capability queries with stub-tier wire semantics.
    pub fn run_stub(mut self, image: &StubImage) -> Result<Loader> {
        if self.secure_download_mode {
            return Err(Error::StubInSecureDownloadMode);
        }
        if self.is_stub() {
            log::debug!("Stub loader is already running");
            return Ok(self);
        }

        log::info!("Uploading stub loader...");
        self.upload_segment(image.text_start, &image.text)?;
        self.upload_segment(image.data_start, &image.data)?;
        self.mem_end(image.entry)?;

        // The stub greets on the old framing before we hand off
        let greeting = self.conn_mut()?.read_frame(DEFAULT_TIMEOUT)?;
        if greeting != protocol::STUB_GREETING {
            return Err(Error::BadStubGreeting);
        }
        log::info!("Stub loader running");

        handoff::start_stub(self)
    }

    fn upload_segment(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if data.is_empty() {
            return Ok(());
        }
        let block_size = protocol::RAM_BLOCK_SIZE;
        let blocks = (data.len() as u32 + block_size - 1) / block_size;
        log::debug!(
            "Uploading {} bytes to 0x{:08X} in {} blocks",
            data.len(),
            addr,
            blocks
        );
        self.mem_begin(data.len() as u32, blocks, block_size, addr)?;
        for (seq, block) in data.chunks(block_size as usize).enumerate() {
            self.mem_data(seq as u32, block)?;
        }
        Ok(())
    }

    /// Renegotiate the link baud rate on both ends
    pub fn change_baud(&mut self, baud: u32) -> Result<()> {
        // The stub needs the old rate to retune its divisor; the ROM
        // expects zero there
        let old = if self.is_stub() {
            self.conn_mut()?.baud_rate().unwrap_or(0)
        } else {
            0
        };
        let mut data = Vec::with_capacity(8);
        data.extend_from_slice(&baud.to_le_bytes());
        data.extend_from_slice(&old.to_le_bytes());
        self.check_command(cmd::CHANGE_BAUDRATE, &data, 0, DEFAULT_TIMEOUT)?;

        let conn = self.conn_mut()?;
        conn.set_baud_rate(baud)?;
        // Let the UART settle, then drop whatever arrived mid-switch
        std::thread::sleep(Duration::from_millis(50));
        conn.flush_input()?;
        log::info!("Baud rate changed to {}", baud);
        Ok(())
    }
}

/// Strip and check the trailing status word of a response payload
fn split_status(cmd_op: u8, data: &[u8], status_len: usize) -> Result<Vec<u8>> {
    if data.len() < status_len {
        return Err(Error::InvalidResponse {
            cmd: cmd_op,
            reason: "response shorter than its status word",
        });
    }
    let (body, status) = data.split_at(data.len() - status_len);
    if status[0] != 0 {
        let code = status.get(1).copied().unwrap_or(0);
        if code == protocol::STATUS_INVALID_COMMAND {
            return Err(Error::UnsupportedCommand(cmd_op));
        }
        return Err(Error::Status { cmd: cmd_op, code });
    }
    Ok(body.to_vec())
}

/// Bring the link to a known waiting-for-command state
fn sync(conn: &mut Connection, attempts: usize) -> Result<()> {
    let payload = protocol::sync_payload();
    for attempt in 1..=attempts {
        conn.flush_input()?;
        log::debug!("Sync attempt {}/{}", attempt, attempts);
        match conn.command(cmd::SYNC, &payload, 0, SYNC_TIMEOUT) {
            Ok(_) => {
                // The ROM answers the burst with a burst; drain it
                for _ in 0..8 {
                    if conn.read_frame(SYNC_TIMEOUT).is_err() {
                        break;
                    }
                }
                conn.flush_input()?;
                return Ok(());
            }
            Err(e) => log::debug!("Sync attempt {} failed: {}", attempt, e),
        }
    }
    Err(Error::SyncFailed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handoff::start_stub;
    use esploader_dummy::{DummyRom, Event, Recording};

    /// A line that never answers
    struct Dead;

    impl Transport for Dead {
        fn write_all(&mut self, _data: &[u8]) -> Result<()> {
            Ok(())
        }
        fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize> {
            Ok(0)
        }
        fn reset_input_buffer(&mut self) -> Result<()> {
            Ok(())
        }
        fn set_baud_rate(&mut self, _baud: u32) -> Result<()> {
            Ok(())
        }
    }

    fn options() -> ConnectOptions {
        ConnectOptions {
            trace: true,
            enter_bootloader: false,
            sync_attempts: 2,
        }
    }

    fn test_stub() -> StubImage {
        StubImage {
            entry: 0x4038_0000,
            text_start: 0x4038_0000,
            text: vec![0x13, 0x01, 0x01, 0xFF, 0x73, 0x00, 0x10, 0x00],
            data_start: 0x3FC8_0000,
            data: vec![0xDE, 0xAD, 0xBE, 0xEF],
        }
    }

    #[test]
    fn connect_detects_the_chip() {
        let rom = Loader::connect(Box::new(DummyRom::new(13)), &options()).unwrap();
        assert_eq!(rom.chip().name, "ESP32-C6");
        assert_eq!(rom.tier(), LoaderTier::Rom);
        assert!(!rom.is_stub());
        assert!(!rom.secure_download_mode());
        assert_eq!(rom.flash_write_size(), 0x400);
        assert_eq!(rom.status_bytes_len(), 4);
        // Both expensive queries were cached during detection
        assert_eq!(rom.capability_cache().security_info.unwrap().chip_id, 13);
        assert!(rom.capability_cache().chip_magic.is_some());
    }

    #[test]
    fn connect_flags_secure_download_mode() {
        let rom =
            Loader::connect(Box::new(DummyRom::in_secure_download_mode(25)), &options()).unwrap();
        assert!(rom.secure_download_mode());
        assert_eq!(rom.capability_cache().chip_magic, None);
    }

    #[test]
    fn connect_rejects_unknown_chip_ids() {
        match Loader::connect(Box::new(DummyRom::new(99)), &options()) {
            Err(Error::UnknownChip(99)) => {}
            other => panic!("expected UnknownChip, got {:?}", other),
        }
    }

    #[test]
    fn connect_fails_cleanly_on_a_dead_line() {
        match Loader::connect(Box::new(Dead), &options()) {
            Err(Error::SyncFailed) => {}
            other => panic!("expected SyncFailed, got {:?}", other),
        }
    }

    #[test]
    fn register_roundtrip() {
        let mut rom = Loader::connect(Box::new(DummyRom::new(16)), &options()).unwrap();
        rom.write_reg(0x600B_1C00, 0x50D8_3AA1).unwrap();
        assert_eq!(rom.read_reg(0x600B_1C00).unwrap(), 0x50D8_3AA1);
    }

    #[test]
    fn disable_watchdogs_touches_the_descriptor_block() {
        let mut rom = Loader::connect(Box::new(DummyRom::new(25)), &options()).unwrap();
        rom.disable_watchdogs().unwrap();
        let wdt = rom.chip().wdt;
        // RWDT config cleared, SWD auto-feed set, both blocks relocked
        assert_eq!(rom.read_reg(wdt.config0).unwrap(), 0);
        assert_eq!(rom.read_reg(wdt.swd_config).unwrap(), wdt.swd_auto_feed_en);
        assert_eq!(rom.read_reg(wdt.wprotect).unwrap(), 0);
        assert_eq!(rom.read_reg(wdt.swd_wprotect).unwrap(), 0);
    }

    #[test]
    fn security_info_is_memoized() {
        let (recording, events) = Recording::new(DummyRom::new(13));
        let mut rom = Loader::connect(Box::new(recording), &options()).unwrap();
        let before = events.lock().unwrap().len();
        // Cached during detection; no wire traffic now
        let info = rom.get_security_info().unwrap();
        assert_eq!(info.chip_id, 13);
        assert_eq!(rom.chip_id().unwrap(), 13);
        assert_eq!(events.lock().unwrap().len(), before);
    }

    #[test]
    fn closed_session_fails_fast() {
        let mut rom = Loader::connect(Box::new(DummyRom::new(25)), &options()).unwrap();
        rom.close();
        assert!(matches!(rom.read_reg(0), Err(Error::PortClosed)));
        assert!(matches!(rom.hard_reset(), Err(Error::PortClosed)));
        assert!(matches!(rom.into_snapshot(), Err(Error::PortClosed)));
    }

    #[test]
    fn run_stub_uploads_and_hands_off() {
        let dummy = DummyRom::new(25);
        let (recording, events) = Recording::new(dummy);
        let rom = Loader::connect(Box::new(recording), &options()).unwrap();
        let cache_before = rom.capability_cache().clone();
        let trace_before = rom.trace_enabled();

        let mark = events.lock().unwrap().len();
        let stub = rom.run_stub(&test_stub()).unwrap();

        // Same capability surface, stub-tier wire constants
        assert!(stub.is_stub());
        assert_eq!(stub.tier(), LoaderTier::Stub);
        assert_eq!(stub.chip().name, "ESP32-H21");
        assert_eq!(stub.flash_write_size(), 0x4000);
        assert_eq!(stub.status_bytes_len(), 2);

        // Flags and cache transferred by value at the moment of handoff
        assert_eq!(stub.trace_enabled(), trace_before);
        assert!(!stub.secure_download_mode());
        assert_eq!(*stub.capability_cache(), cache_before);

        // Exactly one input flush, after the greeting and before any
        // traffic on the stub session
        let tail: Vec<Event> = events.lock().unwrap()[mark..].to_vec();
        let flushes = tail.iter().filter(|e| **e == Event::Flush).count();
        assert_eq!(flushes, 1);
        assert_eq!(tail.last(), Some(&Event::Flush));
    }

    #[test]
    fn stub_session_is_usable_immediately() {
        let rom = Loader::connect(Box::new(DummyRom::new(16)), &options()).unwrap();
        let mut stub = rom.run_stub(&test_stub()).unwrap();
        // First command after handoff needs no extra handshake
        assert_eq!(stub.chip_id().unwrap(), 16);
        stub.write_reg(0x1000, 7).unwrap();
        assert_eq!(stub.read_reg(0x1000).unwrap(), 7);
    }

    #[test]
    fn run_stub_refused_in_secure_download_mode() {
        let rom =
            Loader::connect(Box::new(DummyRom::in_secure_download_mode(25)), &options()).unwrap();
        assert!(matches!(
            rom.run_stub(&test_stub()),
            Err(Error::StubInSecureDownloadMode)
        ));
    }

    #[test]
    fn handoff_on_closed_session_is_a_connection_error() {
        let mut rom = Loader::connect(Box::new(DummyRom::new(25)), &options()).unwrap();
        rom.close();
        assert!(matches!(start_stub(rom), Err(Error::PortClosed)));
    }

    #[test]
    fn change_baud_retunes_and_flushes() {
        let (recording, events) = Recording::new(DummyRom::new(13));
        let mut rom = Loader::connect(Box::new(recording), &options()).unwrap();
        let mark = events.lock().unwrap().len();
        rom.change_baud(921_600).unwrap();
        let tail: Vec<Event> = events.lock().unwrap()[mark..].to_vec();
        let set = tail.iter().position(|e| *e == Event::SetBaud(921_600));
        let flush = tail.iter().rposition(|e| *e == Event::Flush);
        assert!(set.is_some());
        assert!(flush.is_some());
        assert!(set < flush, "flush must follow the rate switch");
    }
}
