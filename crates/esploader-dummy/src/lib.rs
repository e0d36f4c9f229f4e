//! esploader-dummy - In-memory bootloader emulation for testing
//!
//! [`DummyRom`] implements the [`Transport`] trait and answers the
//! loader command set the way a ROM bootloader would: SLIP-framed
//! responses, a four-byte status word in ROM mode and a two-byte one
//! once the "stub" is running, register storage, an emulated flash
//! array, and the OHAI greeting after a RAM download that jumps to an
//! entry point. It is useful for tests and hardware-free dry runs.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

mod recording;

pub use recording::{Event, Recording};

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use esploader_core::error::Result;
use esploader_core::protocol::{self, cmd, SecurityInfo};
use esploader_core::slip::{self, SlipDecoder};
use esploader_core::Transport;
use md5::{Digest, Md5};

/// Default emulated flash size
const DEFAULT_FLASH_SIZE: usize = 256 * 1024;

/// Placeholder contents of the chip-identification register
const MAGIC_REG_VALUE: u32 = 0xCAFE_F00D;

/// Parameters of an in-progress RAM or flash download
#[derive(Debug, Clone, Copy, Default)]
struct Download {
    block_size: u32,
    offset: u32,
}

/// An emulated ROM bootloader behind the [`Transport`] trait
pub struct DummyRom {
    chip_id: u32,
    secure_download_mode: bool,
    stub_running: bool,
    decoder: SlipDecoder,
    outbound: VecDeque<u8>,
    regs: HashMap<u32, u32>,
    ram: HashMap<u32, Vec<u8>>,
    ram_download: Download,
    flash_download: Download,
    flash: Arc<Mutex<Vec<u8>>>,
    baud: u32,
    flush_count: usize,
}

impl DummyRom {
    /// Create an emulated chip reporting the given chip id
    pub fn new(chip_id: u32) -> Self {
        let mut regs = HashMap::new();
        regs.insert(protocol::CHIP_MAGIC_REG_ADDR, MAGIC_REG_VALUE);
        Self {
            chip_id,
            secure_download_mode: false,
            stub_running: false,
            decoder: SlipDecoder::new(),
            outbound: VecDeque::new(),
            regs,
            ram: HashMap::new(),
            ram_download: Download::default(),
            flash_download: Download::default(),
            flash: Arc::new(Mutex::new(vec![0xFF; DEFAULT_FLASH_SIZE])),
            baud: 115_200,
            flush_count: 0,
        }
    }

    /// Create an emulated chip with secure download mode active
    pub fn in_secure_download_mode(chip_id: u32) -> Self {
        let mut rom = Self::new(chip_id);
        rom.secure_download_mode = true;
        rom
    }

    /// Shared handle to the emulated flash contents
    ///
    /// The handle stays valid after the emulator is boxed into a
    /// session, so tests can inspect what was written.
    pub fn flash_handle(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.flash)
    }

    /// Number of input flushes the host has issued
    pub fn flush_count(&self) -> usize {
        self.flush_count
    }

    /// Whether the emulated stub has been started
    pub fn stub_running(&self) -> bool {
        self.stub_running
    }

    /// Bytes written to RAM at the given load address
    pub fn ram_segment(&self, addr: u32) -> Option<&[u8]> {
        self.ram.get(&addr).map(|v| v.as_slice())
    }

    fn status_len(&self) -> usize {
        if self.stub_running {
            protocol::STUB_STATUS_BYTES_LENGTH
        } else {
            4
        }
    }

    fn push_frame(&mut self, payload: &[u8]) {
        self.outbound.extend(slip::encode(payload));
    }

    fn respond(&mut self, cmd: u8, value: u32, body: &[u8], error: Option<u8>) {
        let mut packet = Vec::with_capacity(8 + body.len() + self.status_len());
        packet.push(protocol::DIR_RESPONSE);
        packet.push(cmd);
        let size = (body.len() + self.status_len()) as u16;
        packet.extend_from_slice(&size.to_le_bytes());
        packet.extend_from_slice(&value.to_le_bytes());
        packet.extend_from_slice(body);
        match error {
            None => packet.extend(std::iter::repeat(0).take(self.status_len())),
            Some(code) => {
                packet.push(1);
                packet.push(code);
                packet.extend(std::iter::repeat(0).take(self.status_len() - 2));
            }
        }
        self.push_frame(&packet);
    }

    fn respond_ok(&mut self, cmd: u8, value: u32, body: &[u8]) {
        self.respond(cmd, value, body, None);
    }

    fn respond_err(&mut self, cmd: u8, code: u8) {
        self.respond(cmd, 0, &[], Some(code));
    }

    fn handle_request(&mut self, frame: &[u8]) {
        if frame.len() < 8 || frame[0] != protocol::DIR_REQUEST {
            log::debug!("dummy: ignoring malformed request frame");
            return;
        }
        let cmd = frame[1];
        let declared_chk = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let data = frame[8..].to_vec();
        let data = data.as_slice();

        match cmd {
            cmd::SYNC => {
                // The ROM answers a sync burst with a burst of its own
                for _ in 0..8 {
                    self.respond_ok(cmd::SYNC, 0, &[]);
                }
            }
            cmd::READ_REG => {
                if self.secure_download_mode {
                    self.respond_err(cmd, protocol::STATUS_INVALID_COMMAND);
                    return;
                }
                let addr = le_u32(data, 0);
                let value = self.regs.get(&addr).copied().unwrap_or(0);
                self.respond_ok(cmd, value, &[]);
            }
            cmd::WRITE_REG => {
                let addr = le_u32(data, 0);
                let value = le_u32(data, 4);
                self.regs.insert(addr, value);
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::GET_SECURITY_INFO => {
                let info = SecurityInfo {
                    flags: u32::from(self.secure_download_mode),
                    flash_crypt_cnt: 0,
                    key_purposes: [0; 7],
                    chip_id: self.chip_id,
                    api_version: 0,
                };
                let body = info.to_bytes();
                self.respond_ok(cmd, 0, &body);
            }
            cmd::MEM_BEGIN => {
                self.ram_download = Download {
                    block_size: le_u32(data, 8),
                    offset: le_u32(data, 12),
                };
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::MEM_DATA => {
                if data.len() < 16 {
                    self.respond_err(cmd, 0x06);
                    return;
                }
                let len = le_u32(data, 0) as usize;
                let seq = le_u32(data, 4);
                let payload = &data[16..16 + len.min(data.len() - 16)];
                if protocol::checksum(payload) != declared_chk {
                    self.respond_err(cmd, 0x06);
                    return;
                }
                let addr = self.ram_download.offset + seq * self.ram_download.block_size;
                self.ram.insert(addr, payload.to_vec());
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::MEM_END => {
                let entry = le_u32(data, 4);
                self.respond_ok(cmd, 0, &[]);
                if entry != 0 {
                    // The "stub" starts: new protocol epoch, new framing
                    self.stub_running = true;
                    self.decoder.reset();
                    self.push_frame(protocol::STUB_GREETING);
                }
            }
            cmd::FLASH_BEGIN => {
                self.flash_download = Download {
                    block_size: le_u32(data, 8),
                    offset: le_u32(data, 12),
                };
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::FLASH_DATA => {
                if data.len() < 16 {
                    self.respond_err(cmd, 0x06);
                    return;
                }
                let len = le_u32(data, 0) as usize;
                let seq = le_u32(data, 4);
                let payload = &data[16..16 + len.min(data.len() - 16)];
                if protocol::checksum(payload) != declared_chk {
                    self.respond_err(cmd, 0x06);
                    return;
                }
                let start =
                    (self.flash_download.offset + seq * self.flash_download.block_size) as usize;
                let mut flash = self.flash.lock().unwrap();
                if start + payload.len() > flash.len() {
                    drop(flash);
                    self.respond_err(cmd, 0x07);
                    return;
                }
                flash[start..start + payload.len()].copy_from_slice(payload);
                drop(flash);
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::FLASH_END | cmd::SPI_ATTACH => {
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::CHANGE_BAUDRATE => {
                let new = le_u32(data, 0);
                self.baud = new;
                self.respond_ok(cmd, 0, &[]);
            }
            cmd::SPI_FLASH_MD5 => {
                let addr = le_u32(data, 0) as usize;
                let size = le_u32(data, 4) as usize;
                let flash = self.flash.lock().unwrap();
                if addr + size > flash.len() {
                    drop(flash);
                    self.respond_err(cmd, 0x07);
                    return;
                }
                let mut hasher = Md5::new();
                hasher.update(&flash[addr..addr + size]);
                let digest = hasher.finalize();
                drop(flash);
                if self.stub_running {
                    let body: [u8; 16] = digest.into();
                    self.respond_ok(cmd, 0, &body);
                } else {
                    // The ROM answers with the digest as ASCII hex
                    let mut body = Vec::with_capacity(32);
                    for b in digest {
                        body.extend_from_slice(format!("{:02x}", b).as_bytes());
                    }
                    self.respond_ok(cmd, 0, &body);
                }
            }
            cmd::ERASE_FLASH => {
                if !self.stub_running {
                    self.respond_err(cmd, protocol::STATUS_INVALID_COMMAND);
                    return;
                }
                self.flash.lock().unwrap().fill(0xFF);
                self.respond_ok(cmd, 0, &[]);
            }
            unknown => {
                log::debug!("dummy: unknown command 0x{:02X}", unknown);
                self.respond_err(unknown, protocol::STATUS_INVALID_COMMAND);
            }
        }
    }
}

fn le_u32(data: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    if data.len() >= offset + 4 {
        bytes.copy_from_slice(&data[offset..offset + 4]);
    }
    u32::from_le_bytes(bytes)
}

impl Transport for DummyRom {
    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let frames = self.decoder.feed_all(data)?;
        for frame in frames {
            self.handle_request(&frame);
        }
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8], _timeout: Duration) -> Result<usize> {
        let n = buf.len().min(self.outbound.len());
        for slot in buf.iter_mut().take(n) {
            *slot = self.outbound.pop_front().unwrap();
        }
        Ok(n)
    }

    fn reset_input_buffer(&mut self) -> Result<()> {
        self.outbound.clear();
        self.flush_count += 1;
        Ok(())
    }

    fn set_baud_rate(&mut self, baud: u32) -> Result<()> {
        self.baud = baud;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use esploader_core::protocol::{encode_request, Response};

    fn transact(rom: &mut DummyRom, cmd: u8, data: &[u8], chk: u32) -> Vec<Response> {
        rom.write_all(&slip::encode(&encode_request(cmd, data, chk)))
            .unwrap();
        let mut raw = vec![0u8; 4096];
        let n = rom.read(&mut raw, Duration::from_millis(1)).unwrap();
        let mut dec = SlipDecoder::new();
        dec.feed_all(&raw[..n])
            .unwrap()
            .iter()
            .map(|f| Response::parse(f).unwrap())
            .collect()
    }

    #[test]
    fn sync_answers_with_a_burst() {
        let mut rom = DummyRom::new(25);
        let responses = transact(&mut rom, cmd::SYNC, &protocol::sync_payload(), 0);
        assert_eq!(responses.len(), 8);
        assert!(responses.iter().all(|r| r.cmd == cmd::SYNC));
    }

    #[test]
    fn register_write_then_read() {
        let mut rom = DummyRom::new(25);
        let mut data = 0x6000_0000u32.to_le_bytes().to_vec();
        data.extend_from_slice(&0x1234_5678u32.to_le_bytes());
        data.extend_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
        data.extend_from_slice(&0u32.to_le_bytes());
        transact(&mut rom, cmd::WRITE_REG, &data, 0);

        let responses = transact(&mut rom, cmd::READ_REG, &0x6000_0000u32.to_le_bytes(), 0);
        assert_eq!(responses[0].value, 0x1234_5678);
        // ROM status word is four bytes
        assert_eq!(responses[0].data.len(), 4);
    }

    #[test]
    fn secure_download_mode_refuses_register_reads() {
        let mut rom = DummyRom::in_secure_download_mode(25);
        let responses = transact(
            &mut rom,
            cmd::READ_REG,
            &protocol::CHIP_MAGIC_REG_ADDR.to_le_bytes(),
            0,
        );
        let status = &responses[0].data;
        assert_eq!(status[0], 1);
        assert_eq!(status[1], protocol::STATUS_INVALID_COMMAND);
    }

    #[test]
    fn security_info_reports_chip_id() {
        let mut rom = DummyRom::new(13);
        let responses = transact(&mut rom, cmd::GET_SECURITY_INFO, &[], 0);
        let info = SecurityInfo::parse(&responses[0].data).unwrap();
        assert_eq!(info.chip_id, 13);
    }

    #[test]
    fn flush_clears_pending_output_and_is_counted() {
        let mut rom = DummyRom::new(25);
        rom.write_all(&slip::encode(&encode_request(
            cmd::SYNC,
            &protocol::sync_payload(),
            0,
        )))
        .unwrap();
        assert!(!rom.outbound.is_empty());
        rom.reset_input_buffer().unwrap();
        assert!(rom.outbound.is_empty());
        assert_eq!(rom.flush_count(), 1);
    }
}
