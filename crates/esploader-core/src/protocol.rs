//! Bootloader command protocol constants and packet codecs
//!
//! Request and response packets ride inside SLIP frames. All multi-byte
//! fields are little-endian. The response status word length differs
//! between the ROM loader and the flasher stub, so status checking is
//! left to the session layer, which knows which tier it is talking to.

use crate::error::{Error, Result};

/// Request direction byte
pub const DIR_REQUEST: u8 = 0x00;
/// Response direction byte
pub const DIR_RESPONSE: u8 = 0x01;

/// Checksum seed for data-bearing commands
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Error code the loader returns for a command it does not know
pub const STATUS_INVALID_COMMAND: u8 = 0x05;

/// Register whose contents identify the boot ROM
///
/// Reading it is also the probe for secure download mode: a loader in
/// that mode refuses register reads with [`STATUS_INVALID_COMMAND`].
pub const CHIP_MAGIC_REG_ADDR: u32 = 0x4000_1000;

/// Block size for RAM download commands
pub const RAM_BLOCK_SIZE: u32 = 0x1800;

/// Flash-write block size the stub negotiates
pub const STUB_FLASH_WRITE_SIZE: u32 = 0x4000;
/// Status word length on stub responses
pub const STUB_STATUS_BYTES_LENGTH: usize = 2;

/// Greeting frame the stub sends once it is running
pub const STUB_GREETING: &[u8] = b"OHAI";

// Command opcodes
pub mod cmd {
    /// Begin a flash write sequence
    pub const FLASH_BEGIN: u8 = 0x02;
    /// One block of flash data
    pub const FLASH_DATA: u8 = 0x03;
    /// End a flash write sequence
    pub const FLASH_END: u8 = 0x04;
    /// Begin a RAM download sequence
    pub const MEM_BEGIN: u8 = 0x05;
    /// End a RAM download sequence, optionally jumping to an entry point
    pub const MEM_END: u8 = 0x06;
    /// One block of RAM data
    pub const MEM_DATA: u8 = 0x07;
    /// Synchronize with the loader
    pub const SYNC: u8 = 0x08;
    /// Write a 32-bit register
    pub const WRITE_REG: u8 = 0x09;
    /// Read a 32-bit register
    pub const READ_REG: u8 = 0x0A;
    /// Attach the SPI flash, optionally on alternate pins
    pub const SPI_ATTACH: u8 = 0x0D;
    /// Change the link baud rate
    pub const CHANGE_BAUDRATE: u8 = 0x0F;
    /// MD5 digest over a flash region
    pub const SPI_FLASH_MD5: u8 = 0x13;
    /// Security info block, including the chip id
    pub const GET_SECURITY_INFO: u8 = 0x14;
    /// Erase the entire flash (stub only)
    pub const ERASE_FLASH: u8 = 0xD0;
}

/// XOR checksum over a data block, seeded with [`CHECKSUM_SEED`]
///
/// Only the RAM and flash data commands carry a checksum; every other
/// command sends 0 in the checksum field.
pub fn checksum(data: &[u8]) -> u32 {
    let mut chk = CHECKSUM_SEED;
    for &b in data {
        chk ^= b;
    }
    chk as u32
}

/// Encode a request packet (pre-framing)
pub fn encode_request(cmd: u8, data: &[u8], chk: u32) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + data.len());
    out.push(DIR_REQUEST);
    out.push(cmd);
    out.extend_from_slice(&(data.len() as u16).to_le_bytes());
    out.extend_from_slice(&chk.to_le_bytes());
    out.extend_from_slice(data);
    out
}

/// The payload the SYNC command carries
pub fn sync_payload() -> Vec<u8> {
    let mut data = vec![0x07, 0x07, 0x12, 0x20];
    data.extend_from_slice(&[0x55; 32]);
    data
}

/// A decoded response packet
///
/// `data` still carries the trailing status word; the session layer
/// strips and checks it against its tier's status length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Opcode this responds to
    pub cmd: u8,
    /// The 32-bit value field (e.g. the register contents for READ_REG)
    pub value: u32,
    /// Payload including the trailing status word
    pub data: Vec<u8>,
}

impl Response {
    /// Parse a response packet out of a SLIP frame payload
    pub fn parse(frame: &[u8]) -> Result<Response> {
        if frame.len() < 8 {
            return Err(Error::InvalidResponse {
                cmd: if frame.len() >= 2 { frame[1] } else { 0 },
                reason: "response shorter than its header",
            });
        }
        if frame[0] != DIR_RESPONSE {
            return Err(Error::InvalidResponse {
                cmd: frame[1],
                reason: "direction byte is not a response",
            });
        }
        let cmd = frame[1];
        let size = u16::from_le_bytes([frame[2], frame[3]]) as usize;
        let value = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        let data = frame[8..].to_vec();
        if data.len() != size {
            // Some ROM revisions report a stale size field; trust the frame
            log::debug!(
                "response to 0x{:02X} declares {} data bytes, frame carries {}",
                cmd,
                size,
                data.len()
            );
        }
        Ok(Response { cmd, value, data })
    }
}

/// Security info block returned by [`cmd::GET_SECURITY_INFO`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SecurityInfo {
    /// Security feature flags
    pub flags: u32,
    /// Flash encryption counter efuse value
    pub flash_crypt_cnt: u8,
    /// Key purpose efuse values
    pub key_purposes: [u8; 7],
    /// Chip id, the registry key for chip detection
    pub chip_id: u32,
    /// ROM API version
    pub api_version: u32,
}

impl SecurityInfo {
    /// Byte length of the info block on the wire
    pub const WIRE_LEN: usize = 20;

    /// Parse the info block from the front of a response payload
    ///
    /// Trailing bytes (the status word) are ignored so this works
    /// before the chip, and therefore the status length, is known.
    pub fn parse(data: &[u8]) -> Result<SecurityInfo> {
        if data.len() < Self::WIRE_LEN {
            return Err(Error::InvalidResponse {
                cmd: cmd::GET_SECURITY_INFO,
                reason: "security info block truncated",
            });
        }
        let mut key_purposes = [0u8; 7];
        key_purposes.copy_from_slice(&data[5..12]);
        Ok(SecurityInfo {
            flags: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            flash_crypt_cnt: data[4],
            key_purposes,
            chip_id: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
            api_version: u32::from_le_bytes([data[16], data[17], data[18], data[19]]),
        })
    }

    /// Serialize the info block (used by the dummy loader emulation)
    pub fn to_bytes(&self) -> [u8; Self::WIRE_LEN] {
        let mut out = [0u8; Self::WIRE_LEN];
        out[0..4].copy_from_slice(&self.flags.to_le_bytes());
        out[4] = self.flash_crypt_cnt;
        out[5..12].copy_from_slice(&self.key_purposes);
        out[12..16].copy_from_slice(&self.chip_id.to_le_bytes());
        out[16..20].copy_from_slice(&self.api_version.to_le_bytes());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_seed_and_xor() {
        assert_eq!(checksum(&[]), 0xEF);
        assert_eq!(checksum(&[0x01, 0x02]), 0xEC);
        // XOR of a block with itself cancels back to the seed
        assert_eq!(checksum(&[0xA5, 0xA5]), 0xEF);
    }

    #[test]
    fn request_layout() {
        let req = encode_request(cmd::READ_REG, &0x4000_1000u32.to_le_bytes(), 0);
        assert_eq!(req[0], DIR_REQUEST);
        assert_eq!(req[1], cmd::READ_REG);
        assert_eq!(u16::from_le_bytes([req[2], req[3]]), 4);
        assert_eq!(&req[4..8], &[0, 0, 0, 0]);
        assert_eq!(&req[8..], &[0x00, 0x10, 0x00, 0x40]);
    }

    #[test]
    fn response_roundtrip() {
        let frame = [
            DIR_RESPONSE,
            cmd::READ_REG,
            0x04,
            0x00,
            0x78,
            0x56,
            0x34,
            0x12,
            0,
            0,
            0,
            0,
        ];
        let resp = Response::parse(&frame).unwrap();
        assert_eq!(resp.cmd, cmd::READ_REG);
        assert_eq!(resp.value, 0x1234_5678);
        assert_eq!(resp.data, vec![0, 0, 0, 0]);
    }

    #[test]
    fn short_frame_is_invalid() {
        assert!(matches!(
            Response::parse(&[DIR_RESPONSE, 0x0A, 0x00]),
            Err(Error::InvalidResponse { .. })
        ));
    }

    #[test]
    fn request_direction_is_not_a_response() {
        let frame = [DIR_REQUEST, cmd::SYNC, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            Response::parse(&frame),
            Err(Error::InvalidResponse { .. })
        ));
    }

    #[test]
    fn security_info_roundtrip_ignores_status_tail() {
        let info = SecurityInfo {
            flags: 0x0000_0001,
            flash_crypt_cnt: 3,
            key_purposes: [1, 2, 3, 4, 5, 6, 7],
            chip_id: 25,
            api_version: 1,
        };
        let mut wire = info.to_bytes().to_vec();
        wire.extend_from_slice(&[0, 0, 0, 0]); // ROM status word
        assert_eq!(SecurityInfo::parse(&wire).unwrap(), info);
    }

    #[test]
    fn truncated_security_info_is_invalid() {
        assert!(SecurityInfo::parse(&[0; 10]).is_err());
    }

    #[test]
    fn sync_payload_shape() {
        let p = sync_payload();
        assert_eq!(p.len(), 36);
        assert_eq!(&p[..4], &[0x07, 0x07, 0x12, 0x20]);
        assert!(p[4..].iter().all(|&b| b == 0x55));
    }
}
