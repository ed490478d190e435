//! Protocol A Driver (C3): command encoding and state machine for the
//! Holtek/POK3R-family bootloader.

use crate::codec;
use crate::crc::crc16_xmodem;
use crate::devices::DeviceClass;
use crate::driver::{FlashProgress, Phase};
use crate::error::DriverError;
use crate::lifecycle::{self, Candidate};
use crate::transport::{HidTransport, FRAME_SIZE};

use hidapi::HidApi;

pub mod cmd {
    pub const ERASE: u8 = 0;
    pub const FLASH: u8 = 1;
    pub const CRC: u8 = 2;
    pub const GET_INFO: u8 = 3;
    pub const RESET: u8 = 4;
    pub const DISCONNECT: u8 = 5;
}

pub mod subcmd {
    pub const FLASH_VERIFY: u8 = 0;
    pub const FLASH_WRITE: u8 = 1;
    pub const FLASH_READ: u8 = 2;
    pub const FLASH_ERASE_CHECK: u8 = 3;

    pub const RESET_SWITCH: u8 = 0;
    pub const RESET_BOOT: u8 = 1;
}

pub const RESP_SUCCESS: u8 = 0x4F;
const SUCCESS_OFFSET: usize = 4;
const PACKET_LEN: usize = 52;

/// Info struct returned by `GET_INFO`.
#[derive(Debug, Clone, Copy)]
pub struct DeviceInfo {
    pub app_addr: u32,
    pub page_size: u32,
    pub ver_addr: u32,
    pub flash_size: u32,
}

fn build_frame(command: u8, sub: u8, payload: &[u8]) -> [u8; FRAME_SIZE] {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = command;
    frame[1] = sub;
    // crc16_le at [2..4], zeroed while computing
    let copy_len = payload.len().min(60);
    frame[4..4 + copy_len].copy_from_slice(&payload[..copy_len]);
    let crc = crc16_xmodem(&frame);
    frame[2..4].copy_from_slice(&crc.to_le_bytes());
    frame
}

pub struct ProtoA {
    transport: HidTransport,
    class: &'static DeviceClass,
}

impl ProtoA {
    pub fn new(transport: HidTransport, class: &'static DeviceClass) -> Self {
        Self { transport, class }
    }

    /// Rebind to a freshly rediscovered candidate after a reboot, in place,
    /// rather than constructing a new wrapper around a new transport.
    pub fn rebind(&mut self, api: &HidApi, candidate: &Candidate) -> Result<(), DriverError> {
        lifecycle::replace(&mut self.transport, api, candidate)
    }

    fn request(&self, command: u8, sub: u8, payload: &[u8]) -> Result<Vec<u8>, DriverError> {
        let frame = build_frame(command, sub, payload);
        self.transport.send(&frame)?;
        let resp = self.transport.recv(FRAME_SIZE)?;
        self.check_response(command, sub, &resp)?;
        Ok(resp)
    }

    /// Like [`request`] but retries `alt_recv` (control-transfer GET_REPORT)
    /// when the interrupt-pipe response times out — used for ERASE, whose
    /// response may be legitimately delayed.
    fn request_retry_alt(&self, command: u8, sub: u8, payload: &[u8]) -> Result<Vec<u8>, DriverError> {
        let frame = build_frame(command, sub, payload);
        self.transport.send(&frame)?;
        loop {
            match self.transport.recv(FRAME_SIZE) {
                Ok(resp) => {
                    self.check_response(command, sub, &resp)?;
                    return Ok(resp);
                }
                Err(crate::error::TransportError::Timeout) => {
                    match self.transport.alt_recv(FRAME_SIZE) {
                        Ok(resp) if !resp.is_empty() => {
                            self.check_response(command, sub, &resp)?;
                            return Ok(resp);
                        }
                        _ => continue,
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn check_response(&self, command: u8, sub: u8, resp: &[u8]) -> Result<(), DriverError> {
        if resp.len() < FRAME_SIZE {
            return Err(DriverError::ProtocolMismatch(format!(
                "short response: {} bytes",
                resp.len()
            )));
        }
        if resp[0] != command || resp[1] != sub {
            return Err(DriverError::ProtocolMismatch(format!(
                "expected cmd={command:02x} sub={sub:02x}, got cmd={:02x} sub={:02x}",
                resp[0], resp[1]
            )));
        }
        if resp[SUCCESS_OFFSET] != RESP_SUCCESS {
            return Err(DriverError::ProtocolMismatch(format!(
                "expected RESP_SUCCESS at offset {SUCCESS_OFFSET}, got {:#04x}",
                resp[SUCCESS_OFFSET]
            )));
        }
        Ok(())
    }

    pub fn read_info(&self) -> Result<DeviceInfo, DriverError> {
        let resp = self.request(cmd::GET_INFO, 0, &[])?;
        let p = &resp[SUCCESS_OFFSET + 1..];
        Ok(DeviceInfo {
            app_addr: u32::from_le_bytes(p[0..4].try_into().unwrap()),
            page_size: u32::from_le_bytes(p[4..8].try_into().unwrap()),
            ver_addr: u32::from_le_bytes(p[8..12].try_into().unwrap()),
            flash_size: u32::from_le_bytes(p[12..16].try_into().unwrap()),
        })
    }

    pub fn is_in_bootloader(&self) -> Result<bool, DriverError> {
        // GET_INFO only succeeds against the bootloader.
        Ok(self.read_info().is_ok())
    }

    pub fn erase(&self, start: u32, end: u32) -> Result<(), DriverError> {
        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&start.to_le_bytes());
        payload[4..8].copy_from_slice(&end.to_le_bytes());
        self.request_retry_alt(cmd::ERASE, 0, &payload)?;
        self.request(cmd::FLASH, subcmd::FLASH_ERASE_CHECK, &payload)?;
        Ok(())
    }

    pub fn flash_write(&self, addr: u32, data: &[u8; PACKET_LEN]) -> Result<(), DriverError> {
        let mut payload = [0u8; 4 + PACKET_LEN];
        payload[0..4].copy_from_slice(&addr.to_le_bytes());
        payload[4..].copy_from_slice(data);
        self.request(cmd::FLASH, subcmd::FLASH_WRITE, &payload)?;
        Ok(())
    }

    pub fn flash_verify(&self, addr: u32, data: &[u8; PACKET_LEN]) -> Result<(), DriverError> {
        let mut payload = [0u8; 4 + PACKET_LEN];
        payload[0..4].copy_from_slice(&addr.to_le_bytes());
        payload[4..].copy_from_slice(data);
        let resp = self.request(cmd::FLASH, subcmd::FLASH_VERIFY, &payload)?;
        if resp[SUCCESS_OFFSET] != RESP_SUCCESS {
            return Err(DriverError::VerifyMismatch);
        }
        Ok(())
    }

    /// FLASH_READ: device returns 60 bytes at `addr`, used both for
    /// reading back the version record and as a building block for a
    /// plain (non-oracle) region dump.
    pub fn flash_read_raw(&self, addr: u32) -> Result<Vec<u8>, DriverError> {
        let mut payload = [0u8; 4];
        payload.copy_from_slice(&addr.to_le_bytes());
        let resp = self.request(cmd::FLASH, subcmd::FLASH_READ, &payload)?;
        Ok(resp[SUCCESS_OFFSET + 1..].to_vec())
    }

    pub fn crc(&self, addr: u32, size: u32) -> Result<u16, DriverError> {
        let mut payload = [0u8; 8];
        payload[0..4].copy_from_slice(&addr.to_le_bytes());
        payload[4..8].copy_from_slice(&size.to_le_bytes());
        let resp = self.request(cmd::CRC, 0, &payload)?;
        Ok(u16::from_le_bytes([resp[SUCCESS_OFFSET + 1], resp[SUCCESS_OFFSET + 2]]))
    }

    pub fn reset_switch(&self) -> Result<(), DriverError> {
        self.request(cmd::RESET, subcmd::RESET_SWITCH, &[])?;
        Ok(())
    }

    pub fn reset_boot(&self) -> Result<(), DriverError> {
        self.request(cmd::RESET, subcmd::RESET_BOOT, &[])?;
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), DriverError> {
        // The device drops the bus right after this; a timeout here is
        // expected and not an error.
        let frame = build_frame(cmd::DISCONNECT, 0, &[]);
        let _ = self.transport.send(&frame);
        Ok(())
    }

    /// Version-record zero-pad length: round up to the next multiple of 4.
    /// (A sibling source variant computes `(len * 3) / 4`, which is wrong
    /// for lengths not divisible by 4 and is intentionally not reproduced.)
    pub fn version_pad_len(version_str_len: usize) -> usize {
        4 * version_str_len.div_ceil(4)
    }

    pub fn write_version(&self, ver_addr: u32, version: &str) -> Result<(), DriverError> {
        let gap = self.read_info()?.app_addr.saturating_sub(ver_addr) as usize;
        if version.len() > gap {
            return Err(DriverError::VersionTooLong { len: version.len(), max: gap });
        }
        let mut record = Vec::new();
        record.extend_from_slice(&(version.len() as u32).to_le_bytes());
        record.extend_from_slice(version.as_bytes());
        let pad = Self::version_pad_len(version.len()) - version.len();
        record.extend(std::iter::repeat(0u8).take(pad));

        for (i, chunk) in record.chunks(PACKET_LEN).enumerate() {
            let mut block = [0u8; PACKET_LEN];
            block[..chunk.len()].copy_from_slice(chunk);
            self.flash_write(ver_addr + (i * PACKET_LEN) as u32, &block)?;
        }
        Ok(())
    }

    /// Dump flash via the CRC-oracle: a single-byte CRC-16 query inverts
    /// to exactly one byte of flash, since CRC-16/XMODEM over a single
    /// byte is a bijection on `0..=255`.
    pub fn dump_via_crc_oracle(
        &self,
        start: u32,
        len: u32,
        progress: &mut dyn FlashProgress,
    ) -> Result<Vec<u8>, DriverError> {
        let mut out = Vec::with_capacity(len as usize);
        progress.on_phase(&Phase::Dumping { total: len as usize });
        for offset in 0..len {
            let crc = self.crc(start + offset, 1)?;
            let byte = crate::crc::invert_byte_crc(crc).ok_or_else(|| {
                DriverError::ProtocolMismatch(format!("CRC {crc:#06x} has no known preimage"))
            })?;
            out.push(byte);
            progress.on_chunk(offset as usize + 1, len as usize);
        }
        Ok(out)
    }
}

/// Top-level flash workflow (§4.3): enter bootloader, size-check, encode,
/// erase, write, verify, CRC-check against plaintext, write version, switch.
pub fn flash(
    api: &HidApi,
    candidate: Candidate,
    firmware_plain: &[u8],
    version: &str,
    progress: &mut dyn FlashProgress,
) -> Result<(), DriverError> {
    let class = candidate.class;

    let mut proto = ProtoA::new(lifecycle::open(api, &candidate)?, class);
    if !candidate.in_bootloader {
        progress.on_phase(&Phase::EnteringBootloader);
        proto.reset_boot()?;
        lifecycle::wait_stabilize();
        let boot_candidate = lifecycle::rediscover(class, true, lifecycle::REDISCOVERY_ATTEMPTS)?;
        proto.rebind(api, &boot_candidate)?;
    }

    progress.on_phase(&Phase::ReadingInfo);
    let info = proto.read_info()?;

    let max_size = info.flash_size.saturating_sub(info.app_addr) as usize;
    if firmware_plain.is_empty() || firmware_plain.len() > max_size {
        return Err(DriverError::SizeExceeded { firmware: firmware_plain.len(), max: max_size });
    }

    let encoded = codec::encode_firmware_a(firmware_plain);

    progress.on_phase(&Phase::Erasing);
    proto.erase(info.ver_addr, info.app_addr + encoded.len() as u32)?;

    progress.on_phase(&Phase::Writing { total: encoded.len() });
    for (i, chunk) in encoded.chunks(PACKET_LEN).enumerate() {
        let mut block = [0u8; PACKET_LEN];
        block[..chunk.len()].copy_from_slice(chunk);
        proto.flash_write(info.app_addr + (i * PACKET_LEN) as u32, &block)?;
        progress.on_chunk((i + 1) * PACKET_LEN, encoded.len());
    }

    progress.on_phase(&Phase::Verifying);
    for (i, chunk) in encoded.chunks(PACKET_LEN).enumerate() {
        let mut block = [0u8; PACKET_LEN];
        block[..chunk.len()].copy_from_slice(chunk);
        proto.flash_verify(info.app_addr + (i * PACKET_LEN) as u32, &block)?;
    }

    // The device CRCs decoded data; compare against CRC of plaintext.
    let device_crc = proto.crc(info.app_addr, encoded.len() as u32)?;
    let plain_crc = crc16_xmodem(firmware_plain);
    if device_crc != plain_crc {
        return Err(DriverError::CrcMismatch);
    }

    progress.on_phase(&Phase::WritingVersion);
    proto.write_version(info.ver_addr, version)?;

    progress.on_phase(&Phase::Rebooting);
    proto.reset_switch()?;
    progress.on_complete();
    Ok(())
}
