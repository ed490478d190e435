//! High-level workflows composing the device lifecycle and per-family
//! drivers into the operations the CLI exposes: `list`, `version`,
//! `reboot`, `flash`, `dump`, `extract`.

use std::path::Path;

use hidapi::HidApi;

use crate::devices::Family;
use crate::driver::{Driver, FlashProgress, SilentProgress};
use crate::error::DriverError;
use crate::firmware::FirmwareImage;
use crate::lifecycle;
use crate::{extract, protocol_a, protocol_b};

pub struct DeviceSummary {
    pub index: usize,
    pub name: &'static str,
    pub family: Family,
    pub vid: u16,
    pub pid: u16,
    pub in_bootloader: bool,
}

pub fn list(api: &HidApi) -> Vec<DeviceSummary> {
    lifecycle::enumerate(api)
        .into_iter()
        .enumerate()
        .map(|(index, c)| DeviceSummary {
            index,
            name: c.class.name,
            family: c.class.family,
            vid: c.class.vid,
            pid: c.class.pid,
            in_bootloader: c.in_bootloader,
        })
        .collect()
}

pub fn version(api: &HidApi, index: Option<usize>) -> Result<String, DriverError> {
    let candidate = lifecycle::resolve_one(api, index)?;
    let driver = Driver::open(api, candidate)?;
    driver.read_version()
}

pub fn reboot(api: &HidApi, index: Option<usize>, to_bootloader: bool) -> Result<(), DriverError> {
    let candidate = lifecycle::resolve_one(api, index)?;
    let driver = Driver::open(api, candidate)?;
    driver.reboot(to_bootloader)
}

/// Flash a firmware image, holding device identity across the bootloader
/// reboot round-trip the way the protocol drivers require.
pub fn flash(
    api: &HidApi,
    index: Option<usize>,
    firmware: &FirmwareImage,
    version: &str,
    progress: &mut dyn FlashProgress,
) -> Result<(), DriverError> {
    let candidate = lifecycle::resolve_one(api, index)?;
    match candidate.class.family {
        Family::A => protocol_a::flash(api, candidate, &firmware.data, version, progress),
        Family::B => protocol_b::flash(api, candidate, &firmware.data, version, progress),
    }
}

/// Dump the application flash region to a plaintext buffer, reversing the
/// on-device codec for the resolved device's family.
pub fn dump(api: &HidApi, index: Option<usize>) -> Result<Vec<u8>, DriverError> {
    let candidate = lifecycle::resolve_one(api, index)?;
    let class = candidate.class;
    match class.family {
        Family::A => {
            let transport = lifecycle::open(api, &candidate)?;
            let proto = protocol_a::ProtoA::new(transport, class);
            let info = proto.read_info()?;
            let size = info.flash_size - info.app_addr;
            let mut progress = SilentProgress;
            let raw = proto.dump_via_crc_oracle(info.app_addr, size, &mut progress)?;
            Ok(crate::codec::decode_firmware_a(&raw))
        }
        Family::B => {
            let transport = lifecycle::open(api, &candidate)?;
            let proto = protocol_b::ProtoB::new(transport, class);
            let info = proto.read_info()?;
            let size = info.flash_size - info.app_addr;
            let expected_crc = proto.crc32(info.app_addr, size)?;
            // No read-back command exists for family B; the CRC oracle is
            // not implemented for this family either (see open questions),
            // so dumping is limited to integrity confirmation of whatever
            // the caller already has on disk, not raw recovery.
            let _ = expected_crc;
            Err(DriverError::ProtocolMismatch(
                "flash dump is not supported for family B devices".into(),
            ))
        }
    }
}

pub fn extract_package(
    path: &Path,
    format: extract::TrailerFormat,
) -> Result<extract::ExtractResult, crate::error::ExtractError> {
    extract::extract(path, format)
}
