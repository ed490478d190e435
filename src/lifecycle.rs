//! Device Lifecycle (C5): enumeration, interface selection, open/close,
//! and reboot rediscovery. Grounded on the same scan-then-poll shape as
//! the teacher's own bootloader discovery, generalized across both
//! protocol families instead of one fixed VID/PID pair.

use std::ffi::CString;
use std::thread;
use std::time::Duration;

use hidapi::HidApi;

use crate::devices::{device_registry, DeviceClass};
use crate::error::DriverError;
use crate::transport::HidTransport;

/// One enumerated candidate: its class entry, HID path, and whether it is
/// currently answering in bootloader mode.
pub struct Candidate {
    pub class: &'static DeviceClass,
    pub path: CString,
    pub in_bootloader: bool,
}

/// Enumerate every attached HID device against the closed known-device
/// registry, matching interface selection by (usage page, usage) for the
/// device's family.
pub fn enumerate(api: &HidApi) -> Vec<Candidate> {
    let registry = device_registry();
    let mut out = Vec::new();

    for info in api.device_list() {
        let Some(class) = registry.find(info.vendor_id(), info.product_id()) else {
            continue;
        };
        let (usage_page, usage) = class.family.usage();
        if info.usage_page() != usage_page || info.usage() != usage {
            continue;
        }
        out.push(Candidate {
            class,
            path: info.path().to_owned(),
            in_bootloader: class.is_boot_pid(info.product_id()),
        });
    }

    out
}

/// Resolve exactly one candidate, optionally disambiguated by index
/// (matching `list`'s ordering, since none of the supported devices
/// expose a serial number).
pub fn resolve_one(api: &HidApi, index: Option<usize>) -> Result<Candidate, DriverError> {
    let mut candidates = enumerate(api);
    match index {
        Some(i) => {
            if i >= candidates.len() {
                return Err(DriverError::DeviceMissing);
            }
            Ok(candidates.remove(i))
        }
        None => match candidates.len() {
            0 => Err(DriverError::DeviceMissing),
            1 => Ok(candidates.remove(0)),
            n => Err(DriverError::DeviceAmbiguous(n)),
        },
    }
}

pub fn open(api: &HidApi, candidate: &Candidate) -> Result<HidTransport, DriverError> {
    Ok(HidTransport::open(api, candidate.path.as_c_str())?)
}

/// Poll for a device to reappear after a reset, retrying up to
/// `max_attempts` times with 1 s sleeps between attempts. `want_boot`
/// selects whether we're waiting for the bootloader-mode PID or the
/// application-mode PID. Finding more than one matching candidate on any
/// attempt is a hard failure (the caller must unplug the others).
pub fn rediscover(
    class: &'static DeviceClass,
    want_boot: bool,
    max_attempts: u32,
) -> Result<Candidate, DriverError> {
    let deadline_step = Duration::from_secs(1);

    for attempt in 0..max_attempts {
        if attempt > 0 {
            thread::sleep(deadline_step);
        }

        let api = HidApi::new().map_err(|e| DriverError::Transport(e.into()))?;
        let matches: Vec<Candidate> = enumerate(&api)
            .into_iter()
            .filter(|c| std::ptr::eq(c.class, class) && c.in_bootloader == want_boot)
            .collect();

        match matches.len() {
            0 => continue,
            1 => return Ok(matches.into_iter().next().unwrap()),
            n => return Err(DriverError::DeviceAmbiguous(n)),
        }
    }

    Err(DriverError::DeviceMissing)
}

/// Rebind a transport's underlying OS handle to a freshly rediscovered
/// candidate, in place, without disturbing any other client state.
pub fn replace(
    transport: &mut HidTransport,
    api: &HidApi,
    candidate: &Candidate,
) -> Result<(), DriverError> {
    transport.replace(api, candidate.path.as_c_str())?;
    Ok(())
}

/// Upper bound used throughout the lifecycle for reboot polling, matching
/// the "up to 3 x 1s" retry budget.
pub const REDISCOVERY_ATTEMPTS: u32 = 3;

/// How long a caller should wait after issuing ENTER_BOOTLOADER before the
/// first rediscovery poll.
pub const STABILIZE_DELAY: Duration = Duration::from_millis(500);

pub fn wait_stabilize() {
    thread::sleep(STABILIZE_DELAY);
}
