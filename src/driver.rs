//! Shared driver plumbing: the progress-observer trait used by both
//! protocol families' long-running blocking operations, and the
//! family-dispatching `Driver` sum type (§9: "do not attempt a unified
//! base type — the command sets differ enough that a shared interface
//! would either lose precision or widen into a least-common denominator").

use std::fmt;

use hidapi::HidApi;

use crate::devices::Family;
use crate::error::DriverError;
use crate::lifecycle::Candidate;
use crate::{protocol_a, protocol_b};

/// Phases of a flash or dump operation, reported to the progress callback.
#[derive(Debug, Clone)]
pub enum Phase {
    EnteringBootloader,
    ReadingInfo,
    Erasing,
    Writing { total: usize },
    Verifying,
    WritingVersion,
    Rebooting,
    Dumping { total: usize },
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EnteringBootloader => write!(f, "Entering bootloader mode"),
            Self::ReadingInfo => write!(f, "Reading device info"),
            Self::Erasing => write!(f, "Erasing flash region"),
            Self::Writing { total } => write!(f, "Writing firmware ({total} bytes)"),
            Self::Verifying => write!(f, "Verifying write"),
            Self::WritingVersion => write!(f, "Writing version record"),
            Self::Rebooting => write!(f, "Rebooting device"),
            Self::Dumping { total } => write!(f, "Dumping flash ({total} bytes)"),
        }
    }
}

/// Observer hook for long-running blocking request/response sequences.
pub trait FlashProgress: Send {
    fn on_phase(&mut self, phase: &Phase);
    fn on_chunk(&mut self, done: usize, total: usize);
    fn on_complete(&mut self);
}

/// No-op implementation for callers that don't need progress reporting
/// (e.g. tests).
pub struct SilentProgress;

impl FlashProgress for SilentProgress {
    fn on_phase(&mut self, _phase: &Phase) {}
    fn on_chunk(&mut self, _done: usize, _total: usize) {}
    fn on_complete(&mut self) {}
}

/// Dispatch once at enumeration time: `Driver = A(..) | B(..)`.
pub enum Driver {
    A(protocol_a::ProtoA),
    B(protocol_b::ProtoB),
}

impl Driver {
    pub fn open(api: &HidApi, candidate: Candidate) -> Result<Self, DriverError> {
        let transport = crate::lifecycle::open(api, &candidate)?;
        Ok(match candidate.class.family {
            Family::A => Driver::A(protocol_a::ProtoA::new(transport, candidate.class)),
            Family::B => Driver::B(protocol_b::ProtoB::new(transport, candidate.class)),
        })
    }

    pub fn is_in_bootloader(&self) -> Result<bool, DriverError> {
        match self {
            Driver::A(p) => p.is_in_bootloader(),
            Driver::B(p) => p.read_mode(),
        }
    }

    pub fn read_version(&self) -> Result<String, DriverError> {
        match self {
            Driver::A(p) => {
                // Family A reads the version record at the bootloader-reported
                // version address, 52 bytes at a time, stopping at the
                // declared string length.
                let info = p.read_info()?;
                let first = p.flash_read_raw(info.ver_addr)?;
                let raw_len = u32::from_le_bytes(first[0..4].try_into().unwrap());
                if raw_len == 0xFFFF_FFFF {
                    return Ok("CLEARED".to_string());
                }
                let len = raw_len as usize;
                let mut buf = first[4..].to_vec();
                let mut addr = info.ver_addr + 60;
                while buf.len() < len {
                    let more = p.flash_read_raw(addr)?;
                    buf.extend_from_slice(&more);
                    addr += 60;
                }
                buf.truncate(len);
                Ok(String::from_utf8_lossy(&buf).to_string())
            }
            Driver::B(p) => p.read_version(),
        }
    }

    pub fn reboot(&self, to_bootloader: bool) -> Result<(), DriverError> {
        match self {
            Driver::A(p) => {
                if to_bootloader {
                    p.reset_boot()
                } else {
                    p.reset_switch()
                }
            }
            Driver::B(p) => {
                if to_bootloader {
                    p.reset_bootloader()
                } else {
                    p.reset_application()
                }
            }
        }
    }
}
