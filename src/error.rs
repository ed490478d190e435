//! Error taxonomy, one enum per architectural seam.
//!
//! Transport errors wrap `hidapi`; driver errors wrap transport errors and
//! add the protocol-level failure modes; extraction errors are independent
//! (the extractor never touches a device).

use thiserror::Error;

/// Errors from the HID transport layer (C2).
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("HID error: {0}")]
    Hid(#[from] hidapi::HidError),

    #[error("transport timed out")]
    Timeout,

    #[error("short frame: expected {expected} bytes, got {actual}")]
    ShortFrame { expected: usize, actual: usize },
}

/// Errors from the protocol drivers and device lifecycle (C3/C4/C5).
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("protocol mismatch: {0}")]
    ProtocolMismatch(String),

    #[error("CRC mismatch after write")]
    CrcMismatch,

    #[error("verify mismatch after write")]
    VerifyMismatch,

    #[error("{0} candidate devices found, expected exactly one")]
    DeviceAmbiguous(usize),

    #[error("no matching device found")]
    DeviceMissing,

    #[error("firmware size {firmware} exceeds maximum region size {max}")]
    SizeExceeded { firmware: usize, max: usize },

    #[error("version string too long: {len} bytes, maximum {max}")]
    VersionTooLong { len: usize, max: usize },

    #[error("bootloader not reached within timeout")]
    BootloaderTimeout,
}

/// Errors from the offline installer package extractor (C6).
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("installer trailer signature did not match")]
    SignatureMismatch,

    #[error("codec self-test failed: encode(decode(x)) != x for section {0}")]
    SelfTestFailure(String),

    #[error("unknown installer format: {0}")]
    UnknownFormat(String),

    #[error("PE parsing error: {0}")]
    Pe(String),

    #[error("RAR extraction error: {0}")]
    Rar(String),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("no .exe candidate found in outer wrapper")]
    NoExeCandidate,
}
