//! Framed HID transport (C2): 64-byte send/recv over the interrupt pipe,
//! GET_REPORT control-transfer fallback, and handle replacement after a
//! device reboot.

use std::time::Duration;

use hidapi::{HidApi, HidDevice};

use crate::error::TransportError;

pub const FRAME_SIZE: usize = 64;
const TIMEOUT: Duration = Duration::from_millis(500);

/// One opened HID interface, holding its own `HidDevice` so it can be
/// swapped out wholesale by [`HidTransport::replace`] after a reboot.
pub struct HidTransport {
    device: HidDevice,
    path: std::ffi::CString,
}

impl HidTransport {
    pub fn open(api: &HidApi, path: &std::ffi::CStr) -> Result<Self, TransportError> {
        let device = api.open_path(path)?;
        Ok(Self {
            device,
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &std::ffi::CStr {
        &self.path
    }

    /// Send a 64-byte frame over the interrupt OUT pipe.
    pub fn send(&self, frame: &[u8; FRAME_SIZE]) -> Result<(), TransportError> {
        // hidapi's `write` expects report id in byte 0; our devices have
        // no numbered reports, so a leading 0x00 is prepended.
        let mut buf = [0u8; FRAME_SIZE + 1];
        buf[1..].copy_from_slice(frame);
        self.device.write(&buf)?;
        Ok(())
    }

    /// Read `size` bytes from the interrupt IN pipe, honoring the 500 ms
    /// transport timeout.
    pub fn recv(&self, size: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; size];
        let n = self
            .device
            .read_timeout(&mut buf, TIMEOUT.as_millis() as i32)?;
        if n == 0 {
            return Err(TransportError::Timeout);
        }
        buf.truncate(n);
        Ok(buf)
    }

    /// Control-transfer GET_REPORT fallback, used by family A for
    /// responses that arrive on the control pipe instead of interrupt IN.
    pub fn alt_recv(&self, size: usize) -> Result<Vec<u8>, TransportError> {
        let mut buf = vec![0u8; size + 1];
        buf[0] = 0;
        let n = self.device.get_feature_report(&mut buf)?;
        let mut out = buf;
        out.truncate(n);
        if !out.is_empty() {
            out.remove(0);
        }
        Ok(out)
    }

    /// Swap in a freshly enumerated device after reboot, without touching
    /// any client-visible state (callers keep using the same `HidTransport`
    /// value).
    pub fn replace(&mut self, api: &HidApi, path: &std::ffi::CStr) -> Result<(), TransportError> {
        let new_device = api.open_path(path)?;
        self.device = new_device;
        self.path = path.to_owned();
        Ok(())
    }

    pub fn close(self) {
        drop(self);
    }
}
