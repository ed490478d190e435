//! Firmware image loading and pre-flight validation.
//!
//! A thin wrapper over the raw bytes a user points `flash`/`dump` at: loads
//! from disk, rejects obviously-wrong files before any destructive device
//! operation runs.

use std::fs;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum FirmwareError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("firmware length {0} is not a multiple of 4")]
    Unaligned(usize),

    #[error("firmware file contains only {0:#04x} bytes")]
    DegenerateContent(u8),
}

#[derive(Debug, Clone)]
pub struct FirmwareImage {
    pub data: Vec<u8>,
}

impl FirmwareImage {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, FirmwareError> {
        let data = fs::read(path)?;
        let image = Self { data };
        image.validate()?;
        Ok(image)
    }

    pub fn validate(&self) -> Result<(), FirmwareError> {
        if self.data.len() % 4 != 0 {
            return Err(FirmwareError::Unaligned(self.data.len()));
        }
        if !self.data.is_empty() {
            if self.data.iter().all(|&b| b == 0xFF) {
                return Err(FirmwareError::DegenerateContent(0xFF));
            }
            if self.data.iter().all(|&b| b == 0x00) {
                return Err(FirmwareError::DegenerateContent(0x00));
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_unaligned_length() {
        let image = FirmwareImage { data: vec![1, 2, 3] };
        assert!(matches!(image.validate(), Err(FirmwareError::Unaligned(3))));
    }

    #[test]
    fn rejects_all_0xff() {
        let image = FirmwareImage { data: vec![0xFF; 64] };
        assert!(matches!(image.validate(), Err(FirmwareError::DegenerateContent(0xFF))));
    }

    #[test]
    fn accepts_empty() {
        // Emptiness itself is rejected later by the driver as SizeExceeded,
        // not here — this layer only screens out obviously-corrupt content.
        let image = FirmwareImage { data: vec![] };
        assert!(image.validate().is_ok());
    }

    #[test]
    fn accepts_plausible_image() {
        let image = FirmwareImage { data: vec![0x10, 0x20, 0x30, 0x40] };
        assert!(image.validate().is_ok());
    }
}
