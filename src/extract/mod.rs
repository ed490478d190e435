//! Offline installer package extraction (C6).
//!
//! Installer executables carry a small obfuscated trailer past their last
//! PE section (or, for some variants, inside the `.rsrc` section) that
//! records company/product/version strings and the size of one or more
//! firmware sections sitting immediately before it. This module locates
//! that trailer, reverses its obfuscation, and pulls out the firmware
//! bytes in turn.

mod formats;
mod wrapper;

pub use formats::{LayoutEntry, PackageMetadata, TrailerFormat};

use std::path::Path;

use crate::codec;
use crate::error::ExtractError;

/// One extracted firmware section, already codec-decoded and self-tested.
pub struct ExtractedSection {
    pub name: String,
    pub data: Vec<u8>,
}

pub struct ExtractResult {
    pub metadata: PackageMetadata,
    pub sections: Vec<ExtractedSection>,
}

/// Extract firmware sections from an installer file of the given format.
///
/// `path` may point either directly at the candidate `.exe`/`.bin` or at
/// an outer ZIP/self-extracting-RAR wrapper; both are tried.
pub fn extract(path: &Path, format: TrailerFormat) -> Result<ExtractResult, ExtractError> {
    let direct = std::fs::read(path)?;
    if let Some(result) = try_extract_from_bytes(&direct, format)? {
        return Ok(result);
    }

    for candidate in wrapper::candidate_executables(path)? {
        if let Some(result) = try_extract_from_bytes(&candidate, format)? {
            return Ok(result);
        }
    }
    Err(ExtractError::SignatureMismatch)
}

fn try_extract_from_bytes(
    bytes: &[u8],
    format: TrailerFormat,
) -> Result<Option<ExtractResult>, ExtractError> {
    let trailer_size = format.trailer_size();
    if bytes.len() < trailer_size {
        return Ok(None);
    }

    if format == TrailerFormat::Kbp {
        return try_extract_kbp(bytes).map(Some).or(Ok(None));
    }

    let raw_trailer = &bytes[bytes.len() - trailer_size..];
    let decoded = codec::decode_package(raw_trailer);
    if !format.signature_matches(&decoded) {
        return Ok(None);
    }

    // Self-test: the package transform must be a true inverse of its own
    // encode before we trust anything parsed out of `decoded`.
    let reencoded = codec::encode_package(&decoded);
    if reencoded != raw_trailer {
        return Err(ExtractError::SelfTestFailure("trailer".into()));
    }

    let metadata = formats::parse_metadata(&decoded, format)?;
    let firmware_region_end = bytes.len() - trailer_size;
    let sections = extract_sections(bytes, firmware_region_end, &metadata, format)?;
    Ok(Some(ExtractResult { metadata, sections }))
}

fn extract_sections(
    bytes: &[u8],
    region_end: usize,
    metadata: &PackageMetadata,
    format: TrailerFormat,
) -> Result<Vec<ExtractedSection>, ExtractError> {
    // Firmware (and any info) sections sit contiguously, back to back,
    // immediately before the trailer, in the order the layout array lists
    // them. Walk backwards from `region_end`.
    let mut sections = Vec::with_capacity(metadata.layouts.len());
    let mut cursor = region_end;
    let mut spans = Vec::with_capacity(metadata.layouts.len());
    for entry in metadata.layouts.iter().rev() {
        let total = entry.firmware_size as usize + entry.info_size as usize;
        if cursor < total {
            return Err(ExtractError::UnknownFormat(format!(
                "layout entry {} overruns file start",
                entry.output_name
            )));
        }
        let start = cursor - total;
        spans.push((start, start + entry.firmware_size as usize, entry.output_name.clone()));
        cursor = start;
    }
    spans.reverse();

    for (start, end, name) in spans {
        let raw = bytes
            .get(start..end)
            .ok_or_else(|| ExtractError::UnknownFormat(format!("section {name} out of range")))?;
        let decoded = decode_firmware_section(raw, format);
        let reencoded = encode_firmware_section(&decoded, format);
        if reencoded != raw {
            return Err(ExtractError::SelfTestFailure(name));
        }
        sections.push(ExtractedSection { name, data: decoded });
    }
    Ok(sections)
}

fn decode_firmware_section(raw: &[u8], format: TrailerFormat) -> Vec<u8> {
    match format.family() {
        crate::devices::Family::A => codec::decode_firmware_a(raw),
        crate::devices::Family::B => codec::decode_firmware_b(raw),
    }
}

fn encode_firmware_section(decoded: &[u8], format: TrailerFormat) -> Vec<u8> {
    match format.family() {
        crate::devices::Family::A => codec::encode_firmware_a(decoded),
        crate::devices::Family::B => codec::encode_firmware_b(decoded),
    }
}

/// KBP's trailer obfuscation is keyed off its own trailing 4 bytes rather
/// than fixed XOR words, so it gets a separate path from the shared
/// package-transform formats.
fn try_extract_kbp(bytes: &[u8]) -> Result<ExtractResult, ExtractError> {
    let trailer_size = TrailerFormat::Kbp.trailer_size();
    if bytes.len() < trailer_size {
        return Err(ExtractError::SignatureMismatch);
    }
    let raw_trailer = &bytes[bytes.len() - trailer_size..];
    // The key is derived from the trailer's own first 4 bytes, not the
    // file's trailing bytes.
    let key_bytes: [u8; 4] = raw_trailer[..4].try_into().unwrap();
    let key = codec::kbp_key(key_bytes);

    let decoded = codec::kbp_decode(raw_trailer, key, codec::KbpMode::Strings);
    if !TrailerFormat::Kbp.signature_matches(&decoded) {
        return Err(ExtractError::SignatureMismatch);
    }

    let metadata = formats::parse_metadata(&decoded, TrailerFormat::Kbp)?;
    let entry = metadata
        .layouts
        .first()
        .ok_or_else(|| ExtractError::UnknownFormat("kbp trailer missing firmware entry".into()))?;

    // KBP firmware lives at a fixed file offset rather than contiguous
    // with the trailer.
    const KBP_FIRMWARE_OFFSET: usize = 0x54000;
    let end = KBP_FIRMWARE_OFFSET + entry.firmware_size as usize;
    let raw_fw = bytes
        .get(KBP_FIRMWARE_OFFSET..end)
        .ok_or(ExtractError::UnknownFormat("kbp firmware section out of range".into()))?;

    // KBP-decrypt first, then run the result through the family-A packet
    // codec on top, same as every other family-A-lineage installer format.
    let kbp_plain = codec::kbp_decode(raw_fw, key, codec::KbpMode::Firmware);
    let decoded_fw = codec::decode_firmware_a(&kbp_plain);
    let reencoded = codec::encode_firmware_a(&decoded_fw);
    if reencoded != kbp_plain {
        return Err(ExtractError::SelfTestFailure("kbp firmware".into()));
    }

    Ok(ExtractResult {
        metadata,
        sections: vec![ExtractedSection { name: entry.output_name.clone(), data: decoded_fw }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maajonsn_round_trips_through_extract() {
        let firmware = vec![0xAB; 64];
        let encoded_fw = codec::encode_firmware_a(&firmware);

        let mut trailer_plain = vec![0u8; TrailerFormat::Maajonsn.trailer_size()];
        trailer_plain[1056..1060].copy_from_slice(&(firmware.len() as u32).to_le_bytes());
        let tail_start = trailer_plain.len() - 10;
        trailer_plain[tail_start..].copy_from_slice(b".maajonsn\0");
        let trailer_encoded = codec::encode_package(&trailer_plain);

        let mut file = encoded_fw.clone();
        file.extend_from_slice(&trailer_encoded);

        let result = try_extract_from_bytes(&file, TrailerFormat::Maajonsn).unwrap().unwrap();
        assert_eq!(result.sections.len(), 1);
        assert_eq!(result.sections[0].data, firmware);
    }

    #[test]
    fn mismatched_signature_returns_none_not_error() {
        let file = vec![0u8; TrailerFormat::Maajonsn.trailer_size() + 16];
        let result = try_extract_from_bytes(&file, TrailerFormat::Maajonsn).unwrap();
        assert!(result.is_none());
    }
}
