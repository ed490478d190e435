//! Installer trailer formats: sizes, signatures, and metadata parsing.
//!
//! Field offsets below follow the original implementation's C-struct
//! layouts (UTF-16LE company/product/version strings, then a per-layout
//! array of `{firmware_size, info_size, name}` entries). Offsets are
//! recorded as named constants per format rather than re-derived, since
//! only the original tool's struct definitions — not a from-scratch
//! binary spec — establish them.

use crate::error::ExtractError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrailerFormat {
    Maajonsn,
    MaaV101,
    MaaV102,
    MaaV105,
    MaaV106,
    Kbp,
}

impl TrailerFormat {
    pub fn from_cli_name(s: &str) -> Option<Self> {
        match s {
            "maajonsn" => Some(Self::Maajonsn),
            "maav101" => Some(Self::MaaV101),
            "maav102" => Some(Self::MaaV102),
            "maav105" => Some(Self::MaaV105),
            "maav106" => Some(Self::MaaV106),
            "kbp_cykb" => Some(Self::Kbp),
            _ => None,
        }
    }

    pub fn trailer_size(self) -> usize {
        match self {
            Self::Maajonsn => 0x4B8,
            Self::MaaV101 => MAAV101_STRUCT_SIZE,
            Self::MaaV102 => 0xB24,
            Self::MaaV105 => 0x2B58,
            Self::MaaV106 => MAAV106_STRUCT_SIZE,
            Self::Kbp => 588,
        }
    }

    /// Whether the signature matches the tail of an already-decoded
    /// trailer buffer.
    pub fn signature_matches(self, decoded: &[u8]) -> bool {
        let tail = |n: usize| decoded.len() >= n && &decoded[decoded.len() - n..];
        match self {
            Self::Maajonsn => tail(10) == Some(b".maajonsn\0".as_slice()),
            Self::MaaV101 => tail(13).map(|t| contains(t, b".maaV101")).unwrap_or(false),
            Self::MaaV102 => tail(11).map(|t| contains(t, b".maaV102")).unwrap_or(false),
            Self::MaaV105 => tail(13).map(|t| contains(t, b".maaV105")).unwrap_or(false),
            Self::MaaV106 => tail(13).map(|t| contains(t, b".maaV106")).unwrap_or(false),
            Self::Kbp => tail(4) == Some(b"lins".as_slice()),
        }
    }

    /// Which family codec the wrapped firmware section was obfuscated
    /// with: maajonsn/maav101/kbp come from POK3R-lineage installers
    /// (family A codec), maav102/105/106 from CYKB-lineage ones (family B).
    pub fn family(self) -> crate::devices::Family {
        match self {
            Self::Maajonsn | Self::MaaV101 | Self::Kbp => crate::devices::Family::A,
            Self::MaaV102 | Self::MaaV105 | Self::MaaV106 => crate::devices::Family::B,
        }
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

// maaV101 and maaV106 trailers embed a fixed-size device/layout struct
// rather than a size given directly in the spec table; these constants
// mirror the original tool's `sizeof(struct)` values for those variants.
const MAAV101_STRUCT_SIZE: usize = 0x4BC;
const MAAV106_STRUCT_SIZE: usize = 0x2C98;

// wchar_t fields in the original structs are UTF-16; `WCHAR_LEN` is the
// byte width of a `wchar_t[0x104]` company/product/version/desc field.
const WSTR_CHARS: usize = 0x104;
const WSTR_BYTES: usize = WSTR_CHARS * 2;

/// One firmware section's metadata entry, as recorded in the trailer's
/// layout array. `output_name` is the final, space-sanitized file stem
/// (without the `.bin` extension) the original tool names this section's
/// extracted file after.
#[derive(Debug, Clone)]
pub struct LayoutEntry {
    pub firmware_size: u32,
    pub info_size: u32,
    pub output_name: String,
}

#[derive(Debug, Clone)]
pub struct PackageMetadata {
    pub company: String,
    pub product: String,
    pub version: String,
    pub layouts: Vec<LayoutEntry>,
}

fn read_u32(buf: &[u8], offset: usize) -> Result<u32, ExtractError> {
    buf.get(offset..offset + 4)
        .map(|s| u32::from_le_bytes(s.try_into().unwrap()))
        .ok_or(ExtractError::UnknownFormat("truncated trailer".into()))
}

fn read_utf16le(buf: &[u8], offset: usize, max_chars: usize) -> Result<String, ExtractError> {
    let bytes = buf
        .get(offset..offset + max_chars * 2)
        .ok_or(ExtractError::UnknownFormat("truncated trailer".into()))?;
    let units: Vec<u16> = bytes
        .chunks_exact(2)
        .map(|c| u16::from_le_bytes([c[0], c[1]]))
        .take_while(|&u| u != 0)
        .collect();
    Ok(String::from_utf16_lossy(&units))
}

fn read_ascii(buf: &[u8], offset: usize, len: usize) -> Result<String, ExtractError> {
    let bytes = buf
        .get(offset..offset + len)
        .ok_or(ExtractError::UnknownFormat("truncated trailer".into()))?;
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
}

fn sanitize(name: &str) -> String {
    name.replace(' ', "_")
}

/// Parse the decoded trailer into company/product/version strings and the
/// per-layout firmware/info section sizes, plus the final output file stem
/// for each layout (the original tool's naming convention differs per
/// format: global product/version for `maajonsn`, per-layout version for
/// `maav101`, per-section desc/version for `maav105`/`maav106`).
pub fn parse_metadata(decoded: &[u8], format: TrailerFormat) -> Result<PackageMetadata, ExtractError> {
    match format {
        TrailerFormat::Maajonsn => {
            // app_vid/app_pid/boot_vid/boot_pid (16) | company (0x104 wchars)
            // | product (0x104 wchars) | firmware_size (u32) | layout_name
            // (30 wchars) | version (12 ascii bytes) | ... | sig (10 bytes)
            let company = read_utf16le(decoded, 16, WSTR_CHARS)?;
            let product = read_utf16le(decoded, 16 + WSTR_BYTES, WSTR_CHARS)?;
            let firmware_size = read_u32(decoded, 16 + 2 * WSTR_BYTES)?;
            let layout = read_utf16le(decoded, 16 + 2 * WSTR_BYTES + 4, 30)?;
            let version = read_ascii(decoded, 16 + 2 * WSTR_BYTES + 4 + 60, 12)?;
            let output_name = sanitize(&format!("{product}-{layout}-{version}"));
            Ok(PackageMetadata {
                company,
                product,
                version,
                layouts: vec![LayoutEntry { firmware_size, info_size: 0, output_name }],
            })
        }
        TrailerFormat::MaaV101 => {
            // app_vid/app_pid/boot_vid/boot_pid (16) | company | product |
            // layouts[2] (72 bytes each: firmware_size, name[30], version[6],
            // unknown_46) | sig
            let company = read_utf16le(decoded, 16, WSTR_CHARS)?;
            let product = read_utf16le(decoded, 16 + WSTR_BYTES, WSTR_CHARS)?;
            let layouts_base = 16 + 2 * WSTR_BYTES;
            const LAYOUT_LEN: usize = 72;
            let mut layouts = Vec::with_capacity(2);
            for i in 0..2 {
                let base = layouts_base + i * LAYOUT_LEN;
                let firmware_size = read_u32(decoded, base)?;
                if firmware_size == 0 {
                    continue;
                }
                let name = read_utf16le(decoded, base + 4, 30)?;
                let version = read_ascii(decoded, base + 64, 6)?;
                let output_name = sanitize(&format!("{product}-{name}-{version}"));
                layouts.push(LayoutEntry { firmware_size, info_size: 0, output_name });
            }
            Ok(PackageMetadata { company, product, version: String::new(), layouts })
        }
        TrailerFormat::MaaV102 => {
            // device (38) | desc (0x104 wchars) | company | product | version
            // | unknown_846 (2) | layouts[9] (80 bytes each) | sig1 | sig2
            const DEVICE_LEN: usize = 38;
            let company_off = DEVICE_LEN + WSTR_BYTES;
            let product_off = company_off + WSTR_BYTES;
            let version_off = product_off + WSTR_BYTES;
            let layouts_base = version_off + WSTR_BYTES + 2;
            const LAYOUT_LEN: usize = 80;

            let company = read_utf16le(decoded, company_off, WSTR_CHARS)?;
            let product = read_utf16le(decoded, product_off, WSTR_CHARS)?;
            let version = read_utf16le(decoded, version_off, WSTR_CHARS)?;

            let mut layouts = Vec::with_capacity(9);
            for i in 0..9 {
                let base = layouts_base + i * LAYOUT_LEN;
                let firmware_size = read_u32(decoded, base)?;
                if firmware_size == 0 {
                    continue;
                }
                let info_size = read_u32(decoded, base + 4)?;
                let name = read_utf16le(decoded, base + 8, 30)?;
                let output_name = sanitize(&format!("{product}-{name}-{version}"));
                layouts.push(LayoutEntry { firmware_size, info_size, output_name });
            }
            Ok(PackageMetadata { company, product, version, layouts })
        }
        TrailerFormat::MaaV105 | TrailerFormat::MaaV106 => parse_maav105_106(decoded, format),
        TrailerFormat::Kbp => {
            // The KBP trailer's metadata the core needs is the firmware
            // length at byte offset 4, and the output file name (no
            // product/version components) at byte offset 0xb8.
            let firmware_size = read_u32(decoded, 4)?;
            let name = read_ascii(decoded, 0xb8, 32)?;
            let output_name = sanitize(&name);
            Ok(PackageMetadata {
                company: String::new(),
                product: String::new(),
                version: String::new(),
                layouts: vec![LayoutEntry { firmware_size, info_size: 0, output_name }],
            })
        }
    }
}

/// Shared layout for `maav105`/`maav106`: 5 fixed device slots, 5 fixed
/// sections (each a desc/version pair plus 9 fixed layout slots), then the
/// global desc/company/product/version strings. Only the device struct
/// size differs between the two formats.
fn parse_maav105_106(decoded: &[u8], format: TrailerFormat) -> Result<PackageMetadata, ExtractError> {
    const SECTION_COUNT: usize = 5;
    const LAYOUT_COUNT: usize = 9;
    const LAYOUT_LEN: usize = 80;
    const SECTION_LEN: usize = 2 * WSTR_BYTES + LAYOUT_COUNT * LAYOUT_LEN;

    let device_len = match format {
        TrailerFormat::MaaV105 => 40,
        TrailerFormat::MaaV106 => 0x68,
        _ => unreachable!("parse_maav105_106 called with unrelated format"),
    };

    let sections_base = device_len * SECTION_COUNT;
    let num_off = sections_base + SECTION_LEN * SECTION_COUNT;
    let desc_off = num_off + 2;
    let company_off = desc_off + WSTR_BYTES;
    let product_off = company_off + WSTR_BYTES;
    let version_off = product_off + WSTR_BYTES;

    let company = read_utf16le(decoded, company_off, WSTR_CHARS)?;
    let product = read_utf16le(decoded, product_off, WSTR_CHARS)?;
    let version = read_utf16le(decoded, version_off, WSTR_CHARS)?;

    let mut layouts = Vec::new();
    for s in 0..SECTION_COUNT {
        let section_base = sections_base + s * SECTION_LEN;
        let sdesc = read_utf16le(decoded, section_base, WSTR_CHARS)?;
        let sversion = read_utf16le(decoded, section_base + WSTR_BYTES, WSTR_CHARS)?;
        let layouts_base = section_base + 2 * WSTR_BYTES;
        for j in 0..LAYOUT_COUNT {
            let base = layouts_base + j * LAYOUT_LEN;
            let firmware_size = read_u32(decoded, base)?;
            if firmware_size == 0 {
                continue;
            }
            let info_size = read_u32(decoded, base + 4)?;
            let name = read_utf16le(decoded, base + 8, 30)?;
            let output_name = sanitize(&format!("{product}-{version}-{sdesc}-{name}-{sversion}"));
            layouts.push(LayoutEntry { firmware_size, info_size, output_name });
        }
    }
    Ok(PackageMetadata { company, product, version, layouts })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maajonsn_signature_detects_exact_tail() {
        let mut decoded = vec![0u8; 100];
        decoded.extend_from_slice(b".maajonsn\0");
        assert!(TrailerFormat::Maajonsn.signature_matches(&decoded));
    }

    #[test]
    fn maav102_signature_tolerates_padding_in_tail_window() {
        let mut decoded = vec![0u8; 100];
        decoded.extend_from_slice(b"x.maaV102xx");
        assert!(TrailerFormat::MaaV102.signature_matches(&decoded));
    }

    #[test]
    fn from_cli_name_round_trips() {
        assert_eq!(TrailerFormat::from_cli_name("kbp_cykb"), Some(TrailerFormat::Kbp));
        assert_eq!(TrailerFormat::from_cli_name("bogus"), None);
    }

    #[test]
    fn maajonsn_metadata_reads_product_layout_and_version() {
        let mut decoded = vec![0u8; TrailerFormat::Maajonsn.trailer_size()];
        write_utf16(&mut decoded, 536, "Vortex POK3R");
        decoded[1056..1060].copy_from_slice(&64u32.to_le_bytes());
        write_utf16(&mut decoded, 1060, "QWERTY");
        decoded[1120..1120 + 3].copy_from_slice(b"117");
        decoded[decoded.len() - 10..].copy_from_slice(b".maajonsn\0");

        let metadata = parse_metadata(&decoded, TrailerFormat::Maajonsn).unwrap();
        assert_eq!(metadata.layouts.len(), 1);
        assert_eq!(metadata.layouts[0].firmware_size, 64);
        assert_eq!(metadata.layouts[0].output_name, "Vortex_POK3R-QWERTY-117");
    }

    #[test]
    fn maav102_metadata_skips_zero_length_layout_slots() {
        let mut decoded = vec![0u8; TrailerFormat::MaaV102.trailer_size()];
        let product_off = 38 + 2 * WSTR_BYTES;
        let version_off = product_off + WSTR_BYTES;
        let layouts_base = version_off + WSTR_BYTES + 2;
        write_utf16(&mut decoded, product_off, "Core");
        write_utf16(&mut decoded, version_off, "1.0");
        decoded[layouts_base..layouts_base + 4].copy_from_slice(&100u32.to_le_bytes());
        write_utf16(&mut decoded, layouts_base + 8, "Default");

        let metadata = parse_metadata(&decoded, TrailerFormat::MaaV102).unwrap();
        assert_eq!(metadata.layouts.len(), 1);
        assert_eq!(metadata.layouts[0].output_name, "Core-Default-1.0");
    }

    fn write_utf16(buf: &mut [u8], offset: usize, text: &str) {
        for (i, unit) in text.encode_utf16().enumerate() {
            buf[offset + i * 2..offset + i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
    }
}
