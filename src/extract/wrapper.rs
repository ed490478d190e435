//! Locating the candidate installer executable inside its outer wrapper.
//!
//! CoolerMaster-style installers ship as a self-extracting RAR archive;
//! other vendors ship a plain ZIP. Either way the trailer-bearing `.exe`
//! is buried a level down from the file the user hands us.

use std::io::Read;
use std::path::Path;

use crate::error::ExtractError;

/// Pull candidate executable payloads out of an installer container.
///
/// Tries ZIP first (cheap, no temp files), then falls back to the
/// CoolerMaster-style self-extracting-RAR wrapper: the RAR payload isn't
/// the whole file, it starts right after the PE's `.rsrc` section and
/// runs to EOF. Returns every `.exe` member found, largest first, since
/// the trailer-bearing binary is usually the largest member in both
/// container kinds.
pub fn candidate_executables(path: &Path) -> Result<Vec<Vec<u8>>, ExtractError> {
    if let Ok(mut candidates) = extract_from_zip(path) {
        if !candidates.is_empty() {
            candidates.sort_by_key(|b| std::cmp::Reverse(b.len()));
            return Ok(candidates);
        }
    }
    let pe_bytes = std::fs::read(path)?;
    let mut candidates = extract_from_pe_rsrc_rar(&pe_bytes)?;
    if candidates.is_empty() {
        return Err(ExtractError::NoExeCandidate);
    }
    candidates.sort_by_key(|b| std::cmp::Reverse(b.len()));
    Ok(candidates)
}

fn extract_from_zip(path: &Path) -> Result<Vec<Vec<u8>>, ExtractError> {
    let file = std::fs::File::open(path)?;
    let mut archive = zip::ZipArchive::new(file)?;
    let mut out = Vec::new();
    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        if entry.name().to_ascii_lowercase().ends_with(".exe") {
            let mut buf = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut buf)?;
            out.push(buf);
        }
    }
    Ok(out)
}

fn extract_from_rar(path: &Path) -> Result<Vec<Vec<u8>>, ExtractError> {
    let archive = unrar::Archive::new(path)
        .open_for_processing()
        .map_err(|e| ExtractError::Rar(e.to_string()))?;

    let mut out = Vec::new();
    let mut cursor = Some(archive);
    while let Some(archive) = cursor {
        let Some(header) = archive.read_header().map_err(|e| ExtractError::Rar(e.to_string()))? else {
            break;
        };
        let is_exe = header
            .entry()
            .filename
            .to_string_lossy()
            .to_ascii_lowercase()
            .ends_with(".exe");
        if is_exe {
            let dir = tempfile::tempdir()?;
            let (data, next) = header
                .extract_to(dir.path())
                .map_err(|e| ExtractError::Rar(e.to_string()))?;
            let written = dir.path().join(data.filename);
            out.push(std::fs::read(written)?);
            cursor = Some(next);
        } else {
            cursor = Some(header.skip().map_err(|e| ExtractError::Rar(e.to_string()))?);
        }
    }
    Ok(out)
}

/// The self-extracting RAR payload embedded in a CoolerMaster-style
/// installer starts immediately after the `.rsrc` section's raw data (not
/// within it) and runs to the end of the file.
fn rsrc_trailing_rar(pe_bytes: &[u8]) -> Result<Option<&[u8]>, ExtractError> {
    let pe = goblin::pe::PE::parse(pe_bytes).map_err(|e| ExtractError::Pe(e.to_string()))?;
    for section in &pe.sections {
        if section.name().map(|n| n == ".rsrc").unwrap_or(false) {
            let end = section.pointer_to_raw_data as usize + section.size_of_raw_data as usize;
            return Ok(pe_bytes.get(end..));
        }
    }
    Ok(None)
}

/// `unrar` only opens archives by path, so the RAR slice found past the
/// `.rsrc` section is written out to a temp file before extraction.
fn extract_from_pe_rsrc_rar(pe_bytes: &[u8]) -> Result<Vec<Vec<u8>>, ExtractError> {
    let Some(rar_data) = rsrc_trailing_rar(pe_bytes)? else {
        return Ok(Vec::new());
    };
    let dir = tempfile::tempdir()?;
    let rar_path = dir.path().join("payload.rar");
    std::fs::write(&rar_path, rar_data)?;
    extract_from_rar(&rar_path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsrc_trailing_rar_errors_on_non_pe_data() {
        let junk = vec![0u8; 256];
        assert!(rsrc_trailing_rar(&junk).is_err());
    }
}
