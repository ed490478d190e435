//! End-to-end installer extraction scenarios, assembling synthetic
//! installer files the same way the unit tests in `extract` do, but
//! covering a multi-section layout and a failure path.

use kbl_flash::codec;
use kbl_flash::extract::{self, TrailerFormat};

fn build_maav102_installer(sections: &[(&str, Vec<u8>)]) -> Vec<u8> {
    let mut file = Vec::new();
    for (_, fw) in sections {
        let encoded = codec::encode_firmware_b(fw);
        file.extend_from_slice(&encoded);
    }

    let mut trailer = vec![0u8; TrailerFormat::MaaV102.trailer_size()];
    // Layout array starts at offset 2120 (device[38] + desc/company/product/
    // version wchar fields + unknown_846), 80 bytes per fixed slot.
    const LAYOUTS_BASE: usize = 2120;
    const LAYOUT_LEN: usize = 80;
    for (i, (_, fw)) in sections.iter().enumerate() {
        let base = LAYOUTS_BASE + i * LAYOUT_LEN;
        trailer[base..base + 4].copy_from_slice(&(fw.len() as u32).to_le_bytes());
    }
    let tail_start = trailer.len() - 11;
    trailer[tail_start..tail_start + 8].copy_from_slice(b".maaV102");
    let encoded_trailer = codec::encode_package(&trailer);

    file.extend_from_slice(&encoded_trailer);
    file
}

#[test]
fn maav102_multi_section_layout_extracts_each_firmware_in_order() {
    let sections = vec![
        ("a", vec![0x11u8; 40]),
        ("b", vec![0x22u8; 80]),
    ];
    let file = build_maav102_installer(&sections);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("installer.bin");
    std::fs::write(&path, &file).unwrap();

    let result = extract::extract(&path, TrailerFormat::MaaV102).unwrap();
    assert_eq!(result.sections.len(), 2);
    assert_eq!(result.sections[0].data, sections[0].1);
    assert_eq!(result.sections[1].data, sections[1].1);
}

#[test]
fn wrong_format_selection_fails_closed_rather_than_misparsing() {
    let file = build_maav102_installer(&[("a", vec![0xAAu8; 16])]);
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("installer.bin");
    std::fs::write(&path, &file).unwrap();

    let result = extract::extract(&path, TrailerFormat::Maajonsn);
    assert!(result.is_err());
}
