//! Firmware and installer-metadata obfuscation codecs (C1).
//!
//! Everything here is a pure function over byte slices. Two device-side
//! obfuscation schemes (family A's packet permutation, family B's
//! whole-stream XOR), the identity codec for CMMK devices, and the shared
//! three-stage transform used to decode installer metadata trailers.

/// `xor_key_A`, 13 little-endian 32-bit words, family A's packet codec key.
pub const XOR_KEY_A: [u32; 13] = [
    0x55AA55AA, 0xAA55AA55, 0x000000FF, 0x0000FF00, 0x00FF0000, 0xFF000000, 0x00000000,
    0xFFFFFFFF, 0x0F0F0F0F, 0xF0F0F0F0, 0xAAAAAAAA, 0x55555555, 0x00000000,
];

/// `xor_key_B`, 13 little-endian 32-bit words, family B's whole-stream codec key.
pub const XOR_KEY_B: [u32; 13] = [
    0xE7C29474, 0x79084B10, 0x53D54B0D, 0xFC1E8F32, 0x48E81A9B, 0x773C808E, 0xB7483552,
    0xD9CB8C76, 0x2A8C8BC6, 0x0967ADA8, 0xD4520F5C, 0xD0C3279D, 0xEAC091C5,
];

/// Byte-permutation table, 8 rows of 4, indexed by `packet_index & 7`.
pub const SWAP_TABLE: [[u8; 4]; 8] = [
    [0, 1, 2, 3],
    [1, 2, 3, 0],
    [2, 1, 3, 0],
    [3, 2, 1, 0],
    [3, 1, 0, 2],
    [1, 2, 0, 3],
    [2, 3, 1, 0],
    [0, 2, 1, 3],
];

const PACKET_LEN: usize = 52;
const PACKET_WORDS: usize = PACKET_LEN / 4;

fn swap_row(packet_index: u32) -> &'static [u8; 4] {
    &SWAP_TABLE[(packet_index & 7) as usize]
}

/// Decode one 52-byte family-A packet: XOR first, then permute bytes
/// within each 4-byte group according to `swap_row(n)`.
pub fn decode_packet_a(packet: &[u8; PACKET_LEN], n: u32) -> [u8; PACKET_LEN] {
    let row = swap_row(n);
    let mut xored = [0u8; PACKET_LEN];
    for w in 0..PACKET_WORDS {
        let word = u32::from_le_bytes(packet[w * 4..w * 4 + 4].try_into().unwrap());
        let x = word ^ XOR_KEY_A[w];
        xored[w * 4..w * 4 + 4].copy_from_slice(&x.to_le_bytes());
    }
    let mut out = [0u8; PACKET_LEN];
    for w in 0..PACKET_WORDS {
        let group = &xored[w * 4..w * 4 + 4];
        for j in 0..4 {
            out[w * 4 + j] = group[row[j] as usize];
        }
    }
    out
}

/// Encode one 52-byte family-A packet: the inverse of [`decode_packet_a`] —
/// permute first, then XOR.
pub fn encode_packet_a(packet: &[u8; PACKET_LEN], n: u32) -> [u8; PACKET_LEN] {
    let row = swap_row(n);
    let mut permuted = [0u8; PACKET_LEN];
    for w in 0..PACKET_WORDS {
        let group = &packet[w * 4..w * 4 + 4];
        for j in 0..4 {
            permuted[w * 4 + row[j] as usize] = group[j];
        }
    }
    let mut out = [0u8; PACKET_LEN];
    for w in 0..PACKET_WORDS {
        let word = u32::from_le_bytes(permuted[w * 4..w * 4 + 4].try_into().unwrap());
        let x = word ^ XOR_KEY_A[w];
        out[w * 4..w * 4 + 4].copy_from_slice(&x.to_le_bytes());
    }
    out
}

/// Packet indices `[10, 100]` (inclusive) are the only ones transformed;
/// all other packets pass through unchanged.
fn packet_is_transformed(i: usize) -> bool {
    (10..=100).contains(&i)
}

/// Whole-firmware family-A codec: apply [`decode_packet_a`]/[`encode_packet_a`]
/// to every 52-byte packet whose index falls in `[10, 100]`.
pub fn decode_firmware_a(data: &[u8]) -> Vec<u8> {
    transform_firmware_a(data, decode_packet_a)
}

pub fn encode_firmware_a(data: &[u8]) -> Vec<u8> {
    transform_firmware_a(data, encode_packet_a)
}

fn transform_firmware_a(data: &[u8], f: fn(&[u8; PACKET_LEN], u32) -> [u8; PACKET_LEN]) -> Vec<u8> {
    let mut out = data.to_vec();
    for (i, chunk) in out.chunks_mut(PACKET_LEN).enumerate() {
        if !packet_is_transformed(i) || chunk.len() != PACKET_LEN {
            continue;
        }
        let packet: [u8; PACKET_LEN] = chunk.try_into().unwrap();
        let transformed = f(&packet, i as u32);
        chunk.copy_from_slice(&transformed);
    }
    out
}

/// Family-B whole-stream codec: XOR every 4-byte little-endian word at
/// position `w` with `XOR_KEY_B[w % 13]`. An involution, so encode == decode.
/// `data.len()` must be a multiple of 4.
pub fn xor_firmware_b(data: &[u8]) -> Vec<u8> {
    assert_eq!(data.len() % 4, 0, "family-B firmware length must be a multiple of 4");
    let mut out = data.to_vec();
    for (w, chunk) in out.chunks_mut(4).enumerate() {
        let word = u32::from_le_bytes(chunk.try_into().unwrap());
        let x = word ^ XOR_KEY_B[w % XOR_KEY_B.len()];
        chunk.copy_from_slice(&x.to_le_bytes());
    }
    out
}

pub fn decode_firmware_b(data: &[u8]) -> Vec<u8> {
    xor_firmware_b(data)
}

pub fn encode_firmware_b(data: &[u8]) -> Vec<u8> {
    xor_firmware_b(data)
}

/// CMMK devices store firmware in the clear.
pub fn decode_firmware_cmmk(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

pub fn encode_firmware_cmmk(data: &[u8]) -> Vec<u8> {
    data.to_vec()
}

/// Three-stage package obfuscation transform applied to installer trailer
/// and section bytes. Decode-only in the original tool; an encoder is
/// synthesised below purely so the test suite can exercise round-trips.
pub fn decode_package(data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();

    // Stage 1: for every 5-byte group starting at offset 4, swap byte 0 and byte 4.
    let mut i = 4;
    while i < buf.len() {
        buf.swap(i - 4, i);
        i += 5;
    }

    // Stage 2: for every 2-byte pair, swap the two bytes.
    let mut pairs = buf.chunks_exact_mut(2);
    for pair in &mut pairs {
        pair.swap(0, 1);
    }

    // Stage 3: nibble rotate-subtract, x -> ((x - 7) << 4 | (x >> 4)) mod 256.
    // The `x >> 4` term uses the original byte, not the post-subtraction one.
    for b in buf.iter_mut() {
        *b = (b.wrapping_sub(7) << 4) | (*b >> 4);
    }

    buf
}

/// Inverse of [`decode_package`], used only by tests to check that decode
/// is a permutation (the core never needs to re-encode a trailer).
pub fn encode_package(data: &[u8]) -> Vec<u8> {
    let mut buf = data.to_vec();

    // Inverse of stage 3: the low nibble of (x - 7) became y's high nibble,
    // and x's own high nibble became y's low nibble.
    for b in buf.iter_mut() {
        let y_high = *b >> 4;
        let y_low = *b & 0x0F;
        *b = (y_low << 4) | (y_high.wrapping_add(7) & 0x0F);
    }

    // Inverse of stage 2 (self-inverse).
    let mut pairs = buf.chunks_exact_mut(2);
    for pair in &mut pairs {
        pair.swap(0, 1);
    }

    // Inverse of stage 1 (self-inverse, same swap positions).
    let mut i = 4;
    while i < buf.len() {
        buf.swap(i - 4, i);
        i += 5;
    }

    buf
}

/// KBP obfuscation: 4-byte big-endian schedule derived from `key`, XORed
/// per byte together with a position-dependent `f(i)`.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum KbpMode {
    Strings,
    Firmware,
}

fn kbp_f(i: usize, mode: KbpMode) -> u8 {
    match mode {
        KbpMode::Strings => {
            let low = (i & 0x0F) as u8;
            let high = if i >= 16 { ((i - 16) & 0xF0) as u8 } else { 0 };
            low ^ high
        }
        KbpMode::Firmware => (i & 0xFF) as u8,
    }
}

/// Key used to derive the KBP byte schedule: the first 4 bytes of the
/// (still-encoded) trailer block, read big-endian, XORed with `0x00010203`.
pub fn kbp_key(trailer_head: [u8; 4]) -> u32 {
    u32::from_be_bytes(trailer_head) ^ 0x0001_0203
}

pub fn kbp_decode(data: &[u8], key: u32, mode: KbpMode) -> Vec<u8> {
    let schedule = key.to_be_bytes();
    data.iter()
        .enumerate()
        .map(|(i, &b)| b ^ schedule[i % 4] ^ kbp_f(i, mode))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_a_packet_round_trips_for_all_rows() {
        let mut packet = [0u8; PACKET_LEN];
        for (i, b) in packet.iter_mut().enumerate() {
            *b = i as u8;
        }
        for n in 0..8u32 {
            let decoded = decode_packet_a(&packet, n);
            let re_encoded = encode_packet_a(&decoded, n);
            assert_eq!(re_encoded, packet, "round-trip failed for n={n}");

            let encoded = encode_packet_a(&packet, n);
            let re_decoded = decode_packet_a(&encoded, n);
            assert_eq!(re_decoded, packet, "inverse round-trip failed for n={n}");
        }
    }

    #[test]
    fn swap_rows_are_permutations_of_0123() {
        for row in SWAP_TABLE {
            let mut sorted = row;
            sorted.sort_unstable();
            assert_eq!(sorted, [0, 1, 2, 3]);
        }
    }

    #[test]
    fn codec_a_firmware_only_touches_packets_10_to_100() {
        let data = vec![0xABu8; PACKET_LEN * 120];
        let decoded = decode_firmware_a(&data);
        for (i, chunk) in data.chunks(PACKET_LEN).enumerate() {
            let out_chunk = &decoded[i * PACKET_LEN..(i + 1) * PACKET_LEN];
            if packet_is_transformed(i) {
                assert_ne!(out_chunk, chunk, "packet {i} should have been transformed");
            } else {
                assert_eq!(out_chunk, chunk, "packet {i} should have passed through");
            }
        }
    }

    #[test]
    fn codec_a_law_holds_on_sample_bytes() {
        let data: Vec<u8> = (0u8..=0x33).collect();
        let mut packet = [0u8; PACKET_LEN];
        packet.copy_from_slice(&data);
        let decoded = decode_packet_a(&packet, 10);
        let re_encoded = encode_packet_a(&decoded, 10);
        assert_eq!(re_encoded, packet);
    }

    #[test]
    fn codec_b_is_an_involution() {
        let data = vec![0x42u8; PACKET_LEN];
        let decoded = decode_firmware_b(&data);
        let re_encoded = encode_firmware_b(&decoded);
        assert_eq!(re_encoded, data);
    }

    #[test]
    fn codec_b_all_zero_yields_key_bytes() {
        let data = vec![0u8; PACKET_LEN];
        let decoded = decode_firmware_b(&data);
        let mut expected = Vec::with_capacity(PACKET_LEN);
        for word in XOR_KEY_B {
            expected.extend_from_slice(&word.to_le_bytes());
        }
        assert_eq!(decoded, expected);
    }

    #[test]
    fn cmmk_codec_is_identity() {
        let data = vec![1, 2, 3, 4, 5];
        assert_eq!(decode_firmware_cmmk(&data), data);
        assert_eq!(encode_firmware_cmmk(&data), data);
    }

    #[test]
    fn package_transform_round_trips() {
        let data: Vec<u8> = (0u8..=255).cycle().take(0x200).collect();
        let decoded = decode_package(&data);
        let re_encoded = encode_package(&decoded);
        assert_eq!(re_encoded, data);
    }

    #[test]
    fn package_transform_stage_three_is_invertible_on_all_bytes() {
        for x in 0u8..=255 {
            let y = (x.wrapping_sub(7) << 4) | (x >> 4);
            let y_high = y >> 4;
            let y_low = y & 0x0F;
            let back = (y_low << 4) | (y_high.wrapping_add(7) & 0x0F);
            assert_eq!(back, x);
        }
    }

    #[test]
    fn kbp_decode_round_trips_via_xor_involution() {
        let key = 0x1122_3344u32;
        let data = vec![0xAAu8; 600];
        let decoded = kbp_decode(&data, key, KbpMode::Strings);
        // XOR-based transform: decoding twice returns the original.
        let back = kbp_decode(&decoded, key, KbpMode::Strings);
        assert_eq!(back, data);
    }

    #[test]
    fn kbp_key_derivation() {
        let trailing = [0x00, 0x01, 0x02, 0x03];
        assert_eq!(kbp_key(trailing), 0);
    }
}
