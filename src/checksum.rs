//! Checksum Unit
//!
//! Standard CRC-32 (IEEE 802.3 polynomial, zlib-compatible) over arbitrary
//! byte ranges. Used with seed 0 for both header and payload checksums.

use crc32fast::Hasher;

/// Compute the CRC-32 of `bytes`, continuing from `seed`
pub fn crc32(seed: u32, bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new_with_initial(seed);
    hasher.update(bytes);
    hasher.finalize()
}
