//! CRC32C (Castagnoli) checksums, stored in masked form.
//!
//! Every persistent structure in the engine guards its bytes with this
//! polynomial. It detects burst errors better than CRC32/IEEE on the short
//! records we write, and most CPUs compute it in hardware.

use crc::{CRC_32_ISCSI, Crc};

/// The Castagnoli polynomial, as used by iSCSI.
pub const CRC32C: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const MASK_DELTA: u32 = 0xa282ead8;

/// CRC32C of `data`.
///
/// For checksums over discontiguous bytes (a type tag plus a payload, say),
/// use `CRC32C.digest()` and feed the pieces in order.
pub fn value(data: &[u8]) -> u32 {
    CRC32C.checksum(data)
}

/// Mask a CRC before storing it.
///
/// Log files sometimes carry payloads that themselves contain CRCs (one log
/// embedded in another). Computing the CRC of a string that ends in its own
/// CRC yields degenerate values, so stored checksums are rotated and offset
/// first.
pub fn mask(crc: u32) -> u32 {
    (crc >> 15 | crc << 17).wrapping_add(MASK_DELTA)
}

/// Undo `mask`.
pub fn unmask(masked: u32) -> u32 {
    let rot = masked.wrapping_sub(MASK_DELTA);
    rot >> 17 | rot << 15
}
