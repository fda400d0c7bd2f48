//! # Hash Slots
//!
//! Map keys onto the 16384 cluster slots with the CRC16 (CCITT/XMODEM)
//! checksum, honouring `{hash tag}` sections so related keys can be forced
//! onto the same shard.

use crate::error::{CkvError, CkvResult};

/// Number of slots in the cluster keyspace.
pub const SLOT_COUNT: u16 = 16384;

/// Mask applied to the checksum (14 bits).
const SLOT_MASK: u16 = SLOT_COUNT - 1;

/// CCITT polynomial, no reflection, zero initial value.
const CRC16_POLY: u16 = 0x1021;

/// Lookup table, one entry per leading byte.
static CRC16_TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut idx = 0;
    while idx < 256 {
        let mut crc = (idx as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ CRC16_POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[idx] = crc;
        idx += 1;
    }
    table
}

/// Computes the CRC16 checksum of `data`.
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        let idx = ((crc >> 8) ^ u16::from(byte)) & 0x00ff;
        crc = (crc << 8) ^ CRC16_TABLE[idx as usize];
    }
    crc
}

/// Returns the bytes that decide the slot of `key`.
///
/// The tag is the text between the first `{` and the first `}` after it.
/// An unterminated or empty tag falls back to the whole key.
pub fn hash_tag(key: &[u8]) -> &[u8] {
    let Some(open) = key.iter().position(|&b| b == b'{') else {
        return key;
    };
    match key[open + 1..].iter().position(|&b| b == b'}') {
        Some(0) | None => key,
        Some(len) => &key[open + 1..open + 1 + len],
    }
}

/// Maps `key` to a slot in `[0, SLOT_COUNT)`.
pub fn hash_slot(key: impl AsRef<[u8]>) -> u16 {
    crc16(hash_tag(key.as_ref())) & SLOT_MASK
}

/// Validates a slot number reported by a server.
pub fn checked_slot(value: i64) -> CkvResult<u16> {
    if (0..i64::from(SLOT_COUNT)).contains(&value) {
        Ok(value as u16)
    } else {
        Err(CkvError::SlotOutOfRange(value))
    }
}
