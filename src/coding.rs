//! Integer encodings shared by every on-disk format in the engine.
//!
//! Fixed-width values are plain little-endian bytes. Variable-width values
//! use the base-128 varint layout: seven payload bits per byte, high bit set
//! on every byte except the last. Lengths and offsets are usually small, so
//! varints keep blocks and handles compact without a schema.
//!
//! Decoders never read past the end of their input. A truncated or
//! over-long encoding decodes to `None`, which callers turn into a
//! corruption error at whatever granularity makes sense for them.

/// Append a u32 in little-endian byte order.
pub fn put_fixed32(dst: &mut Vec<u8>, value: u32) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Append a u64 in little-endian byte order.
pub fn put_fixed64(dst: &mut Vec<u8>, value: u64) {
    dst.extend_from_slice(&value.to_le_bytes());
}

/// Read a little-endian u32 from the first four bytes of `data`.
///
/// Panics if `data` is shorter than four bytes; callers check lengths first.
pub fn decode_fixed32(data: &[u8]) -> u32 {
    u32::from_le_bytes(data[..4].try_into().unwrap())
}

/// Read a little-endian u64 from the first eight bytes of `data`.
///
/// Panics if `data` is shorter than eight bytes; callers check lengths first.
pub fn decode_fixed64(data: &[u8]) -> u64 {
    u64::from_le_bytes(data[..8].try_into().unwrap())
}

/// Append `value` as a varint. Uses one byte per seven bits, five at most.
pub fn put_varint32(dst: &mut Vec<u8>, mut value: u32) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Append `value` as a varint. Uses one byte per seven bits, ten at most.
pub fn put_varint64(dst: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        dst.push((value as u8) | 0x80);
        value >>= 7;
    }
    dst.push(value as u8);
}

/// Decode a varint32 from the front of `input`, advancing it past the
/// encoding. Returns `None` if the input is truncated or the encoding runs
/// longer than five bytes or overflows 32 bits.
pub fn get_varint32(input: &mut &[u8]) -> Option<u32> {
    let data = *input;
    let mut result: u32 = 0;
    for (i, &byte) in data.iter().enumerate().take(5) {
        // The fifth byte may only carry the top four bits of a u32
        if i == 4 && byte & 0xF0 != 0 {
            return None;
        }
        result |= u32::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            *input = &data[i + 1..];
            return Some(result);
        }
    }
    None
}

/// Decode a varint64 from the front of `input`, advancing it past the
/// encoding. Returns `None` if the input is truncated or the encoding runs
/// longer than ten bytes or overflows 64 bits.
pub fn get_varint64(input: &mut &[u8]) -> Option<u64> {
    let data = *input;
    let mut result: u64 = 0;
    for (i, &byte) in data.iter().enumerate().take(10) {
        // The tenth byte may only carry the top bit of a u64
        if i == 9 && byte & 0xFE != 0 {
            return None;
        }
        result |= u64::from(byte & 0x7F) << (7 * i);
        if byte & 0x80 == 0 {
            *input = &data[i + 1..];
            return Some(result);
        }
    }
    None
}

/// Number of bytes `put_varint64` would emit for `value`.
pub fn varint_length(mut value: u64) -> usize {
    let mut len = 1;
    while value >= 0x80 {
        value >>= 7;
        len += 1;
    }
    len
}

/// Append `value` with a varint32 length prefix.
pub fn put_length_prefixed_slice(dst: &mut Vec<u8>, value: &[u8]) {
    put_varint32(dst, value.len() as u32);
    dst.extend_from_slice(value);
}

/// Decode a length-prefixed slice from the front of `input`, advancing it
/// past the prefix and the payload. `None` if either is truncated.
pub fn get_length_prefixed_slice<'a>(input: &mut &'a [u8]) -> Option<&'a [u8]> {
    let mut cursor = *input;
    let len = get_varint32(&mut cursor)? as usize;
    if cursor.len() < len {
        return None;
    }
    let (value, rest) = cursor.split_at(len);
    *input = rest;
    Some(value)
}
