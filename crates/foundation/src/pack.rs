/// Pack four bytes into one little-endian 32-bit word: `a | b<<8 | c<<16 | d<<24`.
///
/// Every component is masked to 8 bits first, so out-of-range inputs wrap
/// modulo 256 instead of bleeding into neighbouring bytes or the sign bit.
#[inline]
pub fn pack_8888(a: i64, b: i64, c: i64, d: i64) -> u32 {
    let byte = |v: i64| (v as u32) & 0xff;
    byte(a) | (byte(b) << 8) | (byte(c) << 16) | (byte(d) << 24)
}

#[inline]
pub fn unpack_8888(word: u32) -> [u8; 4] {
    word.to_le_bytes()
}
