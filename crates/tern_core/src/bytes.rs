//! Byte-packed string words.
//!
//! Strings live in the flat-vector layout with eight bytes per allocation
//! word, packed little-endian. The byte length is stored separately, so
//! embedded zero bytes survive a round trip.

/// Number of 8-byte words needed to hold `len` bytes.
#[inline]
pub const fn packed_words(len: usize) -> usize {
    len.div_ceil(8)
}

/// Pack `bytes` into freshly allocated words.
pub fn pack_bytes(bytes: &[u8]) -> Vec<u64> {
    let mut words = vec![0u64; packed_words(bytes.len())];
    write_packed(&mut words, 0, bytes);
    words
}

/// Write `bytes` into `dst` starting at byte offset `at`.
///
/// Bytes past the end of `bytes` inside a touched word are left as they were.
pub fn write_packed(dst: &mut [u64], at: usize, bytes: &[u8]) {
    for (i, &b) in bytes.iter().enumerate() {
        set_byte(dst, at + i, b);
    }
}

/// Unpack exactly `len` bytes from `words`.
pub fn unpack_bytes(words: &[u64], len: usize) -> Vec<u8> {
    assert!(
        packed_words(len) <= words.len(),
        "packed string of {len} bytes does not fit in {} words",
        words.len()
    );
    let mut out = Vec::with_capacity(len);
    for w in words.iter() {
        let chunk = w.to_le_bytes();
        let take = (len - out.len()).min(8);
        out.extend_from_slice(&chunk[..take]);
        if out.len() == len {
            break;
        }
    }
    out
}

/// Read the byte at `index`.
#[inline]
pub fn byte_at(words: &[u64], index: usize) -> u8 {
    (words[index / 8] >> ((index % 8) * 8)) as u8
}

/// Overwrite the byte at `index`.
#[inline]
pub fn set_byte(words: &mut [u64], index: usize, byte: u8) {
    let shift = (index % 8) * 8;
    let w = &mut words[index / 8];
    *w = (*w & !(0xffu64 << shift)) | ((byte as u64) << shift);
}
