//! Unambiguous packing of byte strings for KDF input.
//!
//! Every part is prefixed with its big-endian `u64` length and the whole pack
//! with the part count, so `["ab", "c"]` and `["a", "bc"]` never collide.

/// Pack `parts` into a single length-prefixed byte string.
pub fn pack(parts: &[&[u8]]) -> Vec<u8> {
    let total: usize = parts.iter().map(|part| part.len() + 8).sum();
    let mut packed = Vec::with_capacity(total + 8);
    packed.extend_from_slice(&(parts.len() as u64).to_be_bytes());
    for part in parts {
        packed.extend_from_slice(&(part.len() as u64).to_be_bytes());
        packed.extend_from_slice(part);
    }
    packed
}

/// Pack `parts` and zero-pad the result to a multiple of `blocksize`.
///
/// The unpadded length is appended before padding so the padding itself
/// stays unambiguous.
pub fn pack_padded(parts: &[&[u8]], blocksize: usize) -> Vec<u8> {
    let mut packed = pack(parts);
    let unpadded = packed.len() as u64;
    packed.extend_from_slice(&unpadded.to_be_bytes());
    if blocksize > 0 {
        let remainder = packed.len() % blocksize;
        if remainder != 0 {
            packed.resize(packed.len() + blocksize - remainder, 0);
        }
    }
    packed
}
