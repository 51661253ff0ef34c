//! Path hashing used by the path hash index.

const FNV64_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV64_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a over the lowercased UTF-16LE encoding of `path`, offset by `seed`.
///
/// Version 11 archives fixed the seed handling so the seed is added to the FNV offset basis
/// instead of replacing it.
pub fn path_hash(path: &str, seed: u64) -> u64 {
    let mut hash = FNV64_OFFSET.wrapping_add(seed);
    for unit in path.to_lowercase().encode_utf16() {
        for byte in unit.to_le_bytes() {
            hash ^= byte as u64;
            hash = hash.wrapping_mul(FNV64_PRIME);
        }
    }
    hash
}

#[cfg(test)]
mod test {
    use super::path_hash;

    #[test]
    fn empty_path_is_offset_basis() {
        assert_eq!(path_hash("", 0), 0xcbf2_9ce4_8422_2325);
        assert_eq!(path_hash("", 1), 0xcbf2_9ce4_8422_2326);
    }

    #[test]
    fn hash_ignores_case() {
        assert_eq!(path_hash("ChunkNames", 7), path_hash("chunknames", 7));
        assert_ne!(path_hash("chunknames", 7), path_hash("chunknames", 8));
    }
}
