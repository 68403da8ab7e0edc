//! Seeded 32-bit MurmurHash3.
//!
//! Produces a uniformly distributed, non-cryptographic hash. Bytes are
//! treated as unsigned throughout.

fn rotate_left(value: u32, count: u32) -> u32 {
    value.rotate_left(count)
}

/// Compute the murmur3 32-bit hash of `data` with the given seed.
pub fn murmur3_seeded(seed: u32, data: &[u8]) -> u32 {
    const C1: u32 = 0xcc9e_2d51;
    const C2: u32 = 0x1b87_3593;
    const R1: u32 = 15;
    const R2: u32 = 13;
    const M: u32 = 5;
    const N: u32 = 0xe654_6b64;

    let mut hash = seed;

    let mut chunks = data.chunks_exact(4);
    for block in &mut chunks {
        let mut k = u32::from_le_bytes(block.try_into().unwrap());
        k = k.wrapping_mul(C1);
        k = rotate_left(k, R1);
        k = k.wrapping_mul(C2);

        hash ^= k;
        hash = rotate_left(hash, R2).wrapping_mul(M).wrapping_add(N);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k1: u32 = 0;
        for (i, &b) in tail.iter().enumerate() {
            k1 ^= (b as u32) << (8 * i);
        }
        k1 = k1.wrapping_mul(C1);
        k1 = rotate_left(k1, R1);
        k1 = k1.wrapping_mul(C2);
        hash ^= k1;
    }

    hash ^= data.len() as u32;
    hash ^= hash >> 16;
    hash = hash.wrapping_mul(0x85eb_ca6b);
    hash ^= hash >> 13;
    hash = hash.wrapping_mul(0xc2b2_ae35);
    hash ^= hash >> 16;

    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    // Reference vectors for the canonical murmur3_x86_32 algorithm.
    #[test]
    fn empty_input() {
        assert_eq!(murmur3_seeded(0, b""), 0);
        assert_eq!(murmur3_seeded(1, b""), 0x514e_28b7);
        assert_eq!(murmur3_seeded(0xffff_ffff, b""), 0x81f1_6f39);
    }

    #[test]
    fn deterministic() {
        let a = murmur3_seeded(0x293a_e76f, b"dir/subdir/file.txt");
        let b = murmur3_seeded(0x293a_e76f, b"dir/subdir/file.txt");
        assert_eq!(a, b);
    }

    #[test]
    fn seeds_decorrelate() {
        let a = murmur3_seeded(0x293a_e76f, b"Makefile");
        let b = murmur3_seeded(0x7e64_6e2c, b"Makefile");
        assert_ne!(a, b);
    }

    #[test]
    fn tail_lengths_differ() {
        // 1..3 trailing bytes exercise each tail branch.
        let h1 = murmur3_seeded(0, b"a");
        let h2 = murmur3_seeded(0, b"ab");
        let h3 = murmur3_seeded(0, b"abc");
        let h4 = murmur3_seeded(0, b"abcd");
        assert!(h1 != h2 && h2 != h3 && h3 != h4);
    }
}
