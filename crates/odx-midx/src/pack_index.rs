//! Minimal pack index (v2) reader.
//!
//! The MIDX writer only needs each pack's sorted OIDs and their offsets; CRC
//! validation and object access belong to the pack machinery proper. Layout:
//!
//! ```text
//! Header:  \xff tOc (4) | version (4, = 2)
//! Fanout:  256 × 4-byte big-endian cumulative counts
//! OIDs:    N × hash-len sorted OIDs
//! CRC32:   N × 4 bytes (skipped here)
//! Offsets: N × 4 bytes (high bit set → index into the 64-bit table)
//! 64-bit:  M × 8-byte offsets
//! Trailer: pack checksum | index checksum
//! ```

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use odx_hash::lookup::{fanout_entry, oid_table_entry, oid_table_lookup};
use odx_hash::{HashAlgorithm, ObjectId};

use crate::MidxError;

pub const IDX_SIGNATURE: [u8; 4] = [0xff, b't', b'O', b'c'];
pub const IDX_VERSION: u32 = 2;

/// A mapped `.idx` file.
pub struct PackIndex {
    data: Mmap,
    path: PathBuf,
    algo: HashAlgorithm,
    num_objects: u32,
    oid_offset: usize,
    offset32_offset: usize,
    offset64_offset: usize,
}

impl PackIndex {
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, MidxError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };
        let hash_len = algo.digest_len();

        if data.len() < 8 + 1024 + 2 * hash_len {
            return Err(MidxError::MalformedPackIndex(format!(
                "{}: file too small",
                path.display()
            )));
        }
        if data[0..4] != IDX_SIGNATURE {
            return Err(MidxError::MalformedPackIndex(format!(
                "{}: bad signature",
                path.display()
            )));
        }
        let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
        if version != IDX_VERSION {
            return Err(MidxError::Unsupported(format!(
                "{}: pack index version {version}",
                path.display()
            )));
        }

        let fanout_offset = 8;
        let num_objects = u32::from_be_bytes(
            data[fanout_offset + 255 * 4..fanout_offset + 256 * 4]
                .try_into()
                .unwrap(),
        );
        let n = num_objects as usize;
        let oid_offset = fanout_offset + 1024;
        let crc_offset = oid_offset + n * hash_len;
        let offset32_offset = crc_offset + n * 4;
        let offset64_offset = offset32_offset + n * 4;
        if data.len() < offset64_offset + 2 * hash_len {
            return Err(MidxError::MalformedPackIndex(format!(
                "{}: truncated at {} bytes",
                path.display(),
                data.len()
            )));
        }

        Ok(Self {
            data,
            path,
            algo,
            num_objects,
            oid_offset,
            offset32_offset,
            offset64_offset,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    /// The OID at lexicographic position `i`.
    pub fn oid_at(&self, i: u32) -> ObjectId {
        let hash_len = self.algo.digest_len();
        let raw = oid_table_entry(&self.data[self.oid_offset..], hash_len, i);
        ObjectId::from_bytes(raw, self.algo).expect("validated index size")
    }

    /// The pack offset of the object at position `i`.
    pub fn offset_at(&self, i: u32) -> Result<u64, MidxError> {
        let p = self.offset32_offset + i as usize * 4;
        let word = u32::from_be_bytes(self.data[p..p + 4].try_into().unwrap());
        if word & 0x8000_0000 == 0 {
            return Ok(word as u64);
        }
        let idx = (word & 0x7fff_ffff) as usize;
        let p = self.offset64_offset + idx * 8;
        let hash_len = self.algo.digest_len();
        if p + 8 > self.data.len() - 2 * hash_len {
            return Err(MidxError::MalformedPackIndex(format!(
                "{}: 64-bit offset table entry {idx} out of range",
                self.path.display()
            )));
        }
        Ok(u64::from_be_bytes(self.data[p..p + 8].try_into().unwrap()))
    }

    /// Binary-search the index for an OID.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        let hash_len = self.algo.digest_len();
        let fanout = &self.data[8..8 + 1024];
        let oids = &self.data[self.oid_offset..self.oid_offset + self.num_objects as usize * hash_len];
        let r = oid_table_lookup(fanout, oids, hash_len, oid);
        r.found.then_some(r.pos)
    }

    /// Lexicographic range of objects whose first OID byte is `byte`.
    pub fn fanout_range(&self, byte: u8) -> std::ops::Range<u32> {
        let fanout = &self.data[8..8 + 1024];
        let hi = fanout_entry(fanout, byte);
        let lo = if byte == 0 {
            0
        } else {
            fanout_entry(fanout, byte - 1)
        };
        lo..hi
    }
}

/// Build the bytes of a v2 pack index from `(oid, offset)` pairs.
///
/// Shared by the test fixtures of this crate; real `.idx` files come from
/// the pack indexer.
pub fn encode_pack_index(entries: &[(ObjectId, u64)], algo: HashAlgorithm) -> Vec<u8> {
    use odx_hash::{FanoutTable, Hasher};

    let mut sorted: Vec<_> = entries.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(&b.0));

    let mut buf = Vec::new();
    buf.extend_from_slice(&IDX_SIGNATURE);
    buf.extend_from_slice(&IDX_VERSION.to_be_bytes());

    let fanout = FanoutTable::build_from(sorted.iter().map(|(oid, _)| oid.first_byte()));
    buf.extend_from_slice(&fanout.to_bytes());

    for (oid, _) in &sorted {
        buf.extend_from_slice(oid.as_bytes());
    }
    for _ in &sorted {
        buf.extend_from_slice(&0u32.to_be_bytes()); // CRC32 placeholder
    }
    let mut large: Vec<u64> = Vec::new();
    for (_, offset) in &sorted {
        if *offset <= 0x7fff_ffff {
            buf.extend_from_slice(&(*offset as u32).to_be_bytes());
        } else {
            buf.extend_from_slice(&(0x8000_0000u32 | large.len() as u32).to_be_bytes());
            large.push(*offset);
        }
    }
    for offset in &large {
        buf.extend_from_slice(&offset.to_be_bytes());
    }

    // Pack checksum placeholder, then the index checksum.
    buf.extend_from_slice(algo.null_oid().as_bytes());
    let checksum = Hasher::digest(algo, &buf).expect("test data does not collide");
    buf.extend_from_slice(checksum.as_bytes());
    buf
}

#[cfg(test)]
mod tests {
    use super::*;

    fn oid(first: u8, last: u8) -> ObjectId {
        let mut b = [0u8; 20];
        b[0] = first;
        b[19] = last;
        ObjectId::from_bytes(&b, HashAlgorithm::Sha1).unwrap()
    }

    #[test]
    fn open_and_read_entries() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            (oid(0x30, 1), 300u64),
            (oid(0x10, 1), 100),
            (oid(0x20, 1), 200),
        ];
        let bytes = encode_pack_index(&entries, HashAlgorithm::Sha1);
        let path = dir.path().join("pack-test.idx");
        std::fs::write(&path, &bytes).unwrap();

        let idx = PackIndex::open(&path, HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.num_objects(), 3);
        // Sorted lexicographically regardless of insertion order.
        assert_eq!(idx.oid_at(0), oid(0x10, 1));
        assert_eq!(idx.offset_at(0).unwrap(), 100);
        assert_eq!(idx.oid_at(2), oid(0x30, 1));
        assert_eq!(idx.offset_at(2).unwrap(), 300);

        assert_eq!(idx.lookup(&oid(0x20, 1)), Some(1));
        assert_eq!(idx.lookup(&oid(0x99, 1)), None);
        assert_eq!(idx.fanout_range(0x20), 1..2);
    }

    #[test]
    fn large_offsets_spill_to_the_64_bit_table() {
        let dir = tempfile::tempdir().unwrap();
        let big = 1u64 << 33;
        let entries = vec![(oid(0x01, 1), big), (oid(0x02, 1), 7)];
        let bytes = encode_pack_index(&entries, HashAlgorithm::Sha1);
        let path = dir.path().join("pack-large.idx");
        std::fs::write(&path, &bytes).unwrap();

        let idx = PackIndex::open(&path, HashAlgorithm::Sha1).unwrap();
        assert_eq!(idx.offset_at(0).unwrap(), big);
        assert_eq!(idx.offset_at(1).unwrap(), 7);
    }

    #[test]
    fn rejects_bad_signature() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.idx");
        std::fs::write(&path, vec![0u8; 4096]).unwrap();
        assert!(matches!(
            PackIndex::open(&path, HashAlgorithm::Sha1),
            Err(MidxError::MalformedPackIndex(_))
        ));
    }
}
