//! The reverse index: pack order ↔ lexicographic order.
//!
//! The permutation lives either in the MIDX's own `RIDX` chunk or in a
//! sidecar `.rev` file:
//!
//! ```text
//! Header:  RIDX (4) | version (4) | hash id (4) | num_objects (4)
//! Body:    N × 4-byte lexicographic positions, in pack order
//! Trailer: MIDX checksum | rev checksum
//! ```
//!
//! When both sources exist the chunk wins — it is already mapped and cannot
//! disagree with the file it is embedded in. The sidecar is consulted only
//! when the chunk is absent.

use std::io::Write;
use std::path::{Path, PathBuf};

use odx_hash::hasher::HashingWriter;
use odx_hash::{HashAlgorithm, ObjectId};
use odx_utils::LockFile;

use crate::{MidxError, MultiPackIndex};

pub const RIDX_SIGNATURE: [u8; 4] = *b"RIDX";
pub const RIDX_VERSION: u32 = 1;
const RIDX_HEADER_SIZE: usize = 16;

/// Where a loaded reverse index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevIndexSource {
    /// The `RIDX` chunk inside the MIDX.
    Chunk,
    /// A `multi-pack-index-<hex>.rev` sidecar file.
    File,
}

/// An in-memory reverse index for one MIDX.
pub struct RevIndex {
    /// `order[rank]` is the lexicographic position of the object at
    /// pack-order `rank`.
    order: Vec<u32>,
    /// The inverse permutation: lexicographic position → pack-order rank.
    inverse: Vec<u32>,
    source: RevIndexSource,
}

impl RevIndex {
    fn from_order(order: Vec<u32>, source: RevIndexSource) -> Result<Self, MidxError> {
        let n = order.len();
        let mut inverse = vec![u32::MAX; n];
        for (rank, &lex) in order.iter().enumerate() {
            if lex as usize >= n || inverse[lex as usize] != u32::MAX {
                return Err(MidxError::Malformed(
                    "reverse index is not a permutation".into(),
                ));
            }
            inverse[lex as usize] = rank as u32;
        }
        Ok(Self {
            order,
            inverse,
            source,
        })
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn source(&self) -> RevIndexSource {
        self.source
    }

    /// Pack order → lexicographic position.
    pub fn lex_at_rank(&self, rank: u32) -> u32 {
        self.order[rank as usize]
    }

    /// Lexicographic position → pack order.
    pub fn rank_of_lex(&self, lex: u32) -> u32 {
        self.inverse[lex as usize]
    }

    pub fn pack_order(&self) -> &[u32] {
        &self.order
    }
}

/// `<object-dir>/multi-pack-index-<hex>.rev`.
pub fn rev_file_path(object_dir: &Path, checksum: &ObjectId) -> PathBuf {
    object_dir.join(format!("multi-pack-index-{}.rev", checksum.to_hex()))
}

/// Write the sidecar `.rev` file for a MIDX.
pub fn write_rev_file(
    path: &Path,
    pack_order: &[u32],
    midx_checksum: &ObjectId,
    algo: HashAlgorithm,
) -> Result<(), MidxError> {
    let mut lock = LockFile::acquire(path)?;
    {
        let mut f = HashingWriter::new(&mut lock, algo);
        f.write_all(&RIDX_SIGNATURE)?;
        f.write_all(&RIDX_VERSION.to_be_bytes())?;
        f.write_all(&(algo.oid_version() as u32).to_be_bytes())?;
        f.write_all(&(pack_order.len() as u32).to_be_bytes())?;
        for &lex in pack_order {
            f.write_all(&lex.to_be_bytes())?;
        }
        f.write_all(midx_checksum.as_bytes())?;
        f.finalize_trailer()?;
    }
    lock.commit()?;
    Ok(())
}

/// Load the reverse index for a MIDX, preferring the embedded chunk.
///
/// The `GIT_TEST_REV_INDEX_DIE_IN_MEMORY` / `GIT_TEST_REV_INDEX_DIE_ON_DISK`
/// knobs assert which source gets chosen; tripping one is test
/// instrumentation, not a recoverable error.
pub fn load(midx: &MultiPackIndex, object_dir: &Path) -> Result<Option<RevIndex>, MidxError> {
    let die_in_memory = env_set("GIT_TEST_REV_INDEX_DIE_IN_MEMORY");
    let die_on_disk = env_set("GIT_TEST_REV_INDEX_DIE_ON_DISK");

    if midx.has_rev_index_chunk() {
        assert!(
            !die_in_memory,
            "reverse index read from the RIDX chunk with GIT_TEST_REV_INDEX_DIE_IN_MEMORY set"
        );
        let order: Vec<u32> = (0..midx.num_objects())
            .map(|rank| midx.pack_order_at(rank).expect("chunk present"))
            .collect();
        return Ok(Some(RevIndex::from_order(order, RevIndexSource::Chunk)?));
    }

    let path = rev_file_path(object_dir, midx.checksum());
    let data = match std::fs::read(&path) {
        Ok(d) => d,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    assert!(
        !die_on_disk,
        "reverse index read from {} with GIT_TEST_REV_INDEX_DIE_ON_DISK set",
        path.display()
    );
    let order = parse_rev_file(&data, midx)?;
    Ok(Some(RevIndex::from_order(order, RevIndexSource::File)?))
}

fn parse_rev_file(data: &[u8], midx: &MultiPackIndex) -> Result<Vec<u32>, MidxError> {
    let hash_len = midx.algorithm().digest_len();
    if data.len() < RIDX_HEADER_SIZE + 2 * hash_len {
        return Err(MidxError::Malformed("rev file too small".into()));
    }
    if data[0..4] != RIDX_SIGNATURE {
        return Err(MidxError::Malformed("bad rev file signature".into()));
    }
    let version = u32::from_be_bytes(data[4..8].try_into().unwrap());
    if version != RIDX_VERSION {
        return Err(MidxError::Unsupported(format!("rev file version {version}")));
    }
    let hash_id = u32::from_be_bytes(data[8..12].try_into().unwrap());
    if hash_id != midx.algorithm().oid_version() as u32 {
        return Err(MidxError::Malformed("rev file hash algorithm mismatch".into()));
    }
    let num_objects = u32::from_be_bytes(data[12..16].try_into().unwrap());
    if num_objects != midx.num_objects() {
        return Err(MidxError::Malformed(format!(
            "rev file covers {num_objects} objects but the MIDX has {}",
            midx.num_objects()
        )));
    }
    let body_end = RIDX_HEADER_SIZE + num_objects as usize * 4;
    if data.len() != body_end + 2 * hash_len {
        return Err(MidxError::Malformed("rev file has the wrong size".into()));
    }
    let stored = &data[body_end..body_end + hash_len];
    if stored != midx.checksum().as_bytes() {
        return Err(MidxError::Malformed(
            "rev file does not belong to this MIDX".into(),
        ));
    }

    Ok(data[RIDX_HEADER_SIZE..body_end]
        .chunks_exact(4)
        .map(|raw| u32::from_be_bytes(raw.try_into().unwrap()))
        .collect())
}

fn env_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty() && v != "0").unwrap_or(false)
}
