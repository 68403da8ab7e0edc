//! Multi-pack index (MIDX) support.
//!
//! An object directory accumulating many packfiles pays one binary search
//! per pack on every lookup. The MIDX collapses them into a single sorted
//! OID table mapping each object to `(pack, offset)`, with optional extras:
//! a reverse index assigning every object a *pack order* position, and
//! EWAH-compressed reachability bitmaps anchored to selected commits.
//!
//! Like the commit graph, the MIDX is an optimization: a missing or corrupt
//! file degrades to per-pack lookups, never to wrong answers.

pub mod bitmap;
pub mod ewah;
pub mod pack_index;
pub mod path_walk;
mod read;
pub mod rev_index;
pub mod verify;
pub mod write;

pub use bitmap::{BitmapCandidate, BitmapIndex, BitmapRequest};
pub use read::{BitmappedPack, MultiPackIndex};
pub use rev_index::{RevIndex, RevIndexSource};
pub use verify::{verify_midx, MidxVerifyIssues, MidxVerifyReport};
pub use write::{write_midx, MidxWriteFlags, MidxWriteOptions, MidxWriteStats};

/// File signature: "MIDX".
pub const MIDX_SIGNATURE: u32 = 0x4d49_4458;
/// Supported format version.
pub const MIDX_VERSION: u8 = 1;
/// Header: signature, version, OID version, chunk count, base count, pack count.
pub const MIDX_HEADER_SIZE: usize = 12;
/// The PNAM chunk is zero-padded to this boundary.
pub const MIDX_CHUNK_ALIGNMENT: usize = 8;
/// OOFF offset word flag: real offset lives in the LOFF chunk.
pub const MIDX_LARGE_OFFSET_NEEDED: u32 = 0x8000_0000;

/// Chunk ids (four big-endian ASCII bytes).
pub mod chunks {
    /// "PNAM" — NUL-terminated pack names, ascending.
    pub const PACK_NAMES: u32 = 0x504e_414d;
    /// "OIDF" — 256-entry cumulative fanout.
    pub const OID_FANOUT: u32 = 0x4f49_4446;
    /// "OIDL" — sorted object OIDs.
    pub const OID_LOOKUP: u32 = 0x4f49_444c;
    /// "OOFF" — per-object (pack id, offset) pairs.
    pub const OBJECT_OFFSETS: u32 = 0x4f4f_4646;
    /// "LOFF" — 64-bit offsets for packs past 2 GiB.
    pub const LARGE_OFFSETS: u32 = 0x4c4f_4646;
    /// "RIDX" — pack-order permutation.
    pub const REVINDEX: u32 = 0x5249_4458;
    /// "BTMP" — per-pack bitmap ranges.
    pub const BITMAPPED_PACKS: u32 = 0x4254_4d50;
}

/// Errors for multi-pack-index operations.
#[derive(Debug, thiserror::Error)]
pub enum MidxError {
    #[error("malformed multi-pack-index: {0}")]
    Malformed(String),

    #[error("unsupported multi-pack-index feature: {0}")]
    Unsupported(String),

    #[error("malformed pack index: {0}")]
    MalformedPackIndex(String),

    #[error("object database error: {0}")]
    Odb(String),

    #[error(transparent)]
    Chunk(#[from] odx_chunk::ChunkError),

    #[error(transparent)]
    Hash(#[from] odx_hash::HashError),

    #[error(transparent)]
    Lock(#[from] odx_utils::UtilError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
