//! Commit-graph files for accelerated commit access.
//!
//! A commit-graph file stores commit metadata (parents, root trees, commit
//! dates, generation numbers) and optional changed-path Bloom filters in a
//! chunked container, so history traversal never has to inflate and parse
//! raw commit objects. Graphs may be layered into a split chain, youngest
//! layer on top, merged down by a size heuristic.
//!
//! The graph is strictly an optimization: every reader entry point degrades
//! to `None` on a missing or malformed file and callers fall back to the
//! object database.

mod chain;
mod config;
mod env;
mod file;
mod graph;
pub mod verify;
pub mod write;

use odx_hash::ObjectId;

pub use chain::{chain_path, graph_dir, layer_file_path, single_graph_path};
pub use config::GraphConfig;
pub use env::EnvOverrides;
pub use file::GraphFile;
pub use graph::{CommitGraph, GraphCommit};
pub use verify::{verify_graph, VerifyIssues, VerifyReport};
pub use write::{write_commit_graph, SplitStrategy, WriteFlags, WriteOptions, WriteStats};

/// File signature: "CGPH".
pub const GRAPH_SIGNATURE: u32 = 0x4347_5048;
/// Supported format version.
pub const GRAPH_VERSION: u8 = 1;

/// Chunk ids (four big-endian ASCII bytes).
pub mod chunks {
    /// "OIDF" — 256-entry cumulative fanout.
    pub const OID_FANOUT: u32 = 0x4f49_4446;
    /// "OIDL" — sorted commit OIDs.
    pub const OID_LOOKUP: u32 = 0x4f49_444c;
    /// "CDAT" — per-commit fixed-width records.
    pub const COMMIT_DATA: u32 = 0x4344_4154;
    /// "GDA2" — corrected-commit-date offsets.
    pub const GENERATION_DATA: u32 = 0x4744_4132;
    /// "GDO2" — 64-bit overflow entries for GDA2.
    pub const GENERATION_DATA_OVERFLOW: u32 = 0x4744_4f32;
    /// "EDGE" — overflow parent list for octopus merges.
    pub const EXTRA_EDGES: u32 = 0x4544_4745;
    /// "BIDX" — cumulative Bloom filter end offsets.
    pub const BLOOM_INDEXES: u32 = 0x4249_4458;
    /// "BDAT" — Bloom settings header plus filter bodies.
    pub const BLOOM_DATA: u32 = 0x4244_4154;
    /// "BASE" — trailer hashes of ancestor layers, bottom first.
    pub const BASE_GRAPHS: u32 = 0x4241_5345;
}

/// Parent-edge sentinel: no parent in this slot.
pub const GRAPH_PARENT_NONE: u32 = 0x7000_0000;
/// Second-parent slot flag: remaining parents live in the EDGE chunk.
pub const GRAPH_EXTRA_EDGES_NEEDED: u32 = 0x8000_0000;
/// Mask extracting the position bits of an EDGE word.
pub const GRAPH_EDGE_LAST_MASK: u32 = 0x7fff_ffff;
/// EDGE word flag terminating a parent list.
pub const GRAPH_LAST_EDGE: u32 = 0x8000_0000;

/// Generation sentinel: not computed.
pub const GENERATION_NUMBER_ZERO: u64 = 0;
/// Generation sentinel: commit unknown to the graph.
pub const GENERATION_NUMBER_INFINITY: u64 = u64::MAX;
/// Largest storable topological level.
pub const GENERATION_NUMBER_V1_MAX: u64 = 0x3fff_ffff;
/// GDA2 word flag: offset continues in GDO2.
pub const GENERATION_V2_OFFSET_OVERFLOW: u32 = 0x8000_0000;
/// Largest corrected-commit-date offset storable inline.
pub const GENERATION_V2_OFFSET_MAX: u64 = (1 << 31) - 1;

/// Size of the BDAT chunk header (hash version, num hashes, bits per entry).
pub const BLOOM_DATA_HEADER_SIZE: usize = 12;

/// Fixed header size preceding the TOC.
pub const GRAPH_HEADER_SIZE: usize = 8;

/// Width of one CDAT record for the given OID length.
pub const fn commit_data_width(hash_len: usize) -> usize {
    hash_len + 16
}

/// Reasons a repository cannot be described by a commit graph.
///
/// All three make stored parentage lie about the true history, so the writer
/// refuses and readers ignore any graph that is present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Incompatibility {
    ReplaceRefs,
    Grafts,
    Shallow,
}

impl std::fmt::Display for Incompatibility {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReplaceRefs => f.write_str("replace refs are present"),
            Self::Grafts => f.write_str("commit grafts are present"),
            Self::Shallow => f.write_str("repository is shallow"),
        }
    }
}

/// Commit fields the graph needs from the object database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRecord {
    pub tree: ObjectId,
    pub parents: Vec<ObjectId>,
    pub commit_time: i64,
}

/// Object-database oracle consumed by the graph.
///
/// The graph subsystem never parses raw objects itself; the host supplies
/// commit parsing and existence checks through this trait.
pub trait CommitSource {
    /// Whether the object exists in the object database.
    fn contains(&self, oid: &ObjectId) -> bool;

    /// Parse a commit's tree, parents, and committer date.
    fn read_commit(&self, oid: &ObjectId) -> Result<CommitRecord, GraphError>;

    /// Report any state that makes graph data untrustworthy.
    fn incompatibility(&self) -> Option<Incompatibility> {
        None
    }
}

/// First-parent diff oracle used for Bloom filter computation.
pub trait ChangedPathSource {
    /// The files changed by `commit` relative to `first_parent` (or the
    /// empty tree when parentless). Directories are derived by the filter
    /// builder; only files are reported here.
    fn changed_paths(
        &self,
        commit: &ObjectId,
        first_parent: Option<&ObjectId>,
    ) -> Result<Vec<bstr::BString>, GraphError>;
}

/// Errors for commit-graph operations.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("malformed commit-graph: {0}")]
    Malformed(String),

    #[error("unsupported commit-graph feature: {0}")]
    Unsupported(String),

    #[error("repository is incompatible with commit graphs: {0}")]
    Incompatible(Incompatibility),

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
