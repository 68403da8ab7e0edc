//! Chunk-based container format shared by index files.
//!
//! A chunk file is a random-access container:
//!
//! ```text
//! [ format-specific header ]
//! [ TOC: (N+1) × { chunk-id (4) | file offset (8, big-endian) } ]
//! [ chunk bodies, in TOC order ]
//! [ trailer: content hash of everything preceding ]
//! ```
//!
//! The TOC's final entry has chunk id 0 and an offset equal to the end of the
//! last chunk, so every chunk's length is the next TOC offset minus its own.
//! A file may instead carry the TOC *after* the chunk bodies
//! ([`WriteFlags::TRAILING_TOC`]); the reader supports both layouts.
//!
//! Reading and writing are separate types ([`ChunkFile`] and [`ChunkWriter`]),
//! so a single instance can never be used in both modes.

mod read;
mod write;

pub use read::{ChunkFile, ChunkInfo};
pub use write::{ChunkWriter, WriteFlags};

/// Size of one table-of-contents entry: 4-byte id + 8-byte offset.
pub const TOC_ENTRY_SIZE: usize = 12;

/// Errors for chunk container reading and writing.
#[derive(Debug, thiserror::Error)]
pub enum ChunkError {
    #[error("chunk {id:#010x} wrote {actual} bytes, declared {declared}")]
    SizeMismatch { id: u32, declared: u64, actual: u64 },

    #[error("truncated table of contents")]
    TruncatedToc,

    #[error("duplicate chunk id {0:#010x}")]
    DuplicateChunk(u32),

    #[error("final chunk has non-zero id {0:#010x}")]
    MissingTerminator(u32),

    #[error("improper chunk offset(s) {offset:#x} and {next_offset:#x}")]
    BadOffset { offset: u64, next_offset: u64 },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Render a chunk id as its four ASCII characters for diagnostics.
pub fn chunk_id_name(id: u32) -> String {
    id.to_be_bytes()
        .iter()
        .map(|&b| {
            if b.is_ascii_graphic() {
                b as char
            } else {
                '?'
            }
        })
        .collect()
}
