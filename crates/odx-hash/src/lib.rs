//! Object identity and hash-ordered lookup for the odx index subsystem.
//!
//! Provides the core `ObjectId` type, streaming hash computation for file
//! trailers, hex encoding/decoding, the 256-entry fanout table, and the
//! fanout-narrowed binary search shared by every sorted-OID table on disk.

mod algorithm;
mod error;
pub mod fanout;
pub mod hasher;
pub mod hex;
pub mod lookup;
mod oid;
mod oid_set;

pub use algorithm::HashAlgorithm;
pub use error::HashError;
pub use fanout::FanoutTable;
pub use hasher::Hasher;
pub use oid::ObjectId;
pub use oid_set::OidSet;
