use crate::{HashError, ObjectId};

/// Supported object hash algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashAlgorithm {
    /// SHA-1 (default, 20 bytes / 160 bits).
    #[default]
    Sha1,
    /// SHA-256 (32 bytes / 256 bits).
    Sha256,
}

impl HashAlgorithm {
    /// Length of the hash digest in bytes.
    pub const fn digest_len(&self) -> usize {
        match self {
            Self::Sha1 => 20,
            Self::Sha256 => 32,
        }
    }

    /// Length of the hex representation.
    pub const fn hex_len(&self) -> usize {
        self.digest_len() * 2
    }

    /// The null (all-zeros) OID for this algorithm.
    pub const fn null_oid(&self) -> ObjectId {
        match self {
            Self::Sha1 => ObjectId::NULL_SHA1,
            Self::Sha256 => ObjectId::NULL_SHA256,
        }
    }

    /// The single-byte id written into chunk-file headers.
    pub const fn oid_version(&self) -> u8 {
        match self {
            Self::Sha1 => 1,
            Self::Sha256 => 2,
        }
    }

    /// Look up a hash algorithm by its chunk-file header byte.
    pub fn from_oid_version(id: u8) -> Result<Self, HashError> {
        match id {
            1 => Ok(Self::Sha1),
            2 => Ok(Self::Sha256),
            other => Err(HashError::UnknownAlgorithm(other)),
        }
    }

    /// Look up a hash algorithm by raw digest length.
    pub fn from_digest_len(len: usize) -> Option<Self> {
        match len {
            20 => Some(Self::Sha1),
            32 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// Look up a hash algorithm by hex length.
    pub fn from_hex_len(len: usize) -> Option<Self> {
        match len {
            40 => Some(Self::Sha1),
            64 => Some(Self::Sha256),
            _ => None,
        }
    }

    /// The configuration name of this algorithm.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
