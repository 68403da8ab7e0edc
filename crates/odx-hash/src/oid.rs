use std::fmt;
use std::str::FromStr;

use crate::hex::{hex_decode, hex_to_string};
use crate::{HashAlgorithm, HashError};

/// An object identifier — the hash of an object's content.
///
/// An enum with one variant per supported hash algorithm, carrying the raw
/// digest bytes inline. Ordering is lexicographic on the raw bytes, which is
/// the order every sorted-OID table on disk uses.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectId {
    Sha1([u8; 20]),
    Sha256([u8; 32]),
}

impl ObjectId {
    /// The SHA-1 null OID (all zeros).
    pub const NULL_SHA1: Self = Self::Sha1([0u8; 20]);
    /// The SHA-256 null OID (all zeros).
    pub const NULL_SHA256: Self = Self::Sha256([0u8; 32]);

    /// Create an ObjectId from raw bytes and an algorithm.
    pub fn from_bytes(bytes: &[u8], algo: HashAlgorithm) -> Result<Self, HashError> {
        let expected = algo.digest_len();
        if bytes.len() != expected {
            return Err(HashError::InvalidHashLength {
                expected,
                actual: bytes.len(),
            });
        }
        match algo {
            HashAlgorithm::Sha1 => {
                let mut arr = [0u8; 20];
                arr.copy_from_slice(bytes);
                Ok(Self::Sha1(arr))
            }
            HashAlgorithm::Sha256 => {
                let mut arr = [0u8; 32];
                arr.copy_from_slice(bytes);
                Ok(Self::Sha256(arr))
            }
        }
    }

    /// Create an ObjectId from a hex string; the algorithm is inferred from
    /// the length (40 chars → SHA-1, 64 chars → SHA-256).
    pub fn from_hex(hex: &str) -> Result<Self, HashError> {
        let algo = HashAlgorithm::from_hex_len(hex.len()).ok_or(HashError::InvalidHexLength {
            expected: 40,
            actual: hex.len(),
        })?;
        match algo {
            HashAlgorithm::Sha1 => {
                let mut bytes = [0u8; 20];
                hex_decode(hex, &mut bytes)?;
                Ok(Self::Sha1(bytes))
            }
            HashAlgorithm::Sha256 => {
                let mut bytes = [0u8; 32];
                hex_decode(hex, &mut bytes)?;
                Ok(Self::Sha256(bytes))
            }
        }
    }

    /// The raw digest bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Sha1(b) => b,
            Self::Sha256(b) => b,
        }
    }

    /// The hash algorithm this OID was produced by.
    pub fn algorithm(&self) -> HashAlgorithm {
        match self {
            Self::Sha1(_) => HashAlgorithm::Sha1,
            Self::Sha256(_) => HashAlgorithm::Sha256,
        }
    }

    /// Whether this is the null (all-zeros) OID.
    pub fn is_null(&self) -> bool {
        self.as_bytes().iter().all(|&b| b == 0)
    }

    /// Lowercase hex representation.
    pub fn to_hex(&self) -> String {
        hex_to_string(self.as_bytes())
    }

    /// The first digest byte, used as the fanout index.
    pub fn first_byte(&self) -> u8 {
        self.as_bytes()[0]
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", &self.to_hex()[..8])
    }
}

impl FromStr for ObjectId {
    type Err = HashError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHA1_HEX: &str = "da39a3ee5e6b4b0d3255bfef95601890afd80709";
    const SHA256_HEX: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn from_hex_infers_algorithm() {
        let a = ObjectId::from_hex(SHA1_HEX).unwrap();
        assert_eq!(a.algorithm(), HashAlgorithm::Sha1);
        let b = ObjectId::from_hex(SHA256_HEX).unwrap();
        assert_eq!(b.algorithm(), HashAlgorithm::Sha256);
    }

    #[test]
    fn display_roundtrip() {
        let oid = ObjectId::from_hex(SHA1_HEX).unwrap();
        let parsed: ObjectId = oid.to_string().parse().unwrap();
        assert_eq!(parsed, oid);
    }

    #[test]
    fn ordering_is_lexicographic() {
        let a = ObjectId::from_hex("0000000000000000000000000000000000000001").unwrap();
        let b = ObjectId::from_hex("0100000000000000000000000000000000000000").unwrap();
        assert!(a < b);
        assert_eq!(a.cmp(&b), a.as_bytes().cmp(b.as_bytes()));
    }

    #[test]
    fn first_byte_is_fanout_index() {
        let oid = ObjectId::from_hex(SHA1_HEX).unwrap();
        assert_eq!(oid.first_byte(), 0xda);
    }

    #[test]
    fn from_bytes_wrong_length() {
        let err = ObjectId::from_bytes(&[0; 10], HashAlgorithm::Sha1).unwrap_err();
        assert!(matches!(
            err,
            HashError::InvalidHashLength {
                expected: 20,
                actual: 10
            }
        ));
    }

    #[test]
    fn invalid_hex_rejected() {
        assert!(ObjectId::from_hex("zz39a3ee5e6b4b0d3255bfef95601890afd80709").is_err());
        assert!(ObjectId::from_hex("abcd").is_err());
    }

    #[test]
    fn null_oid() {
        assert!(ObjectId::NULL_SHA1.is_null());
        assert!(!ObjectId::from_hex(SHA1_HEX).unwrap().is_null());
    }

    #[test]
    fn debug_shows_short_hash() {
        let oid = ObjectId::from_hex(SHA1_HEX).unwrap();
        assert_eq!(format!("{:?}", oid), "ObjectId(da39a3ee)");
    }
}
