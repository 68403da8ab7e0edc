//! Streaming hash computation for file trailers.

use std::io::Write;

use crate::{HashAlgorithm, HashError, ObjectId};

enum HasherInner {
    Sha1(Box<sha1_checked::Sha1>),
    Sha256(sha2::Sha256),
}

/// Streaming hash computation.
///
/// Wraps SHA-1 (with collision detection) and SHA-256 behind a single
/// interface. Data is fed incrementally with [`update`](Hasher::update) or
/// through the [`std::io::Write`] implementation, then finalised into an
/// [`ObjectId`]. Index files use this for their trailing content hash.
pub struct Hasher {
    inner: HasherInner,
}

impl Hasher {
    /// Create a new hasher for the given algorithm.
    pub fn new(algo: HashAlgorithm) -> Self {
        use digest::Digest;
        let inner = match algo {
            HashAlgorithm::Sha1 => HasherInner::Sha1(Box::new(sha1_checked::Sha1::new())),
            HashAlgorithm::Sha256 => HasherInner::Sha256(sha2::Sha256::new()),
        };
        Self { inner }
    }

    /// Feed data into the hasher.
    pub fn update(&mut self, data: &[u8]) {
        use digest::Digest;
        match &mut self.inner {
            HasherInner::Sha1(h) => h.update(data),
            HasherInner::Sha256(h) => h.update(data),
        }
    }

    /// Finalize and return the ObjectId.
    ///
    /// Returns an error if SHA-1 collision detection fires.
    pub fn finalize(self) -> Result<ObjectId, HashError> {
        match self.inner {
            HasherInner::Sha1(h) => {
                let result = h.try_finalize();
                if result.has_collision() {
                    return Err(HashError::Sha1Collision);
                }
                let mut bytes = [0u8; 20];
                bytes.copy_from_slice(result.hash().as_slice());
                Ok(ObjectId::Sha1(bytes))
            }
            HasherInner::Sha256(h) => {
                use digest::Digest;
                let result = h.finalize();
                let mut bytes = [0u8; 32];
                bytes.copy_from_slice(result.as_slice());
                Ok(ObjectId::Sha256(bytes))
            }
        }
    }

    /// Convenience: hash data in one call.
    pub fn digest(algo: HashAlgorithm, data: &[u8]) -> Result<ObjectId, HashError> {
        let mut h = Self::new(algo);
        h.update(data);
        h.finalize()
    }
}

impl Write for Hasher {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// A writer that tees everything into an inner sink and a running hash.
///
/// Chunked index files are written through this so the trailing content hash
/// can be emitted without buffering the whole file.
pub struct HashingWriter<W: Write> {
    inner: W,
    hasher: Hasher,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W, algo: HashAlgorithm) -> Self {
        Self {
            inner,
            hasher: Hasher::new(algo),
            written: 0,
        }
    }

    /// Total bytes written so far (the running file offset).
    pub fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Finish hashing: write the digest of everything written so far into the
    /// inner sink as the trailer, and return it.
    pub fn finalize_trailer(mut self) -> std::io::Result<ObjectId> {
        let oid = self
            .hasher
            .finalize()
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        self.inner.write_all(oid.as_bytes())?;
        self.inner.flush()?;
        Ok(oid)
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.inner.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sha1() {
        let oid = Hasher::digest(HashAlgorithm::Sha1, b"").unwrap();
        assert_eq!(oid.to_hex(), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn empty_sha256() {
        let oid = Hasher::digest(HashAlgorithm::Sha256, b"").unwrap();
        assert_eq!(
            oid.to_hex(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn incremental_matches_oneshot() {
        let mut h = Hasher::new(HashAlgorithm::Sha1);
        h.update(b"hello ");
        h.update(b"world");
        let a = h.finalize().unwrap();
        let b = Hasher::digest(HashAlgorithm::Sha1, b"hello world").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hashing_writer_appends_trailer() {
        let mut buf = Vec::new();
        let mut w = HashingWriter::new(&mut buf, HashAlgorithm::Sha1);
        w.write_all(b"abc").unwrap();
        assert_eq!(w.bytes_written(), 3);
        let oid = w.finalize_trailer().unwrap();

        assert_eq!(buf.len(), 3 + 20);
        assert_eq!(&buf[..3], b"abc");
        assert_eq!(&buf[3..], oid.as_bytes());
        assert_eq!(oid, Hasher::digest(HashAlgorithm::Sha1, b"abc").unwrap());
    }
}
