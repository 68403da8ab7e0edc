//! Chunk container reader.

use crate::{ChunkError, TOC_ENTRY_SIZE};

/// Location of one chunk within the mapped file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    pub id: u32,
    pub offset: usize,
    pub len: usize,
}

/// A parsed table of contents over a mapped chunk file.
///
/// Borrows the mapped bytes; [`pair`](ChunkFile::pair) hands out zero-copy
/// sub-slices. Absent chunks are `None`, never an error — optional chunks are
/// the normal case.
#[derive(Debug)]
pub struct ChunkFile<'a> {
    data: &'a [u8],
    chunks: Vec<ChunkInfo>,
}

impl<'a> ChunkFile<'a> {
    /// Parse a leading TOC of `chunk_count` entries starting at `toc_offset`.
    ///
    /// `trailer_len` is the length of the trailing content hash; no chunk may
    /// extend into it. Rejects duplicate chunk ids, non-monotone offsets, a
    /// missing zero-id terminator, and chunks crossing the trailer.
    pub fn read_toc(
        data: &'a [u8],
        toc_offset: usize,
        chunk_count: usize,
        trailer_len: usize,
    ) -> Result<Self, ChunkError> {
        if data.len() < trailer_len
            || toc_offset + (chunk_count + 1) * TOC_ENTRY_SIZE > data.len() - trailer_len
        {
            return Err(ChunkError::TruncatedToc);
        }
        let content_end = (data.len() - trailer_len) as u64;

        let entry = |i: usize| -> (u32, u64) {
            let p = toc_offset + i * TOC_ENTRY_SIZE;
            let id = u32::from_be_bytes(data[p..p + 4].try_into().unwrap());
            let offset = u64::from_be_bytes(data[p + 4..p + 12].try_into().unwrap());
            (id, offset)
        };

        let mut chunks = Vec::with_capacity(chunk_count);
        for i in 0..chunk_count {
            let (id, offset) = entry(i);
            let (next_id, next_offset) = entry(i + 1);
            if i + 1 == chunk_count && next_id != 0 {
                return Err(ChunkError::MissingTerminator(next_id));
            }
            if chunks.iter().any(|c: &ChunkInfo| c.id == id) {
                return Err(ChunkError::DuplicateChunk(id));
            }
            if next_offset < offset || next_offset > content_end {
                return Err(ChunkError::BadOffset {
                    offset,
                    next_offset,
                });
            }
            chunks.push(ChunkInfo {
                id,
                offset: offset as usize,
                len: (next_offset - offset) as usize,
            });
        }

        Ok(Self { data, chunks })
    }

    /// Parse a trailing TOC: the last TOC entry sits immediately before the
    /// trailer, and its terminator offset gives the start of the TOC (which
    /// is also the end of the chunk bodies).
    pub fn read_trailing_toc(data: &'a [u8], trailer_len: usize) -> Result<Self, ChunkError> {
        if data.len() < trailer_len + TOC_ENTRY_SIZE {
            return Err(ChunkError::TruncatedToc);
        }
        let term = data.len() - trailer_len - TOC_ENTRY_SIZE;
        let term_id = u32::from_be_bytes(data[term..term + 4].try_into().unwrap());
        if term_id != 0 {
            return Err(ChunkError::MissingTerminator(term_id));
        }
        let toc_start = u64::from_be_bytes(data[term + 4..term + 12].try_into().unwrap()) as usize;
        if toc_start > term || (term - toc_start) % TOC_ENTRY_SIZE != 0 {
            return Err(ChunkError::TruncatedToc);
        }
        let chunk_count = (term - toc_start) / TOC_ENTRY_SIZE;
        // Re-parse as a leading TOC located at toc_start; its entries must
        // describe chunks that all end by toc_start.
        let toc = Self::read_toc(data, toc_start, chunk_count, trailer_len)?;
        for c in &toc.chunks {
            if c.offset + c.len > toc_start {
                return Err(ChunkError::BadOffset {
                    offset: c.offset as u64,
                    next_offset: (c.offset + c.len) as u64,
                });
            }
        }
        Ok(toc)
    }

    /// Number of chunks in the TOC.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// TOC entries in file order.
    pub fn chunks(&self) -> &[ChunkInfo] {
        &self.chunks
    }

    /// Zero-copy access to a chunk's bytes, or `None` if absent.
    pub fn pair(&self, id: u32) -> Option<&'a [u8]> {
        self.chunks
            .iter()
            .find(|c| c.id == id)
            .map(|c| &self.data[c.offset..c.offset + c.len])
    }

    /// Callback form of [`pair`](Self::pair): invoke `f` on the chunk bytes
    /// if the chunk exists.
    pub fn read<T>(&self, id: u32, f: impl FnOnce(&'a [u8]) -> T) -> Option<T> {
        self.pair(id).map(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChunkWriter, WriteFlags};
    use odx_hash::hasher::HashingWriter;
    use odx_hash::HashAlgorithm;
    use std::io::Write;

    const ID_A: u32 = 0x41414141;
    const ID_B: u32 = 0x42424242;

    fn sample(flags: WriteFlags) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut f = HashingWriter::new(&mut buf, HashAlgorithm::Sha1);
        f.write_all(b"HDR0\x01\x01\x02\x00").unwrap();
        let mut cw = ChunkWriter::new();
        cw.add_chunk(ID_A, 4, |w| w.write_all(b"aaaa"));
        cw.add_chunk(ID_B, 2, |w| w.write_all(b"bb"));
        cw.write(&mut f, flags).unwrap();
        f.finalize_trailer().unwrap();
        buf
    }

    #[test]
    fn roundtrip_leading() {
        let buf = sample(WriteFlags::empty());
        let cf = ChunkFile::read_toc(&buf, 8, 2, 20).unwrap();
        assert_eq!(cf.num_chunks(), 2);
        assert_eq!(cf.pair(ID_A).unwrap(), b"aaaa");
        assert_eq!(cf.pair(ID_B).unwrap(), b"bb");
        assert_eq!(cf.pair(0x43434343), None);
    }

    #[test]
    fn roundtrip_trailing() {
        let buf = sample(WriteFlags::TRAILING_TOC);
        let cf = ChunkFile::read_trailing_toc(&buf, 20).unwrap();
        assert_eq!(cf.num_chunks(), 2);
        assert_eq!(cf.pair(ID_A).unwrap(), b"aaaa");
        assert_eq!(cf.pair(ID_B).unwrap(), b"bb");
    }

    #[test]
    fn read_callback_form() {
        let buf = sample(WriteFlags::empty());
        let cf = ChunkFile::read_toc(&buf, 8, 2, 20).unwrap();
        let len = cf.read(ID_A, |chunk| chunk.len());
        assert_eq!(len, Some(4));
        assert_eq!(cf.read(0x5a5a5a5a, |chunk| chunk.len()), None);
    }

    #[test]
    fn duplicate_ids_rejected() {
        let mut buf = Vec::new();
        let mut f = HashingWriter::new(&mut buf, HashAlgorithm::Sha1);
        f.write_all(b"HDR0\x01\x01\x02\x00").unwrap();
        let mut cw = ChunkWriter::new();
        cw.add_chunk(ID_A, 1, |w| w.write_all(b"x"));
        cw.add_chunk(ID_A, 1, |w| w.write_all(b"y"));
        cw.write(&mut f, WriteFlags::empty()).unwrap();
        f.finalize_trailer().unwrap();

        match ChunkFile::read_toc(&buf, 8, 2, 20) {
            Err(ChunkError::DuplicateChunk(id)) => assert_eq!(id, ID_A),
            other => panic!("expected duplicate-chunk error, got {other:?}"),
        }
    }

    #[test]
    fn truncated_toc_rejected() {
        let buf = sample(WriteFlags::empty());
        assert!(matches!(
            ChunkFile::read_toc(&buf[..20], 8, 2, 20),
            Err(ChunkError::TruncatedToc)
        ));
    }

    #[test]
    fn chunk_past_trailer_rejected() {
        let mut buf = sample(WriteFlags::empty());
        // Corrupt the terminator offset to point past the content.
        let len = buf.len() as u64;
        let term_off = 8 + 2 * TOC_ENTRY_SIZE + 4;
        buf[term_off..term_off + 8].copy_from_slice(&(len + 100).to_be_bytes());
        assert!(matches!(
            ChunkFile::read_toc(&buf, 8, 2, 20),
            Err(ChunkError::BadOffset { .. })
        ));
    }

    #[test]
    fn nonzero_terminator_rejected() {
        let mut buf = sample(WriteFlags::empty());
        let term_id = 8 + 2 * TOC_ENTRY_SIZE;
        buf[term_id..term_id + 4].copy_from_slice(&0x5a5a5a5au32.to_be_bytes());
        assert!(matches!(
            ChunkFile::read_toc(&buf, 8, 2, 20),
            Err(ChunkError::MissingTerminator(0x5a5a5a5a))
        ));
    }
}
