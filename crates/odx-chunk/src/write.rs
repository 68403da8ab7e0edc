//! Chunk container writer.

use std::io::Write;

use odx_hash::hasher::HashingWriter;

use crate::{ChunkError, TOC_ENTRY_SIZE};

bitflags::bitflags! {
    /// Layout options for [`ChunkWriter::write`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u32 {
        /// Write the table of contents after the chunk bodies instead of
        /// before them.
        const TRAILING_TOC = 1 << 0;
    }
}

type BodyFn<'a> = Box<dyn FnOnce(&mut dyn Write) -> std::io::Result<()> + 'a>;

struct PendingChunk<'a> {
    id: u32,
    size: u64,
    body: BodyFn<'a>,
}

/// Collects chunk declarations, then streams the TOC and bodies through a
/// hashing writer.
///
/// Chunk bodies are closures invoked lazily, in declaration order, only when
/// [`write`](ChunkWriter::write) runs. A body that produces a byte count
/// different from its declared size fails the whole write: the declared sizes
/// are what the TOC offsets were computed from.
#[derive(Default)]
pub struct ChunkWriter<'a> {
    chunks: Vec<PendingChunk<'a>>,
}

impl<'a> ChunkWriter<'a> {
    pub fn new() -> Self {
        Self { chunks: Vec::new() }
    }

    /// Declare a chunk with its exact body size and the closure that will
    /// produce the body.
    pub fn add_chunk(
        &mut self,
        id: u32,
        size: u64,
        body: impl FnOnce(&mut dyn Write) -> std::io::Result<()> + 'a,
    ) {
        assert!(id != 0, "chunk id 0 is reserved for the TOC terminator");
        self.chunks.push(PendingChunk {
            id,
            size,
            body: Box::new(body),
        });
    }

    /// Number of chunks declared so far.
    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    /// Emit the TOC and all chunk bodies into `f`.
    ///
    /// The caller has already written the format-specific header into `f`;
    /// offsets in the TOC are absolute file offsets derived from
    /// `f.bytes_written()`. The trailer hash is *not* written here — callers
    /// finish the file with [`HashingWriter::finalize_trailer`] once any
    /// remaining bytes are out.
    pub fn write<W: Write>(
        self,
        f: &mut HashingWriter<W>,
        flags: WriteFlags,
    ) -> Result<(), ChunkError> {
        let toc_size = (self.chunks.len() + 1) * TOC_ENTRY_SIZE;
        let trailing = flags.contains(WriteFlags::TRAILING_TOC);

        let mut cur_offset = f.bytes_written();
        if !trailing {
            cur_offset += toc_size as u64;
            write_toc(f, &self.chunks, cur_offset)?;
        }

        let mut offsets = Vec::with_capacity(self.chunks.len());
        for chunk in self.chunks {
            let start = f.bytes_written();
            offsets.push((chunk.id, chunk.size));
            (chunk.body)(f)?;
            let actual = f.bytes_written() - start;
            if actual != chunk.size {
                return Err(ChunkError::SizeMismatch {
                    id: chunk.id,
                    declared: chunk.size,
                    actual,
                });
            }
        }

        if trailing {
            let end = f.bytes_written();
            let total: u64 = offsets.iter().map(|&(_, size)| size).sum();
            let mut off = end - total;
            for (id, size) in &offsets {
                f.write_all(&id.to_be_bytes())?;
                f.write_all(&off.to_be_bytes())?;
                off += size;
            }
            f.write_all(&0u32.to_be_bytes())?;
            f.write_all(&end.to_be_bytes())?;
        }

        Ok(())
    }
}

fn write_toc<W: Write>(
    f: &mut HashingWriter<W>,
    chunks: &[PendingChunk<'_>],
    mut cur_offset: u64,
) -> Result<(), ChunkError> {
    for chunk in chunks {
        f.write_all(&chunk.id.to_be_bytes())?;
        f.write_all(&cur_offset.to_be_bytes())?;
        cur_offset += chunk.size;
    }
    // Terminator: id 0, offset of the byte past the last chunk.
    f.write_all(&0u32.to_be_bytes())?;
    f.write_all(&cur_offset.to_be_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use odx_hash::HashAlgorithm;

    fn write_file(flags: WriteFlags) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut f = HashingWriter::new(&mut buf, HashAlgorithm::Sha1);
        f.write_all(b"HDR0\x01\x01\x02\x00").unwrap();

        let mut cw = ChunkWriter::new();
        cw.add_chunk(0x41414141, 4, |w| w.write_all(b"aaaa"));
        cw.add_chunk(0x42424242, 2, |w| w.write_all(b"bb"));
        cw.write(&mut f, flags).unwrap();
        f.finalize_trailer().unwrap();
        buf
    }

    #[test]
    fn leading_toc_layout() {
        let buf = write_file(WriteFlags::empty());
        // header(8) + toc(3*12) + bodies(6) + trailer(20)
        assert_eq!(buf.len(), 8 + 36 + 6 + 20);

        // First TOC entry points past the TOC.
        assert_eq!(&buf[8..12], &0x41414141u32.to_be_bytes());
        let off = u64::from_be_bytes(buf[12..20].try_into().unwrap());
        assert_eq!(off, 8 + 36);
        // Terminator id 0, offset = end of chunks.
        assert_eq!(&buf[32..36], &[0, 0, 0, 0]);
        let end = u64::from_be_bytes(buf[36..44].try_into().unwrap());
        assert_eq!(end, 8 + 36 + 6);
        assert_eq!(&buf[44..48], b"aaaa");
    }

    #[test]
    fn trailing_toc_layout() {
        let buf = write_file(WriteFlags::TRAILING_TOC);
        assert_eq!(buf.len(), 8 + 6 + 36 + 20);
        // Bodies come straight after the header.
        assert_eq!(&buf[8..14], b"aaaabb");
        // Terminator is the last TOC entry before the trailer.
        let term = buf.len() - 20 - 12;
        assert_eq!(&buf[term..term + 4], &[0, 0, 0, 0]);
        let toc_start = u64::from_be_bytes(buf[term + 4..term + 12].try_into().unwrap());
        assert_eq!(toc_start, 14);
    }

    #[test]
    fn size_mismatch_is_rejected() {
        let mut buf = Vec::new();
        let mut f = HashingWriter::new(&mut buf, HashAlgorithm::Sha1);
        let mut cw = ChunkWriter::new();
        cw.add_chunk(0x41414141, 4, |w| w.write_all(b"toolong"));
        match cw.write(&mut f, WriteFlags::empty()) {
            Err(ChunkError::SizeMismatch {
                declared: 4,
                actual: 7,
                ..
            }) => {}
            other => panic!("expected size mismatch, got {other:?}"),
        }
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn zero_chunk_id_panics() {
        let mut cw = ChunkWriter::new();
        cw.add_chunk(0, 0, |_| Ok(()));
    }
}
