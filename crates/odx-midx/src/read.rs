//! The multi-pack-index reader.

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use odx_chunk::ChunkFile;
use odx_hash::lookup::{oid_table_entry, oid_table_lookup};
use odx_hash::{HashAlgorithm, ObjectId};

use crate::{
    chunks, MidxError, MIDX_HEADER_SIZE, MIDX_LARGE_OFFSET_NEEDED, MIDX_SIGNATURE, MIDX_VERSION,
};

type Range = (usize, usize);

/// Per-pack bitmap coverage, from the `BTMP` chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BitmappedPack {
    /// First pack-order position occupied by this pack's objects.
    pub bitmap_pos: u32,
    /// Number of objects the pack contributes.
    pub bitmap_count: u32,
}

/// A mapped `multi-pack-index` file.
pub struct MultiPackIndex {
    data: Mmap,
    path: PathBuf,
    algo: HashAlgorithm,
    checksum: ObjectId,
    num_packs: u32,
    num_objects: u32,
    pack_names: Vec<String>,
    oidf: Range,
    oidl: Range,
    ooff: Range,
    loff: Option<Range>,
    ridx: Option<Range>,
    btmp: Option<Range>,
}

impl MultiPackIndex {
    /// Open `<object-dir>/multi-pack-index`.
    pub fn open(object_dir: &Path, algo: HashAlgorithm) -> Result<Self, MidxError> {
        Self::open_path(object_dir.join("multi-pack-index"), algo)
    }

    pub fn open_path(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, MidxError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };
        let hash_len = algo.digest_len();

        if data.len() < MIDX_HEADER_SIZE + hash_len {
            return Err(MidxError::Malformed("file too small".into()));
        }
        let signature = u32::from_be_bytes(data[0..4].try_into().unwrap());
        if signature != MIDX_SIGNATURE {
            return Err(MidxError::Malformed(format!(
                "signature {signature:#x} does not match {MIDX_SIGNATURE:#x}"
            )));
        }
        if data[4] != MIDX_VERSION {
            return Err(MidxError::Unsupported(format!("version {}", data[4])));
        }
        let file_algo = HashAlgorithm::from_oid_version(data[5])?;
        if file_algo != algo {
            return Err(MidxError::Malformed(format!(
                "hash algorithm {file_algo} does not match repository ({algo})"
            )));
        }
        let num_chunks = data[6] as usize;
        let num_packs = u32::from_be_bytes(data[8..12].try_into().unwrap());

        let toc = ChunkFile::read_toc(&data, MIDX_HEADER_SIZE, num_chunks, hash_len)?;
        let range_of = |id: u32| -> Option<Range> {
            toc.chunks()
                .iter()
                .find(|c| c.id == id)
                .map(|c| (c.offset, c.len))
        };
        let mandatory = |id: u32| -> Result<Range, MidxError> {
            range_of(id).ok_or_else(|| {
                MidxError::Malformed(format!(
                    "missing the {} chunk",
                    odx_chunk::chunk_id_name(id)
                ))
            })
        };

        let pnam = mandatory(chunks::PACK_NAMES)?;
        let oidf = mandatory(chunks::OID_FANOUT)?;
        let oidl = mandatory(chunks::OID_LOOKUP)?;
        let ooff = mandatory(chunks::OBJECT_OFFSETS)?;
        if oidf.1 != 256 * 4 {
            return Err(MidxError::Malformed("fanout chunk has the wrong size".into()));
        }

        let fanout = &data[oidf.0..oidf.0 + oidf.1];
        let num_objects = u32::from_be_bytes(fanout[255 * 4..].try_into().unwrap());
        if oidl.1 % hash_len != 0 {
            return Err(MidxError::Malformed(
                "OID lookup chunk is not a whole number of entries".into(),
            ));
        }
        if oidl.1 != num_objects as usize * hash_len {
            return Err(MidxError::Malformed(
                "fanout total disagrees with the OID lookup chunk".into(),
            ));
        }
        if ooff.1 != num_objects as usize * 8 {
            return Err(MidxError::Malformed(
                "object offset chunk has the wrong size".into(),
            ));
        }

        let ridx = range_of(chunks::REVINDEX);
        if let Some(r) = ridx {
            if r.1 != num_objects as usize * 4 {
                return Err(MidxError::Malformed(
                    "reverse index chunk has the wrong size".into(),
                ));
            }
        }
        let btmp = range_of(chunks::BITMAPPED_PACKS);
        if let Some(b) = btmp {
            if b.1 != num_packs as usize * 8 {
                return Err(MidxError::Malformed(
                    "bitmapped packs chunk has the wrong size".into(),
                ));
            }
        }

        let pack_names = parse_pack_names(&data[pnam.0..pnam.0 + pnam.1])?;
        if pack_names.len() != num_packs as usize {
            return Err(MidxError::Malformed(format!(
                "header names {num_packs} packs but the PNAM chunk holds {}",
                pack_names.len()
            )));
        }

        let checksum = ObjectId::from_bytes(&data[data.len() - hash_len..], algo)?;
        let loff = range_of(chunks::LARGE_OFFSETS);

        Ok(Self {
            data,
            path,
            algo,
            checksum,
            num_packs,
            num_objects,
            pack_names,
            oidf,
            oidl,
            ooff,
            loff,
            ridx,
            btmp,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// Trailer hash; sidecar files carry it in their names.
    pub fn checksum(&self) -> &ObjectId {
        &self.checksum
    }

    pub fn num_objects(&self) -> u32 {
        self.num_objects
    }

    pub fn num_packs(&self) -> u32 {
        self.num_packs
    }

    /// Pack base names in ascending order; pack ids index this list.
    pub fn pack_names(&self) -> &[String] {
        &self.pack_names
    }

    fn slice(&self, range: Range) -> &[u8] {
        &self.data[range.0..range.0 + range.1]
    }

    /// Raw bytes of the whole file (for checksum verification).
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Look up an object, returning `(pack_id, offset)`.
    pub fn find(&self, oid: &ObjectId) -> Option<(u32, u64)> {
        let r = oid_table_lookup(
            self.slice(self.oidf),
            self.slice(self.oidl),
            self.algo.digest_len(),
            oid,
        );
        r.found.then(|| self.object_entry(r.pos))
    }

    /// The lexicographic position of an object.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        let r = oid_table_lookup(
            self.slice(self.oidf),
            self.slice(self.oidl),
            self.algo.digest_len(),
            oid,
        );
        r.found.then_some(r.pos)
    }

    pub fn oid_at(&self, pos: u32) -> ObjectId {
        let raw = oid_table_entry(self.slice(self.oidl), self.algo.digest_len(), pos);
        ObjectId::from_bytes(raw, self.algo).expect("validated chunk size")
    }

    /// `(pack_id, offset)` of the object at a lexicographic position.
    pub fn object_entry(&self, pos: u32) -> (u32, u64) {
        let entry = &self.slice(self.ooff)[pos as usize * 8..pos as usize * 8 + 8];
        let pack_id = u32::from_be_bytes(entry[0..4].try_into().unwrap());
        let word = u32::from_be_bytes(entry[4..8].try_into().unwrap());
        let offset = if word & MIDX_LARGE_OFFSET_NEEDED != 0 {
            let idx = (word & !MIDX_LARGE_OFFSET_NEEDED) as usize;
            match self.loff {
                Some(loff) if (idx + 1) * 8 <= loff.1 => {
                    let raw = &self.slice(loff)[idx * 8..idx * 8 + 8];
                    u64::from_be_bytes(raw.try_into().unwrap())
                }
                // A well-formed file always has the LOFF chunk here.
                _ => word as u64,
            }
        } else {
            word as u64
        };
        (pack_id, offset)
    }

    /// Pack-order permutation entry: the lexicographic position of the
    /// object at pack-order `rank`. `None` when no `RIDX` chunk is present.
    pub fn pack_order_at(&self, rank: u32) -> Option<u32> {
        let ridx = self.ridx?;
        let raw = &self.slice(ridx)[rank as usize * 4..rank as usize * 4 + 4];
        Some(u32::from_be_bytes(raw.try_into().unwrap()))
    }

    pub fn has_rev_index_chunk(&self) -> bool {
        self.ridx.is_some()
    }

    /// Per-pack bitmap coverage from the `BTMP` chunk.
    pub fn bitmapped_packs(&self) -> Option<Vec<BitmappedPack>> {
        let btmp = self.btmp?;
        let raw = self.slice(btmp);
        Some(
            raw.chunks_exact(8)
                .map(|entry| BitmappedPack {
                    bitmap_pos: u32::from_be_bytes(entry[0..4].try_into().unwrap()),
                    bitmap_count: u32::from_be_bytes(entry[4..8].try_into().unwrap()),
                })
                .collect(),
        )
    }

    /// Lexicographic range of objects whose first OID byte is `byte`.
    pub fn fanout_range(&self, byte: u8) -> std::ops::Range<u32> {
        let fanout = self.slice(self.oidf);
        let hi = u32::from_be_bytes(
            fanout[byte as usize * 4..byte as usize * 4 + 4]
                .try_into()
                .unwrap(),
        );
        let lo = if byte == 0 {
            0
        } else {
            u32::from_be_bytes(
                fanout[(byte as usize - 1) * 4..byte as usize * 4]
                    .try_into()
                    .unwrap(),
            )
        };
        lo..hi
    }

    /// Iterate `(oid, pack_id, offset)` in lexicographic order.
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, u32, u64)> + '_ {
        (0..self.num_objects).map(|pos| {
            let (pack_id, offset) = self.object_entry(pos);
            (self.oid_at(pos), pack_id, offset)
        })
    }
}

/// Parse NUL-terminated pack names; they must be ascending and unique.
fn parse_pack_names(raw: &[u8]) -> Result<Vec<String>, MidxError> {
    let mut names: Vec<String> = Vec::new();
    let mut pos = 0;
    while pos < raw.len() {
        if raw[pos] == 0 {
            // Alignment padding after the last name.
            break;
        }
        let end = raw[pos..]
            .iter()
            .position(|&b| b == 0)
            .map(|e| pos + e)
            .ok_or_else(|| MidxError::Malformed("unterminated pack name".into()))?;
        let name = std::str::from_utf8(&raw[pos..end])
            .map_err(|_| MidxError::Malformed("pack name is not UTF-8".into()))?;
        if let Some(prev) = names.last() {
            if name <= prev.as_str() {
                return Err(MidxError::Malformed(format!(
                    "pack names out of order: '{prev}' then '{name}'"
                )));
            }
        }
        names.push(name.to_string());
        pos = end + 1;
    }
    Ok(names)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_name_parsing() {
        let raw = b"pack-a.pack\0pack-b.pack\0\0\0\0\0";
        let names = parse_pack_names(raw).unwrap();
        assert_eq!(names, vec!["pack-a.pack", "pack-b.pack"]);
    }

    #[test]
    fn pack_names_must_ascend() {
        let raw = b"pack-b.pack\0pack-a.pack\0";
        assert!(matches!(
            parse_pack_names(raw),
            Err(MidxError::Malformed(_))
        ));
    }
}
