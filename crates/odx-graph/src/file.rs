//! A single memory-mapped commit-graph layer.

use std::path::{Path, PathBuf};

use memmap2::Mmap;
use odx_bloom::BloomSettings;
use odx_chunk::ChunkFile;
use odx_hash::lookup::{oid_table_lookup, oid_table_entry};
use odx_hash::{HashAlgorithm, ObjectId};

use crate::{
    chunks, commit_data_width, GraphError, BLOOM_DATA_HEADER_SIZE, GRAPH_HEADER_SIZE,
    GRAPH_LAST_EDGE, GRAPH_SIGNATURE, GRAPH_VERSION,
};

type Range = (usize, usize);

/// One `.graph` file, mapped read-only.
///
/// Positions handed in and out of this type are *lexicographic* positions
/// within this layer; translating to chain-global positions is the job of
/// [`CommitGraph`](crate::CommitGraph).
pub struct GraphFile {
    data: Mmap,
    path: PathBuf,
    algo: HashAlgorithm,
    /// Trailer hash, which is also the layer's identity in a chain.
    oid: ObjectId,
    num_commits: u32,
    oidf: Range,
    oidl: Range,
    cdat: Range,
    edge: Option<Range>,
    gda2: Option<Range>,
    gdo2: Option<Range>,
    base: Option<Range>,
    bloom: Option<BloomChunks>,
}

struct BloomChunks {
    bidx: Range,
    bdat: Range,
    settings: BloomSettings,
}

impl GraphFile {
    /// Map and validate a commit-graph file.
    pub fn open(path: impl AsRef<Path>, algo: HashAlgorithm) -> Result<Self, GraphError> {
        let path = path.as_ref().to_path_buf();
        let file = std::fs::File::open(&path)?;
        let data = unsafe { Mmap::map(&file)? };
        let hash_len = algo.digest_len();

        if data.len() < GRAPH_HEADER_SIZE {
            return Err(GraphError::Malformed("graph file too small".into()));
        }
        let signature = u32::from_be_bytes(data[0..4].try_into().unwrap());
        if signature != GRAPH_SIGNATURE {
            return Err(GraphError::Malformed(format!(
                "graph signature {signature:#x} does not match {GRAPH_SIGNATURE:#x}"
            )));
        }
        let version = data[4];
        if version != GRAPH_VERSION {
            return Err(GraphError::Unsupported(format!(
                "graph version {version} (only {GRAPH_VERSION} is supported)"
            )));
        }
        let hash_version = data[5];
        let file_algo = HashAlgorithm::from_oid_version(hash_version)?;
        if file_algo != algo {
            return Err(GraphError::Malformed(format!(
                "graph hash algorithm {file_algo} does not match repository ({algo})"
            )));
        }
        let num_chunks = data[6] as usize;
        let base_graph_count = data[7] as usize;

        let min_size = GRAPH_HEADER_SIZE
            + (num_chunks + 1) * odx_chunk::TOC_ENTRY_SIZE
            + 256 * 4
            + hash_len;
        if data.len() < min_size {
            return Err(GraphError::Malformed(format!(
                "graph file of {} bytes is shorter than the minimum {min_size}",
                data.len()
            )));
        }

        let toc = ChunkFile::read_toc(&data, GRAPH_HEADER_SIZE, num_chunks, hash_len)?;

        let range_of = |id: u32| -> Option<Range> {
            toc.chunks()
                .iter()
                .find(|c| c.id == id)
                .map(|c| (c.offset, c.len))
        };
        let mandatory = |id: u32| -> Result<Range, GraphError> {
            range_of(id).ok_or_else(|| {
                GraphError::Malformed(format!(
                    "graph file is missing the {} chunk",
                    odx_chunk::chunk_id_name(id)
                ))
            })
        };

        let oidf = mandatory(chunks::OID_FANOUT)?;
        let oidl = mandatory(chunks::OID_LOOKUP)?;
        let cdat = mandatory(chunks::COMMIT_DATA)?;
        if oidf.1 != 256 * 4 {
            return Err(GraphError::Malformed("fanout chunk has the wrong size".into()));
        }

        let fanout = &data[oidf.0..oidf.0 + oidf.1];
        let num_commits = u32::from_be_bytes(fanout[255 * 4..256 * 4].try_into().unwrap());
        if oidl.1 != num_commits as usize * hash_len {
            return Err(GraphError::Malformed(
                "OID lookup chunk size disagrees with the fanout".into(),
            ));
        }
        if cdat.1 != num_commits as usize * commit_data_width(hash_len) {
            return Err(GraphError::Malformed(
                "commit data chunk size disagrees with the fanout".into(),
            ));
        }

        let gda2 = range_of(chunks::GENERATION_DATA);
        if let Some(g) = gda2 {
            if g.1 != num_commits as usize * 4 {
                return Err(GraphError::Malformed(
                    "generation data chunk has the wrong size".into(),
                ));
            }
        }
        let gdo2 = range_of(chunks::GENERATION_DATA_OVERFLOW);
        let edge = range_of(chunks::EXTRA_EDGES);

        let base = range_of(chunks::BASE_GRAPHS);
        match base {
            Some(b) if b.1 != base_graph_count * hash_len => {
                return Err(GraphError::Malformed(
                    "base graphs chunk disagrees with the header's layer count".into(),
                ));
            }
            None if base_graph_count != 0 => {
                return Err(GraphError::Malformed(
                    "header names base graphs but the BASE chunk is absent".into(),
                ));
            }
            _ => {}
        }

        // Bloom chunks are used only as a pair and only for hash version 1;
        // anything else reads as "filters absent".
        let bloom = match (range_of(chunks::BLOOM_INDEXES), range_of(chunks::BLOOM_DATA)) {
            (Some(bidx), Some(bdat))
                if bidx.1 == num_commits as usize * 4 && bdat.1 >= BLOOM_DATA_HEADER_SIZE =>
            {
                let hdr = &data[bdat.0..bdat.0 + BLOOM_DATA_HEADER_SIZE];
                let hash_version = u32::from_be_bytes(hdr[0..4].try_into().unwrap());
                let num_hashes = u32::from_be_bytes(hdr[4..8].try_into().unwrap());
                let bits_per_entry = u32::from_be_bytes(hdr[8..12].try_into().unwrap());
                (hash_version == 1).then(|| BloomChunks {
                    bidx,
                    bdat,
                    settings: BloomSettings {
                        hash_version,
                        num_hashes,
                        bits_per_entry,
                        ..Default::default()
                    },
                })
            }
            _ => None,
        };

        let trailer = &data[data.len() - hash_len..];
        let oid = ObjectId::from_bytes(trailer, algo)?;

        Ok(Self {
            data,
            path,
            algo,
            oid,
            num_commits,
            oidf,
            oidl,
            cdat,
            edge,
            gda2,
            gdo2,
            base,
            bloom,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algo
    }

    /// The trailer hash: the layer's identity.
    pub fn oid(&self) -> &ObjectId {
        &self.oid
    }

    pub fn num_commits(&self) -> u32 {
        self.num_commits
    }

    /// Whether the layer carries corrected-commit-date data.
    pub fn has_generation_data(&self) -> bool {
        self.gda2.is_some()
    }

    pub fn bloom_settings(&self) -> Option<&BloomSettings> {
        self.bloom.as_ref().map(|b| &b.settings)
    }

    /// Trailer hashes of ancestor layers, bottom of the chain first.
    pub fn base_hashes(&self) -> Vec<ObjectId> {
        let Some((off, len)) = self.base else {
            return Vec::new();
        };
        let hash_len = self.algo.digest_len();
        self.data[off..off + len]
            .chunks_exact(hash_len)
            .map(|raw| ObjectId::from_bytes(raw, self.algo).expect("validated chunk size"))
            .collect()
    }

    fn slice(&self, range: Range) -> &[u8] {
        &self.data[range.0..range.0 + range.1]
    }

    /// Raw bytes of the whole file (for checksum verification).
    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    /// Entry `byte` of the layer's fanout table.
    pub fn fanout_entry(&self, byte: u8) -> u32 {
        odx_hash::lookup::fanout_entry(self.slice(self.oidf), byte)
    }

    /// Binary-search this layer for `oid`, returning its lexicographic
    /// position.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        let r = oid_table_lookup(
            self.slice(self.oidf),
            self.slice(self.oidl),
            self.algo.digest_len(),
            oid,
        );
        r.found.then_some(r.pos)
    }

    /// The OID at a lexicographic position.
    pub fn oid_at(&self, lex_pos: u32) -> ObjectId {
        let raw = oid_table_entry(self.slice(self.oidl), self.algo.digest_len(), lex_pos);
        ObjectId::from_bytes(raw, self.algo).expect("validated chunk size")
    }

    fn commit_entry(&self, lex_pos: u32) -> &[u8] {
        let width = commit_data_width(self.algo.digest_len());
        let start = self.cdat.0 + lex_pos as usize * width;
        &self.data[start..start + width]
    }

    /// Root tree of the commit at a lexicographic position.
    pub fn tree_at(&self, lex_pos: u32) -> ObjectId {
        let raw = &self.commit_entry(lex_pos)[..self.algo.digest_len()];
        ObjectId::from_bytes(raw, self.algo).expect("validated chunk size")
    }

    /// The two encoded parent-edge words of a CDAT entry.
    pub fn parent_words(&self, lex_pos: u32) -> (u32, u32) {
        let hash_len = self.algo.digest_len();
        let entry = self.commit_entry(lex_pos);
        let p1 = u32::from_be_bytes(entry[hash_len..hash_len + 4].try_into().unwrap());
        let p2 = u32::from_be_bytes(entry[hash_len + 4..hash_len + 8].try_into().unwrap());
        (p1, p2)
    }

    /// Walk an EDGE overflow list starting at `start_index`, returning raw
    /// position words with the terminator flag cleared.
    pub fn extra_parents(&self, start_index: u32) -> Result<Vec<u32>, GraphError> {
        let (off, len) = self.edge.ok_or_else(|| {
            GraphError::Malformed("octopus parents referenced but EDGE chunk is absent".into())
        })?;
        let words = &self.data[off..off + len];
        let mut out = Vec::new();
        let mut idx = start_index as usize;
        loop {
            let p = idx * 4;
            if p + 4 > words.len() {
                return Err(GraphError::Malformed(
                    "EDGE list runs past the end of the chunk".into(),
                ));
            }
            let word = u32::from_be_bytes(words[p..p + 4].try_into().unwrap());
            out.push(word & crate::GRAPH_EDGE_LAST_MASK);
            if word & GRAPH_LAST_EDGE != 0 {
                return Ok(out);
            }
            idx += 1;
        }
    }

    fn gen_date_word(&self, lex_pos: u32) -> u32 {
        let hash_len = self.algo.digest_len();
        let entry = self.commit_entry(lex_pos);
        u32::from_be_bytes(entry[hash_len + 8..hash_len + 12].try_into().unwrap())
    }

    /// Committer date, reassembled from the 34 stored bits.
    pub fn commit_time_at(&self, lex_pos: u32) -> i64 {
        let hash_len = self.algo.digest_len();
        let entry = self.commit_entry(lex_pos);
        let gen_date = self.gen_date_word(lex_pos);
        let low = u32::from_be_bytes(entry[hash_len + 12..hash_len + 16].try_into().unwrap());
        (((gen_date & 0x3) as u64) << 32 | low as u64) as i64
    }

    /// Topological level (generation v1) of the commit.
    pub fn topo_level_at(&self, lex_pos: u32) -> u32 {
        self.gen_date_word(lex_pos) >> 2
    }

    /// Corrected-commit-date offset from GDA2/GDO2, if the layer has one.
    pub fn generation_offset_at(&self, lex_pos: u32) -> Result<Option<u64>, GraphError> {
        let Some((off, _)) = self.gda2 else {
            return Ok(None);
        };
        let p = off + lex_pos as usize * 4;
        let word = u32::from_be_bytes(self.data[p..p + 4].try_into().unwrap());
        if word & crate::GENERATION_V2_OFFSET_OVERFLOW == 0 {
            return Ok(Some(word as u64));
        }
        let idx = (word ^ crate::GENERATION_V2_OFFSET_OVERFLOW) as usize;
        let (go, glen) = self.gdo2.ok_or_else(|| {
            GraphError::Malformed("generation overflow referenced but GDO2 chunk is absent".into())
        })?;
        let p = go + idx * 8;
        if p + 8 > go + glen {
            return Err(GraphError::Malformed(
                "generation overflow index out of range".into(),
            ));
        }
        Ok(Some(u64::from_be_bytes(
            self.data[p..p + 8].try_into().unwrap(),
        )))
    }

    /// Zero-copy slice of the commit's Bloom filter, if this layer carries
    /// filters. A zero-length slice is the "unknown" sentinel.
    pub fn bloom_filter_at(&self, lex_pos: u32) -> Option<&[u8]> {
        let bloom = self.bloom.as_ref()?;
        let bidx = self.slice(bloom.bidx);
        let end = u32::from_be_bytes(
            bidx[lex_pos as usize * 4..lex_pos as usize * 4 + 4]
                .try_into()
                .unwrap(),
        ) as usize;
        let start = if lex_pos == 0 {
            0
        } else {
            u32::from_be_bytes(
                bidx[(lex_pos as usize - 1) * 4..lex_pos as usize * 4]
                    .try_into()
                    .unwrap(),
            ) as usize
        };
        let bdat = self.slice(bloom.bdat);
        let body = &bdat[BLOOM_DATA_HEADER_SIZE..];
        if end < start || end > body.len() {
            return None;
        }
        Some(&body[start..end])
    }
}
