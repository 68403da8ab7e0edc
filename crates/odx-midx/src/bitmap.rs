//! Reachability bitmaps anchored to a multi-pack-index.
//!
//! A `.bitmap` sidecar stores, for a selected subset of commits, the set of
//! MIDX positions reachable from each commit, EWAH-compressed and optionally
//! XOR-delta'd against a nearby earlier selection:
//!
//! ```text
//! Header:  BITM (4) | version (2) | flags (2) | num_entries (4) | MIDX checksum
//! Typed:   4 × EWAH bitmaps (commits, trees, blobs, tags)
//! Entries: [object_pos (4) | xor_offset (1) | flags (1) | EWAH bitmap]*
//! ```

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};

use odx_graph::CommitSource;
use odx_hash::ObjectId;
use odx_utils::progress::maybe_progress;
use odx_utils::LockFile;

use crate::ewah::{self, Bitset};
use crate::path_walk::{PathKind, TreeSource};
use crate::{MidxError, MultiPackIndex};

pub const BITMAP_SIGNATURE: [u8; 4] = *b"BITM";
pub const BITMAP_VERSION: u16 = 1;

/// Selection spacing: the first `MUST_REGION` commits are always chosen.
const MUST_REGION: usize = 100;
/// One bitmap at least every `MIN_COMMITS` commits inside the dense region.
const MIN_COMMITS: usize = 100;
/// Spacing widens to at most one per `MAX_COMMITS` past the dense region.
const MAX_COMMITS: usize = 5000;
/// Size of the dense region.
const MIN_REGION: usize = 20000;

/// How far back an entry may XOR-reference an earlier one.
const XOR_WINDOW: usize = 10;

/// A commit offered to bitmap selection, in walk order.
#[derive(Debug, Clone, Copy)]
pub struct BitmapCandidate {
    pub oid: ObjectId,
    pub commit_time: i64,
    pub is_merge: bool,
    /// The host flagged this commit as wanting a bitmap.
    pub needs_bitmap: bool,
}

/// Oracles the bitmap writer needs beyond the MIDX itself.
pub struct BitmapRequest<'a> {
    /// Candidate commits in walk order.
    pub candidates: &'a [BitmapCandidate],
    /// Commit parsing (parents, root trees).
    pub commits: &'a dyn CommitSource,
    /// Tree enumeration.
    pub trees: &'a dyn TreeSource,
}

/// Artifacts of a bitmap write.
pub struct BitmapOutcome {
    pub path: PathBuf,
    pub selected_commits: usize,
}

/// `<object-dir>/multi-pack-index-<hex>.bitmap`.
pub fn bitmap_file_path(object_dir: &Path, checksum: &ObjectId) -> PathBuf {
    object_dir.join(format!("multi-pack-index-{}.bitmap", checksum.to_hex()))
}

/// Sort candidates into generation order (oldest first), so bitmap
/// selection spaces itself along the history rather than the input order.
/// Commits the graph does not know sort by commit date among themselves.
pub fn order_candidates(candidates: &mut [BitmapCandidate], graph: &odx_graph::CommitGraph) {
    candidates.sort_by_key(|c| {
        let generation = graph.generation_of(&c.oid);
        (generation, c.commit_time)
    });
}

/// Spacing policy: how wide the selection window at candidate `idx` is.
fn next_commit_index(idx: usize) -> usize {
    if idx <= MUST_REGION {
        return 0;
    }
    if idx <= MIN_REGION {
        let offset = idx - MUST_REGION;
        return offset.min(MIN_COMMITS);
    }
    let offset = idx - MIN_REGION;
    offset.min(MAX_COMMITS).max(MIN_COMMITS)
}

/// Choose which candidates get bitmaps. Inside each window, a commit the
/// host flagged wins, then the latest merge commit, then the window edge.
pub(crate) fn select_commits(candidates: &[BitmapCandidate]) -> Vec<usize> {
    let mut selected = Vec::new();
    let mut i = 0usize;
    while i < candidates.len() {
        let next = next_commit_index(i);
        if next == 0 {
            selected.push(i);
        } else {
            if i + next >= candidates.len() {
                break;
            }
            let mut chosen = i + next;
            for j in 0..=next {
                let cand = &candidates[i + j];
                if cand.needs_bitmap {
                    chosen = i + j;
                    break;
                }
                if cand.is_merge {
                    chosen = i + j;
                }
            }
            selected.push(chosen);
        }
        i += next + 1;
    }
    selected
}

struct StoredBitmap {
    object_pos: u32,
    xor_offset: u8,
    /// The resolved (un-XORed) reachability set.
    bits: Bitset,
    /// The bytes actually written: either `bits` or an XOR delta.
    encoded: Vec<u8>,
}

#[derive(Default)]
struct TypeBitmaps {
    commits: Bitset,
    trees: Bitset,
    blobs: Bitset,
    tags: Bitset,
}

/// Write the `.bitmap` sidecar for a freshly written MIDX.
pub(crate) fn write_bitmap(
    object_dir: &Path,
    midx_checksum: &ObjectId,
    object_pos: &HashMap<ObjectId, u32>,
    request: &BitmapRequest<'_>,
    show_progress: bool,
) -> Result<BitmapOutcome, MidxError> {
    let selected = select_commits(request.candidates);

    let mut types = TypeBitmaps::default();
    let mut stored: Vec<StoredBitmap> = Vec::new();
    let mut stored_by_oid: HashMap<ObjectId, usize> = HashMap::new();

    let mut progress = maybe_progress(
        show_progress,
        "Building bitmaps",
        Some(selected.len() as u64),
    );
    for &idx in &selected {
        if let Some(p) = progress.as_mut() {
            p.update(1);
        }
        let candidate = &request.candidates[idx];
        let Some(&pos) = object_pos.get(&candidate.oid) else {
            // A selected commit outside the MIDX cannot anchor a bitmap.
            continue;
        };
        let bits = fill_bitmap(
            &candidate.oid,
            request,
            object_pos,
            &stored,
            &stored_by_oid,
            &mut types,
        )?;

        // Keep the smallest representation within the XOR window.
        let mut encoded = ewah::encode(&bits);
        let mut xor_offset = 0u8;
        let window = stored.len().saturating_sub(XOR_WINDOW);
        for (j, prior) in stored.iter().enumerate().skip(window) {
            let delta = ewah::encode(&bits.xor(&prior.bits));
            if delta.len() < encoded.len() {
                encoded = delta;
                xor_offset = (stored.len() - j) as u8;
            }
        }

        stored_by_oid.insert(candidate.oid, stored.len());
        stored.push(StoredBitmap {
            object_pos: pos,
            xor_offset,
            bits,
            encoded,
        });
    }
    if let Some(p) = progress.take() {
        p.finish();
    }

    let path = bitmap_file_path(object_dir, midx_checksum);
    let mut lock = LockFile::acquire(&path)?;
    {
        let w = &mut lock;
        w.write_all(&BITMAP_SIGNATURE)?;
        w.write_all(&BITMAP_VERSION.to_be_bytes())?;
        w.write_all(&0u16.to_be_bytes())?; // flags
        w.write_all(&(stored.len() as u32).to_be_bytes())?;
        w.write_all(midx_checksum.as_bytes())?;
        w.write_all(&ewah::encode(&types.commits))?;
        w.write_all(&ewah::encode(&types.trees))?;
        w.write_all(&ewah::encode(&types.blobs))?;
        w.write_all(&ewah::encode(&types.tags))?;
        for entry in &stored {
            w.write_all(&entry.object_pos.to_be_bytes())?;
            w.write_all(&[entry.xor_offset, 0])?;
            w.write_all(&entry.encoded)?;
        }
    }
    lock.commit()?;

    Ok(BitmapOutcome {
        path,
        selected_commits: stored.len(),
    })
}

/// Objects reachable from `commit`, restricted to MIDX positions. Commits
/// that already have a stored bitmap contribute it wholesale instead of
/// being re-walked.
fn fill_bitmap(
    commit: &ObjectId,
    request: &BitmapRequest<'_>,
    object_pos: &HashMap<ObjectId, u32>,
    stored: &[StoredBitmap],
    stored_by_oid: &HashMap<ObjectId, usize>,
    types: &mut TypeBitmaps,
) -> Result<Bitset, MidxError> {
    let mut bits = Bitset::new();
    let mut visited: HashSet<ObjectId> = HashSet::new();
    let mut stack = vec![*commit];

    while let Some(oid) = stack.pop() {
        if !visited.insert(oid) {
            continue;
        }
        if let Some(&idx) = stored_by_oid.get(&oid) {
            bits.union(&stored[idx].bits);
            continue;
        }
        let record = request
            .commits
            .read_commit(&oid)
            .map_err(|e| MidxError::Odb(e.to_string()))?;
        if let Some(&pos) = object_pos.get(&oid) {
            bits.set(pos);
            types.commits.set(pos);
        }
        expand_tree(&record.tree, request, object_pos, &mut visited, &mut bits, types)?;
        stack.extend(record.parents);
    }
    Ok(bits)
}

fn expand_tree(
    root: &ObjectId,
    request: &BitmapRequest<'_>,
    object_pos: &HashMap<ObjectId, u32>,
    visited: &mut HashSet<ObjectId>,
    bits: &mut Bitset,
    types: &mut TypeBitmaps,
) -> Result<(), MidxError> {
    let mut stack = vec![*root];
    while let Some(tree) = stack.pop() {
        if !visited.insert(tree) {
            continue;
        }
        if let Some(&pos) = object_pos.get(&tree) {
            bits.set(pos);
            types.trees.set(pos);
        }
        for entry in request.trees.read_tree(&tree)? {
            match entry.kind {
                PathKind::Tree => stack.push(entry.oid),
                PathKind::Blob => {
                    if visited.insert(entry.oid) {
                        if let Some(&pos) = object_pos.get(&entry.oid) {
                            bits.set(pos);
                            types.blobs.set(pos);
                        }
                    }
                }
                // Gitlinks point outside this object directory.
                PathKind::Commit => {}
            }
        }
    }
    Ok(())
}

/// A parsed `.bitmap` sidecar, with XOR chains resolved.
pub struct BitmapIndex {
    midx_checksum: ObjectId,
    commits: Bitset,
    trees: Bitset,
    blobs: Bitset,
    tags: Bitset,
    /// Resolved per-commit bitmaps keyed by MIDX position.
    entries: Vec<(u32, Bitset)>,
}

impl BitmapIndex {
    /// Open and fully decode a bitmap file, validating it belongs to `midx`.
    pub fn open(path: &Path, midx: &MultiPackIndex) -> Result<Self, MidxError> {
        let data = std::fs::read(path)?;
        let hash_len = midx.algorithm().digest_len();
        if data.len() < 12 + hash_len {
            return Err(MidxError::Malformed("bitmap file too small".into()));
        }
        if data[0..4] != BITMAP_SIGNATURE {
            return Err(MidxError::Malformed("bad bitmap signature".into()));
        }
        let version = u16::from_be_bytes(data[4..6].try_into().unwrap());
        if version != BITMAP_VERSION {
            return Err(MidxError::Unsupported(format!("bitmap version {version}")));
        }
        let num_entries = u32::from_be_bytes(data[8..12].try_into().unwrap());
        let midx_checksum =
            ObjectId::from_bytes(&data[12..12 + hash_len], midx.algorithm())?;
        if &midx_checksum != midx.checksum() {
            return Err(MidxError::Malformed(
                "bitmap does not belong to this multi-pack-index".into(),
            ));
        }

        let mut pos = 12 + hash_len;
        let (commits, p) = ewah::decode(&data, pos)?;
        pos = p;
        let (trees, p) = ewah::decode(&data, pos)?;
        pos = p;
        let (blobs, p) = ewah::decode(&data, pos)?;
        pos = p;
        let (tags, p) = ewah::decode(&data, pos)?;
        pos = p;

        let mut entries: Vec<(u32, Bitset)> = Vec::with_capacity(num_entries as usize);
        for _ in 0..num_entries {
            if pos + 6 > data.len() {
                return Err(MidxError::Malformed("truncated bitmap entry".into()));
            }
            let object_pos = u32::from_be_bytes(data[pos..pos + 4].try_into().unwrap());
            let xor_offset = data[pos + 4] as usize;
            let (raw, p) = ewah::decode(&data, pos + 6)?;
            pos = p;

            let bits = if xor_offset == 0 {
                raw
            } else {
                if xor_offset > entries.len() {
                    return Err(MidxError::Malformed(
                        "bitmap XOR offset reaches before the first entry".into(),
                    ));
                }
                let base = &entries[entries.len() - xor_offset].1;
                raw.xor(base)
            };
            entries.push((object_pos, bits));
        }

        Ok(Self {
            midx_checksum,
            commits,
            trees,
            blobs,
            tags,
            entries,
        })
    }

    pub fn midx_checksum(&self) -> &ObjectId {
        &self.midx_checksum
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn has_bitmap_for(&self, midx_pos: u32) -> bool {
        self.entries.iter().any(|(pos, _)| *pos == midx_pos)
    }

    /// The reachability set stored for the commit at a MIDX position.
    pub fn reachable(&self, midx_pos: u32) -> Option<&Bitset> {
        self.entries
            .iter()
            .find(|(pos, _)| *pos == midx_pos)
            .map(|(_, bits)| bits)
    }

    pub fn commits(&self) -> &Bitset {
        &self.commits
    }

    pub fn trees(&self) -> &Bitset {
        &self.trees
    }

    pub fn blobs(&self) -> &Bitset {
        &self.blobs
    }

    pub fn tags(&self) -> &Bitset {
        &self.tags
    }
}
