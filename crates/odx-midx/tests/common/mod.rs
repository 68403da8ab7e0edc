//! Shared fixtures: synthetic packs and an in-memory object database.

use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, SystemTime};

use bstr::BString;
use odx_graph::{CommitRecord, CommitSource, GraphError};
use odx_hash::{HashAlgorithm, ObjectId};
use odx_midx::pack_index::encode_pack_index;
use odx_midx::path_walk::{PathKind, TreeEntry, TreeSource};

pub const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

pub fn oid(n: u32) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes[0] = (n >> 8) as u8;
    bytes[1] = n as u8;
    bytes[16..20].copy_from_slice(&n.to_be_bytes());
    ObjectId::from_bytes(&bytes, ALGO).unwrap()
}

/// Write `<object-dir>/pack/<name>.idx` (and an empty `.pack` with the given
/// mtime so tie-breaks are deterministic).
pub fn make_pack(
    object_dir: &Path,
    name: &str,
    entries: &[(ObjectId, u64)],
    age_secs: u64,
) {
    let pack_dir = object_dir.join("pack");
    std::fs::create_dir_all(&pack_dir).unwrap();
    let idx = encode_pack_index(entries, ALGO);
    std::fs::write(pack_dir.join(format!("{name}.idx")), idx).unwrap();

    let pack_path = pack_dir.join(format!("{name}.pack"));
    std::fs::write(&pack_path, b"PACK").unwrap();
    let mtime = SystemTime::now() - Duration::from_secs(age_secs);
    std::fs::File::options()
        .write(true)
        .open(&pack_path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

/// In-memory commit and tree store for bitmap walks.
#[derive(Default)]
pub struct MockObjects {
    pub commits: HashMap<ObjectId, CommitRecord>,
    pub trees: HashMap<ObjectId, Vec<TreeEntry>>,
}

impl MockObjects {
    pub fn add_commit(
        &mut self,
        id: ObjectId,
        tree: ObjectId,
        parents: Vec<ObjectId>,
        commit_time: i64,
    ) {
        self.commits.insert(
            id,
            CommitRecord {
                tree,
                parents,
                commit_time,
            },
        );
    }

    pub fn add_tree(&mut self, id: ObjectId, entries: &[(&str, ObjectId, PathKind)]) {
        self.trees.insert(
            id,
            entries
                .iter()
                .map(|(name, oid, kind)| TreeEntry {
                    name: BString::from(*name),
                    oid: *oid,
                    kind: *kind,
                })
                .collect(),
        );
    }
}

impl CommitSource for MockObjects {
    fn contains(&self, id: &ObjectId) -> bool {
        self.commits.contains_key(id)
    }

    fn read_commit(&self, id: &ObjectId) -> Result<CommitRecord, GraphError> {
        self.commits
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::Odb(format!("missing commit {id}")))
    }
}

impl TreeSource for MockObjects {
    fn read_tree(&self, id: &ObjectId) -> Result<Vec<TreeEntry>, odx_midx::MidxError> {
        self.trees
            .get(id)
            .cloned()
            .ok_or_else(|| odx_midx::MidxError::Odb(format!("missing tree {id}")))
    }
}
