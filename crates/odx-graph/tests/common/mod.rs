//! Shared fixtures: an in-memory object database and diff oracle.

use std::collections::HashMap;

use bstr::BString;
use odx_graph::{ChangedPathSource, CommitRecord, CommitSource, GraphError, Incompatibility};
use odx_hash::{HashAlgorithm, ObjectId};

/// Deterministic OID from a small integer.
pub fn oid(n: u32) -> ObjectId {
    let mut bytes = [0u8; 20];
    bytes[0] = (n >> 8) as u8;
    bytes[1] = n as u8;
    bytes[16..20].copy_from_slice(&n.to_be_bytes());
    ObjectId::from_bytes(&bytes, HashAlgorithm::Sha1).unwrap()
}

/// Tree OIDs live in a separate numeric namespace.
pub fn tree_oid(n: u32) -> ObjectId {
    oid(0x0080_0000 + n)
}

#[derive(Default)]
pub struct MockOdb {
    pub commits: HashMap<ObjectId, CommitRecord>,
    pub incompat: Option<Incompatibility>,
}

impl MockOdb {
    pub fn add_commit(&mut self, id: ObjectId, parents: Vec<ObjectId>, commit_time: i64) {
        let tree = tree_oid(self.commits.len() as u32 + 1);
        self.commits.insert(
            id,
            CommitRecord {
                tree,
                parents,
                commit_time,
            },
        );
    }

    /// A linear chain `first..first+n`, oldest first, dates stepping by
    /// `date_step` from `base_date`.
    pub fn add_linear(&mut self, first: u32, n: u32, base_date: i64, date_step: i64) -> Vec<ObjectId> {
        let mut tips = Vec::new();
        for i in 0..n {
            let id = oid(first + i);
            let parents = if i == 0 { vec![] } else { vec![oid(first + i - 1)] };
            self.add_commit(id, parents, base_date + i as i64 * date_step);
            tips.push(id);
        }
        tips
    }
}

impl CommitSource for MockOdb {
    fn contains(&self, id: &ObjectId) -> bool {
        self.commits.contains_key(id)
    }

    fn read_commit(&self, id: &ObjectId) -> Result<CommitRecord, GraphError> {
        self.commits
            .get(id)
            .cloned()
            .ok_or_else(|| GraphError::Odb(format!("missing commit {id}")))
    }

    fn incompatibility(&self) -> Option<Incompatibility> {
        self.incompat
    }
}

#[derive(Default)]
pub struct MockDiffs {
    pub changes: HashMap<ObjectId, Vec<BString>>,
}

impl MockDiffs {
    pub fn set(&mut self, commit: ObjectId, paths: &[&str]) {
        self.changes
            .insert(commit, paths.iter().map(|p| BString::from(*p)).collect());
    }
}

impl ChangedPathSource for MockDiffs {
    fn changed_paths(
        &self,
        commit: &ObjectId,
        _first_parent: Option<&ObjectId>,
    ) -> Result<Vec<BString>, GraphError> {
        Ok(self.changes.get(commit).cloned().unwrap_or_default())
    }
}
