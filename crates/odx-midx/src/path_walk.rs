//! Path-grouped reachability walk.
//!
//! Bitmap selection wants reachable objects grouped by the path they live
//! at, so batches of trees or blobs that belong together can be processed
//! together. The driver owns a `path → objects` map and a stack of paths
//! still to expand; each object is routed to exactly one path via a SEEN
//! mark, and a path whose objects are all marked UNINTERESTING is skipped
//! wholesale.

use std::collections::{HashMap, HashSet};

use bstr::{BStr, BString, ByteSlice, ByteVec};
use odx_hash::ObjectId;

use crate::MidxError;

/// What an emitted object group contains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathKind {
    Commit,
    Tree,
    Blob,
}

/// One entry of a tree object.
#[derive(Debug, Clone)]
pub struct TreeEntry {
    pub name: BString,
    pub oid: ObjectId,
    pub kind: PathKind,
}

/// Tree enumeration oracle; the walk never parses tree objects itself.
pub trait TreeSource {
    fn read_tree(&self, oid: &ObjectId) -> Result<Vec<TreeEntry>, MidxError>;
}

/// A commit to walk from: its id, root tree, and committer date.
#[derive(Debug, Clone, Copy)]
pub struct WalkCommit {
    pub oid: ObjectId,
    pub tree: ObjectId,
    pub commit_time: i64,
}

/// The path-walk driver.
pub struct PathWalk<'a> {
    trees: &'a dyn TreeSource,
    /// Objects the caller wants pruned; a group that is entirely
    /// uninteresting is never emitted.
    pub uninteresting: HashSet<ObjectId>,
}

impl<'a> PathWalk<'a> {
    pub fn new(trees: &'a dyn TreeSource) -> Self {
        Self {
            trees,
            uninteresting: HashSet::new(),
        }
    }

    /// Walk from `commits`, invoking `emit(path, oids, kind)` for each
    /// group. Commits are emitted first (newest date first, at the empty
    /// path), then tree/blob groups as their paths pop off the stack.
    pub fn walk(
        &self,
        commits: &[WalkCommit],
        mut emit: impl FnMut(&BStr, &[ObjectId], PathKind) -> Result<(), MidxError>,
    ) -> Result<(), MidxError> {
        let mut by_date: Vec<&WalkCommit> = commits.iter().collect();
        by_date.sort_by_key(|c| std::cmp::Reverse(c.commit_time));

        let mut seen: HashSet<ObjectId> = HashSet::new();
        let commit_group: Vec<ObjectId> = by_date
            .iter()
            .filter(|c| seen.insert(c.oid))
            .map(|c| c.oid)
            .collect();
        if !commit_group.is_empty()
            && commit_group.iter().any(|o| !self.uninteresting.contains(o))
        {
            emit(BStr::new(b""), &commit_group, PathKind::Commit)?;
        }

        // Every root tree starts at the empty path.
        let mut groups: HashMap<BString, (Vec<ObjectId>, PathKind)> = HashMap::new();
        let mut stack: Vec<BString> = Vec::new();
        for commit in &by_date {
            if seen.insert(commit.tree) {
                push_object(
                    &mut groups,
                    &mut stack,
                    BString::from(""),
                    commit.tree,
                    PathKind::Tree,
                );
            }
        }

        while let Some(path) = stack.pop() {
            let Some((oids, kind)) = groups.remove(&path) else {
                continue;
            };
            if oids.iter().all(|o| self.uninteresting.contains(o)) {
                continue;
            }
            emit(path.as_bstr(), &oids, kind)?;

            if kind != PathKind::Tree {
                continue;
            }
            for oid in &oids {
                if self.uninteresting.contains(oid) {
                    continue;
                }
                for entry in self.trees.read_tree(oid)? {
                    if !seen.insert(entry.oid) {
                        continue;
                    }
                    let mut child = path.clone();
                    if !child.is_empty() {
                        child.push_byte(b'/');
                    }
                    child.extend_from_slice(entry.name.as_slice());
                    push_object(&mut groups, &mut stack, child, entry.oid, entry.kind);
                }
            }
        }
        Ok(())
    }
}

fn push_object(
    groups: &mut HashMap<BString, (Vec<ObjectId>, PathKind)>,
    stack: &mut Vec<BString>,
    path: BString,
    oid: ObjectId,
    kind: PathKind,
) {
    match groups.get_mut(&path) {
        Some((oids, _)) => oids.push(oid),
        None => {
            groups.insert(path.clone(), (vec![oid], kind));
            stack.push(path);
        }
    }
}
