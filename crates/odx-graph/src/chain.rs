//! Split-chain layout: file naming, chain loading, merge heuristics, expiry.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use odx_hash::{HashAlgorithm, ObjectId};

use crate::{GraphError, GraphFile};

/// `<object-dir>/info/commit-graph` — the single-layer form.
pub fn single_graph_path(object_dir: &Path) -> PathBuf {
    object_dir.join("info").join("commit-graph")
}

/// `<object-dir>/info/commit-graphs` — where chain layers live.
pub fn graph_dir(object_dir: &Path) -> PathBuf {
    object_dir.join("info").join("commit-graphs")
}

/// `<object-dir>/info/commit-graphs/commit-graph-chain`.
pub fn chain_path(object_dir: &Path) -> PathBuf {
    graph_dir(object_dir).join("commit-graph-chain")
}

/// `<object-dir>/info/commit-graphs/graph-<hex>.graph`.
pub fn layer_file_path(object_dir: &Path, oid: &ObjectId) -> PathBuf {
    graph_dir(object_dir).join(format!("graph-{}.graph", oid.to_hex()))
}

/// Load the chain: open every referenced layer, bottom first, and check that
/// each layer's `BASE` chunk lists exactly the trailer hashes beneath it.
pub(crate) fn load_chain(
    object_dir: &Path,
    algo: HashAlgorithm,
) -> Result<Option<Vec<GraphFile>>, GraphError> {
    let chain_file = chain_path(object_dir);
    let content = match std::fs::read_to_string(&chain_file) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mut layers: Vec<GraphFile> = Vec::new();
    for line in content.lines() {
        let hex = line.trim();
        if hex.is_empty() {
            continue;
        }
        let oid = ObjectId::from_hex(hex)
            .map_err(|_| GraphError::Malformed(format!("invalid chain entry '{hex}'")))?;
        let layer = match GraphFile::open(layer_file_path(object_dir, &oid), algo) {
            Ok(layer) => layer,
            Err(GraphError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(GraphError::Malformed(format!(
                    "chain references missing graph file graph-{hex}.graph"
                )));
            }
            Err(e) => return Err(e),
        };
        if layer.oid() != &oid {
            return Err(GraphError::Malformed(format!(
                "graph file {} does not have the checksum its name claims",
                layer.path().display()
            )));
        }
        let bases = layer.base_hashes();
        if bases.len() != layers.len()
            || bases
                .iter()
                .zip(layers.iter())
                .any(|(base, below)| base != below.oid())
        {
            return Err(GraphError::Malformed(format!(
                "graph layer {oid} disagrees with the chain beneath it"
            )));
        }
        layers.push(layer);
    }

    if layers.is_empty() {
        return Ok(None);
    }
    Ok(Some(layers))
}

/// How many bottom layers of the existing chain survive a split write.
///
/// Walking down from the top of the chain, a layer is absorbed into the new
/// top layer while it holds no more than `size_multiple` times the commits
/// being written (or while the running count exceeds `max_commits`).
pub(crate) fn split_merge_decision(
    existing_counts: &[u32],
    new_commits: u32,
    size_multiple: u32,
    max_commits: u32,
) -> usize {
    let mut keep = existing_counts.len();
    let mut num = new_commits as u64;
    while keep > 0 {
        let top = existing_counts[keep - 1] as u64;
        let absorb =
            top <= size_multiple as u64 * num || (max_commits > 0 && num > max_commits as u64);
        if !absorb {
            break;
        }
        num += top;
        keep -= 1;
    }
    keep
}

/// Unlink stale `.graph` files: anything in the graph directory not named by
/// `keep` whose mtime is older than `expire_time` (default: now).
pub(crate) fn expire_graph_files(
    object_dir: &Path,
    keep: &HashSet<PathBuf>,
    expire_time: Option<SystemTime>,
) -> std::io::Result<()> {
    let dir = graph_dir(object_dir);
    let entries = match std::fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };
    let cutoff = expire_time.unwrap_or_else(SystemTime::now);

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if !name.starts_with("graph-") || !name.ends_with(".graph") {
            continue;
        }
        let path = entry.path();
        if keep.contains(&path) {
            continue;
        }
        let mtime = entry.metadata()?.modified()?;
        if mtime < cutoff {
            let _ = std::fs::remove_file(&path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_chain_keeps_base() {
        // 100-commit base, 3 new commits, multiple 2: 100 > 6, keep the base.
        assert_eq!(split_merge_decision(&[100], 3, 2, 0), 1);
    }

    #[test]
    fn growth_triggers_merge() {
        // Base 100 and top 3; writing 60 first absorbs the top (3 <= 120,
        // running count 63), then the base (100 <= 126) — nothing survives.
        assert_eq!(split_merge_decision(&[100, 3], 60, 2, 0), 0);
    }

    #[test]
    fn max_commits_forces_merge() {
        // Running count above max_commits keeps absorbing regardless of size.
        assert_eq!(split_merge_decision(&[1000, 900], 150, 2, 100), 0);
    }

    #[test]
    fn empty_chain() {
        assert_eq!(split_merge_decision(&[], 5, 2, 0), 0);
    }

    #[test]
    fn paths() {
        let dir = Path::new("/repo/.git/objects");
        assert!(single_graph_path(dir).ends_with("info/commit-graph"));
        assert!(chain_path(dir).ends_with("info/commit-graphs/commit-graph-chain"));
        let oid = ObjectId::from_hex("da39a3ee5e6b4b0d3255bfef95601890afd80709").unwrap();
        assert!(layer_file_path(dir, &oid)
            .to_string_lossy()
            .ends_with("graph-da39a3ee5e6b4b0d3255bfef95601890afd80709.graph"));
    }
}
