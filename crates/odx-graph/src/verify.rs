//! Structural verification of commit-graph files.
//!
//! Maintenance tooling wants every problem, not the first one, so the
//! verifier records all findings and returns them as a flag mask plus
//! human-readable detail.

use odx_hash::Hasher;

use crate::{CommitGraph, CommitSource, GraphError};

bitflags::bitflags! {
    /// Classes of problems a graph verification can find.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct VerifyIssues: u32 {
        /// Trailer hash does not match the file contents.
        const BAD_CHECKSUM = 1 << 0;
        /// OID table out of lexicographic order.
        const BAD_OID_ORDER = 1 << 1;
        /// Fanout entries non-monotone or disagreeing with the OID count.
        const BAD_FANOUT = 1 << 2;
        /// Parent edge undecodable or escaping the layer closure.
        const BAD_PARENT = 1 << 3;
        /// Generation numbers inconsistent with parents or dates.
        const BAD_GENERATION = 1 << 4;
        /// Null root tree.
        const BAD_ROOT_TREE = 1 << 5;
        /// BASE chunks or layer file names disagree with the chain.
        const BAD_CHAIN = 1 << 6;
        /// Graph metadata disagrees with the object database.
        const ODB_MISMATCH = 1 << 7;
    }
}

/// Everything a verification run found.
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub issues: VerifyIssues,
    pub messages: Vec<String>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn record(&mut self, issue: VerifyIssues, message: String) {
        self.issues |= issue;
        self.messages.push(message);
    }
}

/// Verify every layer of a graph, optionally cross-checking commit metadata
/// against the object database.
pub fn verify_graph(graph: &CommitGraph, source: Option<&dyn CommitSource>) -> VerifyReport {
    let mut report = VerifyReport::default();

    // Per-layer structural checks.
    let mut below: Vec<odx_hash::ObjectId> = Vec::new();
    for layer in graph.layers() {
        let algo = layer.algorithm();
        let hash_len = algo.digest_len();
        let bytes = layer.bytes();

        let mut hasher = Hasher::new(algo);
        hasher.update(&bytes[..bytes.len() - hash_len]);
        match hasher.finalize() {
            Ok(actual) if &actual == layer.oid() => {}
            Ok(actual) => report.record(
                VerifyIssues::BAD_CHECKSUM,
                format!(
                    "{}: checksum {} does not match stored trailer {}",
                    layer.path().display(),
                    actual,
                    layer.oid()
                ),
            ),
            Err(e) => report.record(
                VerifyIssues::BAD_CHECKSUM,
                format!("{}: {e}", layer.path().display()),
            ),
        }

        if let Some(name) = layer.path().file_name().and_then(|n| n.to_str()) {
            if name.starts_with("graph-")
                && name != format!("graph-{}.graph", layer.oid().to_hex())
            {
                report.record(
                    VerifyIssues::BAD_CHAIN,
                    format!("{name}: file name does not match its checksum"),
                );
            }
        }

        let mut prev_entry = 0u32;
        for byte in 0u16..=255 {
            let entry = layer.fanout_entry(byte as u8);
            if entry < prev_entry {
                report.record(
                    VerifyIssues::BAD_FANOUT,
                    format!(
                        "{}: fanout[{byte:#04x}] = {entry} decreases from {prev_entry}",
                        layer.path().display()
                    ),
                );
            }
            prev_entry = entry;
        }
        if prev_entry != layer.num_commits() {
            report.record(
                VerifyIssues::BAD_FANOUT,
                format!(
                    "{}: fanout total {prev_entry} != commit count {}",
                    layer.path().display(),
                    layer.num_commits()
                ),
            );
        }

        for lex in 1..layer.num_commits() {
            if layer.oid_at(lex - 1) >= layer.oid_at(lex) {
                report.record(
                    VerifyIssues::BAD_OID_ORDER,
                    format!(
                        "{}: OID at position {lex} is not greater than its predecessor",
                        layer.path().display()
                    ),
                );
            }
        }

        let bases = layer.base_hashes();
        if bases.len() != below.len() || bases.iter().zip(below.iter()).any(|(a, b)| a != b) {
            report.record(
                VerifyIssues::BAD_CHAIN,
                format!(
                    "{}: BASE chunk does not list the chain beneath it",
                    layer.path().display()
                ),
            );
        }
        below.push(*layer.oid());
    }

    // Per-commit semantic checks across the whole chain.
    for pos in 0..graph.num_commits() {
        let oid = graph.oid_at(pos);

        if graph.tree_at(pos).is_null() {
            report.record(
                VerifyIssues::BAD_ROOT_TREE,
                format!("commit {oid} has a null root tree"),
            );
        }

        let parents = match graph.parents_at(pos) {
            Ok(parents) => parents,
            Err(e) => {
                report.record(
                    VerifyIssues::BAD_PARENT,
                    format!("commit {oid}: {e}"),
                );
                continue;
            }
        };

        let generation = match graph.generation_at(pos) {
            Ok(g) => g,
            Err(e) => {
                report.record(
                    VerifyIssues::BAD_GENERATION,
                    format!("commit {oid}: {e}"),
                );
                continue;
            }
        };
        if graph.has_generation_v2() && generation < graph.commit_time_at(pos).max(0) as u64 + 1 {
            report.record(
                VerifyIssues::BAD_GENERATION,
                format!("commit {oid}: generation {generation} below its commit date"),
            );
        }
        for &parent in &parents {
            let parent_gen = match graph.generation_at(parent) {
                Ok(g) => g,
                Err(_) => continue,
            };
            let clamped = !graph.has_generation_v2()
                && parent_gen >= crate::GENERATION_NUMBER_V1_MAX - 1;
            if generation < parent_gen + 1 && !clamped {
                report.record(
                    VerifyIssues::BAD_GENERATION,
                    format!(
                        "commit {oid}: generation {generation} not above parent generation {parent_gen}"
                    ),
                );
            }
        }

        if let Some(source) = source {
            verify_against_odb(graph, pos, &parents, source, &mut report);
        }
    }

    report
}

fn verify_against_odb(
    graph: &CommitGraph,
    pos: u32,
    parents: &[u32],
    source: &dyn CommitSource,
    report: &mut VerifyReport,
) {
    let oid = graph.oid_at(pos);
    let record = match source.read_commit(&oid) {
        Ok(r) => r,
        Err(GraphError::Odb(e)) => {
            report.record(
                VerifyIssues::ODB_MISMATCH,
                format!("commit {oid} is in the graph but not the object database: {e}"),
            );
            return;
        }
        Err(e) => {
            report.record(VerifyIssues::ODB_MISMATCH, format!("commit {oid}: {e}"));
            return;
        }
    };

    if record.tree != graph.tree_at(pos) {
        report.record(
            VerifyIssues::ODB_MISMATCH,
            format!("commit {oid}: root tree disagrees with the object database"),
        );
    }
    if record.commit_time != graph.commit_time_at(pos) {
        report.record(
            VerifyIssues::ODB_MISMATCH,
            format!("commit {oid}: commit date disagrees with the object database"),
        );
    }
    let graph_parents: Vec<_> = parents.iter().map(|&p| graph.oid_at(p)).collect();
    if graph_parents != record.parents {
        report.record(
            VerifyIssues::ODB_MISMATCH,
            format!("commit {oid}: parent list disagrees with the object database"),
        );
    }
}
