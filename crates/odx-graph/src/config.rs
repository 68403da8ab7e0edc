//! Read-only configuration consumed by the graph subsystem.
//!
//! Config file parsing happens in the host; the resolved values arrive here
//! as a plain struct.

/// Resolved configuration for commit-graph reading and writing.
#[derive(Debug, Clone)]
pub struct GraphConfig {
    /// `core.commitGraph` — whether readers consult graph files at all.
    pub core_commit_graph: bool,
    /// `commitGraph.generationVersion` — 1 for topological levels only,
    /// 2 to also read/write corrected commit dates.
    pub generation_version: u32,
    /// `commitGraph.readChangedPaths` — whether readers use Bloom chunks.
    pub read_changed_paths: bool,
    /// `commitGraph.maxNewFilters` — cap on filters computed per write;
    /// −1 means unlimited.
    pub max_new_filters: i64,
    /// Treat a malformed graph file as a hard error instead of degrading.
    /// Only set by test instrumentation.
    pub die_on_parse: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            core_commit_graph: true,
            generation_version: 2,
            read_changed_paths: true,
            max_new_filters: -1,
            die_on_parse: false,
        }
    }
}
