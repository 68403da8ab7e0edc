//! The chain-aware commit-graph reader.

use std::path::Path;

use odx_bloom::BloomSettings;
use odx_hash::{HashAlgorithm, ObjectId};

use crate::chain::{load_chain, single_graph_path};
use crate::{
    CommitSource, GraphConfig, GraphError, GraphFile, GENERATION_NUMBER_INFINITY,
    GRAPH_EDGE_LAST_MASK, GRAPH_EXTRA_EDGES_NEEDED, GRAPH_PARENT_NONE,
};

/// Decoded metadata for one commit in the graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphCommit {
    pub oid: ObjectId,
    pub tree: ObjectId,
    /// Graph-global positions of the parents, in order.
    pub parents: Vec<u32>,
    pub generation: u64,
    pub commit_time: i64,
}

/// A commit graph: one or more layers, bottom of the chain first.
///
/// Positions are *global*: a commit's position is its lexicographic index
/// within its layer plus the total number of commits in the layers beneath.
/// Parent edges on disk use the same numbering, so edges may point downward
/// into ancestor layers but never upward.
pub struct CommitGraph {
    layers: Vec<GraphFile>,
    /// Global position of each layer's first commit.
    layer_starts: Vec<u32>,
    num_commits: u32,
    /// Corrected commit dates are usable only when every layer carries them.
    generation_v2: bool,
    read_changed_paths: bool,
}

impl CommitGraph {
    /// Open the graph for an object directory: the single-file form if
    /// present, otherwise the chain form.
    ///
    /// Returns `Ok(None)` when no graph exists, when graphs are disabled by
    /// config, or when a malformed file was skipped (after a warning). With
    /// `config.die_on_parse` a malformed file is a hard error.
    pub fn open(
        object_dir: &Path,
        algo: HashAlgorithm,
        config: &GraphConfig,
    ) -> Result<Option<Self>, GraphError> {
        if !config.core_commit_graph {
            return Ok(None);
        }
        match Self::open_impl(object_dir, algo, config) {
            Ok(graph) => Ok(graph),
            Err(
                e @ (GraphError::Malformed(_)
                | GraphError::Unsupported(_)
                | GraphError::Chunk(_)
                | GraphError::Hash(_)),
            ) => {
                if config.die_on_parse {
                    return Err(e);
                }
                eprintln!("warning: commit-graph ignored: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    fn open_impl(
        object_dir: &Path,
        algo: HashAlgorithm,
        config: &GraphConfig,
    ) -> Result<Option<Self>, GraphError> {
        let single = single_graph_path(object_dir);
        let layers = if single.exists() {
            let file = GraphFile::open(&single, algo)?;
            if !file.base_hashes().is_empty() {
                return Err(GraphError::Malformed(
                    "single commit-graph file must not reference base layers".into(),
                ));
            }
            vec![file]
        } else {
            match load_chain(object_dir, algo)? {
                Some(layers) => layers,
                None => return Ok(None),
            }
        };
        Ok(Some(Self::from_layers(layers, config)))
    }

    /// Assemble a graph from already-opened layers (bottom first).
    pub fn from_layers(layers: Vec<GraphFile>, config: &GraphConfig) -> Self {
        let mut layer_starts = Vec::with_capacity(layers.len());
        let mut total = 0u32;
        for layer in &layers {
            layer_starts.push(total);
            total += layer.num_commits();
        }
        let generation_v2 =
            config.generation_version >= 2 && layers.iter().all(|l| l.has_generation_data());
        Self {
            layers,
            layer_starts,
            num_commits: total,
            generation_v2,
            read_changed_paths: config.read_changed_paths,
        }
    }

    pub fn num_commits(&self) -> u32 {
        self.num_commits
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Layers bottom-first.
    pub fn layers(&self) -> &[GraphFile] {
        &self.layers
    }

    /// Whether corrected commit dates are in effect for the whole chain.
    pub fn has_generation_v2(&self) -> bool {
        self.generation_v2
    }

    /// Bloom settings in effect, discovered from the newest layer carrying
    /// filters.
    pub fn bloom_settings(&self) -> Option<&BloomSettings> {
        if !self.read_changed_paths {
            return None;
        }
        self.layers.iter().rev().find_map(|l| l.bloom_settings())
    }

    /// Find a commit, newest layer first.
    pub fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            if let Some(lex) = layer.lookup(oid) {
                return Some(self.layer_starts[idx] + lex);
            }
        }
        None
    }

    /// Find a commit that is both in the graph *and* still present in the
    /// object database, so pruned commits are never resurrected.
    pub fn lookup_commit(&self, oid: &ObjectId, odb: &dyn CommitSource) -> Option<u32> {
        let pos = self.lookup(oid)?;
        odb.contains(oid).then_some(pos)
    }

    fn layer_index(&self, pos: u32) -> usize {
        assert!(pos < self.num_commits, "graph position {pos} out of range");
        match self.layer_starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        }
    }

    fn layer_for(&self, pos: u32) -> (&GraphFile, u32) {
        let idx = self.layer_index(pos);
        (&self.layers[idx], pos - self.layer_starts[idx])
    }

    pub fn oid_at(&self, pos: u32) -> ObjectId {
        let (layer, lex) = self.layer_for(pos);
        layer.oid_at(lex)
    }

    pub fn tree_at(&self, pos: u32) -> ObjectId {
        let (layer, lex) = self.layer_for(pos);
        layer.tree_at(lex)
    }

    pub fn commit_time_at(&self, pos: u32) -> i64 {
        let (layer, lex) = self.layer_for(pos);
        layer.commit_time_at(lex)
    }

    /// Topological level (generation v1).
    pub fn topo_level_at(&self, pos: u32) -> u32 {
        let (layer, lex) = self.layer_for(pos);
        layer.topo_level_at(lex)
    }

    /// The effective generation number: corrected commit date when the whole
    /// chain supports it, topological level otherwise.
    pub fn generation_at(&self, pos: u32) -> Result<u64, GraphError> {
        let (layer, lex) = self.layer_for(pos);
        if self.generation_v2 {
            let offset = layer
                .generation_offset_at(lex)?
                .expect("layer has generation data in v2 mode");
            return Ok(layer.commit_time_at(lex) as u64 + offset);
        }
        Ok(layer.topo_level_at(lex) as u64)
    }

    /// Generation of an arbitrary OID; `INFINITY` when the graph does not
    /// know the commit.
    pub fn generation_of(&self, oid: &ObjectId) -> u64 {
        match self.lookup(oid) {
            Some(pos) => self.generation_at(pos).unwrap_or(GENERATION_NUMBER_INFINITY),
            None => GENERATION_NUMBER_INFINITY,
        }
    }

    /// Graph-global positions of a commit's parents.
    ///
    /// Every edge must land within the commit's own layer or an ancestor
    /// layer; anything else means the file lies about its closure.
    pub fn parents_at(&self, pos: u32) -> Result<Vec<u32>, GraphError> {
        let idx = self.layer_index(pos);
        let layer = &self.layers[idx];
        let lex = pos - self.layer_starts[idx];
        let layer_end = self.layer_starts[idx] + layer.num_commits();
        let (p1, p2) = layer.parent_words(lex);

        let mut parents = Vec::new();
        let mut push = |edge: u32| -> Result<(), GraphError> {
            if edge >= layer_end {
                return Err(GraphError::Malformed(format!(
                    "parent edge {edge} escapes the layer closure (end {layer_end})"
                )));
            }
            parents.push(edge);
            Ok(())
        };

        if p1 != GRAPH_PARENT_NONE {
            push(p1 & GRAPH_EDGE_LAST_MASK)?;
        }
        if p2 != GRAPH_PARENT_NONE {
            if p2 & GRAPH_EXTRA_EDGES_NEEDED != 0 {
                for edge in layer.extra_parents(p2 & GRAPH_EDGE_LAST_MASK)? {
                    push(edge)?;
                }
            } else {
                push(p2)?;
            }
        }
        Ok(parents)
    }

    /// Decode everything about the commit at `pos`.
    pub fn commit_at(&self, pos: u32) -> Result<GraphCommit, GraphError> {
        Ok(GraphCommit {
            oid: self.oid_at(pos),
            tree: self.tree_at(pos),
            parents: self.parents_at(pos)?,
            generation: self.generation_at(pos)?,
            commit_time: self.commit_time_at(pos),
        })
    }

    /// The commit's changed-path Bloom filter, if its layer carries filters.
    /// A zero-length slice means "unknown; fall back".
    pub fn bloom_filter_at(&self, pos: u32) -> Option<&[u8]> {
        if !self.read_changed_paths {
            return None;
        }
        let (layer, lex) = self.layer_for(pos);
        layer.bloom_filter_at(lex)
    }
}
