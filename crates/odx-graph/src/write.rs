//! Commit-graph writer: closure discovery, generation numbers, Bloom
//! filters, split-chain layering, and atomic emission.

use std::collections::{HashMap, HashSet};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use odx_bloom::{compute_filter, BloomSettings, FilterOutcome, Truncation};
use odx_chunk::{ChunkWriter, WriteFlags as ChunkFlags};
use odx_hash::hasher::HashingWriter;
use odx_hash::{FanoutTable, HashAlgorithm, ObjectId};
use odx_utils::progress::maybe_progress;
use odx_utils::LockFile;

use crate::chain::{
    chain_path, expire_graph_files, graph_dir, layer_file_path, single_graph_path,
    split_merge_decision,
};
use crate::{
    chunks, commit_data_width, ChangedPathSource, CommitGraph, CommitSource, EnvOverrides,
    GraphConfig, GraphError, GraphFile, BLOOM_DATA_HEADER_SIZE, GENERATION_NUMBER_V1_MAX,
    GENERATION_V2_OFFSET_MAX, GENERATION_V2_OFFSET_OVERFLOW, GRAPH_EXTRA_EDGES_NEEDED,
    GRAPH_LAST_EDGE, GRAPH_PARENT_NONE, GRAPH_SIGNATURE, GRAPH_VERSION,
};

bitflags::bitflags! {
    /// Behavior switches for [`write_commit_graph`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WriteFlags: u32 {
        /// Render progress meters on stderr.
        const PROGRESS = 1 << 0;
        /// Write a new chain layer instead of one flat file.
        const SPLIT = 1 << 1;
        /// Keep every commit of the existing graph in the rewrite.
        const APPEND = 1 << 2;
        /// Compute and store changed-path Bloom filters.
        const BLOOM_FILTERS = 1 << 3;
        /// Suppress Bloom filters even if otherwise requested.
        const NO_BLOOM_FILTERS = 1 << 4;
    }
}

/// How a split write treats the existing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SplitStrategy {
    /// Apply the size heuristic.
    #[default]
    Unspecified,
    /// Never merge layers down.
    MergeProhibited,
    /// Discard the whole chain and write one flat layer.
    Replace,
}

/// Options for one graph write.
#[derive(Debug, Clone)]
pub struct WriteOptions {
    pub flags: WriteFlags,
    pub split: SplitStrategy,
    /// A kept layer must hold more than `size_multiple` times the incoming
    /// commits, or it is merged down.
    pub size_multiple: u32,
    /// Merge until the chain's top layer holds at most this many commits;
    /// 0 means unlimited.
    pub max_commits: u32,
    /// Unreferenced layer files older than this are unlinked; `None` means
    /// "older than now".
    pub expire_time: Option<SystemTime>,
    /// Cap on newly computed Bloom filters per write; −1 means unlimited.
    pub max_new_filters: i64,
    /// Filter shape override; defaults to settings discovered in the
    /// existing graph, then to the stock settings.
    pub bloom_settings: Option<BloomSettings>,
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self {
            flags: WriteFlags::empty(),
            split: SplitStrategy::Unspecified,
            size_multiple: 2,
            max_commits: 0,
            expire_time: None,
            max_new_filters: -1,
            bloom_settings: None,
        }
    }
}

/// Counters reported by a completed write.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct WriteStats {
    pub commits_written: usize,
    pub layers_after: usize,
    pub filters_computed: usize,
    pub filters_reused: usize,
    pub filters_truncated_large: usize,
    pub filters_truncated_empty: usize,
}

/// Everything known about one commit headed for the new layer.
struct CommitMeta {
    oid: ObjectId,
    tree: ObjectId,
    parents: Vec<ObjectId>,
    commit_time: i64,
    topo_level: u32,
    generation: u64,
    /// Serialized filter bytes; empty means the unknown sentinel.
    filter: Option<Vec<u8>>,
}

/// The kept bottom of an existing chain, for parent and generation lookups.
struct BaseChain<'a> {
    layers: &'a [GraphFile],
    starts: Vec<u32>,
    total: u32,
}

impl<'a> BaseChain<'a> {
    fn new(layers: &'a [GraphFile]) -> Self {
        let mut starts = Vec::with_capacity(layers.len());
        let mut total = 0u32;
        for layer in layers {
            starts.push(total);
            total += layer.num_commits();
        }
        Self {
            layers,
            starts,
            total,
        }
    }

    fn lookup(&self, oid: &ObjectId) -> Option<u32> {
        for (idx, layer) in self.layers.iter().enumerate().rev() {
            if let Some(lex) = layer.lookup(oid) {
                return Some(self.starts[idx] + lex);
            }
        }
        None
    }

    fn layer_for(&self, pos: u32) -> (&GraphFile, u32) {
        let idx = match self.starts.binary_search(&pos) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        (&self.layers[idx], pos - self.starts[idx])
    }

    fn topo_level(&self, pos: u32) -> u32 {
        let (layer, lex) = self.layer_for(pos);
        layer.topo_level_at(lex)
    }

    fn generation_v2(&self, pos: u32) -> Result<u64, GraphError> {
        let (layer, lex) = self.layer_for(pos);
        let offset = layer.generation_offset_at(lex)?.ok_or_else(|| {
            GraphError::Malformed("base layer lost its generation data".into())
        })?;
        Ok(layer.commit_time_at(lex) as u64 + offset)
    }

    fn has_generation_data(&self) -> bool {
        self.layers.iter().all(|l| l.has_generation_data())
    }
}

/// Write (or extend) the commit graph for an object directory.
///
/// `seeds` are the tips to walk from (typically all refs); the reachable
/// closure of the seeds becomes the graph content. With an empty closure the
/// call succeeds without touching any file.
pub fn write_commit_graph(
    object_dir: &Path,
    algo: HashAlgorithm,
    seeds: &[ObjectId],
    source: &dyn CommitSource,
    diffs: Option<&dyn ChangedPathSource>,
    config: &GraphConfig,
    opts: &WriteOptions,
) -> Result<WriteStats, GraphError> {
    if let Some(why) = source.incompatibility() {
        return Err(GraphError::Incompatible(why));
    }

    let mut opts = opts.clone();
    EnvOverrides::from_env().apply_to_options(&mut opts);

    let split = opts.flags.contains(WriteFlags::SPLIT);
    let replace = split && opts.split == SplitStrategy::Replace;

    // The existing graph feeds filter reuse, APPEND, and the split base.
    let read_config = GraphConfig {
        die_on_parse: false,
        ..config.clone()
    };
    let existing = CommitGraph::open(object_dir, algo, &read_config)?;
    let existing_is_chain = existing
        .as_ref()
        .and_then(|g| g.layers().first())
        .map(|l| l.path() != single_graph_path(object_dir))
        .unwrap_or(false);

    // Commits already covered by a chain we are stacking on stay where they
    // are; everything else reachable from the seeds gets collected.
    let skip_covered = split && !replace && existing_is_chain;
    let mut stats = WriteStats::default();

    let mut discovered: Vec<ObjectId> = Vec::new();
    {
        let mut progress = maybe_progress(
            opts.flags.contains(WriteFlags::PROGRESS),
            "Expanding reachable commits",
            None,
        );
        let mut reachable: HashSet<ObjectId> = HashSet::new();
        let mut worklist: Vec<ObjectId> = seeds.to_vec();
        if opts.flags.contains(WriteFlags::APPEND) && !skip_covered {
            if let Some(g) = &existing {
                for pos in 0..g.num_commits() {
                    worklist.push(g.oid_at(pos));
                }
            }
        }
        while let Some(oid) = worklist.pop() {
            if !reachable.insert(oid) {
                continue;
            }
            if skip_covered {
                if let Some(g) = &existing {
                    if g.lookup(&oid).is_some() {
                        continue;
                    }
                }
            }
            if let Some(p) = progress.as_mut() {
                p.update(1);
            }
            let parents = commit_parents(&oid, existing.as_ref(), source)?;
            discovered.push(oid);
            worklist.extend(parents);
        }
        if let Some(p) = progress.take() {
            p.finish();
        }
    }

    if discovered.is_empty() {
        return Ok(stats);
    }

    // Decide the chain shape and pull commits of absorbed layers into the
    // write set.
    let (keep_layers, merged_oids) = if !split || replace {
        (0, Vec::new())
    } else if !existing_is_chain {
        (0, Vec::new())
    } else {
        let g = existing.as_ref().expect("chain form implies a graph");
        let counts: Vec<u32> = g.layers().iter().map(|l| l.num_commits()).collect();
        let keep = match opts.split {
            SplitStrategy::MergeProhibited => counts.len(),
            _ => split_merge_decision(
                &counts,
                discovered.len() as u32,
                opts.size_multiple,
                opts.max_commits,
            ),
        };
        let mut merged = Vec::new();
        let mut start = 0u32;
        for (idx, layer) in g.layers().iter().enumerate() {
            if idx >= keep {
                let layer_start = start;
                for lex in 0..layer.num_commits() {
                    merged.push(g.oid_at(layer_start + lex));
                }
            }
            start += layer.num_commits();
        }
        (keep, merged)
    };

    let base_layers: &[GraphFile] = match &existing {
        Some(g) if split && !replace && existing_is_chain => &g.layers()[..keep_layers],
        _ => &[],
    };
    let base = BaseChain::new(base_layers);

    // Assemble, sort, and de-duplicate the commit set for the new layer.
    let mut metas: Vec<CommitMeta> = Vec::with_capacity(discovered.len() + merged_oids.len());
    let mut seen: HashSet<ObjectId> = HashSet::new();
    for oid in discovered.into_iter().chain(merged_oids) {
        if !seen.insert(oid) {
            continue;
        }
        let record = commit_record(&oid, existing.as_ref(), source)?;
        metas.push(CommitMeta {
            oid,
            tree: record.0,
            parents: record.1,
            commit_time: record.2,
            topo_level: 0,
            generation: 0,
            filter: None,
        });
    }
    metas.sort_by(|a, b| a.oid.cmp(&b.oid));
    stats.commits_written = metas.len();

    let local_pos: HashMap<ObjectId, u32> = metas
        .iter()
        .enumerate()
        .map(|(i, m)| (m.oid, i as u32))
        .collect();

    compute_topo_levels(&mut metas, &local_pos, &base);

    let write_gda2 = config.generation_version >= 2 && base.has_generation_data();
    if write_gda2 {
        compute_corrected_dates(&mut metas, &local_pos, &base)?;
    }

    // Bloom filters.
    let write_bloom = opts.flags.contains(WriteFlags::BLOOM_FILTERS)
        && !opts.flags.contains(WriteFlags::NO_BLOOM_FILTERS)
        && diffs.is_some();
    let bloom_settings = opts
        .bloom_settings
        .or_else(|| existing.as_ref().and_then(|g| g.bloom_settings().copied()))
        .unwrap_or_default();
    if write_bloom {
        let diffs = diffs.expect("checked above");
        let max_new = if opts.max_new_filters >= 0 {
            opts.max_new_filters
        } else {
            config.max_new_filters
        };
        compute_bloom_filters(
            &mut metas,
            existing.as_ref(),
            &bloom_settings,
            diffs,
            max_new,
            opts.flags.contains(WriteFlags::PROGRESS),
            &mut stats,
        )?;
    }

    // Emit.
    let base_oids: Vec<ObjectId> = base.layers.iter().map(|l| *l.oid()).collect();
    if split {
        let dir = graph_dir(object_dir);
        std::fs::create_dir_all(&dir)?;
        let tmp_path = dir.join(format!("tmp_graph_{}", std::process::id()));
        let new_oid = {
            let file = std::fs::File::create(&tmp_path)?;
            let mut f = HashingWriter::new(std::io::BufWriter::new(file), algo);
            write_layer(&mut f, algo, &metas, &local_pos, &base, &base_oids, write_gda2, write_bloom, &bloom_settings)?;
            f.finalize_trailer()?
        };
        let layer_path = layer_file_path(object_dir, &new_oid);
        std::fs::rename(&tmp_path, &layer_path)?;

        // The chain file is the atomic commit point.
        let mut lock = LockFile::acquire(chain_path(object_dir))?;
        for oid in &base_oids {
            writeln!(lock, "{}", oid.to_hex())?;
        }
        writeln!(lock, "{}", new_oid.to_hex())?;
        lock.commit()?;

        let mut keep: HashSet<PathBuf> = base.layers.iter().map(|l| l.path().to_path_buf()).collect();
        keep.insert(layer_path);
        drop(existing);
        expire_graph_files(object_dir, &keep, opts.expire_time)?;
        stats.layers_after = keep_layers + 1;
    } else {
        let target = single_graph_path(object_dir);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut lock = LockFile::acquire(&target)?;
        {
            let mut f = HashingWriter::new(&mut lock, algo);
            write_layer(&mut f, algo, &metas, &local_pos, &base, &base_oids, write_gda2, write_bloom, &bloom_settings)?;
            f.finalize_trailer()?;
        }
        lock.commit()?;
        stats.layers_after = 1;
    }

    Ok(stats)
}

/// Parents of a commit, read from the existing graph when possible.
fn commit_parents(
    oid: &ObjectId,
    existing: Option<&CommitGraph>,
    source: &dyn CommitSource,
) -> Result<Vec<ObjectId>, GraphError> {
    if let Some(g) = existing {
        if let Some(pos) = g.lookup(oid) {
            let parents = g.parents_at(pos)?;
            return Ok(parents.into_iter().map(|p| g.oid_at(p)).collect());
        }
    }
    Ok(source.read_commit(oid)?.parents)
}

/// (tree, parents, commit_time), read from the existing graph when possible.
fn commit_record(
    oid: &ObjectId,
    existing: Option<&CommitGraph>,
    source: &dyn CommitSource,
) -> Result<(ObjectId, Vec<ObjectId>, i64), GraphError> {
    if let Some(g) = existing {
        if let Some(pos) = g.lookup(oid) {
            let parents = g.parents_at(pos)?;
            return Ok((
                g.tree_at(pos),
                parents.into_iter().map(|p| g.oid_at(p)).collect(),
                g.commit_time_at(pos),
            ));
        }
    }
    let record = source.read_commit(oid)?;
    Ok((record.tree, record.parents, record.commit_time))
}

/// Topological levels via an explicit stack; deep first-parent chains are
/// routine, so no recursion on the DAG.
fn compute_topo_levels(
    metas: &mut [CommitMeta],
    local_pos: &HashMap<ObjectId, u32>,
    base: &BaseChain<'_>,
) {
    let n = metas.len();
    let mut stack: Vec<usize> = Vec::new();
    for start in 0..n {
        if metas[start].topo_level != 0 {
            continue;
        }
        stack.push(start);
        while let Some(&cur) = stack.last() {
            let mut max_level = 0u32;
            let mut pending = None;
            for parent in &metas[cur].parents {
                match local_pos.get(parent) {
                    Some(&p) => {
                        let level = metas[p as usize].topo_level;
                        if level == 0 {
                            pending = Some(p as usize);
                            break;
                        }
                        max_level = max_level.max(level);
                    }
                    None => {
                        let pos = base.lookup(parent).unwrap_or_else(|| {
                            panic!("BUG: parent {parent} missing from closure")
                        });
                        max_level = max_level.max(base.topo_level(pos));
                    }
                }
            }
            match pending {
                Some(p) => stack.push(p),
                None => {
                    let max_level = max_level.min(GENERATION_NUMBER_V1_MAX as u32 - 1);
                    metas[cur].topo_level = max_level + 1;
                    stack.pop();
                }
            }
        }
    }
}

/// Corrected commit dates: `gen = 1 + max(date, max_parent_gen + 1)`.
fn compute_corrected_dates(
    metas: &mut [CommitMeta],
    local_pos: &HashMap<ObjectId, u32>,
    base: &BaseChain<'_>,
) -> Result<(), GraphError> {
    let n = metas.len();
    let mut stack: Vec<usize> = Vec::new();
    for start in 0..n {
        if metas[start].generation != 0 {
            continue;
        }
        stack.push(start);
        while let Some(&cur) = stack.last() {
            let mut max_gen = 0u64;
            let mut pending = None;
            for parent in &metas[cur].parents {
                match local_pos.get(parent) {
                    Some(&p) => {
                        let gen = metas[p as usize].generation;
                        if gen == 0 {
                            pending = Some(p as usize);
                            break;
                        }
                        max_gen = max_gen.max(gen);
                    }
                    None => {
                        let pos = base.lookup(parent).unwrap_or_else(|| {
                            panic!("BUG: parent {parent} missing from closure")
                        });
                        max_gen = max_gen.max(base.generation_v2(pos)?);
                    }
                }
            }
            match pending {
                Some(p) => stack.push(p),
                None => {
                    let date = metas[cur].commit_time.max(0) as u64;
                    metas[cur].generation = 1 + date.max(max_gen + 1);
                    stack.pop();
                }
            }
        }
    }
    Ok(())
}

/// Fill `meta.filter` for every commit: reuse from the prior graph when the
/// settings agree, compute fresh within the budget, and fall back to the
/// empty sentinel otherwise.
fn compute_bloom_filters(
    metas: &mut [CommitMeta],
    existing: Option<&CommitGraph>,
    settings: &BloomSettings,
    diffs: &dyn ChangedPathSource,
    max_new_filters: i64,
    show_progress: bool,
    stats: &mut WriteStats,
) -> Result<(), GraphError> {
    let reusable = existing.filter(|g| {
        g.bloom_settings().is_some_and(|s| {
            s.num_hashes == settings.num_hashes && s.bits_per_entry == settings.bits_per_entry
        })
    });

    let mut progress = maybe_progress(
        show_progress,
        "Computing commit changed paths",
        Some(metas.len() as u64),
    );
    for meta in metas.iter_mut() {
        if let Some(p) = progress.as_mut() {
            p.update(1);
        }
        if let Some(g) = reusable {
            if let Some(pos) = g.lookup(&meta.oid) {
                if let Some(bytes) = g.bloom_filter_at(pos) {
                    meta.filter = Some(bytes.to_vec());
                    stats.filters_reused += 1;
                    continue;
                }
            }
        }
        if max_new_filters >= 0 && stats.filters_computed as i64 >= max_new_filters {
            meta.filter = Some(Vec::new());
            continue;
        }
        let first_parent = meta.parents.first();
        let paths = diffs.changed_paths(&meta.oid, first_parent)?;
        match compute_filter(paths, settings) {
            FilterOutcome::Built(filter) => {
                meta.filter = Some(filter.as_bytes().to_vec());
                stats.filters_computed += 1;
            }
            FilterOutcome::Truncated(Truncation::TooLarge) => {
                meta.filter = Some(Vec::new());
                stats.filters_computed += 1;
                stats.filters_truncated_large += 1;
            }
            FilterOutcome::Truncated(Truncation::Empty) => {
                meta.filter = Some(Vec::new());
                stats.filters_computed += 1;
                stats.filters_truncated_empty += 1;
            }
        }
    }
    if let Some(p) = progress.take() {
        p.finish();
    }
    Ok(())
}

/// Encoded parent words plus the shared EDGE overflow list.
fn encode_parents(
    metas: &[CommitMeta],
    local_pos: &HashMap<ObjectId, u32>,
    base: &BaseChain<'_>,
) -> (Vec<(u32, u32)>, Vec<u32>) {
    let resolve = |oid: &ObjectId| -> u32 {
        match local_pos.get(oid) {
            Some(&p) => base.total + p,
            None => base
                .lookup(oid)
                .unwrap_or_else(|| panic!("BUG: parent {oid} missing from closure")),
        }
    };

    let mut words = Vec::with_capacity(metas.len());
    let mut extra: Vec<u32> = Vec::new();
    for meta in metas {
        let p1 = match meta.parents.first() {
            Some(p) => resolve(p),
            None => GRAPH_PARENT_NONE,
        };
        let p2 = match meta.parents.len() {
            0 | 1 => GRAPH_PARENT_NONE,
            2 => resolve(&meta.parents[1]),
            _ => {
                let offset = extra.len() as u32;
                for (i, p) in meta.parents.iter().enumerate().skip(1) {
                    let mut word = resolve(p);
                    if i == meta.parents.len() - 1 {
                        word |= GRAPH_LAST_EDGE;
                    }
                    extra.push(word);
                }
                GRAPH_EXTRA_EDGES_NEEDED | offset
            }
        };
        words.push((p1, p2));
    }
    (words, extra)
}

#[allow(clippy::too_many_arguments)]
fn write_layer<W: Write>(
    f: &mut HashingWriter<W>,
    algo: HashAlgorithm,
    metas: &[CommitMeta],
    local_pos: &HashMap<ObjectId, u32>,
    base: &BaseChain<'_>,
    base_oids: &[ObjectId],
    write_gda2: bool,
    write_bloom: bool,
    bloom_settings: &BloomSettings,
) -> Result<(), GraphError> {
    let hash_len = algo.digest_len();
    let n = metas.len();

    let (parent_words, extra_edges) = encode_parents(metas, local_pos, base);

    // Generation offsets, with spillover for anything past the inline range.
    let mut gda2_words: Vec<u32> = Vec::new();
    let mut gdo2_entries: Vec<u64> = Vec::new();
    if write_gda2 {
        for meta in metas {
            let date = meta.commit_time.max(0) as u64;
            let offset = meta.generation - date;
            if offset > GENERATION_V2_OFFSET_MAX {
                gda2_words.push(GENERATION_V2_OFFSET_OVERFLOW | gdo2_entries.len() as u32);
                gdo2_entries.push(offset);
            } else {
                gda2_words.push(offset as u32);
            }
        }
    }

    let mut bidx: Vec<u32> = Vec::new();
    let mut bloom_total = 0u64;
    if write_bloom {
        for meta in metas {
            let len = meta.filter.as_deref().map(|b| b.len()).unwrap_or(0);
            bloom_total += len as u64;
            bidx.push(bloom_total as u32);
        }
    }

    let mut cw = ChunkWriter::new();
    cw.add_chunk(chunks::OID_FANOUT, 256 * 4, |w| {
        let fanout = FanoutTable::build_from(metas.iter().map(|m| m.oid.first_byte()));
        w.write_all(&fanout.to_bytes())
    });
    cw.add_chunk(chunks::OID_LOOKUP, (n * hash_len) as u64, |w| {
        for meta in metas {
            w.write_all(meta.oid.as_bytes())?;
        }
        Ok(())
    });
    let cdat_width = commit_data_width(hash_len);
    cw.add_chunk(chunks::COMMIT_DATA, (n * cdat_width) as u64, {
        let parent_words = &parent_words;
        move |w| {
            for (meta, &(p1, p2)) in metas.iter().zip(parent_words) {
                w.write_all(meta.tree.as_bytes())?;
                w.write_all(&p1.to_be_bytes())?;
                w.write_all(&p2.to_be_bytes())?;
                let date = meta.commit_time.max(0) as u64;
                let gen_date = (meta.topo_level << 2) | ((date >> 32) & 0x3) as u32;
                w.write_all(&gen_date.to_be_bytes())?;
                w.write_all(&(date as u32).to_be_bytes())?;
            }
            Ok(())
        }
    });
    if write_gda2 {
        cw.add_chunk(chunks::GENERATION_DATA, (n * 4) as u64, {
            let gda2_words = &gda2_words;
            move |w| {
                for word in gda2_words {
                    w.write_all(&word.to_be_bytes())?;
                }
                Ok(())
            }
        });
        if !gdo2_entries.is_empty() {
            cw.add_chunk(
                chunks::GENERATION_DATA_OVERFLOW,
                (gdo2_entries.len() * 8) as u64,
                {
                    let gdo2_entries = &gdo2_entries;
                    move |w| {
                        for entry in gdo2_entries {
                            w.write_all(&entry.to_be_bytes())?;
                        }
                        Ok(())
                    }
                },
            );
        }
    }
    if !extra_edges.is_empty() {
        cw.add_chunk(chunks::EXTRA_EDGES, (extra_edges.len() * 4) as u64, {
            let extra_edges = &extra_edges;
            move |w| {
                for word in extra_edges {
                    w.write_all(&word.to_be_bytes())?;
                }
                Ok(())
            }
        });
    }
    if write_bloom {
        cw.add_chunk(chunks::BLOOM_INDEXES, (n * 4) as u64, {
            let bidx = &bidx;
            move |w| {
                for end in bidx {
                    w.write_all(&end.to_be_bytes())?;
                }
                Ok(())
            }
        });
        cw.add_chunk(
            chunks::BLOOM_DATA,
            (BLOOM_DATA_HEADER_SIZE as u64) + bloom_total,
            move |w| {
                w.write_all(&bloom_settings.hash_version.to_be_bytes())?;
                w.write_all(&bloom_settings.num_hashes.to_be_bytes())?;
                w.write_all(&bloom_settings.bits_per_entry.to_be_bytes())?;
                for meta in metas {
                    if let Some(bytes) = meta.filter.as_deref() {
                        w.write_all(bytes)?;
                    }
                }
                Ok(())
            },
        );
    }
    if !base_oids.is_empty() {
        cw.add_chunk(chunks::BASE_GRAPHS, (base_oids.len() * hash_len) as u64, {
            move |w| {
                for oid in base_oids {
                    w.write_all(oid.as_bytes())?;
                }
                Ok(())
            }
        });
    }

    // Header precedes the TOC.
    f.write_all(&GRAPH_SIGNATURE.to_be_bytes())?;
    f.write_all(&[GRAPH_VERSION, algo.oid_version(), cw.num_chunks() as u8, base_oids.len() as u8])?;
    cw.write(f, ChunkFlags::empty())?;
    Ok(())
}
