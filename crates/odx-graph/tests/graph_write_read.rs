//! End-to-end write/read coverage for the single-file commit graph.

mod common;

use common::{oid, MockDiffs, MockOdb};
use odx_bloom::{filter_contains, BloomKey, BloomSettings, BloomStatus};
use odx_graph::{
    single_graph_path, verify_graph, write_commit_graph, CommitGraph, GraphConfig, GraphError,
    Incompatibility, WriteFlags, WriteOptions,
};
use odx_hash::HashAlgorithm;

const ALGO: HashAlgorithm = HashAlgorithm::Sha1;

fn write_and_open(
    dir: &std::path::Path,
    odb: &MockOdb,
    seeds: &[odx_hash::ObjectId],
    config: &GraphConfig,
    opts: &WriteOptions,
) -> CommitGraph {
    write_commit_graph(dir, ALGO, seeds, odb, None, config, opts).unwrap();
    CommitGraph::open(dir, ALGO, config).unwrap().unwrap()
}

#[test]
fn empty_closure_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let odb = MockOdb::default();
    let stats = write_commit_graph(
        dir.path(),
        ALGO,
        &[],
        &odb,
        None,
        &GraphConfig::default(),
        &WriteOptions::default(),
    )
    .unwrap();
    assert_eq!(stats.commits_written, 0);
    assert!(!single_graph_path(dir.path()).exists());
    assert!(CommitGraph::open(dir.path(), ALGO, &GraphConfig::default())
        .unwrap()
        .is_none());
}

#[test]
fn incompatible_repository_refused() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    odb.add_commit(oid(1), vec![], 100);
    odb.incompat = Some(Incompatibility::ReplaceRefs);

    let err = write_commit_graph(
        dir.path(),
        ALGO,
        &[oid(1)],
        &odb,
        None,
        &GraphConfig::default(),
        &WriteOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        GraphError::Incompatible(Incompatibility::ReplaceRefs)
    ));
    assert!(!single_graph_path(dir.path()).exists());
}

#[test]
fn linear_history_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 3, 100, 100);
    let config = GraphConfig::default();

    let graph = write_and_open(
        dir.path(),
        &odb,
        &[*tips.last().unwrap()],
        &config,
        &WriteOptions::default(),
    );

    assert_eq!(graph.num_commits(), 3);
    assert_eq!(graph.num_layers(), 1);
    assert!(graph.has_generation_v2());

    // Corrected commit dates for dates {100, 200, 300}.
    for (id, want_gen, want_date) in [
        (oid(1), 101u64, 100i64),
        (oid(2), 201, 200),
        (oid(3), 301, 300),
    ] {
        let pos = graph.lookup(&id).unwrap();
        assert_eq!(graph.oid_at(pos), id);
        assert_eq!(graph.generation_at(pos).unwrap(), want_gen);
        assert_eq!(graph.commit_time_at(pos), want_date);
    }

    // Parent edges resolve to the prior commit.
    let pos3 = graph.lookup(&oid(3)).unwrap();
    let parents = graph.parents_at(pos3).unwrap();
    assert_eq!(parents.len(), 1);
    assert_eq!(graph.oid_at(parents[0]), oid(2));
    let pos1 = graph.lookup(&oid(1)).unwrap();
    assert!(graph.parents_at(pos1).unwrap().is_empty());

    // Topological levels are stored alongside.
    assert_eq!(graph.topo_level_at(pos1), 1);
    assert_eq!(graph.topo_level_at(pos3), 3);
}

#[test]
fn generation_version_one_skips_corrected_dates() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 3, 100, 100);
    let config = GraphConfig {
        generation_version: 1,
        ..Default::default()
    };

    let graph = write_and_open(
        dir.path(),
        &odb,
        &[*tips.last().unwrap()],
        &config,
        &WriteOptions::default(),
    );
    assert!(!graph.has_generation_v2());
    let pos = graph.lookup(&oid(3)).unwrap();
    assert_eq!(graph.generation_at(pos).unwrap(), 3); // topo level
}

#[test]
fn corrected_date_offset_overflow() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let big_date = 1i64 << 33;
    odb.add_commit(oid(1), vec![], big_date);
    odb.add_commit(oid(2), vec![oid(1)], 1);
    let config = GraphConfig::default();

    let graph = write_and_open(dir.path(), &odb, &[oid(2)], &config, &WriteOptions::default());

    let parent = graph.lookup(&oid(1)).unwrap();
    let child = graph.lookup(&oid(2)).unwrap();
    // Parent: 1 + max(2^33, 1) = 2^33 + 1; offset 1 stored inline.
    assert_eq!(graph.generation_at(parent).unwrap(), (1u64 << 33) + 1);
    // Child: 1 + max(1, 2^33 + 2) = 2^33 + 3; its offset 2^33 + 2 exceeds
    // the inline maximum and round-trips through the 64-bit overflow table.
    assert_eq!(graph.generation_at(child).unwrap(), (1u64 << 33) + 3);
    assert_eq!(graph.commit_time_at(parent), big_date);
    assert_eq!(graph.commit_time_at(child), 1);
}

#[test]
fn octopus_merge_parents() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    odb.add_commit(oid(1), vec![], 10);
    odb.add_commit(oid(2), vec![], 20);
    odb.add_commit(oid(3), vec![], 30);
    odb.add_commit(oid(4), vec![], 40);
    odb.add_commit(oid(5), vec![oid(1), oid(2), oid(3), oid(4)], 50);
    let config = GraphConfig::default();

    let graph = write_and_open(dir.path(), &odb, &[oid(5)], &config, &WriteOptions::default());

    let pos = graph.lookup(&oid(5)).unwrap();
    let parents: Vec<_> = graph
        .parents_at(pos)
        .unwrap()
        .into_iter()
        .map(|p| graph.oid_at(p))
        .collect();
    assert_eq!(parents, vec![oid(1), oid(2), oid(3), oid(4)]);
    // A merge is above all of its parents.
    assert_eq!(graph.generation_at(pos).unwrap(), 51);
}

#[test]
fn bloom_filters_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    odb.add_commit(oid(1), vec![], 100);
    let mut diffs = MockDiffs::default();
    diffs.set(oid(1), &["a/b.txt"]);
    let config = GraphConfig::default();
    let opts = WriteOptions {
        flags: WriteFlags::BLOOM_FILTERS,
        ..Default::default()
    };

    let stats = write_commit_graph(
        dir.path(),
        ALGO,
        &[oid(1)],
        &odb,
        Some(&diffs),
        &config,
        &opts,
    )
    .unwrap();
    assert_eq!(stats.filters_computed, 1);

    let graph = CommitGraph::open(dir.path(), ALGO, &config).unwrap().unwrap();
    let settings = *graph.bloom_settings().expect("filters were written");
    assert_eq!(settings.hash_version, 1);
    assert_eq!(settings.num_hashes, 7);
    assert_eq!(settings.bits_per_entry, 10);

    let pos = graph.lookup(&oid(1)).unwrap();
    let filter = graph.bloom_filter_at(pos).expect("filter present");
    assert!(!filter.is_empty());

    let probe = |path: &str| -> BloomStatus {
        filter_contains(filter, &BloomKey::new(path.as_bytes(), &settings))
    };
    // The changed file and its leading directory were inserted.
    assert_eq!(probe("a"), BloomStatus::Yes);
    assert_eq!(probe("a/b.txt"), BloomStatus::Yes);
    // A path chosen to miss all seven probe positions.
    assert_eq!(probe("unlikely-path-xyzzy"), BloomStatus::No);
}

#[test]
fn oversized_and_empty_diffs_store_unknown_sentinels() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    odb.add_commit(oid(1), vec![], 100);
    odb.add_commit(oid(2), vec![oid(1)], 200);
    let mut diffs = MockDiffs::default();
    let many: Vec<String> = (0..600).map(|i| format!("f{i}")).collect();
    let many_refs: Vec<&str> = many.iter().map(|s| s.as_str()).collect();
    diffs.set(oid(1), &many_refs);
    diffs.set(oid(2), &[]);
    let config = GraphConfig::default();
    let opts = WriteOptions {
        flags: WriteFlags::BLOOM_FILTERS,
        ..Default::default()
    };

    let stats = write_commit_graph(
        dir.path(),
        ALGO,
        &[oid(2)],
        &odb,
        Some(&diffs),
        &config,
        &opts,
    )
    .unwrap();
    assert_eq!(stats.filters_truncated_large, 1);
    assert_eq!(stats.filters_truncated_empty, 1);

    let graph = CommitGraph::open(dir.path(), ALGO, &config).unwrap().unwrap();
    let settings = BloomSettings::default();
    for id in [oid(1), oid(2)] {
        let pos = graph.lookup(&id).unwrap();
        let filter = graph.bloom_filter_at(pos).unwrap();
        assert!(filter.is_empty());
        assert_eq!(
            filter_contains(filter, &BloomKey::new(b"anything", &settings)),
            BloomStatus::Unknown
        );
    }
}

#[test]
fn max_new_filters_caps_computation() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 5, 100, 10);
    let mut diffs = MockDiffs::default();
    for i in 1..=5 {
        diffs.set(oid(i), &["file"]);
    }
    let config = GraphConfig::default();
    let opts = WriteOptions {
        flags: WriteFlags::BLOOM_FILTERS,
        max_new_filters: 2,
        ..Default::default()
    };

    let stats = write_commit_graph(
        dir.path(),
        ALGO,
        &[*tips.last().unwrap()],
        &odb,
        Some(&diffs),
        &config,
        &opts,
    )
    .unwrap();
    assert_eq!(stats.filters_computed, 2);

    // Exactly two commits carry usable filters; the rest are sentinels.
    let graph = CommitGraph::open(dir.path(), ALGO, &config).unwrap().unwrap();
    let usable = (0..graph.num_commits())
        .filter(|&p| graph.bloom_filter_at(p).is_some_and(|f| !f.is_empty()))
        .count();
    assert_eq!(usable, 2);
}

#[test]
fn rewrite_is_byte_identical() {
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 10, 1000, 60);
    odb.add_commit(oid(100), vec![oid(5), oid(10)], 2000);
    let config = GraphConfig::default();
    let seeds = [oid(100), *tips.last().unwrap()];

    let dir_a = tempfile::tempdir().unwrap();
    let dir_b = tempfile::tempdir().unwrap();
    for dir in [&dir_a, &dir_b] {
        write_commit_graph(
            dir.path(),
            ALGO,
            &seeds,
            &odb,
            None,
            &config,
            &WriteOptions::default(),
        )
        .unwrap();
    }
    let a = std::fs::read(single_graph_path(dir_a.path())).unwrap();
    let b = std::fs::read(single_graph_path(dir_b.path())).unwrap();
    assert_eq!(a, b);
}

#[test]
fn lookup_commit_requires_odb_presence() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    odb.add_commit(oid(1), vec![], 100);
    let config = GraphConfig::default();

    let graph = write_and_open(dir.path(), &odb, &[oid(1)], &config, &WriteOptions::default());
    assert!(graph.lookup_commit(&oid(1), &odb).is_some());

    // Prune the commit from the object database: the graph still knows it,
    // but lookup_commit must not resurrect it.
    let mut pruned = MockOdb::default();
    pruned.add_commit(oid(9), vec![], 1);
    assert!(graph.lookup(&oid(1)).is_some());
    assert!(graph.lookup_commit(&oid(1), &pruned).is_none());
}

#[test]
fn verify_clean_graph() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 8, 100, 50);
    odb.add_commit(oid(50), vec![oid(3), oid(8)], 1000);
    let config = GraphConfig::default();

    let graph = write_and_open(
        dir.path(),
        &odb,
        &[oid(50), *tips.last().unwrap()],
        &config,
        &WriteOptions::default(),
    );
    let report = verify_graph(&graph, Some(&odb));
    assert!(report.is_ok(), "unexpected issues: {:?}", report.messages);
}

#[test]
fn verify_detects_corruption() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    let tips = odb.add_linear(1, 4, 100, 50);
    let config = GraphConfig::default();
    write_commit_graph(
        dir.path(),
        ALGO,
        &[*tips.last().unwrap()],
        &odb,
        None,
        &config,
        &WriteOptions::default(),
    )
    .unwrap();

    // Flip a byte in the middle of the commit data.
    let path = single_graph_path(dir.path());
    let mut bytes = std::fs::read(&path).unwrap();
    let mid = bytes.len() / 2;
    bytes[mid] ^= 0xff;
    std::fs::write(&path, &bytes).unwrap();

    let graph = CommitGraph::open(dir.path(), ALGO, &config).unwrap();
    // The reader may reject the file outright (fanout/size checks) or
    // produce a graph whose verification reports the damage.
    if let Some(graph) = graph {
        let report = verify_graph(&graph, None);
        assert!(!report.is_ok());
    }
}

#[test]
fn malformed_file_degrades_to_none() {
    let dir = tempfile::tempdir().unwrap();
    let path = single_graph_path(dir.path());
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(&path, b"this is not a commit graph").unwrap();

    let config = GraphConfig::default();
    assert!(CommitGraph::open(dir.path(), ALGO, &config).unwrap().is_none());

    let strict = GraphConfig {
        die_on_parse: true,
        ..Default::default()
    };
    assert!(CommitGraph::open(dir.path(), ALGO, &strict).is_err());
}

#[test]
fn fanout_matches_first_byte_counts() {
    let dir = tempfile::tempdir().unwrap();
    let mut odb = MockOdb::default();
    // OIDs spread over several fanout buckets (first byte = n >> 8).
    let ids: Vec<_> = [0x0001u32, 0x0102, 0x0103, 0x7f01, 0xff02]
        .iter()
        .map(|&n| {
            let id = oid(n);
            odb.add_commit(id, vec![], n as i64);
            id
        })
        .collect();
    let config = GraphConfig::default();

    let graph = write_and_open(dir.path(), &odb, &ids, &config, &WriteOptions::default());
    let layer = &graph.layers()[0];
    for id in &ids {
        let pos = graph.lookup(id).unwrap();
        assert_eq!(graph.oid_at(pos), *id);
        // Fanout at the first byte counts every OID at or below it.
        let below = ids.iter().filter(|o| o.first_byte() <= id.first_byte()).count();
        assert_eq!(layer.fanout_entry(id.first_byte()), below as u32);
    }
    assert_eq!(layer.fanout_entry(0xff), 5);
}
