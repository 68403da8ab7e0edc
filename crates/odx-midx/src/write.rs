//! The multi-pack-index writer.

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use odx_chunk::{ChunkWriter, WriteFlags as ChunkFlags};
use odx_hash::hasher::HashingWriter;
use odx_hash::{FanoutTable, HashAlgorithm, ObjectId};
use odx_utils::progress::maybe_progress;
use odx_utils::LockFile;

use crate::bitmap::{self, BitmapRequest};
use crate::pack_index::PackIndex;
use crate::rev_index::{rev_file_path, write_rev_file};
use crate::{
    chunks, MidxError, MultiPackIndex, MIDX_CHUNK_ALIGNMENT, MIDX_LARGE_OFFSET_NEEDED,
    MIDX_SIGNATURE, MIDX_VERSION,
};

bitflags::bitflags! {
    /// Behavior switches for [`write_midx`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MidxWriteFlags: u32 {
        /// Render progress meters on stderr.
        const PROGRESS = 1 << 0;
        /// Emit the `RIDX` chunk and the `.rev` sidecar.
        const WRITE_REV_INDEX = 1 << 1;
        /// Emit the `BTMP` chunk and the `.bitmap` sidecar.
        const WRITE_BITMAP = 1 << 2;
    }
}

/// Options for one MIDX write.
#[derive(Debug, Clone, Default)]
pub struct MidxWriteOptions {
    pub flags: MidxWriteFlags,
    /// Pack winning duplicate-OID tie-breaks and anchoring pack order.
    pub preferred_pack: Option<String>,
    /// When set, only these packs are indexed.
    pub include_packs: Option<Vec<String>>,
    /// Packs excluded from the index.
    pub drop_packs: Vec<String>,
}

/// Counters and artifacts reported by a completed write.
#[derive(Debug, Default)]
pub struct MidxWriteStats {
    pub objects_written: usize,
    pub packs_indexed: usize,
    pub rev_file: Option<PathBuf>,
    pub bitmap_file: Option<PathBuf>,
    pub selected_commits: usize,
}

/// One de-duplicated object record headed for the index.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ObjectEntry {
    pub oid: ObjectId,
    pub pack_id: u32,
    pub offset: u64,
    preferred: bool,
    mtime: i64,
}

struct PackSource {
    /// Index file name as stored in PNAM.
    name: String,
    idx: PackIndex,
    mtime: i64,
    preferred: bool,
}

/// Strip the `.idx` / `.pack` suffix for name comparisons.
fn pack_stem(name: &str) -> &str {
    name.strip_suffix(".idx")
        .or_else(|| name.strip_suffix(".pack"))
        .unwrap_or(name)
}

/// Write (or rewrite) `<object-dir>/multi-pack-index` over the packs in
/// `<object-dir>/pack/`.
pub fn write_midx(
    object_dir: &Path,
    algo: HashAlgorithm,
    opts: &MidxWriteOptions,
    bitmap_input: Option<&BitmapRequest<'_>>,
) -> Result<MidxWriteStats, MidxError> {
    let mut flags = opts.flags;
    if env_set("GIT_TEST_MIDX_WRITE_REV") {
        flags |= MidxWriteFlags::WRITE_REV_INDEX;
    }

    let mut packs = collect_packs(object_dir, algo, opts)?;
    let preferred_idx = match &opts.preferred_pack {
        Some(name) => {
            let found = packs
                .iter()
                .position(|p| pack_stem(&p.name) == pack_stem(name));
            if found.is_none() {
                eprintln!("warning: unknown preferred pack: '{name}'");
            }
            found
        }
        None => None,
    };
    if let Some(i) = preferred_idx {
        packs[i].preferred = true;
    }

    // An existing MIDX feeds its entries back in, provided every pack it
    // names is still part of the new set.
    let existing = MultiPackIndex::open(object_dir, algo).ok();
    let existing = existing.filter(|m| {
        m.pack_names()
            .iter()
            .all(|name| packs.iter().any(|p| pack_stem(&p.name) == pack_stem(name)))
    });

    let entries = compute_sorted_entries(&packs, existing.as_ref(), flags.contains(MidxWriteFlags::PROGRESS))?;

    let mut stats = MidxWriteStats {
        objects_written: entries.len(),
        packs_indexed: packs.len(),
        ..Default::default()
    };

    let pack_order = compute_pack_order(&entries);

    // Emit the file.
    let target = object_dir.join("multi-pack-index");
    let checksum = {
        let mut lock = LockFile::acquire(&target)?;
        let oid = {
            let mut f = HashingWriter::new(&mut lock, algo);
            write_chunks(&mut f, algo, &packs, &entries, &pack_order, flags)?;
            f.finalize_trailer()?
        };
        lock.commit()?;
        oid
    };

    if flags.contains(MidxWriteFlags::WRITE_REV_INDEX) {
        let path = rev_file_path(object_dir, &checksum);
        write_rev_file(&path, &pack_order, &checksum, algo)?;
        stats.rev_file = Some(path);
    }

    if flags.contains(MidxWriteFlags::WRITE_BITMAP) {
        if let Some(request) = bitmap_input {
            let object_pos: HashMap<ObjectId, u32> = entries
                .iter()
                .enumerate()
                .map(|(i, e)| (e.oid, i as u32))
                .collect();
            let outcome = bitmap::write_bitmap(
                object_dir,
                &checksum,
                &object_pos,
                request,
                flags.contains(MidxWriteFlags::PROGRESS),
            )?;
            stats.selected_commits = outcome.selected_commits;
            stats.bitmap_file = Some(outcome.path);
        }
    }

    Ok(stats)
}

/// Enumerate `<object-dir>/pack/*.idx`, honoring include/drop sets, sorted
/// by name so pack ids are stable.
fn collect_packs(
    object_dir: &Path,
    algo: HashAlgorithm,
    opts: &MidxWriteOptions,
) -> Result<Vec<PackSource>, MidxError> {
    let pack_dir = object_dir.join("pack");
    let mut names: Vec<String> = Vec::new();
    match std::fs::read_dir(&pack_dir) {
        Ok(entries) => {
            for entry in entries {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                if !name.ends_with(".idx") {
                    continue;
                }
                if let Some(include) = &opts.include_packs {
                    if !include.iter().any(|i| pack_stem(i) == pack_stem(&name)) {
                        continue;
                    }
                }
                if opts.drop_packs.iter().any(|d| pack_stem(d) == pack_stem(&name)) {
                    continue;
                }
                names.push(name);
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    names.sort();

    let mut packs = Vec::with_capacity(names.len());
    for name in names {
        let idx_path = pack_dir.join(&name);
        let idx = PackIndex::open(&idx_path, algo)?;
        // Tie-breaks prefer newer packs; mtime comes from the pack data
        // file when it exists, otherwise from the index itself.
        let pack_path = pack_dir.join(format!("{}.pack", pack_stem(&name)));
        let meta = std::fs::metadata(&pack_path).or_else(|_| std::fs::metadata(&idx_path))?;
        let mtime = meta
            .modified()?
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        packs.push(PackSource {
            name,
            idx,
            mtime,
            preferred: false,
        });
    }
    Ok(packs)
}

/// Phase A: merge every pack's records per fanout slice and keep one entry
/// per distinct OID.
///
/// Duplicates resolve by `(preferred DESC, mtime DESC, pack_id ASC)`: the
/// preferred pack wins, then the newest pack, then the lowest pack id.
fn compute_sorted_entries(
    packs: &[PackSource],
    existing: Option<&MultiPackIndex>,
    show_progress: bool,
) -> Result<Vec<ObjectEntry>, MidxError> {
    // Packs already covered by the existing MIDX are read from it instead
    // of re-walking their index files.
    let reused_ids: HashMap<usize, u32> = match existing {
        Some(m) => m
            .pack_names()
            .iter()
            .enumerate()
            .filter_map(|(old_id, name)| {
                packs
                    .iter()
                    .position(|p| pack_stem(&p.name) == pack_stem(name))
                    .map(|new_id| (old_id, new_id as u32))
            })
            .collect(),
        None => HashMap::new(),
    };
    let reused_new_ids: Vec<u32> = reused_ids.values().copied().collect();

    let mut progress = maybe_progress(show_progress, "Collecting objects", None);
    let mut entries: Vec<ObjectEntry> = Vec::new();
    let mut slice: Vec<ObjectEntry> = Vec::new();

    for byte in 0u16..=255 {
        let byte = byte as u8;
        slice.clear();

        if let Some(m) = existing {
            for pos in m.fanout_range(byte) {
                let (old_pack, offset) = m.object_entry(pos);
                let Some(&new_pack) = reused_ids.get(&(old_pack as usize)) else {
                    continue;
                };
                let pack = &packs[new_pack as usize];
                slice.push(ObjectEntry {
                    oid: m.oid_at(pos),
                    pack_id: new_pack,
                    offset,
                    preferred: pack.preferred,
                    mtime: pack.mtime,
                });
            }
        }
        for (pack_id, pack) in packs.iter().enumerate() {
            if reused_new_ids.contains(&(pack_id as u32)) {
                continue;
            }
            for i in pack.idx.fanout_range(byte) {
                slice.push(ObjectEntry {
                    oid: pack.idx.oid_at(i),
                    pack_id: pack_id as u32,
                    offset: pack.idx.offset_at(i)?,
                    preferred: pack.preferred,
                    mtime: pack.mtime,
                });
            }
        }

        slice.sort_by(|a, b| {
            a.oid
                .cmp(&b.oid)
                .then(b.preferred.cmp(&a.preferred))
                .then(b.mtime.cmp(&a.mtime))
                .then(a.pack_id.cmp(&b.pack_id))
        });
        slice.dedup_by_key(|e| e.oid);
        if let Some(p) = progress.as_mut() {
            p.update(slice.len() as u64);
        }
        entries.extend_from_slice(&slice);
    }
    if let Some(p) = progress.take() {
        p.finish();
    }
    Ok(entries)
}

/// Phase C: pack order — preferred-pack objects first by offset, then the
/// remaining packs by id, each by offset. Returns lexicographic positions
/// in pack-order rank order.
pub(crate) fn compute_pack_order(entries: &[ObjectEntry]) -> Vec<u32> {
    let mut order: Vec<u32> = (0..entries.len() as u32).collect();
    order.sort_by(|&a, &b| {
        let ea = &entries[a as usize];
        let eb = &entries[b as usize];
        eb.preferred
            .cmp(&ea.preferred)
            .then(ea.pack_id.cmp(&eb.pack_id))
            .then(ea.offset.cmp(&eb.offset))
    });
    order
}

/// Per-pack pack-order coverage for the BTMP chunk.
fn bitmapped_pack_ranges(entries: &[ObjectEntry], pack_order: &[u32], num_packs: usize) -> Vec<(u32, u32)> {
    let mut ranges = vec![(u32::MAX, 0u32); num_packs];
    for (rank, &lex) in pack_order.iter().enumerate() {
        let pack = entries[lex as usize].pack_id as usize;
        let (pos, count) = &mut ranges[pack];
        *pos = (*pos).min(rank as u32);
        *count += 1;
    }
    ranges
        .into_iter()
        .map(|(pos, count)| if count == 0 { (0, 0) } else { (pos, count) })
        .collect()
}

/// Phase B: emit the header and chunks in canonical order.
fn write_chunks<W: Write>(
    f: &mut HashingWriter<W>,
    algo: HashAlgorithm,
    packs: &[PackSource],
    entries: &[ObjectEntry],
    pack_order: &[u32],
    flags: MidxWriteFlags,
) -> Result<(), MidxError> {
    let hash_len = algo.digest_len();
    let n = entries.len();

    let mut pnam_len = 0usize;
    for pack in packs {
        pnam_len += pack.name.len() + 1;
    }
    let pnam_padding = (MIDX_CHUNK_ALIGNMENT - pnam_len % MIDX_CHUNK_ALIGNMENT) % MIDX_CHUNK_ALIGNMENT;
    pnam_len += pnam_padding;

    let large_offsets: Vec<u64> = entries
        .iter()
        .filter(|e| e.offset > 0x7fff_ffff)
        .map(|e| e.offset)
        .collect();

    let btmp_ranges;
    let mut cw = ChunkWriter::new();
    cw.add_chunk(chunks::PACK_NAMES, pnam_len as u64, move |w| {
        for pack in packs {
            w.write_all(pack.name.as_bytes())?;
            w.write_all(&[0])?;
        }
        w.write_all(&vec![0u8; pnam_padding])?;
        Ok(())
    });
    cw.add_chunk(chunks::OID_FANOUT, 256 * 4, move |w| {
        let fanout = FanoutTable::build_from(entries.iter().map(|e| e.oid.first_byte()));
        w.write_all(&fanout.to_bytes())
    });
    cw.add_chunk(chunks::OID_LOOKUP, (n * hash_len) as u64, move |w| {
        for entry in entries {
            w.write_all(entry.oid.as_bytes())?;
        }
        Ok(())
    });
    cw.add_chunk(chunks::OBJECT_OFFSETS, (n * 8) as u64, move |w| {
        let mut nr_large = 0u32;
        for entry in entries {
            w.write_all(&entry.pack_id.to_be_bytes())?;
            if entry.offset > 0x7fff_ffff {
                w.write_all(&(MIDX_LARGE_OFFSET_NEEDED | nr_large).to_be_bytes())?;
                nr_large += 1;
            } else {
                w.write_all(&(entry.offset as u32).to_be_bytes())?;
            }
        }
        Ok(())
    });
    if !large_offsets.is_empty() {
        cw.add_chunk(
            chunks::LARGE_OFFSETS,
            (large_offsets.len() * 8) as u64,
            {
                let large_offsets = &large_offsets;
                move |w| {
                    for offset in large_offsets {
                        w.write_all(&offset.to_be_bytes())?;
                    }
                    Ok(())
                }
            },
        );
    }
    if flags.contains(MidxWriteFlags::WRITE_REV_INDEX) {
        cw.add_chunk(chunks::REVINDEX, (n * 4) as u64, move |w| {
            for &lex in pack_order {
                w.write_all(&lex.to_be_bytes())?;
            }
            Ok(())
        });
    }
    if flags.contains(MidxWriteFlags::WRITE_BITMAP) {
        btmp_ranges = bitmapped_pack_ranges(entries, pack_order, packs.len());
        cw.add_chunk(chunks::BITMAPPED_PACKS, (packs.len() * 8) as u64, {
            let btmp_ranges = &btmp_ranges;
            move |w| {
                for &(pos, count) in btmp_ranges {
                    w.write_all(&pos.to_be_bytes())?;
                    w.write_all(&count.to_be_bytes())?;
                }
                Ok(())
            }
        });
    }

    f.write_all(&MIDX_SIGNATURE.to_be_bytes())?;
    f.write_all(&[MIDX_VERSION, algo.oid_version(), cw.num_chunks() as u8, 0])?;
    f.write_all(&(packs.len() as u32).to_be_bytes())?;
    cw.write(f, ChunkFlags::empty())?;
    Ok(())
}

fn env_set(name: &str) -> bool {
    std::env::var(name).map(|v| !v.is_empty() && v != "0").unwrap_or(false)
}
