//! Structural verification of a multi-pack-index.
//!
//! Like the graph verifier, this collects every finding instead of stopping
//! at the first, so maintenance tooling can report the full damage.

use odx_hash::Hasher;

use crate::{rev_index, MultiPackIndex};

bitflags::bitflags! {
    /// Classes of problems a MIDX verification can find.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MidxVerifyIssues: u32 {
        /// Trailer hash does not match the file contents.
        const BAD_CHECKSUM = 1 << 0;
        /// OID table out of lexicographic order.
        const BAD_OID_ORDER = 1 << 1;
        /// Fanout entries non-monotone or disagreeing with the OID count.
        const BAD_FANOUT = 1 << 2;
        /// An object names a pack id past the pack list.
        const BAD_PACK_ID = 1 << 3;
        /// The reverse index is not a permutation of the objects.
        const BAD_REV_INDEX = 1 << 4;
    }
}

/// Everything a MIDX verification run found.
#[derive(Debug, Default)]
pub struct MidxVerifyReport {
    pub issues: MidxVerifyIssues,
    pub messages: Vec<String>,
}

impl MidxVerifyReport {
    pub fn is_ok(&self) -> bool {
        self.issues.is_empty()
    }

    fn record(&mut self, issue: MidxVerifyIssues, message: String) {
        self.issues |= issue;
        self.messages.push(message);
    }
}

/// Verify a mapped multi-pack-index. `object_dir` locates the optional
/// `.rev` sidecar.
pub fn verify_midx(midx: &MultiPackIndex, object_dir: &std::path::Path) -> MidxVerifyReport {
    let mut report = MidxVerifyReport::default();
    let algo = midx.algorithm();
    let hash_len = algo.digest_len();

    let bytes = midx.bytes();
    let mut hasher = Hasher::new(algo);
    hasher.update(&bytes[..bytes.len() - hash_len]);
    match hasher.finalize() {
        Ok(actual) if &actual == midx.checksum() => {}
        Ok(actual) => report.record(
            MidxVerifyIssues::BAD_CHECKSUM,
            format!(
                "checksum {actual} does not match stored trailer {}",
                midx.checksum()
            ),
        ),
        Err(e) => report.record(MidxVerifyIssues::BAD_CHECKSUM, e.to_string()),
    }

    let mut prev_entry = 0u32;
    for byte in 0u16..=255 {
        let entry = midx.fanout_range(byte as u8).end as u32;
        if entry < prev_entry {
            report.record(
                MidxVerifyIssues::BAD_FANOUT,
                format!("fanout[{byte:#04x}] = {entry} decreases from {prev_entry}"),
            );
        }
        prev_entry = entry;
    }
    if prev_entry != midx.num_objects() {
        report.record(
            MidxVerifyIssues::BAD_FANOUT,
            format!(
                "fanout total {prev_entry} != object count {}",
                midx.num_objects()
            ),
        );
    }

    for pos in 1..midx.num_objects() {
        if midx.oid_at(pos - 1) >= midx.oid_at(pos) {
            report.record(
                MidxVerifyIssues::BAD_OID_ORDER,
                format!("OID at position {pos} is not greater than its predecessor"),
            );
        }
    }

    for pos in 0..midx.num_objects() {
        let (pack_id, _) = midx.object_entry(pos);
        if pack_id >= midx.num_packs() {
            report.record(
                MidxVerifyIssues::BAD_PACK_ID,
                format!(
                    "object {} names pack {pack_id} of {}",
                    midx.oid_at(pos),
                    midx.num_packs()
                ),
            );
        }
    }

    match rev_index::load(midx, object_dir) {
        Ok(_) => {}
        Err(e) => report.record(MidxVerifyIssues::BAD_REV_INDEX, e.to_string()),
    }

    report
}
