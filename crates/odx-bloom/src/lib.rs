//! Changed-path Bloom filters.
//!
//! Each commit in a graph may carry a Bloom filter over the set of paths it
//! changed relative to its first parent, extended with every leading
//! directory of those paths. History walks restricted to a path probe the
//! filter first and only fall back to tree diffing when the filter answers
//! `Maybe`-style (`Yes`) or cannot answer at all (`Unknown`).

pub mod murmur;

use std::collections::BTreeSet;

use bstr::{BString, ByteSlice};

pub use murmur::murmur3_seeded;

/// Seed of the first independent hash.
pub const BLOOM_SEED0: u32 = 0x293a_e76f;
/// Seed of the second independent hash.
pub const BLOOM_SEED1: u32 = 0x7e64_6e2c;
/// Bits per byte of filter data; bit `i` of a byte is `1 << (i & 7)`.
pub const BITS_PER_WORD: u32 = 8;

/// Filter shape parameters.
///
/// Stored in the `BDAT` chunk header so readers discover what a writer used;
/// only `hash_version == 1` filters are readable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BloomSettings {
    pub hash_version: u32,
    pub num_hashes: u32,
    pub bits_per_entry: u32,
    /// Diffs with more changed files than this get an empty (sentinel)
    /// filter instead.
    pub max_changed_paths: u32,
}

impl Default for BloomSettings {
    fn default() -> Self {
        Self {
            hash_version: 1,
            num_hashes: 7,
            bits_per_entry: 10,
            max_changed_paths: 512,
        }
    }
}

/// The derived hashes for one path.
///
/// Two independent murmur3 hashes are combined as `h_i = h0 + i*h1` to
/// produce `num_hashes` probe positions.
#[derive(Debug, Clone)]
pub struct BloomKey {
    hashes: Vec<u32>,
}

impl BloomKey {
    pub fn new(path: &[u8], settings: &BloomSettings) -> Self {
        let hash0 = murmur3_seeded(BLOOM_SEED0, path);
        let hash1 = murmur3_seeded(BLOOM_SEED1, path);
        let hashes = (0..settings.num_hashes)
            .map(|i| hash0.wrapping_add(i.wrapping_mul(hash1)))
            .collect();
        Self { hashes }
    }

    pub fn hashes(&self) -> &[u32] {
        &self.hashes
    }
}

/// Answer of a filter membership probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BloomStatus {
    /// All probe bits set — the path *may* have been changed.
    Yes,
    /// At least one probe bit clear — the path was definitely not changed.
    No,
    /// Zero-length filter: nothing is known, the caller must fall back.
    Unknown,
}

/// Probe a raw filter (for zero-copy slices of mapped `BDAT` data).
pub fn filter_contains(data: &[u8], key: &BloomKey) -> BloomStatus {
    let bit_count = data.len() as u64 * BITS_PER_WORD as u64;
    if bit_count == 0 {
        return BloomStatus::Unknown;
    }
    for &hash in key.hashes() {
        let pos = hash as u64 % bit_count;
        let byte = data[(pos / BITS_PER_WORD as u64) as usize];
        if byte & (1 << (pos & 7)) == 0 {
            return BloomStatus::No;
        }
    }
    BloomStatus::Yes
}

/// An owned Bloom filter under construction or loaded into memory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BloomFilter {
    data: Vec<u8>,
}

impl BloomFilter {
    /// The empty sentinel filter ("unknown; must fall back").
    pub const fn empty() -> Self {
        Self { data: Vec::new() }
    }

    /// Allocate a filter sized for `entries` distinct keys.
    ///
    /// The byte length is `max(1, ceil(entries * bits_per_entry / 8))`, so a
    /// non-empty entry set always yields a probe-able filter.
    pub fn with_entries(entries: usize, settings: &BloomSettings) -> Self {
        let bits = entries as u64 * settings.bits_per_entry as u64;
        let len = ((bits + u64::from(BITS_PER_WORD) - 1) / u64::from(BITS_PER_WORD)).max(1);
        Self {
            data: vec![0u8; len as usize],
        }
    }

    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data }
    }

    /// Set every probe bit of `key`.
    pub fn add_key(&mut self, key: &BloomKey) {
        let bit_count = self.data.len() as u64 * BITS_PER_WORD as u64;
        assert!(bit_count > 0, "cannot insert into the empty sentinel filter");
        for &hash in key.hashes() {
            let pos = hash as u64 % bit_count;
            self.data[(pos / BITS_PER_WORD as u64) as usize] |= 1 << (pos & 7);
        }
    }

    pub fn contains(&self, key: &BloomKey) -> BloomStatus {
        filter_contains(&self.data, key)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Why a commit's filter holds no data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Truncation {
    /// The diff had more changed files than `max_changed_paths`.
    TooLarge,
    /// The diff was empty.
    Empty,
}

/// Outcome of computing one commit's filter.
///
/// Both truncation cases serialize to a zero-length filter; the distinction
/// exists only for writer statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterOutcome {
    Built(BloomFilter),
    Truncated(Truncation),
}

impl FilterOutcome {
    /// The bytes to store in `BDAT` (empty for truncated filters).
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Built(f) => f.as_bytes(),
            Self::Truncated(_) => &[],
        }
    }
}

/// Expand a changed-file list into the full key set: each file plus every
/// leading directory, without trailing slashes, de-duplicated.
///
/// `dir/subdir/file` contributes `dir/subdir/file`, `dir/subdir`, and `dir`,
/// so path-limited walks on a directory benefit from the filter too. The
/// empty path (tree root) is not included.
pub fn expand_changed_paths<I>(paths: I) -> BTreeSet<BString>
where
    I: IntoIterator,
    I::Item: Into<BString>,
{
    let mut set = BTreeSet::new();
    for path in paths {
        let path: BString = path.into();
        let mut cur: &[u8] = &path;
        loop {
            if cur.is_empty() {
                break;
            }
            if !set.insert(BString::from(cur)) {
                // All prefixes of a known path are already present.
                break;
            }
            match cur.rfind_byte(b'/') {
                Some(pos) => cur = &cur[..pos],
                None => break,
            }
        }
    }
    set
}

/// Compute one commit's filter from its changed-file list.
///
/// `paths` is the raw diff output (files only, before directory expansion);
/// the `max_changed_paths` cap applies to it, matching what the diff oracle
/// can cheaply count.
pub fn compute_filter<I>(paths: I, settings: &BloomSettings) -> FilterOutcome
where
    I: IntoIterator,
    I::Item: Into<BString>,
{
    let paths: Vec<BString> = paths.into_iter().map(Into::into).collect();
    if paths.len() > settings.max_changed_paths as usize {
        return FilterOutcome::Truncated(Truncation::TooLarge);
    }
    if paths.is_empty() {
        return FilterOutcome::Truncated(Truncation::Empty);
    }
    let keys = expand_changed_paths(paths);
    let mut filter = BloomFilter::with_entries(keys.len(), settings);
    for path in &keys {
        filter.add_key(&BloomKey::new(path, settings));
    }
    FilterOutcome::Built(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_combines_two_hashes() {
        let settings = BloomSettings::default();
        let key = BloomKey::new(b"src/main.rs", &settings);
        assert_eq!(key.hashes().len(), 7);
        let h0 = murmur3_seeded(BLOOM_SEED0, b"src/main.rs");
        let h1 = murmur3_seeded(BLOOM_SEED1, b"src/main.rs");
        assert_eq!(key.hashes()[0], h0);
        assert_eq!(key.hashes()[1], h0.wrapping_add(h1));
        assert_eq!(key.hashes()[6], h0.wrapping_add(6u32.wrapping_mul(h1)));
    }

    #[test]
    fn inserted_keys_are_never_denied() {
        let settings = BloomSettings::default();
        let paths = ["a/b.txt", "a/c.txt", "Makefile", "docs/guide/ch1.md"];
        let keys = expand_changed_paths(paths.iter().map(|p| BString::from(*p)));
        let mut filter = BloomFilter::with_entries(keys.len(), &settings);
        for p in &keys {
            filter.add_key(&BloomKey::new(p, &settings));
        }
        for p in &keys {
            assert_eq!(
                filter.contains(&BloomKey::new(p, &settings)),
                BloomStatus::Yes,
                "false negative for {p}"
            );
        }
    }

    #[test]
    fn empty_filter_is_unknown() {
        let settings = BloomSettings::default();
        let key = BloomKey::new(b"anything", &settings);
        assert_eq!(BloomFilter::empty().contains(&key), BloomStatus::Unknown);
        assert_eq!(filter_contains(&[], &key), BloomStatus::Unknown);
    }

    #[test]
    fn all_zero_filter_denies() {
        let settings = BloomSettings::default();
        let filter = BloomFilter::with_entries(4, &settings);
        let key = BloomKey::new(b"missing", &settings);
        assert_eq!(filter.contains(&key), BloomStatus::No);
    }

    #[test]
    fn expansion_adds_leading_directories() {
        let set = expand_changed_paths([BString::from("dir/subdir/file")]);
        let want: Vec<&str> = vec!["dir", "dir/subdir", "dir/subdir/file"];
        let got: Vec<String> = set.iter().map(|p| p.to_string()).collect();
        assert_eq!(got, want);
    }

    #[test]
    fn expansion_deduplicates_shared_prefixes() {
        let set = expand_changed_paths([BString::from("d/a"), BString::from("d/b")]);
        assert_eq!(set.len(), 3); // d, d/a, d/b
    }

    #[test]
    fn oversized_diff_truncates() {
        let settings = BloomSettings {
            max_changed_paths: 2,
            ..Default::default()
        };
        let outcome = compute_filter(["a", "b", "c"], &settings);
        assert_eq!(outcome, FilterOutcome::Truncated(Truncation::TooLarge));
        assert!(outcome.as_bytes().is_empty());
    }

    #[test]
    fn empty_diff_truncates() {
        let outcome = compute_filter(Vec::<BString>::new(), &BloomSettings::default());
        assert_eq!(outcome, FilterOutcome::Truncated(Truncation::Empty));
        assert!(outcome.as_bytes().is_empty());
    }

    #[test]
    fn filter_size_follows_entry_count() {
        let settings = BloomSettings::default();
        // 2 entries * 10 bits = 20 bits → 3 bytes.
        assert_eq!(BloomFilter::with_entries(2, &settings).len(), 3);
        // Even zero entries allocate one byte.
        assert_eq!(BloomFilter::with_entries(0, &settings).len(), 1);
    }

    #[test]
    fn single_file_commit_filter() {
        let settings = BloomSettings::default();
        let outcome = compute_filter([BString::from("a/b.txt")], &settings);
        let FilterOutcome::Built(filter) = outcome else {
            panic!("expected a built filter");
        };
        assert_eq!(
            filter.contains(&BloomKey::new(b"a", &settings)),
            BloomStatus::Yes
        );
        assert_eq!(
            filter.contains(&BloomKey::new(b"a/b.txt", &settings)),
            BloomStatus::Yes
        );
    }
}
