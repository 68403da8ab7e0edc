//! Test-environment overrides, read once at writer or reader startup.

use odx_bloom::BloomSettings;

use crate::{GraphConfig, WriteFlags, WriteOptions};

fn env_bool(name: &str) -> Option<bool> {
    let val = std::env::var(name).ok()?;
    match val.trim() {
        "" => None,
        "0" | "false" | "no" | "off" => Some(false),
        _ => Some(true),
    }
}

fn env_u32(name: &str) -> Option<u32> {
    std::env::var(name).ok()?.trim().parse().ok()
}

/// Values of the `GIT_TEST_*` knobs affecting the graph subsystem.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    /// GIT_TEST_COMMIT_GRAPH — force graph reads/writes on or off.
    pub commit_graph: Option<bool>,
    /// GIT_TEST_COMMIT_GRAPH_CHANGED_PATHS — force Bloom filter writes.
    pub changed_paths: Option<bool>,
    /// GIT_TEST_COMMIT_GRAPH_DIE_ON_PARSE — hard-fail on malformed graphs.
    pub die_on_parse: bool,
    /// GIT_TEST_BLOOM_SETTINGS_NUM_HASHES
    pub bloom_num_hashes: Option<u32>,
    /// GIT_TEST_BLOOM_SETTINGS_BITS_PER_ENTRY
    pub bloom_bits_per_entry: Option<u32>,
    /// GIT_TEST_BLOOM_SETTINGS_MAX_CHANGED_PATHS
    pub bloom_max_changed_paths: Option<u32>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            commit_graph: env_bool("GIT_TEST_COMMIT_GRAPH"),
            changed_paths: env_bool("GIT_TEST_COMMIT_GRAPH_CHANGED_PATHS"),
            die_on_parse: env_bool("GIT_TEST_COMMIT_GRAPH_DIE_ON_PARSE").unwrap_or(false),
            bloom_num_hashes: env_u32("GIT_TEST_BLOOM_SETTINGS_NUM_HASHES"),
            bloom_bits_per_entry: env_u32("GIT_TEST_BLOOM_SETTINGS_BITS_PER_ENTRY"),
            bloom_max_changed_paths: env_u32("GIT_TEST_BLOOM_SETTINGS_MAX_CHANGED_PATHS"),
        }
    }

    /// Fold the knobs into writer options.
    pub fn apply_to_options(&self, opts: &mut WriteOptions) {
        if self.changed_paths == Some(true) {
            opts.flags |= WriteFlags::BLOOM_FILTERS;
        }
        let has_bloom_override = self.bloom_num_hashes.is_some()
            || self.bloom_bits_per_entry.is_some()
            || self.bloom_max_changed_paths.is_some();
        if has_bloom_override {
            let mut settings = opts.bloom_settings.unwrap_or_default();
            if let Some(n) = self.bloom_num_hashes {
                settings.num_hashes = n;
            }
            if let Some(b) = self.bloom_bits_per_entry {
                settings.bits_per_entry = b;
            }
            if let Some(m) = self.bloom_max_changed_paths {
                settings.max_changed_paths = m;
            }
            opts.bloom_settings = Some(settings);
        }
    }

    /// Fold the knobs into reader configuration.
    pub fn apply_to_config(&self, config: &mut GraphConfig) {
        if let Some(on) = self.commit_graph {
            config.core_commit_graph = on;
        }
        if self.die_on_parse {
            config.die_on_parse = true;
        }
    }

    /// The Bloom settings implied by the environment alone.
    pub fn bloom_settings(&self) -> Option<BloomSettings> {
        let mut opts = WriteOptions::default();
        self.apply_to_options(&mut opts);
        opts.bloom_settings
    }
}
