//! Build- and query-time configuration knobs (spec §6 "Configuration").
//!
//! Plain structs, constructed by the CLI via `clap::Parser`; kept here
//! rather than in the binary so library callers embedding this crate don't
//! need `clap` to configure a build.

/// Knobs for the ingest → reduce → write pipeline.
#[derive(Debug, Clone)]
pub struct BuildConfig {
    /// Symmetric token-distance bound for pair emission.
    pub window_size: u32,
    /// Number of collocates kept per headword in the output file.
    pub top_k: u32,
    /// Headwords with fewer occurrences than this are dropped at reduce time.
    pub min_headword_frequency: u64,
    /// Pairs with fewer co-occurrences than this are dropped at reduce time.
    pub min_cooccurrence: u64,
    /// Number of `PairShardMap` shards; must be a power of two.
    pub shard_count: u32,
    /// Per-shard entry count that triggers a spill.
    pub spill_threshold: usize,
    /// Sentences between `SentenceStore` flushes.
    pub commit_interval: u32,
    /// Worker threads used by the reducer's rayon pool.
    pub worker_threads: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            window_size: 5,
            top_k: 25,
            min_headword_frequency: 10,
            min_cooccurrence: 2,
            shard_count: 16,
            spill_threshold: 2_000_000,
            commit_interval: 10_000,
            worker_threads: num_cpus(),
        }
    }
}

impl BuildConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !self.shard_count.is_power_of_two() {
            return Err(format!("shard_count must be a power of two, got {}", self.shard_count));
        }
        if self.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        Ok(())
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// Knobs for a single `QueryExecutor::find_collocations` call.
#[derive(Debug, Clone)]
pub struct QueryConfig {
    pub min_log_dice: f32,
    pub limit: usize,
    /// Maximum witness sentences fetched per collocate in witness mode.
    pub max_examples: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        QueryConfig { min_log_dice: 0.0, limit: 25, max_examples: 3 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_build_config_is_valid() {
        assert!(BuildConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_non_power_of_two_shard_count() {
        let mut cfg = BuildConfig::default();
        cfg.shard_count = 17;
        assert!(cfg.validate().is_err());
    }
}
