//! Build-report counters for the ingest/reduce/write pipeline.
//!
//! Scaled-down cousin of the teacher's hierarchical step tree
//! (`crates/milli/src/progress.rs`): this crate has no nested step
//! hierarchy to report, just a handful of lockless counters that the
//! CLI's `build` subcommand prints once the pipeline finishes.

use std::sync::atomic::{AtomicU64, Ordering};

/// This trait lets you use the AtomicSubStep defined right below. The name
/// must be a const that never changes but that can't be enforced by the
/// type system because it would make the trait non object-safe.
pub trait NamedStep: 'static + Send + Sync + Default {
    fn name(&self) -> &'static str;
}

/// Quick lockless counter for a single named quantity. Unlike the
/// teacher's `AtomicSubStep` this carries no `total` — build reports are
/// open-ended tallies, not progress bars toward a known denominator.
pub struct AtomicSubStep<Name: NamedStep> {
    unit_name: Name,
    current: AtomicU64,
}

impl<Name: NamedStep> AtomicSubStep<Name> {
    pub fn new() -> Self {
        Self { unit_name: Name::default(), current: AtomicU64::new(0) }
    }

    pub fn increment(&self) -> u64 {
        self.current.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn add(&self, n: u64) -> u64 {
        self.current.fetch_add(n, Ordering::Relaxed) + n
    }

    pub fn get(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    pub fn name(&self) -> &'static str {
        self.unit_name.name()
    }
}

impl<Name: NamedStep> Default for AtomicSubStep<Name> {
    fn default() -> Self {
        Self::new()
    }
}

macro_rules! make_atomic_counter {
    ($struct_name:ident alias $atomic_struct_name:ident => $step_name:literal) => {
        #[derive(Default, Debug, Clone, Copy)]
        pub struct $struct_name {}
        impl NamedStep for $struct_name {
            fn name(&self) -> &'static str {
                $step_name
            }
        }
        pub type $atomic_struct_name = AtomicSubStep<$struct_name>;
    };
}

make_atomic_counter!(SentencesIngested alias AtomicSentencesIngested => "sentences_ingested");
make_atomic_counter!(SentencesSkipped alias AtomicSentencesSkipped => "sentences_skipped");
make_atomic_counter!(TokensSeen alias AtomicTokensSeen => "tokens_seen");
make_atomic_counter!(PairsEmitted alias AtomicPairsEmitted => "pairs_emitted");
make_atomic_counter!(ShardSpills alias AtomicShardSpills => "shard_spills");
make_atomic_counter!(OversizedDropped alias AtomicOversizedDropped => "oversized_dropped");
make_atomic_counter!(CollocatesWritten alias AtomicCollocatesWritten => "collocates_written");

/// The full set of counters threaded through one `build` invocation.
/// Shared behind an `Arc` by the ingester, the reducer, and the writer.
#[derive(Default)]
pub struct BuildReport {
    pub sentences_ingested: AtomicSentencesIngested,
    pub sentences_skipped: AtomicSentencesSkipped,
    pub tokens_seen: AtomicTokensSeen,
    pub pairs_emitted: AtomicPairsEmitted,
    pub shard_spills: AtomicShardSpills,
    pub oversized_dropped: AtomicOversizedDropped,
    pub collocates_written: AtomicCollocatesWritten,
}

impl BuildReport {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(name, count)` pairs in a fixed, stable display order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        vec![
            (self.sentences_ingested.name(), self.sentences_ingested.get()),
            (self.sentences_skipped.name(), self.sentences_skipped.get()),
            (self.tokens_seen.name(), self.tokens_seen.get()),
            (self.pairs_emitted.name(), self.pairs_emitted.get()),
            (self.shard_spills.name(), self.shard_spills.get()),
            (self.oversized_dropped.name(), self.oversized_dropped.get()),
            (self.collocates_written.name(), self.collocates_written.get()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let report = BuildReport::new();
        report.sentences_ingested.increment();
        report.sentences_ingested.increment();
        report.tokens_seen.add(42);

        assert_eq!(report.sentences_ingested.get(), 2);
        assert_eq!(report.tokens_seen.get(), 42);
        assert_eq!(report.sentences_skipped.get(), 0);
    }

    #[test]
    fn snapshot_lists_every_counter() {
        let report = BuildReport::new();
        let snapshot = report.snapshot();
        assert_eq!(snapshot.len(), 7);
        assert!(snapshot.iter().any(|(name, _)| *name == "pairs_emitted"));
    }
}
