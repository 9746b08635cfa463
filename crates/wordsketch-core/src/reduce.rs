//! Per-shard k-way merge and top-K selection (spec §4.6).
//!
//! Parallel across shards via a `ThreadPoolNoAbort`
//! (`crates/milli/src/thread_pool_no_abort.rs`-shaped, see
//! `thread_pool_no_abort`); within one shard the merge is strictly
//! sequential, heap-ordered by `RunCursor::key`. Results are sent to the
//! single-threaded `CollocationsWriter` over a bounded `crossbeam-channel`
//! queue, matching spec §5's "reducers feed it via a bounded queue".

use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::path::Path;
use std::sync::Arc;

use ordered_float::OrderedFloat;
use rayon::prelude::*;

use crate::collocations::{CollocateRecord, CollocationEntry, CollocationsWriter};
use crate::config::BuildConfig;
use crate::error::{InternalError, Result};
use crate::lexicon::Lexicon;
use crate::pairs::{self, RunCursor};
use crate::progress::BuildReport;
use crate::sentence_store::SentenceStoreReader;
use crate::thread_pool_no_abort::ThreadPoolNoAbortBuilder;

/// `logDice = clamp(log2(2·cooc / (headFreq + collFreq)) + 14, 0, 14)`
/// (spec GLOSSARY). Zero frequencies never occur for ids the lexicon
/// assigned, but are guarded against anyway since a zero score is the
/// well-defined fallback (spec §8 property 5).
pub fn log_dice(cooc: u64, head_freq: u64, coll_freq: u64) -> f32 {
    if cooc == 0 || head_freq == 0 || coll_freq == 0 {
        return 0.0;
    }
    let ratio = 2.0 * cooc as f64 / (head_freq as f64 + coll_freq as f64);
    (ratio.log2() + 14.0).clamp(0.0, 14.0) as f32
}

/// One surviving candidate before the final descending-logDice sort.
/// `Ord` is defined so the smallest element is the worst-ranked one, so a
/// `BinaryHeap` bounded to size K can evict it with a plain `pop`.
#[derive(Debug, Clone)]
struct Candidate {
    log_dice: OrderedFloat<f32>,
    cooccurrence: u64,
    coll_id: u32,
    lemma: Box<[u8]>,
}

impl PartialEq for Candidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}
impl Eq for Candidate {}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.log_dice
            .cmp(&other.log_dice)
            .then_with(|| self.cooccurrence.cmp(&other.cooccurrence))
            // Reversed: among true ties the final order keeps ascending
            // lemma bytes, so for eviction purposes the larger lemma is
            // the "worse" (smaller) one.
            .then_with(|| other.lemma.cmp(&self.lemma))
    }
}

/// Runs the full reduce phase: one independent merge problem per shard,
/// fanned out across a panic-isolating thread pool, writing into
/// `writer` via a bounded channel. Returns the sealed writer's caller-owned
/// handle back so the caller decides when to call `seal`.
pub fn run(
    shard_count: u32,
    run_dir: &Path,
    lexicon: &Lexicon,
    sentences: &SentenceStoreReader,
    config: &BuildConfig,
    report: Arc<BuildReport>,
    mut writer: CollocationsWriter,
) -> Result<CollocationsWriter> {
    let (tx, rx) = crossbeam_channel::bounded::<CollocationEntry>(256);

    let writer_report = Arc::clone(&report);
    let writer_thread = std::thread::spawn(move || -> Result<CollocationsWriter> {
        for entry in rx {
            writer.write_entry(&entry, &writer_report)?;
        }
        Ok(writer)
    });

    let pool = ThreadPoolNoAbortBuilder::new()
        .num_threads(config.worker_threads)
        .build()
        .map_err(InternalError::from)?;

    let reduce_result = pool.install(|| {
        (0..shard_count)
            .into_par_iter()
            .try_for_each(|shard| reduce_shard(shard, run_dir, lexicon, sentences, config, &tx))
    });
    drop(tx);

    let writer = match writer_thread.join() {
        Ok(result) => result?,
        Err(_) => return Err(InternalError::PanicInReduce { shard_id: u32::MAX }.into()),
    };

    match reduce_result {
        Ok(inner) => inner?,
        Err(_panic_catched) => return Err(InternalError::PanicInReduce { shard_id: u32::MAX }.into()),
    }

    Ok(writer)
}

#[tracing::instrument(skip_all, fields(shard))]
fn reduce_shard(
    shard: u32,
    run_dir: &Path,
    lexicon: &Lexicon,
    sentences: &SentenceStoreReader,
    config: &BuildConfig,
    tx: &crossbeam_channel::Sender<CollocationEntry>,
) -> Result<()> {
    let run_paths = pairs::runs_for_shard(run_dir, shard)?;
    let mut heap: BinaryHeap<Reverse<RunCursor>> = BinaryHeap::new();
    for path in &run_paths {
        let mut cursor = RunCursor::open(path)?;
        if cursor.advance()? {
            heap.push(Reverse(cursor));
        }
    }

    let mut current_head: Option<u32> = None;
    let mut topk: BinaryHeap<Candidate> = BinaryHeap::new();

    while let Some(Reverse(mut cursor)) = heap.pop() {
        let key = cursor.key;
        let mut cooccurrence = cursor.value as u64;
        if cursor.advance()? {
            heap.push(Reverse(cursor));
        }

        // Coalesce duplicate keys across runs.
        while let Some(Reverse(top)) = heap.peek() {
            if top.key != key {
                break;
            }
            let Reverse(mut dup) = heap.pop().unwrap();
            cooccurrence += dup.value as u64;
            if dup.advance()? {
                heap.push(Reverse(dup));
            }
        }

        let (head_id, coll_id) = pairs::unpack(key);

        if current_head != Some(head_id) {
            if let Some(prev_head) = current_head.take() {
                emit_headword(prev_head, &mut topk, lexicon, tx)?;
            }
            current_head = Some(head_id);
        }

        if cooccurrence < config.min_cooccurrence {
            continue;
        }
        let head_freq = lexicon.frequency(head_id);
        if head_freq < config.min_headword_frequency {
            continue;
        }
        if !sentences.has_occurrences(head_id) || !sentences.has_occurrences(coll_id) {
            continue;
        }

        let coll_freq = lexicon.frequency(coll_id);
        let score = log_dice(cooccurrence, head_freq, coll_freq);
        let candidate = Candidate {
            log_dice: OrderedFloat(score),
            cooccurrence,
            coll_id,
            lemma: lexicon.lemma_bytes(coll_id),
        };

        topk.push(candidate);
        if topk.len() > config.top_k as usize {
            topk.pop();
        }
    }

    if let Some(head_id) = current_head {
        emit_headword(head_id, &mut topk, lexicon, tx)?;
    }

    Ok(())
}

/// Drains `topk`, sorts survivors per spec §3/§4.6's tie-break (descending
/// logDice, descending cooccurrence, ascending lemma bytes), and sends the
/// finished entry to the writer thread. Sends nothing if `topk` is empty
/// (spec Scenario B: a headword with no surviving collocates gets no
/// output entry at all).
fn emit_headword(
    head_id: u32,
    topk: &mut BinaryHeap<Candidate>,
    lexicon: &Lexicon,
    tx: &crossbeam_channel::Sender<CollocationEntry>,
) -> Result<()> {
    if topk.is_empty() {
        return Ok(());
    }

    let mut survivors: Vec<Candidate> = std::mem::take(topk).into_vec();
    survivors.sort_unstable_by(|a, b| {
        b.log_dice
            .cmp(&a.log_dice)
            .then_with(|| b.cooccurrence.cmp(&a.cooccurrence))
            .then_with(|| a.lemma.cmp(&b.lemma))
    });

    let collocations = survivors
        .into_iter()
        .map(|c| CollocateRecord {
            lemma: c.lemma,
            most_frequent_pos: lexicon.most_frequent_pos(c.coll_id).unwrap_or_default(),
            cooccurrence: c.cooccurrence,
            collocate_frequency: lexicon.frequency(c.coll_id),
            log_dice: c.log_dice.into_inner(),
        })
        .collect();

    let entry = CollocationEntry {
        headword: lexicon.lemma_bytes(head_id),
        headword_frequency: lexicon.frequency(head_id),
        collocations,
    };

    tx.send(entry).map_err(|_| InternalError::MergeInvariantViolated { process: "reduce" })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_dice_is_clamped_and_zero_on_empty_inputs() {
        assert_eq!(log_dice(0, 10, 10), 0.0);
        assert_eq!(log_dice(10, 0, 10), 0.0);
        let score = log_dice(1, 1, 1);
        assert!((0.0..=14.0).contains(&score));
    }

    #[test]
    fn log_dice_matches_scenario_a() {
        // Scenario A: cooc=1, head_freq=2 ("house" seen twice), coll_freq=1
        // ("big"/"small" each seen once). logDice = log2(2*1/(2+1)) + 14
        // ≈ 13.415.
        let score = log_dice(1, 2, 1);
        assert!((score - 13.415).abs() < 0.01);
    }

    #[test]
    fn candidate_ordering_matches_eviction_contract() {
        let worse = Candidate {
            log_dice: OrderedFloat(1.0),
            cooccurrence: 1,
            coll_id: 0,
            lemma: b"z".to_vec().into_boxed_slice(),
        };
        let better = Candidate {
            log_dice: OrderedFloat(5.0),
            cooccurrence: 1,
            coll_id: 1,
            lemma: b"a".to_vec().into_boxed_slice(),
        };
        assert!(worse < better);
    }
}
