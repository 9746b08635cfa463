//! Single-pass streaming ingester (spec §4.5).
//!
//! State machine: `Idle → Accumulating → (Spilling → Accumulating)* →
//! Finalized`. Spill is triggered only by the shard threshold;
//! `finalize` enters `Finalized` once on stream end and forces a final
//! spill regardless of shard occupancy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use smallvec::SmallVec;

use crate::config::BuildConfig;
use crate::error::{Error, InternalError, Result};
use crate::lexicon::Lexicon;
use crate::pairs::{self, PairShardMap};
use crate::progress::BuildReport;
use crate::sentence_store::{SentenceStoreReader, SentenceStoreWriter};
use crate::token::{RawSentence, Sentence};

pub struct Ingester {
    lexicon: Arc<Lexicon>,
    sentences: SentenceStoreWriter,
    pairs: PairShardMap,
    run_dir: PathBuf,
    run_counter: AtomicU32,
    next_sentence_id: AtomicU32,
    window: u32,
    commit_interval: u32,
    report: Arc<BuildReport>,
}

impl Ingester {
    pub fn new(
        lexicon: Arc<Lexicon>,
        sentences: SentenceStoreWriter,
        run_dir: PathBuf,
        config: &BuildConfig,
        report: Arc<BuildReport>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&run_dir)?;
        Ok(Ingester {
            lexicon,
            sentences,
            pairs: PairShardMap::new(config.shard_count, config.spill_threshold),
            run_dir,
            run_counter: AtomicU32::new(0),
            next_sentence_id: AtomicU32::new(0),
            window: config.window_size,
            commit_interval: config.commit_interval,
            report,
        })
    }

    /// Runs steps 1–5 of spec §4.5 for one sentence. A malformed sentence
    /// (empty, zero tokens, or no assignable lemmas) is skipped with a
    /// counter increment rather than failing the run.
    #[tracing::instrument(skip_all)]
    pub fn ingest_sentence(&self, raw: RawSentence) -> Result<()> {
        if raw.is_empty() {
            self.report.sentences_skipped.increment();
            return Ok(());
        }

        let sentence_id = self.next_sentence_id.fetch_add(1, Ordering::SeqCst);
        let mut lemma_ids: SmallVec<[u32; 16]> = SmallVec::with_capacity(raw.tokens.len());
        for token in &raw.tokens {
            // `Lexicon.id_of(tokens[i].lemma_normalized)` (spec §3) requires the
            // lower-cased form; normalize here too so the invariant holds
            // regardless of whether the feeder already did it.
            let normalized = token.lemma.to_lowercase();
            let id = self.lexicon.get_or_assign_id(normalized.as_bytes());
            self.lexicon.record_occurrence(id, token.tag.as_bytes());
            lemma_ids.push(id);
            self.report.tokens_seen.increment();
        }

        if lemma_ids.is_empty() {
            self.report.sentences_skipped.increment();
            return Ok(());
        }

        let sentence = Sentence { sentence_id, text: raw.text, tokens: raw.tokens, lemma_ids };
        self.sentences.append(&sentence)?;
        self.report.sentences_ingested.increment();

        if self.commit_interval > 0 && (sentence_id + 1) % self.commit_interval == 0 {
            self.flush_sentences_with_retry()?;
        }

        self.emit_pairs(&sentence);

        if self.pairs.any_shard_over_threshold() {
            self.spill()?;
        }
        Ok(())
    }

    /// Emits co-occurrence pairs within the fixed window, skipping
    /// self-pairs. Held under the shard map's spill gate for the whole
    /// sentence so a spill never observes a partially-emitted sentence.
    #[tracing::instrument(skip_all)]
    fn emit_pairs(&self, sentence: &Sentence) {
        let _gate = self.pairs.spill_gate().read().unwrap();
        let n = sentence.lemma_ids.len();
        let window = self.window as usize;

        for i in 0..n {
            let head_id = sentence.lemma_ids[i];
            let lo = i.saturating_sub(window);
            let hi = (i + window + 1).min(n);
            for j in lo..hi {
                if j == i {
                    continue;
                }
                let coll_id = sentence.lemma_ids[j];
                if coll_id == head_id {
                    continue;
                }
                self.pairs.add_to(pairs::pack(head_id, coll_id));
                self.report.pairs_emitted.increment();
            }
        }
    }

    /// Flushes the sentence store at a `commit_interval` boundary,
    /// retrying a bounded number of times on transient I/O failure before
    /// surfacing it as a fatal error (spec §7: "retryable during ingest
    /// flush; terminal after bounded retries").
    const FLUSH_RETRIES: u32 = 3;

    fn flush_sentences_with_retry(&self) -> Result<()> {
        let mut last_io_err = None;
        for _ in 0..Self::FLUSH_RETRIES {
            match self.sentences.flush() {
                Ok(()) => return Ok(()),
                Err(Error::Io(e)) => {
                    tracing::warn!(error = %e, "transient i/o failure flushing sentence store, retrying");
                    last_io_err = Some(e);
                }
                Err(other) => return Err(other),
            }
        }
        Err(InternalError::TransientIo {
            action: "sentence store flush",
            source: last_io_err.expect("loop runs at least once"),
        }
        .into())
    }

    fn spill(&self) -> Result<()> {
        let run_id = self.run_counter.fetch_add(1, Ordering::SeqCst);
        self.pairs.spill(&self.run_dir, run_id)?;
        self.report.shard_spills.increment();
        Ok(())
    }

    pub fn shard_count(&self) -> u32 {
        self.pairs.shard_count()
    }

    pub fn run_dir(&self) -> &std::path::Path {
        &self.run_dir
    }

    pub fn report(&self) -> &BuildReport {
        &self.report
    }

    /// Forces a final spill and seals the sentence store, entering the
    /// `Finalized` state. Returns the sealed reader and the total number
    /// of runs written (including the final forced spill).
    pub fn finalize(self) -> Result<(SentenceStoreReader, u32)> {
        self.spill()?;
        let reader = self.sentences.seal()?;
        let run_count = self.run_counter.load(Ordering::SeqCst);
        Ok((reader, run_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    fn token(surface: &str, lemma: &str, tag: &str, position: u32) -> Token {
        Token {
            surface: surface.to_string(),
            lemma: lemma.to_string(),
            tag: tag.to_string(),
            position,
            byte_start: 0,
            byte_end: surface.len() as u32,
        }
    }

    fn sentence(words: &[(&str, &str)]) -> RawSentence {
        let tokens = words
            .iter()
            .enumerate()
            .map(|(i, (lemma, tag))| token(lemma, lemma, tag, i as u32))
            .collect();
        RawSentence { text: String::new(), tokens }
    }

    fn new_ingester(dir: &std::path::Path, config: &BuildConfig) -> Ingester {
        let lexicon = Arc::new(Lexicon::new());
        let sentences = SentenceStoreWriter::create(dir.join("sentences")).unwrap();
        Ingester::new(lexicon, sentences, dir.join("runs"), config, Arc::new(BuildReport::new())).unwrap()
    }

    #[test]
    fn skips_empty_sentences() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::default();
        let ingester = new_ingester(dir.path(), &config);

        ingester.ingest_sentence(RawSentence::default()).unwrap();
        let (_, run_count) = ingester.finalize().unwrap();
        assert_eq!(run_count, 1); // still forces the final spill
    }

    #[test]
    fn self_pairs_are_never_emitted() {
        let dir = tempfile::tempdir().unwrap();
        let config = BuildConfig::default();
        let ingester = new_ingester(dir.path(), &config);

        ingester.ingest_sentence(sentence(&[("run", "VB"), ("run", "VB")])).unwrap();
        let report_pairs = ingester.report().pairs_emitted.get();
        assert_eq!(report_pairs, 0);
        ingester.finalize().unwrap();
    }

    #[test]
    fn commit_interval_flushes_without_disturbing_ingestion() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default();
        config.commit_interval = 1; // flush after every sentence
        let ingester = new_ingester(dir.path(), &config);

        for _ in 0..3 {
            ingester.ingest_sentence(sentence(&[("a", "DT"), ("b", "NN")])).unwrap();
        }
        assert_eq!(ingester.report().sentences_ingested.get(), 3);
        ingester.finalize().unwrap();
    }

    #[test]
    fn window_bounds_pair_emission() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = BuildConfig::default();
        config.window_size = 2;
        let ingester = new_ingester(dir.path(), &config);

        // a b c d e f g, window=2: position 1 (b) pairs with 0..=3, not g (6).
        ingester
            .ingest_sentence(sentence(&[
                ("a", "DT"),
                ("b", "NN"),
                ("c", "NN"),
                ("d", "NN"),
                ("e", "NN"),
                ("f", "NN"),
                ("g", "NN"),
            ]))
            .unwrap();

        ingester.finalize().unwrap();
    }
}
