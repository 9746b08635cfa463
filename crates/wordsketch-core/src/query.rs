//! Query executor contract and its production implementation (spec §4.8).
//!
//! `QueryExecutor` is a trait, not a single class with "modes": the
//! precomputed path is the only production implementation, and the debug
//! span-count path lives behind `#[cfg(test)]` purely to cross-check the
//! precomputed path in tests (spec §9).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::collocations::CollocationsReader;
use crate::error::Result;
use crate::lexicon::Lexicon;
use crate::relations::RelationDef;
use crate::sentence_store::SentenceStoreReader;

/// One ranked collocate returned by `find_collocations`.
#[derive(Debug, Clone, PartialEq)]
pub struct CollocateResult {
    pub lemma: String,
    pub pos: String,
    pub cooccurrence: u64,
    pub log_dice: f32,
    pub relative_frequency: f64,
    pub examples: Vec<String>,
}

/// A lemma→id resolver the executor needs to turn a headword string into
/// the id space the reader/sentence store use. Implemented by `Lexicon` in
/// the production path; a thin test double suffices for the debug path.
pub trait LemmaResolver: Send + Sync {
    fn lookup(&self, lemma: &[u8]) -> Option<u32>;
    fn lemma_bytes(&self, id: u32) -> Box<[u8]>;
    fn frequency(&self, id: u32) -> u64;
}

impl LemmaResolver for Lexicon {
    fn lookup(&self, lemma: &[u8]) -> Option<u32> {
        Lexicon::lookup(self, lemma)
    }

    fn lemma_bytes(&self, id: u32) -> Box<[u8]> {
        Lexicon::lemma_bytes(self, id)
    }

    fn frequency(&self, id: u32) -> u64 {
        Lexicon::frequency(self, id)
    }
}

pub trait QueryExecutor: Send + Sync {
    /// Implements the contract in spec §4.8. `cancel`, when set, aborts the
    /// scan as soon as convenient and returns whatever was accumulated so
    /// far wrapped in `Ok` — cancellation is not an error.
    fn find_collocations(
        &self,
        headword: &str,
        relation: &RelationDef,
        min_log_dice: f32,
        limit: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<CollocateResult>>;
}

/// Production executor: filters the precomputed `collocations.bin` entry
/// for `headword`, never touches the raw pair index.
pub struct PrecomputedExecutor {
    reader: Arc<CollocationsReader>,
    sentences: Option<Arc<SentenceStoreReader>>,
    resolver: Option<Arc<dyn LemmaResolver>>,
    max_examples: usize,
}

impl PrecomputedExecutor {
    pub fn new(reader: Arc<CollocationsReader>) -> Self {
        PrecomputedExecutor { reader, sentences: None, resolver: None, max_examples: 3 }
    }

    /// Enables witness mode: each returned row gets up to `max_examples`
    /// example sentences from `sentences` (spec §4.8 "secondary witness
    /// mode"). `resolver` maps the headword and each collocate's lemma
    /// bytes back to the id space `sentences`'s span search needs. Failure
    /// to find a witness never fails the query.
    pub fn with_witness(
        mut self,
        sentences: Arc<SentenceStoreReader>,
        resolver: Arc<dyn LemmaResolver>,
        max_examples: usize,
    ) -> Self {
        self.sentences = Some(sentences);
        self.resolver = Some(resolver);
        self.max_examples = max_examples;
        self
    }
}

impl QueryExecutor for PrecomputedExecutor {
    #[tracing::instrument(skip_all, fields(headword))]
    fn find_collocations(
        &self,
        headword: &str,
        relation: &RelationDef,
        min_log_dice: f32,
        limit: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<CollocateResult>> {
        let headword = headword.to_lowercase();
        let Some(entry) = self.reader.get(headword.as_bytes()) else {
            return Ok(Vec::new());
        };

        // Witness mode needs the headword's id once; resolved lazily since
        // most callers don't pass `--examples` at all.
        let head_id = match (&self.sentences, &self.resolver) {
            (Some(_), Some(resolver)) => resolver.lookup(headword.as_bytes()),
            _ => None,
        };

        let mut out = Vec::new();
        for collocate in &entry.collocations {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let pos = String::from_utf8_lossy(&collocate.most_frequent_pos).into_owned();
            if !relation.collocate_predicate.matches(&pos) {
                continue;
            }
            if min_log_dice != 0.0 && collocate.log_dice < min_log_dice {
                continue;
            }

            let lemma = String::from_utf8_lossy(&collocate.lemma).into_owned();
            let examples = match (head_id, &self.resolver) {
                (Some(head_id), Some(resolver)) => match resolver.lookup(&collocate.lemma) {
                    Some(collocate_id) => {
                        self.witness_examples(head_id, collocate_id, self.reader.window_size)
                    }
                    None => Vec::new(),
                },
                _ => Vec::new(),
            };

            out.push(CollocateResult {
                lemma,
                pos,
                cooccurrence: collocate.cooccurrence,
                log_dice: collocate.log_dice,
                relative_frequency: collocate.cooccurrence as f64 / entry.headword_frequency as f64,
                examples,
            });
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }
}

impl PrecomputedExecutor {
    /// Witness-mode lookup for one row: up to `max_examples` sentence
    /// excerpts placing `headword` and `collocate` within `window`
    /// positions of each other. A row with no witness is not an error
    /// (spec §4.8); the caller sees an empty `examples` vec.
    pub fn witness_examples(
        &self,
        head_id: u32,
        collocate_id: u32,
        window: u32,
    ) -> Vec<String> {
        let Some(sentences) = &self.sentences else { return Vec::new() };
        let mut examples = Vec::new();
        for sentence_id in sentences.span_search(head_id, collocate_id, window) {
            if examples.len() >= self.max_examples {
                break;
            }
            if let Some(sentence) = sentences.get(sentence_id) {
                examples.push(sentence.text);
            }
        }
        examples
    }
}

/// Debug-only executor that re-derives collocate counts by scanning
/// SentenceStore span search directly, bypassing the precomputed table
/// entirely. Exists solely to cross-check `PrecomputedExecutor` in tests
/// (spec §9); never wired into the CLI's normal path.
#[cfg(test)]
pub struct DebugSpanCountExecutor {
    pub sentences: Arc<SentenceStoreReader>,
    pub resolver: Arc<dyn LemmaResolver>,
    pub window: u32,
}

#[cfg(test)]
impl QueryExecutor for DebugSpanCountExecutor {
    fn find_collocations(
        &self,
        headword: &str,
        relation: &RelationDef,
        min_log_dice: f32,
        limit: usize,
        cancel: &AtomicBool,
    ) -> Result<Vec<CollocateResult>> {
        use std::collections::HashMap;

        let Some(head_id) = self.resolver.lookup(headword.to_lowercase().as_bytes()) else {
            return Ok(Vec::new());
        };
        let head_freq = self.resolver.frequency(head_id);
        let w = self.window as usize;

        // Brute-force: walk every sentence containing the headword and
        // count co-occurring lemmas within the window directly, bypassing
        // the precomputed table entirely.
        let mut counts: HashMap<u32, (u64, HashMap<Box<[u8]>, u64>)> = HashMap::new();
        for &(sentence_id, position) in self.sentences.positional_search(head_id) {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            let Some(sentence) = self.sentences.get(sentence_id) else { continue };
            let n = sentence.lemma_ids.len();
            let pos = position as usize;
            let lo = pos.saturating_sub(w);
            let hi = (pos + w + 1).min(n);
            for j in lo..hi {
                if j == pos {
                    continue;
                }
                let coll_id = sentence.lemma_ids[j];
                if coll_id == head_id {
                    continue;
                }
                let tag: Box<[u8]> = sentence.tokens[j].tag.as_bytes().into();
                let slot = counts.entry(coll_id).or_insert_with(|| (0, HashMap::new()));
                slot.0 += 1;
                *slot.1.entry(tag).or_insert(0) += 1;
            }
        }

        let mut out: Vec<CollocateResult> = counts
            .into_iter()
            .filter_map(|(coll_id, (cooc, pos_histogram))| {
                let (pos_bytes, _) = pos_histogram.iter().max_by(|(tag_a, count_a), (tag_b, count_b)| {
                    count_a.cmp(count_b).then_with(|| tag_b.cmp(tag_a))
                })?;
                let pos = String::from_utf8_lossy(pos_bytes).into_owned();
                if !relation.collocate_predicate.matches(&pos) {
                    return None;
                }
                let coll_freq = self.resolver.frequency(coll_id);
                let log_dice = crate::reduce::log_dice(cooc, head_freq, coll_freq);
                if min_log_dice != 0.0 && log_dice < min_log_dice {
                    return None;
                }
                Some(CollocateResult {
                    lemma: String::from_utf8_lossy(&self.resolver.lemma_bytes(coll_id)).into_owned(),
                    pos,
                    cooccurrence: cooc,
                    log_dice,
                    relative_frequency: cooc as f64 / head_freq as f64,
                    examples: Vec::new(),
                })
            })
            .collect();

        out.sort_by(|a, b| {
            b.log_dice
                .partial_cmp(&a.log_dice)
                .unwrap()
                .then_with(|| b.cooccurrence.cmp(&a.cooccurrence))
                .then_with(|| a.lemma.cmp(&b.lemma))
        });
        out.truncate(limit);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collocations::{CollocateRecord, CollocationEntry, CollocationsWriter};
    use crate::progress::BuildReport;
    use crate::relations::{RelationRegistry, TagClassPredicate};
    use crate::token::PosGroup;

    fn build_reader(dir: &std::path::Path) -> Arc<CollocationsReader> {
        let path = dir.join("collocations.bin");
        let mut writer = CollocationsWriter::create(&path, 5, 10, 1000).unwrap();
        let report = BuildReport::new();
        writer
            .write_entry(
                &CollocationEntry {
                    headword: b"house".to_vec().into_boxed_slice(),
                    headword_frequency: 100,
                    collocations: vec![
                        CollocateRecord {
                            lemma: b"big".to_vec().into_boxed_slice(),
                            most_frequent_pos: b"JJ".to_vec().into_boxed_slice(),
                            cooccurrence: 10,
                            collocate_frequency: 20,
                            log_dice: 13.0,
                        },
                        CollocateRecord {
                            lemma: b"run".to_vec().into_boxed_slice(),
                            most_frequent_pos: b"VB".to_vec().into_boxed_slice(),
                            cooccurrence: 2,
                            collocate_frequency: 5,
                            log_dice: 8.0,
                        },
                    ],
                },
                &report,
            )
            .unwrap();
        writer.seal().unwrap();
        Arc::new(CollocationsReader::open(&path).unwrap())
    }

    #[test]
    fn filters_by_relation_and_min_log_dice() {
        let dir = tempfile::tempdir().unwrap();
        let reader = build_reader(dir.path());
        let executor = PrecomputedExecutor::new(reader);
        let registry = RelationRegistry::builtin();
        let modifier = registry.get("modifier").unwrap();

        let cancel = AtomicBool::new(false);
        let results = executor.find_collocations("house", modifier, 0.0, 10, &cancel).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].lemma, "big");
    }

    #[test]
    fn absent_headword_returns_empty_not_error() {
        let dir = tempfile::tempdir().unwrap();
        let reader = build_reader(dir.path());
        let executor = PrecomputedExecutor::new(reader);
        let registry = RelationRegistry::builtin();
        let any = registry.get("any").unwrap();
        let cancel = AtomicBool::new(false);
        let results = executor.find_collocations("nonexistent", any, 0.0, 10, &cancel).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn min_log_dice_zero_means_no_filter() {
        let dir = tempfile::tempdir().unwrap();
        let reader = build_reader(dir.path());
        let executor = PrecomputedExecutor::new(reader);
        let registry = RelationRegistry::builtin();
        let any = registry.get("any").unwrap();
        assert_eq!(any.collocate_predicate, TagClassPredicate::Any);

        let cancel = AtomicBool::new(false);
        let results = executor.find_collocations("house", any, 0.0, 10, &cancel).unwrap();
        assert_eq!(results.len(), 2);
    }

    #[test]
    fn relative_frequency_divides_by_head_frequency() {
        let dir = tempfile::tempdir().unwrap();
        let reader = build_reader(dir.path());
        let executor = PrecomputedExecutor::new(reader);
        let registry = RelationRegistry::builtin();
        let any = registry.get("any").unwrap();
        let cancel = AtomicBool::new(false);
        let results = executor.find_collocations("house", any, 0.0, 10, &cancel).unwrap();
        let big = results.iter().find(|r| r.lemma == "big").unwrap();
        assert!((big.relative_frequency - 0.1).abs() < 1e-9);
    }

    #[test]
    fn head_group_field_is_reachable_via_registry() {
        let registry = RelationRegistry::builtin();
        let modifier = registry.get("modifier").unwrap();
        assert_eq!(modifier.head_group, PosGroup::Noun);
    }

    #[test]
    fn debug_span_count_executor_agrees_with_precomputed_path() {
        use crate::config::BuildConfig;
        use std::io::Cursor;

        let dir = tempfile::tempdir().unwrap();
        let input = "1\tThe\tthe\tDET\tDT\t_\t_\t_\t_\t_\n\
                      2\tbig\tbig\tADJ\tJJ\t_\t_\t_\t_\t_\n\
                      3\thouse\thouse\tNOUN\tNN\t_\t_\t_\t_\t_\n\n\
                      1\tThe\tthe\tDET\tDT\t_\t_\t_\t_\t_\n\
                      2\tsmall\tsmall\tADJ\tJJ\t_\t_\t_\t_\t_\n\
                      3\thouse\thouse\tNOUN\tNN\t_\t_\t_\t_\t_\n\n";

        let mut config = BuildConfig::default();
        config.window_size = 5;
        config.top_k = 10;
        config.min_cooccurrence = 1;
        config.min_headword_frequency = 1;

        crate::pipeline::run_build(Cursor::new(input), dir.path(), &config).unwrap();

        let reader = Arc::new(CollocationsReader::open(dir.path().join("collocations.bin")).unwrap());
        let sentences = Arc::new(crate::sentence_store::SentenceStoreReader::open(dir.path().join("sentences")).unwrap());
        let lexicon = Arc::new(Lexicon::read_stats_bin(&dir.path().join("stats.bin")).unwrap());

        let registry = RelationRegistry::builtin();
        let any = registry.get("any").unwrap();
        let cancel = AtomicBool::new(false);

        let precomputed = PrecomputedExecutor::new(Arc::clone(&reader));
        let mut expected = precomputed.find_collocations("house", any, 0.0, 10, &cancel).unwrap();
        expected.iter_mut().for_each(|r| r.examples.clear());

        let debug = DebugSpanCountExecutor { sentences, resolver: lexicon, window: config.window_size };
        let actual = debug.find_collocations("house", any, 0.0, 10, &cancel).unwrap();

        assert_eq!(expected, actual);
    }
}
