//! Integrity report over a built index (spec §4.10).
//!
//! A plain synchronous scan over the top-N highest-frequency headwords,
//! classifying each precomputed collocate that looks suspicious, then
//! thresholding across headwords to flag systemic drift (spec Scenario E).

use crate::collocations::CollocationsReader;
use crate::lexicon::Lexicon;
use crate::sentence_store::SentenceStoreReader;

/// Per-headword counts of each mismatch class (spec §4.10).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeadwordMismatch {
    pub headword: String,
    pub collocate_count: usize,
    pub missing_collocate: usize,
    pub malformed_lemma: usize,
    pub no_witness_span: usize,
}

impl HeadwordMismatch {
    fn total_mismatches(&self) -> usize {
        self.missing_collocate + self.malformed_lemma + self.no_witness_span
    }

    /// Fraction of this headword's collocates flagged by any class.
    pub fn mismatch_ratio(&self) -> f64 {
        if self.collocate_count == 0 {
            return 0.0;
        }
        self.total_mismatches() as f64 / self.collocate_count as f64
    }
}

/// Full diagnostics output: per-headword detail plus the systemic flag.
#[derive(Debug, Clone, PartialEq)]
pub struct IntegrityReport {
    pub headwords: Vec<HeadwordMismatch>,
    /// True if the fraction of headwords whose `mismatch_ratio` exceeds
    /// `ratio_threshold` itself exceeds `fraction_threshold` — the
    /// "systemic drift" signal (spec Scenario E / §7).
    pub systemic_mismatch: bool,
}

/// A lemma is malformed if it has no letters at all, or non-letter bytes
/// outnumber letter bytes (spec §4.10).
fn is_malformed_lemma(lemma: &[u8]) -> bool {
    let letters = lemma.iter().filter(|b| b.is_ascii_alphabetic()).count();
    let non_letters = lemma.len() - letters;
    letters == 0 || non_letters > letters
}

/// Runs the report over the `top_n` highest-frequency headwords present in
/// both `reader` and `lexicon`.
#[tracing::instrument(skip_all)]
pub fn run_report(
    reader: &CollocationsReader,
    sentences: &SentenceStoreReader,
    lexicon: &Lexicon,
    top_n: usize,
    window: u32,
    ratio_threshold: f64,
    fraction_threshold: f64,
) -> IntegrityReport {
    let mut candidates: Vec<(u32, u64)> = (0..lexicon.size() as u32)
        .filter(|&id| reader.contains(&lexicon.lemma_bytes(id)))
        .map(|id| (id, lexicon.frequency(id)))
        .collect();
    candidates.sort_unstable_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    candidates.truncate(top_n);

    let mut headwords = Vec::with_capacity(candidates.len());
    for (head_id, _freq) in candidates {
        let headword_bytes = lexicon.lemma_bytes(head_id);
        let Some(entry) = reader.get(&headword_bytes) else { continue };

        let mut mismatch = HeadwordMismatch {
            headword: String::from_utf8_lossy(&headword_bytes).into_owned(),
            collocate_count: entry.collocations.len(),
            ..Default::default()
        };

        for collocate in &entry.collocations {
            if is_malformed_lemma(&collocate.lemma) {
                mismatch.malformed_lemma += 1;
                continue;
            }
            let Some(coll_id) = lookup_id(lexicon, &collocate.lemma) else {
                mismatch.missing_collocate += 1;
                continue;
            };
            if !sentences.has_occurrences(coll_id) {
                mismatch.missing_collocate += 1;
                continue;
            }
            if sentences.span_search(head_id, coll_id, window).is_empty() {
                mismatch.no_witness_span += 1;
            }
        }

        headwords.push(mismatch);
    }

    let flagged = headwords.iter().filter(|h| h.mismatch_ratio() > ratio_threshold).count();
    let systemic_mismatch = if headwords.is_empty() {
        false
    } else {
        (flagged as f64 / headwords.len() as f64) > fraction_threshold
    };

    IntegrityReport { headwords, systemic_mismatch }
}

/// Linear fallback lookup: diagnostics runs rarely enough that a full
/// `get_or_assign_id`-style shard lookup would read-lock live ingestion
/// state this module never touches; it reads the frozen id-indexed table
/// instead.
fn lookup_id(lexicon: &Lexicon, lemma: &[u8]) -> Option<u32> {
    (0..lexicon.size() as u32).find(|&id| lexicon.lemma_bytes(id).as_ref() == lemma)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collocations::{CollocateRecord, CollocationEntry, CollocationsWriter};
    use crate::progress::BuildReport;
    use crate::sentence_store::SentenceStoreWriter;
    use crate::token::{RawSentence, Sentence, Token};

    fn token(lemma: &str, tag: &str, position: u32) -> Token {
        Token {
            surface: lemma.to_string(),
            lemma: lemma.to_string(),
            tag: tag.to_string(),
            position,
            byte_start: 0,
            byte_end: lemma.len() as u32,
        }
    }

    #[test]
    fn malformed_lemma_detection() {
        assert!(is_malformed_lemma(b"123!!"));
        assert!(is_malformed_lemma(b""));
        assert!(!is_malformed_lemma(b"house"));
        assert!(!is_malformed_lemma(b"co-op")); // 5 letters, 1 non-letter
    }

    #[test]
    fn missing_collocate_flagged_when_absent_from_sentence_store() {
        let dir = tempfile::tempdir().unwrap();
        let lexicon = Lexicon::new();
        let house = lexicon.get_or_assign_id(b"house");
        lexicon.record_occurrence(house, b"NN");
        for _ in 0..5 {
            lexicon.record_occurrence(house, b"NN");
        }
        let ghost = lexicon.get_or_assign_id(b"ghost");
        let _ = ghost; // never recorded into the sentence store below

        let sentences_dir = dir.path().join("sentences");
        let writer = SentenceStoreWriter::create(&sentences_dir).unwrap();
        let raw = RawSentence { text: "house".into(), tokens: vec![token("house", "NN", 0)] };
        let sentence = Sentence {
            sentence_id: 0,
            text: raw.text,
            tokens: raw.tokens,
            lemma_ids: smallvec::smallvec![house],
        };
        writer.append(&sentence).unwrap();
        let reader = writer.seal().unwrap();

        let colloc_path = dir.path().join("collocations.bin");
        let mut colloc_writer = CollocationsWriter::create(&colloc_path, 5, 10, 100).unwrap();
        let report = BuildReport::new();
        colloc_writer
            .write_entry(
                &CollocationEntry {
                    headword: b"house".to_vec().into_boxed_slice(),
                    headword_frequency: 6,
                    collocations: vec![CollocateRecord {
                        lemma: b"ghost".to_vec().into_boxed_slice(),
                        most_frequent_pos: b"NN".to_vec().into_boxed_slice(),
                        cooccurrence: 1,
                        collocate_frequency: 1,
                        log_dice: 5.0,
                    }],
                },
                &report,
            )
            .unwrap();
        colloc_writer.seal().unwrap();
        let colloc_reader = CollocationsReader::open(&colloc_path).unwrap();

        let result = run_report(&colloc_reader, &reader, &lexicon, 10, 5, 0.0, 1.0);
        assert_eq!(result.headwords.len(), 1);
        assert_eq!(result.headwords[0].missing_collocate, 1);
    }
}
