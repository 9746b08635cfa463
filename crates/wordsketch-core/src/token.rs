//! Token and sentence types shared by the ingester, the sentence store and
//! the CoNLL-U adapter.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Broad part-of-speech group derived from the first two letters of a tag,
/// per spec: `noun|verb|adj|adv|prep|det|pron|conj|part|other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PosGroup {
    Noun,
    Verb,
    Adj,
    Adv,
    Prep,
    Det,
    Pron,
    Conj,
    Part,
    Other,
}

impl PosGroup {
    /// Derive the broad group from a tag string such as `NN`, `JJ`, `VBZ`.
    pub fn from_tag(tag: &str) -> PosGroup {
        let mut prefix = [0u8; 2];
        for (slot, byte) in prefix.iter_mut().zip(tag.as_bytes()) {
            *slot = byte.to_ascii_lowercase();
        }
        match &prefix {
            b"nn" => PosGroup::Noun,
            b"vb" | b"md" => PosGroup::Verb,
            b"jj" => PosGroup::Adj,
            b"rb" => PosGroup::Adv,
            b"in" => PosGroup::Prep,
            b"dt" => PosGroup::Det,
            b"pr" | b"wp" => PosGroup::Pron,
            b"cc" => PosGroup::Conj,
            b"rp" | b"to" => PosGroup::Part,
            _ => PosGroup::Other,
        }
    }
}

/// One token as produced by the CoNLL-U adapter and consumed by the
/// ingester. Immutable after ingestion.
#[derive(Debug, Clone)]
pub struct Token {
    pub surface: String,
    /// Lower-cased normalized lemma.
    pub lemma: String,
    /// Corpus-specific POS tag, e.g. `NN`, `JJ`, `VBZ`.
    pub tag: String,
    pub position: u32,
    pub byte_start: u32,
    pub byte_end: u32,
}

impl Token {
    pub fn pos_group(&self) -> PosGroup {
        PosGroup::from_tag(&self.tag)
    }
}

/// A sentence as handed to the ingester, before lemma ids have been
/// assigned. The CoNLL-U adapter (and any other feeder) produces these.
#[derive(Debug, Clone, Default)]
pub struct RawSentence {
    pub text: String,
    pub tokens: Vec<Token>,
}

impl RawSentence {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// A sentence as persisted by the `SentenceStore`: tokens plus the parallel
/// lemma-id sequence assigned by the `Lexicon` during ingestion.
///
/// Invariant: `tokens.len() == lemma_ids.len()`.
#[derive(Debug, Clone)]
pub struct Sentence {
    pub sentence_id: u32,
    pub text: String,
    pub tokens: Vec<Token>,
    pub lemma_ids: SmallVec<[u32; 16]>,
}

impl Sentence {
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pos_group_from_common_tags() {
        assert_eq!(PosGroup::from_tag("NN"), PosGroup::Noun);
        assert_eq!(PosGroup::from_tag("NNS"), PosGroup::Noun);
        assert_eq!(PosGroup::from_tag("VBZ"), PosGroup::Verb);
        assert_eq!(PosGroup::from_tag("JJ"), PosGroup::Adj);
        assert_eq!(PosGroup::from_tag("RB"), PosGroup::Adv);
        assert_eq!(PosGroup::from_tag("DT"), PosGroup::Det);
        assert_eq!(PosGroup::from_tag("CC"), PosGroup::Conj);
        assert_eq!(PosGroup::from_tag("PUNCT"), PosGroup::Other);
    }
}
