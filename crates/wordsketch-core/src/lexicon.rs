//! Bidirectional lemma ↔ integer-id map, with per-id frequency and POS-tag
//! histogram. Sharded the same way `pairs::PairShardMap` is sharded so
//! concurrent ingestion threads touching different lemmas don't serialize
//! on one lock (spec §9: "avoid lock-by-lemma by sharding the lexicon the
//! same way pairs are sharded").

use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::sync::RwLock;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxBuildHasher;

use crate::error::{InternalError, Result, UserError};

const STATS_MAGIC: u32 = 0x5753_4C53; // 'WSLS'
const STATS_VERSION: u32 = 1;

/// A lemma or POS tag longer than this is excluded from precomputed
/// collocates (spec §4.1) but may still live in the lexicon itself.
pub const MAX_ONDISK_BYTES: usize = 255;

#[derive(Debug, Clone, Default)]
pub struct LexiconEntry {
    pub id: u32,
    pub lemma: Box<[u8]>,
    pub total_frequency: u64,
    pub pos_histogram: HashMap<Box<[u8]>, u64>,
}

impl LexiconEntry {
    /// Most frequent POS tag for this entry, ties broken lexicographically.
    pub fn most_frequent_pos(&self) -> Option<&[u8]> {
        self.pos_histogram
            .iter()
            .max_by(|(tag_a, count_a), (tag_b, count_b)| {
                count_a.cmp(count_b).then_with(|| tag_b.cmp(tag_a))
            })
            .map(|(tag, _)| tag.as_ref())
    }

    /// Whether this entry is short enough to be written into
    /// `collocations.bin` (spec §4.1/§4.7: 255-byte on-disk width).
    pub fn fits_ondisk_width(&self) -> bool {
        self.lemma.len() <= MAX_ONDISK_BYTES
            && self.most_frequent_pos().map(|p| p.len() <= MAX_ONDISK_BYTES).unwrap_or(true)
    }
}

const SHARD_COUNT: usize = 16;

/// Shard of the lemma→id map, each behind its own lock so lookups for
/// lemmas that hash to different shards proceed in parallel.
struct LexiconShard {
    ids: RwLock<HashMap<Box<[u8]>, u32, FxBuildHasher>>,
}

pub struct Lexicon {
    shards: Vec<LexiconShard>,
    /// Read-mostly, id-indexed frequency/POS table.
    entries: RwLock<Vec<LexiconEntry>>,
    total_tokens: std::sync::atomic::AtomicU64,
}

impl Default for Lexicon {
    fn default() -> Self {
        Self::new()
    }
}

impl Lexicon {
    pub fn new() -> Self {
        let shards =
            (0..SHARD_COUNT).map(|_| LexiconShard { ids: RwLock::new(HashMap::default()) }).collect();
        Lexicon {
            shards,
            entries: RwLock::new(Vec::new()),
            total_tokens: std::sync::atomic::AtomicU64::new(0),
        }
    }

    fn shard_for(&self, lemma: &[u8]) -> &LexiconShard {
        let hash = fxhash::hash64(lemma);
        &self.shards[(hash as usize) & (SHARD_COUNT - 1)]
    }

    /// Idempotent: returns the existing id for `lemma`, assigning a fresh
    /// dense id on first sight. Safe under concurrent ingestion.
    pub fn get_or_assign_id(&self, lemma: &[u8]) -> u32 {
        let shard = self.shard_for(lemma);
        if let Some(&id) = shard.ids.read().unwrap().get(lemma) {
            return id;
        }

        let mut ids = shard.ids.write().unwrap();
        if let Some(&id) = ids.get(lemma) {
            return id;
        }

        let mut entries = self.entries.write().unwrap();
        let id = entries.len() as u32;
        entries.push(LexiconEntry { id, lemma: lemma.into(), ..Default::default() });
        ids.insert(lemma.into(), id);
        id
    }

    /// Read-only counterpart to `get_or_assign_id`: looks up an existing id
    /// without assigning one, for the query path where an unseen lemma
    /// should resolve to "no collocates" rather than minting a new id.
    pub fn lookup(&self, lemma: &[u8]) -> Option<u32> {
        self.shard_for(lemma).ids.read().unwrap().get(lemma).copied()
    }

    /// Record one occurrence of `id` tagged `tag`. Caller must have already
    /// obtained `id` from `get_or_assign_id`.
    pub fn record_occurrence(&self, id: u32, tag: &[u8]) {
        self.total_tokens.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let mut entries = self.entries.write().unwrap();
        let entry = &mut entries[id as usize];
        entry.total_frequency += 1;
        *entry.pos_histogram.entry(tag.into()).or_insert(0) += 1;
    }

    pub fn frequency(&self, id: u32) -> u64 {
        self.entries.read().unwrap()[id as usize].total_frequency
    }

    pub fn lemma_bytes(&self, id: u32) -> Box<[u8]> {
        self.entries.read().unwrap()[id as usize].lemma.clone()
    }

    pub fn most_frequent_pos(&self, id: u32) -> Option<Box<[u8]>> {
        self.entries.read().unwrap()[id as usize].most_frequent_pos().map(Box::from)
    }

    pub fn size(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens.load(std::sync::atomic::Ordering::Relaxed)
    }

    /// Snapshot of a single entry, used by the reducer and diagnostics.
    pub fn entry(&self, id: u32) -> LexiconEntry {
        self.entries.read().unwrap()[id as usize].clone()
    }

    /// Writes `stats.bin` per spec §6's header/per-id record layout.
    pub fn write_stats_bin(&self, path: &Path, total_sentences: u64) -> Result<()> {
        let entries = self.entries.read().unwrap();
        let mut w = BufWriter::new(File::create(path)?);

        w.write_u32::<LittleEndian>(STATS_MAGIC)?;
        w.write_u32::<LittleEndian>(STATS_VERSION)?;
        w.write_u64::<LittleEndian>(self.total_tokens())?;
        w.write_u64::<LittleEndian>(total_sentences)?;
        w.write_u32::<LittleEndian>(entries.len() as u32)?;

        for entry in entries.iter() {
            write_stats_entry(&mut w, entry)?;
        }
        w.flush()?;
        Ok(())
    }

    /// Writes `stats.tsv`, the same data in tab-separated human-readable form.
    pub fn write_stats_tsv(&self, path: &Path) -> Result<()> {
        let entries = self.entries.read().unwrap();
        let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
        wtr.write_record(["id", "lemma", "total_frequency", "most_frequent_pos"])?;
        for entry in entries.iter() {
            let pos = entry.most_frequent_pos().map(String::from_utf8_lossy).unwrap_or_default();
            wtr.write_record(&[
                entry.id.to_string(),
                String::from_utf8_lossy(&entry.lemma).into_owned(),
                entry.total_frequency.to_string(),
                pos.into_owned(),
            ])?;
        }
        wtr.flush()?;
        Ok(())
    }

    /// Reads back a `stats.bin` file written by `write_stats_bin`.
    pub fn read_stats_bin(path: &Path) -> Result<Lexicon> {
        let file = File::open(path).map_err(|_| InternalError::MissingArtifact {
            name: "stats.bin",
            path: path.display().to_string(),
        })?;
        let mut r = BufReader::new(file);

        let magic = r.read_u32::<LittleEndian>()?;
        if magic != STATS_MAGIC {
            return Err(InternalError::CorruptArtifact {
                name: "stats.bin",
                path: path.display().to_string(),
                reason: format!("bad magic {magic:#x}"),
            }
            .into());
        }
        let version = r.read_u32::<LittleEndian>()?;
        if version != STATS_VERSION {
            return Err(InternalError::CorruptArtifact {
                name: "stats.bin",
                path: path.display().to_string(),
                reason: format!("unsupported version {version}"),
            }
            .into());
        }
        let _total_tokens = r.read_u64::<LittleEndian>()?;
        let _total_sentences = r.read_u64::<LittleEndian>()?;
        let entry_count = r.read_u32::<LittleEndian>()?;

        let lexicon = Lexicon::new();
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            entries.push(read_stats_entry(&mut r)?);
        }
        lexicon.total_tokens.store(_total_tokens, std::sync::atomic::Ordering::Relaxed);

        for entry in &entries {
            let shard = lexicon.shard_for(&entry.lemma);
            shard.ids.write().unwrap().insert(entry.lemma.clone(), entry.id);
        }
        *lexicon.entries.write().unwrap() = entries;

        Ok(lexicon)
    }
}

fn write_stats_entry<W: Write>(w: &mut W, entry: &LexiconEntry) -> Result<()> {
    write_len_prefixed(w, &entry.lemma)?;
    w.write_u64::<LittleEndian>(entry.total_frequency)?;
    // doc_freq is not tracked separately from total_frequency in this crate;
    // the field is kept in the on-disk format for layout compatibility.
    w.write_u32::<LittleEndian>(0)?;
    w.write_u16::<LittleEndian>(entry.pos_histogram.len() as u16)?;
    for (tag, count) in &entry.pos_histogram {
        write_tag_len_prefixed(w, tag)?;
        w.write_u64::<LittleEndian>(*count)?;
    }
    Ok(())
}

fn read_stats_entry<R: Read>(r: &mut R) -> Result<LexiconEntry> {
    let lemma = read_len_prefixed(r)?;
    let total_frequency = r.read_u64::<LittleEndian>()?;
    let _doc_freq = r.read_u32::<LittleEndian>()?;
    let pos_count = r.read_u16::<LittleEndian>()?;
    let mut pos_histogram = HashMap::with_capacity(pos_count as usize);
    for _ in 0..pos_count {
        let tag = read_tag_len_prefixed(r)?;
        let count = r.read_u64::<LittleEndian>()?;
        pos_histogram.insert(tag, count);
    }
    Ok(LexiconEntry { id: 0, lemma, total_frequency, pos_histogram })
}

fn write_len_prefixed<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u16::<LittleEndian>(bytes.len() as u16)?;
    w.write_all(bytes)
}

fn read_len_prefixed<R: Read>(r: &mut R) -> io::Result<Box<[u8]>> {
    let len = r.read_u16::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf.into_boxed_slice())
}

/// POS tags inside the per-entry histogram use a `u8` length prefix (spec
/// §6: `u8 tag_len; bytes; u64 count`), distinct from the `u16` lemma
/// prefix above.
fn write_tag_len_prefixed<W: Write>(w: &mut W, bytes: &[u8]) -> io::Result<()> {
    w.write_u8(bytes.len() as u8)?;
    w.write_all(bytes)
}

fn read_tag_len_prefixed<R: Read>(r: &mut R) -> io::Result<Box<[u8]>> {
    let len = r.read_u8()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    Ok(buf.into_boxed_slice())
}

impl From<csv::Error> for crate::error::Error {
    fn from(err: csv::Error) -> Self {
        UserError::InvalidInput(err.to_string()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigns_dense_ids_in_order() {
        let lex = Lexicon::new();
        let house = lex.get_or_assign_id(b"house");
        let tree = lex.get_or_assign_id(b"tree");
        assert_eq!(house, 0);
        assert_eq!(tree, 1);
        assert_eq!(lex.get_or_assign_id(b"house"), 0);
        assert_eq!(lex.size(), 2);
    }

    #[test]
    fn frequency_equals_sum_of_histogram() {
        let lex = Lexicon::new();
        let id = lex.get_or_assign_id(b"run");
        lex.record_occurrence(id, b"VB");
        lex.record_occurrence(id, b"VB");
        lex.record_occurrence(id, b"VBZ");

        let entry = lex.entry(id);
        let hist_sum: u64 = entry.pos_histogram.values().sum();
        assert_eq!(lex.frequency(id), hist_sum);
        assert_eq!(lex.frequency(id), 3);
    }

    #[test]
    fn most_frequent_pos_breaks_ties_lexicographically() {
        let lex = Lexicon::new();
        let id = lex.get_or_assign_id(b"bank");
        lex.record_occurrence(id, b"NN");
        lex.record_occurrence(id, b"VB");
        assert_eq!(lex.most_frequent_pos(id).unwrap().as_ref(), b"NN");
    }

    #[test]
    fn stats_bin_round_trips() {
        let lex = Lexicon::new();
        let id = lex.get_or_assign_id(b"theory");
        lex.record_occurrence(id, b"NN");
        lex.record_occurrence(id, b"NN");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.bin");
        lex.write_stats_bin(&path, 1).unwrap();

        let reopened = Lexicon::read_stats_bin(&path).unwrap();
        assert_eq!(reopened.size(), 1);
        assert_eq!(reopened.get_or_assign_id(b"theory"), 0);
        assert_eq!(reopened.frequency(0), 2);
    }
}
