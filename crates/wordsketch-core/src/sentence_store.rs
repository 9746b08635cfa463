//! Persistent positional index of sentences (spec §4.2).
//!
//! Write path is a single-threaded append (spec §5: "that writer is
//! single-threaded"); records are framed with explicit `byteorder` writes
//! into a data file plus a `Vec<u64>` offset index, the same "offsets file
//! + data file" split as the teacher's
//! `crates/milli/src/documents/builder.rs`. The inverted index required by
//! spec §4.2 is built alongside the positional store during ingestion and
//! persisted next to it. The read path is `mmap`-backed once sealed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxBuildHasher;
use memmap2::Mmap;

use crate::error::{InternalError, Result};
use crate::token::{Sentence, Token};

const DATA_FILE: &str = "data.bin";
const OFFSETS_FILE: &str = "offsets.bin";
const INVERTED_FILE: &str = "inverted.bin";

const INVERTED_MAGIC: u32 = 0x5753_5356; // 'WSSV'
const INVERTED_VERSION: u32 = 1;

type Inverted = HashMap<u32, Vec<(u32, u16)>, FxBuildHasher>;

/// Build-time writer: single-writer append of sentences, plus the inverted
/// lemma-id index built incrementally as sentences come in.
pub struct SentenceStoreWriter {
    dir: PathBuf,
    data: Mutex<BufWriter<File>>,
    cursor: AtomicU64,
    offsets: Mutex<Vec<u64>>,
    inverted: RwLock<Inverted>,
}

impl SentenceStoreWriter {
    pub fn create(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let data = File::create(dir.join(DATA_FILE))?;
        Ok(SentenceStoreWriter {
            dir,
            data: Mutex::new(BufWriter::new(data)),
            cursor: AtomicU64::new(0),
            offsets: Mutex::new(Vec::new()),
            inverted: RwLock::new(HashMap::default()),
        })
    }

    /// Appends one sentence, returning its assigned byte offset. Building
    /// the record in memory first keeps the lock held only for the actual
    /// write, not for encoding.
    #[tracing::instrument(skip_all, fields(sentence_id = sentence.sentence_id))]
    pub fn append(&self, sentence: &Sentence) -> Result<()> {
        let mut buf = Vec::with_capacity(64 + sentence.text.len());
        encode_sentence(&mut buf, sentence)?;

        {
            let mut data = self.data.lock().unwrap();
            let offset = self.cursor.fetch_add(buf.len() as u64, Ordering::SeqCst);
            data.write_all(&buf)?;
            let mut offsets = self.offsets.lock().unwrap();
            debug_assert_eq!(offsets.len() as u32, sentence.sentence_id);
            offsets.push(offset);
        }

        let mut inverted = self.inverted.write().unwrap();
        for (position, &lemma_id) in sentence.lemma_ids.iter().enumerate() {
            inverted.entry(lemma_id).or_default().push((sentence.sentence_id, position as u16));
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<()> {
        self.data.lock().unwrap().flush()?;
        Ok(())
    }

    /// Finalizes the store: flushes the data file, writes the offsets and
    /// inverted-index sidecars (sorted by lemma id for byte-identical
    /// rebuilds, spec §8 property 7), then reopens the store mmap-backed.
    pub fn seal(self) -> Result<SentenceStoreReader> {
        self.flush()?;

        let offsets = self.offsets.into_inner().unwrap();
        write_offsets(&self.dir.join(OFFSETS_FILE), &offsets)?;

        let inverted = self.inverted.into_inner().unwrap();
        write_inverted(&self.dir.join(INVERTED_FILE), &inverted)?;

        SentenceStoreReader::open(&self.dir)
    }
}

fn encode_sentence(buf: &mut Vec<u8>, sentence: &Sentence) -> Result<()> {
    buf.write_u32::<LittleEndian>(sentence.sentence_id)?;
    write_str(buf, &sentence.text)?;
    buf.write_u32::<LittleEndian>(sentence.tokens.len() as u32)?;
    for (token, &lemma_id) in sentence.tokens.iter().zip(sentence.lemma_ids.iter()) {
        write_str(buf, &token.surface)?;
        write_str(buf, &token.lemma)?;
        write_str(buf, &token.tag)?;
        buf.write_u32::<LittleEndian>(token.position)?;
        buf.write_u32::<LittleEndian>(token.byte_start)?;
        buf.write_u32::<LittleEndian>(token.byte_end)?;
        buf.write_u32::<LittleEndian>(lemma_id)?;
    }
    Ok(())
}

fn decode_sentence(buf: &[u8]) -> Result<Sentence> {
    let mut cursor = buf;
    let sentence_id = cursor.read_u32::<LittleEndian>()?;
    let text = read_str(&mut cursor)?;
    let token_count = cursor.read_u32::<LittleEndian>()?;

    let mut tokens = Vec::with_capacity(token_count as usize);
    let mut lemma_ids = smallvec::SmallVec::with_capacity(token_count as usize);
    for _ in 0..token_count {
        let surface = read_str(&mut cursor)?;
        let lemma = read_str(&mut cursor)?;
        let tag = read_str(&mut cursor)?;
        let position = cursor.read_u32::<LittleEndian>()?;
        let byte_start = cursor.read_u32::<LittleEndian>()?;
        let byte_end = cursor.read_u32::<LittleEndian>()?;
        let lemma_id = cursor.read_u32::<LittleEndian>()?;
        tokens.push(Token { surface, lemma, tag, position, byte_start, byte_end });
        lemma_ids.push(lemma_id);
    }

    Ok(Sentence { sentence_id, text, tokens, lemma_ids })
}

fn write_str<W: Write>(w: &mut W, s: &str) -> Result<()> {
    w.write_u32::<LittleEndian>(s.len() as u32)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

fn read_str<R: Read>(r: &mut R) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf)?;
    String::from_utf8(buf)
        .map_err(|e| InternalError::CorruptArtifact {
            name: "data.bin",
            path: String::new(),
            reason: e.to_string(),
        })
        .map_err(Into::into)
}

fn write_offsets(path: &Path, offsets: &[u64]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u64::<LittleEndian>(offsets.len() as u64)?;
    for &offset in offsets {
        w.write_u64::<LittleEndian>(offset)?;
    }
    w.flush()?;
    Ok(())
}

fn read_offsets(path: &Path) -> Result<Vec<u64>> {
    let mut r = BufReader::new(File::open(path).map_err(|_| InternalError::MissingArtifact {
        name: "offsets.bin",
        path: path.display().to_string(),
    })?);
    let count = r.read_u64::<LittleEndian>()? as usize;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
        offsets.push(r.read_u64::<LittleEndian>()?);
    }
    Ok(offsets)
}

fn write_inverted(path: &Path, inverted: &Inverted) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(INVERTED_MAGIC)?;
    w.write_u32::<LittleEndian>(INVERTED_VERSION)?;
    w.write_u32::<LittleEndian>(inverted.len() as u32)?;

    let mut lemma_ids: Vec<&u32> = inverted.keys().collect();
    lemma_ids.sort_unstable();
    for lemma_id in lemma_ids {
        let postings = &inverted[lemma_id];
        w.write_u32::<LittleEndian>(*lemma_id)?;
        w.write_u32::<LittleEndian>(postings.len() as u32)?;
        for &(sentence_id, position) in postings {
            w.write_u32::<LittleEndian>(sentence_id)?;
            w.write_u16::<LittleEndian>(position)?;
        }
    }
    w.flush()?;
    Ok(())
}

fn read_inverted(path: &Path) -> Result<Inverted> {
    let mut r = BufReader::new(File::open(path).map_err(|_| InternalError::MissingArtifact {
        name: "inverted.bin",
        path: path.display().to_string(),
    })?);

    let magic = r.read_u32::<LittleEndian>()?;
    if magic != INVERTED_MAGIC {
        return Err(InternalError::CorruptArtifact {
            name: "inverted.bin",
            path: path.display().to_string(),
            reason: format!("bad magic {magic:#x}"),
        }
        .into());
    }
    let _version = r.read_u32::<LittleEndian>()?;
    let lemma_count = r.read_u32::<LittleEndian>()?;

    let mut inverted = HashMap::default();
    for _ in 0..lemma_count {
        let lemma_id = r.read_u32::<LittleEndian>()?;
        let postings_count = r.read_u32::<LittleEndian>()?;
        let mut postings = Vec::with_capacity(postings_count as usize);
        for _ in 0..postings_count {
            let sentence_id = r.read_u32::<LittleEndian>()?;
            let position = r.read_u16::<LittleEndian>()?;
            postings.push((sentence_id, position));
        }
        inverted.insert(lemma_id, postings);
    }
    Ok(inverted)
}

/// Immutable, `mmap`-backed reader. Concurrent `get`/search calls share the
/// mapping with no locks (spec §5 "Query path").
pub struct SentenceStoreReader {
    _data_file: File,
    mmap: Mmap,
    offsets: Vec<u64>,
    inverted: Inverted,
}

impl SentenceStoreReader {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let data_file = File::open(dir.join(DATA_FILE)).map_err(|_| InternalError::MissingArtifact {
            name: "data.bin",
            path: dir.display().to_string(),
        })?;
        // SAFETY: the data file is sealed and never mutated after this
        // reader is constructed; nothing else holds a writable mapping.
        let mmap = unsafe { Mmap::map(&data_file)? };
        let offsets = read_offsets(&dir.join(OFFSETS_FILE))?;
        let inverted = read_inverted(&dir.join(INVERTED_FILE))?;

        Ok(SentenceStoreReader { _data_file: data_file, mmap, offsets, inverted })
    }

    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }

    pub fn get(&self, sentence_id: u32) -> Option<Sentence> {
        let offset = *self.offsets.get(sentence_id as usize)? as usize;
        decode_sentence(&self.mmap[offset..]).ok()
    }

    /// `(sentence_id, position)` matches for `lemma_id`, in insertion order.
    pub fn positional_search(&self, lemma_id: u32) -> &[(u32, u16)] {
        self.inverted.get(&lemma_id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_occurrences(&self, lemma_id: u32) -> bool {
        self.inverted.get(&lemma_id).map(|p| !p.is_empty()).unwrap_or(false)
    }

    /// Sentences containing `lemma_a` and `lemma_b` within `window`
    /// positions of each other, per spec §4.2's span search.
    pub fn span_search(&self, lemma_a: u32, lemma_b: u32, window: u32) -> Vec<u32> {
        let (Some(postings_a), Some(postings_b)) =
            (self.inverted.get(&lemma_a), self.inverted.get(&lemma_b))
        else {
            return Vec::new();
        };

        let mut by_sentence: HashMap<u32, Vec<u16>, FxBuildHasher> = HashMap::default();
        for &(sentence_id, position) in postings_a {
            by_sentence.entry(sentence_id).or_default().push(position);
        }

        let mut hits = Vec::new();
        for &(sentence_id, position_b) in postings_b {
            if let Some(positions_a) = by_sentence.get(&sentence_id) {
                let within = positions_a
                    .iter()
                    .any(|&position_a| (position_a as i64 - position_b as i64).unsigned_abs() as u32 <= window);
                if within {
                    hits.push(sentence_id);
                }
            }
        }
        hits.sort_unstable();
        hits.dedup();
        hits
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smallvec::smallvec;

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

    #[test]
    fn round_trips_a_sentence() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SentenceStoreWriter::create(dir.path()).unwrap();

        let sentence = Sentence {
            sentence_id: 0,
            text: "the big house".to_string(),
            tokens: vec![
                token("the", "the", "DT", 0),
                token("big", "big", "JJ", 1),
                token("house", "house", "NN", 2),
            ],
            lemma_ids: smallvec![10, 11, 12],
        };
        writer.append(&sentence).unwrap();
        let reader = writer.seal().unwrap();

        assert_eq!(reader.len(), 1);
        let back = reader.get(0).unwrap();
        assert_eq!(back.text, "the big house");
        assert_eq!(back.lemma_ids.as_slice(), &[10, 11, 12]);
    }

    #[test]
    fn positional_and_span_search() {
        let dir = tempfile::tempdir().unwrap();
        let writer = SentenceStoreWriter::create(dir.path()).unwrap();

        let s0 = Sentence {
            sentence_id: 0,
            text: "a b c d e f g".to_string(),
            tokens: (0..7).map(|i| token("x", "x", "NN", i)).collect(),
            lemma_ids: smallvec![1, 2, 3, 4, 5, 6, 7],
        };
        writer.append(&s0).unwrap();
        let reader = writer.seal().unwrap();

        assert_eq!(reader.positional_search(2), &[(0, 1)]);
        assert!(reader.has_occurrences(2));
        assert!(!reader.has_occurrences(999));

        // lemma 2 at position 1, lemma 4 at position 3: distance 2.
        assert_eq!(reader.span_search(2, 4, 2), vec![0]);
        assert_eq!(reader.span_search(2, 7, 2), Vec::<u32>::new());
    }
}
