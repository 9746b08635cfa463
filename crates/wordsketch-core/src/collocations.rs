//! Binary collocations file: writer and `mmap`-backed reader (spec §4.7).
//!
//! The writer reserves header space, writes entries sequentially while
//! recording `(headword → byte_offset)` in memory, then appends the offset
//! table and rewrites the header — the same "reserve header, write body,
//! patch header" technique as the teacher's
//! `crates/milli/src/documents/builder.rs::DocumentsBatchBuilder::into_inner`.
//! Finalization builds into a `*.tmp` path and renames into place only
//! after the header patch succeeds, so an interrupted writer never leaves
//! a half-sealed final name.

use std::fs::{self, File};
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use memmap2::Mmap;
use std::collections::HashMap;

use crate::error::{InternalError, Result};
use crate::lexicon::MAX_ONDISK_BYTES;
use crate::progress::BuildReport;

const MAGIC: u32 = 0x434F_4C4C; // 'COLL'
const VERSION: u32 = 1;
const HEADER_LEN: u64 = 64;

/// One ranked collocate in a `CollocationEntry`, ordered per spec §3:
/// strictly descending `logDice`, ties by descending `cooccurrence`, then
/// ascending lemma bytes.
#[derive(Debug, Clone, PartialEq)]
pub struct CollocateRecord {
    pub lemma: Box<[u8]>,
    pub most_frequent_pos: Box<[u8]>,
    pub cooccurrence: u64,
    pub collocate_frequency: u64,
    pub log_dice: f32,
}

/// One headword's precomputed top-K collocates.
#[derive(Debug, Clone, PartialEq)]
pub struct CollocationEntry {
    pub headword: Box<[u8]>,
    pub headword_frequency: u64,
    pub collocations: Vec<CollocateRecord>,
}

/// Sequential writer; build one, call `write_entry` in ascending or any
/// order (entries need not be sorted relative to each other), then `seal`.
pub struct CollocationsWriter {
    tmp_path: PathBuf,
    final_path: PathBuf,
    writer: BufWriter<File>,
    cursor: u64,
    offsets: Vec<(Box<[u8]>, u64)>,
    window_size: u32,
    top_k: u32,
    total_corpus_tokens: u64,
}

impl CollocationsWriter {
    pub fn create(
        final_path: impl AsRef<Path>,
        window_size: u32,
        top_k: u32,
        total_corpus_tokens: u64,
    ) -> Result<Self> {
        let final_path = final_path.as_ref().to_path_buf();
        let tmp_path = final_path.with_extension("bin.tmp");
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        // Reserve the header; it is patched in `seal` once the real
        // counts and offset table position are known.
        writer.write_all(&[0u8; HEADER_LEN as usize])?;

        Ok(CollocationsWriter {
            tmp_path,
            final_path,
            writer,
            cursor: HEADER_LEN,
            offsets: Vec::new(),
            window_size,
            top_k,
            total_corpus_tokens,
        })
    }

    /// Writes one headword entry. Collocates whose lemma or POS tag
    /// exceeds 255 bytes are dropped (spec §4.1/§4.7) with an
    /// `oversized_dropped` counter increment; the headword itself is
    /// dropped entirely if it exceeds `u16::MAX` bytes (Open Question #2).
    #[tracing::instrument(skip_all, fields(headword_len = entry.headword.len()))]
    pub fn write_entry(&mut self, entry: &CollocationEntry, report: &BuildReport) -> Result<()> {
        if entry.headword.len() > u16::MAX as usize {
            report.oversized_dropped.increment();
            tracing::warn!(
                error = %crate::error::UserError::OversizedEntry { what: "headword", limit: u16::MAX as usize },
                "dropping headword entry"
            );
            return Ok(());
        }

        let kept: Vec<&CollocateRecord> = entry
            .collocations
            .iter()
            .filter(|c| {
                let fits = c.lemma.len() <= MAX_ONDISK_BYTES && c.most_frequent_pos.len() <= MAX_ONDISK_BYTES;
                if !fits {
                    report.oversized_dropped.increment();
                    tracing::warn!(
                        error = %crate::error::UserError::OversizedEntry { what: "collocate lemma/pos", limit: MAX_ONDISK_BYTES },
                        "dropping oversized collocate"
                    );
                }
                fits
            })
            .collect();

        let offset = self.cursor;
        let mut buf = Vec::with_capacity(32 + kept.len() * 32);
        buf.write_u16::<LittleEndian>(entry.headword.len() as u16)?;
        buf.write_all(&entry.headword)?;
        buf.write_u64::<LittleEndian>(entry.headword_frequency)?;
        buf.write_u16::<LittleEndian>(kept.len() as u16)?;
        for collocate in &kept {
            buf.write_u8(collocate.lemma.len() as u8)?;
            buf.write_all(&collocate.lemma)?;
            buf.write_u8(collocate.most_frequent_pos.len() as u8)?;
            buf.write_all(&collocate.most_frequent_pos)?;
            buf.write_u64::<LittleEndian>(collocate.cooccurrence)?;
            buf.write_u64::<LittleEndian>(collocate.collocate_frequency)?;
            buf.write_f32::<LittleEndian>(collocate.log_dice)?;
        }

        self.writer.write_all(&buf)?;
        self.cursor += buf.len() as u64;
        self.offsets.push((entry.headword.clone(), offset));
        report.collocates_written.add(kept.len() as u64);
        Ok(())
    }

    /// Appends the offset table, patches the header, and atomically
    /// renames the `*.tmp` file into place.
    pub fn seal(mut self) -> Result<()> {
        let offset_table_offset = self.cursor;
        for (headword, entry_offset) in &self.offsets {
            self.writer.write_u16::<LittleEndian>(headword.len() as u16)?;
            self.writer.write_all(headword)?;
            self.writer.write_u64::<LittleEndian>(*entry_offset)?;
        }
        let offset_table_size = self.offset_table_byte_size();

        self.writer.flush()?;
        let mut file = self.writer.into_inner().map_err(|e| e.into_io_error())?;

        file.seek(SeekFrom::Start(0))?;
        file.write_u32::<LittleEndian>(MAGIC)?;
        file.write_u32::<LittleEndian>(VERSION)?;
        file.write_u32::<LittleEndian>(self.offsets.len() as u32)?;
        file.write_u32::<LittleEndian>(self.window_size)?;
        file.write_u32::<LittleEndian>(self.top_k)?;
        file.write_u64::<LittleEndian>(self.total_corpus_tokens)?;
        file.write_u64::<LittleEndian>(offset_table_offset)?;
        file.write_u64::<LittleEndian>(offset_table_size)?;
        file.write_all(&[0u8; 20])?;
        file.flush()?;
        drop(file);

        fs::rename(&self.tmp_path, &self.final_path)?;
        Ok(())
    }

    fn offset_table_byte_size(&self) -> u64 {
        let mut size = 4u64; // count
        for (headword, _) in &self.offsets {
            size += 2 + headword.len() as u64 + 8;
        }
        size
    }
}

/// Immutable, `mmap`-backed reader. Concurrent `get` calls share the
/// mapping with no locks (spec §4.7/§5).
pub struct CollocationsReader {
    _file: File,
    mmap: Mmap,
    offsets: HashMap<Box<[u8]>, u64>,
    pub window_size: u32,
    pub top_k: u32,
    pub total_corpus_tokens: u64,
    pub entry_count: u32,
}

impl CollocationsReader {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|_| InternalError::MissingArtifact {
            name: "collocations.bin",
            path: path.display().to_string(),
        })?;
        // SAFETY: the file is sealed and immutable for the reader's lifetime.
        let mmap = unsafe { Mmap::map(&file)? };

        if mmap.len() < HEADER_LEN as usize {
            return Err(InternalError::CorruptArtifact {
                name: "collocations.bin",
                path: path.display().to_string(),
                reason: "file shorter than the header".to_string(),
            }
            .into());
        }

        let mut header = &mmap[0..HEADER_LEN as usize];
        let magic = header.read_u32::<LittleEndian>()?;
        if magic != MAGIC {
            return Err(InternalError::CorruptArtifact {
                name: "collocations.bin",
                path: path.display().to_string(),
                reason: format!("bad magic {magic:#x}"),
            }
            .into());
        }
        let version = header.read_u32::<LittleEndian>()?;
        if version != VERSION {
            return Err(InternalError::CorruptArtifact {
                name: "collocations.bin",
                path: path.display().to_string(),
                reason: format!("unsupported version {version}"),
            }
            .into());
        }
        let entry_count = header.read_u32::<LittleEndian>()?;
        let window_size = header.read_u32::<LittleEndian>()?;
        let top_k = header.read_u32::<LittleEndian>()?;
        let total_corpus_tokens = header.read_u64::<LittleEndian>()?;
        let offset_table_offset = header.read_u64::<LittleEndian>()?;
        let _offset_table_size = header.read_u64::<LittleEndian>()?;

        let mut offsets = HashMap::with_capacity(entry_count as usize);
        let mut cursor = &mmap[offset_table_offset as usize..];
        let count = cursor.read_u32::<LittleEndian>()?;
        for _ in 0..count {
            let len = cursor.read_u16::<LittleEndian>()? as usize;
            let mut lemma = vec![0u8; len];
            cursor.read_exact(&mut lemma)?;
            let entry_offset = cursor.read_u64::<LittleEndian>()?;
            offsets.insert(lemma.into_boxed_slice(), entry_offset);
        }

        Ok(CollocationsReader {
            _file: file,
            mmap,
            offsets,
            window_size,
            top_k,
            total_corpus_tokens,
            entry_count,
        })
    }

    /// Looks up `headword`'s precomputed entry. Absence is not an error
    /// (spec §4.8): returns `None`.
    pub fn get(&self, headword: &[u8]) -> Option<CollocationEntry> {
        let offset = *self.offsets.get(headword)?;
        decode_entry(&self.mmap[offset as usize..]).ok()
    }

    pub fn contains(&self, headword: &[u8]) -> bool {
        self.offsets.contains_key(headword)
    }

    pub fn headwords(&self) -> impl Iterator<Item = &[u8]> {
        self.offsets.keys().map(|b| b.as_ref())
    }
}

fn decode_entry(buf: &[u8]) -> Result<CollocationEntry> {
    let mut cursor = buf;
    let headword_len = cursor.read_u16::<LittleEndian>()? as usize;
    let mut headword = vec![0u8; headword_len];
    cursor.read_exact(&mut headword)?;
    let headword_frequency = cursor.read_u64::<LittleEndian>()?;
    let collocate_count = cursor.read_u16::<LittleEndian>()?;

    let mut collocations = Vec::with_capacity(collocate_count as usize);
    for _ in 0..collocate_count {
        let lemma_len = cursor.read_u8()? as usize;
        let mut lemma = vec![0u8; lemma_len];
        cursor.read_exact(&mut lemma)?;
        let pos_len = cursor.read_u8()? as usize;
        let mut pos = vec![0u8; pos_len];
        cursor.read_exact(&mut pos)?;
        let cooccurrence = cursor.read_u64::<LittleEndian>()?;
        let collocate_frequency = cursor.read_u64::<LittleEndian>()?;
        let log_dice = cursor.read_f32::<LittleEndian>()?;
        collocations.push(CollocateRecord {
            lemma: lemma.into_boxed_slice(),
            most_frequent_pos: pos.into_boxed_slice(),
            cooccurrence,
            collocate_frequency,
            log_dice,
        });
    }

    Ok(CollocationEntry { headword: headword.into_boxed_slice(), headword_frequency, collocations })
}

trait IntoInnerErrorExt {
    fn into_io_error(self) -> crate::error::Error;
}

impl<W> IntoInnerErrorExt for std::io::IntoInnerError<W> {
    fn into_io_error(self) -> crate::error::Error {
        self.into_error().into()
    }
}
