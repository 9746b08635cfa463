//! In-memory sharded co-occurrence accumulator and its on-disk spill
//! format (spec §4.3–§4.4).
//!
//! `PairShardMap` keeps one `fxhash` map per shard behind its own `Mutex`
//! so ingestion threads touching different head-lemma shards proceed in
//! parallel (spec §5). Spilling is a global barrier implemented with a
//! `spill_gate` `RwLock<()>`: ingestion threads hold a read guard for the
//! duration of one sentence, the spill routine takes a write guard before
//! touching any shard, grounded on the sharded-cache-with-LRU-spill shape
//! in the teacher's older `Store` (see DESIGN.md).

use std::cmp::Ordering;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxBuildHasher;

use crate::error::{InternalError, Result};

const RUN_MAGIC: u32 = 0x5752_554E; // 'WRUN'
const RUN_VERSION: u32 = 1;

/// Packs `(head_id, coll_id)` into the single `u64` key used throughout
/// the shard maps and run files.
pub fn pack(head_id: u32, coll_id: u32) -> u64 {
    ((head_id as u64) << 32) | coll_id as u64
}

pub fn unpack(key: u64) -> (u32, u32) {
    ((key >> 32) as u32, key as u32)
}

pub struct PairShardMap {
    shards: Vec<Mutex<HashMap>>,
    spill_threshold: usize,
    spill_gate: RwLock<()>,
}

type HashMap = std::collections::HashMap<u64, u32, FxBuildHasher>;

impl PairShardMap {
    /// `shard_count` must be a power of two (spec §4.3).
    pub fn new(shard_count: u32, spill_threshold: usize) -> Self {
        assert!(shard_count.is_power_of_two(), "shard_count must be a power of two");
        let shards = (0..shard_count).map(|_| Mutex::new(HashMap::default())).collect();
        PairShardMap { shards, spill_threshold, spill_gate: RwLock::new(()) }
    }

    pub fn shard_count(&self) -> u32 {
        self.shards.len() as u32
    }

    fn shard_index(&self, head_id: u32) -> usize {
        (head_id & (self.shards.len() as u32 - 1)) as usize
    }

    /// The barrier ingestion threads hold for the duration of one
    /// sentence's pair emission.
    pub fn spill_gate(&self) -> &RwLock<()> {
        &self.spill_gate
    }

    /// Adds one occurrence of the pair packed in `key`. Callers must hold
    /// a read guard on `spill_gate()` for as long as they keep calling
    /// this for one sentence.
    pub fn add_to(&self, key: u64) {
        let idx = self.shard_index(unpack(key).0);
        let mut shard = self.shards[idx].lock().unwrap();
        *shard.entry(key).or_insert(0) += 1;
    }

    pub fn any_shard_over_threshold(&self) -> bool {
        self.shards.iter().any(|s| s.lock().unwrap().len() >= self.spill_threshold)
    }

    /// Sorts and flushes every shard to its own run under `run_dir`, then
    /// clears all shards. Blocks until every in-flight sentence (each
    /// holding a `spill_gate` read guard) finishes.
    pub fn spill(&self, run_dir: &Path, run_id: u32) -> Result<()> {
        let _barrier = self.spill_gate.write().unwrap();
        for (shard_idx, shard) in self.shards.iter().enumerate() {
            let mut map = shard.lock().unwrap();
            if map.is_empty() {
                continue;
            }
            let mut entries: Vec<(u64, u32)> = map.drain().collect();
            entries.sort_unstable_by_key(|(key, _)| *key);
            let path = run_path(run_dir, shard_idx as u32, run_id);
            write_run(&path, &entries)?;
        }
        Ok(())
    }
}

pub fn run_path(run_dir: &Path, shard: u32, run_id: u32) -> PathBuf {
    run_dir.join(format!("shard-{shard:04}-run-{run_id:08}.run"))
}

/// Paths of every run file written for `shard` under `run_dir`, in the
/// order they were produced (ascending `run_id`).
pub fn runs_for_shard(run_dir: &Path, shard: u32) -> Result<Vec<PathBuf>> {
    let prefix = format!("shard-{shard:04}-run-");
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(run_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with(&prefix) {
            paths.push(entry.path());
        }
    }
    paths.sort();
    Ok(paths)
}

fn write_run(path: &Path, entries: &[(u64, u32)]) -> Result<()> {
    let mut w = BufWriter::new(File::create(path)?);
    w.write_u32::<LittleEndian>(RUN_MAGIC)?;
    w.write_u32::<LittleEndian>(RUN_VERSION)?;
    w.write_u32::<LittleEndian>(entries.len() as u32)?;
    for &(key, count) in entries {
        w.write_u64::<LittleEndian>(key)?;
        w.write_u32::<LittleEndian>(count)?;
    }
    w.flush()?;
    Ok(())
}

/// Streaming cursor over one sorted run file; the element type pushed
/// into the reducer's min-heap (spec §4.4).
pub struct RunCursor {
    reader: BufReader<File>,
    remaining: u32,
    pub key: u64,
    pub value: u32,
}

impl RunCursor {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path).map_err(|_| InternalError::MissingArtifact {
            name: "run file",
            path: path.display().to_string(),
        })?);
        let magic = reader.read_u32::<LittleEndian>()?;
        if magic != RUN_MAGIC {
            return Err(InternalError::CorruptArtifact {
                name: "run file",
                path: path.display().to_string(),
                reason: format!("bad magic {magic:#x}"),
            }
            .into());
        }
        let _version = reader.read_u32::<LittleEndian>()?;
        let remaining = reader.read_u32::<LittleEndian>()?;
        Ok(RunCursor { reader, remaining, key: 0, value: 0 })
    }

    /// Advances to the next record, returning `false` once the run is
    /// exhausted.
    pub fn advance(&mut self) -> Result<bool> {
        if self.remaining == 0 {
            return Ok(false);
        }
        self.key = self.reader.read_u64::<LittleEndian>()?;
        self.value = self.reader.read_u32::<LittleEndian>()?;
        self.remaining -= 1;
        Ok(true)
    }
}

impl PartialEq for RunCursor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RunCursor {}

impl PartialOrd for RunCursor {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RunCursor {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_unpack_round_trips() {
        let key = pack(7, 42);
        assert_eq!(unpack(key), (7, 42));
    }

    #[test]
    fn add_to_accumulates_within_a_shard() {
        let map = PairShardMap::new(4, 1_000);
        let key = pack(1, 2);
        map.add_to(key);
        map.add_to(key);
        map.add_to(pack(1, 3));
        assert!(!map.any_shard_over_threshold());
    }

    #[test]
    fn spill_writes_one_sorted_run_per_nonempty_shard() {
        let dir = tempfile::tempdir().unwrap();
        let map = PairShardMap::new(2, 1_000);
        map.add_to(pack(0, 5));
        map.add_to(pack(0, 5));
        map.add_to(pack(2, 9));

        map.spill(dir.path(), 0).unwrap();

        let mut cursor = RunCursor::open(&run_path(dir.path(), 0, 0)).unwrap();
        assert!(cursor.advance().unwrap());
        assert_eq!(cursor.key, pack(0, 5));
        assert_eq!(cursor.value, 2);
        assert!(!cursor.advance().unwrap());
    }

    #[test]
    fn run_cursor_orders_by_key_for_min_heap_use() {
        let dir = tempfile::tempdir().unwrap();
        write_run(&dir.path().join("a.run"), &[(10, 1), (20, 1)]).unwrap();
        write_run(&dir.path().join("b.run"), &[(15, 1)]).unwrap();

        let mut a = RunCursor::open(&dir.path().join("a.run")).unwrap();
        let mut b = RunCursor::open(&dir.path().join("b.run")).unwrap();
        a.advance().unwrap();
        b.advance().unwrap();
        assert!(a < b);
    }
}
