//! Swap persistence: an append-only write-ahead log plus periodic snapshot
//! compaction, with atomic (temp-file + rename) writes so a crash mid-write
//! never corrupts the on-disk state.
//!
//! The storage *interface* is trait-based and dependency-injected, following
//! the same shape as the wallet/swap storage traits this crate started
//! from: the orchestrator binary and its tests can swap in an in-memory
//! implementation without touching any orchestration logic.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{CanonicalHash, Swap};

/// Boxed future returned by [`PersistenceStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Current on-disk schema version. Bump whenever the persisted JSON shape
/// changes in a way that is not backward compatible.
pub const SCHEMA_VERSION: u32 = 1;

/// Dependency-injected persistence boundary for swap state.
pub trait PersistenceStore: Send + Sync {
    fn get(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, Option<Swap>>;
    fn put(&self, swap: &Swap) -> StoreFuture<'_, ()>;
    fn delete(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, ()>;
    fn list(&self) -> StoreFuture<'_, Vec<Swap>>;
    /// Resolve a hashlock to the swap registered under it, if any. Used to
    /// re-register in-flight swaps against fresh chain observations after a
    /// restart, without having to replay the entire log to rebuild the
    /// index from scratch on every lookup.
    fn find_by_hashlock(&self, hashlock: &CanonicalHash) -> StoreFuture<'_, Option<Swap>>;
}

/// One append-only log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum WalEntry {
    Put { swap: Swap },
    Delete { swap_id: uuid::Uuid },
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    schema_version: u32,
    swaps: Vec<Swap>,
}

/// Filesystem-backed implementation: a snapshot file plus a WAL file that
/// accumulates entries since the last snapshot. On load, the snapshot is
/// read first and the WAL is replayed on top of it.
pub struct FileStore {
    dir: PathBuf,
    state: RwLock<State>,
}

struct State {
    swaps: HashMap<uuid::Uuid, Swap>,
    by_hashlock: HashMap<CanonicalHash, uuid::Uuid>,
    wal_entries_since_snapshot: usize,
}

/// Compact into a fresh snapshot after this many WAL entries, bounding how
/// much the WAL can grow between compactions.
const COMPACTION_THRESHOLD: usize = 256;

impl FileStore {
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::Storage(format!("failed to create store dir: {e}")))?;

        let mut swaps = HashMap::new();

        let snapshot_path = dir.join("snapshot.json");
        if snapshot_path.exists() {
            let bytes = std::fs::read(&snapshot_path)
                .map_err(|e| Error::Storage(format!("failed to read snapshot: {e}")))?;
            let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
            if snapshot.schema_version != SCHEMA_VERSION {
                return Err(Error::Storage(format!(
                    "snapshot schema version {} does not match expected {}",
                    snapshot.schema_version, SCHEMA_VERSION
                )));
            }
            for swap in snapshot.swaps {
                swaps.insert(swap.id, swap);
            }
        }

        let wal_path = dir.join("wal.log");
        let mut wal_entries_since_snapshot = 0;
        if wal_path.exists() {
            let contents = std::fs::read_to_string(&wal_path)
                .map_err(|e| Error::Storage(format!("failed to read WAL: {e}")))?;
            for line in contents.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let entry: WalEntry = serde_json::from_str(line)?;
                match entry {
                    WalEntry::Put { swap } => {
                        swaps.insert(swap.id, swap);
                    }
                    WalEntry::Delete { swap_id } => {
                        swaps.remove(&swap_id);
                    }
                }
                wal_entries_since_snapshot += 1;
            }
        }

        let by_hashlock = swaps.iter().map(|(id, s)| (s.hashlock, *id)).collect();

        Ok(Self {
            dir,
            state: RwLock::new(State {
                swaps,
                by_hashlock,
                wal_entries_since_snapshot,
            }),
        })
    }

    fn append_wal(&self, entry: &WalEntry) -> Result<()> {
        use std::io::Write;
        let wal_path = self.dir.join("wal.log");
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&wal_path)
            .map_err(|e| Error::Storage(format!("failed to open WAL for append: {e}")))?;
        let line = serde_json::to_string(entry)?;
        writeln!(file, "{line}").map_err(|e| Error::Storage(format!("WAL write failed: {e}")))?;
        file.sync_all()
            .map_err(|e| Error::Storage(format!("WAL fsync failed: {e}")))?;
        Ok(())
    }

    fn compact_if_needed(&self) -> Result<()> {
        let needs_compaction = {
            let state = self.state.read().unwrap();
            state.wal_entries_since_snapshot >= COMPACTION_THRESHOLD
        };
        if needs_compaction {
            self.write_snapshot()?;
        }
        Ok(())
    }

    /// Write a fresh snapshot and truncate the WAL, via temp-file + rename
    /// so a crash mid-write leaves either the old snapshot or the new one
    /// intact, never a half-written file.
    fn write_snapshot(&self) -> Result<()> {
        let snapshot = {
            let state = self.state.read().unwrap();
            Snapshot {
                schema_version: SCHEMA_VERSION,
                swaps: state.swaps.values().cloned().collect(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let snapshot_path = self.dir.join("snapshot.json");
        let tmp_path = self.dir.join("snapshot.json.tmp");
        std::fs::write(&tmp_path, &bytes)
            .map_err(|e| Error::Storage(format!("failed to write snapshot temp file: {e}")))?;
        std::fs::rename(&tmp_path, &snapshot_path)
            .map_err(|e| Error::Storage(format!("failed to rename snapshot temp file: {e}")))?;

        let wal_path = self.dir.join("wal.log");
        std::fs::write(&wal_path, b"")
            .map_err(|e| Error::Storage(format!("failed to truncate WAL: {e}")))?;

        let mut state = self.state.write().unwrap();
        state.wal_entries_since_snapshot = 0;
        Ok(())
    }
}

impl PersistenceStore for FileStore {
    fn get(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, Option<Swap>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state.swaps.get(&swap_id).cloned())
        })
    }

    fn put(&self, swap: &Swap) -> StoreFuture<'_, ()> {
        let swap = swap.clone();
        Box::pin(async move {
            self.append_wal(&WalEntry::Put { swap: swap.clone() })?;
            {
                let mut state = self.state.write().unwrap();
                state.by_hashlock.insert(swap.hashlock, swap.id);
                state.swaps.insert(swap.id, swap);
                state.wal_entries_since_snapshot += 1;
            }
            self.compact_if_needed()?;
            Ok(())
        })
    }

    fn delete(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.append_wal(&WalEntry::Delete { swap_id })?;
            {
                let mut state = self.state.write().unwrap();
                if let Some(swap) = state.swaps.remove(&swap_id) {
                    state.by_hashlock.remove(&swap.hashlock);
                }
                state.wal_entries_since_snapshot += 1;
            }
            self.compact_if_needed()?;
            Ok(())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Swap>> {
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state.swaps.values().cloned().collect())
        })
    }

    fn find_by_hashlock(&self, hashlock: &CanonicalHash) -> StoreFuture<'_, Option<Swap>> {
        let hashlock = *hashlock;
        Box::pin(async move {
            let state = self.state.read().unwrap();
            Ok(state
                .by_hashlock
                .get(&hashlock)
                .and_then(|id| state.swaps.get(id))
                .cloned())
        })
    }
}

/// In-memory store for tests: same trait, no filesystem.
#[cfg(test)]
pub struct MemoryStore {
    inner: RwLock<HashMap<uuid::Uuid, Swap>>,
}

#[cfg(test)]
impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

#[cfg(test)]
impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
impl PersistenceStore for MemoryStore {
    fn get(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, Option<Swap>> {
        Box::pin(async move { Ok(self.inner.read().unwrap().get(&swap_id).cloned()) })
    }

    fn put(&self, swap: &Swap) -> StoreFuture<'_, ()> {
        let swap = swap.clone();
        Box::pin(async move {
            self.inner.write().unwrap().insert(swap.id, swap);
            Ok(())
        })
    }

    fn delete(&self, swap_id: uuid::Uuid) -> StoreFuture<'_, ()> {
        Box::pin(async move {
            self.inner.write().unwrap().remove(&swap_id);
            Ok(())
        })
    }

    fn list(&self) -> StoreFuture<'_, Vec<Swap>> {
        Box::pin(async move { Ok(self.inner.read().unwrap().values().cloned().collect()) })
    }

    fn find_by_hashlock(&self, hashlock: &CanonicalHash) -> StoreFuture<'_, Option<Swap>> {
        let hashlock = *hashlock;
        Box::pin(async move {
            Ok(self
                .inner
                .read()
                .unwrap()
                .values()
                .find(|s| s.hashlock == hashlock)
                .cloned())
        })
    }
}
