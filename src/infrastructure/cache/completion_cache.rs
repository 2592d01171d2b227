#[cfg(test)]
#[path = "completion_cache_test.rs"]
mod tests;

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path;

use anyhow::Result;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::domain::models::CompletionResponse;

pub const MAX_ENTRIES: usize = 300;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
struct CacheEntry {
    key: String,
    timestamp: i64,
    value: CompletionResponse,
}

/// Insertion timestamps by key.
type CacheIndex = BTreeMap<String, i64>;

/// Completion responses on disk, one file per key plus an index of insertion
/// times. Holds at most `capacity` entries and evicts the oldest insertions
/// first. Reads do not refresh an entry. Storage failures are logged and
/// behave like a miss. The index is the source of truth: entry files it does
/// not list are never served, and an unreadable index is rebuilt from the
/// entry files so they stay subject to eviction.
pub struct CompletionCache {
    dir: path::PathBuf,
    capacity: usize,
    write_lock: Mutex<()>,
}

impl CompletionCache {
    pub fn new(dir: path::PathBuf) -> CompletionCache {
        return CompletionCache::with_capacity(dir, MAX_ENTRIES);
    }

    pub fn with_capacity(dir: path::PathBuf, capacity: usize) -> CompletionCache {
        return CompletionCache {
            dir,
            capacity,
            write_lock: Mutex::new(()),
        };
    }

    fn entry_path(&self, key: &str) -> path::PathBuf {
        return self.dir.join(format!("{key}.json"));
    }

    fn index_path(&self) -> path::PathBuf {
        return self.dir.join("index.json");
    }

    pub async fn get(&self, key: &str) -> Option<CompletionResponse> {
        if !self.read_index().await.contains_key(key) {
            return None;
        }

        let payload = match fs::read_to_string(self.entry_path(key)).await {
            Ok(payload) => payload,
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(error = ?err, key, "Failed to read completion cache");
                }
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry>(&payload) {
            Ok(entry) => return Some(entry.value),
            Err(err) => {
                tracing::warn!(error = ?err, key, "Corrupt completion cache entry");
                return None;
            }
        }
    }

    pub async fn put(&self, key: &str, value: &CompletionResponse) {
        if let Err(err) = self.try_put(key, value).await {
            tracing::warn!(error = ?err, key, "Failed to write completion cache");
        }
    }

    async fn read_index(&self) -> CacheIndex {
        match fs::read_to_string(self.index_path()).await {
            Ok(payload) => match serde_json::from_str(&payload) {
                Ok(index) => return index,
                Err(err) => {
                    tracing::warn!(error = ?err, "Corrupt completion cache index, rebuilding");
                }
            },
            Err(err) => {
                if err.kind() != ErrorKind::NotFound {
                    tracing::warn!(error = ?err, "Failed to read completion cache index, rebuilding");
                }
            }
        }

        return self.rebuild_index().await;
    }

    /// Recovers insertion times from the entry files themselves. Files that
    /// do not parse are left out.
    async fn rebuild_index(&self) -> CacheIndex {
        let mut index = CacheIndex::new();
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(_) => return index,
        };

        while let Ok(Some(file)) = entries.next_entry().await {
            let path = file.path();
            let key = match (path.extension(), path.file_stem()) {
                (Some(ext), Some(stem)) if ext == "json" && stem != "index" => {
                    stem.to_string_lossy().to_string()
                }
                _ => continue,
            };
            let entry = match fs::read_to_string(&path).await {
                Ok(payload) => serde_json::from_str::<CacheEntry>(&payload),
                Err(_) => continue,
            };
            match entry {
                Ok(entry) => {
                    index.insert(key, entry.timestamp);
                }
                Err(err) => tracing::debug!(error = ?err, key = %key, "Skipped unreadable cache entry"),
            }
        }

        if !index.is_empty() {
            tracing::info!(entries = index.len(), "Rebuilt completion cache index");
        }
        return index;
    }

    async fn write_index(&self, index: &CacheIndex) -> Result<()> {
        let staged = self.dir.join("index.json.tmp");
        fs::write(&staged, serde_json::to_string(index)?).await?;
        fs::rename(&staged, self.index_path()).await?;
        return Ok(());
    }

    async fn try_put(&self, key: &str, value: &CompletionResponse) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        fs::create_dir_all(&self.dir).await?;

        let mut index = self.read_index().await;

        // Strictly increasing, so eviction order is insertion order even when
        // the clock stalls.
        let newest = index.values().max().copied().unwrap_or(0);
        let timestamp = chrono::Utc::now().timestamp_micros().max(newest + 1);

        let entry = CacheEntry {
            key: key.to_string(),
            timestamp,
            value: value.clone(),
        };
        fs::write(self.entry_path(key), serde_json::to_string(&entry)?).await?;
        index.insert(key.to_string(), timestamp);

        if index.len() > self.capacity {
            let mut by_age = index
                .iter()
                .map(|(key, timestamp)| return (*timestamp, key.to_string()))
                .collect::<Vec<(i64, String)>>();
            by_age.sort();

            let overflow = index.len() - self.capacity;
            for (_, evicted) in by_age.into_iter().take(overflow) {
                index.remove(&evicted);
                if let Err(err) = fs::remove_file(self.entry_path(&evicted)).await {
                    tracing::warn!(error = ?err, key = %evicted, "Failed to evict cache entry");
                }
            }
            tracing::debug!(evicted = overflow, "Evicted completion cache entries");
        }

        self.write_index(&index).await?;

        return Ok(());
    }

    pub async fn len(&self) -> usize {
        return self.read_index().await.len();
    }

    pub async fn clear(&self) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        if self.dir.exists() {
            fs::remove_dir_all(&self.dir).await?;
        }

        return Ok(());
    }
}
