#[cfg(test)]
#[path = "registry_test.rs"]
mod tests;

use std::path;
use std::sync::Mutex;

use tokio::fs;

use super::KernelManager;

#[derive(Default)]
struct Ids {
    /// Left behind by an earlier process.
    orphans: Vec<String>,
    /// Started by this process and not yet shut down.
    running: Vec<String>,
}

/// Kernels this process is responsible for. The backing file always lists
/// every kernel that still needs a shutdown, so ids survive a crash and get
/// cleaned up by the next process. Storage failures are logged and ignored.
pub struct KernelRegistry {
    path: path::PathBuf,
    ids: Mutex<Ids>,
}

impl KernelRegistry {
    /// Reads the ids an earlier process failed to shut down.
    pub async fn load(path: path::PathBuf) -> KernelRegistry {
        let orphans = match fs::read_to_string(&path).await {
            Ok(payload) => serde_json::from_str::<Vec<String>>(&payload).unwrap_or_else(|err| {
                tracing::warn!(error = ?err, "Corrupt kernel cleanup list, ignoring it");
                return vec![];
            }),
            Err(_) => vec![],
        };
        if !orphans.is_empty() {
            tracing::info!(count = orphans.len(), "Found orphaned kernels");
        }

        return KernelRegistry {
            path,
            ids: Mutex::new(Ids {
                orphans,
                running: vec![],
            }),
        };
    }

    fn snapshot(&self) -> Vec<String> {
        match self.ids.lock() {
            Ok(ids) => {
                return ids
                    .orphans
                    .iter()
                    .chain(ids.running.iter())
                    .cloned()
                    .collect();
            }
            Err(_) => return vec![],
        }
    }

    fn update<F: FnOnce(&mut Ids)>(&self, f: F) {
        match self.ids.lock() {
            Ok(mut ids) => f(&mut *ids),
            Err(err) => tracing::error!(error = ?err, "Kernel registry lock poisoned"),
        }
    }

    pub fn orphans(&self) -> Vec<String> {
        match self.ids.lock() {
            Ok(ids) => return ids.orphans.clone(),
            Err(_) => return vec![],
        }
    }

    pub fn running(&self) -> Vec<String> {
        match self.ids.lock() {
            Ok(ids) => return ids.running.clone(),
            Err(_) => return vec![],
        }
    }

    /// Writes the ids still needing a shutdown.
    pub async fn flush(&self) {
        let payload = match serde_json::to_string(&self.snapshot()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = ?err, "Failed to encode kernel cleanup list");
                return;
            }
        };

        if let Some(parent) = self.path.parent() {
            if let Err(err) = fs::create_dir_all(parent).await {
                tracing::warn!(error = ?err, "Failed to create kernel cleanup directory");
                return;
            }
        }
        if let Err(err) = fs::write(&self.path, payload).await {
            tracing::warn!(error = ?err, "Failed to write kernel cleanup list");
        }
    }

    /// Shuts down every orphan once. The list is cleared whether or not the
    /// individual shutdowns succeed.
    pub async fn cleanup_orphans(&self, manager: &(dyn KernelManager + Send + Sync)) -> usize {
        let mut orphans = vec![];
        self.update(|ids| {
            orphans = std::mem::take(&mut ids.orphans);
        });
        if orphans.is_empty() {
            return 0;
        }

        for id in orphans.iter() {
            match manager.shutdown_kernel(id).await {
                Ok(()) => tracing::info!(kernel_id = %id, "Shut down orphaned kernel"),
                Err(err) => {
                    tracing::warn!(error = ?err, kernel_id = %id, "Failed to shut down orphaned kernel")
                }
            }
        }
        self.flush().await;

        return orphans.len();
    }

    pub async fn track(&self, id: &str) {
        self.update(|ids| ids.running.push(id.to_string()));
        self.flush().await;
    }

    pub async fn untrack(&self, id: &str) {
        self.update(|ids| ids.running.retain(|running| return running != id));
        self.flush().await;
    }
}
