#[cfg(test)]
#[path = "chat_keys_test.rs"]
mod tests;

use std::collections::BTreeMap;
use std::path;

use anyhow::Result;
use tokio::fs;

use crate::domain::models::ChatKeyInfo;

/// Local record of the keys for chats created on this machine. Holding the
/// key is what allows saving over or deleting a stored chat.
pub struct ChatKeyStore {
    path: path::PathBuf,
}

impl ChatKeyStore {
    pub fn new(path: path::PathBuf) -> ChatKeyStore {
        return ChatKeyStore { path };
    }

    /// Every stored key by chat id. A missing or corrupt file reads as empty.
    pub async fn all(&self) -> BTreeMap<String, ChatKeyInfo> {
        let payload = match fs::read_to_string(&self.path).await {
            Ok(payload) => payload,
            Err(_) => return BTreeMap::new(),
        };

        return serde_json::from_str(&payload).unwrap_or_else(|err| {
            tracing::warn!(error = ?err, path = ?self.path, "Corrupt chat key store, ignoring it");
            return BTreeMap::new();
        });
    }

    pub async fn load(&self, chat_id: &str) -> Option<ChatKeyInfo> {
        return self.all().await.remove(chat_id);
    }

    pub async fn save(&self, info: &ChatKeyInfo) -> Result<()> {
        let mut keys = self.all().await;
        keys.insert(info.chat_id.to_string(), info.clone());
        return self.write(&keys).await;
    }

    pub async fn remove(&self, chat_id: &str) -> Result<()> {
        let mut keys = self.all().await;
        if keys.remove(chat_id).is_none() {
            return Ok(());
        }
        return self.write(&keys).await;
    }

    async fn write(&self, keys: &BTreeMap<String, ChatKeyInfo>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&self.path, serde_json::to_string_pretty(keys)?).await?;
        return Ok(());
    }
}
