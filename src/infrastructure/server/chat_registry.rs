#[cfg(test)]
#[path = "chat_registry_test.rs"]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;

use super::ApiError;
use crate::domain::models::chat_id_for_key;
use crate::domain::models::ChatMetadata;
use crate::domain::models::SaveChatRequest;
use crate::domain::models::SaveChatResponse;

/// Largest chat blob the API hands out an upload URL for.
pub const MAX_CHAT_BYTES: u64 = 100 * 1024 * 1024;

/// Metadata rows keyed by chat id.
#[async_trait]
pub trait MetadataStore {
    async fn upsert(&self, metadata: ChatMetadata) -> Result<()>;
    async fn find(&self, chat_id: &str) -> Result<Option<ChatMetadata>>;
    async fn delete(&self, chat_id: &str) -> Result<()>;
    async fn all(&self) -> Result<Vec<ChatMetadata>>;
}

/// Object storage holding full chats.
#[async_trait]
pub trait BlobStore {
    /// A time limited URL the client uploads `size` bytes to.
    async fn signed_upload_url(&self, object_key: &str, size: u64) -> Result<String>;

    /// Where the object can be read from once uploaded.
    fn public_url(&self, object_key: &str) -> String;
}

pub fn object_key(chat_id: &str) -> String {
    let prefix = chat_id.chars().take(2).collect::<String>();
    return format!("chats/{prefix}/{chat_id}/chat.json");
}

/// Process local stores, for tests and single machine setups.
pub struct InMemoryStore {
    base_url: String,
    rows: DashMap<String, ChatMetadata>,
}

impl InMemoryStore {
    pub fn new(base_url: &str) -> InMemoryStore {
        return InMemoryStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            rows: DashMap::new(),
        };
    }
}

#[async_trait]
impl MetadataStore for InMemoryStore {
    #[allow(clippy::implicit_return)]
    async fn upsert(&self, metadata: ChatMetadata) -> Result<()> {
        self.rows.insert(metadata.chat_id.to_string(), metadata);
        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn find(&self, chat_id: &str) -> Result<Option<ChatMetadata>> {
        return Ok(self.rows.get(chat_id).map(|row| return row.value().clone()));
    }

    #[allow(clippy::implicit_return)]
    async fn delete(&self, chat_id: &str) -> Result<()> {
        self.rows.remove(chat_id);
        return Ok(());
    }

    #[allow(clippy::implicit_return)]
    async fn all(&self) -> Result<Vec<ChatMetadata>> {
        return Ok(self
            .rows
            .iter()
            .map(|row| return row.value().clone())
            .collect());
    }
}

#[async_trait]
impl BlobStore for InMemoryStore {
    #[allow(clippy::implicit_return)]
    async fn signed_upload_url(&self, object_key: &str, size: u64) -> Result<String> {
        return Ok(format!("{}/upload/{object_key}?size={size}", self.base_url));
    }

    fn public_url(&self, object_key: &str) -> String {
        return format!("{}/{object_key}", self.base_url);
    }
}

/// Server side of chat persistence. A chat may only be written or deleted
/// by whoever holds the key its id was derived from, and every operation is
/// gated by the shared passcode.
pub struct ChatRegistry {
    passcode: String,
    metadata: Arc<dyn MetadataStore + Send + Sync>,
    blobs: Arc<dyn BlobStore + Send + Sync>,
}

impl ChatRegistry {
    pub fn new(
        passcode: &str,
        metadata: Arc<dyn MetadataStore + Send + Sync>,
        blobs: Arc<dyn BlobStore + Send + Sync>,
    ) -> ChatRegistry {
        return ChatRegistry {
            passcode: passcode.to_string(),
            metadata,
            blobs,
        };
    }

    fn check_passcode(&self, passcode: &str) -> Result<(), ApiError> {
        if passcode.is_empty() || passcode != self.passcode {
            return Err(ApiError::InvalidPasscode);
        }
        return Ok(());
    }

    fn check_key(chat_id: &str, chat_key: &str) -> Result<(), ApiError> {
        if chat_id_for_key(chat_key) != chat_id {
            return Err(ApiError::InvalidChatKey);
        }
        return Ok(());
    }

    pub async fn save_chat(&self, req: SaveChatRequest) -> Result<SaveChatResponse, ApiError> {
        let chat_id = req.chat.chat_id.to_string();
        if chat_id.is_empty() || req.chat_key.is_empty() || req.size == 0 {
            return Err(ApiError::MissingFields);
        }
        ChatRegistry::check_key(&chat_id, &req.chat_key)?;
        self.check_passcode(&req.passcode)?;
        if req.size > MAX_CHAT_BYTES {
            return Err(ApiError::TooLarge);
        }

        let key = object_key(&chat_id);
        let signed_url = self
            .blobs
            .signed_upload_url(&key, req.size)
            .await
            .map_err(ApiError::internal)?;

        let mut row = req.chat;
        row.chat_url = Some(self.blobs.public_url(&key));
        self.metadata.upsert(row).await.map_err(ApiError::internal)?;

        tracing::info!(chat_id = %chat_id, size = req.size, "Issued chat upload URL");
        return Ok(SaveChatResponse { signed_url });
    }

    pub async fn load_chat(&self, chat_id: &str, passcode: &str) -> Result<ChatMetadata, ApiError> {
        if chat_id.is_empty() {
            return Err(ApiError::MissingChatId);
        }
        self.check_passcode(passcode)?;

        match self.metadata.find(chat_id).await.map_err(ApiError::internal)? {
            Some(row) => return Ok(row),
            None => return Err(ApiError::NotFound),
        }
    }

    pub async fn delete_chat(
        &self,
        chat_id: &str,
        chat_key: &str,
        passcode: &str,
    ) -> Result<(), ApiError> {
        if chat_id.is_empty() {
            return Err(ApiError::MissingChatId);
        }
        if chat_key.is_empty() {
            return Err(ApiError::MissingChatKey);
        }
        ChatRegistry::check_key(chat_id, chat_key)?;
        self.check_passcode(passcode)?;

        let row = match self.metadata.find(chat_id).await.map_err(ApiError::internal)? {
            Some(row) => row,
            None => return Err(ApiError::NotFound),
        };
        if row.finalized {
            tracing::warn!(chat_id, "Refusing to delete finalized chat");
            return Err(ApiError::Finalized);
        }

        self.metadata
            .delete(chat_id)
            .await
            .map_err(ApiError::internal)?;
        tracing::info!(chat_id, "Deleted chat");
        return Ok(());
    }

    pub async fn list_chats(&self, passcode: &str) -> Result<Vec<ChatMetadata>, ApiError> {
        self.check_passcode(passcode)?;
        return self.metadata.all().await.map_err(ApiError::internal);
    }
}
