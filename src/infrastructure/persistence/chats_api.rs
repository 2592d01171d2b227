#[cfg(test)]
#[path = "chats_api_test.rs"]
mod tests;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Result;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ApiErrorBody;
use crate::domain::models::Chat;
use crate::domain::models::ChatMetadata;
use crate::domain::models::ListChatsResponse;
use crate::domain::models::SaveChatRequest;
use crate::domain::models::SaveChatResponse;
use crate::domain::services::squash_chat;

/// Client for the chat API. Metadata goes through the API, the full chat is
/// stored as a blob the API hands out URLs for.
pub struct ChatsApi {
    url: String,
    passcode: String,
    client: reqwest::Client,
}

async fn error_from(res: reqwest::Response, action: &str) -> anyhow::Error {
    let status = res.status();
    let message = match res.json::<ApiErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status.to_string(),
    };
    tracing::error!(status = status.as_u16(), message = %message, action, "Chat API request failed");
    return anyhow!(format!("Failed to {action}: {message}"));
}

impl ChatsApi {
    pub fn new(url: &str, passcode: &str) -> ChatsApi {
        return ChatsApi {
            url: url.trim_end_matches('/').to_string(),
            passcode: passcode.to_string(),
            client: reqwest::Client::new(),
        };
    }

    pub fn from_config() -> ChatsApi {
        return ChatsApi::new(
            &Config::get(ConfigKey::ApiURL),
            &Config::get(ConfigKey::ChatPasscode),
        );
    }

    /// Squashes and uploads the chat. Returns false when squashing left
    /// nothing worth storing.
    pub async fn save(&self, chat: &Chat, chat_key: &str) -> Result<bool> {
        let squashed = squash_chat(chat);
        if squashed.messages.is_empty() {
            tracing::debug!(chat_id = %chat.chat_id, "Nothing to save after squashing");
            return Ok(false);
        }

        let payload = serde_json::to_string(&squashed)?;
        let req = SaveChatRequest {
            chat: squashed.metadata(),
            chat_key: chat_key.to_string(),
            size: payload.len() as u64,
            passcode: self.passcode.to_string(),
        };

        let res = self
            .client
            .post(format!("{}/api/save_chat", self.url))
            .json(&req)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(error_from(res, "get upload URL").await);
        }
        let upload = res.json::<SaveChatResponse>().await?;

        let res = self
            .client
            .put(&upload.signed_url)
            .body(payload)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(error_from(res, "upload chat data").await);
        }

        tracing::info!(chat_id = %squashed.chat_id, size = req.size, "Saved chat");
        return Ok(true);
    }

    pub async fn load(&self, chat_id: &str) -> Result<Chat> {
        let res = self
            .client
            .get(format!("{}/api/load_chat", self.url))
            .query(&[("chatId", chat_id), ("passcode", self.passcode.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(error_from(res, "load chat").await);
        }

        let metadata = res.json::<ChatMetadata>().await?;
        let chat_url = match metadata.chat_url {
            Some(chat_url) => chat_url,
            None => bail!("Chat {chat_id} has no stored data"),
        };

        let res = self.client.get(&chat_url).send().await?;
        if !res.status().is_success() {
            return Err(error_from(res, "download chat data").await);
        }

        let chat = res.json::<Chat>().await?;
        tracing::info!(chat_id, messages = chat.messages.len(), "Loaded chat");
        return Ok(chat);
    }

    /// Deletes a chat the caller holds the key for. Finalized chats are
    /// refused by the API.
    pub async fn delete(&self, chat_id: &str, chat_key: &str) -> Result<()> {
        let res = self
            .client
            .delete(format!("{}/api/delete_chat", self.url))
            .query(&[
                ("chatId", chat_id),
                ("chatKey", chat_key),
                ("passcode", self.passcode.as_str()),
            ])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(error_from(res, "delete chat").await);
        }

        tracing::info!(chat_id, "Deleted chat");
        return Ok(());
    }

    pub async fn list(&self) -> Result<Vec<ChatMetadata>> {
        let res = self
            .client
            .get(format!("{}/api/list_chats", self.url))
            .query(&[("passcode", self.passcode.as_str())])
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(error_from(res, "list chats").await);
        }

        let mut chats = res.json::<ListChatsResponse>().await?.chats;
        chats.sort_by(|a, b| return b.timestamp_updated.cmp(&a.timestamp_updated));
        return Ok(chats);
    }
}
