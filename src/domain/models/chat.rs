#[cfg(test)]
#[path = "chat_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;
use sha1::Digest;
use sha1::Sha1;
use uuid::Uuid;

use super::Message;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MessageMetadata {
    pub model: String,
    pub timestamp: i64,
}

impl MessageMetadata {
    pub fn now(model: &str) -> MessageMetadata {
        return MessageMetadata {
            model: model.to_string(),
            timestamp: now_millis(),
        };
    }
}

/// The persisted conversation aggregate. `message_metadata` runs parallel to
/// `messages`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    pub chat_id: String,
    pub messages: Vec<Message>,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost: f64,
    pub message_metadata: Vec<MessageMetadata>,
    pub timestamp_created: i64,
    pub timestamp_updated: i64,
    #[serde(default)]
    pub finalized: bool,
}

impl Default for Chat {
    fn default() -> Chat {
        let now = now_millis();
        return Chat {
            chat_id: "".to_string(),
            messages: vec![],
            prompt_tokens: 0,
            completion_tokens: 0,
            estimated_cost: 0.0,
            message_metadata: vec![],
            timestamp_created: now,
            timestamp_updated: now,
            finalized: false,
        };
    }
}

impl Chat {
    pub fn metadata(&self) -> ChatMetadata {
        return ChatMetadata {
            chat_id: self.chat_id.to_string(),
            prompt_tokens: self.prompt_tokens,
            completion_tokens: self.completion_tokens,
            estimated_cost: self.estimated_cost,
            message_metadata: self.message_metadata.clone(),
            timestamp_created: self.timestamp_created,
            timestamp_updated: self.timestamp_updated,
            finalized: self.finalized,
            chat_url: None,
        };
    }
}

/// A chat without its messages. This is the row the chat API stores; the
/// messages live in a separate blob referenced by `chat_url`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMetadata {
    pub chat_id: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub estimated_cost: f64,
    #[serde(default)]
    pub message_metadata: Vec<MessageMetadata>,
    pub timestamp_created: i64,
    pub timestamp_updated: i64,
    #[serde(default)]
    pub finalized: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_url: Option<String>,
}

/// Secret chat key and the public id derived from it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatKeyInfo {
    pub chat_id: String,
    pub chat_key: String,
}

impl ChatKeyInfo {
    pub fn generate() -> ChatKeyInfo {
        let chat_key = Uuid::new_v4().to_string();
        return ChatKeyInfo {
            chat_id: chat_id_for_key(&chat_key),
            chat_key,
        };
    }
}

pub fn sha1_hex(input: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(input.as_bytes());
    return hex::encode(hasher.finalize());
}

pub fn chat_id_for_key(chat_key: &str) -> String {
    return sha1_hex(chat_key);
}

pub fn now_millis() -> i64 {
    return chrono::Utc::now().timestamp_millis();
}
