use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::ChatMetadata;

/// Body of a save request. `size` is the byte length of the serialized chat
/// that will be uploaded to the returned URL.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatRequest {
    pub chat: ChatMetadata,
    pub chat_key: String,
    pub size: u64,
    pub passcode: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveChatResponse {
    pub signed_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListChatsResponse {
    pub chats: Vec<ChatMetadata>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    pub error: String,
}
