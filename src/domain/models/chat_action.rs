use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::Chat;
use super::Message;
use super::MessageMetadata;

/// Transitions of the conversation state machine. Actions arriving as JSON
/// with an unrecognised `type` decode to `Unsupported`, which changes nothing.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatAction {
    Reset,
    Load {
        chat: Chat,
        chat_key: Option<String>,
    },
    SetChatKey {
        chat_id: String,
        chat_key: String,
    },
    AddMessage {
        message: Message,
        metadata: MessageMetadata,
    },
    AddMessages {
        messages: Vec<Message>,
        metadata: MessageMetadata,
    },
    IncrementTokens {
        prompt_tokens: u64,
        completion_tokens: u64,
        estimated_cost: f64,
    },
    DeleteMessage {
        index: usize,
    },
    SetPendingMessages {
        pending_messages: Option<Vec<Message>>,
    },
    SetCurrentModel {
        model: String,
    },
    SetFinalized {
        finalized: bool,
    },
    #[serde(other)]
    Unsupported,
}
