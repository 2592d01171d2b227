#[cfg(test)]
#[path = "chat_state_test.rs"]
mod tests;

use crate::domain::models::now_millis;
use crate::domain::models::Chat;
use crate::domain::models::ChatAction;
use crate::domain::models::Message;
use crate::domain::models::DEFAULT_MODEL;

/// Everything the client knows about the open conversation.
#[derive(Clone, Debug, PartialEq)]
pub struct ChatState {
    pub chat: Chat,
    pub chat_key: Option<String>,
    /// In-flight transcript of a running turn. Never persisted.
    pub pending_messages: Option<Vec<Message>>,
    pub current_model: String,
}

impl Default for ChatState {
    fn default() -> ChatState {
        return ChatState {
            chat: Chat::default(),
            chat_key: None,
            pending_messages: None,
            current_model: DEFAULT_MODEL.to_string(),
        };
    }
}

impl ChatState {
    /// Transcript to show: the pending one while a turn runs, otherwise the
    /// committed messages.
    pub fn visible_messages(&self) -> &[Message] {
        if let Some(pending) = &self.pending_messages {
            return pending;
        }

        return &self.chat.messages;
    }
}

/// The only way conversation state changes. Returns a new state and leaves
/// the input alone.
pub fn reduce(state: &ChatState, action: ChatAction) -> ChatState {
    let mut next = state.clone();

    match action {
        ChatAction::Reset => {
            return ChatState::default();
        }
        ChatAction::Load { chat, chat_key } => {
            next.current_model = chat
                .message_metadata
                .last()
                .map(|metadata| return metadata.model.to_string())
                .unwrap_or_else(|| return DEFAULT_MODEL.to_string());
            next.chat = chat;
            next.chat_key = chat_key;
            next.pending_messages = None;
        }
        ChatAction::SetChatKey { chat_id, chat_key } => {
            next.chat.chat_id = chat_id;
            next.chat_key = Some(chat_key);
        }
        ChatAction::AddMessage { message, metadata } => {
            next.chat.messages.push(message);
            next.chat.message_metadata.push(metadata);
            next.chat.timestamp_updated = now_millis();
            next.pending_messages = None;
        }
        ChatAction::AddMessages { messages, metadata } => {
            for message in messages {
                next.chat.messages.push(message);
                next.chat.message_metadata.push(metadata.clone());
            }
            next.chat.timestamp_updated = now_millis();
            next.pending_messages = None;
        }
        ChatAction::IncrementTokens {
            prompt_tokens,
            completion_tokens,
            estimated_cost,
        } => {
            next.chat.prompt_tokens += prompt_tokens;
            next.chat.completion_tokens += completion_tokens;
            next.chat.estimated_cost += estimated_cost;
        }
        ChatAction::DeleteMessage { index } => {
            next.chat.messages.truncate(index);
            next.chat.message_metadata.truncate(index);
            next.chat.timestamp_updated = now_millis();
            next.pending_messages = None;
        }
        ChatAction::SetPendingMessages { pending_messages } => {
            next.pending_messages = pending_messages;
        }
        ChatAction::SetCurrentModel { model } => {
            next.current_model = model;
        }
        ChatAction::SetFinalized { finalized } => {
            next.chat.finalized = finalized;
        }
        ChatAction::Unsupported => {
            tracing::warn!("Ignoring unsupported chat action");
        }
    }

    return next;
}
