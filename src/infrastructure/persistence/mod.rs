mod chat_keys;
mod chats_api;

pub use chat_keys::*;
pub use chats_api::*;
