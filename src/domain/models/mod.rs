mod action;
mod available_models;
mod chat;
mod chat_api;
mod chat_action;
mod completion;
mod event;
mod gateway;
mod message;
mod slash_commands;
mod tool;

pub use action::*;
pub use available_models::*;
pub use chat::*;
pub use chat_api::*;
pub use chat_action::*;
pub use completion::*;
pub use event::*;
pub use gateway::*;
pub use message::*;
pub use slash_commands::*;
pub use tool::*;
