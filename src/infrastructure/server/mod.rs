//! Server side of the chat API and the streaming relay. Nothing in the
//! binary mounts them, the tests next to them pin their contracts.
#![allow(dead_code)]

mod api_error;
pub mod chat_registry;
pub mod relay;

pub use api_error::*;
