pub mod actions;
pub mod approvals;
pub mod canonical_json;
mod chat_state;
pub mod orchestrator;
mod squash;
pub mod system_prompt;

pub use chat_state::*;
pub use squash::*;
