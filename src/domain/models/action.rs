use super::Message;

pub enum Action {
    /// Runs one conversational turn over the given transcript, which already
    /// ends with the user's new message.
    SendMessage {
        transcript: Vec<Message>,
        model: String,
    },
    Cancel(),
    ResolveToolApproval {
        tool_call_id: String,
        approved: bool,
    },
}
