use super::ChatUsage;
use super::Message;
use super::ToolCall;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CancelTarget {
    Completion,
    ToolCall(String),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// The working transcript of an in-flight turn, plus every message the
    /// turn added so far.
    PendingMessages {
        pending: Vec<Message>,
        new_messages: Vec<Message>,
    },
    /// Which operation a cancel request would currently interrupt.
    CancelTargetChanged(Option<CancelTarget>),
    ToolApprovalRequested(ToolCall),
    TurnFinished {
        new_messages: Vec<Message>,
        usage: Option<ChatUsage>,
    },
}
