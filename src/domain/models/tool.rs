use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::FunctionDescription;
use super::Message;

pub type ToolBox = Box<dyn Tool + Send + Sync>;

pub struct ToolContext {
    /// Attribute synthesized image messages to the user rather than the
    /// assistant.
    pub images_as_user: bool,
    /// Fires when the user cancels. Tools that are not cancelable receive a
    /// token that never fires.
    pub cancel: CancellationToken,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ToolOutcome {
    pub result: String,
    pub new_messages: Vec<Message>,
}

impl ToolOutcome {
    pub fn text(result: &str) -> ToolOutcome {
        return ToolOutcome {
            result: result.to_string(),
            new_messages: vec![],
        };
    }
}

#[async_trait]
pub trait Tool {
    /// Schema advertised to the model.
    fn function(&self) -> FunctionDescription;

    /// Long form usage notes included in the system prompt.
    fn detailed_description(&self) -> String;

    fn requires_permission(&self) -> bool;

    fn is_cancelable(&self) -> bool;

    /// Whether a completion request should follow once this tool ran. Tools
    /// that hand control to something outside the conversation return false.
    fn needs_follow_up(&self) -> bool {
        return true;
    }

    /// Runs the tool with the raw JSON argument string from the tool call.
    /// Errors are reported back to the model as the tool result.
    async fn execute(&self, arguments: &str, context: ToolContext) -> Result<ToolOutcome>;
}
