#[cfg(test)]
#[path = "orchestrator_test.rs"]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::approvals::PermissionGate;
use super::system_prompt::system_prompt;
use crate::domain::models::estimate_cost;
use crate::domain::models::images_need_user_role;
use crate::domain::models::CancelTarget;
use crate::domain::models::ChatUsage;
use crate::domain::models::CompletionRequest;
use crate::domain::models::Event;
use crate::domain::models::GatewayBox;
use crate::domain::models::Message;
use crate::domain::models::ToolBox;
use crate::domain::models::ToolCall;
use crate::domain::models::ToolContext;
use crate::domain::models::ToolDefinition;
use crate::domain::models::NO_CONTENT;

pub const NOT_APPROVED: &str = "Tool execution was not approved by the user.";
pub const CANCELED_BEFORE_APPROVAL: &str = "Tool execution was canceled before the user approved it.";

/// What a finished turn added to the transcript, and what it cost. `usage`
/// is `None` when any completion in the turn failed.
#[derive(Clone, Debug, PartialEq)]
pub struct TurnOutcome {
    pub new_messages: Vec<Message>,
    pub usage: Option<ChatUsage>,
}

/// Working state of one turn, carried across completion rounds.
struct Turn {
    pending: Vec<Message>,
    new_messages: Vec<Message>,
}

impl Turn {
    fn push(&mut self, message: Message) {
        self.pending.push(message.clone());
        self.new_messages.push(message);
    }

    fn finish(self, usage: Option<ChatUsage>) -> TurnOutcome {
        return TurnOutcome {
            new_messages: self.new_messages,
            usage,
        };
    }
}

/// Drives a conversational turn: completion, tool calls, approvals, and
/// follow up completions until the model answers in text, the user cancels,
/// or a request fails.
pub struct Orchestrator {
    gateway: GatewayBox,
    tools: Vec<ToolBox>,
    permissions: Arc<dyn PermissionGate + Send + Sync>,
    tx: mpsc::UnboundedSender<Event>,
}

impl Orchestrator {
    pub fn new(
        gateway: GatewayBox,
        tools: Vec<ToolBox>,
        permissions: Arc<dyn PermissionGate + Send + Sync>,
        tx: mpsc::UnboundedSender<Event>,
    ) -> Orchestrator {
        return Orchestrator {
            gateway,
            tools,
            permissions,
            tx,
        };
    }

    fn find_tool(&self, name: &str) -> Option<&ToolBox> {
        return self
            .tools
            .iter()
            .find(|tool| return tool.function().name == name);
    }

    fn notify(&self, turn: &Turn) -> Result<()> {
        self.tx.send(Event::PendingMessages {
            pending: turn.pending.clone(),
            new_messages: turn.new_messages.clone(),
        })?;

        return Ok(());
    }

    fn set_cancel_target(&self, target: Option<CancelTarget>) -> Result<()> {
        self.tx.send(Event::CancelTargetChanged(target))?;
        return Ok(());
    }

    /// A batch is terminal when every call names a registered tool that hands
    /// control elsewhere. Unknown tools still get a follow up.
    fn needs_follow_up(&self, tool_calls: &[ToolCall]) -> bool {
        return !tool_calls.iter().all(|tool_call| {
            return self
                .find_tool(&tool_call.function.name)
                .map(|tool| return !tool.needs_follow_up())
                .unwrap_or(false);
        });
    }

    /// Runs a turn over `transcript`, which must already end with the user's
    /// message. The outcome carries usage summed over every completion.
    /// Progress is published as `Event::PendingMessages`, each carrying the
    /// whole working transcript and every message the turn has added so far.
    pub async fn send_chat_message(
        &self,
        transcript: Vec<Message>,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome> {
        let system = Message::system(&system_prompt(&self.tools));
        let tool_definitions = self
            .tools
            .iter()
            .map(|tool| return ToolDefinition::function(tool.function()))
            .collect::<Vec<ToolDefinition>>();

        let mut turn = Turn {
            pending: transcript,
            new_messages: vec![],
        };
        let mut usage = ChatUsage::default();
        let mut round = 0;

        loop {
            round += 1;

            let mut messages = vec![system.clone()];
            messages.extend(turn.pending.iter().cloned());
            let request = CompletionRequest {
                model: model.to_string(),
                messages,
                stream: false,
                tools: tool_definitions.clone(),
            };

            tracing::debug!(model, round, "Requesting completion");
            self.set_cancel_target(Some(CancelTarget::Completion))?;
            let result = self.gateway.fetch_completion(&request, cancel).await;
            self.set_cancel_target(None)?;

            let completion = match result {
                Ok(completion) => completion,
                Err(err) => {
                    tracing::error!(error = ?err, round, "Completion request failed");
                    turn.push(Message::system(&format!(
                        "Error in call to the completion API: {err}"
                    )));
                    self.notify(&turn)?;
                    return Ok(turn.finish(None));
                }
            };

            let choice = match completion.response.choices.first() {
                Some(choice) => choice.clone(),
                None => {
                    turn.push(Message::system(
                        "Error in call to the completion API. No choices returned.",
                    ));
                    self.notify(&turn)?;
                    return Ok(turn.finish(None));
                }
            };

            let billed = completion.billed_usage();
            usage = usage
                + ChatUsage {
                    prompt_tokens: billed.prompt_tokens,
                    completion_tokens: billed.completion_tokens,
                    cost: estimate_cost(model, billed.prompt_tokens, billed.completion_tokens),
                };
            self.notify(&turn)?;

            let tool_calls = choice.message.tool_calls.unwrap_or_default();
            if tool_calls.is_empty() {
                let content = choice
                    .message
                    .content
                    .filter(|content| return !content.is_empty())
                    .unwrap_or_else(|| return NO_CONTENT.to_string());
                turn.push(Message::assistant(&content));
                self.notify(&turn)?;
                return Ok(turn.finish(Some(usage)));
            }

            turn.push(Message::assistant_tool_calls(tool_calls.clone()));
            self.notify(&turn)?;

            self.run_tool_calls(&tool_calls, model, cancel, &mut turn)
                .await?;

            if cancel.is_cancelled() || !self.needs_follow_up(&tool_calls) {
                self.notify(&turn)?;
                return Ok(turn.finish(Some(usage)));
            }
        }
    }

    /// Executes a batch strictly in order. A denial or a cancellation ends the
    /// batch; later calls get no message at all.
    async fn run_tool_calls(
        &self,
        tool_calls: &[ToolCall],
        model: &str,
        cancel: &CancellationToken,
        turn: &mut Turn,
    ) -> Result<()> {
        for tool_call in tool_calls {
            if cancel.is_cancelled() {
                break;
            }

            let tool = match self.find_tool(&tool_call.function.name) {
                Some(tool) => tool,
                None => {
                    tracing::warn!(name = %tool_call.function.name, "Skipping unknown tool");
                    continue;
                }
            };

            if tool.requires_permission()
                && !self.permissions.request_permission(tool_call, cancel).await
            {
                let result = if cancel.is_cancelled() {
                    CANCELED_BEFORE_APPROVAL
                } else {
                    NOT_APPROVED
                };
                turn.push(Message::tool(&tool_call.id, result));
                self.notify(turn)?;
                break;
            }

            let tool_cancel = if tool.is_cancelable() {
                self.set_cancel_target(Some(CancelTarget::ToolCall(tool_call.id.to_string())))?;
                cancel.clone()
            } else {
                CancellationToken::new()
            };

            tracing::info!(name = %tool_call.function.name, id = %tool_call.id, "Running tool");
            let outcome = tool
                .execute(
                    &tool_call.function.arguments,
                    ToolContext {
                        images_as_user: images_need_user_role(model),
                        cancel: tool_cancel,
                    },
                )
                .await;
            if tool.is_cancelable() {
                self.set_cancel_target(None)?;
            }

            match outcome {
                Ok(outcome) => {
                    turn.push(Message::tool(&tool_call.id, &outcome.result));
                    for message in outcome.new_messages {
                        turn.push(message);
                    }
                }
                Err(err) => {
                    tracing::error!(error = ?err, name = %tool_call.function.name, "Tool failed");
                    let result = serde_json::to_string_pretty(&serde_json::json!({
                        "error": err.to_string(),
                    }))?;
                    turn.push(Message::tool(&tool_call.id, &result));
                }
            }
            self.notify(turn)?;
        }

        return Ok(());
    }
}
