#[cfg(test)]
#[path = "actions_test.rs"]
mod tests;

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::approvals::ToolApprovals;
use super::orchestrator::Orchestrator;
use crate::domain::models::Action;
use crate::domain::models::Event;
use crate::domain::models::Message;

pub fn help_text() -> String {
    let text = r#"
COMMANDS:
- /modellist (/ml) - Lists the available models with their prices per million tokens.
- /model (/m) [MODEL_NAME,MODEL_INDEX] - Sets the model for the next message. You can pass either the model name, or the index from /modellist. Models outside the low cost tier need an OpenRouter key.
- /delete (/d) [MESSAGE_INDEX] - Deletes the message at MESSAGE_INDEX and everything after it.
- /fork - Continues this conversation as a new chat with its own key.
- /finalize - Marks the chat as final and saves it. Final chats can no longer be changed or deleted.
- /clear - Starts a new chat with the current model.
- /cost - Shows the tokens used and estimated cost of this chat.
- /quit /exit (/q) - Exit.
- /help (/h) - Provides this help menu.

HOTKEYS:
- CTRL+C - Cancel the completion request or code execution in progress.

CODE EXECUTION:
The model may ask to run Python in a Jupyter kernel. You will be asked to approve every execution. Text output is returned to the model, and plots are saved as PNG files whose paths are printed in the transcript.
        "#;

    return text.trim().to_string();
}

fn worker_error(err: &anyhow::Error) -> Message {
    return Message::system(&format!(
        "The turn failed with the following error: {err:?}"
    ));
}

pub struct ActionsService {}

impl ActionsService {
    /// Serves UI actions until the action channel closes. Each message runs
    /// as its own worker task with a fresh cancellation token, so a cancel
    /// only ever reaches the turn in flight.
    pub async fn start(
        orchestrator: Arc<Orchestrator>,
        approvals: ToolApprovals,
        tx: mpsc::UnboundedSender<Event>,
        rx: &mut mpsc::UnboundedReceiver<Action>,
    ) -> Result<()> {
        let mut cancel = CancellationToken::new();

        while let Some(action) = rx.recv().await {
            match action {
                Action::Cancel() => {
                    tracing::info!("Cancel requested");
                    cancel.cancel();
                }
                Action::ResolveToolApproval {
                    tool_call_id,
                    approved,
                } => {
                    if let Err(err) = approvals.resolve(&tool_call_id, approved) {
                        tracing::warn!(error = ?err, "Dropping tool approval");
                    }
                }
                Action::SendMessage { transcript, model } => {
                    cancel = CancellationToken::new();

                    let worker_cancel = cancel.clone();
                    let worker_orchestrator = orchestrator.clone();
                    let worker_tx = tx.clone();
                    tokio::spawn(async move {
                        let res = worker_orchestrator
                            .send_chat_message(transcript, &model, &worker_cancel)
                            .await;

                        let event = match res {
                            Ok(outcome) => Event::TurnFinished {
                                new_messages: outcome.new_messages,
                                usage: outcome.usage,
                            },
                            Err(err) => {
                                tracing::error!(error = ?err, "Turn failed");
                                Event::TurnFinished {
                                    new_messages: vec![worker_error(&err)],
                                    usage: None,
                                }
                            }
                        };
                        worker_tx.send(event)?;

                        return anyhow::Ok(());
                    });
                }
            }
        }

        return Ok(());
    }
}
