#[cfg(test)]
#[path = "execute_python_code_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use serde_derive::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::models::Content;
use crate::domain::models::ContentPart;
use crate::domain::models::FunctionDescription;
use crate::domain::models::ImageUrl;
use crate::domain::models::Message;
use crate::domain::models::Tool;
use crate::domain::models::ToolContext;
use crate::domain::models::ToolOutcome;
use crate::infrastructure::kernels::KernelConnectivity;
use crate::infrastructure::kernels::OutputItem;
use crate::infrastructure::kernels::PythonSession;

pub const TOOL_NAME: &str = "execute_python_code";
pub const CANCELED: &str = "Execution was canceled.";
pub const NO_OUTPUT: &str = "[no output]";

#[derive(Debug, Deserialize)]
struct Params {
    code: String,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Runs model written Python in a Jupyter kernel and reports its output.
pub struct ExecutePythonCode {
    connectivity: KernelConnectivity,
}

impl ExecutePythonCode {
    pub fn new(connectivity: KernelConnectivity) -> ExecutePythonCode {
        return ExecutePythonCode { connectivity };
    }
}

/// Drives one execution to the end. Returns whether it was canceled. A cancel
/// that arrives after the work finished changes nothing.
async fn run(session: &PythonSession, code: &str, cancel: &CancellationToken) -> Result<bool> {
    let work = async {
        session.initiate().await?;
        if cancel.is_cancelled() {
            return Ok(true);
        }
        session.run_code(code).await?;
        session.wait_until_idle().await?;
        return Ok::<bool, anyhow::Error>(false);
    };
    tokio::pin!(work);

    let mut canceled = false;
    loop {
        tokio::select! {
            biased;
            res = &mut work => {
                match res {
                    Ok(skipped) => return Ok(canceled || skipped),
                    Err(err) if canceled => {
                        tracing::debug!(error = ?err, "Execution failed after cancel");
                        return Ok(true);
                    }
                    Err(err) => return Err(err),
                }
            }
            _ = cancel.cancelled(), if !canceled => {
                canceled = true;
                tracing::info!("Canceling Python execution");
                if let Err(err) = session.cancel_execution().await {
                    tracing::warn!(error = ?err, "Failed to interrupt kernel");
                }
            }
        }
    }
}

fn drain(rx: &mut mpsc::UnboundedReceiver<OutputItem>) -> Vec<OutputItem> {
    let mut items = vec![];
    while let Ok(item) = rx.try_recv() {
        items.push(item);
    }
    return items;
}

/// Text output becomes the tool result; images become one follow-up message.
fn reduce(items: &[OutputItem], images_as_user: bool) -> ToolOutcome {
    let text = items
        .iter()
        .filter_map(|item| return item.text())
        .collect::<Vec<&str>>()
        .join("\n");

    let images = items
        .iter()
        .filter_map(|item| match item {
            OutputItem::Image { format, data } => {
                return Some(ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: format!("data:image/{format};base64,{data}"),
                    },
                });
            }
            _ => return None,
        })
        .collect::<Vec<ContentPart>>();

    let mut new_messages = vec![];
    if !images.is_empty() {
        let content = Content::Parts(images);
        if images_as_user {
            new_messages.push(Message::User { content });
        } else {
            new_messages.push(Message::Assistant {
                content: Some(content),
                tool_calls: vec![],
            });
        }
    }

    let result = if text.is_empty() {
        NO_OUTPUT.to_string()
    } else {
        text
    };
    return ToolOutcome {
        result,
        new_messages,
    };
}

#[async_trait]
impl Tool for ExecutePythonCode {
    fn function(&self) -> FunctionDescription {
        return FunctionDescription {
            name: TOOL_NAME.to_string(),
            description: "Execute Python code to generate text and images. Returns the text output. Images are in the next message.".to_string(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "code": {
                        "type": "string",
                        "description": "The Python code to execute.",
                    },
                    "reasoning": {
                        "type": "string",
                        "description": "The reasoning behind the code execution.",
                    },
                },
                "required": ["code"],
            }),
        };
    }

    fn detailed_description(&self) -> String {
        return r#"Execute Python code that produces text and image output.

The Python code should be self-contained.

A description of the reason that you are executing the code should be provided in the "reasoning" field.

The code will be executed in a Jupyter kernel. The output will be returned as a string.
Any images produced will be returned in the next message.

Assume that relevant libraries are installed and available in the Python environment."#
            .to_string();
    }

    fn requires_permission(&self) -> bool {
        return true;
    }

    fn is_cancelable(&self) -> bool {
        return true;
    }

    #[allow(clippy::implicit_return)]
    async fn execute(&self, arguments: &str, context: ToolContext) -> Result<ToolOutcome> {
        let params = serde_json::from_str::<Params>(arguments)?;
        if !self.connectivity.available {
            bail!("Jupyter server is not available. Please configure a Jupyter server to use this tool.");
        }

        tracing::info!(
            reasoning = params.reasoning.as_deref().unwrap_or_default(),
            "Executing Python code"
        );
        let session = PythonSession::new(self.connectivity.clone());
        let mut output = session.subscribe();

        let res = run(&session, &params.code, &context.cancel).await;
        session.shutdown().await;
        let canceled = res?;

        if canceled {
            return Ok(ToolOutcome::text(CANCELED));
        }

        let items = drain(&mut output);
        tracing::info!(items = items.len(), "Python execution finished");
        return Ok(reduce(&items, context.images_as_user));
    }
}
