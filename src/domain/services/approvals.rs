#[cfg(test)]
#[path = "approvals_test.rs"]
mod tests;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use anyhow::anyhow;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::domain::models::Event;
use crate::domain::models::ToolCall;

#[async_trait]
pub trait PermissionGate {
    /// Resolves to whether the user allows `tool_call` to run. Cancellation
    /// counts as a denial.
    async fn request_permission(&self, tool_call: &ToolCall, cancel: &CancellationToken) -> bool;
}

/// Pending approval decisions keyed by tool call id. The orchestration worker
/// waits on a request while the UI answers it through `resolve`.
#[derive(Clone)]
pub struct ToolApprovals {
    pending: Arc<Mutex<HashMap<String, oneshot::Sender<bool>>>>,
    tx: mpsc::UnboundedSender<Event>,
}

impl ToolApprovals {
    pub fn new(tx: mpsc::UnboundedSender<Event>) -> ToolApprovals {
        return ToolApprovals {
            pending: Arc::new(Mutex::new(HashMap::new())),
            tx,
        };
    }

    /// Answers the request for `tool_call_id`. Errors when no such request is
    /// waiting, which includes requests that were already answered.
    pub fn resolve(&self, tool_call_id: &str, approved: bool) -> Result<()> {
        let sender = self
            .pending
            .lock()
            .map_err(|_| return anyhow!("Tool approvals lock poisoned"))?
            .remove(tool_call_id);

        match sender {
            Some(sender) => {
                if sender.send(approved).is_err() {
                    tracing::debug!(tool_call_id, "Approval arrived after the request was dropped");
                }
                return Ok(());
            }
            None => {
                return Err(anyhow!("No approval pending for tool call {tool_call_id}"));
            }
        }
    }

    fn forget(&self, tool_call_id: &str) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(tool_call_id);
        }
    }
}

#[async_trait]
impl PermissionGate for ToolApprovals {
    #[allow(clippy::implicit_return)]
    async fn request_permission(&self, tool_call: &ToolCall, cancel: &CancellationToken) -> bool {
        let (sender, receiver) = oneshot::channel();
        match self.pending.lock() {
            Ok(mut pending) => {
                pending.insert(tool_call.id.to_string(), sender);
            }
            Err(err) => {
                tracing::error!(error = ?err, "Tool approvals lock poisoned");
                return false;
            }
        }

        if self
            .tx
            .send(Event::ToolApprovalRequested(tool_call.clone()))
            .is_err()
        {
            tracing::warn!(tool_call_id = %tool_call.id, "Nobody is listening for approvals");
            self.forget(&tool_call.id);
            return false;
        }

        let approved = tokio::select! {
            decision = receiver => decision.unwrap_or(false),
            _ = cancel.cancelled() => false,
        };
        self.forget(&tool_call.id);

        tracing::debug!(tool_call_id = %tool_call.id, approved, "Tool approval resolved");
        return approved;
    }
}
