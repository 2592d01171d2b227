use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::Completion;
use super::CompletionRequest;

pub type GatewayBox = Box<dyn CompletionGateway + Send + Sync>;

#[async_trait]
pub trait CompletionGateway {
    /// Requests a single non-streaming completion. Implementations consult the
    /// local response cache before touching the network, and race the network
    /// call against `cancel`.
    ///
    /// Transport failures, non-success statuses, and responses without choices
    /// are errors. Nothing is retried.
    async fn fetch_completion(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion>;
}
