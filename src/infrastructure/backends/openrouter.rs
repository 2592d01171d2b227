#[cfg(test)]
#[path = "openrouter_test.rs"]
mod tests;

use anyhow::bail;
use anyhow::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::Completion;
use crate::domain::models::CompletionGateway;
use crate::domain::models::CompletionRequest;
use crate::domain::models::CompletionResponse;
use crate::domain::services::canonical_json::cache_key;
use crate::infrastructure::cache::CompletionCache;

/// Where completion requests go. With a caller key they hit the provider
/// directly, otherwise the relay attaches its shared low cost key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Provider { url: String, key: String },
    Relay { url: String },
}

impl Route {
    pub fn from_config() -> Route {
        let key = Config::get(ConfigKey::OpenRouterKey);
        if !key.is_empty() {
            return Route::Provider {
                url: Config::get(ConfigKey::OpenRouterURL),
                key,
            };
        }

        return Route::Relay {
            url: Config::get(ConfigKey::ApiURL),
        };
    }

    pub fn has_caller_key(&self) -> bool {
        return matches!(self, Route::Provider { .. });
    }
}

pub struct OpenRouter {
    route: Route,
    cache: CompletionCache,
}

impl OpenRouter {
    pub fn new(route: Route, cache: CompletionCache) -> OpenRouter {
        return OpenRouter { route, cache };
    }

    async fn post(&self, request: &CompletionRequest) -> Result<CompletionResponse> {
        let builder = match &self.route {
            Route::Provider { url, key } => reqwest::Client::new()
                .post(format!("{url}/api/v1/chat/completions"))
                .header("Authorization", format!("Bearer {key}")),
            Route::Relay { url } => reqwest::Client::new().post(format!("{url}/api/completion")),
        };

        let res = builder.json(request).send().await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            tracing::error!(
                status = status.as_u16(),
                body = %body,
                "Failed to make completion request to OpenRouter"
            );
            bail!(format!("OpenRouter API error: {status}"));
        }

        let response = res.json::<CompletionResponse>().await?;
        return Ok(response);
    }
}

#[async_trait]
impl CompletionGateway for OpenRouter {
    #[allow(clippy::implicit_return)]
    async fn fetch_completion(
        &self,
        request: &CompletionRequest,
        cancel: &CancellationToken,
    ) -> Result<Completion> {
        let key = cache_key(request)?;
        if let Some(response) = self.cache.get(&key).await {
            tracing::debug!(key = %key, "Completion cache hit");
            return Ok(Completion {
                response,
                cache_hit: true,
            });
        }
        tracing::debug!(key = %key, relay = !self.route.has_caller_key(), "Completion cache miss");

        let response = tokio::select! {
            res = self.post(request) => res?,
            _ = cancel.cancelled() => bail!("Completion request was canceled"),
        };

        let choice = match response.choices.first() {
            Some(choice) => choice,
            None => {
                tracing::warn!(response = ?response, "No choices in response");
                bail!("No choices in response");
            }
        };

        if choice.message.is_empty() {
            tracing::warn!(choice = ?choice, "Got empty response, not caching it");
        } else {
            self.cache.put(&key, &response).await;
        }

        return Ok(Completion {
            response,
            cache_hit: false,
        });
    }
}
