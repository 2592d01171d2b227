#[cfg(test)]
#[path = "relay_test.rs"]
mod tests;

use super::ApiError;
use crate::domain::models::is_low_cost_model;
use crate::domain::services::system_prompt::POLICY_PHRASE;

/// Header a caller passes its own provider key in.
pub const CALLER_KEY_HEADER: &str = "x-openrouter-key";

/// Forwards completion requests to the provider. Without a caller key only
/// low cost models go through, paid with the relay's own key. Either way the
/// conversation must open with the system prompt carrying the usage policy.
pub struct Relay {
    upstream_url: String,
    server_key: String,
    client: reqwest::Client,
}

/// Picks the key a request is forwarded with, or the reason it is refused
/// before the provider is contacted.
pub fn authorize(
    body: &serde_json::Value,
    caller_key: Option<&str>,
    server_key: &str,
) -> Result<String, ApiError> {
    let caller_key = caller_key.filter(|key| return !key.is_empty());
    let model = body
        .get("model")
        .and_then(|model| return model.as_str())
        .unwrap_or_default();

    if caller_key.is_none() && !is_low_cost_model(model) {
        return Err(ApiError::KeyRequired(model.to_string()));
    }

    let key = match caller_key {
        Some(key) => key.to_string(),
        None if !server_key.is_empty() => server_key.to_string(),
        None => return Err(ApiError::KeyNotConfigured),
    };

    let first = body
        .get("messages")
        .and_then(|messages| return messages.as_array())
        .and_then(|messages| return messages.first());
    let first = match first {
        Some(first) if first.get("role").and_then(|r| return r.as_str()) == Some("system") => {
            first
        }
        _ => return Err(ApiError::FirstMessageNotSystem),
    };
    let content = first
        .get("content")
        .and_then(|content| return content.as_str())
        .unwrap_or_default();
    if !content.contains(POLICY_PHRASE) {
        return Err(ApiError::WrongSystemMessage);
    }

    return Ok(key);
}

impl Relay {
    pub fn new(upstream_url: &str, server_key: &str) -> Relay {
        return Relay {
            upstream_url: upstream_url.trim_end_matches('/').to_string(),
            server_key: server_key.to_string(),
            client: reqwest::Client::new(),
        };
    }

    /// Forwards the request unchanged and returns the provider's response
    /// body. Provider failures keep their status.
    pub async fn forward(
        &self,
        body: &serde_json::Value,
        caller_key: Option<&str>,
    ) -> Result<serde_json::Value, ApiError> {
        let key = authorize(body, caller_key, &self.server_key).map_err(|err| {
            tracing::warn!(error = %err, "Refused completion request");
            return err;
        })?;

        let res = self
            .client
            .post(format!("{}/api/v1/chat/completions", self.upstream_url))
            .header("Authorization", format!("Bearer {key}"))
            .json(body)
            .send()
            .await
            .map_err(|err| return ApiError::internal(err.into()))?;

        let status = res.status();
        if !status.is_success() {
            tracing::error!(status = status.as_u16(), "Provider rejected completion request");
            return Err(ApiError::Upstream {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Upstream error").to_string(),
            });
        }

        return res
            .json::<serde_json::Value>()
            .await
            .map_err(|err| return ApiError::internal(err.into()));
    }
}
