use serde_derive::Deserialize;
use serde_derive::Serialize;

use super::Message;
use super::ToolCall;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDescription {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionDescription,
}

impl ToolDefinition {
    pub fn function(function: FunctionDescription) -> ToolDefinition {
        return ToolDefinition {
            tool_type: "function".to_string(),
            function,
        };
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

impl ResponseMessage {
    pub fn is_empty(&self) -> bool {
        let no_content = self
            .content
            .as_ref()
            .map(|c| return c.is_empty())
            .unwrap_or(true);

        return no_content && self.tool_calls.is_none();
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub message: ResponseMessage,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

/// A provider response along with where it came from. Cached responses carry
/// their original usage block but must not be billed again.
#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub response: CompletionResponse,
    pub cache_hit: bool,
}

impl Completion {
    pub fn billed_usage(&self) -> Usage {
        if self.cache_hit {
            return Usage::default();
        }

        return self.response.usage.unwrap_or_default();
    }
}

/// Billed tokens and estimated USD cost, summed over every completion a turn
/// needed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub cost: f64,
}

impl std::ops::Add for ChatUsage {
    type Output = ChatUsage;

    fn add(self, other: ChatUsage) -> ChatUsage {
        return ChatUsage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            cost: self.cost + other.cost,
        };
    }
}
