#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use serde_derive::Deserialize;
use serde_derive::Serialize;

pub const NO_CONTENT: &str = "[NO CONTENT]";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageUrl {
    pub url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { image_url: ImageUrl },
}

impl ContentPart {
    pub fn png(base64_data: &str) -> ContentPart {
        return ContentPart::ImageUrl {
            image_url: ImageUrl {
                url: format!("data:image/png;base64,{base64_data}"),
            },
        };
    }
}

/// Message content is either a plain string or an ordered list of typed parts.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Content {
    pub fn contains(&self, needle: &str) -> bool {
        match self {
            Content::Text(text) => return text.contains(needle),
            Content::Parts(parts) => {
                return parts.iter().any(|part| {
                    match part {
                        ContentPart::Text { text } => return text.contains(needle),
                        ContentPart::ImageUrl { image_url } => return image_url.url.contains(needle),
                    }
                });
            }
        }
    }

    /// Text of the content with image parts left out.
    pub fn text(&self) -> String {
        match self {
            Content::Text(text) => return text.to_string(),
            Content::Parts(parts) => {
                return parts
                    .iter()
                    .filter_map(|part| {
                        if let ContentPart::Text { text } = part {
                            return Some(text.to_string());
                        }
                        return None;
                    })
                    .collect::<Vec<String>>()
                    .join("\n");
            }
        }
    }

    pub fn images(&self) -> Vec<&ImageUrl> {
        match self {
            Content::Text(_) => return vec![],
            Content::Parts(parts) => {
                return parts
                    .iter()
                    .filter_map(|part| {
                        if let ContentPart::ImageUrl { image_url } = part {
                            return Some(image_url);
                        }
                        return None;
                    })
                    .collect();
            }
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    /// JSON encoded arguments, validated by the tool that receives them.
    pub arguments: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type", default = "function_type")]
    pub call_type: String,
    pub function: FunctionCall,
}

fn function_type() -> String {
    return "function".to_string();
}

impl ToolCall {
    pub fn new(id: &str, name: &str, arguments: &str) -> ToolCall {
        return ToolCall {
            id: id.to_string(),
            call_type: function_type(),
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        };
    }
}

/// One turn of a transcript, tagged by role the same way the chat completions
/// wire format is.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: Content,
    },
    Assistant {
        #[serde(default)]
        content: Option<Content>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tool_calls: Vec<ToolCall>,
    },
    Tool {
        content: String,
        tool_call_id: String,
    },
}

impl Message {
    pub fn system(text: &str) -> Message {
        return Message::System {
            content: text.to_string(),
        };
    }

    pub fn user(text: &str) -> Message {
        return Message::User {
            content: Content::Text(text.to_string()),
        };
    }

    pub fn assistant(text: &str) -> Message {
        return Message::Assistant {
            content: Some(Content::Text(text.to_string())),
            tool_calls: vec![],
        };
    }

    pub fn assistant_tool_calls(tool_calls: Vec<ToolCall>) -> Message {
        return Message::Assistant {
            content: None,
            tool_calls,
        };
    }

    pub fn tool(tool_call_id: &str, result: &str) -> Message {
        return Message::Tool {
            content: result.to_string(),
            tool_call_id: tool_call_id.to_string(),
        };
    }

    pub fn role(&self) -> &'static str {
        match self {
            Message::System { .. } => return "system",
            Message::User { .. } => return "user",
            Message::Assistant { .. } => return "assistant",
            Message::Tool { .. } => return "tool",
        }
    }

    pub fn is_assistant(&self) -> bool {
        return matches!(self, Message::Assistant { .. });
    }

    pub fn is_user(&self) -> bool {
        return matches!(self, Message::User { .. });
    }

    pub fn tool_calls(&self) -> &[ToolCall] {
        if let Message::Assistant { tool_calls, .. } = self {
            return tool_calls;
        }

        return &[];
    }

    /// Image parts of user or assistant content.
    pub fn images(&self) -> Vec<&ImageUrl> {
        match self {
            Message::User { content } => return content.images(),
            Message::Assistant {
                content: Some(content),
                ..
            } => return content.images(),
            _ => return vec![],
        }
    }

    /// Displayable text of the message, empty when there is none.
    pub fn text(&self) -> String {
        match self {
            Message::System { content } => return content.to_string(),
            Message::User { content } => return content.text(),
            Message::Assistant { content, .. } => {
                return content
                    .as_ref()
                    .map(|c| return c.text())
                    .unwrap_or_default();
            }
            Message::Tool { content, .. } => return content.to_string(),
        }
    }

    pub fn contains(&self, needle: &str) -> bool {
        match self {
            Message::System { content } => return content.contains(needle),
            Message::User { content } => return content.contains(needle),
            Message::Assistant { content, .. } => {
                return content
                    .as_ref()
                    .map(|c| return c.contains(needle))
                    .unwrap_or(false);
            }
            Message::Tool { content, .. } => return content.contains(needle),
        }
    }
}
