/// A 1x1 transparent PNG, base64 encoded the way kernels publish images.
pub const PNG_1X1_BASE64: &str =
    "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAQAAAC1HAwCAAAAC0lEQVR42mNkYAAAAAYAAjCB0C8AAAAASUVORK5CYII=";

/// A stored chat as the chat API serves it: a tool call round with an image
/// follow-up, then a plain answer.
pub fn stored_chat_fixture() -> &'static str {
    return r#"{
  "chatId": "a9993e364706816aba3e25717850c26c9cd0d89d",
  "messages": [
    { "role": "user", "content": "Plot a sine wave" },
    {
      "role": "assistant",
      "content": null,
      "tool_calls": [
        {
          "id": "call_1",
          "type": "function",
          "function": {
            "name": "execute_python_code",
            "arguments": "{\"code\": \"import matplotlib.pyplot as plt\\nplt.plot([0, 1])\\nplt.show()\"}"
          }
        }
      ]
    },
    { "role": "tool", "content": "[no output]", "tool_call_id": "call_1" },
    {
      "role": "user",
      "content": [
        { "type": "image_url", "image_url": { "url": "data:image/png;base64,iVBORw0KGgo=" } }
      ]
    },
    { "role": "assistant", "content": "Here is the plot." }
  ],
  "promptTokens": 1200,
  "completionTokens": 85,
  "estimatedCost": 0.000616,
  "messageMetadata": [
    { "model": "openai/gpt-4.1-mini", "timestamp": 1718000000000 },
    { "model": "openai/gpt-4.1-mini", "timestamp": 1718000001000 },
    { "model": "openai/gpt-4.1-mini", "timestamp": 1718000002000 },
    { "model": "openai/gpt-4.1-mini", "timestamp": 1718000002000 },
    { "model": "openai/gpt-4.1-mini", "timestamp": 1718000003000 }
  ],
  "timestampCreated": 1718000000000,
  "timestampUpdated": 1718000003000,
  "finalized": false
}"#;
}
