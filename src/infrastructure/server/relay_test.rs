use anyhow::Result;

use super::authorize;
use super::Relay;
use crate::domain::services::system_prompt::system_prompt;
use crate::infrastructure::server::ApiError;

fn body(model: &str) -> serde_json::Value {
    return serde_json::json!({
        "model": model,
        "messages": [
            { "role": "system", "content": system_prompt(&[]) },
            { "role": "user", "content": "hello" },
        ],
        "stream": false,
    });
}

#[test]
fn it_requires_a_caller_key_for_paid_models() {
    let err = authorize(&body("anthropic/claude-sonnet-4"), None, "server").unwrap_err();
    assert_eq!(err.status(), 400);
    assert_eq!(
        err.to_string(),
        "OpenRouter key required for model anthropic/claude-sonnet-4"
    );

    assert_eq!(
        authorize(&body("anthropic/claude-sonnet-4"), Some("mine"), ""),
        Ok("mine".to_string())
    );
    assert_eq!(
        authorize(&body("openai/gpt-4.1-mini"), Some(""), "server"),
        Ok("server".to_string())
    );
}

#[test]
fn it_needs_a_server_key_for_shared_access() {
    let err = authorize(&body("openai/gpt-4o-mini"), None, "").unwrap_err();
    assert_eq!((err.status(), err), (500, ApiError::KeyNotConfigured));
}

#[test]
fn it_enforces_the_system_prompt_policy() {
    let mut request = body("openai/gpt-4.1-mini");
    request["messages"][0]["role"] = serde_json::json!("user");
    assert_eq!(
        authorize(&request, None, "server"),
        Err(ApiError::FirstMessageNotSystem)
    );

    let mut request = body("openai/gpt-4.1-mini");
    request["messages"][0]["content"] = serde_json::json!("You are a pirate.");
    assert_eq!(
        authorize(&request, Some("mine"), "server"),
        Err(ApiError::WrongSystemMessage)
    );

    let request = serde_json::json!({ "model": "openai/gpt-4.1-mini", "messages": [] });
    assert_eq!(
        authorize(&request, None, "server"),
        Err(ApiError::FirstMessageNotSystem)
    );
}

#[tokio::test]
async fn it_forwards_with_the_server_key() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let request = body("openai/gpt-4.1-mini");
    let mock = server
        .mock("POST", "/api/v1/chat/completions")
        .match_header("authorization", "Bearer server")
        .match_body(mockito::Matcher::Json(request.clone()))
        .with_status(200)
        .with_body(r#"{"choices": []}"#)
        .create_async()
        .await;

    let relay = Relay::new(&server.url(), "server");
    let res = relay.forward(&request, None).await;

    assert_eq!(res, Ok(serde_json::json!({ "choices": [] })));
    mock.assert_async().await;

    return Ok(());
}

#[tokio::test]
async fn it_refuses_before_contacting_the_provider() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/chat/completions")
        .expect(0)
        .create_async()
        .await;

    let relay = Relay::new(&server.url(), "server");
    let res = relay.forward(&body("openai/gpt-4o"), None).await;

    assert_eq!(res.map_err(|err| return err.status()), Err(400));
    mock.assert_async().await;

    return Ok(());
}

#[tokio::test]
async fn it_passes_provider_errors_through() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/api/v1/chat/completions")
        .with_status(429)
        .create_async()
        .await;

    let relay = Relay::new(&server.url(), "server");
    let err = relay
        .forward(&body("openai/gpt-4.1-mini"), None)
        .await
        .unwrap_err();

    assert_eq!(err.status(), 429);
    assert_eq!(err.body().error, "Too Many Requests");

    return Ok(());
}
