use std::time::Duration;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use super::OpenRouter;
use super::Route;
use crate::domain::models::Choice;
use crate::domain::models::CompletionGateway;
use crate::domain::models::CompletionRequest;
use crate::domain::models::CompletionResponse;
use crate::domain::models::Message;
use crate::domain::models::ResponseMessage;
use crate::domain::models::Usage;
use crate::infrastructure::cache::CompletionCache;

fn request(text: &str) -> CompletionRequest {
    return CompletionRequest {
        model: "openai/gpt-4.1-mini".to_string(),
        messages: vec![Message::system("be helpful"), Message::user(text)],
        stream: false,
        tools: vec![],
    };
}

fn response_body(content: Option<&str>) -> Result<String> {
    let response = CompletionResponse {
        id: Some("gen-1".to_string()),
        model: Some("openai/gpt-4.1-mini".to_string()),
        choices: vec![Choice {
            finish_reason: Some("stop".to_string()),
            message: ResponseMessage {
                role: Some("assistant".to_string()),
                content: content.map(|c| return c.to_string()),
                tool_calls: None,
            },
        }],
        usage: Some(Usage {
            prompt_tokens: 20,
            completion_tokens: 5,
        }),
    };

    return Ok(serde_json::to_string(&response)?);
}

fn gateway(route: Route, dir: &tempfile::TempDir) -> OpenRouter {
    return OpenRouter::new(route, CompletionCache::new(dir.path().to_path_buf()));
}

#[tokio::test]
async fn it_calls_provider_with_caller_key() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/v1/chat/completions")
        .match_header("Authorization", "Bearer sk-or-abc")
        .with_status(200)
        .with_body(response_body(Some("hello"))?)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let backend = gateway(
        Route::Provider {
            url: server.url(),
            key: "sk-or-abc".to_string(),
        },
        &dir,
    );
    let completion = backend
        .fetch_completion(&request("hi"), &CancellationToken::new())
        .await?;
    mock.assert_async().await;

    assert!(!completion.cache_hit);
    assert_eq!(
        completion.response.choices[0].message.content,
        Some("hello".to_string())
    );

    return Ok(());
}

#[tokio::test]
async fn it_serves_repeats_from_cache() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/completion")
        .with_status(200)
        .with_body(response_body(Some("hello"))?)
        .expect(1)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let backend = gateway(Route::Relay { url: server.url() }, &dir);
    let cancel = CancellationToken::new();

    let first = backend.fetch_completion(&request("hi"), &cancel).await?;
    let second = backend.fetch_completion(&request("hi"), &cancel).await?;
    mock.assert_async().await;

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(second.response, first.response);
    assert_eq!(second.billed_usage(), Usage::default());
    assert_eq!(first.billed_usage().prompt_tokens, 20);

    return Ok(());
}

#[tokio::test]
async fn it_does_not_cache_empty_responses() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/completion")
        .with_status(200)
        .with_body(response_body(None)?)
        .expect(2)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let backend = gateway(Route::Relay { url: server.url() }, &dir);
    let cancel = CancellationToken::new();

    let first = backend.fetch_completion(&request("hi"), &cancel).await?;
    let second = backend.fetch_completion(&request("hi"), &cancel).await?;
    mock.assert_async().await;

    assert!(!first.cache_hit);
    assert!(!second.cache_hit);

    return Ok(());
}

#[tokio::test]
async fn it_fails_without_choices() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/completion")
        .with_status(200)
        .with_body(r#"{"id": "gen-1", "choices": []}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let backend = gateway(Route::Relay { url: server.url() }, &dir);
    let res = backend
        .fetch_completion(&request("hi"), &CancellationToken::new())
        .await;
    mock.assert_async().await;

    assert_eq!(res.unwrap_err().to_string(), "No choices in response");

    return Ok(());
}

#[tokio::test]
async fn it_surfaces_error_statuses() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/api/completion")
        .with_status(400)
        .with_body(r#"{"error": "First message must be a system message"}"#)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let backend = gateway(Route::Relay { url: server.url() }, &dir);
    let res = backend
        .fetch_completion(&request("hi"), &CancellationToken::new())
        .await;
    mock.assert_async().await;

    insta::assert_snapshot!(res.unwrap_err().to_string(), @"OpenRouter API error: 400 Bad Request");

    return Ok(());
}

#[tokio::test]
async fn it_aborts_when_canceled() -> Result<()> {
    // Nothing listens here, so only cancellation can end the request quickly.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let url = format!("http://{}", listener.local_addr()?);

    let dir = tempfile::tempdir()?;
    let backend = gateway(Route::Relay { url }, &dir);
    let cancel = CancellationToken::new();

    let canceler = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceler.cancel();
    });

    let res = tokio::time::timeout(
        Duration::from_secs(5),
        backend.fetch_completion(&request("hi"), &cancel),
    )
    .await?;

    assert_eq!(
        res.unwrap_err().to_string(),
        "Completion request was canceled"
    );

    return Ok(());
}
