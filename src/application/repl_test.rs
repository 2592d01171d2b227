use anyhow::bail;
use anyhow::Result;
use tokio::sync::mpsc;

use super::check_model;
use super::model_list;
use super::render_message;
use super::resolve_model;
use super::save_images;
use super::Repl;
use crate::domain::models::chat_id_for_key;
use crate::domain::models::Action;
use crate::domain::models::ChatUsage;
use crate::domain::models::Content;
use crate::domain::models::ContentPart;
use crate::domain::models::Event;
use crate::domain::models::Message;
use crate::domain::models::ToolCall;
use crate::domain::models::DEFAULT_MODEL;
use crate::infrastructure::persistence::ChatKeyStore;
use crate::infrastructure::persistence::ChatsApi;

fn repl(url: &str, dir: &tempfile::TempDir) -> (Repl, mpsc::UnboundedReceiver<Action>) {
    let (tx, rx) = mpsc::unbounded_channel::<Action>();
    let repl = Repl::new(
        tx,
        ChatsApi::new(url, "pw"),
        ChatKeyStore::new(dir.path().join("chat-keys.json")),
        dir.path().join("images"),
        false,
    );
    return (repl, rx);
}

#[test]
fn it_gates_models_without_a_caller_key() {
    assert!(check_model("openai/gpt-4o-mini", false).is_ok());
    assert!(check_model("anthropic/claude-sonnet-4", true).is_ok());

    let err = check_model("anthropic/claude-sonnet-4", false).unwrap_err();
    assert!(err
        .to_string()
        .starts_with("Model anthropic/claude-sonnet-4 requires your own OpenRouter key."));
}

#[test]
fn it_resolves_models_by_name_or_index() {
    assert_eq!(resolve_model("0"), "google/gemini-2.5-flash-preview");
    assert_eq!(resolve_model("openai/gpt-4o"), "openai/gpt-4o");
    assert_eq!(resolve_model("999"), "999");

    let list = model_list(DEFAULT_MODEL);
    assert!(list.starts_with("0. google/gemini-2.5-flash-preview"));
    assert!(list.contains(&format!("{DEFAULT_MODEL} ")));
    assert!(list.contains("<- current"));
}

#[test]
fn it_renders_tool_calls_and_images() {
    let call = Message::assistant_tool_calls(vec![ToolCall::new(
        "call_1",
        "execute_python_code",
        r#"{"code": "print(1 + 1)"}"#,
    )]);
    insta::assert_snapshot!(render_message(3, &call), @r###"
    [3] assistant:
    -> execute_python_code (call_1)
    print(1 + 1)
    "###);

    let image = Message::User {
        content: Content::Parts(vec![
            ContentPart::Text {
                text: "Here are the images".to_string(),
            },
            ContentPart::png("aW1n"),
        ]),
    };
    insta::assert_snapshot!(render_message(4, &image), @r###"
    [4] user:
    Here are the images
    (1 image(s))
    "###);
}

#[tokio::test]
async fn it_writes_images_to_files() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let message = Message::User {
        content: Content::Parts(vec![ContentPart::png(test_utils::PNG_1X1_BASE64)]),
    };

    let paths = save_images(&message.images(), dir.path(), "abc-2").await?;

    assert_eq!(paths, vec![dir.path().join("abc-2-0.png")]);
    let bytes = tokio::fs::read(&paths[0]).await?;
    assert_eq!(&bytes[..4], &[0x89, b'P', b'N', b'G']);

    return Ok(());
}

#[tokio::test]
async fn it_runs_a_turn_and_saves_the_chat() -> Result<()> {
    let mut server = mockito::Server::new_async().await;
    let save = server
        .mock("POST", "/api/save_chat")
        .with_status(200)
        .with_body(
            serde_json::json!({ "signedUrl": format!("{}/upload/chat.json", server.url()) })
                .to_string(),
        )
        .create_async()
        .await;
    let upload = server
        .mock("PUT", "/upload/chat.json")
        .with_status(200)
        .create_async()
        .await;

    let dir = tempfile::tempdir()?;
    let (mut repl, mut rx) = repl(&server.url(), &dir);

    assert!(repl.handle_input("plot a sine wave").await?);
    match rx.recv().await {
        Some(Action::SendMessage { transcript, model }) => {
            assert_eq!(transcript, vec![Message::user("plot a sine wave")]);
            assert_eq!(model, DEFAULT_MODEL);
        }
        _ => bail!("Expected a message to be sent"),
    }
    assert!(repl.is_turn_in_flight());

    repl.handle_event(Event::PendingMessages {
        pending: vec![Message::user("plot a sine wave")],
        new_messages: vec![],
    })
    .await?;
    assert!(repl.state.pending_messages.is_some());

    repl.handle_event(Event::TurnFinished {
        new_messages: vec![Message::assistant("Done.")],
        usage: Some(ChatUsage {
            prompt_tokens: 10,
            completion_tokens: 5,
            cost: 0.25,
        }),
    })
    .await?;

    assert!(!repl.is_turn_in_flight());
    assert_eq!(repl.state.pending_messages, None);
    assert_eq!(repl.state.chat.messages.len(), 2);
    assert_eq!(repl.state.chat.message_metadata.len(), 2);
    assert_eq!(repl.state.chat.estimated_cost, 0.25);

    let chat_key = repl.state.chat_key.clone().unwrap();
    assert_eq!(repl.state.chat.chat_id, chat_id_for_key(&chat_key));
    let stored = ChatKeyStore::new(dir.path().join("chat-keys.json"))
        .load(&repl.state.chat.chat_id)
        .await;
    assert_eq!(stored.map(|info| return info.chat_key), Some(chat_key));

    save.assert_async().await;
    upload.assert_async().await;

    return Ok(());
}

#[tokio::test]
async fn it_handles_chat_commands() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let (mut repl, mut rx) = repl("http://localhost:1", &dir);

    repl.handle_input("/model anthropic/claude-sonnet-4").await?;
    assert_eq!(repl.state.current_model, DEFAULT_MODEL);

    repl.handle_input("/model 0").await?;
    assert_eq!(repl.state.current_model, "google/gemini-2.5-flash-preview");

    repl.state.chat.messages = vec![Message::user("a"), Message::assistant("b")];
    repl.state.chat.message_metadata = vec![
        crate::domain::models::MessageMetadata::now(DEFAULT_MODEL),
        crate::domain::models::MessageMetadata::now(DEFAULT_MODEL),
    ];
    repl.handle_input("/delete 1").await?;
    assert_eq!(repl.state.chat.messages, vec![Message::user("a")]);

    repl.state.chat.finalized = true;
    repl.handle_input("more please").await?;
    assert!(rx.try_recv().is_err());

    repl.handle_input("/fork").await?;
    assert!(!repl.state.chat.finalized);
    assert!(repl.state.chat_key.is_some());
    assert_eq!(repl.state.chat.messages.len(), 1);

    repl.handle_input("/clear").await?;
    assert!(repl.state.chat.messages.is_empty());
    assert_eq!(repl.state.chat_key, None);
    assert_eq!(repl.state.current_model, "google/gemini-2.5-flash-preview");

    repl.cancel()?;
    assert!(rx.try_recv().is_err());

    assert!(!repl.handle_input("/quit").await?);

    return Ok(());
}
