#[cfg(test)]
#[path = "repl_test.rs"]
mod tests;

use std::io::Write;
use std::path;

use anyhow::bail;
use anyhow::Result;
use base64::engine::general_purpose;
use base64::Engine;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Confirm;
use owo_colors::OwoColorize;
use tokio::fs;
use tokio::io::AsyncBufReadExt;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::find_model;
use crate::domain::models::is_low_cost_model;
use crate::domain::models::Action;
use crate::domain::models::CancelTarget;
use crate::domain::models::ChatAction;
use crate::domain::models::ChatKeyInfo;
use crate::domain::models::ChatUsage;
use crate::domain::models::Event;
use crate::domain::models::ImageUrl;
use crate::domain::models::Message;
use crate::domain::models::MessageMetadata;
use crate::domain::models::SlashCommand;
use crate::domain::models::ToolCall;
use crate::domain::models::AVAILABLE_MODELS;
use crate::domain::models::DEFAULT_MODEL;
use crate::domain::models::MAX_CHAT_COST;
use crate::domain::services::actions::help_text;
use crate::domain::services::reduce;
use crate::domain::services::ChatState;
use crate::infrastructure::persistence::ChatKeyStore;
use crate::infrastructure::persistence::ChatsApi;

/// Refuses models outside the low cost tier unless the user brings a key.
pub fn check_model(model: &str, has_caller_key: bool) -> Result<()> {
    if !has_caller_key && !is_low_cost_model(model) {
        bail!(format!(
            "Model {model} requires your own OpenRouter key. Set openrouter-key in the config file or KERNELCHAT_OPENROUTER_KEY to use it."
        ));
    }

    return Ok(());
}

/// Resolves `/model` arguments given either as a model name or as an index
/// into `/modellist`.
pub fn resolve_model(arg: &str) -> String {
    if let Ok(idx) = arg.parse::<usize>() {
        if let Some(model) = AVAILABLE_MODELS.get(idx) {
            return model.model.to_string();
        }
    }

    return arg.to_string();
}

pub fn model_list(current_model: &str) -> String {
    return AVAILABLE_MODELS
        .iter()
        .enumerate()
        .map(|(idx, model)| {
            let mut line = format!(
                "{idx}. {} (${:.2} / ${:.2} per million tokens)",
                model.model, model.prompt_rate, model.completion_rate
            );
            if model.low_cost {
                line = format!("{line}, no key needed");
            }
            if model.model == current_model {
                line = format!("{line} <- current");
            }
            return line;
        })
        .collect::<Vec<String>>()
        .join("\n");
}

/// Plain text rendering of one transcript entry.
pub fn render_message(idx: usize, message: &Message) -> String {
    let mut lines = vec![format!("[{idx}] {}:", message.role())];

    let text = message.text();
    if !text.is_empty() {
        lines.push(text);
    }

    for tool_call in message.tool_calls() {
        lines.push(format!("-> {} ({})", tool_call.function.name, tool_call.id));
        lines.push(tool_call_code(tool_call));
    }

    let images = message.images().len();
    if images > 0 {
        lines.push(format!("({images} image(s))"));
    }

    return lines.join("\n");
}

/// The code a tool call wants to run, or its raw arguments when they carry
/// no code.
pub fn tool_call_code(tool_call: &ToolCall) -> String {
    return serde_json::from_str::<serde_json::Value>(&tool_call.function.arguments)
        .ok()
        .and_then(|args| {
            return args
                .get("code")
                .and_then(|code| return code.as_str())
                .map(|code| return code.to_string());
        })
        .unwrap_or_else(|| return tool_call.function.arguments.to_string());
}

/// Writes `data:image/...;base64,` urls to `dir`, returning the new paths.
pub async fn save_images(
    images: &[&ImageUrl],
    dir: &path::Path,
    prefix: &str,
) -> Result<Vec<path::PathBuf>> {
    let mut paths = vec![];
    for (idx, image) in images.iter().enumerate() {
        let (header, data) = match image.url.split_once(";base64,") {
            Some(parts) => parts,
            None => {
                tracing::warn!(prefix, "Skipping image that is not base64 encoded");
                continue;
            }
        };
        let extension = header.strip_prefix("data:image/").unwrap_or("png");
        let bytes = general_purpose::STANDARD.decode(data)?;

        fs::create_dir_all(dir).await?;
        let file_path = dir.join(format!("{prefix}-{idx}.{extension}"));
        fs::write(&file_path, bytes).await?;
        paths.push(file_path);
    }

    return Ok(paths);
}

async fn confirm(prompt: String) -> bool {
    let res = tokio::task::spawn_blocking(move || {
        return Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(prompt)
            .default(false)
            .interact();
    })
    .await;

    match res {
        Ok(Ok(answer)) => return answer,
        Ok(Err(err)) => {
            tracing::warn!(error = ?err, "Confirmation prompt failed, treating it as a no");
            return false;
        }
        Err(err) => {
            tracing::error!(error = ?err, "Confirmation prompt panicked");
            return false;
        }
    }
}

pub struct Repl {
    pub state: ChatState,
    tx: mpsc::UnboundedSender<Action>,
    chats: ChatsApi,
    keys: ChatKeyStore,
    images_dir: path::PathBuf,
    has_caller_key: bool,
    turn_in_flight: bool,
    /// New messages of the running turn already printed.
    rendered: usize,
}

impl Repl {
    pub fn new(
        tx: mpsc::UnboundedSender<Action>,
        chats: ChatsApi,
        keys: ChatKeyStore,
        images_dir: path::PathBuf,
        has_caller_key: bool,
    ) -> Repl {
        return Repl {
            state: ChatState::default(),
            tx,
            chats,
            keys,
            images_dir,
            has_caller_key,
            turn_in_flight: false,
            rendered: 0,
        };
    }

    fn dispatch(&mut self, action: ChatAction) {
        self.state = reduce(&self.state, action);
    }

    fn info(&self, text: &str) {
        println!("{}", text.dimmed());
    }

    fn warn(&self, text: &str) {
        println!("{}", text.yellow());
    }

    async fn print_message(&self, idx: usize, message: &Message) {
        let rendered = render_message(idx, message);
        match message {
            Message::System { .. } => println!("{}", rendered.red()),
            Message::User { .. } => println!("{}", rendered.bold()),
            Message::Assistant { .. } => println!("{}", rendered.green()),
            Message::Tool { .. } => println!("{}", rendered.dimmed()),
        }

        let images = message.images();
        if images.is_empty() {
            return;
        }

        let chat_id = if self.state.chat.chat_id.is_empty() {
            "unsaved"
        } else {
            &self.state.chat.chat_id
        };
        let prefix = format!("{}-{idx}", chat_id.chars().take(8).collect::<String>());
        match save_images(&images, &self.images_dir, &prefix).await {
            Ok(paths) => {
                for image_path in paths {
                    println!("{}", format!("image: {}", image_path.to_string_lossy()).cyan());
                }
            }
            Err(err) => {
                tracing::error!(error = ?err, "Failed to save images");
                self.warn(&format!("Failed to save images: {err}"));
            }
        }
    }

    async fn print_transcript(&self) {
        for (idx, message) in self.state.chat.messages.iter().enumerate() {
            self.print_message(idx, message).await;
        }
    }

    /// Opens the configured chat, if any, and picks the starting model.
    pub async fn load(&mut self) -> Result<()> {
        let chat_id = Config::get(ConfigKey::ChatID);
        if !chat_id.is_empty() {
            let chat = self.chats.load(&chat_id).await?;
            let chat_key = self.keys.load(&chat_id).await.map(|info| return info.chat_key);
            if chat_key.is_none() {
                self.info("This chat was created elsewhere. Saving it will store a copy under a new id.");
            }
            self.dispatch(ChatAction::Load { chat, chat_key });
            self.print_transcript().await;
            return Ok(());
        }

        let model = Config::get(ConfigKey::Model);
        if let Err(err) = check_model(&model, self.has_caller_key) {
            self.warn(&format!("{err} Starting with {DEFAULT_MODEL} instead."));
            return Ok(());
        }
        self.dispatch(ChatAction::SetCurrentModel { model });

        return Ok(());
    }

    /// Persists the chat, creating its key first if it has none. Failures are
    /// reported and otherwise ignored.
    async fn save(&mut self) {
        let chat_key = match self.state.chat_key.clone() {
            Some(chat_key) => chat_key,
            None => {
                let info = ChatKeyInfo::generate();
                self.remember_key(&info).await;
                info.chat_key
            }
        };

        match self.chats.save(&self.state.chat, &chat_key).await {
            Ok(true) => {
                tracing::debug!(chat_id = %self.state.chat.chat_id, "Saved chat");
            }
            Ok(false) => {
                tracing::debug!(chat_id = %self.state.chat.chat_id, "Nothing worth saving yet");
            }
            Err(err) => {
                tracing::error!(error = ?err, chat_id = %self.state.chat.chat_id, "Failed to save chat");
                self.warn(&format!("Failed to save chat: {err}"));
            }
        }
    }

    async fn remember_key(&mut self, info: &ChatKeyInfo) {
        self.dispatch(ChatAction::SetChatKey {
            chat_id: info.chat_id.to_string(),
            chat_key: info.chat_key.to_string(),
        });
        if let Err(err) = self.keys.save(info).await {
            tracing::error!(error = ?err, "Failed to store chat key");
            self.warn(&format!("Failed to store the chat key locally: {err}"));
        }
    }

    /// Asks the worker to stop whatever the running turn is doing.
    pub fn cancel(&self) -> Result<()> {
        if self.turn_in_flight {
            self.tx.send(Action::Cancel())?;
        }
        return Ok(());
    }

    /// Handles one line of user input. Returns false when the user quits.
    pub async fn handle_input(&mut self, line: &str) -> Result<bool> {
        let text = line.trim();
        if text.is_empty() {
            return Ok(true);
        }

        if text.starts_with('/') {
            if let Some(command) = SlashCommand::parse(text) {
                return self.handle_command(command).await;
            }
        }

        if self.state.chat.finalized {
            self.warn("This chat is finalized. Use /fork to continue it as a new chat.");
            return Ok(true);
        }

        let model = self.state.current_model.to_string();
        self.dispatch(ChatAction::AddMessage {
            message: Message::user(text),
            metadata: MessageMetadata::now(&model),
        });
        self.turn_in_flight = true;
        self.rendered = 0;
        self.tx.send(Action::SendMessage {
            transcript: self.state.chat.messages.clone(),
            model,
        })?;

        return Ok(true);
    }

    async fn handle_command(&mut self, command: SlashCommand) -> Result<bool> {
        if command.is_quit() {
            return Ok(false);
        }

        if command.is_help() {
            println!("{}", help_text());
        } else if command.is_model_list() {
            println!("{}", model_list(&self.state.current_model));
        } else if command.is_model_set() {
            match command.args.first() {
                Some(arg) => {
                    let model = resolve_model(arg);
                    if let Err(err) = check_model(&model, self.has_caller_key) {
                        self.warn(&err.to_string());
                    } else {
                        if find_model(&model).is_none() {
                            self.warn(&format!("{model} is not in the model list, its cost is not tracked."));
                        }
                        self.dispatch(ChatAction::SetCurrentModel {
                            model: model.to_string(),
                        });
                        self.info(&format!("Model set to {model}"));
                    }
                }
                None => self.info(&format!("Current model: {}", self.state.current_model)),
            }
        } else if command.is_delete() {
            let index = command.args.first().and_then(|arg| return arg.parse::<usize>().ok());
            match index {
                _ if self.state.chat.finalized => {
                    self.warn("This chat is finalized. Use /fork to change it.");
                }
                Some(index) if index < self.state.chat.messages.len() => {
                    self.dispatch(ChatAction::DeleteMessage { index });
                    self.info(&format!("Deleted messages from {index} onwards."));
                }
                _ => self.warn("Usage: /delete MESSAGE_INDEX, with an index shown in the transcript."),
            }
        } else if command.is_fork() {
            let info = ChatKeyInfo::generate();
            self.remember_key(&info).await;
            self.dispatch(ChatAction::SetFinalized { finalized: false });
            self.info(&format!("Forked into chat {}", info.chat_id));
        } else if command.is_finalize() {
            self.finalize().await;
        } else if command.is_clear() {
            let model = self.state.current_model.to_string();
            self.dispatch(ChatAction::Reset);
            self.dispatch(ChatAction::SetCurrentModel { model });
            self.info("Started a new chat.");
        } else if command.is_cost() {
            let chat = &self.state.chat;
            self.info(&format!(
                "Prompt tokens: {}, completion tokens: {}, estimated cost: ${:.4}",
                chat.prompt_tokens, chat.completion_tokens, chat.estimated_cost
            ));
        }

        return Ok(true);
    }

    async fn finalize(&mut self) {
        if self.state.chat.chat_id.is_empty() || self.state.chat_key.is_none() {
            self.warn("Only saved chats created here can be finalized.");
            return;
        }
        if self.state.chat.finalized {
            self.info("This chat is already finalized.");
            return;
        }

        let confirmed = confirm(
            "Finalize this chat? It can no longer be changed or deleted, you would need to /fork it to continue."
                .to_string(),
        )
        .await;
        if !confirmed {
            return;
        }

        self.dispatch(ChatAction::SetFinalized { finalized: true });
        self.save().await;
        self.info(&format!("Finalized chat {}", self.state.chat.chat_id));
    }

    async fn print_new_messages(&mut self, new_messages: &[Message]) {
        let offset = self.state.chat.messages.len();
        for (idx, message) in new_messages.iter().enumerate().skip(self.rendered) {
            self.print_message(offset + idx, message).await;
        }
        self.rendered = self.rendered.max(new_messages.len());
    }

    fn commit_turn(&mut self, new_messages: Vec<Message>, usage: Option<ChatUsage>) {
        let model = self.state.current_model.to_string();
        self.dispatch(ChatAction::SetPendingMessages {
            pending_messages: None,
        });
        if let Some(usage) = usage {
            self.dispatch(ChatAction::IncrementTokens {
                prompt_tokens: usage.prompt_tokens,
                completion_tokens: usage.completion_tokens,
                estimated_cost: usage.cost,
            });
        }
        self.dispatch(ChatAction::AddMessages {
            messages: new_messages,
            metadata: MessageMetadata::now(&model),
        });
        self.turn_in_flight = false;
        self.rendered = 0;
    }

    pub async fn handle_event(&mut self, event: Event) -> Result<()> {
        match event {
            Event::PendingMessages {
                pending,
                new_messages,
            } => {
                self.print_new_messages(&new_messages).await;
                self.dispatch(ChatAction::SetPendingMessages {
                    pending_messages: Some(pending),
                });
            }
            Event::CancelTargetChanged(target) => match target {
                Some(CancelTarget::Completion) => {
                    self.info("Waiting for the model... (CTRL+C to cancel)");
                }
                Some(CancelTarget::ToolCall(_)) => {
                    self.info("Running code... (CTRL+C to cancel)");
                }
                None => {}
            },
            Event::ToolApprovalRequested(tool_call) => {
                let approved = confirm(format!(
                    "Allow {} to run the code above?",
                    tool_call.function.name
                ))
                .await;
                self.tx.send(Action::ResolveToolApproval {
                    tool_call_id: tool_call.id,
                    approved,
                })?;
            }
            Event::TurnFinished {
                new_messages,
                usage,
            } => {
                self.print_new_messages(&new_messages).await;
                self.commit_turn(new_messages, usage);
                self.save().await;

                if self.state.chat.estimated_cost > MAX_CHAT_COST {
                    self.warn(&format!(
                        "This chat has cost an estimated ${:.2}. Consider starting a new one with /clear.",
                        self.state.chat.estimated_cost
                    ));
                }
            }
        }

        return Ok(());
    }

    pub fn is_turn_in_flight(&self) -> bool {
        return self.turn_in_flight;
    }
}

/// Runs the chat loop until the user quits or stdin closes. User input is
/// only read between turns.
pub async fn start(mut repl: Repl, mut rx: mpsc::UnboundedReceiver<Event>) -> Result<()> {
    repl.load().await?;
    println!(
        "{}",
        format!(
            "kernelchat {}, model {}. Type /help for commands.",
            env!("CARGO_PKG_VERSION"),
            repl.state.current_model
        )
        .dimmed()
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        if !repl.is_turn_in_flight() {
            print!("{} ", ">".bold());
            std::io::stdout().flush()?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = tokio::signal::ctrl_c() => None,
            };
            let line = match line {
                Some(line) => line,
                None => break,
            };
            if !repl.handle_input(&line).await? {
                break;
            }
            continue;
        }

        tokio::select! {
            event = rx.recv() => match event {
                Some(event) => repl.handle_event(event).await?,
                None => break,
            },
            res = tokio::signal::ctrl_c() => {
                res?;
                repl.cancel()?;
            }
        }
    }

    return Ok(());
}
