#[cfg(test)]
#[path = "cli_test.rs"]
mod tests;

use std::io;
use std::path;

use anyhow::bail;
use anyhow::Result;
use chrono::TimeZone;
use clap::value_parser;
use clap::Arg;
use clap::ArgAction;
use clap::Command;
use clap_complete::generate;
use clap_complete::Generator;
use clap_complete::Shell;
use dialoguer::theme::ColorfulTheme;
use dialoguer::Select;
use owo_colors::OwoColorize;
use strum::VariantNames;
use tokio::fs;
use tokio::io::AsyncWriteExt;

use crate::configuration::Config;
use crate::configuration::ConfigKey;
use crate::domain::models::ChatMetadata;
use crate::domain::services::actions::help_text;
use crate::infrastructure::cache::CompletionCache;
use crate::infrastructure::persistence::ChatKeyStore;
use crate::infrastructure::persistence::ChatsApi;

fn print_completions<G: Generator>(gen: G, cmd: &mut Command) {
    generate(gen, cmd, cmd.get_name().to_string(), &mut io::stdout());
    std::process::exit(0);
}

pub fn log_dir() -> path::PathBuf {
    if let Ok(dir) = std::env::var("KERNELCHAT_LOG_DIR") {
        return path::PathBuf::from(dir);
    }

    return dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("kernelchat");
}

fn format_chat(chat: &ChatMetadata, has_key: bool) -> String {
    let updated = chrono::Utc
        .timestamp_millis_opt(chat.timestamp_updated)
        .single()
        .map(|date| return date.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| return chat.timestamp_updated.to_string());

    let mut res = format!(
        "- (ID: {}) {updated}, Messages: {}, Cost: ${:.4}",
        chat.chat_id,
        chat.message_metadata.len(),
        chat.estimated_cost,
    );

    if let Some(metadata) = chat.message_metadata.last() {
        res = format!("{res}, Model: {}", metadata.model);
    }
    if chat.finalized {
        res = format!("{res}, finalized");
    }
    if has_key {
        res = format!("{res}, owned");
    }

    return res;
}

async fn print_chats_list() -> Result<()> {
    let keys = ChatKeyStore::new(Config::state_path("chat-keys.json"))
        .all()
        .await;
    let chats = ChatsApi::from_config()
        .list()
        .await?
        .iter()
        .map(|chat| {
            return format_chat(chat, keys.contains_key(&chat.chat_id));
        })
        .collect::<Vec<String>>();

    if chats.is_empty() {
        println!("There are no chats available. You should start your first one!");
    } else {
        println!("{}", chats.join("\n"));
    }

    return Ok(());
}

async fn select_chat_interactive() -> Result<()> {
    let chats = ChatsApi::from_config().list().await?;
    if chats.is_empty() {
        println!("There are no chats available. You should start your first one!");
        return Ok(());
    }

    let keys = ChatKeyStore::new(Config::state_path("chat-keys.json"))
        .all()
        .await;
    let chat_options = chats
        .iter()
        .map(|chat| {
            return format_chat(chat, keys.contains_key(&chat.chat_id));
        })
        .collect::<Vec<String>>();

    let idx = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("Which chat would you like to open?")
        .default(0)
        .items(&chat_options)
        .interact_opt()?;

    if let Some(idx) = idx {
        Config::set(ConfigKey::ChatID, &chats[idx].chat_id);
    }

    return Ok(());
}

async fn delete_chat(chat_id: &str) -> Result<()> {
    let store = ChatKeyStore::new(Config::state_path("chat-keys.json"));
    let info = match store.load(chat_id).await {
        Some(info) => info,
        None => bail!(format!(
            "No chat key stored for chat {chat_id}. Only chats created on this machine can be deleted."
        )),
    };

    ChatsApi::from_config()
        .delete(chat_id, &info.chat_key)
        .await?;
    store.remove(chat_id).await?;

    return Ok(());
}

async fn create_config_file() -> Result<()> {
    let config_file_path_str = Config::default(ConfigKey::ConfigFile);
    let config_file_path = path::PathBuf::from(&config_file_path_str);
    if config_file_path.exists() {
        bail!(format!(
            "Config file already exists at {config_file_path_str}"
        ));
    }

    if let Some(parent) = config_file_path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let mut file = fs::File::create(&config_file_path).await?;
    file.write_all(Config::serialize_default(build()).as_bytes())
        .await?;

    println!("Created default config file at {config_file_path_str}");
    return Ok(());
}

fn subcommand_completions() -> Command {
    return Command::new("completions")
        .about("Generates shell completions.")
        .arg(
            clap::Arg::new("shell")
                .short('s')
                .long("shell")
                .help("Which shell to generate completions for.")
                .action(ArgAction::Set)
                .value_parser(value_parser!(Shell))
                .required(true),
        );
}

fn subcommand_config() -> Command {
    return Command::new("config")
        .about("Configuration file options.")
        .subcommand(
            Command::new("create").about("Saves the default config file to the configuration file path. This command will fail if the file exists already.")
        )
        .subcommand(
            Command::new("default").about("Outputs the default configuration file to stdout.")
        )
        .subcommand(
            Command::new("path").about("Returns the default path for the configuration file.")
        );
}

fn subcommand_cache() -> Command {
    return Command::new("cache")
        .about("Manage the local completion cache.")
        .arg_required_else_help(true)
        .subcommand(Command::new("clear").about("Removes every cached completion."))
        .subcommand(Command::new("dir").about("Print the completion cache directory path."));
}

fn subcommand_debug() -> Command {
    return Command::new("debug")
        .about("Debug helpers for kernelchat")
        .hide(true)
        .subcommand(
            Command::new("log-path").about("Output path to debug log file generated when running kernelchat with environment variable RUST_LOG=kernelchat")
        )
        .subcommand(
            Command::new("enum-config").about("List all config keys as strings.")
        );
}

fn subcommand_chats_delete() -> Command {
    return Command::new("delete")
        .about("Delete a stored chat. Only chats created on this machine and not finalized can be deleted.")
        .arg(
            clap::Arg::new(ConfigKey::ChatID.to_string())
                .short('i')
                .long("id")
                .help("Chat ID")
                .num_args(1)
                .required(true),
        );
}

fn subcommand_chat() -> Command {
    return Command::new("chat").about("Start a new chat.");
}

fn subcommand_chats() -> Command {
    return Command::new("chats")
        .about("Manage chats stored through the chat API.")
        .arg_required_else_help(true)
        .subcommand(Command::new("list").about("List stored chats with their ids, costs, and models."))
        .subcommand(
            Command::new("open")
                .about("Open a stored chat by ID. Omit passing any chat ID to load an interactive selection.")
                .arg(
                    clap::Arg::new(ConfigKey::ChatID.to_string())
                        .short('i')
                        .long("id")
                        .help("Chat ID")
                        .required(false),
                ),
        )
        .subcommand(subcommand_chats_delete());
}

fn global_arg(key: ConfigKey, env: &'static str, help: &str) -> Arg {
    return Arg::new(key.to_string())
        .long(key.to_string())
        .env(env)
        .num_args(1)
        .help(help.to_string())
        .global(true);
}

fn with_default(help: &str, key: ConfigKey) -> String {
    return format!("{help} [default: {}]", Config::default(key));
}

pub fn build() -> Command {
    let commands_text = help_text()
        .split('\n')
        .map(|line| {
            if line.starts_with('-') {
                return format!("  {line}");
            }
            if line.starts_with("COMMANDS:")
                || line.starts_with("HOTKEYS:")
                || line.starts_with("CODE EXECUTION:")
            {
                return format!("CHAT {line}").bold().underline().to_string();
            }
            return line.to_string();
        })
        .collect::<Vec<String>>()
        .join("\n");

    let about = format!(
        "{}\n\nVersion: {}\nCommit: {}",
        env!("CARGO_PKG_DESCRIPTION"),
        env!("CARGO_PKG_VERSION"),
        env!("VERGEN_GIT_DESCRIBE")
    );

    return Command::new("kernelchat")
        .about(about)
        .version(env!("CARGO_PKG_VERSION"))
        .after_help(commands_text)
        .arg_required_else_help(false)
        .subcommand(subcommand_chat())
        .subcommand(subcommand_chats())
        .subcommand(subcommand_cache())
        .subcommand(subcommand_completions())
        .subcommand(subcommand_config())
        .subcommand(subcommand_debug())
        .arg(
            global_arg(
                ConfigKey::ConfigFile,
                "KERNELCHAT_CONFIG_FILE",
                &with_default("Path to configuration file", ConfigKey::ConfigFile),
            )
            .short('c'),
        )
        .arg(
            global_arg(
                ConfigKey::Model,
                "KERNELCHAT_MODEL",
                &with_default("The model new chats start with.", ConfigKey::Model),
            )
            .short('m'),
        )
        .arg(global_arg(
            ConfigKey::ApiURL,
            "KERNELCHAT_API_URL",
            &with_default(
                "Base URL of the chat API, which also relays completions when no OpenRouter key is set.",
                ConfigKey::ApiURL,
            ),
        ))
        .arg(global_arg(
            ConfigKey::ChatPasscode,
            "KERNELCHAT_CHAT_PASSCODE",
            "Passcode the chat API expects for saving, loading, and listing chats.",
        ))
        .arg(global_arg(
            ConfigKey::OpenRouterKey,
            "KERNELCHAT_OPENROUTER_KEY",
            "Your own OpenRouter API key. When set, completions go straight to OpenRouter and every model is available.",
        ))
        .arg(global_arg(
            ConfigKey::OpenRouterURL,
            "KERNELCHAT_OPENROUTER_URL",
            &with_default(
                "OpenRouter API URL used when an OpenRouter key is set.",
                ConfigKey::OpenRouterURL,
            ),
        ))
        .arg(global_arg(
            ConfigKey::JupyterURL,
            "KERNELCHAT_JUPYTER_URL",
            &with_default("Jupyter server URL that runs Python code.", ConfigKey::JupyterURL),
        ))
        .arg(global_arg(
            ConfigKey::JupyterToken,
            "KERNELCHAT_JUPYTER_TOKEN",
            "Token for the Jupyter server, if it requires one.",
        ))
        .arg(global_arg(
            ConfigKey::JupyterKernel,
            "KERNELCHAT_JUPYTER_KERNEL",
            "ID of an existing kernel on the Jupyter server to run code in. It is never shut down. Without it a kernel is started for every execution.",
        ))
        .arg(global_arg(
            ConfigKey::StateDir,
            "KERNELCHAT_STATE_DIR",
            &with_default(
                "Directory for the completion cache, chat keys, and kernel cleanup list.",
                ConfigKey::StateDir,
            ),
        ));
}

pub async fn parse() -> Result<bool> {
    let matches = build().get_matches();

    match matches.subcommand() {
        Some(("debug", debug_matches)) => {
            match debug_matches.subcommand() {
                Some(("log-path", _)) => {
                    println!("{}", log_dir().join("debug.log").to_string_lossy());
                }
                Some(("enum-config", _)) => {
                    println!("{}", ConfigKey::VARIANTS.join("\n"));
                }
                _ => {
                    subcommand_debug().print_long_help()?;
                }
            }

            return Ok(false);
        }
        Some(("chat", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
        }
        Some(("completions", subcmd_matches)) => {
            if let Some(completions) = subcmd_matches.get_one::<Shell>("shell").copied() {
                let mut app = build();
                print_completions(completions, &mut app);
            }
            return Ok(false);
        }
        Some(("config", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("create", _)) => {
                create_config_file().await?;
                return Ok(false);
            }
            Some(("default", _)) => {
                println!("{}", Config::serialize_default(build()));
                return Ok(false);
            }
            Some(("path", _)) => {
                println!("{}", Config::default(ConfigKey::ConfigFile));
                return Ok(false);
            }
            _ => {
                subcommand_config().print_long_help()?;
                return Ok(false);
            }
        },
        Some(("cache", subcmd_matches)) => {
            Config::load(build(), vec![&matches, subcmd_matches]).await?;
            let dir = Config::state_path("completions");
            match subcmd_matches.subcommand() {
                Some(("clear", _)) => {
                    CompletionCache::new(dir).clear().await?;
                    println!("Cleared the completion cache");
                }
                Some(("dir", _)) => {
                    println!("{}", dir.to_string_lossy());
                }
                _ => {
                    subcommand_cache().print_long_help()?;
                }
            }
            return Ok(false);
        }
        Some(("chats", subcmd_matches)) => match subcmd_matches.subcommand() {
            Some(("list", list_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, list_matches]).await?;
                print_chats_list().await?;
                return Ok(false);
            }
            Some(("open", open_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, open_matches]).await?;
                if Config::get(ConfigKey::ChatID).is_empty() {
                    select_chat_interactive().await?;
                    if Config::get(ConfigKey::ChatID).is_empty() {
                        return Ok(false);
                    }
                }
            }
            Some(("delete", delete_matches)) => {
                Config::load(build(), vec![&matches, subcmd_matches, delete_matches]).await?;
                let chat_id = Config::get(ConfigKey::ChatID);
                delete_chat(&chat_id).await?;
                println!("Deleted chat {chat_id}");
                return Ok(false);
            }
            _ => {
                subcommand_chats().print_long_help()?;
                return Ok(false);
            }
        },
        _ => {
            Config::load(build(), vec![&matches]).await?;
        }
    }

    return Ok(true);
}
