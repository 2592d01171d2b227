use anyhow::Result;

use super::Config;
use super::ConfigKey;
use crate::application::cli;

#[test]
fn it_names_keys_in_kebab_case() {
    assert_eq!(ConfigKey::ApiURL.to_string(), "api-url");
    assert_eq!(ConfigKey::ChatID.to_string(), "chat-id");
    assert_eq!(ConfigKey::OpenRouterKey.to_string(), "openrouter-key");
    assert_eq!(ConfigKey::JupyterURL.to_string(), "jupyter-url");
}

#[test]
fn it_serializes_to_valid_toml() -> Result<()> {
    let res = Config::serialize_default(cli::build());
    let doc = res.parse::<toml_edit::Document>()?;

    assert_eq!(doc["model"].as_str(), Some("openai/gpt-4.1-mini"));
    assert_eq!(doc["jupyter-url"].as_str(), Some("http://localhost:8888"));
    assert!(doc.get("openrouter-key").is_none());
    assert!(res.contains("# openrouter-key = \"\""));
    assert!(res.contains("# state-dir = \"\""));
    assert!(!res.contains("chat-id"));

    return Ok(());
}

#[tokio::test]
async fn it_loads_config_from_file() -> Result<()> {
    let matches = cli::build().try_get_matches_from(vec![
        "kernelchat",
        "-c",
        "./config.example.toml",
        "--jupyter-token",
        "from-flag",
    ])?;
    Config::load(cli::build(), vec![&matches]).await?;

    assert_eq!(Config::get(ConfigKey::Model), "openai/gpt-4o-mini");
    assert_eq!(Config::get(ConfigKey::JupyterToken), "from-flag");

    // Loads share the process wide config, so the failing case runs here too.
    let matches =
        cli::build().try_get_matches_from(vec!["kernelchat", "-c", "./test/bad-config.toml"])?;
    let res = Config::load(cli::build(), vec![&matches]).await;
    assert!(res.is_err());

    return Ok(());
}
