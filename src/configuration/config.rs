#[cfg(test)]
#[path = "config_test.rs"]
mod tests;

use std::env;
use std::path;

use anyhow::bail;
use anyhow::Result;
use clap::ArgMatches;
use clap::Command;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use strum::EnumIter;
use strum::EnumVariantNames;
use strum::IntoEnumIterator;
use tokio::fs;

use crate::domain::models::DEFAULT_MODEL;

static CONFIG: Lazy<DashMap<String, String>> = Lazy::new(DashMap::new);

#[derive(Clone, Copy, Debug, Eq, PartialEq, EnumIter, EnumVariantNames, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ConfigKey {
    ApiURL,
    ChatID,
    ChatPasscode,
    ConfigFile,
    JupyterKernel,
    JupyterToken,
    JupyterURL,
    Model,
    #[strum(serialize = "openrouter-key")]
    OpenRouterKey,
    #[strum(serialize = "openrouter-url")]
    OpenRouterURL,
    StateDir,
}

pub struct Config {}

fn app_dir(base: Option<path::PathBuf>) -> path::PathBuf {
    return base.unwrap_or_else(env::temp_dir).join("kernelchat");
}

impl Config {
    pub fn get(key: ConfigKey) -> String {
        if let Some(val) = CONFIG.get(&key.to_string()) {
            return val.to_string();
        }

        return "".to_string();
    }

    pub fn set(key: ConfigKey, value: &str) {
        CONFIG.insert(key.to_string(), value.to_string());
    }

    pub fn default(key: ConfigKey) -> String {
        #[cfg(not(target_os = "macos"))]
        let config_path = app_dir(dirs::config_dir()).join("config.toml");
        #[cfg(target_os = "macos")]
        let config_path = app_dir(dirs::home_dir().map(|home| return home.join(".config")))
            .join("config.toml");

        let state_dir = app_dir(dirs::cache_dir());

        let res = match key {
            ConfigKey::ApiURL => "http://localhost:3000",
            ConfigKey::ChatPasscode => "",
            ConfigKey::JupyterKernel => "",
            ConfigKey::JupyterToken => "",
            ConfigKey::JupyterURL => "http://localhost:8888",
            ConfigKey::Model => DEFAULT_MODEL,
            ConfigKey::OpenRouterKey => "",
            ConfigKey::OpenRouterURL => "https://openrouter.ai",

            // Special
            ConfigKey::ChatID => "",
            ConfigKey::ConfigFile => return config_path.to_string_lossy().to_string(),
            ConfigKey::StateDir => return state_dir.to_string_lossy().to_string(),
        };

        return res.to_string();
    }

    /// A file inside the state directory.
    pub fn state_path(file: &str) -> path::PathBuf {
        return path::PathBuf::from(Config::get(ConfigKey::StateDir)).join(file);
    }

    pub async fn load(cmd: Command, clap_arg_matches: Vec<&ArgMatches>) -> Result<()> {
        for key in ConfigKey::iter() {
            Config::set(key, &Config::default(key))
        }

        let mut config_file = Config::default(ConfigKey::ConfigFile);
        for matches in clap_arg_matches.as_slice() {
            if let Ok(Some(arg_config_file)) =
                matches.try_get_one::<String>(&ConfigKey::ConfigFile.to_string())
            {
                config_file = arg_config_file.to_string();
            }
        }

        let config_path = path::PathBuf::from(config_file);
        if config_path.exists() {
            let toml_str = fs::read_to_string(config_path).await?;
            let doc = toml_str.parse::<toml_edit::Document>()?;

            for key in ConfigKey::iter() {
                let val = match doc.get(&key.to_string()) {
                    Some(val) => val,
                    None => continue,
                };
                if !cmd
                    .get_arguments()
                    .any(|arg| return arg.get_long() == Some(key.to_string().as_str()))
                {
                    continue;
                }

                if let Some(val_int) = val.as_integer() {
                    Config::set(key, &val_int.to_string());
                } else if let Some(val_str) = val.as_str() {
                    if val_str.is_empty() {
                        continue;
                    }
                    Config::set(key, val_str);
                } else {
                    bail!(format!(
                        "config.toml has an invalid value for key '{key}', expected a string"
                    ));
                }
            }
        }

        for key in ConfigKey::iter() {
            for matches in clap_arg_matches.as_slice() {
                if let Ok(Some(val)) = matches.try_get_one::<String>(&key.to_string()) {
                    if val.is_empty() {
                        continue;
                    }
                    Config::set(key, val)
                }
            }
        }

        tracing::debug!(
            api_url = Config::get(ConfigKey::ApiURL),
            model = Config::get(ConfigKey::Model),
            jupyter_url = Config::get(ConfigKey::JupyterURL),
            state_dir = Config::get(ConfigKey::StateDir),
            has_openrouter_key = !Config::get(ConfigKey::OpenRouterKey).is_empty(),
            "config"
        );

        return Ok(());
    }

    pub fn serialize_default(cmd: Command) -> String {
        let toml_str = ConfigKey::iter()
            .filter_map(|key| {
                if key == ConfigKey::ChatID || key == ConfigKey::ConfigFile {
                    return None;
                }

                let arg = cmd
                    .get_arguments()
                    .find(|arg| return arg.get_long() == Some(key.to_string().as_str()))?;

                let description = arg
                    .get_help()?
                    .to_string()
                    .split("[default:")
                    .next()?
                    .trim()
                    .to_string();

                // Machine specific, documented but left commented out.
                let mut val = if key == ConfigKey::StateDir {
                    "".to_string()
                } else {
                    Config::default(key)
                };
                if val.is_empty() {
                    val = format!("# {key} = \"\"");
                } else {
                    val = format!("{key} = \"{val}\"");
                }

                return Some(format!("# {description}\n{val}"));
            })
            .collect::<Vec<String>>()
            .join("\n\n");

        return toml_str;
    }
}
