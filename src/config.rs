//! Persistent user config (`~/.tutr/config.json`) with environment overrides.
//!
//! The file is JSON so it stays hand-editable. Provider API keys found in the
//! environment always win over stored keys, and the file is written 0600
//! because it may hold a key.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const DEFAULT_MODEL: &str = "gemini/gemini-3-flash-preview";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

const CONFIG_DIR_ENV: &str = "TUTR_CONFIG_DIR";
const CONFIG_DIR_NAME: &str = ".tutr";
const CONFIG_FILE: &str = "config.json";

/// One supported LLM provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderInfo {
    pub name: &'static str,
    pub env_key: Option<&'static str>,
    pub label: &'static str,
}

pub const PROVIDERS: &[ProviderInfo] = &[
    ProviderInfo {
        name: "gemini",
        env_key: Some("GEMINI_API_KEY"),
        label: "Gemini",
    },
    ProviderInfo {
        name: "anthropic",
        env_key: Some("ANTHROPIC_API_KEY"),
        label: "Anthropic",
    },
    ProviderInfo {
        name: "openai",
        env_key: Some("OPENAI_API_KEY"),
        label: "OpenAI",
    },
    ProviderInfo {
        name: "xai",
        env_key: Some("XAI_API_KEY"),
        label: "xAI",
    },
    ProviderInfo {
        name: "ollama",
        env_key: None,
        label: "Ollama (local, no API key needed)",
    },
];

#[must_use]
pub fn provider_info(name: &str) -> Option<&'static ProviderInfo> {
    PROVIDERS.iter().find(|info| info.name == name)
}

/// Runtime configuration shared by one-shot queries and shell mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TutrConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ollama_host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub show_explanation: Option<bool>,
    pub update_check_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub no_execute: Option<bool>,
}

impl Default for TutrConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            ollama_host: None,
            show_explanation: None,
            update_check_enabled: true,
            no_execute: None,
        }
    }
}

impl TutrConfig {
    /// Provider named explicitly, else the `provider/` prefix of the model id.
    #[must_use]
    pub fn resolved_provider(&self) -> Option<&str> {
        match self.provider.as_deref() {
            Some(provider) if !provider.trim().is_empty() => Some(provider),
            _ => self
                .model
                .split_once('/')
                .map(|(prefix, _)| prefix)
                .filter(|prefix| provider_info(prefix).is_some()),
        }
    }

    #[must_use]
    pub fn explanations_enabled(&self) -> bool {
        self.show_explanation.unwrap_or(false)
    }

    #[must_use]
    pub fn execution_disabled(&self) -> bool {
        self.no_execute.unwrap_or(false)
    }
}

pub(crate) fn config_dir() -> Option<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        let trimmed = dir.trim();
        if !trimmed.is_empty() {
            return Some(PathBuf::from(trimmed));
        }
    }
    dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME))
}

/// Full path of the config file, when a home directory can be resolved.
#[must_use]
pub fn config_file_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join(CONFIG_FILE))
}

fn parse_falsy(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Layer environment overrides on top of a loaded config.
pub fn apply_env_overrides(config: &mut TutrConfig) {
    if let Some(model) = non_empty_env("TUTR_MODEL") {
        config.model = model;
    }
    if let Some(env_key) = config
        .resolved_provider()
        .and_then(provider_info)
        .and_then(|info| info.env_key)
    {
        if let Some(api_key) = non_empty_env(env_key) {
            config.api_key = Some(api_key);
        }
    }
    if let Some(host) = non_empty_env("OLLAMA_HOST") {
        config.ollama_host = Some(host);
    }
    if env::var("TUTR_UPDATE_CHECK").is_ok_and(|raw| parse_falsy(&raw)) {
        config.update_check_enabled = false;
    }
}

fn read_config_file(path: &Path) -> Result<TutrConfig> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("config file {} is not valid JSON", path.display()))
}

/// Load the config file (if present) and apply environment overrides.
///
/// # Errors
///
/// Returns an error when the file exists but cannot be read or parsed.
pub fn load_config() -> Result<TutrConfig> {
    let mut config = match config_file_path() {
        Some(path) if path.exists() => {
            let config = read_config_file(&path)?;
            debug!(path = %path.display(), "loaded config");
            config
        }
        _ => TutrConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

/// Write the config file, creating its directory and restricting permissions.
///
/// A directory tutr creates is made private (0700); an existing one is left
/// as the user set it. The file itself is opened 0600 before any byte of the
/// config is written.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be written.
pub fn save_config(config: &TutrConfig) -> Result<PathBuf> {
    let path = config_file_path().context("cannot resolve a home directory for the config")?;
    if let Some(parent) = path.parent().filter(|parent| !parent.exists()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create config directory {}", parent.display()))?;
        restrict_permissions(parent, 0o700)?;
    }
    let body = serde_json::to_string_pretty(config).context("failed to serialize config")?;
    let mut file = open_private(&path)
        .with_context(|| format!("failed to open config file {}", path.display()))?;
    file.write_all(format!("{body}\n").as_bytes())
        .with_context(|| format!("failed to write config file {}", path.display()))?;
    debug!(path = %path.display(), "saved config");
    Ok(path)
}

#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
    let file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; tighten a pre-existing file too.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<fs::File> {
    fs::File::create(path)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
        .with_context(|| format!("failed to set permissions on {}", path.display()))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

/// First-run detection: no config file and no provider key in the environment.
#[must_use]
pub fn needs_setup() -> bool {
    if config_file_path().is_some_and(|path| path.exists()) {
        return false;
    }
    !PROVIDERS
        .iter()
        .filter_map(|info| info.env_key)
        .any(|key| non_empty_env(key).is_some())
}
