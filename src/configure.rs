//! `tutr configure` and the first-run setup wizard.

use crate::config::{save_config, TutrConfig, DEFAULT_OLLAMA_HOST, PROVIDERS};
use anyhow::{bail, Context, Result};
use std::io::{self, BufRead, IsTerminal, Write};
use thiserror::Error;

/// Model menu per provider; the first entry is the recommended default.
pub const PROVIDER_MODELS: &[(&str, &[(&str, &str)])] = &[
    (
        "gemini",
        &[
            ("gemini/gemini-3-flash-preview", "Gemini 3 Flash (recommended)"),
            ("gemini/gemini-2.0-flash", "Gemini 2.0 Flash"),
            ("gemini/gemini-2.5-pro-preview-06-05", "Gemini 2.5 Pro"),
        ],
    ),
    (
        "anthropic",
        &[
            (
                "anthropic/claude-haiku-4-5-20251001",
                "Claude Haiku 4.5 (recommended)",
            ),
            ("anthropic/claude-sonnet-4-6", "Claude Sonnet 4.6"),
        ],
    ),
    (
        "openai",
        &[
            ("openai/gpt-4o-mini", "GPT-4o Mini (recommended)"),
            ("openai/gpt-4o", "GPT-4o"),
            ("openai/o3-mini", "o3-mini"),
        ],
    ),
    (
        "xai",
        &[
            ("xai/grok-3-mini", "Grok 3 Mini (recommended)"),
            ("xai/grok-3", "Grok 3"),
        ],
    ),
    (
        "ollama",
        &[
            ("ollama/llama3", "Llama 3"),
            ("ollama/mistral", "Mistral"),
            ("ollama/codellama", "Code Llama"),
        ],
    ),
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigureError {
    #[error("Unknown provider '{0}'. Expected one of: anthropic, gemini, ollama, openai, xai")]
    UnknownProvider(String),
}

/// Explicit `tutr configure` flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigureOptions {
    pub provider: Option<String>,
    pub model: Option<String>,
    pub api_key: Option<String>,
    pub clear_api_key: bool,
    pub ollama_host: Option<String>,
    pub clear_ollama_host: bool,
    pub show_explanation: Option<bool>,
}

impl ConfigureOptions {
    #[must_use]
    pub fn has_explicit_options(&self) -> bool {
        self.provider.is_some()
            || self.model.is_some()
            || self.api_key.is_some()
            || self.clear_api_key
            || self.ollama_host.is_some()
            || self.clear_ollama_host
            || self.show_explanation.is_some()
    }
}

fn models_for(provider: &str) -> &'static [(&'static str, &'static str)] {
    PROVIDER_MODELS
        .iter()
        .find(|(name, _)| *name == provider)
        .map(|(_, models)| *models)
        .unwrap_or_default()
}

fn validate_provider(provider: &str) -> Result<(), ConfigureError> {
    if PROVIDERS.iter().any(|info| info.name == provider) {
        Ok(())
    } else {
        Err(ConfigureError::UnknownProvider(provider.to_string()))
    }
}

/// Add a default `http://` scheme and drop trailing slashes.
#[must_use]
pub fn normalize_ollama_host(host: &str) -> String {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        return DEFAULT_OLLAMA_HOST.to_string();
    }
    let with_scheme = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("http://{trimmed}")
    };
    with_scheme.trim_end_matches('/').to_string()
}

/// Apply explicit flags to `existing` without touching disk.
///
/// # Errors
///
/// Returns [`ConfigureError::UnknownProvider`] for providers outside the table.
pub fn apply_options(
    existing: &TutrConfig,
    options: &ConfigureOptions,
) -> Result<TutrConfig, ConfigureError> {
    let mut updated = existing.clone();

    if let Some(provider) = &options.provider {
        validate_provider(provider)?;
        updated.provider = Some(provider.clone());
    }
    if let Some(model) = &options.model {
        updated.model = model.clone();
        if options.provider.is_none() {
            if let Some((prefix, _)) = model.split_once('/') {
                if validate_provider(prefix).is_ok() {
                    updated.provider = Some(prefix.to_string());
                }
            }
        }
    }
    if let Some(provider) = updated.provider.clone() {
        validate_provider(&provider)?;
        let changed = options.model.is_some() || options.provider.is_some();
        if changed && !updated.model.starts_with(&format!("{provider}/")) {
            if let Some((recommended, _)) = models_for(&provider).first() {
                updated.model = (*recommended).to_string();
            }
        }
    }

    if options.clear_api_key {
        updated.api_key = None;
    } else if let Some(api_key) = &options.api_key {
        let trimmed = api_key.trim();
        updated.api_key = (!trimmed.is_empty()).then(|| trimmed.to_string());
    }

    if options.clear_ollama_host {
        updated.ollama_host = None;
    } else if let Some(host) = &options.ollama_host {
        updated.ollama_host = Some(normalize_ollama_host(host));
    }

    if let Some(show) = options.show_explanation {
        updated.show_explanation = Some(show);
    }
    if updated.provider.as_deref() == Some("ollama") && updated.ollama_host.is_none() {
        updated.ollama_host = Some(DEFAULT_OLLAMA_HOST.to_string());
    }
    Ok(updated)
}

/// Line-oriented prompts for the interactive wizard.
pub struct Wizard<R, W> {
    input: R,
    output: W,
    hide_secrets: bool,
}

impl Wizard<io::StdinLock<'static>, io::Stdout> {
    /// Prompt on the process's own stdin/stdout; API keys are not echoed on a TTY.
    #[must_use]
    pub fn stdio() -> Self {
        let stdin = io::stdin();
        let hide_secrets = stdin.is_terminal();
        Self::new(stdin.lock(), io::stdout(), hide_secrets)
    }
}

impl<R: BufRead, W: Write> Wizard<R, W> {
    pub fn new(input: R, output: W, hide_secrets: bool) -> Self {
        Self {
            input,
            output,
            hide_secrets,
        }
    }

    fn say(&mut self, text: &str) -> Result<()> {
        writeln!(self.output, "{text}").context("failed to write wizard output")
    }

    fn ask(&mut self, prompt: &str) -> Result<Option<String>> {
        write!(self.output, "{prompt}").context("failed to write wizard prompt")?;
        self.output.flush().context("failed to flush wizard prompt")?;
        let mut line = String::new();
        let read = self
            .input
            .read_line(&mut line)
            .context("failed to read wizard input")?;
        Ok((read > 0).then(|| line.trim().to_string()))
    }

    fn ask_secret(&mut self, prompt: &str) -> Result<Option<String>> {
        if !self.hide_secrets {
            return self.ask(prompt);
        }
        let _echo = EchoOff::new();
        let answer = self.ask(prompt);
        writeln!(self.output).context("failed to write wizard output")?;
        answer
    }

    fn choose(&mut self, max: usize) -> Result<usize> {
        loop {
            let Some(raw) = self.ask(&format!("\n  Enter choice (1-{max}): "))? else {
                bail!("input closed before a choice was made");
            };
            match raw.parse::<usize>() {
                Ok(value) if (1..=max).contains(&value) => return Ok(value),
                _ => self.say(&format!("  Please enter a number between 1 and {max}."))?,
            }
        }
    }

    fn yes_no(&mut self, prompt: &str, default: bool) -> Result<bool> {
        loop {
            let Some(raw) = self.ask(prompt)? else {
                return Ok(default);
            };
            match raw.to_ascii_lowercase().as_str() {
                "" => return Ok(default),
                "y" | "yes" => return Ok(true),
                "n" | "no" => return Ok(false),
                _ => self.say("  Please enter y or n.")?,
            }
        }
    }

    /// Walk the provider, key, host, model, and explanation prompts.
    ///
    /// # Errors
    ///
    /// Returns an error on I/O failure or when input closes mid-menu.
    pub fn run(&mut self, config: &TutrConfig) -> Result<TutrConfig> {
        let current = config
            .provider
            .as_deref()
            .filter(|name| validate_provider(name).is_ok())
            .unwrap_or(PROVIDERS[0].name);

        self.say("Select your LLM provider:")?;
        for (index, info) in PROVIDERS.iter().enumerate() {
            let marker = if info.name == current { " (current)" } else { "" };
            self.say(&format!("  {}. {}{marker}", index + 1, info.label))?;
        }
        let provider = &PROVIDERS[self.choose(PROVIDERS.len())? - 1];

        let mut api_key = config.api_key.clone();
        if let Some(env_key) = provider.env_key {
            self.say(&format!("\nEnter your {} API key:", provider.label))?;
            if api_key.is_some() {
                self.say("  Press Enter to keep existing key, or type '-' to clear it.")?;
            }
            let entered = self.ask_secret("  API key: ")?.unwrap_or_default();
            match entered.as_str() {
                "-" if api_key.is_some() => api_key = None,
                "" if api_key.is_none() => {
                    self.say("  No API key provided. You can set it later via")?;
                    self.say(&format!("  export {env_key}=\"...\""))?;
                }
                "" => {}
                key => api_key = Some(key.to_string()),
            }
        } else {
            api_key = None;
        }

        let ollama_host = if provider.name == "ollama" {
            let current_host = config
                .ollama_host
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_HOST.to_string());
            let entered = self
                .ask(&format!(
                    "\nOllama host URL [{current_host}] (type '-' to clear): "
                ))?
                .unwrap_or_default();
            match entered.as_str() {
                "-" => None,
                "" => Some(current_host),
                host => Some(normalize_ollama_host(host)),
            }
        } else {
            None
        };

        let models = models_for(provider.name);
        self.say("\nSelect a model:")?;
        for (index, (_, label)) in models.iter().enumerate() {
            self.say(&format!("  {}. {label}", index + 1))?;
        }
        let model = models[self.choose(models.len())? - 1].0;

        let current_show = config.explanations_enabled();
        let hint = if current_show { "Y/n" } else { "y/N" };
        let show_explanation =
            self.yes_no(&format!("\nShow explanations by default? [{hint}]: "), current_show)?;

        Ok(TutrConfig {
            provider: Some(provider.name.to_string()),
            model: model.to_string(),
            api_key,
            ollama_host,
            show_explanation: Some(show_explanation),
            ..config.clone()
        })
    }
}

/// Disables terminal echo on stdin for the lifetime of the value.
struct EchoOff {
    #[cfg(unix)]
    saved: Option<libc::termios>,
}

impl EchoOff {
    #[cfg(unix)]
    fn new() -> Self {
        // SAFETY: termios is plain data filled by tcgetattr on the stdin fd.
        unsafe {
            let mut attrs: libc::termios = std::mem::zeroed();
            if libc::tcgetattr(libc::STDIN_FILENO, &mut attrs) != 0 {
                return Self { saved: None };
            }
            let saved = attrs;
            attrs.c_lflag &= !libc::ECHO;
            if libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &attrs) != 0 {
                return Self { saved: None };
            }
            Self { saved: Some(saved) }
        }
    }

    #[cfg(not(unix))]
    fn new() -> Self {
        Self {}
    }
}

impl Drop for EchoOff {
    fn drop(&mut self) {
        #[cfg(unix)]
        if let Some(saved) = self.saved {
            // SAFETY: restores attributes captured from the same fd.
            unsafe {
                libc::tcsetattr(libc::STDIN_FILENO, libc::TCSANOW, &saved);
            }
        }
    }
}

/// Apply `options`, optionally run the wizard, then save.
///
/// # Errors
///
/// Returns an error for an unknown provider, wizard I/O failure, or save
/// failure.
pub fn run_configure<R: BufRead, W: Write>(
    existing: &TutrConfig,
    options: &ConfigureOptions,
    interactive: bool,
    wizard: &mut Wizard<R, W>,
) -> Result<TutrConfig> {
    let mut updated = apply_options(existing, options)?;
    if interactive {
        updated = wizard.run(&updated)?;
    }
    save_config(&updated)?;
    Ok(updated)
}

/// First-run setup on the process's stdin/stdout.
///
/// # Errors
///
/// Returns an error when the wizard or the save fails.
pub fn run_setup() -> Result<TutrConfig> {
    println!("\nWelcome to tutr! Let's get you set up.\n");
    let mut wizard = Wizard::stdio();
    let config = run_configure(
        &TutrConfig::default(),
        &ConfigureOptions::default(),
        true,
        &mut wizard,
    )?;
    println!("\nConfiguration saved.\n");
    Ok(config)
}

/// Human-readable summary printed after `tutr configure`.
#[must_use]
pub fn summary(config: &TutrConfig) -> String {
    format!(
        "  provider: {}\n  model: {}\n  api_key: {}\n  ollama_host: {}\n  show_explanation: {}",
        config.provider.as_deref().unwrap_or("(not set)"),
        config.model,
        if config.api_key.is_some() { "set" } else { "not set" },
        config.ollama_host.as_deref().unwrap_or("not set"),
        config.explanations_enabled(),
    )
}
