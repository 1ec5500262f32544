//! `tutr` entrypoint: one-shot queries, `configure`, and the supervised shell.

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, ConfigureArgs};
use std::process::ExitCode;
use tracing::debug;
use tutr::config::{load_config, needs_setup};
use tutr::configure::{run_configure, run_setup, summary, Wizard};
use tutr::format::format_suggested_command;
use tutr::safety::{enforce_command_safety, is_unsafe_override_enabled, ALLOW_UNSAFE_ENV};
use tutr::update_check::PendingUpdateCheck;
use tutr::{init_logging, query, LlmQuery, LogTarget};

const API_KEY_CLI_WARNING: &str = "Warning: --api-key may leak secrets via shell history and \
process lists. Prefer the interactive `tutr configure` prompts or provider API key environment \
variables.";

fn main() -> ExitCode {
    let cli = Cli::parse();
    let outcome = match cli.command {
        Some(Commands::Configure(ref args)) => run_configure_command(args),
        Some(Commands::Shell { debug }) => {
            init_logging(debug, LogTarget::File);
            tutr::shell::run_shell(debug)
        }
        Some(Commands::SuggestWorker { debug }) => {
            init_logging(debug, LogTarget::File);
            run_worker()
        }
        None => run_query(&cli),
    };
    match outcome {
        Ok(code) => ExitCode::from(u8::try_from(code).unwrap_or(1)),
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run_query(cli: &Cli) -> Result<i32> {
    init_logging(cli.debug, LogTarget::Stderr);
    let mut config = if needs_setup() {
        run_setup()?
    } else {
        load_config()?
    };
    if cli.explain {
        config.show_explanation = Some(true);
    }
    debug!(model = %config.model, "running one-shot query");
    let update = PendingUpdateCheck::spawn(&config);
    let code = show_suggestion(cli, &config)?;
    update.finish(&mut std::io::stderr());
    Ok(code)
}

fn show_suggestion(cli: &Cli, config: &tutr::TutrConfig) -> Result<i32> {
    let response = match query::run(&cli.words, config, &LlmQuery::new()) {
        Ok(response) => response,
        Err(err) => {
            eprintln!("Error: {err}");
            return Ok(1);
        }
    };

    let allow_unsafe = cli.allow_unsafe || is_unsafe_override_enabled();
    let assessment = match enforce_command_safety(&response.command, allow_unsafe) {
        Ok(assessment) => assessment,
        Err(blocked) => {
            eprintln!("Error: refusing to display a potentially dangerous suggested command.");
            for reason in &blocked.reasons {
                eprintln!("  - {reason}");
            }
            eprintln!("Use --allow-unsafe (or set {ALLOW_UNSAFE_ENV}=1) to override.");
            return Ok(1);
        }
    };
    if !assessment.is_safe {
        eprintln!("Warning: displaying command that matched dangerous-pattern checks.");
    }

    println!("\n  {}\n", format_suggested_command(&response.command));
    if config.explanations_enabled() {
        if !response.explanation.trim().is_empty() {
            println!("  {}\n", response.explanation);
        }
        if let Some(source) = response.source.as_deref().filter(|s| !s.trim().is_empty()) {
            println!("  source: {source}\n");
        }
    }
    Ok(0)
}

fn run_configure_command(args: &ConfigureArgs) -> Result<i32> {
    init_logging(args.debug, LogTarget::Stderr);
    if args.api_key.is_some() {
        eprintln!("{API_KEY_CLI_WARNING}");
    }
    let options = args.options();
    let interactive = args.interactive || !options.has_explicit_options();
    let existing = load_config()?;
    let update = PendingUpdateCheck::spawn(&existing);
    let mut wizard = Wizard::stdio();
    let updated = match run_configure(&existing, &options, interactive, &mut wizard) {
        Ok(updated) => updated,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return Ok(1);
        }
    };
    let location = tutr::config::config_file_path()
        .map(|path| path.display().to_string())
        .unwrap_or_else(|| "~/.tutr/config.json".to_string());
    println!("\nConfiguration saved to {location}");
    println!("{}\n", summary(&updated));
    update.finish(&mut std::io::stderr());
    Ok(0)
}

#[cfg(unix)]
fn run_worker() -> Result<i32> {
    let stdin = std::io::stdin().lock();
    let stdout = std::io::stdout().lock();
    tutr::shell::suggest::run_suggest_worker(stdin, stdout, &LlmQuery::new())?;
    Ok(0)
}

#[cfg(not(unix))]
fn run_worker() -> Result<i32> {
    eprintln!("Error: interactive shell mode requires a POSIX environment");
    Ok(1)
}
