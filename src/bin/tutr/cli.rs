//! Command-line schema for one-shot queries and the subcommands.

use clap::{Args, Parser, Subcommand};
use tutr::configure::ConfigureOptions;

#[derive(Debug, Parser)]
#[command(
    name = "tutr",
    version,
    about = "Tell me how to: an LLM-backed terminal command assistant",
    args_conflicts_with_subcommands = true,
    subcommand_negates_reqs = true,
    after_help = "A query whose first word is a subcommand name must follow `--`, \
for example: tutr -- shell script to rename files"
)]
pub(crate) struct Cli {
    /// Enable debug logging
    #[arg(short, long)]
    pub(crate) debug: bool,

    /// Show the model's explanation for the generated command
    #[arg(short, long)]
    pub(crate) explain: bool,

    /// Allow displaying potentially dangerous suggested commands
    #[arg(long)]
    pub(crate) allow_unsafe: bool,

    /// A command followed by a query, or just a natural-language query.
    /// Only the first word can collide with a subcommand; `--` escapes it.
    #[arg(
        value_name = "COMMAND/QUERY",
        required = true,
        num_args = 1..,
        trailing_var_arg = true,
        allow_hyphen_values = true
    )]
    pub(crate) words: Vec<String>,

    #[command(subcommand)]
    pub(crate) command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub(crate) enum Commands {
    /// Configure provider, model, and runtime flags
    Configure(ConfigureArgs),
    /// Run an interactive shell that suggests fixes for failed commands
    Shell {
        /// Enable debug logging (to the shell log file)
        #[arg(short, long)]
        debug: bool,
    },
    /// Answer one suggestion request from `tutr shell` (internal)
    #[command(hide = true)]
    SuggestWorker {
        #[arg(short, long)]
        debug: bool,
    },
}

#[derive(Debug, Args)]
pub(crate) struct ConfigureArgs {
    /// Enable debug logging
    #[arg(short, long)]
    pub(crate) debug: bool,

    /// Run the interactive wizard (default when no explicit options are given)
    #[arg(long)]
    pub(crate) interactive: bool,

    /// LLM provider (anthropic, gemini, ollama, openai, xai)
    #[arg(long)]
    pub(crate) provider: Option<String>,

    /// Model ID in provider/model form (example: openai/gpt-4o)
    #[arg(long)]
    pub(crate) model: Option<String>,

    /// API key for the selected provider
    #[arg(long, conflicts_with = "clear_api_key")]
    pub(crate) api_key: Option<String>,

    /// Remove the saved API key
    #[arg(long)]
    pub(crate) clear_api_key: bool,

    /// Ollama host URL (example: http://localhost:11434)
    #[arg(long, conflicts_with = "clear_ollama_host")]
    pub(crate) ollama_host: Option<String>,

    /// Remove the saved Ollama host
    #[arg(long)]
    pub(crate) clear_ollama_host: bool,

    /// Show explanations with suggested commands
    #[arg(long, conflicts_with = "hide_explanation")]
    pub(crate) show_explanation: bool,

    /// Hide explanations with suggested commands
    #[arg(long)]
    pub(crate) hide_explanation: bool,
}

impl ConfigureArgs {
    pub(crate) fn options(&self) -> ConfigureOptions {
        let show_explanation = if self.show_explanation {
            Some(true)
        } else if self.hide_explanation {
            Some(false)
        } else {
            None
        };
        ConfigureOptions {
            provider: self.provider.clone(),
            model: self.model.clone(),
            api_key: self.api_key.clone(),
            clear_api_key: self.clear_api_key,
            ollama_host: self.ollama_host.clone(),
            clear_ollama_host: self.clear_ollama_host,
            show_explanation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn schema_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn words_keep_hyphenated_arguments() {
        let cli = Cli::try_parse_from(["tutr", "-e", "git", "log", "--oneline", "last", "week"])
            .expect("parse");
        assert!(cli.explain);
        assert_eq!(cli.words, ["git", "log", "--oneline", "last", "week"]);
        assert!(cli.command.is_none());
    }

    #[test]
    fn subcommands_do_not_need_words() {
        let cli = Cli::try_parse_from(["tutr", "shell", "-d"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Shell { debug: true })));
    }

    #[test]
    fn leading_subcommand_name_needs_the_escape() {
        assert!(Cli::try_parse_from(["tutr", "shell", "script", "to", "rename", "files"]).is_err());

        let cli = Cli::try_parse_from(["tutr", "--", "shell", "script", "to", "rename", "files"])
            .expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.words, ["shell", "script", "to", "rename", "files"]);

        let cli = Cli::try_parse_from(["tutr", "-e", "--", "configure", "nginx", "proxy"])
            .expect("parse");
        assert!(cli.explain);
        assert_eq!(cli.words, ["configure", "nginx", "proxy"]);
    }

    #[test]
    fn subcommand_names_later_in_a_query_stay_words() {
        let cli = Cli::try_parse_from(["tutr", "find", "shell", "scripts", "to", "configure"])
            .expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.words, ["find", "shell", "scripts", "to", "configure"]);
    }

    #[test]
    fn bare_invocation_requires_words() {
        assert!(Cli::try_parse_from(["tutr"]).is_err());
    }

    #[test]
    fn configure_flags_map_to_options() {
        let cli = Cli::try_parse_from([
            "tutr",
            "configure",
            "--provider",
            "ollama",
            "--hide-explanation",
            "--clear-api-key",
        ])
        .expect("parse");
        let Some(Commands::Configure(args)) = cli.command else {
            panic!("expected configure");
        };
        let options = args.options();
        assert_eq!(options.provider.as_deref(), Some("ollama"));
        assert_eq!(options.show_explanation, Some(false));
        assert!(options.clear_api_key);
        assert!(options.has_explicit_options());
    }

    #[test]
    fn contradictory_configure_flags_are_rejected() {
        for args in [
            ["tutr", "configure", "--api-key=k", "--clear-api-key"],
            ["tutr", "configure", "--ollama-host=h", "--clear-ollama-host"],
            ["tutr", "configure", "--show-explanation", "--hide-explanation"],
        ] {
            let err = Cli::try_parse_from(args).expect_err("conflict");
            assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
        }
    }
}
