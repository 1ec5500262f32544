//! One-shot query pipeline: split input, gather docs, ask the model.

use crate::config::TutrConfig;
use crate::context::{gather_context, system_info};
use crate::llm::{query_llm, ChatModel, CommandResponse, LlmClient, LlmError};
use crate::prompt::build_messages;
use thiserror::Error;
use tracing::debug;

pub const MAX_QUERY_LENGTH: usize = 1000;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error(
        "Query is too long ({0} characters). Please keep queries under {MAX_QUERY_LENGTH} characters."
    )]
    TooLong(usize),

    #[error(transparent)]
    Llm(#[from] LlmError),
}

/// What the user asked for, with an optional command to pull docs for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryRequest {
    pub command_hint: Option<String>,
    pub free_text: String,
}

/// Anything that can turn a request into one suggested command.
pub trait CommandQuery {
    /// # Errors
    ///
    /// Returns [`QueryError`] when the model call fails.
    fn query(&self, request: &QueryRequest, config: &TutrConfig)
        -> Result<CommandResponse, QueryError>;
}

/// The production querier: local docs plus a provider round-trip.
#[derive(Default)]
pub struct LlmQuery {
    model: Option<Box<dyn ChatModel + Send + Sync>>,
}

impl LlmQuery {
    /// Use the provider named by each call's config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Route every request through `model` instead of a provider client.
    #[must_use]
    pub fn with_model(model: Box<dyn ChatModel + Send + Sync>) -> Self {
        Self { model: Some(model) }
    }
}

impl CommandQuery for LlmQuery {
    fn query(
        &self,
        request: &QueryRequest,
        config: &TutrConfig,
    ) -> Result<CommandResponse, QueryError> {
        let cmd = request.command_hint.as_deref();
        let context = gather_context(cmd);
        let messages = build_messages(cmd, &request.free_text, &context, &system_info());
        let response = match &self.model {
            Some(model) => query_llm(&messages, model.as_ref())?,
            None => query_llm(&messages, &LlmClient::from_config(config)?)?,
        };
        debug!(command = %response.command, "model suggested command");
        Ok(response)
    }
}

/// Split CLI words into `(command, query)`.
///
/// The first word counts as a command only when it resolves on `PATH`.
#[must_use]
pub fn parse_input(words: &[String]) -> (Option<String>, String) {
    let Some((first, rest)) = words.split_first() else {
        return (None, String::new());
    };
    let parsed = if which::which(first).is_ok() {
        (Some(first.clone()), rest.join(" "))
    } else {
        (None, words.join(" "))
    };
    debug!(cmd = ?parsed.0, query = %parsed.1, "parsed input");
    parsed
}

/// # Errors
///
/// Returns [`QueryError::TooLong`] past [`MAX_QUERY_LENGTH`] characters.
pub fn validate_query_length(query: &str) -> Result<(), QueryError> {
    let len = query.chars().count();
    if len > MAX_QUERY_LENGTH {
        return Err(QueryError::TooLong(len));
    }
    Ok(())
}

/// Parse `words`, validate, and run them through `querier`.
///
/// # Errors
///
/// Returns [`QueryError`] for over-long queries or model failures.
pub fn run(
    words: &[String],
    config: &TutrConfig,
    querier: &dyn CommandQuery,
) -> Result<CommandResponse, QueryError> {
    let (command_hint, free_text) = parse_input(words);
    validate_query_length(&free_text)?;
    querier.query(
        &QueryRequest {
            command_hint,
            free_text,
        },
        config,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ChatMessage;
    use std::sync::{Arc, Mutex};

    fn words(input: &str) -> Vec<String> {
        input.split_whitespace().map(ToString::to_string).collect()
    }

    #[derive(Clone, Default)]
    struct RecordingModel {
        seen: Arc<Mutex<Vec<ChatMessage>>>,
    }

    impl ChatModel for RecordingModel {
        fn complete(&self, messages: &[ChatMessage]) -> Result<String, LlmError> {
            self.seen
                .lock()
                .expect("lock")
                .extend_from_slice(messages);
            Ok(r#"{"command": "ls -a", "explanation": "Show hidden files."}"#.to_string())
        }
    }

    #[test]
    fn unknown_first_word_is_part_of_the_query() {
        let (cmd, query) = parse_input(&words("tutr-not-a-binary how do i list files"));
        assert_eq!(cmd, None);
        assert_eq!(query, "tutr-not-a-binary how do i list files");
    }

    #[cfg(unix)]
    #[test]
    fn executable_first_word_becomes_the_command() {
        let (cmd, query) = parse_input(&words("sh run a script"));
        assert_eq!(cmd.as_deref(), Some("sh"));
        assert_eq!(query, "run a script");
        let (cmd, query) = parse_input(&words("sh"));
        assert_eq!(cmd.as_deref(), Some("sh"));
        assert_eq!(query, "");
    }

    #[test]
    fn query_length_is_bounded_in_characters() {
        assert!(validate_query_length(&"é".repeat(MAX_QUERY_LENGTH)).is_ok());
        let err = validate_query_length(&"a".repeat(MAX_QUERY_LENGTH + 1)).expect_err("too long");
        assert!(err.to_string().starts_with("Query is too long (1001 characters)"));
    }

    #[test]
    fn run_sends_the_request_through_the_model() {
        let model = RecordingModel::default();
        let querier = LlmQuery::with_model(Box::new(model.clone()));
        let response = run(
            &words("tutr-not-a-binary show hidden files"),
            &TutrConfig::default(),
            &querier,
        )
        .expect("query");
        assert_eq!(response.command, "ls -a");
        assert_eq!(response.explanation, "Show hidden files.");
        let seen = model.seen.lock().expect("lock");
        assert!(seen[1]
            .content
            .ends_with("What I want to do: tutr-not-a-binary show hidden files"));
        assert!(!seen[1].content.contains("Command:"));
    }

    #[test]
    fn too_long_query_never_reaches_the_model() {
        let model = RecordingModel::default();
        let querier = LlmQuery::with_model(Box::new(model.clone()));
        let long = vec!["x".repeat(MAX_QUERY_LENGTH + 5)];
        assert!(matches!(
            run(&long, &TutrConfig::default(), &querier),
            Err(QueryError::TooLong(_))
        ));
        assert!(model.seen.lock().expect("lock").is_empty());
    }
}
