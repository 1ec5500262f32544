//! Shared tutr library so the one-shot CLI and the shell supervisor resolve
//! configuration and safety checks the same way.

pub mod config;
pub mod configure;
pub mod context;
pub mod format;
pub mod llm;
mod logging;
#[cfg(unix)]
mod process_signal;
pub mod prompt;
pub mod query;
pub mod safety;
pub mod shell;
#[cfg(unix)]
pub mod terminal_restore;
pub mod update_check;

pub use config::TutrConfig;
pub use llm::{CommandResponse, LlmError};
pub use logging::{init_logging, log_file_path, LogTarget};
pub use query::{CommandQuery, LlmQuery, QueryError, QueryRequest};
