use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the evaluation workflow
#[derive(Debug, Error)]
pub enum EvalError {
    /// Missing or invalid configuration; always raised before any remote call
    #[error("configuration error: {0}")]
    Config(String),

    /// A required environment variable is not set
    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    /// A local input file could not be read
    #[error("input file {}: {source}", .path.display())]
    InputFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The remote service rejected a call
    #[error("{operation} failed{}: {message}", http_suffix(.status))]
    Remote {
        operation: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Response generation against a model or agent failed
    #[error("generation failed: {0}")]
    Generation(String),

    /// A bounded poll loop gave up before the run became terminal
    #[error("run {run_id} still not terminal after {polls} polls")]
    PollLimit { run_id: String, polls: u32 },

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl EvalError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Whether this error belongs to the configuration class
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::MissingEnv(_) | Self::InputFile { .. }
        )
    }
}

fn http_suffix(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!(" (HTTP {code})"),
        None => String::new(),
    }
}

pub type Result<T> = std::result::Result<T, EvalError>;
