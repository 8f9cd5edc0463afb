//! Error types.

use thiserror::Error;

/// Errors that can occur while talking to the orchestrator or driving jobs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConsoleError {
    /// The request never reached the orchestrator (connect, timeout, decode).
    #[error("transport: {0}")]
    Transport(String),

    /// The orchestrator answered with a non-success HTTP status.
    #[error("http {status}: {message}")]
    Http { status: u16, message: String },

    /// The orchestrator answered, but not in the shape we expect.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The job reached its terminal failed state. `message` is the
    /// orchestrator's error text, unmodified.
    #[error("{message}")]
    JobFailure { job_id: String, message: String },

    /// An action was requested that the resource's current state does not offer.
    #[error("action '{action}' is not permitted on {kind} {id} in its current state")]
    InvalidStateTransition {
        kind: String,
        id: String,
        action: String,
    },

    /// The operation was cancelled before a terminal outcome was known.
    #[error("cancelled")]
    Cancelled,

    /// A step needed a value that no earlier step produced.
    #[error("missing context value: {0}")]
    MissingContext(String),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),
}

impl ConsoleError {
    /// The orchestrator-supplied error text for job failures, the rendered
    /// error otherwise.
    pub fn reason(&self) -> String {
        match self {
            ConsoleError::JobFailure { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<reqwest::Error> for ConsoleError {
    fn from(e: reqwest::Error) -> Self {
        ConsoleError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for ConsoleError {
    fn from(e: serde_json::Error) -> Self {
        ConsoleError::MalformedResponse(e.to_string())
    }
}

/// A chain aborted at its first failing step.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("chain '{chain}' failed at step {index} '{step}': {source}")]
pub struct ChainError {
    pub chain: String,
    pub step: String,
    /// Zero-based position of the failing step.
    pub index: usize,
    #[source]
    pub source: ConsoleError,
}

impl ChainError {
    /// The literal error text of the failing step.
    pub fn reason(&self) -> String {
        self.source.reason()
    }
}

/// A requested action was refused up front or its chain failed.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Refused before any step ran (state lookup failed or the action is
    /// not offered in the current state).
    #[error(transparent)]
    Console(#[from] ConsoleError),

    #[error(transparent)]
    Chain(#[from] ChainError),
}

/// Result type for console operations.
pub type Result<T> = std::result::Result<T, ConsoleError>;
