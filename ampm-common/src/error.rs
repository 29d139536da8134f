use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum AmpmError {
    #[error("Artifact not found matching query: {0}")]
    NotFound(String),

    #[error("Ambiguous artifact query: {query}")]
    AmbiguousQuery {
        query: String,
        /// Attribute names whose values differ between the surviving candidates.
        attributes: Vec<String>,
        /// Short-formatted candidate records, for the error report.
        options: Vec<String>,
    },

    #[error("Malformed attribute expression `{expr}`: {reason}")]
    MalformedExpression { expr: String, reason: String },

    #[error("Attribute `{attribute}` value `{value}` is not a valid {expected}")]
    TypeMismatch {
        attribute: String,
        value: String,
        expected: &'static str,
    },

    #[error("Malformed metadata record: {0}")]
    Format(String),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },

    #[error("Not available offline: {0}")]
    OfflineMiss(String),

    #[error("Metadata fingerprint mismatch for {}: file says {claimed}, record is {actual}", path.display())]
    Integrity {
        path: PathBuf,
        claimed: String,
        actual: String,
    },

    #[error("Remote repo cannot be contacted: {0}")]
    Connect(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Interrupted")]
    Interrupted,
}

impl AmpmError {
    /// Attaches the offending path to an I/O error.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        AmpmError::Io {
            path: path.into(),
            source: Arc::new(source),
        }
    }

    /// Process exit code for the CLI surface.
    pub fn exit_code(&self) -> i32 {
        match self {
            AmpmError::NotFound(_) | AmpmError::OfflineMiss(_) => 2,
            AmpmError::AmbiguousQuery { .. } => 3,
            AmpmError::MalformedExpression { .. }
            | AmpmError::TypeMismatch { .. }
            | AmpmError::Format(_)
            | AmpmError::Config(_)
            | AmpmError::InvalidInput(_) => 4,
            AmpmError::Io { .. } | AmpmError::Integrity { .. } | AmpmError::Connect(_) => 5,
            AmpmError::Interrupted => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, AmpmError>;
