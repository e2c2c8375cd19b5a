//! Unified error types for netpath

use std::fmt;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Classification of an OS networking failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity already exists (name collision)
    Conflict,
    /// Operation requested from a state that does not allow it
    Precondition,
    /// Entity is absent
    NotFound,
    /// Insufficient privilege or missing OS feature/tool
    Environment,
    /// Anything the tools report that we cannot classify
    Unknown,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Conflict => "conflict",
            ErrorKind::Precondition => "precondition",
            ErrorKind::NotFound => "not found",
            ErrorKind::Environment => "permission/environment",
            ErrorKind::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Main error type for netpath operations
#[derive(Error, Debug)]
pub enum Error {
    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    // Config errors
    #[error("Failed to read config file '{path}': {source}")]
    ConfigRead { path: PathBuf, source: io::Error },

    #[error("Failed to parse config: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config validation failed: {0}")]
    ConfigValidation(String),

    // OS networking errors
    #[error("{entity}: already exists: {message}")]
    Conflict { entity: String, message: String },

    #[error("{entity}: precondition failed: {message}")]
    Precondition { entity: String, message: String },

    #[error("{entity}: not found: {message}")]
    NotFound { entity: String, message: String },

    #[error("{entity}: permission/environment: {message}")]
    Environment { entity: String, message: String },

    #[error("{entity}: {message}")]
    Unknown { entity: String, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to parse output of '{command}': {message}")]
    OutputParse { command: String, message: String },

    // Session errors
    #[error("Step {step} failed on '{entity}': {source}")]
    StepFailed {
        step: String,
        entity: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Invalid state transition: {0}")]
    Transition(String),

    #[error("Teardown left {0} error(s) behind")]
    TeardownIncomplete(usize),

    #[error("Session lock '{0}' is held by another process")]
    Locked(PathBuf),
}

impl Error {
    /// Build an OS error of the given kind
    pub fn os(kind: ErrorKind, entity: impl Into<String>, message: impl Into<String>) -> Self {
        let entity = entity.into();
        let message = message.into();
        match kind {
            ErrorKind::Conflict => Error::Conflict { entity, message },
            ErrorKind::Precondition => Error::Precondition { entity, message },
            ErrorKind::NotFound => Error::NotFound { entity, message },
            ErrorKind::Environment => Error::Environment { entity, message },
            ErrorKind::Unknown => Error::Unknown { entity, message },
        }
    }

    /// Classify this error
    ///
    /// Step failures report the kind of the underlying OS error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Conflict { .. } | Error::Locked(_) => ErrorKind::Conflict,
            Error::Precondition { .. } | Error::Transition(_) => ErrorKind::Precondition,
            Error::ConfigValidation(_) => ErrorKind::Precondition,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::Environment { .. } => ErrorKind::Environment,
            Error::ConfigRead { .. } | Error::Io(_) => ErrorKind::Environment,
            Error::StepFailed { source, .. } => source.kind(),
            _ => ErrorKind::Unknown,
        }
    }

    /// True when the entity was simply absent
    pub fn is_not_found(&self) -> bool {
        self.kind() == ErrorKind::NotFound
    }
}

/// Result type alias for netpath operations
pub type Result<T> = std::result::Result<T, Error>;
