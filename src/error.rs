// src/error.rs

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Fatal setup failures.
///
/// Anything that becomes a `SetupError` stops the container start with exit
/// status 1. Recoverable problems (missing config files, missing TLS material,
/// an existing database with unknown collation) are logged as warnings and
/// never reach this type.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("Both variables {var} and {file_var} are set (but are exclusive)")]
    AmbiguousSecret { var: String, file_var: String },

    #[error("Secret file \"{}\" is not found", path.display())]
    MissingSecretFile { path: PathBuf },

    #[error("Failed to read secret file \"{}\": {source}", path.display())]
    SecretFileRead { path: PathBuf, source: io::Error },

    #[error("Impossible to use MySQL server: {0}")]
    CredentialPolicy(&'static str),

    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("MySQL server is still not available after {0} attempts")]
    DatabaseUnavailable(u32),

    #[error("{context}: {message}")]
    Command { context: &'static str, message: String },

    #[error("Unknown instructions. Exiting...")]
    NoHandoffTarget,

    #[error("Failed to execute '{program}': {source}")]
    Exec { program: String, source: io::Error },
}

impl SetupError {
    /// Wraps a collaborator failure (`Result<_, String>` from the system
    /// managers) with the pipeline step it happened in.
    pub fn command(context: &'static str) -> impl FnOnce(String) -> Self {
        move |message| Self::Command { context, message }
    }
}

pub type SetupResult<T> = Result<T, SetupError>;
