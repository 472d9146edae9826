//! Fatal/config-level error types.
//!
//! Hot-path control flow (lock acquisition, commit, abort) never goes
//! through this type — see `rowcc_core::rc::Rc`. This type is for errors
//! that stop the process or a CLI invocation cold: bad configuration,
//! unreadable files, a workload kind that isn't implemented.

use thiserror::Error;

/// Result type alias using rowcc's `Error` type.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<toml::de::Error> for Error {
    fn from(e: toml::de::Error) -> Self {
        Error::Config(format!("failed to parse TOML config: {e}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
