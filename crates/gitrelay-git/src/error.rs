//! Error types for gitrelay-git

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Cannot parse git push info: {0}")]
    PushMetadata(String),

    #[error("Unknown service: {0}")]
    UnknownService(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
