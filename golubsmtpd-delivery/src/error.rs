use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("failed to create maildir directory {path}: {source}")]
    CreateMaildir { path: PathBuf, source: io::Error },

    #[error("permission denied writing {path}")]
    Permission { path: PathBuf },

    #[error("i/o error delivering message: {0}")]
    Io(#[from] io::Error),

    #[error("no such local user: {0}")]
    UnknownUser(String),

    #[error("invalid recipient address: {0}")]
    InvalidRecipient(String),

    #[error("delivery timed out after {0} seconds")]
    Timeout(u64),

    #[error("delivery cancelled by shutdown")]
    Cancelled,
}
