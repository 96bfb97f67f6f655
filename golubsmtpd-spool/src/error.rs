use std::{io, path::PathBuf};

use thiserror::Error;

use crate::state::SpoolState;

#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("failed to create spool directory {path}: {source}")]
    CreateDir { path: PathBuf, source: io::Error },

    #[error("spool path {0} exists but is not a directory")]
    NotADirectory(PathBuf),

    #[error("failed to move message {id} from {from} to {to}: {source}")]
    Move {
        id: String,
        from: SpoolState,
        to: SpoolState,
        source: io::Error,
    },
}

#[derive(Debug, Error)]
pub enum IngestorError {
    #[error("failed to create spool file: {0}")]
    Create(io::Error),

    #[error("i/o error while streaming message data: {0}")]
    Io(#[from] io::Error),

    #[error("message size exceeds limit of {limit} bytes")]
    SizeLimit { limit: usize },

    #[error("timeout waiting for message data")]
    Timeout,

    #[error("cancelled while streaming message data")]
    Cancelled,
}
