use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("connection i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("client timed out after {0} seconds")]
    Timeout(u64),

    #[error("command line too long")]
    LineTooLong,

    #[error("command line is not valid UTF-8")]
    InvalidUtf8,

    #[error("connection closed by peer")]
    ConnectionClosed,
}

/// Address validation failures, surfaced to the client as `501`.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("email address cannot be empty")]
    Empty,

    #[error("email address too long: {0} characters (max {1})")]
    TooLong(usize, usize),

    #[error("local part too long: {0} characters (max {1})")]
    LocalTooLong(usize, usize),

    #[error("domain part too long: {0} characters (max {1})")]
    DomainTooLong(usize, usize),

    #[error("invalid email format: {0}")]
    Format(String),

    #[error("extended validation failed: {0}")]
    Extended(String),

    #[error("MX record validation failed: {0}")]
    Mx(String),

    #[error("A record validation failed: {0}")]
    ARecord(String),
}
