use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QueueError {
    /// The buffer stayed full for the whole publish wall budget.
    #[error("queue full")]
    Full,

    /// The publisher side has been closed; no new messages are accepted.
    #[error("queue closed")]
    Closed,

    /// Processors were still running when the shutdown deadline expired.
    #[error("queue shutdown deadline exceeded")]
    ShutdownTimeout,
}
