#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod error;
pub mod processor;
pub mod queue;
pub mod stats;

pub use error::QueueError;
pub use processor::Processor;
pub use queue::MessageQueue;
pub use stats::{QueueStats, StatsSnapshot};
