#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod error;
pub mod ingestor;
pub mod message;
pub mod spool;
pub mod state;

pub use error::{IngestorError, SpoolError};
pub use ingestor::ingest_body;
pub use message::{Message, MessageId};
pub use spool::Spool;
pub use state::SpoolState;
