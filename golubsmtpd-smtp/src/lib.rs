#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod cache;
pub mod command;
pub mod connection;
pub mod email;
pub mod error;
pub mod rcpt;
pub mod session;
pub mod status;

pub use cache::TtlCache;
pub use command::Command;
pub use connection::Connection;
pub use email::{EmailAddress, EmailValidator};
pub use error::SessionError;
pub use rcpt::RcptValidator;
pub use session::{Session, SessionContext};
pub use status::Status;
