#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod error;
pub mod local;
pub mod maildir;
pub mod relay;
pub mod virtual_user;
pub mod worker;

use core::fmt::{self, Display, Formatter};

pub use error::DeliveryError;
pub use relay::{LogOnlyRelay, RelayDelivery};
pub use worker::{deliver_with_workers, effective_workers};

/// Category a recipient falls into, decided by its envelope domain. Every
/// domain maps to exactly one class; `External` is the default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientClass {
    Local,
    Virtual,
    Relay,
    External,
}

impl RecipientClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Virtual => "virtual",
            Self::Relay => "relay",
            Self::External => "external",
        }
    }
}

impl Display for RecipientClass {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregated outcome of one class-level delivery run.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub class: RecipientClass,
    pub successful: Vec<String>,
    pub failed: Vec<String>,
}

impl DeliveryResult {
    pub fn empty(class: RecipientClass) -> Self {
        Self {
            class,
            successful: Vec::new(),
            failed: Vec::new(),
        }
    }
}

/// Outcome of one per-recipient delivery attempt.
#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub recipient: String,
    pub success: bool,
}
