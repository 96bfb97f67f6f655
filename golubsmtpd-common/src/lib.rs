#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod aliases;
pub mod auth;
pub mod config;
pub mod logging;

pub use tracing;

/// Process-wide shutdown signal, fanned out over a broadcast channel.
///
/// Every long-running task holds its own receiver and selects on it
/// alongside its work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Shutdown,
}
