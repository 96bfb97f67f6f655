#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

pub mod gate;
pub mod server;

pub use gate::{AllowAllGate, ConnectionGate};
pub use server::Server;
