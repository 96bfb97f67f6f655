//! Authentication collaborators.
//!
//! The daemon holds exactly one [`Authenticator`] for its lifetime. It is
//! consulted for AUTH credentials and for virtual-mailbox existence checks
//! during RCPT TO, and closed once after the queue has stopped.

mod file;
mod mechanisms;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;

pub use file::FileAuthenticator;
pub use mechanisms::{decode_base64, decode_plain, encode_base64, AuthError};
pub use memory::MemoryAuthenticator;

use crate::config::AuthConfig;

/// Outcome of a credential check.
#[derive(Debug, Clone, Default)]
pub struct AuthResult {
    pub success: bool,
    pub username: String,
    pub error: Option<String>,
}

impl AuthResult {
    pub fn success(username: impl Into<String>) -> Self {
        Self {
            success: true,
            username: username.into(),
            error: None,
        }
    }

    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            username: String::new(),
            error: Some(error.into()),
        }
    }
}

/// Pluggable user store.
#[async_trait]
pub trait Authenticator: Send + Sync + std::fmt::Debug {
    /// Check a username/password pair.
    async fn authenticate(&self, username: &str, password: &str) -> AuthResult;

    /// Whether a mailbox exists for the given address.
    async fn user_exists(&self, email: &str) -> bool;

    /// Release any resources. Called once at shutdown.
    async fn close(&self) {}
}

/// Build the configured authenticator.
pub fn from_config(config: &AuthConfig) -> std::io::Result<Arc<dyn Authenticator>> {
    match config.plugin.as_str() {
        "file" => Ok(Arc::new(FileAuthenticator::load(config.file.path.as_ref())?)),
        _ => Ok(Arc::new(MemoryAuthenticator::new(
            config.memory.users.clone(),
        ))),
    }
}

/// Local part of an email address, or the whole string when there is no `@`.
pub fn extract_username(email: &str) -> &str {
    email.split('@').next().unwrap_or(email)
}

/// Split an address into local part and domain. The domain is empty when
/// there is no `@`.
pub fn split_address(email: &str) -> (&str, &str) {
    match email.split_once('@') {
        Some((local, domain)) => (local, domain),
        None => (email, ""),
    }
}
