//! In-memory user store seeded from the configuration.

use ahash::AHashMap;
use async_trait::async_trait;

use super::{AuthResult, Authenticator};

#[derive(Debug, Default)]
pub struct MemoryAuthenticator {
    users: AHashMap<String, String>,
}

impl MemoryAuthenticator {
    pub fn new(users: AHashMap<String, String>) -> Self {
        Self { users }
    }

    pub fn with_user(mut self, email: impl Into<String>, password: impl Into<String>) -> Self {
        self.users.insert(email.into(), password.into());
        self
    }
}

/// Compare without short-circuiting on the first mismatching byte.
fn eq_constant_time(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[async_trait]
impl Authenticator for MemoryAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> AuthResult {
        match self.users.get(username) {
            Some(expected) if eq_constant_time(expected, password) => {
                AuthResult::success(username)
            }
            Some(_) => AuthResult::failure("invalid password"),
            None => AuthResult::failure("unknown user"),
        }
    }

    async fn user_exists(&self, email: &str) -> bool {
        self.users.contains_key(email)
    }
}
