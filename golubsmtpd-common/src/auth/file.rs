//! Flat-file user store.
//!
//! One `user@domain:password` entry per line, `#` comments and blank lines
//! skipped. The whole file is read once at startup.

use std::{io, path::Path};

use ahash::AHashMap;
use async_trait::async_trait;
use tracing::warn;

use super::{AuthResult, Authenticator, MemoryAuthenticator};

#[derive(Debug)]
pub struct FileAuthenticator {
    inner: MemoryAuthenticator,
}

impl FileAuthenticator {
    pub fn load(path: &Path) -> io::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let mut users = AHashMap::new();

        for (line_no, line) in raw.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match line.split_once(':') {
                Some((email, password)) if !email.is_empty() => {
                    users.insert(email.trim().to_string(), password.to_string());
                }
                _ => warn!(line = line_no + 1, "skipping malformed auth file line"),
            }
        }

        Ok(Self {
            inner: MemoryAuthenticator::new(users),
        })
    }
}

#[async_trait]
impl Authenticator for FileAuthenticator {
    async fn authenticate(&self, username: &str, password: &str) -> AuthResult {
        self.inner.authenticate(username, password).await
    }

    async fn user_exists(&self, email: &str) -> bool {
        self.inner.user_exists(email).await
    }
}
