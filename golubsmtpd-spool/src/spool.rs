//! On-disk spool: four state directories under one root, with atomic
//! renames between them.
//!
//! Synchronisation between components is carried entirely by filesystem
//! atomicity (exclusive create, rename within one filesystem); the spool
//! itself holds no locks.

use std::{
    fs::DirBuilder,
    os::unix::fs::DirBuilderExt,
    path::{Path, PathBuf},
};

use tracing::debug;

use crate::{error::SpoolError, message::Message, state::SpoolState};

#[derive(Debug, Clone)]
pub struct Spool {
    root: PathBuf,
}

impl Spool {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the state directories with mode `0700`. Idempotent.
    pub fn init(&self) -> Result<(), SpoolError> {
        for state in SpoolState::ALL {
            let dir = self.state_dir(state);
            if dir.is_dir() {
                continue;
            }
            if dir.exists() {
                return Err(SpoolError::NotADirectory(dir));
            }
            DirBuilder::new()
                .recursive(true)
                .mode(0o700)
                .create(&dir)
                .map_err(|source| SpoolError::CreateDir { path: dir, source })?;
        }
        debug!(root = %self.root.display(), "spool initialised");
        Ok(())
    }

    pub fn state_dir(&self, state: SpoolState) -> PathBuf {
        self.root.join(state.as_str())
    }

    /// Pure path computation for a message body in the given state.
    pub fn message_path(&self, state: SpoolState, message: &Message) -> PathBuf {
        self.state_dir(state).join(message.filename())
    }

    /// Atomically move a message body between states. Not retried; the
    /// caller decides what a failed transition means.
    pub async fn move_message(
        &self,
        message: &Message,
        from: SpoolState,
        to: SpoolState,
    ) -> Result<(), SpoolError> {
        let source = self.message_path(from, message);
        let target = self.message_path(to, message);

        tokio::fs::rename(&source, &target)
            .await
            .map_err(|source| SpoolError::Move {
                id: message.id.to_string(),
                from,
                to,
                source,
            })?;

        debug!(id = %message.id, %from, %to, "message moved");
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::PermissionsExt;

    use super::*;

    #[test]
    fn init_creates_all_state_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path().join("spool"));
        spool.init().unwrap();

        for state in SpoolState::ALL {
            let path = spool.state_dir(state);
            assert!(path.is_dir(), "{state} missing");
            let mode = path.metadata().unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o700);
        }

        // A second init over the existing tree succeeds.
        spool.init().unwrap();
    }

    #[test]
    fn init_rejects_non_directory_entry() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());
        std::fs::write(dir.path().join("incoming"), b"file").unwrap();
        assert!(matches!(spool.init(), Err(SpoolError::NotADirectory(_))));
    }

    #[tokio::test]
    async fn move_is_reversible() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());
        spool.init().unwrap();

        let message = Message::new("127.0.0.1", "client.example");
        let incoming = spool.message_path(SpoolState::Incoming, &message);
        std::fs::write(&incoming, b"body\r\n").unwrap();

        spool
            .move_message(&message, SpoolState::Incoming, SpoolState::Processing)
            .await
            .unwrap();
        assert!(!incoming.exists());
        assert!(spool.message_path(SpoolState::Processing, &message).exists());

        spool
            .move_message(&message, SpoolState::Processing, SpoolState::Incoming)
            .await
            .unwrap();
        assert!(incoming.exists());
        assert_eq!(std::fs::read(&incoming).unwrap(), b"body\r\n");
    }

    #[tokio::test]
    async fn move_missing_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let spool = Spool::new(dir.path());
        spool.init().unwrap();

        let message = Message::new("127.0.0.1", "client.example");
        let result = spool
            .move_message(&message, SpoolState::Incoming, SpoolState::Processing)
            .await;
        assert!(matches!(result, Err(SpoolError::Move { .. })));
    }
}
