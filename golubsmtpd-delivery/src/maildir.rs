//! Maildir plumbing shared by local and virtual delivery.
//!
//! One file per message, written into `tmp/` and renamed into `new/` so a
//! mailbox reader never observes a partial body.

use std::{
    fs::DirBuilder,
    os::unix::fs::{DirBuilderExt, OpenOptionsExt},
    path::Path,
};

use chrono::Utc;
use golubsmtpd_spool::MessageId;
use tokio::io::AsyncWriteExt;

use crate::error::DeliveryError;

const MAILDIR_SUBDIRS: [&str; 3] = ["new", "cur", "tmp"];

/// Create `new/`, `cur/` and `tmp/` under the maildir base with mode
/// `0700`. Idempotent.
pub fn ensure_maildir(base: &Path) -> Result<(), DeliveryError> {
    for sub in MAILDIR_SUBDIRS {
        let dir = base.join(sub);
        if dir.is_dir() {
            continue;
        }
        DirBuilder::new()
            .recursive(true)
            .mode(0o700)
            .create(&dir)
            .map_err(|source| match source.kind() {
                std::io::ErrorKind::PermissionDenied => DeliveryError::Permission { path: dir },
                _ => DeliveryError::CreateMaildir { path: dir, source },
            })?;
    }
    Ok(())
}

/// Unique delivery file name: `<timestamp>.<pid>.<message-id>.golubsmtpd`.
pub fn unique_filename(id: &MessageId) -> String {
    let timestamp = Utc::now().format("%Y%m%dT%H%M%SZ");
    let pid = std::process::id();
    format!("{timestamp}.{pid}.{id}.golubsmtpd")
}

/// Stream one spooled body into a maildir.
pub async fn deliver_to_maildir(
    message_path: &Path,
    maildir_base: &Path,
    id: &MessageId,
) -> Result<(), DeliveryError> {
    ensure_maildir(maildir_base)?;

    let filename = unique_filename(id);
    let temp_path = maildir_base.join("tmp").join(&filename);
    let final_path = maildir_base.join("new").join(&filename);

    let mut source = tokio::fs::File::open(message_path).await?;
    let mut target = tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&temp_path)
        .await
        .map_err(|source| match source.kind() {
            std::io::ErrorKind::PermissionDenied => DeliveryError::Permission { path: temp_path.clone() },
            _ => DeliveryError::Io(source),
        })?;

    let result = async {
        tokio::io::copy(&mut source, &mut target).await?;
        target.sync_all().await?;
        Ok::<_, std::io::Error>(())
    }
    .await;

    drop(target);
    if let Err(err) = result {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }

    if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }

    Ok(())
}
