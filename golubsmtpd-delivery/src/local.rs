//! Delivery into local system users' home maildirs.
//!
//! Recipients were already validated against the system user database at
//! RCPT TO time, so a failed lookup here is unexpected and simply fails the
//! recipient.

use std::{path::Path, time::Duration};

use golubsmtpd_common::auth::extract_username;
use golubsmtpd_spool::MessageId;
use tracing::info;

use crate::{error::DeliveryError, maildir};

/// Per-recipient wall budget for local delivery.
pub const LOCAL_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolve `~user/Maildir` through the system user database.
async fn local_maildir_base(username: &str) -> Result<std::path::PathBuf, DeliveryError> {
    let name = username.to_string();
    let user = tokio::task::spawn_blocking(move || nix::unistd::User::from_name(&name))
        .await
        .map_err(|err| DeliveryError::Io(std::io::Error::other(err)))?
        .map_err(|err| DeliveryError::Io(std::io::Error::other(err)))?;

    match user {
        Some(user) => Ok(user.dir.join("Maildir")),
        None => Err(DeliveryError::UnknownUser(username.to_string())),
    }
}

/// Deliver one spooled body to one local recipient.
pub async fn deliver_to_local_user(
    message_path: &Path,
    id: &MessageId,
    recipient: &str,
) -> Result<(), DeliveryError> {
    let username = extract_username(recipient);

    let delivery = async {
        let base = local_maildir_base(username).await?;
        maildir::deliver_to_maildir(message_path, &base, id).await
    };

    tokio::time::timeout(LOCAL_DELIVERY_TIMEOUT, delivery)
        .await
        .map_err(|_| DeliveryError::Timeout(LOCAL_DELIVERY_TIMEOUT.as_secs()))??;

    info!(recipient, username, %id, "local delivery successful");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.eml");
        std::fs::write(&body, b"x\r\n").unwrap();

        let id = MessageId::generate();
        let result =
            deliver_to_local_user(&body, &id, "no-such-user-golub@local.example").await;
        assert!(matches!(result, Err(DeliveryError::UnknownUser(_))));
    }
}
