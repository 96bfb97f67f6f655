//! Delivery into hosted (virtual) mailboxes under the configured base
//! directory: `<base>/<domain>/<user>/Maildir/new/`.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use golubsmtpd_common::auth::split_address;
use golubsmtpd_spool::MessageId;
use tracing::info;

use crate::{error::DeliveryError, maildir};

/// Per-recipient wall budget for virtual delivery.
pub const VIRTUAL_DELIVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Maildir base for a virtual recipient.
pub fn virtual_maildir_base(recipient: &str, virtual_root: &Path) -> Result<PathBuf, DeliveryError> {
    let (local, domain) = split_address(recipient);
    if local.is_empty() || domain.is_empty() {
        return Err(DeliveryError::InvalidRecipient(recipient.to_string()));
    }
    Ok(virtual_root.join(domain).join(local).join("Maildir"))
}

/// Deliver one spooled body to one virtual recipient.
pub async fn deliver_to_virtual_user(
    message_path: &Path,
    id: &MessageId,
    recipient: &str,
    virtual_root: &Path,
) -> Result<(), DeliveryError> {
    let base = virtual_maildir_base(recipient, virtual_root)?;

    let delivery = maildir::deliver_to_maildir(message_path, &base, id);
    tokio::time::timeout(VIRTUAL_DELIVERY_TIMEOUT, delivery)
        .await
        .map_err(|_| DeliveryError::Timeout(VIRTUAL_DELIVERY_TIMEOUT.as_secs()))??;

    info!(recipient, %id, maildir = %base.display(), "virtual delivery successful");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn base_path_layout() {
        let base =
            virtual_maildir_base("carol@hosted.example", Path::new("/srv/vmail")).unwrap();
        assert_eq!(
            base,
            Path::new("/srv/vmail/hosted.example/carol/Maildir")
        );
    }

    #[test]
    fn rejects_bare_recipient() {
        assert!(matches!(
            virtual_maildir_base("carol", Path::new("/srv/vmail")),
            Err(DeliveryError::InvalidRecipient(_))
        ));
    }

    #[tokio::test]
    async fn delivers_under_domain_and_user() {
        let dir = tempfile::tempdir().unwrap();
        let body = dir.path().join("body.eml");
        std::fs::write(&body, b"hello\r\n").unwrap();

        let id = MessageId::generate();
        deliver_to_virtual_user(&body, &id, "carol@hosted.example", dir.path())
            .await
            .unwrap();

        let new_dir = dir
            .path()
            .join("hosted.example")
            .join("carol")
            .join("Maildir")
            .join("new");
        assert_eq!(std::fs::read_dir(&new_dir).unwrap().count(), 1);
    }
}
