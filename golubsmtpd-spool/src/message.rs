use core::fmt::{self, Display, Formatter};

use ahash::AHashSet;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Opaque 128-bit message identifier, rendered as 32 lowercase hex
/// characters. Generated once at MAIL FROM and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(String);

impl MessageId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MessageId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The transactional unit produced by one SMTP mail transaction.
///
/// Recipient sets are pairwise disjoint: classification is a pure function
/// of the domain, so an address always lands in the same set, and each set
/// deduplicates on insert.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: MessageId,
    pub from: String,
    pub client_ip: String,
    pub client_hello_hostname: String,
    pub local_recipients: AHashSet<String>,
    pub virtual_recipients: AHashSet<String>,
    pub relay_recipients: AHashSet<String>,
    pub external_recipients: AHashSet<String>,
    pub total_size: u64,
    pub created: DateTime<Utc>,
}

impl Message {
    /// Start a new transaction with a fresh id and empty recipient sets.
    pub fn new(client_ip: impl Into<String>, client_hello_hostname: impl Into<String>) -> Self {
        Self {
            id: MessageId::generate(),
            from: String::new(),
            client_ip: client_ip.into(),
            client_hello_hostname: client_hello_hostname.into(),
            local_recipients: AHashSet::new(),
            virtual_recipients: AHashSet::new(),
            relay_recipients: AHashSet::new(),
            external_recipients: AHashSet::new(),
            total_size: 0,
            created: Utc::now(),
        }
    }

    pub fn total_recipients(&self) -> usize {
        self.local_recipients.len()
            + self.virtual_recipients.len()
            + self.relay_recipients.len()
            + self.external_recipients.len()
    }

    /// On-disk file name: `YYYYMMDDThhmmssZ.<id>.eml`.
    pub fn filename(&self) -> String {
        format!("{}.{}.eml", self.created.format("%Y%m%dT%H%M%SZ"), self.id)
    }
}
