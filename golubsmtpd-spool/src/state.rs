use core::fmt::{self, Display, Formatter};

/// Lifecycle state of a spooled message. Each state maps to one directory
/// under the spool root, and a message body lives in exactly one of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpoolState {
    /// Freshly accepted from an SMTP session.
    Incoming,
    /// Owned by a processor while delivery runs.
    Processing,
    /// Every recipient delivery succeeded.
    Delivered,
    /// At least one recipient delivery failed.
    Failed,
}

impl SpoolState {
    /// All states, in the order their directories are created.
    pub const ALL: [Self; 4] = [
        Self::Incoming,
        Self::Processing,
        Self::Delivered,
        Self::Failed,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Incoming => "incoming",
            Self::Processing => "processing",
            Self::Delivered => "delivered",
            Self::Failed => "failed",
        }
    }
}

impl Display for SpoolState {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::SpoolState;

    #[test]
    fn directory_names() {
        assert_eq!(SpoolState::Incoming.as_str(), "incoming");
        assert_eq!(SpoolState::Processing.to_string(), "processing");
        assert_eq!(SpoolState::ALL.len(), 4);
    }
}
