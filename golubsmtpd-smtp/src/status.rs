use core::fmt::{self, Display, Formatter};

/// SMTP reply codes used by the server, RFC 5321.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd)]
pub enum Status {
    ServiceReady = 220,
    GoodBye = 221,
    AuthSuccess = 235,
    Ok = 250,
    AuthChallenge = 334,
    StartMailInput = 354,
    LocalError = 451,
    SyntaxError = 500,
    ParamError = 501,
    NotImplemented = 502,
    BadSequence = 503,
    AuthFailed = 535,
    MailboxUnavailable = 550,
    ExceededStorage = 552,
    TransactionFailed = 554,
}

impl Status {
    pub const fn code(self) -> u16 {
        self as u16
    }

    /// Standard reply text used when the caller supplies none.
    pub const fn default_text(self) -> &'static str {
        match self {
            Self::ServiceReady => "Service ready",
            Self::GoodBye => "Service closing transmission channel",
            Self::AuthSuccess => "Authentication successful",
            Self::Ok => "Requested mail action okay, completed",
            Self::AuthChallenge => "Auth challenge",
            Self::StartMailInput => "Start mail input; end with <CRLF>.<CRLF>",
            Self::LocalError => "Requested action aborted: local error in processing",
            Self::SyntaxError => "Syntax error, command unrecognized",
            Self::ParamError => "Syntax error in parameters or arguments",
            Self::NotImplemented => "Command not implemented",
            Self::BadSequence => "Bad sequence of commands",
            Self::AuthFailed => "Authentication credentials invalid",
            Self::MailboxUnavailable => "Requested action not taken: mailbox unavailable",
            Self::ExceededStorage => {
                "Requested mail action aborted: exceeded storage allocation"
            }
            Self::TransactionFailed => "Transaction failed",
        }
    }

    pub const fn is_permanent(self) -> bool {
        self.code() >= 500
    }

    pub const fn is_temporary(self) -> bool {
        self.code() >= 400 && self.code() < 500
    }

    /// Format a single-line reply, falling back to the default text.
    pub fn reply(self, message: &str) -> String {
        if message.is_empty() {
            format!("{} {}", self.code(), self.default_text())
        } else {
            format!("{} {message}", self.code())
        }
    }
}

impl Display for Status {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        write!(fmt, "{}", self.code())
    }
}

#[cfg(test)]
mod test {
    use super::Status;

    #[test]
    fn codes() {
        assert_eq!(Status::ServiceReady.code(), 220);
        assert_eq!(Status::AuthFailed.code(), 535);
        assert_eq!(Status::TransactionFailed.code(), 554);
    }

    #[test]
    fn classification() {
        assert!(Status::MailboxUnavailable.is_permanent());
        assert!(!Status::MailboxUnavailable.is_temporary());
        assert!(Status::LocalError.is_temporary());
        assert!(!Status::Ok.is_permanent());
    }

    #[test]
    fn reply_formatting() {
        assert_eq!(Status::Ok.reply("Sender accepted"), "250 Sender accepted");
        assert_eq!(
            Status::BadSequence.reply(""),
            "503 Bad sequence of commands"
        );
    }
}
