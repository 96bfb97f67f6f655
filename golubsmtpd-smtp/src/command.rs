//! SMTP command parsing.
//!
//! Verbs are matched case-insensitively. Address arguments are carried as
//! raw text; the validation pipeline in [`crate::email`] owns their
//! interpretation.

use core::fmt::{self, Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Helo(String),
    Ehlo(String),
    /// AUTH PLAIN with an optional inline base64 initial response.
    AuthPlain(Option<String>),
    AuthLogin,
    /// Raw argument after `MAIL FROM:`, still to be validated.
    MailFrom(String),
    /// Raw argument after `RCPT TO:`, still to be validated.
    RcptTo(String),
    Data,
    Rset,
    Noop,
    Quit,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    /// Empty command line.
    #[error("syntax error")]
    Empty,

    /// Verb not recognised.
    #[error("command not implemented: {0}")]
    Unknown(String),

    /// Verb recognised but a required argument is missing or unsupported.
    #[error("{0}")]
    Param(&'static str),
}

impl TryFrom<&str> for Command {
    type Error = ParseError;

    fn try_from(line: &str) -> Result<Self, Self::Error> {
        let mut parts = line.split_whitespace();
        let Some(verb) = parts.next() else {
            return Err(ParseError::Empty);
        };
        let args: Vec<&str> = parts.collect();

        match verb.to_ascii_uppercase().as_str() {
            "HELO" => match args.first() {
                Some(host) => Ok(Self::Helo((*host).to_string())),
                None => Err(ParseError::Param("HELO requires domain")),
            },
            "EHLO" => match args.first() {
                Some(host) => Ok(Self::Ehlo((*host).to_string())),
                None => Err(ParseError::Param("EHLO requires domain")),
            },
            "AUTH" => match args.first().map(|m| m.to_ascii_uppercase()) {
                Some(mechanism) if mechanism == "PLAIN" => {
                    Ok(Self::AuthPlain(args.get(1).map(|s| (*s).to_string())))
                }
                Some(mechanism) if mechanism == "LOGIN" => Ok(Self::AuthLogin),
                Some(_) => Err(ParseError::Param("Authentication mechanism not supported")),
                None => Err(ParseError::Param("AUTH requires mechanism")),
            },
            "MAIL" => parse_address_argument(&args, "FROM:")
                .map(Self::MailFrom)
                .ok_or(ParseError::Param("MAIL FROM requires an email address")),
            "RCPT" => parse_address_argument(&args, "TO:")
                .map(Self::RcptTo)
                .ok_or(ParseError::Param("RCPT TO requires an email address")),
            "DATA" => Ok(Self::Data),
            "RSET" => Ok(Self::Rset),
            "NOOP" => Ok(Self::Noop),
            "QUIT" => Ok(Self::Quit),
            _ => Err(ParseError::Unknown(verb.to_string())),
        }
    }
}

/// Join the argument tokens, strip the `FROM:`/`TO:` prefix, and return the
/// remaining address text. `None` when nothing is left.
fn parse_address_argument(args: &[&str], prefix: &str) -> Option<String> {
    if args.is_empty() {
        return None;
    }

    let joined = args.join(" ");
    let rest = if joined.len() >= prefix.len()
        && joined[..prefix.len()].eq_ignore_ascii_case(prefix)
    {
        joined[prefix.len()..].trim()
    } else {
        return None;
    };

    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}

impl Display for Command {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Helo(host) => write!(fmt, "HELO {host}"),
            Self::Ehlo(host) => write!(fmt, "EHLO {host}"),
            Self::AuthPlain(_) => fmt.write_str("AUTH PLAIN"),
            Self::AuthLogin => fmt.write_str("AUTH LOGIN"),
            Self::MailFrom(addr) => write!(fmt, "MAIL FROM:{addr}"),
            Self::RcptTo(addr) => write!(fmt, "RCPT TO:{addr}"),
            Self::Data => fmt.write_str("DATA"),
            Self::Rset => fmt.write_str("RSET"),
            Self::Noop => fmt.write_str("NOOP"),
            Self::Quit => fmt.write_str("QUIT"),
        }
    }
}
