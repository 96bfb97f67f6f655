//! Envelope address parsing and the configurable validation pipeline.
//!
//! `basic` parses and applies the RFC 5321 length limits; `extended` adds
//! stricter shape checks; `dns_mx` / `dns_a` resolve the domain with a
//! fixed deadline.

use std::{sync::Arc, sync::LazyLock, time::Duration};

use golubsmtpd_common::config::{
    Config, VALIDATION_DNS_A, VALIDATION_DNS_MX, VALIDATION_EXTENDED,
};
use hickory_resolver::{name_server::TokioConnectionProvider, TokioResolver};
use regex::Regex;
use tracing::warn;

use crate::error::ValidationError;

/// RFC 5321 limits.
pub const MAX_EMAIL_LENGTH: usize = 254;
pub const MAX_LOCAL_LENGTH: usize = 64;
pub const MAX_DOMAIN_LENGTH: usize = 253;

/// Deadline for MX / A lookups.
pub const DNS_TIMEOUT: Duration = Duration::from_secs(5);

// Validates domain shape including ccTLDs like .co.uk.
static FQDN_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^(?:(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+(?:[a-zA-Z]{2,}|[a-zA-Z0-9-]{2,}\.[a-zA-Z]{2,}))$",
    )
    .expect("FQDN regex must compile")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
    pub full: String,
}

#[derive(Clone)]
pub struct EmailValidator {
    config: Arc<Config>,
    resolver: Option<Arc<TokioResolver>>,
}

impl std::fmt::Debug for EmailValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailValidator")
            .field("pipeline", &self.config.server.email_validation)
            .field("resolver", &self.resolver.is_some())
            .finish()
    }
}

impl EmailValidator {
    pub fn new(config: Arc<Config>) -> Self {
        let needs_dns = config.server.has_validation(VALIDATION_DNS_MX)
            || config.server.has_validation(VALIDATION_DNS_A);

        let resolver = if needs_dns {
            match TokioResolver::builder(TokioConnectionProvider::default()) {
                Ok(builder) => Some(Arc::new(builder.build())),
                Err(err) => {
                    warn!(%err, "system DNS resolver unavailable, dns validation will reject");
                    None
                }
            }
        } else {
            None
        };

        Self { config, resolver }
    }

    /// Parse the raw MAIL FROM argument. `<>` is the null reverse-path for
    /// bounce messages and yields `None`.
    pub async fn parse_mail_from(
        &self,
        raw: &str,
    ) -> Result<Option<EmailAddress>, ValidationError> {
        let trimmed = raw.trim();
        if trimmed == "<>" {
            return Ok(None);
        }
        self.parse_address(trimmed).await.map(Some)
    }

    /// Parse the raw RCPT TO argument.
    pub async fn parse_rcpt_to(&self, raw: &str) -> Result<EmailAddress, ValidationError> {
        self.parse_address(raw.trim()).await
    }

    /// Run the full configured validation pipeline over one address.
    pub async fn parse_address(&self, email: &str) -> Result<EmailAddress, ValidationError> {
        if email.is_empty() {
            return Err(ValidationError::Empty);
        }
        if email.len() > MAX_EMAIL_LENGTH {
            return Err(ValidationError::TooLong(email.len(), MAX_EMAIL_LENGTH));
        }

        let bare = email.trim_matches(|c| c == '<' || c == '>').trim();
        if bare.is_empty() {
            return Err(ValidationError::Empty);
        }

        let parsed = mailparse::addrparse(bare)
            .map_err(|err| ValidationError::Format(err.to_string()))?;
        let address = match parsed.first() {
            Some(mailparse::MailAddr::Single(single)) => single.addr.clone(),
            _ => return Err(ValidationError::Format("expected a single address".into())),
        };

        let Some((local, domain)) = address.split_once('@') else {
            return Err(ValidationError::Format(
                "must contain exactly one @".into(),
            ));
        };
        if local.contains('@') || domain.contains('@') {
            return Err(ValidationError::Format(
                "must contain exactly one @".into(),
            ));
        }

        if local.len() > MAX_LOCAL_LENGTH {
            return Err(ValidationError::LocalTooLong(local.len(), MAX_LOCAL_LENGTH));
        }
        if domain.len() > MAX_DOMAIN_LENGTH {
            return Err(ValidationError::DomainTooLong(
                domain.len(),
                MAX_DOMAIN_LENGTH,
            ));
        }

        if self.config.server.has_validation(VALIDATION_EXTENDED) {
            extended_validation(&address, local, domain)?;
        }
        if self.config.server.has_validation(VALIDATION_DNS_MX) {
            self.validate_mx(domain).await?;
        }
        if self.config.server.has_validation(VALIDATION_DNS_A) {
            self.validate_a(domain).await?;
        }

        Ok(EmailAddress {
            local: local.to_string(),
            domain: domain.to_string(),
            full: address,
        })
    }

    async fn validate_mx(&self, domain: &str) -> Result<(), ValidationError> {
        let Some(resolver) = &self.resolver else {
            return Err(ValidationError::Mx("resolver unavailable".into()));
        };

        let lookup = tokio::time::timeout(DNS_TIMEOUT, resolver.mx_lookup(domain))
            .await
            .map_err(|_| ValidationError::Mx(format!("MX lookup timed out for {domain}")))?
            .map_err(|err| ValidationError::Mx(format!("MX lookup failed for {domain}: {err}")))?;

        if lookup.iter().next().is_none() {
            return Err(ValidationError::Mx(format!(
                "no MX records found for {domain}"
            )));
        }
        Ok(())
    }

    async fn validate_a(&self, domain: &str) -> Result<(), ValidationError> {
        let Some(resolver) = &self.resolver else {
            return Err(ValidationError::ARecord("resolver unavailable".into()));
        };

        let lookup = tokio::time::timeout(DNS_TIMEOUT, resolver.lookup_ip(domain))
            .await
            .map_err(|_| {
                ValidationError::ARecord(format!("A/AAAA lookup timed out for {domain}"))
            })?
            .map_err(|err| {
                ValidationError::ARecord(format!("A/AAAA lookup failed for {domain}: {err}"))
            })?;

        if lookup.iter().next().is_none() {
            return Err(ValidationError::ARecord(format!(
                "no A/AAAA records found for {domain}"
            )));
        }
        Ok(())
    }
}

fn extended_validation(address: &str, local: &str, domain: &str) -> Result<(), ValidationError> {
    if address.contains("..") {
        return Err(ValidationError::Extended(
            "consecutive dots not allowed".into(),
        ));
    }
    if address.starts_with('.') || address.ends_with('.') {
        return Err(ValidationError::Extended(
            "address cannot start or end with dot".into(),
        ));
    }
    if local.starts_with('.') || local.ends_with('.') {
        return Err(ValidationError::Extended(
            "local part cannot start or end with dot".into(),
        ));
    }
    if !domain.contains('.') {
        return Err(ValidationError::Extended(
            "domain must contain at least one dot".into(),
        ));
    }
    if !FQDN_REGEX.is_match(domain) {
        return Err(ValidationError::Extended(format!(
            "invalid domain format: {domain}"
        )));
    }
    Ok(())
}

/// Validate a HELO/EHLO hostname argument: standard domain labels, or an
/// address literal in brackets.
pub fn validate_hello_hostname(hostname: &str) -> bool {
    if hostname.is_empty() || hostname.len() > MAX_DOMAIN_LENGTH {
        return false;
    }

    if hostname.starts_with('[') && hostname.ends_with(']') {
        return hostname[1..hostname.len() - 1]
            .parse::<std::net::IpAddr>()
            .is_ok();
    }

    hostname.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
            && !label.starts_with('-')
            && !label.ends_with('-')
    })
}
