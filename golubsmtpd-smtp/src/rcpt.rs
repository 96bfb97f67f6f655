//! Recipient classification and validation.
//!
//! One validator is shared by every session for the process lifetime: the
//! system-user and virtual-user caches only pay off when all sessions feed
//! them.

use std::{sync::Arc, time::Duration};

use golubsmtpd_common::{
    aliases::AliasMap,
    auth::{extract_username, Authenticator},
    config::Config,
};
use golubsmtpd_delivery::RecipientClass;
use tracing::{debug, warn};

use crate::cache::TtlCache;

/// Deadline for one system user database lookup.
pub const SYSTEM_LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub struct RcptValidator {
    config: Arc<Config>,
    authenticator: Arc<dyn Authenticator>,
    aliases: Arc<AliasMap>,
    system_cache: TtlCache,
    virtual_cache: TtlCache,
}

fn contains_domain(domains: &[String], domain: &str) -> bool {
    domains.iter().any(|d| d.eq_ignore_ascii_case(domain))
}

impl RcptValidator {
    pub fn new(
        config: Arc<Config>,
        authenticator: Arc<dyn Authenticator>,
        aliases: Arc<AliasMap>,
    ) -> Self {
        let system = &config.cache.system_users;
        let system_cache = TtlCache::new(system.capacity, system.ttl());
        let virtual_settings = &config.cache.virtual_users;
        let virtual_cache = TtlCache::new(virtual_settings.capacity, virtual_settings.ttl());

        Self {
            config,
            authenticator,
            aliases,
            system_cache,
            virtual_cache,
        }
    }

    /// Map an envelope domain onto its recipient class. Case-insensitive
    /// and total: anything outside the configured lists is `External`.
    pub fn classify(&self, domain: &str) -> RecipientClass {
        let server = &self.config.server;
        if contains_domain(&server.local_domains, domain) {
            RecipientClass::Local
        } else if contains_domain(&server.virtual_domains, domain) {
            RecipientClass::Virtual
        } else if contains_domain(&server.relay_domains, domain) {
            RecipientClass::Relay
        } else {
            RecipientClass::External
        }
    }

    /// Whether the MTA accepts this recipient for the given class.
    pub async fn is_valid(&self, recipient: &str, class: RecipientClass) -> bool {
        match class {
            RecipientClass::Local => self.is_system_user_valid(recipient).await,
            RecipientClass::Virtual => self.is_virtual_user_valid(recipient).await,
            RecipientClass::Relay => true,
            RecipientClass::External => false,
        }
    }

    /// Resolve a local alias to its recipients; empty if unknown.
    pub fn resolve_alias(&self, local_part: &str) -> Vec<String> {
        self.aliases.resolve(local_part)
    }

    async fn is_system_user_valid(&self, email: &str) -> bool {
        let username = extract_username(email);

        let (exists, hit) = self.system_cache.get(username);
        if hit {
            debug!(username, exists, "system user cache hit");
            return exists;
        }

        let name = username.to_string();
        let lookup = tokio::task::spawn_blocking(move || {
            nix::unistd::User::from_name(&name)
                .map(|user| user.is_some())
                .unwrap_or(false)
        });

        let user_exists = match tokio::time::timeout(SYSTEM_LOOKUP_TIMEOUT, lookup).await {
            Ok(Ok(exists)) => exists,
            Ok(Err(err)) => {
                warn!(username, %err, "system user lookup task failed");
                return false;
            }
            Err(_) => {
                warn!(username, "system user lookup timeout");
                return false;
            }
        };

        // A local name without a system account is still deliverable when
        // an alias covers it.
        let exists = user_exists || self.aliases.contains(username);

        self.system_cache.put(username, exists);
        debug!(username, exists, "system user lookup");
        exists
    }

    async fn is_virtual_user_valid(&self, email: &str) -> bool {
        let (exists, hit) = self.virtual_cache.get(email);
        if hit {
            debug!(email, exists, "virtual user cache hit");
            return exists;
        }

        let exists = self.authenticator.user_exists(email).await;
        self.virtual_cache.put(email, exists);
        debug!(email, exists, "virtual user lookup");
        exists
    }

    /// Shut both cache sweepers down.
    pub async fn close(&self) {
        self.system_cache.close().await;
        self.virtual_cache.close().await;
    }
}

#[cfg(test)]
mod test {
    use golubsmtpd_common::auth::MemoryAuthenticator;

    use super::*;

    fn validator() -> RcptValidator {
        let mut config = Config::default();
        config.server.local_domains = vec!["local.example".to_string()];
        config.server.virtual_domains = vec!["hosted.example".to_string()];
        config.server.relay_domains = vec!["relay.example".to_string()];

        let authenticator =
            Arc::new(MemoryAuthenticator::default().with_user("carol@hosted.example", "pw"));
        let aliases = Arc::new(AliasMap::parse("postmaster: root\n"));

        RcptValidator::new(Arc::new(config), authenticator, aliases)
    }

    #[tokio::test]
    async fn classify_is_case_insensitive_and_total() {
        let validator = validator();
        assert_eq!(validator.classify("local.example"), RecipientClass::Local);
        assert_eq!(validator.classify("LOCAL.EXAMPLE"), RecipientClass::Local);
        assert_eq!(validator.classify("Hosted.Example"), RecipientClass::Virtual);
        assert_eq!(validator.classify("relay.example"), RecipientClass::Relay);
        assert_eq!(validator.classify("elsewhere.example"), RecipientClass::External);
        assert_eq!(validator.classify(""), RecipientClass::External);
        validator.close().await;
    }

    #[tokio::test]
    async fn relay_accepted_external_rejected() {
        let validator = validator();
        assert!(validator.is_valid("x@relay.example", RecipientClass::Relay).await);
        assert!(!validator.is_valid("x@elsewhere.example", RecipientClass::External).await);
        validator.close().await;
    }

    #[tokio::test]
    async fn virtual_users_via_authenticator_and_cache() {
        let validator = validator();

        assert!(validator.is_valid("carol@hosted.example", RecipientClass::Virtual).await);
        assert!(!validator.is_valid("eve@hosted.example", RecipientClass::Virtual).await);

        // Second round is served from the cache.
        assert!(validator.is_valid("carol@hosted.example", RecipientClass::Virtual).await);
        let (_, hits, _) = validator.virtual_cache.stats();
        assert!(hits >= 1);
        validator.close().await;
    }

    #[tokio::test]
    async fn alias_covers_missing_system_user() {
        let validator = validator();
        // "postmaster" has no system account but is aliased.
        assert!(
            validator
                .is_valid("postmaster@local.example", RecipientClass::Local)
                .await
        );
        validator.close().await;
    }

    #[tokio::test]
    async fn unknown_system_user_rejected_and_cached() {
        let validator = validator();
        assert!(
            !validator
                .is_valid("no-such-user-zz@local.example", RecipientClass::Local)
                .await
        );
        let (exists, hit) = validator.system_cache.get("no-such-user-zz");
        assert!(hit);
        assert!(!exists);
        validator.close().await;
    }

    #[tokio::test]
    async fn resolve_alias_round_trip() {
        let validator = validator();
        assert_eq!(validator.resolve_alias("postmaster"), vec!["root@localhost"]);
        assert!(validator.resolve_alias("nobody").is_empty());
        validator.close().await;
    }
}
