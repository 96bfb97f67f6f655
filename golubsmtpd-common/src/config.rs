//! Configuration snapshot for the daemon.
//!
//! The configuration is loaded once at startup from a TOML file, validated,
//! and then treated as immutable for the lifetime of the process. Every
//! component receives it behind an `Arc` and never mutates it.

use std::{io, path::Path, time::Duration};

use ahash::AHashMap;
use serde::Deserialize;
use thiserror::Error;

/// Email validation pipeline selectors, applied in order on MAIL FROM and
/// RCPT TO addresses.
pub const VALIDATION_BASIC: &str = "basic";
pub const VALIDATION_EXTENDED: &str = "extended";
pub const VALIDATION_DNS_MX: &str = "dns_mx";
pub const VALIDATION_DNS_A: &str = "dns_a";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_hostname")]
    pub hostname: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_ip")]
    pub max_connections_per_ip: usize,
    #[serde(default = "default_max_recipients")]
    pub max_recipients: usize,
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    #[serde(default = "default_io_timeout_secs")]
    pub read_timeout_secs: u64,
    #[serde(default = "default_io_timeout_secs")]
    pub write_timeout_secs: u64,
    #[serde(default)]
    pub local_domains: Vec<String>,
    #[serde(default)]
    pub virtual_domains: Vec<String>,
    #[serde(default)]
    pub relay_domains: Vec<String>,
    #[serde(default = "default_spool_dir")]
    pub spool_dir: String,
    #[serde(default = "default_email_validation")]
    pub email_validation: Vec<String>,
    #[serde(default)]
    pub local_aliases_file: String,
}

impl ServerConfig {
    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_secs)
    }

    /// Whether the given validation selector is enabled.
    pub fn has_validation(&self, selector: &str) -> bool {
        self.email_validation.iter().any(|v| v == selector)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            hostname: default_hostname(),
            max_connections: default_max_connections(),
            max_connections_per_ip: default_max_connections_per_ip(),
            max_recipients: default_max_recipients(),
            max_message_size: default_max_message_size(),
            read_timeout_secs: default_io_timeout_secs(),
            write_timeout_secs: default_io_timeout_secs(),
            local_domains: Vec::new(),
            virtual_domains: Vec::new(),
            relay_domains: Vec::new(),
            spool_dir: default_spool_dir(),
            email_validation: default_email_validation(),
            local_aliases_file: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Capacity of the publisher-facing message buffer.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Maximum number of concurrently running processors.
    #[serde(default = "default_max_processors")]
    pub max_processors: usize,
    /// Total wall budget for one `publish` call, retries included.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,
    /// Initial backoff delay when the buffer is full.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Backoff delay ceiling.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,
}

impl QueueConfig {
    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn max_retry_delay(&self) -> Duration {
        Duration::from_millis(self.max_retry_delay_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            max_processors: default_max_processors(),
            publish_timeout_ms: default_publish_timeout_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DeliveryConfig {
    #[serde(default)]
    pub local: LocalDeliveryConfig,
    #[serde(default, rename = "virtual")]
    pub virtual_users: VirtualDeliveryConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalDeliveryConfig {
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for LocalDeliveryConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VirtualDeliveryConfig {
    #[serde(default = "default_virtual_base_dir")]
    pub base_dir_path: String,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl Default for VirtualDeliveryConfig {
    fn default() -> Self {
        Self {
            base_dir_path: default_virtual_base_dir(),
            max_workers: default_max_workers(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    #[serde(default)]
    pub system_users: CacheSettings,
    #[serde(default)]
    pub virtual_users: CacheSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheSettings {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: u64,
}

impl CacheSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    #[serde(default = "default_auth_plugin")]
    pub plugin: String,
    #[serde(default)]
    pub memory: MemoryAuthConfig,
    #[serde(default)]
    pub file: FileAuthConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            plugin: default_auth_plugin(),
            memory: MemoryAuthConfig::default(),
            file: FileAuthConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MemoryAuthConfig {
    /// `user@domain` to password.
    #[serde(default)]
    pub users: AHashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileAuthConfig {
    #[serde(default)]
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

const fn default_port() -> u16 {
    2525
}

fn default_hostname() -> String {
    "localhost".to_string()
}

const fn default_max_connections() -> usize {
    10_000
}

const fn default_max_connections_per_ip() -> usize {
    1_000
}

const fn default_max_recipients() -> usize {
    100
}

const fn default_max_message_size() -> usize {
    10 * 1024 * 1024
}

const fn default_io_timeout_secs() -> u64 {
    30
}

fn default_spool_dir() -> String {
    "/var/spool/golubsmtpd".to_string()
}

fn default_email_validation() -> Vec<String> {
    vec![VALIDATION_BASIC.to_string()]
}

const fn default_buffer_size() -> usize {
    1_000
}

const fn default_max_processors() -> usize {
    10
}

const fn default_publish_timeout_ms() -> u64 {
    5_000
}

const fn default_retry_delay_ms() -> u64 {
    100
}

const fn default_max_retry_delay_ms() -> u64 {
    1_000
}

const fn default_max_workers() -> usize {
    10
}

fn default_virtual_base_dir() -> String {
    "/var/mail/virtual".to_string()
}

const fn default_cache_capacity() -> usize {
    1_024
}

const fn default_cache_ttl_secs() -> u64 {
    300
}

fn default_auth_plugin() -> String {
    "memory".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load the configuration from a TOML file and validate it.
    ///
    /// A missing path yields the built-in defaults, validated the same way.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)?;
                toml::from_str(&raw)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::Invalid("port must be non-zero".into()));
        }
        if self.server.hostname.is_empty() {
            return Err(ConfigError::Invalid("hostname cannot be empty".into()));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be positive".into(),
            ));
        }
        if self.server.max_connections_per_ip == 0 {
            return Err(ConfigError::Invalid(
                "max_connections_per_ip must be positive".into(),
            ));
        }
        if self.queue.buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "queue buffer_size must be positive".into(),
            ));
        }

        for selector in &self.server.email_validation {
            match selector.as_str() {
                VALIDATION_BASIC | VALIDATION_EXTENDED | VALIDATION_DNS_MX
                | VALIDATION_DNS_A => {}
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "unknown email_validation selector: {other}"
                    )));
                }
            }
        }

        match self.auth.plugin.as_str() {
            "memory" => {}
            "file" => {
                if self.auth.file.path.is_empty() {
                    return Err(ConfigError::Invalid(
                        "auth plugin \"file\" requires auth.file.path".into(),
                    ));
                }
            }
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown auth plugin: {other}"
                )));
            }
        }

        match self.logging.level.as_str() {
            "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::Invalid(format!("unknown log level: {other}")));
            }
        }
        match self.logging.format.as_str() {
            "text" | "json" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "unknown log format: {other}"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 2525);
        assert_eq!(config.queue.buffer_size, 1_000);
        assert_eq!(config.cache.system_users.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn parses_full_document() {
        let raw = r#"
            [server]
            hostname = "mx.example.com"
            port = 25
            local_domains = ["example.com"]
            virtual_domains = ["hosted.example"]
            relay_domains = ["relay.example"]
            email_validation = ["basic", "extended"]

            [queue]
            buffer_size = 5
            max_processors = 2

            [delivery.virtual]
            base_dir_path = "/srv/vmail"

            [auth]
            plugin = "memory"

            [auth.memory.users]
            "alice@hosted.example" = "secret"
        "#;

        let config: Config = toml::from_str(raw).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.hostname, "mx.example.com");
        assert_eq!(config.queue.buffer_size, 5);
        assert_eq!(config.delivery.virtual_users.base_dir_path, "/srv/vmail");
        assert!(config.server.has_validation(VALIDATION_EXTENDED));
        assert!(!config.server.has_validation(VALIDATION_DNS_MX));
    }

    #[test]
    fn rejects_unknown_validation_selector() {
        let raw = r#"
            [server]
            email_validation = ["dns_aaaa"]
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_file_auth_without_path() {
        let raw = r#"
            [auth]
            plugin = "file"
        "#;
        let config: Config = toml::from_str(raw).unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
