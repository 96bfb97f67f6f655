//! Pre-session connection screening.
//!
//! The server consults the gate once per accepted TCP connection, before
//! the SMTP greeting. rDNS and DNSBL checkers implement this trait; the
//! default gate accepts everything.

use std::net::IpAddr;

use async_trait::async_trait;

#[async_trait]
pub trait ConnectionGate: Send + Sync + std::fmt::Debug {
    /// Whether a connection from this address may proceed to a session.
    async fn check(&self, ip: IpAddr) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGate;

#[async_trait]
impl ConnectionGate for AllowAllGate {
    async fn check(&self, _ip: IpAddr) -> bool {
        true
    }
}
