//! DNS-backed host resolution

use super::HostResolver;
use async_trait::async_trait;
use std::net::{Ipv4Addr, SocketAddr};
use tracing::debug;

/// Resolves through the operating system's resolver via tokio
#[derive(Debug, Default, Clone, Copy)]
pub struct DnsResolver;

impl DnsResolver {
    pub fn new() -> Self {
        Self
    }
}

/// Parse a literal dotted-quad address, rejecting the unspecified address
fn parse_literal(host: &str) -> Option<Option<Ipv4Addr>> {
    host.parse::<Ipv4Addr>()
        .ok()
        .map(|address| Some(address).filter(|address| !address.is_unspecified()))
}

#[async_trait]
impl HostResolver for DnsResolver {
    async fn resolve(&self, host: &str) -> Option<Ipv4Addr> {
        if let Some(literal) = parse_literal(host) {
            return literal;
        }

        let addresses = match tokio::net::lookup_host((host, 0)).await {
            Ok(addresses) => addresses,
            Err(e) => {
                debug!(host, error = %e, "Host lookup failed");
                return None;
            }
        };

        addresses
            .filter_map(|address| match address {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .find(|address| !address.is_unspecified())
    }
}
