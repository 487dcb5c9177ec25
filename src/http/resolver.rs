use crate::trace::ClientTrace;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};

/// Resolves `host:port`, raising the DNS hooks only when a lookup is needed.
#[derive(Clone, Debug, Default)]
pub struct DnsLoggingResolver;

impl DnsLoggingResolver {
    pub fn new() -> Self {
        Self
    }

    pub async fn resolve(
        &self,
        host: &str,
        port: u16,
        trace: &mut dyn ClientTrace,
    ) -> Result<Vec<SocketAddr>, anyhow::Error> {
        if let Some(ip) = ip_literal(host) {
            trace!("Skipping DNS for literal address {}", ip);
            return Ok(vec![SocketAddr::new(ip, port)]);
        }

        debug!("Resolving DNS for: {}", host);
        trace.on_dns_start(host);
        let owned_host = host.to_string();
        let lookup =
            tokio::task::spawn_blocking(move || (owned_host.as_str(), port).to_socket_addrs())
                .await?;
        let addresses: Vec<SocketAddr> = match lookup {
            Ok(addrs_iter) => addrs_iter.collect(),
            Err(e) => {
                trace.on_dns_end(&[]);
                return Err(anyhow!("DNS resolution for {} failed: {}", host, e));
            }
        };
        trace.on_dns_end(&addresses);
        info!("Resolved DNS for {}: {:?}", host, addresses);

        if addresses.is_empty() {
            error!("DNS resolution for {} returned no addresses.", host);
            return Err(anyhow!("No IP addresses found for host {}", host));
        }

        for (i, addr) in addresses.iter().enumerate() {
            if i == 0 {
                debug!("Resolved IP: {}", addr.ip());
            } else {
                debug!("Resolved IP (alternative): {}", addr.ip());
            }
        }

        Ok(addresses)
    }
}

/// Parses `host` as an IP address, accepting the bracketed IPv6 form URIs use.
pub fn ip_literal(host: &str) -> Option<IpAddr> {
    host.trim_start_matches('[')
        .trim_end_matches(']')
        .parse()
        .ok()
}
