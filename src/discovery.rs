use std::net::{IpAddr, ToSocketAddrs};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::DiscoveryError;
use crate::types::{push_unique, Endpoint, ServiceDescriptor, ServiceMap};

/// Host capability that reports where the hosted services listen.
///
/// Called once at startup on the blocking pool, so implementations may do
/// blocking lookups. Delivery never waits on it.
pub trait ServiceDiscovery: Send + Sync {
    fn discover(&self) -> Result<ServiceMap, DiscoveryError>;

    /// Identity of the component the caller runs in, when the host can tell.
    fn resolve_service_context(&self) -> Option<ServiceDescriptor> {
        None
    }
}

/// Discovery over a fixed snapshot.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    services: ServiceMap,
    descriptor: Option<ServiceDescriptor>,
}

impl StaticDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_service(mut self, name: impl Into<String>, endpoint: Endpoint) -> Self {
        self.services.insert(name.into(), endpoint);
        self
    }

    pub fn with_descriptor(mut self, descriptor: ServiceDescriptor) -> Self {
        self.descriptor = Some(descriptor);
        self
    }
}

impl ServiceDiscovery for StaticDiscovery {
    fn discover(&self) -> Result<ServiceMap, DiscoveryError> {
        Ok(self.services.clone())
    }

    fn resolve_service_context(&self) -> Option<ServiceDescriptor> {
        self.descriptor.clone()
    }
}

/// A listening connector as reported by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connector {
    /// e.g. `HTTP/1.1`, `org.apache.coyote.http11.Http11NioProtocol`, `AJP/1.3`.
    pub protocol: String,
    pub scheme: String,
    pub port: u16,
}

impl Connector {
    pub fn new(protocol: impl Into<String>, scheme: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: protocol.into(),
            scheme: scheme.into(),
            port,
        }
    }

    fn is_ajp(&self) -> bool {
        self.protocol.to_ascii_uppercase().contains("AJP")
    }

    fn is_supported(&self) -> bool {
        self.protocol == "HTTP/1.1"
            || self.protocol.contains("Http11")
            || self.protocol == "AJP/1.3"
            || self.protocol.contains("Ajp")
    }

    /// Lowercase scheme, `ajp` for AJP connectors whatever they report.
    fn effective_scheme(&self) -> String {
        if self.is_ajp() {
            "ajp".to_string()
        } else {
            self.scheme.to_ascii_lowercase()
        }
    }
}

fn lookup_failed(hostname: &str, source: std::io::Error) -> DiscoveryError {
    DiscoveryError::HostLookup {
        host: hostname.to_string(),
        source,
    }
}

/// Turns connectors into endpoint URIs for this host.
#[derive(Debug, Clone)]
pub struct EndpointResolver {
    hostname: String,
    addresses: Vec<IpAddr>,
    resolve_hostname: bool,
}

impl EndpointResolver {
    /// Resolver that publishes `hostname` as is.
    pub fn new(hostname: impl Into<String>) -> Self {
        Self {
            hostname: hostname.into(),
            addresses: Vec::new(),
            resolve_hostname: false,
        }
    }

    /// Resolver that publishes one URI per routable address in `addresses`.
    pub fn with_addresses(mut self, addresses: Vec<IpAddr>) -> Self {
        self.addresses = addresses;
        self.resolve_hostname = true;
        self
    }

    /// Build a resolver for `hostname`, looking up its addresses when
    /// `resolve_hostname` is set.
    pub async fn lookup(hostname: &str, resolve_hostname: bool) -> Result<Self, DiscoveryError> {
        let resolver = Self::new(hostname);
        if !resolve_hostname {
            return Ok(resolver);
        }

        let addresses = tokio::net::lookup_host((hostname, 0u16))
            .await
            .map_err(|source| lookup_failed(hostname, source))?
            .map(|addr| addr.ip())
            .collect();
        Ok(resolver.with_addresses(addresses))
    }

    /// Blocking variant of [`EndpointResolver::lookup`] for use inside
    /// [`ServiceDiscovery::discover`], which runs on the blocking pool.
    pub fn lookup_blocking(hostname: &str, resolve_hostname: bool) -> Result<Self, DiscoveryError> {
        let resolver = Self::new(hostname);
        if !resolve_hostname {
            return Ok(resolver);
        }

        let addresses = (hostname, 0u16)
            .to_socket_addrs()
            .map_err(|source| lookup_failed(hostname, source))?
            .map(|addr| addr.ip())
            .collect();
        Ok(resolver.with_addresses(addresses))
    }

    fn hosts(&self) -> Vec<String> {
        if !self.resolve_hostname {
            return vec![self.hostname.clone()];
        }

        self.addresses
            .iter()
            .filter(|addr| !(addr.is_unspecified() || addr.is_loopback() || addr.is_multicast()))
            .map(|addr| match addr {
                IpAddr::V4(v4) => v4.to_string(),
                IpAddr::V6(v6) => format!("[{v6}]"),
            })
            .collect()
    }

    /// Endpoint for one service. Unsupported connectors are skipped.
    pub fn endpoint(&self, connectors: &[Connector], route_tag: impl Into<String>) -> Endpoint {
        let mut endpoint = Endpoint::new(route_tag);
        let hosts = self.hosts();
        let mode = if self.resolve_hostname { "resolve" } else { "noresolve" };

        for connector in connectors.iter().filter(|c| c.is_supported()) {
            let scheme = connector.effective_scheme();
            let set = match scheme.as_str() {
                "ajp" => &mut endpoint.ajp,
                "http" => &mut endpoint.http,
                "https" => &mut endpoint.https,
                _ => continue,
            };
            for host in &hosts {
                let uri = format!("{}://{}:{}", scheme, host, connector.port);
                info!(protocol = %connector.protocol, mode, uri = %uri, "discovered endpoint");
                push_unique(set, uri);
            }
        }
        endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn connectors() -> Vec<Connector> {
        vec![
            Connector::new("HTTP/1.1", "http", 8080),
            Connector::new("org.apache.coyote.http11.Http11NioProtocol", "https", 8443),
            Connector::new("AJP/1.3", "http", 8009),
            Connector::new("org.apache.coyote.http2.Http2Protocol", "http", 9090),
        ]
    }

    #[test]
    fn hostname_mode_uses_the_name() {
        let endpoint = EndpointResolver::new("node-a").endpoint(&connectors(), "route-a");
        assert_eq!(endpoint.http.iter().collect::<Vec<_>>(), ["http://node-a:8080"]);
        assert_eq!(endpoint.https.iter().collect::<Vec<_>>(), ["https://node-a:8443"]);
        assert_eq!(endpoint.ajp.iter().collect::<Vec<_>>(), ["ajp://node-a:8009"]);
        assert_eq!(endpoint.route_tag, "route-a");
    }

    #[test]
    fn resolve_mode_skips_local_addresses() {
        let resolver = EndpointResolver::new("node-a").with_addresses(vec![
            IpAddr::V4(Ipv4Addr::LOCALHOST),
            IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            IpAddr::V4(Ipv4Addr::new(224, 0, 0, 1)),
            IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)),
            IpAddr::V6(Ipv6Addr::new(0xfd00, 0, 0, 0, 0, 0, 0, 7)),
        ]);
        let endpoint = resolver.endpoint(&[Connector::new("HTTP/1.1", "http", 8080)], "");
        assert_eq!(
            endpoint.http.iter().collect::<Vec<_>>(),
            ["http://10.0.0.7:8080", "http://[fd00::7]:8080"]
        );
    }

    #[test]
    fn no_routable_address_gives_empty_endpoint() {
        let resolver =
            EndpointResolver::new("node-a").with_addresses(vec![IpAddr::V4(Ipv4Addr::LOCALHOST)]);
        assert!(resolver.endpoint(&connectors(), "r").is_empty());
    }

    #[test]
    fn static_discovery_returns_snapshot() {
        let discovery = StaticDiscovery::new()
            .with_service("Catalina", Endpoint::new("r1"))
            .with_descriptor(ServiceDescriptor {
                service_name: None,
                engine_name: Some("Engine".into()),
            });
        let services = discovery.discover().unwrap();
        assert_eq!(services.len(), 1);
        assert_eq!(discovery.resolve_service_context().unwrap().label(), "Engine");
    }

    #[test]
    fn uris_keep_connector_order_without_duplicates() {
        let endpoint = EndpointResolver::new("node-a").endpoint(
            &[
                Connector::new("HTTP/1.1", "http", 8081),
                Connector::new("HTTP/1.1", "http", 8080),
                Connector::new("org.apache.coyote.http11.Http11Nio2Protocol", "http", 8081),
            ],
            "r",
        );
        assert_eq!(endpoint.http, ["http://node-a:8081", "http://node-a:8080"]);
    }

    #[tokio::test]
    async fn lookup_without_resolution_keeps_the_name() {
        let resolver = EndpointResolver::lookup("node-a.invalid", false).await.unwrap();
        let endpoint = resolver.endpoint(&connectors(), "r");
        assert_eq!(endpoint.http, ["http://node-a.invalid:8080"]);
    }

    #[tokio::test]
    async fn resolved_localhost_has_no_routable_address() {
        let resolver = EndpointResolver::lookup("localhost", true).await.unwrap();
        assert!(resolver.endpoint(&connectors(), "r").is_empty());
    }
}
