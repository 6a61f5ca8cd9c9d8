use std::net::SocketAddr;

use tokio::net::UdpSocket;

use super::{error::CollectorError, traits::DataProducer, types::CollectorResult};

/// Public address used only to pick the outbound route; nothing is sent.
const ROUTE_PROBE: &str = "8.8.8.8:80";

/// Primary IPv4 address: the local address the kernel picks for the default
/// route.
#[derive(Debug, Clone)]
pub struct NetworkCollector {
    probe: String,
}

impl NetworkCollector {
    pub fn new() -> Self {
        Self::with_probe(ROUTE_PROBE)
    }

    pub fn with_probe(probe: impl Into<String>) -> Self {
        NetworkCollector {
            probe: probe.into(),
        }
    }
}

impl Default for NetworkCollector {
    fn default() -> Self {
        NetworkCollector::new()
    }
}

#[async_trait::async_trait]
impl DataProducer for NetworkCollector {
    type Output = String;

    async fn produce(&self) -> CollectorResult<Self::Output> {
        let network_err = |source| CollectorError::Network {
            probe: self.probe.clone(),
            source,
        };

        let socket = UdpSocket::bind("0.0.0.0:0").await.map_err(network_err)?;
        // UDP connect only selects a route, no packet leaves the host.
        socket.connect(&self.probe).await.map_err(network_err)?;
        let local: SocketAddr = socket.local_addr().map_err(network_err)?;

        Ok(local.ip().to_string())
    }
}
