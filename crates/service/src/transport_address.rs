use std::net::{IpAddr, SocketAddr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The transport a [`TransportAddress`] is bound on. TCP binding is never
/// attempted over IPv6 — see spec.md §4.6 step 3 and `Harvester::harvest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Transport {
    Udp,
    Tcp,
}

/// `{ ip, port, transport }`. Equality is structural, so this type doubles
/// as a session/binding map key (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TransportAddress {
    pub ip: IpAddr,
    pub port: u16,
    pub transport: Transport,
}

impl TransportAddress {
    pub fn new(addr: SocketAddr, transport: Transport) -> Self {
        Self {
            ip: addr.ip(),
            port: addr.port(),
            transport,
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.port)
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    pub fn is_ipv6(&self) -> bool {
        self.ip.is_ipv6()
    }
}

impl std::fmt::Display for TransportAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{:?}", self.socket_addr(), self.transport)
    }
}
