//! Host Candidate Harvester (C6): binds sockets across allowed interfaces
//! within `[minPort, maxPort]` with retry, producing [`HostCandidate`]s. See
//! spec.md §4.6.

use crate::acceptor::Acceptor;
use crate::address_filter::AddressFilter;
use crate::config::Runtime;
use crate::error::TransportError;
use crate::socket::SocketWrapper;

use std::any::Any;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use service::Transport;

/// Opaque handle to the ICE component a candidate belongs to. The component
/// itself is an external collaborator (§1's out-of-scope list); this crate
/// only needs something to tag a [`HostCandidate`] with.
pub type ComponentRef = Arc<str>;

/// `{ socket, component, transport, virtual }` of spec.md §3.
pub struct HostCandidate {
    pub socket: Arc<SocketWrapper>,
    pub component: ComponentRef,
    pub transport: Transport,
    pub virtual_interface: bool,
}

#[derive(Debug, Default, Clone, Copy)]
struct Stats {
    candidate_count: u32,
    attempted_binds: u32,
    elapsed: Duration,
}

/// Per-harvest timing and candidate counts: an aggregate guarded by a
/// lock, mutated only through narrow setters so callers can't corrupt
/// partial updates.
#[derive(Default)]
pub struct HarvestStatistics {
    inner: Mutex<Stats>,
}

impl HarvestStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    fn record_attempt(&self) {
        self.inner.lock().attempted_binds += 1;
    }

    fn record_candidate(&self) {
        self.inner.lock().candidate_count += 1;
    }

    fn record_elapsed(&self, elapsed: Duration) {
        self.inner.lock().elapsed = elapsed;
    }

    pub fn candidate_count(&self) -> u32 {
        self.inner.lock().candidate_count
    }

    pub fn attempted_binds(&self) -> u32 {
        self.inner.lock().attempted_binds
    }

    pub fn elapsed(&self) -> Duration {
        self.inner.lock().elapsed
    }
}

/// Common virtual/container interface name prefixes. Best-effort: `if_addrs`
/// doesn't surface a portable "is virtual" flag, so a candidate's
/// `virtual_interface` bit is a heuristic, not an authoritative OS signal.
const VIRTUAL_INTERFACE_PREFIXES: [&str; 6] = ["veth", "docker", "br-", "utun", "tun", "tap"];

fn is_virtual_interface(name: &str) -> bool {
    VIRTUAL_INTERFACE_PREFIXES.iter().any(|prefix| name.starts_with(prefix))
}

/// Binds starting at `preferred_port`, then `+1`, wrapping `max_port` back
/// to `min_port`, for at most `max_attempts` tries (also capped by the size
/// of the port range, since there's no point retrying the same port twice
/// before every other port in range has been tried).
async fn bind_with_retry(
    acceptor: &Arc<Acceptor>,
    ip: IpAddr,
    preferred_port: u16,
    min_port: u16,
    max_port: u16,
    max_attempts: u32,
    stats: &HarvestStatistics,
) -> Result<Arc<SocketWrapper>, TransportError> {
    let span = u32::from(max_port - min_port) + 1;
    let mut port = preferred_port;

    for _ in 0..max_attempts.min(span) {
        stats.record_attempt();

        match acceptor.add_binding(SocketAddr::new(ip, port)).await {
            Ok(wrapper) => return Ok(wrapper),
            Err(e) => log::debug!("bind attempt failed on {ip}:{port}: {e}"),
        }

        port = if port >= max_port { min_port } else { port + 1 };
    }

    Err(TransportError::BindFailed {
        address: SocketAddr::new(ip, preferred_port),
        attempts: max_attempts.min(span),
    })
}

/// `harvest(component, preferredPort, minPort, maxPort, transport)` of
/// spec.md §4.6. `stack`, when present, is stashed via
/// `Acceptor::add_binding_with_stack` on every bound candidate — for UDP it
/// attaches on the first observed remote, for TCP on the first accepted
/// connection, which is exactly "defer registration until a client
/// connects" for TCP without needing separate code paths.
pub async fn harvest(
    component: ComponentRef,
    preferred_port: u16,
    min_port: u16,
    max_port: u16,
    transport: Transport,
    acceptor: &Arc<Acceptor>,
    filter: &AddressFilter,
    runtime: &Runtime,
    stack: Option<Arc<dyn Any + Send + Sync>>,
    stats: &HarvestStatistics,
) -> Result<Vec<HostCandidate>, TransportError> {
    let started = Instant::now();

    if !(1024..=65535).contains(&min_port) || min_port > max_port {
        return Err(TransportError::IllegalArgument(format!(
            "port range must satisfy 1024 <= min <= max <= 65535, got [{min_port}, {max_port}]"
        )));
    }

    if !(min_port..=max_port).contains(&preferred_port) {
        return Err(TransportError::IllegalArgument(format!(
            "preferred port {preferred_port} is outside [{min_port}, {max_port}]"
        )));
    }

    let interfaces = if_addrs::get_if_addrs()
        .map_err(|e| TransportError::ConfigError(format!("failed to enumerate network interfaces: {e}")))?;

    let mut candidates = Vec::new();

    for iface in interfaces {
        if iface.is_loopback() {
            continue;
        }

        if !filter.is_interface_allowed(&iface.name) {
            continue;
        }

        let ip = iface.ip();
        if !filter.is_address_allowed(ip) {
            continue;
        }

        if transport == Transport::Tcp && ip.is_ipv6() {
            continue;
        }

        match bind_with_retry(acceptor, ip, preferred_port, min_port, max_port, runtime.bind_retries, stats).await {
            Ok(wrapper) => {
                if let Some(stack) = stack.clone() {
                    acceptor.add_binding_with_stack(&wrapper, stack);
                }

                stats.record_candidate();
                candidates.push(HostCandidate {
                    socket: wrapper,
                    component: component.clone(),
                    transport,
                    virtual_interface: is_virtual_interface(&iface.name),
                });
            }
            Err(e) => {
                log::warn!("host candidate bind failed on {}/{ip}: {e}", iface.name);
            }
        }
    }

    stats.record_elapsed(started.elapsed());

    if candidates.is_empty() {
        return Err(TransportError::NoBoundCandidate);
    }

    Ok(candidates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Acceptor as AcceptorConfig;
    use service::EventDispatcher;

    fn test_acceptor(transport: Transport) -> Arc<Acceptor> {
        Acceptor::new(transport, Arc::new(EventDispatcher::new()), Runtime::default(), AcceptorConfig::default())
    }

    #[tokio::test]
    async fn invalid_port_range_is_illegal_argument() {
        let acceptor = test_acceptor(Transport::Udp);
        let filter = AddressFilter::get(&Runtime::default()).unwrap();
        let stats = HarvestStatistics::new();

        let err = harvest("component".into(), 49160, 49200, 49152, Transport::Udp, &acceptor, &filter, &Runtime::default(), None, &stats)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn preferred_port_outside_range_is_illegal_argument() {
        let acceptor = test_acceptor(Transport::Udp);
        let filter = AddressFilter::get(&Runtime::default()).unwrap();
        let stats = HarvestStatistics::new();

        let err = harvest("component".into(), 40000, 49152, 49200, Transport::Udp, &acceptor, &filter, &Runtime::default(), None, &stats)
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::IllegalArgument(_)));
    }

    #[tokio::test]
    async fn bind_with_retry_succeeds_on_first_free_port() {
        let acceptor = test_acceptor(Transport::Udp);
        let stats = HarvestStatistics::new();

        let wrapper = bind_with_retry(&acceptor, "127.0.0.1".parse().unwrap(), 49160, 49152, 49200, 10, &stats)
            .await
            .unwrap();

        assert_eq!(wrapper.local.port, 49160);
        assert_eq!(stats.attempted_binds(), 1);
    }

    #[tokio::test]
    async fn bind_with_retry_skips_an_already_bound_port() {
        let acceptor = test_acceptor(Transport::Udp);
        let stats = HarvestStatistics::new();

        let first = bind_with_retry(&acceptor, "127.0.0.1".parse().unwrap(), 49161, 49152, 49200, 10, &stats)
            .await
            .unwrap();
        assert_eq!(first.local.port, 49161);

        let second = bind_with_retry(&acceptor, "127.0.0.1".parse().unwrap(), 49161, 49152, 49200, 10, &stats)
            .await
            .unwrap();
        assert_eq!(second.local.port, 49162);
    }

    #[test]
    fn virtual_interface_heuristic_matches_common_prefixes() {
        assert!(is_virtual_interface("docker0"));
        assert!(is_virtual_interface("veth1234"));
        assert!(!is_virtual_interface("eth0"));
    }
}
