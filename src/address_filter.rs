//! C1: the address & interface filter. Two independent, process-wide layers
//! (spec.md §4.1), both computed lazily and once, from the live OS
//! interface list plus [`Runtime`](crate::config::Runtime) policy.

use crate::config::Runtime;
use crate::error::TransportError;

use std::net::IpAddr;
use std::sync::OnceLock;

use ahash::{HashSet, HashSetExt};

struct Interfaces {
    allowed: Option<HashSet<String>>,
    blocked: HashSet<String>,
}

static INTERFACES: OnceLock<Result<Interfaces, String>> = OnceLock::new();

/// Filters for which interfaces/addresses a harvest may bind on. Built once
/// from [`Runtime`] and the OS interface list; reused for the life of the
/// process.
pub struct AddressFilter {
    interfaces: &'static Interfaces,
    disable_ipv6: bool,
    disable_link_local: bool,
    allowed_addresses: HashSet<IpAddr>,
    blocked_addresses: HashSet<IpAddr>,
}

impl AddressFilter {
    /// Initializes (on first call) and returns the process-wide filter.
    /// Subsequent calls reuse the same initialization outcome, including
    /// failures — a `CONFIG_ERROR` is sticky for the process's lifetime,
    /// matching spec.md §4.1's "once-only" initialization gate.
    pub fn get(runtime: &Runtime) -> Result<Self, TransportError> {
        let interfaces = INTERFACES.get_or_init(|| Self::build_interfaces(runtime));

        let interfaces = interfaces.as_ref().map_err(|e| TransportError::ConfigError(e.clone()))?;

        Ok(Self {
            interfaces,
            disable_ipv6: runtime.disable_ipv6,
            disable_link_local: runtime.disable_link_local_addresses,
            allowed_addresses: runtime.allowed_addresses.iter().copied().collect(),
            blocked_addresses: runtime.blocked_addresses.iter().copied().collect(),
        })
    }

    fn build_interfaces(runtime: &Runtime) -> Result<Interfaces, String> {
        let real_names: HashSet<String> = if_addrs::get_if_addrs()
            .map_err(|e| format!("failed to enumerate network interfaces: {e}"))?
            .into_iter()
            .map(|i| i.name)
            .collect();

        if !runtime.allowed_interfaces.is_empty() {
            for name in &runtime.allowed_interfaces {
                if !real_names.contains(name) {
                    return Err(format!("ALLOWED_INTERFACES names unknown interface: {name}"));
                }
            }

            return Ok(Interfaces {
                allowed: Some(runtime.allowed_interfaces.iter().cloned().collect()),
                blocked: HashSet::new(),
            });
        }

        if !runtime.blocked_interfaces.is_empty() {
            for name in &runtime.blocked_interfaces {
                if !real_names.contains(name) {
                    return Err(format!("BLOCKED_INTERFACES names unknown interface: {name}"));
                }
            }

            let blocked: HashSet<String> = runtime.blocked_interfaces.iter().cloned().collect();
            if real_names.iter().all(|name| blocked.contains(name)) {
                return Err("all network interfaces are blocked".to_string());
            }

            return Ok(Interfaces { allowed: None, blocked });
        }

        Ok(Interfaces { allowed: None, blocked: HashSet::new() })
    }

    /// If `ALLOWED_INTERFACES` is non-empty, membership decides regardless
    /// of `BLOCKED_INTERFACES` (spec.md §8 property 4). Else, membership in
    /// `BLOCKED_INTERFACES` excludes. Else, allow.
    pub fn is_interface_allowed(&self, name: &str) -> bool {
        if let Some(allowed) = &self.interfaces.allowed {
            return allowed.contains(name);
        }

        !self.interfaces.blocked.contains(name)
    }

    /// Non-loopback AND (allow-list empty or contains it) AND not
    /// block-listed. IPv6 is gated separately by `DISABLE_IPV6` and
    /// `DISABLE_LINK_LOCAL_ADDRESSES`.
    pub fn is_address_allowed(&self, addr: IpAddr) -> bool {
        if addr.is_loopback() {
            return false;
        }

        if addr.is_ipv6() {
            if self.disable_ipv6 {
                return false;
            }

            if self.disable_link_local && is_ipv6_link_local(addr) {
                return false;
            }
        }

        if !self.allowed_addresses.is_empty() && !self.allowed_addresses.contains(&addr) {
            return false;
        }

        !self.blocked_addresses.contains(&addr)
    }
}

fn is_ipv6_link_local(addr: IpAddr) -> bool {
    match addr {
        IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        IpAddr::V4(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loopback_is_always_rejected() {
        let runtime = Runtime::default();
        let filter = AddressFilter::get(&runtime).expect("real host always has at least one interface");
        assert!(!filter.is_address_allowed("127.0.0.1".parse().unwrap()));
        assert!(!filter.is_address_allowed("::1".parse().unwrap()));
    }

    #[test]
    fn link_local_v6_detection() {
        assert!(is_ipv6_link_local("fe80::1".parse().unwrap()));
        assert!(!is_ipv6_link_local("2001:db8::1".parse().unwrap()));
        assert!(!is_ipv6_link_local("127.0.0.1".parse().unwrap()));
    }

    /// Scenario S6: blocking every real interface is a `CONFIG_ERROR`, not a
    /// filter that silently admits nothing. Calls `build_interfaces`
    /// directly rather than the cached `AddressFilter::get` — `INTERFACES`
    /// is a process-wide `OnceLock` shared by every test in this binary, so
    /// going through `get` here would either poison or be poisoned by
    /// whichever test wins the race to initialize it.
    #[test]
    fn blocking_every_interface_is_a_config_error() {
        let real_names: Vec<String> =
            if_addrs::get_if_addrs().expect("real host always enumerates interfaces").into_iter().map(|i| i.name).collect();

        let mut runtime = Runtime::default();
        runtime.blocked_interfaces = real_names;

        let err = AddressFilter::build_interfaces(&runtime).unwrap_err();
        assert!(err.contains("all network interfaces are blocked"), "unexpected message: {err}");
    }
}
