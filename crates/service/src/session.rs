use crate::transport_address::TransportAddress;

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// A logical session (spec.md §3): for UDP, synthesized by the acceptor on
/// first observed remote; for TCP, one per accepted connection.
///
/// `attributes` is how C8 attaches the `STUN_STACK`/`CONNECTION` handles
/// once the first message lands on a session, without the session type
/// itself needing to know about those external collaborators.
pub struct Session {
    pub id: u64,
    pub remote: TransportAddress,
    pub local: TransportAddress,
    attributes: RwLock<HashMap<&'static str, Arc<dyn Any + Send + Sync>>>,
}

impl Session {
    pub fn new(remote: TransportAddress, local: TransportAddress) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            remote,
            local,
            attributes: RwLock::new(HashMap::default()),
        })
    }

    pub fn set_attribute(&self, name: &'static str, value: Arc<dyn Any + Send + Sync>) {
        self.attributes.write().insert(name, value);
    }

    pub fn attribute(&self, name: &'static str) -> Option<Arc<dyn Any + Send + Sync>> {
        self.attributes.read().get(name).cloned()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("local", &self.local)
            .finish()
    }
}

/// Well-known attribute names attached by the I/O handler glue (C8) when a
/// session opens.
pub const STUN_STACK: &str = "STUN_STACK";
pub const CONNECTION: &str = "CONNECTION";

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport_address::Transport;

    fn addr(port: u16) -> TransportAddress {
        TransportAddress::new(format!("127.0.0.1:{port}").parse().unwrap(), Transport::Udp)
    }

    #[test]
    fn sessions_get_distinct_increasing_ids() {
        let a = Session::new(addr(1), addr(2));
        let b = Session::new(addr(1), addr(2));
        assert!(b.id > a.id);
    }

    #[test]
    fn attributes_round_trip() {
        let session = Session::new(addr(1), addr(2));
        assert!(session.attribute(CONNECTION).is_none());

        session.set_attribute(CONNECTION, Arc::new(42u32));
        let value = session.attribute(CONNECTION).unwrap();
        assert_eq!(*value.downcast_ref::<u32>().unwrap(), 42);
    }
}
