//! The event dispatcher (C7): a two-level fan-out tree of STUN-message
//! listeners keyed by (message kind, optional local address). See
//! spec.md §4.7 and the cycle-avoidance note in §9 — children never point
//! back to a parent, and dispatch never recurses past one level.

use crate::transport_address::TransportAddress;

use std::sync::Arc;

use ahash::HashMap;
use parking_lot::RwLock;

/// A STUN message observed on one local address, handed to C7 by the
/// classifier/decoder once it has confirmed the buffer is STUN.
#[derive(Debug, Clone)]
pub struct StunMessageEvent {
    /// The unmasked STUN message type straight off the wire.
    pub raw_type: u16,
    pub local_address: TransportAddress,
    pub remote_address: TransportAddress,
    pub bytes: Arc<[u8]>,
}

impl StunMessageEvent {
    /// `rawType & 0x0110`, spec.md §3.
    pub fn message_type(&self) -> u16 {
        self.raw_type & 0x0110
    }
}

/// The three mask values spec.md §3/§9 cares about. `OldIndication` is kept
/// distinct from `Indication` at the literal `0x0110` value, per the
/// resolution of Open Question 1 in SPEC_FULL.md §2 — collapsing them would
/// mean RFC 3489 "old" indications and RFC 5389 indications become
/// indistinguishable to listeners that only want one or the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Request,
    Indication,
    OldIndication,
}

impl MessageKind {
    fn mask_value(self) -> u16 {
        match self {
            Self::Request => 0x0000,
            Self::Indication => 0x0010,
            Self::OldIndication => 0x0110,
        }
    }
}

pub type Listener = Arc<dyn Fn(&StunMessageEvent) + Send + Sync>;

#[derive(Default)]
struct Node {
    listeners: RwLock<Vec<(MessageKind, Listener)>>,
}

impl Node {
    /// Adding the same `(kind, listener)` pair twice is a no-op: identity is
    /// `Arc::ptr_eq` on the listener, since listeners are opaque callbacks
    /// supplied by the caller and can't be compared structurally any other
    /// way (spec.md §9's "listener equality" note).
    fn add(&self, kind: MessageKind, listener: Listener) {
        let mut listeners = self.listeners.write();
        let already_present = listeners
            .iter()
            .any(|(k, l)| *k == kind && Arc::ptr_eq(l, &listener));

        if !already_present {
            listeners.push((kind, listener));
        }
    }

    fn remove(&self, kind: MessageKind, listener: &Listener) {
        self.listeners
            .write()
            .retain(|(k, l)| !(*k == kind && Arc::ptr_eq(l, listener)));
    }

    fn fire(&self, evt: &StunMessageEvent) {
        let masked = evt.message_type();
        for (kind, listener) in self.listeners.read().iter() {
            if kind.mask_value() == masked {
                listener(evt);
            }
        }
    }

    fn clear(&self) {
        self.listeners.write().clear();
    }
}

/// Root of the listener tree. Registering with a `local_address` creates
/// (or reuses) a child node scoped to that address; registering without one
/// adds a generic listener fired for every event regardless of local
/// address.
#[derive(Default)]
pub struct EventDispatcher {
    root: Node,
    children: RwLock<HashMap<TransportAddress, Arc<Node>>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn child(&self, local_address: TransportAddress) -> Arc<Node> {
        if let Some(node) = self.children.read().get(&local_address) {
            return node.clone();
        }

        self.children
            .write()
            .entry(local_address)
            .or_insert_with(|| Arc::new(Node::default()))
            .clone()
    }

    fn add(&self, kind: MessageKind, local_address: Option<TransportAddress>, listener: Listener) {
        match local_address {
            Some(addr) => self.child(addr).add(kind, listener),
            None => self.root.add(kind, listener),
        }
    }

    fn remove(&self, kind: MessageKind, local_address: Option<TransportAddress>, listener: &Listener) {
        match local_address {
            Some(addr) => {
                if let Some(node) = self.children.read().get(&addr) {
                    node.remove(kind, listener);
                }
            }
            None => self.root.remove(kind, listener),
        }
    }

    pub fn add_request_listener(&self, local_address: Option<TransportAddress>, listener: Listener) {
        self.add(MessageKind::Request, local_address, listener);
    }

    pub fn remove_request_listener(&self, local_address: Option<TransportAddress>, listener: &Listener) {
        self.remove(MessageKind::Request, local_address, listener);
    }

    pub fn add_indication_listener(&self, local_address: TransportAddress, listener: Listener) {
        self.add(MessageKind::Indication, Some(local_address), listener);
    }

    pub fn remove_indication_listener(&self, local_address: TransportAddress, listener: &Listener) {
        self.remove(MessageKind::Indication, Some(local_address), listener);
    }

    pub fn add_old_indication_listener(&self, local_address: TransportAddress, listener: Listener) {
        self.add(MessageKind::OldIndication, Some(local_address), listener);
    }

    pub fn remove_old_indication_listener(&self, local_address: TransportAddress, listener: &Listener) {
        self.remove(MessageKind::OldIndication, Some(local_address), listener);
    }

    /// Fires generic (root) listeners first, then — if a child dispatcher
    /// exists for the event's local address — recurses into it exactly
    /// once. The tree is two levels deep by construction, so there is
    /// nothing further to recurse into.
    pub fn fire_message_event(&self, evt: &StunMessageEvent) {
        self.root.fire(evt);

        if let Some(child) = self.children.read().get(&evt.local_address) {
            child.fire(evt);
        }
    }

    pub fn remove_all_listeners(&self) {
        self.root.clear();
        for child in self.children.read().values() {
            child.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport_address::Transport;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn addr(port: u16) -> TransportAddress {
        TransportAddress::new(format!("127.0.0.1:{port}").parse().unwrap(), Transport::Udp)
    }

    fn event(raw_type: u16, local: TransportAddress) -> StunMessageEvent {
        StunMessageEvent {
            raw_type,
            local_address: local,
            remote_address: addr(2),
            bytes: Arc::from(&b""[..]),
        }
    }

    #[test]
    fn duplicate_registration_fires_once() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let listener: Listener = Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.add_request_listener(None, listener.clone());
        dispatcher.add_request_listener(None, listener.clone());

        dispatcher.fire_message_event(&event(0x0001, addr(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        dispatcher.remove_request_listener(None, &listener);
        dispatcher.fire_message_event(&event(0x0001, addr(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_scoped_to_one_local_address_never_fires_for_another() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let listener: Listener = Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.add_indication_listener(addr(1), listener);
        dispatcher.fire_message_event(&event(0x0010, addr(2)));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        dispatcher.fire_message_event(&event(0x0010, addr(1)));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn old_indication_is_distinct_from_indication() {
        let dispatcher = EventDispatcher::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let hits2 = hits.clone();
        let listener: Listener = Arc::new(move |_| {
            hits2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.add_old_indication_listener(addr(1), listener);

        // Plain indication (0x0010) must not trigger an old-indication listener.
        dispatcher.fire_message_event(&event(0x0010, addr(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 0);

        // Only the literal 0x0110 class does.
        dispatcher.fire_message_event(&event(0x0110, addr(1)));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn remove_all_listeners_clears_both_levels() {
        let dispatcher = EventDispatcher::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let listener: Listener = Arc::new(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.add_request_listener(None, listener.clone());
        dispatcher.add_request_listener(Some(addr(1)), listener);
        dispatcher.remove_all_listeners();

        dispatcher.fire_message_event(&event(0x0000, addr(1)));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
