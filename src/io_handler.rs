//! I/O Handler glue (C8): bridges session lifecycle events from the
//! transport acceptors into the socket wrapper, attaching the `STUN_STACK`
//! and `CONNECTION` attributes stashed by `Acceptor::add_binding_with_stack`
//! to the first session that opens on a binding. See spec.md §4.8.

use crate::acceptor::Acceptor;
use crate::socket::SocketWrapper;

use std::sync::Arc;

use service::{Session, TransportAddress, CONNECTION, STUN_STACK};

/// A session opened (TCP accept, or a UDP remote observed for the first
/// time on a binding). Installs it as the wrapper's active session and, if
/// a `(stack, wrapper)` pair is still pending for this binding, attaches
/// both attributes and consumes the pending entry.
pub fn opened(acceptor: &Acceptor, wrapper: &Arc<SocketWrapper>, session: Arc<Session>) {
    if let Some(stack) = acceptor.take_pending_stack(wrapper.local) {
        session.set_attribute(STUN_STACK, stack);
        session.set_attribute(CONNECTION, wrapper.clone());
    }

    wrapper.install_session(session.clone());
    log::info!("session opened: id={}, remote={}, local={}", session.id, session.remote, session.local);
}

/// A session closed (TCP peer disconnected). Removes it from the wrapper's
/// active/stale bookkeeping; never closes the wrapper itself.
pub fn closed(wrapper: &Arc<SocketWrapper>, session_id: u64, local: TransportAddress, remote: TransportAddress) {
    wrapper.remove_session(session_id);
    log::info!("session closed: id={session_id}, remote={remote}, local={local}");
}

/// An I/O error surfaced on a session. Logged and the session is closed;
/// never propagated to the caller.
pub fn exception_caught(wrapper: &Arc<SocketWrapper>, session_id: u64, error: &std::io::Error) {
    log::warn!("session exception, closing: id={session_id}, error={error}");
    wrapper.remove_session(session_id);
}

/// No-op. Reserved for an idle-timeout sweep once sessions track a
/// last-activity timestamp; nothing calls it yet.
pub fn idle() {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acceptor::Acceptor;
    use crate::config::{Acceptor as AcceptorConfig, Runtime};
    use service::{EventDispatcher, Transport};

    fn addr(port: u16) -> TransportAddress {
        TransportAddress::new(format!("127.0.0.1:{port}").parse().unwrap(), Transport::Udp)
    }

    #[test]
    fn opened_attaches_pending_stack_once() {
        let acceptor =
            Acceptor::new(Transport::Udp, Arc::new(EventDispatcher::new()), Runtime::default(), AcceptorConfig::default());
        let wrapper = crate::socket::SocketWrapper::new(addr(1), &acceptor);
        acceptor.add_binding_with_stack(&wrapper, Arc::new(42u32));

        let first = Session::new(addr(2), addr(1));
        opened(&acceptor, &wrapper, first.clone());
        assert_eq!(*first.attribute(STUN_STACK).unwrap().downcast_ref::<u32>().unwrap(), 42);

        let second = Session::new(addr(3), addr(1));
        opened(&acceptor, &wrapper, second.clone());
        assert!(second.attribute(STUN_STACK).is_none());
    }

    #[test]
    fn closed_removes_session_from_wrapper() {
        let acceptor =
            Acceptor::new(Transport::Udp, Arc::new(EventDispatcher::new()), Runtime::default(), AcceptorConfig::default());
        let wrapper = crate::socket::SocketWrapper::new(addr(1), &acceptor);
        let session = Session::new(addr(2), addr(1));
        wrapper.install_session(session.clone());

        closed(&wrapper, session.id, addr(1), addr(2));
        assert!(wrapper.active_session().is_none());
    }
}
