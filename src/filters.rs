//! `DataFilter`s gate queue insertion for a [`crate::socket::SocketWrapper`]
//! (spec.md §4.4's `addFilter`, "e.g., a STUN-data filter may admit only
//! STUN-looking bytes"). `SocketWrapper::offer` is only ever called from the
//! DTLS and opaque branches of the classifier — STUN-classified bytes are
//! dispatched straight to the `EventDispatcher` and never reach the raw
//! queue at all (spec.md §2's data flow) — so [`StunDataFilter`] is not
//! installed by the harvester on every host candidate: doing so would admit
//! nothing, ever, into a queue that by construction never receives STUN
//! bytes, silently dropping all DTLS and media traffic. It remains here for
//! a caller who genuinely wants a socket dedicated to signaling only.

use codec::classify::{self, Classification};

pub trait DataFilter: Send + Sync {
    fn admit(&self, bytes: &[u8]) -> bool;
}

/// Admits only buffers the classifier recognizes as STUN. Not installed by
/// default on harvested candidates — see the module docs.
pub struct StunDataFilter;

impl DataFilter for StunDataFilter {
    fn admit(&self, bytes: &[u8]) -> bool {
        matches!(classify::classify(bytes, 0, bytes.len()), Classification::Stun)
    }
}
