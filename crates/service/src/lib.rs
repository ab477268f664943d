//! Session table, raw-message queue and STUN event dispatcher shared by the
//! UDP and TCP socket wrappers of the ICE transport core.

pub mod dispatcher;
pub mod raw_message;
pub mod session;
pub mod transport_address;

pub use dispatcher::{EventDispatcher, Listener, MessageKind, StunMessageEvent};
pub use raw_message::{RawMessage, RawMessageQueue};
pub use session::{Session, CONNECTION, STUN_STACK};
pub use transport_address::{Transport, TransportAddress};
