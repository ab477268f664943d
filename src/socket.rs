//! Socket Wrapper (C4): owns one logical endpoint — the active session, a
//! bounded ring of stale sessions, the raw-message queue, and the optional
//! relayed (TURN) fallback. See spec.md §4.4.

use crate::acceptor::Acceptor;
use crate::error::TransportError;
use crate::filters::DataFilter;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::Notify;

use service::{RawMessage, RawMessageQueue, Session, TransportAddress};

static NEXT_WRAPPER_ID: AtomicU64 = AtomicU64::new(1);

const STALE_SESSION_CAPACITY: usize = 8;
const CONNECT_LATCH_TIMEOUT: Duration = Duration::from_millis(3000);

/// A relayed (TURN) send path a wrapper may delegate to instead of writing
/// directly. `is_control_method` lets TURN's own control traffic bypass the
/// relay and go out the wrapper's normal session path.
pub trait RelayedConnection: Send + Sync {
    fn send(&self, bytes: &[u8], dest: TransportAddress) -> Result<(), TransportError>;
    fn is_control_method(&self, bytes: &[u8]) -> bool;
}

/// One bound endpoint. `acceptor` is a weak reference: the acceptor owns the
/// wrapper through its bindings map, so a strong cycle here would leak both.
pub struct SocketWrapper {
    pub id: u64,
    pub local: TransportAddress,
    acceptor: Weak<Acceptor>,
    active: RwLock<Option<Arc<Session>>>,
    stale: RwLock<VecDeque<Arc<Session>>>,
    queue: RawMessageQueue,
    relayed: RwLock<Option<Arc<dyn RelayedConnection>>>,
    filters: RwLock<Vec<Arc<dyn DataFilter>>>,
    closed: AtomicBool,
    connecting: AtomicBool,
    connect_notify: Notify,
}

impl SocketWrapper {
    pub fn new(local: TransportAddress, acceptor: &Arc<Acceptor>) -> Arc<Self> {
        Arc::new(Self {
            id: NEXT_WRAPPER_ID.fetch_add(1, Ordering::Relaxed),
            local,
            acceptor: Arc::downgrade(acceptor),
            active: RwLock::new(None),
            stale: RwLock::new(VecDeque::with_capacity(STALE_SESSION_CAPACITY)),
            queue: RawMessageQueue::default(),
            relayed: RwLock::new(None),
            filters: RwLock::new(Vec::new()),
            closed: AtomicBool::new(false),
            connecting: AtomicBool::new(false),
            connect_notify: Notify::new(),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn active_session(&self) -> Option<Arc<Session>> {
        self.active.read().clone()
    }

    pub fn set_relayed(&self, relayed: Arc<dyn RelayedConnection>) {
        *self.relayed.write() = Some(relayed);
    }

    pub fn add_filter(&self, filter: Arc<dyn DataFilter>) {
        self.filters.write().push(filter);
    }

    fn admits(&self, bytes: &[u8]) -> bool {
        let filters = self.filters.read();
        filters.iter().all(|f| f.admit(bytes))
    }

    /// Called by the acceptor's I/O path once bytes have been classified as
    /// non-STUN. Applies the wrapper's filters before queueing.
    pub fn offer(&self, message: RawMessage) -> bool {
        if !self.admits(&message.bytes) {
            return false;
        }

        self.queue.offer(message)
    }

    pub fn read(&self) -> Option<RawMessage> {
        self.queue.poll()
    }

    /// Copies the next queued message's bytes into `buf`, truncating if it
    /// doesn't fit, and returns the byte count and source address. Leaves
    /// `buf` untouched if the queue is empty.
    pub fn receive(&self, buf: &mut [u8]) -> Option<(usize, TransportAddress)> {
        let message = self.queue.poll()?;
        let len = message.bytes.len().min(buf.len());
        buf[..len].copy_from_slice(&message.bytes[..len]);
        Some((len, message.remote))
    }

    /// Installs `session` as active, demoting any previous active session to
    /// the stale ring (oldest evicted past [`STALE_SESSION_CAPACITY`]).
    pub fn install_session(&self, session: Arc<Session>) {
        let previous = self.active.write().replace(session);
        if let Some(previous) = previous {
            let mut stale = self.stale.write();
            stale.push_front(previous);
            stale.truncate(STALE_SESSION_CAPACITY);
        }
    }

    /// C8's `closed` callback: active sessions become `None`, stale sessions
    /// are dropped from the ring. Never closes the wrapper itself.
    pub fn remove_session(&self, session_id: u64) {
        let mut active = self.active.write();
        if active.as_ref().is_some_and(|s| s.id == session_id) {
            *active = None;
            return;
        }
        drop(active);

        self.stale.write().retain(|s| s.id != session_id);
    }

    /// First stale session whose remote matches, per the "first match wins"
    /// resolution of spec.md §9 open question 2.
    fn find_stale(&self, dest: TransportAddress) -> Option<Arc<Session>> {
        self.stale.read().iter().find(|s| s.remote == dest).cloned()
    }

    /// Ensures the acceptor is bound on `local`, then — if no session is
    /// active yet — synthesizes one to `dest` and installs it, waking any
    /// `send` callers waiting on the connect latch. Never lets an error
    /// escape; failures are logged and the latch is left untouched so the
    /// caller's 3000 ms wait runs its course.
    async fn new_session(self: &Arc<Self>, dest: TransportAddress) {
        let Some(acceptor) = self.acceptor.upgrade() else {
            log::warn!("cannot create session to {dest}: acceptor for {} is gone", self.local);
            return;
        };

        if !acceptor.is_bound(self.local) {
            log::warn!("cannot create session to {dest}: {} is not bound", self.local);
            return;
        }

        if self.active_session().is_some() {
            self.connect_notify.notify_waiters();
            return;
        }

        let session = acceptor.synthesize_session(self.local, dest);
        crate::io_handler::opened(&acceptor, self, session);
        self.connect_notify.notify_waiters();
    }

    async fn write_via_acceptor(&self, session: &Session, bytes: &[u8]) -> Result<(), TransportError> {
        let acceptor = self.acceptor.upgrade().ok_or(TransportError::Closed)?;
        acceptor.write(self.local, session.remote, bytes).await
    }

    /// `send(buffer, dest)` of spec.md §4.4: relayed fallback, then active
    /// session, then stale (best-effort), then synthesize-and-wait.
    pub async fn send(self: &Arc<Self>, bytes: &[u8], dest: TransportAddress) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let relayed = self.relayed.read().clone();
        if let Some(relayed) = relayed {
            if !relayed.is_control_method(bytes) {
                return relayed.send(bytes, dest);
            }
        }

        if let Some(session) = self.active_session() {
            if session.remote == dest {
                return self.write_via_acceptor(&session, bytes).await;
            }
        }

        if let Some(session) = self.find_stale(dest) {
            if let Err(e) = self.write_via_acceptor(&session, bytes).await {
                log::debug!("best-effort write on stale session {dest} failed: {e}");
            }
            return Ok(());
        }

        let i_am_initiator = self
            .connecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();

        if i_am_initiator {
            // `new_session` has no internal suspension point: by the time it
            // returns, the session either exists or it doesn't, and — on
            // success — it has already called `notify_waiters` before any
            // other caller had a chance to register as a waiter below (that
            // notification is only ever seen by callers already waiting, so
            // it would otherwise be lost). Check the outcome directly instead
            // of waiting on a latch nobody can still catch; only fall
            // through to the timed wait when the session genuinely isn't
            // there yet (e.g. no acceptor bound), matching spec.md §8
            // property 10's full-timeout behavior for that case.
            self.new_session(dest).await;

            if let Some(session) = self.active_session() {
                if session.remote == dest {
                    self.connecting.store(false, Ordering::Release);
                    return self.write_via_acceptor(&session, bytes).await;
                }
            }
        }

        let waited = tokio::time::timeout(CONNECT_LATCH_TIMEOUT, self.connect_notify.notified()).await;

        if i_am_initiator {
            self.connecting.store(false, Ordering::Release);
        }

        if let Some(session) = self.active_session() {
            if session.remote == dest {
                return self.write_via_acceptor(&session, bytes).await;
            }
        }

        if waited.is_err() {
            log::warn!("connect latch timed out waiting for session to {dest} on {}", self.local);
        }

        Err(TransportError::Timeout)
    }

    /// Marks the wrapper closed (idempotent, monotonic) and optionally
    /// drains the queue. Unbinding the underlying acceptor binding is the
    /// acceptor's decision, made in [`Acceptor::on_wrapper_closed`].
    pub fn close(&self, drain_queue: bool) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        if drain_queue {
            self.queue.drain();
        }

        if let Some(acceptor) = self.acceptor.upgrade() {
            acceptor.on_wrapper_closed(self.local);
        }
    }
}
