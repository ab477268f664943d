//! Transport Acceptor (C5): the process-wide, per-transport owner of the
//! OS-level listening/datagram sockets, the binding set, and the I/O worker
//! pool that feeds the classifier. One instance exists per transport
//! (`Acceptor::new(Transport::Udp, ...)`, `Acceptor::new(Transport::Tcp,
//! ...)`); both are held as process-lifetime values by `crate::server`
//! rather than through language-level static initialization, so tests can
//! construct their own in isolation. See spec.md §4.5.

use crate::config::{Acceptor as AcceptorConfig, Runtime};
use crate::error::TransportError;
use crate::io_handler;
use crate::socket::SocketWrapper;

use std::any::Any;
use std::net::SocketAddr;
use std::sync::Arc;

use ahash::{HashMap, HashMapExt, HashSet, HashSetExt};
use parking_lot::RwLock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use codec::classify::{self, Classification};
use codec::dtls;
use codec::framing::{next_frame_len, ExchangeBuffer};
use service::{EventDispatcher, RawMessage, Session, StunMessageEvent, Transport, TransportAddress};

type TcpWriter = Arc<AsyncMutex<tokio::net::tcp::OwnedWriteHalf>>;

pub struct Acceptor {
    transport: Transport,
    dispatcher: Arc<EventDispatcher>,
    runtime: Runtime,
    config: AcceptorConfig,
    bindings: RwLock<HashSet<TransportAddress>>,
    wrappers: RwLock<HashMap<TransportAddress, Arc<SocketWrapper>>>,
    pending: RwLock<HashMap<TransportAddress, Arc<dyn Any + Send + Sync>>>,
    sessions: RwLock<HashMap<(TransportAddress, TransportAddress), Arc<Session>>>,
    udp_sockets: RwLock<HashMap<TransportAddress, Arc<UdpSocket>>>,
    tcp_writers: RwLock<HashMap<(TransportAddress, TransportAddress), TcpWriter>>,
    tasks: RwLock<HashMap<TransportAddress, Vec<JoinHandle<()>>>>,
}

impl Acceptor {
    pub fn new(transport: Transport, dispatcher: Arc<EventDispatcher>, runtime: Runtime, config: AcceptorConfig) -> Arc<Self> {
        Arc::new(Self {
            transport,
            dispatcher,
            runtime,
            config,
            bindings: RwLock::new(HashSet::new()),
            wrappers: RwLock::new(HashMap::new()),
            pending: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            udp_sockets: RwLock::new(HashMap::new()),
            tcp_writers: RwLock::new(HashMap::new()),
            tasks: RwLock::new(HashMap::new()),
        })
    }

    pub fn transport(&self) -> Transport {
        self.transport
    }

    pub fn is_bound(&self, local: TransportAddress) -> bool {
        self.bindings.read().contains(&local)
    }

    pub fn wrapper(&self, local: TransportAddress) -> Option<Arc<SocketWrapper>> {
        self.wrappers.read().get(&local).cloned()
    }

    /// Binds `addr` on this acceptor's transport and spawns its I/O workers.
    /// Returns the new binding's [`SocketWrapper`]. A port already bound on
    /// this acceptor is rejected — §3's "a port is bound at most once".
    pub async fn add_binding(self: &Arc<Self>, addr: SocketAddr) -> Result<Arc<SocketWrapper>, TransportError> {
        let local = TransportAddress::new(addr, self.transport);
        if self.is_bound(local) {
            return Err(TransportError::IllegalArgument(format!("{local} is already bound")));
        }

        match self.transport {
            Transport::Udp => self.bind_udp(addr).await,
            Transport::Tcp => self.bind_tcp(addr).await,
        }
    }

    /// Stashes `(stack, wrapper)` until the first session on `wrapper.local`
    /// opens, at which point `io_handler::opened` attaches them as session
    /// attributes and removes this entry.
    pub fn add_binding_with_stack(&self, wrapper: &Arc<SocketWrapper>, stack: Arc<dyn Any + Send + Sync>) {
        self.pending.write().insert(wrapper.local, stack);
    }

    pub(crate) fn take_pending_stack(&self, local: TransportAddress) -> Option<Arc<dyn Any + Send + Sync>> {
        self.pending.write().remove(&local)
    }

    /// Unbinds `local`: aborts its I/O workers, drops its socket state, and
    /// — if `close-on-deactivation` is configured — closes its wrapper's
    /// sessions. Returns `false` if `local` was not bound.
    pub fn remove_binding(&self, local: TransportAddress) -> bool {
        if !self.bindings.write().remove(&local) {
            return false;
        }

        if let Some(handles) = self.tasks.write().remove(&local) {
            for handle in handles {
                handle.abort();
            }
        }

        self.udp_sockets.write().remove(&local);
        self.tcp_writers.write().retain(|(l, _), _| *l != local);
        self.pending.write().remove(&local);

        if let Some(wrapper) = self.wrappers.write().remove(&local) {
            if self.config.close_on_deactivation {
                wrapper.close(true);
            }
        }

        true
    }

    /// Unbinds every binding this acceptor owns.
    pub fn stop(&self) {
        let locals: Vec<TransportAddress> = self.bindings.read().iter().copied().collect();
        for local in locals {
            self.remove_binding(local);
        }
    }

    /// Called by `SocketWrapper::close`: unbinding is always the acceptor's
    /// decision, and with one wrapper per binding the wrapper always owns
    /// its binding.
    pub(crate) fn on_wrapper_closed(&self, local: TransportAddress) {
        self.remove_binding(local);
    }

    /// Looks up (or creates) the logical session for `(local, remote)`.
    /// Used both by `SocketWrapper::new_session` (explicit outbound intent)
    /// and by the UDP receive path (first-observed-remote synthesis).
    pub fn synthesize_session(&self, local: TransportAddress, remote: TransportAddress) -> Arc<Session> {
        if let Some(existing) = self.sessions.read().get(&(local, remote)) {
            return existing.clone();
        }

        let created = Session::new(remote, local);
        self.sessions
            .write()
            .entry((local, remote))
            .or_insert(created)
            .clone()
    }

    /// Writes `bytes` to `remote` over the binding at `local`.
    pub async fn write(&self, local: TransportAddress, remote: TransportAddress, bytes: &[u8]) -> Result<(), TransportError> {
        match local.transport {
            Transport::Udp => {
                let socket = self.udp_sockets.read().get(&local).cloned().ok_or(TransportError::Closed)?;
                socket.send_to(bytes, remote.socket_addr()).await.map_err(|_| TransportError::Closed)?;
                Ok(())
            }
            Transport::Tcp => {
                let writer = self
                    .tcp_writers
                    .read()
                    .get(&(local, remote))
                    .cloned()
                    .ok_or(TransportError::Closed)?;

                let len = u16::try_from(bytes.len())
                    .map_err(|_| TransportError::IllegalArgument("frame too large for RFC 4571 framing".into()))?;

                let mut writer = writer.lock().await;
                writer.write_all(&len.to_be_bytes()).await.map_err(|_| TransportError::Closed)?;
                writer.write_all(bytes).await.map_err(|_| TransportError::Closed)?;
                Ok(())
            }
        }
    }

    /// Classifies one inbound buffer and routes it: STUN goes to the event
    /// dispatcher, DTLS is split into records and queued, everything else
    /// is queued as a single frame. On UDP, observing a new remote promotes
    /// (or creates) that remote's session as active first.
    async fn handle_incoming(self: &Arc<Self>, wrapper: Arc<SocketWrapper>, local: TransportAddress, remote: TransportAddress, bytes: Vec<u8>) {
        if local.transport == Transport::Udp {
            self.promote_remote(&wrapper, remote);
        }

        match classify::classify(&bytes, 0, bytes.len()) {
            Classification::Stun => {
                let raw_type = u16::from_be_bytes([bytes[0], bytes[1]]);
                let event = StunMessageEvent {
                    raw_type,
                    local_address: local,
                    remote_address: remote,
                    bytes: Arc::from(bytes),
                };
                self.dispatcher.fire_message_event(&event);
            }
            Classification::Dtls => {
                for record in dtls::split_records(&bytes) {
                    if !wrapper.offer(RawMessage::new(record.bytes.to_vec(), remote, local)) {
                        log::debug!("raw message queue full, dropping dtls record from {remote}");
                    }
                }
            }
            Classification::Opaque | Classification::TooShort => {
                if !wrapper.offer(RawMessage::new(bytes, remote, local)) {
                    log::debug!("raw message queue full, dropping datagram from {remote}");
                }
            }
        }
    }

    /// UDP's "session" abstraction (spec.md §9): if the wrapper's active
    /// session isn't already this remote, synthesize/look up one and
    /// install it, demoting the previous active session to stale.
    fn promote_remote(self: &Arc<Self>, wrapper: &Arc<SocketWrapper>, remote: TransportAddress) {
        let needs_new = match wrapper.active_session() {
            Some(session) => session.remote != remote,
            None => true,
        };

        if needs_new {
            let session = self.synthesize_session(wrapper.local, remote);
            io_handler::opened(self, wrapper, session);
        }
    }

    fn make_udp_socket(addr: SocketAddr, runtime: &Runtime, config: &AcceptorConfig) -> std::io::Result<std::net::UdpSocket> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::DGRAM, Some(Protocol::UDP))?;

        if config.reuse_address {
            socket.set_reuse_address(true)?;
        }
        if let Some(size) = runtime.send_buffer {
            socket.set_send_buffer_size(size)?;
        }
        if let Some(size) = runtime.receive_buffer {
            socket.set_recv_buffer_size(size)?;
        }

        socket.bind(&addr.into())?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    async fn bind_udp(self: &Arc<Self>, addr: SocketAddr) -> Result<Arc<SocketWrapper>, TransportError> {
        let local = TransportAddress::new(addr, Transport::Udp);

        let std_socket = Self::make_udp_socket(addr, &self.runtime, &self.config)
            .map_err(|e| { log::warn!("udp bind failed on {addr}: {e}"); TransportError::BindFailed { address: addr, attempts: 1 } })?;

        let socket = UdpSocket::from_std(std_socket)
            .map_err(|e| { log::warn!("udp socket setup failed on {addr}: {e}"); TransportError::BindFailed { address: addr, attempts: 1 } })?;
        let socket = Arc::new(socket);

        let wrapper = SocketWrapper::new(local, self);

        self.bindings.write().insert(local);
        self.wrappers.write().insert(local, wrapper.clone());
        self.udp_sockets.write().insert(local, socket.clone());

        let worker_count = self.runtime.io_threads.max(1);
        let mut handles = Vec::with_capacity(worker_count);

        for _ in 0..worker_count {
            let socket = socket.clone();
            let acceptor = self.clone();
            let wrapper = wrapper.clone();

            handles.push(tokio::spawn(async move {
                let mut buf = vec![0u8; 64 * 1024];
                loop {
                    let (size, from) = match socket.recv_from(&mut buf).await {
                        Ok(pair) => pair,
                        Err(e) => {
                            log::warn!("udp recv failed on {local}: {e}");
                            break;
                        }
                    };

                    let remote = TransportAddress::new(from, Transport::Udp);
                    acceptor.handle_incoming(wrapper.clone(), local, remote, buf[..size].to_vec()).await;
                }
            }));
        }

        self.tasks.write().insert(local, handles);
        Ok(wrapper)
    }

    fn make_tcp_listener(addr: SocketAddr, config: &AcceptorConfig) -> std::io::Result<std::net::TcpListener> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

        if config.reuse_address {
            socket.set_reuse_address(true)?;
        }

        socket.bind(&addr.into())?;
        socket.listen(config.backlog as i32)?;
        socket.set_nonblocking(true)?;
        Ok(socket.into())
    }

    async fn bind_tcp(self: &Arc<Self>, addr: SocketAddr) -> Result<Arc<SocketWrapper>, TransportError> {
        let local = TransportAddress::new(addr, Transport::Tcp);

        let std_listener = Self::make_tcp_listener(addr, &self.config)
            .map_err(|e| { log::warn!("tcp bind failed on {addr}: {e}"); TransportError::BindFailed { address: addr, attempts: 1 } })?;

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| { log::warn!("tcp listener setup failed on {addr}: {e}"); TransportError::BindFailed { address: addr, attempts: 1 } })?;

        let wrapper = SocketWrapper::new(local, self);

        self.bindings.write().insert(local);
        self.wrappers.write().insert(local, wrapper.clone());

        let acceptor = self.clone();
        let accept_wrapper = wrapper.clone();
        let tcp_no_delay = self.config.tcp_no_delay;

        let handle = tokio::spawn(async move {
            loop {
                let (stream, peer) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("tcp accept failed on {local}: {e}");
                        break;
                    }
                };

                if tcp_no_delay {
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("tcp set_nodelay failed for {peer}: {e}");
                    }
                }

                let remote = TransportAddress::new(peer, Transport::Tcp);
                acceptor.clone().spawn_tcp_session(accept_wrapper.clone(), local, remote, stream);
            }
        });

        self.tasks.write().insert(local, vec![handle]);
        Ok(wrapper)
    }

    /// Each accepted TCP connection is one session (spec.md §3). Splits the
    /// stream, registers the write half for `Acceptor::write`, runs
    /// `io_handler::opened`, then reassembles RFC 4571 frames off the read
    /// half until the peer closes or errors.
    fn spawn_tcp_session(self: Arc<Self>, wrapper: Arc<SocketWrapper>, local: TransportAddress, remote: TransportAddress, stream: TcpStream) {
        let (mut reader, writer) = stream.into_split();
        let writer = Arc::new(AsyncMutex::new(writer));

        let session = Session::new(remote, local);
        let session_id = session.id;

        self.tcp_writers.write().insert((local, remote), writer);
        io_handler::opened(&self, &wrapper, session);

        let acceptor = self.clone();
        let wrapper = wrapper.clone();

        tokio::spawn(async move {
            let mut buffer = ExchangeBuffer::default();

            loop {
                let size = match reader.read(&mut buffer).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        io_handler::exception_caught(&wrapper, session_id, &e);
                        break;
                    }
                };

                buffer.advance(size);

                while let Some(total) = next_frame_len(&buffer) {
                    let frame = buffer.split(total);
                    acceptor.handle_incoming(wrapper.clone(), local, remote, frame[2..].to_vec()).await;
                }
            }

            acceptor.tcp_writers.write().remove(&(local, remote));
            io_handler::closed(&wrapper, session_id, local, remote);
        });
    }
}
