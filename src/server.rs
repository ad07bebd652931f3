// ABOUTME: Single-threaded readiness-based TCP server owning all live connections
// ABOUTME: Drives accept, nonblocking read, decode, dispatch, encode and drain per connection

use crate::codec::{CodecError, RxBuffer, encode_frame};
use crate::datatypes::{MsgType, RouteStrategy};
use crate::dispatch::{Dispatcher, MAX_REPLY_PAYLOAD, MAX_REQUEST_PAYLOAD};
use crate::routing::RouteTable;
use bytes::BytesMut;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Registry, Token};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, warn};

const LISTENER: Token = Token(0);

/// Per-connection transmit buffer capacity; one encoded reply must fit.
const TX_BUFFER_CAPACITY: usize = 8192;

/// Socket read chunk size.
const READ_CHUNK: usize = 2048;

/// Readiness wait timeout. Nothing depends on the wakeup today; it bounds
/// how stale the loop can get if housekeeping is ever added.
const POLL_TIMEOUT: Duration = Duration::from_millis(1000);

/// Response type for connection-level operations.
///
/// `Alive` means the connection is still usable, `Disconnected` that it must
/// be torn down. Errors on one connection never propagate to another.
#[derive(Debug, PartialEq, Eq)]
enum ConnState {
    Alive,
    Disconnected,
}

/// One accepted connection.
///
/// Owns the socket, a bounded receive buffer and a single pending reply.
/// While the reply drains the connection keeps reading (the peer may keep
/// sending), but no further frame is dispatched until `tx` empties; the
/// kernel socket buffer provides the inbound backpressure.
struct Conn {
    stream: TcpStream,
    token: Token,
    peer: SocketAddr,
    rx: RxBuffer,
    tx: BytesMut,
    tx_off: usize,
    /// True if WRITABLE interest is currently registered.
    /// Invariant: `writable_armed == !tx.is_empty()` between events.
    writable_armed: bool,
}

impl Conn {
    fn new(stream: TcpStream, token: Token, peer: SocketAddr) -> Self {
        Conn {
            stream,
            token,
            peer,
            rx: RxBuffer::new(),
            tx: BytesMut::with_capacity(TX_BUFFER_CAPACITY),
            tx_off: 0,
            writable_armed: false,
        }
    }

    /// Pull everything the socket has, then decode and dispatch until either
    /// the buffered bytes run dry or a reply gets queued.
    fn handle_readable(
        &mut self,
        registry: &Registry,
        dispatcher: &mut Dispatcher,
        scratch: &mut Vec<u8>,
    ) -> ConnState {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    debug!(peer = %self.peer, "peer closed connection");
                    return ConnState::Disconnected;
                }
                Ok(n) => {
                    if let Err(err) = self.rx.append(&chunk[..n]) {
                        warn!(peer = %self.peer, %err, "dropping connection");
                        return ConnState::Disconnected;
                    }
                    if self.dispatch_buffered(registry, dispatcher, scratch)
                        == ConnState::Disconnected
                    {
                        return ConnState::Disconnected;
                    }
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(peer = %self.peer, %err, "read failed");
                    return ConnState::Disconnected;
                }
            }
        }
        ConnState::Alive
    }

    /// Decode and dispatch frames from the receive buffer while no reply is
    /// pending. Stops as soon as a reply is queued: at most one unsent reply
    /// exists per connection, and the rest of the buffer waits for the drain.
    fn dispatch_buffered(
        &mut self,
        registry: &Registry,
        dispatcher: &mut Dispatcher,
        scratch: &mut Vec<u8>,
    ) -> ConnState {
        while self.tx.is_empty() {
            match self.rx.try_decode(MAX_REQUEST_PAYLOAD) {
                Ok(None) => break,
                Ok(Some(frame)) => {
                    let start = dispatcher.clock.now_ms();
                    let reply_type = dispatcher.handle(&frame.header, &frame.payload, scratch);
                    if let Err(err) = self.queue_reply(reply_type, frame.header.seq, scratch) {
                        warn!(peer = %self.peer, %err, "failed to queue reply");
                        return ConnState::Disconnected;
                    }
                    let latency_ms = dispatcher.clock.now_ms() - start;
                    dispatcher.stats.record_request(latency_ms);

                    if self.arm_writable(registry) == ConnState::Disconnected {
                        return ConnState::Disconnected;
                    }
                }
                Err(err) => {
                    dispatcher.stats.bad_frames += 1;
                    warn!(peer = %self.peer, %err, "protocol error, closing");
                    return ConnState::Disconnected;
                }
            }
        }
        ConnState::Alive
    }

    fn queue_reply(&mut self, msg_type: MsgType, seq: u32, payload: &[u8]) -> Result<(), CodecError> {
        debug_assert!(self.tx.is_empty());
        self.tx_off = 0;
        encode_frame(
            &mut self.tx,
            TX_BUFFER_CAPACITY,
            msg_type as u8,
            0,
            seq,
            payload,
        )
    }

    /// Flush the pending reply until done or the kernel pushes back.
    fn handle_writable(&mut self, registry: &Registry) -> ConnState {
        while self.tx_off < self.tx.len() {
            match self.stream.write(&self.tx[self.tx_off..]) {
                Ok(0) => {
                    warn!(peer = %self.peer, "write returned zero, disconnecting");
                    return ConnState::Disconnected;
                }
                Ok(n) => self.tx_off += n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return ConnState::Alive,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    debug!(peer = %self.peer, %err, "write failed");
                    return ConnState::Disconnected;
                }
            }
        }

        self.tx.clear();
        self.tx_off = 0;
        self.disarm_writable(registry)
    }

    /// Arm WRITABLE notifications when a reply becomes pending.
    fn arm_writable(&mut self, registry: &Registry) -> ConnState {
        if self.writable_armed {
            return ConnState::Alive;
        }
        match registry.reregister(
            &mut self.stream,
            self.token,
            Interest::READABLE | Interest::WRITABLE,
        ) {
            Ok(()) => {
                self.writable_armed = true;
                ConnState::Alive
            }
            Err(err) => {
                debug!(peer = %self.peer, %err, "reregister for writable");
                ConnState::Disconnected
            }
        }
    }

    /// Drop WRITABLE interest once the reply has fully drained.
    fn disarm_writable(&mut self, registry: &Registry) -> ConnState {
        if !self.writable_armed {
            return ConnState::Alive;
        }
        match registry.reregister(&mut self.stream, self.token, Interest::READABLE) {
            Ok(()) => {
                self.writable_armed = false;
                ConnState::Alive
            }
            Err(err) => {
                debug!(peer = %self.peer, %err, "reregister drop writable");
                ConnState::Disconnected
            }
        }
    }
}

/// The SentryFlow service.
///
/// One thread owns the listener, every connection, the routing table and the
/// telemetry counters; the only suspension point is the readiness wait, so
/// no locking exists anywhere in the crate.
pub struct Server {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    conns: HashMap<Token, Conn>,
    next_token: usize,
    dispatcher: Dispatcher,
    /// Reply payload scratch reused across requests; dispatch allocates
    /// nothing else per request.
    reply_scratch: Vec<u8>,
    /// Readiness snapshot reused across poll ticks.
    ready: Vec<(Token, bool, bool)>,
}

impl Server {
    /// Bind the listening socket and set up the poller.
    ///
    /// The listener is registered with `SO_REUSEADDR` set (mio's default for
    /// `bind`). Pass port 0 to let the OS pick; see [`Server::local_addr`].
    pub fn bind(addr: SocketAddr, strategy: RouteStrategy) -> io::Result<Server> {
        let mut listener = TcpListener::bind(addr)?;
        let local_addr = listener.local_addr()?;
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut listener, LISTENER, Interest::READABLE)?;

        Ok(Server {
            poll,
            events: Events::with_capacity(64),
            listener,
            local_addr,
            conns: HashMap::new(),
            next_token: LISTENER.0 + 1,
            dispatcher: Dispatcher::new(strategy),
            reply_scratch: Vec::with_capacity(MAX_REPLY_PAYLOAD),
            ready: Vec::with_capacity(64),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Mutable access to the routing table, for seeding routes before the
    /// loop starts.
    pub fn routes_mut(&mut self) -> &mut RouteTable {
        &mut self.dispatcher.routes
    }

    /// Run the event loop. Only returns on a poller failure; connection
    /// errors are contained and the listener keeps accepting.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "sentryflow listening");

        loop {
            if let Err(err) = self.poll.poll(&mut self.events, Some(POLL_TIMEOUT)) {
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(err);
            }

            self.ready.clear();
            for event in self.events.iter() {
                self.ready
                    .push((event.token(), event.is_readable(), event.is_writable()));
            }

            for i in 0..self.ready.len() {
                let (token, readable, writable) = self.ready[i];
                if token == LISTENER {
                    self.accept_ready();
                } else {
                    self.conn_ready(token, readable, writable);
                }
            }
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer)) => {
                    let token = Token(self.next_token);
                    self.next_token += 1;

                    if let Err(err) =
                        self.poll
                            .registry()
                            .register(&mut stream, token, Interest::READABLE)
                    {
                        warn!(%peer, %err, "failed to register client");
                        continue;
                    }
                    info!(%peer, "client connected");
                    self.conns.insert(token, Conn::new(stream, token, peer));
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!(%err, "accept failed");
                    break;
                }
            }
        }
    }

    fn conn_ready(&mut self, token: Token, readable: bool, writable: bool) {
        // Stale token: the connection died earlier in this tick.
        let Some(conn) = self.conns.get_mut(&token) else {
            return;
        };
        let registry = self.poll.registry();

        let mut state = ConnState::Alive;
        if readable {
            state = conn.handle_readable(registry, &mut self.dispatcher, &mut self.reply_scratch);
        }
        if state == ConnState::Alive && writable {
            state = conn.handle_writable(registry);
            // The drain freed the reply slot; frames that piled up while it
            // was pending are dispatchable again right away.
            if state == ConnState::Alive && conn.tx.is_empty() {
                state =
                    conn.dispatch_buffered(registry, &mut self.dispatcher, &mut self.reply_scratch);
            }
        }

        if state == ConnState::Disconnected {
            self.close_conn(token);
        }
    }

    fn close_conn(&mut self, token: Token) {
        if let Some(mut conn) = self.conns.remove(&token) {
            let _ = self.poll.registry().deregister(&mut conn.stream);
            let _ = conn.stream.shutdown(std::net::Shutdown::Both);
            debug!(peer = %conn.peer, "connection closed");
        }
    }
}
