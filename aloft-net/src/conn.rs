use std::collections::{HashMap, VecDeque};
use std::io::{ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration as StdDuration;

use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

use aloft_base::{err, Result};

use crate::frame::{encode_frame, parse_frame, ParseFrameResult};
use crate::message::Message;

const LISTENER_TOKEN: Token = Token(0);
const WAKER_TOKEN: Token = Token(1);
const FIRST_CONNECTION_TOKEN: usize = 2;

/// Application-level callbacks the connection engine drives for one
/// connection. Implemented by the peer orchestrator to feed inbound
/// messages into the transaction engine and pull outbound ones back out.
pub trait ConnectionHandler: Send + Sync {
    /// Returns the next message to send, or `None` if nothing is queued
    /// yet. Called whenever the connection's outbound buffer runs dry.
    fn next_outbound(&self) -> Option<Message>;
    /// Called once per message, in the order it was received.
    fn on_message(&self, message: Message);
    /// Called exactly once, right after `add_connection` registers this
    /// connection, with the token it was assigned and a weak handle back to
    /// the engine. A handler that later queues outbound work outside of
    /// `service()` (e.g. in response to an unrelated broadcast, or from
    /// inside `on_message` itself) needs both to call
    /// [`ConnectionEngine::notify_outbound`] and get the connection
    /// re-readied; the default implementation does nothing, for handlers
    /// that only ever produce output from `next_outbound`.
    fn on_registered(&self, _engine: Weak<ConnectionEngine>, _token: Token) {}
    /// Called exactly once, however the connection came to be closed.
    fn on_close(&self);
}

struct Connection {
    stream: TcpStream,
    token: Token,
    inbound: Vec<u8>,
    outbound: Vec<u8>,
    readable: bool,
    writable: bool,
    closed: bool,
    close_notified: bool,
    handler: Arc<dyn ConnectionHandler>,
}

impl Connection {
    /// A connection with nothing useful left to do until its readiness
    /// changes: it can't productively read (not readable) and it either has
    /// nothing queued to send or can't send it yet.
    fn is_blocked(&self) -> bool {
        !self.readable && (!self.has_output_pending() || !self.writable)
    }

    fn has_output_pending(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// One recv attempt and one send attempt -- the original design's
    /// discipline of doing at most one syscall of each kind per pass so a
    /// single busy connection can't starve the rest of the ready queue.
    fn service(&mut self) -> Result<()> {
        if self.readable {
            self.recv_once()?;
        }
        if !self.closed {
            self.send_once()?;
        }
        Ok(())
    }

    fn recv_once(&mut self) -> Result<()> {
        let mut buf = [0u8; 4096];
        match self.stream.read(&mut buf) {
            Ok(0) => self.closed = true,
            Ok(n) => {
                self.inbound.extend_from_slice(&buf[..n]);
                self.drain_messages()?;
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.readable = false,
            Err(e) if is_peer_gone(&e) => self.closed = true,
            Err(e) => return Err(err(format!("recv failed: {e}"))),
        }
        Ok(())
    }

    /// Unread bytes are never discarded: a message bigger than one `recv`
    /// simply accumulates in `inbound` across calls until a full frame can
    /// be parsed.
    fn drain_messages(&mut self) -> Result<()> {
        loop {
            match parse_frame(&self.inbound)? {
                ParseFrameResult::Complete { message, consumed } => {
                    self.handler.on_message(message);
                    self.inbound.drain(..consumed);
                }
                ParseFrameResult::Incomplete => break,
            }
        }
        Ok(())
    }

    fn send_once(&mut self) -> Result<()> {
        if self.outbound.is_empty() {
            if let Some(message) = self.handler.next_outbound() {
                self.outbound = encode_frame(&message)?;
            }
        }
        if self.outbound.is_empty() || !self.writable {
            return Ok(());
        }
        match self.stream.write(&self.outbound) {
            Ok(0) => {}
            Ok(n) => {
                self.outbound.drain(..n);
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => self.writable = false,
            Err(e) if is_peer_gone(&e) => self.closed = true,
            Err(e) => return Err(err(format!("send failed: {e}"))),
        }
        Ok(())
    }
}

fn is_peer_gone(e: &std::io::Error) -> bool {
    matches!(
        e.kind(),
        ErrorKind::ConnectionReset | ErrorKind::BrokenPipe | ErrorKind::ConnectionAborted
    )
}

struct Shared {
    poll: Mutex<Poll>,
    connections: Mutex<HashMap<Token, Connection>>,
    /// Connections known to have work to do right now, partitioned from
    /// whatever remains registered and blocked in `poll`. A connection is
    /// in at most one of these two places at a time.
    ready: Mutex<VecDeque<Token>>,
    ready_cv: Condvar,
    next_token: AtomicUsize,
    shutting_down: AtomicBool,
    waker: Waker,
}

impl Shared {
    fn push_ready(&self, token: Token) {
        let mut ready = self.ready.lock();
        if !ready.contains(&token) {
            ready.push_back(token);
            self.ready_cv.notify_one();
        }
    }

    fn wake(&self) {
        let _ = self.waker.wake();
    }
}

/// A `mio`-backed, readiness-driven connection engine: one listener/poll
/// thread plus a small pool of worker threads that drain the ready queue.
/// New outbound traffic on a connection wakes the poll thread via a
/// `mio::Waker` so workers don't have to poll idle connections.
pub struct ConnectionEngine {
    shared: Arc<Shared>,
    listener: Option<TcpListener>,
    /// Builds the handler for a freshly accepted connection. `None` means
    /// this engine only ever gets connections via [`ConnectionEngine::add_connection`]
    /// (e.g. a peer with no listener, or one driven entirely by outbound dials).
    accept_handler_factory: Option<Box<dyn Fn(SocketAddr) -> Arc<dyn ConnectionHandler> + Send + Sync>>,
    poll_thread: Mutex<Option<JoinHandle<()>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    /// A weak handle to this same engine, handed to every `ConnectionHandler`
    /// via `on_registered` so it can call `notify_outbound` later without
    /// creating an `Arc` reference cycle (engine -> connection -> handler).
    self_weak: Weak<ConnectionEngine>,
}

impl ConnectionEngine {
    pub fn new(
        listen_addr: Option<SocketAddr>,
        accept_handler_factory: Option<Box<dyn Fn(SocketAddr) -> Arc<dyn ConnectionHandler> + Send + Sync>>,
    ) -> Result<Arc<Self>> {
        let mut poll = Poll::new().map_err(|e| err(format!("failed to create poller: {e}")))?;
        let waker = Waker::new(poll.registry(), WAKER_TOKEN)
            .map_err(|e| err(format!("failed to create waker: {e}")))?;

        let mut listener = match listen_addr {
            Some(addr) => {
                let mut listener = TcpListener::bind(addr)
                    .map_err(|e| err(format!("failed to bind {addr}: {e}")))?;
                poll.registry()
                    .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
                    .map_err(|e| err(format!("failed to register listener: {e}")))?;
                Some(listener)
            }
            None => None,
        };
        let _ = &mut listener;

        let shared = Arc::new(Shared {
            poll: Mutex::new(poll),
            connections: Mutex::new(HashMap::new()),
            ready: Mutex::new(VecDeque::new()),
            ready_cv: Condvar::new(),
            next_token: AtomicUsize::new(FIRST_CONNECTION_TOKEN),
            shutting_down: AtomicBool::new(false),
            waker,
        });

        Ok(Arc::new_cyclic(|self_weak| ConnectionEngine {
            shared,
            listener,
            accept_handler_factory,
            poll_thread: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            self_weak: self_weak.clone(),
        }))
    }

    /// Registers an already-connected stream (from a successful dial or a
    /// just-accepted connection) with the poll loop, returning its token.
    pub fn add_connection(
        &self,
        mut stream: TcpStream,
        handler: Arc<dyn ConnectionHandler>,
    ) -> Result<Token> {
        let token = Token(self.shared.next_token.fetch_add(1, Ordering::SeqCst));
        self.shared
            .poll
            .lock()
            .registry()
            .register(&mut stream, token, Interest::READABLE | Interest::WRITABLE)
            .map_err(|e| err(format!("failed to register connection: {e}")))?;

        let conn = Connection {
            stream,
            token,
            inbound: Vec::new(),
            outbound: Vec::new(),
            readable: true,
            writable: true,
            closed: false,
            close_notified: false,
            handler: handler.clone(),
        };
        self.shared.connections.lock().insert(token, conn);
        self.shared.push_ready(token);
        handler.on_registered(self.self_weak.clone(), token);
        Ok(token)
    }

    /// Tells the engine that `token`'s handler has new outbound work queued.
    /// A connection that has gone idle (nothing readable, nothing pending)
    /// is parked by the workers and never revisited by `poll` on its own --
    /// producing a message outside of `service()` (e.g. a broadcast commit,
    /// or an `ObjectRequest` reply queued from `on_message`) must call this
    /// or it sits unsent until unrelated inbound bytes happen to re-ready
    /// the socket.
    pub fn notify_outbound(&self, token: Token) {
        self.shared.push_ready(token);
        self.shared.wake();
    }

    /// Starts the poll/accept thread and `worker_count` servicing threads.
    pub fn start(self: &Arc<Self>, worker_count: usize) {
        let poll_engine = self.clone();
        let poll_handle = std::thread::spawn(move || poll_engine.run_poll_loop());
        *self.poll_thread.lock() = Some(poll_handle);

        let mut workers = self.workers.lock();
        for _ in 0..worker_count.max(1) {
            let engine = self.clone();
            workers.push(std::thread::spawn(move || engine.run_worker()));
        }
    }

    fn run_poll_loop(&self) {
        let mut events = Events::with_capacity(1024);
        loop {
            if self.shared.shutting_down.load(Ordering::SeqCst) {
                break;
            }
            let poll_result = {
                let mut poll = self.shared.poll.lock();
                poll.poll(&mut events, Some(StdDuration::from_millis(250)))
            };
            if let Err(e) = poll_result {
                warn!(target: "aloft", "poll failed: {e}");
                continue;
            }
            for event in events.iter() {
                match event.token() {
                    WAKER_TOKEN => {} // just here to unblock poll()
                    LISTENER_TOKEN => self.accept_pending(),
                    token => {
                        let mut connections = self.shared.connections.lock();
                        if let Some(conn) = connections.get_mut(&token) {
                            if event.is_readable() {
                                conn.readable = true;
                            }
                            if event.is_writable() {
                                conn.writable = true;
                            }
                            drop(connections);
                            self.shared.push_ready(token);
                        }
                    }
                }
            }
        }
    }

    fn accept_pending(&self) {
        let Some(listener) = self.listener.as_ref() else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!(target: "aloft", "accepted connection from {addr}");
                    match &self.accept_handler_factory {
                        Some(factory) => {
                            let handler = factory(addr);
                            if let Err(e) = self.add_connection(stream, handler) {
                                warn!(target: "aloft", "failed to register accepted connection from {addr}: {e}");
                            }
                        }
                        None => warn!(
                            target: "aloft",
                            "dropping connection from {addr}: no accept handler configured"
                        ),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!(target: "aloft", "accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn run_worker(&self) {
        loop {
            let token = {
                let mut ready = self.shared.ready.lock();
                loop {
                    if self.shared.shutting_down.load(Ordering::SeqCst) {
                        return;
                    }
                    if let Some(token) = ready.pop_front() {
                        break token;
                    }
                    self.shared.ready_cv.wait(&mut ready);
                }
            };

            let mut connections = self.shared.connections.lock();
            let Some(conn) = connections.get_mut(&token) else {
                continue;
            };
            if let Err(e) = conn.service() {
                warn!(target: "aloft", "connection error, closing: {e}");
                conn.closed = true;
            }
            let closed = conn.closed;
            let should_notify_close = closed && !conn.close_notified;
            if should_notify_close {
                conn.close_notified = true;
            }
            let blocked = !closed && conn.is_blocked();
            let handler = conn.handler.clone();
            drop(connections);

            if should_notify_close {
                handler.on_close();
                self.shared.connections.lock().remove(&token);
                continue;
            }
            if !blocked {
                self.shared.push_ready(token);
            }
        }
    }

    /// Stops accepting new work, wakes every blocked thread, joins the
    /// worker pool and the poll thread, and closes any sockets still open.
    pub fn stop(&self) {
        self.shared.shutting_down.store(true, Ordering::SeqCst);
        self.shared.ready_cv.notify_all();
        self.shared.wake();

        if let Some(handle) = self.poll_thread.lock().take() {
            let _ = handle.join();
        }
        for handle in self.workers.lock().drain(..) {
            let _ = handle.join();
        }
        self.shared.connections.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;
    use test_log::test;

    struct RecordingHandler {
        received: mpsc::Sender<Message>,
        to_send: Mutex<VecDeque<Message>>,
    }

    impl ConnectionHandler for RecordingHandler {
        fn next_outbound(&self) -> Option<Message> {
            self.to_send.lock().pop_front()
        }
        fn on_message(&self, message: Message) {
            let _ = self.received.send(message);
        }
        fn on_close(&self) {}
    }

    #[test]
    fn accepted_connection_exchanges_a_message_with_a_dialed_one() {
        let server_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        // Bind on an ephemeral port the OS picks, then discover it.
        let probe = std::net::TcpListener::bind(server_addr).unwrap();
        let bound_addr = probe.local_addr().unwrap();
        drop(probe);

        let (server_tx, server_rx) = mpsc::channel();
        let server = ConnectionEngine::new(
            Some(bound_addr),
            Some(Box::new(move |_addr| {
                Arc::new(RecordingHandler {
                    received: server_tx.clone(),
                    to_send: Mutex::new(VecDeque::new()),
                }) as Arc<dyn ConnectionHandler>
            })),
        )
        .unwrap();
        server.start(1);

        let client = ConnectionEngine::new(None, None).unwrap();
        client.start(1);
        let (client_tx, _client_rx) = mpsc::channel();
        let mut outgoing = VecDeque::new();
        outgoing.push_back(Message::Bye);
        let client_handler = Arc::new(RecordingHandler {
            received: client_tx,
            to_send: Mutex::new(outgoing),
        });
        let stream = TcpStream::connect(bound_addr).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        client.add_connection(stream, client_handler).unwrap();

        let received = server_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(received, Message::Bye));

        client.stop();
        server.stop();
    }
}
