//! Generic single-threaded protocol server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tracing::{error, info};

use crate::aio::{
    Controller, Operation, ReceiveOperation, SendOperation, Semaphore, SynchronisationObject,
};
use crate::error::Error;

use super::{AcceptOperation, Listener, Socket};

/// Minimum event-loop timeout. Timeouts below this are rounded up to
/// avoid burning CPU on lots of tiny deadlines that appear close to each
/// other, and to make sure an exceeded deadline is exceeded by a good
/// margin rather than just barely missed due to scheduling.
const MIN_TIMEOUT: Duration = Duration::from_millis(50);

/// Receive buffer size per connection.
const RECEIVE_BUFFER: usize = 4096;

/// After this many successive accept failures, sleep to free the CPU.
const ERROR_LIMIT: u32 = 10;
const ERROR_SLEEP: Duration = Duration::from_secs(3);

/// What a [`ProtocolHandler`] wants to do next.
///
/// Pre-initialised to "nothing to send, don't close, wait indefinitely".
#[derive(Clone, Debug, Default)]
pub struct ProtocolRequest {
    /// Data to send. The handler is polled again once it went out.
    pub data_to_send: Bytes,
    /// Close the connection and retire the handler.
    pub close: bool,
    /// How long to wait for the transfer (or, when receiving, for data
    /// from the peer) before the handler is informed of a timeout.
    pub time_to_wait: Option<Duration>,
}

/// A query-response protocol implementation, driven by a [`Server`].
///
/// The server polls [`get_operation`](ProtocolHandler::get_operation) and
/// acts on the request: data is sent, or the connection is closed, or the
/// server waits for incoming data. An important limitation is that no
/// data is received while a send is in progress.
pub trait ProtocolHandler: Send {
    /// Fill in the next thing to do.
    fn get_operation(&mut self, request: &mut ProtocolRequest) -> Result<(), Error>;

    /// Account for time spent since the last poll.
    fn advance_time(&mut self, elapsed: Duration);

    /// Process data received from the peer.
    fn handle_data(&mut self, data: Bytes) -> Result<(), Error>;

    /// A send did not complete within its `time_to_wait`.
    fn handle_send_timeout(&mut self, unsent: Bytes);

    /// The connection is going away (peer closed, or `close` requested).
    fn handle_connection_close(&mut self);
}

/// Creates one [`ProtocolHandler`] per accepted connection.
pub trait ProtocolHandlerFactory: Send + Sync {
    fn create(&self) -> Box<dyn ProtocolHandler>;
}

/// A server for a [`ProtocolHandler`].
///
/// Accepts any number of connections from a listener and serves them with
/// handlers created by the factory. All processing happens on the single
/// thread that calls [`run`](Server::run); [`stop`](Server::stop) may be
/// called from anywhere and makes `run` return.
///
/// Handler callbacks may fail; failures are logged with the connection's
/// peer name and the phase they occurred in, and close that connection.
/// They never tear down the server.
pub struct Server {
    listener: Arc<dyn Listener>,
    factory: Arc<dyn ProtocolHandlerFactory>,
    stop_signal: Semaphore,
    log_name: String,
}

// ===== impl Server =====

impl Server {
    /// Serve connections accepted by `listener` with handlers from
    /// `factory`.
    pub fn new(listener: Arc<dyn Listener>, factory: Arc<dyn ProtocolHandlerFactory>) -> Self {
        Server {
            listener,
            factory,
            stop_signal: Semaphore::new(0),
            log_name: "net.server".into(),
        }
    }

    /// Name under which this server logs. Set before `run`.
    pub fn set_log_name(&mut self, log_name: impl Into<String>) {
        self.log_name = log_name.into();
    }

    /// Process connections until [`stop`](Server::stop) is called.
    pub fn run(&self) {
        let ctl = Controller::new();

        let stop_op = Operation::new();
        self.stop_signal.wait_async(&ctl, &stop_op);

        let mut listen_op = AcceptOperation::new();
        self.start_listen(&ctl, &mut listen_op);

        let mut connections: Vec<Connection> = Vec::new();
        let mut close_signal = false;
        let mut error_counter: u32 = 0;

        loop {
            let completed = ctl.wait(find_timeout(&connections, Instant::now()));
            match completed {
                None => {
                    // Deadline check for all transfers in progress.
                    let now = Instant::now();
                    for conn in connections.iter_mut() {
                        if let Err(err) = conn.handle_time(&ctl, now, &mut close_signal) {
                            conn.close_after_error(&mut close_signal);
                            log_exception(&self.log_name, &conn.peer, "timer", &err);
                        }
                    }
                    error_counter = 0;
                }
                Some(op) if op == *listen_op.as_operation() => {
                    match listen_op.result() {
                        None => {
                            // acceptAsync completed but did not produce a
                            // socket; avoid spinning if this repeats.
                            error!(server = %self.log_name, "accept failed");
                            error_counter += 1;
                            if error_counter >= ERROR_LIMIT {
                                std::thread::sleep(ERROR_SLEEP);
                                error_counter = 0;
                            }
                        }
                        Some(socket) => {
                            let peer = socket.peer_name().to_string();
                            info!(server = %self.log_name, %peer, "new connection");
                            let mut conn = Connection::new(socket, peer, self.factory.create());
                            if let Err(err) = conn.start(&ctl, &mut close_signal) {
                                conn.close_after_error(&mut close_signal);
                                log_exception(&self.log_name, &conn.peer, "accept", &err);
                            }
                            connections.push(conn);
                            error_counter = 0;
                        }
                    }
                    // Wait for the next connection.
                    self.start_listen(&ctl, &mut listen_op);
                }
                Some(op) if op == stop_op => break,
                Some(op) => {
                    for conn in connections.iter_mut() {
                        match conn.handle_event(&ctl, &op, &mut close_signal) {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(err) => {
                                conn.close_after_error(&mut close_signal);
                                log_exception(&self.log_name, &conn.peer, "I/O", &err);
                                break;
                            }
                        }
                    }
                    error_counter = 0;
                }
            }

            if close_signal {
                connections.retain(|conn| {
                    if matches!(conn.state, ConnState::Closing) {
                        info!(server = %self.log_name, peer = %conn.peer, "connection closes");
                        false
                    } else {
                        true
                    }
                });
                close_signal = false;
            }
        }

        // Terminate: take back everything still in flight.
        self.listener.cancel(&ctl, listen_op.as_operation());
        for conn in connections.iter() {
            conn.stop(&ctl);
        }
    }

    /// Stop this server. Callable from any thread; makes `run` exit.
    pub fn stop(&self) {
        self.stop_signal.post();
    }

    fn start_listen(&self, ctl: &Controller, op: &mut AcceptOperation) {
        op.set_result(None);
        if let Err(err) = self.listener.accept_async(ctl, op) {
            error!(server = %self.log_name, error = %err, "cannot accept");
        }
    }
}

fn log_exception(server: &str, peer: &str, phase: &str, err: &Error) {
    error!(server = %server, peer = %peer, phase = %phase, error = %err, "handler error");
}

/// Next wait timeout: the minimum remaining deadline of all transfers in
/// progress, rounded up to [`MIN_TIMEOUT`]; `None` (wait forever) when
/// nothing has a deadline.
fn find_timeout(connections: &[Connection], now: Instant) -> Option<Duration> {
    let mut result: Option<Duration> = None;
    for conn in connections {
        if !matches!(conn.state, ConnState::Sending | ConnState::Receiving) {
            continue;
        }
        if let Some(time_to_wait) = conn.request.time_to_wait {
            let elapsed = now.duration_since(conn.started);
            let remaining = time_to_wait.saturating_sub(elapsed);
            result = Some(result.map_or(remaining, |r| r.min(remaining)));
        }
    }
    match result {
        Some(remaining) if remaining > Duration::ZERO && remaining < MIN_TIMEOUT => {
            Some(MIN_TIMEOUT)
        }
        other => other,
    }
}

/// Simple single-connection server.
///
/// Serves one connection at a time, blocking in between. Multiple
/// `SimpleServer` threads may share a listener (and a factory, if that
/// one supports it) to serve connections in parallel.
///
/// [`stop`](SimpleServer::stop) does not interrupt a blocked accept: the
/// request is noticed after the current or next connection completes, so
/// a stop usually wants to be followed by a dummy connection attempt.
pub struct SimpleServer {
    listener: Arc<dyn Listener>,
    factory: Arc<dyn ProtocolHandlerFactory>,
    stop_requested: AtomicBool,
}

// ===== impl SimpleServer =====

impl SimpleServer {
    pub fn new(listener: Arc<dyn Listener>, factory: Arc<dyn ProtocolHandlerFactory>) -> Self {
        SimpleServer {
            listener,
            factory,
            stop_requested: AtomicBool::new(false),
        }
    }

    /// Accept and handle connections, one at a time.
    pub fn run(&self) {
        while !self.stop_requested.load(Ordering::SeqCst) {
            let socket = match self.listener.accept(None) {
                Ok(Some(socket)) => socket,
                Ok(None) => continue,
                Err(err) => {
                    error!(error = %err, "accept failed");
                    continue;
                }
            };
            let peer = socket.peer_name().to_string();
            let mut handler = self.factory.create();
            if let Err(err) = interact(&socket, &mut *handler) {
                log_exception("net.simpleserver", &peer, "I/O", &err);
            }
        }
    }

    /// Request a stop after the current or next connection.
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }
}

/// Drive one connection through a protocol handler, blocking, until the
/// handler closes the connection or the peer disconnects.
pub fn interact(socket: &Arc<dyn Socket>, handler: &mut dyn ProtocolHandler) -> Result<(), Error> {
    let ctl = Controller::new();
    loop {
        let mut request = ProtocolRequest::default();
        handler.get_operation(&mut request)?;

        if !request.data_to_send.is_empty() {
            let started = Instant::now();
            let mut op = SendOperation::new(request.data_to_send.clone());
            loop {
                if !socket.send(&ctl, &mut op, request.time_to_wait) || op.num_sent() == 0 {
                    handler.advance_time(started.elapsed());
                    handler.handle_send_timeout(op.unsent());
                    break;
                }
                if op.is_completed() {
                    handler.advance_time(started.elapsed());
                    break;
                }
                let rest = op.unsent();
                op.set_data(rest);
            }
        } else if request.close {
            handler.handle_connection_close();
            return Ok(());
        } else {
            let started = Instant::now();
            let mut op = ReceiveOperation::new(RECEIVE_BUFFER);
            if !socket.receive(&ctl, &mut op, request.time_to_wait) {
                // Timeout; let the handler reconsider.
                handler.advance_time(started.elapsed());
                continue;
            }
            handler.advance_time(started.elapsed());
            if op.num_received() == 0 {
                handler.handle_connection_close();
                return Ok(());
            }
            handler.handle_data(op.received())?;
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum ConnState {
    Idle,
    Sending,
    Receiving,
    Closing,
}

struct Connection {
    state: ConnState,
    socket: Arc<dyn Socket>,
    peer: String,
    handler: Box<dyn ProtocolHandler>,
    request: ProtocolRequest,
    send_op: SendOperation,
    recv_op: ReceiveOperation,
    started: Instant,
}

// ===== impl Connection =====

impl Connection {
    fn new(socket: Arc<dyn Socket>, peer: String, handler: Box<dyn ProtocolHandler>) -> Self {
        Connection {
            state: ConnState::Idle,
            socket,
            peer,
            handler,
            request: ProtocolRequest::default(),
            send_op: SendOperation::default(),
            recv_op: ReceiveOperation::new(0),
            started: Instant::now(),
        }
    }

    /// Poll the handler and arm the next transfer.
    fn start(&mut self, ctl: &Controller, close_signal: &mut bool) -> Result<(), Error> {
        self.request = ProtocolRequest::default();
        self.handler.get_operation(&mut self.request)?;

        if !self.request.data_to_send.is_empty() {
            self.send_op.set_data(self.request.data_to_send.clone());
            self.socket.send_async(ctl, &self.send_op);
            self.started = Instant::now();
            self.state = ConnState::Sending;
        } else if self.request.close {
            self.handler.handle_connection_close();
            self.state = ConnState::Closing;
            *close_signal = true;
        } else {
            self.recv_op = ReceiveOperation::new(RECEIVE_BUFFER);
            self.socket.receive_async(ctl, &self.recv_op);
            self.started = Instant::now();
            self.state = ConnState::Receiving;
        }
        Ok(())
    }

    /// React to a completed operation. `Ok(true)` when the event belonged
    /// to this connection.
    fn handle_event(
        &mut self,
        ctl: &Controller,
        op: &Operation,
        close_signal: &mut bool,
    ) -> Result<bool, Error> {
        match self.state {
            ConnState::Idle | ConnState::Closing => Ok(false),

            ConnState::Sending => {
                if op != self.send_op.as_operation() {
                    return Ok(false);
                }
                if self.send_op.is_completed() {
                    self.handler.advance_time(self.started.elapsed());
                    self.state = ConnState::Idle;
                    self.start(ctl, close_signal)?;
                } else {
                    // Successful but incomplete send. Keep the unsent rest
                    // in the request so a timeout can report it.
                    let rest = self.send_op.unsent();
                    self.request.data_to_send = rest.clone();
                    self.send_op.set_data(rest);
                    self.socket.send_async(ctl, &self.send_op);
                }
                Ok(true)
            }

            ConnState::Receiving => {
                if op != self.recv_op.as_operation() {
                    return Ok(false);
                }
                self.handler.advance_time(self.started.elapsed());
                if self.recv_op.num_received() == 0 {
                    // Zero bytes: the peer closed the connection.
                    self.handler.handle_connection_close();
                    self.state = ConnState::Closing;
                    *close_signal = true;
                } else {
                    self.handler.handle_data(self.recv_op.received())?;
                    self.state = ConnState::Idle;
                    self.start(ctl, close_signal)?;
                }
                Ok(true)
            }
        }
    }

    /// Enforce the handler's deadline on the transfer in progress.
    fn handle_time(
        &mut self,
        ctl: &Controller,
        now: Instant,
        close_signal: &mut bool,
    ) -> Result<(), Error> {
        let time_to_wait = match self.request.time_to_wait {
            Some(t) => t,
            None => return Ok(()),
        };
        let elapsed = now.duration_since(self.started);
        if elapsed < time_to_wait {
            return Ok(());
        }
        match self.state {
            ConnState::Idle | ConnState::Closing => Ok(()),
            ConnState::Sending => {
                self.handler.advance_time(elapsed);
                self.handler
                    .handle_send_timeout(self.request.data_to_send.clone());
                self.socket.cancel(ctl, self.send_op.as_operation());
                self.state = ConnState::Idle;
                self.start(ctl, close_signal)
            }
            ConnState::Receiving => {
                self.handler.advance_time(elapsed);
                self.socket.cancel(ctl, self.recv_op.as_operation());
                self.state = ConnState::Idle;
                self.start(ctl, close_signal)
            }
        }
    }

    /// A handler callback failed; retire the connection.
    fn close_after_error(&mut self, close_signal: &mut bool) {
        self.state = ConnState::Closing;
        *close_signal = true;
    }

    /// Ungraceful shutdown: take back the operation in flight.
    fn stop(&self, ctl: &Controller) {
        match self.state {
            ConnState::Idle | ConnState::Closing => {}
            ConnState::Sending => self.socket.cancel(ctl, self.send_op.as_operation()),
            ConnState::Receiving => self.socket.cancel(ctl, self.recv_op.as_operation()),
        }
    }
}
