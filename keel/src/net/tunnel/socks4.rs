//! SOCKS4/4a client tunnel.
//!
//! Protocol notes (SOCKS4, SOCKS4a):
//! - CONNECT: send `{4, 1, port[2], ip[4], userid..., 0}`, receive
//!   `{0, status, port[2], ip[4]}` where status 90 means granted, 91
//!   rejected/failed, 92 identd not reachable, 93 identd mismatch.
//! - BIND: send `{4, 2, port[2], ip[4], userid..., 0}`, receive the same
//!   8-byte reply twice; the first describes the bound endpoint, the
//!   second the connected peer.
//! - SOCKS4a: if the target is a host name, send `ip = 0.0.0.1` and append
//!   the host name, NUL-terminated, after the userid terminator; the
//!   proxy resolves the name remotely.
//!
//! Proxies in the wild differ: OpenSSH's dynamic forward supports CONNECT
//! only and just closes the connection on error instead of sending a
//! reply. A closed connection during the handshake is therefore reported
//! as a failure, not as EOF.

use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::aio::{
    default_notifier, Cancelable, Controller, ControllerCore, Notifier, Operation,
    ReceiveOperation, SendOperation,
};
use crate::error::{messages, Error};
use crate::net::{AcceptOperation, Listener, Name, NetworkStack, Socket};

use super::wrapper::SocketWrapper;

const SOCKS4_VERSION: u8 = 4;
const SOCKS4_OP_CONNECT: u8 = 1;
const SOCKS4_OP_BIND: u8 = 2;
const STATUS_GRANTED: u8 = 90;
const REPLY_LEN: usize = 8;

/// How long to wait for the connection to the proxy server during an
/// accept handshake.
const BIND_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Tunnels connections through a SOCKS4/4a proxy.
///
/// `connect` performs the CONNECT handshake against the configured server
/// and hands out the proxied socket; `listen` produces a listener whose
/// every accept opens a fresh proxy connection and performs the two-reply
/// BIND handshake. Target names that parse as an IPv4 address are sent in
/// SOCKS4 form, host names in SOCKS4a form with remote resolution.
pub struct Socks4NetworkStack {
    parent: Arc<dyn NetworkStack>,
    server: Name,
}

// ===== impl Socks4NetworkStack =====

impl Socks4NetworkStack {
    /// Tunnel through the SOCKS4 server at `server`, reached via `parent`.
    pub fn new(parent: Arc<dyn NetworkStack>, server: Name) -> Self {
        Socks4NetworkStack { parent, server }
    }
}

impl NetworkStack for Socks4NetworkStack {
    fn listen(&self, name: &Name, _backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        Ok(Arc::new(BindListener {
            parent: Arc::clone(&self.parent),
            server: self.server.clone(),
            listen_name: name.clone(),
            active: Arc::new(StdMutex::new(Vec::new())),
        }))
    }

    fn connect(&self, name: &Name, timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        let socket = self.parent.connect(&self.server, timeout)?;
        let ctl = Controller::new();

        let request = build_request(SOCKS4_OP_CONNECT, name)
            .ok_or_else(|| Error::protocol(name.to_string(), "bad port"))?;
        socket.full_send(&ctl, &request, timeout)?;

        let frame = socket.full_receive(&ctl, REPLY_LEN, timeout)?;
        let reply = parse_reply(&socket.name(), &frame)?;
        if reply.status != STATUS_GRANTED {
            return Err(Error::protocol(
                name.to_string(),
                format!(
                    "{} (SOCKS4 error code: {})",
                    status_message(reply.status),
                    reply.status
                ),
            ));
        }
        Ok(socket)
    }
}

fn status_message(status: u8) -> &'static str {
    match status {
        91 => "Request rejected or failed",
        92 => "Authentication service not accessible",
        93 => "Authentication mismatch",
        _ => "?",
    }
}

fn parse_port(service: &str) -> Option<[u8; 2]> {
    if service.is_empty() || !service.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let port: u32 = service.parse().ok()?;
    if port == 0 || port > 0xFFFF {
        return None;
    }
    Some([(port >> 8) as u8, port as u8])
}

/// The 0.0.0.x addresses are the SOCKS4a "host name follows" marker and
/// cannot be connected to literally.
fn is_dummy_address(addr: [u8; 4]) -> bool {
    addr[0] == 0 && addr[1] == 0 && addr[2] == 0 && addr[3] != 0
}

fn build_request(op: u8, name: &Name) -> Option<BytesMut> {
    let port = parse_port(name.service())?;
    let mut buf = BytesMut::with_capacity(REPLY_LEN + 1 + name.host().len() + 1);
    buf.put_u8(SOCKS4_VERSION);
    buf.put_u8(op);
    buf.put_slice(&port);
    match name
        .host()
        .parse::<Ipv4Addr>()
        .ok()
        .map(|ip| ip.octets())
        .filter(|addr| !is_dummy_address(*addr))
    {
        Some(addr) => {
            // IP given (SOCKS4).
            buf.put_slice(&addr);
            buf.put_u8(0);
        }
        None => {
            // Host name given (SOCKS4a).
            buf.put_slice(&[0, 0, 0, 1]);
            buf.put_u8(0);
            buf.put_slice(name.host().as_bytes());
            buf.put_u8(0);
        }
    }
    Some(buf)
}

struct Reply {
    status: u8,
    port: u16,
    addr: [u8; 4],
}

fn parse_reply(socket_name: &str, frame: &[u8]) -> Result<Reply, Error> {
    if frame[0] != 0 && frame[0] != SOCKS4_VERSION {
        // The proxy did not speak the protocol.
        return Err(Error::protocol(socket_name, messages::SYNTAX_ERROR));
    }
    Ok(Reply {
        status: frame[1],
        port: u16::from_be_bytes([frame[2], frame[3]]),
        addr: [frame[4], frame[5], frame[6], frame[7]],
    })
}

impl Reply {
    fn peer_name(&self) -> Name {
        Name::with_port(
            format!(
                "{}.{}.{}.{}",
                self.addr[0], self.addr[1], self.addr[2], self.addr[3]
            ),
            self.port,
        )
    }
}

/*
 * BindListener: every accept opens a connection to the proxy and runs the
 * BIND handshake on it via an Acceptor.
 */
struct BindListener {
    parent: Arc<dyn NetworkStack>,
    server: Name,
    listen_name: Name,
    active: ActiveList,
}

type ActiveList = Arc<StdMutex<Vec<Arc<Acceptor>>>>;

impl Cancelable for BindListener {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        let acceptor = {
            let mut active = self.active.lock().unwrap();
            match active
                .iter()
                .position(|a| a.user_op.as_operation() == op)
            {
                Some(idx) => Some(active.remove(idx)),
                None => None,
            }
        };
        if let Some(acceptor) = acceptor {
            acceptor.cancel_in_flight();
            acceptor.detach();
        }
        ctl.revert_post(op);
    }
}

impl Drop for BindListener {
    fn drop(&mut self) {
        // Abandon handshakes still in flight; their accept operations
        // will never complete.
        let acceptors: Vec<_> = std::mem::take(&mut *self.active.lock().unwrap());
        for acceptor in acceptors {
            acceptor.cancel_in_flight();
            acceptor.detach();
        }
    }
}

impl Listener for BindListener {
    fn accept_async(&self, ctl: &Controller, op: &AcceptOperation) -> Result<(), Error> {
        // The handshake connection is opened synchronously; the handshake
        // itself then runs as a state machine on the caller's controller.
        let socket = self
            .parent
            .connect(&self.server, Some(BIND_CONNECT_TIMEOUT))?;

        op.as_operation().set_owner(Arc::clone(ctl.core()));
        let acceptor = Arc::new(Acceptor {
            active: Arc::clone(&self.active),
            ctl: Arc::clone(ctl.core()),
            user_op: op.alias(),
            socket,
            listen_name: self.listen_name.clone(),
            state: StdMutex::new(AcceptorState {
                phase: Phase::Idle,
                send_op: SendOperation::default(),
                recv_op: ReceiveOperation::new(0),
                response: BytesMut::new(),
            }),
        });
        self.active.lock().unwrap().push(Arc::clone(&acceptor));
        Acceptor::start(&acceptor);
        Ok(())
    }

    fn accept(&self, timeout: Option<Duration>) -> Result<Option<Arc<dyn Socket>>, Error> {
        let ctl = Controller::new();
        let op = AcceptOperation::new();
        self.accept_async(&ctl, &op)?;
        if ctl.wait_for(op.as_operation(), timeout) {
            match op.result() {
                Some(socket) => Ok(Some(socket)),
                // With no timeout to blame, a failed handshake is an error.
                None if timeout.is_none() => Err(Error::network(
                    self.listen_name.to_string(),
                    messages::NETWORK_ERROR,
                )),
                None => Ok(None),
            }
        } else {
            self.cancel(&ctl, op.as_operation());
            Ok(None)
        }
    }
}

/*
 * Acceptor: per-accept BIND handshake state machine.
 *
 * The acceptor is the notifier of its own send/receive operations, so the
 * chain advances on every completion without the user's controller seeing
 * the intermediate steps; only the terminal state completes the user's
 * accept operation, through that operation's own notifier.
 */
struct Acceptor {
    active: ActiveList,
    ctl: Arc<ControllerCore>,
    user_op: AcceptOperation,
    socket: Arc<dyn Socket>,
    listen_name: Name,
    state: StdMutex<AcceptorState>,
}

struct AcceptorState {
    phase: Phase,
    send_op: SendOperation,
    recv_op: ReceiveOperation,
    response: BytesMut,
}

#[derive(Clone, Copy, PartialEq)]
enum Phase {
    Idle,
    Sending,
    Receiving,
    Finished,
}

enum Action {
    Nothing,
    Send(SendOperation),
    Receive(ReceiveOperation),
    Finish(Option<Arc<dyn Socket>>),
}

// ===== impl Acceptor =====

impl Acceptor {
    fn start(this: &Arc<Acceptor>) {
        let action = {
            let mut st = this.state.lock().unwrap();
            if st.phase != Phase::Idle {
                return;
            }
            match build_request(SOCKS4_OP_BIND, &this.listen_name) {
                Some(request) => {
                    let notifier = Arc::clone(this) as Arc<dyn Notifier>;
                    st.send_op.set_notifier(Arc::clone(&notifier));
                    st.recv_op.set_notifier(notifier);
                    st.send_op.set_data(request.freeze());
                    st.phase = Phase::Sending;
                    Action::Send(st.send_op.alias())
                }
                None => Action::Finish(None),
            }
        };
        this.perform(action);
    }

    fn perform(&self, action: Action) {
        let ctl = Controller::from_core(Arc::clone(&self.ctl));
        match action {
            Action::Nothing => {}
            Action::Send(op) => self.socket.send_async(&ctl, &op),
            Action::Receive(op) => self.socket.receive_async(&ctl, &op),
            Action::Finish(result) => self.finish(result),
        }
    }

    /// Advance the state machine after one completed transfer. The state
    /// lock is released before the next transfer starts, because a
    /// synchronous socket completes it (and re-enters here) immediately.
    fn step(&self) -> Action {
        let mut st = self.state.lock().unwrap();
        match st.phase {
            Phase::Idle | Phase::Finished => Action::Nothing,
            Phase::Sending => {
                if st.send_op.is_completed() {
                    // Request out; collect the two replies.
                    st.phase = Phase::Receiving;
                    st.recv_op.set_buffer(BytesMut::zeroed(2 * REPLY_LEN));
                    Action::Receive(st.recv_op.alias())
                } else if st.send_op.num_sent() == 0 {
                    // Cannot send.
                    Action::Finish(None)
                } else {
                    // Partially sent.
                    let rest = st.send_op.unsent();
                    st.send_op.set_data(rest);
                    Action::Send(st.send_op.alias())
                }
            }
            Phase::Receiving => {
                let chunk = st.recv_op.received();
                if chunk.is_empty() {
                    // Cannot receive.
                    return Action::Finish(None);
                }
                st.response.extend_from_slice(&chunk);
                if st.response.len() < 2 * REPLY_LEN {
                    // Partially received.
                    let missing = 2 * REPLY_LEN - st.response.len();
                    st.recv_op.set_buffer(BytesMut::zeroed(missing));
                    return Action::Receive(st.recv_op.alias());
                }

                let bound = match parse_reply(&self.socket.name(), &st.response[..REPLY_LEN]) {
                    Ok(reply) => reply,
                    Err(_) => return Action::Finish(None),
                };
                let peer = match parse_reply(&self.socket.name(), &st.response[REPLY_LEN..]) {
                    Ok(reply) => reply,
                    Err(_) => return Action::Finish(None),
                };
                if bound.status != STATUS_GRANTED || peer.status != STATUS_GRANTED {
                    Action::Finish(None)
                } else {
                    Action::Finish(Some(Arc::new(SocketWrapper::new(
                        Arc::clone(&self.socket),
                        self.listen_name.clone(),
                        peer.peer_name(),
                    ))))
                }
            }
        }
    }

    fn finish(&self, result: Option<Arc<dyn Socket>>) {
        self.active
            .lock()
            .unwrap()
            .retain(|a| !std::ptr::eq(Arc::as_ptr(a), self));
        self.detach();

        let mut user = self.user_op.alias();
        user.set_result(result);
        let op = self.user_op.as_operation();
        let notifier = op.notifier();
        notifier.notify(op);
    }

    /// Leave the terminal state behind. The internal operations carry an
    /// `Arc` back to this acceptor as their notifier; resetting them
    /// breaks that cycle so the acceptor can be freed.
    fn detach(&self) {
        let mut st = self.state.lock().unwrap();
        st.phase = Phase::Finished;
        st.send_op.set_notifier(default_notifier());
        st.recv_op.set_notifier(default_notifier());
    }

    /// Cancel whichever underlying transfer is in flight.
    fn cancel_in_flight(&self) {
        let in_flight = {
            let st = self.state.lock().unwrap();
            match st.phase {
                Phase::Idle | Phase::Finished => None,
                Phase::Sending => Some(st.send_op.as_operation().alias()),
                Phase::Receiving => Some(st.recv_op.as_operation().alias()),
            }
        };
        if let Some(op) = in_flight {
            let ctl = Controller::from_core(Arc::clone(&self.ctl));
            self.socket.cancel(&ctl, &op);
        }
    }
}

impl Notifier for Acceptor {
    fn notify(&self, _op: &Operation) {
        let action = self.step();
        self.perform(action);
    }
}
