//! Client for RESP based protocols (redis and friends).

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::debug;

use crate::aio::{CommunicationSink, Controller, ReceiveOperation};
use crate::codec::resp::{encode_command, Parser};
use crate::codec::Value;
use crate::error::{messages, Error};

use super::{Name, NetworkStack, Socket};

pub use crate::codec::resp::{Command, ToArg};

/// Timeout for the initial connection attempt.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How often [`reconnect`](Client::call) retries before giving up.
const RECONNECT_TRIES: u32 = 15;

/// What to do when a call runs into a transport error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectMode {
    /// Reconnect and retry on every transport error.
    Always,
    /// Reconnect once; after the first completed call, behave like
    /// [`Never`](ReconnectMode::Never).
    Once,
    /// Fail the call on the first transport error.
    Never,
}

/// A RESP client.
///
/// Commands are sent to the server encoded as arrays of bulk strings; the
/// reply is returned as a [`Value`]. A client can be shared by multiple
/// threads and serialises accesses internally; stateful multi-command
/// sequences still need external synchronisation at the application level.
///
/// A server reply of the error type is raised as a
/// [remote error](Error::is_remote). Remote errors are answers, not
/// transport failures, and never trigger a reconnect; transport failures
/// are retried according to the [`ReconnectMode`] (default:
/// [`Always`](ReconnectMode::Always)).
pub struct Client {
    stack: Arc<dyn NetworkStack>,
    name: Name,
    inner: StdMutex<ClientInner>,
}

struct ClientInner {
    ctl: Controller,
    socket: Arc<dyn Socket>,
    input: Bytes,
    parser: Parser,
    mode: ReconnectMode,
}

// ===== impl Client =====

impl Client {
    /// Connect to the RESP server at `name` via `stack`.
    ///
    /// The stack must outlive the client. The initial connect is a single
    /// attempt with a short timeout.
    pub fn new(stack: Arc<dyn NetworkStack>, name: Name) -> Result<Client, Error> {
        let socket = stack.connect(&name, Some(CONNECT_TIMEOUT))?;
        Ok(Client {
            stack,
            name,
            inner: StdMutex::new(ClientInner {
                ctl: Controller::new(),
                socket,
                input: Bytes::new(),
                parser: Parser::new(),
                mode: ReconnectMode::Always,
            }),
        })
    }

    /// Change the reconnect behaviour.
    pub fn set_reconnect_mode(&self, mode: ReconnectMode) {
        self.inner.lock().unwrap().mode = mode;
    }

    /// Send a command and return the server's reply.
    pub fn call(&self, command: &Command) -> Result<Value, Error> {
        let mut guard = self.inner.lock().unwrap();
        let inner = &mut *guard;

        // Send the command. If that fails, reconnect and send again (if
        // configured); a second failure fails the call.
        if let Err(err) = send_command(inner, command) {
            if inner.mode == ReconnectMode::Never {
                return Err(err);
            }
            self.reconnect(inner)?;
            send_command(inner, command)?;
        }

        // Read the response. A remote error is an answer and passes
        // through; a transport error retries the whole request once.
        let value = match read_response(inner) {
            Ok(value) => value,
            Err(err) if err.is_remote() => return Err(err),
            Err(err) => {
                if inner.mode == ReconnectMode::Never {
                    return Err(err);
                }
                self.reconnect(inner)?;
                send_command(inner, command)?;
                read_response(inner)?
            }
        };

        // If we are configured to reconnect once, this was our request.
        if inner.mode == ReconnectMode::Once {
            inner.mode = ReconnectMode::Never;
        }

        Ok(value)
    }

    /// Send a command, discarding the reply.
    pub fn call_void(&self, command: &Command) -> Result<(), Error> {
        self.call(command).map(|_| ())
    }

    fn reconnect(&self, inner: &mut ClientInner) -> Result<(), Error> {
        inner.input = Bytes::new();
        inner.parser = Parser::new();

        let mut remaining = RECONNECT_TRIES;
        loop {
            remaining -= 1;
            match self.stack.connect(&self.name, Some(CONNECT_TIMEOUT)) {
                Ok(socket) => {
                    inner.socket = socket;
                    return Ok(());
                }
                Err(err) => {
                    if remaining == 0 {
                        return Err(err);
                    }
                    debug!(name = %self.name, error = %err, "reconnect attempt failed");
                    std::thread::sleep(if remaining < 5 {
                        Duration::from_secs(1)
                    } else {
                        Duration::from_millis(100)
                    });
                }
            }
        }
    }
}

/// Serialise the whole command into one buffer and send it as a single
/// transaction. Sending header and payload separately would hand the
/// request to the peer's delayed-ack logic and cost tens of milliseconds.
fn send_command(inner: &mut ClientInner, command: &Command) -> Result<(), Error> {
    let mut buf = BytesMut::new();
    encode_command(&mut buf, command);
    CommunicationSink::new(&inner.ctl, Arc::clone(&inner.socket)).consume(&buf)
}

fn read_response(inner: &mut ClientInner) -> Result<Value, Error> {
    loop {
        if inner.input.is_empty() {
            let mut op = ReceiveOperation::new(4096);
            if !inner.socket.receive(&inner.ctl, &mut op, None) {
                return Err(Error::network(inner.socket.name(), messages::NETWORK_ERROR));
            }
            if op.num_received() == 0 {
                // End of file: the other side closed the connection.
                return Err(Error::network(
                    inner.socket.name(),
                    messages::CONNECTION_LOST,
                ));
            }
            inner.input = op.received();
        }
        if inner.parser.handle_data(&mut inner.input)? {
            let value = inner.parser.extract().expect("parser reported a value");
            if let Value::Error(message) = value {
                return Err(Error::remote(inner.socket.name(), message));
            }
            return Ok(value);
        }
    }
}
