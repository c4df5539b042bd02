//! The network substrate: sockets, listeners, network stacks.
//!
//! A [`NetworkStack`] is a factory for network objects: [`listen`] produces
//! a [`Listener`], [`connect`] a [`Socket`]. Stacks compose: the
//! [`tunnel`] stacks wrap another stack and intermediate every connection
//! through a proxy protocol, and [`InternalNetworkStack`] is a fully
//! in-memory stack for tests and in-process wiring.
//!
//! [`listen`]: NetworkStack::listen
//! [`connect`]: NetworkStack::connect
//! [`InternalNetworkStack`]: internal::InternalNetworkStack

pub mod internal;
pub mod resp;
pub mod server;
pub mod tunnel;

mod name;

pub use name::Name;

use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use crate::aio::{Cancelable, CommunicationObject, Controller, Operation};
use crate::error::Error;

/// A bidirectional byte stream to a peer.
///
/// Sockets are shared by reference count; they may be used from several
/// threads as long as every thread brings its own controller.
pub trait Socket: CommunicationObject {
    /// Signal end-of-file on the send direction. The peer's receives
    /// complete with zero bytes once the data in flight has drained.
    fn close_send(&self);

    /// Name of the peer endpoint.
    fn peer_name(&self) -> Name;
}

/// An acceptor for incoming connections.
pub trait Listener: Cancelable {
    /// Accept a connection, asynchronous. The operation completes carrying
    /// the accepted socket, or no socket when the listener shut down.
    ///
    /// Tunnel listeners open a connection to their proxy server here,
    /// which can fail.
    fn accept_async(&self, ctl: &Controller, op: &AcceptOperation) -> Result<(), Error>;

    /// Accept a connection, blocking. `None` on timeout (and on listener
    /// shutdown).
    fn accept(&self, timeout: Option<Duration>) -> Result<Option<Arc<dyn Socket>>, Error> {
        let ctl = Controller::new();
        let op = AcceptOperation::new();
        self.accept_async(&ctl, &op)?;
        if ctl.wait_for(op.as_operation(), timeout) {
            Ok(op.result())
        } else {
            self.cancel(&ctl, op.as_operation());
            Ok(None)
        }
    }
}

/// A network stack: the factory for listeners and outgoing connections.
pub trait NetworkStack: Send + Sync {
    /// Listen on `name`. At most one listener per name can be active.
    fn listen(&self, name: &Name, backlog: u32) -> Result<Arc<dyn Listener>, Error>;

    /// Connect to `name`.
    fn connect(&self, name: &Name, timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error>;
}

/// Descriptor for a pending accept. Completion carries the accepted
/// socket; an empty result signals listener shutdown.
pub struct AcceptOperation {
    op: Operation,
    result: Arc<StdMutex<Option<Arc<dyn Socket>>>>,
}

// ===== impl AcceptOperation =====

impl AcceptOperation {
    pub fn new() -> Self {
        AcceptOperation {
            op: Operation::new(),
            result: Arc::new(StdMutex::new(None)),
        }
    }

    /// Store the accepted socket. For use by listener implementations.
    pub fn set_result(&mut self, socket: Option<Arc<dyn Socket>>) {
        *self.result.lock().unwrap() = socket;
    }

    /// The accepted socket, if the operation completed with one.
    pub fn result(&self) -> Option<Arc<dyn Socket>> {
        self.result.lock().unwrap().clone()
    }

    /// The underlying operation identity, for `wait` comparisons and
    /// `cancel` calls.
    pub fn as_operation(&self) -> &Operation {
        &self.op
    }

    pub(crate) fn alias(&self) -> AcceptOperation {
        AcceptOperation {
            op: self.op.alias(),
            result: Arc::clone(&self.result),
        }
    }
}

impl Default for AcceptOperation {
    fn default() -> Self {
        AcceptOperation::new()
    }
}

impl AsRef<Operation> for AcceptOperation {
    fn as_ref(&self) -> &Operation {
        &self.op
    }
}
