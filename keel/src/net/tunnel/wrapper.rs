//! Socket wrapper overriding identity.

use std::sync::Arc;

use crate::aio::{Cancelable, CommunicationObject, Controller, Operation, ReceiveOperation, SendOperation};
use crate::net::{Name, Socket};

/// Forwards everything to a base socket but reports different names.
///
/// Tunnel handshakes produce sockets whose transport endpoint is the proxy
/// server; this wrapper makes them report the logical endpoint instead.
pub(crate) struct SocketWrapper {
    base: Arc<dyn Socket>,
    socket_name: Name,
    peer_name: Name,
}

// ===== impl SocketWrapper =====

impl SocketWrapper {
    pub(crate) fn new(base: Arc<dyn Socket>, socket_name: Name, peer_name: Name) -> Self {
        SocketWrapper {
            base,
            socket_name,
            peer_name,
        }
    }
}

impl Cancelable for SocketWrapper {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        self.base.cancel(ctl, op);
    }
}

impl CommunicationObject for SocketWrapper {
    fn send_async(&self, ctl: &Controller, op: &SendOperation) {
        self.base.send_async(ctl, op);
    }

    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation) {
        self.base.receive_async(ctl, op);
    }

    fn name(&self) -> String {
        self.socket_name.to_string()
    }
}

impl Socket for SocketWrapper {
    fn close_send(&self) {
        self.base.close_send();
    }

    fn peer_name(&self) -> Name {
        self.peer_name.clone()
    }
}
