//! Fully in-memory network stack.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, Weak};
use std::time::Duration;

use crate::aio::{
    Cancelable, CommunicationObject, Completions, Controller, Operation, OperationList,
    ReceiveOperation, SendOperation,
};
use crate::error::Error;

use super::{AcceptOperation, Listener, Name, NetworkStack, Socket};

/// In-memory implementation of [`NetworkStack`].
///
/// Listeners and sockets are implemented entirely in-process and never
/// touch the system's network stack, so tests using one can never clash
/// with real network activity or with other instances.
///
/// Names are arbitrary strings. A `connect` for a name is paired with an
/// `accept` on the listener registered for the same name; only one
/// listener per name can be active at a time, and there is no grace period
/// for connect-before-listen. The `backlog` parameter of `listen` is
/// ignored; any number of connection attempts can be queued.
///
/// There is no buffering: a send completes in the same moment as the
/// receive taking its data. A socket created from `listen`/`accept`
/// reports the listen name as its [`name`](CommunicationObject::name), and
/// a socket created from `connect` reports it as its
/// [`peer_name`](Socket::peer_name). No guarantees are made about the
/// names of the other direction, but currently both are the same.
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use keel::aio::{CommunicationObject, Controller, ReceiveOperation, SendOperation};
/// use keel::net::internal::InternalNetworkStack;
/// use keel::net::Name;
///
/// let (a, b) = InternalNetworkStack::create_socket_pair(&Name::new("pair", "0"));
/// let ctl = Controller::new();
///
/// let send = SendOperation::new(Bytes::from_static(b"hi"));
/// a.send_async(&ctl, &send);
/// let mut recv = ReceiveOperation::new(4);
/// assert!(b.receive(&ctl, &mut recv, None));
/// assert_eq!(&recv.received()[..], b"hi");
/// ```
pub struct InternalNetworkStack {
    registry: Arc<Registry>,
}

type Registry = StdMutex<HashMap<String, Weak<InternalListener>>>;

// ===== impl InternalNetworkStack =====

impl InternalNetworkStack {
    /// A fresh, empty stack.
    pub fn create() -> Arc<InternalNetworkStack> {
        Arc::new(InternalNetworkStack {
            registry: Arc::new(StdMutex::new(HashMap::new())),
        })
    }

    /// A pair of connected sockets, both reporting `name`, without going
    /// through a listener.
    pub fn create_socket_pair(name: &Name) -> (Arc<dyn Socket>, Arc<dyn Socket>) {
        let a = Arc::new(Stream::new(name.clone()));
        let b = Arc::new(Stream::new(name.clone()));
        (
            Arc::new(InternalSocket {
                from_me: Arc::clone(&a),
                from_them: Arc::clone(&b),
            }),
            Arc::new(InternalSocket {
                from_me: b,
                from_them: a,
            }),
        )
    }
}

impl NetworkStack for InternalNetworkStack {
    fn listen(&self, name: &Name, _backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        let mut registry = self.registry.lock().unwrap();
        let key = name.to_string();
        if let Some(existing) = registry.get(&key) {
            if existing.strong_count() > 0 {
                return Err(Error::address_in_use(key));
            }
        }
        let listener = Arc::new(InternalListener {
            registry: Arc::clone(&self.registry),
            name: name.clone(),
            state: StdMutex::new(ListenerState {
                accepts: OperationList::new(),
                connects: OperationList::new(),
            }),
        });
        registry.insert(key, Arc::downgrade(&listener));
        Ok(listener)
    }

    fn connect(&self, name: &Name, timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        let ctl = Controller::new();
        let op = AcceptOperation::new();

        {
            // Look up and enqueue while holding a strong reference, so a
            // listener dying in parallel either sees our operation or has
            // not been found at all.
            let listener = {
                let registry = self.registry.lock().unwrap();
                registry.get(&name.to_string()).and_then(Weak::upgrade)
            };
            match listener {
                Some(listener) => listener.connect_async(&ctl, &op),
                None => return Err(Error::connection_refused(name.to_string())),
            }
        }

        if ctl.wait_for(op.as_operation(), timeout) {
            // If the listener died in parallel, it posted an empty result.
            if let Some(socket) = op.result() {
                return Ok(socket);
            }
        } else {
            // The listener is probably still alive; look it up again. If it
            // died right here, its shutdown cancelled our operation and all
            // that is left to do is get rid of the post. If it died and was
            // re-created, the new listener's cancel is a no-op.
            let listener = {
                let registry = self.registry.lock().unwrap();
                registry.get(&name.to_string()).and_then(Weak::upgrade)
            };
            match listener {
                Some(listener) => listener.cancel(&ctl, op.as_operation()),
                None => ctl.revert_post(op.as_operation()),
            }
        }
        Err(Error::timed_out(name.to_string()))
    }
}

/*
 * Stream: one half of a socket pair, a unidirectional byte rendezvous.
 *
 * Senders and receivers queue up; whenever both are present, data moves.
 * Between method calls only one of the two lists can be non-empty.
 */
struct Stream {
    name: Name,
    state: StdMutex<StreamState>,
}

struct StreamState {
    sends: OperationList<SendOperation>,
    receives: OperationList<ReceiveOperation>,
    send_closed: bool,
}

// ===== impl Stream =====

impl Stream {
    fn new(name: Name) -> Self {
        Stream {
            name,
            state: StdMutex::new(StreamState {
                sends: OperationList::new(),
                receives: OperationList::new(),
                send_closed: false,
            }),
        }
    }

    fn send_async(&self, ctl: &Controller, op: &SendOperation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            s.sends.push_back(op.alias());
            Self::try_move(&mut s, &mut completions);
        }
        completions.fire();
    }

    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            s.receives.push_back(op.alias());
            Self::try_move(&mut s, &mut completions);
        }
        completions.fire();
    }

    fn remove_waiter(&self, op: &Operation) {
        let mut s = self.state.lock().unwrap();
        s.sends.remove(op);
        s.receives.remove(op);
    }

    fn close_send(&self) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            s.send_closed = true;
            Self::try_move(&mut s, &mut completions);
        }
        completions.fire();
    }

    /// Move data between queued sends and receives. Completions are
    /// collected and fired after the state lock is released, so chained
    /// notifiers may re-enter the socket.
    fn try_move(s: &mut StreamState, completions: &mut Completions) {
        loop {
            let mut recv = match s.receives.front() {
                Some(front) => front.alias(),
                None => break,
            };

            // Satisfy the receive from queued sends, finishing the sends
            // that run empty.
            while !recv.is_completed() && !s.sends.is_empty() {
                let mut send = s.sends.front().unwrap().alias();
                recv.copy_from(&mut send);
                if send.is_completed() {
                    let done = s.sends.extract_front().unwrap();
                    completions.push(done.as_ref());
                }
            }

            // Sockets may receive partially: anything counts as a result,
            // as does end-of-stream. Otherwise leave the receive queued for
            // a future send.
            if recv.num_received() > 0 || s.send_closed {
                let done = s.receives.extract_front().unwrap();
                completions.push(done.as_ref());
            } else {
                break;
            }
        }
    }
}

/*
 * InternalSocket: one endpoint of a socket pair.
 *
 * A connection consists of two InternalSocket objects cross-connected to
 * two Streams, one per flow direction. The streams stay alive as long as
 * either socket does.
 */
struct InternalSocket {
    from_me: Arc<Stream>,
    from_them: Arc<Stream>,
}

impl Cancelable for InternalSocket {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        self.from_me.remove_waiter(op);
        self.from_them.remove_waiter(op);
        ctl.revert_post(op);
    }
}

impl CommunicationObject for InternalSocket {
    fn send_async(&self, ctl: &Controller, op: &SendOperation) {
        self.from_me.send_async(ctl, op);
    }

    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation) {
        self.from_them.receive_async(ctl, op);
    }

    fn name(&self) -> String {
        self.from_me.name.to_string()
    }
}

impl Socket for InternalSocket {
    fn close_send(&self) {
        self.from_me.close_send();
    }

    fn peer_name(&self) -> Name {
        self.from_them.name.clone()
    }
}

impl Drop for InternalSocket {
    fn drop(&mut self) {
        self.from_me.close_send();
    }
}

/*
 * InternalListener: one registered name ("port").
 *
 * Collects accept() and connect() operations and pairs them. The listener
 * knows its registry so it can deregister ("close the port") when it goes
 * away; pending operations are then completed with an empty result.
 */
struct InternalListener {
    registry: Arc<Registry>,
    name: Name,
    state: StdMutex<ListenerState>,
}

struct ListenerState {
    accepts: OperationList<AcceptOperation>,
    connects: OperationList<AcceptOperation>,
}

// ===== impl InternalListener =====

impl InternalListener {
    fn connect_async(&self, ctl: &Controller, op: &AcceptOperation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            s.connects.push_back(op.alias());
            Self::try_connect(&self.name, &mut s, &mut completions);
        }
        completions.fire();
    }

    fn try_connect(name: &Name, s: &mut ListenerState, completions: &mut Completions) {
        while !s.accepts.is_empty() && !s.connects.is_empty() {
            let mut accept = s.accepts.extract_front().unwrap();
            let mut connect = s.connects.extract_front().unwrap();

            let (a, c) = InternalNetworkStack::create_socket_pair(name);
            accept.set_result(Some(a));
            connect.set_result(Some(c));

            completions.push(accept.as_ref());
            completions.push(connect.as_ref());
        }
    }
}

impl Cancelable for InternalListener {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        {
            let mut s = self.state.lock().unwrap();
            s.accepts.remove(op);
            s.connects.remove(op);
        }
        ctl.revert_post(op);
    }
}

impl Listener for InternalListener {
    fn accept_async(&self, ctl: &Controller, op: &AcceptOperation) -> Result<(), Error> {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            s.accepts.push_back(op.alias());
            Self::try_connect(&self.name, &mut s, &mut completions);
        }
        completions.fire();
        Ok(())
    }
}

impl Drop for InternalListener {
    fn drop(&mut self) {
        // Deregister, unless the name was already re-registered by a newer
        // listener.
        {
            let mut registry = self.registry.lock().unwrap();
            let key = self.name.to_string();
            if let Some(entry) = registry.get(&key) {
                if std::ptr::eq(entry.as_ptr(), self) {
                    registry.remove(&key);
                }
            }
        }

        // Pending operations observe an empty result.
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            while let Some(mut op) = s.accepts.extract_front() {
                op.set_result(None);
                completions.push(op.as_ref());
            }
            while let Some(mut op) = s.connects.extract_front() {
                op.set_result(None);
                completions.push(op.as_ref());
            }
        }
        completions.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn socket_pair_moves_data() {
        let (a, b) = InternalNetworkStack::create_socket_pair(&Name::new("pair", "1"));
        let ctl = Controller::new();

        let send = SendOperation::new(Bytes::from_static(b"abc"));
        a.send_async(&ctl, &send);

        let mut recv = ReceiveOperation::new(16);
        assert!(b.receive(&ctl, &mut recv, Some(Duration::ZERO)));
        assert_eq!(&recv.received()[..], b"abc");
        assert!(ctl.wait_for(send.as_operation(), Some(Duration::ZERO)));

        assert_eq!(a.name(), "pair:1");
        assert_eq!(b.peer_name(), Name::new("pair", "1"));
    }

    #[test]
    fn close_send_reports_eof() {
        let (a, b) = InternalNetworkStack::create_socket_pair(&Name::new("pair", "1"));
        let ctl = Controller::new();
        a.close_send();

        let mut recv = ReceiveOperation::new(8);
        assert!(b.receive(&ctl, &mut recv, Some(Duration::ZERO)));
        assert_eq!(recv.num_received(), 0);
    }

    #[test]
    fn dropping_a_socket_closes_its_send_direction() {
        let (a, b) = InternalNetworkStack::create_socket_pair(&Name::new("pair", "1"));
        let ctl = Controller::new();
        drop(a);

        let mut recv = ReceiveOperation::new(8);
        assert!(b.receive(&ctl, &mut recv, Some(Duration::ZERO)));
        assert_eq!(recv.num_received(), 0);
    }

    #[test]
    fn partial_receive_keeps_the_send_queued() {
        let (a, b) = InternalNetworkStack::create_socket_pair(&Name::new("pair", "1"));
        let ctl = Controller::new();

        let send = SendOperation::new(Bytes::from_static(b"hello"));
        a.send_async(&ctl, &send);

        let mut recv = ReceiveOperation::new(2);
        assert!(b.receive(&ctl, &mut recv, Some(Duration::ZERO)));
        assert_eq!(&recv.received()[..], b"he");
        // The send is not completed yet.
        assert!(!ctl.wait_for(send.as_operation(), Some(Duration::ZERO)));

        let mut recv = ReceiveOperation::new(8);
        assert!(b.receive(&ctl, &mut recv, Some(Duration::ZERO)));
        assert_eq!(&recv.received()[..], b"llo");
        assert!(ctl.wait_for(send.as_operation(), Some(Duration::ZERO)));
    }
}
