//! Scripted test doubles for sockets and network stacks.
//!
//! These are used by the crate's own tests and exported for applications
//! that want to test protocol code against scripted peers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::{Buf, Bytes};

use crate::aio::{
    Cancelable, CommunicationObject, Controller, Operation, ReceiveOperation, SendOperation,
};
use crate::error::Error;
use crate::net::{Listener, Name, NetworkStack, Socket};

/// A scripted socket.
///
/// Produces `input` on receives and asserts that sends match `expected`,
/// byte for byte. No particular interleaving of sends and receives is
/// enforced. Sending wrong data or calling
/// [`close_send`](Socket::close_send) while expected data is outstanding
/// panics; exhausted input or expectations simply transfer zero bytes.
///
/// Transfers complete synchronously, on the calling thread.
pub struct MockSocket {
    name: Name,
    state: StdMutex<MockSocketState>,
}

struct MockSocketState {
    input: Bytes,
    expected: Bytes,
}

// ===== impl MockSocket =====

impl MockSocket {
    pub fn create(
        name: Name,
        input: impl AsRef<[u8]>,
        expected: impl AsRef<[u8]>,
    ) -> Arc<MockSocket> {
        Arc::new(MockSocket {
            name,
            state: StdMutex::new(MockSocketState {
                input: Bytes::copy_from_slice(input.as_ref()),
                expected: Bytes::copy_from_slice(expected.as_ref()),
            }),
        })
    }

    /// Whether all scripted input was consumed and all expected data sent.
    pub fn is_done(&self) -> bool {
        let s = self.state.lock().unwrap();
        s.input.is_empty() && s.expected.is_empty()
    }

    fn do_send(&self, op: &mut SendOperation) {
        let mut s = self.state.lock().unwrap();
        let unsent = op.unsent();
        let n = unsent.len().min(s.expected.len());
        assert_eq!(
            &unsent[..n],
            &s.expected[..n],
            "MockSocket {}: unexpected data sent",
            self.name
        );
        op.add_sent(n);
        s.expected.advance(n);
    }

    fn do_receive(&self, op: &mut ReceiveOperation) {
        let mut s = self.state.lock().unwrap();
        let n = op.unreceived_len().min(s.input.len());
        op.copy_from_slice(&s.input[..n]);
        s.input.advance(n);
    }
}

impl Cancelable for MockSocket {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        ctl.revert_post(op);
    }
}

impl CommunicationObject for MockSocket {
    fn send(&self, _ctl: &Controller, op: &mut SendOperation, _timeout: Option<Duration>) -> bool {
        self.do_send(op);
        true
    }

    fn send_async(&self, ctl: &Controller, op: &SendOperation) {
        op.as_operation().set_owner(Arc::clone(ctl.core()));
        let mut alias = op.alias();
        self.do_send(&mut alias);
        let operation = op.as_operation();
        let notifier = operation.notifier();
        notifier.notify(operation);
    }

    fn receive(
        &self,
        _ctl: &Controller,
        op: &mut ReceiveOperation,
        _timeout: Option<Duration>,
    ) -> bool {
        self.do_receive(op);
        true
    }

    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation) {
        op.as_operation().set_owner(Arc::clone(ctl.core()));
        let mut alias = op.alias();
        self.do_receive(&mut alias);
        let operation = op.as_operation();
        let notifier = operation.notifier();
        notifier.notify(operation);
    }

    fn name(&self) -> String {
        self.name.to_string()
    }
}

impl Socket for MockSocket {
    fn close_send(&self) {
        let s = self.state.lock().unwrap();
        assert!(
            s.expected.is_empty(),
            "MockSocket {}: closed with expected data outstanding",
            self.name
        );
    }

    fn peer_name(&self) -> Name {
        self.name.clone()
    }
}

/// A network stack producing scripted connections.
///
/// Every [`connect`](NetworkStack::connect) pops the next expectation and
/// asserts the target name; the resulting socket is a [`MockSocket`] with
/// the expectation's scripted data. Connecting with no expectation queued
/// panics. `listen` is not supported.
pub struct MockNetworkStack {
    queue: StdMutex<VecDeque<Expectation>>,
}

struct Expectation {
    name: Name,
    input: Bytes,
    expected: Bytes,
}

// ===== impl MockNetworkStack =====

impl MockNetworkStack {
    pub fn new() -> Arc<MockNetworkStack> {
        Arc::new(MockNetworkStack {
            queue: StdMutex::new(VecDeque::new()),
        })
    }

    /// Queue an expected connection to `name`, with data the returned
    /// socket produces (`input`) and data it expects to be sent
    /// (`expected`).
    pub fn expect_connection(
        &self,
        name: Name,
        input: impl AsRef<[u8]>,
        expected: impl AsRef<[u8]>,
    ) {
        self.queue.lock().unwrap().push_back(Expectation {
            name,
            input: Bytes::copy_from_slice(input.as_ref()),
            expected: Bytes::copy_from_slice(expected.as_ref()),
        });
    }

    /// Whether every expected connection was made.
    pub fn is_done(&self) -> bool {
        self.queue.lock().unwrap().is_empty()
    }
}

impl NetworkStack for MockNetworkStack {
    fn listen(&self, name: &Name, _backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        Err(Error::unsupported(name.to_string()))
    }

    fn connect(&self, name: &Name, _timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        let expectation = self
            .queue
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| panic!("MockNetworkStack: unexpected connection to {}", name));
        assert_eq!(
            &expectation.name, name,
            "MockNetworkStack: connection to the wrong target"
        );
        Ok(MockSocket::create(
            expectation.name,
            expectation.input,
            expectation.expected,
        ))
    }
}

/// A network stack that refuses everything. Stand-in for "no network".
pub struct NullNetworkStack;

impl NetworkStack for NullNetworkStack {
    fn listen(&self, name: &Name, _backlog: u32) -> Result<Arc<dyn Listener>, Error> {
        Err(Error::unsupported(name.to_string()))
    }

    fn connect(&self, name: &Name, _timeout: Option<Duration>) -> Result<Arc<dyn Socket>, Error> {
        Err(Error::connection_refused(name.to_string()))
    }
}
