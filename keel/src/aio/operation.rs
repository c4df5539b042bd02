//! Operation descriptors.
//!
//! An operation identifies one pending asynchronous request. The descriptor
//! is created by the caller, handed to an async object for the duration of
//! the request, and comes back through [`Controller::wait`] when it
//! completes. Async objects and the controller's ready-queue alias the same
//! heap-pinned core, so a descriptor must not be reused until the request
//! completed or was cancelled.
//!
//! [`Controller::wait`]: super::Controller::wait

use std::sync::{Arc, Mutex};

use bytes::{Bytes, BytesMut};

use super::controller::ControllerCore;
use super::notifier::{default_notifier, Notifier};

/// A pending asynchronous request.
///
/// The bare type carries no payload and is used for data-less
/// synchronisation events (mutex, semaphore, timer). Identity is pointer
/// identity: the handle returned by `Controller::wait` compares equal to the
/// descriptor that was submitted.
pub struct Operation {
    core: Arc<OpCore>,
}

pub(crate) struct OpCore {
    inner: Mutex<OpInner>,
}

struct OpInner {
    owner: Option<Arc<ControllerCore>>,
    notifier: Arc<dyn Notifier>,
}

// ===== impl Operation =====

impl Operation {
    /// Create a fresh descriptor with the default notifier.
    pub fn new() -> Self {
        Operation {
            core: Arc::new(OpCore {
                inner: Mutex::new(OpInner {
                    owner: None,
                    notifier: default_notifier(),
                }),
            }),
        }
    }

    /// Replace the notifier that delivers this operation's completion.
    ///
    /// The default posts to the owning controller; internal state machines
    /// install themselves here to chain sub-operations without a controller
    /// round-trip.
    pub fn set_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        self.core.inner.lock().unwrap().notifier = notifier;
    }

    /// Record the controller this operation is submitted on.
    /// For use by async object implementations.
    pub fn set_controller(&self, ctl: &super::Controller) {
        self.set_owner(Arc::clone(ctl.core()));
    }

    /// The notifier that delivers this operation's completion.
    /// For use by async object implementations.
    pub fn notifier(&self) -> Arc<dyn Notifier> {
        self.core.inner.lock().unwrap().notifier.clone()
    }

    pub(crate) fn set_owner(&self, owner: Arc<ControllerCore>) {
        self.core.inner.lock().unwrap().owner = Some(owner);
    }

    pub(crate) fn owner(&self) -> Option<Arc<ControllerCore>> {
        self.core.inner.lock().unwrap().owner.clone()
    }

    /// Second handle to the same descriptor, for waiter lists and the
    /// ready-queue. Not public: to the outside an operation is one value.
    pub(crate) fn alias(&self) -> Operation {
        Operation {
            core: Arc::clone(&self.core),
        }
    }

    pub(crate) fn owner_is(&self, owner: &Arc<ControllerCore>) -> bool {
        match &self.core.inner.lock().unwrap().owner {
            Some(o) => Arc::ptr_eq(o, owner),
            None => false,
        }
    }
}

impl Default for Operation {
    fn default() -> Self {
        Operation::new()
    }
}

impl PartialEq for Operation {
    fn eq(&self, other: &Operation) -> bool {
        Arc::ptr_eq(&self.core, &other.core)
    }
}

impl Eq for Operation {}

impl AsRef<Operation> for Operation {
    fn as_ref(&self) -> &Operation {
        self
    }
}

impl std::fmt::Debug for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation({:p})", Arc::as_ptr(&self.core))
    }
}

/// Descriptor for a send with data.
///
/// Carries an immutable byte range and a counter of bytes already accepted
/// by the transfer. Implementations advance the counter with
/// [`add_sent`](SendOperation::add_sent); partial transfers are resumed by
/// resubmitting with [`unsent`](SendOperation::unsent).
pub struct SendOperation {
    op: Operation,
    data: Arc<Mutex<SendData>>,
}

struct SendData {
    data: Bytes,
    num_sent: usize,
}

// ===== impl SendOperation =====

impl SendOperation {
    /// Descriptor sending `data`.
    pub fn new(data: Bytes) -> Self {
        SendOperation {
            op: Operation::new(),
            data: Arc::new(Mutex::new(SendData { data, num_sent: 0 })),
        }
    }

    /// Reset to the state of a freshly constructed descriptor for `data`.
    pub fn set_data(&mut self, data: Bytes) {
        let mut d = self.data.lock().unwrap();
        d.data = data;
        d.num_sent = 0;
    }

    /// Number of bytes already sent.
    pub fn num_sent(&self) -> usize {
        self.data.lock().unwrap().num_sent
    }

    /// True once every byte of the data range has been sent.
    pub fn is_completed(&self) -> bool {
        let d = self.data.lock().unwrap();
        d.num_sent >= d.data.len()
    }

    /// The not-yet-sent tail of the data range.
    pub fn unsent(&self) -> Bytes {
        let d = self.data.lock().unwrap();
        d.data.slice(d.num_sent..)
    }

    /// Mark `n` more bytes as sent. For use by transfer implementations.
    pub fn add_sent(&mut self, n: usize) {
        self.data.lock().unwrap().num_sent += n;
    }

    /// Install a custom completion notifier.
    pub fn set_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        self.op.set_notifier(notifier);
    }

    /// The underlying operation identity, for `wait` comparisons and
    /// `cancel` calls.
    pub fn as_operation(&self) -> &Operation {
        &self.op
    }

    pub(crate) fn alias(&self) -> SendOperation {
        SendOperation {
            op: self.op.alias(),
            data: Arc::clone(&self.data),
        }
    }
}

impl Default for SendOperation {
    fn default() -> Self {
        SendOperation::new(Bytes::new())
    }
}

impl AsRef<Operation> for SendOperation {
    fn as_ref(&self) -> &Operation {
        &self.op
    }
}

/// Descriptor for a receive with a buffer.
///
/// Symmetric to [`SendOperation`]: a mutable byte range plus a counter of
/// bytes already filled in.
pub struct ReceiveOperation {
    op: Operation,
    data: Arc<Mutex<ReceiveData>>,
}

struct ReceiveData {
    buffer: BytesMut,
    num_received: usize,
}

// ===== impl ReceiveOperation =====

impl ReceiveOperation {
    /// Descriptor receiving into a fresh buffer of `capacity` bytes.
    pub fn new(capacity: usize) -> Self {
        Self::with_buffer(BytesMut::zeroed(capacity))
    }

    /// Descriptor receiving into `buffer` (its full length).
    pub fn with_buffer(buffer: BytesMut) -> Self {
        ReceiveOperation {
            op: Operation::new(),
            data: Arc::new(Mutex::new(ReceiveData {
                buffer,
                num_received: 0,
            })),
        }
    }

    /// Reset to the state of a freshly constructed descriptor for `buffer`.
    pub fn set_buffer(&mut self, buffer: BytesMut) {
        let mut d = self.data.lock().unwrap();
        d.buffer = buffer;
        d.num_received = 0;
    }

    /// Number of bytes received so far.
    pub fn num_received(&self) -> usize {
        self.data.lock().unwrap().num_received
    }

    /// True once the buffer has been filled completely.
    pub fn is_completed(&self) -> bool {
        let d = self.data.lock().unwrap();
        d.num_received >= d.buffer.len()
    }

    /// Remaining buffer space in bytes.
    pub fn unreceived_len(&self) -> usize {
        let d = self.data.lock().unwrap();
        d.buffer.len() - d.num_received
    }

    /// Copy of the filled prefix.
    pub fn received(&self) -> Bytes {
        let d = self.data.lock().unwrap();
        Bytes::copy_from_slice(&d.buffer[..d.num_received])
    }

    /// Fill from `src`, moving `min(remaining, src.len())` bytes.
    /// Returns the number of bytes moved.
    pub fn copy_from_slice(&mut self, src: &[u8]) -> usize {
        let mut d = self.data.lock().unwrap();
        let at = d.num_received;
        let n = src.len().min(d.buffer.len() - at);
        d.buffer[at..at + n].copy_from_slice(&src[..n]);
        d.num_received += n;
        n
    }

    /// Transfer from a send descriptor, moving `min` of the two remainders
    /// and advancing both counters.
    pub fn copy_from(&mut self, send: &mut SendOperation) -> usize {
        let chunk = send.unsent();
        let n = self.copy_from_slice(&chunk);
        send.add_sent(n);
        n
    }

    /// Install a custom completion notifier.
    pub fn set_notifier(&mut self, notifier: Arc<dyn Notifier>) {
        self.op.set_notifier(notifier);
    }

    /// The underlying operation identity, for `wait` comparisons and
    /// `cancel` calls.
    pub fn as_operation(&self) -> &Operation {
        &self.op
    }

    pub(crate) fn alias(&self) -> ReceiveOperation {
        ReceiveOperation {
            op: self.op.alias(),
            data: Arc::clone(&self.data),
        }
    }
}

impl AsRef<Operation> for ReceiveOperation {
    fn as_ref(&self) -> &Operation {
        &self.op
    }
}
