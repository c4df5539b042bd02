//! The capability traits async objects implement.

use std::time::Duration;

use bytes::{Bytes, BytesMut};

use crate::error::{messages, Error};

use super::{Controller, Operation, ReceiveOperation, SendOperation};

/// An object that supports asynchronous operations, and therefore their
/// cancellation.
pub trait Cancelable: Send + Sync {
    /// Cancel an operation posted on this object with this controller.
    ///
    /// Implementations remove the operation from their internal waiter
    /// lists and call [`Controller::revert_post`] so that an in-flight
    /// completion is swallowed. After `cancel` returns, the operation will
    /// not be reported by `wait`.
    ///
    /// Like every function that touches a controller, this must be called
    /// by the controller's owner thread.
    fn cancel(&self, ctl: &Controller, op: &Operation);
}

/// An object producing data-less synchronisation events.
///
/// If a wait is abandoned via timeout or `cancel`, there is no way to tell
/// whether the event had already fired by then. Use timeouts to detect
/// connection loss or hangs, not as part of a regular protocol.
pub trait SynchronisationObject: Cancelable {
    /// Wait for the synchronisation event, asynchronous. `ctl.wait()`
    /// returns `op` once the event occurred.
    fn wait_async(&self, ctl: &Controller, op: &Operation);

    /// Wait for the synchronisation event, blocking the current thread.
    /// Returns `false` when the timeout elapsed first.
    fn wait(&self, ctl: &Controller, timeout: Option<Duration>) -> bool {
        let op = Operation::new();
        self.wait_async(ctl, &op);
        if !ctl.wait_for(&op, timeout) {
            self.cancel(ctl, &op);
            false
        } else {
            true
        }
    }
}

/// An object implementing bidirectional data transfer.
///
/// What a transfer means is up to the implementation: sent data may appear
/// on this object's receive side or on a peer object, and transfers may
/// complete partially. As with [`SynchronisationObject`], an abandoned
/// operation leaves the amount of transferred data unknown; a complex
/// protocol driven over timeouts can go out of sync with its peer.
pub trait CommunicationObject: Cancelable {
    /// Send data, asynchronous. The operation completes once any data was
    /// moved (or the transfer is known to make no progress).
    fn send_async(&self, ctl: &Controller, op: &SendOperation);

    /// Receive data, asynchronous. The operation completes once any data
    /// arrived; zero received bytes mean the peer closed its send side.
    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation);

    /// Name of this object, for diagnostics and error messages.
    fn name(&self) -> String;

    /// Send data, blocking. Returns `false` on timeout; on success the
    /// operation's counter says how much was accepted (partial sends are
    /// permitted).
    fn send(&self, ctl: &Controller, op: &mut SendOperation, timeout: Option<Duration>) -> bool {
        self.send_async(ctl, op);
        if !ctl.wait_for(op.as_operation(), timeout) {
            self.cancel(ctl, op.as_operation());
            false
        } else {
            true
        }
    }

    /// Receive data, blocking. Returns `false` on timeout; on success the
    /// operation's counter says how much arrived.
    fn receive(
        &self,
        ctl: &Controller,
        op: &mut ReceiveOperation,
        timeout: Option<Duration>,
    ) -> bool {
        self.receive_async(ctl, op);
        if !ctl.wait_for(op.as_operation(), timeout) {
            self.cancel(ctl, op.as_operation());
            false
        } else {
            true
        }
    }

    /// Send the whole byte range, retrying partial sends.
    ///
    /// A timeout or a send that moves no bytes is a hard failure naming
    /// this object.
    fn full_send(
        &self,
        ctl: &Controller,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<(), Error> {
        let mut op = SendOperation::new(Bytes::copy_from_slice(data));
        while !op.is_completed() {
            if !self.send(ctl, &mut op, timeout) {
                return Err(Error::network(self.name(), messages::NETWORK_ERROR));
            }
            if op.num_sent() == 0 {
                return Err(Error::network(self.name(), messages::NETWORK_ERROR));
            }
            let rest = op.unsent();
            op.set_data(rest);
        }
        Ok(())
    }

    /// Receive exactly `len` bytes, retrying partial receives.
    ///
    /// A timeout is a network error; a premature end of stream is reported
    /// as a lost connection.
    fn full_receive(
        &self,
        ctl: &Controller,
        len: usize,
        timeout: Option<Duration>,
    ) -> Result<Bytes, Error> {
        let mut collected = BytesMut::with_capacity(len);
        while collected.len() < len {
            let mut op = ReceiveOperation::new(len - collected.len());
            if !self.receive(ctl, &mut op, timeout) {
                return Err(Error::network(self.name(), messages::NETWORK_ERROR));
            }
            if op.num_received() == 0 {
                return Err(Error::network(self.name(), messages::CONNECTION_LOST));
            }
            collected.extend_from_slice(&op.received());
        }
        Ok(collected.freeze())
    }
}
