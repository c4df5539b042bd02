//! Blocking stream view of a communication object.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use super::{CommunicationObject, Controller, ReceiveOperation, SendOperation};

/// Adapts a [`CommunicationObject`] to blocking [`io::Read`] / [`io::Write`].
///
/// Each `read` translates into one receive (returning whatever arrived,
/// `Ok(0)` at end of stream), each `write` into one send; the standard
/// `read_exact` / `write_all` helpers provide the re-blocking loops for
/// exact transfers.
///
/// The stream references a controller and therefore follows its threading
/// rules: one thread at a time. With a timeout configured, a `read` or
/// `write` fails with [`io::ErrorKind::TimedOut`] instead of hanging
/// forever; the timeout is per transfer, not per call.
pub struct CommunicationStream<'a, T: ?Sized> {
    ctl: &'a Controller,
    obj: Arc<T>,
    timeout: Option<Duration>,
}

impl<'a, T: CommunicationObject + ?Sized> CommunicationStream<'a, T> {
    pub fn new(ctl: &'a Controller, obj: Arc<T>) -> Self {
        CommunicationStream {
            ctl,
            obj,
            timeout: None,
        }
    }

    /// Limit how long a single transfer may take. Default: no limit.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Name of the underlying object.
    pub fn name(&self) -> String {
        self.obj.name()
    }

    fn timed_out(&self) -> io::Error {
        io::Error::new(
            io::ErrorKind::TimedOut,
            crate::Error::network(self.obj.name(), crate::error::messages::NETWORK_ERROR),
        )
    }
}

impl<T: CommunicationObject + ?Sized> io::Read for CommunicationStream<'_, T> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut op = ReceiveOperation::new(buf.len());
        if !self.obj.receive(self.ctl, &mut op, self.timeout) {
            return Err(self.timed_out());
        }
        let received = op.received();
        buf[..received.len()].copy_from_slice(&received);
        Ok(received.len())
    }
}

impl<T: CommunicationObject + ?Sized> io::Write for CommunicationStream<'_, T> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let mut op = SendOperation::new(Bytes::copy_from_slice(buf));
        if !self.obj.send(self.ctl, &mut op, self.timeout) {
            return Err(self.timed_out());
        }
        Ok(op.num_sent())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
