//! Blocking write-sink view of a communication object.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::error::{messages, Error};

use super::{CommunicationObject, Controller, SendOperation};

/// Adapts a [`CommunicationObject`] to an append-only byte sink.
///
/// [`consume`](CommunicationSink::consume) translates a byte range into as
/// many sends as it takes to get rid of it. A timeout or a send that moves
/// no bytes is reported as a "Cannot write" failure naming the underlying
/// object.
///
/// The sink references a controller and can therefore only be used by one
/// thread at a time.
pub struct CommunicationSink<'a, T: ?Sized> {
    ctl: &'a Controller,
    obj: Arc<T>,
    timeout: Option<Duration>,
}

impl<'a, T: CommunicationObject + ?Sized> CommunicationSink<'a, T> {
    pub fn new(ctl: &'a Controller, obj: Arc<T>) -> Self {
        CommunicationSink {
            ctl,
            obj,
            timeout: None,
        }
    }

    /// Limit how long a single send may take. Default: no limit.
    ///
    /// The timeout is not enforced to the last syllable, but its presence
    /// means a `consume` cannot hang around forever.
    pub fn set_timeout(&mut self, timeout: Option<Duration>) {
        self.timeout = timeout;
    }

    /// Send the whole byte range.
    pub fn consume(&mut self, data: &[u8]) -> Result<(), Error> {
        let mut data = Bytes::copy_from_slice(data);
        while !data.is_empty() {
            let mut op = SendOperation::new(data.clone());
            if !self.obj.send(self.ctl, &mut op, self.timeout) {
                return Err(Error::network(self.obj.name(), messages::CANNOT_WRITE));
            }
            if op.num_sent() == 0 {
                // No progress; give up instead of spinning.
                return Err(Error::network(self.obj.name(), messages::CANNOT_WRITE));
            }
            data = op.unsent();
        }
        Ok(())
    }
}
