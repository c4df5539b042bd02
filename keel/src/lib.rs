//! Reusable systems infrastructure: a portable completion-based async
//! core, and network primitives built on top of it.
//!
//! # The async model
//!
//! Every thread that performs asynchronous work owns an
//! [`aio::Controller`]. Requests are described by [`aio::Operation`]
//! descriptors (with payload-carrying variants for sends, receives and
//! accepts) and submitted to async objects together with the controller;
//! when the external event occurs, the object's notifier posts the
//! operation onto the controller's ready-queue, where
//! [`wait`](aio::Controller::wait) picks it up. Synchronous facades are
//! thin wrappers: start the operation, wait for it, cancel on timeout.
//!
//! The same discipline schedules everything: synchronisation primitives
//! ([`aio::Mutex`], [`aio::Semaphore`], [`aio::Timer`]), the
//! [`aio::MessageExchange`] rendezvous, and sockets.
//!
//! # The network substrate
//!
//! [`net::NetworkStack`] is the factory seam for sockets and listeners.
//! [`net::internal::InternalNetworkStack`] implements it entirely
//! in-memory; the [`net::tunnel`] stacks wrap any other stack with
//! SOCKS4/4a or SOCKS5 client handshakes, composed declaratively by
//! [`net::tunnel::TunnelableNetworkStack`]. [`net::server::Server`] drives
//! arbitrary request/response protocols over a listener, and
//! [`net::resp::Client`] speaks RESP with a configurable reconnect policy.

pub mod aio;
pub mod codec;
pub mod net;
pub mod testing;

mod error;

pub use error::{Error, ErrorKind};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::{assert_impl_all, assert_not_impl_any};

    assert_impl_all!(Error: Send, Sync);
    assert_impl_all!(aio::Controller: Send);
    assert_not_impl_any!(aio::Controller: Clone, Sync);
    assert_impl_all!(aio::Mutex: Send, Sync);
    assert_impl_all!(aio::Semaphore: Send, Sync);
    assert_impl_all!(aio::Timer: Send, Sync);
    assert_impl_all!(aio::MessageExchange: Send, Sync);
    assert_impl_all!(net::internal::InternalNetworkStack: Send, Sync);
    assert_impl_all!(net::resp::Client: Send, Sync);
    assert_impl_all!(net::server::Server: Send, Sync);
}
