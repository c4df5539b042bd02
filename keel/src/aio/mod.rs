//! The portable async core.
//!
//! This module implements a completion-based concurrency model: callers
//! submit [`Operation`] descriptors to async objects together with a
//! per-thread [`Controller`], and the controller's
//! [`wait`](Controller::wait) delivers the operations as they complete.
//! Synchronous and asynchronous calls on the same object share one FIFO
//! queue, so they complete in the order they were issued.
//!
//! On top of the scheduling primitives, the module provides
//! controller-scheduled synchronisation objects ([`Mutex`], [`Semaphore`],
//! [`Timer`]), the [`MessageExchange`] rendezvous, and blocking adapters
//! ([`CommunicationStream`], [`CommunicationSink`]) that re-block partial
//! transfers behind `std::io` style interfaces.

mod controller;
mod exchange;
mod list;
mod mutex;
mod notifier;
mod object;
mod operation;
mod semaphore;
mod sink;
mod stream;
mod timer;

pub use controller::Controller;
pub use exchange::MessageExchange;
pub use list::OperationList;
pub use mutex::Mutex;
pub use notifier::{default_notifier, Notifier};
pub use object::{Cancelable, CommunicationObject, SynchronisationObject};
pub use operation::{Operation, ReceiveOperation, SendOperation};
pub use semaphore::Semaphore;
pub use sink::CommunicationSink;
pub use stream::CommunicationStream;
pub use timer::Timer;

pub(crate) use controller::ControllerCore;
pub(crate) use notifier::Completions;
