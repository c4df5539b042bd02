//! Per-thread completion scheduler.

use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{Operation, OperationList};

/// Coordinates the asynchronous operations of one thread.
///
/// Every thread that performs asynchronous operations uses one controller.
/// Async objects remember the controller an operation was submitted on and
/// post the completed operation back here; the owner thread picks
/// completions up in [`wait`](Controller::wait).
///
/// All methods except [`post`](Controller::post) and
/// [`revert_post`](Controller::revert_post) must be called by the thread
/// that currently owns the controller. A controller may move between
/// threads (it is `Send`), but only one thread at a time may drive it. The
/// same ordering guarantee as for the synchronous calls holds: operations
/// submitted on one (object, controller) pair complete in submission order.
///
/// A controller is not free to construct; create one per worker thread, not
/// one per request.
///
/// # Example
///
/// ```
/// use keel::aio::{Controller, Operation};
///
/// let ctl = Controller::new();
/// let op = Operation::new();
/// ctl.post(&op);
///
/// let done = ctl.wait(None).unwrap();
/// assert!(done == op);
/// assert!(ctl.wait(Some(std::time::Duration::ZERO)).is_none());
/// ```
pub struct Controller {
    core: Arc<ControllerCore>,
    // One owner thread at a time; keep the handle out of shared positions.
    _not_sync: PhantomData<Cell<()>>,
}

pub(crate) struct ControllerCore {
    ready: Mutex<OperationList<Operation>>,
    wake: Condvar,
}

// ===== impl ControllerCore =====

impl ControllerCore {
    pub(crate) fn post(&self, op: Operation) {
        let mut ready = self.ready.lock().unwrap();
        ready.push_back(op);
        self.wake.notify_one();
    }

    pub(crate) fn revert_post(&self, op: &Operation) {
        let mut ready = self.ready.lock().unwrap();
        ready.remove(op);
    }
}

// ===== impl Controller =====

impl Controller {
    pub fn new() -> Self {
        Controller {
            core: Arc::new(ControllerCore {
                ready: Mutex::new(OperationList::new()),
                wake: Condvar::new(),
            }),
            _not_sync: PhantomData,
        }
    }

    /// Wait for any operation to complete.
    ///
    /// Returns the completed operation, or `None` when the timeout elapsed
    /// first. `None` as timeout waits indefinitely and never returns
    /// `None`; `Some(Duration::ZERO)` only polls. Completions are returned
    /// in the order they were posted.
    pub fn wait(&self, timeout: Option<Duration>) -> Option<Operation> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ready = self.core.ready.lock().unwrap();
        loop {
            if let Some(op) = ready.extract_front() {
                return Some(op);
            }
            ready = match self.park(ready, deadline) {
                Some(guard) => guard,
                None => return None,
            };
        }
    }

    /// Wait for a specific operation to complete, leaving any other
    /// completions queued. Returns `false` when the timeout elapsed first.
    ///
    /// This is the building block of the synchronous facades: start the
    /// operation with `xxx_async`, `wait_for` it, and `cancel` on timeout.
    pub fn wait_for(&self, op: &Operation, timeout: Option<Duration>) -> bool {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut ready = self.core.ready.lock().unwrap();
        loop {
            if ready.remove(op) {
                return true;
            }
            ready = match self.park(ready, deadline) {
                Some(guard) => guard,
                None => return false,
            };
        }
    }

    /// Post a completed operation. Thread-safe; wakes the owner thread if
    /// it is blocked in `wait`.
    pub fn post(&self, op: &Operation) {
        self.core.post(op.alias());
    }

    /// Revert a previous `post`. Thread-safe. After this returns, `op`
    /// will not be returned by `wait` unless it is posted again.
    pub fn revert_post(&self, op: &Operation) {
        self.core.revert_post(op);
    }

    fn park<'a>(
        &'a self,
        ready: std::sync::MutexGuard<'a, OperationList<Operation>>,
        deadline: Option<Instant>,
    ) -> Option<std::sync::MutexGuard<'a, OperationList<Operation>>> {
        match deadline {
            None => Some(self.core.wake.wait(ready).unwrap()),
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return None;
                }
                let (guard, _) = self.core.wake.wait_timeout(ready, deadline - now).unwrap();
                Some(guard)
            }
        }
    }

    pub(crate) fn core(&self) -> &Arc<ControllerCore> {
        &self.core
    }

    /// Internal second handle for state machines that drive sub-operations
    /// on the caller's controller. Not public: externally a controller is
    /// a unique value.
    pub(crate) fn from_core(core: Arc<ControllerCore>) -> Controller {
        Controller {
            core,
            _not_sync: PhantomData,
        }
    }
}

impl Default for Controller {
    fn default() -> Self {
        Controller::new()
    }
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Controller({:p})", Arc::as_ptr(&self.core))
    }
}
