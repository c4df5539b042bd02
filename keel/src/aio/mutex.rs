//! Recursive mutex scheduled through controllers.

use std::sync::{Arc, Mutex as StdMutex};

use super::controller::ControllerCore;
use super::notifier::Completions;
use super::{Cancelable, Controller, Operation, OperationList, SynchronisationObject};

/// A recursive mutex within the async framework.
///
/// Ownership is tracked per controller, not per thread: two controllers on
/// the same thread are distinct owners. The owning controller may acquire
/// the mutex again any number of times and must release it the same number
/// of times.
///
/// - [`wait`](SynchronisationObject::wait) / [`wait_async`](SynchronisationObject::wait_async) acquire
/// - [`post`](Mutex::post) releases
///
/// If an acquisition is granted in the very instant its wait times out or
/// is cancelled, the mutex ends up owned by the canceller anyway. Calling
/// `post` after an unsuccessful `wait` is therefore safe and brings the
/// mutex back into a working state: `post` by a controller that does not
/// own the mutex is silently ignored.
pub struct Mutex {
    state: StdMutex<MutexState>,
}

struct MutexState {
    waiters: OperationList<Operation>,
    nesting: u32,
    owner: Option<Arc<ControllerCore>>,
}

// ===== impl Mutex =====

impl Mutex {
    pub fn new() -> Self {
        Mutex {
            state: StdMutex::new(MutexState {
                waiters: OperationList::new(),
                nesting: 0,
                owner: None,
            }),
        }
    }

    /// Release one nesting level.
    ///
    /// On the transition to zero the next waiter becomes the owner with a
    /// nesting count of one, and any further queued acquisitions by that
    /// same controller are granted immediately, collapsing into the count.
    pub fn post(&self, ctl: &Controller) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            let is_owner = matches!(&s.owner, Some(o) if Arc::ptr_eq(o, ctl.core()));
            if !is_owner {
                // Releasing a mutex we don't own. Ignore.
                return;
            }
            s.nesting -= 1;
            if s.nesting == 0 {
                if let Some(op) = s.waiters.extract_front() {
                    // Transfer ownership to the next waiter.
                    let new_owner = op.owner().expect("queued acquisition has an owner");
                    s.owner = Some(Arc::clone(&new_owner));
                    s.nesting = 1;
                    completions.push(&op);

                    // It may be waiting multiple times; grant the nested
                    // acquisitions as well.
                    while let Some(nested) = s.waiters.extract_by_owner(&new_owner) {
                        s.nesting += 1;
                        completions.push(&nested);
                    }
                } else {
                    s.owner = None;
                }
            }
        }
        completions.fire();
    }
}

impl Cancelable for Mutex {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        self.state.lock().unwrap().waiters.remove(op);
        ctl.revert_post(op);
    }
}

impl SynchronisationObject for Mutex {
    fn wait_async(&self, ctl: &Controller, op: &Operation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.set_owner(Arc::clone(ctl.core()));
            match &s.owner {
                Some(owner) if Arc::ptr_eq(owner, ctl.core()) => {
                    // Nested acquisition.
                    s.nesting += 1;
                    completions.push_direct(op);
                }
                None => {
                    // Initial acquisition.
                    s.owner = Some(Arc::clone(ctl.core()));
                    s.nesting = 1;
                    completions.push_direct(op);
                }
                Some(_) => {
                    s.waiters.push_back(op.alias());
                }
            }
        }
        completions.fire();
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Mutex::new()
    }
}
