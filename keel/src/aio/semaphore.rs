//! Counting semaphore scheduled through controllers.

use std::sync::{Arc, Mutex as StdMutex};

use super::notifier::Completions;
use super::{Cancelable, Controller, Operation, OperationList, SynchronisationObject};

/// A counting semaphore within the async framework.
///
/// The semaphore has a non-negative value. A wait takes one unit, blocking
/// while the value is zero; [`post`](Semaphore::post) returns one unit,
/// waking the longest-waiting acquisition if there is one. A positive value
/// implies nobody is waiting.
///
/// # Example
///
/// ```
/// use keel::aio::{Controller, Semaphore, SynchronisationObject};
/// use std::time::Duration;
///
/// let sem = Semaphore::new(1);
/// let ctl = Controller::new();
/// assert!(sem.wait(&ctl, Some(Duration::ZERO)));
/// assert!(!sem.wait(&ctl, Some(Duration::ZERO)));
/// sem.post();
/// assert!(sem.wait(&ctl, Some(Duration::ZERO)));
/// ```
pub struct Semaphore {
    state: StdMutex<SemaphoreState>,
}

struct SemaphoreState {
    waiters: OperationList<Operation>,
    value: u32,
}

// ===== impl Semaphore =====

impl Semaphore {
    pub fn new(initial_value: u32) -> Self {
        Semaphore {
            state: StdMutex::new(SemaphoreState {
                waiters: OperationList::new(),
                value: initial_value,
            }),
        }
    }

    /// Increase the value by one, or wake the front waiter.
    /// Thread-safe and non-blocking.
    pub fn post(&self) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            if let Some(op) = s.waiters.extract_front() {
                completions.push(&op);
            } else {
                s.value += 1;
            }
        }
        completions.fire();
    }
}

impl Cancelable for Semaphore {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        self.state.lock().unwrap().waiters.remove(op);
        ctl.revert_post(op);
    }
}

impl SynchronisationObject for Semaphore {
    fn wait_async(&self, ctl: &Controller, op: &Operation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.set_owner(Arc::clone(ctl.core()));
            if s.value == 0 {
                s.waiters.push_back(op.alias());
            } else {
                // Pending signal available; complete on the spot.
                s.value -= 1;
                completions.push_direct(op);
            }
        }
        completions.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn initial_value_is_consumed_first() {
        let sem = Semaphore::new(2);
        let ctl = Controller::new();
        assert!(sem.wait(&ctl, Some(Duration::ZERO)));
        assert!(sem.wait(&ctl, Some(Duration::ZERO)));
        assert!(!sem.wait(&ctl, Some(Duration::from_millis(10))));
    }

    #[test]
    fn post_wakes_waiter_or_counts() {
        let sem = Semaphore::new(0);
        let ctl = Controller::new();

        sem.post();
        assert!(sem.wait(&ctl, Some(Duration::ZERO)));

        let op = Operation::new();
        sem.wait_async(&ctl, &op);
        assert!(!ctl.wait_for(&op, Some(Duration::from_millis(10))));
        sem.post();
        assert!(ctl.wait_for(&op, Some(Duration::from_millis(100))));
    }

    #[test]
    fn completes_min_of_signals_and_waits() {
        // value V plus P posts satisfy min(V + P, W) of W waits.
        let sem = Semaphore::new(1);
        let ctl = Controller::new();
        sem.post();
        sem.post();
        let mut completed = 0;
        for _ in 0..5 {
            if sem.wait(&ctl, Some(Duration::ZERO)) {
                completed += 1;
            }
        }
        assert_eq!(completed, 3);
    }

    #[test]
    fn cancel_removes_waiter() {
        let sem = Semaphore::new(0);
        let ctl = Controller::new();
        let op = Operation::new();
        sem.wait_async(&ctl, &op);
        sem.cancel(&ctl, &op);

        // The cancelled waiter must not swallow a later post.
        sem.post();
        assert!(sem.wait(&ctl, Some(Duration::ZERO)));
    }

    #[test]
    fn cross_thread_handoff() {
        let sem = Arc::new(Semaphore::new(0));
        let posting = Arc::clone(&sem);
        let handle = std::thread::spawn(move || {
            for _ in 0..10 {
                posting.post();
            }
        });
        let ctl = Controller::new();
        for _ in 0..10 {
            assert!(sem.wait(&ctl, Some(Duration::from_secs(5))));
        }
        handle.join().unwrap();
    }
}
