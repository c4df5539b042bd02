//! One-shot and cyclic timers.

use std::sync::{Arc, Condvar, Mutex as StdMutex, OnceLock, Weak};
use std::time::{Duration, Instant};

use super::notifier::Completions;
use super::{Cancelable, Controller, Operation, OperationList, SynchronisationObject};

/// A timer generating synchronisation events, once or repeatedly.
///
/// A timer behaves like a semaphore that is posted by the clock: when it
/// fires and nobody is waiting, the signal is remembered and handed to the
/// next wait. [`stop`](Timer::stop) discards remembered signals;
/// notifications already posted to a controller stay there and need
/// `cancel` to get rid of.
///
/// All timers of the process are driven by one lazily-started background
/// thread.
pub struct Timer {
    shared: Arc<TimerShared>,
}

struct TimerShared {
    state: StdMutex<TimerState>,
}

struct TimerState {
    waiters: OperationList<Operation>,
    num_signals: u32,
    interval: Duration,
    active: bool,
    cyclic: bool,
    last_check: Instant,
}

// ===== impl Timer =====

impl Timer {
    /// An idle timer. Call [`start`](Timer::start) to arm it.
    pub fn new() -> Self {
        let shared = Arc::new(TimerShared {
            state: StdMutex::new(TimerState {
                waiters: OperationList::new(),
                num_signals: 0,
                interval: Duration::ZERO,
                active: false,
                cyclic: false,
                last_check: Instant::now(),
            }),
        });
        manager().register(Arc::downgrade(&shared));
        Timer { shared }
    }

    /// Arm the timer. The new configuration overwrites the previous one and
    /// starts running immediately; signals that already fired but were not
    /// received yet remain pending.
    pub fn start(&self, interval: Duration, cyclic: bool) {
        {
            let mut s = self.shared.state.lock().unwrap();
            s.interval = interval.max(Duration::from_millis(1));
            s.cyclic = cyclic;
            s.active = true;
            s.last_check = Instant::now();
        }
        manager().kick();
    }

    /// Disarm the timer and take back pending signals.
    pub fn stop(&self) {
        let mut s = self.shared.state.lock().unwrap();
        s.active = false;
        s.num_signals = 0;
    }
}

impl Cancelable for Timer {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        self.shared.state.lock().unwrap().waiters.remove(op);
        ctl.revert_post(op);
    }
}

impl SynchronisationObject for Timer {
    fn wait_async(&self, ctl: &Controller, op: &Operation) {
        let mut completions = Completions::new();
        {
            let mut s = self.shared.state.lock().unwrap();
            op.set_owner(Arc::clone(ctl.core()));
            if s.num_signals > 0 {
                s.num_signals -= 1;
                completions.push_direct(op);
            } else {
                s.waiters.push_back(op.alias());
            }
        }
        completions.fire();
    }
}

impl Default for Timer {
    fn default() -> Self {
        Timer::new()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.stop();
    }
}

// ===== impl TimerShared =====

impl TimerShared {
    /// Advance the watermark to `now`, firing once per elapsed interval.
    /// Returns the next deadline while the timer stays armed.
    ///
    /// The state lock is held across the whole check-and-rearm window, so a
    /// concurrent `start` is never interleaved inside one update.
    fn update(&self, now: Instant, completions: &mut Completions) -> Option<Instant> {
        let mut s = self.state.lock().unwrap();
        if !s.active {
            return None;
        }
        while now.duration_since(s.last_check) >= s.interval {
            let interval = s.interval;
            s.last_check += interval;
            if let Some(op) = s.waiters.extract_front() {
                completions.push(&op);
            } else {
                s.num_signals += 1;
            }
            if !s.cyclic {
                s.active = false;
                return None;
            }
        }
        Some(s.last_check + s.interval)
    }
}

// ===== timer manager =====

struct TimerManager {
    state: StdMutex<ManagerState>,
    wake: Condvar,
}

struct ManagerState {
    timers: Vec<Weak<TimerShared>>,
    dirty: bool,
}

fn manager() -> &'static TimerManager {
    static INSTANCE: OnceLock<TimerManager> = OnceLock::new();
    INSTANCE.get_or_init(|| {
        let manager = TimerManager {
            state: StdMutex::new(ManagerState {
                timers: Vec::new(),
                dirty: false,
            }),
            wake: Condvar::new(),
        };
        std::thread::Builder::new()
            .name("keel-timer".into())
            .spawn(|| manager_thread())
            .expect("spawning the timer thread");
        manager
    })
}

fn manager_thread() {
    let m = manager();
    let mut st = m.state.lock().unwrap();
    loop {
        st.dirty = false;
        st.timers.retain(|weak| weak.strong_count() > 0);

        let now = Instant::now();
        let mut next: Option<Instant> = None;
        let mut completions = Completions::new();
        for weak in &st.timers {
            if let Some(timer) = weak.upgrade() {
                if let Some(deadline) = timer.update(now, &mut completions) {
                    next = Some(next.map_or(deadline, |n| n.min(deadline)));
                }
            }
        }

        if !completions.is_empty() {
            drop(st);
            completions.fire();
            st = m.state.lock().unwrap();
        }
        if st.dirty {
            // A timer was (re)configured while we were delivering.
            continue;
        }

        st = match next {
            Some(deadline) => {
                let now = Instant::now();
                if deadline <= now {
                    continue;
                }
                m.wake.wait_timeout(st, deadline - now).unwrap().0
            }
            None => m.wake.wait(st).unwrap(),
        };
    }
}

impl TimerManager {
    fn register(&self, timer: Weak<TimerShared>) {
        self.state.lock().unwrap().timers.push(timer);
    }

    fn kick(&self) {
        self.state.lock().unwrap().dirty = true;
        self.wake.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_shot_fires_once() {
        let timer = Timer::new();
        let ctl = Controller::new();
        timer.start(Duration::from_millis(30), false);
        assert!(timer.wait(&ctl, Some(Duration::from_secs(5))));
        assert!(!timer.wait(&ctl, Some(Duration::from_millis(100))));
    }

    #[test]
    fn cyclic_keeps_firing() {
        let timer = Timer::new();
        let ctl = Controller::new();
        timer.start(Duration::from_millis(20), true);
        for _ in 0..3 {
            assert!(timer.wait(&ctl, Some(Duration::from_secs(5))));
        }
    }

    #[test]
    fn missed_signals_accumulate() {
        let timer = Timer::new();
        let ctl = Controller::new();
        timer.start(Duration::from_millis(50), true);
        std::thread::sleep(Duration::from_millis(320));
        // At least three intervals elapsed with nobody waiting; the signals
        // must be delivered to immediate waits.
        for _ in 0..3 {
            assert!(timer.wait(&ctl, Some(Duration::ZERO)));
        }
    }

    #[test]
    fn stop_discards_pending_signals() {
        let timer = Timer::new();
        let ctl = Controller::new();
        timer.start(Duration::from_millis(20), true);
        std::thread::sleep(Duration::from_millis(150));
        timer.stop();
        assert!(!timer.wait(&ctl, Some(Duration::ZERO)));
    }

    #[test]
    fn restart_overwrites_configuration() {
        let timer = Timer::new();
        let ctl = Controller::new();
        timer.start(Duration::from_secs(3600), false);
        timer.start(Duration::from_millis(30), false);
        assert!(timer.wait(&ctl, Some(Duration::from_secs(5))));
    }

    #[test]
    fn cancel_removes_waiter() {
        let timer = Timer::new();
        let ctl = Controller::new();
        let op = Operation::new();
        timer.wait_async(&ctl, &op);
        timer.cancel(&ctl, &op);
        timer.start(Duration::from_millis(10), false);
        std::thread::sleep(Duration::from_millis(100));
        // The fired signal went to the pending counter, not to the
        // cancelled waiter.
        assert!(!ctl.wait_for(&op, Some(Duration::ZERO)));
        assert!(timer.wait(&ctl, Some(Duration::ZERO)));
    }
}
