//! Completion delivery strategies.

use std::sync::{Arc, OnceLock};

use super::Operation;

/// Strategy for delivering an operation's completion.
///
/// The default implementation posts the operation onto its owning
/// controller's ready-queue. Async objects that chain several internal
/// transfers into one user-visible operation (the SOCKS4 BIND handshake,
/// for example) implement this themselves and only touch the controller
/// when the whole chain is done.
pub trait Notifier: Send + Sync {
    /// Deliver a completion that happened asynchronously.
    fn notify(&self, op: &Operation);

    /// Deliver a completion that happened immediately, on the submitting
    /// thread, while the async object's fast path was still running.
    fn notify_direct(&self, op: &Operation) {
        self.notify(op);
    }
}

struct DefaultNotifier;

impl Notifier for DefaultNotifier {
    fn notify(&self, op: &Operation) {
        if let Some(owner) = op.owner() {
            owner.post(op.alias());
        }
    }
}

/// The process-wide default notifier. Initialised lazily, never destroyed.
pub fn default_notifier() -> Arc<dyn Notifier> {
    static INSTANCE: OnceLock<Arc<dyn Notifier>> = OnceLock::new();
    Arc::clone(INSTANCE.get_or_init(|| Arc::new(DefaultNotifier)))
}

/// Completions collected while an async object's lock is held, delivered
/// once the lock has been released again (so a notifier may re-enter the
/// object without deadlocking).
pub(crate) struct Completions {
    pending: Vec<(Arc<dyn Notifier>, Operation, bool)>,
}

impl Completions {
    pub(crate) fn new() -> Self {
        Completions {
            pending: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, op: &Operation) {
        self.pending.push((op.notifier(), op.alias(), false));
    }

    pub(crate) fn push_direct(&mut self, op: &Operation) {
        self.pending.push((op.notifier(), op.alias(), true));
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub(crate) fn fire(self) {
        for (notifier, op, direct) in self.pending {
            if direct {
                notifier.notify_direct(&op);
            } else {
                notifier.notify(&op);
            }
        }
    }
}
