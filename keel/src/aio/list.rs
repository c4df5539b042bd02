//! Ordered lists of operation descriptors.

use std::collections::VecDeque;
use std::sync::Arc;

use super::controller::ControllerCore;
use super::{Controller, Operation};

/// FIFO list of operation descriptors.
///
/// Async objects use this to track their waiters. `T` is any descriptor
/// type that exposes its operation identity (`Operation`, `SendOperation`,
/// `ReceiveOperation`, `AcceptOperation`). Removal by identity and
/// extraction by owning controller preserve the order of the remaining
/// entries.
pub struct OperationList<T> {
    items: VecDeque<T>,
}

impl<T: AsRef<Operation>> OperationList<T> {
    /// Empty list.
    pub fn new() -> Self {
        OperationList {
            items: VecDeque::new(),
        }
    }

    /// Append at the end.
    pub fn push_back(&mut self, op: T) {
        self.items.push_back(op);
    }

    /// Remove and return the front element.
    pub fn extract_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// The front element, if any.
    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Remove the entry with the given identity. Returns whether the list
    /// contained it.
    pub fn remove(&mut self, op: &Operation) -> bool {
        match self.items.iter().position(|item| item.as_ref() == op) {
            Some(idx) => {
                self.items.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Remove and return the first entry owned by `ctl`.
    pub fn extract_by_controller(&mut self, ctl: &Controller) -> Option<T> {
        self.extract_by_owner(ctl.core())
    }

    pub(crate) fn extract_by_owner(&mut self, owner: &Arc<ControllerCore>) -> Option<T> {
        let idx = self
            .items
            .iter()
            .position(|item| item.as_ref().owner_is(owner))?;
        self.items.remove(idx)
    }
}

impl<T: AsRef<Operation>> Default for OperationList<T> {
    fn default() -> Self {
        OperationList::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fifo_order() {
        let a = Operation::new();
        let b = Operation::new();
        let mut list = OperationList::new();
        assert!(list.is_empty());

        list.push_back(a.alias());
        list.push_back(b.alias());
        assert_eq!(list.len(), 2);
        assert_eq!(list.front().unwrap(), &a);
        assert_eq!(list.extract_front().unwrap(), a);
        assert_eq!(list.extract_front().unwrap(), b);
        assert!(list.extract_front().is_none());
    }

    #[test]
    fn remove_by_identity() {
        let a = Operation::new();
        let b = Operation::new();
        let c = Operation::new();
        let mut list = OperationList::new();
        list.push_back(a.alias());
        list.push_back(b.alias());
        list.push_back(c.alias());

        assert!(list.remove(&b));
        assert!(!list.remove(&b));
        assert_eq!(list.extract_front().unwrap(), a);
        assert_eq!(list.extract_front().unwrap(), c);
    }

    #[test]
    fn extract_by_controller_preserves_rest() {
        let ctl1 = Controller::new();
        let ctl2 = Controller::new();

        let a = Operation::new();
        let b = Operation::new();
        let c = Operation::new();
        a.set_owner(Arc::clone(ctl1.core()));
        b.set_owner(Arc::clone(ctl2.core()));
        c.set_owner(Arc::clone(ctl2.core()));

        let mut list = OperationList::new();
        list.push_back(a.alias());
        list.push_back(b.alias());
        list.push_back(c.alias());

        assert_eq!(list.extract_by_controller(&ctl2).unwrap(), b);
        assert_eq!(list.extract_by_controller(&ctl2).unwrap(), c);
        assert!(list.extract_by_controller(&ctl2).is_none());
        assert_eq!(list.extract_front().unwrap(), a);
    }
}
