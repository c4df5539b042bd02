//! In-process message rendezvous.

use std::sync::{Arc, Mutex as StdMutex};

use super::notifier::Completions;
use super::{
    Cancelable, CommunicationObject, Controller, Operation, OperationList, ReceiveOperation,
    SendOperation,
};

/// A rendezvous point where every send is paired with exactly one receive.
///
/// Messages are byte blocks and message boundaries are preserved: if the
/// sender's and receiver's buffer sizes differ, the message is truncated to
/// the smaller one, and both sides see the transferred count. A send with
/// no partner waits, as does a receive.
///
/// The transfer itself is atomic; cancellation and timeouts never re-split
/// a message. It is still possible for one side to run into its timeout
/// while the other already got confirmation of the transfer.
pub struct MessageExchange {
    state: StdMutex<ExchangeState>,
}

struct ExchangeState {
    pending_sends: OperationList<SendOperation>,
    pending_receives: OperationList<ReceiveOperation>,
}

// ===== impl MessageExchange =====

impl MessageExchange {
    pub fn new() -> Self {
        MessageExchange {
            state: StdMutex::new(ExchangeState {
                pending_sends: OperationList::new(),
                pending_receives: OperationList::new(),
            }),
        }
    }
}

impl Cancelable for MessageExchange {
    fn cancel(&self, ctl: &Controller, op: &Operation) {
        {
            let mut s = self.state.lock().unwrap();
            s.pending_sends.remove(op);
            s.pending_receives.remove(op);
        }
        ctl.revert_post(op);
    }
}

impl CommunicationObject for MessageExchange {
    fn send_async(&self, ctl: &Controller, op: &SendOperation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            if let Some(mut recv) = s.pending_receives.extract_front() {
                let mut send = op.alias();
                recv.copy_from(&mut send);
                completions.push(recv.as_ref());
                completions.push(op.as_ref());
            } else {
                s.pending_sends.push_back(op.alias());
            }
        }
        completions.fire();
    }

    fn receive_async(&self, ctl: &Controller, op: &ReceiveOperation) {
        let mut completions = Completions::new();
        {
            let mut s = self.state.lock().unwrap();
            op.as_operation().set_owner(Arc::clone(ctl.core()));
            if let Some(mut send) = s.pending_sends.extract_front() {
                let mut recv = op.alias();
                recv.copy_from(&mut send);
                completions.push(send.as_ref());
                completions.push(op.as_ref());
            } else {
                s.pending_receives.push_back(op.alias());
            }
        }
        completions.fire();
    }

    fn name(&self) -> String {
        "<exchange>".into()
    }
}

impl Default for MessageExchange {
    fn default() -> Self {
        MessageExchange::new()
    }
}
