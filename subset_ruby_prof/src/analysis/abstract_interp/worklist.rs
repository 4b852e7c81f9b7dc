//! Ordered set of execution points awaiting a step.
//!
//! Points are popped by (context, pc) and then by point identity, so a run is
//! reproducible. [`PopOrder::Reverse`] drains from the other end; a natural
//! fixpoint does not depend on the order.

use std::collections::BTreeSet;

use super::context::{CtxId, EpId};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
struct Key {
    ctx: CtxId,
    pc: usize,
    ep: EpId,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PopOrder {
    #[default]
    Forward,
    Reverse,
}

#[derive(Debug, Default)]
pub struct Worklist {
    queue: BTreeSet<Key>,
    order: PopOrder,
}

impl Worklist {
    pub fn new(order: PopOrder) -> Self {
        Self {
            queue: BTreeSet::new(),
            order,
        }
    }

    /// Returns false if the point was already queued.
    pub fn insert(&mut self, ctx: CtxId, pc: usize, ep: EpId) -> bool {
        self.queue.insert(Key { ctx, pc, ep })
    }

    pub fn pop(&mut self) -> Option<EpId> {
        let key = match self.order {
            PopOrder::Forward => self.queue.pop_first(),
            PopOrder::Reverse => self.queue.pop_last(),
        };
        key.map(|k| k.ep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pops_in_context_then_pc_order() {
        let mut wl = Worklist::default();
        wl.insert(CtxId(1), 0, EpId(10));
        wl.insert(CtxId(0), 5, EpId(11));
        wl.insert(CtxId(0), 2, EpId(12));
        assert!(!wl.insert(CtxId(0), 2, EpId(12)));
        assert_eq!(wl.pop(), Some(EpId(12)));
        assert_eq!(wl.pop(), Some(EpId(11)));
        assert_eq!(wl.pop(), Some(EpId(10)));
        assert_eq!(wl.pop(), None);
    }

    #[test]
    fn test_reverse_order() {
        let mut wl = Worklist::new(PopOrder::Reverse);
        wl.insert(CtxId(0), 0, EpId(0));
        wl.insert(CtxId(0), 1, EpId(1));
        assert_eq!(wl.pop(), Some(EpId(1)));
        assert_eq!(wl.pop(), Some(EpId(0)));
    }
}
