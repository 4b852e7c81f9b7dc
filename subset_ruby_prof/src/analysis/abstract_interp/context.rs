//! Interned identities of the abstract machine.
//!
//! Contexts, lexical nesting chains (crefs) and execution points are plain
//! values compared structurally. The engine interns each distinct value once
//! and refers to it by a small integer id, which keeps every table keyed by
//! `Ord` ids and the traversal order deterministic.

use std::collections::BTreeMap;

use crate::analysis::lattice::ClassId;
use crate::iseq::IseqId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CtxId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EpId(pub u32);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CRefId(pub u32);

/// One link of the lexical class nesting chain.
///
/// `klass` is `None` when the enclosing class could not be determined (a
/// class body opened on an untyped base).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CRef {
    pub outer: Option<CRefId>,
    pub klass: Option<ClassId>,
    pub singleton: bool,
}

/// An activation template.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Context {
    /// A method, block, class body or handler stream.
    ISeq {
        iseq: IseqId,
        cref: CRefId,
        mid: Option<String>,
    },
    /// Accumulates the return value of a typed method that yields to a block.
    Typed { caller: EpId, mid: String },
}

impl Context {
    pub fn iseq(&self) -> Option<IseqId> {
        match self {
            Context::ISeq { iseq, .. } => Some(*iseq),
            Context::Typed { .. } => None,
        }
    }

    pub fn cref(&self) -> Option<CRefId> {
        match self {
            Context::ISeq { cref, .. } => Some(*cref),
            Context::Typed { .. } => None,
        }
    }

    pub fn mid(&self) -> Option<&str> {
        match self {
            Context::ISeq { mid, .. } => mid.as_deref(),
            Context::Typed { mid, .. } => Some(mid),
        }
    }
}

/// A code location within an activation, plus the enclosing activation for blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionPoint {
    pub ctx: CtxId,
    pub pc: usize,
    pub outer: Option<EpId>,
}

impl ExecutionPoint {
    pub fn new(ctx: CtxId, pc: usize, outer: Option<EpId>) -> Self {
        Self { ctx, pc, outer }
    }

    pub fn jump(self, pc: usize) -> Self {
        Self { pc, ..self }
    }

    pub fn next(self) -> Self {
        self.jump(self.pc + 1)
    }
}

/// Append-only value interner.
#[derive(Debug)]
pub struct Interner<T> {
    items: Vec<T>,
    ids: BTreeMap<T, u32>,
}

impl<T> Default for Interner<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            ids: BTreeMap::new(),
        }
    }
}

impl<T: Ord + Clone> Interner<T> {
    pub fn intern(&mut self, item: T) -> u32 {
        if let Some(id) = self.ids.get(&item) {
            return *id;
        }
        let id = self.items.len() as u32;
        self.items.push(item.clone());
        self.ids.insert(item, id);
        id
    }

    pub fn get(&self, id: u32) -> Option<&T> {
        self.items.get(id as usize)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u32, &T)> {
        self.items.iter().enumerate().map(|(i, t)| (i as u32, t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interner_returns_same_id_for_equal_values() {
        let mut interner = Interner::default();
        let a = interner.intern(ExecutionPoint::new(CtxId(0), 3, None));
        let b = interner.intern(ExecutionPoint::new(CtxId(0), 3, None));
        let c = interner.intern(ExecutionPoint::new(CtxId(0), 3, Some(EpId(a))));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_execution_point_next_keeps_outer() {
        let ep = ExecutionPoint::new(CtxId(1), 4, Some(EpId(7)));
        assert_eq!(ep.next(), ExecutionPoint::new(CtxId(1), 5, Some(EpId(7))));
        assert_eq!(ep.jump(0).pc, 0);
    }
}
