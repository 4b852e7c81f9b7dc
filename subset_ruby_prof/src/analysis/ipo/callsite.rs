//! Continuations and the call-site table.
//!
//! A continuation is plain data describing what a caller does with a value once
//! it is known: push it, branch on it, feed it to a typed method's return. The
//! engine interprets it; nothing here captures engine state.

use std::collections::BTreeMap;

use crate::analysis::abstract_interp::context::{CtxId, EpId};
use crate::analysis::lattice::{Substitution, Type};
use crate::iseq::BranchKind;

/// What happens to a value delivered at a caller point.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Continuation {
    /// Push the value and continue at the next instruction.
    Push,
    /// Push the value and continue at `pc`.
    PushJump { pc: usize },
    /// Branch on the value without pushing it. On an exact boolean, the taken
    /// side may narrow local `narrow.0` to `narrow.1`.
    Branch {
        kind: BranchKind,
        target: usize,
        narrow: Option<(usize, Type)>,
    },
    /// Deliver `with` instead of the actual value.
    Replace { with: Type, then: Box<Continuation> },
    /// Drop the value.
    Discard,
    /// Instance variable read: like `Push`, and remembers the container the
    /// read produced so that element updates write back to the variable.
    IvarPush { recv: Type, name: String },
    /// A block invoked by a typed method returned.
    TypedBlockReturn(Box<TypedBlockReturn>),
}

/// Pending part of a typed method call that waits for its block's result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TypedBlockReturn {
    /// Stand-in context of the typed call.
    pub ctx: CtxId,
    pub caller: EpId,
    pub subst: Substitution,
    /// Block return type of the overload, matched against the block's result.
    pub blk_ret: Type,
    /// Return type of the overload.
    pub ret: Type,
}

/// Callers of each callee context, each with the continuations registered there.
///
/// One caller point may wait on the same callee more than once, e.g. `.new` on
/// a union of classes sharing `initialize`; every distinct continuation is kept.
#[derive(Clone, Debug, Default)]
pub struct CallSiteTable {
    sites: BTreeMap<CtxId, BTreeMap<EpId, Vec<Continuation>>>,
}

impl CallSiteTable {
    /// Adds the continuation of `caller` for `callee`. Returns false if it was
    /// already recorded.
    pub fn add(&mut self, callee: CtxId, caller: EpId, ctn: Continuation) -> bool {
        let ctns = self.sites.entry(callee).or_default().entry(caller).or_default();
        if ctns.contains(&ctn) {
            return false;
        }
        ctns.push(ctn);
        true
    }

    pub fn callers(&self, callee: CtxId) -> Vec<(EpId, Continuation)> {
        self.sites
            .get(&callee)
            .into_iter()
            .flatten()
            .flat_map(|(ep, ctns)| ctns.iter().map(move |ctn| (*ep, ctn.clone())))
            .collect()
    }
}
