//! Method definitions stored in class records.

use crate::analysis::abstract_interp::context::{CRefId, EpId};
use crate::analysis::lattice::{ClassId, MethodSignature, Type};
use crate::iseq::IseqId;

/// Index into [`ClassRegistry`](super::ClassRegistry)'s method arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MethodId(pub u32);

/// One overload of a typed method.
#[derive(Clone, Debug)]
pub struct TypedOverload {
    pub sig: MethodSignature,
    pub ret: Type,
}

/// Methods whose semantics are hard-coded in the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Builtin {
    // VM core
    SetMethodAlias,
    UndefMethod,
    HashMergeKwd,
    Lambda,
    // Object / Kernel
    ObjectNew,
    P,
    IsA,
    RespondTo,
    Class,
    Send,
    InstanceEval,
    Proc,
    BlockGiven,
    CurrentMethod,
    KernelArray,
    Raise,
    // Module
    Include,
    Extend,
    Prepend,
    ModuleFunction,
    Public,
    Private,
    AttrReader,
    AttrWriter,
    AttrAccessor,
    AliasMethod,
    DefineMethod,
    ModuleEval,
    ModuleEqq,
    // Proc
    ProcCall,
    // Array
    ArrayAref,
    ArrayAset,
    ArrayPush,
    ArrayPop,
    ArrayFirst,
    // Hash
    HashAref,
    HashAset,
    // BasicObject
    Initialize,
}

#[derive(Clone, Debug)]
pub enum MethodKind {
    /// A method body in the instruction stream. `outer` is set for methods
    /// created with `define_method` from a block.
    ISeq {
        iseq: IseqId,
        cref: CRefId,
        outer: Option<EpId>,
    },
    AttrReader { ivar: String },
    AttrWriter { ivar: String },
    Alias { orig_mid: String, target: Vec<MethodId> },
    Builtin(Builtin),
    Typed(&'static [TypedOverload]),
}

#[derive(Clone, Debug)]
pub struct MethodDef {
    pub kind: MethodKind,
    pub public: bool,
    pub owner: ClassId,
    pub singleton: bool,
}

impl MethodDef {
    pub fn new(kind: MethodKind, public: bool, owner: ClassId, singleton: bool) -> Self {
        Self {
            kind,
            public,
            owner,
            singleton,
        }
    }

    pub fn iseq(&self) -> Option<IseqId> {
        match &self.kind {
            MethodKind::ISeq { iseq, .. } => Some(*iseq),
            _ => None,
        }
    }
}
