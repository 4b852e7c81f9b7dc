//! Core type definitions for the abstract value lattice.

use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

use super::alloc::AllocationSite;
use super::elements::{ArrayElems, CellElems, Elements, HashElems};
use crate::analysis::abstract_interp::context::EpId;
use crate::iseq::{IseqId, LiteralValue};

/// Index of a class or module record in the registry arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Registry slots reserved by the bootstrap, in creation order.
pub mod builtin {
    use super::ClassId;

    pub const BASIC_OBJECT: ClassId = ClassId(0);
    pub const OBJECT: ClassId = ClassId(1);
    pub const MODULE: ClassId = ClassId(2);
    pub const CLASS: ClassId = ClassId(3);
    pub const KERNEL: ClassId = ClassId(4);
    pub const VM_CORE: ClassId = ClassId(5);
    pub const NIL: ClassId = ClassId(6);
    pub const TRUE: ClassId = ClassId(7);
    pub const FALSE: ClassId = ClassId(8);
    pub const NUMERIC: ClassId = ClassId(9);
    pub const INTEGER: ClassId = ClassId(10);
    pub const FLOAT: ClassId = ClassId(11);
    pub const RATIONAL: ClassId = ClassId(12);
    pub const COMPLEX: ClassId = ClassId(13);
    pub const SYMBOL: ClassId = ClassId(14);
    pub const STRING: ClassId = ClassId(15);
    pub const ARRAY: ClassId = ClassId(16);
    pub const HASH: ClassId = ClassId(17);
    pub const RANGE: ClassId = ClassId(18);
    pub const REGEXP: ClassId = ClassId(19);
    pub const MATCH_DATA: ClassId = ClassId(20);
    pub const PROC: ClassId = ClassId(21);
    pub const STRUCT: ClassId = ClassId(22);
    pub const EXCEPTION: ClassId = ClassId(23);
    pub const STANDARD_ERROR: ClassId = ClassId(24);
    pub const IO: ClassId = ClassId(25);
    pub const ENCODING: ClassId = ClassId(26);
    pub const ENUMERATOR: ClassId = ClassId(27);
    pub const COMPARABLE: ClassId = ClassId(28);

    /// Number of reserved slots.
    pub const COUNT: u32 = 29;
}

/// Shape of a heap container.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ContainerKind {
    Cell,
    Array,
    Hash,
}

impl ContainerKind {
    pub fn tag(self) -> &'static str {
        match self {
            ContainerKind::Cell => "cell",
            ContainerKind::Array => "ary",
            ContainerKind::Hash => "hash",
        }
    }
}

/// Literal payloads carried by [`Type::Literal`].
///
/// Floats are stored as raw bits so that the lattice stays `Eq + Ord`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Lit {
    Integer(i64),
    Float(u64),
    Str(String),
    Regexp(String),
}

/// The body a Proc value would run when called.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockBody {
    /// A block stream together with the execution point that created it.
    ISeq { iseq: IseqId, outer: EpId },
    /// `&:sym`
    Symbol(String),
    /// A block described by a typed signature.
    Typed {
        lead: Vec<Type>,
        opt: Vec<Type>,
        ret: Type,
    },
}

/// A global (self-contained) container description.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Container {
    pub base: ClassId,
    pub elems: Elements,
}

/// Abstract value.
///
/// `Container` values are global: they may appear in signatures, return values and
/// variable tables, but never in an `Env`'s locals or stack, where a `Local`
/// placeholder stands for them.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Type {
    Bottom,
    Any,
    /// Result of a method whose return value must not be used.
    Void,
    /// The class object itself (`Foo`, not `Foo.new`).
    Class(ClassId),
    Instance {
        klass: ClassId,
        include_subclasses: bool,
    },
    /// `Some(name)` for a literal symbol, `None` for a dynamic one.
    Symbol(Option<String>),
    Literal {
        lit: Lit,
        base: ClassId,
    },
    Proc(Box<BlockBody>),
    Local {
        kind: ContainerKind,
        site: AllocationSite,
        base: ClassId,
    },
    Container(Box<Container>),
    /// Type parameter of a typed signature (`Elem`, `K`, `V`, `self`, ...).
    Var(String),
    Union(Box<Union>),
}

/// Flattened union of non-container members plus container elements keyed by
/// (kind, base class).
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Union {
    pub types: BTreeSet<Type>,
    pub elems: BTreeMap<(ContainerKind, ClassId), Elements>,
}

pub const SELF_VAR: &str = "self";

impl Type {
    pub fn instance(klass: ClassId) -> Type {
        Type::Instance {
            klass,
            include_subclasses: false,
        }
    }

    pub fn nil() -> Type {
        Type::instance(builtin::NIL)
    }

    pub fn true_() -> Type {
        Type::instance(builtin::TRUE)
    }

    pub fn false_() -> Type {
        Type::instance(builtin::FALSE)
    }

    pub fn bool() -> Type {
        Type::true_().join(&Type::false_())
    }

    pub fn integer() -> Type {
        Type::instance(builtin::INTEGER)
    }

    pub fn string() -> Type {
        Type::instance(builtin::STRING)
    }

    pub fn symbol(name: &str) -> Type {
        Type::Symbol(Some(name.to_string()))
    }

    pub fn var(name: &str) -> Type {
        Type::Var(name.to_string())
    }

    pub fn container(base: ClassId, elems: Elements) -> Type {
        Type::Container(Box::new(Container { base, elems }))
    }

    pub fn array(lead: Vec<Type>, rest: Type) -> Type {
        Type::container(builtin::ARRAY, Elements::Array(ArrayElems::new(lead, rest)))
    }

    /// `Array[elem]` with no known length.
    pub fn array_of(elem: Type) -> Type {
        Type::array(Vec::new(), elem)
    }

    pub fn hash(map: BTreeMap<Type, Type>) -> Type {
        Type::container(builtin::HASH, Elements::Hash(HashElems::new(map)))
    }

    pub fn hash_of(key: Type, value: Type) -> Type {
        let mut map = BTreeMap::new();
        map.insert(key, value);
        Type::hash(map)
    }

    pub fn cell(base: ClassId, elems: Vec<Type>) -> Type {
        Type::container(base, Elements::Cell(CellElems { elems }))
    }

    pub fn is_bottom(&self) -> bool {
        matches!(self, Type::Bottom)
    }

    pub fn is_any(&self) -> bool {
        matches!(self, Type::Any)
    }

    pub fn is_nil(&self) -> bool {
        *self == Type::nil()
    }

    /// Container elements shape, if this is a global container.
    pub fn as_container(&self) -> Option<&Container> {
        match self {
            Type::Container(c) => Some(c),
            _ => None,
        }
    }

    /// Class used to look up methods for this value: `(class, singleton)`.
    ///
    /// `None` for values that cannot receive messages (`Any`, `Bottom`, unions,
    /// type variables).
    pub fn dispatch_info(&self) -> Option<(ClassId, bool)> {
        match self {
            Type::Class(klass) => Some((*klass, true)),
            Type::Instance { klass, .. } => Some((*klass, false)),
            Type::Symbol(_) => Some((builtin::SYMBOL, false)),
            Type::Literal { base, .. } => Some((*base, false)),
            Type::Proc(_) => Some((builtin::PROC, false)),
            Type::Local { base, .. } => Some((*base, false)),
            Type::Container(c) => Some((c.base, false)),
            Type::Bottom | Type::Any | Type::Void | Type::Var(_) | Type::Union(_) => None,
        }
    }

    /// The non-literal, non-local view used by case/when narrowing.
    pub fn base_instance(&self) -> Option<ClassId> {
        match self {
            Type::Instance { klass, .. } => Some(*klass),
            Type::Symbol(_) => Some(builtin::SYMBOL),
            Type::Literal { base, .. } => Some(*base),
            Type::Local { base, .. } => Some(*base),
            _ => None,
        }
    }

    /// A literal's value dropped, keeping its class.
    pub fn without_literal(&self) -> Type {
        match self {
            Type::Literal { base, .. } => Type::instance(*base),
            _ => self.clone(),
        }
    }

    /// Global type of a literal operand. Only the outermost value keeps its
    /// literal payload; nested elements are plain instances.
    pub fn from_literal(value: &LiteralValue) -> Type {
        match value {
            LiteralValue::Nil => Type::nil(),
            LiteralValue::True => Type::true_(),
            LiteralValue::False => Type::false_(),
            LiteralValue::Integer(n) => Type::Literal {
                lit: Lit::Integer(*n),
                base: builtin::INTEGER,
            },
            LiteralValue::Float(f) => Type::Literal {
                lit: Lit::Float(f.to_bits()),
                base: builtin::FLOAT,
            },
            LiteralValue::String(s) => Type::Literal {
                lit: Lit::Str(s.clone()),
                base: builtin::STRING,
            },
            LiteralValue::Symbol(s) => Type::symbol(s),
            LiteralValue::Regexp(s) => Type::Literal {
                lit: Lit::Regexp(s.clone()),
                base: builtin::REGEXP,
            },
            LiteralValue::Array(items) => Type::array(
                items
                    .iter()
                    .map(|v| Type::from_literal(v).without_literal())
                    .collect(),
                Type::Bottom,
            ),
            LiteralValue::Hash(pairs) => {
                let mut map: BTreeMap<Type, Type> = BTreeMap::new();
                for (k, v) in pairs {
                    let k = Type::from_literal(k).without_literal();
                    let v = Type::from_literal(v).without_literal();
                    let merged = match map.get(&k) {
                        Some(existing) => existing.join(&v),
                        None => v,
                    };
                    map.insert(k, merged);
                }
                Type::hash(map)
            }
            LiteralValue::Range { low, high } => {
                let elem = Type::from_literal(low)
                    .without_literal()
                    .join(&Type::from_literal(high).without_literal());
                Type::cell(builtin::RANGE, vec![elem])
            }
        }
    }
}
