//! Per-class and per-module records.

use std::collections::BTreeMap;

use super::method_def::MethodId;
use super::vartable::VarTable;
use crate::analysis::lattice::{ClassId, Type};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClassKind {
    Class,
    Module,
}

/// How a module is mixed into a class.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MixKind {
    /// Searched after the class's own methods (`include`, `extend`).
    Include,
    /// Searched before the class's own methods (`prepend`).
    Prepend,
}

/// Mixed-in modules for one side (instance or singleton) of a class,
/// most recently mixed first.
#[derive(Clone, Debug, Default)]
pub struct MixinList {
    pub prepended: Vec<ClassId>,
    pub included: Vec<ClassId>,
}

#[derive(Clone, Debug)]
pub struct ClassDef {
    pub kind: ClassKind,
    pub name: String,
    /// Lexical parent for naming; `None` for top-level classes.
    pub outer: Option<ClassId>,
    pub superclass: Option<ClassId>,
    pub type_params: Vec<String>,
    /// Indexed by `singleton as usize`.
    pub mixins: [MixinList; 2],
    pub methods: BTreeMap<(bool, String), Vec<MethodId>>,
    pub constants: BTreeMap<String, Type>,
    /// Keyed by (singleton, name).
    pub ivars: VarTable<(bool, String)>,
    pub cvars: VarTable<String>,
}

impl ClassDef {
    pub fn new(kind: ClassKind, name: &str, outer: Option<ClassId>, superclass: Option<ClassId>) -> Self {
        Self {
            kind,
            name: name.to_string(),
            outer,
            superclass,
            type_params: Vec::new(),
            mixins: [MixinList::default(), MixinList::default()],
            methods: BTreeMap::new(),
            constants: BTreeMap::new(),
            ivars: VarTable::default(),
            cvars: VarTable::default(),
        }
    }

    pub fn is_module(&self) -> bool {
        self.kind == ClassKind::Module
    }

    pub fn own_methods(&self, singleton: bool, mid: &str) -> Option<&[MethodId]> {
        self.methods
            .get(&(singleton, mid.to_string()))
            .map(Vec::as_slice)
    }

    /// Records a mixin once; re-mixing keeps the original position.
    pub fn mix_module(&mut self, kind: MixKind, module: ClassId, singleton: bool) {
        let list = &mut self.mixins[usize::from(singleton)];
        let target = match kind {
            MixKind::Include => &mut list.included,
            MixKind::Prepend => &mut list.prepended,
        };
        if !target.contains(&module) {
            target.insert(0, module);
        }
    }

    /// Previous value when the constant was already defined.
    pub fn add_constant(&mut self, name: &str, ty: Type) -> Option<Type> {
        self.constants.insert(name.to_string(), ty)
    }
}
