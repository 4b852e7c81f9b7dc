//! Class and module registry.
//!
//! An arena of [`ClassDef`] records indexed by [`ClassId`], plus an arena of
//! [`MethodDef`]s indexed by [`MethodId`]. Both only grow during a run. The
//! builtin classes occupy the fixed slots listed in
//! [`builtin`](crate::analysis::lattice::builtin).
//!
//! # Module structure
//!
//! - `class_def`: per-class records, mixin lists and constants
//! - `method_def`: method definitions and the builtin method catalogue
//! - `vartable`: instance/class/global variable tables with read hooks
//! - `typed`: the typed-method overload table
//! - `screen`: human-readable type names

pub mod class_def;
pub mod method_def;
pub mod screen;
pub mod typed;
pub mod vartable;

use std::collections::BTreeSet;
use std::ops::ControlFlow;

pub use class_def::{ClassDef, ClassKind, MixKind};
pub use method_def::{Builtin, MethodDef, MethodId, MethodKind, TypedOverload};
pub use vartable::{ReadHook, VarEntry, VarTable};

use crate::analysis::lattice::{
    builtin, ArrayElems, ClassHierarchy, ClassId, Elements, HashElems, Type,
};
use typed::TYPED_METHODS;

#[derive(Debug)]
pub struct ClassRegistry {
    classes: Vec<ClassDef>,
    methods: Vec<MethodDef>,
    pub gvars: VarTable<String>,
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassRegistry {
    /// A registry holding the builtin classes and their methods.
    pub fn new() -> Self {
        let mut registry = Self {
            classes: Vec::new(),
            methods: Vec::new(),
            gvars: VarTable::default(),
        };
        registry.bootstrap();
        registry
    }

    fn bootstrap(&mut self) {
        use builtin::*;

        let slots: [(&str, ClassKind, Option<ClassId>, &[&str]); COUNT as usize] = [
            ("BasicObject", ClassKind::Class, None, &[]),
            ("Object", ClassKind::Class, Some(BASIC_OBJECT), &[]),
            ("Module", ClassKind::Class, Some(OBJECT), &[]),
            ("Class", ClassKind::Class, Some(MODULE), &[]),
            ("Kernel", ClassKind::Module, None, &[]),
            ("VMCore", ClassKind::Class, Some(OBJECT), &[]),
            ("NilClass", ClassKind::Class, Some(OBJECT), &[]),
            ("TrueClass", ClassKind::Class, Some(OBJECT), &[]),
            ("FalseClass", ClassKind::Class, Some(OBJECT), &[]),
            ("Numeric", ClassKind::Class, Some(OBJECT), &[]),
            ("Integer", ClassKind::Class, Some(NUMERIC), &[]),
            ("Float", ClassKind::Class, Some(NUMERIC), &[]),
            ("Rational", ClassKind::Class, Some(NUMERIC), &[]),
            ("Complex", ClassKind::Class, Some(NUMERIC), &[]),
            ("Symbol", ClassKind::Class, Some(OBJECT), &[]),
            ("String", ClassKind::Class, Some(OBJECT), &[]),
            ("Array", ClassKind::Class, Some(OBJECT), &["Elem"]),
            ("Hash", ClassKind::Class, Some(OBJECT), &["K", "V"]),
            ("Range", ClassKind::Class, Some(OBJECT), &["Elem"]),
            ("Regexp", ClassKind::Class, Some(OBJECT), &[]),
            ("MatchData", ClassKind::Class, Some(OBJECT), &[]),
            ("Proc", ClassKind::Class, Some(OBJECT), &[]),
            ("Struct", ClassKind::Class, Some(OBJECT), &[]),
            ("Exception", ClassKind::Class, Some(OBJECT), &[]),
            ("StandardError", ClassKind::Class, Some(EXCEPTION), &[]),
            ("IO", ClassKind::Class, Some(OBJECT), &[]),
            ("Encoding", ClassKind::Class, Some(OBJECT), &[]),
            ("Enumerator", ClassKind::Class, Some(OBJECT), &["Elem", "Return"]),
            ("Comparable", ClassKind::Module, None, &[]),
        ];
        for (name, kind, superclass, params) in slots {
            let mut def = ClassDef::new(kind, name, None, superclass);
            def.type_params = params.iter().map(|p| p.to_string()).collect();
            self.classes.push(def);
        }
        for i in 0..COUNT {
            let id = ClassId(i);
            let name = self.classes[id.index()].name.clone();
            self.classes[OBJECT.index()].add_constant(&name, Type::Class(id));
        }

        self.classes[OBJECT.index()].mix_module(MixKind::Include, KERNEL, false);
        self.classes[NUMERIC.index()].mix_module(MixKind::Include, COMPARABLE, false);
        self.classes[STRING.index()].mix_module(MixKind::Include, COMPARABLE, false);

        let builtins: &[(ClassId, bool, &str, Builtin, bool)] = &[
            (VM_CORE, false, "core#set_method_alias", Builtin::SetMethodAlias, true),
            (VM_CORE, false, "core#undef_method", Builtin::UndefMethod, true),
            (VM_CORE, false, "core#hash_merge_kwd", Builtin::HashMergeKwd, true),
            (VM_CORE, false, "core#raise", Builtin::Raise, true),
            (VM_CORE, false, "lambda", Builtin::Lambda, true),
            (BASIC_OBJECT, false, "initialize", Builtin::Initialize, false),
            (OBJECT, true, "new", Builtin::ObjectNew, true),
            (OBJECT, false, "p", Builtin::P, false),
            (OBJECT, false, "proc", Builtin::Proc, false),
            (OBJECT, false, "lambda", Builtin::Lambda, false),
            (OBJECT, false, "__method__", Builtin::CurrentMethod, false),
            (OBJECT, false, "block_given?", Builtin::BlockGiven, false),
            (OBJECT, false, "Array", Builtin::KernelArray, false),
            (OBJECT, false, "raise", Builtin::Raise, false),
            (OBJECT, false, "is_a?", Builtin::IsA, true),
            (OBJECT, false, "kind_of?", Builtin::IsA, true),
            (OBJECT, false, "respond_to?", Builtin::RespondTo, true),
            (OBJECT, false, "class", Builtin::Class, true),
            (OBJECT, false, "send", Builtin::Send, true),
            (OBJECT, false, "public_send", Builtin::Send, true),
            (OBJECT, false, "instance_eval", Builtin::InstanceEval, true),
            (OBJECT, false, "extend", Builtin::Extend, true),
            (MODULE, false, "include", Builtin::Include, true),
            (MODULE, false, "prepend", Builtin::Prepend, true),
            (MODULE, false, "module_function", Builtin::ModuleFunction, false),
            (MODULE, false, "public", Builtin::Public, false),
            (MODULE, false, "private", Builtin::Private, false),
            (MODULE, false, "define_method", Builtin::DefineMethod, true),
            (MODULE, false, "attr_reader", Builtin::AttrReader, true),
            (MODULE, false, "attr_writer", Builtin::AttrWriter, true),
            (MODULE, false, "attr_accessor", Builtin::AttrAccessor, true),
            (MODULE, false, "alias_method", Builtin::AliasMethod, true),
            (MODULE, false, "class_eval", Builtin::ModuleEval, true),
            (MODULE, false, "module_eval", Builtin::ModuleEval, true),
            (MODULE, false, "===", Builtin::ModuleEqq, true),
            (PROC, false, "call", Builtin::ProcCall, true),
            (PROC, false, "[]", Builtin::ProcCall, true),
            (ARRAY, false, "[]", Builtin::ArrayAref, true),
            (ARRAY, false, "[]=", Builtin::ArrayAset, true),
            (ARRAY, false, "<<", Builtin::ArrayPush, true),
            (ARRAY, false, "push", Builtin::ArrayPush, true),
            (ARRAY, false, "pop", Builtin::ArrayPop, true),
            (ARRAY, false, "first", Builtin::ArrayFirst, true),
            (HASH, false, "[]", Builtin::HashAref, true),
            (HASH, false, "[]=", Builtin::HashAset, true),
        ];
        for (klass, singleton, mid, b, public) in builtins {
            let def = MethodDef::new(MethodKind::Builtin(*b), *public, *klass, *singleton);
            self.add_method(*klass, *singleton, mid, def);
        }

        for entry in TYPED_METHODS.iter() {
            let def = MethodDef::new(
                MethodKind::Typed(&entry.overloads),
                entry.public,
                entry.klass,
                entry.singleton,
            );
            self.add_method(entry.klass, entry.singleton, entry.mid, def);
        }

        let io = Type::instance(IO);
        let optional_string = Type::string().join(&Type::nil());
        for (name, ty) in [
            ("$stdout", io.clone()),
            ("$stderr", io.clone()),
            ("$stdin", io),
            ("$0", Type::string()),
            ("$PROGRAM_NAME", Type::string()),
            ("$;", optional_string.clone()),
            ("$,", optional_string.clone()),
            ("$/", optional_string),
        ] {
            self.gvars.store(name.to_string(), ty);
        }
    }

    pub fn class(&self, id: ClassId) -> &ClassDef {
        &self.classes[id.index()]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassDef {
        &mut self.classes[id.index()]
    }

    pub fn classes(&self) -> impl Iterator<Item = (ClassId, &ClassDef)> {
        self.classes
            .iter()
            .enumerate()
            .map(|(i, def)| (ClassId(i as u32), def))
    }

    pub fn method(&self, id: MethodId) -> &MethodDef {
        &self.methods[id.0 as usize]
    }

    pub fn method_mut(&mut self, id: MethodId) -> &mut MethodDef {
        &mut self.methods[id.0 as usize]
    }

    /// Creates a class (`superclass` given) or module and binds it as a constant of `cbase`.
    pub fn new_class(
        &mut self,
        cbase: Option<ClassId>,
        name: &str,
        superclass: Option<ClassId>,
        kind: ClassKind,
    ) -> ClassId {
        let outer = cbase.filter(|c| *c != builtin::OBJECT);
        let id = ClassId(self.classes.len() as u32);
        self.classes.push(ClassDef::new(kind, name, outer, superclass));
        self.add_constant(cbase.unwrap_or(builtin::OBJECT), name, Type::Class(id));
        id
    }

    /// `A::B::C`
    pub fn path(&self, klass: ClassId) -> String {
        let mut parts = Vec::new();
        let mut cursor = Some(klass);
        let mut seen = BTreeSet::new();
        while let Some(k) = cursor {
            if !seen.insert(k) {
                break;
            }
            let def = self.class(k);
            parts.push(def.name.as_str());
            cursor = def.outer;
        }
        parts.reverse();
        parts.join("::")
    }

    fn push_method(&mut self, def: MethodDef) -> MethodId {
        self.methods.push(def);
        MethodId(self.methods.len() as u32 - 1)
    }

    /// Adds a candidate; earlier definitions of the same name stay callable.
    pub fn add_method(&mut self, klass: ClassId, singleton: bool, mid: &str, def: MethodDef) -> MethodId {
        let id = self.push_method(def);
        self.class_mut(klass)
            .methods
            .entry((singleton, mid.to_string()))
            .or_default()
            .push(id);
        id
    }

    fn walk_class(
        &self,
        klass: ClassId,
        singleton: bool,
        mid: &str,
        visited: &mut BTreeSet<ClassId>,
        f: &mut dyn FnMut(ClassId, &[MethodId]) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        if !visited.insert(klass) {
            return ControlFlow::Continue(());
        }
        let def = self.class(klass);
        let mixins = &def.mixins[usize::from(singleton)];
        for module in &mixins.prepended {
            self.walk_class(*module, false, mid, visited, f)?;
        }
        if let Some(ids) = def.own_methods(singleton, mid) {
            f(klass, ids)?;
        }
        for module in &mixins.included {
            self.walk_class(*module, false, mid, visited, f)?;
        }
        ControlFlow::Continue(())
    }

    /// Visits every class along the lookup chain that defines `mid`, in lookup order.
    fn walk_methods(
        &self,
        klass: ClassId,
        singleton: bool,
        mid: &str,
        f: &mut dyn FnMut(ClassId, &[MethodId]) -> ControlFlow<()>,
    ) -> ControlFlow<()> {
        let module = self.class(klass).is_module();
        let mut cursor = Some(klass);
        let mut seen = BTreeSet::new();
        while let Some(k) = cursor {
            if !seen.insert(k) {
                break;
            }
            self.walk_class(k, singleton, mid, &mut BTreeSet::new(), f)?;
            cursor = self.class(k).superclass;
        }
        if singleton {
            let fallback = if module { builtin::MODULE } else { builtin::CLASS };
            self.walk_methods(fallback, false, mid, f)?;
        } else if module {
            // Whatever includes a module is an Object.
            self.walk_methods(builtin::OBJECT, false, mid, f)?;
        }
        ControlFlow::Continue(())
    }

    /// Candidates of the first class along the lookup chain that defines `mid`.
    pub fn search_method(&self, klass: ClassId, singleton: bool, mid: &str) -> Option<Vec<MethodId>> {
        let mut found = None;
        let _ = self.walk_methods(klass, singleton, mid, &mut |_, ids| {
            found = Some(ids.to_vec());
            ControlFlow::Break(())
        });
        found
    }

    /// Candidates found after `current` along the lookup chain of `klass`.
    pub fn super_methods(
        &self,
        klass: ClassId,
        singleton: bool,
        current: ClassId,
        mid: &str,
    ) -> Option<Vec<MethodId>> {
        let mut hit = false;
        let mut found = None;
        let _ = self.walk_methods(klass, singleton, mid, &mut |owner, ids| {
            if hit {
                found = Some(ids.to_vec());
                return ControlFlow::Break(());
            }
            hit = owner == current;
            ControlFlow::Continue(())
        });
        found
    }

    /// Returns false when `module` is not a module.
    pub fn mix_module(&mut self, kind: MixKind, target: ClassId, singleton: bool, module: ClassId) -> bool {
        if !self.class(module).is_module() {
            return false;
        }
        self.class_mut(target).mix_module(kind, module, singleton);
        true
    }

    /// Returns true when the constant was already defined.
    pub fn add_constant(&mut self, klass: ClassId, name: &str, ty: Type) -> bool {
        self.class_mut(klass).add_constant(name, ty).is_some()
    }

    pub fn get_constant(&self, klass: ClassId, name: &str) -> Option<Type> {
        self.class(klass).constants.get(name).cloned()
    }

    /// Lexical scopes innermost first, then the superclasses of the innermost
    /// scope, then the top level. Modules mixed into those classes are not
    /// searched.
    pub fn search_constant(&self, lexical: &[ClassId], name: &str) -> Option<Type> {
        for klass in lexical {
            if let Some(ty) = self.get_constant(*klass, name) {
                return Some(ty);
            }
        }
        if let Some(first) = lexical.first() {
            let mut cursor = self.class(*first).superclass;
            let mut seen = BTreeSet::new();
            while let Some(k) = cursor {
                if !seen.insert(k) {
                    break;
                }
                if let Some(ty) = self.get_constant(k, name) {
                    return Some(ty);
                }
                cursor = self.class(k).superclass;
            }
        }
        self.get_constant(builtin::OBJECT, name)
    }

    /// Freshly allocated container for an instance of a generic class.
    pub fn empty_container(&self, klass: ClassId) -> Option<Type> {
        if self.conforms(klass, builtin::ARRAY) {
            return Some(Type::container(
                klass,
                Elements::Array(ArrayElems::new(Vec::new(), Type::Bottom)),
            ));
        }
        if self.conforms(klass, builtin::HASH) {
            return Some(Type::container(klass, Elements::Hash(HashElems::default())));
        }
        let params = self.type_params(klass);
        if params.is_empty() {
            None
        } else {
            Some(Type::cell(klass, vec![Type::Bottom; params.len()]))
        }
    }

    fn mixes_in(&self, klass: ClassId, target: ClassId, visited: &mut BTreeSet<ClassId>) -> bool {
        if !visited.insert(klass) {
            return false;
        }
        let def = self.class(klass);
        def.mixins.iter().take(1).any(|list| {
            list.prepended
                .iter()
                .chain(list.included.iter())
                .any(|m| *m == target || self.mixes_in(*m, target, visited))
        })
    }
}

impl ClassHierarchy for ClassRegistry {
    fn superclass(&self, klass: ClassId) -> Option<ClassId> {
        self.class(klass).superclass
    }

    fn is_module(&self, klass: ClassId) -> bool {
        self.class(klass).is_module()
    }

    fn conforms(&self, klass: ClassId, target: ClassId) -> bool {
        if self.class(klass).is_module()
            && matches!(target, builtin::OBJECT | builtin::BASIC_OBJECT)
        {
            return true;
        }
        let mut cursor = Some(klass);
        let mut seen = BTreeSet::new();
        while let Some(k) = cursor {
            if !seen.insert(k) {
                break;
            }
            if k == target || self.mixes_in(k, target, &mut BTreeSet::new()) {
                return true;
            }
            cursor = self.class(k).superclass;
        }
        false
    }

    fn type_params(&self, klass: ClassId) -> Vec<String> {
        let mut cursor = Some(klass);
        let mut seen = BTreeSet::new();
        while let Some(k) = cursor {
            if !seen.insert(k) {
                break;
            }
            let params = &self.class(k).type_params;
            if !params.is_empty() {
                return params.clone();
            }
            cursor = self.class(k).superclass;
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests;
