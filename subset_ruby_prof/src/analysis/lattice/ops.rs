//! Lattice operations: join, matching and substitution.
//!
//! `join` is the least upper bound used everywhere the engine merges abstract
//! state. `match_types` and `Type::substitute` implement the generic-parameter
//! inference used when a typed method is invoked.

use std::collections::{BTreeMap, BTreeSet};

use super::elements::Elements;
use super::types::{builtin, BlockBody, ClassId, Container, ContainerKind, Type, Union};

/// Bindings from type-variable names to types.
pub type Substitution = BTreeMap<String, Type>;

/// Read-only view of the class hierarchy needed by the lattice.
pub trait ClassHierarchy {
    fn superclass(&self, klass: ClassId) -> Option<ClassId>;
    fn is_module(&self, klass: ClassId) -> bool;
    /// True if `klass` is `target`, a subclass of it, or includes it as a mixin.
    fn conforms(&self, klass: ClassId, target: ClassId) -> bool;
    fn type_params(&self, klass: ClassId) -> Vec<String>;
}

impl Union {
    fn absorb(&mut self, ty: &Type) {
        match ty {
            Type::Bottom => {}
            Type::Union(u) => {
                for t in &u.types {
                    self.types.insert(t.clone());
                }
                for (key, elems) in &u.elems {
                    self.absorb_elems(*key, elems);
                }
            }
            Type::Container(c) => self.absorb_elems((c.elems.kind(), c.base), &c.elems),
            other => {
                self.types.insert(other.clone());
            }
        }
    }

    fn absorb_elems(&mut self, key: (ContainerKind, ClassId), elems: &Elements) {
        match self.elems.get_mut(&key) {
            Some(current) => *current = current.union(elems),
            None => {
                self.elems.insert(key, elems.clone());
            }
        }
    }

    pub(crate) fn into_type(self) -> Type {
        if self.types.contains(&Type::Any) {
            return Type::Any;
        }
        match (self.types.len(), self.elems.len()) {
            (0, 0) => Type::Bottom,
            (1, 0) => self.types.into_iter().next().unwrap_or(Type::Bottom),
            (0, 1) => match self.elems.into_iter().next() {
                Some(((_, base), elems)) => Type::container(base, elems),
                None => Type::Bottom,
            },
            _ => Type::Union(Box::new(self)),
        }
    }
}

impl Type {
    /// Least upper bound.
    ///
    /// # Examples
    /// ```text
    /// join(Bottom, T)          = T
    /// join(Any, T)             = Any
    /// join(Integer, String)    = Integer | String
    /// join([Integer], [String]) = [Integer | String]
    /// ```
    pub fn join(&self, other: &Type) -> Type {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Type::Bottom, t) | (t, Type::Bottom) => return t.clone(),
            (Type::Any, _) | (_, Type::Any) => return Type::Any,
            _ => {}
        }
        let mut union = Union::default();
        union.absorb(self);
        union.absorb(other);
        union.into_type()
    }

    pub fn join_all<'a>(types: impl IntoIterator<Item = &'a Type>) -> Type {
        types
            .into_iter()
            .fold(Type::Bottom, |acc, ty| acc.join(ty))
    }

    /// Union members, with containers materialized. A non-union is its own only child.
    pub fn children(&self) -> Vec<Type> {
        match self {
            Type::Union(u) => {
                let mut out: Vec<Type> = u.types.iter().cloned().collect();
                out.extend(
                    u.elems
                        .iter()
                        .map(|((_, base), elems)| Type::container(*base, elems.clone())),
                );
                out
            }
            Type::Bottom => Vec::new(),
            other => vec![other.clone()],
        }
    }

    /// Collects the names of free type variables.
    pub fn free_type_variables(&self, out: &mut BTreeSet<String>) {
        match self {
            Type::Var(name) => {
                out.insert(name.clone());
            }
            Type::Union(u) => {
                for t in &u.types {
                    t.free_type_variables(out);
                }
                for elems in u.elems.values() {
                    elems.for_each_type(|t| t.free_type_variables(out));
                }
            }
            Type::Container(c) => c.elems.for_each_type(|t| t.free_type_variables(out)),
            Type::Proc(body) => {
                if let BlockBody::Typed { lead, opt, ret } = body.as_ref() {
                    for t in lead.iter().chain(opt.iter()) {
                        t.free_type_variables(out);
                    }
                    ret.free_type_variables(out);
                }
            }
            _ => {}
        }
    }

    /// Replaces type variables by their bindings; unbound variables become `Any`.
    pub fn substitute(&self, subst: &Substitution, depth: usize) -> Type {
        match self {
            Type::Var(name) => subst.get(name).cloned().unwrap_or(Type::Any),
            Type::Container(c) => {
                if depth == 0 {
                    return Type::Any;
                }
                let elems = c.elems.substitute(subst, depth - 1);
                Type::container(c.base, elems)
            }
            Type::Union(u) => {
                if depth == 0 {
                    return Type::Any;
                }
                let mut acc = Type::Bottom;
                for t in &u.types {
                    acc = acc.join(&t.substitute(subst, depth - 1));
                }
                for ((_, base), elems) in &u.elems {
                    let elems = elems.substitute(subst, depth - 1);
                    acc = acc.join(&Type::container(*base, elems));
                }
                acc
            }
            Type::Proc(body) => match body.as_ref() {
                BlockBody::Typed { lead, opt, ret } => Type::Proc(Box::new(BlockBody::Typed {
                    lead: lead.iter().map(|t| t.substitute(subst, depth)).collect(),
                    opt: opt.iter().map(|t| t.substitute(subst, depth)).collect(),
                    ret: ret.substitute(subst, depth),
                })),
                _ => self.clone(),
            },
            _ => self.clone(),
        }
    }

    /// `Any` in place of every type variable.
    pub fn remove_type_vars(&self) -> Type {
        let mut vars = BTreeSet::new();
        self.free_type_variables(&mut vars);
        if vars.is_empty() {
            return self.clone();
        }
        self.substitute(&Substitution::new(), usize::MAX)
    }
}

/// Merges two substitutions, joining the bindings of shared variables.
pub fn merge_substitution(acc: Option<Substitution>, other: Substitution) -> Substitution {
    match acc {
        None => other,
        Some(mut acc) => {
            for (var, ty) in other {
                let merged = match acc.get(&var) {
                    Some(existing) => existing.join(&ty),
                    None => ty,
                };
                acc.insert(var, merged);
            }
            acc
        }
    }
}

/// Matches a concrete (global) type against a pattern that may hold type variables.
///
/// Returns the variable bindings, or `None` when the types are inconsistent.
pub fn match_types<H: ClassHierarchy + ?Sized>(
    h: &H,
    concrete: &Type,
    pattern: &Type,
) -> Option<Substitution> {
    match pattern {
        Type::Var(name) => {
            let mut subst = Substitution::new();
            subst.insert(name.clone(), concrete.clone());
            return Some(subst);
        }
        Type::Any => return Some(Substitution::new()),
        Type::Union(_) => {
            let mut subst = None;
            for p in pattern.children() {
                if let Some(s) = match_types(h, concrete, &p) {
                    subst = Some(merge_substitution(subst, s));
                }
            }
            return subst;
        }
        _ => {}
    }
    match concrete {
        Type::Any => {
            let mut vars = BTreeSet::new();
            pattern.free_type_variables(&mut vars);
            Some(vars.into_iter().map(|v| (v, Type::Any)).collect())
        }
        Type::Union(_) => {
            let mut subst = None;
            for c in concrete.children() {
                if let Some(s) = match_types(h, &c, pattern) {
                    subst = Some(merge_substitution(subst, s));
                }
            }
            subst
        }
        _ => match (concrete, pattern) {
            (Type::Container(c), Type::Container(p)) => match_containers(h, c, p),
            (_, Type::Container(_)) | (Type::Container(_), _) => None,
            (Type::Proc(_), Type::Proc(p)) => {
                let mut vars = BTreeSet::new();
                Type::Proc(p.clone()).free_type_variables(&mut vars);
                Some(vars.into_iter().map(|v| (v, Type::Any)).collect())
            }
            _ => {
                if consistent(h, concrete, pattern) {
                    Some(Substitution::new())
                } else {
                    None
                }
            }
        },
    }
}

fn match_containers<H: ClassHierarchy + ?Sized>(
    h: &H,
    concrete: &Container,
    pattern: &Container,
) -> Option<Substitution> {
    if concrete.elems.kind() != pattern.elems.kind() {
        return None;
    }
    if !consistent(
        h,
        &Type::instance(concrete.base),
        &Type::instance(pattern.base),
    ) {
        return None;
    }
    let subst = concrete.elems.match_with(h, &pattern.elems)?;
    Some(subst)
}

/// Nominal consistency of a concrete, non-container value with a pattern.
pub fn consistent<H: ClassHierarchy + ?Sized>(h: &H, concrete: &Type, pattern: &Type) -> bool {
    match (concrete, pattern) {
        (Type::Bottom, _) => true,
        (Type::Class(a), Type::Class(b)) => {
            let mut cursor = Some(*a);
            while let Some(k) = cursor {
                if k == *b {
                    return true;
                }
                cursor = h.superclass(k);
            }
            false
        }
        (Type::Class(_), Type::Instance { klass, .. }) => {
            matches!(*klass, builtin::OBJECT | builtin::CLASS | builtin::MODULE)
        }
        (Type::Instance { klass, .. }, Type::Class(_)) => {
            matches!(*klass, builtin::OBJECT | builtin::CLASS | builtin::MODULE)
        }
        (Type::Instance { klass: a, .. }, Type::Instance { klass: b, .. }) => h.conforms(*a, *b),
        (Type::Symbol(a), Type::Symbol(b)) => a == b || b.is_none(),
        (Type::Symbol(_), other) => consistent(h, &Type::instance(builtin::SYMBOL), other),
        (Type::Literal { base, .. }, other) => consistent(h, &Type::instance(*base), other),
        (Type::Proc(_), Type::Proc(_)) => true,
        (Type::Proc(_), other) => consistent(h, &Type::instance(builtin::PROC), other),
        _ => false,
    }
}

/// Bindings implied by a receiver's own generic parameters (`Elem`, `K`, `V`, ...).
pub fn generate_substitution<H: ClassHierarchy + ?Sized>(h: &H, recv: &Type) -> Substitution {
    let mut subst = Substitution::new();
    let Type::Container(c) = recv else {
        return subst;
    };
    match &c.elems {
        Elements::Array(a) => {
            subst.insert("Elem".to_string(), a.squash());
        }
        Elements::Hash(hash) => {
            let (k, v) = hash.squash();
            subst.insert("K".to_string(), k);
            subst.insert("V".to_string(), v);
        }
        Elements::Cell(cell) => {
            for (name, ty) in h.type_params(c.base).into_iter().zip(cell.elems.iter()) {
                let merged = match subst.get(&name) {
                    Some(existing) => existing.join(ty),
                    None => ty.clone(),
                };
                subst.insert(name, merged);
            }
        }
    }
    subst
}
