//! Widening operators that keep the lattice finite.
//!
//! Join alone never loses precision, so a union of many unrelated class
//! instances could grow with the program. `widen` collapses such unions into a
//! single degenerate instance of their nearest common superclass. The engine
//! applies it wherever a value is stored (env merge, return values, variable
//! writes), which keeps `join` itself pure.

use std::collections::BTreeSet;

use super::ops::ClassHierarchy;
use super::types::{builtin, ClassId, Type};

/// Default bound on nested container depth for localize/globalize/substitute.
pub const DEFAULT_TYPE_DEPTH_LIMIT: usize = 5;

/// Default number of class instances a union may hold before it degenerates.
pub const DEFAULT_UNION_WIDTH_LIMIT: usize = 10;

/// Maximum number of positional element slots tracked for an array.
pub const ARRAY_LEAD_LIMIT: usize = 5;

/// Applies union-width degeneration recursively.
///
/// A union degenerates when it holds at least `limit` class instances (`nil` and
/// module instances excluded), or when one of them is already degenerate and
/// another joins it. A `limit` below 2 disables the width rule.
pub fn widen<H: ClassHierarchy + ?Sized>(h: &H, ty: &Type, limit: usize) -> Type {
    match ty {
        Type::Container(c) => Type::container(c.base, c.elems.map_types(|t| widen(h, t, limit))),
        Type::Union(u) => {
            let mut instances = Vec::new();
            let mut others = Vec::new();
            let mut degenerated = false;
            for t in &u.types {
                match t {
                    Type::Instance {
                        klass,
                        include_subclasses,
                    } if *klass != builtin::NIL && !h.is_module(*klass) => {
                        degenerated |= *include_subclasses;
                        instances.push(*klass);
                    }
                    other => others.push(other.clone()),
                }
            }
            let collapse = (limit >= 2 && instances.len() >= limit)
                || (degenerated && instances.len() >= 2);
            let mut acc = Type::Bottom;
            if collapse {
                acc = Type::Instance {
                    klass: common_superclass(h, &instances),
                    include_subclasses: true,
                };
            } else {
                for klass in &instances {
                    let instance = u
                        .types
                        .iter()
                        .find(|t| matches!(t, Type::Instance { klass: k, .. } if k == klass))
                        .cloned()
                        .unwrap_or_else(|| Type::instance(*klass));
                    acc = acc.join(&instance);
                }
            }
            for t in &others {
                acc = acc.join(t);
            }
            for ((_, base), elems) in &u.elems {
                let elems = elems.map_types(|t| widen(h, t, limit));
                acc = acc.join(&Type::container(*base, elems));
            }
            acc
        }
        _ => ty.clone(),
    }
}

/// Nearest class that every element of `klasses` inherits from.
pub fn common_superclass<H: ClassHierarchy + ?Sized>(h: &H, klasses: &[ClassId]) -> ClassId {
    let Some((first, rest)) = klasses.split_first() else {
        return builtin::OBJECT;
    };
    let mut chain = ancestors(h, *first);
    for klass in rest {
        let candidates: BTreeSet<ClassId> = chain.iter().copied().collect();
        let mut cursor = Some(*klass);
        let mut found = None;
        while let Some(k) = cursor {
            if candidates.contains(&k) {
                found = Some(k);
                break;
            }
            cursor = h.superclass(k);
        }
        let Some(found) = found else {
            return builtin::BASIC_OBJECT;
        };
        if let Some(pos) = chain.iter().position(|k| *k == found) {
            chain.drain(..pos);
        }
    }
    chain.first().copied().unwrap_or(builtin::OBJECT)
}

fn ancestors<H: ClassHierarchy + ?Sized>(h: &H, klass: ClassId) -> Vec<ClassId> {
    let mut out = Vec::new();
    let mut cursor = Some(klass);
    while let Some(k) = cursor {
        if out.contains(&k) {
            break;
        }
        out.push(k);
        cursor = h.superclass(k);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Object <- Animal <- {Dog, Cat}; Comparable is a module.
    struct Zoo;

    const ANIMAL: ClassId = ClassId(100);
    const DOG: ClassId = ClassId(101);
    const CAT: ClassId = ClassId(102);

    impl ClassHierarchy for Zoo {
        fn superclass(&self, klass: ClassId) -> Option<ClassId> {
            match klass {
                DOG | CAT => Some(ANIMAL),
                ANIMAL | builtin::INTEGER | builtin::STRING => Some(builtin::OBJECT),
                builtin::OBJECT => Some(builtin::BASIC_OBJECT),
                _ => None,
            }
        }

        fn is_module(&self, klass: ClassId) -> bool {
            klass == builtin::COMPARABLE
        }

        fn conforms(&self, klass: ClassId, target: ClassId) -> bool {
            klass == target
        }

        fn type_params(&self, _klass: ClassId) -> Vec<String> {
            Vec::new()
        }
    }

    #[test]
    fn test_common_superclass() {
        assert_eq!(common_superclass(&Zoo, &[DOG, CAT]), ANIMAL);
        assert_eq!(common_superclass(&Zoo, &[DOG, builtin::INTEGER]), builtin::OBJECT);
    }

    #[test]
    fn test_widen_collapses_wide_union() {
        let ty = Type::instance(DOG)
            .join(&Type::instance(CAT))
            .join(&Type::nil());
        assert_eq!(widen(&Zoo, &ty, 10), ty);

        let widened = widen(&Zoo, &ty, 2);
        let expected = Type::Instance {
            klass: ANIMAL,
            include_subclasses: true,
        }
        .join(&Type::nil());
        assert_eq!(widened, expected);
    }

    #[test]
    fn test_degenerate_instance_absorbs_new_member() {
        let ty = Type::Instance {
            klass: ANIMAL,
            include_subclasses: true,
        }
        .join(&Type::instance(DOG));
        let widened = widen(&Zoo, &ty, 10);
        assert_eq!(
            widened,
            Type::Instance {
                klass: ANIMAL,
                include_subclasses: true
            }
        );
    }
}
