//! Abstract value lattice.
//!
//! # Module structure
//!
//! - `types`: the `Type` sum type, class ids and block bodies
//! - `ops`: join, matching, substitution and nominal consistency
//! - `elements`: element records of Cell/Array/Hash containers
//! - `alloc`: allocation sites and localize/globalize
//! - `widening`: union-width degeneration and default limits
//! - `signature`: accumulated method and block signatures

pub mod alloc;
pub mod elements;
pub mod ops;
pub mod signature;
pub mod types;
pub mod widening;

pub use alloc::{AllocationSite, ElementStore, SiteKey};
pub use elements::{ArrayElems, CellElems, Elements, HashElems, KeywordTypes};
pub use ops::{match_types, merge_substitution, ClassHierarchy, Substitution};
pub use signature::{BlockSignature, MethodSignature};
pub use types::{builtin, BlockBody, ClassId, Container, ContainerKind, Lit, Type, Union, SELF_VAR};
pub use widening::{widen, DEFAULT_TYPE_DEPTH_LIMIT, DEFAULT_UNION_WIDTH_LIMIT};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_identity_and_absorption() {
        let int = Type::integer();
        assert_eq!(Type::Bottom.join(&int), int);
        assert_eq!(int.join(&Type::Bottom), int);
        assert_eq!(Type::Any.join(&int), Type::Any);
        assert_eq!(int.join(&int), int);
    }

    #[test]
    fn test_join_is_commutative_and_flat() {
        let a = Type::integer();
        let b = Type::string();
        let c = Type::nil();
        let ab_c = a.join(&b).join(&c);
        let c_ba = c.join(&b.join(&a));
        assert_eq!(ab_c, c_ba);
        match ab_c {
            Type::Union(u) => {
                assert_eq!(u.types.len(), 3);
                assert!(u.types.iter().all(|t| !matches!(t, Type::Union(_))));
            }
            other => panic!("expected union, got {:?}", other),
        }
    }

    #[test]
    fn test_join_merges_containers_of_same_kind() {
        let a = Type::array(vec![Type::integer()], Type::Bottom);
        let b = Type::array(vec![Type::string()], Type::Bottom);
        assert_eq!(
            a.join(&b),
            Type::array(vec![Type::integer().join(&Type::string())], Type::Bottom)
        );
    }

    #[test]
    fn test_children_of_bottom_is_empty() {
        assert!(Type::Bottom.children().is_empty());
        assert_eq!(Type::bool().children().len(), 2);
    }

    #[test]
    fn test_substitute_unbound_var_is_any() {
        let ty = Type::array_of(Type::var("Elem"));
        let mut subst = Substitution::new();
        assert_eq!(ty.substitute(&subst, 5), Type::array_of(Type::Any));
        subst.insert("Elem".to_string(), Type::integer());
        assert_eq!(ty.substitute(&subst, 5), Type::array_of(Type::integer()));
    }

    #[test]
    fn test_merge_substitution_joins_shared_vars() {
        let mut a = Substitution::new();
        a.insert("T".to_string(), Type::integer());
        let mut b = Substitution::new();
        b.insert("T".to_string(), Type::string());
        let merged = merge_substitution(Some(a), b);
        assert_eq!(merged["T"], Type::integer().join(&Type::string()));
    }
}
