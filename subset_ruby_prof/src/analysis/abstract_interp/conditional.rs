//! Flow-sensitive narrowing for fused test-and-branch instructions.
//!
//! A tested value is split member by member into the part that takes the jump
//! and the part that falls through. The interpreter then runs each side with
//! the tested local replaced by its part, and skips a side whose part is empty.
//!
//! - truthiness (`branchif`/`branchunless`): `nil` and `false` are falsy
//! - nil test (`branchnil`): only `nil` jumps
//! - `case`/`when` on a class: instances of exactly that class match
//!
//! `untyped` always goes both ways.

use crate::analysis::lattice::{builtin, ClassId, Type};
use crate::iseq::BranchKind;

/// Split of a tested value between the two successors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchSplit {
    pub jump: Type,
    pub fall: Type,
}

impl BranchSplit {
    fn add(&mut self, ty: &Type, jump: bool, fall: bool) {
        if jump {
            self.jump = self.jump.join(ty);
        }
        if fall {
            self.fall = self.fall.join(ty);
        }
    }
}

fn is_falsy(ty: &Type) -> bool {
    ty.is_nil() || *ty == Type::false_()
}

/// Splits `ty` according to how a `branch` of `kind` treats each member.
pub fn split_for_branch(kind: BranchKind, ty: &Type) -> BranchSplit {
    let mut split = BranchSplit {
        jump: Type::Bottom,
        fall: Type::Bottom,
    };
    for child in ty.children() {
        if child.is_any() {
            split.add(&child, true, true);
            continue;
        }
        let jump = match kind {
            BranchKind::If => !is_falsy(&child),
            BranchKind::Unless => is_falsy(&child),
            BranchKind::Nil => child.is_nil(),
        };
        split.add(&child, jump, !jump);
    }
    split
}

/// Which successors a branch on `cond` may take: `(jump, fall)`.
pub fn branch_directions(kind: BranchKind, cond: &Type) -> (bool, bool) {
    let split = split_for_branch(kind, cond);
    (!split.jump.is_bottom(), !split.fall.is_bottom())
}

/// Splits a `case` subject by a `when` class: `jump` holds the members that match.
///
/// `pattern` is the value of the `when` clause. Anything but a class object
/// sends every member both ways.
pub fn split_by_class(ty: &Type, pattern: &Type) -> BranchSplit {
    let mut split = BranchSplit {
        jump: Type::Bottom,
        fall: Type::Bottom,
    };
    let Type::Class(klass) = pattern else {
        split.add(ty, true, true);
        return split;
    };
    for child in ty.children() {
        match instance_class(&child) {
            Some(k) => {
                let matched = k == *klass;
                split.add(&child, matched, !matched);
            }
            None => split.add(&child, true, true),
        }
    }
    split
}

fn instance_class(ty: &Type) -> Option<ClassId> {
    match ty {
        Type::Instance { klass, .. } => Some(*klass),
        Type::Literal { base, .. } | Type::Local { base, .. } => Some(*base),
        Type::Symbol(_) => Some(builtin::SYMBOL),
        _ => None,
    }
}

/// Exact boolean result of a predicate, if it has one.
pub fn exact_bool(ty: &Type) -> Option<bool> {
    if *ty == Type::true_() {
        Some(true)
    } else if *ty == Type::false_() {
        Some(false)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_string_splits_on_truthiness() {
        let ty = Type::nil().join(&Type::string());
        let split = split_for_branch(BranchKind::If, &ty);
        assert_eq!(split.jump, Type::string());
        assert_eq!(split.fall, Type::nil());

        let split = split_for_branch(BranchKind::Unless, &ty);
        assert_eq!(split.jump, Type::nil());
        assert_eq!(split.fall, Type::string());
    }

    #[test]
    fn test_untyped_goes_both_ways() {
        let split = split_for_branch(BranchKind::Nil, &Type::Any);
        assert_eq!(split.jump, Type::Any);
        assert_eq!(split.fall, Type::Any);
        assert_eq!(branch_directions(BranchKind::If, &Type::Any), (true, true));
    }

    #[test]
    fn test_false_is_falsy_but_not_nil() {
        let split = split_for_branch(BranchKind::Nil, &Type::bool());
        assert_eq!(split.jump, Type::Bottom);
        assert_eq!(split.fall, Type::bool());
        assert_eq!(branch_directions(BranchKind::If, &Type::false_()), (false, true));
    }

    #[test]
    fn test_case_when_by_class() {
        let ty = Type::integer().join(&Type::string());
        let split = split_by_class(&ty, &Type::Class(builtin::INTEGER));
        assert_eq!(split.jump, Type::integer());
        assert_eq!(split.fall, Type::string());

        let split = split_by_class(&ty, &Type::Any);
        assert_eq!(split.jump, ty);
        assert_eq!(split.fall, ty);
    }

    #[test]
    fn test_exact_bool() {
        assert_eq!(exact_bool(&Type::true_()), Some(true));
        assert_eq!(exact_bool(&Type::bool()), None);
    }
}
