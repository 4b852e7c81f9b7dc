//! Element-type records of heap containers.
//!
//! - `CellElems`: fixed arity, one slot per class type parameter
//! - `ArrayElems`: a known prefix (`lead`) followed by an unbounded `rest`
//! - `HashElems`: key type to value type

use std::collections::BTreeMap;

use super::ops::{match_types, merge_substitution, ClassHierarchy, Substitution};
use super::types::{ContainerKind, Type};
use super::widening::ARRAY_LEAD_LIMIT;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Elements {
    Cell(CellElems),
    Array(ArrayElems),
    Hash(HashElems),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CellElems {
    pub elems: Vec<Type>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArrayElems {
    pub lead: Vec<Type>,
    pub rest: Type,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HashElems {
    pub map: BTreeMap<Type, Type>,
}

/// Keyword arguments recovered from a hash.
#[derive(Clone, Debug, PartialEq)]
pub enum KeywordTypes {
    Named(BTreeMap<String, Type>),
    /// Non-symbol keys: every value lands in one untyped bucket.
    Untyped(Type),
}

impl Elements {
    pub fn kind(&self) -> ContainerKind {
        match self {
            Elements::Cell(_) => ContainerKind::Cell,
            Elements::Array(_) => ContainerKind::Array,
            Elements::Hash(_) => ContainerKind::Hash,
        }
    }

    /// Placeholder for a container whose element record is out of reach.
    pub fn dummy(kind: ContainerKind) -> Elements {
        match kind {
            ContainerKind::Cell => Elements::Cell(CellElems { elems: Vec::new() }),
            ContainerKind::Array => Elements::Array(ArrayElems::new(Vec::new(), Type::Any)),
            ContainerKind::Hash => {
                let mut map = BTreeMap::new();
                map.insert(Type::Any, Type::Any);
                Elements::Hash(HashElems { map })
            }
        }
    }

    pub fn union(&self, other: &Elements) -> Elements {
        if self == other {
            return self.clone();
        }
        match (self, other) {
            (Elements::Cell(a), Elements::Cell(b)) => Elements::Cell(a.union(b)),
            (Elements::Array(a), Elements::Array(b)) => Elements::Array(a.union(b)),
            (Elements::Hash(a), Elements::Hash(b)) => Elements::Hash(a.union(b)),
            _ => Elements::dummy(self.kind()),
        }
    }

    pub fn for_each_type(&self, mut f: impl FnMut(&Type)) {
        match self {
            Elements::Cell(c) => c.elems.iter().for_each(f),
            Elements::Array(a) => {
                a.lead.iter().for_each(&mut f);
                f(&a.rest);
            }
            Elements::Hash(h) => {
                for (k, v) in &h.map {
                    f(k);
                    f(v);
                }
            }
        }
    }

    /// Rebuilds the record with every element type mapped by `f`. Hash keys are kept.
    pub fn map_types(&self, mut f: impl FnMut(&Type) -> Type) -> Elements {
        match self {
            Elements::Cell(c) => Elements::Cell(CellElems {
                elems: c.elems.iter().map(f).collect(),
            }),
            Elements::Array(a) => Elements::Array(ArrayElems::new(
                a.lead.iter().map(&mut f).collect(),
                f(&a.rest),
            )),
            Elements::Hash(h) => {
                let mut out = HashElems::default();
                for (k, v) in &h.map {
                    let v = f(v);
                    out.insert_joined(k.clone(), v);
                }
                Elements::Hash(out)
            }
        }
    }

    pub fn substitute(&self, subst: &Substitution, depth: usize) -> Elements {
        match self {
            Elements::Hash(h) => {
                let mut out = HashElems::default();
                for (k, v) in &h.map {
                    let k = k.substitute(subst, depth);
                    let v = v.substitute(subst, depth);
                    for k in k.children() {
                        out.insert_joined(HashElems::normalize_key(k), v.clone());
                    }
                }
                Elements::Hash(out)
            }
            _ => self.map_types(|t| t.substitute(subst, depth)),
        }
    }

    pub fn match_with<H: ClassHierarchy + ?Sized>(
        &self,
        h: &H,
        pattern: &Elements,
    ) -> Option<Substitution> {
        match (self, pattern) {
            (Elements::Cell(a), Elements::Cell(b)) => {
                if a.elems.len() != b.elems.len() {
                    return None;
                }
                let mut subst = Some(Substitution::new());
                for (c, p) in a.elems.iter().zip(b.elems.iter()) {
                    subst = Some(merge_substitution(subst, match_types(h, c, p)?));
                }
                subst
            }
            (Elements::Array(a), Elements::Array(b)) => {
                let n = a.lead.len().min(b.lead.len());
                let rest_a = Type::join_all(a.lead[n..].iter().chain(std::iter::once(&a.rest)));
                let rest_b = Type::join_all(b.lead[n..].iter().chain(std::iter::once(&b.rest)));
                let mut subst = Some(Substitution::new());
                let lhs = a.lead[..n].iter().chain(std::iter::once(&rest_a));
                let rhs = b.lead[..n].iter().chain(std::iter::once(&rest_b));
                for (c, p) in lhs.zip(rhs) {
                    subst = Some(merge_substitution(subst, match_types(h, c, p)?));
                }
                subst
            }
            (Elements::Hash(a), Elements::Hash(b)) => {
                let mut subst = Some(Substitution::new());
                for (pk, pv) in &b.map {
                    let mut found = None;
                    for (ck, cv) in &a.map {
                        if let Some(sk) = match_types(h, ck, pk) {
                            if let Some(sv) = match_types(h, cv, pv) {
                                found = Some(merge_substitution(
                                    Some(merge_substitution(found, sk)),
                                    sv,
                                ));
                            }
                        }
                    }
                    subst = Some(merge_substitution(subst, found?));
                }
                subst
            }
            _ => None,
        }
    }
}

impl CellElems {
    pub fn union(&self, other: &CellElems) -> CellElems {
        let len = self.elems.len().max(other.elems.len());
        let elems = (0..len)
            .map(|i| match (self.elems.get(i), other.elems.get(i)) {
                (Some(a), Some(b)) => a.join(b),
                (Some(a), None) | (None, Some(a)) => a.clone(),
                (None, None) => Type::Bottom,
            })
            .collect();
        CellElems { elems }
    }

    pub fn update(&self, idx: usize, ty: &Type) -> CellElems {
        let mut elems = self.elems.clone();
        if let Some(slot) = elems.get_mut(idx) {
            *slot = slot.join(ty);
        }
        CellElems { elems }
    }
}

impl ArrayElems {
    pub fn new(lead: Vec<Type>, rest: Type) -> Self {
        Self { lead, rest }
    }

    pub fn squash(&self) -> Type {
        self.lead
            .iter()
            .fold(self.rest.clone(), |acc, ty| acc.join(ty))
    }

    pub fn squash_or_any(&self) -> Type {
        match self.squash() {
            Type::Bottom => Type::Any,
            ty => ty,
        }
    }

    /// Element read. `None` means "some index", which squashes.
    pub fn get(&self, idx: Option<i64>) -> Type {
        let Some(idx) = idx else {
            return self.squash_or_any();
        };
        if idx >= 0 {
            let i = idx as usize;
            if i < self.lead.len() {
                self.lead[i].clone()
            } else if self.rest.is_bottom() {
                Type::nil()
            } else {
                self.rest.clone()
            }
        } else {
            let start = (self.lead.len() as i64 + idx).max(0) as usize;
            self.lead[start..]
                .iter()
                .fold(self.rest.clone(), |acc, ty| acc.join(ty))
        }
    }

    /// Element write. `None` widens every slot.
    pub fn update(&self, idx: Option<i64>, ty: &Type) -> ArrayElems {
        let Some(idx) = idx else {
            return ArrayElems::new(
                self.lead.iter().map(|t| t.join(ty)).collect(),
                self.rest.join(ty),
            );
        };
        if idx >= 0 {
            let i = idx as usize;
            if i < self.lead.len() {
                let mut lead = self.lead.clone();
                lead[i] = ty.clone();
                ArrayElems::new(lead, self.rest.clone())
            } else {
                ArrayElems::new(self.lead.clone(), self.rest.join(ty))
            }
        } else {
            let i = self.lead.len() as i64 + idx;
            if self.rest.is_bottom() {
                let mut lead = self.lead.clone();
                if i >= 0 {
                    lead[i as usize] = ty.clone();
                }
                ArrayElems::new(lead, Type::Bottom)
            } else {
                let i = i.max(0) as usize;
                let mut lead = self.lead.clone();
                for slot in lead.iter_mut().skip(i) {
                    *slot = slot.join(ty);
                }
                ArrayElems::new(lead, self.rest.join(ty))
            }
        }
    }

    /// `ary << ty`: grows the known prefix up to a small limit.
    pub fn append(&self, ty: &Type) -> ArrayElems {
        if self.rest.is_bottom() {
            if self.lead.len() < ARRAY_LEAD_LIMIT {
                let mut lead = self.lead.clone();
                lead.push(ty.clone());
                ArrayElems::new(lead, Type::Bottom)
            } else {
                ArrayElems::new(self.lead.clone(), ty.clone())
            }
        } else {
            ArrayElems::new(self.lead.clone(), self.rest.join(ty))
        }
    }

    pub fn union(&self, other: &ArrayElems) -> ArrayElems {
        if self == other {
            return self.clone();
        }
        let n = self.lead.len().min(other.lead.len());
        let lead = (0..n).map(|i| self.lead[i].join(&other.lead[i])).collect();
        let rest = self.lead[n..]
            .iter()
            .chain(other.lead[n..].iter())
            .fold(self.rest.join(&other.rest), |acc, ty| acc.join(ty));
        ArrayElems::new(lead, rest)
    }

    /// Splits off the first `num` elements for `a, b, *c = ary`.
    pub fn take_first(&self, num: usize) -> (Vec<Type>, ArrayElems) {
        if self.lead.len() >= num {
            let lead = self.lead[..num].to_vec();
            let rest = ArrayElems::new(self.lead[num..].to_vec(), self.rest.clone());
            (lead, rest)
        } else {
            let mut lead = self.lead.clone();
            while lead.len() < num {
                lead.push(self.rest.join(&Type::nil()));
            }
            (lead, ArrayElems::new(Vec::new(), self.rest.clone()))
        }
    }

    /// Splits off the last `num` elements for `*a, b, c = ary`.
    pub fn take_last(&self, num: usize) -> (ArrayElems, Vec<Type>) {
        if self.rest.is_bottom() {
            if self.lead.len() >= num {
                let split = self.lead.len() - num;
                let following = self.lead[split..].to_vec();
                (
                    ArrayElems::new(self.lead[..split].to_vec(), Type::Bottom),
                    following,
                )
            } else {
                let mut following = self.lead.clone();
                while following.len() < num {
                    following.insert(0, Type::nil());
                }
                (ArrayElems::new(Vec::new(), Type::Bottom), following)
            }
        } else {
            let mut lead = self.lead.clone();
            let mut last = self.rest.clone();
            let mut following = Vec::with_capacity(num);
            while following.len() < num {
                if let Some(ty) = lead.pop() {
                    last = last.join(&ty);
                }
                following.insert(0, last.clone());
            }
            let rest = lead.iter().fold(last, |acc, ty| acc.join(ty));
            (ArrayElems::new(Vec::new(), rest), following)
        }
    }
}

impl HashElems {
    pub fn new(map: BTreeMap<Type, Type>) -> Self {
        let mut out = HashElems::default();
        for (k, v) in map {
            out.insert_joined(Self::normalize_key(k), v);
        }
        out
    }

    /// Container-shaped keys collapse to `Any` to keep key sets small.
    fn normalize_key(key: Type) -> Type {
        match key {
            Type::Container(_) => Type::Any,
            other => other,
        }
    }

    fn insert_joined(&mut self, key: Type, value: Type) {
        let merged = match self.map.get(&key) {
            Some(existing) => existing.join(&value),
            None => value,
        };
        self.map.insert(key, merged);
    }

    pub fn get<H: ClassHierarchy + ?Sized>(&self, h: &H, key: &Type) -> Type {
        self.map
            .iter()
            .filter(|(k, _)| match_types(h, k, key).is_some())
            .fold(Type::Bottom, |acc, (_, v)| acc.join(v))
    }

    pub fn update(&self, key: &Type, value: &Type) -> HashElems {
        let mut out = self.clone();
        for k in key.children() {
            out.insert_joined(Self::normalize_key(k), value.clone());
        }
        out
    }

    pub fn union(&self, other: &HashElems) -> HashElems {
        let mut out = self.clone();
        for (k, v) in &other.map {
            out.insert_joined(k.clone(), v.clone());
        }
        out
    }

    pub fn squash(&self) -> (Type, Type) {
        self.map
            .iter()
            .fold((Type::Bottom, Type::Bottom), |(ak, av), (k, v)| {
                (ak.join(k), av.join(v))
            })
    }

    pub fn to_keywords(&self) -> KeywordTypes {
        let mut named = BTreeMap::new();
        for (k, v) in &self.map {
            match k {
                Type::Symbol(Some(name)) => {
                    named.insert(name.clone(), v.clone());
                }
                _ => return KeywordTypes::Untyped(self.squash().1),
            }
        }
        KeywordTypes::Named(named)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_append_spills_into_rest() {
        let mut elems = ArrayElems::new(Vec::new(), Type::Bottom);
        for _ in 0..ARRAY_LEAD_LIMIT {
            elems = elems.append(&Type::integer());
        }
        assert_eq!(elems.lead.len(), ARRAY_LEAD_LIMIT);
        assert!(elems.rest.is_bottom());

        let elems = elems.append(&Type::string());
        assert_eq!(elems.lead.len(), ARRAY_LEAD_LIMIT);
        assert_eq!(elems.rest, Type::string());
    }

    #[test]
    fn test_array_get_out_of_bounds_is_nil() {
        let elems = ArrayElems::new(vec![Type::integer()], Type::Bottom);
        assert_eq!(elems.get(Some(0)), Type::integer());
        assert_eq!(elems.get(Some(3)), Type::nil());
        assert_eq!(elems.get(Some(-1)), Type::integer());
    }

    #[test]
    fn test_array_union_folds_tail_into_rest() {
        let a = ArrayElems::new(vec![Type::integer(), Type::string()], Type::Bottom);
        let b = ArrayElems::new(vec![Type::nil()], Type::Bottom);
        let u = a.union(&b);
        assert_eq!(u.lead, vec![Type::integer().join(&Type::nil())]);
        assert_eq!(u.rest, Type::string());
    }

    #[test]
    fn test_take_first_pads_with_nil() {
        let elems = ArrayElems::new(vec![Type::integer()], Type::Bottom);
        let (lead, rest) = elems.take_first(3);
        assert_eq!(lead[0], Type::integer());
        assert_eq!(lead[1], Type::nil());
        assert_eq!(lead[2], Type::nil());
        assert!(rest.lead.is_empty());
    }

    #[test]
    fn test_take_last_with_rest() {
        let elems = ArrayElems::new(vec![Type::integer()], Type::string());
        let (rest, following) = elems.take_last(1);
        assert_eq!(following, vec![Type::string().join(&Type::integer())]);
        assert_eq!(rest.rest, Type::string().join(&Type::integer()));
    }

    #[test]
    fn test_hash_to_keywords() {
        let h = HashElems::new(BTreeMap::from([(Type::symbol("a"), Type::integer())]));
        match h.to_keywords() {
            KeywordTypes::Named(map) => assert_eq!(map.get("a"), Some(&Type::integer())),
            other => panic!("unexpected {:?}", other),
        }

        let h = h.update(&Type::string(), &Type::nil());
        assert!(matches!(h.to_keywords(), KeywordTypes::Untyped(_)));
    }
}
