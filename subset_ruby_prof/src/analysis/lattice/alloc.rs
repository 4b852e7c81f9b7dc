//! Allocation sites and the localize/globalize conversions.
//!
//! A container created inside an activation lives in that activation's element
//! map, keyed by its [`AllocationSite`]; the value on the stack is only a
//! [`Type::Local`] pointing at the site. `globalize` folds the element records
//! back into a self-contained [`Type::Container`], `localize` does the reverse.

use std::collections::BTreeSet;

use super::elements::{ArrayElems, CellElems, Elements, HashElems};
use super::types::{ClassId, Container, Type};
use crate::analysis::abstract_interp::context::EpId;

/// One step of an allocation-site path.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SiteKey {
    Ep(EpId),
    Index(usize),
    Rest,
    Tag(&'static str),
    Class(ClassId),
    Key(Type),
}

/// Identity of a heap container, derived from where it was created.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AllocationSite {
    path: Vec<SiteKey>,
}

impl AllocationSite {
    pub fn new(ep: EpId) -> Self {
        Self {
            path: vec![SiteKey::Ep(ep)],
        }
    }

    pub fn add(&self, key: SiteKey) -> Self {
        let mut path = self.path.clone();
        path.push(key);
        Self { path }
    }

    pub fn add_index(&self, idx: usize) -> Self {
        self.add(SiteKey::Index(idx))
    }

    /// The execution point the site was derived from.
    pub fn origin(&self) -> Option<EpId> {
        match self.path.first() {
            Some(SiteKey::Ep(ep)) => Some(*ep),
            _ => None,
        }
    }

    pub fn path(&self) -> &[SiteKey] {
        &self.path
    }
}

/// Per-activation storage of container element records.
pub trait ElementStore {
    fn container_elems(&self, site: &AllocationSite) -> Option<&Elements>;
    /// Replaces the record at `site`.
    fn deploy(&mut self, site: AllocationSite, elems: Elements);
}

impl Type {
    /// Self-contained view of a (possibly local) value.
    pub fn globalize<S: ElementStore + ?Sized>(&self, store: &S, depth: usize) -> Type {
        self.globalize_with(store, &mut BTreeSet::new(), depth)
    }

    fn globalize_with<S: ElementStore + ?Sized>(
        &self,
        store: &S,
        visited: &mut BTreeSet<AllocationSite>,
        depth: usize,
    ) -> Type {
        match self {
            Type::Local { kind, site, base } => {
                if depth == 0 || visited.contains(site) {
                    return Type::Any;
                }
                visited.insert(site.clone());
                let elems = match store.container_elems(site) {
                    Some(elems) => elems.globalize_with(store, visited, depth - 1),
                    None => Elements::dummy(*kind),
                };
                visited.remove(site);
                Type::container(*base, elems)
            }
            Type::Literal { base, .. } => Type::instance(*base),
            Type::Union(u) => {
                if depth == 0 {
                    return Type::Any;
                }
                let mut acc = Type::Bottom;
                for t in &u.types {
                    acc = acc.join(&t.globalize_with(store, visited, depth - 1));
                }
                for ((_, base), elems) in &u.elems {
                    acc = acc.join(&Type::container(*base, elems.clone()));
                }
                acc
            }
            _ => self.clone(),
        }
    }

    /// Moves a global container description into `store`, returning the `Local`
    /// placeholder that stands for it.
    pub fn localize<S: ElementStore + ?Sized>(
        &self,
        store: &mut S,
        site: &AllocationSite,
        depth: usize,
    ) -> Type {
        match self {
            Type::Container(c) => {
                if depth == 0 {
                    return Type::Any;
                }
                let Container { base, elems } = c.as_ref();
                let kind = elems.kind();
                let site = site.add(SiteKey::Tag(kind.tag())).add(SiteKey::Class(*base));
                let child_depth = match elems {
                    Elements::Cell(_) => depth,
                    _ => depth - 1,
                };
                let elems = elems.localize(store, &site, child_depth);
                store.deploy(site.clone(), elems);
                Type::Local {
                    kind,
                    site,
                    base: *base,
                }
            }
            Type::Union(u) => {
                if depth == 0 {
                    return Type::Any;
                }
                let mut acc = Type::Bottom;
                for t in &u.types {
                    acc = acc.join(&t.localize(store, site, depth - 1));
                }
                for ((_, base), elems) in &u.elems {
                    let local = Type::container(*base, elems.clone()).localize(store, site, depth - 1);
                    acc = acc.join(&local);
                }
                acc
            }
            _ => self.clone(),
        }
    }
}

impl Elements {
    fn globalize_with<S: ElementStore + ?Sized>(
        &self,
        store: &S,
        visited: &mut BTreeSet<AllocationSite>,
        depth: usize,
    ) -> Elements {
        self.map_types(|t| t.globalize_with(store, visited, depth))
    }

    fn localize<S: ElementStore + ?Sized>(
        &self,
        store: &mut S,
        site: &AllocationSite,
        depth: usize,
    ) -> Elements {
        match self {
            Elements::Cell(c) => Elements::Cell(CellElems {
                elems: c
                    .elems
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t.localize(store, &site.add_index(i), depth))
                    .collect(),
            }),
            Elements::Array(a) => {
                let lead = a
                    .lead
                    .iter()
                    .enumerate()
                    .map(|(i, t)| t.localize(store, &site.add_index(i), depth))
                    .collect();
                let rest = a.rest.localize(store, &site.add(SiteKey::Rest), depth);
                Elements::Array(ArrayElems::new(lead, rest))
            }
            Elements::Hash(h) => {
                let mut out = HashElems::default();
                for (k, v) in &h.map {
                    let v = v.localize(store, &site.add(SiteKey::Key(k.clone())), depth);
                    out = out.update(k, &v);
                }
                Elements::Hash(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[derive(Default)]
    struct MapStore(BTreeMap<AllocationSite, Elements>);

    impl ElementStore for MapStore {
        fn container_elems(&self, site: &AllocationSite) -> Option<&Elements> {
            self.0.get(site)
        }

        fn deploy(&mut self, site: AllocationSite, elems: Elements) {
            self.0.insert(site, elems);
        }
    }

    #[test]
    fn test_localize_then_globalize_nested_array() {
        let mut store = MapStore::default();
        let inner = Type::array(vec![Type::integer()], Type::Bottom);
        let outer = Type::array(vec![inner.clone(), Type::string()], Type::Bottom);

        let site = AllocationSite::new(EpId(0));
        let local = outer.localize(&mut store, &site, 5);
        assert!(matches!(local, Type::Local { .. }));
        assert_eq!(store.0.len(), 2);
        assert_eq!(local.globalize(&store, 5), outer);
    }

    #[test]
    fn test_depth_limit_collapses_to_any() {
        let mut store = MapStore::default();
        let ty = Type::array_of(Type::array_of(Type::integer()));
        let site = AllocationSite::new(EpId(0));
        let local = ty.localize(&mut store, &site, 1);
        assert_eq!(local.globalize(&store, 5), Type::array_of(Type::Any));
    }

    #[test]
    fn test_distinct_origins_give_distinct_sites() {
        let a = AllocationSite::new(EpId(1)).add_index(0);
        let b = AllocationSite::new(EpId(2)).add_index(0);
        assert_ne!(a, b);
        assert_eq!(a.origin(), Some(EpId(1)));
    }

    #[test]
    fn test_literal_globalizes_to_base_instance() {
        let store = MapStore::default();
        let lit = Type::Literal {
            lit: crate::analysis::lattice::types::Lit::Integer(1),
            base: crate::analysis::lattice::types::builtin::INTEGER,
        };
        assert_eq!(lit.globalize(&store, 5), Type::integer());
    }
}
