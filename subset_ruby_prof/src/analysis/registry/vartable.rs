//! Instance, class and global variable tables.
//!
//! Each entry accumulates the written type and remembers the points that read
//! it. A reader is answered immediately with the current type and answered
//! again whenever a write widens it.

use std::collections::BTreeMap;

use crate::analysis::abstract_interp::context::EpId;
use crate::analysis::abstract_interp::Env;
use crate::analysis::ipo::Continuation;
use crate::analysis::lattice::Type;

/// A registered read: what to do with the value, and the env of the reading point.
#[derive(Clone, Debug)]
pub struct ReadHook {
    pub ctn: Continuation,
    pub env: Env,
}

#[derive(Clone, Debug)]
pub struct VarEntry {
    pub ty: Type,
    pub readers: BTreeMap<EpId, ReadHook>,
}

impl Default for VarEntry {
    fn default() -> Self {
        Self {
            ty: Type::Bottom,
            readers: BTreeMap::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct VarTable<K> {
    entries: BTreeMap<K, VarEntry>,
}

impl<K> Default for VarTable<K> {
    fn default() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }
}

impl<K: Ord + Clone> VarTable<K> {
    /// Registers a reader. Returns the type to deliver now (`nil` when unwritten).
    pub fn add_read(&mut self, key: K, ep: EpId, hook: ReadHook) -> Type {
        let entry = self.entries.entry(key).or_default();
        entry.readers.insert(ep, hook);
        if entry.ty.is_bottom() {
            Type::nil()
        } else {
            entry.ty.clone()
        }
    }

    /// Current type, `Bottom` when unwritten.
    pub fn get(&self, key: &K) -> Type {
        self.entries
            .get(key)
            .map(|e| e.ty.clone())
            .unwrap_or(Type::Bottom)
    }

    /// Stores an already joined and widened type. Returns the readers to
    /// re-fire, or nothing when the type did not change.
    pub fn store(&mut self, key: K, ty: Type) -> Vec<(EpId, ReadHook)> {
        let entry = self.entries.entry(key).or_default();
        if entry.ty == ty {
            return Vec::new();
        }
        entry.ty = ty;
        entry
            .readers
            .iter()
            .map(|(ep, hook)| (*ep, hook.clone()))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &VarEntry)> {
        self.entries.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::abstract_interp::StaticEnv;

    fn hook() -> ReadHook {
        ReadHook {
            ctn: Continuation::Push,
            env: Env::new(StaticEnv::new(Type::nil(), Type::nil()), Vec::new()),
        }
    }

    #[test]
    fn test_unwritten_read_is_nil() {
        let mut table: VarTable<String> = VarTable::default();
        assert_eq!(table.add_read("$x".to_string(), EpId(0), hook()), Type::nil());
        assert_eq!(table.get(&"$x".to_string()), Type::Bottom);
    }

    #[test]
    fn test_store_refires_readers_only_on_change() {
        let mut table: VarTable<String> = VarTable::default();
        table.add_read("$x".to_string(), EpId(3), hook());
        let fired = table.store("$x".to_string(), Type::integer());
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, EpId(3));
        assert!(table.store("$x".to_string(), Type::integer()).is_empty());
        assert_eq!(table.add_read("$x".to_string(), EpId(4), hook()), Type::integer());
    }
}
