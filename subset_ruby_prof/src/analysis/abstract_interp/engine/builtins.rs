//! Methods whose effect on the analysis state is hard-coded.

use std::collections::BTreeMap;

use super::{InferenceEngine, MethodKey, Pending};
use crate::analysis::abstract_interp::context::{CRef, EpId};
use crate::analysis::abstract_interp::env::Env;
use crate::analysis::ipo::{ActualArguments, Continuation};
use crate::analysis::lattice::{
    builtin, AllocationSite, BlockBody, ClassHierarchy, ClassId, ContainerKind, Elements,
    HashElems, Lit, SiteKey, Type,
};
use crate::analysis::registry::{Builtin, MethodDef, MethodKind, MixKind};
use crate::diagnostics::DiagnosticReason;
use crate::error::AnalysisError;

fn bool_type(value: bool) -> Type {
    if value {
        Type::true_()
    } else {
        Type::false_()
    }
}

/// Index operand of `Array#[]`: a literal integer, or `None` for any index.
fn literal_index(ty: &Type) -> Option<i64> {
    match ty {
        Type::Literal {
            lit: Lit::Integer(i),
            ..
        } => Some(*i),
        _ => None,
    }
}

fn is_range(ty: &Type) -> bool {
    matches!(ty, Type::Instance { klass, .. } if *klass == builtin::RANGE)
}

impl<'a> InferenceEngine<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn call_builtin(
        &mut self,
        b: Builtin,
        recv: &Type,
        mid: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let lead = &aargs.lead;
        match b {
            Builtin::SetMethodAlias => {
                if let [klass, new_mid, old_mid] = lead.as_slice() {
                    let singleton = self.cref_singleton(ep)?;
                    if let (Some(new_mid), Some(old_mid)) =
                        (self.symbol_arg(ep, new_mid), self.symbol_arg(ep, old_mid))
                    {
                        for child in klass.children() {
                            if let Type::Class(k) = child {
                                self.alias_method(k, singleton, &new_mid, &old_mid);
                            }
                        }
                    }
                }
                self.fire(&ctn, Type::nil(), ep, env)
            }
            Builtin::UndefMethod | Builtin::Initialize => self.fire(&ctn, Type::nil(), ep, env),
            Builtin::HashMergeKwd => self.hash_merge_kwd(aargs, ep, env, ctn),
            Builtin::Raise => Ok(()),
            Builtin::Lambda | Builtin::Proc => self.fire(&ctn, aargs.blk.clone(), ep, env),
            Builtin::ProcCall => self.invoke_block(recv, aargs, ep, env, ctn, None, None),
            Builtin::ObjectNew => self.object_new(recv, aargs, ep, env, ctn),
            Builtin::P => {
                for arg in lead {
                    let revealed = self.globalize_in(arg, &env, ep)?;
                    let location = self.location(ep);
                    let joined = match self.revealed.get(&location) {
                        Some(old) => old.join(&revealed),
                        None => revealed,
                    };
                    self.revealed.insert(location, joined);
                }
                let ret = match lead.as_slice() {
                    [one] => one.clone(),
                    _ => Type::Any,
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::IsA => {
                let ret = match (lead.as_slice(), recv.base_instance()) {
                    ([Type::Class(target)], Some(klass)) if !matches!(recv, Type::Class(_)) => {
                        bool_type(self.registry.conforms(klass, *target))
                    }
                    _ => Type::bool(),
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::RespondTo => {
                let ret = match lead.as_slice() {
                    [Type::Symbol(Some(sym))] => match recv.dispatch_info() {
                        Some((klass, singleton)) => {
                            bool_type(self.registry.search_method(klass, singleton, sym).is_some())
                        }
                        None => Type::bool(),
                    },
                    _ => Type::bool(),
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::Class => {
                let ret = match recv {
                    Type::Class(_) | Type::Any => Type::Any,
                    other => other.base_instance().map(Type::Class).unwrap_or(Type::Any),
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::Send => self.object_send(recv, aargs, ep, env, ctn),
            Builtin::InstanceEval => {
                if !lead.is_empty() {
                    self.warning(
                        ep,
                        DiagnosticReason::Other("instance_eval with arguments is ignored".to_string()),
                    );
                    return self.fire(&ctn, Type::Any, ep, env);
                }
                let naargs = ActualArguments::new(vec![recv.clone()], Type::nil());
                self.invoke_block(&aargs.blk, &naargs, ep, env, ctn, Some(recv.clone()), None)
            }
            Builtin::BlockGiven => self.block_given(ep, env, ctn),
            Builtin::CurrentMethod => {
                let ctx = self.point(ep)?.ctx;
                let ret = match self.iseq_ctx(ctx)? {
                    Some((_, _, Some(mid))) => Type::symbol(&mid),
                    _ => Type::nil(),
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::KernelArray => {
                let Some(arg) = lead.first() else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let mut ret = Type::Bottom;
                for child in arg.children() {
                    let part = match &child {
                        Type::Local {
                            kind: ContainerKind::Array,
                            ..
                        } => child.clone(),
                        Type::Any => Type::array_of(Type::Any),
                        ty if ty.is_nil() => Type::array(Vec::new(), Type::Bottom),
                        other => Type::array(vec![other.clone()], Type::Bottom),
                    };
                    ret = ret.join(&part);
                }
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::Include | Builtin::Extend | Builtin::Prepend => self.mix(b, recv, aargs, ep, env, ctn),
            Builtin::ModuleFunction => {
                let mut env = env;
                if lead.is_empty() {
                    env.enable_module_function();
                } else if let Type::Class(klass) = recv {
                    for arg in lead {
                        let Some(sym) = self.symbol_arg(ep, arg) else {
                            continue;
                        };
                        for id in self.registry.search_method(*klass, false, &sym).unwrap_or_default() {
                            let mut def = self.registry.method(id).clone();
                            def.singleton = true;
                            def.public = true;
                            self.registry.add_method(*klass, true, &sym, def);
                        }
                    }
                }
                self.fire(&ctn, recv.clone(), ep, env)
            }
            Builtin::Public | Builtin::Private => {
                let public = b == Builtin::Public;
                let mut env = env;
                if lead.is_empty() {
                    env.method_public_set(public);
                } else if let Type::Class(klass) = recv {
                    for arg in lead {
                        let Some(sym) = self.symbol_arg(ep, arg) else {
                            continue;
                        };
                        for id in self.registry.search_method(*klass, false, &sym).unwrap_or_default() {
                            self.registry.method_mut(id).public = public;
                        }
                    }
                }
                self.fire(&ctn, recv.clone(), ep, env)
            }
            Builtin::AttrReader | Builtin::AttrWriter | Builtin::AttrAccessor => {
                let reader = b != Builtin::AttrWriter;
                let writer = b != Builtin::AttrReader;
                if let Type::Class(klass) = recv {
                    let singleton = self.cref_singleton(ep)?;
                    let public = env.static_env.pub_meth;
                    for arg in lead {
                        let Some(sym) = self.symbol_arg(ep, arg) else {
                            continue;
                        };
                        let ivar = format!("@{}", sym);
                        if reader {
                            let kind = MethodKind::AttrReader { ivar: ivar.clone() };
                            let def = MethodDef::new(kind, public, *klass, singleton);
                            self.registry.add_method(*klass, singleton, &sym, def);
                        }
                        if writer {
                            let kind = MethodKind::AttrWriter { ivar };
                            let def = MethodDef::new(kind, public, *klass, singleton);
                            self.registry.add_method(*klass, singleton, &format!("{}=", sym), def);
                        }
                    }
                }
                self.fire(&ctn, Type::nil(), ep, env)
            }
            Builtin::AliasMethod => {
                let ret = match (recv, lead.as_slice()) {
                    (Type::Class(klass), [new_mid, old_mid]) => {
                        match (self.symbol_arg(ep, new_mid), self.symbol_arg(ep, old_mid)) {
                            (Some(new_mid), Some(old_mid)) => {
                                self.alias_method(*klass, false, &new_mid, &old_mid);
                                Type::symbol(&new_mid)
                            }
                            _ => Type::Any,
                        }
                    }
                    _ => Type::Any,
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::DefineMethod => self.define_method(recv, aargs, ep, env, ctn),
            Builtin::ModuleEval => {
                let Type::Class(klass) = recv else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                if !lead.is_empty() {
                    self.warning(
                        ep,
                        DiagnosticReason::Other(format!("{} with arguments is ignored", mid)),
                    );
                    return self.fire(&ctn, Type::Any, ep, env);
                }
                let ctx = self.point(ep)?.ctx;
                let outer = self.iseq_ctx(ctx)?.map(|(_, cref, _)| cref);
                let ncref = self.intern_cref(CRef {
                    outer,
                    klass: Some(*klass),
                    singleton: false,
                });
                let naargs = ActualArguments::new(vec![recv.clone()], Type::nil());
                let ctn = Continuation::Replace {
                    with: recv.clone(),
                    then: Box::new(ctn),
                };
                self.invoke_block(&aargs.blk, &naargs, ep, env, ctn, Some(recv.clone()), Some(ncref))
            }
            Builtin::ModuleEqq => {
                let [arg] = lead.as_slice() else {
                    return self.fire(&ctn, Type::bool(), ep, env);
                };
                for child in arg.children() {
                    let ret = match (recv, &child) {
                        (Type::Class(klass), Type::Symbol(_)) => bool_type(*klass == builtin::SYMBOL),
                        (Type::Class(klass), Type::Instance { .. } | Type::Literal { .. } | Type::Local { .. }) => {
                            bool_type(child.base_instance() == Some(*klass))
                        }
                        _ => Type::bool(),
                    };
                    self.fire(&ctn, ret, ep, env.clone())?;
                }
                Ok(())
            }
            Builtin::ArrayAref => self.array_aref(recv, aargs, ep, env, ctn),
            Builtin::ArrayAset => {
                let (Type::Local { site, base, kind: ContainerKind::Array }, [idx, value]) = (recv, lead.as_slice())
                else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let idx = literal_index(idx);
                let env = self.update_container_elems(env, ep, site, *base, |old| match old {
                    Some(Elements::Array(a)) => Elements::Array(a.update(idx, value)),
                    Some(other) => other.clone(),
                    None => Elements::dummy(ContainerKind::Array),
                })?;
                self.fire(&ctn, value.clone(), ep, env)
            }
            Builtin::ArrayPush => {
                let Type::Local { site, base, kind: ContainerKind::Array } = recv else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let mut env = env;
                for value in lead {
                    env = self.update_container_elems(env, ep, site, *base, |old| match old {
                        Some(Elements::Array(a)) => Elements::Array(a.append(value)),
                        Some(other) => other.clone(),
                        None => Elements::dummy(ContainerKind::Array),
                    })?;
                }
                self.fire(&ctn, recv.clone(), ep, env)
            }
            Builtin::ArrayPop | Builtin::ArrayFirst => {
                let Type::Local { site, kind: ContainerKind::Array, .. } = recv else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let Some(Elements::Array(elems)) = self.container_elems(&env, ep, site)? else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let ret = match lead.len() {
                    0 if b == Builtin::ArrayFirst => elems.get(Some(0)),
                    0 => {
                        let elem = elems.squash();
                        if elem.is_bottom() {
                            Type::nil()
                        } else {
                            elem
                        }
                    }
                    1 => Type::array_of(elems.squash()),
                    _ => Type::Any,
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::HashAref => {
                let (Type::Local { site, kind: ContainerKind::Hash, .. }, [key]) = (recv, lead.as_slice()) else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let key = self.globalize_in(key, &env, ep)?;
                let ret = match self.container_elems(&env, ep, site)? {
                    Some(Elements::Hash(h)) => {
                        let value = h.get(&self.registry, &key);
                        if value.is_bottom() {
                            Type::nil()
                        } else {
                            value
                        }
                    }
                    _ => Type::Any,
                };
                self.fire(&ctn, ret, ep, env)
            }
            Builtin::HashAset => {
                let [key, value] = lead.as_slice() else {
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let Type::Local { site, base, kind: ContainerKind::Hash } = recv else {
                    return self.fire(&ctn, value.clone(), ep, env);
                };
                let key = self.globalize_in(key, &env, ep)?;
                let env = self.update_container_elems(env, ep, site, *base, |old| match old {
                    Some(Elements::Hash(h)) => Elements::Hash(h.update(&key, value)),
                    Some(other) => other.clone(),
                    None => Elements::dummy(ContainerKind::Hash),
                })?;
                self.fire(&ctn, value.clone(), ep, env)
            }
        }
    }

    fn cref_singleton(&self, ep: EpId) -> Result<bool, AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        Ok(match self.iseq_ctx(ctx)? {
            Some((_, cref, _)) => self.cref(cref)?.singleton,
            None => false,
        })
    }

    /// A literal symbol argument. Anything else is reported and skipped.
    fn symbol_arg(&mut self, ep: EpId, ty: &Type) -> Option<String> {
        match ty {
            Type::Symbol(Some(sym)) => Some(sym.clone()),
            Type::Symbol(None) => {
                self.warning(ep, DiagnosticReason::DynamicSymbol);
                None
            }
            _ => {
                self.warning(ep, DiagnosticReason::Other("symbol expected".to_string()));
                None
            }
        }
    }

    fn alias_method(&mut self, klass: ClassId, singleton: bool, new_mid: &str, old_mid: &str) {
        let Some(target) = self.registry.search_method(klass, singleton, old_mid) else {
            return;
        };
        let public = target
            .iter()
            .all(|id| self.registry.method(*id).public);
        let kind = MethodKind::Alias {
            orig_mid: old_mid.to_string(),
            target,
        };
        let def = MethodDef::new(kind, public, klass, singleton);
        self.registry.add_method(klass, singleton, new_mid, def);
    }

    /// `Foo.new`: allocates an instance and runs `initialize` on it.
    fn object_new(
        &mut self,
        recv: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let Type::Class(klass) = recv else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let (env, instance) = match self.registry.empty_container(*klass) {
            Some(empty) => {
                let site = AllocationSite::new(ep).add(SiteKey::Tag("new"));
                self.localize_in(&empty, env, ep, site)?
            }
            None => (env, Type::instance(*klass)),
        };
        let ctn = Continuation::Replace {
            with: instance.clone(),
            then: Box::new(ctn),
        };
        match self.registry.search_method(*klass, false, "initialize") {
            Some(ids) => {
                for id in ids {
                    self.send_method(id, &instance, "initialize", aargs, ep, env.clone(), ctn.clone())?;
                }
                Ok(())
            }
            None => self.fire(&ctn, Type::nil(), ep, env),
        }
    }

    /// `send(:name, *args)`
    fn object_send(
        &mut self,
        recv: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let (mid_ty, naargs) = match aargs.lead.split_first() {
            Some((first, rest)) => (
                first.clone(),
                ActualArguments {
                    lead: rest.to_vec(),
                    ..aargs.clone()
                },
            ),
            None => match aargs.rest_elem() {
                Some(elem) => (elem, aargs.clone()),
                None => return self.fire(&ctn, Type::Any, ep, env),
            },
        };
        let mut found = false;
        for child in mid_ty.children() {
            if let Type::Symbol(Some(mid)) = child {
                found = true;
                self.do_send(recv, &mid, &naargs, ep, env.clone(), ctn.clone())?;
            }
        }
        if !found {
            self.fire(&ctn, Type::Any, ep, env)?;
        }
        Ok(())
    }

    /// `block_given?`: continues separately with and without a block.
    fn block_given(&mut self, ep: EpId, env: Env, ctn: Continuation) -> Result<(), AnalysisError> {
        let mut procs = Type::Bottom;
        let mut no_proc = false;
        let mut unknown = false;
        for child in env.static_env.blk.children() {
            match &child {
                Type::Proc(_) => procs = procs.join(&child),
                ty if ty.is_nil() => no_proc = true,
                _ => unknown = true,
            }
        }
        if unknown {
            self.fire(&ctn, Type::bool(), ep, env.clone())?;
        }
        if !procs.is_bottom() {
            let mut with_block = env.clone();
            with_block.replace_blk(procs);
            self.fire(&ctn, Type::true_(), ep, with_block)?;
        }
        if no_proc {
            let mut without_block = env;
            without_block.replace_blk(Type::nil());
            self.fire(&ctn, Type::false_(), ep, without_block)?;
        }
        Ok(())
    }

    /// `include`, `extend` and `prepend`. Every argument is mixed in; the
    /// `included`/`extended` hook of each module runs first.
    fn mix(
        &mut self,
        b: Builtin,
        recv: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let Type::Class(target) = recv else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        if aargs.lead.is_empty() {
            self.warning(
                ep,
                DiagnosticReason::Other("mixin without an argument is ignored".to_string()),
            );
            return self.fire(&ctn, Type::Any, ep, env);
        }
        let cref_singleton = self.cref_singleton(ep)?;
        for arg in &aargs.lead {
            for child in arg.children() {
                let module = match child {
                    Type::Class(m) if self.registry.is_module(m) => m,
                    Type::Any => continue,
                    other => {
                        let shown = self.screen(&other);
                        self.warning(ep, DiagnosticReason::NonModuleMixin(shown));
                        continue;
                    }
                };
                let hook_args = ActualArguments::new(vec![recv.clone()], Type::nil());
                let (kind, singleton, hook) = match b {
                    Builtin::Include => (MixKind::Include, cref_singleton, "included"),
                    Builtin::Extend => (MixKind::Include, true, "extended"),
                    _ => (MixKind::Prepend, cref_singleton, "prepended"),
                };
                self.do_send(&Type::Class(module), hook, &hook_args, ep, env.clone(), Continuation::Discard)?;
                self.registry.mix_module(kind, *target, singleton, module);
            }
        }
        self.fire(&ctn, recv.clone(), ep, env)
    }

    /// `define_method(:name) { ... }`: the block becomes a method body that
    /// keeps reading the locals of the point that created it.
    fn define_method(
        &mut self,
        recv: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let (Type::Class(klass), [name]) = (recv, aargs.lead.as_slice()) else {
            self.warning(
                ep,
                DiagnosticReason::Other(format!(
                    "define_method with {} arguments is ignored",
                    aargs.lead.len()
                )),
            );
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let singleton = self.cref_singleton(ep)?;
        let public = env.static_env.pub_meth;
        let mut ret = Type::Bottom;
        for child in name.children() {
            let Type::Symbol(Some(mid)) = child else {
                continue;
            };
            for blk in aargs.blk.children() {
                let Type::Proc(body) = blk else {
                    continue;
                };
                let BlockBody::ISeq { iseq, outer } = *body else {
                    continue;
                };
                let outer_ctx = self.point(outer)?.ctx;
                let Some((_, cref, _)) = self.iseq_ctx(outer_ctx)? else {
                    continue;
                };
                let kind = MethodKind::ISeq {
                    iseq,
                    cref,
                    outer: Some(outer),
                };
                self.registry
                    .add_method(*klass, singleton, &mid, MethodDef::new(kind, public, *klass, singleton));
                if matches!(self.pending.get(&iseq), Some(Pending::Block(_))) {
                    self.pending.remove(&iseq);
                }
                let key = MethodKey {
                    klass: *klass,
                    singleton,
                    mid: mid.clone(),
                };
                self.pend_method_execution(iseq, key, cref, Some(outer))?;
            }
            ret = ret.join(&Type::symbol(&mid));
        }
        if ret.is_bottom() {
            ret = Type::Any;
        }
        self.fire(&ctn, ret, ep, env)
    }

    /// `core#hash_merge_kwd`: `{**a, **b}`
    fn hash_merge_kwd(
        &mut self,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let mut merged: Option<HashElems> = None;
        if let [h1, h2] = aargs.lead.as_slice() {
            for left in h1.children() {
                let Some(Elements::Hash(left)) = self.local_hash_elems(&left, &env, ep)? else {
                    continue;
                };
                for right in h2.children() {
                    let Some(Elements::Hash(right)) = self.local_hash_elems(&right, &env, ep)? else {
                        continue;
                    };
                    let both = left.union(&right);
                    merged = Some(match merged {
                        Some(acc) => acc.union(&both),
                        None => both,
                    });
                }
            }
        }
        let elems = merged.unwrap_or_else(|| {
            let mut map = BTreeMap::new();
            map.insert(Type::Any, Type::Any);
            HashElems::new(map)
        });
        let ret = Type::container(builtin::HASH, Elements::Hash(elems));
        self.fire(&ctn, ret, ep, env)
    }

    fn local_hash_elems(&self, ty: &Type, env: &Env, ep: EpId) -> Result<Option<Elements>, AnalysisError> {
        match ty {
            Type::Local {
                kind: ContainerKind::Hash,
                site,
                ..
            } => self.container_elems(env, ep, site),
            _ => Ok(None),
        }
    }

    /// `ary[idx]` and `ary[start, len]`
    fn array_aref(
        &mut self,
        recv: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let Type::Local {
            site,
            kind: ContainerKind::Array,
            ..
        } = recv
        else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let Some(Elements::Array(elems)) = self.container_elems(&env, ep, site)? else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let ret = match aargs.lead.as_slice() {
            [idx] if is_range(idx) => Type::array_of(elems.squash()),
            [idx] => elems.get(literal_index(idx)),
            [_, _] => Type::array_of(elems.squash()),
            _ => Type::Any,
        };
        self.fire(&ctn, ret, ep, env)
    }
}
