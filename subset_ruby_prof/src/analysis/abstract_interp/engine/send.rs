//! Calls: argument setup, method dispatch and block invocation.

use std::collections::BTreeMap;

use tracing::trace;

use super::{InferenceEngine, MethodKey};
use crate::analysis::abstract_interp::context::{CRefId, Context, EpId, ExecutionPoint};
use crate::analysis::abstract_interp::env::{Env, StaticEnv};
use crate::analysis::ipo::{
    setup_formal_arguments, ActualArguments, CallKind, Continuation, TypedBlockReturn,
};
use crate::analysis::lattice::ops::generate_substitution;
use crate::analysis::lattice::{
    match_types, merge_substitution, AllocationSite, BlockBody, ClassHierarchy, ClassId, Elements,
    KeywordTypes, SiteKey, Substitution, Type, SELF_VAR,
};
use crate::analysis::registry::{MethodDef, MethodId, MethodKind, TypedOverload};
use crate::diagnostics::DiagnosticReason;
use crate::error::AnalysisError;
use crate::iseq::{CallInfo, IseqId, ParamShape};

/// Locals of a body started without a caller: parameters are untyped.
pub(super) fn stub_locals(params: &ParamShape, nlocals: usize) -> Vec<Type> {
    let mut locals = vec![Type::nil(); nlocals];
    let mut set = |idx: usize, ty: Type| {
        if let Some(slot) = locals.get_mut(idx) {
            *slot = ty;
        }
    };
    for idx in 0..params.lead_num + params.opt_num() {
        set(idx, Type::Any);
    }
    if let Some(start) = params.post_start {
        for idx in start..start + params.post_num {
            set(idx, Type::Any);
        }
    }
    if let Some(idx) = params.rest_start {
        set(idx, Type::Any);
    }
    if let Some(shape) = &params.keyword {
        for idx in shape.start..shape.start + shape.len() {
            set(idx, Type::Any);
        }
    }
    if let Some(idx) = params.kwrest {
        set(idx, Type::Any);
    }
    if let Some(idx) = params.block_start {
        set(idx, Type::nil());
    }
    locals
}

/// Receiver as seen inside a method body: literals and placeholders drop to
/// plain instances of their class.
fn body_receiver(recv: &Type) -> Type {
    match recv {
        Type::Literal { base, .. } | Type::Local { base, .. } => Type::instance(*base),
        Type::Container(c) => Type::instance(c.base),
        other => other.clone(),
    }
}

impl<'a> InferenceEngine<'a> {
    /// `send`: pops the receiver and arguments and dispatches on every receiver member.
    pub(super) fn send(&mut self, ep: EpId, env: Env, call: &CallInfo, ctn: Continuation) -> Result<(), AnalysisError> {
        let (env, recv, aargs) = self.setup_actual_arguments(ep, env, call, true)?;
        let recv = recv.unwrap_or(Type::Any);
        trace!(mid = %call.mid, argc = call.argc, "send");
        self.do_send(&recv, &call.mid, &aargs, ep, env, ctn)
    }

    fn setup_actual_arguments(
        &mut self,
        ep: EpId,
        mut env: Env,
        call: &CallInfo,
        with_recv: bool,
    ) -> Result<(Env, Option<Type>, ActualArguments), AnalysisError> {
        let mut args = env.pop(call.stack_args())?;
        let recv = if with_recv { Some(env.pop_one()?) } else { None };

        let blk_arg = if call.flags.args_blockarg {
            args.pop()
        } else {
            None
        };
        let blk = match (blk_arg, call.block) {
            (Some(blk), _) => self.normalize_block_arg(ep, &blk),
            (None, Some(block)) => {
                self.pend_block(ep, &env, block)?;
                Type::Proc(Box::new(BlockBody::ISeq {
                    iseq: block,
                    outer: ep,
                }))
            }
            (None, None) => Type::nil(),
        };

        let kw_values = args.split_off(args.len().saturating_sub(call.kw_arg.len()));
        let mut kw: BTreeMap<Option<String>, Type> = call
            .kw_arg
            .iter()
            .cloned()
            .map(Some)
            .zip(kw_values)
            .collect();
        if call.flags.kw_splat {
            if let Some(hash) = args.pop() {
                let hash = self.globalize_in(&hash, &env, ep)?;
                self.keywords_from_hash(ep, &hash, &mut kw);
            }
        }
        let rest = if call.flags.args_splat { args.pop() } else { None };

        let aargs = ActualArguments {
            lead: args,
            rest,
            kw,
            blk,
        };
        Ok((env, recv, aargs))
    }

    /// Queues a literal block for stub execution and saves the creator's state,
    /// which the block reads its outer locals from.
    fn pend_block(&mut self, ep: EpId, env: &Env, block: IseqId) -> Result<(), AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        let Some((_, cref, mid)) = self.iseq_ctx(ctx)? else {
            return Ok(());
        };
        let program = self.program;
        let iseq = program.iseq(block)?;
        let nctx = self.intern_ctx(Context::ISeq {
            iseq: block,
            cref,
            mid,
        });
        let nep = self.intern_ep(ExecutionPoint::new(nctx, 0, Some(ep)));
        let mut static_env = env.static_env.clone();
        static_env.blk = Type::Any;
        let nenv = Env::new(static_env, vec![Type::Any; iseq.locals.len()]);
        self.pend_block_execution(block, nep, nenv)?;
        self.merge_return_env(ep, env.clone())
    }

    /// `&blk`: Procs and nil pass through, a Symbol becomes a symbol block.
    fn normalize_block_arg(&mut self, ep: EpId, blk: &Type) -> Type {
        let mut out = Type::Bottom;
        for child in blk.children() {
            let part = match &child {
                Type::Proc(_) | Type::Any => child.clone(),
                Type::Symbol(Some(sym)) => Type::Proc(Box::new(BlockBody::Symbol(sym.clone()))),
                ty if ty.is_nil() => child.clone(),
                other => {
                    let shown = self.screen(&other.without_literal());
                    self.error(ep, DiagnosticReason::InvalidBlockArgument(shown));
                    Type::Any
                }
            };
            out = out.join(&part);
        }
        out
    }

    fn keywords_from_hash(&mut self, ep: EpId, hash: &Type, kw: &mut BTreeMap<Option<String>, Type>) {
        let mut add = |key: Option<String>, ty: &Type| {
            let joined = kw.get(&key).map(|old| old.join(ty)).unwrap_or_else(|| ty.clone());
            kw.insert(key, joined);
        };
        let mut non_hash = false;
        for child in hash.children() {
            match child.as_container().map(|c| &c.elems) {
                Some(Elements::Hash(h)) => match h.to_keywords() {
                    KeywordTypes::Named(named) => {
                        for (name, ty) in &named {
                            add(Some(name.clone()), ty);
                        }
                    }
                    KeywordTypes::Untyped(ty) => add(None, &ty),
                },
                _ if child.is_any() => add(None, &Type::Any),
                _ if child.is_nil() => {}
                _ => {
                    non_hash = true;
                    add(None, &Type::Any);
                }
            }
        }
        if non_hash {
            self.warning(ep, DiagnosticReason::NonHashKeywordSplat);
        }
    }

    /// Dispatches `mid` on every member of `recv` and delivers each result through `ctn`.
    pub(super) fn do_send(
        &mut self,
        recv: &Type,
        mid: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let recv = if recv.is_bottom() { Type::Any } else { recv.clone() };
        for child in recv.children() {
            match &child {
                Type::Void => {
                    self.error(ep, DiagnosticReason::VoidReceiver);
                    self.fire(&ctn, Type::Any, ep, env.clone())?;
                }
                Type::Any => self.fire(&ctn, Type::Any, ep, env.clone())?,
                _ => {
                    let Some((klass, singleton)) = child.dispatch_info() else {
                        self.fire(&ctn, Type::Any, ep, env.clone())?;
                        continue;
                    };
                    if let Some(ids) = self.registry.search_method(klass, singleton, mid) {
                        for id in ids {
                            self.send_method(id, &child, mid, aargs, ep, env.clone(), ctn.clone())?;
                        }
                    } else if let Some(ids) = self.registry.search_method(klass, singleton, "method_missing") {
                        let aargs = aargs.for_method_missing(mid);
                        for id in ids {
                            self.send_method(id, &child, "method_missing", &aargs, ep, env.clone(), ctn.clone())?;
                        }
                    } else {
                        let shown = self.screen(&self.globalize_in(&child, &env, ep)?.without_literal());
                        self.error(
                            ep,
                            DiagnosticReason::UndefinedMethod {
                                recv: shown,
                                mid: mid.to_string(),
                            },
                        );
                        self.fire(&ctn, Type::Any, ep, env.clone())?;
                    }
                }
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub(super) fn send_method(
        &mut self,
        id: MethodId,
        recv: &Type,
        mid: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let def = self.registry.method(id).clone();
        match &def.kind {
            MethodKind::ISeq { iseq, cref, outer } => {
                self.send_iseq_method(&def, *iseq, *cref, *outer, recv, mid, aargs, ep, env, ctn)
            }
            MethodKind::AttrReader { ivar } => {
                if !aargs.lead.is_empty() || aargs.rest.is_some() {
                    self.error(
                        ep,
                        DiagnosticReason::WrongArity {
                            given: aargs.lead.len(),
                            expected: "0".to_string(),
                        },
                    );
                    return self.fire(&ctn, Type::Any, ep, env);
                }
                let ctn = match ctn {
                    Continuation::Push => Continuation::IvarPush {
                        recv: recv.clone(),
                        name: ivar.clone(),
                    },
                    other => other,
                };
                self.read_ivar_of(recv, ivar, ep, env, ctn)
            }
            MethodKind::AttrWriter { ivar } => {
                let [value] = aargs.lead.as_slice() else {
                    self.error(
                        ep,
                        DiagnosticReason::WrongArity {
                            given: aargs.lead.len(),
                            expected: "1".to_string(),
                        },
                    );
                    return self.fire(&ctn, Type::Any, ep, env);
                };
                let global = self.globalize_in(value, &env, ep)?;
                self.write_ivar(recv, ivar, &global)?;
                self.fire(&ctn, value.clone(), ep, env)
            }
            MethodKind::Alias { orig_mid, target } => {
                for id in target {
                    self.send_method(*id, recv, orig_mid, aargs, ep, env.clone(), ctn.clone())?;
                }
                Ok(())
            }
            MethodKind::Builtin(builtin) => self.call_builtin(*builtin, recv, mid, aargs, ep, env, ctn),
            MethodKind::Typed(overloads) => self.send_typed(overloads, recv, mid, aargs, ep, env, ctn),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn send_iseq_method(
        &mut self,
        def: &MethodDef,
        iseq: IseqId,
        cref: CRefId,
        outer: Option<EpId>,
        recv: &Type,
        mid: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let recv = body_receiver(recv);
        let aargs = self.globalize_args(aargs, &env, ep)?;
        let program = self.program;
        let body = program.iseq(iseq)?;
        let (locals, start_pcs) =
            match setup_formal_arguments(&aargs, CallKind::Method, &body.params, body.locals.len()) {
                Ok(bound) => bound,
                Err(reason) => {
                    self.error(ep, reason);
                    return self.fire(&ctn, Type::Any, ep, env);
                }
            };

        let nctx = self.intern_ctx(Context::ISeq {
            iseq,
            cref,
            mid: Some(mid.to_string()),
        });
        let callee = self.intern_ep(ExecutionPoint::new(nctx, 0, outer));
        let mut nenv = Env::new(
            StaticEnv::new(recv, aargs.blk.clone()),
            vec![Type::nil(); locals.len()],
        );
        let site = AllocationSite::new(callee);
        for (i, ty) in locals.iter().enumerate() {
            let (next, local) = self.localize_in(ty, nenv, callee, site.add_index(i))?;
            nenv = next;
            nenv.local_update(i, local)?;
        }

        self.method_ctxs.entry(nctx).or_default().insert(MethodKey {
            klass: def.owner,
            singleton: def.singleton,
            mid: mid.to_string(),
        });
        for pc in start_pcs {
            let start = self.intern_ep(ExecutionPoint::new(nctx, pc, outer));
            self.merge_env(start, nenv.clone())?;
        }
        self.add_callsite(nctx, ep, env, ctn)
    }

    #[allow(clippy::too_many_arguments)]
    fn send_typed(
        &mut self,
        overloads: &[TypedOverload],
        recv: &Type,
        mid: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let depth = self.config.type_depth_limit;
        let grecv = self.globalize_in(recv, &env, ep)?;
        let gaargs = self.globalize_args(aargs, &env, ep)?;
        let has_block = aargs
            .blk
            .children()
            .iter()
            .any(|t| matches!(t, Type::Proc(_)) || t.is_any());

        let mut resolved = false;
        for overload in overloads {
            let Some(mut subst) = gaargs.consistent_with_method_signature(&self.registry, &overload.sig)
            else {
                continue;
            };
            resolved = true;
            let caller_env = match (recv, grecv.as_container()) {
                (Type::Local { site, base, .. }, Some(container)) => {
                    let elems = container.elems.clone();
                    self.bind_receiver_params(ep, env.clone(), site, *base, &elems, &mut subst)?
                }
                _ => {
                    for (var, ty) in generate_substitution(&self.registry, &grecv) {
                        subst.entry(var).or_insert(ty);
                    }
                    env.clone()
                }
            };
            subst.insert(SELF_VAR.to_string(), grecv.clone());

            let typed_block = match &overload.sig.blk {
                Type::Proc(body) => match body.as_ref() {
                    BlockBody::Typed { lead, opt, ret } => Some((lead, opt, ret)),
                    _ => None,
                },
                _ => None,
            };
            match typed_block {
                Some((lead, opt, blk_ret)) if has_block => {
                    let dummy_ctx = self.intern_ctx(Context::Typed {
                        caller: ep,
                        mid: mid.to_string(),
                    });
                    let dummy_ep = self.intern_ep(ExecutionPoint::new(dummy_ctx, 0, Some(ep)));
                    let dummy_env = Env::new(
                        StaticEnv::new(body_receiver(recv), overload.sig.blk.clone()),
                        Vec::new(),
                    );
                    self.add_callsite(dummy_ctx, ep, caller_env, ctn.clone())?;

                    let params: Vec<Type> = lead
                        .iter()
                        .chain(opt.iter())
                        .map(|t| t.substitute(&subst, depth).remove_type_vars())
                        .collect();
                    let tbr = TypedBlockReturn {
                        ctx: dummy_ctx,
                        caller: ep,
                        subst: subst.clone(),
                        blk_ret: blk_ret.clone(),
                        ret: overload.ret.clone(),
                    };
                    for n in 0..=opt.len() {
                        let naargs = ActualArguments::new(params[..lead.len() + n].to_vec(), Type::nil());
                        let ctn = Continuation::TypedBlockReturn(Box::new(tbr.clone()));
                        self.invoke_block(&aargs.blk, &naargs, dummy_ep, dummy_env.clone(), ctn, None, None)?;
                    }
                }
                _ => {
                    let ret = overload.ret.substitute(&subst, depth).remove_type_vars();
                    if !ret.is_bottom() {
                        self.fire(&ctn, ret, ep, caller_env)?;
                    }
                }
            }
        }
        if !resolved {
            self.error(ep, DiagnosticReason::FailedToResolveOverload);
            self.fire(&ctn, Type::Any, ep, env)?;
        }
        Ok(())
    }

    /// Binds the receiver's type parameters for a typed call. Parameters the
    /// arguments already bound are first joined into the receiver's elements
    /// (`push`, `store`, `unshift`).
    fn bind_receiver_params(
        &mut self,
        ep: EpId,
        mut env: Env,
        site: &AllocationSite,
        base: ClassId,
        elems: &Elements,
        subst: &mut Substitution,
    ) -> Result<Env, AnalysisError> {
        let elem_site = AllocationSite::new(ep).add(SiteKey::Tag("elem"));
        match elems {
            Elements::Array(array) => {
                if let Some(added) = subst.get("Elem").cloned() {
                    let (next, local) = self.localize_in(&added, env, ep, elem_site)?;
                    env = self.update_container_elems(next, ep, site, base, |old| match old {
                        Some(Elements::Array(a)) => Elements::Array(a.update(None, &local)),
                        Some(other) => other.clone(),
                        None => Elements::Array(array.update(None, &local)),
                    })?;
                    self.merge_return_env(ep, env.clone())?;
                    subst.insert("Elem".to_string(), array.squash().join(&added));
                } else {
                    subst.insert("Elem".to_string(), array.squash());
                }
            }
            Elements::Hash(hash) => {
                let (key, value) = hash.squash();
                match (subst.get("K").cloned(), subst.get("V").cloned()) {
                    (Some(k), Some(v)) => {
                        let (next, local) = self.localize_in(&v, env, ep, elem_site)?;
                        env = self.update_container_elems(next, ep, site, base, |old| match old {
                            Some(Elements::Hash(h)) => Elements::Hash(h.update(&k, &local)),
                            Some(other) => other.clone(),
                            None => Elements::Hash(hash.update(&k, &local)),
                        })?;
                        self.merge_return_env(ep, env.clone())?;
                        subst.insert("K".to_string(), key.join(&k));
                        subst.insert("V".to_string(), value.join(&v));
                    }
                    _ => {
                        subst.insert("K".to_string(), key);
                        subst.insert("V".to_string(), value);
                    }
                }
            }
            Elements::Cell(cell) => {
                let params = self.registry.type_params(base);
                for (i, param) in params.iter().enumerate() {
                    let current = cell.elems.get(i).cloned().unwrap_or(Type::Bottom);
                    match subst.get(param).cloned() {
                        Some(added) => {
                            let (next, local) = self.localize_in(&added, env, ep, elem_site.add_index(i))?;
                            env = self.update_container_elems(next, ep, site, base, |old| match old {
                                Some(Elements::Cell(c)) => Elements::Cell(c.update(i, &local)),
                                Some(other) => other.clone(),
                                None => Elements::Cell(cell.update(i, &local)),
                            })?;
                            self.merge_return_env(ep, env.clone())?;
                            subst.insert(param.clone(), current.join(&added));
                        }
                        None => {
                            subst.insert(param.clone(), current);
                        }
                    }
                }
            }
        }
        Ok(env)
    }

    /// A block called by a typed method returned `ty`: the typed method's
    /// return type is instantiated with what the block's result binds.
    pub(super) fn typed_block_return(&mut self, tbr: &TypedBlockReturn, ty: &Type) -> Result<(), AnalysisError> {
        let depth = self.config.type_depth_limit;
        let ret = match match_types(&self.registry, ty, &tbr.blk_ret) {
            Some(bound) => {
                let subst = merge_substitution(Some(tbr.subst.clone()), bound);
                tbr.ret.substitute(&subst, depth)
            }
            None => Type::Any,
        };
        self.add_return_value(tbr.ctx, ret.remove_type_vars())
    }

    /// Calls every block in `blk` with `aargs`.
    ///
    /// `replace_recv` and `replace_cref` run the block with another `self` and
    /// lexical class (`instance_eval`, `class_eval`).
    #[allow(clippy::too_many_arguments)]
    pub(super) fn invoke_block(
        &mut self,
        blk: &Type,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
        replace_recv: Option<Type>,
        replace_cref: Option<CRefId>,
    ) -> Result<(), AnalysisError> {
        for child in blk.children() {
            match &child {
                Type::Proc(body) => match body.as_ref() {
                    BlockBody::ISeq { iseq, outer } => self.call_iseq_block(
                        *iseq,
                        *outer,
                        aargs,
                        ep,
                        env.clone(),
                        ctn.clone(),
                        replace_recv.clone(),
                        replace_cref,
                    )?,
                    BlockBody::Symbol(sym) => {
                        self.call_symbol_block(sym, aargs, ep, env.clone(), ctn.clone())?
                    }
                    BlockBody::Typed { ret, .. } => {
                        self.fire(&ctn, ret.remove_type_vars(), ep, env.clone())?
                    }
                },
                ty if ty.is_nil() => {}
                _ => self.fire(&ctn, Type::Any, ep, env.clone())?,
            }
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn call_iseq_block(
        &mut self,
        iseq: IseqId,
        outer: EpId,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
        replace_recv: Option<Type>,
        replace_cref: Option<CRefId>,
    ) -> Result<(), AnalysisError> {
        let Some(mut blk_env) = self.return_envs.get(&outer).cloned() else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let outer_ctx = self.point(outer)?.ctx;
        let Some((_, outer_cref, outer_mid)) = self.iseq_ctx(outer_ctx)? else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        if let Some(recv) = replace_recv {
            let recv = self.globalize_in(&recv, &env, ep)?;
            blk_env.replace_recv(body_receiver(&recv));
        }
        let aargs = self.globalize_args(aargs, &env, ep)?;
        let sig = aargs.to_block_signature();
        let merged = match self.block_signatures.get(&iseq) {
            Some(old) => old.merge(&sig),
            None => sig,
        };
        self.block_signatures.insert(iseq, merged);

        let program = self.program;
        let body = program.iseq(iseq)?;
        let (locals, start_pcs) =
            match setup_formal_arguments(&aargs, CallKind::Block, &body.params, body.locals.len()) {
                Ok(bound) => bound,
                Err(reason) => {
                    self.error(ep, reason);
                    return self.fire(&ctn, Type::Any, ep, env);
                }
            };

        let nctx = self.intern_ctx(Context::ISeq {
            iseq,
            cref: replace_cref.unwrap_or(outer_cref),
            mid: outer_mid,
        });
        let callee = self.intern_ep(ExecutionPoint::new(nctx, 0, Some(outer)));
        let mut nenv = Env::new(blk_env.static_env.clone(), vec![Type::nil(); locals.len()]);
        let site = AllocationSite::new(callee);
        for (i, ty) in locals.iter().enumerate() {
            let (next, local) = self.localize_in(ty, nenv, callee, site.add_index(i))?;
            nenv = next;
            nenv.local_update(i, local)?;
        }

        self.block_ctxs.entry(iseq).or_default().insert(nctx);
        for pc in start_pcs {
            let start = self.intern_ep(ExecutionPoint::new(nctx, pc, Some(outer)));
            self.merge_env(start, nenv.clone())?;
        }
        self.add_callsite(nctx, ep, env, ctn)
    }

    /// `&:sym`: the first argument receives `sym` with the rest as arguments.
    fn call_symbol_block(
        &mut self,
        sym: &str,
        aargs: &ActualArguments,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let (recv, rest) = match aargs.lead.split_first() {
            Some((first, rest)) => (
                first.clone(),
                ActualArguments {
                    lead: rest.to_vec(),
                    ..aargs.clone()
                },
            ),
            None => match aargs.rest_elem() {
                Some(elem) => (elem, aargs.clone()),
                None => {
                    self.error(
                        ep,
                        DiagnosticReason::Other(format!("no receiver for the block &:{}", sym)),
                    );
                    return self.fire(&ctn, Type::Any, ep, env);
                }
            },
        };
        self.do_send(&recv, sym, &rest, ep, env, ctn)
    }

    /// `invokeblock` (`yield`): calls the block of the current activation.
    pub(super) fn invoke_yield(&mut self, ep: EpId, env: Env, call: &CallInfo) -> Result<(), AnalysisError> {
        let (mut env, _, aargs) = self.setup_actual_arguments(ep, env, call, false)?;
        let blk = env.static_env.blk.clone();
        if blk.is_nil() || blk.is_bottom() {
            env.push(Type::Any)?;
            let next = self.next_ep(ep)?;
            return self.merge_env(next, env);
        }
        self.invoke_block(&blk, &aargs, ep, env, Continuation::Push, None, None)
    }

    /// `invokesuper`: looks the current method up past its owner.
    pub(super) fn invoke_super(&mut self, ep: EpId, env: Env, call: &CallInfo) -> Result<(), AnalysisError> {
        let (env, _, aargs) = self.setup_actual_arguments(ep, env, call, true)?;
        let ctx = self.point(ep)?.ctx;
        let scope = match self.iseq_ctx(ctx)? {
            Some((_, cref, Some(mid))) => self.cref(cref)?.klass.map(|klass| (klass, mid)),
            _ => None,
        };
        let Some((current, mid)) = scope else {
            return self.fire(&Continuation::Push, Type::Any, ep, env);
        };
        let recv = env.static_env.recv.clone();
        let mut dispatched = false;
        for child in recv.children() {
            let Some((klass, singleton)) = child.dispatch_info() else {
                continue;
            };
            dispatched = true;
            match self.registry.super_methods(klass, singleton, current, &mid) {
                Some(ids) => {
                    for id in ids {
                        self.send_method(id, &child, &mid, &aargs, ep, env.clone(), Continuation::Push)?;
                    }
                }
                None => {
                    let label = format!("{}#{}", self.registry.path(current), mid);
                    self.error(ep, DiagnosticReason::NoSuperMethod(label));
                    self.fire(&Continuation::Push, Type::Any, ep, env.clone())?;
                }
            }
        }
        if !dispatched {
            self.fire(&Continuation::Push, Type::Any, ep, env)?;
        }
        Ok(())
    }
}
