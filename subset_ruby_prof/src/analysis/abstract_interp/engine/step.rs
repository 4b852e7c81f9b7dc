//! Instruction semantics.

use tracing::{debug, trace};

use super::{InferenceEngine, MethodKey};
use crate::analysis::abstract_interp::conditional::{branch_directions, split_by_class, split_for_branch};
use crate::analysis::abstract_interp::context::{CRef, Context, EpId, ExecutionPoint};
use crate::analysis::abstract_interp::env::{Env, StaticEnv};
use crate::analysis::ipo::arguments::splat_elem;
use crate::analysis::ipo::Continuation;
use crate::analysis::lattice::{
    builtin, AllocationSite, ArrayElems, CellElems, ClassId, ContainerKind, Elements, HashElems,
    Lit, MethodSignature, SiteKey, Type,
};
use crate::analysis::registry::{ClassKind, MethodDef, MethodKind};
use crate::diagnostics::DiagnosticReason;
use crate::error::AnalysisError;
use crate::iseq::{
    BranchKind, CatchKind, ClassDefKind, ISeq, Insn, IseqId, IseqKind, LiteralValue, SpecialVar,
    ThrowKind,
};

/// What a step leaves for the generic fall-through handling.
enum Flow {
    /// Continue at the next pc with this env.
    Next(Env),
    /// The instruction merged its successors itself (or has none).
    Done,
}

impl<'a> InferenceEngine<'a> {
    pub(super) fn step(&mut self, ep: EpId) -> Result<(), AnalysisError> {
        let Some(env) = self.ep2env.get(&ep).cloned() else {
            return Ok(());
        };
        let point = self.point(ep)?;
        let Some((iseq_id, _, _)) = self.iseq_ctx(point.ctx)? else {
            return Ok(());
        };
        let program = self.program;
        let iseq = program.iseq(iseq_id)?;
        let Some(insn) = iseq.insns.get(point.pc) else {
            return Ok(());
        };
        if self.config.verbose > 0 {
            debug!(iseq = %iseq.name, pc = point.pc, insn = insn.name(), stack = env.stack.len(), "step");
        } else {
            trace!(iseq = %iseq.name, pc = point.pc, insn = insn.name(), "step");
        }
        if let Flow::Next(env) = self.step_insn(ep, point, insn, env)? {
            let next = self.intern_ep(point.next());
            self.merge_env(next, env.clone())?;
            self.enter_handlers(point, iseq, &env)?;
        }
        Ok(())
    }

    /// Starts the rescue/ensure bodies covering `point` with the state after the step.
    fn enter_handlers(&mut self, point: ExecutionPoint, iseq: &ISeq, env: &Env) -> Result<(), AnalysisError> {
        let Some((_, cref, mid)) = self.iseq_ctx(point.ctx)? else {
            return Ok(());
        };
        let program = self.program;
        for entry in iseq.catch_entries_at(point.pc) {
            if !matches!(entry.kind, CatchKind::Rescue | CatchKind::Ensure) {
                continue;
            }
            let Some(handler) = entry.iseq else {
                continue;
            };
            if env.stack.len() < entry.stack_depth {
                continue;
            }
            let cont_ep = self.intern_ep(point.jump(entry.cont));
            let mut cont_env = env.clone();
            cont_env.truncate_stack(entry.stack_depth);

            let body = program.iseq(handler)?;
            let nctx = self.intern_ctx(Context::ISeq {
                iseq: handler,
                cref,
                mid: mid.clone(),
            });
            let nep = self.intern_ep(ExecutionPoint::new(nctx, 0, Some(cont_ep)));
            let nenv = Env::new(env.static_env.clone(), vec![Type::nil(); body.locals.len()]);
            self.merge_env(nep, nenv)?;
            self.add_callsite(nctx, cont_ep, cont_env, Continuation::PushJump { pc: entry.cont })?;
        }
        Ok(())
    }

    fn step_insn(
        &mut self,
        ep: EpId,
        point: ExecutionPoint,
        insn: &Insn,
        mut env: Env,
    ) -> Result<Flow, AnalysisError> {
        match insn {
            Insn::Nop | Insn::FreezeString | Insn::SplatArray => {}
            Insn::BodyStart => self.record_signature(ep, point, &env)?,

            Insn::PutNil => env.push(Type::nil())?,
            Insn::PutSelf => {
                let recv = self.fresh_self(&env.static_env.recv);
                let (nenv, ty) = self.localize_in(&recv, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::PutObject { value } | Insn::DupHash { value } => {
                let ty = Type::from_literal(value);
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::PutString { value } => {
                env.push(Type::from_literal(&LiteralValue::String(value.clone())))?
            }
            Insn::PutSpecialObject { kind } => {
                let ty = match kind {
                    1 => Type::instance(builtin::VM_CORE),
                    _ => self.cref_class(ep)?.map(Type::Class).unwrap_or(Type::Any),
                };
                env.push(ty)?;
            }
            Insn::NewArray { len } => {
                let elems = env.pop(*len)?;
                let ty = Type::array(elems, Type::Bottom);
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::NewHash { len } => {
                let items = env.pop(*len)?;
                let mut elems = HashElems::default();
                for pair in items.chunks(2) {
                    if let [key, value] = pair {
                        let key = self.globalize_in(key, &env, ep)?;
                        elems = elems.update(&key, value);
                    }
                }
                let ty = Type::container(builtin::HASH, Elements::Hash(elems));
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::NewRange { .. } => {
                let bounds = env.pop(2)?;
                let elem = self.globalize_in(&bounds[0].join(&bounds[1]), &env, ep)?;
                let ty = Type::cell(builtin::RANGE, vec![elem]);
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::ConcatStrings { len } => {
                env.pop(*len)?;
                env.push(Type::string())?;
            }
            Insn::ToString => {
                env.pop(2)?;
                env.push(Type::string())?;
            }
            Insn::ToRegexp { len } => {
                env.pop(*len)?;
                env.push(Type::instance(builtin::REGEXP))?;
            }
            Insn::Intern => {
                let ty = match env.pop_one()? {
                    Type::Literal {
                        lit: Lit::Str(s), ..
                    } => Type::symbol(&s),
                    _ => Type::Symbol(None),
                };
                env.push(ty)?;
            }
            Insn::GetSpecial { kind } => {
                let ty = match kind {
                    SpecialVar::LastLine | SpecialVar::BackRef | SpecialVar::NthRef => {
                        Type::string().join(&Type::nil())
                    }
                    SpecialVar::FlipFlop => Type::bool(),
                };
                env.push(ty)?;
            }
            Insn::SetSpecial => {
                env.pop_one()?;
            }
            Insn::Defined => {
                env.pop_one()?;
                env.push(Type::string().join(&Type::nil()))?;
            }

            Insn::Dup => {
                let top = env.top(0)?.clone();
                env.push(top)?;
            }
            Insn::DupN { n } => {
                let have = env.stack.len();
                if have < *n {
                    return Err(AnalysisError::StackUnderflow { need: *n, have });
                }
                let items = env.stack[have - n..].to_vec();
                env.push_all(items)?;
            }
            Insn::Pop => {
                env.pop_one()?;
            }
            Insn::Swap => {
                let pair = env.pop(2)?;
                env.push(pair[1].clone())?;
                env.push(pair[0].clone())?;
            }
            Insn::Reverse { n } => {
                let mut items = env.pop(*n)?;
                items.reverse();
                env.push_all(items)?;
            }
            Insn::SetN { n } => {
                let top = env.top(0)?.clone();
                env.set_top(*n, top)?;
            }
            Insn::TopN { n } => {
                let ty = env.top(*n)?.clone();
                env.push(ty)?;
            }
            Insn::AdjustStack { n } => {
                env.pop(*n)?;
            }

            Insn::CheckMatch { .. } => {
                env.pop(2)?;
                env.push(Type::bool())?;
            }
            Insn::CheckKeyword => env.push(Type::bool())?,
            Insn::CheckType { tag } => {
                let value = env.pop_one()?;
                env.push(check_type(*tag, &value))?;
            }
            Insn::ConcatArray => {
                let parts = env.pop(2)?;
                let elem = self
                    .squash_elements(&parts[0], &env, ep)?
                    .join(&self.squash_elements(&parts[1], &env, ep)?);
                let ty = Type::array_of(elem);
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::ExpandArray { num, flag } => {
                self.expand_array(ep, env, *num, *flag)?;
                return Ok(Flow::Done);
            }

            Insn::GetLocal { idx, level } => {
                let ty = if *level == 0 {
                    env.get_local(*idx)?.clone()
                } else {
                    self.outer_local(ep, *idx, *level)?
                };
                env.push(ty)?;
            }
            Insn::SetLocal { idx, level } => {
                let ty = env.pop_one()?;
                if *level == 0 {
                    env.local_update(*idx, ty)?;
                } else {
                    self.set_outer_local(ep, *idx, *level, ty)?;
                }
            }
            Insn::GetInstanceVariable { name } => {
                self.read_ivar(ep, env, name)?;
                return Ok(Flow::Done);
            }
            Insn::SetInstanceVariable { name } => {
                let ty = env.pop_one()?;
                let ty = self.globalize_in(&ty, &env, ep)?;
                let recv = env.static_env.recv.clone();
                self.write_ivar(&recv, name, &ty)?;
            }
            Insn::GetClassVariable { name } => {
                self.read_cvar(ep, env, name)?;
                return Ok(Flow::Done);
            }
            Insn::SetClassVariable { name } => {
                let ty = env.pop_one()?;
                let ty = self.globalize_in(&ty, &env, ep)?;
                self.write_cvar(ep, name, &ty)?;
            }
            Insn::GetGlobal { name } => {
                self.read_gvar(ep, env, name)?;
                return Ok(Flow::Done);
            }
            Insn::SetGlobal { name } => {
                let ty = env.pop_one()?;
                let ty = self.globalize_in(&ty, &env, ep)?;
                self.write_gvar(name, &ty)?;
            }
            Insn::GetConstant { name } => {
                let operands = env.pop(2)?;
                let ty = self.lookup_constant(ep, &operands[0], name)?;
                let (nenv, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env = nenv;
                env.push(ty)?;
            }
            Insn::SetConstant { name } => {
                let operands = env.pop(2)?;
                let ty = self.globalize_in(&operands[0], &env, ep)?;
                match &operands[1] {
                    Type::Class(klass) => {
                        if self.registry.add_constant(*klass, name, ty) {
                            self.warning(ep, DiagnosticReason::ConstantRedefined(name.clone()));
                        }
                    }
                    Type::Any => {}
                    other => {
                        let shown = self.screen(other);
                        self.warning(
                            ep,
                            DiagnosticReason::Other(format!("constant {} set on a non-class: {}", name, shown)),
                        );
                    }
                }
            }

            Insn::DefineMethod { mid, iseq } => self.define_iseq_method(ep, &env, mid, *iseq)?,
            Insn::DefineSMethod { mid, iseq } => {
                let recv = env.pop_one()?;
                self.define_singleton_iseq_method(ep, &env, &recv, mid, *iseq)?;
            }
            Insn::DefineClass { name, iseq, kind } => {
                self.define_class(ep, env, name, *iseq, *kind)?;
                return Ok(Flow::Done);
            }
            Insn::Once { iseq } => {
                self.run_once(ep, env, *iseq)?;
                return Ok(Flow::Done);
            }

            Insn::Send { call } => {
                self.send(ep, env, call, Continuation::Push)?;
                return Ok(Flow::Done);
            }
            Insn::InvokeSuper { call } => {
                self.invoke_super(ep, env, call)?;
                return Ok(Flow::Done);
            }
            Insn::InvokeBlock { call } => {
                self.invoke_yield(ep, env, call)?;
                return Ok(Flow::Done);
            }
            Insn::Leave => {
                if env.stack.len() != 1 {
                    return Err(AnalysisError::LeaveStackDepth(env.stack.len()));
                }
                let ty = env.pop_one()?;
                let ty = self.globalize_in(&ty, &env, ep)?;
                self.add_return_value(point.ctx, ty)?;
                return Ok(Flow::Done);
            }
            Insn::Throw { kind } => {
                self.throw(ep, point, env, *kind)?;
                return Ok(Flow::Done);
            }
            Insn::Branch { kind, target } => {
                let cond = env.pop_one()?;
                let (jump, fall) = branch_directions(*kind, &cond);
                if jump {
                    let to = self.jump_ep(ep, *target)?;
                    self.merge_env(to, env.clone())?;
                }
                if !fall {
                    return Ok(Flow::Done);
                }
            }
            Insn::Jump { target } => {
                let to = self.jump_ep(ep, *target)?;
                self.merge_env(to, env)?;
                return Ok(Flow::Done);
            }

            Insn::SendBranch { call, kind, target } => {
                let ctn = Continuation::Branch {
                    kind: *kind,
                    target: *target,
                    narrow: None,
                };
                self.send(ep, env, call, ctn)?;
                return Ok(Flow::Done);
            }
            Insn::GetLocalSendBranch {
                idx,
                call,
                kind,
                target,
            } => {
                let args = env.pop(call.stack_args())?;
                let recv = env.pop_one()?;
                let children = if recv.is_bottom() {
                    vec![Type::Any]
                } else {
                    recv.children()
                };
                for child in children {
                    let mut cenv = env.clone();
                    cenv.push(child.clone())?;
                    cenv.push_all(args.iter().cloned())?;
                    let ctn = Continuation::Branch {
                        kind: *kind,
                        target: *target,
                        narrow: Some((*idx, child)),
                    };
                    self.send(ep, cenv, call, ctn)?;
                }
                return Ok(Flow::Done);
            }
            Insn::GetLocalBranch { idx, kind, target } => {
                let ty = env.get_local(*idx)?.clone();
                let split = split_for_branch(*kind, &ty);
                return self.narrowed_branch(ep, env, *idx, *target, split.jump, split.fall, false);
            }
            Insn::GetLocalDupBranch { idx, kind, target } => {
                let ty = env.get_local(*idx)?.clone();
                let split = split_for_branch(*kind, &ty);
                return self.narrowed_branch(ep, env, *idx, *target, split.jump, split.fall, true);
            }
            Insn::DupBranch { kind, target } => {
                let ty = env.top(0)?.clone();
                let split = split_for_branch(*kind, &ty);
                if !split.jump.is_bottom() {
                    let mut jenv = env.clone();
                    jenv.set_top(0, split.jump)?;
                    let to = self.jump_ep(ep, *target)?;
                    self.merge_env(to, jenv)?;
                }
                if split.fall.is_bottom() {
                    return Ok(Flow::Done);
                }
                env.set_top(0, split.fall)?;
            }
            Insn::GetLocalCheckMatchBranch { idx, kind, target } => {
                let pattern = env.pop_one()?;
                let ty = env.get_local(*idx)?.clone();
                let split = split_by_class(&ty, &pattern);
                let (jump, fall) = match kind {
                    BranchKind::If => (split.jump, split.fall),
                    BranchKind::Unless => (split.fall, split.jump),
                    BranchKind::Nil => (Type::Bottom, ty),
                };
                return self.narrowed_branch(ep, env, *idx, *target, jump, fall, false);
            }
        }
        Ok(Flow::Next(env))
    }

    /// Continues both sides of a branch on a local, each with the local narrowed
    /// to its part. An empty part means the side is dead.
    #[allow(clippy::too_many_arguments)]
    fn narrowed_branch(
        &mut self,
        ep: EpId,
        env: Env,
        idx: usize,
        target: usize,
        jump: Type,
        fall: Type,
        push: bool,
    ) -> Result<Flow, AnalysisError> {
        if !jump.is_bottom() {
            let mut jenv = env.clone();
            jenv.local_update(idx, jump.clone())?;
            if push {
                jenv.push(jump)?;
            }
            let to = self.jump_ep(ep, target)?;
            self.merge_env(to, jenv)?;
        }
        if fall.is_bottom() {
            return Ok(Flow::Done);
        }
        let mut fenv = env;
        fenv.local_update(idx, fall.clone())?;
        if push {
            fenv.push(fall)?;
        }
        Ok(Flow::Next(fenv))
    }

    /// `self` as pushed by `putself`: instances of generic classes get fresh,
    /// untyped elements.
    fn fresh_self(&self, recv: &Type) -> Type {
        let Type::Instance { klass, .. } = recv else {
            return recv.clone();
        };
        match self.registry.empty_container(*klass) {
            Some(Type::Container(c)) => {
                let elems = match &c.elems {
                    Elements::Cell(cell) => Elements::Cell(CellElems {
                        elems: vec![Type::Any; cell.elems.len()],
                    }),
                    other => Elements::dummy(other.kind()),
                };
                Type::container(c.base, elems)
            }
            _ => recv.clone(),
        }
    }

    fn record_signature(&mut self, ep: EpId, point: ExecutionPoint, env: &Env) -> Result<(), AnalysisError> {
        if !self.method_ctxs.contains_key(&point.ctx) {
            return Ok(());
        }
        let Some((iseq_id, _, _)) = self.iseq_ctx(point.ctx)? else {
            return Ok(());
        };
        let program = self.program;
        let params = &program.iseq(iseq_id)?.params;
        let local = |idx: usize| -> Result<Type, AnalysisError> {
            match env.locals.get(idx) {
                Some(ty) => self.globalize_in(ty, env, ep),
                None => Ok(Type::Any),
            }
        };

        let lead = (0..params.lead_num).map(local).collect::<Result<Vec<_>, _>>()?;
        let opt = (params.lead_num..params.lead_num + params.opt_num())
            .map(local)
            .collect::<Result<Vec<_>, _>>()?;
        let rest = match params.rest_start {
            Some(idx) => Some(splat_elem(&local(idx)?)),
            None => None,
        };
        let post = match params.post_start {
            Some(start) => (start..start + params.post_num)
                .map(local)
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let keywords = match &params.keyword {
            Some(shape) => {
                let mut kws = Vec::new();
                for (i, name) in shape.required.iter().enumerate() {
                    kws.push((true, name.clone(), local(shape.start + i)?));
                }
                for (i, kw) in shape.optional.iter().enumerate() {
                    let mut ty = local(shape.start + shape.required.len() + i)?;
                    if let Some(default) = &kw.default {
                        ty = ty.join(&Type::from_literal(default).without_literal());
                    }
                    kws.push((false, kw.name.clone(), ty));
                }
                Some(kws)
            }
            None => None,
        };
        let kw_rest = match params.kwrest {
            Some(idx) => Some(local(idx)?),
            None => None,
        };
        let blk = match params.block_start {
            Some(idx) => local(idx)?,
            None => env.static_env.blk.clone(),
        };
        let sig = MethodSignature {
            lead,
            opt,
            rest,
            post,
            keywords,
            kw_rest,
            blk,
        };
        let merged = match self.method_signatures.get(&point.ctx) {
            Some(old) => old.merge(&sig),
            None => sig,
        };
        self.method_signatures.insert(point.ctx, merged);
        Ok(())
    }

    /// The `level`-th enclosing activation of `ep`.
    fn enclosing(&self, ep: EpId, level: usize) -> Result<EpId, AnalysisError> {
        let mut cur = ep;
        for _ in 0..level {
            cur = self.point(cur)?.outer.ok_or_else(|| {
                AnalysisError::InvalidProgram(format!("local access {} scopes out of nesting", level))
            })?;
        }
        Ok(cur)
    }

    fn outer_local(&self, ep: EpId, idx: usize, level: usize) -> Result<Type, AnalysisError> {
        let outer = self.enclosing(ep, level)?;
        Ok(self
            .return_envs
            .get(&outer)
            .and_then(|env| env.locals.get(idx).cloned())
            .unwrap_or(Type::Any))
    }

    /// Writes are joined into the saved state of the enclosing activation: the
    /// block may or may not have run when the creator resumes.
    fn set_outer_local(&mut self, ep: EpId, idx: usize, level: usize, ty: Type) -> Result<(), AnalysisError> {
        let outer = self.enclosing(ep, level)?;
        if let Some(saved) = self.return_envs.get(&outer) {
            let mut updated = saved.clone();
            updated.local_update(idx, ty)?;
            let merged = saved.merge(&updated)?;
            self.return_envs.insert(outer, merged);
        }
        Ok(())
    }

    fn expand_array(&mut self, ep: EpId, mut env: Env, num: usize, flag: u32) -> Result<(), AnalysisError> {
        let splat = flag & 1 == 1;
        let from_head = flag & 2 == 0;
        let ary = env.pop_one()?;
        for child in ary.children() {
            let elems = match &child {
                Type::Local {
                    kind: ContainerKind::Array,
                    site,
                    ..
                } => match self.container_elems(&env, ep, site)? {
                    Some(Elements::Array(a)) => a,
                    _ => ArrayElems::new(Vec::new(), Type::Any),
                },
                Type::Any => ArrayElems::new(Vec::new(), Type::Any),
                other => ArrayElems::new(vec![other.clone()], Type::Bottom),
            };
            self.push_expanded(ep, env.clone(), &elems, num, splat, from_head)?;
        }
        Ok(())
    }

    fn push_expanded(
        &mut self,
        ep: EpId,
        mut env: Env,
        elems: &ArrayElems,
        num: usize,
        splat: bool,
        from_head: bool,
    ) -> Result<(), AnalysisError> {
        let site = AllocationSite::new(ep);
        if from_head {
            let (lead, rest) = elems.take_first(num);
            if splat {
                let ary = Type::container(builtin::ARRAY, Elements::Array(rest));
                let (nenv, ty) = self.localize_in(&ary, env, ep, site.add(SiteKey::Rest))?;
                env = nenv;
                env.push(ty)?;
            }
            for (i, ty) in lead.iter().enumerate().rev() {
                let (nenv, ty) = self.localize_in(ty, env, ep, site.add_index(i))?;
                env = nenv;
                env.push(ty)?;
            }
        } else {
            let (rest, following) = elems.take_last(num);
            for (i, ty) in following.iter().enumerate() {
                let (nenv, ty) = self.localize_in(ty, env, ep, site.add_index(i))?;
                env = nenv;
                env.push(ty)?;
            }
            if splat {
                let ary = Type::container(builtin::ARRAY, Elements::Array(rest));
                let (nenv, ty) = self.localize_in(&ary, env, ep, site.add(SiteKey::Rest))?;
                env = nenv;
                env.push(ty)?;
            }
        }
        let next = self.next_ep(ep)?;
        self.merge_env(next, env)
    }

    fn lookup_constant(&mut self, ep: EpId, cbase: &Type, name: &str) -> Result<Type, AnalysisError> {
        let found = match cbase {
            Type::Class(klass) => self.registry.search_constant(&[*klass], name),
            ty if ty.is_nil() => {
                let scopes = self.lexical_scopes(ep)?;
                self.registry.search_constant(&scopes, name)
            }
            _ => return Ok(Type::Any),
        };
        Ok(found.unwrap_or_else(|| {
            self.error(ep, DiagnosticReason::UninitializedConstant(name.to_string()));
            Type::Any
        }))
    }

    fn define_iseq_method(&mut self, ep: EpId, env: &Env, mid: &str, body: IseqId) -> Result<(), AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        let Some((_, cref_id, _)) = self.iseq_ctx(ctx)? else {
            return Ok(());
        };
        let cref = self.cref(cref_id)?;
        let Some(klass) = cref.klass else {
            return Ok(());
        };
        let kind = MethodKind::ISeq {
            iseq: body,
            cref: cref_id,
            outer: None,
        };
        if cref.singleton {
            self.registry
                .add_method(klass, true, mid, MethodDef::new(kind, true, klass, true));
        } else {
            let public = env.static_env.pub_meth;
            self.registry
                .add_method(klass, false, mid, MethodDef::new(kind.clone(), public, klass, false));
            if env.static_env.mod_func {
                self.registry
                    .add_method(klass, true, mid, MethodDef::new(kind, true, klass, true));
            }
        }
        let key = MethodKey {
            klass,
            singleton: cref.singleton,
            mid: mid.to_string(),
        };
        self.pend_method_execution(body, key, cref_id, None)
    }

    fn define_singleton_iseq_method(
        &mut self,
        ep: EpId,
        env: &Env,
        recv: &Type,
        mid: &str,
        body: IseqId,
    ) -> Result<(), AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        let Some((_, cref, _)) = self.iseq_ctx(ctx)? else {
            return Ok(());
        };
        for child in recv.children() {
            match child {
                Type::Class(klass) => {
                    let kind = MethodKind::ISeq {
                        iseq: body,
                        cref,
                        outer: None,
                    };
                    let def = MethodDef::new(kind, env.static_env.pub_meth, klass, true);
                    self.registry.add_method(klass, true, mid, def);
                    let key = MethodKey {
                        klass,
                        singleton: true,
                        mid: mid.to_string(),
                    };
                    self.pend_method_execution(body, key, cref, None)?;
                }
                Type::Any => {}
                other => {
                    let shown = self.screen(&other);
                    self.warning(ep, DiagnosticReason::SingletonOfNonClass(shown));
                }
            }
        }
        Ok(())
    }

    fn resolve_superclass(&mut self, ep: EpId, superclass: &Type) -> ClassId {
        match superclass {
            Type::Class(klass) => *klass,
            ty if ty.is_nil() => builtin::OBJECT,
            Type::Any => {
                self.warning(ep, DiagnosticReason::SuperclassIsAny);
                builtin::OBJECT
            }
            Type::Instance { .. } | Type::Literal { .. } | Type::Local { .. } => {
                let shown = self.screen(&superclass.without_literal());
                self.warning(ep, DiagnosticReason::SuperclassIsInstance(shown));
                builtin::OBJECT
            }
            other => {
                let shown = self.screen(other);
                self.warning(ep, DiagnosticReason::SuperclassNotClass(shown));
                builtin::OBJECT
            }
        }
    }

    fn define_class(
        &mut self,
        ep: EpId,
        mut env: Env,
        name: &str,
        body: IseqId,
        kind: ClassDefKind,
    ) -> Result<(), AnalysisError> {
        let operands = env.pop(2)?;
        let (cbase, superclass) = (&operands[0], &operands[1]);
        let (klass, singleton) = match kind {
            ClassDefKind::Class | ClassDefKind::Module => match cbase {
                Type::Class(base) => match self.registry.get_constant(*base, name) {
                    Some(Type::Class(existing)) => (Some(existing), false),
                    _ => {
                        let (superclass, ckind) = match kind {
                            ClassDefKind::Module => (None, ClassKind::Module),
                            _ => (Some(self.resolve_superclass(ep, superclass)), ClassKind::Class),
                        };
                        let klass = self.registry.new_class(Some(*base), name, superclass, ckind);
                        debug!(class = %self.registry.path(klass), "defined class");
                        (Some(klass), false)
                    }
                },
                _ => (None, false),
            },
            ClassDefKind::SingletonClass => match cbase {
                Type::Class(klass) => (Some(*klass), true),
                Type::Any => (None, true),
                other => {
                    let shown = self.screen(other);
                    self.warning(ep, DiagnosticReason::SingletonOfNonClass(shown));
                    (None, true)
                }
            },
        };

        let ctx = self.point(ep)?.ctx;
        let Some((_, outer_cref, _)) = self.iseq_ctx(ctx)? else {
            return Ok(());
        };
        let cref = self.intern_cref(CRef {
            outer: Some(outer_cref),
            klass,
            singleton,
        });
        let recv = match klass {
            Some(klass) if !singleton => Type::Class(klass),
            _ => Type::Any,
        };
        let program = self.program;
        let iseq = program.iseq(body)?;
        let nctx = self.intern_ctx(Context::ISeq {
            iseq: body,
            cref,
            mid: None,
        });
        let nep = self.intern_ep(ExecutionPoint::new(nctx, 0, None));
        let nenv = Env::new(
            StaticEnv::new(recv, env.static_env.blk.clone()),
            vec![Type::nil(); iseq.locals.len()],
        );
        self.merge_env(nep, nenv)?;
        self.add_callsite(nctx, ep, env, Continuation::Push)
    }

    fn run_once(&mut self, ep: EpId, env: Env, body: IseqId) -> Result<(), AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        let Some((_, cref, mid)) = self.iseq_ctx(ctx)? else {
            return Ok(());
        };
        let program = self.program;
        let iseq = program.iseq(body)?;
        let nctx = self.intern_ctx(Context::ISeq {
            iseq: body,
            cref,
            mid,
        });
        let nep = self.intern_ep(ExecutionPoint::new(nctx, 0, Some(ep)));
        let nenv = Env::new(env.static_env.clone(), vec![Type::nil(); iseq.locals.len()]);
        self.merge_env(nep, nenv)?;
        self.add_callsite(nctx, ep, env, Continuation::Push)
    }

    fn throw(&mut self, ep: EpId, point: ExecutionPoint, mut env: Env, kind: ThrowKind) -> Result<(), AnalysisError> {
        let ty = env.pop_one()?;
        match kind {
            ThrowKind::None => Ok(()),
            ThrowKind::Return => {
                let ty = self.globalize_in(&ty, &env, ep)?;
                let top = self.outermost(ep)?;
                let ctx = self.point(top)?.ctx;
                self.add_return_value(ctx, ty)
            }
            ThrowKind::Break => self.throw_break(ep, env, ty),
            ThrowKind::Next | ThrowKind::Redo | ThrowKind::Retry => {
                let Some(outer) = point.outer else {
                    return Ok(());
                };
                let catch = match kind {
                    ThrowKind::Next => CatchKind::Next,
                    ThrowKind::Redo => CatchKind::Redo,
                    _ => CatchKind::Retry,
                };
                let outer_point = self.point(outer)?;
                let Some((outer_iseq, _, _)) = self.iseq_ctx(outer_point.ctx)? else {
                    return Ok(());
                };
                let program = self.program;
                let oiseq = program.iseq(outer_iseq)?;
                let entry = oiseq
                    .catch_entries_at(outer_point.pc)
                    .find(|e| e.kind == catch)
                    .map(|e| (e.cont, e.stack_depth));
                match entry {
                    Some((cont, depth)) => {
                        let Some(mut nenv) = self.return_envs.get(&outer).cloned() else {
                            return Ok(());
                        };
                        nenv.truncate_stack(depth);
                        if kind == ThrowKind::Next {
                            nenv.push(ty)?;
                        }
                        let to = self.jump_ep(outer, cont)?;
                        self.merge_env(to, nenv)
                    }
                    // `next` out of a rescue body nested in a block ends the block.
                    None if kind == ThrowKind::Next && oiseq.kind == IseqKind::Block => {
                        let ty = self.globalize_in(&ty, &env, ep)?;
                        self.add_return_value(outer_point.ctx, ty)
                    }
                    None => Ok(()),
                }
            }
        }
    }

    fn throw_break(&mut self, ep: EpId, env: Env, ty: Type) -> Result<(), AnalysisError> {
        let program = self.program;
        let mut cur = ep;
        for _ in 0..=self.eps.len() {
            let point = self.point(cur)?;
            let Some((iseq_id, _, _)) = self.iseq_ctx(point.ctx)? else {
                return Ok(());
            };
            let iseq = program.iseq(iseq_id)?;
            if iseq.kind == IseqKind::Block {
                // Leaves the method that yielded: continue after the block's send.
                let Some(outer) = point.outer else {
                    return Ok(());
                };
                let Some(mut nenv) = self.return_envs.get(&outer).cloned() else {
                    return Ok(());
                };
                nenv.push(ty)?;
                let next = self.next_ep(outer)?;
                return self.merge_env(next, nenv);
            }
            let entry = iseq
                .catch_entries_at(point.pc)
                .find(|e| e.kind == CatchKind::Break)
                .map(|e| (e.cont, e.stack_depth));
            if let Some((cont, depth)) = entry {
                let saved = if cur == ep {
                    Some(env.clone())
                } else {
                    self.return_envs.get(&cur).cloned()
                };
                let Some(mut nenv) = saved else {
                    return Ok(());
                };
                nenv.truncate_stack(depth);
                nenv.push(ty)?;
                let to = self.jump_ep(cur, cont)?;
                return self.merge_env(to, nenv);
            }
            match point.outer {
                Some(outer) => cur = outer,
                None => return Ok(()),
            }
        }
        Ok(())
    }
}

/// `checktype` with an exact answer where the class is known.
fn check_type(tag: u8, value: &Type) -> Type {
    let expected: ClassId = match tag {
        5 => builtin::STRING,
        7 => builtin::ARRAY,
        8 => builtin::HASH,
        _ => return Type::bool(),
    };
    let mut seen_true = false;
    let mut seen_false = false;
    for child in value.children() {
        match child.base_instance() {
            Some(klass) if klass == expected => seen_true = true,
            Some(_) => seen_false = true,
            None => {
                seen_true = true;
                seen_false = true;
            }
        }
    }
    match (seen_true, seen_false) {
        (true, false) => Type::true_(),
        (false, true) => Type::false_(),
        _ => Type::bool(),
    }
}
