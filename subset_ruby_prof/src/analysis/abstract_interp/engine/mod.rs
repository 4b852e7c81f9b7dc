//! The fixpoint engine.
//!
//! Every reached execution point owns an [`Env`]. A step interprets the
//! instruction at one point and merges the outcome into its successors; a
//! successor whose stored env grows goes back on the worklist. Calls do not
//! inline the callee: the caller registers a [`Continuation`] at the callee's
//! context and is resumed from the env saved at the call point whenever the
//! callee's return type grows.
//!
//! # Module structure
//!
//! - `step`: instruction semantics
//! - `send`: argument setup, method dispatch and block invocation
//! - `builtins`: methods whose effect is hard-coded
//! - `containers`: moving container descriptions in and out of envs
//! - `variables`: instance, class and global variables
//! - `report`: the summary handed back to callers

mod builtins;
mod containers;
mod report;
mod send;
mod step;
mod variables;

#[cfg(test)]
mod tests;

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info, trace, warn};

use super::context::{CRef, CRefId, Context, CtxId, EpId, ExecutionPoint, Interner};
use super::env::{Env, StaticEnv};
use super::worklist::{PopOrder, Worklist};
use super::{branch_directions, exact_bool};
use crate::analysis::ipo::{CallSiteTable, Continuation};
use crate::analysis::lattice::{
    builtin, widen, AllocationSite, BlockSignature, ClassId, MethodSignature, Type,
};
use crate::analysis::registry::ClassRegistry;
use crate::cancel::{Budget, Exhaustion};
use crate::config::AnalysisConfig;
use crate::diagnostics::{Diagnostic, DiagnosticReason, DiagnosticSink, SourceLocation};
use crate::error::AnalysisError;
use crate::iseq::{IseqId, Program};

/// A method as seen by callers: where it is defined and under which name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct MethodKey {
    pub klass: ClassId,
    pub singleton: bool,
    pub mid: String,
}

/// A body that was defined but not yet reached through a call.
#[derive(Debug)]
enum Pending {
    Method {
        ep: EpId,
        env: Env,
        key: MethodKey,
    },
    /// Entry points of a block keyed by the point that created it.
    Block(BTreeMap<EpId, Env>),
}

#[derive(Debug)]
pub struct InferenceEngine<'a> {
    program: &'a Program,
    config: AnalysisConfig,
    registry: ClassRegistry,

    contexts: Interner<Context>,
    crefs: Interner<CRef>,
    eps: Interner<ExecutionPoint>,

    /// Stored state of every reached point. Entries only grow.
    ep2env: BTreeMap<EpId, Env>,
    worklist: Worklist,
    callsites: CallSiteTable,
    /// Caller state saved at each call point; continuations resume from it.
    return_envs: BTreeMap<EpId, Env>,
    return_values: BTreeMap<CtxId, Type>,

    method_signatures: BTreeMap<CtxId, MethodSignature>,
    block_signatures: BTreeMap<IseqId, BlockSignature>,
    block_ctxs: BTreeMap<IseqId, BTreeSet<CtxId>>,
    method_ctxs: BTreeMap<CtxId, BTreeSet<MethodKey>>,
    /// Containers read out of instance variables: element updates on them are
    /// written back to the variable.
    ivar_sites: BTreeMap<AllocationSite, (Type, String)>,

    pending: BTreeMap<IseqId, Pending>,
    executed_iseqs: BTreeSet<IseqId>,

    diagnostics: DiagnosticSink,
    revealed: BTreeMap<Option<SourceLocation>, Type>,
    budget: Budget,
    terminated: Option<Exhaustion>,
}

impl<'a> InferenceEngine<'a> {
    pub fn new(program: &'a Program, config: &AnalysisConfig) -> Self {
        Self {
            program,
            config: config.clone(),
            registry: ClassRegistry::new(),
            contexts: Interner::default(),
            crefs: Interner::default(),
            eps: Interner::default(),
            ep2env: BTreeMap::new(),
            worklist: Worklist::new(PopOrder::Forward),
            callsites: CallSiteTable::default(),
            return_envs: BTreeMap::new(),
            return_values: BTreeMap::new(),
            method_signatures: BTreeMap::new(),
            block_signatures: BTreeMap::new(),
            block_ctxs: BTreeMap::new(),
            method_ctxs: BTreeMap::new(),
            ivar_sites: BTreeMap::new(),
            pending: BTreeMap::new(),
            executed_iseqs: BTreeSet::new(),
            diagnostics: DiagnosticSink::default(),
            revealed: BTreeMap::new(),
            budget: Budget::new(config.max_iterations, config.max_seconds),
            terminated: None,
        }
    }

    /// Changes the order in which pending points are picked. The fixpoint does
    /// not depend on it.
    pub fn with_pop_order(mut self, order: PopOrder) -> Self {
        self.worklist = Worklist::new(order);
        self
    }

    /// Runs to the fixpoint, or until the budget is spent.
    ///
    /// On exhaustion the point that was about to be stepped stays queued, so
    /// the worklist still holds every point the partial result has not visited.
    ///
    /// Fails only on malformed streams; problems in the analyzed program end up
    /// in [`diagnostics`](Self::diagnostics).
    pub fn run(&mut self) -> Result<(), AnalysisError> {
        info!(
            iseqs = self.program.iseqs.len(),
            stub_execution = self.config.stub_execution,
            "starting analysis"
        );
        self.start()?;
        loop {
            while let Some(ep) = self.worklist.pop() {
                if let Some(reason) = self.budget.tick() {
                    warn!(
                        ?reason,
                        iterations = self.budget.iterations(),
                        "analysis stopped before reaching a fixpoint"
                    );
                    self.terminated = Some(reason);
                    let point = self.point(ep)?;
                    self.worklist.insert(point.ctx, point.pc, ep);
                    return Ok(());
                }
                self.step(ep)?;
            }
            if !self.config.stub_execution || !self.run_pending()? {
                break;
            }
        }
        info!(
            iterations = self.budget.iterations(),
            points = self.ep2env.len(),
            diagnostics = self.diagnostics.len(),
            "analysis reached a fixpoint"
        );
        Ok(())
    }

    pub fn terminated(&self) -> bool {
        self.terminated.is_some()
    }

    pub fn exhaustion(&self) -> Option<Exhaustion> {
        self.terminated
    }

    pub fn iterations(&self) -> u64 {
        self.budget.iterations()
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        self.diagnostics.items()
    }

    pub fn registry(&self) -> &ClassRegistry {
        &self.registry
    }

    /// Joined return type of every analyzed body of `klass#mid` (`klass.mid`
    /// when `singleton`). `None` if no body was analyzed.
    pub fn return_type_of(&self, klass: ClassId, singleton: bool, mid: &str) -> Option<Type> {
        let mut found = None;
        for ctx in self.method_ctxs_of(klass, singleton, mid) {
            let ret = self
                .return_values
                .get(&ctx)
                .cloned()
                .unwrap_or(Type::Bottom);
            found = Some(found.unwrap_or(Type::Bottom).join(&ret));
        }
        found
    }

    /// Merged parameter signature of `klass#mid` as observed at its body start.
    pub fn signature_of(&self, klass: ClassId, singleton: bool, mid: &str) -> Option<MethodSignature> {
        let mut found: Option<MethodSignature> = None;
        for ctx in self.method_ctxs_of(klass, singleton, mid) {
            if let Some(sig) = self.method_signatures.get(&ctx) {
                found = Some(match found {
                    Some(acc) => acc.merge(sig),
                    None => sig.clone(),
                });
            }
        }
        found
    }

    fn method_ctxs_of(&self, klass: ClassId, singleton: bool, mid: &str) -> Vec<CtxId> {
        self.method_ctxs
            .iter()
            .filter(|(_, keys)| {
                keys.iter()
                    .any(|k| k.klass == klass && k.singleton == singleton && k.mid == mid)
            })
            .map(|(ctx, _)| *ctx)
            .collect()
    }

    fn start(&mut self) -> Result<(), AnalysisError> {
        let main = self.program.main;
        let iseq = self.program.iseq(main)?;
        let cref = self.intern_cref(CRef {
            outer: None,
            klass: Some(builtin::OBJECT),
            singleton: false,
        });
        let ctx = self.intern_ctx(Context::ISeq {
            iseq: main,
            cref,
            mid: None,
        });
        let ep = self.intern_ep(ExecutionPoint::new(ctx, 0, None));
        let mut static_env = StaticEnv::new(Type::instance(builtin::OBJECT), Type::nil());
        static_env.pub_meth = false;
        let env = Env::new(static_env, vec![Type::nil(); iseq.locals.len()]);
        self.executed_iseqs.insert(main);
        self.merge_env(ep, env)
    }

    /// Starts one body that no call reached. Returns false when none is left.
    fn run_pending(&mut self) -> Result<bool, AnalysisError> {
        while let Some((iseq, pending)) = self.pending.pop_first() {
            if self.executed_iseqs.contains(&iseq) {
                continue;
            }
            debug!(iseq = iseq.0, "stub-executing a body no call reached");
            self.executed_iseqs.insert(iseq);
            match pending {
                Pending::Method { ep, env, key } => {
                    let ctx = self.point(ep)?.ctx;
                    self.method_ctxs.entry(ctx).or_default().insert(key);
                    self.merge_env(ep, env)?;
                }
                Pending::Block(entries) => {
                    for (ep, env) in entries {
                        self.merge_env(ep, env)?;
                    }
                }
            }
            return Ok(true);
        }
        Ok(false)
    }

    fn pend_method_execution(
        &mut self,
        body: IseqId,
        key: MethodKey,
        cref: CRefId,
        outer: Option<EpId>,
    ) -> Result<(), AnalysisError> {
        if self.executed_iseqs.contains(&body) || self.pending.contains_key(&body) {
            return Ok(());
        }
        let program = self.program;
        let iseq = program.iseq(body)?;
        let ctx = self.intern_ctx(Context::ISeq {
            iseq: body,
            cref,
            mid: Some(key.mid.clone()),
        });
        let ep = self.intern_ep(ExecutionPoint::new(ctx, 0, outer));
        let recv = if key.singleton {
            Type::Class(key.klass)
        } else {
            Type::instance(key.klass)
        };
        let env = Env::new(
            StaticEnv::new(recv, Type::nil()),
            send::stub_locals(&iseq.params, iseq.locals.len()),
        );
        self.pending.insert(body, Pending::Method { ep, env, key });
        Ok(())
    }

    fn pend_block_execution(&mut self, body: IseqId, ep: EpId, env: Env) -> Result<(), AnalysisError> {
        if self.executed_iseqs.contains(&body) {
            return Ok(());
        }
        match self.pending.entry(body).or_insert_with(|| Pending::Block(BTreeMap::new())) {
            Pending::Block(entries) => {
                let merged = match entries.get(&ep) {
                    Some(old) => old.merge(&env)?,
                    None => env,
                };
                entries.insert(ep, merged);
            }
            Pending::Method { .. } => {}
        }
        Ok(())
    }

    // ---- interning and lookups ----

    fn intern_ctx(&mut self, ctx: Context) -> CtxId {
        CtxId(self.contexts.intern(ctx))
    }

    fn intern_cref(&mut self, cref: CRef) -> CRefId {
        CRefId(self.crefs.intern(cref))
    }

    fn intern_ep(&mut self, point: ExecutionPoint) -> EpId {
        EpId(self.eps.intern(point))
    }

    fn point(&self, ep: EpId) -> Result<ExecutionPoint, AnalysisError> {
        self.eps
            .get(ep.0)
            .copied()
            .ok_or_else(|| AnalysisError::InvalidProgram(format!("unknown execution point #{}", ep.0)))
    }

    fn context(&self, ctx: CtxId) -> Result<Context, AnalysisError> {
        self.contexts
            .get(ctx.0)
            .cloned()
            .ok_or_else(|| AnalysisError::InvalidProgram(format!("unknown context #{}", ctx.0)))
    }

    fn cref(&self, cref: CRefId) -> Result<CRef, AnalysisError> {
        self.crefs
            .get(cref.0)
            .cloned()
            .ok_or_else(|| AnalysisError::InvalidProgram(format!("unknown lexical scope #{}", cref.0)))
    }

    fn next_ep(&mut self, ep: EpId) -> Result<EpId, AnalysisError> {
        let point = self.point(ep)?;
        Ok(self.intern_ep(point.next()))
    }

    fn jump_ep(&mut self, ep: EpId, pc: usize) -> Result<EpId, AnalysisError> {
        let point = self.point(ep)?;
        Ok(self.intern_ep(point.jump(pc)))
    }

    /// The point of the method (or top-level) activation enclosing `ep`.
    fn outermost(&self, ep: EpId) -> Result<EpId, AnalysisError> {
        let mut cur = ep;
        let mut hops = 0usize;
        while let Some(outer) = self.point(cur)?.outer {
            cur = outer;
            hops += 1;
            if hops > self.eps.len() {
                return Err(AnalysisError::InvalidProgram(
                    "cyclic chain of enclosing scopes".to_string(),
                ));
            }
        }
        Ok(cur)
    }

    /// Stream, lexical scope and method name of an instruction-stream context.
    fn iseq_ctx(&self, ctx: CtxId) -> Result<Option<(IseqId, CRefId, Option<String>)>, AnalysisError> {
        Ok(match self.context(ctx)? {
            Context::ISeq { iseq, cref, mid } => Some((iseq, cref, mid)),
            Context::Typed { .. } => None,
        })
    }

    /// Class of the innermost lexical scope of `ep`.
    fn cref_class(&self, ep: EpId) -> Result<Option<ClassId>, AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        match self.iseq_ctx(ctx)? {
            Some((_, cref, _)) => Ok(self.cref(cref)?.klass),
            None => Ok(None),
        }
    }

    /// Lexical scopes of `ep`, innermost first.
    fn lexical_scopes(&self, ep: EpId) -> Result<Vec<ClassId>, AnalysisError> {
        let ctx = self.point(ep)?.ctx;
        let mut scopes = Vec::new();
        let mut cursor = self.iseq_ctx(ctx)?.map(|(_, cref, _)| cref);
        while let Some(id) = cursor {
            let cref = self.cref(id)?;
            if let Some(klass) = cref.klass {
                if !scopes.contains(&klass) {
                    scopes.push(klass);
                }
            }
            cursor = cref.outer;
        }
        Ok(scopes)
    }

    fn widen(&self, ty: &Type) -> Type {
        widen(&self.registry, ty, self.config.union_width_limit)
    }

    fn screen(&self, ty: &Type) -> String {
        self.registry.screen_name(ty, self.config.show_untyped)
    }

    // ---- state propagation ----

    /// Joins `env` into the stored env of `ep` and queues the point if it grew.
    fn merge_env(&mut self, ep: EpId, env: Env) -> Result<(), AnalysisError> {
        let env = match self.ep2env.get(&ep) {
            Some(old) => {
                let merged = self.widen_env(old.merge(&env)?);
                if merged == *old {
                    return Ok(());
                }
                merged
            }
            None => self.widen_env(env),
        };
        self.ep2env.insert(ep, env);
        let point = self.point(ep)?;
        self.worklist.insert(point.ctx, point.pc, ep);
        Ok(())
    }

    fn widen_env(&self, mut env: Env) -> Env {
        for slot in env.locals.iter_mut().chain(env.stack.iter_mut()) {
            *slot = self.widen(slot);
        }
        env
    }

    fn merge_return_env(&mut self, ep: EpId, env: Env) -> Result<(), AnalysisError> {
        let merged = match self.return_envs.get(&ep) {
            Some(old) => old.merge(&env)?,
            None => env,
        };
        self.return_envs.insert(ep, merged);
        Ok(())
    }

    fn return_env(&self, ep: EpId) -> Result<Env, AnalysisError> {
        self.return_envs.get(&ep).cloned().ok_or_else(|| {
            AnalysisError::InvalidProgram(format!("no saved caller state at point #{}", ep.0))
        })
    }

    /// Registers `caller` at `callee`. If the callee already returns something,
    /// the caller is resumed right away.
    fn add_callsite(
        &mut self,
        callee: CtxId,
        caller: EpId,
        caller_env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        if let Some(iseq) = self.context(callee)?.iseq() {
            self.executed_iseqs.insert(iseq);
        }
        self.callsites.add(callee, caller, ctn.clone());
        self.merge_return_env(caller, caller_env)?;
        let ret = self
            .return_values
            .get(&callee)
            .cloned()
            .unwrap_or(Type::Bottom);
        if !ret.is_bottom() {
            let env = self.return_env(caller)?;
            self.fire(&ctn, ret, caller, env)?;
        }
        Ok(())
    }

    /// Joins `ty` into the return type of `ctx` and resumes every caller if it grew.
    fn add_return_value(&mut self, ctx: CtxId, ty: Type) -> Result<(), AnalysisError> {
        let old = self
            .return_values
            .get(&ctx)
            .cloned()
            .unwrap_or(Type::Bottom);
        let new = self.widen(&old.join(&ty));
        if new == old {
            return Ok(());
        }
        trace!(ctx = ctx.0, "return type grew");
        self.return_values.insert(ctx, new.clone());
        for (caller, ctn) in self.callsites.callers(ctx) {
            let env = self.return_env(caller)?;
            self.fire(&ctn, new.clone(), caller, env)?;
        }
        Ok(())
    }

    /// Delivers `ty` to a caller at `ep` whose saved state is `env`.
    fn fire(&mut self, ctn: &Continuation, ty: Type, ep: EpId, env: Env) -> Result<(), AnalysisError> {
        match ctn {
            Continuation::Push => {
                let (mut env, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env.push(ty)?;
                let next = self.next_ep(ep)?;
                self.merge_env(next, env)
            }
            Continuation::PushJump { pc } => {
                let (mut env, ty) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                env.push(ty)?;
                let to = self.jump_ep(ep, *pc)?;
                self.merge_env(to, env)
            }
            Continuation::Branch {
                kind,
                target,
                narrow,
            } => {
                let (jump, fall) = branch_directions(*kind, &ty);
                let narrow = narrow.as_ref().filter(|_| exact_bool(&ty).is_some());
                if jump {
                    let mut env = env.clone();
                    if let Some((idx, part)) = narrow {
                        env.local_update(*idx, part.clone())?;
                    }
                    let to = self.jump_ep(ep, *target)?;
                    self.merge_env(to, env)?;
                }
                if fall {
                    let mut env = env;
                    if let Some((idx, part)) = narrow {
                        env.local_update(*idx, part.clone())?;
                    }
                    let to = self.next_ep(ep)?;
                    self.merge_env(to, env)?;
                }
                Ok(())
            }
            Continuation::Replace { with, then } => self.fire(then, with.clone(), ep, env),
            Continuation::Discard => Ok(()),
            Continuation::IvarPush { recv, name } => {
                let (mut env, local) = self.localize_in(&ty, env, ep, AllocationSite::new(ep))?;
                for child in local.children() {
                    if let Type::Local { site, .. } = child {
                        self.ivar_sites.insert(site, (recv.clone(), name.clone()));
                    }
                }
                env.push(local)?;
                let next = self.next_ep(ep)?;
                self.merge_env(next, env)
            }
            Continuation::TypedBlockReturn(tbr) => self.typed_block_return(tbr, &ty),
        }
    }

    // ---- diagnostics ----

    fn error(&mut self, ep: EpId, reason: DiagnosticReason) {
        self.report_diagnostic(ep, Diagnostic::error(reason));
    }

    fn warning(&mut self, ep: EpId, reason: DiagnosticReason) {
        self.report_diagnostic(ep, Diagnostic::warning(reason));
    }

    fn report_diagnostic(&mut self, ep: EpId, diagnostic: Diagnostic) {
        let mut diagnostic = diagnostic.with_location(self.location(ep));
        if let Some(label) = self.method_label(ep) {
            diagnostic = diagnostic.with_context(label);
        }
        debug!(message = %diagnostic.message(), "diagnostic");
        self.diagnostics.emit(diagnostic);
    }

    /// Source position of `ep`. Stand-in points of typed calls report their caller.
    fn location(&self, ep: EpId) -> Option<SourceLocation> {
        let mut cur = ep;
        for _ in 0..=self.eps.len() {
            let point = self.point(cur).ok()?;
            match self.context(point.ctx).ok()? {
                Context::ISeq { iseq, .. } => {
                    let iseq = self.program.iseq(iseq).ok()?;
                    return iseq.line(point.pc).map(|line| SourceLocation {
                        path: iseq.path.clone(),
                        line,
                    });
                }
                Context::Typed { caller, .. } => cur = caller,
            }
        }
        None
    }

    /// `Foo#bar` or `Foo.bar` for points inside a method body.
    fn method_label(&self, ep: EpId) -> Option<String> {
        let point = self.point(ep).ok()?;
        let (_, cref, mid) = self.iseq_ctx(point.ctx).ok()??;
        let mid = mid?;
        let cref = self.cref(cref).ok()?;
        let klass = cref.klass?;
        let sep = if cref.singleton { "." } else { "#" };
        Some(format!("{}{}{}", self.registry.path(klass), sep, mid))
    }
}
