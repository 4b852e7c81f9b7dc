//! Instance, class and global variables.
//!
//! Variables are flow-insensitive: a write joins into the table entry and
//! re-delivers the widened type to every point that ever read it.

use super::InferenceEngine;
use crate::analysis::abstract_interp::context::EpId;
use crate::analysis::abstract_interp::env::Env;
use crate::analysis::ipo::Continuation;
use crate::analysis::lattice::Type;
use crate::analysis::registry::ReadHook;
use crate::error::AnalysisError;

impl<'a> InferenceEngine<'a> {
    /// `getinstancevariable` on the current receiver.
    pub(super) fn read_ivar(&mut self, ep: EpId, env: Env, name: &str) -> Result<(), AnalysisError> {
        let recv = env.static_env.recv.clone();
        for child in recv.children() {
            let ctn = Continuation::IvarPush {
                recv: child.clone(),
                name: name.to_string(),
            };
            self.read_ivar_of(&child, name, ep, env.clone(), ctn)?;
        }
        Ok(())
    }

    /// Reads `name` of one receiver and delivers it through `ctn`, now and on every widening.
    pub(super) fn read_ivar_of(
        &mut self,
        recv: &Type,
        name: &str,
        ep: EpId,
        env: Env,
        ctn: Continuation,
    ) -> Result<(), AnalysisError> {
        let Some((klass, singleton)) = recv.dispatch_info() else {
            return self.fire(&ctn, Type::Any, ep, env);
        };
        let hook = ReadHook {
            ctn: ctn.clone(),
            env: env.clone(),
        };
        let ty = self
            .registry
            .class_mut(klass)
            .ivars
            .add_read((singleton, name.to_string()), ep, hook);
        self.fire(&ctn, ty, ep, env)
    }

    /// Joins a global `ty` into `name` of every receiver in `recv`.
    pub(super) fn write_ivar(&mut self, recv: &Type, name: &str, ty: &Type) -> Result<(), AnalysisError> {
        for child in recv.children() {
            let Some((klass, singleton)) = child.dispatch_info() else {
                continue;
            };
            let key = (singleton, name.to_string());
            let old = self.registry.class(klass).ivars.get(&key);
            let new = self.widen(&old.join(ty));
            let readers = self.registry.class_mut(klass).ivars.store(key, new.clone());
            self.refire(readers, new)?;
        }
        Ok(())
    }

    pub(super) fn read_cvar(&mut self, ep: EpId, env: Env, name: &str) -> Result<(), AnalysisError> {
        let Some(klass) = self.cref_class(ep)? else {
            return self.fire(&Continuation::Push, Type::Any, ep, env);
        };
        let hook = ReadHook {
            ctn: Continuation::Push,
            env: env.clone(),
        };
        let ty = self
            .registry
            .class_mut(klass)
            .cvars
            .add_read(name.to_string(), ep, hook);
        self.fire(&Continuation::Push, ty, ep, env)
    }

    pub(super) fn write_cvar(&mut self, ep: EpId, name: &str, ty: &Type) -> Result<(), AnalysisError> {
        let Some(klass) = self.cref_class(ep)? else {
            return Ok(());
        };
        let old = self.registry.class(klass).cvars.get(&name.to_string());
        let new = self.widen(&old.join(ty));
        let readers = self
            .registry
            .class_mut(klass)
            .cvars
            .store(name.to_string(), new.clone());
        self.refire(readers, new)
    }

    pub(super) fn read_gvar(&mut self, ep: EpId, env: Env, name: &str) -> Result<(), AnalysisError> {
        let hook = ReadHook {
            ctn: Continuation::Push,
            env: env.clone(),
        };
        let ty = self.registry.gvars.add_read(name.to_string(), ep, hook);
        self.fire(&Continuation::Push, ty, ep, env)
    }

    pub(super) fn write_gvar(&mut self, name: &str, ty: &Type) -> Result<(), AnalysisError> {
        let old = self.registry.gvars.get(&name.to_string());
        let new = self.widen(&old.join(ty));
        let readers = self.registry.gvars.store(name.to_string(), new.clone());
        self.refire(readers, new)
    }

    fn refire(&mut self, readers: Vec<(EpId, ReadHook)>, ty: Type) -> Result<(), AnalysisError> {
        for (ep, hook) in readers {
            self.fire(&hook.ctn, ty.clone(), ep, hook.env)?;
        }
        Ok(())
    }
}
