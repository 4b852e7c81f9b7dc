//! Container descriptions crossing the boundary between envs and global types.
//!
//! Element records live in the env of the activation that allocated them. A
//! point nested in a block keeps its records in the saved env of the outermost
//! activation instead, so that the block and its creator see the same elements.

use super::InferenceEngine;
use crate::analysis::abstract_interp::context::EpId;
use crate::analysis::abstract_interp::env::Env;
use crate::analysis::ipo::ActualArguments;
use crate::analysis::lattice::{AllocationSite, ClassId, ElementStore, Elements, Type};
use crate::error::AnalysisError;

/// True if localizing `ty` would move anything into a store.
fn holds_container(ty: &Type) -> bool {
    match ty {
        Type::Container(_) => true,
        Type::Union(u) => !u.elems.is_empty(),
        _ => false,
    }
}

impl<'a> InferenceEngine<'a> {
    /// The point whose saved env stores element records for `ep`, when that is
    /// not `ep`'s own env.
    fn element_home(&self, ep: EpId) -> Result<Option<EpId>, AnalysisError> {
        if self.point(ep)?.outer.is_none() {
            return Ok(None);
        }
        let home = self.outermost(ep)?;
        Ok(self.return_envs.contains_key(&home).then_some(home))
    }

    /// Replaces the global containers in `ty` by placeholders allocated at `site`.
    pub(super) fn localize_in(
        &mut self,
        ty: &Type,
        mut env: Env,
        ep: EpId,
        site: AllocationSite,
    ) -> Result<(Env, Type), AnalysisError> {
        if !holds_container(ty) {
            return Ok((env, ty.clone()));
        }
        let depth = self.config.type_depth_limit;
        match self.element_home(ep)? {
            Some(home) => {
                let Some(mut store) = self.return_envs.remove(&home) else {
                    return Ok((env, Type::Any));
                };
                let local = ty.localize(&mut store, &site, depth);
                self.return_envs.insert(home, store);
                Ok((env, local))
            }
            None => {
                let local = ty.localize(&mut env, &site, depth);
                Ok((env, local))
            }
        }
    }

    /// Self-contained view of `ty` as seen from `ep` with state `env`.
    pub(super) fn globalize_in(&self, ty: &Type, env: &Env, ep: EpId) -> Result<Type, AnalysisError> {
        let depth = self.config.type_depth_limit;
        Ok(match self.element_home(ep)?.and_then(|h| self.return_envs.get(&h)) {
            Some(store) => ty.globalize(store, depth),
            None => ty.globalize(env, depth),
        })
    }

    pub(super) fn globalize_args(
        &self,
        aargs: &ActualArguments,
        env: &Env,
        ep: EpId,
    ) -> Result<ActualArguments, AnalysisError> {
        let depth = self.config.type_depth_limit;
        Ok(match self.element_home(ep)?.and_then(|h| self.return_envs.get(&h)) {
            Some(store) => aargs.globalize(store, depth),
            None => aargs.globalize(env, depth),
        })
    }

    pub(super) fn container_elems(
        &self,
        env: &Env,
        ep: EpId,
        site: &AllocationSite,
    ) -> Result<Option<Elements>, AnalysisError> {
        Ok(match self.element_home(ep)?.and_then(|h| self.return_envs.get(&h)) {
            Some(store) => store.container_elems(site).cloned(),
            None => env.container_elems(site).cloned(),
        })
    }

    /// Rewrites the element record at `site` with `update` applied to the old one.
    ///
    /// A container that was read out of an instance variable is written back to it.
    pub(super) fn update_container_elems(
        &mut self,
        mut env: Env,
        ep: EpId,
        site: &AllocationSite,
        base: ClassId,
        update: impl FnOnce(Option<&Elements>) -> Elements,
    ) -> Result<Env, AnalysisError> {
        let depth = self.config.type_depth_limit;
        let written = match self.element_home(ep)? {
            Some(home) => {
                let Some(mut store) = self.return_envs.remove(&home) else {
                    return Ok(env);
                };
                let elems = update(store.container_elems(site));
                let kind = elems.kind();
                store.deploy(site.clone(), elems);
                let written = Type::Local {
                    kind,
                    site: site.clone(),
                    base,
                }
                .globalize(&store, depth);
                self.return_envs.insert(home, store);
                written
            }
            None => {
                let elems = update(env.container_elems(site));
                let kind = elems.kind();
                env.deploy(site.clone(), elems);
                Type::Local {
                    kind,
                    site: site.clone(),
                    base,
                }
                .globalize(&env, depth)
            }
        };
        if let Some((recv, name)) = self.ivar_sites.get(site).cloned() {
            self.write_ivar(&recv, &name, &written)?;
        }
        Ok(env)
    }

    /// Joined element type of the arrays in `ty`; other members count as one element.
    pub(super) fn squash_elements(&self, ty: &Type, env: &Env, ep: EpId) -> Result<Type, AnalysisError> {
        let mut elem = Type::Bottom;
        for child in ty.children() {
            let part = match &child {
                Type::Local { site, .. } => match self.container_elems(env, ep, site)? {
                    Some(Elements::Array(a)) => a.squash(),
                    _ => Type::Any,
                },
                Type::Any => Type::Any,
                other => self.globalize_in(other, env, ep)?,
            };
            elem = elem.join(&part);
        }
        Ok(elem)
    }
}
