//! Abstract machine state attached to an execution point.
//!
//! An [`Env`] holds the locals, the operand stack and the element records of
//! every container allocated in the activation. Stored envs for one point only
//! ever grow under [`Env::merge`].

use std::collections::BTreeMap;

use crate::analysis::lattice::{AllocationSite, ElementStore, Elements, Type};
use crate::error::AnalysisError;

/// Per-activation facts that do not live in slots.
///
/// # Example
/// ```
/// use subset_ruby_prof::analysis::abstract_interp::StaticEnv;
/// use subset_ruby_prof::analysis::lattice::Type;
///
/// let a = StaticEnv::new(Type::integer(), Type::nil());
/// let b = StaticEnv::new(Type::string(), Type::nil());
/// let merged = a.merge(&b);
/// assert_eq!(merged.recv, Type::integer().join(&Type::string()));
/// ```
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct StaticEnv {
    pub recv: Type,
    pub blk: Type,
    /// Methods defined from here on are module functions.
    pub mod_func: bool,
    /// Methods defined from here on are public.
    pub pub_meth: bool,
}

impl StaticEnv {
    pub fn new(recv: Type, blk: Type) -> Self {
        Self {
            recv,
            blk,
            mod_func: false,
            pub_meth: true,
        }
    }

    pub fn merge(&self, other: &StaticEnv) -> StaticEnv {
        StaticEnv {
            recv: self.recv.join(&other.recv),
            blk: self.blk.join(&other.blk),
            mod_func: self.mod_func && other.mod_func,
            pub_meth: self.pub_meth && other.pub_meth,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Env {
    pub static_env: StaticEnv,
    pub locals: Vec<Type>,
    pub stack: Vec<Type>,
    pub type_params: BTreeMap<AllocationSite, Elements>,
}

impl ElementStore for Env {
    fn container_elems(&self, site: &AllocationSite) -> Option<&Elements> {
        self.type_params.get(site)
    }

    fn deploy(&mut self, site: AllocationSite, elems: Elements) {
        self.type_params.insert(site, elems);
    }
}

impl Env {
    pub fn new(static_env: StaticEnv, locals: Vec<Type>) -> Self {
        Self {
            static_env,
            locals,
            stack: Vec::new(),
            type_params: BTreeMap::new(),
        }
    }

    /// Join with another env for the same point.
    ///
    /// Fails when locals or stack lengths differ: two paths reaching one pc with
    /// different stack depths means the instruction stream is malformed.
    pub fn merge(&self, other: &Env) -> Result<Env, AnalysisError> {
        if self.locals.len() != other.locals.len() || self.stack.len() != other.stack.len() {
            return Err(AnalysisError::EnvShapeMismatch(format!(
                "locals {} vs {}, stack {} vs {}",
                self.locals.len(),
                other.locals.len(),
                self.stack.len(),
                other.stack.len()
            )));
        }
        let locals = self
            .locals
            .iter()
            .zip(&other.locals)
            .map(|(a, b)| a.join(b))
            .collect();
        let stack = self
            .stack
            .iter()
            .zip(&other.stack)
            .map(|(a, b)| a.join(b))
            .collect();
        let mut type_params = self.type_params.clone();
        for (site, elems) in &other.type_params {
            let merged = match type_params.get(site) {
                Some(existing) => existing.union(elems),
                None => elems.clone(),
            };
            type_params.insert(site.clone(), merged);
        }
        Ok(Env {
            static_env: self.static_env.merge(&other.static_env),
            locals,
            stack,
            type_params,
        })
    }

    pub fn push(&mut self, ty: Type) -> Result<(), AnalysisError> {
        match &ty {
            Type::Container(_) => return Err(AnalysisError::ContainerOnStack(format!("{:?}", ty))),
            Type::Union(u) if !u.elems.is_empty() => {
                return Err(AnalysisError::ContainerOnStack(format!("{:?}", ty)))
            }
            Type::Var(name) => return Err(AnalysisError::TypeVarOnStack(name.clone())),
            _ => {}
        }
        self.stack.push(ty);
        Ok(())
    }

    pub fn push_all(&mut self, tys: impl IntoIterator<Item = Type>) -> Result<(), AnalysisError> {
        for ty in tys {
            self.push(ty)?;
        }
        Ok(())
    }

    /// Pops `n` values, returned bottom-most first.
    pub fn pop(&mut self, n: usize) -> Result<Vec<Type>, AnalysisError> {
        if self.stack.len() < n {
            return Err(AnalysisError::StackUnderflow {
                need: n,
                have: self.stack.len(),
            });
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub fn pop_one(&mut self) -> Result<Type, AnalysisError> {
        self.stack.pop().ok_or(AnalysisError::StackUnderflow { need: 1, have: 0 })
    }

    /// Value `n` slots below the top (0 is the top).
    pub fn top(&self, n: usize) -> Result<&Type, AnalysisError> {
        let len = self.stack.len();
        if n >= len {
            return Err(AnalysisError::StackUnderflow {
                need: n + 1,
                have: len,
            });
        }
        Ok(&self.stack[len - 1 - n])
    }

    pub fn set_top(&mut self, n: usize, ty: Type) -> Result<(), AnalysisError> {
        let len = self.stack.len();
        if n >= len {
            return Err(AnalysisError::StackUnderflow {
                need: n + 1,
                have: len,
            });
        }
        self.stack[len - 1 - n] = ty;
        Ok(())
    }

    pub fn truncate_stack(&mut self, depth: usize) {
        self.stack.truncate(depth);
    }

    pub fn get_local(&self, idx: usize) -> Result<&Type, AnalysisError> {
        self.locals
            .get(idx)
            .ok_or_else(|| AnalysisError::InvalidProgram(format!("local slot {} out of range", idx)))
    }

    pub fn local_update(&mut self, idx: usize, ty: Type) -> Result<(), AnalysisError> {
        match self.locals.get_mut(idx) {
            Some(slot) => {
                *slot = ty;
                Ok(())
            }
            None => Err(AnalysisError::InvalidProgram(format!(
                "local slot {} out of range",
                idx
            ))),
        }
    }

    pub fn enable_module_function(&mut self) {
        self.static_env.mod_func = true;
    }

    pub fn method_public_set(&mut self, public: bool) {
        self.static_env.pub_meth = public;
    }

    pub fn replace_recv(&mut self, recv: Type) {
        self.static_env.recv = recv;
    }

    pub fn replace_blk(&mut self, blk: Type) {
        self.static_env.blk = blk;
    }
}
