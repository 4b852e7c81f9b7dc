//! Turning the engine's tables into an [`AnalysisResult`].

use std::collections::BTreeMap;

use super::InferenceEngine;
use crate::analysis::lattice::{BlockBody, BlockSignature, MethodSignature, Type};
use crate::analysis::result::{
    AnalysisResult, BlockSummary, MethodSummary, RevealedType, VariableSummary,
};
use crate::diagnostics::SourceLocation;
use crate::iseq::IseqId;

impl<'a> InferenceEngine<'a> {
    /// Snapshot of everything inferred so far. Valid after an exhausted run too.
    pub fn result(&self) -> AnalysisResult {
        AnalysisResult {
            terminated: self.terminated(),
            iterations: self.iterations(),
            methods: self.method_summaries(),
            blocks: self.block_summaries(),
            diagnostics: self.diagnostics().to_vec(),
            ivars: self.ivar_summaries(),
            cvars: self.cvar_summaries(),
            gvars: self
                .registry
                .gvars
                .iter()
                .filter(|(_, entry)| !entry.ty.is_bottom())
                .map(|(name, entry)| VariableSummary {
                    owner: None,
                    name: name.clone(),
                    ty: self.screen(&entry.ty),
                })
                .collect(),
            revealed: self
                .revealed
                .iter()
                .map(|(location, ty)| RevealedType {
                    location: location.clone(),
                    ty: self.screen(ty),
                })
                .collect(),
        }
    }

    fn method_summaries(&self) -> Vec<MethodSummary> {
        let mut by_method: BTreeMap<(String, bool, String), (Option<MethodSignature>, Type)> =
            BTreeMap::new();
        for (ctx, keys) in &self.method_ctxs {
            let ret = self
                .return_values
                .get(ctx)
                .cloned()
                .unwrap_or(Type::Bottom);
            let sig = self.method_signatures.get(ctx);
            for key in keys {
                let slot = by_method
                    .entry((self.registry.path(key.klass), key.singleton, key.mid.clone()))
                    .or_insert((None, Type::Bottom));
                slot.1 = slot.1.join(&ret);
                if let Some(sig) = sig {
                    slot.0 = Some(match slot.0.take() {
                        Some(acc) => acc.merge(sig),
                        None => sig.clone(),
                    });
                }
            }
        }

        by_method
            .into_iter()
            .map(|((class, singleton, name), (sig, ret))| {
                let (params, keywords, block) = match &sig {
                    Some(sig) => self.render_method_params(sig),
                    None => (Vec::new(), Vec::new(), None),
                };
                MethodSummary {
                    class,
                    singleton,
                    name,
                    params,
                    keywords,
                    block,
                    ret: self.screen(&ret),
                }
            })
            .collect()
    }

    fn render_method_params(&self, sig: &MethodSignature) -> (Vec<String>, Vec<String>, Option<String>) {
        let mut params: Vec<String> = sig.lead.iter().map(|t| self.screen(t)).collect();
        params.extend(sig.opt.iter().map(|t| format!("?{}", self.screen(t))));
        if let Some(rest) = &sig.rest {
            params.push(format!("*{}", self.screen(rest)));
        }
        params.extend(sig.post.iter().map(|t| self.screen(t)));

        let mut keywords = Vec::new();
        for (required, name, ty) in sig.keywords.iter().flatten() {
            let prefix = if *required { "" } else { "?" };
            keywords.push(format!("{}{}: {}", prefix, name, self.screen(ty)));
        }
        if let Some(rest) = &sig.kw_rest {
            keywords.push(format!("**{}", self.screen(rest)));
        }

        (params, keywords, self.render_block_param(&sig.blk))
    }

    /// `{ (A) -> B }` for the blocks a method was called with.
    fn render_block_param(&self, blk: &Type) -> Option<String> {
        let mut optional = false;
        let mut merged: Option<(BlockSignature, Type)> = None;
        let mut typed = Vec::new();
        for child in blk.children() {
            match &child {
                Type::Proc(body) => match body.as_ref() {
                    BlockBody::ISeq { iseq, .. } => {
                        let Some(sig) = self.block_signatures.get(iseq) else {
                            continue;
                        };
                        let ret = self.block_return(*iseq);
                        merged = Some(match merged {
                            Some((acc, acc_ret)) => (acc.merge(sig), acc_ret.join(&ret)),
                            None => (sig.clone(), ret),
                        });
                    }
                    BlockBody::Typed { .. } => typed.push(self.screen(&child)),
                    BlockBody::Symbol(_) => {}
                },
                ty if ty.is_nil() => optional = true,
                _ => {}
            }
        }
        let rendered = match merged {
            Some((sig, ret)) => format!(
                "{{ ({}) -> {} }}",
                self.render_block_params(&sig).join(", "),
                self.screen(&ret)
            ),
            None => typed.into_iter().next()?,
        };
        Some(if optional {
            format!("?{}", rendered)
        } else {
            rendered
        })
    }

    fn render_block_params(&self, sig: &BlockSignature) -> Vec<String> {
        let mut params: Vec<String> = sig.lead.iter().map(|t| self.screen(t)).collect();
        params.extend(sig.opt.iter().map(|t| format!("?{}", self.screen(t))));
        if let Some(rest) = &sig.rest {
            params.push(format!("*{}", self.screen(rest)));
        }
        params
    }

    fn block_return(&self, iseq: IseqId) -> Type {
        self.block_ctxs
            .get(&iseq)
            .into_iter()
            .flatten()
            .filter_map(|ctx| self.return_values.get(ctx))
            .fold(Type::Bottom, |acc, ty| acc.join(ty))
    }

    fn block_summaries(&self) -> Vec<BlockSummary> {
        self.block_signatures
            .iter()
            .map(|(iseq, sig)| {
                let (name, location) = match self.program.iseq(*iseq) {
                    Ok(body) => (
                        body.name.clone(),
                        body.line(0).map(|line| SourceLocation {
                            path: body.path.clone(),
                            line,
                        }),
                    ),
                    Err(_) => (String::new(), None),
                };
                BlockSummary {
                    name,
                    location,
                    params: self.render_block_params(sig),
                    ret: self.screen(&self.block_return(*iseq)),
                }
            })
            .collect()
    }

    fn ivar_summaries(&self) -> Vec<VariableSummary> {
        let mut out = Vec::new();
        for (klass, def) in self.registry.classes() {
            for ((singleton, name), entry) in def.ivars.iter() {
                if entry.ty.is_bottom() {
                    continue;
                }
                let path = self.registry.path(klass);
                out.push(VariableSummary {
                    owner: Some(if *singleton {
                        format!("singleton({})", path)
                    } else {
                        path
                    }),
                    name: name.clone(),
                    ty: self.screen(&entry.ty),
                });
            }
        }
        out
    }

    fn cvar_summaries(&self) -> Vec<VariableSummary> {
        let mut out = Vec::new();
        for (klass, def) in self.registry.classes() {
            for (name, entry) in def.cvars.iter() {
                if entry.ty.is_bottom() {
                    continue;
                }
                out.push(VariableSummary {
                    owner: Some(self.registry.path(klass)),
                    name: name.clone(),
                    ty: self.screen(&entry.ty),
                });
            }
        }
        out
    }
}
