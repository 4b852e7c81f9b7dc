//! Actual arguments of a call and their binding to formal parameters.

use std::collections::BTreeMap;

use crate::analysis::lattice::{
    match_types, merge_substitution, BlockSignature, ClassHierarchy, ElementStore, Elements,
    MethodSignature, Substitution, Type,
};
use crate::diagnostics::DiagnosticReason;
use crate::iseq::ParamShape;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CallKind {
    Method,
    Block,
}

/// Arguments as passed by a caller.
///
/// `rest` holds the splatted value itself (normally an array), not its element
/// type. Keyword values are keyed by name; the `None` key collects values whose
/// names are unknown, as produced by splatting a hash with non-symbol keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ActualArguments {
    pub lead: Vec<Type>,
    pub rest: Option<Type>,
    pub kw: BTreeMap<Option<String>, Type>,
    pub blk: Type,
}

impl ActualArguments {
    pub fn new(lead: Vec<Type>, blk: Type) -> Self {
        Self {
            lead,
            rest: None,
            kw: BTreeMap::new(),
            blk,
        }
    }

    /// Arguments re-targeted at `method_missing`: the method name goes first.
    pub fn for_method_missing(&self, mid: &str) -> Self {
        let mut lead = Vec::with_capacity(self.lead.len() + 1);
        lead.push(Type::symbol(mid));
        lead.extend(self.lead.iter().cloned());
        Self {
            lead,
            ..self.clone()
        }
    }

    pub fn globalize<S: ElementStore + ?Sized>(&self, store: &S, depth: usize) -> Self {
        Self {
            lead: self.lead.iter().map(|t| t.globalize(store, depth)).collect(),
            rest: self.rest.as_ref().map(|t| t.globalize(store, depth)),
            kw: self
                .kw
                .iter()
                .map(|(k, v)| (k.clone(), v.globalize(store, depth)))
                .collect(),
            blk: self.blk.clone(),
        }
    }

    /// Element type of the splatted value, if any.
    pub fn rest_elem(&self) -> Option<Type> {
        self.rest.as_ref().map(splat_elem)
    }

    /// Checks (global) arguments against a typed overload and returns the
    /// bindings of its type variables.
    pub fn consistent_with_method_signature<H: ClassHierarchy + ?Sized>(
        &self,
        h: &H,
        sig: &MethodSignature,
    ) -> Option<Substitution> {
        if let Some(elem) = self.rest_elem() {
            let lower = (sig.lead.len() + sig.post.len()).saturating_sub(self.lead.len());
            let upper = lower + sig.opt.len();
            for n in lower..=upper {
                let mut lead = self.lead.clone();
                lead.extend(std::iter::repeat(elem.clone()).take(n));
                let expanded = Self {
                    lead,
                    rest: None,
                    kw: self.kw.clone(),
                    blk: self.blk.clone(),
                };
                if let Some(subst) = expanded.consistent_with_method_signature(h, sig) {
                    return Some(subst);
                }
            }
            return None;
        }

        let given = self.lead.len();
        let min = sig.lead.len() + sig.post.len();
        if given < min || (sig.rest.is_none() && given > min + sig.opt.len()) {
            return None;
        }

        let mut subst = Substitution::new();
        let (head, tail) = self.lead.split_at(given - sig.post.len());
        for (aarg, farg) in head.iter().zip(&sig.lead) {
            subst = bind(h, subst, aarg, farg)?;
        }
        for (i, aarg) in head.iter().skip(sig.lead.len()).enumerate() {
            let farg = match (sig.opt.get(i), &sig.rest) {
                (Some(farg), _) => farg,
                (None, Some(rest)) => rest,
                (None, None) => return None,
            };
            subst = bind(h, subst, aarg, farg)?;
        }
        for (aarg, farg) in tail.iter().zip(&sig.post) {
            subst = bind(h, subst, aarg, farg)?;
        }

        match &sig.blk {
            Type::Proc(_) if self.blk.is_nil() => return None,
            blk if blk.is_nil() && !self.blk.is_nil() => return None,
            _ => {}
        }
        Some(subst)
    }

    /// Signature of a block call with these (global) arguments.
    pub fn to_block_signature(&self) -> BlockSignature {
        BlockSignature {
            lead: self.lead.clone(),
            opt: Vec::new(),
            rest: self.rest_elem(),
            blk: self.blk.clone(),
        }
    }
}

fn bind<H: ClassHierarchy + ?Sized>(
    h: &H,
    acc: Substitution,
    aarg: &Type,
    farg: &Type,
) -> Option<Substitution> {
    let subst = match_types(h, aarg, farg)?;
    Some(merge_substitution(Some(acc), subst))
}

fn is_array(ty: &Type) -> bool {
    matches!(ty.as_container(), Some(c) if matches!(c.elems, Elements::Array(_)))
}

pub(crate) fn splat_elem(ty: &Type) -> Type {
    let mut elem = Type::Bottom;
    for child in ty.children() {
        match child.as_container().map(|c| &c.elems) {
            Some(Elements::Array(a)) => elem = elem.join(&a.squash()),
            _ => elem = elem.join(&child),
        }
    }
    elem
}

/// `|a, b|` receiving a single array: its elements become the arguments.
fn auto_splat(ty: &Type) -> Option<(Vec<Type>, Option<Type>)> {
    let children = ty.children();
    if !children.iter().any(is_array) {
        return None;
    }
    if let [only] = children.as_slice() {
        if let Some(Elements::Array(a)) = only.as_container().map(|c| &c.elems) {
            let rest = (!a.rest.is_bottom()).then(|| a.rest.clone());
            return Some((a.lead.clone(), rest));
        }
    }
    let mut rest = Type::Bottom;
    let mut others = Type::Bottom;
    for child in &children {
        match child.as_container().map(|c| &c.elems) {
            Some(Elements::Array(a)) => rest = rest.join(&a.squash()),
            _ => others = others.join(child),
        }
    }
    Some((vec![others.join(&rest)], Some(rest)))
}

fn keywords_hash(kw: &BTreeMap<Option<String>, Type>) -> Type {
    let mut map: BTreeMap<Type, Type> = BTreeMap::new();
    for (name, ty) in kw {
        let key = match name {
            Some(name) => Type::symbol(name),
            None => Type::Any,
        };
        let merged = match map.get(&key) {
            Some(existing) => existing.join(ty),
            None => ty.clone(),
        };
        map.insert(key, merged);
    }
    Type::hash(map)
}

fn expected_arity(params: &ParamShape) -> String {
    let (min, max) = params.arity();
    if params.rest_start.is_some() {
        format!("{}+", min)
    } else if max > min {
        format!("{}..{}", min, max)
    } else {
        min.to_string()
    }
}

fn set(locals: &mut [Type], idx: usize, ty: Type) {
    if let Some(slot) = locals.get_mut(idx) {
        *slot = ty;
    }
}

/// Binds (global) actual arguments to the parameter slots of a callee with
/// `nlocals` locals.
///
/// Returns the initial locals and the pcs to start executing from; more than one
/// pc means the number of supplied optional arguments is not known. Methods
/// reject arity and keyword mismatches; blocks pad with `nil` and drop extras.
pub fn setup_formal_arguments(
    aargs: &ActualArguments,
    kind: CallKind,
    params: &ParamShape,
    nlocals: usize,
) -> Result<(Vec<Type>, Vec<usize>), DiagnosticReason> {
    let mut lead = aargs.lead.clone();
    let mut rest = aargs.rest_elem();
    let mut kw = aargs.kw.clone();

    if kind == CallKind::Block
        && !params.ambiguous_param0
        && lead.len() == 1
        && rest.is_none()
        && kw.is_empty()
    {
        if let Some((l, r)) = auto_splat(&lead[0]) {
            lead = l;
            rest = r;
        }
    }

    // Keywords sent to a callee without keyword parameters arrive as a trailing hash.
    if params.keyword.is_none() && params.kwrest.is_none() && !kw.is_empty() {
        lead.push(keywords_hash(&kw));
        kw.clear();
    }

    let mut locals = vec![Type::nil(); nlocals];
    let lead_num = params.lead_num;
    let post_num = params.post_num;
    let opt_num = params.opt_num();
    let min = lead_num + post_num;
    let given = lead.len();

    let labels = if params.opt.is_empty() {
        vec![0]
    } else {
        params.opt.clone()
    };

    let start_pcs = match rest {
        None => {
            if kind == CallKind::Method
                && (given < min || (params.rest_start.is_none() && given > min + opt_num))
            {
                return Err(DiagnosticReason::WrongArity {
                    given,
                    expected: expected_arity(params),
                });
            }
            if lead.len() < min {
                lead.resize(min, Type::nil());
            }
            if params.rest_start.is_none() && lead.len() > min + opt_num {
                lead.truncate(min + opt_num);
            }
            let n = lead.len();
            let opt_count = (n - min).min(opt_num);
            let rest_end = n - post_num;
            for (i, ty) in lead.iter().take(lead_num + opt_count).enumerate() {
                set(&mut locals, i, ty.clone());
            }
            if let Some(idx) = params.rest_start {
                let extras = lead[lead_num + opt_count..rest_end].to_vec();
                set(&mut locals, idx, Type::array(extras, Type::Bottom));
            }
            if let Some(start) = params.post_start {
                for (i, ty) in lead[rest_end..].iter().enumerate() {
                    set(&mut locals, start + i, ty.clone());
                }
            }
            vec![labels[opt_count.min(labels.len() - 1)]]
        }
        Some(elem) => {
            if kind == CallKind::Method && params.rest_start.is_none() && given > min + opt_num {
                return Err(DiagnosticReason::WrongArity {
                    given,
                    expected: expected_arity(params),
                });
            }
            for i in 0..lead_num {
                set(&mut locals, i, lead.get(i).cloned().unwrap_or_else(|| elem.clone()));
            }
            let after: &[Type] = lead.get(lead_num..).unwrap_or(&[]);
            let known_opts = after.len().min(opt_num);
            for i in 0..opt_num {
                let ty = after.get(i).cloned().unwrap_or_else(|| elem.clone());
                set(&mut locals, lead_num + i, ty);
            }
            let extras = Type::join_all(after.iter().skip(opt_num));
            let spread = elem.join(&extras);
            if let Some(idx) = params.rest_start {
                set(&mut locals, idx, Type::array_of(spread.clone()));
            }
            if let Some(start) = params.post_start {
                for i in 0..post_num {
                    set(&mut locals, start + i, spread.clone());
                }
            }
            labels[known_opts.min(labels.len() - 1)..].to_vec()
        }
    };

    if let Some(shape) = &params.keyword {
        let untyped = kw.remove(&None);
        let mut missing = false;
        for (i, name) in shape.required.iter().enumerate() {
            match kw.remove(&Some(name.clone())).or_else(|| untyped.clone()) {
                Some(ty) => set(&mut locals, shape.start + i, ty),
                None => missing = true,
            }
        }
        if missing && kind == CallKind::Method {
            return Err(DiagnosticReason::MissingKeywords);
        }
        for (j, opt) in shape.optional.iter().enumerate() {
            let mut ty = kw
                .remove(&Some(opt.name.clone()))
                .or_else(|| untyped.clone())
                .unwrap_or(Type::Bottom);
            if let Some(default) = &opt.default {
                ty = ty.join(&Type::from_literal(default).without_literal());
            }
            set(&mut locals, shape.start + shape.required.len() + j, ty);
        }
    }

    if let Some(idx) = params.kwrest {
        set(&mut locals, idx, keywords_hash(&kw));
    } else if kind == CallKind::Method {
        let unknown: Vec<&str> = kw.keys().filter_map(|k| k.as_deref()).collect();
        if !unknown.is_empty() {
            return Err(DiagnosticReason::UnknownKeyword(unknown.join(", ")));
        }
    }

    if let Some(idx) = params.block_start {
        set(&mut locals, idx, aargs.blk.clone());
    }

    Ok((locals, start_pcs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::lattice::{builtin, BlockBody};
    use crate::analysis::registry::ClassRegistry;
    use crate::iseq::{KeywordShape, LiteralValue, OptionalKeyword};

    fn shape(lead_num: usize) -> ParamShape {
        ParamShape {
            lead_num,
            ..Default::default()
        }
    }

    fn args(lead: Vec<Type>) -> ActualArguments {
        ActualArguments::new(lead, Type::nil())
    }

    #[test]
    fn test_exact_lead_binding() {
        let (locals, pcs) = setup_formal_arguments(
            &args(vec![Type::integer(), Type::string()]),
            CallKind::Method,
            &shape(2),
            3,
        )
        .unwrap();
        assert_eq!(locals, vec![Type::integer(), Type::string(), Type::nil()]);
        assert_eq!(pcs, vec![0]);
    }

    #[test]
    fn test_method_arity_errors() {
        let err = setup_formal_arguments(&args(vec![Type::integer()]), CallKind::Method, &shape(2), 2)
            .unwrap_err();
        assert_eq!(
            err,
            DiagnosticReason::WrongArity {
                given: 1,
                expected: "2".to_string()
            }
        );

        let with_opt = ParamShape {
            lead_num: 1,
            opt: vec![2, 5],
            ..Default::default()
        };
        let err = setup_formal_arguments(&args(vec![]), CallKind::Method, &with_opt, 2).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1..2)");

        let with_rest = ParamShape {
            lead_num: 1,
            rest_start: Some(1),
            ..Default::default()
        };
        let err = setup_formal_arguments(&args(vec![]), CallKind::Method, &with_rest, 2).unwrap_err();
        assert_eq!(err.to_string(), "wrong number of arguments (given 0, expected 1+)");
    }

    #[test]
    fn test_optional_argument_selects_entry_label() {
        let params = ParamShape {
            lead_num: 1,
            opt: vec![2, 5],
            ..Default::default()
        };
        let (_, pcs) = setup_formal_arguments(&args(vec![Type::integer()]), CallKind::Method, &params, 2)
            .unwrap();
        assert_eq!(pcs, vec![2]);
        let (locals, pcs) = setup_formal_arguments(
            &args(vec![Type::integer(), Type::string()]),
            CallKind::Method,
            &params,
            2,
        )
        .unwrap();
        assert_eq!(pcs, vec![5]);
        assert_eq!(locals[1], Type::string());
    }

    #[test]
    fn test_rest_collects_extras() {
        let params = ParamShape {
            lead_num: 1,
            rest_start: Some(1),
            ..Default::default()
        };
        let (locals, _) = setup_formal_arguments(
            &args(vec![Type::integer(), Type::string(), Type::nil()]),
            CallKind::Method,
            &params,
            2,
        )
        .unwrap();
        assert_eq!(locals[0], Type::integer());
        assert_eq!(
            locals[1],
            Type::array(vec![Type::string(), Type::nil()], Type::Bottom)
        );
    }

    #[test]
    fn test_splat_fills_missing_leads() {
        let mut aargs = args(vec![]);
        aargs.rest = Some(Type::array_of(Type::integer()));
        let (locals, _) = setup_formal_arguments(&aargs, CallKind::Method, &shape(2), 2).unwrap();
        assert_eq!(locals, vec![Type::integer(), Type::integer()]);
    }

    #[test]
    fn test_keywords() {
        let params = ParamShape {
            keyword: Some(KeywordShape {
                start: 0,
                required: vec!["a".to_string()],
                optional: vec![OptionalKeyword {
                    name: "b".to_string(),
                    default: Some(LiteralValue::Integer(1)),
                }],
            }),
            ..Default::default()
        };

        let mut aargs = args(vec![]);
        aargs.kw.insert(Some("a".to_string()), Type::string());
        let (locals, _) = setup_formal_arguments(&aargs, CallKind::Method, &params, 2).unwrap();
        assert_eq!(locals, vec![Type::string(), Type::integer()]);

        let err = setup_formal_arguments(&args(vec![]), CallKind::Method, &params, 2).unwrap_err();
        assert_eq!(err, DiagnosticReason::MissingKeywords);

        aargs.kw.insert(Some("c".to_string()), Type::nil());
        let err = setup_formal_arguments(&aargs, CallKind::Method, &params, 2).unwrap_err();
        assert_eq!(err, DiagnosticReason::UnknownKeyword("c".to_string()));
    }

    #[test]
    fn test_keywords_become_trailing_hash_without_keyword_params() {
        let mut aargs = args(vec![]);
        aargs.kw.insert(Some("k".to_string()), Type::integer());
        let (locals, _) = setup_formal_arguments(&aargs, CallKind::Method, &shape(1), 1).unwrap();
        let mut map = BTreeMap::new();
        map.insert(Type::symbol("k"), Type::integer());
        assert_eq!(locals[0], Type::hash(map));
    }

    #[test]
    fn test_block_auto_splat_and_padding() {
        let pair = Type::array(vec![Type::integer(), Type::string()], Type::Bottom);
        let (locals, _) =
            setup_formal_arguments(&args(vec![pair.clone()]), CallKind::Block, &shape(2), 2).unwrap();
        assert_eq!(locals, vec![Type::integer(), Type::string()]);

        let single = ParamShape {
            lead_num: 2,
            ambiguous_param0: true,
            ..Default::default()
        };
        let (locals, _) =
            setup_formal_arguments(&args(vec![pair.clone()]), CallKind::Block, &single, 2).unwrap();
        assert_eq!(locals, vec![pair, Type::nil()]);

        let (locals, _) = setup_formal_arguments(
            &args(vec![Type::integer(), Type::string(), Type::nil()]),
            CallKind::Block,
            &shape(1),
            1,
        )
        .unwrap();
        assert_eq!(locals, vec![Type::integer()]);
    }

    #[test]
    fn test_overload_matching_binds_elem() {
        let registry = ClassRegistry::new();
        let sig = MethodSignature {
            lead: vec![Type::var("Elem")],
            opt: vec![],
            rest: None,
            post: vec![],
            keywords: None,
            kw_rest: None,
            blk: Type::nil(),
        };
        let subst = args(vec![Type::integer()])
            .consistent_with_method_signature(&registry, &sig)
            .unwrap();
        assert_eq!(subst.get("Elem"), Some(&Type::integer()));
        assert!(args(vec![])
            .consistent_with_method_signature(&registry, &sig)
            .is_none());

        let with_block = MethodSignature {
            blk: Type::Proc(Box::new(BlockBody::Typed {
                lead: vec![],
                opt: vec![],
                ret: Type::Any,
            })),
            ..sig
        };
        let no_block = args(vec![Type::instance(builtin::STRING)]);
        assert!(no_block
            .consistent_with_method_signature(&registry, &with_block)
            .is_none());
    }

    #[test]
    fn test_method_missing_prepends_name() {
        let aargs = args(vec![Type::integer()]).for_method_missing("foo");
        assert_eq!(aargs.lead, vec![Type::symbol("foo"), Type::integer()]);
    }
}
