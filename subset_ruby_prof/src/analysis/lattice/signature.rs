//! Method and block signatures accumulated during analysis.

use super::types::Type;

/// A keyword parameter: `(required, name, type)`.
pub type KeywordParam = (bool, String, Type);

/// Parameter and block types observed for one method activation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodSignature {
    pub lead: Vec<Type>,
    pub opt: Vec<Type>,
    pub rest: Option<Type>,
    pub post: Vec<Type>,
    pub keywords: Option<Vec<KeywordParam>>,
    pub kw_rest: Option<Type>,
    pub blk: Type,
}

impl MethodSignature {
    /// Position-wise join. Both sides come from the same parameter shape, so lead
    /// and post arity agree; optional slots and keywords are aligned by position
    /// and name.
    pub fn merge(&self, other: &MethodSignature) -> MethodSignature {
        let lead = join_positional(&self.lead, &other.lead);
        let opt = join_positional(&self.opt, &other.opt);
        let rest = join_optional(&self.rest, &other.rest);
        let post = join_positional(&self.post, &other.post);
        let keywords = match (&self.keywords, &other.keywords) {
            (Some(a), Some(b)) => {
                let mut out: Vec<KeywordParam> = a.clone();
                for (req, name, ty) in b {
                    match out.iter_mut().find(|(_, n, _)| n == name) {
                        Some(slot) => slot.2 = slot.2.join(ty),
                        None => out.push((*req, name.clone(), ty.clone())),
                    }
                }
                Some(out)
            }
            (Some(a), None) | (None, Some(a)) => Some(a.clone()),
            (None, None) => None,
        };
        let kw_rest = join_optional(&self.kw_rest, &other.kw_rest);
        MethodSignature {
            lead,
            opt,
            rest,
            post,
            keywords,
            kw_rest,
            blk: self.blk.join(&other.blk),
        }
    }
}

/// Argument types observed for one block body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockSignature {
    pub lead: Vec<Type>,
    pub opt: Vec<Type>,
    pub rest: Option<Type>,
    pub blk: Type,
}

impl BlockSignature {
    /// Blocks are called with varying arity, so excess positional arguments move to
    /// the optional (or rest) part instead of being rejected.
    pub fn merge(&self, other: &BlockSignature) -> BlockSignature {
        let blk = self.blk.join(&other.blk);
        match (&self.rest, &other.rest) {
            (Some(a), Some(b)) => BlockSignature {
                lead: self.lead.clone(),
                opt: Vec::new(),
                rest: Some(a.join(b)),
                blk,
            },
            (Some(r), None) | (None, Some(r)) => {
                let mut rest = self
                    .opt
                    .iter()
                    .chain(other.opt.iter())
                    .fold(r.clone(), |acc, ty| acc.join(ty));
                let mut lead = Vec::new();
                for i in 0..self.lead.len().max(other.lead.len()) {
                    match (self.lead.get(i), other.lead.get(i)) {
                        (Some(a), Some(b)) => lead.push(a.join(b)),
                        (Some(t), None) | (None, Some(t)) => rest = rest.join(t),
                        (None, None) => {}
                    }
                }
                BlockSignature {
                    lead,
                    opt: Vec::new(),
                    rest: Some(rest),
                    blk,
                }
            }
            (None, None) => {
                let n = self.lead.len().min(other.lead.len());
                let lead = join_positional(&self.lead[..n], &other.lead[..n]);
                let opt1: Vec<Type> = self.lead[n..].iter().chain(&self.opt).cloned().collect();
                let opt2: Vec<Type> = other.lead[n..].iter().chain(&other.opt).cloned().collect();
                BlockSignature {
                    lead,
                    opt: join_positional(&opt1, &opt2),
                    rest: None,
                    blk,
                }
            }
        }
    }
}

fn join_positional(a: &[Type], b: &[Type]) -> Vec<Type> {
    (0..a.len().max(b.len()))
        .map(|i| match (a.get(i), b.get(i)) {
            (Some(x), Some(y)) => x.join(y),
            (Some(x), None) | (None, Some(x)) => x.clone(),
            (None, None) => Type::Bottom,
        })
        .collect()
}

fn join_optional(a: &Option<Type>, b: &Option<Type>) -> Option<Type> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.join(y)),
        (Some(x), None) | (None, Some(x)) => Some(x.clone()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_signature_merge_moves_extra_lead_to_opt() {
        let a = BlockSignature {
            lead: vec![Type::integer(), Type::string()],
            opt: Vec::new(),
            rest: None,
            blk: Type::nil(),
        };
        let b = BlockSignature {
            lead: vec![Type::nil()],
            opt: Vec::new(),
            rest: None,
            blk: Type::nil(),
        };
        let merged = a.merge(&b);
        assert_eq!(merged.lead, vec![Type::integer().join(&Type::nil())]);
        assert_eq!(merged.opt, vec![Type::string()]);
    }

    #[test]
    fn test_method_signature_merge_keywords_by_name() {
        let a = MethodSignature {
            lead: vec![Type::integer()],
            opt: Vec::new(),
            rest: None,
            post: Vec::new(),
            keywords: Some(vec![(true, "k".to_string(), Type::integer())]),
            kw_rest: None,
            blk: Type::nil(),
        };
        let mut b = a.clone();
        b.lead = vec![Type::string()];
        b.keywords = Some(vec![(true, "k".to_string(), Type::string())]);
        let merged = a.merge(&b);
        assert_eq!(merged.lead, vec![Type::integer().join(&Type::string())]);
        assert_eq!(
            merged.keywords,
            Some(vec![(
                true,
                "k".to_string(),
                Type::integer().join(&Type::string())
            )])
        );
    }
}
