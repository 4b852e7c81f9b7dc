//! Instruction streams consumed by the analysis.
//!
//! A [`Program`] is a flat list of instruction sequences ("iseqs"); nested
//! method, block and class bodies refer to each other by [`IseqId`]. Programs are
//! produced by an external compiler and loaded from JSON.
//!
//! # Module structure
//!
//! - `insn`: the instruction set and its operands
//! - `preprocess`: body-start markers, region markers and branch fusion
//! - `builder`: programmatic construction (used by tests and embedders)

pub mod builder;
pub mod insn;
pub mod preprocess;

use serde::{Deserialize, Serialize};

use crate::error::AnalysisError;
pub use insn::{
    BranchKind, CallFlags, CallInfo, ClassDefKind, Insn, LiteralValue, SpecialVar, ThrowKind,
};

/// Index of an instruction sequence in [`Program::iseqs`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize, Serialize)]
#[serde(transparent)]
pub struct IseqId(pub u32);

impl IseqId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IseqKind {
    Top,
    Method,
    Block,
    Class,
    Rescue,
    Ensure,
    Eval,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct OptionalKeyword {
    pub name: String,
    /// Literal default, when the default is a constant expression.
    #[serde(default)]
    pub default: Option<LiteralValue>,
}

/// Keyword parameters occupy consecutive slots from `start`: required first, then optional.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeywordShape {
    pub start: usize,
    pub required: Vec<String>,
    pub optional: Vec<OptionalKeyword>,
}

impl KeywordShape {
    pub fn len(&self) -> usize {
        self.required.len() + self.optional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Parameter layout of a method or block.
///
/// Lead parameters occupy slots `0..lead_num`, optional ones follow them.
/// `opt` lists the entry pc for each number of supplied optional arguments
/// (`opt_num + 1` labels, or empty when there are none).
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ParamShape {
    pub lead_num: usize,
    pub opt: Vec<usize>,
    pub rest_start: Option<usize>,
    pub post_start: Option<usize>,
    pub post_num: usize,
    pub keyword: Option<KeywordShape>,
    pub kwrest: Option<usize>,
    pub block_start: Option<usize>,
    pub ambiguous_param0: bool,
}

impl ParamShape {
    pub fn opt_num(&self) -> usize {
        self.opt.len().saturating_sub(1)
    }

    /// Positional argument counts accepted without a rest parameter: `(min, max)`.
    pub fn arity(&self) -> (usize, usize) {
        let min = self.lead_num + self.post_num;
        (min, min + self.opt_num())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CatchKind {
    Rescue,
    Ensure,
    Break,
    Next,
    Redo,
    Retry,
}

/// Region table entry covering pcs `start..=end`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CatchEntry {
    pub kind: CatchKind,
    #[serde(default)]
    pub iseq: Option<IseqId>,
    pub start: usize,
    pub end: usize,
    pub cont: usize,
    pub stack_depth: usize,
}

impl CatchEntry {
    pub fn covers(&self, pc: usize) -> bool {
        self.start <= pc && pc <= self.end
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct ISeq {
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub kind: IseqKind,
    #[serde(default)]
    pub locals: Vec<String>,
    #[serde(default)]
    pub params: ParamShape,
    pub insns: Vec<Insn>,
    /// Source line per pc; may be shorter than `insns`.
    #[serde(default)]
    pub lines: Vec<u32>,
    #[serde(default)]
    pub catch_table: Vec<CatchEntry>,
}

impl ISeq {
    pub fn line(&self, pc: usize) -> Option<u32> {
        self.lines
            .get(pc)
            .or_else(|| self.lines.last())
            .copied()
    }

    pub fn catch_entries_at(&self, pc: usize) -> impl Iterator<Item = &CatchEntry> {
        self.catch_table.iter().filter(move |e| e.covers(pc))
    }

    /// Pcs at which execution may begin, one per number of optional arguments given.
    pub fn start_pcs(&self) -> Vec<usize> {
        if self.params.opt.is_empty() {
            vec![0]
        } else {
            self.params.opt.clone()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Program {
    pub main: IseqId,
    pub iseqs: Vec<ISeq>,
}

impl Program {
    pub fn from_json_str(json: &str) -> Result<Self, AnalysisError> {
        let program: Program = serde_json::from_str(json)?;
        program.validate()?;
        Ok(program)
    }

    pub fn iseq(&self, id: IseqId) -> Result<&ISeq, AnalysisError> {
        self.iseqs
            .get(id.index())
            .ok_or_else(|| AnalysisError::InvalidProgram(format!("unknown iseq #{}", id.0)))
    }

    /// Checks cross references: iseq ids, jump targets and local slots.
    pub fn validate(&self) -> Result<(), AnalysisError> {
        self.iseq(self.main)?;
        for (i, iseq) in self.iseqs.iter().enumerate() {
            let bad = |what: String| {
                AnalysisError::InvalidProgram(format!("{} (iseq #{} `{}`)", what, i, iseq.name))
            };
            for (pc, insn) in iseq.insns.iter().enumerate() {
                if let Some(target) = insn.target() {
                    if target >= iseq.insns.len() {
                        return Err(bad(format!("jump target {} out of range at pc {}", target, pc)));
                    }
                }
                match insn {
                    Insn::GetLocal { idx, level: 0 } | Insn::SetLocal { idx, level: 0 }
                        if *idx >= iseq.locals.len() =>
                    {
                        return Err(bad(format!("local slot {} out of range at pc {}", idx, pc)));
                    }
                    Insn::DefineMethod { iseq: id, .. }
                    | Insn::DefineSMethod { iseq: id, .. }
                    | Insn::DefineClass { iseq: id, .. }
                    | Insn::Once { iseq: id } => {
                        self.iseq(*id)?;
                    }
                    Insn::Send { call } | Insn::InvokeSuper { call } => {
                        if let Some(id) = call.block {
                            self.iseq(id)?;
                        }
                    }
                    _ => {}
                }
            }
            for entry in &iseq.catch_table {
                if let Some(id) = entry.iseq {
                    self.iseq(id)?;
                }
                if entry.cont > iseq.insns.len() {
                    return Err(bad(format!("catch continuation {} out of range", entry.cont)));
                }
            }
        }
        Ok(())
    }
}
