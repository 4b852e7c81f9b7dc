//! Instruction set of the analyzed stream.
//!
//! Every instruction has a fixed stack effect. Local slots are addressed
//! directly (`idx`) with a scope `level`: 0 for the current activation, `n` for
//! the n-th enclosing block activation.

use serde::{Deserialize, Serialize};

use super::IseqId;

/// Literal operands of `putobject`/`duphash`.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum LiteralValue {
    Nil,
    True,
    False,
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Regexp(String),
    Array(Vec<LiteralValue>),
    Hash(Vec<(LiteralValue, LiteralValue)>),
    Range {
        low: Box<LiteralValue>,
        high: Box<LiteralValue>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchKind {
    /// Jump when truthy.
    If,
    /// Jump when falsy.
    Unless,
    /// Jump when nil.
    Nil,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ThrowKind {
    None,
    Return,
    Break,
    Next,
    Retry,
    Redo,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassDefKind {
    Class,
    SingletonClass,
    Module,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SpecialVar {
    LastLine,
    BackRef,
    FlipFlop,
    NthRef,
}

/// Call-site flags, mirroring the VM's call info bits that matter to the analysis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct CallFlags {
    pub args_splat: bool,
    pub args_blockarg: bool,
    pub fcall: bool,
    pub vcall: bool,
    pub kw_splat: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct CallInfo {
    pub mid: String,
    /// Positional argument count, excluding the receiver, keyword values and block argument.
    pub argc: usize,
    #[serde(default)]
    pub flags: CallFlags,
    /// Names of literal keyword arguments, pushed after the positional ones.
    #[serde(default)]
    pub kw_arg: Vec<String>,
    /// Literal block (`do ... end`).
    #[serde(default)]
    pub block: Option<IseqId>,
}

impl CallInfo {
    pub fn simple(mid: &str, argc: usize) -> Self {
        Self {
            mid: mid.to_string(),
            argc,
            flags: CallFlags::default(),
            kw_arg: Vec::new(),
            block: None,
        }
    }

    /// Stack slots consumed by the arguments, not counting the receiver.
    pub fn stack_args(&self) -> usize {
        self.argc + self.kw_arg.len() + usize::from(self.flags.args_blockarg)
    }
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Insn {
    Nop,
    /// Inserted after the parameter prologue; records the method/block signature.
    BodyStart,

    PutNil,
    PutSelf,
    PutObject { value: LiteralValue },
    PutString { value: String },
    /// 1: the VM core object, 2/3: the lexical class.
    PutSpecialObject { kind: u8 },
    DupHash { value: LiteralValue },
    NewArray { len: usize },
    NewHash { len: usize },
    NewRange { exclusive: bool },
    ConcatStrings { len: usize },
    ToString,
    FreezeString,
    ToRegexp { len: usize },
    Intern,
    GetSpecial { kind: SpecialVar },
    SetSpecial,
    Defined,

    Dup,
    DupN { n: usize },
    Pop,
    Swap,
    Reverse { n: usize },
    SetN { n: usize },
    TopN { n: usize },
    AdjustStack { n: usize },

    CheckMatch { flag: u32 },
    CheckKeyword,
    /// 5: String, 7: Array, 8: Hash.
    CheckType { tag: u8 },
    SplatArray,
    ConcatArray,
    /// `flag & 1`: splat the remainder, `flag & 2`: take from the tail.
    ExpandArray { num: usize, flag: u32 },

    GetLocal { idx: usize, level: usize },
    SetLocal { idx: usize, level: usize },
    GetInstanceVariable { name: String },
    SetInstanceVariable { name: String },
    GetClassVariable { name: String },
    SetClassVariable { name: String },
    GetGlobal { name: String },
    SetGlobal { name: String },
    /// Pops `cbase` and `allow_nil`.
    GetConstant { name: String },
    /// Pops the value and `cbase`.
    SetConstant { name: String },

    DefineMethod { mid: String, iseq: IseqId },
    /// Pops the singleton receiver.
    DefineSMethod { mid: String, iseq: IseqId },
    /// Pops `cbase` and the superclass.
    DefineClass {
        name: String,
        iseq: IseqId,
        kind: ClassDefKind,
    },
    Once { iseq: IseqId },

    Send { call: CallInfo },
    InvokeSuper { call: CallInfo },
    InvokeBlock { call: CallInfo },
    Leave,
    Throw { kind: ThrowKind },
    Branch { kind: BranchKind, target: usize },
    Jump { target: usize },

    // Fused by preprocessing.
    SendBranch {
        call: CallInfo,
        kind: BranchKind,
        target: usize,
    },
    GetLocalSendBranch {
        idx: usize,
        call: CallInfo,
        kind: BranchKind,
        target: usize,
    },
    GetLocalBranch {
        idx: usize,
        kind: BranchKind,
        target: usize,
    },
    GetLocalDupBranch {
        idx: usize,
        kind: BranchKind,
        target: usize,
    },
    DupBranch { kind: BranchKind, target: usize },
    GetLocalCheckMatchBranch {
        idx: usize,
        kind: BranchKind,
        target: usize,
    },
}

impl Insn {
    /// Jump target operand, if any.
    pub fn target(&self) -> Option<usize> {
        match self {
            Insn::Branch { target, .. }
            | Insn::Jump { target }
            | Insn::SendBranch { target, .. }
            | Insn::GetLocalSendBranch { target, .. }
            | Insn::GetLocalBranch { target, .. }
            | Insn::GetLocalDupBranch { target, .. }
            | Insn::DupBranch { target, .. }
            | Insn::GetLocalCheckMatchBranch { target, .. } => Some(*target),
            _ => None,
        }
    }

    pub fn target_mut(&mut self) -> Option<&mut usize> {
        match self {
            Insn::Branch { target, .. }
            | Insn::Jump { target }
            | Insn::SendBranch { target, .. }
            | Insn::GetLocalSendBranch { target, .. }
            | Insn::GetLocalBranch { target, .. }
            | Insn::GetLocalDupBranch { target, .. }
            | Insn::DupBranch { target, .. }
            | Insn::GetLocalCheckMatchBranch { target, .. } => Some(target),
            _ => None,
        }
    }

    /// Short mnemonic for tracing.
    pub fn name(&self) -> &'static str {
        match self {
            Insn::Nop => "nop",
            Insn::BodyStart => "body_start",
            Insn::PutNil => "putnil",
            Insn::PutSelf => "putself",
            Insn::PutObject { .. } => "putobject",
            Insn::PutString { .. } => "putstring",
            Insn::PutSpecialObject { .. } => "putspecialobject",
            Insn::DupHash { .. } => "duphash",
            Insn::NewArray { .. } => "newarray",
            Insn::NewHash { .. } => "newhash",
            Insn::NewRange { .. } => "newrange",
            Insn::ConcatStrings { .. } => "concatstrings",
            Insn::ToString => "tostring",
            Insn::FreezeString => "freezestring",
            Insn::ToRegexp { .. } => "toregexp",
            Insn::Intern => "intern",
            Insn::GetSpecial { .. } => "getspecial",
            Insn::SetSpecial => "setspecial",
            Insn::Defined => "defined",
            Insn::Dup => "dup",
            Insn::DupN { .. } => "dupn",
            Insn::Pop => "pop",
            Insn::Swap => "swap",
            Insn::Reverse { .. } => "reverse",
            Insn::SetN { .. } => "setn",
            Insn::TopN { .. } => "topn",
            Insn::AdjustStack { .. } => "adjuststack",
            Insn::CheckMatch { .. } => "checkmatch",
            Insn::CheckKeyword => "checkkeyword",
            Insn::CheckType { .. } => "checktype",
            Insn::SplatArray => "splatarray",
            Insn::ConcatArray => "concatarray",
            Insn::ExpandArray { .. } => "expandarray",
            Insn::GetLocal { .. } => "getlocal",
            Insn::SetLocal { .. } => "setlocal",
            Insn::GetInstanceVariable { .. } => "getinstancevariable",
            Insn::SetInstanceVariable { .. } => "setinstancevariable",
            Insn::GetClassVariable { .. } => "getclassvariable",
            Insn::SetClassVariable { .. } => "setclassvariable",
            Insn::GetGlobal { .. } => "getglobal",
            Insn::SetGlobal { .. } => "setglobal",
            Insn::GetConstant { .. } => "getconstant",
            Insn::SetConstant { .. } => "setconstant",
            Insn::DefineMethod { .. } => "definemethod",
            Insn::DefineSMethod { .. } => "definesmethod",
            Insn::DefineClass { .. } => "defineclass",
            Insn::Once { .. } => "once",
            Insn::Send { .. } => "send",
            Insn::InvokeSuper { .. } => "invokesuper",
            Insn::InvokeBlock { .. } => "invokeblock",
            Insn::Leave => "leave",
            Insn::Throw { .. } => "throw",
            Insn::Branch { .. } => "branch",
            Insn::Jump { .. } => "jump",
            Insn::SendBranch { .. } => "send_branch",
            Insn::GetLocalSendBranch { .. } => "getlocal_send_branch",
            Insn::GetLocalBranch { .. } => "getlocal_branch",
            Insn::GetLocalDupBranch { .. } => "getlocal_dup_branch",
            Insn::DupBranch { .. } => "dup_branch",
            Insn::GetLocalCheckMatchBranch { .. } => "getlocal_checkmatch_branch",
        }
    }
}
