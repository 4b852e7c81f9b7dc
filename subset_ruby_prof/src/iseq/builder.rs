//! Programmatic construction of instruction streams.
//!
//! Used by tests and by embedders that produce programs without going through JSON.
//!
//! # Example
//!
//! ```
//! use subset_ruby_prof::iseq::builder::{ISeqBuilder, ProgramBuilder};
//! use subset_ruby_prof::iseq::IseqKind;
//!
//! let mut program = ProgramBuilder::new("demo.rb");
//! let mut main = ISeqBuilder::new("<main>", IseqKind::Top);
//! main.put_int(1).leave();
//! let main = program.add(main.finish());
//! let program = program.build(main);
//! assert_eq!(program.iseqs.len(), 1);
//! ```

use super::insn::{BranchKind, CallInfo, ClassDefKind, Insn, LiteralValue, ThrowKind};
use super::{CatchEntry, CatchKind, ISeq, IseqId, IseqKind, ParamShape, Program};

#[derive(Debug)]
pub struct ProgramBuilder {
    path: String,
    iseqs: Vec<ISeq>,
}

impl ProgramBuilder {
    pub fn new(path: &str) -> Self {
        Self {
            path: path.to_string(),
            iseqs: Vec::new(),
        }
    }

    pub fn add(&mut self, mut iseq: ISeq) -> IseqId {
        if iseq.path.is_empty() {
            iseq.path = self.path.clone();
        }
        self.iseqs.push(iseq);
        IseqId(self.iseqs.len() as u32 - 1)
    }

    /// Allocates an id for a stream that is built later with [`ProgramBuilder::set`].
    /// Needed when a body refers to a block or method defined after it.
    pub fn reserve(&mut self) -> IseqId {
        self.add(ISeqBuilder::new("<reserved>", IseqKind::Block).finish())
    }

    pub fn set(&mut self, id: IseqId, mut iseq: ISeq) {
        if iseq.path.is_empty() {
            iseq.path = self.path.clone();
        }
        if let Some(slot) = self.iseqs.get_mut(id.index()) {
            *slot = iseq;
        }
    }

    pub fn build(self, main: IseqId) -> Program {
        Program {
            main,
            iseqs: self.iseqs,
        }
    }
}

/// Appends instructions one at a time, tracking the current source line.
#[derive(Debug)]
pub struct ISeqBuilder {
    iseq: ISeq,
    line: u32,
}

impl ISeqBuilder {
    pub fn new(name: &str, kind: IseqKind) -> Self {
        Self {
            iseq: ISeq {
                name: name.to_string(),
                path: String::new(),
                kind,
                locals: Vec::new(),
                params: ParamShape::default(),
                insns: Vec::new(),
                lines: Vec::new(),
                catch_table: Vec::new(),
            },
            line: 1,
        }
    }

    pub fn locals(mut self, names: &[&str]) -> Self {
        self.iseq.locals = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn params(mut self, params: ParamShape) -> Self {
        self.iseq.params = params;
        self
    }

    /// Shorthand for `lead_num` required positional parameters.
    pub fn lead(mut self, lead_num: usize) -> Self {
        self.iseq.params.lead_num = lead_num;
        self
    }

    /// Line number recorded for the following instructions.
    pub fn line(&mut self, line: u32) -> &mut Self {
        self.line = line;
        self
    }

    /// Pc of the next instruction.
    pub fn pc(&self) -> usize {
        self.iseq.insns.len()
    }

    pub fn insn(&mut self, insn: Insn) -> &mut Self {
        self.iseq.insns.push(insn);
        self.iseq.lines.push(self.line);
        self
    }

    /// Rewrites the target of an already emitted jump or branch.
    pub fn patch_target(&mut self, pc: usize, target: usize) -> &mut Self {
        if let Some(slot) = self.iseq.insns.get_mut(pc).and_then(Insn::target_mut) {
            *slot = target;
        }
        self
    }

    pub fn catch(
        &mut self,
        kind: CatchKind,
        iseq: Option<IseqId>,
        start: usize,
        end: usize,
        cont: usize,
        stack_depth: usize,
    ) -> &mut Self {
        self.iseq.catch_table.push(CatchEntry {
            kind,
            iseq,
            start,
            end,
            cont,
            stack_depth,
        });
        self
    }

    pub fn finish(self) -> ISeq {
        self.iseq
    }

    pub fn nop(&mut self) -> &mut Self {
        self.insn(Insn::Nop)
    }

    pub fn put_nil(&mut self) -> &mut Self {
        self.insn(Insn::PutNil)
    }

    pub fn put_self(&mut self) -> &mut Self {
        self.insn(Insn::PutSelf)
    }

    pub fn put_object(&mut self, value: LiteralValue) -> &mut Self {
        self.insn(Insn::PutObject { value })
    }

    pub fn put_int(&mut self, value: i64) -> &mut Self {
        self.put_object(LiteralValue::Integer(value))
    }

    pub fn put_sym(&mut self, name: &str) -> &mut Self {
        self.put_object(LiteralValue::Symbol(name.to_string()))
    }

    pub fn put_str(&mut self, value: &str) -> &mut Self {
        self.insn(Insn::PutString {
            value: value.to_string(),
        })
    }

    pub fn put_special(&mut self, kind: u8) -> &mut Self {
        self.insn(Insn::PutSpecialObject { kind })
    }

    pub fn dup(&mut self) -> &mut Self {
        self.insn(Insn::Dup)
    }

    pub fn pop(&mut self) -> &mut Self {
        self.insn(Insn::Pop)
    }

    pub fn new_array(&mut self, len: usize) -> &mut Self {
        self.insn(Insn::NewArray { len })
    }

    pub fn new_hash(&mut self, len: usize) -> &mut Self {
        self.insn(Insn::NewHash { len })
    }

    pub fn get_local(&mut self, idx: usize) -> &mut Self {
        self.insn(Insn::GetLocal { idx, level: 0 })
    }

    pub fn set_local(&mut self, idx: usize) -> &mut Self {
        self.insn(Insn::SetLocal { idx, level: 0 })
    }

    pub fn get_local_level(&mut self, idx: usize, level: usize) -> &mut Self {
        self.insn(Insn::GetLocal { idx, level })
    }

    pub fn set_local_level(&mut self, idx: usize, level: usize) -> &mut Self {
        self.insn(Insn::SetLocal { idx, level })
    }

    pub fn get_ivar(&mut self, name: &str) -> &mut Self {
        self.insn(Insn::GetInstanceVariable {
            name: name.to_string(),
        })
    }

    pub fn set_ivar(&mut self, name: &str) -> &mut Self {
        self.insn(Insn::SetInstanceVariable {
            name: name.to_string(),
        })
    }

    pub fn get_global(&mut self, name: &str) -> &mut Self {
        self.insn(Insn::GetGlobal {
            name: name.to_string(),
        })
    }

    pub fn set_global(&mut self, name: &str) -> &mut Self {
        self.insn(Insn::SetGlobal {
            name: name.to_string(),
        })
    }

    pub fn get_constant(&mut self, name: &str) -> &mut Self {
        self.insn(Insn::GetConstant {
            name: name.to_string(),
        })
    }

    /// Lexical constant reference: `putnil; putobject true; getconstant name`.
    pub fn const_ref(&mut self, name: &str) -> &mut Self {
        self.put_nil()
            .put_object(LiteralValue::True)
            .get_constant(name)
    }

    pub fn check_match(&mut self, flag: u32) -> &mut Self {
        self.insn(Insn::CheckMatch { flag })
    }

    pub fn send(&mut self, mid: &str, argc: usize) -> &mut Self {
        self.send_call(CallInfo::simple(mid, argc))
    }

    /// Receiverless call (`foo(1)`), dispatched on `self` including private methods.
    pub fn fcall(&mut self, mid: &str, argc: usize) -> &mut Self {
        let mut call = CallInfo::simple(mid, argc);
        call.flags.fcall = true;
        self.send_call(call)
    }

    pub fn send_with_block(&mut self, mid: &str, argc: usize, block: IseqId) -> &mut Self {
        let mut call = CallInfo::simple(mid, argc);
        call.block = Some(block);
        self.send_call(call)
    }

    pub fn send_call(&mut self, call: CallInfo) -> &mut Self {
        self.insn(Insn::Send { call })
    }

    pub fn invoke_super(&mut self, argc: usize) -> &mut Self {
        self.insn(Insn::InvokeSuper {
            call: CallInfo::simple("", argc),
        })
    }

    pub fn invoke_block(&mut self, argc: usize) -> &mut Self {
        self.insn(Insn::InvokeBlock {
            call: CallInfo::simple("", argc),
        })
    }

    pub fn define_method(&mut self, mid: &str, iseq: IseqId) -> &mut Self {
        self.insn(Insn::DefineMethod {
            mid: mid.to_string(),
            iseq,
        })
    }

    pub fn define_smethod(&mut self, mid: &str, iseq: IseqId) -> &mut Self {
        self.insn(Insn::DefineSMethod {
            mid: mid.to_string(),
            iseq,
        })
    }

    /// `putspecialobject 3; putnil; defineclass name` (a class with no explicit superclass).
    pub fn define_class(&mut self, name: &str, iseq: IseqId, kind: ClassDefKind) -> &mut Self {
        self.put_special(3).put_nil().insn(Insn::DefineClass {
            name: name.to_string(),
            iseq,
            kind,
        })
    }

    /// `class Name < Superclass`, with the superclass looked up as a constant.
    pub fn define_subclass(&mut self, name: &str, iseq: IseqId, superclass: &str) -> &mut Self {
        self.put_special(3).const_ref(superclass).insn(Insn::DefineClass {
            name: name.to_string(),
            iseq,
            kind: ClassDefKind::Class,
        })
    }

    pub fn leave(&mut self) -> &mut Self {
        self.insn(Insn::Leave)
    }

    pub fn throw(&mut self, kind: ThrowKind) -> &mut Self {
        self.insn(Insn::Throw { kind })
    }

    pub fn branch(&mut self, kind: BranchKind, target: usize) -> &mut Self {
        self.insn(Insn::Branch { kind, target })
    }

    pub fn jump(&mut self, target: usize) -> &mut Self {
        self.insn(Insn::Jump { target })
    }
}
