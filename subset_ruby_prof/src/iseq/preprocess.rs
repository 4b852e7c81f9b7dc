//! Preprocessing of instruction sequences before interpretation.
//!
//! 1. A `body_start` marker is inserted after the parameter prologue of every
//!    method and block body. Stepping it records the signature.
//! 2. A `nop` is inserted at every rescue/ensure continuation label, so the label
//!    owns an instruction that no fusion can swallow.
//! 3. Adjacent test-and-branch patterns are fused into single instructions, so
//!    the interpreter can narrow the tested local differently on each side.
//!
//! Insertions relocate every pc reference (jump targets, optional-argument labels,
//! region tables). A reference to the insertion point keeps pointing at it, so it
//! lands on the inserted instruction.

use std::collections::BTreeSet;

use super::insn::{CallInfo, Insn, LiteralValue};
use super::{CatchKind, ISeq, IseqKind, Program};

pub fn preprocess_program(program: &Program) -> Program {
    let mut out = program.clone();
    for iseq in &mut out.iseqs {
        preprocess(iseq);
    }
    out
}

pub fn preprocess(iseq: &mut ISeq) {
    insert_region_nops(iseq);
    insert_body_start(iseq);
    fuse_branches(iseq);
}

fn insert_at(iseq: &mut ISeq, pos: usize, insn: Insn) {
    let relocate = |pc: &mut usize| {
        if *pc > pos {
            *pc += 1;
        }
    };
    for existing in &mut iseq.insns {
        if let Some(target) = existing.target_mut() {
            relocate(target);
        }
    }
    for label in &mut iseq.params.opt {
        relocate(label);
    }
    for entry in &mut iseq.catch_table {
        relocate(&mut entry.start);
        relocate(&mut entry.end);
        relocate(&mut entry.cont);
    }
    if pos < iseq.lines.len() {
        let line = iseq.lines[pos];
        iseq.lines.insert(pos, line);
    }
    iseq.insns.insert(pos, insn);
}

fn insert_region_nops(iseq: &mut ISeq) {
    let conts: BTreeSet<usize> = iseq
        .catch_table
        .iter()
        .filter(|e| matches!(e.kind, CatchKind::Rescue | CatchKind::Ensure))
        .map(|e| e.cont)
        .collect();
    // Highest first so that earlier labels are not shifted by later insertions.
    for cont in conts.into_iter().rev() {
        insert_at(iseq, cont, Insn::Nop);
    }
}

fn insert_body_start(iseq: &mut ISeq) {
    if !matches!(iseq.kind, IseqKind::Method | IseqKind::Block) {
        return;
    }
    let mut pos = iseq.params.opt.last().copied().unwrap_or(0);
    // Keyword defaults are computed before the body starts.
    while let (Some(Insn::CheckKeyword), Some(Insn::Branch { target, .. })) =
        (iseq.insns.get(pos), iseq.insns.get(pos + 1))
    {
        if *target <= pos {
            break;
        }
        pos = *target;
    }
    insert_at(iseq, pos, Insn::BodyStart);
}

/// Every pc some other instruction may transfer control to.
fn jump_targets(iseq: &ISeq) -> BTreeSet<usize> {
    let mut targets: BTreeSet<usize> = iseq.insns.iter().filter_map(Insn::target).collect();
    targets.extend(iseq.params.opt.iter().copied());
    for entry in &iseq.catch_table {
        targets.insert(entry.cont);
        targets.insert(entry.start);
    }
    targets
}

fn fuse_branches(iseq: &mut ISeq) {
    let targets = jump_targets(iseq);
    let free = |pcs: &[usize]| pcs.iter().all(|pc| !targets.contains(pc));

    // getlocal, <simple pushes>, send, branch
    for i in 0..iseq.insns.len() {
        let Insn::GetLocal { idx, level: 0 } = iseq.insns[i] else {
            continue;
        };
        let Some((send_pc, call)) = find_receiver_send(&iseq.insns, i + 1) else {
            continue;
        };
        let Some(Insn::Branch { kind, target }) = iseq.insns.get(send_pc + 1).cloned() else {
            continue;
        };
        let interior: Vec<usize> = (i + 1..=send_pc + 1).collect();
        if !free(&interior) {
            continue;
        }
        iseq.insns[send_pc] = Insn::Nop;
        iseq.insns[send_pc + 1] = Insn::GetLocalSendBranch {
            idx,
            call,
            kind,
            target,
        };
    }

    // send, branch
    for i in 0..iseq.insns.len().saturating_sub(1) {
        let (Insn::Send { call }, Insn::Branch { kind, target }) =
            (&iseq.insns[i], &iseq.insns[i + 1])
        else {
            continue;
        };
        if !free(&[i + 1]) {
            continue;
        }
        let fused = Insn::SendBranch {
            call: call.clone(),
            kind: *kind,
            target: *target,
        };
        iseq.insns[i] = fused;
        iseq.insns[i + 1] = Insn::Nop;
    }

    // getlocal, dup, branch
    for i in 0..iseq.insns.len().saturating_sub(2) {
        let (Insn::GetLocal { idx, level: 0 }, Insn::Dup, Insn::Branch { kind, target }) =
            (&iseq.insns[i], &iseq.insns[i + 1], &iseq.insns[i + 2])
        else {
            continue;
        };
        if !free(&[i + 1, i + 2]) {
            continue;
        }
        let fused = Insn::GetLocalDupBranch {
            idx: *idx,
            kind: *kind,
            target: *target,
        };
        iseq.insns[i] = fused;
        iseq.insns[i + 1] = Insn::Nop;
        iseq.insns[i + 2] = Insn::Nop;
    }

    // dup, branch
    for i in 0..iseq.insns.len().saturating_sub(1) {
        let (Insn::Dup, Insn::Branch { kind, target }) = (&iseq.insns[i], &iseq.insns[i + 1])
        else {
            continue;
        };
        if !free(&[i + 1]) {
            continue;
        }
        let fused = Insn::DupBranch {
            kind: *kind,
            target: *target,
        };
        iseq.insns[i] = fused;
        iseq.insns[i + 1] = Insn::Nop;
    }

    // getlocal, branch
    for i in 0..iseq.insns.len().saturating_sub(1) {
        let (Insn::GetLocal { idx, level: 0 }, Insn::Branch { kind, target }) =
            (&iseq.insns[i], &iseq.insns[i + 1])
        else {
            continue;
        };
        if !free(&[i + 1]) {
            continue;
        }
        let fused = Insn::GetLocalBranch {
            idx: *idx,
            kind: *kind,
            target: *target,
        };
        iseq.insns[i] = fused;
        iseq.insns[i + 1] = Insn::Nop;
    }

    fuse_case_when(iseq, &targets);
}

/// Finds a `send` whose receiver is the value pushed just before `start`,
/// allowing only simple pushes for its arguments.
fn find_receiver_send(insns: &[Insn], start: usize) -> Option<(usize, CallInfo)> {
    // Values pushed since the receiver.
    let mut sp = 0usize;
    for (pc, insn) in insns.iter().enumerate().skip(start) {
        match insn {
            Insn::PutNil
            | Insn::PutSelf
            | Insn::PutObject { .. }
            | Insn::PutString { .. }
            | Insn::GetLocal { .. }
            | Insn::GetInstanceVariable { .. }
            | Insn::GetGlobal { .. }
            | Insn::Dup => sp += 1,
            Insn::GetConstant { .. } => {
                if sp < 2 {
                    return None;
                }
                sp -= 1;
            }
            Insn::Send { call } => {
                let simple = call.block.is_none()
                    && !call.flags.args_splat
                    && !call.flags.args_blockarg
                    && !call.flags.kw_splat;
                if simple && call.stack_args() == sp {
                    return Some((pc, call.clone()));
                }
                return None;
            }
            _ => return None,
        }
    }
    None
}

/// `case x when A ... when B ... end`:
///
/// ```text
/// getlocal x
/// (dup, putnil, putobject true, getconstant C, checkmatch 2, branch L)*
/// pop
/// ```
///
/// where every `L` starts with `pop`. The `getlocal`, `dup`, `checkmatch`, each
/// `L: pop` and the final `pop` become `nop`s, and every `branch` becomes a test
/// of the local against the class on the stack.
fn fuse_case_when(iseq: &mut ISeq, targets: &BTreeSet<usize>) {
    for i in 0..iseq.insns.len() {
        let Insn::GetLocal { idx, level: 0 } = iseq.insns[i] else {
            continue;
        };
        let mut nops = vec![i];
        let mut fused = Vec::new();
        let mut j = i + 1;
        let mut complete = false;
        loop {
            match iseq.insns.get(j) {
                Some(Insn::Dup) => {
                    let shape_ok = matches!(iseq.insns.get(j + 1), Some(Insn::PutNil))
                        && matches!(
                            iseq.insns.get(j + 2),
                            Some(Insn::PutObject {
                                value: LiteralValue::True
                            })
                        )
                        && matches!(iseq.insns.get(j + 3), Some(Insn::GetConstant { .. }))
                        && matches!(iseq.insns.get(j + 4), Some(Insn::CheckMatch { flag: 2 }));
                    if !shape_ok {
                        break;
                    }
                    let Some(Insn::Branch { kind, target }) = iseq.insns.get(j + 5).cloned() else {
                        break;
                    };
                    if !matches!(iseq.insns.get(target), Some(Insn::Pop)) {
                        break;
                    }
                    nops.extend([j, j + 4, target]);
                    fused.push((j + 5, Insn::GetLocalCheckMatchBranch { idx, kind, target }));
                    j += 6;
                }
                Some(Insn::Pop) => {
                    nops.push(j);
                    complete = !fused.is_empty();
                    break;
                }
                _ => break,
            }
        }
        if !complete {
            continue;
        }
        let interior_targets = (i + 1..=j)
            .filter(|pc| targets.contains(pc))
            .any(|pc| !fused.iter().any(|(_, insn)| insn.target() == Some(pc)));
        if interior_targets {
            continue;
        }
        for pc in nops {
            iseq.insns[pc] = Insn::Nop;
        }
        for (pc, insn) in fused {
            iseq.insns[pc] = insn;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::iseq::builder::ISeqBuilder;
    use crate::iseq::BranchKind;

    #[test]
    fn test_body_start_inserted_at_last_opt_label() {
        let mut b = ISeqBuilder::new("m", IseqKind::Method).locals(&["a"]);
        b.put_int(1).set_local(0).put_nil().leave();
        let mut iseq = b.finish();
        iseq.params.lead_num = 0;
        iseq.params.opt = vec![0, 2];
        preprocess(&mut iseq);

        assert_eq!(iseq.insns[2], Insn::BodyStart);
        assert_eq!(iseq.params.opt, vec![0, 2]);
    }

    #[test]
    fn test_insertion_relocates_targets() {
        let mut b = ISeqBuilder::new("m", IseqKind::Method);
        b.put_nil().branch(BranchKind::If, 3).put_nil().put_nil().leave();
        let mut iseq = b.finish();
        preprocess(&mut iseq);

        assert_eq!(iseq.insns[0], Insn::BodyStart);
        assert_eq!(iseq.insns[2].target(), Some(4));
    }

    #[test]
    fn test_getlocal_branch_fusion() {
        let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["x"]);
        b.get_local(0)
            .branch(BranchKind::Unless, 4)
            .put_int(1)
            .leave()
            .put_nil()
            .leave();
        let mut iseq = b.finish();
        preprocess(&mut iseq);

        assert_eq!(
            iseq.insns[0],
            Insn::GetLocalBranch {
                idx: 0,
                kind: BranchKind::Unless,
                target: 4
            }
        );
        assert_eq!(iseq.insns[1], Insn::Nop);
    }

    #[test]
    fn test_getlocal_send_branch_fusion() {
        let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["x"]);
        b.get_local(0)
            .send("nil?", 0)
            .branch(BranchKind::If, 5)
            .put_int(1)
            .leave()
            .put_nil()
            .leave();
        let mut iseq = b.finish();
        preprocess(&mut iseq);

        assert_eq!(iseq.insns[0], Insn::GetLocal { idx: 0, level: 0 });
        assert_eq!(iseq.insns[1], Insn::Nop);
        assert!(matches!(
            iseq.insns[2],
            Insn::GetLocalSendBranch { idx: 0, target: 5, .. }
        ));
    }

    #[test]
    fn test_no_fusion_across_jump_target() {
        let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["x"]);
        b.put_nil()
            .jump(2)
            .get_local(0)
            .dup()
            .branch(BranchKind::If, 6)
            .pop()
            .put_nil()
            .leave();
        let mut iseq = b.finish();
        // pc 3 (dup) is a jump target, so getlocal+dup+branch must stay unfused.
        iseq.insns[1] = Insn::Jump { target: 3 };
        preprocess(&mut iseq);

        assert_eq!(iseq.insns[2], Insn::GetLocal { idx: 0, level: 0 });
        assert!(matches!(iseq.insns[3], Insn::DupBranch { .. }));
    }

    #[test]
    fn test_case_when_fusion() {
        let mut b = ISeqBuilder::new("<main>", IseqKind::Top).locals(&["x"]);
        b.get_local(0) // 0
            .dup() // 1
            .put_nil() // 2
            .put_object(LiteralValue::True) // 3
            .get_constant("Integer") // 4
            .check_match(2) // 5
            .branch(BranchKind::If, 9) // 6
            .pop() // 7
            .jump(11) // 8
            .pop() // 9
            .put_int(1) // 10
            .leave(); // 11
        let mut iseq = b.finish();
        fuse_branches(&mut iseq);

        assert_eq!(iseq.insns[0], Insn::Nop);
        assert_eq!(iseq.insns[1], Insn::Nop);
        assert_eq!(iseq.insns[5], Insn::Nop);
        assert_eq!(
            iseq.insns[6],
            Insn::GetLocalCheckMatchBranch {
                idx: 0,
                kind: BranchKind::If,
                target: 9
            }
        );
        assert_eq!(iseq.insns[7], Insn::Nop);
        assert_eq!(iseq.insns[9], Insn::Nop);
    }
}
