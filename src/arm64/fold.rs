//! Local peephole folding of moves.
//!
//! When the register allocator knows a single-use register holds a constant
//! or lives in a stack slot, the move that materialized it can sometimes be
//! deleted by substituting the constant or stack operand directly into the
//! one consuming instruction. The rewrite is strictly local: it looks only at
//! the immediate consumer, re-validates the result through the legalization
//! seam, and restores the instruction untouched when the legalizer rejects
//! it.

use crate::core::ir::{ImmOperand, Instruction, Opcode, Operand, Reg, StackOperand};

/// Legalization seam. The encoder does not own legalization rules; the
/// surrounding backend supplies them when folding.
pub trait Legalizer {
    /// Rewrite `instr` into an encodable form if needed. Returns false when
    /// the instruction cannot be made legal, in which case the fold is
    /// abandoned.
    fn legalize(&mut self, instr: &mut Instruction) -> bool;
}

fn src1_matches(instr: &Instruction, reg: Reg) -> bool {
    matches!(instr.src1, Some(Operand::Reg(r)) if r.reg == reg)
}

/// Whether `instr` is a plain register-to-register assignment.
fn is_assign(instr: &Instruction) -> bool {
    matches!(instr.opcode, Opcode::Mov | Opcode::MovTrunc | Opcode::Fmov)
        && matches!(instr.dst, Some(Operand::Reg(_)))
}

/// Substitute a known constant for `reg` in its consuming move.
///
/// Succeeds only when the consumer is a plain `Mov` whose source is `reg`,
/// the destination is a register, and the constant is no wider than the
/// register it replaces. Returns true when the fold was committed.
pub fn try_const_fold(
    instr: &mut Instruction,
    reg: Reg,
    constant: ImmOperand,
    legalizer: &mut dyn Legalizer,
) -> bool {
    if instr.opcode != Opcode::Mov {
        return false;
    }
    if !src1_matches(instr, reg) || !matches!(instr.dst, Some(Operand::Reg(_))) {
        return false;
    }
    let original = match instr.src1 {
        Some(src) => src,
        None => return false,
    };
    if constant.ty.size_bytes() > original.size() {
        return false;
    }

    instr.src1 = Some(Operand::Imm(constant));
    if !legalizer.legalize(instr) {
        instr.src1 = Some(original);
        return false;
    }
    log::trace!("folded constant {:#x} into {:?}", constant.value, instr.opcode);
    true
}

/// Substitute a stack-resident register's home slot for `reg` in its
/// consuming assignment, turning a register move into a stack load.
pub fn try_stack_fold(
    instr: &mut Instruction,
    reg: Reg,
    slot: StackOperand,
    legalizer: &mut dyn Legalizer,
) -> bool {
    if !is_assign(instr) {
        return false;
    }
    if !src1_matches(instr, reg) {
        return false;
    }
    let original = match instr.src1 {
        Some(src) => src,
        None => return false,
    };

    instr.src1 = Some(Operand::Stack(slot));
    if !legalizer.legalize(instr) {
        instr.src1 = Some(original);
        return false;
    }
    true
}
