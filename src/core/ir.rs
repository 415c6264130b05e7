// This module defines the lowered IR consumed by the ARM64 encoder: the closed
// opcode enumeration, the tagged operand variants (physical register,
// immediate, symbolic stack slot, indirect memory, with register pairs carried
// by the second source/destination slot), and the Instruction value itself.
// Instructions arrive here already lowered and register-allocated; the encoder
// never reorders or deletes them. The module also owns the static per-opcode
// metadata table consulted by other passes through opcode_meta(). Width and
// int-vs-float class are derived from an operand's value type and validated
// against each dispatch routine's precondition at encode time.

//! Lowered IR data model for the ARM64 encoder.

/// Identifier of a branch target recorded by a label marker instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LabelId(pub u32);

/// Type for register bank indices (0 = general purpose, 1 = float/SIMD).
pub type RegBank = u8;

/// Type for register IDs within a bank.
pub type RegId = u8;

/// Combined physical register identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Reg {
    pub bank: RegBank,
    pub id: RegId,
}

impl Reg {
    pub const fn new(bank: RegBank, id: RegId) -> Self {
        Self { bank, id }
    }

    pub const fn is_float(&self) -> bool {
        self.bank == 1
    }
}

/// Value types carried by operands. Width in bytes and int-vs-float class are
/// derived from this; sub-word integer types appear only on memory operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Int8,
    Int16,
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float32,
    Float64,
}

impl ValueType {
    pub const fn size_bytes(self) -> u8 {
        match self {
            ValueType::Int8 => 1,
            ValueType::Int16 => 2,
            ValueType::Int32 | ValueType::Uint32 | ValueType::Float32 => 4,
            ValueType::Int64 | ValueType::Uint64 | ValueType::Float64 => 8,
        }
    }

    pub const fn is_float(self) -> bool {
        matches!(self, ValueType::Float32 | ValueType::Float64)
    }
}

/// Kind of a stack symbol, as assigned by frame layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    /// Ordinary local slot.
    Local,
    /// Outgoing argument slot for a call; `orphaned` slots lost their call
    /// during lowering and are addressed like locals.
    ArgOut { orphaned: bool },
    /// Incoming parameter slot, addressed above the local stack area.
    Param,
}

/// A logical stack symbol with its statically assigned frame offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackSlot {
    pub frame_offset: i32,
    pub kind: SlotKind,
}

impl StackSlot {
    pub const fn local(frame_offset: i32) -> Self {
        Self { frame_offset, kind: SlotKind::Local }
    }

    pub const fn arg_out(frame_offset: i32, orphaned: bool) -> Self {
        Self { frame_offset, kind: SlotKind::ArgOut { orphaned } }
    }

    pub const fn param(frame_offset: i32) -> Self {
        Self { frame_offset, kind: SlotKind::Param }
    }

    pub const fn is_param(&self) -> bool {
        matches!(self.kind, SlotKind::Param)
    }
}

/// Physical register operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegOperand {
    pub reg: Reg,
    pub ty: ValueType,
}

/// Immediate constant known at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImmOperand {
    pub value: i64,
    pub ty: ValueType,
}

/// Symbolic stack operand: a stack symbol plus a static byte sub-offset.
/// Resolved to a concrete base register + offset only at encode time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOperand {
    pub slot: StackSlot,
    pub offset: i32,
    pub ty: ValueType,
}

/// Indirect memory operand. `offset` is always zero whenever `index` is
/// present; base+offset and base+scaled-index addressing are mutually
/// exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndirOperand {
    pub base: Reg,
    pub index: Option<Reg>,
    pub scale: u8,
    pub offset: i32,
    pub ty: ValueType,
}

/// Tagged operand variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Reg(RegOperand),
    Imm(ImmOperand),
    Stack(StackOperand),
    Indir(IndirOperand),
}

impl Operand {
    pub const fn reg(reg: Reg, ty: ValueType) -> Self {
        Operand::Reg(RegOperand { reg, ty })
    }

    pub const fn imm(value: i64, ty: ValueType) -> Self {
        Operand::Imm(ImmOperand { value, ty })
    }

    pub const fn stack(slot: StackSlot, offset: i32, ty: ValueType) -> Self {
        Operand::Stack(StackOperand { slot, offset, ty })
    }

    pub const fn base_offset(base: Reg, offset: i32, ty: ValueType) -> Self {
        Operand::Indir(IndirOperand { base, index: None, scale: 0, offset, ty })
    }

    pub const fn base_index(base: Reg, index: Reg, scale: u8, ty: ValueType) -> Self {
        Operand::Indir(IndirOperand { base, index: Some(index), scale, offset: 0, ty })
    }

    pub const fn ty(&self) -> ValueType {
        match self {
            Operand::Reg(r) => r.ty,
            Operand::Imm(i) => i.ty,
            Operand::Stack(s) => s.ty,
            Operand::Indir(m) => m.ty,
        }
    }

    /// Operand width in bytes, derived from the value type.
    pub const fn size(&self) -> u8 {
        self.ty().size_bytes()
    }

    pub const fn is_float(&self) -> bool {
        self.ty().is_float()
    }

    pub const fn as_reg(&self) -> Option<RegOperand> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    pub const fn is_reg(&self) -> bool {
        matches!(self, Operand::Reg(_))
    }

    pub const fn is_imm(&self) -> bool {
        matches!(self, Operand::Imm(_))
    }

    pub const fn is_mem(&self) -> bool {
        matches!(self, Operand::Stack(_) | Operand::Indir(_))
    }
}

/// Closed opcode enumeration for the lowered ARM64 IR.
///
/// Raw compare/test/address/remainder/load-immediate forms (`Cmp`, `Cmn`,
/// `Tst`, `Lea`, `Rem`, `Ldimm`) are listed because lowering produces them,
/// but legalization guarantees they are rewritten before encoding; reaching
/// dispatch with one of them is an internal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Add,
    Adds,
    And,
    Ands,
    Asr,
    B,
    Beq,
    Bne,
    Blt,
    Ble,
    Bgt,
    Bge,
    Bcs,
    Bcc,
    Bhi,
    Bls,
    Bmi,
    Bpl,
    Bvs,
    Bvc,
    Bfi,
    Bfxil,
    Bic,
    Bl,
    Blr,
    Br,
    Cbnz,
    Cbz,
    Clz,
    Cmn,
    Cmp,
    CmpSxtw,
    CselLt,
    CsnegPl,
    DebugBreak,
    Eor,
    EorAsr31,
    Ldimm,
    Ldp,
    LdpPost,
    Ldr,
    Ldrs,
    Lea,
    Lsl,
    Lsr,
    Mov,
    MovTrunc,
    Movk,
    Movn,
    Movz,
    MrsFpcr,
    MrsFpsr,
    MsrFpcr,
    MsrFpsr,
    Msub,
    Mul,
    Mvn,
    Nop,
    Orr,
    Pld,
    Rem,
    Ret,
    Sbfx,
    Sdiv,
    Smaddl,
    Smull,
    Stp,
    StpPre,
    Str,
    Sub,
    SubLsl4,
    Subs,
    Tbnz,
    Tbz,
    Tst,
    Ubfx,
    // Scalar floating point.
    Fabs,
    Fadd,
    Fcmp,
    Fcvt,
    Fcvtm,
    Fcvtn,
    Fcvtp,
    Fcvtz,
    Fdiv,
    Fldp,
    Fldr,
    Fmax,
    Fmin,
    Fmov,
    FmovGen,
    Fmul,
    Fneg,
    Frintm,
    Frintp,
    Fsqrt,
    Fstp,
    Fstr,
    Fsub,
    /// Branch-target marker; never lowered, consumed for PC bookkeeping only.
    Label,
}

/// One lowered IR instruction.
///
/// For the pair load/store forms (`Ldp`, `LdpPost`, `Fldp`), `src2` is really
/// the second destination register; the instruction shape has only one dst
/// slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub opcode: Opcode,
    pub dst: Option<Operand>,
    pub src1: Option<Operand>,
    pub src2: Option<Operand>,
    pub lowered: bool,
    pub target: Option<LabelId>,
}

impl Instruction {
    /// Instruction with no operands (NOP, RET-to-LR handled via op1, etc).
    pub const fn op0(opcode: Opcode) -> Self {
        Self { opcode, dst: None, src1: None, src2: None, lowered: true, target: None }
    }

    pub const fn op1(opcode: Opcode, src1: Operand) -> Self {
        Self { opcode, dst: None, src1: Some(src1), src2: None, lowered: true, target: None }
    }

    pub const fn op2(opcode: Opcode, dst: Operand, src1: Operand) -> Self {
        Self { opcode, dst: Some(dst), src1: Some(src1), src2: None, lowered: true, target: None }
    }

    pub const fn op3(opcode: Opcode, dst: Operand, src1: Operand, src2: Operand) -> Self {
        Self {
            opcode,
            dst: Some(dst),
            src1: Some(src1),
            src2: Some(src2),
            lowered: true,
            target: None,
        }
    }

    /// Branch to a label, with no register operands (B, BL, conditional B).
    pub const fn branch(opcode: Opcode, target: LabelId) -> Self {
        Self { opcode, dst: None, src1: None, src2: None, lowered: true, target: Some(target) }
    }

    /// Compare-and-branch (CBZ/CBNZ): one register source plus a target.
    pub const fn cmp_branch(opcode: Opcode, src1: Operand, target: LabelId) -> Self {
        Self { opcode, dst: None, src1: Some(src1), src2: None, lowered: true, target: Some(target) }
    }

    /// Test-bit-and-branch (TBZ/TBNZ): register, bit index, target.
    pub const fn test_branch(opcode: Opcode, src1: Operand, bit: Operand, target: LabelId) -> Self {
        Self {
            opcode,
            dst: None,
            src1: Some(src1),
            src2: Some(bit),
            lowered: true,
            target: Some(target),
        }
    }

    /// Label marker. Not lowered; the encoder records its PC and skips it.
    pub const fn label(id: LabelId) -> Self {
        Self {
            opcode: Opcode::Label,
            dst: None,
            src1: None,
            src2: None,
            lowered: false,
            target: Some(id),
        }
    }
}

// Opcode property flags, mirrored by the static metadata table below.
pub const META_BRANCH: u32 = 1 << 0;
pub const META_CALL: u32 = 1 << 1;
pub const META_LOAD: u32 = 1 << 2;
pub const META_STORE: u32 = 1 << 3;
pub const META_SETS_FLAGS: u32 = 1 << 4;
pub const META_USES_FLAGS: u32 = 1 << 5;
pub const META_MOVE: u32 = 1 << 6;
pub const META_FLOAT: u32 = 1 << 7;
pub const META_PSEUDO: u32 = 1 << 8;

/// Static per-opcode property bitmask, consulted by passes outside the
/// encoder core. Built once at compile time; the encoder itself only reads it
/// for validation.
pub const fn opcode_meta(op: Opcode) -> u32 {
    use Opcode::*;
    match op {
        B | Bl | Br | Blr => {
            if matches!(op, Bl | Blr) {
                META_BRANCH | META_CALL
            } else {
                META_BRANCH
            }
        }
        Beq | Bne | Blt | Ble | Bgt | Bge | Bcs | Bcc | Bhi | Bls | Bmi | Bpl | Bvs | Bvc => {
            META_BRANCH | META_USES_FLAGS
        }
        Cbz | Cbnz | Tbz | Tbnz => META_BRANCH,
        Adds | Ands | Subs | CmpSxtw | Fcmp => META_SETS_FLAGS,
        Cmp | Cmn | Tst => META_PSEUDO | META_SETS_FLAGS,
        CselLt | CsnegPl => META_USES_FLAGS,
        Ldr | Ldrs | Ldp | LdpPost | Fldr | Fldp => META_LOAD,
        Str | Stp | StpPre | Fstr | Fstp => META_STORE,
        Mov | MovTrunc | Movz | Movn | Movk | Fmov | FmovGen => META_MOVE,
        Lea | Ldimm | Rem | Label => META_PSEUDO,
        Fabs | Fadd | Fcvt | Fcvtm | Fcvtn | Fcvtp | Fcvtz | Fdiv | Fmax | Fmin | Fmul | Fneg
        | Frintm | Frintp | Fsqrt | Fsub => META_FLOAT,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn operand_widths_derive_from_type() {
        let r = Operand::reg(Reg::new(0, 0), ValueType::Int64);
        assert_eq!(r.size(), 8);
        assert!(!r.is_float());

        let f = Operand::reg(Reg::new(1, 3), ValueType::Float32);
        assert_eq!(f.size(), 4);
        assert!(f.is_float());
    }

    #[test]
    fn indirect_operand_modes_are_exclusive() {
        let m = Operand::base_index(Reg::new(0, 2), Reg::new(0, 3), 3, ValueType::Int64);
        match m {
            Operand::Indir(ind) => {
                assert!(ind.index.is_some());
                assert_eq!(ind.offset, 0);
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn metadata_classifies_branches_and_moves() {
        assert_ne!(opcode_meta(Opcode::B) & META_BRANCH, 0);
        assert_ne!(opcode_meta(Opcode::Bl) & META_CALL, 0);
        assert_ne!(opcode_meta(Opcode::Beq) & META_USES_FLAGS, 0);
        assert_ne!(opcode_meta(Opcode::Mov) & META_MOVE, 0);
        assert_ne!(opcode_meta(Opcode::Lea) & META_PSEUDO, 0);
        assert_eq!(opcode_meta(Opcode::Add), 0);
    }
}
