// This module is the per-instruction encoding engine: it canonicalizes
// address-computation pseudo-ops into real additions, resolves symbolic stack
// operands against the function's frame layout, and dispatches every lowered
// opcode to a width- and shape-specific word builder from emit.rs. Dispatch is
// total over the opcode enumeration; opcodes the legalizer guarantees to have
// rewritten (CMP, CMN, TST, LEA, REM, LDIMM) are fatal if seen. Width
// selection is driven by the destination (or first source) operand: 4 bytes
// picks the 32-bit form, 8 bytes the 64-bit form, and loads/stores further
// select byte/half/word/doubleword sub-variants from the memory operand.
// Control-transfer opcodes register exactly one relocation record before
// their word is produced. Operand shape or width mismatches are reported as
// structured fatal errors since they indicate an upstream lowering defect.

//! Instruction canonicalization, stack-operand resolution and encoding
//! dispatch.

use bumpalo::Bump;
use hashbrown::HashMap;

use crate::arm64::emit::{self, Cond, Extend, FpRound, FpSize, Shift};
use crate::arm64::regs;
use crate::arm64::reloc::{RelocKind, RelocList};
use crate::core::error::{EncodeError, EncodeResult};
use crate::core::frame::{FrameLayout, LocalsBase};
use crate::core::ir::{
    Instruction, LabelId, Opcode, Operand, Reg, RegOperand, SlotKind, StackOperand, ValueType,
};

type RrForm = fn(u8, u8) -> u32;
type RrrForm = fn(u8, u8, u8) -> u32;
type RriForm = fn(u8, u8, u64) -> Option<u32>;
type MovWideForm = fn(u8, u16, u32) -> u32;
type BitfieldForm = fn(u8, u8, u32, u32) -> Option<u32>;
type CselForm = fn(u8, u8, u8, Cond) -> u32;
type CmpBranchForm = fn(u8) -> u32;
type LdStOffForm = fn(u8, u8, i32) -> Option<u32>;
type LdStRegForm = fn(u8, u8, u8, u8) -> Option<u32>;
type PairForm = fn(u8, u8, u8, i32) -> Option<u32>;
type FpRrForm = fn(FpSize, u8, u8) -> u32;
type FpRrrForm = fn(FpSize, u8, u8, u8) -> u32;
type FpLdStForm = fn(FpSize, u8, u8, i32) -> Option<u32>;
type FpPairForm = fn(FpSize, u8, u8, u8, i32) -> Option<u32>;

/// Size-keyed word builders for one load/store family.
struct LdStForms {
    r8: LdStRegForm,
    r16: LdStRegForm,
    r32: LdStRegForm,
    r64: LdStRegForm,
    o8: LdStOffForm,
    o16: LdStOffForm,
    o32: LdStOffForm,
    o64: LdStOffForm,
}

const LDR_FORMS: LdStForms = LdStForms {
    r8: emit::ldrb_reg,
    r16: emit::ldrh_reg,
    r32: emit::ldr_reg_w,
    r64: emit::ldr_reg_x,
    o8: emit::ldrb_off,
    o16: emit::ldrh_off,
    o32: emit::ldr_off_w,
    o64: emit::ldr_off_x,
};

// Sub-word signed loads target a 32-bit register, word loads widen to 64.
const LDRS_FORMS: LdStForms = LdStForms {
    r8: emit::ldrsb_reg_w,
    r16: emit::ldrsh_reg_w,
    r32: emit::ldrsw_reg_x,
    r64: emit::ldr_reg_x,
    o8: emit::ldrsb_off_w,
    o16: emit::ldrsh_off_w,
    o32: emit::ldrsw_off_x,
    o64: emit::ldr_off_x,
};

const STR_FORMS: LdStForms = LdStForms {
    r8: emit::strb_reg,
    r16: emit::strh_reg,
    r32: emit::str_reg_w,
    r64: emit::str_reg_x,
    o8: emit::strb_off,
    o16: emit::strh_off,
    o32: emit::str_off_w,
    o64: emit::str_off_x,
};

/// A memory operand resolved to one of the two hardware addressing modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedMem {
    BaseOffset { base: u8, offset: i32 },
    BaseIndex { base: u8, index: u8, scale: u8 },
}

/// Whether `offset` fits a machine-register load/store immediate field
/// (scaled unsigned 12-bit or unscaled signed 9-bit).
fn can_encode_ldst_offset(offset: i32) -> bool {
    (-256..256).contains(&offset) || (offset >= 0 && offset % 8 == 0 && offset / 8 < 0x1000)
}

fn want_dst(instr: &Instruction) -> EncodeResult<Operand> {
    instr.dst.ok_or(EncodeError::OperandShape { op: instr.opcode, expected: "destination" })
}

fn want_src1(instr: &Instruction) -> EncodeResult<Operand> {
    instr.src1.ok_or(EncodeError::OperandShape { op: instr.opcode, expected: "first source" })
}

fn want_src2(instr: &Instruction) -> EncodeResult<Operand> {
    instr.src2.ok_or(EncodeError::OperandShape { op: instr.opcode, expected: "second source" })
}

fn want_reg(op: Opcode, opnd: Operand) -> EncodeResult<RegOperand> {
    opnd.as_reg().ok_or(EncodeError::OperandShape { op, expected: "register" })
}

fn want_imm(op: Opcode, opnd: Operand) -> EncodeResult<i64> {
    match opnd {
        Operand::Imm(imm) => Ok(imm.value),
        _ => Err(EncodeError::OperandShape { op, expected: "immediate" }),
    }
}

fn want_target(instr: &Instruction) -> EncodeResult<LabelId> {
    instr.target.ok_or(EncodeError::OperandShape { op: instr.opcode, expected: "branch target" })
}

fn check_gp_size(op: Opcode, size: u8) -> EncodeResult<()> {
    if size == 4 || size == 8 {
        Ok(())
    } else {
        Err(EncodeError::OperandWidth { op, width: size })
    }
}

/// Per-function instruction encoder.
///
/// Owns the code buffer, the relocation list and the label address map for
/// one function. The driver feeds it instructions in program order and calls
/// [`Encoder::apply_relocs`] once after every label has been bound.
pub struct Encoder<'a> {
    frame: &'a FrameLayout,
    code: Vec<u8>,
    relocs: RelocList<'a>,
    labels: HashMap<LabelId, u32>,
}

impl<'a> Encoder<'a> {
    pub fn new(arena: &'a Bump, frame: &'a FrameLayout) -> Self {
        Self {
            frame,
            code: Vec::new(),
            relocs: RelocList::new_in(arena),
            labels: HashMap::new(),
        }
    }

    /// Current byte offset of the emission cursor.
    pub fn offset(&self) -> u32 {
        self.code.len() as u32
    }

    pub fn code(&self) -> &[u8] {
        &self.code
    }

    pub fn into_code(self) -> Vec<u8> {
        self.code
    }

    pub fn relocs(&self) -> &RelocList<'a> {
        &self.relocs
    }

    pub fn label_pc(&self, id: LabelId) -> Option<u32> {
        self.labels.get(&id).copied()
    }

    /// Record the current cursor as the address of `id`.
    pub fn bind_label(&mut self, id: LabelId) {
        log::trace!("label {:?} bound at {:#x}", id, self.offset());
        self.labels.insert(id, self.offset());
    }

    /// Encode one instruction, returning the number of bytes emitted.
    ///
    /// Instructions that are not yet lowered are bookkeeping markers: a label
    /// records its PC, everything else is skipped. Both cases emit nothing.
    pub fn encode(&mut self, instr: &Instruction) -> EncodeResult<usize> {
        if !instr.lowered {
            if instr.opcode == Opcode::Label {
                if let Some(id) = instr.target {
                    self.bind_label(id);
                }
            }
            return Ok(0);
        }

        let rewritten;
        let instr = if instr.opcode == Opcode::Lea {
            rewritten = self.canonicalize_lea(instr)?;
            &rewritten
        } else {
            instr
        };

        let word = self.generate(instr)?;
        log::trace!("{:?} -> {:#010x} at {:#x}", instr.opcode, word, self.offset());
        self.code.extend_from_slice(&word.to_le_bytes());
        Ok(4)
    }

    /// Patch every pending relocation.
    ///
    /// Must run exactly once, after all labels are bound. Patch offsets and
    /// label PCs are final-buffer relative; `final_base` is the address the
    /// buffer will run at.
    pub fn apply_relocs(&mut self, final_base: u64) -> EncodeResult<()> {
        self.relocs.apply(&mut self.code, &self.labels, final_base)
    }

    // ---- Canonicalization ----

    /// Rewrite the address-computation pseudo-op into the addition it stands
    /// for. Produces a new instruction value; the original is left untouched.
    fn canonicalize_lea(&self, instr: &Instruction) -> EncodeResult<Instruction> {
        let dst = want_dst(instr)?;
        let src1 = want_src1(instr)?;

        let rewritten = match src1 {
            Operand::Stack(slot) => {
                let (base, offset) = self.base_and_offset_from_slot(&slot)?;
                Instruction::op3(
                    Opcode::Add,
                    dst,
                    Operand::reg(base, ValueType::Int64),
                    Operand::imm(offset as i64, ValueType::Int64),
                )
            }
            Operand::Indir(mem) => {
                if let Some(index) = mem.index {
                    if mem.offset != 0 {
                        return Err(EncodeError::OperandShape {
                            op: Opcode::Lea,
                            expected: "index or offset, not both",
                        });
                    }
                    if mem.scale != 0 {
                        return Err(EncodeError::Unsupported {
                            op: Opcode::Lea,
                            detail: "scaled index requires shifted-register add",
                        });
                    }
                    Instruction::op3(
                        Opcode::Add,
                        dst,
                        Operand::reg(mem.base, ValueType::Int64),
                        Operand::reg(index, ValueType::Int64),
                    )
                } else {
                    Instruction::op3(
                        Opcode::Add,
                        dst,
                        Operand::reg(mem.base, ValueType::Int64),
                        Operand::imm(mem.offset as i64, ValueType::Int64),
                    )
                }
            }
            _ => {
                return Err(EncodeError::OperandShape { op: Opcode::Lea, expected: "memory" });
            }
        };
        log::debug!("canonicalized Lea into Add");
        Ok(rewritten)
    }

    // ---- Memory-operand resolution ----

    /// Compute the concrete base register and byte offset of a symbolic
    /// stack operand, applying the frame layout rules in order.
    fn base_and_offset_from_slot(&self, opnd: &StackOperand) -> EncodeResult<(Reg, i32)> {
        let frame = self.frame;
        let mut base = match frame.locals_base {
            LocalsBase::Sp => regs::SP,
            LocalsBase::Frame => regs::FP,
        };
        let mut offset = opnd.slot.frame_offset + opnd.offset;

        if base == regs::SP {
            // SP addresses the base of the outgoing-argument area, not the
            // locals.
            offset += frame.outgoing_arg_bytes as i32;
        }

        if frame.has_inlinees {
            let unorphaned_arg = matches!(opnd.slot.kind, SlotKind::ArgOut { orphaned: false });
            if !unorphaned_arg && !opnd.slot.is_param() {
                offset += frame.inlinee_arg_bytes as i32;
            }
        }

        if opnd.slot.is_param() {
            offset += frame.local_stack_height + frame.args_offset;
            if !can_encode_ldst_offset(offset) {
                // Rebase onto the frame pointer; params sit at a fixed bias
                // from it.
                base = regs::FP;
                offset = opnd.slot.frame_offset + opnd.offset - frame.param_frame_bias;
                if !can_encode_ldst_offset(offset) {
                    return Err(EncodeError::StackOffset { offset });
                }
            }
        } else {
            debug_assert!(offset >= 0);
            debug_assert!(
                base != regs::SP || offset as u32 >= frame.outgoing_arg_bytes,
                "local below the outgoing-argument area"
            );
        }

        Ok((base, offset))
    }

    /// Decompose a memory-shaped operand into a hardware addressing mode.
    fn resolve_mem(&self, op: Opcode, opnd: &Operand) -> EncodeResult<ResolvedMem> {
        match opnd {
            Operand::Stack(slot) => {
                let (base, offset) = self.base_and_offset_from_slot(slot)?;
                Ok(ResolvedMem::BaseOffset { base: regs::encode(base), offset })
            }
            Operand::Indir(mem) => {
                if mem.base.is_float() {
                    return Err(EncodeError::RegisterClass {
                        reg: mem.base.id,
                        expected: "general-purpose",
                    });
                }
                if let Some(index) = mem.index {
                    if mem.offset != 0 {
                        return Err(EncodeError::OperandShape {
                            op,
                            expected: "index or offset, not both",
                        });
                    }
                    if index.is_float() {
                        return Err(EncodeError::RegisterClass {
                            reg: index.id,
                            expected: "general-purpose",
                        });
                    }
                    Ok(ResolvedMem::BaseIndex {
                        base: regs::encode(mem.base),
                        index: regs::encode(index),
                        scale: mem.scale,
                    })
                } else {
                    Ok(ResolvedMem::BaseOffset { base: regs::encode(mem.base), offset: mem.offset })
                }
            }
            _ => Err(EncodeError::OperandShape { op, expected: "memory" }),
        }
    }

    // ---- Shape helpers ----

    fn rr_operands(&self, instr: &Instruction) -> EncodeResult<(u8, u8, u8)> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;
        if src1.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        Ok((regs::gp_encode(dst)?, regs::gp_encode(src1)?, size))
    }

    fn rrr_operands(&self, instr: &Instruction) -> EncodeResult<(u8, u8, u8, u8)> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let src2 = want_reg(op, want_src2(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;
        if src1.ty.size_bytes() != size || src2.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        Ok((regs::gp_encode(dst)?, regs::gp_encode(src1)?, regs::gp_encode(src2)?, size))
    }

    fn emit_rr(&self, instr: &Instruction, f32: RrForm, f64: RrForm) -> EncodeResult<u32> {
        let (d, n, size) = self.rr_operands(instr)?;
        Ok(if size == 8 { f64(d, n) } else { f32(d, n) })
    }

    fn emit_rrr(&self, instr: &Instruction, f32: RrrForm, f64: RrrForm) -> EncodeResult<u32> {
        let (d, n, m, size) = self.rrr_operands(instr)?;
        Ok(if size == 8 { f64(d, n, m) } else { f32(d, n, m) })
    }

    fn emit_rri(&self, instr: &Instruction, f32: RriForm, f64: RriForm) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let value = want_imm(op, want_src2(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;
        if src1.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        let d = regs::gp_encode(dst)?;
        let n = regs::gp_encode(src1)?;
        let word = if size == 8 { f64(d, n, value as u64) } else { f32(d, n, value as u64) };
        word.ok_or(EncodeError::ImmOverflow { op, value })
    }

    /// Register or immediate second source, by operand shape.
    fn emit_rrx(
        &self,
        instr: &Instruction,
        reg32: RrrForm,
        reg64: RrrForm,
        imm32: RriForm,
        imm64: RriForm,
    ) -> EncodeResult<u32> {
        match want_src2(instr)? {
            Operand::Imm(_) => self.emit_rri(instr, imm32, imm64),
            Operand::Reg(_) => self.emit_rrr(instr, reg32, reg64),
            _ => Err(EncodeError::OperandShape {
                op: instr.opcode,
                expected: "register or immediate",
            }),
        }
    }

    /// Single 8-byte register source (BR, BLR, RET).
    fn emit_r64(&self, instr: &Instruction, f: fn(u8) -> u32) -> EncodeResult<u32> {
        let op = instr.opcode;
        let src1 = want_reg(op, want_src1(instr)?)?;
        if src1.ty.size_bytes() != 8 {
            return Err(EncodeError::OperandWidth { op, width: src1.ty.size_bytes() });
        }
        Ok(f(regs::gp_encode(src1)?))
    }

    // ---- Branch families ----

    fn emit_branch26(&mut self, instr: &Instruction, word: u32) -> EncodeResult<u32> {
        let target = want_target(instr)?;
        self.relocs.record(RelocKind::Branch26, self.offset(), target);
        Ok(word)
    }

    fn emit_cond_branch(&mut self, instr: &Instruction, cond: Cond) -> EncodeResult<u32> {
        let target = want_target(instr)?;
        self.relocs.record(RelocKind::Branch19, self.offset(), target);
        Ok(emit::b_cond(cond))
    }

    fn emit_cmp_branch(
        &mut self,
        instr: &Instruction,
        f32: CmpBranchForm,
        f64: CmpBranchForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let size = src1.ty.size_bytes();
        check_gp_size(op, size)?;
        let target = want_target(instr)?;
        self.relocs.record(RelocKind::Branch19, self.offset(), target);
        let t = regs::gp_encode(src1)?;
        Ok(if size == 8 { f64(t) } else { f32(t) })
    }

    fn emit_test_branch(
        &mut self,
        instr: &Instruction,
        f: fn(u8, u32) -> u32,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let bit = want_imm(op, want_src2(instr)?)?;
        if !(0..64).contains(&bit) {
            return Err(EncodeError::ImmOverflow { op, value: bit });
        }
        let target = want_target(instr)?;
        self.relocs.record(RelocKind::Branch14, self.offset(), target);
        Ok(f(regs::gp_encode(src1)?, bit as u32))
    }

    // ---- Immediate-materialization and field families ----

    /// Move-wide immediates: pick the 16-bit window and shift by repeatedly
    /// testing whether the low halfword already holds the whole value.
    fn emit_mov_wide(
        &self,
        instr: &Instruction,
        f32: MovWideForm,
        f64: MovWideForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let value = want_imm(op, want_src1(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;

        let mut imm = value as u64;
        let mut shift = 0u32;
        while imm & 0xffff != imm {
            imm >>= 16;
            shift += 16;
        }
        if shift >= 32 && size != 8 {
            return Err(EncodeError::ImmOverflow { op, value });
        }

        let d = regs::gp_encode(dst)?;
        let hw = shift / 16;
        Ok(if size == 8 { f64(d, imm as u16, hw) } else { f32(d, imm as u16, hw) })
    }

    /// Bitfield ops carry the position in the low 6 bits of the immediate and
    /// the width in bits 16..22.
    fn emit_bitfield(
        &self,
        instr: &Instruction,
        f32: BitfieldForm,
        f64: BitfieldForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let value = want_imm(op, want_src2(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;
        if src1.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }

        let lsb = (value & 0x3f) as u32;
        let width = ((value >> 16) & 0x3f) as u32;
        let bits = u32::from(size) * 8;
        if lsb >= bits || width >= bits {
            return Err(EncodeError::ImmOverflow { op, value });
        }

        let d = regs::gp_encode(dst)?;
        let n = regs::gp_encode(src1)?;
        let word = if size == 8 { f64(d, n, lsb, width) } else { f32(d, n, lsb, width) };
        word.ok_or(EncodeError::ImmOverflow { op, value })
    }

    fn emit_csel(
        &self,
        instr: &Instruction,
        cond: Cond,
        f32: CselForm,
        f64: CselForm,
    ) -> EncodeResult<u32> {
        let (d, n, m, size) = self.rrr_operands(instr)?;
        Ok(if size == 8 { f64(d, n, m, cond) } else { f32(d, n, m, cond) })
    }

    // ---- Loads and stores ----

    fn emit_load_store(
        &self,
        instr: &Instruction,
        mem: Operand,
        reg: Operand,
        forms: &LdStForms,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let rt = regs::gp_encode(want_reg(op, reg)?)?;
        let size = mem.size();

        match self.resolve_mem(op, &mem)? {
            ResolvedMem::BaseIndex { base, index, scale } => {
                let f = match size {
                    8 => forms.r64,
                    4 => forms.r32,
                    2 => forms.r16,
                    1 => forms.r8,
                    _ => return Err(EncodeError::OperandWidth { op, width: size }),
                };
                f(rt, base, index, scale).ok_or(EncodeError::Unsupported {
                    op,
                    detail: "index scale does not match the access size",
                })
            }
            ResolvedMem::BaseOffset { base, offset } => {
                let f = match size {
                    8 => forms.o64,
                    4 => forms.o32,
                    2 => forms.o16,
                    1 => forms.o8,
                    _ => return Err(EncodeError::OperandWidth { op, width: size }),
                };
                f(rt, base, offset).ok_or(EncodeError::ImmOverflow { op, value: offset as i64 })
            }
        }
    }

    fn emit_load_store_pair(
        &self,
        instr: &Instruction,
        mem: Operand,
        reg1: Operand,
        reg2: Operand,
        f32: PairForm,
        f64: PairForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let t1 = regs::gp_encode(want_reg(op, reg1)?)?;
        let t2 = regs::gp_encode(want_reg(op, reg2)?)?;
        let size = mem.size();
        check_gp_size(op, size)?;

        match self.resolve_mem(op, &mem)? {
            ResolvedMem::BaseIndex { .. } => {
                Err(EncodeError::Unsupported { op, detail: "pair access with register index" })
            }
            ResolvedMem::BaseOffset { base, offset } => {
                let word = if size == 8 { f64(t1, t2, base, offset) } else { f32(t1, t2, base, offset) };
                word.ok_or(EncodeError::ImmOverflow { op, value: offset as i64 })
            }
        }
    }

    fn emit_prefetch(&self, instr: &Instruction, mem: Operand) -> EncodeResult<u32> {
        let op = instr.opcode;
        match self.resolve_mem(op, &mem)? {
            ResolvedMem::BaseIndex { base, index, scale } => emit::prfm_reg(base, index, scale)
                .ok_or(EncodeError::Unsupported { op, detail: "prefetch index scale" }),
            ResolvedMem::BaseOffset { base, offset } => emit::prfm_off(base, offset)
                .ok_or(EncodeError::ImmOverflow { op, value: offset as i64 }),
        }
    }

    // ---- Floating point ----

    fn fp_size(&self, op: Opcode, size: u8) -> EncodeResult<FpSize> {
        match size {
            4 => Ok(FpSize::S),
            8 => Ok(FpSize::D),
            _ => Err(EncodeError::OperandWidth { op, width: size }),
        }
    }

    fn emit_fp_rr(
        &self,
        op: Opcode,
        a: Operand,
        b: Operand,
        f: FpRrForm,
    ) -> EncodeResult<u32> {
        let a = want_reg(op, a)?;
        let b = want_reg(op, b)?;
        let size = a.ty.size_bytes();
        let sz = self.fp_size(op, size)?;
        if b.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        Ok(f(sz, regs::fp_encode(a)?, regs::fp_encode(b)?))
    }

    fn emit_fp_rrr(&self, instr: &Instruction, f: FpRrrForm) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let src2 = want_reg(op, want_src2(instr)?)?;
        let size = dst.ty.size_bytes();
        let sz = self.fp_size(op, size)?;
        if src1.ty.size_bytes() != size || src2.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        Ok(f(sz, regs::fp_encode(dst)?, regs::fp_encode(src1)?, regs::fp_encode(src2)?))
    }

    fn emit_fp_load_store(
        &self,
        instr: &Instruction,
        mem: Operand,
        reg: Operand,
        f: FpLdStForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let rt = regs::fp_encode(want_reg(op, reg)?)?;
        let sz = self.fp_size(op, mem.size())?;

        match self.resolve_mem(op, &mem)? {
            ResolvedMem::BaseIndex { .. } => {
                Err(EncodeError::Unsupported { op, detail: "float access with register index" })
            }
            ResolvedMem::BaseOffset { base, offset } => {
                f(sz, rt, base, offset).ok_or(EncodeError::ImmOverflow { op, value: offset as i64 })
            }
        }
    }

    fn emit_fp_load_store_pair(
        &self,
        instr: &Instruction,
        mem: Operand,
        reg1: Operand,
        reg2: Operand,
        f: FpPairForm,
    ) -> EncodeResult<u32> {
        let op = instr.opcode;
        let t1 = regs::fp_encode(want_reg(op, reg1)?)?;
        let t2 = regs::fp_encode(want_reg(op, reg2)?)?;
        let sz = self.fp_size(op, mem.size())?;

        match self.resolve_mem(op, &mem)? {
            ResolvedMem::BaseIndex { .. } => {
                Err(EncodeError::Unsupported { op, detail: "pair access with register index" })
            }
            ResolvedMem::BaseOffset { base, offset } => {
                f(sz, t1, t2, base, offset)
                    .ok_or(EncodeError::ImmOverflow { op, value: offset as i64 })
            }
        }
    }

    /// Float-to-integer conversion; the destination integer type selects one
    /// of the four signed/unsigned x 32/64 hardware forms.
    fn emit_cvt_to_int(&self, instr: &Instruction, round: FpRound) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        if dst.ty.is_float() || !src1.ty.is_float() {
            return Err(EncodeError::OperandShape { op, expected: "float-to-int registers" });
        }
        let src_sz = self.fp_size(op, src1.ty.size_bytes())?;
        let (unsigned, dst64) = match dst.ty {
            ValueType::Int32 => (false, false),
            ValueType::Uint32 => (true, false),
            ValueType::Int64 => (false, true),
            ValueType::Uint64 => (true, true),
            _ => {
                return Err(EncodeError::Unsupported { op, detail: "conversion destination type" });
            }
        };
        Ok(emit::fcvt_int(round, unsigned, dst64, src_sz, regs::gp_encode(dst)?, regs::fp_encode(src1)?))
    }

    /// FCVT: float-to-float width conversion, or integer-to-float when the
    /// source is an integer register.
    fn emit_fcvt(&self, instr: &Instruction) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        if !dst.ty.is_float() {
            return Err(EncodeError::OperandShape { op, expected: "float destination" });
        }
        let dst_sz = self.fp_size(op, dst.ty.size_bytes())?;
        let d = regs::fp_encode(dst)?;

        if src1.ty.is_float() {
            let src_sz = self.fp_size(op, src1.ty.size_bytes())?;
            return Ok(emit::fcvt(dst_sz, src_sz, d, regs::fp_encode(src1)?));
        }

        let n = regs::gp_encode(src1)?;
        match src1.ty {
            ValueType::Int32 => Ok(emit::cvtf_w(dst_sz, false, d, n)),
            ValueType::Uint32 => Ok(emit::cvtf_w(dst_sz, true, d, n)),
            ValueType::Int64 => Ok(emit::cvtf_x(dst_sz, false, d, n)),
            ValueType::Uint64 => Ok(emit::cvtf_x(dst_sz, true, d, n)),
            _ => Err(EncodeError::Unsupported { op, detail: "conversion source type" }),
        }
    }

    /// Bit-pattern move between the integer and float banks.
    fn emit_fmov_gen(&self, instr: &Instruction) -> EncodeResult<u32> {
        let op = instr.opcode;
        let dst = want_reg(op, want_dst(instr)?)?;
        let src1 = want_reg(op, want_src1(instr)?)?;
        let size = dst.ty.size_bytes();
        check_gp_size(op, size)?;
        if src1.ty.size_bytes() != size {
            return Err(EncodeError::WidthMismatch { op });
        }
        if dst.ty.is_float() == src1.ty.is_float() {
            return Err(EncodeError::OperandShape { op, expected: "one float and one integer register" });
        }
        let sz = self.fp_size(op, size)?;
        if dst.ty.is_float() {
            Ok(emit::ins_gen(sz, regs::fp_encode(dst)?, regs::gp_encode(src1)?))
        } else {
            Ok(emit::umov_gen(sz, regs::gp_encode(dst)?, regs::fp_encode(src1)?))
        }
    }

    /// 4-byte system-register move (FPCR/FPSR).
    fn emit_sysreg(&self, instr: &Instruction, use_dst: bool, f: fn(u8) -> u32) -> EncodeResult<u32> {
        let op = instr.opcode;
        let opnd = if use_dst { want_dst(instr)? } else { want_src1(instr)? };
        let reg = want_reg(op, opnd)?;
        if reg.ty.size_bytes() != 4 {
            return Err(EncodeError::OperandWidth { op, width: reg.ty.size_bytes() });
        }
        Ok(f(regs::gp_encode(reg)?))
    }

    // ---- Dispatch ----

    /// Produce the packed word for one canonicalized, lowered instruction.
    /// Control-transfer opcodes register their relocation record here.
    fn generate(&mut self, instr: &Instruction) -> EncodeResult<u32> {
        use Opcode::*;

        match instr.opcode {
            Add => self.emit_rrx(instr, emit::add_w, emit::add_x, emit::add_imm_w, emit::add_imm_x),
            Adds => {
                self.emit_rrx(instr, emit::adds_w, emit::adds_x, emit::adds_imm_w, emit::adds_imm_x)
            }
            And => self.emit_rrx(instr, emit::and_w, emit::and_x, emit::and_imm_w, emit::and_imm_x),
            Ands => {
                self.emit_rrx(instr, emit::ands_w, emit::ands_x, emit::ands_imm_w, emit::ands_imm_x)
            }
            Asr => self.emit_rrx(instr, emit::asrv_w, emit::asrv_x, emit::asr_imm_w, emit::asr_imm_x),

            B => self.emit_branch26(instr, emit::b()),
            Bl => self.emit_branch26(instr, emit::bl()),
            Beq => self.emit_cond_branch(instr, Cond::Eq),
            Bne => self.emit_cond_branch(instr, Cond::Ne),
            Blt => self.emit_cond_branch(instr, Cond::Lt),
            Ble => self.emit_cond_branch(instr, Cond::Le),
            Bgt => self.emit_cond_branch(instr, Cond::Gt),
            Bge => self.emit_cond_branch(instr, Cond::Ge),
            Bcs => self.emit_cond_branch(instr, Cond::Cs),
            Bcc => self.emit_cond_branch(instr, Cond::Cc),
            Bhi => self.emit_cond_branch(instr, Cond::Hi),
            Bls => self.emit_cond_branch(instr, Cond::Ls),
            Bmi => self.emit_cond_branch(instr, Cond::Mi),
            Bpl => self.emit_cond_branch(instr, Cond::Pl),
            Bvs => self.emit_cond_branch(instr, Cond::Vs),
            Bvc => self.emit_cond_branch(instr, Cond::Vc),

            Bfi => self.emit_bitfield(instr, emit::bfi_w, emit::bfi_x),
            Bfxil => self.emit_bitfield(instr, emit::bfxil_w, emit::bfxil_x),

            // BIC with an immediate must arrive as AND with the inverted
            // immediate; only the register form is encodable.
            Bic => self.emit_rrr(instr, emit::bic_w, emit::bic_x),

            Br => self.emit_r64(instr, emit::br),
            Blr => self.emit_r64(instr, emit::blr),
            Ret => self.emit_r64(instr, emit::ret),

            Cbz => self.emit_cmp_branch(instr, emit::cbz_w, emit::cbz_x),
            Cbnz => self.emit_cmp_branch(instr, emit::cbnz_w, emit::cbnz_x),
            Tbz => self.emit_test_branch(instr, emit::tbz),
            Tbnz => self.emit_test_branch(instr, emit::tbnz),

            Clz => self.emit_rr(instr, emit::clz_w, emit::clz_x),

            // Legalization rewrites these before dispatch.
            Cmp | Cmn | Tst | Ldimm | Lea | Rem => {
                Err(EncodeError::NotLegalized { op: instr.opcode })
            }

            CselLt => self.emit_csel(instr, Cond::Lt, emit::csel_w, emit::csel_x),
            CsnegPl => self.emit_csel(instr, Cond::Pl, emit::csneg_w, emit::csneg_x),

            CmpSxtw => {
                let op = instr.opcode;
                let src1 = want_reg(op, want_src1(instr)?)?;
                let src2 = want_reg(op, want_src2(instr)?)?;
                if instr.dst.is_some() {
                    return Err(EncodeError::OperandShape { op, expected: "no destination" });
                }
                if src1.ty.size_bytes() != 8 || src2.ty.size_bytes() != 8 {
                    return Err(EncodeError::WidthMismatch { op });
                }
                Ok(emit::subs_ext_x(
                    31,
                    regs::gp_encode(src1)?,
                    regs::gp_encode(src2)?,
                    Extend::Sxtw,
                    0,
                ))
            }

            DebugBreak => Ok(emit::brk(0)),

            Eor => self.emit_rrx(instr, emit::eor_w, emit::eor_x, emit::eor_imm_w, emit::eor_imm_x),
            EorAsr31 => {
                let (d, n, m, size) = self.rrr_operands(instr)?;
                Ok(if size == 8 {
                    emit::eor_shifted_x(d, n, m, Shift::Asr, 63)
                } else {
                    emit::eor_shifted_w(d, n, m, Shift::Asr, 63 & 31)
                })
            }

            Ldr => self.emit_load_store(instr, want_src1(instr)?, want_dst(instr)?, &LDR_FORMS),
            Ldrs => self.emit_load_store(instr, want_src1(instr)?, want_dst(instr)?, &LDRS_FORMS),
            Str => self.emit_load_store(instr, want_dst(instr)?, want_src1(instr)?, &STR_FORMS),

            // src2 is really the second destination register here.
            Ldp => self.emit_load_store_pair(
                instr,
                want_src1(instr)?,
                want_dst(instr)?,
                want_src2(instr)?,
                emit::ldp_off_w,
                emit::ldp_off_x,
            ),
            LdpPost => self.emit_load_store_pair(
                instr,
                want_src1(instr)?,
                want_dst(instr)?,
                want_src2(instr)?,
                emit::ldp_post_w,
                emit::ldp_post_x,
            ),
            Stp => self.emit_load_store_pair(
                instr,
                want_dst(instr)?,
                want_src1(instr)?,
                want_src2(instr)?,
                emit::stp_off_w,
                emit::stp_off_x,
            ),
            StpPre => self.emit_load_store_pair(
                instr,
                want_dst(instr)?,
                want_src1(instr)?,
                want_src2(instr)?,
                emit::stp_pre_w,
                emit::stp_pre_x,
            ),

            Lsl => self.emit_rrx(instr, emit::lslv_w, emit::lslv_x, emit::lsl_imm_w, emit::lsl_imm_x),
            Lsr => self.emit_rrx(instr, emit::lsrv_w, emit::lsrv_x, emit::lsr_imm_w, emit::lsr_imm_x),

            Mov | MovTrunc => self.emit_rr(instr, emit::mov_w, emit::mov_x),
            Movk => self.emit_mov_wide(instr, emit::movk_w, emit::movk_x),
            Movn => self.emit_mov_wide(instr, emit::movn_w, emit::movn_x),
            Movz => self.emit_mov_wide(instr, emit::movz_w, emit::movz_x),

            MrsFpcr => self.emit_sysreg(instr, true, emit::mrs_fpcr),
            MrsFpsr => self.emit_sysreg(instr, true, emit::mrs_fpsr),
            MsrFpcr => self.emit_sysreg(instr, false, emit::msr_fpcr),
            MsrFpsr => self.emit_sysreg(instr, false, emit::msr_fpsr),

            Mul => self.emit_rrr(instr, emit::mul_w, emit::mul_x),
            Mvn => self.emit_rr(instr, emit::mvn_w, emit::mvn_x),

            // SMULL: 32-bit sources, 64-bit destination.
            Smull => {
                let op = instr.opcode;
                let dst = want_reg(op, want_dst(instr)?)?;
                let src1 = want_reg(op, want_src1(instr)?)?;
                let src2 = want_reg(op, want_src2(instr)?)?;
                if dst.ty.size_bytes() != 8
                    || src1.ty.size_bytes() != 4
                    || src2.ty.size_bytes() != 4
                {
                    return Err(EncodeError::WidthMismatch { op });
                }
                Ok(emit::smull(regs::gp_encode(dst)?, regs::gp_encode(src1)?, regs::gp_encode(src2)?))
            }

            // SMADDL accumulates into its own destination.
            Smaddl => {
                let op = instr.opcode;
                let dst = regs::gp_encode(want_reg(op, want_dst(instr)?)?)?;
                let src1 = regs::gp_encode(want_reg(op, want_src1(instr)?)?)?;
                let src2 = regs::gp_encode(want_reg(op, want_src2(instr)?)?)?;
                Ok(emit::smaddl(dst, src1, src2, dst))
            }

            // dst = src1 - src2 * dst.
            Msub => {
                let op = instr.opcode;
                let dst = want_reg(op, want_dst(instr)?)?;
                let src1 = regs::gp_encode(want_reg(op, want_src1(instr)?)?)?;
                let src2 = regs::gp_encode(want_reg(op, want_src2(instr)?)?)?;
                let d = regs::gp_encode(dst)?;
                Ok(if dst.ty.size_bytes() == 8 {
                    emit::msub_x(d, src2, d, src1)
                } else {
                    emit::msub_w(d, src2, d, src1)
                })
            }

            Nop => Ok(emit::nop()),

            Orr => self.emit_rrx(instr, emit::orr_w, emit::orr_x, emit::orr_imm_w, emit::orr_imm_x),

            Pld => self.emit_prefetch(instr, want_src1(instr)?),

            Sbfx => self.emit_bitfield(instr, emit::sbfx_w, emit::sbfx_x),
            Sdiv => self.emit_rrr(instr, emit::sdiv_w, emit::sdiv_x),

            Sub => self.emit_rrx(instr, emit::sub_w, emit::sub_x, emit::sub_imm_w, emit::sub_imm_x),
            Subs => {
                self.emit_rrx(instr, emit::subs_w, emit::subs_x, emit::subs_imm_w, emit::subs_imm_x)
            }
            SubLsl4 => {
                let (d, n, m, size) = self.rrr_operands(instr)?;
                Ok(if size == 8 {
                    emit::sub_ext_x(d, n, m, Extend::Uxtx, 4)
                } else {
                    emit::sub_ext_w(d, n, m, Extend::Uxtx, 4)
                })
            }

            Ubfx => self.emit_bitfield(instr, emit::ubfx_w, emit::ubfx_x),

            Fabs => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::fabs),
            Fadd => self.emit_fp_rrr(instr, emit::fadd),
            Fcmp => self.emit_fp_rr(instr.opcode, want_src1(instr)?, want_src2(instr)?, emit::fcmp),
            Fcvt => self.emit_fcvt(instr),
            Fcvtm => self.emit_cvt_to_int(instr, FpRound::Minus),
            Fcvtn => self.emit_cvt_to_int(instr, FpRound::Nearest),
            Fcvtp => self.emit_cvt_to_int(instr, FpRound::Plus),
            Fcvtz => self.emit_cvt_to_int(instr, FpRound::Zero),
            Fdiv => self.emit_fp_rrr(instr, emit::fdiv),
            Fldr => self.emit_fp_load_store(instr, want_src1(instr)?, want_dst(instr)?, emit::fldr_off),
            Fldp => self.emit_fp_load_store_pair(
                instr,
                want_src1(instr)?,
                want_dst(instr)?,
                want_src2(instr)?,
                emit::fldp_off,
            ),
            Fmax => self.emit_fp_rrr(instr, emit::fmax),
            Fmin => self.emit_fp_rrr(instr, emit::fmin),
            Fmov => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::fmov),
            FmovGen => self.emit_fmov_gen(instr),
            Fmul => self.emit_fp_rrr(instr, emit::fmul),
            Fneg => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::fneg),
            Frintm => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::frintm),
            Frintp => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::frintp),
            Fsqrt => self.emit_fp_rr(instr.opcode, want_dst(instr)?, want_src1(instr)?, emit::fsqrt),
            Fsub => self.emit_fp_rrr(instr, emit::fsub),
            Fstr => self.emit_fp_load_store(instr, want_dst(instr)?, want_src1(instr)?, emit::fstr_off),
            Fstp => self.emit_fp_load_store_pair(
                instr,
                want_dst(instr)?,
                want_src1(instr)?,
                want_src2(instr)?,
                emit::fstp_off,
            ),

            Label => Err(EncodeError::Unsupported {
                op: instr.opcode,
                detail: "label markers are never lowered",
            }),
        }
    }
}
