//! Relocation round-trip over a function with forward and backward branches.
//!
//! Encodes a function containing one forward unconditional branch and one
//! backward conditional branch to the same label, applies relocations, then
//! decodes the patched immediate fields and checks that
//! `target = patch_offset + (decoded_offset << 2)` lands on the label for
//! both directions.

use bumpalo::Bump;
use tpde_arm64::arm64::{regs, Encoder};
use tpde_arm64::core::{FrameLayout, Instruction, LabelId, Opcode, Operand, ValueType};

fn word_at(code: &[u8], offset: usize) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&code[offset..offset + 4]);
    u32::from_le_bytes(bytes)
}

fn sign_extend(value: u32, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value as i64) << shift) >> shift
}

#[test]
fn forward_and_backward_branch_to_one_label() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    let join = LabelId(0);
    let x0 = Operand::reg(regs::X0, ValueType::Int64);
    let x1 = Operand::reg(regs::X1, ValueType::Int64);

    // 0x00: b join            (forward)
    // 0x04: nop
    // 0x08: join:
    // 0x08: adds x0, x0, x1
    // 0x0c: b.ne join         (backward)
    // 0x10: ret lr
    encoder.encode(&Instruction::branch(Opcode::B, join)).unwrap();
    encoder.encode(&Instruction::op0(Opcode::Nop)).unwrap();
    encoder.encode(&Instruction::label(join)).unwrap();
    encoder.encode(&Instruction::op3(Opcode::Adds, x0, x0, x1)).unwrap();
    encoder.encode(&Instruction::branch(Opcode::Bne, join)).unwrap();
    encoder
        .encode(&Instruction::op1(Opcode::Ret, Operand::reg(regs::LR, ValueType::Int64)))
        .unwrap();

    assert_eq!(encoder.relocs().len(), 2);
    assert_eq!(encoder.label_pc(join), Some(8));

    encoder.apply_relocs(0x7f00_0000).unwrap();
    let code = encoder.code();

    // Forward unconditional: 26-bit field, displacement +2 words.
    let b = word_at(code, 0);
    let imm26 = sign_extend(b & 0x03ff_ffff, 26);
    assert_eq!(imm26, 2);
    assert_eq!(0 + (imm26 << 2), 8);

    // Backward conditional: 19-bit field, displacement -1 word.
    let bne = word_at(code, 0x0c);
    let imm19 = sign_extend((bne >> 5) & 0x7_ffff, 19);
    assert_eq!(imm19, -1);
    assert_eq!(0x0c + (imm19 << 2), 8);
}

#[test]
fn branch_eight_instructions_ahead_decodes_to_plus_eight() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    let target = LabelId(1);
    encoder.encode(&Instruction::branch(Opcode::B, target)).unwrap();
    for _ in 0..7 {
        encoder.encode(&Instruction::op0(Opcode::Nop)).unwrap();
    }
    encoder.encode(&Instruction::label(target)).unwrap();

    encoder.apply_relocs(0).unwrap();
    let word = word_at(encoder.code(), 0);
    assert_eq!(word & 0x03ff_ffff, 8);
}

#[test]
fn compare_and_test_branches_use_narrower_fields() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    let out = LabelId(2);
    let w3 = Operand::reg(regs::x(3), ValueType::Int32);
    let bit = Operand::imm(5, ValueType::Int64);

    encoder.encode(&Instruction::cmp_branch(Opcode::Cbz, w3, out)).unwrap();
    encoder
        .encode(&Instruction::test_branch(
            Opcode::Tbnz,
            Operand::reg(regs::x(4), ValueType::Int64),
            bit,
            out,
        ))
        .unwrap();
    encoder.encode(&Instruction::label(out)).unwrap();

    encoder.apply_relocs(0).unwrap();
    let code = encoder.code();

    // cbz w3, +2 words
    let cbz = word_at(code, 0);
    assert_eq!(cbz >> 24, 0x34);
    assert_eq!((cbz >> 5) & 0x7_ffff, 2);
    assert_eq!(cbz & 0x1f, 3);

    // tbnz x4, #5, +1 word
    let tbnz = word_at(code, 4);
    assert_eq!(tbnz >> 24, 0x37);
    assert_eq!((tbnz >> 5) & 0x3fff, 1);
    assert_eq!((tbnz >> 19) & 0x1f, 5);
    assert_eq!(tbnz & 0x1f, 4);
}

#[test]
fn patching_never_disturbs_fixed_bits() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    let target = LabelId(3);
    encoder.encode(&Instruction::branch(Opcode::Beq, target)).unwrap();
    encoder.encode(&Instruction::label(target)).unwrap();
    let before = word_at(encoder.code(), 0);

    encoder.apply_relocs(0).unwrap();
    let after = word_at(encoder.code(), 0);

    // Opcode and condition survive; only the immediate field changed.
    assert_eq!(before >> 24, after >> 24);
    assert_eq!(before & 0xf, after & 0xf);
    assert_eq!((after >> 5) & 0x7_ffff, 1);
}
