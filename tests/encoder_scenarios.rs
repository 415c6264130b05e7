//! End-to-end encoding scenarios over whole instruction sequences.

use bumpalo::Bump;
use tpde_arm64::arm64::{regs, Encoder};
use tpde_arm64::core::{
    opcode_meta, FrameLayout, Instruction, LabelId, Opcode, Operand, ValueType, META_BRANCH,
};

fn words(code: &[u8]) -> Vec<u32> {
    code.chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn xreg(id: u8) -> Operand {
    Operand::reg(regs::x(id), ValueType::Int64)
}

fn wreg(id: u8) -> Operand {
    Operand::reg(regs::x(id), ValueType::Int32)
}

/// Sum the integers from n down to 1:
///
/// ```text
///     movz x1, #0
/// loop:
///     cbz  x0, done
///     add  x1, x1, x0
///     sub  x0, x0, #1
///     b    loop
/// done:
///     mov  x0, x1
///     ret  lr
/// ```
#[test]
fn countdown_loop_encodes_to_the_expected_words() {
    let _ = env_logger::builder().is_test(true).try_init();

    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    let top = LabelId(0);
    let done = LabelId(1);

    let program = [
        Instruction::op2(Opcode::Movz, xreg(1), Operand::imm(0, ValueType::Int64)),
        Instruction::label(top),
        Instruction::cmp_branch(Opcode::Cbz, xreg(0), done),
        Instruction::op3(Opcode::Add, xreg(1), xreg(1), xreg(0)),
        Instruction::op3(Opcode::Sub, xreg(0), xreg(0), Operand::imm(1, ValueType::Int64)),
        Instruction::branch(Opcode::B, top),
        Instruction::label(done),
        Instruction::op2(Opcode::Mov, xreg(0), xreg(1)),
        Instruction::op1(Opcode::Ret, Operand::reg(regs::LR, ValueType::Int64)),
    ];

    let mut total = 0usize;
    for instr in &program {
        total += encoder.encode(instr).unwrap();
    }
    // Two label markers consume no bytes.
    assert_eq!(total, 7 * 4);
    assert_eq!(encoder.relocs().len(), 2);

    encoder.apply_relocs(0).unwrap();

    assert_eq!(
        words(encoder.code()),
        vec![
            0xd280_0001, // movz x1, #0
            0xb400_0080, // cbz x0, +4
            0x8b00_0021, // add x1, x1, x0
            0xd100_0400, // sub x0, x0, #1
            0x17ff_fffd, // b -3
            0xaa01_03e0, // mov x0, x1
            0xd65f_03c0, // ret
        ]
    );
}

#[test]
fn logical_immediates_flow_through_the_bitmask_encoder() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    // and x0, x1, #0xff
    encoder
        .encode(&Instruction::op3(
            Opcode::And,
            xreg(0),
            xreg(1),
            Operand::imm(0xff, ValueType::Int64),
        ))
        .unwrap();
    assert_eq!(words(encoder.code()), vec![0x9240_1c20]);

    // An immediate with no bitmask form is an upstream bug, not a fallback.
    let bad = Instruction::op3(
        Opcode::And,
        xreg(0),
        xreg(1),
        Operand::imm(0x1234_5678, ValueType::Int64),
    );
    assert!(encoder.encode(&bad).is_err());
}

#[test]
fn widening_and_multiply_forms() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    // smull x0, w1, w2
    encoder
        .encode(&Instruction::op3(Opcode::Smull, xreg(0), wreg(1), wreg(2)))
        .unwrap();
    // msub x0, x2, x0, x1 (dst = src1 - src2 * dst)
    encoder
        .encode(&Instruction::op3(Opcode::Msub, xreg(0), xreg(1), xreg(2)))
        .unwrap();
    // csel x0, x1, x2, lt
    encoder
        .encode(&Instruction::op3(Opcode::CselLt, xreg(0), xreg(1), xreg(2)))
        .unwrap();

    assert_eq!(words(encoder.code()), vec![0x9b22_7c20, 0x9b00_8440, 0x9a82_b020]);
}

#[test]
fn sign_extending_loads_pick_their_form_from_the_memory_width() {
    let frame = FrameLayout::leaf();
    let base = regs::x(2);
    for (ty, expected) in [
        (ValueType::Int8, 0x39c0_1041u32), // ldrsb w1, [x2, #4]
        (ValueType::Int16, 0x79c0_0841),   // ldrsh w1, [x2, #4]
        (ValueType::Int32, 0xb980_0441),   // ldrsw x1, [x2, #4]
        (ValueType::Int64, 0xf840_4041),   // ldur x1, [x2, #4] (misaligned for the scaled form)
    ] {
        let arena = Bump::new();
        let mut encoder = Encoder::new(&arena, &frame);
        encoder
            .encode(&Instruction::op2(Opcode::Ldrs, xreg(1), Operand::base_offset(base, 4, ty)))
            .unwrap();
        assert_eq!(words(encoder.code()), vec![expected]);
    }
}

#[test]
fn register_indexed_loads_accept_matching_scale_only() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    // ldr x0, [x1, x2, lsl #3]
    encoder
        .encode(&Instruction::op2(
            Opcode::Ldr,
            xreg(0),
            Operand::base_index(regs::x(1), regs::x(2), 3, ValueType::Int64),
        ))
        .unwrap();
    assert_eq!(words(encoder.code()), vec![0xf862_7820]);

    let mismatched = Instruction::op2(
        Opcode::Ldr,
        xreg(0),
        Operand::base_index(regs::x(1), regs::x(2), 1, ValueType::Int64),
    );
    assert!(encoder.encode(&mismatched).is_err());
}

#[test]
fn pair_accesses_and_prologue_shapes() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    // stp x29, x30, [sp, #-16]!
    encoder
        .encode(&Instruction::op3(
            Opcode::StpPre,
            Operand::base_offset(regs::SP, -16, ValueType::Int64),
            Operand::reg(regs::FP, ValueType::Int64),
            Operand::reg(regs::LR, ValueType::Int64),
        ))
        .unwrap();
    // mov x29, sp
    encoder
        .encode(&Instruction::op2(
            Opcode::Mov,
            Operand::reg(regs::FP, ValueType::Int64),
            Operand::reg(regs::SP, ValueType::Int64),
        ))
        .unwrap();
    // ldp x29, x30, [sp], #16
    encoder
        .encode(&Instruction::op3(
            Opcode::LdpPost,
            Operand::reg(regs::FP, ValueType::Int64),
            Operand::base_offset(regs::SP, 16, ValueType::Int64),
            Operand::reg(regs::LR, ValueType::Int64),
        ))
        .unwrap();

    assert_eq!(
        words(encoder.code()),
        vec![0xa9bf_7bfd, 0x9100_03fd, 0xa8c1_7bfd]
    );
}

#[test]
fn moves_between_register_banks() {
    let arena = Bump::new();
    let frame = FrameLayout::leaf();
    let mut encoder = Encoder::new(&arena, &frame);

    // fmov d0, x1 (bit pattern, via INS)
    encoder
        .encode(&Instruction::op2(
            Opcode::FmovGen,
            Operand::reg(regs::D0, ValueType::Float64),
            xreg(1),
        ))
        .unwrap();
    // fmov w0, s1 (via UMOV)
    encoder
        .encode(&Instruction::op2(
            Opcode::FmovGen,
            wreg(0),
            Operand::reg(regs::D1, ValueType::Float32),
        ))
        .unwrap();

    assert_eq!(words(encoder.code()), vec![0x4e08_1c20, 0x0e04_3c20]);
}

#[test]
fn metadata_is_queryable_without_an_encoder() {
    assert_ne!(opcode_meta(Opcode::Bne) & META_BRANCH, 0);
    assert_eq!(opcode_meta(Opcode::Sdiv) & META_BRANCH, 0);
}
