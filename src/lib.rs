//! tpde-arm64 - AArch64 machine-code encoding for the TPDE backend.
//!
//! This crate converts a lowered, register-allocated IR instruction stream
//! into raw ARM64 instruction words, resolving branch and label targets
//! through a deferred relocation list. It is the final stage of the backend:
//! instruction selection, legalization and register allocation have already
//! run, so every contract violation seen here is an internal compiler bug and
//! is reported as a fatal [`EncodeError`].
//!
//! # Primary Usage
//!
//! ```
//! use bumpalo::Bump;
//! use tpde_arm64::arm64::{regs, Encoder};
//! use tpde_arm64::core::{FrameLayout, Instruction, Opcode, Operand, ValueType};
//!
//! let arena = Bump::new();
//! let frame = FrameLayout::leaf();
//! let mut encoder = Encoder::new(&arena, &frame);
//!
//! // add x0, x1, #5
//! let instr = Instruction::op3(
//!     Opcode::Add,
//!     Operand::reg(regs::X0, ValueType::Int64),
//!     Operand::reg(regs::X1, ValueType::Int64),
//!     Operand::imm(5, ValueType::Int64),
//! );
//! let bytes = encoder.encode(&instr).unwrap();
//! assert_eq!(bytes, 4);
//!
//! // Once all labels are bound, patch the pending branches.
//! encoder.apply_relocs(0).unwrap();
//! ```
//!
//! # Architecture
//!
//! - [`core`] - shared infrastructure (IR model, frame layout, errors)
//! - [`arm64`] - AArch64-specific code (encoder, word builders, relocation)

pub mod arm64;
pub mod core;

// Re-export common types from organized modules
pub use crate::core::{
    opcode_meta, EncodeError, EncodeResult, FrameLayout, Instruction, LabelId, LocalsBase, Opcode,
    Operand, Reg, ValueType,
};
pub use arm64::{Encoder, Legalizer, RelocKind, RelocList, RelocRecord};
