// This module defines error types for the ARM64 encoder using the thiserror
// crate for idiomatic Rust error handling. EncodeError is the main error enum
// covering the internal-consistency failures the encoder can detect: operand
// shape/width/class mismatches, opcodes legalization should have rewritten,
// genuinely unsupported instruction forms, immediate-field overflow,
// unencodable stack offsets, and unresolved relocation targets. Every variant
// represents a defect in an upstream pass rather than a user-facing condition;
// the caller is expected to abandon compilation of the offending function.
// EncodeResult<T> is provided as a convenience alias.

//! Error types for the ARM64 encoder.
//!
//! There is no recoverable-error path in this component: the sole client is
//! the compiler's own lowered IR, so every violated contract here reflects an
//! internal compiler bug. The correct response is to abort encoding of the
//! function rather than silently emit wrong machine code.

use thiserror::Error;

use super::ir::{LabelId, Opcode};

/// Fatal internal-consistency failures raised during encoding.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    #[error("{op:?}: expected {expected} operand")]
    OperandShape { op: Opcode, expected: &'static str },

    #[error("{op:?}: operand width {width} not valid here")]
    OperandWidth { op: Opcode, width: u8 },

    #[error("{op:?}: source width does not match destination width")]
    WidthMismatch { op: Opcode },

    #[error("register {reg} is not in the {expected} bank")]
    RegisterClass { reg: u8, expected: &'static str },

    #[error("{op:?} must be rewritten by legalization before encoding")]
    NotLegalized { op: Opcode },

    #[error("unsupported instruction form: {op:?} ({detail})")]
    Unsupported { op: Opcode, detail: &'static str },

    #[error("{op:?}: immediate {value:#x} does not fit the encoding")]
    ImmOverflow { op: Opcode, value: i64 },

    #[error("stack offset {offset} not encodable in a load/store immediate field")]
    StackOffset { offset: i32 },

    #[error("label {0:?} has no recorded address")]
    UnresolvedLabel(LabelId),

    #[error("relocation patch offset {offset:#x} outside the emitted buffer")]
    PatchOutOfRange { offset: u32 },

    #[error("branch displacement at {offset:#x} exceeds its {bits}-bit field")]
    BranchRange { offset: u32, bits: u8 },
}

/// Result type alias for encode operations.
pub type EncodeResult<T> = Result<T, EncodeError>;
