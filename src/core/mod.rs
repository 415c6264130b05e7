//! Shared infrastructure for the ARM64 encoder.
//!
//! - [`ir`] - lowered IR data model: opcodes, operands, instructions, and the
//!   static per-opcode metadata table
//! - [`frame`] - per-function stack frame layout parameters
//! - [`error`] - fatal internal-error taxonomy

pub mod error;
pub mod frame;
pub mod ir;

pub use error::{EncodeError, EncodeResult};
pub use frame::{FrameLayout, LocalsBase};
pub use ir::{
    opcode_meta, ImmOperand, IndirOperand, Instruction, LabelId, Opcode, Operand, Reg, RegOperand,
    SlotKind, StackOperand, StackSlot, ValueType, META_BRANCH, META_CALL, META_FLOAT, META_LOAD,
    META_MOVE, META_PSEUDO, META_SETS_FLAGS, META_STORE, META_USES_FLAGS,
};
