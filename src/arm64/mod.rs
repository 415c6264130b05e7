//! ARM64 architecture-specific components.
//!
//! This module contains all AArch64-specific code:
//! - Register table and class-checked encodings ([`regs`])
//! - Raw instruction-word builders ([`emit`])
//! - Logical (bitmask) immediate classification ([`logical_imm`])
//! - Canonicalization, stack-operand resolution and encoding dispatch
//!   ([`encoder`])
//! - Deferred branch/label relocation ([`reloc`])
//! - Local move folding ([`fold`])

pub mod emit;
pub mod encoder;
pub mod fold;
pub mod logical_imm;
pub mod regs;
pub mod reloc;

pub use emit::{Cond, FpRound, FpSize};
pub use encoder::{Encoder, ResolvedMem};
pub use fold::{try_const_fold, try_stack_fold, Legalizer};
pub use logical_imm::{can_encode, LogicalImm};
pub use reloc::{RelocKind, RelocList, RelocRecord};
