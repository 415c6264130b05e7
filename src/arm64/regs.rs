//! ARM64 register table.
//!
//! Maps abstract register identifiers to their 5-bit hardware encodings and
//! provides the class-checked lookups used by the dispatch routines. Register
//! 31 is context-dependent: it encodes ZR in most instructions but SP in
//! base-address contexts; the word builders in [`super::emit`] pick the right
//! interpretation per form.

use crate::core::error::{EncodeError, EncodeResult};
use crate::core::ir::{Reg, RegBank, RegOperand};

/// General-purpose register bank.
pub const GP_BANK: RegBank = 0;
/// Float/SIMD register bank.
pub const FP_BANK: RegBank = 1;

/// Highest float register encoding the register allocator may hand out.
pub const LAST_FLOAT_REG_ENCODE: u8 = 31;

pub const fn x(id: u8) -> Reg {
    Reg::new(GP_BANK, id)
}

pub const fn d(id: u8) -> Reg {
    Reg::new(FP_BANK, id)
}

pub const X0: Reg = x(0);
pub const X1: Reg = x(1);
pub const X2: Reg = x(2);
pub const X3: Reg = x(3);
pub const X4: Reg = x(4);
pub const X5: Reg = x(5);
pub const X6: Reg = x(6);
pub const X7: Reg = x(7);
pub const X8: Reg = x(8);
pub const X9: Reg = x(9);
pub const X10: Reg = x(10);
pub const X11: Reg = x(11);
pub const X12: Reg = x(12);
pub const X16: Reg = x(16);
pub const X17: Reg = x(17);
pub const X19: Reg = x(19);
pub const X20: Reg = x(20);
/// Frame pointer (x29).
pub const FP: Reg = x(29);
/// Link register (x30).
pub const LR: Reg = x(30);
/// Stack pointer (encoding 31 in base-address contexts).
pub const SP: Reg = x(31);
/// Zero register (encoding 31 in operand contexts).
pub const ZR: Reg = x(31);

pub const D0: Reg = d(0);
pub const D1: Reg = d(1);
pub const D2: Reg = d(2);
pub const D3: Reg = d(3);

/// Raw 5-bit hardware encoding of a register, without class validation.
pub const fn encode(reg: Reg) -> u8 {
    reg.id & 0x1f
}

/// Encoding of a general-purpose register operand.
pub fn gp_encode(opnd: RegOperand) -> EncodeResult<u8> {
    if opnd.reg.bank != GP_BANK {
        return Err(EncodeError::RegisterClass { reg: opnd.reg.id, expected: "general-purpose" });
    }
    Ok(encode(opnd.reg))
}

/// Encoding of a float register operand.
pub fn fp_encode(opnd: RegOperand) -> EncodeResult<u8> {
    if opnd.reg.bank != FP_BANK {
        return Err(EncodeError::RegisterClass { reg: opnd.reg.id, expected: "float" });
    }
    let enc = encode(opnd.reg);
    debug_assert!(enc <= LAST_FLOAT_REG_ENCODE);
    Ok(enc)
}
