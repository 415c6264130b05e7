// This module implements the deferred relocation list for branch and label
// targets whose final addresses are unknown at encode time. Dispatch registers
// one record per forward/backward reference; after the whole function has been
// emitted and every label carries its final PC, apply() walks the list once,
// computes each displacement and overwrites the immediate bits at the patch
// site. Records live in the per-function bump arena and never outlive one
// encode+patch cycle. Branch displacements are PC-relative and word-granular
// ((target - source) >> 2); label records embed the absolute final address.
// Patch offsets and label PCs must both be expressed in final-buffer address
// space by the time apply() runs - that hand-off is the caller's obligation.

//! Deferred branch/label relocation.

use bumpalo::collections::Vec as BumpVec;
use bumpalo::Bump;
use hashbrown::HashMap;

use crate::core::error::{EncodeError, EncodeResult};
use crate::core::ir::LabelId;

/// Width class of the immediate field a record patches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocKind {
    /// 26-bit branch immediate (B, BL).
    Branch26,
    /// 19-bit branch immediate (conditional branches, CBZ/CBNZ).
    Branch19,
    /// 14-bit branch immediate (TBZ/TBNZ).
    Branch14,
    /// 8-byte absolute label address embedded in data.
    Label,
}

/// One deferred patch request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelocRecord {
    pub kind: RelocKind,
    /// Byte offset of the patch site inside the emitted buffer.
    pub patch_offset: u32,
    pub target: LabelId,
}

/// Per-function relocation list, arena-backed.
///
/// Records are consumed exactly once by [`RelocList::apply`]; correctness does
/// not depend on list order since every patch offset is unique.
pub struct RelocList<'a> {
    records: BumpVec<'a, RelocRecord>,
}

impl<'a> RelocList<'a> {
    pub fn new_in(arena: &'a Bump) -> Self {
        Self { records: BumpVec::new_in(arena) }
    }

    /// Register a deferred patch at `patch_offset`. O(1).
    pub fn record(&mut self, kind: RelocKind, patch_offset: u32, target: LabelId) {
        self.records.push(RelocRecord { kind, patch_offset, target });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in most-recent-first order.
    pub fn iter(&self) -> impl Iterator<Item = &RelocRecord> {
        self.records.iter().rev()
    }

    /// Patch every record into `code`.
    ///
    /// Precondition: every target label has a recorded PC, and both patch
    /// offsets and label PCs are final-buffer relative; `final_base` is the
    /// address the buffer will execute at (used only for `Label` records).
    pub fn apply(
        &self,
        code: &mut [u8],
        labels: &HashMap<LabelId, u32>,
        final_base: u64,
    ) -> EncodeResult<()> {
        for reloc in self.iter() {
            let target_pc = *labels
                .get(&reloc.target)
                .ok_or(EncodeError::UnresolvedLabel(reloc.target))?;
            log::debug!(
                "reloc {:?} at {:#x} -> label {:?} at {:#x}",
                reloc.kind,
                reloc.patch_offset,
                reloc.target,
                target_pc
            );
            match reloc.kind {
                RelocKind::Branch26 => patch_branch(code, reloc, target_pc, 26)?,
                RelocKind::Branch19 => patch_branch(code, reloc, target_pc, 19)?,
                RelocKind::Branch14 => patch_branch(code, reloc, target_pc, 14)?,
                RelocKind::Label => {
                    let site = reloc.patch_offset as usize;
                    if site + 8 > code.len() {
                        return Err(EncodeError::PatchOutOfRange { offset: reloc.patch_offset });
                    }
                    let address = final_base + target_pc as u64;
                    code[site..site + 8].copy_from_slice(&address.to_le_bytes());
                }
            }
        }
        Ok(())
    }
}

/// Field placement of each branch immediate width: (bit shift, field mask).
fn branch_field(bits: u8) -> (u32, u32) {
    match bits {
        26 => (0, 0x03ff_ffff),
        19 => (5, 0x7_ffff),
        _ => (5, 0x3fff),
    }
}

fn patch_branch(code: &mut [u8], reloc: &RelocRecord, target_pc: u32, bits: u8) -> EncodeResult<()> {
    let site = reloc.patch_offset as usize;
    if site + 4 > code.len() || site % 4 != 0 {
        return Err(EncodeError::PatchOutOfRange { offset: reloc.patch_offset });
    }

    let disp = (i64::from(target_pc) - i64::from(reloc.patch_offset)) >> 2;
    let limit = 1i64 << (bits - 1);
    if disp < -limit || disp >= limit {
        return Err(EncodeError::BranchRange { offset: reloc.patch_offset, bits });
    }

    let (shift, mask) = branch_field(bits);
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&code[site..site + 4]);
    let mut word = u32::from_le_bytes(bytes);
    word &= !(mask << shift);
    word |= ((disp as u32) & mask) << shift;
    code[site..site + 4].copy_from_slice(&word.to_le_bytes());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm64::emit;

    fn label_map(entries: &[(LabelId, u32)]) -> HashMap<LabelId, u32> {
        entries.iter().copied().collect()
    }

    #[test]
    fn forward_branch26_patch() {
        let arena = Bump::new();
        let mut relocs = RelocList::new_in(&arena);
        let mut code = Vec::new();
        code.extend_from_slice(&emit::b().to_le_bytes());
        for _ in 0..7 {
            code.extend_from_slice(&emit::nop().to_le_bytes());
        }
        relocs.record(RelocKind::Branch26, 0, LabelId(0));

        let labels = label_map(&[(LabelId(0), 32)]);
        relocs.apply(&mut code, &labels, 0).unwrap();

        let word = u32::from_le_bytes(code[0..4].try_into().unwrap());
        assert_eq!(word & 0x03ff_ffff, 8);
        assert_eq!(word >> 26, 0x1400_0000 >> 26);
    }

    #[test]
    fn backward_branch19_patch_is_negative() {
        let arena = Bump::new();
        let mut relocs = RelocList::new_in(&arena);
        let mut code = Vec::new();
        for _ in 0..4 {
            code.extend_from_slice(&emit::nop().to_le_bytes());
        }
        code.extend_from_slice(&emit::b_cond(emit::Cond::Ne).to_le_bytes());
        relocs.record(RelocKind::Branch19, 16, LabelId(3));

        let labels = label_map(&[(LabelId(3), 0)]);
        relocs.apply(&mut code, &labels, 0x4000).unwrap();

        let word = u32::from_le_bytes(code[16..20].try_into().unwrap());
        let imm19 = (word >> 5) & 0x7_ffff;
        // -4 words, sign-truncated into 19 bits.
        assert_eq!(imm19, 0x7_ffff - 3);
        assert_eq!(word & 0xf, emit::Cond::Ne as u32);
    }

    #[test]
    fn unresolved_target_is_fatal() {
        let arena = Bump::new();
        let mut relocs = RelocList::new_in(&arena);
        let mut code = vec![0u8; 4];
        relocs.record(RelocKind::Branch26, 0, LabelId(9));
        let err = relocs.apply(&mut code, &label_map(&[]), 0).unwrap_err();
        assert_eq!(err, EncodeError::UnresolvedLabel(LabelId(9)));
    }

    #[test]
    fn displacement_overflow_is_fatal() {
        let arena = Bump::new();
        let mut relocs = RelocList::new_in(&arena);
        // A 14-bit field covers +/- 8192 words.
        let mut code = vec![0u8; 4];
        relocs.record(RelocKind::Branch14, 0, LabelId(0));
        let labels = label_map(&[(LabelId(0), 8192 * 4)]);
        let err = relocs.apply(&mut code, &labels, 0).unwrap_err();
        assert_eq!(err, EncodeError::BranchRange { offset: 0, bits: 14 });
    }

    #[test]
    fn label_record_embeds_absolute_address() {
        let arena = Bump::new();
        let mut relocs = RelocList::new_in(&arena);
        let mut code = vec![0u8; 16];
        relocs.record(RelocKind::Label, 8, LabelId(1));
        let labels = label_map(&[(LabelId(1), 12)]);
        relocs.apply(&mut code, &labels, 0x1_0000).unwrap();
        assert_eq!(u64::from_le_bytes(code[8..16].try_into().unwrap()), 0x1_000c);
    }
}
