//! Per-function stack frame layout parameters.
//!
//! These values are fixed by frame allocation before encoding begins and are
//! read-only to the encoder. They drive the resolution of symbolic stack
//! operands into concrete base-register + offset pairs.

/// Which register addresses the locals area.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalsBase {
    /// Locals addressed off the stack pointer. SP points at the base of the
    /// outgoing-argument area, so local offsets are biased by its size.
    Sp,
    /// Locals addressed off the dedicated frame register.
    Frame,
}

/// Frame layout parameters for the function under compilation.
///
/// Invariant once lowering completes; the encoder never mutates them.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    pub locals_base: LocalsBase,
    /// Size in bytes of the outgoing-argument area at the bottom of the frame.
    pub outgoing_arg_bytes: u32,
    /// True when the function contains inlined calls.
    pub has_inlinees: bool,
    /// Stack bytes reserved for inlinee arguments, when inlining is present.
    pub inlinee_arg_bytes: u32,
    /// Height in bytes of the local stack area.
    pub local_stack_height: i32,
    /// Base offset of the incoming-parameter area above the locals.
    pub args_offset: i32,
    /// Bias subtracted from a parameter symbol's offset when rebasing it onto
    /// the frame pointer.
    pub param_frame_bias: i32,
}

impl FrameLayout {
    /// Leaf-function layout with SP-relative locals and no argument areas.
    pub fn leaf() -> Self {
        Self {
            locals_base: LocalsBase::Sp,
            outgoing_arg_bytes: 0,
            has_inlinees: false,
            inlinee_arg_bytes: 0,
            local_stack_height: 0,
            args_offset: 0,
            param_frame_bias: 0,
        }
    }

    pub fn locals_base(&self) -> LocalsBase {
        self.locals_base
    }

    pub fn outgoing_arg_bytes(&self) -> u32 {
        self.outgoing_arg_bytes
    }

    pub fn inlinee_arg_bytes(&self) -> u32 {
        self.inlinee_arg_bytes
    }

    pub fn args_offset(&self) -> i32 {
        self.args_offset
    }
}
