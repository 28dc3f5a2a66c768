//! A single activation record on the inspected thread's stack.

use crate::layout::{FrameLayout, SlotBase};
use core::fmt;
use core::hash::{Hash, Hasher};

/// What produced a frame, as far as the walker can tell from its pc.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Transition from native code into managed code via the call stub.
    Entry,
    /// A bytecode interpreter activation.
    Interpreted,
    /// Generated code: a compiled method or a runtime stub.
    Compiled,
    /// Anything else, including frames with no known pc.
    Native,
}

/// A stack frame of the inspected thread.
///
/// Frames are plain values. They are produced by the
/// [`Unwinder`](crate::Unwinder), which applies the method-handle and
/// deoptimization corrections before handing one out, and are never changed
/// afterwards. A frame knows nothing about its callee or sender.
#[derive(Debug, Clone, Copy)]
pub struct Frame {
    /// The stack pointer as seen by this frame.
    sp: u64,
    /// The stack pointer before method-handle call sites or deoptimization
    /// extended the frame. Equal to `sp` for most frames.
    unextended_sp: u64,
    fp: Option<u64>,
    /// The pc this frame will resume at, when known to be managed code.
    pc: Option<u64>,
    deoptimized: bool,
}

impl Frame {
    pub(crate) fn from_parts(
        sp: u64,
        unextended_sp: u64,
        fp: Option<u64>,
        pc: Option<u64>,
        deoptimized: bool,
    ) -> Frame {
        Frame {
            sp,
            unextended_sp,
            fp,
            pc,
            deoptimized,
        }
    }

    /// Get this frame's stack pointer.
    pub fn sp(&self) -> u64 {
        self.sp
    }

    pub fn unextended_sp(&self) -> u64 {
        self.unextended_sp
    }

    /// Get this frame's frame pointer.
    pub fn fp(&self) -> Option<u64> {
        self.fp
    }

    /// Get this frame's program counter.
    pub fn pc(&self) -> Option<u64> {
        self.pc
    }

    /// Whether the pc was rewritten from a deoptimization handler back to the
    /// original pc of the deoptimized code.
    pub fn is_deoptimized(&self) -> bool {
        self.deoptimized
    }

    /// Address of the word `slots` words away from fp.
    pub fn address_of_stack_slot(&self, layout: &FrameLayout, slots: i64) -> Option<u64> {
        self.fp.map(|fp| layout.slot(fp, slots))
    }

    /// Address of the saved caller fp.
    pub fn link_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.link_offset())
    }

    /// Address of the return address into the sender.
    pub fn sender_pc_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.return_addr_offset())
    }

    /// The sender's sp as implied by a standard fp-based frame.
    pub fn sender_sp(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.sender_sp_offset())
    }

    /// Address of the slot holding this entry frame's call wrapper.
    pub fn entry_frame_call_wrapper_address(&self, layout: &FrameLayout) -> Option<u64> {
        let offset = layout.entry_frame_call_wrapper_offset();
        match layout.entry_frame_call_wrapper_base() {
            SlotBase::StackPointer => Some(layout.slot(self.sp, offset)),
            SlotBase::FramePointer => self.address_of_stack_slot(layout, offset),
        }
    }

    /// Address of parameter `index` of a native frame.
    pub fn native_param_address(&self, layout: &FrameLayout, index: i64) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.native_frame_initial_param_offset() + index)
    }

    // Interpreter frame slots. These are only meaningful for interpreted
    // frames.

    pub fn interpreter_frame_sender_sp_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_sender_sp_offset())
    }

    pub fn interpreter_frame_last_sp_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_last_sp_offset())
    }

    pub fn interpreter_frame_method_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_method_offset())
    }

    pub fn interpreter_frame_mdx_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_mdx_offset())
    }

    pub fn interpreter_frame_mirror_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_mirror_offset())
    }

    pub fn interpreter_frame_cache_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_cache_offset())
    }

    pub fn interpreter_frame_locals_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_locals_offset())
    }

    pub fn interpreter_frame_bcx_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_bcx_offset())
    }

    pub fn interpreter_frame_initial_sp_address(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_initial_sp_offset())
    }

    /// Start of the monitor block; monitors are allocated downwards from
    /// here.
    pub fn interpreter_frame_monitor_begin(&self, layout: &FrameLayout) -> Option<u64> {
        self.address_of_stack_slot(layout, layout.interpreter_frame_monitor_block_bottom_offset())
    }
}

// The deoptimized flag is derived from the other fields and does not take
// part in equality.
impl PartialEq for Frame {
    fn eq(&self, other: &Frame) -> bool {
        self.sp == other.sp
            && self.unextended_sp == other.unextended_sp
            && self.fp == other.fp
            && self.pc == other.pc
    }
}

impl Eq for Frame {}

impl Hash for Frame {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sp.hash(state);
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn opt(f: &mut fmt::Formatter<'_>, v: Option<u64>) -> fmt::Result {
            match v {
                Some(v) => write!(f, "{v:#x}"),
                None => f.write_str("null"),
            }
        }
        write!(f, "sp: {:#x}, unextended_sp: {:#x}, fp: ", self.sp, self.unextended_sp)?;
        opt(f, self.fp)?;
        f.write_str(", pc: ")?;
        opt(f, self.pc)?;
        if self.deoptimized {
            f.write_str(" (deoptimized)")?;
        }
        Ok(())
    }
}
