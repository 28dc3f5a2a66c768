//! Metadata about code in the inspected runtime.
//!
//! The walker needs to know, for any program counter, which piece of code
//! contains it and what that code's frames look like. That knowledge lives in
//! the inspected runtime's own data structures; this module only describes the
//! narrow questions the walker asks of it.

use crate::error::Result;
use crate::thread::FrameAnchor;
use core::ops::Range;

/// Which compiler produced the runtime's compiled code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerTier {
    /// A non-optimizing compiler whose frames always publish fp.
    Client,
    /// An optimizing compiler that may use fp as a general purpose register.
    Server,
}

/// One callee-saved register spilled by a compiled frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CalleeSavedValue {
    /// Oop-map number of the register whose value was saved.
    pub reg: u16,
    /// Stack slot, counted from the frame's unextended sp, where it was saved.
    pub stack_slot: u32,
}

/// The callee-saved register part of the oop map at one call site.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OopMap {
    callee_saved: Vec<CalleeSavedValue>,
}

impl OopMap {
    /// Creates an oop map recording `callee_saved` spills.
    pub fn new(callee_saved: Vec<CalleeSavedValue>) -> OopMap {
        OopMap { callee_saved }
    }

    /// Registers saved in the frame at this call site.
    pub fn callee_saved(&self) -> &[CalleeSavedValue] {
        &self.callee_saved
    }
}

/// A contiguous region of generated code: a compiled method, a runtime stub,
/// an adapter.
pub trait CodeBlob {
    /// Name used in log output.
    fn name(&self) -> &str;

    /// Size in bytes of the frames this code creates.
    ///
    /// This is fixed when the code is generated. A negative value is a bug in
    /// the metadata, not in the inspected process.
    fn frame_size(&self) -> i64;

    /// Whether this is a compiled managed method, as opposed to a stub.
    fn is_managed_method(&self) -> bool;

    /// Whether `pc` is the start of this method's deoptimization handler.
    fn is_deopt_handler_entry(&self, pc: u64) -> bool;

    /// Whether `pc` is a deoptimization entry for a method-handle call site.
    fn is_deopt_mh_entry(&self, pc: u64) -> bool;

    /// Whether `pc` is the return point of a method-handle call.
    fn is_method_handle_return(&self, pc: u64) -> bool;

    /// Whether callers of this code must treat argument registers as roots.
    fn caller_must_scan_argument_oops(&self) -> bool;

    /// The oop map describing the call site returning to `pc`, if any.
    fn oop_map_for(&self, pc: u64) -> Option<&OopMap>;

    /// Byte offset from the unextended sp of the slot where deoptimization
    /// saved the original pc.
    fn deopt_original_pc_offset(&self) -> i64;
}

/// Queries about the inspected runtime's code.
pub trait CodeCache {
    /// The code blob containing `pc`, if any.
    fn find_blob(&self, pc: u64) -> Option<&dyn CodeBlob>;

    /// Range of addresses occupied by the interpreter.
    fn interpreter_code_range(&self) -> Range<u64>;

    /// Whether `pc` is the point the call stub returns to, which is how an
    /// entry frame is recognized.
    fn returns_to_call_stub(&self, pc: u64) -> bool;

    /// Reads the frame anchor out of the call wrapper at `addr`.
    fn entry_frame_call_wrapper_at(&self, addr: u64) -> Result<FrameAnchor>;

    /// The compiler producing compiled code in this runtime.
    fn compiler_tier(&self) -> CompilerTier;

    /// Whether `pc` is inside the interpreter.
    fn interpreter_contains(&self, pc: u64) -> bool {
        self.interpreter_code_range().contains(&pc)
    }

    /// Whether `pc` is anywhere in code the runtime generated.
    fn is_managed_pc(&self, pc: u64) -> bool {
        self.interpreter_contains(pc) || self.find_blob(pc).is_some()
    }
}
