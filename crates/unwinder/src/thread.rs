//! Register state of a suspended thread.

/// The registers of a thread snapshot that seed a stack walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextRegister {
    StackPointer,
    FramePointer,
    ProgramCounter,
}

/// The sp/fp/pc the runtime records each time a thread leaves managed code.
///
/// Any of these may be absent: a thread that never ran managed code has no
/// anchor, and transitions may record sp without a pc.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameAnchor {
    pub last_sp: Option<u64>,
    pub last_fp: Option<u64>,
    pub last_pc: Option<u64>,
}

/// A suspended thread of the inspected process.
pub trait ThreadContext {
    /// Reads `reg` from the thread's register snapshot.
    fn register(&self, reg: ContextRegister) -> Option<u64>;

    /// The thread's most recently recorded frame anchor.
    fn anchor(&self) -> FrameAnchor;
}
