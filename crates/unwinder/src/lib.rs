//! Stack unwinding for inspecting a managed runtime from the outside.
//!
//! This crate reconstructs the call stacks of threads of a managed runtime
//! (an interpreter plus JIT compilers) without running any code in it: the
//! process may be suspended at an arbitrary instruction, or only exist as a
//! crash dump. Everything it knows about the target comes through three
//! narrow interfaces:
//!
//! * [`TargetMemory`] reads words out of the target's address space,
//! * [`CodeCache`] answers questions about the generated code containing a
//!   given pc,
//! * [`ThreadContext`] provides a thread's saved registers and the frame
//!   anchor the runtime recorded when the thread last left managed code.
//!
//! The frame shapes themselves are described by a [`FrameLayout`], resolved
//! once per target from a built-in architecture preset or a configuration
//! file.
//!
//! A walk is seeded with [`CurrentFrameGuess`] and then proceeds one
//! [`Unwinder::sender`] call at a time; [`visit_frames`] does both.

mod arch;
mod code;
mod error;
mod frame;
mod guess;
mod layout;
mod memory;
mod register_map;
mod stackwalk;
mod thread;
mod unwinder;

#[cfg(test)]
mod test_util;

pub use code::{CalleeSavedValue, CodeBlob, CodeCache, CompilerTier, OopMap};
pub use error::{Result, UnwindError};
pub use frame::{Frame, FrameKind};
pub use guess::CurrentFrameGuess;
pub use layout::{FrameLayout, LayoutConfig, SlotBase};
pub use memory::{MemoryImage, TargetMemory};
pub use register_map::RegisterMap;
pub use stackwalk::{Backtrace, visit_frames};
pub use thread::{ContextRegister, FrameAnchor, ThreadContext};
pub use unwinder::Unwinder;
