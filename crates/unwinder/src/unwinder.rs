//! Frame construction and sender computation.
//!
//! Given any one frame, [`Unwinder::sender`] computes the frame of its
//! caller. How that is done depends on what kind of code the frame's pc is
//! in:
//!
//! * Entry frames are the boundary between native code and managed code. The
//!   call stub stored a call wrapper in the frame that records the sp, fp and
//!   pc of the last managed frame before native code was entered, and that is
//!   the sender.
//!
//! * Interpreted frames have a fixed shape around fp, so the sender's sp, fp
//!   and pc all sit at known offsets from it.
//!
//! * Compiled frames have a size known from the code's metadata. The sender's
//!   sp is the unextended sp plus that size and the return address and saved
//!   fp sit just below it.
//!
//! * Everything else is assumed to follow the platform's frame pointer
//!   convention.
//!
//! Constructing a frame is itself not entirely trivial. Frames returning to a
//! method-handle call site have their real sp saved in the fp slot, and frames
//! whose code was deoptimized have their pc pointing at the deoptimization
//! handler with the original pc stashed in the frame. Both are fixed up before
//! a [`Frame`] is handed out, in that order, since the original pc is found
//! relative to the corrected sp.

use crate::code::{CodeBlob, CodeCache};
use crate::error::{Result, UnwindError};
use crate::frame::{Frame, FrameKind};
use crate::layout::FrameLayout;
use crate::memory::TargetMemory;
use crate::register_map::RegisterMap;
use crate::thread::FrameAnchor;

/// Walks frames of one inspected runtime.
///
/// This borrows the runtime's resolved layout together with access to its
/// memory and code metadata. It holds no state of its own between calls;
/// everything a walk accumulates lives in the caller's [`RegisterMap`].
#[derive(Clone, Copy)]
pub struct Unwinder<'a> {
    layout: &'a FrameLayout,
    memory: &'a dyn TargetMemory,
    code: &'a dyn CodeCache,
}

/// Frame fields as first read, before any correction.
#[derive(Debug, Clone, Copy)]
struct RawFrame {
    sp: u64,
    unextended_sp: u64,
    fp: Option<u64>,
    pc: Option<u64>,
}

impl<'a> Unwinder<'a> {
    pub fn new(
        layout: &'a FrameLayout,
        memory: &'a dyn TargetMemory,
        code: &'a dyn CodeCache,
    ) -> Unwinder<'a> {
        Unwinder {
            layout,
            memory,
            code,
        }
    }

    pub fn layout(&self) -> &'a FrameLayout {
        self.layout
    }

    pub fn memory(&self) -> &'a dyn TargetMemory {
        self.memory
    }

    pub fn code(&self) -> &'a dyn CodeCache {
        self.code
    }

    /// Builds the frame at `sp`/`fp` resuming at `pc`.
    pub fn frame(&self, sp: u64, fp: Option<u64>, pc: u64) -> Result<Frame> {
        self.finish(RawFrame {
            sp,
            unextended_sp: sp,
            fp,
            pc: Some(pc),
        })
    }

    /// Builds a frame whose unextended sp is already known to differ from
    /// its sp.
    pub fn frame_with_unextended_sp(
        &self,
        sp: u64,
        unextended_sp: u64,
        fp: Option<u64>,
        pc: Option<u64>,
    ) -> Result<Frame> {
        self.finish(RawFrame {
            sp,
            unextended_sp,
            fp,
            pc,
        })
    }

    /// Builds the frame at `sp`/`fp`, taking the pc from the return address
    /// just below `sp`.
    ///
    /// That word is only a return address if the callee was managed code, so
    /// it is kept only if it points into managed code.
    pub fn frame_without_pc(&self, sp: u64, fp: Option<u64>) -> Result<Frame> {
        let saved_pc = self.memory.address_at(sp, self.layout.words(-1))?;
        let pc = self.code.is_managed_pc(saved_pc).then_some(saved_pc);
        self.finish(RawFrame {
            sp,
            unextended_sp: sp,
            fp,
            pc,
        })
    }

    fn finish(&self, raw: RawFrame) -> Result<Frame> {
        let raw = self.adjust_unextended_sp(raw);
        self.adjust_for_deopt(raw)
    }

    /// If this frame returns to a compiled method-handle call site, the
    /// saved fp is in fact the saved unextended sp of that call site.
    fn adjust_unextended_sp(&self, raw: RawFrame) -> RawFrame {
        let Some(pc) = raw.pc else { return raw };
        let Some(blob) = self.code.find_blob(pc) else {
            return raw;
        };
        if !blob.is_managed_method() {
            return raw;
        }

        let uses_fp_slot = if blob.is_deopt_mh_entry(pc) {
            true
        } else if blob.is_deopt_handler_entry(pc) {
            // The original pc is found relative to the current unextended
            // sp; nothing to correct here.
            false
        } else {
            blob.is_method_handle_return(pc)
        };
        if !uses_fp_slot {
            return raw;
        }

        match raw.fp {
            Some(fp) => {
                log::trace!(
                    "unextended sp {:#x} -> {fp:#x} for method handle site in {}",
                    raw.unextended_sp,
                    blob.name()
                );
                RawFrame {
                    unextended_sp: fp,
                    ..raw
                }
            }
            None => {
                log::debug!(
                    "method handle site at {pc:#x} in {} but no fp to recover sp from",
                    blob.name()
                );
                raw
            }
        }
    }

    /// Rewrites a pc at a deoptimization handler back to the pc the code was
    /// deoptimized at.
    fn adjust_for_deopt(&self, raw: RawFrame) -> Result<Frame> {
        if let Some(pc) = raw.pc {
            if let Some(blob) = self.code.find_blob(pc) {
                if blob.is_managed_method() && blob.is_deopt_handler_entry(pc) {
                    let original = self
                        .memory
                        .address_at(raw.unextended_sp, blob.deopt_original_pc_offset())?;
                    log::trace!("deoptimized frame: pc {pc:#x} -> {original:#x}");
                    return Ok(Frame::from_parts(
                        raw.sp,
                        raw.unextended_sp,
                        raw.fp,
                        Some(original),
                        true,
                    ));
                }
            }
        }
        Ok(Frame::from_parts(
            raw.sp,
            raw.unextended_sp,
            raw.fp,
            raw.pc,
            false,
        ))
    }

    /// Classifies `frame` by its pc.
    ///
    /// This is recomputed on every call rather than remembered in the frame,
    /// so that every question asked about one frame gets the same answer
    /// from the current metadata.
    pub fn kind(&self, frame: &Frame) -> FrameKind {
        let Some(pc) = frame.pc() else {
            return FrameKind::Native;
        };
        if self.code.returns_to_call_stub(pc) {
            FrameKind::Entry
        } else if self.code.interpreter_contains(pc) {
            FrameKind::Interpreted
        } else if self.code.find_blob(pc).is_some() {
            FrameKind::Compiled
        } else {
            FrameKind::Native
        }
    }

    pub fn is_entry_frame(&self, frame: &Frame) -> bool {
        self.kind(frame) == FrameKind::Entry
    }

    pub fn is_interpreted_frame(&self, frame: &Frame) -> bool {
        self.kind(frame) == FrameKind::Interpreted
    }

    /// Reads the frame anchor out of an entry frame's call wrapper.
    pub fn entry_frame_call_wrapper(&self, frame: &Frame) -> Result<FrameAnchor> {
        let slot = frame
            .entry_frame_call_wrapper_address(self.layout)
            .ok_or(UnwindError::MissingFramePointer { sp: frame.sp() })?;
        let wrapper = self.memory.read_word(slot)?;
        self.code.entry_frame_call_wrapper_at(wrapper)
    }

    /// Whether this entry frame is the outermost one of its thread: no
    /// managed frames were active when native code called into it.
    pub fn entry_frame_is_first(&self, frame: &Frame) -> Result<bool> {
        Ok(self.entry_frame_call_wrapper(frame)?.last_sp.is_none())
    }

    /// The saved caller fp, or `None` if it cannot be read.
    ///
    /// Native code need not keep a frame pointer at all, so this is a best
    /// effort value.
    pub fn link(&self, frame: &Frame) -> Option<u64> {
        let addr = frame.link_address(self.layout)?;
        match self.memory.read_word(addr) {
            Ok(link) => Some(link),
            Err(e) => {
                log::trace!("no link for frame {frame}: {e}");
                None
            }
        }
    }

    /// The return address into the sender.
    pub fn sender_pc(&self, frame: &Frame) -> Result<u64> {
        let addr = frame
            .sender_pc_address(self.layout)
            .ok_or(UnwindError::MissingFramePointer { sp: frame.sp() })?;
        self.memory.read_word(addr)
    }

    /// The sender's unextended sp as saved by the interpreter.
    pub fn interpreter_frame_sender_sp(&self, frame: &Frame) -> Result<u64> {
        let addr = frame
            .interpreter_frame_sender_sp_address(self.layout)
            .ok_or(UnwindError::MissingFramePointer { sp: frame.sp() })?;
        self.memory.read_word(addr)
    }

    /// Computes the sender of `frame`.
    ///
    /// When `map` is updating, it is left describing where the sender's
    /// callee-saved registers can be found.
    pub fn sender(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame> {
        // Default is we don't have to follow them. The sender_for_xxx will
        // update it accordingly.
        map.set_include_argument_oops(false);

        log::trace!("sender of {:?} frame {frame}", self.kind(frame));
        let Some(pc) = frame.pc() else {
            return self.sender_for_native_frame(frame);
        };
        if self.code.returns_to_call_stub(pc) {
            return self.sender_for_entry_frame(frame, map);
        }
        if self.code.interpreter_contains(pc) {
            return self.sender_for_interpreter_frame(frame, map);
        }
        match self.code.find_blob(pc) {
            Some(blob) => self.sender_for_compiled_frame(frame, map, blob),
            // Must be native code, e.g. the marshaling code for native
            // methods.
            None => self.sender_for_native_frame(frame),
        }
    }

    fn sender_for_entry_frame(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame> {
        let anchor = self.entry_frame_call_wrapper(frame)?;
        let Some(last_sp) = anchor.last_sp else {
            panic!("sender of the first entry frame requested: {frame}");
        };
        if last_sp <= frame.sp() {
            return Err(UnwindError::NonMonotonicStack {
                sp: frame.sp(),
                sender_sp: last_sp,
            });
        }

        let sender = match anchor.last_pc {
            Some(pc) => self.frame(last_sp, anchor.last_fp, pc)?,
            None => self.frame_without_pc(last_sp, anchor.last_fp)?,
        };
        map.clear();
        debug_assert!(map.include_argument_oops(), "should be set by clear");
        Ok(sender)
    }

    fn sender_for_interpreter_frame(&self, frame: &Frame, map: &mut RegisterMap) -> Result<Frame> {
        let fp = frame
            .fp()
            .ok_or(UnwindError::MissingFramePointer { sp: frame.sp() })?;

        // The sender's sp is right above the link/return address pair; the
        // interpreter also saved the sp the sender had before it extended
        // its frame for the call.
        let sp = self.layout.slot(fp, self.layout.sender_sp_offset());
        let unextended_sp = self.interpreter_frame_sender_sp(frame)?;
        let pc = self.sender_pc(frame)?;

        if map.update_map() {
            let link = self.layout.slot(fp, self.layout.link_offset());
            map.set_location(self.layout.frame_pointer_register(), link);
        }

        self.frame_with_unextended_sp(sp, unextended_sp, self.link(frame), Some(pc))
    }

    fn sender_for_compiled_frame(
        &self,
        frame: &Frame,
        map: &mut RegisterMap,
        blob: &dyn CodeBlob,
    ) -> Result<Frame> {
        let frame_size = blob.frame_size();
        assert!(
            frame_size >= 0,
            "{} declares negative frame size {frame_size}",
            blob.name()
        );
        let sender_sp = frame.unextended_sp().wrapping_add_signed(frame_size);

        // The return address is always the word just below the sender's sp.
        let ret_slot = self.layout.return_addr_offset() - self.layout.sender_sp_offset();
        let sender_pc = self.memory.address_at(sender_sp, self.layout.words(ret_slot))?;

        // This is the saved value of fp which may or may not really be an fp.
        // It is only an fp if the sender is an interpreter frame.
        let link_slot = self.layout.link_offset() - self.layout.sender_sp_offset();
        let saved_fp_addr = self.layout.slot(sender_sp, link_slot);

        if map.update_map() {
            // Some runtime stubs have no oop map but still need their
            // callers' arguments scanned, so this is independent of it.
            map.set_include_argument_oops(blob.caller_must_scan_argument_oops());

            if let Some(oop_map) = frame.pc().and_then(|pc| blob.oop_map_for(pc)) {
                for value in oop_map.callee_saved() {
                    let loc = frame.unextended_sp().wrapping_add(
                        u64::from(value.stack_slot) * u64::from(self.layout.stack_slot_size()),
                    );
                    map.set_location(value.reg, loc);
                }
            }

            // The prologue saves fp without an oop map entry for it, but if
            // the caller is compiled code fp may hold live state.
            map.set_location(self.layout.frame_pointer_register(), saved_fp_addr);
        }

        let sender_fp = self.memory.read_word(saved_fp_addr)?;
        self.frame(sender_sp, Some(sender_fp), sender_pc)
    }

    /// Native and unknown code: assume a conventional fp-linked frame.
    fn sender_for_native_frame(&self, frame: &Frame) -> Result<Frame> {
        let sp = frame
            .sender_sp(self.layout)
            .ok_or(UnwindError::MissingFramePointer { sp: frame.sp() })?;
        let pc = self.sender_pc(frame)?;
        self.frame(sp, self.link(frame), pc)
    }

    /// Sanity checks an interpreted frame's sp and fp.
    ///
    /// These do not prove the frame is sound, but reject the garbage a walk
    /// typically runs into when it has gone wrong.
    pub fn is_interpreted_frame_valid(&self, frame: &Frame) -> bool {
        debug_assert!(self.is_interpreted_frame(frame), "not an interpreted frame");

        let Some(fp) = frame.fp() else { return false };
        let sp = frame.sp();
        if fp & 0x3 != 0 || sp & 0x3 != 0 {
            return false;
        }

        // The expression stack starts below the fixed part of the frame.
        let initial_sp = self
            .layout
            .slot(fp, self.layout.interpreter_frame_initial_sp_offset());
        if initial_sp < sp {
            return false;
        }

        if fp <= sp {
            return false;
        }

        // Stack frames shouldn't be large.
        fp - sp <= self.layout.max_interpreter_frame_bytes()
    }
}
