//! Finding the topmost frame of a suspended thread.
//!
//! A thread may be suspended at any instruction: in the middle of a
//! prologue, in native code, in optimized code that uses fp as a general
//! purpose register. The registers alone therefore do not always describe a
//! usable frame, and this module makes a best-effort guess at one that is.
//!
//! The approach depends on where the pc is:
//!
//! * In code from the non-optimizing compiler, fp is always valid and the
//!   registers are taken as they are.
//!
//! * In the interpreter, sp is taken as is. The interpreter's fp is
//!   reconstructed from its fixed frame shape later on.
//!
//! * In optimized code, fp cannot be trusted, and sp may point somewhere in
//!   the middle of the frame. The pc is taken as a given and candidate sps
//!   above the register value are tried one word at a time, each by walking
//!   the whole stack from it, until one reaches the outermost entry frame.
//!
//! * Anywhere else, the thread is assumed to be in the runtime itself and the
//!   frame anchor it recorded when it left managed code is used instead.

use crate::code::CompilerTier;
use crate::error::Result;
use crate::register_map::RegisterMap;
use crate::thread::{ContextRegister, ThreadContext};
use crate::unwinder::Unwinder;

/// Best-effort (sp, fp, pc) of the topmost frame of a thread.
pub struct CurrentFrameGuess<'a> {
    unwinder: Unwinder<'a>,
    thread: &'a dyn ThreadContext,
    sp: Option<u64>,
    fp: Option<u64>,
    pc: Option<u64>,
}

/// How walking from one candidate sp went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Probe {
    /// The walk reached the first entry frame of the thread.
    ReachedFirstEntryFrame,
    /// A sender was not further up the stack than its callee.
    NonMonotonic,
}

impl<'a> CurrentFrameGuess<'a> {
    pub fn new(unwinder: Unwinder<'a>, thread: &'a dyn ThreadContext) -> CurrentFrameGuess<'a> {
        CurrentFrameGuess {
            unwinder,
            thread,
            sp: None,
            fp: None,
            pc: None,
        }
    }

    /// Runs the guess, searching at most `region_in_bytes` above the thread's
    /// sp when a search is needed.
    ///
    /// Returns whether a frame was found. The findings are then available
    /// from [`sp`](Self::sp), [`fp`](Self::fp) and [`pc`](Self::pc); an
    /// absent fp or pc means it has to be derived from the frame later.
    pub fn run(&mut self, region_in_bytes: u64) -> bool {
        let sp = self.thread.register(ContextRegister::StackPointer);
        let pc = self.thread.register(ContextRegister::ProgramCounter);
        let fp = self.thread.register(ContextRegister::FramePointer);
        let code = self.unwinder.code();

        let Some(sp) = sp else {
            // Bail out if no last managed frame either.
            let anchor = self.thread.anchor();
            if anchor.last_sp.is_some() {
                self.set_values(anchor.last_sp, anchor.last_fp, None);
                return true;
            }
            log::debug!("no sp in thread context and no frame anchor");
            return false;
        };

        // Assume we're not going to find anything.
        self.set_values(None, None, None);

        let Some(pc) = pc.filter(|pc| code.is_managed_pc(*pc)) else {
            return self.use_frame_anchor();
        };

        if code.compiler_tier() == CompilerTier::Client {
            // Frames of the non-optimizing compiler always publish fp, and
            // their sizes are not registered anywhere, so there is nothing
            // to search for.
            log::debug!("choosing client compiled frame: sp = {sp:#x}, fp = {fp:?}, pc = {pc:#x}");
            self.set_values(Some(sp), fp, Some(pc));
            return true;
        }

        if code.interpreter_contains(pc) {
            log::debug!("choosing interpreter frame: sp = {sp:#x}, pc = {pc:#x}");
            self.set_values(Some(sp), None, Some(pc));
            return true;
        }

        // Optimized code: fp is not guaranteed to be valid, so take the pc as
        // a given and find an sp that lets the whole stack be walked.
        let step = u64::from(self.unwinder.layout().pointer_size());
        let mut offset = 0;
        while offset < region_in_bytes {
            let cur_sp = sp.wrapping_add(offset);
            match self.probe(cur_sp, pc) {
                Ok(Probe::ReachedFirstEntryFrame) => {
                    log::debug!("choosing sp = {cur_sp:#x}, pc = {pc:#x}");
                    self.set_values(Some(cur_sp), None, Some(pc));
                    return true;
                }
                Ok(Probe::NonMonotonic) => {
                    log::trace!("frame at offset {offset} walks in the wrong direction");
                }
                Err(e) => {
                    // Bad sp, try another.
                    log::trace!("no walk from offset {offset}: {e}");
                }
            }
            offset += step;
        }

        // Not able to find a plausible sp to go with this pc.
        log::debug!("no sp within {region_in_bytes} bytes of {sp:#x} walks to an entry frame");
        false
    }

    /// Walks from a frame at `sp` resuming at `pc` until the first entry
    /// frame, or until the walk goes wrong.
    fn probe(&self, sp: u64, pc: u64) -> Result<Probe> {
        let mut frame = self.unwinder.frame(sp, None, pc)?;
        let mut map = RegisterMap::new(false);
        loop {
            if self.unwinder.is_entry_frame(&frame) && self.unwinder.entry_frame_is_first(&frame)? {
                return Ok(Probe::ReachedFirstEntryFrame);
            }
            let sender = self.unwinder.sender(&frame, &mut map)?;
            if sender.sp() <= frame.sp() {
                // Frame points to itself or to a location in the wrong
                // direction.
                return Ok(Probe::NonMonotonic);
            }
            frame = sender;
        }
    }

    /// The pc is not in managed code: assume the thread is in the runtime and
    /// use the state it saved when leaving managed code.
    fn use_frame_anchor(&mut self) -> bool {
        let anchor = self.thread.anchor();
        log::debug!("choosing frame anchor: {anchor:?}");
        let Some(sp) = anchor.last_sp else {
            // No known managed frames on the stack.
            return false;
        };

        let code = self.unwinder.code();
        let mut fp = anchor.last_fp;
        let mut pc = anchor.last_pc;
        if fp.is_none() {
            if let Some(blob) = pc.and_then(|pc| code.find_blob(pc)) {
                // The saved link sits just below the return address at the
                // base of the frame.
                let words = i64::from(self.unwinder.layout().pointer_size());
                match blob.frame_size().checked_sub(2 * words) {
                    Some(link_offset) if link_offset >= 0 => {
                        let derived = sp.wrapping_add_signed(link_offset);
                        log::trace!("derived fp {derived:#x} from frame size of {}", blob.name());
                        fp = Some(derived);
                    }
                    _ => log::debug!(
                        "frame of {} too small to hold a saved fp, leaving fp unknown",
                        blob.name()
                    ),
                }
            }
        }
        if pc.is_some_and(|pc| !code.is_managed_pc(pc)) {
            log::debug!("dropping anchor pc {pc:#x?} outside managed code");
            pc = None;
        }
        self.set_values(Some(sp), fp, pc);
        true
    }

    fn set_values(&mut self, sp: Option<u64>, fp: Option<u64>, pc: Option<u64>) {
        self.sp = sp;
        self.fp = fp;
        self.pc = pc;
    }

    pub fn sp(&self) -> Option<u64> {
        self.sp
    }

    pub fn fp(&self) -> Option<u64> {
        self.fp
    }

    pub fn pc(&self) -> Option<u64> {
        self.pc
    }
}
