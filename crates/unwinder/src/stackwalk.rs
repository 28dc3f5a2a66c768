//! Stack-walking of an inspected thread.
//!
//! A walk is seeded once by [`CurrentFrameGuess`] and then follows
//! [`Unwinder::sender`] one frame at a time until it reaches the entry frame
//! through which the thread first entered managed code. Every step must move
//! up the stack; a sender at or below its callee means the walk has gone
//! wrong and it is stopped there rather than producing a bogus trace.
//!
//! This module provides a visitor interface to frames, but is agnostic to the
//! desired use-case or consumer of the frames.

use crate::error::{Result, UnwindError};
use crate::frame::Frame;
use crate::guess::CurrentFrameGuess;
use crate::register_map::RegisterMap;
use crate::thread::ThreadContext;
use crate::unwinder::Unwinder;
use core::ops::ControlFlow;

/// Walk the stack of `thread`, calling `f` for each frame from the topmost
/// down to (and including) the first entry frame.
///
/// `search_region` bounds how far above the thread's sp the initial guess
/// may look for a walkable frame. The `map` is updated along the way, so a
/// visitor sees in it where the callee-saved registers of the frame it is
/// given were spilled.
pub fn visit_frames<R>(
    unwinder: &Unwinder<'_>,
    thread: &dyn ThreadContext,
    search_region: u64,
    map: &mut RegisterMap,
    mut f: impl FnMut(&Frame, &RegisterMap) -> ControlFlow<R>,
) -> Result<ControlFlow<R>> {
    log::trace!("====== Walking thread stack ======");

    let mut guess = CurrentFrameGuess::new(*unwinder, thread);
    if !guess.run(search_region) {
        return Err(UnwindError::StackTraceUnavailable);
    }
    let sp = guess.sp().ok_or(UnwindError::StackTraceUnavailable)?;
    let mut frame = match guess.pc() {
        Some(pc) => unwinder.frame(sp, guess.fp(), pc)?,
        None => unwinder.frame_without_pc(sp, guess.fp())?,
    };
    log::trace!("initial frame {frame}");

    loop {
        if let ControlFlow::Break(r) = f(&frame, map) {
            log::trace!("====== Done walking thread stack (closure break) ======");
            return Ok(ControlFlow::Break(r));
        }

        if unwinder.is_entry_frame(&frame) && unwinder.entry_frame_is_first(&frame)? {
            break;
        }

        let sender = unwinder.sender(&frame, map)?;
        log::trace!("--- sender {sender} ---");

        // The stack grows down, so every sender must be above its callee.
        if sender.sp() <= frame.sp() {
            return Err(UnwindError::NonMonotonicStack {
                sp: frame.sp(),
                sender_sp: sender.sp(),
            });
        }
        frame = sender;
    }

    log::trace!("====== Done walking thread stack ======");
    Ok(ControlFlow::Continue(()))
}

/// The frames of a thread, topmost first.
#[derive(Debug)]
pub struct Backtrace(Vec<Frame>);

impl Backtrace {
    /// Returns an empty backtrace
    pub fn empty() -> Backtrace {
        Backtrace(Vec::new())
    }

    /// Captures the whole stack of `thread`.
    pub fn new(
        unwinder: &Unwinder<'_>,
        thread: &dyn ThreadContext,
        search_region: u64,
    ) -> Result<Backtrace> {
        let mut frames = vec![];
        let mut map = RegisterMap::new(false);
        let _ = visit_frames(unwinder, thread, search_region, &mut map, |frame, _| {
            frames.push(*frame);
            ControlFlow::<()>::Continue(())
        })?;
        Ok(Backtrace(frames))
    }

    pub fn frames(&self) -> &[Frame] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameKind;
    use crate::test_util::*;
    use crate::thread::FrameAnchor;

    /// A stack of, from the top: a compiled frame, an interpreted frame, an
    /// entry frame called from native code that itself was called from a
    /// compiled frame, a second entry frame which is the thread's first.
    fn nested_stack() -> TestTarget {
        let mut t = TestTarget::aarch64();
        t.add_blob(TestBlob::method("top", 0x1_0000..0x1_1000, 0x20));
        t.add_blob(TestBlob::method("outer", 0x2_0000..0x2_1000, 0x40));
        t.memory.map_words(0x8000, &[0; 0x200]).unwrap();

        // compiled frame at 0x8000 returns into the interpreter at 0x8020;
        // its saved fp slot holds the interpreter's fp 0x8100.
        t.memory.write_word(0x8018, INTERPRETER_PC).unwrap();
        t.memory.write_word(0x8010, 0x8100).unwrap();

        // interpreted frame, fp 0x8100: sender sp slot, link, return address
        t.memory.write_word(0x80f8, 0x8110).unwrap();
        t.memory.write_word(0x8100, 0x8200).unwrap();
        t.memory.write_word(0x8108, CALL_STUB_RETURN).unwrap();

        // entry frame at 0x8110 with fp 0x8200; its call wrapper records the
        // compiled frame that called out to native code.
        t.memory.write_word(0x8200 - 64, 0xc0).unwrap();
        t.wrappers.insert(
            0xc0,
            FrameAnchor {
                last_sp: Some(0x8400),
                last_fp: Some(0x8480),
                last_pc: Some(0x2_0010),
            },
        );

        // compiled frame at 0x8400, size 0x40, returns into the first entry
        // frame with fp 0x8600.
        t.memory.write_word(0x8438, CALL_STUB_RETURN).unwrap();
        t.memory.write_word(0x8430, 0x8600).unwrap();
        t.memory.write_word(0x8600 - 64, 0xd0).unwrap();
        t.wrappers.insert(0xd0, FrameAnchor::default());
        t
    }

    fn top_thread() -> TestThread {
        TestThread {
            sp: Some(0x8000),
            pc: Some(0x1_0010),
            ..Default::default()
        }
    }

    #[test]
    fn walks_to_first_entry_frame() {
        let t = nested_stack();
        let unwinder = t.unwinder();
        let trace = Backtrace::new(&unwinder, &top_thread(), 0x100).unwrap();
        let kinds = trace
            .frames()
            .iter()
            .map(|f| unwinder.kind(f))
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            [
                FrameKind::Compiled,
                FrameKind::Interpreted,
                FrameKind::Entry,
                FrameKind::Compiled,
                FrameKind::Entry,
            ]
        );
        let sps = trace.frames().iter().map(|f| f.sp()).collect::<Vec<_>>();
        assert_eq!(sps, [0x8000, 0x8020, 0x8110, 0x8400, 0x8440]);
        assert!(sps.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(trace.frames()[1].fp(), Some(0x8100));
        assert_eq!(trace.frames()[2].fp(), Some(0x8200));
    }

    #[test]
    fn register_map_is_cleared_across_entry_frames() {
        let t = nested_stack();
        let unwinder = t.unwinder();
        let mut map = RegisterMap::new(true);
        let mut seen = vec![];
        let flow = visit_frames(&unwinder, &top_thread(), 0x100, &mut map, |frame, map| {
            seen.push((frame.sp(), map.len(), map.include_argument_oops()));
            ControlFlow::<()>::Continue(())
        })
        .unwrap();
        assert_eq!(flow, ControlFlow::Continue(()));
        assert_eq!(
            seen,
            [
                (0x8000, 0, true),
                // fp saved by the compiled frame
                (0x8020, 1, false),
                (0x8110, 1, false),
                // nothing is live across the native call
                (0x8400, 0, true),
                (0x8440, 1, false),
            ]
        );
    }

    #[test]
    fn visitor_can_stop_early() {
        let t = nested_stack();
        let unwinder = t.unwinder();
        let mut count = 0;
        let flow = visit_frames(
            &unwinder,
            &top_thread(),
            0x100,
            &mut RegisterMap::new(false),
            |_, _| {
                count += 1;
                if count == 2 {
                    ControlFlow::Break("stopped")
                } else {
                    ControlFlow::Continue(())
                }
            },
        )
        .unwrap();
        assert_eq!(flow, ControlFlow::Break("stopped"));
        assert_eq!(count, 2);
    }

    #[test]
    fn non_monotonic_step_is_an_error() {
        let mut t = TestTarget::aarch64();
        t.memory.map_words(0x8000, &[0; 0x40]).unwrap();
        // Not a return address into managed code, so the first frame has
        // no pc and is walked as a native frame.
        t.memory.write_word(0x8078, 0x6_0000).unwrap();
        // That native frame's link points back down the stack.
        t.memory.write_word(0x8100, 0x8000).unwrap();
        t.memory.write_word(0x8108, 0x6_0000).unwrap();
        t.memory.write_word(0x8008, 0x6_0000).unwrap();
        let thread = TestThread {
            sp: Some(0x7000),
            pc: Some(0xdead_0000),
            anchor: FrameAnchor {
                last_sp: Some(0x8080),
                last_fp: Some(0x8100),
                last_pc: None,
            },
            ..Default::default()
        };

        let unwinder = t.unwinder();
        let err = Backtrace::new(&unwinder, &thread, 0x100).unwrap_err();
        assert!(
            matches!(
                err,
                UnwindError::NonMonotonicStack {
                    sp: 0x8110,
                    sender_sp: 0x8010
                }
            ),
            "{err}"
        );
    }

    #[test]
    fn unavailable_stack() {
        let t = TestTarget::aarch64();
        let unwinder = t.unwinder();
        let err = Backtrace::new(&unwinder, &TestThread::default(), 0x100).unwrap_err();
        assert!(matches!(err, UnwindError::StackTraceUnavailable));
        assert_eq!(err.to_string(), "stack trace unavailable for this thread");
    }
}
