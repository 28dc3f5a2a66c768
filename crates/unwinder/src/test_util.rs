//! Fake collaborators for exercising the walker against hand-built stacks.

use crate::code::{CodeBlob, CodeCache, CompilerTier, OopMap};
use crate::error::{Result, UnwindError};
use crate::layout::FrameLayout;
use crate::memory::MemoryImage;
use crate::thread::{ContextRegister, FrameAnchor, ThreadContext};
use crate::unwinder::Unwinder;
use core::ops::Range;
use std::collections::HashMap;
use target_lexicon::{Aarch64Architecture, Architecture};

pub const INTERPRETER: Range<u64> = 0x3_0000..0x3_8000;
pub const INTERPRETER_PC: u64 = 0x3_0010;
pub const CALL_STUB_RETURN: u64 = 0x3_9000;

pub struct TestBlob {
    pub name: &'static str,
    pub range: Range<u64>,
    pub frame_size: i64,
    pub managed: bool,
    pub deopt_handler: Option<u64>,
    pub deopt_mh_entries: Vec<u64>,
    pub mh_returns: Vec<u64>,
    pub caller_must_scan_argument_oops: bool,
    pub oop_maps: HashMap<u64, OopMap>,
    pub orig_pc_offset: i64,
}

impl TestBlob {
    pub fn method(name: &'static str, range: Range<u64>, frame_size: i64) -> TestBlob {
        TestBlob {
            name,
            range,
            frame_size,
            managed: true,
            deopt_handler: None,
            deopt_mh_entries: Vec::new(),
            mh_returns: Vec::new(),
            caller_must_scan_argument_oops: false,
            oop_maps: HashMap::new(),
            orig_pc_offset: 0,
        }
    }

    pub fn stub(name: &'static str, range: Range<u64>, frame_size: i64) -> TestBlob {
        TestBlob {
            managed: false,
            ..TestBlob::method(name, range, frame_size)
        }
    }
}

impl CodeBlob for TestBlob {
    fn name(&self) -> &str {
        self.name
    }

    fn frame_size(&self) -> i64 {
        self.frame_size
    }

    fn is_managed_method(&self) -> bool {
        self.managed
    }

    fn is_deopt_handler_entry(&self, pc: u64) -> bool {
        self.deopt_handler == Some(pc)
    }

    fn is_deopt_mh_entry(&self, pc: u64) -> bool {
        self.deopt_mh_entries.contains(&pc)
    }

    fn is_method_handle_return(&self, pc: u64) -> bool {
        self.mh_returns.contains(&pc)
    }

    fn caller_must_scan_argument_oops(&self) -> bool {
        self.caller_must_scan_argument_oops
    }

    fn oop_map_for(&self, pc: u64) -> Option<&OopMap> {
        self.oop_maps.get(&pc)
    }

    fn deopt_original_pc_offset(&self) -> i64 {
        self.orig_pc_offset
    }
}

/// A fake runtime: its memory, its code and its frame layout.
pub struct TestTarget {
    pub layout: FrameLayout,
    pub memory: MemoryImage,
    pub blobs: Vec<TestBlob>,
    pub wrappers: HashMap<u64, FrameAnchor>,
    pub tier: CompilerTier,
}

impl TestTarget {
    pub fn new(arch: Architecture) -> TestTarget {
        let _ = env_logger::try_init();
        let layout = FrameLayout::for_architecture(arch).unwrap();
        let memory = MemoryImage::new(layout.pointer_size());
        TestTarget {
            layout,
            memory,
            blobs: Vec::new(),
            wrappers: HashMap::new(),
            tier: CompilerTier::Server,
        }
    }

    pub fn aarch64() -> TestTarget {
        TestTarget::new(Architecture::Aarch64(Aarch64Architecture::Aarch64))
    }

    pub fn x86_64() -> TestTarget {
        TestTarget::new(Architecture::X86_64)
    }

    pub fn add_blob(&mut self, blob: TestBlob) {
        self.blobs.push(blob);
    }

    pub fn unwinder(&self) -> Unwinder<'_> {
        Unwinder::new(&self.layout, &self.memory, self)
    }
}

impl CodeCache for TestTarget {
    fn find_blob(&self, pc: u64) -> Option<&dyn CodeBlob> {
        self.blobs
            .iter()
            .find(|b| b.range.contains(&pc))
            .map(|b| b as &dyn CodeBlob)
    }

    fn interpreter_code_range(&self) -> Range<u64> {
        INTERPRETER
    }

    fn returns_to_call_stub(&self, pc: u64) -> bool {
        pc == CALL_STUB_RETURN
    }

    fn entry_frame_call_wrapper_at(&self, addr: u64) -> Result<FrameAnchor> {
        self.wrappers
            .get(&addr)
            .copied()
            .ok_or(UnwindError::UnmappedAddress { addr })
    }

    fn compiler_tier(&self) -> CompilerTier {
        self.tier
    }
}

#[derive(Default)]
pub struct TestThread {
    pub sp: Option<u64>,
    pub fp: Option<u64>,
    pub pc: Option<u64>,
    pub anchor: FrameAnchor,
}

impl ThreadContext for TestThread {
    fn register(&self, reg: ContextRegister) -> Option<u64> {
        match reg {
            ContextRegister::StackPointer => self.sp,
            ContextRegister::FramePointer => self.fp,
            ContextRegister::ProgramCounter => self.pc,
        }
    }

    fn anchor(&self) -> FrameAnchor {
        self.anchor
    }
}
