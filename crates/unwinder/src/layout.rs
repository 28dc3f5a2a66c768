//! Frame layout constants of the inspected runtime.
//!
//! The offsets here must agree exactly with the frames the inspected runtime's
//! compilers and interpreter produce. They are described by a [`LayoutConfig`],
//! which comes either from a built-in architecture preset or from a TOML file
//! for runtimes with a non-standard layout, and are then resolved once into a
//! [`FrameLayout`] that every frame computation borrows.
//!
//! All offsets are counted in words (pointer-sized slots) unless their name
//! says otherwise. The interpreter frame fields below `fp` look like this,
//! each one word below the previous:
//!
//! ```text
//!     | ...                  |
//!     | return address       | <-- fp + return_addr_offset
//!     | saved fp (link)      | <-- fp + link_offset
//!     | sender sp            | <-- fp + interpreter_frame_sender_sp_offset
//!     | last sp              |
//!     | method               |
//!     | mdx                  |
//!     | padding (optional)   |
//!     | mirror               |
//!     | cp cache             |
//!     | locals               |
//!     | bcx                  |
//!     | initial sp / monitors|
//!     | ...                  |
//! ```

use crate::error::{Result, UnwindError};
use serde_derive::Deserialize;
use target_lexicon::Architecture;

/// Where a stack slot offset is measured from.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SlotBase {
    /// Relative to the frame's stack pointer.
    StackPointer,
    /// Relative to the frame's frame pointer.
    FramePointer,
}

// wrapped, so we have a named section in the file
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    layout: LayoutConfig,
}

/// Unresolved description of a runtime's frame layout.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct LayoutConfig {
    /// Human readable name, used in log output only.
    pub name: String,
    /// Size in bytes of a pointer in the target.
    pub pointer_size: u8,
    /// Offset from fp of the saved caller fp.
    pub link_offset: i64,
    /// Offset from fp of the return address.
    pub return_addr_offset: i64,
    /// Offset from fp of the caller's sp.
    pub sender_sp_offset: i64,
    /// Offset from fp of the interpreter's saved sender sp.
    pub interpreter_frame_sender_sp_offset: i64,
    /// Whether the interpreter frame has an alignment word after the mdx
    /// slot.
    #[serde(default)]
    pub interpreter_frame_padding: bool,
    /// Offset of the slot holding an entry frame's call wrapper.
    pub entry_frame_call_wrapper_offset: i64,
    /// Register the call wrapper offset is relative to.
    pub entry_frame_call_wrapper_base: SlotBase,
    /// Offset from fp of a native frame's first parameter.
    pub native_frame_initial_param_offset: i64,
    /// Oop-map register number of the frame pointer register.
    pub frame_pointer_register: u16,
    /// Largest distance between fp and sp, in words, an interpreter frame
    /// may plausibly have.
    #[serde(default = "default_max_interpreter_frame_words")]
    pub max_interpreter_frame_words: u64,
    /// Size in bytes of an oop-map stack slot.
    #[serde(default = "default_stack_slot_size")]
    pub stack_slot_size: u8,
}

impl LayoutConfig {
    /// The built-in description for `arch`, as a starting point for
    /// runtimes that deviate from it.
    pub fn for_architecture(arch: Architecture) -> Result<LayoutConfig> {
        crate::arch::layout_config(arch)
    }
}

fn default_max_interpreter_frame_words() -> u64 {
    4096
}

fn default_stack_slot_size() -> u8 {
    4
}

/// Resolved, read-only frame layout of an inspected runtime.
#[derive(Debug, Clone)]
pub struct FrameLayout {
    name: String,
    pointer_size: u8,
    link_offset: i64,
    return_addr_offset: i64,
    sender_sp_offset: i64,
    entry_frame_call_wrapper_offset: i64,
    entry_frame_call_wrapper_base: SlotBase,
    native_frame_initial_param_offset: i64,
    frame_pointer_register: u16,
    max_interpreter_frame_words: u64,
    stack_slot_size: u8,

    // precalculated interpreter frame offsets
    interpreter_frame_sender_sp: i64,
    interpreter_frame_last_sp: i64,
    interpreter_frame_method: i64,
    interpreter_frame_mdx: i64,
    interpreter_frame_padding: Option<i64>,
    interpreter_frame_mirror: i64,
    interpreter_frame_cache: i64,
    interpreter_frame_locals: i64,
    interpreter_frame_bcx: i64,
    interpreter_frame_initial_sp: i64,
}

impl FrameLayout {
    /// Resolves `config` into a layout.
    pub fn new(config: LayoutConfig) -> Result<FrameLayout> {
        if config.pointer_size != 4 && config.pointer_size != 8 {
            return Err(UnwindError::InvalidLayout(format!(
                "pointer size must be 4 or 8, not {}",
                config.pointer_size
            )));
        }
        if config.stack_slot_size == 0 {
            return Err(UnwindError::InvalidLayout(
                "stack slot size must be non-zero".to_string(),
            ));
        }
        if config.link_offset == config.return_addr_offset {
            return Err(UnwindError::InvalidLayout(
                "saved link and return address share a slot".to_string(),
            ));
        }

        let sender_sp = config.interpreter_frame_sender_sp_offset;
        let last_sp = sender_sp - 1;
        let method = last_sp - 1;
        let mdx = method - 1;
        let padding = config.interpreter_frame_padding.then_some(mdx - 1);
        let mirror = padding.unwrap_or(mdx) - 1;
        let cache = mirror - 1;
        let locals = cache - 1;
        let bcx = locals - 1;
        let initial_sp = bcx - 1;

        let layout = FrameLayout {
            name: config.name,
            pointer_size: config.pointer_size,
            link_offset: config.link_offset,
            return_addr_offset: config.return_addr_offset,
            sender_sp_offset: config.sender_sp_offset,
            entry_frame_call_wrapper_offset: config.entry_frame_call_wrapper_offset,
            entry_frame_call_wrapper_base: config.entry_frame_call_wrapper_base,
            native_frame_initial_param_offset: config.native_frame_initial_param_offset,
            frame_pointer_register: config.frame_pointer_register,
            max_interpreter_frame_words: config.max_interpreter_frame_words,
            stack_slot_size: config.stack_slot_size,
            interpreter_frame_sender_sp: sender_sp,
            interpreter_frame_last_sp: last_sp,
            interpreter_frame_method: method,
            interpreter_frame_mdx: mdx,
            interpreter_frame_padding: padding,
            interpreter_frame_mirror: mirror,
            interpreter_frame_cache: cache,
            interpreter_frame_locals: locals,
            interpreter_frame_bcx: bcx,
            interpreter_frame_initial_sp: initial_sp,
        };
        log::debug!("resolved frame layout: {layout:?}");
        Ok(layout)
    }

    /// Resolves the built-in layout for `arch`.
    pub fn for_architecture(arch: Architecture) -> Result<FrameLayout> {
        FrameLayout::new(LayoutConfig::for_architecture(arch)?)
    }

    /// Parses and resolves a layout from the `[layout]` table of a TOML
    /// document.
    pub fn from_toml(contents: &str) -> Result<FrameLayout> {
        let file: ConfigFile = toml::from_str(contents)?;
        FrameLayout::new(file.layout)
    }

    /// Name of this layout.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Size in bytes of a target pointer.
    #[inline]
    pub fn pointer_size(&self) -> u8 {
        self.pointer_size
    }

    /// Converts a word offset into a byte offset.
    #[inline]
    pub fn words(&self, slots: i64) -> i64 {
        slots * i64::from(self.pointer_size)
    }

    /// Address `slots` words away from `base`.
    #[inline]
    pub fn slot(&self, base: u64, slots: i64) -> u64 {
        base.wrapping_add_signed(self.words(slots))
    }

    #[inline]
    pub fn link_offset(&self) -> i64 {
        self.link_offset
    }

    #[inline]
    pub fn return_addr_offset(&self) -> i64 {
        self.return_addr_offset
    }

    #[inline]
    pub fn sender_sp_offset(&self) -> i64 {
        self.sender_sp_offset
    }

    #[inline]
    pub fn entry_frame_call_wrapper_offset(&self) -> i64 {
        self.entry_frame_call_wrapper_offset
    }

    #[inline]
    pub fn entry_frame_call_wrapper_base(&self) -> SlotBase {
        self.entry_frame_call_wrapper_base
    }

    #[inline]
    pub fn native_frame_initial_param_offset(&self) -> i64 {
        self.native_frame_initial_param_offset
    }

    /// Oop-map register number of the frame pointer register.
    #[inline]
    pub fn frame_pointer_register(&self) -> u16 {
        self.frame_pointer_register
    }

    /// Largest plausible interpreter frame, in bytes.
    #[inline]
    pub fn max_interpreter_frame_bytes(&self) -> u64 {
        self.max_interpreter_frame_words * u64::from(self.pointer_size)
    }

    #[inline]
    pub fn stack_slot_size(&self) -> u8 {
        self.stack_slot_size
    }

    // Offsets within interpreter frames, relative to fp.

    #[inline]
    pub fn interpreter_frame_sender_sp_offset(&self) -> i64 {
        self.interpreter_frame_sender_sp
    }

    #[inline]
    pub fn interpreter_frame_last_sp_offset(&self) -> i64 {
        self.interpreter_frame_last_sp
    }

    #[inline]
    pub fn interpreter_frame_method_offset(&self) -> i64 {
        self.interpreter_frame_method
    }

    #[inline]
    pub fn interpreter_frame_mdx_offset(&self) -> i64 {
        self.interpreter_frame_mdx
    }

    /// Offset of the alignment word, if this layout has one.
    #[inline]
    pub fn interpreter_frame_padding_offset(&self) -> Option<i64> {
        self.interpreter_frame_padding
    }

    #[inline]
    pub fn interpreter_frame_mirror_offset(&self) -> i64 {
        self.interpreter_frame_mirror
    }

    #[inline]
    pub fn interpreter_frame_cache_offset(&self) -> i64 {
        self.interpreter_frame_cache
    }

    #[inline]
    pub fn interpreter_frame_locals_offset(&self) -> i64 {
        self.interpreter_frame_locals
    }

    #[inline]
    pub fn interpreter_frame_bcx_offset(&self) -> i64 {
        self.interpreter_frame_bcx
    }

    #[inline]
    pub fn interpreter_frame_initial_sp_offset(&self) -> i64 {
        self.interpreter_frame_initial_sp
    }

    /// The monitor block grows down from the initial sp.
    #[inline]
    pub fn interpreter_frame_monitor_block_top_offset(&self) -> i64 {
        self.interpreter_frame_initial_sp
    }

    #[inline]
    pub fn interpreter_frame_monitor_block_bottom_offset(&self) -> i64 {
        self.interpreter_frame_initial_sp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use target_lexicon::Aarch64Architecture;

    #[test]
    fn aarch64_interpreter_offsets() {
        let layout =
            FrameLayout::for_architecture(Architecture::Aarch64(Aarch64Architecture::Aarch64))
                .unwrap();
        assert_eq!(layout.interpreter_frame_sender_sp_offset(), -1);
        assert_eq!(layout.interpreter_frame_last_sp_offset(), -2);
        assert_eq!(layout.interpreter_frame_method_offset(), -3);
        assert_eq!(layout.interpreter_frame_mdx_offset(), -4);
        assert_eq!(layout.interpreter_frame_padding_offset(), Some(-5));
        assert_eq!(layout.interpreter_frame_mirror_offset(), -6);
        assert_eq!(layout.interpreter_frame_cache_offset(), -7);
        assert_eq!(layout.interpreter_frame_locals_offset(), -8);
        assert_eq!(layout.interpreter_frame_bcx_offset(), -9);
        assert_eq!(layout.interpreter_frame_initial_sp_offset(), -10);
        assert_eq!(layout.interpreter_frame_monitor_block_top_offset(), -10);
        assert_eq!(layout.entry_frame_call_wrapper_offset(), -8);
    }

    #[test]
    fn x86_64_has_no_padding() {
        let layout = FrameLayout::for_architecture(Architecture::X86_64).unwrap();
        assert_eq!(layout.interpreter_frame_padding_offset(), None);
        assert_eq!(layout.interpreter_frame_mirror_offset(), -5);
        assert_eq!(layout.interpreter_frame_initial_sp_offset(), -9);
        assert_eq!(layout.max_interpreter_frame_bytes(), 4096 * 8);
    }

    #[test]
    fn slot_arithmetic() {
        let layout = FrameLayout::for_architecture(Architecture::X86_64).unwrap();
        assert_eq!(layout.words(-3), -24);
        assert_eq!(layout.slot(0x1000, 2), 0x1010);
        assert_eq!(layout.slot(0x1000, -1), 0xff8);
    }

    #[test]
    fn parse_toml() {
        let layout = FrameLayout::from_toml(
            r#"
            [layout]
            name = "riscv64"
            pointer-size = 8
            link-offset = -2
            return-addr-offset = -1
            sender-sp-offset = 0
            interpreter-frame-sender-sp-offset = -3
            entry-frame-call-wrapper-offset = -10
            entry-frame-call-wrapper-base = "frame-pointer"
            native-frame-initial-param-offset = 0
            frame-pointer-register = 16
            "#,
        )
        .unwrap();
        assert_eq!(layout.name(), "riscv64");
        assert_eq!(layout.link_offset(), -2);
        assert_eq!(layout.interpreter_frame_initial_sp_offset(), -11);
        assert_eq!(layout.max_interpreter_frame_bytes(), 4096 * 8);
        assert_eq!(layout.stack_slot_size(), 4);
    }

    #[test]
    fn reject_unknown_fields() {
        let err = FrameLayout::from_toml(
            r#"
            [layout]
            name = "bogus"
            pointer-size = 8
            stack-grows-up = true
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, UnwindError::Config(_)));
    }

    #[test]
    fn reject_bad_pointer_size() {
        let mut config = LayoutConfig::for_architecture(Architecture::X86_64).unwrap();
        config.pointer_size = 3;
        assert!(matches!(
            FrameLayout::new(config),
            Err(UnwindError::InvalidLayout(_))
        ));
    }
}
