//! AArch64 frame layout of the inspected runtime.

use crate::layout::{LayoutConfig, SlotBase};

// r29 is the frame pointer; oop maps number registers in 32-bit halves.
const R29: u16 = 29 * 2;

pub fn layout_config() -> LayoutConfig {
    LayoutConfig {
        name: "aarch64".to_string(),
        pointer_size: 8,
        // stp x29, x30, [sp, #-16]! ; mov x29, sp
        link_offset: 0,
        return_addr_offset: 1,
        sender_sp_offset: 2,
        interpreter_frame_sender_sp_offset: -1,
        // The interpreter keeps sp 16-byte aligned with a padding word after
        // the mdx slot.
        interpreter_frame_padding: true,
        entry_frame_call_wrapper_offset: -8,
        entry_frame_call_wrapper_base: SlotBase::FramePointer,
        native_frame_initial_param_offset: 2,
        frame_pointer_register: R29,
        max_interpreter_frame_words: 4096,
        stack_slot_size: 4,
    }
}
