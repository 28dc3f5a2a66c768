//! x86-64 frame layout of the inspected runtime.

use crate::layout::{LayoutConfig, SlotBase};

// Oop maps number registers in 32-bit halves, so each general purpose
// register occupies two consecutive numbers.
const RBP: u16 = 5 * 2;

// The call pushes the return address, then the prologue pushes rbp and
// points rbp at it: the saved rbp is at fp+0 and the return address at fp+1.
const LINK_OFFSET: i64 = 0;
const RETURN_ADDR_OFFSET: i64 = 1;

// SP of caller is FP in callee plus size of FP/return address pair.
const SENDER_SP_OFFSET: i64 = 2;

pub fn layout_config() -> LayoutConfig {
    LayoutConfig {
        name: "x86_64".to_string(),
        pointer_size: 8,
        link_offset: LINK_OFFSET,
        return_addr_offset: RETURN_ADDR_OFFSET,
        sender_sp_offset: SENDER_SP_OFFSET,
        interpreter_frame_sender_sp_offset: -1,
        interpreter_frame_padding: false,
        entry_frame_call_wrapper_offset: -6,
        entry_frame_call_wrapper_base: SlotBase::FramePointer,
        native_frame_initial_param_offset: 2,
        frame_pointer_register: RBP,
        max_interpreter_frame_words: 4096,
        stack_slot_size: 4,
    }
}
