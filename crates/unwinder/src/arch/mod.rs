//! Architecture-specific frame layout presets.
//!
//! Each supported architecture has its own file in this folder providing the
//! same set of definitions: the [`LayoutConfig`] describing how the inspected
//! runtime lays out its frames, and the register numbering used by that
//! runtime's oop maps. The right preset is picked once, from the declared
//! architecture of the target, rather than from the host this crate runs on.

use crate::error::{Result, UnwindError};
use crate::layout::LayoutConfig;
use target_lexicon::Architecture;

mod aarch64;
mod x86;

/// Returns the built-in layout description for `arch`.
pub fn layout_config(arch: Architecture) -> Result<LayoutConfig> {
    match arch {
        Architecture::X86_64 => Ok(x86::layout_config()),
        Architecture::Aarch64(_) => Ok(aarch64::layout_config()),
        other => Err(UnwindError::UnsupportedArchitecture(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use target_lexicon::Aarch64Architecture;

    #[test]
    fn known_architectures() {
        let cfg = layout_config(Architecture::X86_64).unwrap();
        assert_eq!(cfg.pointer_size, 8);
        let cfg = layout_config(Architecture::Aarch64(Aarch64Architecture::Aarch64)).unwrap();
        assert!(cfg.interpreter_frame_padding);
    }

    #[test]
    fn unknown_architecture() {
        assert!(matches!(
            layout_config(Architecture::S390x),
            Err(UnwindError::UnsupportedArchitecture(Architecture::S390x))
        ));
    }
}
