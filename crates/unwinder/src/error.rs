//! Recoverable failures raised while inspecting a target stack.

use thiserror::Error;

/// A recoverable failure while resolving frames of an inspected thread.
///
/// None of these indicate a bug in the walker: the inspected process may be
/// paused at an arbitrary instruction, or be a partially written core file,
/// so any of these can legitimately happen mid-walk. Broken contracts between
/// the walker and its metadata collaborator are not reported through this
/// type; they panic.
#[derive(Debug, Error)]
pub enum UnwindError {
    /// A word at `addr` could not be read from the target.
    #[error("address {addr:#x} is not readable in the target")]
    UnmappedAddress {
        /// The address that was requested.
        addr: u64,
    },

    /// The operation needs the frame pointer but the frame does not have one.
    #[error("frame with sp {sp:#x} has no frame pointer")]
    MissingFramePointer {
        /// Stack pointer of the offending frame.
        sp: u64,
    },

    /// A sender was not further up the stack than its callee.
    #[error("sender sp {sender_sp:#x} is not above callee sp {sp:#x}")]
    NonMonotonicStack {
        /// Stack pointer of the callee.
        sp: u64,
        /// Stack pointer computed for the sender.
        sender_sp: u64,
    },

    /// No reliable starting frame could be determined for the thread.
    #[error("stack trace unavailable for this thread")]
    StackTraceUnavailable,

    /// There are no layout presets for this architecture.
    #[error("unsupported architecture: {0}")]
    UnsupportedArchitecture(target_lexicon::Architecture),

    /// A frame layout description could not be parsed.
    #[error("invalid frame layout configuration")]
    Config(#[from] toml::de::Error),

    /// A frame layout description parsed but is not self-consistent.
    #[error("invalid frame layout configuration: {0}")]
    InvalidLayout(String),
}

/// Result type used throughout this crate.
pub type Result<T, E = UnwindError> = core::result::Result<T, E>;
