//! Locations of callee-saved registers along a stack walk.

use smallvec::SmallVec;

/// Where each callee-saved register of the *current* frame was spilled.
///
/// One map is threaded through every [`sender`](crate::Unwinder::sender) call
/// of a single walk. Compiled frames record the slots their prologue saved
/// registers into, so that a root scanner looking at the next frame up can
/// find live values that only exist in those registers.
#[derive(Debug, Clone)]
pub struct RegisterMap {
    locations: SmallVec<[(u16, u64); 8]>,
    include_argument_oops: bool,
    update_map: bool,
}

impl RegisterMap {
    /// Creates an empty map. When `update_map` is false the walker does not
    /// record any locations, which is all a plain stack trace needs.
    pub fn new(update_map: bool) -> RegisterMap {
        RegisterMap {
            locations: SmallVec::new(),
            include_argument_oops: true,
            update_map,
        }
    }

    /// Whether senders should record register locations.
    pub fn update_map(&self) -> bool {
        self.update_map
    }

    pub fn include_argument_oops(&self) -> bool {
        self.include_argument_oops
    }

    pub fn set_include_argument_oops(&mut self, include: bool) {
        self.include_argument_oops = include;
    }

    /// Address `reg` was saved at, if known.
    pub fn location(&self, reg: u16) -> Option<u64> {
        self.locations
            .iter()
            .find(|(r, _)| *r == reg)
            .map(|(_, loc)| *loc)
    }

    /// Records that `reg` was saved at `loc`, replacing any earlier location.
    pub fn set_location(&mut self, reg: u16, loc: u64) {
        log::trace!("register {reg} saved at {loc:#x}");
        match self.locations.iter_mut().find(|(r, _)| *r == reg) {
            Some(entry) => entry.1 = loc,
            None => self.locations.push((reg, loc)),
        }
    }

    /// Forgets every location. No register is live across a native call
    /// boundary, so argument registers must again be treated as possibly
    /// holding roots.
    pub fn clear(&mut self) {
        self.locations.clear();
        self.include_argument_oops = true;
    }

    /// Number of registers with a known location.
    pub fn len(&self) -> usize {
        self.locations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locations.is_empty()
    }

    /// Iterates over `(register, location)` pairs.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.locations.iter().copied()
    }
}
