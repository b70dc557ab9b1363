use core::fmt;

/// An opaque capability for one DMA resource record.
///
/// A handle names a slot in the record store together with the generation
/// the slot had when the handle was issued. Once the record is destroyed the
/// slot's generation moves on, so the handle never resolves again, even after
/// the slot has been handed out to a new record.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Handle {
    slot: u32,
    generation: u32,
}

impl Handle {
    pub const fn new(slot: u32, generation: u32) -> Handle {
        Handle { slot, generation }
    }

    /// Rebuilds a handle from the value returned by [`Handle::as_raw`].
    pub const fn from_raw(raw: u64) -> Handle {
        Handle {
            slot: raw as u32,
            generation: (raw >> 32) as u32,
        }
    }

    pub const fn as_raw(&self) -> u64 {
        ((self.generation as u64) << 32) | self.slot as u64
    }

    pub const fn slot(&self) -> u32 {
        self.slot
    }

    pub const fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({}#{})", self.slot, self.generation)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_round_trip_keeps_generation() {
        let handle = Handle::new(7, 3);
        let raw = handle.as_raw();
        assert_eq!(raw, (3 << 32) | 7);
        assert_eq!(Handle::from_raw(raw), handle);
        assert_ne!(Handle::from_raw(raw), Handle::new(7, 4));
    }
}
