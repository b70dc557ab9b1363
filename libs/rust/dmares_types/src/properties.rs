use core::fmt;

use crate::bank::BankId;
use crate::error::ErrorCode;

/// Buffers must be smaller than this.
pub const MAX_BUFFER_SIZE: usize = 1024 * 1024;

/// The requested (or actual) shape of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Properties {
    /// Size in bytes, `1..MAX_BUFFER_SIZE`.
    pub size: usize,
    /// A power of two, at most the platform's maximum alignment.
    pub alignment: usize,
    pub bank: BankId,
    /// Whether software must maintain cache coherency for the buffer.
    pub cached: bool,
}

impl Properties {
    pub const fn new(size: usize, alignment: usize) -> Properties {
        Properties {
            size,
            alignment,
            bank: BankId::DEFAULT,
            cached: false,
        }
    }

    pub const fn with_bank(mut self, bank: BankId) -> Properties {
        self.bank = bank;
        self
    }

    pub const fn with_cached(mut self, cached: bool) -> Properties {
        self.cached = cached;
        self
    }
}

/// How the memory behind a record was obtained.
///
/// The tag decides how the record is released and whether cache
/// maintenance applies to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocatorTag {
    /// Allocated by this layer (`'A'`).
    Allocated,
    /// Registered, already known to the device; usually a sub-buffer of an
    /// allocated one (`'R'`).
    RegisteredDmaSafe,
    /// Registered, not usable for DMA (`'N'`).
    RegisteredUnsafe,
    /// Registered memory from the kernel allocator, mapped here (`'k'`).
    KernelMapped,
    /// Registered memory that is coherent by construction (`'C'`).
    Coherent,
    /// Owned elsewhere and attached by address (`'T'`).
    Attached,
}

impl AllocatorTag {
    pub const fn as_char(self) -> char {
        match self {
            AllocatorTag::Allocated => 'A',
            AllocatorTag::RegisteredDmaSafe => 'R',
            AllocatorTag::RegisteredUnsafe => 'N',
            AllocatorTag::KernelMapped => 'k',
            AllocatorTag::Coherent => 'C',
            AllocatorTag::Attached => 'T',
        }
    }

    /// Returns `true` if the buffer went through a coherency-aware mapping
    /// and may need cache maintenance around DMA.
    pub const fn needs_cache_maintenance(self) -> bool {
        matches!(
            self,
            AllocatorTag::Allocated | AllocatorTag::KernelMapped | AllocatorTag::RegisteredDmaSafe
        )
    }

    /// Returns `true` if the record carries a bus mapping that must be
    /// present on release.
    pub const fn is_mapped(self) -> bool {
        self.needs_cache_maintenance()
    }

    /// Returns `true` if the buffer address must honor the requested
    /// alignment.
    pub const fn requires_alignment(self) -> bool {
        !matches!(self, AllocatorTag::RegisteredUnsafe)
    }
}

impl TryFrom<char> for AllocatorTag {
    type Error = ErrorCode;

    fn try_from(value: char) -> Result<Self, Self::Error> {
        match value {
            'A' => Ok(AllocatorTag::Allocated),
            'R' => Ok(AllocatorTag::RegisteredDmaSafe),
            'N' => Ok(AllocatorTag::RegisteredUnsafe),
            'k' => Ok(AllocatorTag::KernelMapped),
            'C' => Ok(AllocatorTag::Coherent),
            'T' => Ok(AllocatorTag::Attached),
            _ => Err(ErrorCode::UnsupportedTag),
        }
    }
}

impl fmt::Display for AllocatorTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "'{}'", self.as_char())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_chars() {
        for tag in [
            AllocatorTag::Allocated,
            AllocatorTag::RegisteredDmaSafe,
            AllocatorTag::RegisteredUnsafe,
            AllocatorTag::KernelMapped,
            AllocatorTag::Coherent,
            AllocatorTag::Attached,
        ] {
            assert_eq!(AllocatorTag::try_from(tag.as_char()), Ok(tag));
        }
        assert_eq!(AllocatorTag::try_from('x'), Err(ErrorCode::UnsupportedTag));
    }

    #[test]
    fn test_cache_maintenance_tags() {
        assert!(AllocatorTag::Allocated.needs_cache_maintenance());
        assert!(AllocatorTag::KernelMapped.needs_cache_maintenance());
        assert!(AllocatorTag::RegisteredDmaSafe.needs_cache_maintenance());
        assert!(!AllocatorTag::RegisteredUnsafe.needs_cache_maintenance());
        assert!(!AllocatorTag::Coherent.needs_cache_maintenance());
        assert!(!AllocatorTag::Attached.needs_cache_maintenance());
    }
}
