//! Static description of memory banks.
use core::fmt;

use serde::Deserialize;

/// Identifies a configured bank.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(transparent)]
pub struct BankId(pub u8);

impl BankId {
    pub const DEFAULT: BankId = BankId(0);
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BankKind {
    /// Not pooled. Requests go straight to the generic allocator.
    Dynamic,
    /// Pool memory obtained from the platform allocator at init.
    Static,
    /// Pool memory mapped from a fixed physical address at init.
    StaticFixedAddress,
}

impl BankKind {
    pub const fn is_static(self) -> bool {
        !matches!(self, BankKind::Dynamic)
    }
}

/// One entry of the bank table supplied at initialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct BankConfig {
    pub id: BankId,
    pub kind: BankKind,
    /// Shared between concurrently running applications.
    #[serde(default)]
    pub apps_shared: bool,
    #[serde(default)]
    pub cached: bool,
    /// Physical address of a [`BankKind::StaticFixedAddress`] bank.
    #[serde(default)]
    pub fixed_addr: Option<usize>,
    #[serde(default)]
    pub block_count: usize,
    #[serde(default)]
    pub block_size: usize,
}

impl BankConfig {
    pub const fn dynamic(id: BankId) -> BankConfig {
        BankConfig {
            id,
            kind: BankKind::Dynamic,
            apps_shared: false,
            cached: false,
            fixed_addr: None,
            block_count: 0,
            block_size: 0,
        }
    }

    pub const fn pool(id: BankId, block_count: usize, block_size: usize) -> BankConfig {
        BankConfig {
            id,
            kind: BankKind::Static,
            apps_shared: false,
            cached: false,
            fixed_addr: None,
            block_count,
            block_size,
        }
    }

    pub const fn fixed(
        id: BankId,
        addr: usize,
        block_count: usize,
        block_size: usize,
    ) -> BankConfig {
        BankConfig {
            id,
            kind: BankKind::StaticFixedAddress,
            apps_shared: false,
            cached: false,
            fixed_addr: Some(addr),
            block_count,
            block_size,
        }
    }

    pub const fn with_cached(mut self, cached: bool) -> BankConfig {
        self.cached = cached;
        self
    }

    /// Size of the all-of-bank buffer, in bytes.
    pub const fn whole_bank_size(&self) -> Option<usize> {
        self.block_count.checked_mul(self.block_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_bank_table() {
        let json = r#"[
            { "id": 0, "kind": "dynamic" },
            { "id": 1, "kind": "static", "cached": true, "block_count": 4, "block_size": 64 },
            { "id": 2, "kind": "static_fixed_address", "fixed_addr": 1048576,
              "block_count": 2, "block_size": 4096 }
        ]"#;

        let banks: [BankConfig; 3] = serde_json::from_str(json).unwrap();
        assert_eq!(banks[0], BankConfig::dynamic(BankId(0)));
        assert_eq!(banks[1], BankConfig::pool(BankId(1), 4, 64).with_cached(true));
        assert_eq!(banks[2], BankConfig::fixed(BankId(2), 0x100000, 2, 4096));
        assert_eq!(banks[1].whole_bank_size(), Some(256));
    }
}
