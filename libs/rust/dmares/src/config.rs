//! Initialization parameters.
use alloc::vec::Vec;
use core::mem::size_of;

use dmares_types::bank::BankConfig;
use dmares_types::bank::BankKind;
use dmares_types::properties::MAX_BUFFER_SIZE;
use dmares_utils::alignment::align_for_size;
use dmares_utils::alignment::is_power_of_two;
use serde::Deserialize;

use crate::error::InitError;
use crate::record::Record;

/// The maximum number of entries in the bank table.
pub const MAX_BANKS: usize = 16;

/// Records in one chunk are indexed with 16 bits.
pub const MAX_RECORDS_PER_CHUNK: u32 = 1 << 16;

/// Chunk numbers are 16 bits, and `0xffff` is kept clear of the sentinel.
pub const MAX_CHUNKS: usize = 0xffff;

/// The allocation unit a chunk is sized to fit in by default.
const CHUNK_UNIT_BYTES: usize = 4 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// How many handles (and records) can be live at once.
    pub max_records: u32,
    pub records_per_chunk: Option<u32>,
    /// Alignment used to lay out the blocks of static banks.
    pub pool_alignment: usize,
    pub banks: Vec<BankConfig>,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            max_records: 4096,
            records_per_chunk: None,
            pool_alignment: 4,
            banks: Vec::new(),
        }
    }
}

impl Config {
    pub fn with_max_records(mut self, max_records: u32) -> Config {
        self.max_records = max_records;
        self
    }

    pub fn with_records_per_chunk(mut self, records_per_chunk: u32) -> Config {
        self.records_per_chunk = Some(records_per_chunk);
        self
    }

    pub fn with_bank(mut self, bank: BankConfig) -> Config {
        self.banks.push(bank);
        self
    }

    pub fn records_per_chunk(&self) -> u32 {
        match self.records_per_chunk {
            Some(n) => n,
            None => {
                let fit = CHUNK_UNIT_BYTES / size_of::<spin::Mutex<Record>>();
                (fit as u32).clamp(1, MAX_RECORDS_PER_CHUNK)
            }
        }
    }

    /// Distance between two blocks of a static bank.
    pub fn block_stride(&self, bank: &BankConfig) -> usize {
        align_for_size(bank.block_size, self.pool_alignment)
    }

    pub fn validate(&self) -> Result<(), InitError> {
        if self.max_records == 0 {
            return Err(InitError::NoRecords);
        }

        let per_chunk = self.records_per_chunk();
        if per_chunk == 0 || per_chunk > MAX_RECORDS_PER_CHUNK {
            return Err(InitError::ChunkTooLarge(per_chunk));
        }

        let chunks = self.max_records.div_ceil(per_chunk) as usize;
        if chunks > MAX_CHUNKS {
            return Err(InitError::TooManyChunks(chunks));
        }

        if !is_power_of_two(self.pool_alignment) {
            return Err(InitError::InvalidPoolAlignment(self.pool_alignment));
        }

        if self.banks.len() > MAX_BANKS {
            return Err(InitError::TooManyBanks(self.banks.len()));
        }

        for (i, bank) in self.banks.iter().enumerate() {
            if self.banks[..i].iter().any(|other| other.id == bank.id) {
                return Err(InitError::DuplicateBank(bank.id));
            }

            if bank.kind == BankKind::Dynamic {
                continue;
            }

            if bank.block_count == 0 || bank.block_size == 0 {
                return Err(InitError::EmptyBank(bank.id));
            }

            let total = self.block_stride(bank).saturating_mul(bank.block_count);
            if total >= MAX_BUFFER_SIZE {
                return Err(InitError::BankTooLarge(bank.id, total));
            }

            if bank.kind == BankKind::StaticFixedAddress {
                if bank.cached {
                    return Err(InitError::CachedFixedBank(bank.id));
                }

                if bank.fixed_addr.is_none() {
                    return Err(InitError::MissingFixedAddress(bank.id));
                }
            }
        }

        Ok(())
    }
}
