use dmares_types::bank::BankId;
use dmares_types::error::ErrorCode;
use thiserror::Error;

use crate::config::MAX_BANKS;
use crate::config::MAX_RECORDS_PER_CHUNK;

/// A configuration error. Fatal: [`crate::DmaResource`] is not created.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("record capacity must be non-zero")]
    NoRecords,
    #[error("{0} records per chunk (must be 1..={max})", max = MAX_RECORDS_PER_CHUNK)]
    ChunkTooLarge(u32),
    #[error("{0} chunks do not fit in a record index")]
    TooManyChunks(usize),
    #[error("pool alignment {0} is not a power of two")]
    InvalidPoolAlignment(usize),
    #[error("{0} banks configured (max {max})", max = MAX_BANKS)]
    TooManyBanks(usize),
    #[error("bank {0} is configured twice")]
    DuplicateBank(BankId),
    #[error("bank {0} has no blocks")]
    EmptyBank(BankId),
    #[error("bank {0} needs {1} bytes, more than a single buffer can hold")]
    BankTooLarge(BankId, usize),
    #[error("fixed-address bank {0} cannot be cached")]
    CachedFixedBank(BankId),
    #[error("fixed-address bank {0} has no address")]
    MissingFixedAddress(BankId),
    #[error("failed to set up the pool of bank {bank}: {source}")]
    Pool {
        bank: BankId,
        #[source]
        source: ErrorCode,
    },
}
