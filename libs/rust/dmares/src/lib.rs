//! DMA resource management.
//!
//! Buffers shared between the CPU and a DMA-capable device are referred to
//! by [`Handle`]s. A handle resolves to a record that describes the buffer
//! in up to three address domains, remembers how its memory was obtained,
//! and turns invalid for good once the buffer is released.
//!
//! Buffers either come from the generic path (memory from the
//! [`Platform`], or registered by the caller), or from a static bank: a pool
//! of same-sized blocks set up once at initialization.
#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

mod access;
mod bank;
mod buffer;
mod coherency;
pub mod config;
pub mod error;
mod freelist;
pub mod platform;
pub mod record;
mod resource;
pub mod store;
#[cfg(test)]
mod testing;
mod translate;

pub use bank::Bank;
pub use config::Config;
pub use dmares_types::address::BusAddr;
pub use dmares_types::address::HostAddr;
pub use dmares_types::address::PAddr;
pub use dmares_types::bank::BankConfig;
pub use dmares_types::bank::BankId;
pub use dmares_types::bank::BankKind;
pub use dmares_types::domain::AddressPair;
pub use dmares_types::domain::Domain;
pub use dmares_types::error::ErrorCode;
pub use dmares_types::handle::Handle;
pub use dmares_types::properties::AllocatorTag;
pub use dmares_types::properties::Properties;
pub use error::InitError;
pub use platform::HeapPlatform;
pub use platform::Platform;
pub use resource::DmaResource;
