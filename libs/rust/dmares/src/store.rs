//! Handle-to-record mapping.
//!
//! Records live in independently allocated chunks, so a large capacity does
//! not need one giant allocation. A record is addressed by a *record index*,
//! `chunk << 16 | index-within-chunk`. Handles name a slot in a separate
//! table; each slot word holds the slot's current generation and the record
//! index it points to, or [`RECORD_INDEX_NONE`] once destroyed.
//!
//! A slot whose generation reaches `u32::MAX` is retired instead of being
//! reused, so a generation never wraps and a stale handle never resolves
//! again.
use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::AtomicU64;
use core::sync::atomic::Ordering;

use dmares_types::error::ErrorCode;
use dmares_types::handle::Handle;
use spin::Mutex;

use crate::config::Config;
use crate::error::InitError;
use crate::freelist::FreeList;
use crate::record::Record;

pub const RECORD_INDEX_NONE: u32 = 0xffff_ffff;

const CHUNK_SHIFT: u32 = 16;
const INDEX_MASK: u32 = (1 << CHUNK_SHIFT) - 1;

fn pack(generation: u32, index: u32) -> u64 {
    ((generation as u64) << 32) | index as u64
}

fn unpack(word: u64) -> (u32, u32) {
    ((word >> 32) as u32, word as u32)
}

struct FreeLists {
    handles: FreeList,
    records: FreeList,
    /// Handle slots taken out of circulation.
    retired: usize,
}

pub struct RecordStore {
    chunks: Vec<Box<[Mutex<Record>]>>,
    slots: Box<[AtomicU64]>,
    free: Mutex<FreeLists>,
}

impl RecordStore {
    pub fn new(config: &Config) -> Result<RecordStore, InitError> {
        config.validate()?;

        let max_records = config.max_records as usize;
        let per_chunk = config.records_per_chunk() as usize;

        let mut chunks = Vec::with_capacity(max_records.div_ceil(per_chunk));
        let mut remaining = max_records;
        while remaining > 0 {
            let n = remaining.min(per_chunk);
            let chunk: Box<[Mutex<Record>]> = (0..n).map(|_| Mutex::new(Record::empty())).collect();
            chunks.push(chunk);
            remaining -= n;
        }

        let indices = chunks.iter().enumerate().flat_map(|(chunk, records)| {
            (0..records.len() as u32).map(move |i| ((chunk as u32) << CHUNK_SHIFT) | i)
        });

        let free = FreeLists {
            handles: FreeList::new(max_records),
            records: FreeList::with_entries(max_records, indices),
            retired: 0,
        };

        let slots = (0..max_records)
            .map(|_| AtomicU64::new(pack(0, RECORD_INDEX_NONE)))
            .collect();

        log::debug!(
            "record store: {} records in {} chunks",
            max_records,
            chunks.len()
        );

        Ok(RecordStore {
            chunks,
            slots,
            free: Mutex::new(free),
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn num_chunks(&self) -> usize {
        self.chunks.len()
    }

    fn record(&self, index: u32) -> Option<&Mutex<Record>> {
        if index == RECORD_INDEX_NONE {
            return None;
        }

        let chunk = self.chunks.get((index >> CHUNK_SHIFT) as usize)?;
        chunk.get((index & INDEX_MASK) as usize)
    }

    /// Allocates a fresh, empty record and returns its handle.
    pub fn create_record(&self) -> Result<Handle, ErrorCode> {
        let (slot, index) = {
            let mut free = self.free.lock();
            let slot = free.handles.pop().ok_or(ErrorCode::OutOfHandles)?;
            match free.records.pop() {
                Some(index) => (slot, index),
                None => {
                    free.handles.unpop(slot);
                    return Err(ErrorCode::OutOfHandles);
                }
            }
        };

        let word = &self.slots[slot as usize];
        let (generation, _) = unpack(word.load(Ordering::Acquire));
        let handle = Handle::new(slot, generation.wrapping_add(1));

        match self.record(index) {
            Some(record) => record.lock().reset(handle),
            None => {
                log::error!("record index {:#x} is out of range", index);
                let mut free = self.free.lock();
                if !free.handles.unpop(slot) {
                    log::error!("handle free list overflowed returning slot {}", slot);
                }
                if !free.records.push(index) {
                    log::error!("record free list overflowed returning {:#x}", index);
                }
                return Err(ErrorCode::OutOfHandles);
            }
        }

        // Publish the handle only once the record is initialized.
        word.store(pack(handle.generation(), index), Ordering::Release);
        log::trace!("created {} -> record {:#x}", handle, index);
        Ok(handle)
    }

    /// Invalidates `handle` and returns its slot and record to the free
    /// lists. Returns the record as it was just before destruction.
    pub fn destroy_record(&self, handle: Handle) -> Result<Record, ErrorCode> {
        let word = self
            .slots
            .get(handle.slot() as usize)
            .ok_or(ErrorCode::InvalidHandle)?;

        let current = word.load(Ordering::Acquire);
        let (generation, index) = unpack(current);
        if generation != handle.generation() {
            return Err(ErrorCode::InvalidHandle);
        }

        let last = {
            let mut record = self.record(index).ok_or(ErrorCode::InvalidHandle)?.lock();
            if !record.is_live() || record.owner() != Some(handle) {
                return Err(ErrorCode::InvalidHandle);
            }

            let last = record.clone();
            record.magic = 0;
            record.owner = None;
            last
        };

        // Only the thread that cleared the magic gets here.
        if word
            .compare_exchange(
                current,
                pack(generation, RECORD_INDEX_NONE),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            log::error!("{} changed while being destroyed", handle);
            return Err(ErrorCode::InvalidHandle);
        }

        let mut free = self.free.lock();
        if generation == u32::MAX {
            log::warn!("retiring handle slot {}: generations exhausted", handle.slot());
            free.retired += 1;
        } else if !free.handles.push(handle.slot()) {
            log::error!("handle free list overflowed returning slot {}", handle.slot());
        }

        if !free.records.push(index) {
            log::error!("record free list overflowed returning {:#x}", index);
        }

        log::trace!("destroyed {}", handle);
        Ok(last)
    }

    /// Returns `true` if `handle` currently names a record.
    pub fn is_valid_handle(&self, handle: Handle) -> bool {
        match self.slots.get(handle.slot() as usize) {
            Some(word) => {
                let (generation, index) = unpack(word.load(Ordering::Acquire));
                generation == handle.generation() && index != RECORD_INDEX_NONE
            }
            None => false,
        }
    }

    /// Runs `f` on the record behind `handle`, with the record locked.
    ///
    /// `f` must not call back into the store for the same handle.
    pub(crate) fn with_record<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut Record) -> R,
    ) -> Result<R, ErrorCode> {
        let word = self
            .slots
            .get(handle.slot() as usize)
            .ok_or(ErrorCode::InvalidHandle)?;

        let (generation, index) = unpack(word.load(Ordering::Acquire));
        if generation != handle.generation() {
            return Err(ErrorCode::InvalidHandle);
        }

        let mut record = self.record(index).ok_or(ErrorCode::InvalidHandle)?.lock();
        if !record.is_live() || record.owner() != Some(handle) {
            return Err(ErrorCode::InvalidHandle);
        }

        Ok(f(&mut record))
    }

    /// Returns a snapshot of the record behind `handle`.
    pub fn get(&self, handle: Handle) -> Result<Record, ErrorCode> {
        self.with_record(handle, |record| record.clone())
    }

    /// Iterates over the handles live at the time each slot is visited.
    pub fn in_use(&self) -> impl Iterator<Item = Handle> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, word)| {
            let (generation, index) = unpack(word.load(Ordering::Acquire));
            if index == RECORD_INDEX_NONE {
                None
            } else {
                Some(Handle::new(slot as u32, generation))
            }
        })
    }

    pub fn num_in_use(&self) -> usize {
        let free = self.free.lock();
        self.capacity() - free.handles.len() - free.retired
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::thread;
    use std::vec::Vec;

    use super::*;

    fn store(max_records: u32, per_chunk: u32) -> RecordStore {
        let config = Config::default()
            .with_max_records(max_records)
            .with_records_per_chunk(per_chunk);
        RecordStore::new(&config).unwrap()
    }

    #[test]
    fn test_records_span_chunks() {
        let store = store(10, 4);
        assert_eq!(store.num_chunks(), 3);

        let handles: Vec<_> = (0..10).map(|_| store.create_record().unwrap()).collect();
        for (i, handle) in handles.iter().enumerate() {
            store
                .with_record(*handle, |record| record.buffer_size = i)
                .unwrap();
        }
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(store.get(*handle).unwrap().buffer_size, i);
        }
    }

    #[test]
    fn test_exhaustion_and_recovery() {
        let store = store(4, 2);
        let handles: Vec<_> = (0..4).map(|_| store.create_record().unwrap()).collect();
        assert_eq!(store.create_record(), Err(ErrorCode::OutOfHandles));
        assert_eq!(store.num_in_use(), 4);

        store.destroy_record(handles[1]).unwrap();
        store.destroy_record(handles[3]).unwrap();
        assert!(store.create_record().is_ok());
        assert!(store.create_record().is_ok());
        assert_eq!(store.create_record(), Err(ErrorCode::OutOfHandles));
    }

    #[test]
    fn test_destroyed_handle_never_resurrects() {
        let store = store(2, 2);
        let stale = store.create_record().unwrap();
        store.destroy_record(stale).unwrap();
        assert!(!store.is_valid_handle(stale));

        for _ in 0..10 {
            let a = store.create_record().unwrap();
            let b = store.create_record().unwrap();
            assert!(!store.is_valid_handle(stale));
            assert_eq!(store.get(stale).err(), Some(ErrorCode::InvalidHandle));
            store.destroy_record(a).unwrap();
            store.destroy_record(b).unwrap();
        }

        assert_eq!(store.destroy_record(stale).err(), Some(ErrorCode::InvalidHandle));
    }

    #[test]
    fn test_forged_handles_are_rejected() {
        let store = store(2, 2);
        let handle = store.create_record().unwrap();
        assert!(!store.is_valid_handle(Handle::new(1000, 1)));
        assert!(!store.is_valid_handle(Handle::new(handle.slot(), handle.generation() + 1)));
        assert!(!store.is_valid_handle(Handle::new(1, 0)));
        assert_eq!(
            store.destroy_record(Handle::new(1000, 1)).err(),
            Some(ErrorCode::InvalidHandle)
        );
    }

    #[test]
    fn test_new_record_is_empty() {
        let store = store(1, 1);
        let handle = store.create_record().unwrap();
        store
            .with_record(handle, |record| {
                record.buffer_size = 99;
                record.swap_endianness = true;
            })
            .unwrap();
        store.destroy_record(handle).unwrap();

        let handle = store.create_record().unwrap();
        let record = store.get(handle).unwrap();
        assert_eq!(record.buffer_size, 0);
        assert!(!record.swap_endianness);
        assert_eq!(record.owner(), Some(handle));
    }

    #[test]
    fn test_in_use_lists_live_handles() {
        let store = store(8, 8);
        let a = store.create_record().unwrap();
        let b = store.create_record().unwrap();
        let c = store.create_record().unwrap();
        store.destroy_record(b).unwrap();

        let live: HashSet<_> = store.in_use().collect();
        assert_eq!(live, HashSet::from([a, c]));
    }

    #[test]
    fn test_bad_record_index_returns_entries() {
        let store = store(2, 2);
        {
            let mut free = store.free.lock();
            assert_eq!(free.records.pop(), Some(0));
            assert_eq!(free.records.pop(), Some(1));
            assert!(free.records.push(0x00ff_0000));
            assert!(free.records.push(0));
        }

        assert_eq!(store.create_record(), Err(ErrorCode::OutOfHandles));
        assert_eq!(store.num_in_use(), 0);

        let handle = store.create_record().unwrap();
        assert_eq!(handle.slot(), 0);
        assert!(store.is_valid_handle(handle));
        assert_eq!(store.num_in_use(), 1);
    }

    #[test]
    fn test_exhausted_generation_retires_slot() {
        let store = store(2, 2);
        store.slots[0].store(pack(u32::MAX - 1, RECORD_INDEX_NONE), Ordering::Release);

        let last = store.create_record().unwrap();
        assert_eq!(last.slot(), 0);
        assert_eq!(last.generation(), u32::MAX);
        store.destroy_record(last).unwrap();
        assert_eq!(store.num_in_use(), 0);

        let other = store.create_record().unwrap();
        assert_eq!(other.slot(), 1);
        assert_eq!(store.create_record(), Err(ErrorCode::OutOfHandles));
        assert!(!store.is_valid_handle(last));
        assert_eq!(store.get(last).err(), Some(ErrorCode::InvalidHandle));
    }

    #[test]
    fn test_concurrent_create_destroy() {
        let store = store(64, 16);
        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    for _ in 0..500 {
                        let handle = store.create_record().unwrap();
                        assert!(store.is_valid_handle(handle));
                        store.destroy_record(handle).unwrap();
                        assert!(!store.is_valid_handle(handle));
                    }
                });
            }
        });
        assert_eq!(store.num_in_use(), 0);
        assert_eq!(store.in_use().count(), 0);
    }

    #[test]
    fn test_concurrent_double_destroy_succeeds_once() {
        let store = store(4, 4);
        for _ in 0..100 {
            let handle = store.create_record().unwrap();
            let results: Vec<_> = thread::scope(|s| {
                let a = s.spawn(|| store.destroy_record(handle).map(|_| ()));
                let b = s.spawn(|| store.destroy_record(handle).map(|_| ()));
                [a.join().unwrap(), b.join().unwrap()].to_vec()
            });
            assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        }
        assert_eq!(store.num_in_use(), 0);
    }
}
