use alloc::boxed::Box;
use alloc::vec;

/// A circular FIFO of free entries.
///
/// The ring has one more slot than the number of entries it can hold, so
/// `read == write` always means empty and full needs no separate counter.
/// Entries are popped from the head and pushed to the tail, which makes
/// reuse least-recently-used.
pub struct FreeList {
    slots: Box<[u32]>,
    read: usize,
    write: usize,
}

impl FreeList {
    /// Creates a list holding `0..capacity`.
    pub fn new(capacity: usize) -> FreeList {
        Self::with_entries(capacity, 0..capacity as u32)
    }

    /// Creates a list with room for `capacity` entries, initially holding
    /// `entries` (at most `capacity` of them).
    pub fn with_entries(capacity: usize, entries: impl IntoIterator<Item = u32>) -> FreeList {
        let mut list = FreeList {
            slots: vec![0; capacity + 1].into_boxed_slice(),
            read: 0,
            write: 0,
        };

        for entry in entries.into_iter().take(capacity) {
            list.push(entry);
        }

        list
    }

    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    pub fn len(&self) -> usize {
        (self.write + self.slots.len() - self.read) % self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read == self.write
    }

    fn next(&self, index: usize) -> usize {
        (index + 1) % self.slots.len()
    }

    pub fn pop(&mut self) -> Option<u32> {
        if self.is_empty() {
            return None;
        }

        let entry = self.slots[self.read];
        self.read = self.next(self.read);
        Some(entry)
    }

    /// Returns `false` if the list is full.
    pub fn push(&mut self, entry: u32) -> bool {
        let next = self.next(self.write);
        if next == self.read {
            return false;
        }

        self.slots[self.write] = entry;
        self.write = next;
        true
    }

    /// Puts back an entry just popped, so that it is handed out next.
    pub fn unpop(&mut self, entry: u32) -> bool {
        let prev = (self.read + self.slots.len() - 1) % self.slots.len();
        if prev == self.write {
            return false;
        }

        self.read = prev;
        self.slots[prev] = entry;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_until_empty() {
        let mut list = FreeList::new(3);
        assert_eq!(list.capacity(), 3);
        assert_eq!(list.len(), 3);
        assert_eq!(list.pop(), Some(0));
        assert_eq!(list.pop(), Some(1));
        assert_eq!(list.pop(), Some(2));
        assert_eq!(list.pop(), None);
        assert!(list.is_empty());
    }

    #[test]
    fn test_push_goes_to_tail() {
        let mut list = FreeList::new(3);
        assert_eq!(list.pop(), Some(0));
        assert!(list.push(0));
        assert_eq!(list.pop(), Some(1));
        assert_eq!(list.pop(), Some(2));
        assert_eq!(list.pop(), Some(0));
    }

    #[test]
    fn test_push_to_full_list_fails() {
        let mut list = FreeList::new(2);
        assert!(!list.push(7));
        assert_eq!(list.pop(), Some(0));
        assert!(list.push(7));
        assert!(!list.push(8));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_unpop_restores_head() {
        let mut list = FreeList::new(2);
        let first = list.pop().unwrap();
        assert!(list.unpop(first));
        assert_eq!(list.pop(), Some(first));
        assert_eq!(list.pop(), Some(1));
    }

    #[test]
    fn test_wraps_around() {
        let mut list = FreeList::new(2);
        for round in 0..10 {
            let entry = list.pop().unwrap();
            assert!(list.push(entry), "round {}", round);
            assert_eq!(list.len(), 2);
        }
    }
}
