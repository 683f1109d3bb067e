//! TEAM_453: Fixed pool of wait records.
//!
//! Every registration a thread makes against an event lives in one record.
//! Records are carved out of a single allocation made at boot and recycled
//! through an intrusive free list, so waiting and waking never touch the
//! kernel heap.
//!
//! A registered record sits on two chains at once: the per-kind list
//! (`prev`/`next`) the wakeup path scans, and the owning thread's chain
//! (`tnext`) used to drop all of a thread's registrations at once. The chains
//! themselves are maintained by [`EventQueue`](crate::event::EventQueue);
//! this module only hands records out and takes them back. The chain heads
//! live in a [`WaiterIndex`], which is just as fixed.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::error::WaitError;
use crate::event::{EventKind, EventObject};
use crate::thread::Tid;

/// TEAM_453: Index of a record in the [`WaitPool`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitId(u32);

impl WaitId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl core::fmt::Display for WaitId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Free,
    Registered,
}

/// TEAM_453: One registration of a thread against an event.
#[derive(Debug, Clone, Copy)]
pub struct WaitRecord {
    pub(crate) tid: Tid,
    pub(crate) kind: EventKind,
    pub(crate) object: EventObject,
    /// Per-kind list links
    pub(crate) prev: Option<WaitId>,
    pub(crate) next: Option<WaitId>,
    /// Owning thread's chain
    pub(crate) tnext: Option<WaitId>,
    state: SlotState,
}

impl WaitRecord {
    const EMPTY: Self = Self {
        tid: 0,
        kind: EventKind::ClientConnect,
        object: EventObject::WILDCARD,
        prev: None,
        next: None,
        tnext: None,
        state: SlotState::Free,
    };

    pub fn tid(&self) -> Tid {
        self.tid
    }

    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn object(&self) -> EventObject {
        self.object
    }

    pub fn state(&self) -> SlotState {
        self.state
    }
}

/// TEAM_453: Boot-sized record pool with an intrusive free list.
pub struct WaitPool {
    slots: Box<[WaitRecord]>,
    free: Option<WaitId>,
    in_use: usize,
}

impl WaitPool {
    /// Allocate `capacity` records, all free.
    ///
    /// `capacity` must fit in a `u32`; [`TaskConfig::validate`] enforces that.
    ///
    /// [`TaskConfig::validate`]: crate::config::TaskConfig::validate
    pub fn new(capacity: usize) -> Self {
        let slots: Vec<WaitRecord> = (0..capacity)
            .map(|i| WaitRecord {
                // Free records chain through `next`
                next: (i + 1 < capacity).then(|| WaitId((i + 1) as u32)),
                ..WaitRecord::EMPTY
            })
            .collect();
        Self {
            slots: slots.into_boxed_slice(),
            free: (capacity > 0).then_some(WaitId(0)),
            in_use: 0,
        }
    }

    /// Take a record off the free list and fill it in. Links are cleared.
    pub fn allocate(
        &mut self,
        tid: Tid,
        kind: EventKind,
        object: EventObject,
    ) -> Result<WaitId, WaitError> {
        let id = self.free.ok_or(WaitError::PoolExhausted)?;
        let slot = &mut self.slots[id.index()];
        self.free = slot.next;
        *slot = WaitRecord {
            tid,
            kind,
            object,
            state: SlotState::Registered,
            ..WaitRecord::EMPTY
        };
        self.in_use += 1;
        Ok(id)
    }

    /// Return a record to the free list.
    ///
    /// Releasing a record that is already free corrupts both chains, so it
    /// is treated as a kernel bug.
    pub fn release(&mut self, id: WaitId) {
        let slot = &mut self.slots[id.index()];
        assert_eq!(
            slot.state,
            SlotState::Registered,
            "wait record {} released twice",
            id
        );
        *slot = WaitRecord {
            next: self.free,
            ..WaitRecord::EMPTY
        };
        self.free = Some(id);
        self.in_use -= 1;
    }

    #[inline]
    pub fn get(&self, id: WaitId) -> &WaitRecord {
        &self.slots[id.index()]
    }

    #[inline]
    pub(crate) fn get_mut(&mut self, id: WaitId) -> &mut WaitRecord {
        &mut self.slots[id.index()]
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn available(&self) -> usize {
        self.slots.len() - self.in_use
    }

    /// Registered records, in slot order.
    pub fn registered(&self) -> impl Iterator<Item = (WaitId, &WaitRecord)> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, r)| r.state == SlotState::Registered)
            .map(|(i, r)| (WaitId(i as u32), r))
    }
}

/// TEAM_468: Tid-keyed table with a fixed number of slots.
///
/// Linear probing over twice `max_entries` slots, rounded up to a power of
/// two, all allocated up front. Callers must never hold more than
/// `max_entries` keys; then at least half the slots stay empty and every
/// probe ends. Removal shifts the rest of the cluster back instead of
/// leaving tombstones, so churn never degrades the table.
pub(crate) struct WaiterIndex<V> {
    slots: Box<[Option<(Tid, V)>]>,
    mask: usize,
    len: usize,
}

impl<V: Copy + Default> WaiterIndex<V> {
    pub fn new(max_entries: usize) -> Self {
        let capacity = (max_entries.max(1) * 2).next_power_of_two();
        let mut slots = Vec::with_capacity(capacity);
        slots.resize(capacity, None);
        Self {
            slots: slots.into_boxed_slice(),
            mask: capacity - 1,
            len: 0,
        }
    }

    #[inline]
    fn home(&self, tid: Tid) -> usize {
        // Fibonacci hashing; tids are handed out sequentially
        ((tid as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15) >> 32) as usize & self.mask
    }

    fn find(&self, tid: Tid) -> Option<usize> {
        let mut i = self.home(tid);
        for _ in 0..self.slots.len() {
            match self.slots[i] {
                None => return None,
                Some((key, _)) if key == tid => return Some(i),
                Some(_) => i = (i + 1) & self.mask,
            }
        }
        None
    }

    pub fn get(&self, tid: Tid) -> Option<&V> {
        let i = self.find(tid)?;
        self.slots[i].as_ref().map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, tid: Tid) -> Option<&mut V> {
        let i = self.find(tid)?;
        self.slots[i].as_mut().map(|(_, v)| v)
    }

    pub fn contains(&self, tid: Tid) -> bool {
        self.find(tid).is_some()
    }

    /// Entry for `tid`, inserting a default value if absent.
    ///
    /// Returns `None` only if every slot is taken, which the caller's
    /// bound on live keys rules out.
    pub fn get_or_insert(&mut self, tid: Tid) -> Option<&mut V> {
        let mut i = self.home(tid);
        for _ in 0..self.slots.len() {
            match self.slots[i] {
                Some((key, _)) if key != tid => i = (i + 1) & self.mask,
                Some(_) => return self.slots[i].as_mut().map(|(_, v)| v),
                None => {
                    self.len += 1;
                    let (_, value) = self.slots[i].insert((tid, V::default()));
                    return Some(value);
                }
            }
        }
        None
    }

    pub fn remove(&mut self, tid: Tid) -> Option<V> {
        let mut hole = self.find(tid)?;
        let (_, value) = self.slots[hole].take()?;
        self.len -= 1;

        let mut i = (hole + 1) & self.mask;
        while let Some((key, _)) = self.slots[i] {
            let home = self.home(key);
            // Move back only if the hole lies on the probe path home..=i
            if (hole.wrapping_sub(home) & self.mask) < (i.wrapping_sub(home) & self.mask) {
                self.slots[hole] = self.slots[i].take();
                hole = i;
            }
            i = (i + 1) & self.mask;
        }
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_until_exhausted() {
        let mut pool = WaitPool::new(3);
        for tid in 0..3 {
            pool.allocate(tid, EventKind::User1, EventObject::WILDCARD)
                .unwrap();
        }
        assert_eq!(pool.available(), 0);
        assert_eq!(
            pool.allocate(9, EventKind::User1, EventObject::WILDCARD),
            Err(WaitError::PoolExhausted)
        );
    }

    #[test]
    fn test_release_recycles_slot() {
        let mut pool = WaitPool::new(1);
        let id = pool
            .allocate(4, EventKind::Mutex, EventObject(0x40))
            .unwrap();
        assert_eq!(pool.get(id).tid(), 4);
        assert_eq!(pool.get(id).object(), EventObject(0x40));

        pool.release(id);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.get(id).state(), SlotState::Free);

        let again = pool
            .allocate(5, EventKind::PipeFull, EventObject::WILDCARD)
            .unwrap();
        assert_eq!(again, id);
        assert_eq!(pool.get(again).kind(), EventKind::PipeFull);
        assert!(pool.get(again).next.is_none());
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn test_double_release_panics() {
        let mut pool = WaitPool::new(2);
        let id = pool
            .allocate(1, EventKind::User2, EventObject::WILDCARD)
            .unwrap();
        pool.release(id);
        pool.release(id);
    }

    #[test]
    fn test_index_insert_get_remove() {
        let mut index: WaiterIndex<u32> = WaiterIndex::new(4);
        assert_eq!(index.capacity(), 8);
        *index.get_or_insert(10).unwrap() = 1;
        *index.get_or_insert(11).unwrap() += 2;
        *index.get_or_insert(10).unwrap() += 5;
        assert_eq!(index.get(10), Some(&6));
        assert_eq!(index.get(11), Some(&2));
        assert_eq!(index.len(), 2);

        assert_eq!(index.remove(10), Some(6));
        assert_eq!(index.remove(10), None);
        assert!(!index.contains(10));
        assert_eq!(index.get(11), Some(&2));
    }

    #[test]
    fn test_index_survives_churn() {
        // Keys that share a home slot exercise the backward shift
        let mut index: WaiterIndex<usize> = WaiterIndex::new(4);
        let mut live: Vec<Tid> = (0..4).collect();
        for &tid in &live {
            *index.get_or_insert(tid).unwrap() = tid;
        }
        for next in 4..2000 {
            let gone = live.remove(0);
            assert_eq!(index.remove(gone), Some(gone));
            *index.get_or_insert(next).unwrap() = next;
            live.push(next);
            for &tid in &live {
                assert_eq!(index.get(tid), Some(&tid), "tid {tid} after adding {next}");
            }
        }
        assert_eq!(index.len(), 4);
        assert_eq!(index.capacity(), 8);
    }

    #[test]
    fn test_empty_pool() {
        let mut pool = WaitPool::new(0);
        assert_eq!(pool.capacity(), 0);
        assert!(pool
            .allocate(1, EventKind::User1, EventObject::WILDCARD)
            .is_err());
    }
}
