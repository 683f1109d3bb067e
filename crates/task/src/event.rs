//! TEAM_454: Event-wait queue.
//!
//! Threads register interest in `(kind, object)` pairs and block; producers
//! wake every thread waiting on a kind, optionally narrowed to one object.
//! A woken thread loses all of its registrations at once, so it is never
//! woken twice by the same wakeup and never lingers on other lists.
//!
//! All queue state sits behind one [`SpinLock`]. Records come from the
//! boot-sized [`WaitPool`]; nothing here allocates after construction.
//!
//! Behaviors:
//! - [E1] registration failure leaves the thread unblocked and unregistered
//! - [E2] wait_many/wait_objects unwind only the records of the failing call
//! - [E3] a wakeup unblocks each matching thread exactly once
//! - [E4] a wildcard registration matches any object of its kind
//! - [E5] remove_thread is idempotent

use alloc::sync::Arc;
use alloc::vec::Vec;

use bitflags::bitflags;
use crate::config::MAX_WAKEUPS;
use crate::error::WaitError;
use crate::process::Pid;
use crate::services::Scheduler;
use crate::sync::SpinLock;
use crate::thread::Tid;
use crate::wait_pool::{WaitId, WaitPool, WaiterIndex};

/// TEAM_454: Event kinds a thread can wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventKind {
    ClientConnect = 0,
    ReceivedMsg = 1,
    DataReadable = 2,
    Mutex = 3,
    PipeFull = 4,
    PipeEmpty = 5,
    UnlockShared = 6,
    UnlockExclusive = 7,
    RequestFree = 8,
    User1 = 9,
    User2 = 10,
    SwapJob = 11,
    SwapWork = 12,
    SwapFree = 13,
    VmmDone = 14,
    ThreadDied = 15,
    ChildDied = 16,
    Termination = 17,
}

impl EventKind {
    pub const COUNT: usize = 18;

    pub const ALL: [EventKind; Self::COUNT] = [
        Self::ClientConnect,
        Self::ReceivedMsg,
        Self::DataReadable,
        Self::Mutex,
        Self::PipeFull,
        Self::PipeEmpty,
        Self::UnlockShared,
        Self::UnlockExclusive,
        Self::RequestFree,
        Self::User1,
        Self::User2,
        Self::SwapJob,
        Self::SwapWork,
        Self::SwapFree,
        Self::VmmDone,
        Self::ThreadDied,
        Self::ChildDied,
        Self::Termination,
    ];

    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    #[inline]
    pub const fn mask(self) -> EventMask {
        EventMask::from_bits_retain(1 << self as u32)
    }

    /// Name used in dumps.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ClientConnect => "CLIENT",
            Self::ReceivedMsg => "RECEIVED_MSG",
            Self::DataReadable => "DATA_READABLE",
            Self::Mutex => "MUTEX",
            Self::PipeFull => "PIPE_FULL",
            Self::PipeEmpty => "PIPE_EMPTY",
            Self::UnlockShared => "UNLOCK_SH",
            Self::UnlockExclusive => "UNLOCK_EX",
            Self::RequestFree => "REQ_FREE",
            Self::User1 => "USER1",
            Self::User2 => "USER2",
            Self::SwapJob => "SWAP_JOB",
            Self::SwapWork => "SWAP_WORK",
            Self::SwapFree => "SWAP_FREE",
            Self::VmmDone => "VMM_DONE",
            Self::ThreadDied => "THREAD_DIED",
            Self::ChildDied => "CHILD_DIED",
            Self::Termination => "TERMINATION",
        }
    }
}

bitflags! {
    /// TEAM_454: Set of event kinds, one bit per [`EventKind`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventMask: u32 {
        const CLIENT = 1 << 0;
        const RECEIVED_MSG = 1 << 1;
        const DATA_READABLE = 1 << 2;
        const MUTEX = 1 << 3;
        const PIPE_FULL = 1 << 4;
        const PIPE_EMPTY = 1 << 5;
        const UNLOCK_SH = 1 << 6;
        const UNLOCK_EX = 1 << 7;
        const REQ_FREE = 1 << 8;
        const USER1 = 1 << 9;
        const USER2 = 1 << 10;
        const SWAP_JOB = 1 << 11;
        const SWAP_WORK = 1 << 12;
        const SWAP_FREE = 1 << 13;
        const VMM_DONE = 1 << 14;
        const THREAD_DIED = 1 << 15;
        const CHILD_DIED = 1 << 16;
        const TERMINATION = 1 << 17;
    }
}

impl EventMask {
    /// Kinds contained in this mask, in kind order.
    pub fn kinds(self) -> impl Iterator<Item = EventKind> {
        EventKind::ALL
            .into_iter()
            .filter(move |k| self.contains(k.mask()))
    }
}

/// TEAM_454: Opaque identity of the thing being waited on.
///
/// Producers and waiters only need to agree on the value; `0` is the
/// wildcard and matches every object of a kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventObject(pub usize);

impl EventObject {
    pub const WILDCARD: Self = Self(0);

    const PROCESS_TAG: usize = 1 << (usize::BITS - 1);
    const CHILDREN_TAG: usize = 1 << (usize::BITS - 2);

    /// Object standing for a process. Never the wildcard, even for pid 0.
    pub const fn process(pid: Pid) -> Self {
        Self(Self::PROCESS_TAG | pid)
    }

    /// Object standing for "any child of `pid`". Distinct from
    /// [`process`](Self::process) of every pid.
    pub const fn children(pid: Pid) -> Self {
        Self(Self::CHILDREN_TAG | pid)
    }

    pub const fn is_wildcard(self) -> bool {
        self.0 == 0
    }

    /// [E4] Whether a registration on `self` is satisfied by a wakeup on `object`.
    pub fn accepts(self, object: EventObject) -> bool {
        self.is_wildcard() || self == object
    }
}

/// TEAM_454: One entry of a [`EventQueue::wait_objects`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitObject {
    pub events: EventMask,
    pub object: EventObject,
}

#[derive(Debug, Clone, Copy, Default)]
struct WaitList {
    head: Option<WaitId>,
    tail: Option<WaitId>,
}

/// Head/tail of a thread's registration chain plus the union of its kinds.
#[derive(Debug, Clone, Copy, Default)]
struct ThreadWaits {
    head: Option<WaitId>,
    tail: Option<WaitId>,
    events: EventMask,
}

struct EventState {
    pool: WaitPool,
    lists: [WaitList; EventKind::COUNT],
    /// One entry per thread with at least one record, so never more
    /// entries than the pool has records
    threads: WaiterIndex<ThreadWaits>,
}

impl EventState {
    /// Register one record and link it at the tail of both chains.
    fn register(
        &mut self,
        tid: Tid,
        kind: EventKind,
        object: EventObject,
    ) -> Result<WaitId, WaitError> {
        let id = self.pool.allocate(tid, kind, object)?;

        let list = &mut self.lists[kind.index()];
        self.pool.get_mut(id).prev = list.tail;
        match list.tail {
            Some(tail) => self.pool.get_mut(tail).next = Some(id),
            None => list.head = Some(id),
        }
        list.tail = Some(id);

        let Some(waits) = self.threads.get_or_insert(tid) else {
            self.unlink(id);
            return Err(WaitError::PoolExhausted);
        };
        match waits.tail {
            Some(tail) => self.pool.get_mut(tail).tnext = Some(id),
            None => waits.head = Some(id),
        }
        waits.tail = Some(id);
        waits.events |= kind.mask();
        Ok(id)
    }

    /// Unlink a record from its kind list and free it. The thread chain is
    /// left to the caller.
    fn unlink(&mut self, id: WaitId) {
        let rec = *self.pool.get(id);
        let list = &mut self.lists[rec.kind.index()];
        match rec.prev {
            Some(prev) => self.pool.get_mut(prev).next = rec.next,
            None => list.head = rec.next,
        }
        match rec.next {
            Some(next) => self.pool.get_mut(next).prev = rec.prev,
            None => list.tail = rec.prev,
        }
        self.pool.release(id);
    }

    /// [E5] Drop every registration of `tid`. Returns how many were dropped.
    fn remove_thread(&mut self, tid: Tid) -> usize {
        let Some(waits) = self.threads.remove(tid) else {
            return 0;
        };
        let mut removed = 0;
        let mut cur = waits.head;
        while let Some(id) = cur {
            cur = self.pool.get(id).tnext;
            self.unlink(id);
            removed += 1;
        }
        removed
    }

    /// [E2] Drop the records `tid` registered after `keep_tail`.
    fn truncate_thread(&mut self, tid: Tid, keep_tail: Option<WaitId>) {
        let Some(keep) = keep_tail else {
            self.remove_thread(tid);
            return;
        };
        let mut cur = self.pool.get(keep).tnext;
        while let Some(id) = cur {
            cur = self.pool.get(id).tnext;
            self.unlink(id);
        }
        self.pool.get_mut(keep).tnext = None;

        let head = self.threads.get(tid).and_then(|w| w.head);
        let events = self.chain_events(head);
        if let Some(waits) = self.threads.get_mut(tid) {
            waits.tail = Some(keep);
            waits.events = events;
        }
    }

    fn chain_events(&self, head: Option<WaitId>) -> EventMask {
        let mut events = EventMask::empty();
        let mut cur = head;
        while let Some(id) = cur {
            let rec = self.pool.get(id);
            events |= rec.kind.mask();
            cur = rec.tnext;
        }
        events
    }

    fn chain_len(&self, tid: Tid) -> usize {
        let mut len = 0;
        let mut cur = self.threads.get(tid).and_then(|w| w.head);
        while let Some(id) = cur {
            len += 1;
            cur = self.pool.get(id).tnext;
        }
        len
    }
}

/// TEAM_454: The system-wide event-wait queue.
pub struct EventQueue {
    state: SpinLock<EventState>,
    scheduler: Arc<dyn Scheduler>,
}

impl EventQueue {
    /// Build a queue with `pool_size` wait records.
    pub fn new(pool_size: usize, scheduler: Arc<dyn Scheduler>) -> Self {
        Self {
            state: SpinLock::new(EventState {
                pool: WaitPool::new(pool_size),
                lists: [WaitList::default(); EventKind::COUNT],
                threads: WaiterIndex::new(pool_size),
            }),
            scheduler,
        }
    }

    pub fn block(&self, tid: Tid) {
        self.scheduler.block(tid);
    }

    /// Drop every registration of `tid`, then make it runnable.
    pub fn unblock(&self, tid: Tid) {
        self.remove_thread(tid);
        self.scheduler.unblock(tid);
    }

    /// Like [`unblock`](Self::unblock) but asks the scheduler to run `tid` soon.
    pub fn unblock_quick(&self, tid: Tid) {
        self.remove_thread(tid);
        self.scheduler.unblock_quick(tid);
    }

    pub fn suspend(&self, tid: Tid) {
        self.scheduler.suspend(tid);
    }

    pub fn unsuspend(&self, tid: Tid) {
        self.scheduler.unsuspend(tid);
    }

    /// Register `tid` for one event and block it.
    ///
    /// [E1] On failure the thread is neither registered nor blocked.
    pub fn wait(&self, tid: Tid, kind: EventKind, object: EventObject) -> Result<(), WaitError> {
        let mut state = self.state.lock();
        state.register(tid, kind, object).inspect_err(|_| {
            log::warn!("[EVENT] thread {} cannot wait for {}: pool exhausted", tid, kind.name());
        })?;
        self.scheduler.block(tid);
        log::trace!("[EVENT] thread {} waits for {} on {:#x}", tid, kind.name(), object.0);
        Ok(())
    }

    /// Register `tid` for every `(kind, object)` pair and block it.
    ///
    /// [E2] If any registration fails, the ones made by this call are undone
    /// and the thread stays runnable. Earlier registrations are kept.
    pub fn wait_many(&self, tid: Tid, waits: &[(EventKind, EventObject)]) -> Result<(), WaitError> {
        let mut state = self.state.lock();
        let keep_tail = state.threads.get(tid).and_then(|w| w.tail);
        for &(kind, object) in waits {
            if let Err(err) = state.register(tid, kind, object) {
                state.truncate_thread(tid, keep_tail);
                log::warn!("[EVENT] thread {} cannot wait for {} events: pool exhausted", tid, waits.len());
                return Err(err);
            }
        }
        self.scheduler.block(tid);
        Ok(())
    }

    /// Register `tid` for every kind in each mask against that entry's object,
    /// then block it. Unwinds like [`wait_many`](Self::wait_many).
    pub fn wait_objects(&self, tid: Tid, objects: &[WaitObject]) -> Result<(), WaitError> {
        let mut state = self.state.lock();
        let keep_tail = state.threads.get(tid).and_then(|w| w.tail);
        for obj in objects {
            for kind in obj.events.kinds() {
                if let Err(err) = state.register(tid, kind, obj.object) {
                    state.truncate_thread(tid, keep_tail);
                    log::warn!("[EVENT] thread {} cannot wait on {} objects: pool exhausted", tid, objects.len());
                    return Err(err);
                }
            }
        }
        self.scheduler.block(tid);
        Ok(())
    }

    /// Wake every thread waiting for `kind` on `object` (or on the wildcard).
    ///
    /// [E3] Each thread is unblocked once and loses all of its registrations.
    /// Threads are collected in batches of [`MAX_WAKEUPS`]; after each flush
    /// the scan restarts from the list head, which by then only holds threads
    /// not yet woken. Returns the number of threads woken.
    pub fn wakeup(&self, kind: EventKind, object: EventObject) -> usize {
        let mut state = self.state.lock();
        let mut batch = [0 as Tid; MAX_WAKEUPS];
        let mut len = 0;
        let mut woken = 0;

        let mut cur = state.lists[kind.index()].head;
        while let Some(id) = cur {
            let rec = *state.pool.get(id);
            if rec.object.accepts(object) && !batch[..len].contains(&rec.tid) {
                if len == MAX_WAKEUPS {
                    woken += self.flush(&mut state, &batch[..len]);
                    len = 0;
                    cur = state.lists[kind.index()].head;
                    continue;
                }
                batch[len] = rec.tid;
                len += 1;
            }
            cur = rec.next;
        }
        woken += self.flush(&mut state, &batch[..len]);

        if woken > 0 {
            log::trace!("[EVENT] {} on {:#x} woke {} threads", kind.name(), object.0, woken);
        }
        woken
    }

    /// [`wakeup`](Self::wakeup) for each kind in `mask`.
    pub fn wakeup_mask(&self, mask: EventMask, object: EventObject) -> usize {
        mask.kinds().map(|kind| self.wakeup(kind, object)).sum()
    }

    /// Wake `tid` if it waits for any kind in `mask`.
    pub fn wakeup_thread(&self, tid: Tid, mask: EventMask) -> bool {
        let mut state = self.state.lock();
        let waiting = state
            .threads
            .get(tid)
            .is_some_and(|w| w.events.intersects(mask));
        if waiting {
            state.remove_thread(tid);
            self.scheduler.unblock(tid);
        }
        waiting
    }

    /// [E5] Drop every registration of `tid` without touching its run state.
    pub fn remove_thread(&self, tid: Tid) {
        let removed = self.state.lock().remove_thread(tid);
        if removed > 0 {
            log::trace!("[EVENT] dropped {} registrations of thread {}", removed, tid);
        }
    }

    fn flush(&self, state: &mut EventState, tids: &[Tid]) -> usize {
        for &tid in tids {
            state.remove_thread(tid);
            self.scheduler.unblock(tid);
        }
        tids.len()
    }

    // ----- introspection -----

    pub fn is_waiting(&self, tid: Tid) -> bool {
        self.state.lock().threads.contains(tid)
    }

    /// Union of the kinds `tid` is registered for.
    pub fn events_of(&self, tid: Tid) -> EventMask {
        self.state
            .lock()
            .threads
            .get(tid)
            .map_or(EventMask::empty(), |w| w.events)
    }

    /// Number of live registrations of `tid`.
    pub fn registrations_of(&self, tid: Tid) -> usize {
        self.state.lock().chain_len(tid)
    }

    /// Registrations on `kind`'s list, in list order.
    pub fn waiters(&self, kind: EventKind) -> Vec<(Tid, EventObject)> {
        let state = self.state.lock();
        let mut out = Vec::new();
        let mut cur = state.lists[kind.index()].head;
        while let Some(id) = cur {
            let rec = state.pool.get(id);
            out.push((rec.tid, rec.object));
            cur = rec.next;
        }
        out
    }

    /// Records anywhere in the pool still naming `tid`.
    pub fn records_for(&self, tid: Tid) -> usize {
        self.state
            .lock()
            .pool
            .registered()
            .filter(|(_, r)| r.tid() == tid)
            .count()
    }

    pub fn free_records(&self) -> usize {
        self.state.lock().pool.available()
    }

    pub fn pool_capacity(&self) -> usize {
        self.state.lock().pool.capacity()
    }

    /// Log every non-empty wait list.
    pub fn dump(&self) {
        let state = self.state.lock();
        log::info!(
            "[EVENT] wait pool: {}/{} records in use by {} threads",
            state.pool.in_use(),
            state.pool.capacity(),
            state.threads.len()
        );
        for kind in EventKind::ALL {
            let mut cur = state.lists[kind.index()].head;
            if cur.is_none() {
                continue;
            }
            log::info!("[EVENT]   {}:", kind.name());
            while let Some(id) = cur {
                let rec = state.pool.get(id);
                log::info!("[EVENT]     thread {} on {:#x}", rec.tid, rec.object.0);
                cur = rec.next;
            }
        }
    }
}
