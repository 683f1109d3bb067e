//! TEAM_451: Lock classes used by the task core.
//!
//! - [`SpinLock`] busy-waits. Used where critical sections are short and must
//!   never suspend: process-table bookkeeping, group-set slots, the event
//!   subsystem.
//! - [`BlockingLock`] may suspend the acquirer on contention. Used for
//!   per-process program, region and fd state, whose sections can be long.
//!
//! The scheduler installs the suspend path once with [`set_relax_hook`];
//! until then a blocking lock degrades to spinning.

use spin::{Mutex, MutexGuard, Once};

/// TEAM_451: Busy-wait lock.
pub type SpinLock<T> = Mutex<T>;

/// TEAM_451: Guard for [`SpinLock`]; releases on drop.
pub type SpinLockGuard<'a, T> = MutexGuard<'a, T>;

/// TEAM_451: Guard for [`BlockingLock`]; releases on drop.
pub type BlockingGuard<'a, T> = MutexGuard<'a, T>;

static RELAX_HOOK: Once<fn()> = Once::new();

/// TEAM_451: Install the function a contended [`BlockingLock`] calls to give
/// up the CPU. Only the first call has any effect.
pub fn set_relax_hook(hook: fn()) {
    RELAX_HOOK.call_once(|| hook);
}

fn relax() {
    match RELAX_HOOK.get() {
        Some(hook) => hook(),
        None => core::hint::spin_loop(),
    }
}

/// TEAM_451: Lock whose acquirer may suspend while waiting.
///
/// [L1] `lock()` returns a guard granting exclusive access,
/// [L2] the guard releases on drop,
/// [L3] contention goes through the relax hook instead of a tight spin.
pub struct BlockingLock<T> {
    inner: Mutex<T>,
}

impl<T> BlockingLock<T> {
    pub const fn new(data: T) -> Self {
        Self {
            inner: Mutex::new(data),
        }
    }

    /// [L1] Acquire, [L3] relaxing between attempts.
    pub fn lock(&self) -> BlockingGuard<'_, T> {
        loop {
            if let Some(guard) = self.inner.try_lock() {
                return guard;
            }
            relax(); // [L3]
        }
    }

    /// Try to acquire the lock without waiting.
    pub fn try_lock(&self) -> Option<BlockingGuard<'_, T>> {
        self.inner.try_lock()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
}

impl<T: Default> Default for BlockingLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    /// Tests: [L1] exclusive access, [L2] release on drop
    #[test]
    fn test_blocking_lock_basic() {
        let lock = BlockingLock::new(1);
        {
            let mut guard = lock.lock(); // [L1]
            *guard = 2;
            assert!(lock.try_lock().is_none());
        } // [L2]
        assert!(!lock.is_locked());
        assert_eq!(*lock.lock(), 2);
    }

    /// Tests: [L3] contended acquirers all get through
    #[test]
    fn test_blocking_lock_contention() {
        let lock = Arc::new(BlockingLock::new(0usize));
        let handles: std::vec::Vec<_> = (0..4)
            .map(|_| {
                let lock = lock.clone();
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
