use crate::proc::cpu::{pop_intr_off, push_intr_off};
use core::sync::atomic::{AtomicBool, Ordering};

/// Mutual exclusion spin lock.
///
/// Interrupts stay off on the holding hart until the lock is released,
/// so an interrupt handler can never spin on a lock its own hart holds.
pub struct Lock {
    locked: AtomicBool,
}
impl Lock {
    pub const fn new() -> Lock {
        Lock {
            locked: AtomicBool::new(false),
        }
    }
    /// Acquire without producing a guard. Pair with [`Lock::unlock`].
    pub fn lock_unguarded(&self) {
        push_intr_off();

        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            core::hint::spin_loop();
        }
    }
    pub fn lock(&self) -> LockGuard<'_> {
        self.lock_unguarded();
        LockGuard { lock: self }
    }
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
    /// # Safety
    ///
    /// The calling hart must hold the lock.
    pub unsafe fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
        pop_intr_off();
    }
}
impl Default for Lock {
    fn default() -> Lock {
        Lock::new()
    }
}

pub struct LockGuard<'l> {
    pub lock: &'l Lock,
}
impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.lock.unlock() }
    }
}
