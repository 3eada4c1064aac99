use super::lock::Lock;
use crate::proc::scheduler::{self, Channel};
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut},
};

/// A spin lock that owns the data it protects.
pub struct Mutex<T> {
    lock: Lock,
    inner: UnsafeCell<T>,
}
impl<T> Mutex<T> {
    pub const fn new(value: T) -> Mutex<T> {
        Mutex {
            lock: Lock::new(),
            inner: UnsafeCell::new(value),
        }
    }
    /// Spin until the mutex is unlocked, acquiring afterwards.
    pub fn lock_spinning(&self) -> MutexGuard<'_, T> {
        self.lock.lock_unguarded();
        MutexGuard {
            mutex: self,
            _hart: PhantomData,
        }
    }
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}
impl<T: Default> Default for Mutex<T> {
    fn default() -> Mutex<T> {
        Mutex::new(T::default())
    }
}
unsafe impl<T> Sync for Mutex<T> where T: Send {}
unsafe impl<T> Send for Mutex<T> where T: Send {}

pub struct MutexGuard<'m, T> {
    mutex: &'m Mutex<T>,
    /// Interrupts were disabled on this hart; the guard must drop here too.
    _hart: PhantomData<*const ()>,
}
impl<T> MutexGuard<'_, T> {
    /// Sleep until `wakeup(chan)` is called somewhere else,
    /// yielding the lock until then.
    pub fn sleep(&mut self, chan: Channel) {
        let lock = &self.mutex.lock;
        scheduler::sleep(chan, || unsafe { lock.unlock() });
        lock.lock_unguarded();
    }
}
impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.mutex.inner.get() }
    }
}
impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.mutex.inner.get() }
    }
}
impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        unsafe { self.mutex.lock.unlock() }
    }
}
