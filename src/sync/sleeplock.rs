use super::mutex::Mutex;
use crate::proc::{
    process::Pid,
    scheduler::{wakeup, Channel},
};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
};

/// Long-term lock for data that may be held across disk I/O.
///
/// Waiters sleep instead of spinning. The holder is recorded so that
/// ownership can be checked before the data is touched.
pub struct Sleeplock<T> {
    /// The pid holding the lock, if any. Guarded by a spin lock.
    holder: Mutex<Option<Pid>>,
    inner: UnsafeCell<T>,
}
impl<T> Sleeplock<T> {
    pub const fn new(value: T) -> Sleeplock<T> {
        Sleeplock {
            holder: Mutex::new(None),
            inner: UnsafeCell::new(value),
        }
    }
    fn chan(&self) -> Channel {
        Channel::of(self)
    }
    /// Acquire without producing a guard. Pair with [`Sleeplock::unlock`].
    pub fn lock_unguarded(&self) {
        let me = Pid::current();
        let mut holder = self.holder.lock_spinning();
        while holder.is_some() {
            holder.sleep(self.chan());
        }
        *holder = Some(me);
    }
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        self.lock_unguarded();
        SleeplockGuard { lock: self }
    }
    /// Release the lock. Panics unless the caller holds it.
    pub fn unlock(&self) {
        let mut holder = self.holder.lock_spinning();
        if *holder != Some(Pid::current()) {
            panic!("releasesleep");
        }
        *holder = None;
        wakeup(self.chan());
    }
    /// Does the calling thread hold this lock?
    pub fn holding(&self) -> bool {
        *self.holder.lock_spinning() == Some(Pid::current())
    }
    /// # Safety
    ///
    /// The caller must hold the lock and must not create a second
    /// reference to the data while the returned one is alive.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn get_mut_unchecked(&self) -> &mut T {
        &mut *self.inner.get()
    }
}
unsafe impl<T> Sync for Sleeplock<T> where T: Send {}
unsafe impl<T> Send for Sleeplock<T> where T: Send {}

pub struct SleeplockGuard<'l, T> {
    lock: &'l Sleeplock<T>,
}
impl<T> Deref for SleeplockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*self.lock.inner.get() }
    }
}
impl<T> DerefMut for SleeplockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { &mut *self.lock.inner.get() }
    }
}
impl<T> Drop for SleeplockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.unlock()
    }
}
