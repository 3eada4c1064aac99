//! Timer ticks.

use crate::{
    proc::scheduler::{wakeup, Channel},
    sync::mutex::Mutex,
};

/// Monotonic tick counter advanced by the timer interrupt.
pub struct Clock {
    ticks: Mutex<u32>,
}
impl Clock {
    pub const fn new() -> Clock {
        Clock {
            ticks: Mutex::new(0),
        }
    }
    fn chan(&self) -> Channel {
        Channel::of(&self.ticks)
    }
    /// Timer interrupt: advance the clock and wake tick sleepers.
    pub fn clockintr(&self) {
        let mut ticks = self.ticks.lock_spinning();
        *ticks = ticks.wrapping_add(1);
        wakeup(self.chan());
    }
    /// Snapshot of the tick counter.
    pub fn ticks(&self) -> u32 {
        *self.ticks.lock_spinning()
    }
    /// How many clock tick interrupts have occurred since boot.
    pub fn uptime(&self) -> u64 {
        u64::from(self.ticks())
    }
    /// Sleep until `n` ticks have passed.
    pub fn sleep(&self, n: u32) {
        let mut ticks = self.ticks.lock_spinning();
        let ticks0 = *ticks;
        while ticks.wrapping_sub(ticks0) < n {
            ticks.sleep(self.chan());
        }
    }
}
impl Default for Clock {
    fn default() -> Clock {
        Clock::new()
    }
}
