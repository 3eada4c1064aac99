//! Sleep and wakeup.
//!
//! A sleeper takes the channel table lock before giving up the lock that
//! guards its condition, and `wakeup` must take the same table lock, so a
//! wakeup can never slip in between the check and the sleep.

use super::cpu::Cpu;
use parking_lot::{Condvar, Mutex};
use std::collections::BTreeMap;

/// An address to sleep on.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel(usize);
impl Channel {
    pub fn of<T: ?Sized>(object: &T) -> Channel {
        Channel(object as *const T as *const () as usize)
    }
}

#[derive(Default)]
struct WaitState {
    /// Bumped by every wakeup on the channel.
    generation: u64,
    sleepers: usize,
}

static CHANNELS: Mutex<BTreeMap<Channel, WaitState>> = Mutex::new(BTreeMap::new());
static WAKEUP: Condvar = Condvar::new();

/// Atomically release a lock (through `release`) and sleep on `chan`.
///
/// Returns after some `wakeup(chan)`; the caller reacquires its lock and
/// rechecks its condition.
pub fn sleep(chan: Channel, release: impl FnOnce()) {
    // Holding the table lock across release() keeps wakeup(chan) out until
    // this sleeper is registered.
    let mut channels = CHANNELS.lock();
    release();
    if Cpu::interrupt_disable_layers() != 0 {
        panic!("sched locks");
    }

    let generation = {
        let state = channels.entry(chan).or_default();
        state.sleepers += 1;
        state.generation
    };

    while channels
        .get(&chan)
        .is_some_and(|state| state.generation == generation)
    {
        WAKEUP.wait(&mut channels);
    }

    if let Some(state) = channels.get_mut(&chan) {
        state.sleepers -= 1;
        if state.sleepers == 0 {
            channels.remove(&chan);
        }
    }
}

/// Wake up all threads sleeping on `chan`.
pub fn wakeup(chan: Channel) {
    let mut channels = CHANNELS.lock();
    if let Some(state) = channels.get_mut(&chan) {
        state.generation = state.generation.wrapping_add(1);
        WAKEUP.notify_all();
    }
}
