//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents in a fixed
//! pool of buffers, spread over bins by block number. Caching disk blocks
//! in memory reduces the number of disk reads and also provides a
//! synchronization point for disk blocks used by multiple processes.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call bread.
//! - After changing buffer data, call bwrite to write it to disk.
//! - When done with the buffer, call brelse (or drop it).
//! - Do not use the buffer after calling brelse.
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.
//!
//! A miss may recycle an unused buffer from any bin. Within a bin the
//! victim is the unused buffer with the oldest tick.

use super::buf::{Buf, Buffer, BufferId, Link, Pin};
use crate::{
    hardware::BlockDevice,
    proc::scheduler::{wakeup, Channel},
    sync::mutex::{Mutex, MutexGuard},
    trap::Clock,
    Error, Result, NBUF, NBUFBIN,
};
use arrayvec::ArrayVec;
use core::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{debug, error, trace};

pub(crate) struct BinState {
    head: Option<usize>,
    /// A thread is choosing a buffer for a miss in this bin.
    allocating: bool,
}

/// One shard of the cache.
pub struct Bin {
    pub(crate) state: Mutex<BinState>,
}
impl Bin {
    fn new() -> Bin {
        Bin {
            state: Mutex::new(BinState {
                head: None,
                allocating: false,
            }),
        }
    }
    fn chan(&self) -> Channel {
        Channel::of(self)
    }
}

pub struct BufferCache<D> {
    device: D,
    clock: Arc<Clock>,
    buffers: Box<[Buffer]>,
    bins: ArrayVec<Bin, NBUFBIN>,
}
impl<D: BlockDevice> BufferCache<D> {
    /// A cache of `NBUF` buffers over `NBUFBIN` bins.
    ///
    /// Panics if those parameters are inconsistent, which is a build error
    /// rather than something a caller can handle.
    pub fn with_defaults(device: D, clock: Arc<Clock>) -> BufferCache<D> {
        match BufferCache::new(device, clock, NBUF, NBUFBIN) {
            Ok(cache) => cache,
            Err(e) => panic!("binit: {}", e),
        }
    }

    /// Spread `nbuf` buffers evenly over `nbin` bins.
    /// The last bin takes the remainder.
    pub fn new(device: D, clock: Arc<Clock>, nbuf: usize, nbin: usize) -> Result<BufferCache<D>> {
        if nbin == 0 || nbin > NBUFBIN {
            return Err(Error::BadBinCount(nbin));
        }
        if nbuf < nbin {
            return Err(Error::TooFewBuffers { nbuf, nbin });
        }

        let cache = BufferCache {
            device,
            clock,
            buffers: (0..nbuf).map(|_| Buffer::new()).collect(),
            bins: (0..nbin).map(|_| Bin::new()).collect(),
        };

        let per_bin = nbuf / nbin;
        for (i, bin) in cache.bins.iter().enumerate() {
            let end = if i == nbin - 1 { nbuf } else { (i + 1) * per_bin };
            let mut state = bin.state.lock_spinning();
            for index in i * per_bin..end {
                unsafe { cache.insert(&mut state, i, index) };
            }
        }
        debug!(nbuf, nbin, "binit");
        Ok(cache)
    }

    pub fn nbuf(&self) -> usize {
        self.buffers.len()
    }
    pub fn nbin(&self) -> usize {
        self.bins.len()
    }
    pub fn device(&self) -> &D {
        &self.device
    }

    fn bin_for(&self, blockno: u32) -> usize {
        blockno as usize % self.bins.len()
    }

    /// # Safety
    ///
    /// The caller holds the lock of the bin listing `index`, or `index` is
    /// in no list and owned by the caller. No other reference to this
    /// buffer's link may be alive.
    #[allow(clippy::mut_from_ref)]
    unsafe fn link(&self, index: usize) -> &mut Link {
        &mut *self.buffers[index].link.get()
    }

    /// Insert a buffer at the head of bin `bin`.
    ///
    /// # Safety
    ///
    /// `state` is that bin's locked state and `index` is in no bin.
    unsafe fn insert(&self, state: &mut MutexGuard<'_, BinState>, bin: usize, index: usize) {
        self.buffers[index].bin.store(bin, Ordering::Relaxed);
        let old_head = state.head;
        *self.link(index) = Link {
            prev: None,
            next: old_head,
        };
        if let Some(head) = old_head {
            self.link(head).prev = Some(index);
        }
        state.head = Some(index);
    }

    /// Detach an unused buffer from its bin.
    ///
    /// # Safety
    ///
    /// `state` is the locked state of the bin listing `index`.
    unsafe fn detach(&self, state: &mut MutexGuard<'_, BinState>, index: usize) {
        if self.buffers[index].refcnt() != 0 {
            panic!("detach_buf");
        }

        let Link { prev, next } = *self.link(index);
        if state.head == Some(index) {
            state.head = next;
        }
        if let Some(prev) = prev {
            self.link(prev).next = next;
        }
        if let Some(next) = next {
            self.link(next).prev = prev;
        }
        *self.link(index) = Link::default();
    }

    /// Walk a bin's list. `state` must be that bin's locked state.
    fn iter<'s>(&'s self, state: &'s BinState) -> impl Iterator<Item = usize> + 's {
        // Safety: the bin lock is held for as long as `state` is borrowed.
        core::iter::successors(state.head, move |&index| unsafe { self.link(index).next })
    }

    /// Detach and return the least recently used unused buffer of a bin.
    fn pop_lru(&self, state: &mut MutexGuard<'_, BinState>) -> Option<usize> {
        let mut victim: Option<(usize, u32)> = None;
        for index in self.iter(state) {
            let buffer = &self.buffers[index];
            if buffer.refcnt() == 0 && victim.map_or(true, |(_, tick)| buffer.tick() < tick) {
                victim = Some((index, buffer.tick()));
            }
        }
        let (index, _) = victim?;
        unsafe { self.detach(state, index) };
        Some(index)
    }

    /// Find a victim, starting at the home bin and moving on through the
    /// others. Only one bin lock is held at a time.
    fn steal(&self, home: usize) -> Option<usize> {
        let nbin = self.bins.len();
        for k in 0..nbin {
            let from = (home + k) % nbin;
            let mut state = self.bins[from].state.lock_spinning();
            if let Some(index) = self.pop_lru(&mut state) {
                if from != home {
                    trace!(from, to = home, buf = index, "bget: stole buffer");
                }
                return Some(index);
            }
        }
        None
    }

    /// Look through the buffer cache for block on device dev.
    ///
    /// If not found, allocate a buffer.
    /// In either case, return locked buffer.
    fn bget(&self, dev: u32, blockno: u32) -> Buf<'_> {
        let home = self.bin_for(blockno);
        let bin = &self.bins[home];
        // Read the clock before taking any bin lock.
        let tick = self.clock.ticks();

        let mut state = bin.state.lock_spinning();
        while state.allocating {
            state.sleep(bin.chan());
        }

        // Is the block already cached?
        let hit = self.iter(&state).find(|&index| self.buffers[index].is(dev, blockno));
        if let Some(index) = hit {
            let buffer = &self.buffers[index];
            buffer.refcnt.fetch_add(1, Ordering::Relaxed);
            buffer.tick.store(tick, Ordering::Relaxed);
            drop(state);
            trace!(dev, blockno, buf = index, "bget: hit");
            return self.lock_buf(index, bin);
        }

        // Not cached.
        // Recycle the least recently used unused buffer.
        state.allocating = true;
        drop(state);

        let Some(index) = self.steal(home) else {
            error!(dev, blockno, "bget: every buffer is in use");
            panic!("bget: no buffers");
        };

        // The buffer is in no bin now, so it is ours alone.
        let buffer = &self.buffers[index];
        buffer.dev.store(dev, Ordering::Relaxed);
        buffer.blockno.store(blockno, Ordering::Relaxed);
        buffer.valid.store(false, Ordering::Release);
        buffer.refcnt.store(1, Ordering::Relaxed);
        buffer.tick.store(tick, Ordering::Relaxed);

        let mut state = bin.state.lock_spinning();
        unsafe { self.insert(&mut state, home, index) };
        state.allocating = false;
        wakeup(bin.chan());
        drop(state);

        trace!(dev, blockno, buf = index, "bget: miss");
        self.lock_buf(index, bin)
    }

    fn lock_buf<'c>(&'c self, index: usize, bin: &'c Bin) -> Buf<'c> {
        let buffer = &self.buffers[index];
        buffer.data.lock_unguarded();
        Buf {
            id: BufferId(index),
            buffer,
            bin,
        }
    }

    /// Return a locked buf with the contents of the indicated block.
    pub fn bread(&self, dev: u32, blockno: u32) -> Result<Buf<'_>> {
        let mut b = self.bget(dev, blockno);
        if !b.is_valid() {
            // On failure the buffer stays invalid and is released on return.
            self.device.read(dev, blockno, b.data_mut())?;
            b.buffer.valid.store(true, Ordering::Release);
        }
        Ok(b)
    }

    /// Write b's contents to disk. Must be locked.
    pub fn bwrite(&self, b: &Buf<'_>) -> Result<()> {
        if !b.buffer.data.holding() {
            panic!("bwrite");
        }
        self.device.write(b.dev(), b.blockno(), b.data())
    }

    /// Release a locked buffer.
    ///
    /// Recency is set by bget, so the bin's list is left as it is.
    pub fn brelse(&self, b: Buf<'_>) {
        drop(b);
    }

    /// Keep b's block cached after b is released.
    ///
    /// The pin holds a reference but not the buffer's lock, and lasts until
    /// it is handed to bunpin().
    pub fn bpin<'c>(&self, b: &Buf<'c>) -> Pin<'c> {
        let _guard = b.bin.state.lock_spinning();
        b.buffer.refcnt.fetch_add(1, Ordering::Relaxed);
        Pin {
            id: b.id,
            buffer: b.buffer,
            bin: b.bin,
        }
    }

    pub fn bunpin(&self, pin: Pin<'_>) {
        let _guard = pin.bin.state.lock_spinning();
        if pin.buffer.refcnt() == 0 {
            panic!("bunpin");
        }
        pin.buffer.refcnt.fetch_sub(1, Ordering::Relaxed);
    }

    /// Lock the bin whose list holds buffer `index`.
    fn lock_bin_of(&self, index: usize) -> MutexGuard<'_, BinState> {
        let buffer = &self.buffers[index];
        loop {
            let bin = buffer.bin();
            let state = self.bins[bin].state.lock_spinning();
            // Moved while we waited for the lock; try its new bin.
            if buffer.bin() == bin {
                return state;
            }
        }
    }

    /// References held on a buffer: holders of its lock plus pins.
    pub fn refcnt(&self, id: BufferId) -> u32 {
        let _guard = self.lock_bin_of(id.0);
        self.buffers[id.0].refcnt()
    }

    /// The buffer caching (dev, blockno), if any, without touching it.
    pub fn lookup(&self, dev: u32, blockno: u32) -> Option<BufferId> {
        let state = self.bins[self.bin_for(blockno)].state.lock_spinning();
        let found = self
            .iter(&state)
            .find(|&index| self.buffers[index].is(dev, blockno));
        drop(state);
        found.map(BufferId)
    }

    /// Buffers listed in bin `bin`, head first.
    pub fn bin_members(&self, bin: usize) -> Vec<BufferId> {
        let state = self.bins[bin].state.lock_spinning();
        let members = self.iter(&state).map(BufferId).collect();
        drop(state);
        members
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::ramdisk::Ramdisk;
    use crate::BSIZE;
    use proptest::prelude::*;
    use std::collections::HashMap;

    const DEV: u32 = 1;

    fn cache(nbuf: usize, nbin: usize) -> (BufferCache<Ramdisk>, Arc<Clock>) {
        let clock = Arc::new(Clock::new());
        let cache =
            BufferCache::new(Ramdisk::new(DEV, 64), Arc::clone(&clock), nbuf, nbin).unwrap();
        (cache, clock)
    }

    #[test]
    fn binit_partitions_buffers() {
        let (cache, _) = cache(7, 3);
        assert_eq!(cache.bin_members(0).len(), 2);
        assert_eq!(cache.bin_members(1).len(), 2);
        assert_eq!(cache.bin_members(2).len(), 3);
        // Inserted at the head, so the last buffer comes first.
        assert_eq!(cache.bin_members(0), vec![BufferId(1), BufferId(0)]);
    }

    #[test]
    fn rejects_bad_shapes() {
        let clock = Arc::new(Clock::new());
        assert!(matches!(
            BufferCache::new(Ramdisk::new(DEV, 1), Arc::clone(&clock), 4, 0),
            Err(Error::BadBinCount(0))
        ));
        assert!(matches!(
            BufferCache::new(Ramdisk::new(DEV, 1), Arc::clone(&clock), 4, NBUFBIN + 1),
            Err(Error::BadBinCount(_))
        ));
        assert!(matches!(
            BufferCache::new(Ramdisk::new(DEV, 1), clock, 2, 3),
            Err(Error::TooFewBuffers { nbuf: 2, nbin: 3 })
        ));
    }

    #[test]
    fn defaults_use_params() {
        let cache = BufferCache::with_defaults(Ramdisk::new(DEV, 1), Arc::new(Clock::new()));
        assert_eq!(cache.nbuf(), NBUF);
        assert_eq!(cache.nbin(), NBUFBIN);
    }

    #[test]
    fn bread_reads_once_then_hits() {
        let (cache, _) = cache(4, 2);
        let id = {
            let b = cache.bread(DEV, 3).unwrap();
            assert!(b.is_valid());
            assert_eq!(b.blockno(), 3);
            b.id()
        };
        assert_eq!(cache.device().reads(), 1);

        let b = cache.bread(DEV, 3).unwrap();
        assert_eq!(b.id(), id);
        assert_eq!(cache.device().reads(), 1);
        assert_eq!(cache.refcnt(id), 1);
        cache.brelse(b);
        assert_eq!(cache.refcnt(id), 0);
    }

    #[test]
    fn bwrite_is_write_through() {
        let (cache, _) = cache(4, 2);
        let mut b = cache.bread(DEV, 5).unwrap();
        b.data_mut()[0] = 0x5a;
        cache.bwrite(&b).unwrap();
        assert_eq!(cache.device().peek(5).unwrap()[0], 0x5a);
        assert_eq!(cache.device().writes(), 1);
    }

    #[test]
    fn device_error_leaves_buffer_invalid() {
        let (cache, _) = cache(4, 2);
        assert_eq!(
            cache.bread(DEV, 1000).unwrap_err(),
            Error::BlockOutOfRange {
                dev: DEV,
                blockno: 1000
            }
        );
        let id = cache.lookup(DEV, 1000).unwrap();
        assert_eq!(cache.refcnt(id), 0);
        assert!(matches!(cache.bread(2, 0), Err(Error::NoDevice(2))));
    }

    #[test]
    fn victim_is_oldest_unused_buffer_in_bin() {
        let (cache, clock) = cache(3, 1);
        for blockno in [10, 11, 12] {
            clock.clockintr();
            drop(cache.bread(DEV, blockno).unwrap());
        }
        // Touch 10 again so 11 becomes the oldest.
        clock.clockintr();
        drop(cache.bread(DEV, 10).unwrap());

        clock.clockintr();
        drop(cache.bread(DEV, 13).unwrap());
        assert!(cache.lookup(DEV, 11).is_none());
        assert!(cache.lookup(DEV, 10).is_some());
        assert!(cache.lookup(DEV, 12).is_some());
    }

    #[test]
    fn held_buffers_are_never_evicted() {
        let (cache, clock) = cache(2, 1);
        let held = cache.bread(DEV, 0).unwrap();
        for blockno in 1..6 {
            clock.clockintr();
            drop(cache.bread(DEV, blockno).unwrap());
            assert_eq!(cache.lookup(DEV, 0), Some(held.id()));
        }
    }

    #[test]
    fn miss_steals_from_another_bin() {
        let (cache, _) = cache(4, 2);
        // Blocks 0, 2, 4 all hash to bin 0, which only owns two buffers.
        let bufs: Vec<_> = [0, 2, 4]
            .into_iter()
            .map(|blockno| cache.bread(DEV, blockno).unwrap())
            .collect();
        assert_eq!(cache.bin_members(0).len(), 3);
        assert_eq!(cache.bin_members(1).len(), 1);
        drop(bufs);
    }

    #[test]
    fn pin_keeps_buffer_resident() {
        let (cache, clock) = cache(1, 1);
        let b = cache.bread(DEV, 7).unwrap();
        let id = b.id();
        let pin = cache.bpin(&b);
        cache.brelse(b);
        assert_eq!(cache.refcnt(id), 1);
        assert_eq!(pin.blockno(), 7);

        // Pinned without its lock: another thread can still read the block.
        std::thread::scope(|s| {
            s.spawn(|| {
                let again = cache.bread(DEV, 7).unwrap();
                assert_eq!(again.id(), id);
            });
        });

        cache.bunpin(pin);
        assert_eq!(cache.refcnt(id), 0);
        clock.clockintr();
        drop(cache.bread(DEV, 8).unwrap());
        assert!(cache.lookup(DEV, 7).is_none());
    }

    #[test]
    #[should_panic(expected = "bget: no buffers")]
    fn pinned_pool_is_exhausted() {
        let (cache, _) = cache(1, 1);
        let b = cache.bread(DEV, 7).unwrap();
        let _pin = cache.bpin(&b);
        drop(b);
        // Block 7 keeps the only buffer, so block 8 cannot take it over.
        let _ = cache.bread(DEV, 8);
    }

    #[test]
    fn pin_stays_with_its_block() {
        let (cache, clock) = cache(2, 1);
        clock.clockintr();
        let b = cache.bread(DEV, 7).unwrap();
        let pin = cache.bpin(&b);
        drop(b);

        // Block 7 is the oldest, but pinned; 8 is recycled for 9 instead.
        for blockno in [8, 9] {
            clock.clockintr();
            drop(cache.bread(DEV, blockno).unwrap());
        }
        assert_eq!(cache.lookup(DEV, 7), Some(pin.id()));
        assert_eq!(cache.lookup(DEV, 8), None);
        assert_eq!(pin.blockno(), 7);

        cache.bunpin(pin);
        clock.clockintr();
        drop(cache.bread(DEV, 10).unwrap());
        assert_eq!(cache.lookup(DEV, 7), None);
        assert!(cache.lookup(DEV, 9).is_some());
    }

    #[test]
    fn stolen_buffer_records_its_new_bin() {
        let (cache, clock) = cache(4, 2);
        // Unused buffers are spread by index, not by block number.
        assert_eq!(cache.buffers[3].bin(), 1);

        // Blocks 0, 2, 4 all hash to bin 0, so block 4 takes a buffer from bin 1.
        let held: Vec<_> = [0, 2, 4]
            .into_iter()
            .map(|blockno| cache.bread(DEV, blockno).unwrap())
            .collect();
        let stolen = held[2].id();
        assert_eq!(cache.buffers[stolen.index()].bin(), 0);

        let pin = cache.bpin(&held[2]);
        drop(held);
        assert_eq!(cache.refcnt(stolen), 1);

        // Churn both bins; the pinned block survives and unpins from bin 0.
        for blockno in [1, 3, 5, 6, 8, 7, 9] {
            clock.clockintr();
            drop(cache.bread(DEV, blockno).unwrap());
        }
        assert_eq!(cache.lookup(DEV, 4), Some(stolen));
        cache.bunpin(pin);
        assert_eq!(cache.refcnt(stolen), 0);
    }

    #[test]
    fn payload_needs_the_lock() {
        let (cache, _) = cache(2, 1);
        let b = cache.bread(DEV, 0).unwrap();
        std::thread::scope(|s| {
            let stranger = s.spawn(|| b.data()[0]);
            let err = stranger.join().unwrap_err();
            assert_eq!(err.downcast_ref::<&str>(), Some(&"buf: lock not held"));
        });
        assert_eq!(b.data()[..4], [0u8; 4]);
    }

    #[test]
    fn bwrite_without_lock_panics() {
        let (cache, _) = cache(2, 1);
        let b = cache.bread(DEV, 0).unwrap();
        std::thread::scope(|s| {
            let err = s.spawn(|| cache.bwrite(&b)).join().unwrap_err();
            assert_eq!(err.downcast_ref::<&str>(), Some(&"bwrite"));
        });
    }

    #[test]
    fn brelse_without_lock_panics() {
        let (cache, _) = cache(2, 1);
        let b = cache.bread(DEV, 0).unwrap();
        let id = b.id();
        std::thread::scope(|s| {
            let err = s.spawn(|| cache.brelse(b)).join().unwrap_err();
            assert_eq!(err.downcast_ref::<&str>(), Some(&"brelse"));
        });
        // The panicking release left the buffer referenced.
        assert_eq!(cache.refcnt(id), 1);
    }

    #[test]
    fn concurrent_misses_share_one_buffer() {
        let (cache, _) = cache(6, 2);
        let ids: Vec<BufferId> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| cache.bread(DEV, 9).unwrap().id()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(cache.device().reads(), 1);
        assert_eq!(cache.refcnt(ids[0]), 0);
    }

    #[test]
    fn holders_take_turns() {
        let (cache, _) = cache(4, 2);
        std::thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..25 {
                        let mut b = cache.bread(DEV, 2).unwrap();
                        let n = u32::from_le_bytes(b.data()[..4].try_into().unwrap());
                        b.data_mut()[..4].copy_from_slice(&(n + 1).to_le_bytes());
                        cache.bwrite(&b).unwrap();
                    }
                });
            }
        });
        let total = cache.device().peek(2).unwrap();
        assert_eq!(u32::from_le_bytes(total[..4].try_into().unwrap()), 100);
        assert_eq!(BSIZE, total.len());
    }

    proptest! {
        #[test]
        fn resident_blocks_keep_their_buffer(
            blocks in proptest::collection::vec(0u32..4, 1..48),
        ) {
            // Four distinct blocks fit in the pool, so nothing is ever evicted.
            let (cache, clock) = cache(4, 2);
            let mut seen: HashMap<u32, BufferId> = HashMap::new();
            for blockno in blocks {
                clock.clockintr();
                let id = cache.bread(DEV, blockno).unwrap().id();
                if let Some(&first) = seen.get(&blockno) {
                    prop_assert_eq!(first, id);
                }
                seen.insert(blockno, id);
            }
            prop_assert_eq!(cache.device().reads(), seen.len());
        }
    }
}
