use super::bio::Bin;
use crate::{sync::sleeplock::Sleeplock, BSIZE};
use core::{
    cell::UnsafeCell,
    fmt,
    sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering},
};

/// Identity of a buffer in the cache's fixed pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);
impl BufferId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Position in a bin's list, as indices into the buffer pool.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Link {
    pub prev: Option<usize>,
    pub next: Option<usize>,
}

/// One cached disk block.
///
/// `refcnt`, `tick`, `bin` and `link` belong to the lock of the bin whose
/// list holds the buffer. `dev` and `blockno` only change while the buffer is in
/// no list at all. `valid` and the payload belong to the sleep lock.
pub struct Buffer {
    pub(crate) dev: AtomicU32,
    pub(crate) blockno: AtomicU32,
    /// Has data been read from disk?
    pub(crate) valid: AtomicBool,
    pub(crate) refcnt: AtomicU32,
    /// Tick of the last bget() that returned this buffer.
    pub(crate) tick: AtomicU32,
    /// The bin whose list holds this buffer.
    pub(crate) bin: AtomicUsize,
    pub(crate) link: UnsafeCell<Link>,
    pub(crate) data: Sleeplock<[u8; BSIZE]>,
}
impl Buffer {
    pub(crate) fn new() -> Buffer {
        Buffer {
            dev: AtomicU32::new(0),
            blockno: AtomicU32::new(0),
            valid: AtomicBool::new(false),
            refcnt: AtomicU32::new(0),
            tick: AtomicU32::new(0),
            bin: AtomicUsize::new(0),
            link: UnsafeCell::new(Link::default()),
            data: Sleeplock::new([0u8; BSIZE]),
        }
    }
    pub(crate) fn dev(&self) -> u32 {
        self.dev.load(Ordering::Relaxed)
    }
    pub(crate) fn blockno(&self) -> u32 {
        self.blockno.load(Ordering::Relaxed)
    }
    pub(crate) fn refcnt(&self) -> u32 {
        self.refcnt.load(Ordering::Relaxed)
    }
    pub(crate) fn tick(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }
    pub(crate) fn bin(&self) -> usize {
        self.bin.load(Ordering::Relaxed)
    }
    pub(crate) fn is(&self, dev: u32, blockno: u32) -> bool {
        self.dev() == dev && self.blockno() == blockno
    }
}
// Links are only touched under the owning bin's lock.
unsafe impl Sync for Buffer {}

/// A buffer whose sleep lock the caller holds.
///
/// Dropping it is brelse(): the sleep lock is released and the reference
/// count dropped. Do not keep it longer than necessary.
pub struct Buf<'c> {
    pub(crate) id: BufferId,
    pub(crate) buffer: &'c Buffer,
    /// The bin the buffer sits in; fixed while we hold a reference.
    pub(crate) bin: &'c Bin,
}
impl Buf<'_> {
    pub fn id(&self) -> BufferId {
        self.id
    }
    pub fn dev(&self) -> u32 {
        self.buffer.dev()
    }
    pub fn blockno(&self) -> u32 {
        self.buffer.blockno()
    }
    pub fn is_valid(&self) -> bool {
        self.buffer.valid.load(Ordering::Acquire)
    }
    fn assert_holding(&self) {
        if !self.buffer.data.holding() {
            panic!("buf: lock not held");
        }
    }
    pub fn data(&self) -> &[u8; BSIZE] {
        self.assert_holding();
        unsafe { self.buffer.data.get_mut_unchecked() }
    }
    pub fn data_mut(&mut self) -> &mut [u8; BSIZE] {
        self.assert_holding();
        unsafe { self.buffer.data.get_mut_unchecked() }
    }
}
impl Drop for Buf<'_> {
    fn drop(&mut self) {
        if !self.buffer.data.holding() {
            if std::thread::panicking() {
                return;
            }
            panic!("brelse");
        }
        self.buffer.data.unlock();

        let _guard = self.bin.state.lock_spinning();
        self.buffer.refcnt.fetch_sub(1, Ordering::Relaxed);
    }
}
/// A reference that keeps a buffer cached after its [`Buf`] is released.
///
/// Only bpin() makes one and only bunpin() takes it back, so a pin always
/// names the block it was taken on.
#[must_use = "a pin is only dropped by bunpin"]
pub struct Pin<'c> {
    pub(crate) id: BufferId,
    pub(crate) buffer: &'c Buffer,
    /// Fixed while the pin is held: a referenced buffer is never stolen.
    pub(crate) bin: &'c Bin,
}
impl Pin<'_> {
    pub fn id(&self) -> BufferId {
        self.id
    }
    pub fn blockno(&self) -> u32 {
        self.buffer.blockno()
    }
}
impl fmt::Debug for Pin<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pin")
            .field("id", &self.id)
            .field("blockno", &self.blockno())
            .finish()
    }
}

impl fmt::Debug for Buf<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buf")
            .field("id", &self.id)
            .field("dev", &self.dev())
            .field("blockno", &self.blockno())
            .finish()
    }
}
