//! Ramdisk standing in for the virtio disk.

use super::BlockDevice;
use crate::{sync::mutex::Mutex, Error, Result, BSIZE};
use core::sync::atomic::{AtomicUsize, Ordering};
use tracing::trace;

pub struct Ramdisk {
    dev: u32,
    blocks: Mutex<Vec<[u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}
impl Ramdisk {
    /// A zero-filled disk of `nblocks` blocks answering to device `dev`.
    pub fn new(dev: u32, nblocks: usize) -> Ramdisk {
        Ramdisk {
            dev,
            blocks: Mutex::new(vec![[0u8; BSIZE]; nblocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
    pub fn dev(&self) -> u32 {
        self.dev
    }
    pub fn nblocks(&self) -> usize {
        self.blocks.lock_spinning().len()
    }
    /// Number of block reads served so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
    /// Number of block writes served so far.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
    /// Copy of a block's contents, bypassing the cache.
    pub fn peek(&self, blockno: u32) -> Option<[u8; BSIZE]> {
        self.blocks.lock_spinning().get(blockno as usize).copied()
    }
    fn check(&self, dev: u32, blockno: u32) -> Result<usize> {
        if dev != self.dev {
            return Err(Error::NoDevice(dev));
        }
        let nblocks = self.blocks.lock_spinning().len();
        if blockno as usize >= nblocks {
            return Err(Error::BlockOutOfRange { dev, blockno });
        }
        Ok(blockno as usize)
    }
}
impl BlockDevice for Ramdisk {
    fn read(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]) -> Result<()> {
        let index = self.check(dev, blockno)?;
        data.copy_from_slice(&self.blocks.lock_spinning()[index]);
        self.reads.fetch_add(1, Ordering::SeqCst);
        trace!(dev, blockno, "ramdisk read");
        Ok(())
    }
    fn write(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) -> Result<()> {
        let index = self.check(dev, blockno)?;
        self.blocks.lock_spinning()[index].copy_from_slice(data);
        self.writes.fetch_add(1, Ordering::SeqCst);
        trace!(dev, blockno, "ramdisk write");
        Ok(())
    }
}
