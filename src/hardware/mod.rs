//! Device drivers and hardware implementations.

pub mod ramdisk;

use crate::{Result, BSIZE};

/// A disk that moves whole blocks synchronously.
///
/// The buffer cache calls these with the buffer's sleep lock held, so an
/// implementation may block for as long as the transfer takes.
pub trait BlockDevice: Send + Sync {
    fn read(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]) -> Result<()>;
    fn write(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) -> Result<()>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn read(&self, dev: u32, blockno: u32, data: &mut [u8; BSIZE]) -> Result<()> {
        (**self).read(dev, blockno, data)
    }
    fn write(&self, dev: u32, blockno: u32, data: &[u8; BSIZE]) -> Result<()> {
        (**self).write(dev, blockno, data)
    }
}
