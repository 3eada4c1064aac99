//! Buffer cache and physical page allocator for an xv6-style kernel.
//!
//! Harts are host threads. Every piece of process-wide state lives in a
//! service object built once by [`Kernel::boot`] and passed by reference.

#![allow(clippy::missing_safety_doc)]

pub mod arch;
pub mod error;
pub mod hardware;
pub mod io;
pub mod mem;
pub mod proc;
pub mod start;
pub mod sync;
pub mod trap;

pub use crate::{
    error::{Error, Result},
    hardware::{ramdisk::Ramdisk, BlockDevice},
    io::{
        bio::BufferCache,
        buf::{Buf, BufferId, Pin},
    },
    mem::{
        kalloc::{AllocPolicy, Kmem},
        MemoryRange, PhysAddr,
    },
    start::{Kernel, KernelConfig},
    trap::Clock,
};

/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Device number of file system root disk
pub const ROOTDEV: u32 = 1;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Number of buffer cache bins
pub const NBUFBIN: usize = 13;
/// Block size.
pub const BSIZE: usize = 1024;
