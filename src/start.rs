//! Boot: bring up the page allocator and the buffer cache.

use crate::{
    hardware::BlockDevice,
    io::bio::BufferCache,
    mem::{
        kalloc::{AllocPolicy, Kmem},
        MemoryRange,
    },
    trap::Clock,
    Result, NBUF, NBUFBIN,
};
use std::sync::Arc;
use tracing::info;

/// Sizes chosen at boot. Defaults match the compile-time parameters.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct KernelConfig {
    /// Size of disk block cache
    pub nbuf: usize,
    /// Number of buffer cache bins
    pub nbin: usize,
    /// Physical memory handed to kinit.
    pub memory: MemoryRange,
    pub policy: AllocPolicy,
}
impl Default for KernelConfig {
    fn default() -> KernelConfig {
        KernelConfig {
            nbuf: NBUF,
            nbin: NBUFBIN,
            memory: MemoryRange::default(),
            policy: AllocPolicy::default(),
        }
    }
}

pub struct Kernel<D> {
    clock: Arc<Clock>,
    kmem: Kmem,
    bcache: BufferCache<D>,
}
impl<D: BlockDevice> Kernel<D> {
    pub fn boot(config: KernelConfig, device: D) -> Result<Kernel<D>> {
        info!(?config, "kernel is booting");
        let clock = Arc::new(Clock::new());
        let kmem = Kmem::new(config.memory, config.policy)?;
        let bcache = BufferCache::new(device, Arc::clone(&clock), config.nbuf, config.nbin)?;
        Ok(Kernel {
            clock,
            kmem,
            bcache,
        })
    }
    pub fn clock(&self) -> &Clock {
        &self.clock
    }
    pub fn kmem(&self) -> &Kmem {
        &self.kmem
    }
    pub fn bcache(&self) -> &BufferCache<D> {
        &self.bcache
    }
}
