//! Physical memory: addresses, the boot-time range, and the page allocator.

pub mod kalloc;
pub mod physical;
pub mod refcount;

use crate::{
    arch::mem::{
        is_page_aligned, round_down_page, round_up_page, KERNEL_END, PAGE_SIZE, PHYSICAL_END,
    },
    Error, Result,
};
use core::fmt;

/// A physical address.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(usize);
impl PhysAddr {
    pub const fn new(addr: usize) -> PhysAddr {
        PhysAddr(addr)
    }
    pub const fn as_usize(self) -> usize {
        self.0
    }
    pub fn is_page_aligned(self) -> bool {
        is_page_aligned(self.0)
    }
}
impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}
impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

/// The physical range handed to the page allocator at boot,
/// trimmed to whole pages.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    start: usize,
    end: usize,
}
impl MemoryRange {
    pub fn new(start: usize, end: usize) -> Result<MemoryRange> {
        let (start, end) = (round_up_page(start), round_down_page(end));
        if start >= end {
            return Err(Error::EmptyRange { start, end });
        }
        Ok(MemoryRange { start, end })
    }
    /// A range of `pages` whole pages starting at `start` (rounded up).
    pub fn with_pages(start: usize, pages: usize) -> Result<MemoryRange> {
        let start = round_up_page(start);
        MemoryRange::new(start, start + pages * PAGE_SIZE)
    }
    pub fn start(&self) -> PhysAddr {
        PhysAddr(self.start)
    }
    pub fn end(&self) -> PhysAddr {
        PhysAddr(self.end)
    }
    pub fn page_count(&self) -> usize {
        (self.end - self.start) / PAGE_SIZE
    }
    pub fn contains(&self, pa: PhysAddr) -> bool {
        self.start <= pa.0 && pa.0 < self.end
    }
    /// Index of the page containing `pa`. `pa` must be in range.
    pub fn page_index(&self, pa: PhysAddr) -> usize {
        debug_assert!(self.contains(pa));
        (pa.0 - self.start) / PAGE_SIZE
    }
    pub fn page_addr(&self, index: usize) -> PhysAddr {
        debug_assert!(index < self.page_count());
        PhysAddr(self.start + index * PAGE_SIZE)
    }
}
impl Default for MemoryRange {
    fn default() -> MemoryRange {
        MemoryRange {
            start: KERNEL_END,
            end: PHYSICAL_END,
        }
    }
}
