//! Backing store for physical pages and the free lists threaded through them.
//!
//! A free page holds the address of the next free page in its first word,
//! so the free lists cost no memory of their own. Nothing outside the page
//! allocator sees this layout.

use super::{MemoryRange, PhysAddr};
use crate::arch::mem::PAGE_SIZE;
use core::cell::UnsafeCell;

/// Link value ending a free list.
const NIL: usize = usize::MAX;

#[repr(C, align(4096))]
struct Page(UnsafeCell<[u8; PAGE_SIZE]>);

/// The RAM described by a [`MemoryRange`].
pub struct PhysicalMemory {
    range: MemoryRange,
    pages: Box<[Page]>,
}
impl PhysicalMemory {
    pub fn new(range: MemoryRange) -> PhysicalMemory {
        let pages = (0..range.page_count())
            .map(|_| Page(UnsafeCell::new([0u8; PAGE_SIZE])))
            .collect();
        PhysicalMemory { range, pages }
    }
    pub fn range(&self) -> MemoryRange {
        self.range
    }
    fn ptr(&self, pa: PhysAddr) -> *mut u8 {
        self.pages[self.range.page_index(pa)].0.get().cast()
    }
    /// # Safety
    ///
    /// The caller must own the page at `pa` and hold no other reference to it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page(&self, pa: PhysAddr) -> &mut [u8; PAGE_SIZE] {
        &mut *self.pages[self.range.page_index(pa)].0.get()
    }
    /// Fill the page with `junk` to catch dangling refs.
    ///
    /// # Safety
    ///
    /// The caller must own the page at `pa`.
    pub unsafe fn fill(&self, pa: PhysAddr, junk: u8) {
        core::ptr::write_bytes(self.ptr(pa), junk, PAGE_SIZE);
    }
    unsafe fn next(&self, pa: PhysAddr) -> Option<PhysAddr> {
        match self.ptr(pa).cast::<usize>().read() {
            NIL => None,
            next => Some(PhysAddr::new(next)),
        }
    }
    unsafe fn set_next(&self, pa: PhysAddr, next: Option<PhysAddr>) {
        self.ptr(pa)
            .cast::<usize>()
            .write(next.map_or(NIL, PhysAddr::as_usize));
    }
}
unsafe impl Sync for PhysicalMemory {}
unsafe impl Send for PhysicalMemory {}

/// Singly linked list of free pages.
#[derive(Debug, Default)]
pub struct FreeList {
    head: Option<PhysAddr>,
    len: usize,
}
impl FreeList {
    pub const fn new() -> FreeList {
        FreeList { head: None, len: 0 }
    }
    pub fn len(&self) -> usize {
        self.len
    }
    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }
    /// # Safety
    ///
    /// `pa` must be a page of `memory` that nobody else references,
    /// and it must not already be on a free list.
    pub unsafe fn push(&mut self, memory: &PhysicalMemory, pa: PhysAddr) {
        memory.set_next(pa, self.head);
        self.head = Some(pa);
        self.len += 1;
    }
    /// Pop the head page. The list must have been built over `memory`.
    pub fn pop(&mut self, memory: &PhysicalMemory) -> Option<PhysAddr> {
        let run = self.head?;
        // Safety: pages on the list belong to the list, and its links
        // were written by push().
        self.head = unsafe { memory.next(run) };
        self.len -= 1;
        Some(run)
    }
}
