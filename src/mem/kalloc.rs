//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Free pages live on one or more domains, each a free list behind its own
//! lock. Every page also carries a reference count so that a page can be
//! shared copy-on-write: kfree only reclaims it when the last sharer lets go.

use super::{
    physical::{FreeList, PhysicalMemory},
    refcount::{PageRefTable, Release},
    MemoryRange, PhysAddr,
};
use crate::{
    arch::mem::PAGE_SIZE,
    proc::cpu::{pop_intr_off, push_intr_off, Cpu},
    sync::mutex::Mutex,
    Error, Result, NCPU,
};
use arrayvec::ArrayVec;
use tracing::{debug, error, trace, warn};

/// Junk written over a page when it is freed.
pub const FREE_JUNK: u8 = 1;
/// Junk written over a page when it is allocated.
pub const ALLOC_JUNK: u8 = 5;

/// How free pages are partitioned.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocPolicy {
    /// One free list per hart; an empty list steals round-robin from the others.
    PerCpu { domains: usize },
    /// A single free list shared by every hart.
    Global,
}
impl AllocPolicy {
    fn domains(self) -> usize {
        match self {
            AllocPolicy::PerCpu { domains } => domains,
            AllocPolicy::Global => 1,
        }
    }
}
impl Default for AllocPolicy {
    fn default() -> AllocPolicy {
        AllocPolicy::PerCpu { domains: NCPU }
    }
}

pub struct Kmem {
    memory: PhysicalMemory,
    domains: ArrayVec<Mutex<FreeList>, NCPU>,
    refs: PageRefTable,
}
impl Kmem {
    /// Take ownership of `range` and put every page on a free list.
    ///
    /// Pages are split evenly across the domains; the last one
    /// takes the remainder.
    pub fn new(range: MemoryRange, policy: AllocPolicy) -> Result<Kmem> {
        let ndomains = policy.domains();
        if ndomains == 0 || ndomains > NCPU {
            return Err(Error::BadDomainCount(ndomains));
        }

        let kmem = Kmem {
            memory: PhysicalMemory::new(range),
            domains: (0..ndomains).map(|_| Mutex::new(FreeList::new())).collect(),
            refs: PageRefTable::new(range.page_count()),
        };
        kmem.freerange();
        debug!(
            start = ?range.start(),
            end = ?range.end(),
            pages = range.page_count(),
            domains = ndomains,
            "kinit"
        );
        Ok(kmem)
    }

    fn freerange(&self) {
        let range = self.memory.range();
        let npages = range.page_count();
        let per_domain = npages / self.domains.len();

        for cid in 0..self.domains.len() {
            let first = cid * per_domain;
            let last = if cid == self.domains.len() - 1 {
                npages
            } else {
                first + per_domain
            };
            for index in first..last {
                self.free_to(range.page_addr(index), cid);
            }
        }
    }

    /// The domain the calling hart allocates from and frees to.
    /// Interrupts must be off so the hart can't change underneath us.
    fn home(&self) -> usize {
        Cpu::current_id() % self.domains.len()
    }

    /// Panic unless `pa` is a page this allocator manages.
    fn check(&self, pa: PhysAddr, who: &str) -> usize {
        let range = self.memory.range();
        if !pa.is_page_aligned() || !range.contains(pa) {
            error!(?pa, "{}: bad physical address", who);
            panic!("{}", who);
        }
        range.page_index(pa)
    }

    /// Allocate one 4096-byte page of physical memory.
    ///
    /// Returns `None` if the memory cannot be allocated.
    pub fn kalloc(&self) -> Option<PhysAddr> {
        push_intr_off();
        let home = self.home();
        let ndomains = self.domains.len();
        let mut run = None;
        for i in 0..ndomains {
            let cid = (home + i) % ndomains;
            if let Some(pa) = self.domains[cid].lock_spinning().pop(&self.memory) {
                if cid != home {
                    trace!(from = cid, to = home, "kalloc: stole page");
                }
                run = Some(pa);
                break;
            }
        }
        pop_intr_off();

        let Some(pa) = run else {
            warn!("kalloc: out of memory");
            return None;
        };
        // Safety: the page just left its free list, so we are its only owner.
        unsafe { self.memory.fill(pa, ALLOC_JUNK) };
        self.refs.claim(self.memory.range().page_index(pa));
        Some(pa)
    }

    /// Free the page of physical memory at `pa`,
    /// which normally should have been returned by a call to kalloc().
    ///
    /// A shared page only loses one reference; the page is reclaimed
    /// once its last sharer frees it.
    pub fn kfree(&self, pa: PhysAddr) {
        self.check(pa, "kfree");

        push_intr_off();
        let home = self.home();
        pop_intr_off();

        self.free_to(pa, home);
    }

    fn free_to(&self, pa: PhysAddr, cid: usize) {
        let index = self.memory.range().page_index(pa);
        if let Release::Shared(left) = self.refs.release(index) {
            trace!(?pa, left, "kfree: page still shared");
            return;
        }

        // Safety: the last reference is gone, so the page is ours until pushed.
        unsafe { self.memory.fill(pa, FREE_JUNK) };
        let mut list = self.domains[cid].lock_spinning();
        unsafe { list.push(&self.memory, pa) };
    }

    pub fn get_refcount(&self, pa: PhysAddr) -> u8 {
        let index = self.check(pa, "kref");
        self.refs.get(index).unwrap_or(0)
    }

    /// Add `delta` sharers to an allocated page. Returns the new count.
    pub fn increment_refcount(&self, pa: PhysAddr, delta: u8) -> u8 {
        let index = self.check(pa, "kref");
        self.refs.increment(index, delta)
    }

    /// Drop `delta` sharers from a page that keeps at least one.
    /// Returns the new count. The last reference goes through kfree.
    pub fn decrement_refcount(&self, pa: PhysAddr, delta: u8) -> u8 {
        let index = self.check(pa, "kref");
        self.refs.decrement(index, delta)
    }

    pub fn reset_refcount(&self, pa: PhysAddr) {
        let index = self.check(pa, "kref");
        self.refs.reset(index);
    }

    /// The contents of an allocated page.
    ///
    /// # Safety
    ///
    /// The caller must own `pa` (or be its only writer among sharers) and
    /// hold no other reference to it.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn page(&self, pa: PhysAddr) -> &mut [u8; PAGE_SIZE] {
        self.check(pa, "page");
        self.memory.page(pa)
    }

    pub fn range(&self) -> MemoryRange {
        self.memory.range()
    }
    pub fn domains(&self) -> usize {
        self.domains.len()
    }
    pub fn total_pages(&self) -> usize {
        self.memory.range().page_count()
    }
    pub fn free_pages_in(&self, cid: usize) -> usize {
        self.domains[cid].lock_spinning().len()
    }
    pub fn free_pages(&self) -> usize {
        (0..self.domains.len()).map(|cid| self.free_pages_in(cid)).sum()
    }
}
