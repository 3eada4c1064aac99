//! Per-page reference counts for pages shared copy-on-write.

use crate::sync::mutex::Mutex;

/// Count of a page no one has ever freed or allocated.
pub const REF_UNSET: u8 = u8::MAX;
/// Largest count a page can reach.
pub const REF_MAX: u8 = REF_UNSET - 1;

/// What dropping one reference did to a page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Release {
    /// That was the last reference; the page goes back on a free list.
    Reclaim,
    /// Other sharers remain.
    Shared(u8),
}

pub struct PageRefTable {
    counts: Mutex<Box<[u8]>>,
}
impl PageRefTable {
    pub fn new(pages: usize) -> PageRefTable {
        PageRefTable {
            counts: Mutex::new(vec![REF_UNSET; pages].into_boxed_slice()),
        }
    }
    /// The count of page `index`; `None` if it was never set.
    pub fn get(&self, index: usize) -> Option<u8> {
        match self.counts.lock_spinning()[index] {
            REF_UNSET => None,
            count => Some(count),
        }
    }
    pub fn reset(&self, index: usize) {
        self.counts.lock_spinning()[index] = 0;
    }
    /// Mark a freshly allocated page as having one owner.
    pub fn claim(&self, index: usize) {
        let mut counts = self.counts.lock_spinning();
        debug_assert_eq!(counts[index], 0, "kalloc: page on free list was in use");
        counts[index] = 1;
    }
    pub fn increment(&self, index: usize, delta: u8) -> u8 {
        let mut counts = self.counts.lock_spinning();
        let count = counts[index];
        if count == 0 || count == REF_UNSET {
            panic!("incref: page not allocated");
        }
        match count.checked_add(delta).filter(|&c| c <= REF_MAX) {
            Some(next) => {
                counts[index] = next;
                next
            }
            None => panic!("incref: overflow"),
        }
    }
    /// Drop `delta` references. Cannot drop the last one; that is
    /// [`PageRefTable::release`]'s job.
    pub fn decrement(&self, index: usize, delta: u8) -> u8 {
        let mut counts = self.counts.lock_spinning();
        let count = counts[index];
        if count == REF_UNSET || count <= delta {
            panic!("decref: would drop the last reference");
        }
        counts[index] = count - delta;
        count - delta
    }
    /// Drop one reference on behalf of kfree.
    pub fn release(&self, index: usize) -> Release {
        let mut counts = self.counts.lock_spinning();
        match counts[index] {
            0 => panic!("kfree: page not allocated"),
            // A page freed for the first time, or its only owner.
            REF_UNSET | 1 => {
                counts[index] = 0;
                Release::Reclaim
            }
            count => {
                counts[index] = count - 1;
                Release::Shared(count - 1)
            }
        }
    }
}
