use kmemcache::{
    arch::mem::{KERNEL_END, PAGE_SIZE},
    mem::kalloc::{ALLOC_JUNK, FREE_JUNK},
    proc::cpu::Cpu,
    AllocPolicy, Kmem, MemoryRange, PhysAddr,
};
use parking_lot::Mutex;
use std::{collections::HashSet, mem::size_of};

fn kmem(pages: usize, policy: AllocPolicy) -> Kmem {
    Kmem::new(MemoryRange::with_pages(KERNEL_END, pages).unwrap(), policy).unwrap()
}

#[test]
fn shared_page_freed_from_another_domain() {
    let kmem = kmem(8, AllocPolicy::PerCpu { domains: 2 });
    let total = kmem.free_pages();

    let pa = std::thread::scope(|s| {
        s.spawn(|| {
            Cpu::bind(0);
            let pa = kmem.kalloc().unwrap();
            unsafe { kmem.page(pa)[0] = 0x42 };
            assert_eq!(kmem.increment_refcount(pa, 1), 2);
            pa
        })
        .join()
        .unwrap()
    });

    // The sharer on hart 1 lets go; the page stays out of every free list.
    std::thread::scope(|s| {
        s.spawn(|| {
            Cpu::bind(1);
            kmem.kfree(pa);
        });
    });
    assert_eq!(kmem.get_refcount(pa), 1);
    assert_eq!(kmem.free_pages(), total - 1);
    assert_eq!(unsafe { kmem.page(pa)[0] }, 0x42);

    // The last sharer frees it onto its own domain.
    let before = kmem.free_pages_in(1);
    std::thread::scope(|s| {
        s.spawn(|| {
            Cpu::bind(1);
            kmem.kfree(pa);
        });
    });
    assert_eq!(kmem.get_refcount(pa), 0);
    assert_eq!(kmem.free_pages(), total);
    assert_eq!(kmem.free_pages_in(1), before + 1);
    // The first word of a free page links it into the free list.
    let bytes = unsafe { &kmem.page(pa)[size_of::<usize>()..] };
    assert!(bytes.iter().all(|&b| b == FREE_JUNK));
}

#[test]
fn concurrent_sharing_keeps_counts_exact() {
    let kmem = kmem(64, AllocPolicy::PerCpu { domains: 4 });
    let total = kmem.free_pages();

    std::thread::scope(|s| {
        for hart in 0..4 {
            let kmem = &kmem;
            s.spawn(move || {
                Cpu::bind(hart);
                for _ in 0..100 {
                    let Some(pa) = kmem.kalloc() else { continue };
                    kmem.increment_refcount(pa, 2);
                    // Hand the extra references to other harts.
                    std::thread::scope(|inner| {
                        for other in 1..=2 {
                            inner.spawn(move || {
                                Cpu::bind((hart + other) % 4);
                                kmem.kfree(pa);
                            });
                        }
                    });
                    assert_eq!(kmem.get_refcount(pa), 1);
                    kmem.kfree(pa);
                }
            });
        }
    });

    assert_eq!(kmem.free_pages(), total);
}

#[test]
fn global_policy_hands_out_each_page_once() {
    let kmem = kmem(128, AllocPolicy::Global);
    let seen = Mutex::new(HashSet::new());
    std::thread::scope(|s| {
        for _ in 0..4 {
            s.spawn(|| {
                let mut mine: Vec<PhysAddr> = Vec::new();
                while let Some(pa) = kmem.kalloc() {
                    assert!(unsafe { kmem.page(pa) }.iter().all(|&b| b == ALLOC_JUNK));
                    mine.push(pa);
                }
                let mut seen = seen.lock();
                for pa in mine {
                    assert!(seen.insert(pa), "{:?} handed out twice", pa);
                }
            });
        }
    });
    assert_eq!(seen.lock().len(), 128);
    assert_eq!(kmem.free_pages(), 0);
    assert!(kmem.kalloc().is_none());

    for pa in seen.into_inner() {
        kmem.kfree(pa);
    }
    assert_eq!(kmem.free_pages(), 128);
    assert_eq!(kmem.total_pages() * PAGE_SIZE, kmem.range().end().as_usize() - KERNEL_END);
}
