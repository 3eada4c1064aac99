//! Architecture-agnostic memory layout.

// The kernel uses physical memory as so:
// 80000000 - kernel text and data
// end      - start of kernel page allocation data
// PHYSTOP  - end of RAM used by the kernel

/// Bytes per page.
pub const PAGE_SIZE: usize = 4096;
/// The kernel starts here.
pub const KERNEL_BASE: usize = 0x8000_0000;
/// First address after the kernel image; page allocation starts here.
pub const KERNEL_END: usize = KERNEL_BASE + 0x40_0000;
/// The end of physical memory handed to the page allocator by default.
///
/// Real hardware has 128 MiB; the host-side default keeps the backing
/// store small.
pub const PHYSICAL_END: usize = KERNEL_END + (4 * 1024 * 1024);

pub fn round_up_page(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

pub fn round_down_page(addr: usize) -> usize {
    addr & !(PAGE_SIZE - 1)
}

pub fn is_page_aligned(addr: usize) -> bool {
    addr & (PAGE_SIZE - 1) == 0
}
