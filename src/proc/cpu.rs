//! Per-hart state.
//!
//! Each host thread acts as one hart. The hart id is assigned round-robin
//! the first time a thread asks for it, or pinned with [`Cpu::bind`].

use crate::NCPU;
use core::{
    cell::Cell,
    sync::atomic::{AtomicUsize, Ordering},
};

static NEXT_HART: AtomicUsize = AtomicUsize::new(0);

thread_local! {
    static CPU: Cpu = const { Cpu::new() };
}

pub struct Cpu {
    id: Cell<Option<usize>>,
    /// Depth of push_intr_off() nesting.
    interrupt_disable_layers: Cell<u32>,
    /// Were interrupts enabled before push_intr_off()?
    previous_interrupts_enabled: Cell<bool>,
    interrupts_enabled: Cell<bool>,
}
impl Cpu {
    const fn new() -> Cpu {
        Cpu {
            id: Cell::new(None),
            interrupt_disable_layers: Cell::new(0),
            previous_interrupts_enabled: Cell::new(false),
            interrupts_enabled: Cell::new(true),
        }
    }
    /// The id of the hart this thread runs on.
    pub fn current_id() -> usize {
        CPU.with(|cpu| match cpu.id.get() {
            Some(id) => id,
            None => {
                let id = NEXT_HART.fetch_add(1, Ordering::Relaxed) % NCPU;
                cpu.id.set(Some(id));
                id
            }
        })
    }
    /// Pin the calling thread to hart `id`.
    pub fn bind(id: usize) {
        assert!(id < NCPU, "bind: no hart {}", id);
        CPU.with(|cpu| cpu.id.set(Some(id)));
    }
    pub fn interrupt_disable_layers() -> u32 {
        CPU.with(|cpu| cpu.interrupt_disable_layers.get())
    }
    /// Are device interrupts enabled?
    pub fn intr_get() -> bool {
        CPU.with(|cpu| cpu.interrupts_enabled.get())
    }
}

/// push_intr_off/pop_intr_off are like intr_off()/intr_on() except that they are matched:
/// it takes two pop_intr_off()s to undo two push_intr_off()s. Also, if interrupts
/// are initially off, then push_intr_off, pop_intr_off leaves them off.
pub fn push_intr_off() {
    CPU.with(|cpu| {
        let old = cpu.interrupts_enabled.replace(false);
        if cpu.interrupt_disable_layers.get() == 0 {
            cpu.previous_interrupts_enabled.set(old);
        }
        cpu.interrupt_disable_layers
            .set(cpu.interrupt_disable_layers.get() + 1);
    });
}

pub fn pop_intr_off() {
    CPU.with(|cpu| {
        if cpu.interrupts_enabled.get() {
            panic!("pop_intr_off - interruptible");
        }
        let layers = cpu.interrupt_disable_layers.get();
        if layers < 1 {
            panic!("pop_intr_off");
        }
        cpu.interrupt_disable_layers.set(layers - 1);
        if layers == 1 && cpu.previous_interrupts_enabled.get() {
            cpu.interrupts_enabled.set(true);
        }
    });
}
