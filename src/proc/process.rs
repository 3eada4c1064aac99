use core::{
    cell::Cell,
    fmt,
    num::NonZeroU32,
    sync::atomic::{AtomicU32, Ordering},
};

static NEXT_PID: AtomicU32 = AtomicU32::new(1);

thread_local! {
    static PID: Cell<Option<Pid>> = const { Cell::new(None) };
}

/// Identity of the kernel thread that holds a sleep lock.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Pid(NonZeroU32);
impl Pid {
    /// The pid of the calling thread, allocated on first use.
    pub fn current() -> Pid {
        PID.with(|pid| match pid.get() {
            Some(p) => p,
            None => {
                let raw = NEXT_PID.fetch_add(1, Ordering::Relaxed);
                let Some(p) = Pid::from_raw(raw) else {
                    panic!("allocpid: pid counter wrapped");
                };
                pid.set(Some(p));
                p
            }
        })
    }
    pub fn as_u32(self) -> u32 {
        self.0.get()
    }
    pub fn from_raw(raw: u32) -> Option<Pid> {
        NonZeroU32::new(raw).map(Pid)
    }
}
impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
