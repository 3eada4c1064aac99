pub mod lock;
pub mod mutex;
pub mod sleeplock;
