pub mod cpu;
pub mod process;
pub mod scheduler;
