//! Recoverable errors.
//!
//! Broken kernel invariants are not errors; they panic.

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("buffer cache needs at least one buffer per bin ({nbuf} buffers, {nbin} bins)")]
    TooFewBuffers { nbuf: usize, nbin: usize },
    #[error("bin count {0} outside 1..={max}", max = crate::NBUFBIN)]
    BadBinCount(usize),
    #[error("domain count {0} outside 1..={max}", max = crate::NCPU)]
    BadDomainCount(usize),
    #[error("physical range {start:#x}..{end:#x} holds no whole page")]
    EmptyRange { start: usize, end: usize },
    #[error("no such device {0}")]
    NoDevice(u32),
    #[error("block {blockno} out of range on device {dev}")]
    BlockOutOfRange { dev: u32, blockno: u32 },
}
