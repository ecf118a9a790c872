pub mod kalloc;

pub use kalloc::{AllocError, Kmem, KmemStats, Page};

use crate::param::PGSIZE;

pub const fn pg_round_up(addr: usize) -> usize {
    (addr + PGSIZE - 1) & !(PGSIZE - 1)
}

pub const fn pg_round_down(addr: usize) -> usize {
    addr & !(PGSIZE - 1)
}

/// A span of physical memory, `[start, end)`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MemoryRange {
    pub start: usize,
    pub end: usize,
}
impl MemoryRange {
    pub const fn new(start: usize, end: usize) -> MemoryRange {
        MemoryRange { start, end }
    }
    /// The largest page-aligned range inside this one.
    pub const fn page_aligned(&self) -> MemoryRange {
        let start = pg_round_up(self.start);
        let end = pg_round_down(self.end);
        if end < start {
            MemoryRange { start, end: start }
        } else {
            MemoryRange { start, end }
        }
    }
    /// Number of whole pages in the range.
    pub const fn pages(&self) -> usize {
        let aligned = self.page_aligned();
        (aligned.end - aligned.start) / PGSIZE
    }
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end
    }
}
