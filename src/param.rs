use static_assertions::const_assert;

/// Maximum number of CPUs
pub const NCPU: usize = 8;
/// Max num of blocks any FS op writes
pub const MAXOPBLOCKS: usize = 10;
/// Size of disk block cache
pub const NBUF: usize = MAXOPBLOCKS * 3;
/// Number of hash buckets in the disk block cache
pub const NBUCKET: usize = 13;
/// Block size.
pub const BSIZE: usize = 1024;
/// Bytes per page
pub const PGSIZE: usize = 4096;
/// Bits of offset within a page
pub const PGSHIFT: usize = 12;

/// Fill byte for freshly allocated pages.
pub const ALLOC_JUNK: u8 = 5;
/// Fill byte for freed pages, to catch dangling refs.
pub const FREE_JUNK: u8 = 1;

const_assert!(NCPU > 0);
const_assert!(NBUCKET > 0);
const_assert!(NBUF >= NBUCKET);
const_assert!(PGSIZE == 1 << PGSHIFT);
const_assert!(BSIZE <= PGSIZE);
const_assert!(ALLOC_JUNK != FREE_JUNK);
