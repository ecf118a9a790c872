//! Physical memory allocator, for user processes,
//! kernel stacks, page-table pages,
//! and pipe buffers. Allocates whole 4096-byte pages.
//!
//! Every hart owns a free list behind its own lock, so harts allocating
//! and freeing concurrently do not contend. A hart whose list runs dry
//! steals a page from another hart. Freed pages always go to the list of
//! the hart that frees them.

use super::{pg_round_down, pg_round_up, MemoryRange};
use crate::{
    hal::interrupt::current_hart,
    klog::{kinfo, ktrace, kwarn},
    param::{self, ALLOC_JUNK, FREE_JUNK, PGSIZE},
    sync::spinlock::Spinlock,
};
use core::{
    alloc::{GlobalAlloc, Layout},
    fmt,
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    ptr::{self, NonNull},
    sync::atomic::{AtomicUsize, Ordering},
};
use spin::Once;

/// Header threaded through the first word of every free page.
#[repr(C)]
struct Run {
    next: Option<NonNull<Run>>,
}

struct FreeList {
    head: Option<NonNull<Run>>,
    len: usize,
}
// The pages on the list belong to the list, not to any thread.
unsafe impl Send for FreeList {}

impl FreeList {
    const fn new() -> FreeList {
        FreeList { head: None, len: 0 }
    }
    /// Safety: `run` must be an unused, writable page owned by the caller.
    unsafe fn push(&mut self, run: NonNull<Run>) {
        run.as_ptr().write(Run { next: self.head });
        self.head = Some(run);
        self.len += 1;
    }
    fn pop(&mut self) -> Option<NonNull<Run>> {
        let run = self.head?;
        self.head = unsafe { (*run.as_ptr()).next };
        self.len -= 1;
        Some(run)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AllocError {
    /// Every hart's free list is empty.
    Exhausted,
}
impl fmt::Display for AllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllocError::Exhausted => write!(f, "out of physical pages"),
        }
    }
}

/// One page of physical memory, owned by whoever holds this handle.
///
/// Pages go back through [`Kmem::kfree`]. Dropping the handle instead
/// leaks the page and logs a warning; it stays counted as in use.
pub struct Page {
    ptr: NonNull<[u8; PGSIZE]>,
}
unsafe impl Send for Page {}
unsafe impl Sync for Page {}

impl Page {
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr().cast()
    }
    /// Give up the handle without freeing the page.
    pub fn into_raw(self) -> NonNull<u8> {
        ManuallyDrop::new(self).ptr.cast()
    }
    /// Take back a page given up by `into_raw`.
    ///
    /// # Safety
    /// `ptr` must come from `into_raw` and no other handle to the page may exist.
    pub unsafe fn from_raw(ptr: NonNull<u8>) -> Page {
        Page { ptr: ptr.cast() }
    }
}
impl Deref for Page {
    type Target = [u8; PGSIZE];

    fn deref(&self) -> &Self::Target {
        unsafe { self.ptr.as_ref() }
    }
}
impl DerefMut for Page {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { self.ptr.as_mut() }
    }
}
impl Drop for Page {
    fn drop(&mut self) {
        kwarn!("kalloc: page {:#x} dropped without kfree, leaking it", self.addr());
    }
}
impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Page({:#x})", self.addr())
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct KmemStats {
    /// Pages handed to the allocator at init.
    pub total: usize,
    /// Pages currently allocated.
    pub in_use: usize,
    /// Pages on all free lists.
    pub free: usize,
    /// Allocations served from another hart's list.
    pub steals: usize,
}

pub struct Kmem<const NCPU: usize = { param::NCPU }> {
    /// Per-CPU free lists.
    cpus: [Spinlock<FreeList>; NCPU],
    range: Once<MemoryRange>,
    total: AtomicUsize,
    in_use: AtomicUsize,
    steals: AtomicUsize,
}

impl<const NCPU: usize> Kmem<NCPU> {
    pub const fn new() -> Kmem<NCPU> {
        Kmem {
            cpus: [const { Spinlock::new("kmem", FreeList::new()) }; NCPU],
            range: Once::new(),
            total: AtomicUsize::new(0),
            in_use: AtomicUsize::new(0),
            steals: AtomicUsize::new(0),
        }
    }

    /// Hand every whole page of `range` to the calling hart's free list.
    ///
    /// Only the bootstrapping hart starts out with memory; the others
    /// steal until frees spread pages around.
    ///
    /// # Safety
    /// `range` must be memory nothing else uses, writable for as long as
    /// the allocator lives.
    pub unsafe fn init(&self, range: MemoryRange) {
        let hart = current_hart();
        let start = pg_round_up(range.start);
        let end = pg_round_down(range.end).max(start);

        let mut first = false;
        self.range.call_once(|| {
            first = true;
            MemoryRange::new(start, end)
        });
        if !first {
            panic!("kinit");
        }

        let cpu = self.cpu(hart);
        let mut p = start;
        while p + PGSIZE <= end {
            ptr::write_bytes(p as *mut u8, FREE_JUNK, PGSIZE);
            cpu.lock().push(NonNull::new_unchecked(p as *mut Run));
            self.total.fetch_add(1, Ordering::Relaxed);
            p += PGSIZE;
        }

        kinfo!(
            "kalloc: {} pages in [{:#x}, {:#x}) on hart {}",
            self.total.load(Ordering::Relaxed),
            start,
            end,
            hart
        );
    }

    fn cpu(&self, hart: usize) -> &Spinlock<FreeList> {
        match self.cpus.get(hart) {
            Some(cpu) => cpu,
            None => panic!("kalloc: hart {} out of range", hart),
        }
    }

    /// Allocate one page for the calling hart.
    pub fn kalloc(&self) -> Result<Page, AllocError> {
        self.kalloc_on(current_hart())
    }

    /// Allocate one page, treating `hart`'s list as local.
    ///
    /// The caller may have migrated since it read `hart`; that only
    /// decides which list is tried first and which is skipped by the steal.
    pub fn kalloc_on(&self, hart: usize) -> Result<Page, AllocError> {
        let local = self.cpu(hart).lock().pop();
        let run = match local.or_else(|| self.steal(hart)) {
            Some(run) => run,
            None => {
                kwarn!("kalloc: out of memory on hart {}", hart);
                return Err(AllocError::Exhausted);
            }
        };

        self.in_use.fetch_add(1, Ordering::Relaxed);
        let mut page = Page { ptr: run.cast() };
        // Fill with junk.
        page.fill(ALLOC_JUNK);
        Ok(page)
    }

    /// Take one page from the first other hart that has any.
    ///
    /// Only one list lock is held at a time.
    fn steal(&self, hart: usize) -> Option<NonNull<Run>> {
        for victim in (1..NCPU).map(|i| (hart + i) % NCPU) {
            let stolen = self.cpus[victim].lock().pop();
            if let Some(run) = stolen {
                self.steals.fetch_add(1, Ordering::Relaxed);
                ktrace!("kalloc: hart {} stole {:p} from hart {}", hart, run, victim);
                return Some(run);
            }
        }
        None
    }

    /// Free a page on the calling hart.
    pub fn kfree(&self, page: Page) {
        self.kfree_on(current_hart(), page)
    }

    /// Free a page onto `hart`'s list.
    pub fn kfree_on(&self, hart: usize, page: Page) {
        let addr = page.addr();
        let range = match self.range.get() {
            Some(range) => range,
            None => panic!("kfree: allocator not initialized"),
        };
        if addr % PGSIZE != 0 || !range.contains(addr) {
            panic!("kfree");
        }
        let cpu = self.cpu(hart);

        let run = page.into_raw().cast::<Run>();
        unsafe {
            // Fill with junk to catch dangling refs.
            ptr::write_bytes(run.as_ptr().cast::<u8>(), FREE_JUNK, PGSIZE);
            cpu.lock().push(run);
        }
        self.in_use.fetch_sub(1, Ordering::Relaxed);
    }

    /// Pages on `hart`'s free list right now.
    pub fn free_pages(&self, hart: usize) -> usize {
        self.cpu(hart).lock().len
    }

    /// The managed range, once `init` has run.
    pub fn range(&self) -> Option<MemoryRange> {
        self.range.get().copied()
    }

    /// Only consistent while no allocation or free is in flight.
    pub fn stats(&self) -> KmemStats {
        KmemStats {
            total: self.total.load(Ordering::Relaxed),
            in_use: self.in_use.load(Ordering::Relaxed),
            free: self.cpus.iter().map(|cpu| cpu.lock().len).sum(),
            steals: self.steals.load(Ordering::Relaxed),
        }
    }
}

impl<const NCPU: usize> Default for Kmem<NCPU> {
    fn default() -> Kmem<NCPU> {
        Kmem::new()
    }
}

/// Single pages only; anything bigger or more aligned gets null.
unsafe impl<const NCPU: usize> GlobalAlloc for Kmem<NCPU> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        if layout.size() > PGSIZE || layout.align() > PGSIZE {
            return ptr::null_mut();
        }
        match self.kalloc() {
            Ok(page) => page.into_raw().as_ptr(),
            Err(_) => ptr::null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, _layout: Layout) {
        if let Some(ptr) = NonNull::new(ptr) {
            self.kfree(Page::from_raw(ptr));
        }
    }
}
