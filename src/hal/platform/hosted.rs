//! Hosted platform: OS threads play the part of kernel threads.
//!
//! Each thread carries its own hart index (default 0, see [`set_hart`])
//! and interrupt nesting depth. Sleep channels are backed by a single
//! condvar; every wakeup rouses every sleeper and they re-check.

use crate::hal::Platform;
use crate::mem::MemoryRange;
use crate::param::PGSIZE;
use core::cell::Cell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::{
    alloc::{alloc, handle_alloc_error, Layout},
    sync::{Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
};

pub static HOST: HostPlatform = HostPlatform::new();

static NEXT_THREAD: AtomicUsize = AtomicUsize::new(1);

std::thread_local! {
    static HART: Cell<usize> = const { Cell::new(0) };
    static INTR_DEPTH: Cell<usize> = const { Cell::new(0) };
    static THREAD: usize = NEXT_THREAD.fetch_add(1, Ordering::Relaxed);
}

pub struct HostPlatform {
    /// Bumped on every wakeup.
    generation: Mutex<u64>,
    woken: Condvar,
}
impl HostPlatform {
    pub const fn new() -> HostPlatform {
        HostPlatform {
            generation: Mutex::new(0),
            woken: Condvar::new(),
        }
    }
    fn generation(&self) -> MutexGuard<'_, u64> {
        self.generation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
impl Default for HostPlatform {
    fn default() -> HostPlatform {
        HostPlatform::new()
    }
}
impl Platform for HostPlatform {
    fn hart_id(&self) -> usize {
        HART.with(Cell::get)
    }
    fn thread_id(&self) -> usize {
        THREAD.with(|id| *id)
    }
    fn push_intr_off(&self) {
        INTR_DEPTH.with(|depth| depth.set(depth.get() + 1));
    }
    fn pop_intr_off(&self) {
        INTR_DEPTH.with(|depth| {
            if depth.get() < 1 {
                panic!("pop_intr_off");
            }
            depth.set(depth.get() - 1);
        });
    }
    fn sleep(&self, _chan: usize, release: &mut dyn FnMut()) {
        let generation = self.generation();
        let asleep_at = *generation;
        release();
        let _generation = self
            .woken
            .wait_while(generation, |g| *g == asleep_at)
            .unwrap_or_else(PoisonError::into_inner);
    }
    fn wakeup(&self, _chan: usize) {
        let mut generation = self.generation();
        *generation = generation.wrapping_add(1);
        self.woken.notify_all();
    }
}

/// Pretend the calling thread runs on `hart`.
pub fn set_hart(hart: usize) {
    HART.with(|h| h.set(hart));
}

/// Interrupt nesting depth of the calling thread.
pub fn intr_depth() -> usize {
    INTR_DEPTH.with(Cell::get)
}

/// Spawn a thread that runs on `hart`.
pub fn spawn_on_hart<F, T>(hart: usize, f: F) -> JoinHandle<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    thread::spawn(move || {
        set_hart(hart);
        f()
    })
}

/// Leak a page-aligned region of `pages` pages to stand in for physical memory.
pub fn leak_region(pages: usize) -> MemoryRange {
    let size = pages.max(1) * PGSIZE;
    let layout = match Layout::from_size_align(size, PGSIZE) {
        Ok(layout) => layout,
        Err(_) => panic!("leak_region: bad layout for {} pages", pages),
    };
    let start = unsafe { alloc(layout) };
    if start.is_null() {
        handle_alloc_error(layout);
    }
    let start = start as usize;
    MemoryRange::new(start, start + pages * PGSIZE)
}
