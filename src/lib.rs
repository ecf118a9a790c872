//! Shared-resource core of the xv6 kernel: the disk buffer cache and
//! the per-hart physical page allocator.
//!
//! Both are built once at boot by [`boot`] and live for as long as the
//! kernel does. Everything the core needs from the rest of the kernel
//! goes through [`hal::Platform`] and [`hal::hardware::BlockDevice`].

#![cfg_attr(not(feature = "std"), no_std)]
#![allow(clippy::missing_safety_doc)]

extern crate alloc;
extern crate core;

pub mod hal;
pub mod io;
mod klog;
pub mod mem;
pub mod param;
pub mod sync;

pub use crate::{
    hal::hardware::{BlockDevice, Direction, DiskError, RamDisk},
    io::{bio::BufferCache, buf::BlockKey},
    mem::{kalloc::Kmem, AllocError, MemoryRange, Page},
};

/// The kernel's shared resources.
pub struct Kernel<D> {
    pub kmem: Kmem,
    pub bcache: BufferCache<D>,
}

/// Install the platform hooks and build the page allocator and the
/// buffer cache.
///
/// The calling hart receives every page of `memory`.
///
/// # Safety
/// `memory` must be unused physical memory that stays writable for the
/// life of the kernel.
pub unsafe fn boot<D: BlockDevice>(
    platform: &'static dyn hal::Platform,
    disk: D,
    memory: MemoryRange,
) -> Kernel<D> {
    hal::install(platform);

    let kmem = Kmem::new();
    kmem.init(memory);

    Kernel {
        kmem,
        bcache: BufferCache::new(disk),
    }
}
