//! Ramdisk that keeps a whole disk image in memory.

use super::{BlockDevice, Direction, DiskError};
use crate::{io::buf::BlockKey, param::BSIZE, sync::spinlock::Spinlock};
use alloc::{vec, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

pub struct RamDisk {
    dev: u32,
    blocks: Spinlock<Vec<[u8; BSIZE]>>,
    reads: AtomicUsize,
    writes: AtomicUsize,
}
impl RamDisk {
    /// A zeroed disk of `nblocks` blocks answering to device `dev`.
    pub fn new(dev: u32, nblocks: usize) -> RamDisk {
        RamDisk {
            dev,
            blocks: Spinlock::new("ramdisk", vec![[0u8; BSIZE]; nblocks]),
            reads: AtomicUsize::new(0),
            writes: AtomicUsize::new(0),
        }
    }
    pub fn dev(&self) -> u32 {
        self.dev
    }
    pub fn nblocks(&self) -> usize {
        self.blocks.lock().len()
    }
    /// Number of completed reads.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
    /// Number of completed writes.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
    /// Copy of a block, bypassing the cache.
    pub fn peek(&self, blockno: u32) -> Option<[u8; BSIZE]> {
        self.blocks.lock().get(blockno as usize).copied()
    }
    /// Overwrite a block, bypassing the cache.
    pub fn poke(&self, blockno: u32, data: &[u8; BSIZE]) -> Result<(), DiskError> {
        let mut blocks = self.blocks.lock();
        let block = blocks
            .get_mut(blockno as usize)
            .ok_or(DiskError::OutOfRange(blockno))?;
        block.copy_from_slice(data);
        Ok(())
    }
}
impl BlockDevice for RamDisk {
    fn transfer(
        &self,
        key: BlockKey,
        data: &mut [u8; BSIZE],
        direction: Direction,
    ) -> Result<(), DiskError> {
        if key.dev != self.dev {
            return Err(DiskError::NoSuchDevice(key.dev));
        }

        let mut blocks = self.blocks.lock();
        let block = blocks
            .get_mut(key.blockno as usize)
            .ok_or(DiskError::OutOfRange(key.blockno))?;

        match direction {
            Direction::Read => {
                data.copy_from_slice(block);
                self.reads.fetch_add(1, Ordering::Relaxed);
            }
            Direction::Write => {
                block.copy_from_slice(data);
                self.writes.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
