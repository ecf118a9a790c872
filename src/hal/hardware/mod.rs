//! Device drivers and hardware implementations.

pub mod ramdisk;

pub use ramdisk::RamDisk;

use crate::{io::buf::BlockKey, param::BSIZE};
use core::fmt;

/// Which way a block transfer moves data.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Disk to buffer.
    Read,
    /// Buffer to disk.
    Write,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DiskError {
    /// The device number does not name this disk.
    NoSuchDevice(u32),
    /// The block lies past the end of the disk.
    OutOfRange(u32),
    /// The device reported a failed transfer.
    Io,
}
impl fmt::Display for DiskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiskError::NoSuchDevice(dev) => write!(f, "no such device {}", dev),
            DiskError::OutOfRange(blockno) => write!(f, "block {} out of range", blockno),
            DiskError::Io => write!(f, "disk transfer failed"),
        }
    }
}

/// A disk the buffer cache can read blocks from and write blocks to.
///
/// Transfers are synchronous: when `transfer` returns, the data has
/// been moved.
pub trait BlockDevice: Sync {
    fn transfer(
        &self,
        key: BlockKey,
        data: &mut [u8; BSIZE],
        direction: Direction,
    ) -> Result<(), DiskError>;
}

impl<D: BlockDevice + ?Sized> BlockDevice for &D {
    fn transfer(
        &self,
        key: BlockKey,
        data: &mut [u8; BSIZE],
        direction: Direction,
    ) -> Result<(), DiskError> {
        (**self).transfer(key, data, direction)
    }
}
