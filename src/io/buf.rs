use crate::{param::BSIZE, sync::sleeplock::Sleeplock};
use core::fmt;

/// Identity of a disk block: device number and block number.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockKey {
    pub dev: u32,
    pub blockno: u32,
}
impl BlockKey {
    pub const fn new(dev: u32, blockno: u32) -> BlockKey {
        BlockKey { dev, blockno }
    }
}
impl fmt::Display for BlockKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.dev, self.blockno)
    }
}

/// Index of a buffer in the cache's buffer array.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);
impl BufferId {
    pub const fn as_index(self) -> usize {
        self.0
    }
}

/// What the sleep lock of a buffer protects.
pub struct BufferBody {
    /// Block whose on-disk contents `data` holds.
    ///
    /// The buffer's data is valid only while this matches the buffer's
    /// current identity; recycling a buffer leaves it stale.
    pub(crate) loaded: Option<BlockKey>,
    pub data: [u8; BSIZE],
}

pub struct Buffer {
    pub(crate) body: Sleeplock<BufferBody>,
}
impl Buffer {
    pub const fn new() -> Buffer {
        Buffer {
            body: Sleeplock::new(
                "buffer",
                BufferBody {
                    loaded: None,
                    data: [0u8; BSIZE],
                },
            ),
        }
    }
}
impl Default for Buffer {
    fn default() -> Buffer {
        Buffer::new()
    }
}
