//! Buffer cache.
//!
//! The buffer cache holds cached copies of disk block contents in a
//! fixed array of buffers. Caching disk blocks in memory reduces the
//! number of disk reads and also provides a synchronization point for
//! disk blocks used by multiple processes.
//!
//! Buffers are found through a hash table keyed by block number. Each
//! bucket has its own lock, so lookups of different blocks rarely
//! contend. Only a miss takes the cache-wide lock, which serializes
//! evictions and guarantees a block is never cached twice.
//!
//! Interface:
//! - To get a buffer for a particular disk block, call `read`.
//! - After changing buffer data, call `write` to write it to disk.
//! - When done with the buffer, call `release` or drop it.
//! - Do not use the buffer after releasing it.
//! - Only one process at a time can use a buffer,
//!   so do not keep them longer than necessary.

use super::buf::{BlockKey, Buffer, BufferBody, BufferId};
use crate::{
    hal::hardware::{BlockDevice, Direction, DiskError},
    klog::{kdebug, kerror, kwarn},
    param::{self, BSIZE},
    sync::{
        sleeplock::SleeplockGuard,
        spinlock::{Spinlock, SpinlockGuard},
    },
};
use arrayvec::ArrayVec;
use core::{
    mem::ManuallyDrop,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicU64, Ordering},
};

/// Bookkeeping for one buffer. Lives in, and is protected by, the
/// bucket the buffer hangs in.
#[derive(Copy, Clone, Debug)]
struct Slot {
    id: BufferId,
    /// `None` until the buffer caches its first block.
    key: Option<BlockKey>,
    refcnt: u32,
    /// Time of the last drop to zero references, for LRU eviction.
    last_used: u64,
}

struct Bucket<const NBUF: usize> {
    slots: ArrayVec<Slot, NBUF>,
}
impl<const NBUF: usize> Bucket<NBUF> {
    const fn new() -> Bucket<NBUF> {
        Bucket {
            slots: ArrayVec::new_const(),
        }
    }
    fn find(&self, key: BlockKey) -> Option<usize> {
        self.slots.iter().position(|slot| slot.key == Some(key))
    }
    /// Take a reference to the buffer caching `key`, if there is one.
    fn take_ref(&mut self, key: BlockKey) -> Option<BufferId> {
        let pos = self.find(key)?;
        let slot = &mut self.slots[pos];
        slot.refcnt += 1;
        Some(slot.id)
    }
    /// Least recently used unreferenced buffer. Ties go to the first one.
    fn oldest_unused(&self) -> Option<usize> {
        let mut oldest: Option<(usize, u64)> = None;
        for (pos, slot) in self.slots.iter().enumerate() {
            if slot.refcnt != 0 {
                continue;
            }
            match oldest {
                Some((_, last_used)) if last_used <= slot.last_used => {}
                _ => oldest = Some((pos, slot.last_used)),
            }
        }
        oldest.map(|(pos, _)| pos)
    }
    fn slot_mut(&mut self, id: BufferId) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }
}

/// The eviction candidate, together with the lock on its bucket.
struct Victim<'a, const NBUF: usize> {
    bucket: usize,
    pos: usize,
    last_used: u64,
    guard: SpinlockGuard<'a, Bucket<NBUF>>,
}

/// Walk over every bucket looking for the least recently used buffer
/// nobody references.
///
/// The winner's bucket stays locked so the winner cannot be taken
/// before it is recycled. Every other bucket is unlocked as soon as it
/// has been looked at, so between steps at most one bucket lock is held.
/// Only the evicting thread, which holds the cache-wide lock, ever holds
/// two bucket locks at once.
struct EvictionScan<'a, const NBUF: usize> {
    winner: Option<Victim<'a, NBUF>>,
}
impl<'a, const NBUF: usize> EvictionScan<'a, NBUF> {
    fn new() -> EvictionScan<'a, NBUF> {
        EvictionScan { winner: None }
    }
    fn visit(&mut self, bucket: usize, guard: SpinlockGuard<'a, Bucket<NBUF>>) {
        let older = guard.oldest_unused().filter(|&pos| match &self.winner {
            Some(winner) => guard.slots[pos].last_used < winner.last_used,
            None => true,
        });

        match older {
            Some(pos) => {
                let last_used = guard.slots[pos].last_used;
                self.promote(Victim {
                    bucket,
                    pos,
                    last_used,
                    guard,
                });
            }
            None => drop(guard),
        }
    }
    /// Make `victim` the winner, unlocking the previous winner's bucket.
    fn promote(&mut self, victim: Victim<'a, NBUF>) {
        let previous = self.winner.replace(victim);
        drop(previous);
    }
    fn finish(self) -> Option<Victim<'a, NBUF>> {
        self.winner
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct BcacheStats {
    /// Lookups that found the block cached.
    pub hits: u64,
    /// Lookups that had to recycle a buffer.
    pub misses: u64,
}

pub struct BufferCache<
    D,
    const NBUF: usize = { param::NBUF },
    const NBUCKET: usize = { param::NBUCKET },
> {
    disk: D,
    /// Serializes evictions.
    lock: Spinlock<()>,
    buckets: [Spinlock<Bucket<NBUF>>; NBUCKET],
    buf: [Buffer; NBUF],
    /// Logical clock for `last_used`.
    ticks: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl<D, const NBUF: usize, const NBUCKET: usize> BufferCache<D, NBUF, NBUCKET> {
    pub fn new(disk: D) -> BufferCache<D, NBUF, NBUCKET> {
        const { assert!(NBUCKET > 0, "bcache: no buckets") };

        let buckets: [Spinlock<Bucket<NBUF>>; NBUCKET] =
            core::array::from_fn(|_| Spinlock::new("bcache_bkt", Bucket::new()));

        // Hang all buffers in the first bucket.
        {
            let mut first = buckets[0].lock();
            for i in 0..NBUF {
                first.slots.push(Slot {
                    id: BufferId(i),
                    key: None,
                    refcnt: 0,
                    last_used: 0,
                });
            }
        }

        BufferCache {
            disk,
            lock: Spinlock::new("bcache", ()),
            buckets,
            buf: core::array::from_fn(|_| Buffer::new()),
            ticks: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn disk(&self) -> &D {
        &self.disk
    }

    fn hash(blockno: u32) -> usize {
        blockno as usize % NBUCKET
    }

    fn bucket_for(&self, key: BlockKey) -> &Spinlock<Bucket<NBUF>> {
        &self.buckets[Self::hash(key.blockno)]
    }

    fn tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Look through the buffer cache for block on device dev.
    ///
    /// If not found, recycle a buffer.
    /// In either case, return locked buffer.
    fn get(&self, key: BlockKey) -> ExclusiveBuffer<'_, D, NBUF, NBUCKET> {
        let target = Self::hash(key.blockno);

        // Is the block already cached?
        let hit = self.buckets[target].lock().take_ref(key);
        if let Some(id) = hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return self.checkout(id, key);
        }

        // Not cached.
        let eviction = self.lock.lock();

        // Another thread may have cached it while we were
        // waiting for the eviction lock.
        let hit = self.buckets[target].lock().take_ref(key);
        if let Some(id) = hit {
            drop(eviction);
            self.hits.fetch_add(1, Ordering::Relaxed);
            return self.checkout(id, key);
        }

        let id = self.recycle(key, target);
        drop(eviction);
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.checkout(id, key)
    }

    /// Give the least recently used free buffer the identity `key`
    /// and move it into bucket `target`. Caller holds the eviction lock.
    fn recycle(&self, key: BlockKey, target: usize) -> BufferId {
        let mut scan = EvictionScan::new();
        for (index, bucket) in self.buckets.iter().enumerate() {
            scan.visit(index, bucket.lock());
        }

        let Victim {
            bucket,
            pos,
            mut guard,
            ..
        } = match scan.finish() {
            Some(victim) => victim,
            None => {
                kerror!("bget: no free buffer for block {}", key);
                panic!("bget: no buffers");
            }
        };

        let now = self.tick();
        let mut slot = guard.slots[pos];
        let evicted = slot.key;
        slot.key = Some(key);
        slot.refcnt = 1;
        slot.last_used = now;

        if bucket == target {
            guard.slots[pos] = slot;
            drop(guard);
        } else {
            guard.slots.remove(pos);
            drop(guard);
            self.buckets[target].lock().slots.push(slot);
        }

        kdebug!(
            "bcache: buffer {} recycled from {:?} to {} (bucket {} -> {})",
            slot.id.as_index(),
            evicted,
            key,
            bucket,
            target
        );
        slot.id
    }

    fn checkout(&self, id: BufferId, key: BlockKey) -> ExclusiveBuffer<'_, D, NBUF, NBUCKET> {
        ExclusiveBuffer {
            cache: self,
            id,
            key,
            body: ManuallyDrop::new(self.buf[id.as_index()].body.lock()),
        }
    }

    /// Drop one reference to buffer `id`. Reaching zero makes it the
    /// most recently used candidate for eviction.
    fn put(&self, id: BufferId, key: BlockKey, tag: &str) {
        let mut bucket = self.bucket_for(key).lock();
        let slot = match bucket.slot_mut(id) {
            Some(slot) if slot.refcnt > 0 => slot,
            _ => panic!("{}", tag),
        };
        slot.refcnt -= 1;
        if slot.refcnt == 0 {
            slot.last_used = self.tick();
        }
    }

    /// Release a pin taken with [`ExclusiveBuffer::pin`].
    pub fn unpin(&self, pin: BufferPin) {
        self.put(pin.id, pin.key, "bunpin");
    }

    /// Current reference count of the buffer caching `key`.
    pub fn refcnt(&self, dev: u32, blockno: u32) -> Option<u32> {
        let key = BlockKey::new(dev, blockno);
        let bucket = self.bucket_for(key).lock();
        bucket.find(key).map(|pos| bucket.slots[pos].refcnt)
    }

    /// Whether block `blockno` of `dev` is cached.
    pub fn contains(&self, dev: u32, blockno: u32) -> bool {
        self.refcnt(dev, blockno).is_some()
    }

    /// Blocks cached right now, bucket by bucket.
    ///
    /// Buckets are locked one at a time, so the result is only a
    /// consistent picture when nobody is using the cache.
    pub fn cached_blocks(&self) -> ArrayVec<BlockKey, NBUF> {
        let mut blocks = ArrayVec::new();
        for bucket in &self.buckets {
            let bucket = bucket.lock();
            blocks.extend(bucket.slots.iter().filter_map(|slot| slot.key));
        }
        blocks
    }

    pub fn stats(&self) -> BcacheStats {
        BcacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

impl<D: BlockDevice, const NBUF: usize, const NBUCKET: usize> BufferCache<D, NBUF, NBUCKET> {
    /// Return a locked buf with the contents of the indicated block.
    pub fn read(&self, dev: u32, blockno: u32) -> Result<ExclusiveBuffer<'_, D, NBUF, NBUCKET>, DiskError> {
        let key = BlockKey::new(dev, blockno);
        let mut b = self.get(key);
        if !b.is_valid() {
            // A failed transfer may leave data half overwritten.
            b.body.loaded = None;
            if let Err(err) = self.disk.transfer(key, &mut b.body.data, Direction::Read) {
                kwarn!("bread: block {}: {}", key, err);
                return Err(err);
            }
            b.body.loaded = Some(key);
        }
        Ok(b)
    }
}

/// A buffer checked out to one caller, with its sleep lock held.
///
/// Dropping it releases the buffer.
pub struct ExclusiveBuffer<
    'a,
    D,
    const NBUF: usize = { param::NBUF },
    const NBUCKET: usize = { param::NBUCKET },
> {
    cache: &'a BufferCache<D, NBUF, NBUCKET>,
    id: BufferId,
    key: BlockKey,
    body: ManuallyDrop<SleeplockGuard<'a, BufferBody>>,
}

impl<'a, D, const NBUF: usize, const NBUCKET: usize> ExclusiveBuffer<'a, D, NBUF, NBUCKET> {
    pub fn key(&self) -> BlockKey {
        self.key
    }
    pub fn dev(&self) -> u32 {
        self.key.dev
    }
    pub fn blockno(&self) -> u32 {
        self.key.blockno
    }
    pub fn id(&self) -> BufferId {
        self.id
    }
    /// Has data been read from disk?
    pub fn is_valid(&self) -> bool {
        self.body.loaded == Some(self.key)
    }
    /// Keep the buffer cached after it is released, until the pin is
    /// handed back to [`BufferCache::unpin`].
    pub fn pin(&self) -> BufferPin {
        let mut bucket = self.cache.bucket_for(self.key).lock();
        match bucket.slot_mut(self.id) {
            Some(slot) => slot.refcnt += 1,
            None => panic!("bpin"),
        }
        BufferPin {
            id: self.id,
            key: self.key,
        }
    }
    /// Release a locked buffer.
    pub fn release(self) {
        drop(self);
    }
}

impl<'a, D: BlockDevice, const NBUF: usize, const NBUCKET: usize> ExclusiveBuffer<'a, D, NBUF, NBUCKET> {
    /// Write the buffer's contents to disk. Must be locked.
    pub fn write(&mut self) -> Result<(), DiskError> {
        // Unreachable while the guard is !Send; kept as the xv6 check.
        if !self.body.holding() {
            panic!("bwrite");
        }
        let key = self.key;
        self.cache
            .disk
            .transfer(key, &mut self.body.data, Direction::Write)
            .map_err(|err| {
                kwarn!("bwrite: block {}: {}", key, err);
                err
            })
    }
}

impl<'a, D, const NBUF: usize, const NBUCKET: usize> Deref for ExclusiveBuffer<'a, D, NBUF, NBUCKET> {
    type Target = [u8; BSIZE];

    fn deref(&self) -> &Self::Target {
        &self.body.data
    }
}
impl<'a, D, const NBUF: usize, const NBUCKET: usize> DerefMut for ExclusiveBuffer<'a, D, NBUF, NBUCKET> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.body.data
    }
}
impl<'a, D, const NBUF: usize, const NBUCKET: usize> Drop for ExclusiveBuffer<'a, D, NBUF, NBUCKET> {
    fn drop(&mut self) {
        // Unreachable while the guard is !Send; kept as the xv6 check.
        if !self.body.holding() {
            panic!("brelse");
        }
        unsafe { ManuallyDrop::drop(&mut self.body) };
        self.cache.put(self.id, self.key, "brelse");
    }
}

/// A reference that keeps a buffer from being recycled.
#[must_use]
#[derive(Debug, PartialEq, Eq)]
pub struct BufferPin {
    id: BufferId,
    key: BlockKey,
}
impl BufferPin {
    pub fn key(&self) -> BlockKey {
        self.key
    }
}
