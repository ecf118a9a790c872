use kcore::{
    io::{BufferCache, BufferPin},
    param::BSIZE,
    BlockKey, DiskError, RamDisk,
};
use proptest::prelude::*;
use std::{
    collections::HashSet,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
    time::Duration,
};

const DEV: u32 = 1;

/// Four buffers over the default bucket count.
type FourBuffers = BufferCache<RamDisk, 4>;

fn counter(data: &[u8; BSIZE]) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    u64::from_le_bytes(bytes)
}

fn assert_no_duplicates<D, const NBUF: usize, const NBUCKET: usize>(
    cache: &BufferCache<D, NBUF, NBUCKET>,
) {
    let blocks = cache.cached_blocks();
    let unique: HashSet<BlockKey> = blocks.iter().copied().collect();
    assert_eq!(unique.len(), blocks.len(), "duplicate cache entries: {:?}", blocks);
}

#[test]
fn oldest_release_is_evicted_first() {
    let cache = FourBuffers::new(RamDisk::new(DEV, 64));
    for blockno in 10..14 {
        cache.read(DEV, blockno).unwrap().release();
    }

    let b = cache.read(DEV, 14).unwrap();
    assert_eq!(b.blockno(), 14);
    drop(b);

    assert!(!cache.contains(DEV, 10));
    assert!(cache.contains(DEV, 14));
    for blockno in 11..14 {
        assert!(cache.contains(DEV, blockno));
    }
    assert_eq!(cache.disk().reads(), 5);
    assert_no_duplicates(&cache);
}

#[test]
fn cached_block_is_not_read_twice() {
    let disk = RamDisk::new(DEV, 8);
    disk.poke(2, &[9u8; BSIZE]).unwrap();
    let cache = BufferCache::<RamDisk, 4, 3>::new(disk);

    let b = cache.read(DEV, 2).unwrap();
    assert!(b.is_valid());
    assert_eq!(b[17], 9);
    b.release();

    let b = cache.read(DEV, 2).unwrap();
    assert_eq!(b[17], 9);
    drop(b);

    assert_eq!(cache.disk().reads(), 1);
    let stats = cache.stats();
    assert_eq!((stats.hits, stats.misses), (1, 1));
}

#[test]
fn write_reaches_disk_only_when_asked() {
    let cache = BufferCache::<RamDisk, 2, 1>::new(RamDisk::new(DEV, 8));

    let mut b = cache.read(DEV, 3).unwrap();
    b[0] = 0xaa;
    b.write().unwrap();
    b[1] = 0xbb;
    b.release();

    let on_disk = cache.disk().peek(3).unwrap();
    assert_eq!(on_disk[0], 0xaa);
    assert_eq!(on_disk[1], 0);
    assert_eq!(cache.disk().writes(), 1);

    // Still cached, so the unwritten change is visible.
    assert_eq!(cache.read(DEV, 3).unwrap()[1], 0xbb);
}

#[test]
fn disk_errors_reach_the_caller() {
    let cache = BufferCache::<RamDisk, 2, 1>::new(RamDisk::new(DEV, 8));
    assert_eq!(cache.read(DEV + 1, 0).err(), Some(DiskError::NoSuchDevice(DEV + 1)));
    assert_eq!(cache.read(DEV, 8).err(), Some(DiskError::OutOfRange(8)));

    // The failed buffers were released and can be recycled.
    let a = cache.read(DEV, 0).unwrap();
    let b = cache.read(DEV, 1).unwrap();
    assert_eq!((a.blockno(), b.blockno()), (0, 1));
}

#[test]
fn unwritten_data_does_not_outlive_a_failed_read() {
    let disk = RamDisk::new(DEV, 8);
    disk.poke(3, &[3u8; BSIZE]).unwrap();
    let cache = BufferCache::<RamDisk, 1, 1>::new(disk);

    let mut b = cache.read(DEV, 3).unwrap();
    b[0] = 0xee;
    b.release();

    assert_eq!(cache.read(DEV, 99).err(), Some(DiskError::OutOfRange(99)));
    assert_eq!(cache.read(DEV + 1, 3).err(), Some(DiskError::NoSuchDevice(DEV + 1)));

    let b = cache.read(DEV, 3).unwrap();
    assert!(b.is_valid());
    assert_eq!(b[0], 3);
    assert_eq!(cache.disk().reads(), 2);
}

#[test]
#[should_panic(expected = "bget: no buffers")]
fn running_out_of_buffers_panics() {
    let cache = BufferCache::<RamDisk, 2, 2>::new(RamDisk::new(DEV, 8));
    let _a = cache.read(DEV, 0).unwrap();
    let _b = cache.read(DEV, 1).unwrap();
    let _c = cache.read(DEV, 2);
}

#[test]
fn pinned_buffer_survives_eviction() {
    let cache = BufferCache::<RamDisk, 3, 2>::new(RamDisk::new(DEV, 32));

    let b = cache.read(DEV, 1).unwrap();
    let pin: BufferPin = b.pin();
    b.release();
    assert_eq!(cache.refcnt(DEV, 1), Some(1));

    for blockno in 2..20 {
        cache.read(DEV, blockno).unwrap().release();
        assert!(cache.contains(DEV, 1));
    }

    cache.unpin(pin);
    assert_eq!(cache.refcnt(DEV, 1), Some(0));
    // Unpinning counts as a use, so the two older buffers go first.
    for blockno in 20..22 {
        cache.read(DEV, blockno).unwrap().release();
        assert!(cache.contains(DEV, 1));
    }
    cache.read(DEV, 22).unwrap().release();
    assert!(!cache.contains(DEV, 1));
}

#[test]
fn second_reader_sleeps_until_release() {
    let cache = BufferCache::<RamDisk, 4, 3>::new(RamDisk::new(DEV, 8));
    let done = AtomicBool::new(false);

    let mut held = cache.read(DEV, 5).unwrap();
    held[0] = 42;

    thread::scope(|s| {
        let waiter = s.spawn(|| {
            let b = cache.read(DEV, 5).unwrap();
            done.store(true, Ordering::SeqCst);
            b[0]
        });

        thread::sleep(Duration::from_millis(50));
        assert!(!done.load(Ordering::SeqCst));
        assert_eq!(cache.refcnt(DEV, 5), Some(2));

        held.release();
        assert_eq!(waiter.join().unwrap(), 42);
    });
    assert!(done.load(Ordering::SeqCst));
    assert_eq!(cache.refcnt(DEV, 5), Some(0));
}

#[test]
fn concurrent_increments_are_never_lost() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 200;
    const BLOCKS: u32 = 16;

    let cache = BufferCache::<RamDisk, 6, 3>::new(RamDisk::new(DEV, BLOCKS as usize));
    let holders: Vec<AtomicUsize> = (0..BLOCKS).map(|_| AtomicUsize::new(0)).collect();
    let expected: Vec<AtomicUsize> = (0..BLOCKS).map(|_| AtomicUsize::new(0)).collect();

    thread::scope(|s| {
        for t in 0..THREADS {
            let (cache, holders, expected) = (&cache, &holders, &expected);
            s.spawn(move || {
                let mut seed = t as u32 * 7 + 1;
                for _ in 0..ROUNDS {
                    seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
                    let blockno = (seed >> 16) % BLOCKS;

                    let mut b = cache.read(DEV, blockno).unwrap();
                    let inside = holders[blockno as usize].fetch_add(1, Ordering::SeqCst);
                    assert_eq!(inside, 0, "block {} held twice", blockno);

                    let next = counter(&b) + 1;
                    b[..8].copy_from_slice(&next.to_le_bytes());
                    b.write().unwrap();
                    expected[blockno as usize].fetch_add(1, Ordering::SeqCst);

                    holders[blockno as usize].fetch_sub(1, Ordering::SeqCst);
                    b.release();
                }
            });
        }
    });

    assert_no_duplicates(&cache);
    for blockno in 0..BLOCKS {
        let on_disk = counter(&cache.disk().peek(blockno).unwrap());
        assert_eq!(on_disk, expected[blockno as usize].load(Ordering::SeqCst) as u64);
        assert!(cache.refcnt(DEV, blockno).unwrap_or(0) == 0);
    }
}

proptest! {
    #[test]
    fn pins_nest(n in 1usize..16) {
        let cache = BufferCache::<RamDisk, 2, 1>::new(RamDisk::new(DEV, 4));
        let b = cache.read(DEV, 0).unwrap();
        let pins: Vec<BufferPin> = (0..n).map(|_| b.pin()).collect();
        b.release();
        prop_assert_eq!(cache.refcnt(DEV, 0), Some(n as u32));

        // Every other buffer can still be recycled around the pinned one.
        cache.read(DEV, 1).unwrap().release();
        cache.read(DEV, 2).unwrap().release();
        prop_assert!(cache.contains(DEV, 0));

        for pin in pins {
            cache.unpin(pin);
        }
        prop_assert_eq!(cache.refcnt(DEV, 0), Some(0));
    }

    #[test]
    fn first_released_is_first_evicted(order in Just(vec![0u32, 1, 2, 3]).prop_shuffle()) {
        let cache = BufferCache::<RamDisk, 4, 3>::new(RamDisk::new(DEV, 16));
        let mut held: Vec<_> = (0..4).map(|blockno| Some(cache.read(DEV, blockno).unwrap())).collect();
        for &blockno in &order {
            if let Some(b) = held[blockno as usize].take() {
                b.release();
            }
        }

        cache.read(DEV, 9).unwrap().release();
        prop_assert!(!cache.contains(DEV, order[0]));
        for &blockno in &order[1..] {
            prop_assert!(cache.contains(DEV, blockno));
        }
    }
}
