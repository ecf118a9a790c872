use super::spinlock::Spinlock;
use crate::hal;
use core::{
    cell::UnsafeCell,
    marker::PhantomData,
    ops::{Deref, DerefMut, Drop},
};

struct SleepState {
    locked: bool,
    /// Kernel thread holding the lock.
    holder: Option<usize>,
}

/// Long-term lock for data that may be held across blocking work.
///
/// Waiters give up the hart instead of spinning.
pub struct Sleeplock<T> {
    state: Spinlock<SleepState>,
    data: UnsafeCell<T>,
}
unsafe impl<T: Send> Sync for Sleeplock<T> {}

impl<T> Sleeplock<T> {
    pub const fn new(name: &'static str, value: T) -> Sleeplock<T> {
        Sleeplock {
            state: Spinlock::new(
                name,
                SleepState {
                    locked: false,
                    holder: None,
                },
            ),
            data: UnsafeCell::new(value),
        }
    }
    pub fn name(&self) -> &'static str {
        self.state.name()
    }
    fn chan(&self) -> usize {
        self as *const Sleeplock<T> as usize
    }
    /// Sleep until the lock is free, acquiring afterwards.
    pub fn lock(&self) -> SleeplockGuard<'_, T> {
        let mut state = self.state.lock();
        while state.locked {
            state.sleep(self.chan());
        }
        state.locked = true;
        state.holder = Some(hal::thread_id());
        SleeplockGuard {
            lock: self,
            _not_send: PhantomData,
        }
    }
    pub fn try_lock(&self) -> Option<SleeplockGuard<'_, T>> {
        let mut state = self.state.lock();
        if state.locked {
            return None;
        }
        state.locked = true;
        state.holder = Some(hal::thread_id());
        Some(SleeplockGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }
    /// Whether the calling kernel thread holds the lock.
    pub fn holding(&self) -> bool {
        let state = self.state.lock();
        state.locked && state.holder == Some(hal::thread_id())
    }
    fn unlock(&self) {
        let mut state = self.state.lock();
        state.locked = false;
        state.holder = None;
        hal::wakeup(self.chan());
    }
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

pub struct SleeplockGuard<'l, T> {
    lock: &'l Sleeplock<T>,
    _not_send: PhantomData<*const ()>,
}
impl<'l, T> SleeplockGuard<'l, T> {
    pub fn holding(&self) -> bool {
        self.lock.holding()
    }
}
impl<'l, T> Deref for SleeplockGuard<'l, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}
impl<'l, T> DerefMut for SleeplockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}
impl<'l, T> Drop for SleeplockGuard<'l, T> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
