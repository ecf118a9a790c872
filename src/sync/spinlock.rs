use crate::hal;
use core::ops::{Deref, DerefMut, Drop};

/// Mutual exclusion by busy-waiting, with interrupts off while held.
///
/// Meant for short critical sections that never block.
pub struct Spinlock<T> {
    name: &'static str,
    inner: spin::Mutex<T>,
}
impl<T> Spinlock<T> {
    /// Initializes a `Spinlock`.
    pub const fn new(name: &'static str, value: T) -> Spinlock<T> {
        Spinlock {
            name,
            inner: spin::Mutex::new(value),
        }
    }
    pub fn name(&self) -> &'static str {
        self.name
    }
    /// Spin until the lock is free, acquiring afterwards.
    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        hal::push_intr_off();
        SpinlockGuard {
            lock: self,
            inner: Some(self.inner.lock()),
        }
    }
    /// Acquire the lock only if nobody holds it right now.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        hal::push_intr_off();
        match self.inner.try_lock() {
            Some(inner) => Some(SpinlockGuard {
                lock: self,
                inner: Some(inner),
            }),
            None => {
                hal::pop_intr_off();
                None
            }
        }
    }
    /// Racy snapshot; only useful for assertions.
    pub fn is_locked(&self) -> bool {
        self.inner.is_locked()
    }
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

pub struct SpinlockGuard<'l, T> {
    lock: &'l Spinlock<T>,
    /// Only `None` while the holder is asleep inside `sleep`.
    inner: Option<spin::MutexGuard<'l, T>>,
}
impl<'l, T> SpinlockGuard<'l, T> {
    /// Sleep until `wakeup(chan)` is called somewhere else, yielding the lock until then.
    pub fn sleep(&mut self, chan: usize) {
        let mut held = self.inner.take();
        hal::sleep(chan, &mut || drop(held.take()));
        drop(held);

        // Tidy up and reacquire the lock.
        self.inner = Some(self.lock.inner.lock());
    }
    pub fn lock_name(&self) -> &'static str {
        self.lock.name
    }
}
impl<'l, T> Deref for SpinlockGuard<'l, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match &self.inner {
            Some(inner) => &**inner,
            None => unreachable!("{}: guard used while asleep", self.lock.name),
        }
    }
}
impl<'l, T> DerefMut for SpinlockGuard<'l, T> {
    fn deref_mut(&mut self) -> &mut T {
        match &mut self.inner {
            Some(inner) => &mut **inner,
            None => unreachable!("{}: guard used while asleep", self.lock.name),
        }
    }
}
impl<'l, T> Drop for SpinlockGuard<'l, T> {
    fn drop(&mut self) {
        drop(self.inner.take());
        hal::pop_intr_off();
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;
    use crate::hal::platform::hosted;
    use std::{sync::Arc, thread, vec::Vec};

    #[test]
    fn interrupts_stay_off_while_held() {
        let lock = Spinlock::new("test", 0);
        {
            let mut guard = lock.lock();
            *guard += 1;
            assert_eq!(hosted::intr_depth(), 1);
            assert!(lock.is_locked());
        }
        assert_eq!(hosted::intr_depth(), 0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_fails_while_held() {
        let lock = Spinlock::new("test", ());
        let guard = lock.lock();
        assert!(lock.try_lock().is_none());
        assert_eq!(hosted::intr_depth(), 1);
        drop(guard);
        assert!(lock.try_lock().is_some());
        assert_eq!(hosted::intr_depth(), 0);
    }

    #[test]
    fn counts_from_many_threads() {
        let lock = Arc::new(Spinlock::new("counter", 0usize));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                thread::spawn(move || {
                    for _ in 0..1000 {
                        *lock.lock() += 1;
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(*lock.lock(), 4000);
    }
}
