//! Hardware abstraction layer.
//!
//! The core only needs a handful of services from the surrounding kernel:
//! which hart and which kernel thread is running, nested interrupt
//! disabling, and a sleep/wakeup channel. A kernel supplies them by
//! implementing [`Platform`] and calling [`install`] once during boot.

pub mod hardware;
pub mod interrupt;
pub mod platform;

use spin::Once;

/// Services the core consumes from the scheduler and interrupt subsystem.
pub trait Platform: Sync {
    /// Index of the hart the caller is running on.
    ///
    /// Only meaningful with interrupts disabled; the caller may migrate
    /// as soon as they are turned back on.
    fn hart_id(&self) -> usize;
    /// Identity of the calling kernel thread. Sleep locks record it
    /// to check who holds them.
    fn thread_id(&self) -> usize;
    /// Disable interrupts on this hart, counting the nesting depth.
    fn push_intr_off(&self);
    /// Undo one `push_intr_off`, restoring interrupts at depth zero.
    fn pop_intr_off(&self);
    /// Suspend the calling thread on `chan`.
    ///
    /// `release` drops the condition lock the caller holds. It must be
    /// invoked after the thread is registered as a sleeper, so a
    /// `wakeup` issued after the condition lock is released cannot be
    /// lost. May return spuriously; callers re-check their condition.
    fn sleep(&self, chan: usize, release: &mut dyn FnMut());
    /// Wake every thread sleeping on `chan`.
    fn wakeup(&self, chan: usize);
}

static PLATFORM: Once<&'static dyn Platform> = Once::new();

/// Install the platform hooks. Only the first call has an effect.
pub fn install(platform: &'static dyn Platform) {
    PLATFORM.call_once(|| platform);
}

/// The installed platform.
#[cfg(feature = "std")]
pub fn platform() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(platform) => *platform,
        None => &platform::hosted::HOST,
    }
}

/// The installed platform.
#[cfg(not(feature = "std"))]
pub fn platform() -> &'static dyn Platform {
    match PLATFORM.get() {
        Some(platform) => *platform,
        None => panic!("hal: no platform installed"),
    }
}

/// Must be called with interrupts disabled
/// to prevent race with process being moved
/// to a different CPU.
pub fn hart_id() -> usize {
    platform().hart_id()
}

pub fn thread_id() -> usize {
    platform().thread_id()
}

pub fn push_intr_off() {
    platform().push_intr_off();
}

pub fn pop_intr_off() {
    platform().pop_intr_off();
}

pub fn sleep(chan: usize, release: &mut dyn FnMut()) {
    platform().sleep(chan, release);
}

pub fn wakeup(chan: usize) {
    platform().wakeup(chan);
}
