//! Architecture-agnostic interrupt nesting.

use core::marker::PhantomData;

/// Keeps interrupts disabled on the current hart while alive.
///
/// Nests like `push_intr_off`/`pop_intr_off`. Not `Send`: it has to be
/// dropped on the hart that created it.
pub struct InterruptBlocker {
    _not_send: PhantomData<*const ()>,
}
impl InterruptBlocker {
    pub fn new() -> InterruptBlocker {
        super::push_intr_off();
        InterruptBlocker {
            _not_send: PhantomData,
        }
    }
}
impl Default for InterruptBlocker {
    fn default() -> InterruptBlocker {
        InterruptBlocker::new()
    }
}
impl core::ops::Drop for InterruptBlocker {
    fn drop(&mut self) {
        super::pop_intr_off();
    }
}

/// Read the current hart index with interrupts held off for the read.
pub fn current_hart() -> usize {
    let _blocker = InterruptBlocker::new();
    super::hart_id()
}
