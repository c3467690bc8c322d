//! Interrupt-masking spin mutex.
//!
//! State that is touched from IRQ context (the heap, the frame allocator,
//! the scheduler queues, disk channels) must be mutated with interrupts
//! masked, otherwise a tick landing mid-update would observe a half-written
//! structure or deadlock on the spinlock it already holds. [`IrqMutex`]
//! pairs a [`spin::Mutex`] with a save/restore of the interrupt flag around
//! the critical section.

use core::ops::{Deref, DerefMut};

use spin::{Mutex, MutexGuard};

use crate::arch;

/// A spin mutex whose critical sections run with interrupts masked.
pub struct IrqMutex<T> {
    inner: Mutex<T>,
}

impl<T> IrqMutex<T> {
    pub const fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Acquire the lock, masking interrupts for the guard's lifetime.
    ///
    /// The previous interrupt-enable state is restored when the guard is
    /// dropped, so nesting inside an already-masked section is fine.
    pub fn lock(&self) -> IrqMutexGuard<'_, T> {
        let was_enabled = arch::interrupts_enabled();
        arch::disable_interrupts();
        IrqMutexGuard {
            guard: Some(self.inner.lock()),
            reenable: was_enabled,
        }
    }
}

/// Guard returned by [`IrqMutex::lock`].
pub struct IrqMutexGuard<'a, T> {
    guard: Option<MutexGuard<'a, T>>,
    reenable: bool,
}

impl<T> Deref for IrqMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.guard.as_ref().unwrap()
    }
}

impl<T> DerefMut for IrqMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.guard.as_mut().unwrap()
    }
}

impl<T> Drop for IrqMutexGuard<'_, T> {
    fn drop(&mut self) {
        // Release the spinlock before unmasking so a pending IRQ that
        // takes the same lock cannot spin against us.
        self.guard.take();
        if self.reenable {
            arch::enable_interrupts();
        }
    }
}
