//! Safe global initialization without `static mut`.
//!
//! Kernel singletons (mount table, driver registry, disk table, scheduler)
//! are created during boot and then live forever. [`OnceLock`] provides a
//! write-once cell for such values; [`GlobalState`] wraps mutable singletons
//! behind a mutex with closure-based access.

use core::sync::atomic::{AtomicPtr, Ordering};

use spin::Mutex;

/// A cell that can be written to only once.
///
/// Similar to `std::sync::OnceLock` but usable in `no_std`.
pub struct OnceLock<T> {
    inner: AtomicPtr<T>,
}

impl<T> Default for OnceLock<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OnceLock<T> {
    /// Create a new empty OnceLock
    pub const fn new() -> Self {
        Self {
            inner: AtomicPtr::new(core::ptr::null_mut()),
        }
    }

    /// Get the value if initialized
    pub fn get(&self) -> Option<&T> {
        let ptr = self.inner.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            // SAFETY: A non-null pointer was stored by `set()` from
            // `Box::into_raw()`, so it points to a valid heap-allocated `T`.
            // The Acquire load synchronizes-with the Release store in `set()`,
            // so the pointee is fully initialized. The allocation is only
            // freed in `Drop`, which takes `&mut self`.
            Some(unsafe { &*ptr })
        }
    }

    /// Initialize the cell with a value.
    ///
    /// Returns `Err(value)` if the cell was already initialized.
    pub fn set(&self, value: T) -> Result<(), T> {
        let boxed = alloc::boxed::Box::new(value);
        let ptr = alloc::boxed::Box::into_raw(boxed);

        match self.inner.compare_exchange(
            core::ptr::null_mut(),
            ptr,
            Ordering::Release,
            Ordering::Acquire,
        ) {
            Ok(_) => Ok(()),
            Err(_) => {
                // Lost the race: reclaim our allocation and hand the value back.
                // SAFETY: `ptr` came from `Box::into_raw` two lines up and was
                // never published (the CAS failed), so we still own it.
                let boxed = unsafe { alloc::boxed::Box::from_raw(ptr) };
                Err(*boxed)
            }
        }
    }

    /// Get or initialize the value
    pub fn get_or_init<F>(&self, f: F) -> &T
    where
        F: FnOnce() -> T,
    {
        if let Some(val) = self.get() {
            return val;
        }
        let _ = self.set(f());
        self.get().expect("OnceLock empty after set")
    }
}

// SAFETY: the inner value is heap-allocated and published through an
// AtomicPtr with Release/Acquire ordering; transferring the lock transfers
// ownership of the allocation.
unsafe impl<T: Send> Send for OnceLock<T> {}
// SAFETY: `get()` only hands out shared references, and the CAS in `set()`
// guarantees at most one successful initialization; `T: Sync` is required
// because multiple threads may hold `&T` at once.
unsafe impl<T: Send + Sync> Sync for OnceLock<T> {}

impl<T> Drop for OnceLock<T> {
    fn drop(&mut self) {
        let ptr = self.inner.load(Ordering::Acquire);
        if !ptr.is_null() {
            // SAFETY: the pointer came from `Box::into_raw` in `set()` and
            // `&mut self` guarantees no concurrent access.
            unsafe {
                let _ = alloc::boxed::Box::from_raw(ptr);
            }
        }
    }
}

/// Mutable global state behind a mutex, initialized at boot.
pub struct GlobalState<T> {
    inner: Mutex<Option<T>>,
}

impl<T> GlobalState<T> {
    /// Create new uninitialized global state
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(None),
        }
    }

    /// Initialize the global state.
    ///
    /// Returns `Err(value)` if already initialized.
    pub fn init(&self, value: T) -> Result<(), T> {
        let mut lock = self.inner.lock();
        if lock.is_some() {
            Err(value)
        } else {
            *lock = Some(value);
            Ok(())
        }
    }

    /// Run a closure with a shared reference to the state.
    pub fn with<R, F: FnOnce(&T) -> R>(&self, f: F) -> Option<R> {
        let lock = self.inner.lock();
        lock.as_ref().map(f)
    }

    /// Run a closure with a mutable reference to the state.
    pub fn with_mut<R, F: FnOnce(&mut T) -> R>(&self, f: F) -> Option<R> {
        let mut lock = self.inner.lock();
        lock.as_mut().map(f)
    }

    /// Whether the state has been initialized.
    pub fn is_initialized(&self) -> bool {
        self.inner.lock().is_some()
    }

    /// Set or replace the state, returning any previous value.
    pub fn replace(&self, value: T) -> Option<T> {
        self.inner.lock().replace(value)
    }
}

impl<T> Default for GlobalState<T> {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the spin mutex serializes all access to the inner Option<T>, so
// only `T: Send` is needed for either transfer or sharing.
unsafe impl<T: Send> Send for GlobalState<T> {}
// SAFETY: see above -- every access goes through the mutex, so no `&T`
// escapes without the lock held.
unsafe impl<T: Send> Sync for GlobalState<T> {}
