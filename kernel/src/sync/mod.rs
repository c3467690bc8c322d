//! Synchronization primitives for global kernel state.

pub mod irq_lock;
pub mod once_lock;

pub use irq_lock::IrqMutex;
pub use once_lock::{GlobalState, OnceLock};
