//! Device drivers and the driver framework.

pub mod framework;
pub mod keyboard;
pub mod terminal;

pub use framework::{
    with_drivers, DriverId, DriverInstance, DriverOps, DriverRegistry, DriverState,
    DriverTypeInfo,
};
