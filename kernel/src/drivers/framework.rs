//! Driver framework: types, instances, lifecycle.
//!
//! A driver *type* is a template (tag, name, operation vtable, declared
//! private-data size, optional payload validator). *Instances* are
//! created from a type and walk a strict lifecycle:
//!
//! Unloaded -> Loading -> Loaded -> Active, Active -> Loaded on stop,
//! and any state -> Error when an operation fails. `ioctl` is legal only
//! in Active; `load_data` feeds validator-gated configuration blobs
//! (keyboard layouts and the like) to Loaded or Active instances.

use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use crate::error::{DriverError, KernelError, KernelResult};
use crate::sync::IrqMutex;

/// Stable instance identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DriverId(pub u32);

impl DriverId {
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Instance lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Unloaded,
    Loading,
    Loaded,
    Active,
    Error,
}

/// Operations a driver type provides.
///
/// Every hook receives the instance's private data blob; the framework
/// owns the allocation and the state machine around the calls.
pub trait DriverOps: Send + Sync {
    fn init(&self, _data: &mut [u8], _config: &str) -> Result<(), DriverError> {
        Ok(())
    }

    fn start(&self, _data: &mut [u8]) -> Result<(), DriverError> {
        Ok(())
    }

    fn stop(&self, _data: &mut [u8]) -> Result<(), DriverError> {
        Ok(())
    }

    fn cleanup(&self, _data: &mut [u8]) -> Result<(), DriverError> {
        Ok(())
    }

    fn ioctl(&self, _data: &mut [u8], _cmd: u32, _arg: usize) -> Result<usize, DriverError> {
        Err(DriverError::OperationFailed)
    }

    fn load_data(&self, _data: &mut [u8], _bytes: &[u8]) -> Result<(), DriverError> {
        Ok(())
    }
}

/// A registered driver type.
pub struct DriverTypeInfo {
    /// Type tag; unique across the registry.
    pub tag: u32,
    pub name: &'static str,
    /// Default operation vtable for instances of this type.
    pub ops: Arc<dyn DriverOps>,
    /// Bytes of private data each instance carries.
    pub private_size: usize,
    /// Validator for `load_data` payloads; checks the 32-bit magic
    /// preamble (and whatever else the type cares about).
    pub validate_data: Option<fn(&[u8]) -> bool>,
}

/// A live driver instance.
pub struct DriverInstance {
    pub id: DriverId,
    pub name: String,
    pub version: String,
    pub type_tag: u32,
    pub state: DriverState,
    private: Vec<u8>,
    ops: Arc<dyn DriverOps>,
}

/// The type registry and instance arena.
pub struct DriverRegistry {
    types: Vec<DriverTypeInfo>,
    instances: Vec<Option<DriverInstance>>,
}

impl DriverRegistry {
    pub const fn new() -> Self {
        Self {
            types: Vec::new(),
            instances: Vec::new(),
        }
    }

    // -- types -----------------------------------------------------------

    pub fn register_type(&mut self, info: DriverTypeInfo) -> KernelResult<()> {
        if self
            .types
            .iter()
            .any(|t| t.tag == info.tag || t.name == info.name)
        {
            return Err(KernelError::AlreadyExists {
                resource: "driver type",
            });
        }
        log::info!("drivers: type '{}' (tag {:#x}) registered", info.name, info.tag);
        self.types.push(info);
        Ok(())
    }

    fn type_info(&self, tag: u32) -> Option<&DriverTypeInfo> {
        self.types.iter().find(|t| t.tag == tag)
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    // -- instance lifecycle ----------------------------------------------

    /// Create an instance of `type_tag`. Names are unique per system.
    pub fn create(&mut self, type_tag: u32, name: &str, version: &str) -> KernelResult<DriverId> {
        let info = self.type_info(type_tag).ok_or(DriverError::UnknownType)?;
        if self.find_by_name(name).is_some() {
            return Err(DriverError::DuplicateName.into());
        }
        let instance = DriverInstance {
            id: DriverId(self.instances.len() as u32),
            name: name.to_string(),
            version: version.to_string(),
            type_tag,
            state: DriverState::Unloaded,
            private: vec![0u8; info.private_size],
            ops: Arc::clone(&info.ops),
        };
        let id = instance.id;
        self.instances.push(Some(instance));
        Ok(id)
    }

    fn instance_mut(&mut self, id: DriverId) -> KernelResult<&mut DriverInstance> {
        self.instances
            .get_mut(id.as_u32() as usize)
            .and_then(|slot| slot.as_mut())
            .ok_or(DriverError::InstanceNotFound.into())
    }

    pub fn instance_state(&self, id: DriverId) -> Option<DriverState> {
        self.instances
            .get(id.as_u32() as usize)
            .and_then(|slot| slot.as_ref())
            .map(|i| i.state)
    }

    /// Unloaded -> Loading -> Loaded (or Error).
    pub fn init(&mut self, id: DriverId, config: &str) -> KernelResult<()> {
        let inst = self.instance_mut(id)?;
        if inst.state != DriverState::Unloaded {
            return Err(DriverError::InvalidState.into());
        }
        inst.state = DriverState::Loading;
        let ops = Arc::clone(&inst.ops);
        match ops.init(&mut inst.private, config) {
            Ok(()) => {
                inst.state = DriverState::Loaded;
                Ok(())
            }
            Err(e) => {
                inst.state = DriverState::Error;
                Err(e.into())
            }
        }
    }

    /// Loaded -> Active (or Error).
    pub fn start(&mut self, id: DriverId) -> KernelResult<()> {
        let inst = self.instance_mut(id)?;
        if inst.state != DriverState::Loaded {
            return Err(DriverError::InvalidState.into());
        }
        let ops = Arc::clone(&inst.ops);
        match ops.start(&mut inst.private) {
            Ok(()) => {
                inst.state = DriverState::Active;
                Ok(())
            }
            Err(e) => {
                inst.state = DriverState::Error;
                Err(e.into())
            }
        }
    }

    /// Active -> Loaded (or Error).
    pub fn stop(&mut self, id: DriverId) -> KernelResult<()> {
        let inst = self.instance_mut(id)?;
        if inst.state != DriverState::Active {
            return Err(DriverError::InvalidState.into());
        }
        let ops = Arc::clone(&inst.ops);
        match ops.stop(&mut inst.private) {
            Ok(()) => {
                inst.state = DriverState::Loaded;
                Ok(())
            }
            Err(e) => {
                inst.state = DriverState::Error;
                Err(e.into())
            }
        }
    }

    /// Stop if Active, run cleanup, remove from the arena.
    pub fn destroy(&mut self, id: DriverId) -> KernelResult<()> {
        {
            let inst = self.instance_mut(id)?;
            if inst.state == DriverState::Active {
                let ops = Arc::clone(&inst.ops);
                let _ = ops.stop(&mut inst.private);
                inst.state = DriverState::Loaded;
            }
            let ops = Arc::clone(&inst.ops);
            let _ = ops.cleanup(&mut inst.private);
        }
        self.instances[id.as_u32() as usize] = None;
        Ok(())
    }

    /// Device control; only legal while Active.
    pub fn ioctl(&mut self, id: DriverId, cmd: u32, arg: usize) -> KernelResult<usize> {
        let inst = self.instance_mut(id)?;
        if inst.state != DriverState::Active {
            return Err(DriverError::InvalidState.into());
        }
        let ops = Arc::clone(&inst.ops);
        ops.ioctl(&mut inst.private, cmd, arg).map_err(Into::into)
    }

    /// Feed a file-backed configuration blob through the type validator.
    ///
    /// The payload must start with the type's 32-bit magic; types without
    /// a validator accept no payloads at all.
    pub fn load_data(&mut self, id: DriverId, bytes: &[u8]) -> KernelResult<()> {
        let (type_tag, state) = {
            let inst = self.instance_mut(id)?;
            (inst.type_tag, inst.state)
        };
        if !matches!(state, DriverState::Loaded | DriverState::Active) {
            return Err(DriverError::InvalidState.into());
        }
        let validator = self
            .type_info(type_tag)
            .and_then(|t| t.validate_data)
            .ok_or(DriverError::ValidationFailed)?;
        if bytes.len() < 4 || !validator(bytes) {
            return Err(DriverError::ValidationFailed.into());
        }

        let inst = self.instance_mut(id)?;
        let ops = Arc::clone(&inst.ops);
        match ops.load_data(&mut inst.private, bytes) {
            Ok(()) => Ok(()),
            Err(e) => {
                inst.state = DriverState::Error;
                Err(e.into())
            }
        }
    }

    // -- lookup ----------------------------------------------------------

    /// Find an instance by its unique name.
    pub fn find_by_name(&self, name: &str) -> Option<DriverId> {
        self.instances
            .iter()
            .flatten()
            .find(|i| i.name == name)
            .map(|i| i.id)
    }

    /// First instance of a type, in creation order.
    pub fn find_by_type(&self, type_tag: u32) -> Option<DriverId> {
        self.instances
            .iter()
            .flatten()
            .find(|i| i.type_tag == type_tag)
            .map(|i| i.id)
    }

    pub fn instance_count(&self) -> usize {
        self.instances.iter().flatten().count()
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global registry.
static DRIVERS: IrqMutex<DriverRegistry> = IrqMutex::new(DriverRegistry::new());

/// Run a closure against the global registry.
pub fn with_drivers<R>(f: impl FnOnce(&mut DriverRegistry) -> R) -> R {
    f(&mut DRIVERS.lock())
}

/// ioctl by driver name (the syscall surface addresses drivers by name).
pub fn ioctl_by_name(name: &str, cmd: u32, arg: usize) -> KernelResult<usize> {
    with_drivers(|reg| {
        let id = reg
            .find_by_name(name)
            .ok_or(KernelError::DriverError(DriverError::InstanceNotFound))?;
        reg.ioctl(id, cmd, arg)
    })
}

#[cfg(all(test, not(target_os = "none")))]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    const TYPE_TAG: u32 = 0x4B42; // keyboard-ish
    const MAGIC: u32 = 0x4C59_4F31;

    static CLEANUPS: AtomicU32 = AtomicU32::new(0);

    struct TestOps;

    impl DriverOps for TestOps {
        fn init(&self, data: &mut [u8], config: &str) -> Result<(), DriverError> {
            if config == "bad" {
                return Err(DriverError::OperationFailed);
            }
            data[0] = 1;
            Ok(())
        }

        fn start(&self, data: &mut [u8]) -> Result<(), DriverError> {
            data[1] = 1;
            Ok(())
        }

        fn cleanup(&self, _data: &mut [u8]) -> Result<(), DriverError> {
            CLEANUPS.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }

        fn ioctl(&self, data: &mut [u8], cmd: u32, arg: usize) -> Result<usize, DriverError> {
            match cmd {
                1 => Ok(data[0] as usize),
                2 => {
                    data[2] = arg as u8;
                    Ok(0)
                }
                _ => Err(DriverError::OperationFailed),
            }
        }
    }

    fn validate(bytes: &[u8]) -> bool {
        bytes.len() >= 4 && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == MAGIC
    }

    fn registry_with_type() -> DriverRegistry {
        let mut reg = DriverRegistry::new();
        reg.register_type(DriverTypeInfo {
            tag: TYPE_TAG,
            name: "testdrv",
            ops: Arc::new(TestOps),
            private_size: 8,
            validate_data: Some(validate),
        })
        .unwrap();
        reg
    }

    #[test]
    fn test_full_lifecycle() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "dev0", "1.0").unwrap();
        assert_eq!(reg.instance_state(id), Some(DriverState::Unloaded));

        reg.init(id, "").unwrap();
        assert_eq!(reg.instance_state(id), Some(DriverState::Loaded));

        reg.start(id).unwrap();
        assert_eq!(reg.instance_state(id), Some(DriverState::Active));

        reg.stop(id).unwrap();
        assert_eq!(reg.instance_state(id), Some(DriverState::Loaded));
    }

    #[test]
    fn test_strict_transitions() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "dev1", "1.0").unwrap();

        // Cannot start or stop before init.
        assert!(reg.start(id).is_err());
        assert!(reg.stop(id).is_err());

        reg.init(id, "").unwrap();
        // Double init is rejected.
        assert!(reg.init(id, "").is_err());
        // Stop from Loaded is rejected.
        assert!(reg.stop(id).is_err());
    }

    #[test]
    fn test_failed_init_enters_error_state() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "dev2", "1.0").unwrap();
        assert!(reg.init(id, "bad").is_err());
        assert_eq!(reg.instance_state(id), Some(DriverState::Error));
        // Error is terminal for normal operations.
        assert!(reg.start(id).is_err());
    }

    #[test]
    fn test_ioctl_only_when_active() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "dev3", "1.0").unwrap();
        reg.init(id, "").unwrap();
        assert!(reg.ioctl(id, 1, 0).is_err());

        reg.start(id).unwrap();
        assert_eq!(reg.ioctl(id, 1, 0).unwrap(), 1);
        reg.ioctl(id, 2, 0x55).unwrap();
    }

    #[test]
    fn test_load_data_magic_gate() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "dev4", "1.0").unwrap();
        reg.init(id, "").unwrap();

        // Wrong magic and short payloads are rejected by the validator.
        assert!(reg.load_data(id, &[0, 1, 2, 3, 4]).is_err());
        assert!(reg.load_data(id, &[1]).is_err());

        let mut payload = MAGIC.to_le_bytes().to_vec();
        payload.extend_from_slice(b"layout-data");
        reg.load_data(id, &payload).unwrap();
    }

    #[test]
    fn test_duplicate_names_and_unknown_type() {
        let mut reg = registry_with_type();
        reg.create(TYPE_TAG, "dup", "1.0").unwrap();
        assert!(reg.create(TYPE_TAG, "dup", "1.0").is_err());
        assert!(reg.create(0xDEAD, "other", "1.0").is_err());
    }

    #[test]
    fn test_lookup_by_name_and_type() {
        let mut reg = registry_with_type();
        let a = reg.create(TYPE_TAG, "first", "1.0").unwrap();
        let _b = reg.create(TYPE_TAG, "second", "1.0").unwrap();

        assert_eq!(reg.find_by_name("second").map(|id| id.as_u32()), Some(1));
        assert_eq!(reg.find_by_type(TYPE_TAG), Some(a));
        assert_eq!(reg.find_by_name("missing"), None);
    }

    #[test]
    fn test_destroy_stops_and_cleans_up() {
        let mut reg = registry_with_type();
        let id = reg.create(TYPE_TAG, "doomed", "1.0").unwrap();
        reg.init(id, "").unwrap();
        reg.start(id).unwrap();

        let before = CLEANUPS.load(Ordering::Relaxed);
        reg.destroy(id).unwrap();
        assert_eq!(CLEANUPS.load(Ordering::Relaxed), before + 1);
        assert_eq!(reg.instance_state(id), None);
        assert_eq!(reg.find_by_name("doomed"), None);
    }
}
