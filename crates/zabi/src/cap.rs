use std::collections::HashMap;
use std::sync::Mutex;

use crate::handle::{HandleError, HandleTable};

#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("no capability named '{0}' at version {1}")]
    Unknown(String, u32),
    #[error(transparent)]
    Handle(#[from] HandleError),
}

/// Opens a handle for one instance of a named, versioned capability
/// (e.g. `file/aio@v1`). A factory is already fully configured by the
/// time it's registered — the registry itself carries no open-time
/// argument parsing, since each capability's configuration shape (a
/// sandbox root path, a connection string, ...) is its own business.
pub trait CapabilityFactory: Send + Sync {
    fn open(&self, table: &mut HandleTable) -> Result<u32, CapabilityError>;
}

/// Maps `(name, version)` to the factory that realizes it. One registry
/// per process, populated at startup by whichever capabilities the host
/// embedding decides to expose to guest code.
#[derive(Default)]
pub struct CapabilityRegistry {
    factories: HashMap<(String, u32), Box<dyn CapabilityFactory>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, version: u32, factory: Box<dyn CapabilityFactory>) {
        self.factories.insert((name.into(), version), factory);
    }

    pub fn open(&self, name: &str, version: u32, table: &Mutex<HandleTable>) -> Result<u32, CapabilityError> {
        let factory = self
            .factories
            .get(&(name.to_string(), version))
            .ok_or_else(|| CapabilityError::Unknown(name.to_string(), version))?;
        let mut table = table.lock().expect("handle table mutex poisoned");
        factory.open(&mut table).map_err(CapabilityError::from)
    }

    pub fn is_registered(&self, name: &str, version: u32) -> bool {
        self.factories.contains_key(&(name.to_string(), version))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::handle::{HandleFlags, HandleOps};

    struct NullHandle;
    impl HandleOps for NullHandle {}

    struct NullFactory;
    impl CapabilityFactory for NullFactory {
        fn open(&self, table: &mut HandleTable) -> Result<u32, CapabilityError> {
            Ok(table.alloc(Box::new(NullHandle), None, HandleFlags::NONE)?)
        }
    }

    #[test]
    fn test_open_unknown_capability_fails() {
        let registry = CapabilityRegistry::new();
        let table = Mutex::new(HandleTable::new());
        let err = registry.open("file/aio", 1, &table).unwrap_err();
        assert!(matches!(err, CapabilityError::Unknown(_, 1)));
    }

    #[test]
    fn test_open_registered_capability_allocates_a_handle() {
        let mut registry = CapabilityRegistry::new();
        registry.register("file/aio", 1, Box::new(NullFactory));
        let table = Mutex::new(HandleTable::new());
        let handle = registry.open("file/aio", 1, &table).unwrap();
        assert!(handle >= crate::handle::RESERVED_HANDLES);
    }
}
