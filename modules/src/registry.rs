//! # Module Registry
//!
//! Central registry of loaded modules, keyed by name.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use kestrel_hal::VirtAddr;
use kestrel_loader::LoadedModule;
use spin::RwLock;

use crate::{ModuleError, ModuleResult, ModuleState};

/// Registry entry for one module
#[derive(Debug, Clone)]
pub struct ModuleRecord {
    /// Module name
    pub name: String,
    /// Runtime address of the module's first section
    pub load_bias: VirtAddr,
    /// Resolved `module_init` address
    pub init: VirtAddr,
    /// Resolved `module_fini` address, retained for a future unload path
    pub fini: VirtAddr,
    /// Current lifecycle state
    pub state: ModuleState,
}

/// Module registry
#[derive(Debug)]
pub struct ModuleRegistry {
    records: RwLock<BTreeMap<String, ModuleRecord>>,
}

impl ModuleRegistry {
    /// Create an empty registry
    pub const fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
        }
    }

    /// Reserve a name and enter the [`ModuleState::Loading`] state.
    ///
    /// Fails with [`ModuleError::AlreadyLoaded`] if the name is taken,
    /// whatever state the holder is in.
    pub fn begin_load(&self, name: &str) -> ModuleResult<()> {
        let mut records = self.records.write();
        if records.contains_key(name) {
            return Err(ModuleError::AlreadyLoaded);
        }
        records.insert(
            name.to_string(),
            ModuleRecord {
                name: name.to_string(),
                load_bias: VirtAddr::new(0),
                init: VirtAddr::new(0),
                fini: VirtAddr::new(0),
                state: ModuleState::Loading,
            },
        );
        Ok(())
    }

    /// Record a successful load and enter [`ModuleState::Running`].
    pub fn mark_running(&self, name: &str, module: &LoadedModule) -> ModuleResult<()> {
        let mut records = self.records.write();
        let record = records.get_mut(name).ok_or(ModuleError::NotFound)?;
        record.load_bias = module.load_bias;
        record.init = module.init;
        record.fini = module.fini;
        record.state = ModuleState::Running;
        log::info!(
            "registered module {} at {:#x}",
            name,
            module.load_bias.as_u64()
        );
        Ok(())
    }

    /// Enter [`ModuleState::Failed`]. Missing names are ignored.
    pub fn mark_failed(&self, name: &str) {
        if let Some(record) = self.records.write().get_mut(name) {
            record.state = ModuleState::Failed;
        }
    }

    /// Look up a module's record
    pub fn get(&self, name: &str) -> Option<ModuleRecord> {
        self.records.read().get(name).cloned()
    }

    /// Look up a module's state
    pub fn state_of(&self, name: &str) -> Option<ModuleState> {
        self.records.read().get(name).map(|r| r.state)
    }

    /// Names of all modules currently running
    pub fn list_running(&self) -> Vec<String> {
        self.records
            .read()
            .values()
            .filter(|r| r.state == ModuleState::Running)
            .map(|r| r.name.clone())
            .collect()
    }

    /// Number of registered modules, in any state
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether no module is registered
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global module registry
static REGISTRY: ModuleRegistry = ModuleRegistry::new();

/// Get the global module registry
pub fn registry() -> &'static ModuleRegistry {
    &REGISTRY
}
