//! # Kernel Symbol Table
//!
//! The set of symbols the kernel exports to modules. The loader resolves
//! a module's undefined references here; nothing outside this table is
//! reachable from module code by name.

use alloc::string::{String, ToString};

use hashbrown::HashMap;
use kestrel_hal::VirtAddr;
use kestrel_loader::SymbolResolver;
use spin::{Lazy, RwLock};

/// Exported kernel symbols, name to address
#[derive(Debug)]
pub struct KernelSymbolTable {
    entries: RwLock<HashMap<String, u64>>,
}

impl KernelSymbolTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Export a symbol. Re-exporting a name replaces the old address.
    pub fn register(&self, name: &str, addr: VirtAddr) {
        if let Some(old) = self.entries.write().insert(name.to_string(), addr.as_u64()) {
            log::debug!(
                "kernel symbol {} re-exported: {:#x} -> {:#x}",
                name,
                old,
                addr.as_u64()
            );
        }
    }

    /// Look up an exported symbol
    pub fn lookup(&self, name: &str) -> Option<VirtAddr> {
        self.entries.read().get(name).map(|&addr| VirtAddr::new(addr))
    }

    /// Number of exported symbols
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl Default for KernelSymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

impl SymbolResolver for KernelSymbolTable {
    fn resolve(&self, name: &str) -> Option<VirtAddr> {
        self.lookup(name)
    }
}

/// Global kernel symbol table
static KERNEL_SYMBOLS: Lazy<KernelSymbolTable> = Lazy::new(KernelSymbolTable::new);

/// Get the global kernel symbol table
pub fn kernel_symbols() -> &'static KernelSymbolTable {
    &KERNEL_SYMBOLS
}
