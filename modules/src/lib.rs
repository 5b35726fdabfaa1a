//! # Kestrel Module System
//!
//! Glue between the ELF loader and the running kernel:
//!
//! - The **kernel symbol table** ([`symbols`]) holds every symbol the
//!   kernel exports to modules; the loader resolves a module's undefined
//!   references against it.
//! - The **module registry** ([`registry`]) tracks each loaded module by
//!   name with its load bias, entry addresses, and lifecycle state.
//! - [`load_and_start`] drives the whole sequence: load, register,
//!   invoke `module_init`.
//!
//! ## Module Lifecycle
//!
//! 1. Loading (registered, loader running)
//! 2. Running (`module_init` returned)
//! 3. Failed (loader rejected the image)
//!
//! There is no unload path; `module_fini` addresses are retained in the
//! registry for a future one.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod registry;
pub mod symbols;

use core::fmt;

use kestrel_hal::VirtAddr;
use kestrel_loader::LoadError;
use kestrel_memory::ModuleMemory;

pub use registry::{registry, ModuleRecord, ModuleRegistry};
pub use symbols::{kernel_symbols, KernelSymbolTable};

/// Module system result type
pub type ModuleResult<T> = Result<T, ModuleError>;

/// Module system error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleError {
    /// The loader rejected the image
    Load(LoadError),
    /// A module with this name is already registered
    AlreadyLoaded,
    /// No module with this name is registered
    NotFound,
}

impl From<LoadError> for ModuleError {
    fn from(err: LoadError) -> Self {
        Self::Load(err)
    }
}

impl fmt::Display for ModuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Load(err) => write!(f, "load failed: {err}"),
            Self::AlreadyLoaded => write!(f, "module name already registered"),
            Self::NotFound => write!(f, "module not registered"),
        }
    }
}

/// Module lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    /// Registered, loader in progress
    Loading,
    /// `module_init` has returned
    Running,
    /// The loader rejected the image
    Failed,
}

/// Signature of a module's `module_init` and `module_fini` entries.
///
/// The only function type module entry addresses are ever called
/// through.
pub type ModuleEntryFn = unsafe extern "C" fn();

/// Turn a resolved entry address into a callable entry pointer.
///
/// # Safety
///
/// `addr` must be the relocated address of a function with the
/// [`ModuleEntryFn`] signature, resident for as long as the pointer is
/// used.
pub unsafe fn entry_fn(addr: VirtAddr) -> ModuleEntryFn {
    // SAFETY: caller guarantees addr points at code with this signature.
    unsafe { core::mem::transmute::<*const (), ModuleEntryFn>(addr.as_ptr::<()>()) }
}

/// Load a module image, register it, and run its `module_init`.
///
/// The module's undefined symbols resolve against the global kernel
/// symbol table. On loader failure the registration is kept in the
/// [`ModuleState::Failed`] state for diagnostics and the error is
/// returned; no module memory stays allocated.
///
/// # Safety
///
/// Executes code from `image`. The caller vouches that the image is a
/// trusted kernel module whose `module_init` upholds kernel invariants.
pub unsafe fn load_and_start(
    name: &str,
    image: &[u8],
    memory: &dyn ModuleMemory,
) -> ModuleResult<()> {
    let registry = registry::registry();
    registry.begin_load(name)?;

    let module = match kestrel_loader::load_module(image, memory, kernel_symbols()) {
        Ok(module) => module,
        Err(err) => {
            registry.mark_failed(name);
            return Err(err.into());
        }
    };

    let init_addr = module.init;
    registry.mark_running(name, &module)?;

    // SAFETY: init_addr is the relocated module_init of a trusted image
    // per this function's contract.
    let init = unsafe { entry_fn(init_addr) };
    unsafe { init() };

    log::info!("module {name} started, init {:#x}", init_addr.as_u64());
    Ok(())
}
