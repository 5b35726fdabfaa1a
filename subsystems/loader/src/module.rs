//! # Kernel Module Loading
//!
//! The module-load pipeline: validate, allocate sections, index symbols,
//! relocate, resolve the entry points. All per-load state lives in a
//! [`LoadContext`] threaded through the components, so loads are
//! reentrant and nothing is shared between two in-flight loads.
//!
//! A failed load hands every section allocation back to the collaborator
//! before returning; no address from a failed load is usable.

use alloc::vec::Vec;

use kestrel_hal::VirtAddr;
use kestrel_memory::ModuleMemory;

use crate::elf::ElfImage;
use crate::reloc;
use crate::section::{AllocatedSection, SectionTable};
use crate::symbols::SymbolIndex;
use crate::{LoadError, LoadResult, STATS};

/// Name of the exported initialization entry a module must carry
pub const MODULE_INIT_SYMBOL: &str = "module_init";

/// Name of the exported finalization entry a module must carry
pub const MODULE_FINI_SYMBOL: &str = "module_fini";

/// Kernel symbol resolver collaborator.
///
/// Answers the relocation engine's queries for symbols the module leaves
/// undefined. The kernel's exported-symbol table implements this.
pub trait SymbolResolver: Send + Sync {
    /// Look up an exported kernel symbol by name
    fn resolve(&self, name: &str) -> Option<VirtAddr>;
}

/// A successfully loaded and relocated kernel module.
///
/// The caller owns the section memory for the module's lifetime; this
/// design has no unload path.
#[derive(Debug)]
pub struct LoadedModule {
    /// Runtime address of the first allocated section
    pub load_bias: VirtAddr,
    /// Resolved address of `module_init`
    pub init: VirtAddr,
    /// Resolved address of `module_fini`
    pub fini: VirtAddr,
    /// Every section allocation backing the module
    pub sections: Vec<AllocatedSection>,
    /// Relocations applied while loading
    pub relocations: usize,
}

/// Per-load pipeline state.
struct LoadContext<'a> {
    image: ElfImage<'a>,
    sections: SectionTable,
}

impl<'a> LoadContext<'a> {
    fn new(image: ElfImage<'a>) -> LoadResult<Self> {
        let sections = SectionTable::parse(&image)?;
        Ok(Self { image, sections })
    }

    fn run(
        &mut self,
        memory: &dyn ModuleMemory,
        resolver: &dyn SymbolResolver,
    ) -> LoadResult<(VirtAddr, VirtAddr, VirtAddr, usize)> {
        // The required tables are located before any memory is taken, so
        // a header-level reject costs nothing.
        let tables = self.sections.locate_required(&self.image)?;

        self.sections.allocate(&self.image, memory)?;
        let load_bias = self.sections.load_bias().ok_or(LoadError::NoResidentSections)?;

        let symbols = SymbolIndex::build(&self.image, &self.sections, tables)?;
        let relocations = reloc::apply_all(&self.image, &self.sections, &symbols, resolver)?;

        let init = self.resolve_entry(&symbols, MODULE_INIT_SYMBOL, load_bias)?;
        let fini = self.resolve_entry(&symbols, MODULE_FINI_SYMBOL, load_bias)?;

        Ok((load_bias, init, fini, relocations))
    }

    /// Entry resolver: init/fini are ordinary global symbols defined
    /// inside the module, so their final address is load bias plus the
    /// symbol's section-relative value.
    fn resolve_entry(
        &self,
        symbols: &SymbolIndex<'_>,
        name: &'static str,
        load_bias: VirtAddr,
    ) -> LoadResult<VirtAddr> {
        let sym = symbols
            .by_name(name)?
            .ok_or(LoadError::MissingEntryPoint(name))?;
        Ok(load_bias.add(sym.st_value))
    }
}

/// Load a relocatable kernel module.
///
/// On success the module's sections are resident, every relocation is
/// applied, and the returned entry addresses are ready to call. On any
/// failure all section allocations are released and the error propagates.
pub fn load_module(
    image_bytes: &[u8],
    memory: &dyn ModuleMemory,
    resolver: &dyn SymbolResolver,
) -> LoadResult<LoadedModule> {
    let image = ElfImage::parse(image_bytes)?;
    let mut ctx = LoadContext::new(image)?;

    match ctx.run(memory, resolver) {
        Ok((load_bias, init, fini, relocations)) => {
            let module = LoadedModule {
                load_bias,
                init,
                fini,
                sections: ctx.sections.into_allocations(),
                relocations,
            };
            STATS.module_loaded();
            log::info!(
                "module loaded: {} sections at {:#x}, {} relocations, init {:#x}",
                module.sections.len(),
                module.load_bias.as_u64(),
                module.relocations,
                module.init.as_u64()
            );
            Ok(module)
        }
        Err(err) => {
            ctx.sections.release(memory);
            STATS.load_failed();
            log::warn!("module load failed: {}", err);
            Err(err)
        }
    }
}
