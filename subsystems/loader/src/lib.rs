//! # Kestrel ELF64 Loader
//!
//! Turns a raw ELF64 image into running kernel code. Two load paths share
//! the header validator and nothing else:
//!
//! - **Static programs**: loadable segments are mapped into a fresh address
//!   space, file bytes copied, the BSS tail left to the zeroed-page
//!   guarantee, and the image's entry point returned.
//! - **Relocatable kernel modules**: every allocatable section gets backing
//!   memory, a symbol index is built over the module's symbol table,
//!   external references are resolved against the kernel's exported
//!   symbols, x86_64 relocations are applied in place, and the module's
//!   `module_init`/`module_fini` addresses are returned.
//!
//! The kernel is its own runtime linker: there is nothing beneath this
//! crate but the memory collaborators in `kestrel-memory`.
//!
//! ## Hardening
//!
//! Every offset taken from the image (program headers, section headers,
//! symbols, relocations, string tables) is range-checked against the image
//! length before use. The loader never casts the image buffer to a header
//! pointer.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

extern crate alloc;

pub mod elf;
pub mod module;
pub mod program;
pub mod reloc;
pub mod section;
pub mod symbols;

#[cfg(test)]
pub(crate) mod testutil;

use alloc::string::String;
use core::fmt;
use core::sync::atomic::{AtomicU64, Ordering};

use kestrel_memory::MemError;

// Re-exports
pub use elf::{ElfHeader, ElfImage, ProgramHeader, Rela, SectionHeader, Symbol};
pub use module::{load_module, LoadedModule, SymbolResolver};
pub use program::load_program;
pub use section::{AllocatedSection, Placement};
pub use symbols::SymbolIndex;

/// Loader result type
pub type LoadResult<T> = Result<T, LoadError>;

/// Header identification checks, in the order they are performed.
///
/// Carried by [`LoadError::InvalidFormat`] for diagnostics; control flow
/// does not depend on which check failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatCheck {
    /// Four-byte `\x7fELF` magic
    Magic,
    /// File class (must be 64-bit)
    Class,
    /// Data encoding (must be little-endian)
    Encoding,
    /// Identification version (must be current)
    Version,
    /// OS/ABI byte (must be SYSV)
    OsAbi,
    /// ABI version byte (must be zero)
    AbiVersion,
    /// Machine type (must be x86_64)
    Machine,
}

impl FormatCheck {
    /// Name of the header field the check covers
    pub const fn field(self) -> &'static str {
        match self {
            FormatCheck::Magic => "magic",
            FormatCheck::Class => "class",
            FormatCheck::Encoding => "data encoding",
            FormatCheck::Version => "version",
            FormatCheck::OsAbi => "OS/ABI",
            FormatCheck::AbiVersion => "ABI version",
            FormatCheck::Machine => "machine",
        }
    }
}

/// Sections a module load cannot proceed without
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequiredSection {
    /// `.symtab`
    SymbolTable,
    /// `.strtab`
    StringTable,
    /// `.shstrtab`
    SectionNameTable,
}

impl RequiredSection {
    /// Conventional name of the section
    pub const fn name(self) -> &'static str {
        match self {
            RequiredSection::SymbolTable => ".symtab",
            RequiredSection::StringTable => ".strtab",
            RequiredSection::SectionNameTable => ".shstrtab",
        }
    }
}

/// Loader errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    /// A header identification check failed
    InvalidFormat(FormatCheck),
    /// An offset derived from the image points past its end
    Truncated {
        /// Offset of the out-of-range access
        offset: u64,
        /// Length of the out-of-range access
        len: u64,
    },
    /// A string table entry is unterminated or not UTF-8
    BadString {
        /// Offset of the string within its table
        offset: u64,
    },
    /// A table section's entry size does not match its entry type
    BadEntrySize {
        /// Index of the offending section
        section: usize,
    },
    /// A loadable segment's file size exceeds its memory size
    OversizedSegment {
        /// Index of the offending program header
        segment: usize,
    },
    /// The image has no loadable segments
    NoLoadableSegments,
    /// The module has no allocatable sections
    NoResidentSections,
    /// `.symtab`, `.strtab` or `.shstrtab` is absent
    MissingRequiredSection(RequiredSection),
    /// A relocation refers into a section that was never allocated
    SectionNotResident {
        /// Index of the offending section
        section: usize,
    },
    /// A relocation names a symbol index past the end of the symbol table
    BadSymbolIndex(u32),
    /// A non-weak external symbol was not found in the kernel symbol table
    UnresolvedSymbol(String),
    /// A relocation type this loader does not apply
    UnsupportedRelocation(u32),
    /// `module_init` or `module_fini` is absent after relocation
    MissingEntryPoint(&'static str),
    /// The module memory collaborator ran out of memory
    AllocationFailed,
    /// The address space collaborator failed
    Map(MemError),
}

impl From<MemError> for LoadError {
    fn from(e: MemError) -> Self {
        LoadError::Map(e)
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::InvalidFormat(check) => {
                write!(f, "invalid ELF header: bad {}", check.field())
            }
            LoadError::Truncated { offset, len } => {
                write!(f, "image truncated: {} bytes at offset {:#x}", len, offset)
            }
            LoadError::BadString { offset } => {
                write!(f, "bad string table entry at offset {:#x}", offset)
            }
            LoadError::BadEntrySize { section } => {
                write!(f, "bad entry size in section {}", section)
            }
            LoadError::OversizedSegment { segment } => {
                write!(f, "segment {} file size exceeds memory size", segment)
            }
            LoadError::NoLoadableSegments => write!(f, "no loadable segments"),
            LoadError::NoResidentSections => write!(f, "no allocatable sections"),
            LoadError::MissingRequiredSection(s) => {
                write!(f, "required section {} is missing", s.name())
            }
            LoadError::SectionNotResident { section } => {
                write!(f, "relocation against unallocated section {}", section)
            }
            LoadError::BadSymbolIndex(index) => {
                write!(f, "symbol index {} out of range", index)
            }
            LoadError::UnresolvedSymbol(name) => {
                write!(f, "unresolved symbol: {}", name)
            }
            LoadError::UnsupportedRelocation(kind) => {
                write!(f, "unsupported relocation type {}", kind)
            }
            LoadError::MissingEntryPoint(name) => {
                write!(f, "missing entry point: {}", name)
            }
            LoadError::AllocationFailed => write!(f, "module memory allocation failed"),
            LoadError::Map(e) => write!(f, "mapping failed: {:?}", e),
        }
    }
}

/// Statistics for the loader
#[derive(Debug, Default)]
pub struct LoaderStats {
    /// Static programs loaded
    pub programs_loaded: AtomicU64,
    /// Kernel modules loaded
    pub modules_loaded: AtomicU64,
    /// Module loads that failed
    pub loads_failed: AtomicU64,
    /// Sections given backing memory
    pub sections_allocated: AtomicU64,
    /// Relocations applied
    pub relocations_applied: AtomicU64,
}

impl LoaderStats {
    /// Create new stats
    pub const fn new() -> Self {
        Self {
            programs_loaded: AtomicU64::new(0),
            modules_loaded: AtomicU64::new(0),
            loads_failed: AtomicU64::new(0),
            sections_allocated: AtomicU64::new(0),
            relocations_applied: AtomicU64::new(0),
        }
    }

    /// Count a loaded program
    pub fn program_loaded(&self) {
        self.programs_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a loaded module
    pub fn module_loaded(&self) {
        self.modules_loaded.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a failed load
    pub fn load_failed(&self) {
        self.loads_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an allocated section
    pub fn section_allocated(&self) {
        self.sections_allocated.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an applied relocation
    pub fn relocation_applied(&self) {
        self.relocations_applied.fetch_add(1, Ordering::Relaxed);
    }
}

/// Global loader statistics
pub static STATS: LoaderStats = LoaderStats::new();
