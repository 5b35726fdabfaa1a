//! # Section Allocation
//!
//! The module-load path gives every section that occupies runtime memory a
//! backing block from the module-memory collaborator. Where a section
//! landed is tracked as an explicit [`Placement`] next to the header - the
//! file offset is never overwritten, so "where the bytes came from" and
//! "where the bytes live now" stay separate, machine-checkable facts.

use alloc::vec::Vec;

use kestrel_hal::VirtAddr;
use kestrel_memory::ModuleMemory;

use crate::elf::{self, ElfImage, SectionHeader, SHT_STRTAB};
use crate::{LoadError, LoadResult, RequiredSection, STATS};

/// Where a section's bytes currently live
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Placement {
    /// Only in the image, at the header's file offset
    InFile,
    /// Copied (or zero-filled) into module memory at this address
    Resident(VirtAddr),
}

/// Record of one section allocation, kept for cleanup and for the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocatedSection {
    /// Section header index
    pub index: usize,
    /// Runtime base address
    pub base: VirtAddr,
    /// Size in bytes
    pub size: usize,
}

/// Indices of the symbol and string tables a module load resolves against
#[derive(Debug, Clone, Copy)]
pub(crate) struct RequiredTables {
    /// `.symtab` section index
    pub symtab: usize,
    /// `.strtab` section index
    pub strtab: usize,
}

/// Per-load view of the section header table and its placements.
pub struct SectionTable {
    headers: Vec<SectionHeader>,
    placements: Vec<Placement>,
    allocations: Vec<AllocatedSection>,
    load_bias: Option<VirtAddr>,
}

impl core::fmt::Debug for SectionTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SectionTable")
            .field("sections", &self.headers.len())
            .field("allocated", &self.allocations.len())
            .field("load_bias", &self.load_bias)
            .finish()
    }
}

impl SectionTable {
    /// Parse every section header up front, bounds-checked.
    pub fn parse(image: &ElfImage<'_>) -> LoadResult<Self> {
        let count = image.header().e_shnum as usize;
        let mut headers = Vec::with_capacity(count);
        for i in 0..count {
            headers.push(image.section_header(i)?);
        }
        let placements = alloc::vec![Placement::InFile; count];
        Ok(Self {
            headers,
            placements,
            allocations: Vec::new(),
            load_bias: None,
        })
    }

    /// Number of sections
    pub fn len(&self) -> usize {
        self.headers.len()
    }

    /// Whether the table is empty
    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// Header of section `index`
    pub fn header(&self, index: usize) -> Option<&SectionHeader> {
        self.headers.get(index)
    }

    /// Placement of section `index`
    pub fn placement(&self, index: usize) -> Option<Placement> {
        self.placements.get(index).copied()
    }

    /// Runtime base of section `index`, failing if it was never allocated
    pub fn resident_base(&self, index: usize) -> LoadResult<VirtAddr> {
        match self.placements.get(index) {
            Some(Placement::Resident(base)) => Ok(*base),
            _ => Err(LoadError::SectionNotResident { section: index }),
        }
    }

    /// The first allocated section's base address
    pub fn load_bias(&self) -> Option<VirtAddr> {
        self.load_bias
    }

    /// Sections allocated so far
    pub fn allocations(&self) -> &[AllocatedSection] {
        &self.allocations
    }

    /// Locate `.symtab` and `.strtab` via the section-name string table.
    ///
    /// The section-name table itself comes from the header's
    /// `e_shstrndx`; a missing or mistyped table is fatal, as is either
    /// named section being absent.
    pub(crate) fn locate_required(&self, image: &ElfImage<'_>) -> LoadResult<RequiredTables> {
        let shstrndx = image.header().e_shstrndx as usize;
        let shstr_hdr = self
            .headers
            .get(shstrndx)
            .filter(|hdr| shstrndx != elf::SHN_UNDEF as usize && hdr.sh_type == SHT_STRTAB)
            .ok_or(LoadError::MissingRequiredSection(
                RequiredSection::SectionNameTable,
            ))?;
        let shstr = image.slice(shstr_hdr.sh_offset, shstr_hdr.sh_size)?;

        let mut symtab = None;
        let mut strtab = None;
        for (i, hdr) in self.headers.iter().enumerate() {
            match elf::str_at(shstr, hdr.sh_name)? {
                ".symtab" => symtab = symtab.or(Some(i)),
                ".strtab" => strtab = strtab.or(Some(i)),
                _ => {}
            }
        }

        Ok(RequiredTables {
            symtab: symtab.ok_or(LoadError::MissingRequiredSection(
                RequiredSection::SymbolTable,
            ))?,
            strtab: strtab.ok_or(LoadError::MissingRequiredSection(
                RequiredSection::StringTable,
            ))?,
        })
    }

    /// Allocate backing memory for every section that occupies memory at
    /// runtime, copying file content or zero-filling BSS-like sections.
    pub(crate) fn allocate(
        &mut self,
        image: &ElfImage<'_>,
        memory: &dyn ModuleMemory,
    ) -> LoadResult<()> {
        for index in 0..self.headers.len() {
            let hdr = self.headers[index];
            if !hdr.is_alloc() || hdr.sh_size == 0 {
                continue;
            }

            // Validate the file bytes before taking memory for them.
            let content = if hdr.is_nobits() {
                None
            } else {
                Some(image.slice(hdr.sh_offset, hdr.sh_size)?)
            };

            let size = hdr.sh_size as usize;
            let align = (hdr.sh_addralign as usize).max(1);
            let base = memory.allocate(size, align).ok_or(LoadError::AllocationFailed)?;

            match content {
                // SAFETY: the collaborator handed us `size` writable bytes
                // at `base`, and `content` is exactly `size` bytes long.
                Some(bytes) => unsafe {
                    core::ptr::copy_nonoverlapping(bytes.as_ptr(), base.as_mut_ptr(), size);
                },
                // SAFETY: same allocation contract as above.
                None => unsafe {
                    core::ptr::write_bytes(base.as_mut_ptr::<u8>(), 0, size);
                },
            }

            self.placements[index] = Placement::Resident(base);
            self.allocations.push(AllocatedSection { index, base, size });
            if self.load_bias.is_none() {
                self.load_bias = Some(base);
            }
            STATS.section_allocated();
            log::debug!(
                "section {}: {} bytes at {:#x}{}",
                index,
                size,
                base.as_u64(),
                if hdr.is_nobits() { " (zero-filled)" } else { "" }
            );
        }
        Ok(())
    }

    /// Hand every allocation back to the collaborator (failed-load path).
    pub(crate) fn release(&mut self, memory: &dyn ModuleMemory) {
        for alloc in self.allocations.drain(..) {
            self.placements[alloc.index] = Placement::InFile;
            memory.free(alloc.base, alloc.size);
        }
        self.load_bias = None;
    }

    /// Consume the table, keeping the allocation records
    pub(crate) fn into_allocations(self) -> Vec<AllocatedSection> {
        self.allocations
    }
}
