//! # Symbol Table Index
//!
//! A read-only view over a module's symbol table and its string table.
//! Serves the relocation engine (index lookups) and the entry resolver
//! (name lookups). Entry zero is the reserved null symbol and is skipped
//! by name searches.

use crate::elf::{self, ElfImage, Symbol, SYM_SIZE};
use crate::section::{RequiredTables, SectionTable};
use crate::{LoadError, LoadResult};

/// Index over a symbol table and its associated string table.
///
/// Both tables are borrowed straight from the image; nothing here outlives
/// the load call.
#[derive(Debug, Clone, Copy)]
pub struct SymbolIndex<'a> {
    symtab: &'a [u8],
    strtab: &'a [u8],
    count: usize,
}

impl<'a> SymbolIndex<'a> {
    /// Build an index over raw symbol and string table bytes
    pub fn new(symtab: &'a [u8], strtab: &'a [u8]) -> Self {
        Self {
            symtab,
            strtab,
            count: symtab.len() / SYM_SIZE,
        }
    }

    /// Build the index from the located `.symtab`/`.strtab` sections
    pub(crate) fn build(
        image: &ElfImage<'a>,
        sections: &SectionTable,
        tables: RequiredTables,
    ) -> LoadResult<Self> {
        let sym_hdr = sections
            .header(tables.symtab)
            .ok_or(LoadError::MissingRequiredSection(
                crate::RequiredSection::SymbolTable,
            ))?;
        let str_hdr = sections
            .header(tables.strtab)
            .ok_or(LoadError::MissingRequiredSection(
                crate::RequiredSection::StringTable,
            ))?;

        if sym_hdr.sh_entsize != 0 && sym_hdr.sh_entsize != SYM_SIZE as u64 {
            return Err(LoadError::BadEntrySize {
                section: tables.symtab,
            });
        }

        let symtab = image.slice(sym_hdr.sh_offset, sym_hdr.sh_size)?;
        let strtab = image.slice(str_hdr.sh_offset, str_hdr.sh_size)?;
        Ok(Self::new(symtab, strtab))
    }

    /// Number of symbol entries, including the reserved null entry
    pub fn len(&self) -> usize {
        self.count
    }

    /// Whether the table holds no symbols
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Symbol at `index`
    pub fn by_index(&self, index: u32) -> LoadResult<Symbol> {
        let i = index as usize;
        if i >= self.count {
            return Err(LoadError::BadSymbolIndex(index));
        }
        Symbol::parse(&self.symtab[i * SYM_SIZE..(i + 1) * SYM_SIZE])
    }

    /// Name of a symbol, decoded from the string table
    pub fn name_of(&self, sym: &Symbol) -> LoadResult<&'a str> {
        elf::str_at(self.strtab, sym.st_name)
    }

    /// Find a symbol by name with a linear scan, skipping entry zero
    pub fn by_name(&self, name: &str) -> LoadResult<Option<Symbol>> {
        for i in 1..self.count {
            let sym = self.by_index(i as u32)?;
            if self.name_of(&sym)? == name {
                return Ok(Some(sym));
            }
        }
        Ok(None)
    }
}
