//! # Relocation Engine
//!
//! Applies x86_64 relocation-with-addend entries to sections that already
//! have backing memory. The arithmetic lives in [`compute`], a pure
//! function over `(type, S, A, P)`; the section walker resolves symbols,
//! range-checks the patch location and writes the result in place.
//!
//! Relocation sections are processed in section-header order, entries in
//! file order. A relocation section whose target was never allocated is
//! skipped - it patches bytes that will not exist at runtime.

use crate::elf::{
    ElfImage, Rela, RELA_SIZE, R_X86_64_32, R_X86_64_32S, R_X86_64_64, R_X86_64_NONE,
    R_X86_64_PC32, SHN_ABS, SHN_UNDEF, SHT_RELA, STB_WEAK, STN_UNDEF,
};
use crate::module::SymbolResolver;
use crate::section::SectionTable;
use crate::symbols::SymbolIndex;
use crate::{LoadError, LoadResult, STATS};

use alloc::string::ToString;

/// The word a relocation writes at the patch location
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Patch {
    /// Type "none": nothing is written
    None,
    /// A full 64-bit value
    Word64(u64),
    /// A truncated 32-bit value
    Word32(u32),
}

impl Patch {
    /// Width of the written word in bytes
    pub const fn width(self) -> u64 {
        match self {
            Patch::None => 0,
            Patch::Word64(_) => 8,
            Patch::Word32(_) => 4,
        }
    }
}

/// Compute the patch for relocation type `kind` given the resolved symbol
/// value `S`, the addend `A` and the patch location's absolute address `P`.
pub fn compute(kind: u32, s: u64, a: i64, p: u64) -> LoadResult<Patch> {
    let sa = s.wrapping_add(a as u64);
    match kind {
        R_X86_64_NONE => Ok(Patch::None),
        R_X86_64_64 => Ok(Patch::Word64(sa)),
        R_X86_64_32 => Ok(Patch::Word32(sa as u32)),
        R_X86_64_32S => {
            // The encoding is 32 bits sign-extended; a value outside the
            // signed range truncates, matching the hardware slot.
            if sa as i64 != (sa as i32) as i64 {
                log::debug!("R_X86_64_32S value {:#x} does not fit 32 signed bits", sa);
            }
            Ok(Patch::Word32(sa as u32))
        }
        R_X86_64_PC32 => Ok(Patch::Word32(sa.wrapping_sub(p) as u32)),
        other => Err(LoadError::UnsupportedRelocation(other)),
    }
}

/// Resolve a relocation's symbol to its absolute value `S`.
///
/// Undefined symbols go to the kernel resolver; a miss resolves weak
/// symbols to zero and fails the load for anything stronger. Absolute
/// symbols are used verbatim. Everything else is section-relative and is
/// rebased onto the section's runtime address.
pub(crate) fn resolve_symbol(
    index: u32,
    symbols: &SymbolIndex<'_>,
    sections: &SectionTable,
    resolver: &dyn SymbolResolver,
) -> LoadResult<u64> {
    let sym = symbols.by_index(index)?;
    match sym.st_shndx {
        SHN_UNDEF => {
            let name = symbols.name_of(&sym)?;
            match resolver.resolve(name) {
                Some(addr) => Ok(addr.as_u64()),
                None if sym.binding() == STB_WEAK => Ok(0),
                None => Err(LoadError::UnresolvedSymbol(name.to_string())),
            }
        }
        SHN_ABS => Ok(sym.st_value),
        shndx => {
            let base = sections.resident_base(shndx as usize)?;
            Ok(base.as_u64().wrapping_add(sym.st_value))
        }
    }
}

/// Apply every relocation-with-addend section of `image`.
///
/// Stops at the first failure; the caller tears down the partial load.
/// Returns the number of relocations applied.
pub(crate) fn apply_all(
    image: &ElfImage<'_>,
    sections: &SectionTable,
    symbols: &SymbolIndex<'_>,
    resolver: &dyn SymbolResolver,
) -> LoadResult<usize> {
    let mut applied = 0usize;

    for i in 0..sections.len() {
        let hdr = match sections.header(i) {
            Some(hdr) if hdr.sh_type == SHT_RELA => *hdr,
            _ => continue,
        };

        let target = hdr.sh_info as usize;
        let base = match sections.resident_base(target) {
            Ok(base) => base,
            // Target carries no runtime bytes (e.g. debug relocations).
            Err(_) => continue,
        };
        let target_size = sections.header(target).map_or(0, |h| h.sh_size);

        if hdr.sh_entsize != 0 && hdr.sh_entsize != RELA_SIZE as u64 {
            return Err(LoadError::BadEntrySize { section: i });
        }
        let entries = image.slice(hdr.sh_offset, hdr.sh_size)?;
        let partial = entries.len() % RELA_SIZE;
        if partial != 0 {
            return Err(LoadError::Truncated {
                offset: hdr.sh_offset + (entries.len() - partial) as u64,
                len: RELA_SIZE as u64,
            });
        }

        for record in entries.chunks_exact(RELA_SIZE) {
            let rela = Rela::parse(record)?;
            if rela.symbol_index() == STN_UNDEF {
                // No relocation type defined here needs the null symbol;
                // tolerate the entry rather than fault on it.
                continue;
            }

            let s = resolve_symbol(rela.symbol_index(), symbols, sections, resolver)?;
            let p = base.as_u64().wrapping_add(rela.r_offset);
            let patch = compute(rela.kind(), s, rela.r_addend, p)?;

            let width = patch.width();
            if width > 0 {
                let end = rela
                    .r_offset
                    .checked_add(width)
                    .ok_or(LoadError::Truncated { offset: rela.r_offset, len: width })?;
                if end > target_size {
                    return Err(LoadError::Truncated { offset: rela.r_offset, len: width });
                }
            }

            match patch {
                Patch::None => {}
                // SAFETY: `p` lies within the target section's allocation
                // (checked against `target_size` above) and the section's
                // memory stays alive for the whole load.
                Patch::Word64(value) => unsafe {
                    core::ptr::write_unaligned(p as *mut u64, value);
                },
                // SAFETY: same range check as above, 4-byte word.
                Patch::Word32(value) => unsafe {
                    core::ptr::write_unaligned(p as *mut u32, value);
                },
            }

            if !matches!(patch, Patch::None) {
                STATS.relocation_applied();
                applied += 1;
            }
        }

        log::debug!(
            "relocation section {}: patched target {} at {:#x}",
            i,
            target,
            base.as_u64()
        );
    }

    Ok(applied)
}
