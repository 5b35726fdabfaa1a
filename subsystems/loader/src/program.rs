//! # Static Program Loading
//!
//! Maps a pre-linked executable's loadable segments into a fresh address
//! space. No relocation happens on this path; the image is placed exactly
//! where its program headers say and the recorded entry point is returned
//! as the process start address.

use kestrel_hal::mmu::{MemoryRegionKind, PageFlags};
use kestrel_hal::VirtAddr;
use kestrel_memory::AddressSpace;

use crate::elf::ElfImage;
use crate::{LoadError, LoadResult, STATS};

/// Page granularity of the segment mapper
pub const PAGE_SIZE: u64 = 4096;

/// Map every loadable segment of `image` into `space` and return the
/// image's entry point.
///
/// For each PT_LOAD entry the mapper requests `ceil(memsz / PAGE_SIZE)`
/// writable, user-accessible pages at the page-aligned virtual address,
/// reserves the same region as regular memory for later fault handling,
/// and copies the file-backed bytes. The BSS tail stays untouched: mapped
/// pages arrive zeroed.
pub fn load_program(image: &ElfImage<'_>, space: &dyn AddressSpace) -> LoadResult<VirtAddr> {
    let header = *image.header();
    let mut loaded = 0usize;

    for i in 0..header.e_phnum as usize {
        let phdr = image.program_header(i)?;
        if !phdr.is_loadable() || phdr.p_memsz == 0 {
            continue;
        }

        // The mapping is sized from memsz; a larger filesz would copy
        // past its end.
        if phdr.p_filesz > phdr.p_memsz {
            return Err(LoadError::OversizedSegment { segment: i });
        }

        let base = VirtAddr::new(phdr.p_vaddr).align_down(PAGE_SIZE);
        let span = phdr.p_vaddr - base.as_u64() + phdr.p_memsz;
        let pages = span.div_ceil(PAGE_SIZE) as usize;
        let flags = PageFlags::user_data();

        // Bounds-check the file bytes before touching the address space.
        let file_bytes = image.slice(phdr.p_offset, phdr.p_filesz)?;

        let mapping = space.map_pages(base, pages, flags)?;
        space.reserve_pages(base, pages, MemoryRegionKind::Regular, flags)?;

        // SAFETY: `mapping` spans `pages * PAGE_SIZE` bytes starting at
        // `base`, and `(p_vaddr - base) + p_filesz <= span` because
        // p_filesz <= p_memsz was checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(
                file_bytes.as_ptr(),
                mapping.add((phdr.p_vaddr - base.as_u64()) as usize),
                file_bytes.len(),
            );
        }

        log::debug!(
            "segment {}: {:#x}..{:#x} ({} pages, filesz {:#x})",
            i,
            phdr.p_vaddr,
            phdr.p_vaddr + phdr.p_memsz,
            pages,
            phdr.p_filesz
        );
        loaded += 1;
    }

    if loaded == 0 {
        return Err(LoadError::NoLoadableSegments);
    }

    STATS.program_loaded();
    log::info!("program loaded: {} segments, entry {:#x}", loaded, header.e_entry);
    Ok(VirtAddr::new(header.e_entry))
}
