//! # Kestrel Memory Subsystem
//!
//! Interfaces between the loader and the machinery that backs it with
//! memory:
//!
//! - [`AddressSpace`] - virtual mappings for whole program segments
//! - [`ModuleMemory`] - block allocations for kernel module sections
//!
//! ## Key Principle
//!
//! Like all Kestrel subsystems, this crate provides the seams, not the
//! implementations. Page-table walkers and allocators live behind these
//! traits and can be swapped per architecture or per test.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

use kestrel_hal::mmu::{MemoryRegionKind, PageFlags};
use kestrel_hal::VirtAddr;

/// Memory subsystem result type
pub type MemResult<T> = Result<T, MemError>;

/// Memory subsystem errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    /// Out of memory
    OutOfMemory,
    /// Invalid address
    InvalidAddress,
    /// Invalid size
    InvalidSize,
    /// Address not aligned
    NotAligned,
    /// Region already mapped
    AlreadyMapped,
    /// Region not mapped
    NotMapped,
    /// Permission denied
    PermissionDenied,
    /// Internal error
    Internal,
}

/// Virtual address space collaborator.
///
/// Used by the static-program load path to place whole segments. Mapped
/// pages are guaranteed zero-initialized, so a segment's BSS tail needs no
/// explicit clearing.
pub trait AddressSpace: Send + Sync {
    /// Map `pages` zeroed pages starting at `start` and return a writable
    /// view of the mapping.
    fn map_pages(&self, start: VirtAddr, pages: usize, flags: PageFlags) -> MemResult<*mut u8>;

    /// Record `pages` pages starting at `start` as a region of the given
    /// kind. Pure bookkeeping for later fault handling; does not map.
    fn reserve_pages(
        &self,
        start: VirtAddr,
        pages: usize,
        kind: MemoryRegionKind,
        flags: PageFlags,
    ) -> MemResult<()>;
}

/// Module memory collaborator.
///
/// Backs kernel-module sections with kernel memory. Allocations live for
/// the module's lifetime; `free` exists so a failed load can hand back what
/// it already took.
pub trait ModuleMemory: Send + Sync {
    /// Allocate `size` bytes aligned to `align`. Returns the block's
    /// address, or `None` if no memory is available.
    fn allocate(&self, size: usize, align: usize) -> Option<VirtAddr>;

    /// Release a block previously returned by [`ModuleMemory::allocate`].
    fn free(&self, addr: VirtAddr, size: usize);
}
