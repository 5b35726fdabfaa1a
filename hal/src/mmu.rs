//! # MMU Vocabulary
//!
//! Page flags and memory region kinds shared by the memory subsystem and
//! the loader.

use bitflags::bitflags;

bitflags! {
    /// Page table entry flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u64 {
        /// Page is present in memory
        const PRESENT = 1 << 0;
        /// Page is writable
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode
        const USER = 1 << 2;
        /// Page is write-through cached
        const WRITE_THROUGH = 1 << 3;
        /// Page caching is disabled
        const NO_CACHE = 1 << 4;
        /// Page has been accessed
        const ACCESSED = 1 << 5;
        /// Page has been written to
        const DIRTY = 1 << 6;
        /// Page is global (not flushed on context switch)
        const GLOBAL = 1 << 8;
        /// Page is not executable (NX bit)
        const NO_EXECUTE = 1 << 63;
    }
}

impl PageFlags {
    /// Create flags for kernel code
    pub const fn kernel_code() -> Self {
        Self::PRESENT.union(Self::GLOBAL)
    }

    /// Create flags for kernel data
    pub const fn kernel_data() -> Self {
        Self::PRESENT.union(Self::WRITABLE).union(Self::NO_EXECUTE).union(Self::GLOBAL)
    }

    /// Create flags for user code
    pub const fn user_code() -> Self {
        Self::PRESENT.union(Self::USER)
    }

    /// Create flags for user data
    pub const fn user_data() -> Self {
        Self::PRESENT.union(Self::WRITABLE).union(Self::USER).union(Self::NO_EXECUTE)
    }
}

/// Types of memory regions tracked by the address-space bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryRegionKind {
    /// Regular anonymous memory
    Regular,
    /// Reserved by firmware or the kernel
    Reserved,
    /// Kernel code/data
    Kernel,
    /// File-backed memory
    File,
    /// MMIO region
    Mmio,
}
