//! # ELF64 Container Format
//!
//! Constants, on-disk record types and bounds-checked parsing for the
//! ELF64 little-endian SYSV container. All multi-byte fields are decoded
//! with `from_le_bytes` after an explicit range check; the image buffer is
//! never reinterpreted as a header struct.

use core::mem;

use static_assertions::const_assert_eq;

use crate::{FormatCheck, LoadError, LoadResult};

/// ELF magic number
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// ELF class - 64-bit
pub const ELFCLASS64: u8 = 2;

/// ELF data encoding - little endian
pub const ELFDATA2LSB: u8 = 1;

/// ELF identification version
pub const EV_CURRENT: u8 = 1;

/// ELF OS/ABI - System V
pub const ELFOSABI_SYSV: u8 = 0;

/// Machine type - x86_64
pub const EM_X86_64: u16 = 62;

/// Program header type - unused entry
pub const PT_NULL: u32 = 0;

/// Program header type - loadable segment
pub const PT_LOAD: u32 = 1;

/// Section type - unused entry
pub const SHT_NULL: u32 = 0;

/// Section type - program data
pub const SHT_PROGBITS: u32 = 1;

/// Section type - symbol table
pub const SHT_SYMTAB: u32 = 2;

/// Section type - string table
pub const SHT_STRTAB: u32 = 3;

/// Section type - relocation entries with addends
pub const SHT_RELA: u32 = 4;

/// Section type - uninitialized data (no file bits)
pub const SHT_NOBITS: u32 = 8;

/// Section flag - occupies memory at runtime
pub const SHF_ALLOC: u64 = 2;

/// Reserved section index - undefined
pub const SHN_UNDEF: u16 = 0;

/// Reserved section index - absolute value
pub const SHN_ABS: u16 = 0xfff1;

/// Reserved symbol table index - no symbol
pub const STN_UNDEF: u32 = 0;

/// Symbol binding - local
pub const STB_LOCAL: u8 = 0;

/// Symbol binding - global
pub const STB_GLOBAL: u8 = 1;

/// Symbol binding - weak
pub const STB_WEAK: u8 = 2;

/// Relocation type - none
pub const R_X86_64_NONE: u32 = 0;

/// Relocation type - direct 64-bit
pub const R_X86_64_64: u32 = 1;

/// Relocation type - PC-relative 32-bit
pub const R_X86_64_PC32: u32 = 2;

/// Relocation type - direct 32-bit zero-extended
pub const R_X86_64_32: u32 = 10;

/// Relocation type - direct 32-bit sign-extended
pub const R_X86_64_32S: u32 = 11;

/// On-disk size of the ELF64 header
pub const EHDR_SIZE: usize = 64;

/// On-disk size of a program header entry
pub const PHDR_SIZE: usize = 56;

/// On-disk size of a section header entry
pub const SHDR_SIZE: usize = 64;

/// On-disk size of a symbol table entry
pub const SYM_SIZE: usize = 24;

/// On-disk size of a relocation-with-addend entry
pub const RELA_SIZE: usize = 24;

/// ELF64 Header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct ElfHeader {
    /// Magic number and identification
    pub e_ident: [u8; 16],
    /// Object file type
    pub e_type: u16,
    /// Machine type
    pub e_machine: u16,
    /// Object file version
    pub e_version: u32,
    /// Entry point address
    pub e_entry: u64,
    /// Program header offset
    pub e_phoff: u64,
    /// Section header offset
    pub e_shoff: u64,
    /// Processor-specific flags
    pub e_flags: u32,
    /// ELF header size
    pub e_ehsize: u16,
    /// Program header entry size
    pub e_phentsize: u16,
    /// Number of program headers
    pub e_phnum: u16,
    /// Section header entry size
    pub e_shentsize: u16,
    /// Number of section headers
    pub e_shnum: u16,
    /// Section name string table index
    pub e_shstrndx: u16,
}

const_assert_eq!(mem::size_of::<ElfHeader>(), EHDR_SIZE);

impl ElfHeader {
    /// Parse and validate an ELF header.
    ///
    /// The identification checks run in a fixed order: magic, class, data
    /// encoding, version, OS/ABI, ABI version, then machine. No other
    /// field is read before all checks pass.
    pub fn parse(data: &[u8]) -> LoadResult<Self> {
        if data.len() < EHDR_SIZE {
            return Err(LoadError::Truncated {
                offset: 0,
                len: EHDR_SIZE as u64,
            });
        }

        if data[0..4] != ELF_MAGIC {
            return Err(LoadError::InvalidFormat(FormatCheck::Magic));
        }
        if data[4] != ELFCLASS64 {
            return Err(LoadError::InvalidFormat(FormatCheck::Class));
        }
        if data[5] != ELFDATA2LSB {
            return Err(LoadError::InvalidFormat(FormatCheck::Encoding));
        }
        if data[6] != EV_CURRENT {
            return Err(LoadError::InvalidFormat(FormatCheck::Version));
        }
        if data[7] != ELFOSABI_SYSV {
            return Err(LoadError::InvalidFormat(FormatCheck::OsAbi));
        }
        if data[8] != 0 {
            return Err(LoadError::InvalidFormat(FormatCheck::AbiVersion));
        }

        let e_machine = u16::from_le_bytes([data[18], data[19]]);
        if e_machine != EM_X86_64 {
            return Err(LoadError::InvalidFormat(FormatCheck::Machine));
        }

        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[0..16]);

        Ok(Self {
            e_ident,
            e_type: u16::from_le_bytes([data[16], data[17]]),
            e_machine,
            e_version: u32::from_le_bytes([data[20], data[21], data[22], data[23]]),
            e_entry: u64::from_le_bytes([
                data[24], data[25], data[26], data[27],
                data[28], data[29], data[30], data[31],
            ]),
            e_phoff: u64::from_le_bytes([
                data[32], data[33], data[34], data[35],
                data[36], data[37], data[38], data[39],
            ]),
            e_shoff: u64::from_le_bytes([
                data[40], data[41], data[42], data[43],
                data[44], data[45], data[46], data[47],
            ]),
            e_flags: u32::from_le_bytes([data[48], data[49], data[50], data[51]]),
            e_ehsize: u16::from_le_bytes([data[52], data[53]]),
            e_phentsize: u16::from_le_bytes([data[54], data[55]]),
            e_phnum: u16::from_le_bytes([data[56], data[57]]),
            e_shentsize: u16::from_le_bytes([data[58], data[59]]),
            e_shnum: u16::from_le_bytes([data[60], data[61]]),
            e_shstrndx: u16::from_le_bytes([data[62], data[63]]),
        })
    }

    /// Get entry point
    pub fn entry_point(&self) -> u64 {
        self.e_entry
    }
}

/// ELF64 Program Header
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct ProgramHeader {
    /// Segment type
    pub p_type: u32,
    /// Segment flags
    pub p_flags: u32,
    /// Offset in file
    pub p_offset: u64,
    /// Virtual address
    pub p_vaddr: u64,
    /// Physical address
    pub p_paddr: u64,
    /// Size in file
    pub p_filesz: u64,
    /// Size in memory
    pub p_memsz: u64,
    /// Alignment
    pub p_align: u64,
}

const_assert_eq!(mem::size_of::<ProgramHeader>(), PHDR_SIZE);

impl ProgramHeader {
    /// Parse a program header entry at `offset` in the image
    pub fn parse(data: &[u8], offset: usize) -> LoadResult<Self> {
        let end = offset.checked_add(PHDR_SIZE).filter(|&end| end <= data.len());
        if end.is_none() {
            return Err(LoadError::Truncated {
                offset: offset as u64,
                len: PHDR_SIZE as u64,
            });
        }

        let d = &data[offset..];

        Ok(Self {
            p_type: u32::from_le_bytes([d[0], d[1], d[2], d[3]]),
            p_flags: u32::from_le_bytes([d[4], d[5], d[6], d[7]]),
            p_offset: u64::from_le_bytes([d[8], d[9], d[10], d[11], d[12], d[13], d[14], d[15]]),
            p_vaddr: u64::from_le_bytes([d[16], d[17], d[18], d[19], d[20], d[21], d[22], d[23]]),
            p_paddr: u64::from_le_bytes([d[24], d[25], d[26], d[27], d[28], d[29], d[30], d[31]]),
            p_filesz: u64::from_le_bytes([d[32], d[33], d[34], d[35], d[36], d[37], d[38], d[39]]),
            p_memsz: u64::from_le_bytes([d[40], d[41], d[42], d[43], d[44], d[45], d[46], d[47]]),
            p_align: u64::from_le_bytes([d[48], d[49], d[50], d[51], d[52], d[53], d[54], d[55]]),
        })
    }

    /// Check if segment is loadable
    pub fn is_loadable(&self) -> bool {
        self.p_type == PT_LOAD
    }
}

/// ELF64 Section Header
#[derive(Debug, Clone, Copy)]
#[repr(C)]
pub struct SectionHeader {
    /// Section name (offset into the section name string table)
    pub sh_name: u32,
    /// Section type
    pub sh_type: u32,
    /// Section flags
    pub sh_flags: u64,
    /// Virtual address
    pub sh_addr: u64,
    /// Offset in file
    pub sh_offset: u64,
    /// Size in bytes
    pub sh_size: u64,
    /// Link to an associated section
    pub sh_link: u32,
    /// Additional section info (target section for relocation sections)
    pub sh_info: u32,
    /// Address alignment
    pub sh_addralign: u64,
    /// Entry size (for table-like sections)
    pub sh_entsize: u64,
}

const_assert_eq!(mem::size_of::<SectionHeader>(), SHDR_SIZE);

impl SectionHeader {
    /// Parse a section header entry at `offset` in the image
    pub fn parse(data: &[u8], offset: usize) -> LoadResult<Self> {
        let end = offset.checked_add(SHDR_SIZE).filter(|&end| end <= data.len());
        if end.is_none() {
            return Err(LoadError::Truncated {
                offset: offset as u64,
                len: SHDR_SIZE as u64,
            });
        }

        let d = &data[offset..];

        Ok(Self {
            sh_name: u32::from_le_bytes([d[0], d[1], d[2], d[3]]),
            sh_type: u32::from_le_bytes([d[4], d[5], d[6], d[7]]),
            sh_flags: u64::from_le_bytes([d[8], d[9], d[10], d[11], d[12], d[13], d[14], d[15]]),
            sh_addr: u64::from_le_bytes([d[16], d[17], d[18], d[19], d[20], d[21], d[22], d[23]]),
            sh_offset: u64::from_le_bytes([d[24], d[25], d[26], d[27], d[28], d[29], d[30], d[31]]),
            sh_size: u64::from_le_bytes([d[32], d[33], d[34], d[35], d[36], d[37], d[38], d[39]]),
            sh_link: u32::from_le_bytes([d[40], d[41], d[42], d[43]]),
            sh_info: u32::from_le_bytes([d[44], d[45], d[46], d[47]]),
            sh_addralign: u64::from_le_bytes([d[48], d[49], d[50], d[51], d[52], d[53], d[54], d[55]]),
            sh_entsize: u64::from_le_bytes([d[56], d[57], d[58], d[59], d[60], d[61], d[62], d[63]]),
        })
    }

    /// Check if the section occupies memory at runtime
    pub fn is_alloc(&self) -> bool {
        self.sh_flags & SHF_ALLOC != 0
    }

    /// Check if the section has no file bits (BSS-like)
    pub fn is_nobits(&self) -> bool {
        self.sh_type == SHT_NOBITS
    }
}

/// ELF64 symbol table entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Symbol {
    /// Symbol name (offset into the string table)
    pub st_name: u32,
    /// Binding and type
    pub st_info: u8,
    /// Symbol visibility
    pub st_other: u8,
    /// Associated section index
    pub st_shndx: u16,
    /// Symbol value
    pub st_value: u64,
    /// Symbol size
    pub st_size: u64,
}

const_assert_eq!(mem::size_of::<Symbol>(), SYM_SIZE);

impl Symbol {
    /// Parse a symbol entry from a 24-byte record
    pub fn parse(data: &[u8]) -> LoadResult<Self> {
        if data.len() < SYM_SIZE {
            return Err(LoadError::Truncated {
                offset: 0,
                len: SYM_SIZE as u64,
            });
        }

        Ok(Self {
            st_name: u32::from_le_bytes([data[0], data[1], data[2], data[3]]),
            st_info: data[4],
            st_other: data[5],
            st_shndx: u16::from_le_bytes([data[6], data[7]]),
            st_value: u64::from_le_bytes([
                data[8], data[9], data[10], data[11],
                data[12], data[13], data[14], data[15],
            ]),
            st_size: u64::from_le_bytes([
                data[16], data[17], data[18], data[19],
                data[20], data[21], data[22], data[23],
            ]),
        })
    }

    /// Get symbol binding
    pub fn binding(&self) -> u8 {
        self.st_info >> 4
    }

    /// Get symbol type
    pub fn symbol_type(&self) -> u8 {
        self.st_info & 0xf
    }

    /// Check if the symbol is defined outside this image
    pub fn is_undefined(&self) -> bool {
        self.st_shndx == SHN_UNDEF
    }
}

/// ELF64 relocation-with-addend entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct Rela {
    /// Offset of the patched word within the target section
    pub r_offset: u64,
    /// Packed symbol index and relocation type
    pub r_info: u64,
    /// Signed addend
    pub r_addend: i64,
}

const_assert_eq!(mem::size_of::<Rela>(), RELA_SIZE);

impl Rela {
    /// Parse a relocation entry from a 24-byte record
    pub fn parse(data: &[u8]) -> LoadResult<Self> {
        if data.len() < RELA_SIZE {
            return Err(LoadError::Truncated {
                offset: 0,
                len: RELA_SIZE as u64,
            });
        }

        Ok(Self {
            r_offset: u64::from_le_bytes([
                data[0], data[1], data[2], data[3],
                data[4], data[5], data[6], data[7],
            ]),
            r_info: u64::from_le_bytes([
                data[8], data[9], data[10], data[11],
                data[12], data[13], data[14], data[15],
            ]),
            r_addend: i64::from_le_bytes([
                data[16], data[17], data[18], data[19],
                data[20], data[21], data[22], data[23],
            ]),
        })
    }

    /// Index of the referenced symbol
    pub fn symbol_index(&self) -> u32 {
        (self.r_info >> 32) as u32
    }

    /// Relocation type code
    pub fn kind(&self) -> u32 {
        self.r_info as u32
    }
}

/// A validated view over a raw ELF64 image.
///
/// Owns nothing: the caller keeps the byte buffer alive for the duration
/// of the load. All accessors re-check offsets against the buffer length.
#[derive(Debug, Clone, Copy)]
pub struct ElfImage<'a> {
    bytes: &'a [u8],
    header: ElfHeader,
}

impl<'a> ElfImage<'a> {
    /// Validate the header and wrap the image
    pub fn parse(bytes: &'a [u8]) -> LoadResult<Self> {
        let header = ElfHeader::parse(bytes)?;
        Ok(Self { bytes, header })
    }

    /// The validated header
    pub fn header(&self) -> &ElfHeader {
        &self.header
    }

    /// The raw image bytes
    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }

    /// A range-checked slice of the image
    pub fn slice(&self, offset: u64, len: u64) -> LoadResult<&'a [u8]> {
        let end = offset.checked_add(len).ok_or(LoadError::Truncated { offset, len })?;
        if end > self.bytes.len() as u64 {
            return Err(LoadError::Truncated { offset, len });
        }
        Ok(&self.bytes[offset as usize..end as usize])
    }

    /// Program header entry `index`
    pub fn program_header(&self, index: usize) -> LoadResult<ProgramHeader> {
        let entsize = self.header.e_phentsize as usize;
        if entsize < PHDR_SIZE {
            return Err(LoadError::BadEntrySize { section: index });
        }
        let offset = index
            .checked_mul(entsize)
            .and_then(|rel| rel.checked_add(self.header.e_phoff as usize))
            .ok_or(LoadError::Truncated {
                offset: self.header.e_phoff,
                len: PHDR_SIZE as u64,
            })?;
        ProgramHeader::parse(self.bytes, offset)
    }

    /// Section header entry `index`
    pub fn section_header(&self, index: usize) -> LoadResult<SectionHeader> {
        let entsize = self.header.e_shentsize as usize;
        if entsize < SHDR_SIZE {
            return Err(LoadError::BadEntrySize { section: index });
        }
        let offset = index
            .checked_mul(entsize)
            .and_then(|rel| rel.checked_add(self.header.e_shoff as usize))
            .ok_or(LoadError::Truncated {
                offset: self.header.e_shoff,
                len: SHDR_SIZE as u64,
            })?;
        SectionHeader::parse(self.bytes, offset)
    }
}

/// Decode a NUL-terminated string at `offset` within a string table
pub fn str_at(strtab: &[u8], offset: u32) -> LoadResult<&str> {
    let start = offset as usize;
    if start >= strtab.len() {
        return Err(LoadError::BadString { offset: offset as u64 });
    }
    let rest = &strtab[start..];
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or(LoadError::BadString { offset: offset as u64 })?;
    core::str::from_utf8(&rest[..end]).map_err(|_| LoadError::BadString { offset: offset as u64 })
}
