//! Test fixtures: synthetic ELF images assembled byte-by-byte, plus
//! heap-backed fakes for the memory collaborators so relocations land in
//! real, inspectable memory under the host test runner.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use kestrel_hal::mmu::{MemoryRegionKind, PageFlags};
use kestrel_hal::VirtAddr;
use kestrel_memory::{AddressSpace, MemResult, ModuleMemory};

use crate::elf::{
    EHDR_SIZE, ELFCLASS64, ELFDATA2LSB, ELFOSABI_SYSV, ELF_MAGIC, EM_X86_64, EV_CURRENT,
    PHDR_SIZE, RELA_SIZE, SHDR_SIZE, SHT_NOBITS, SHT_RELA, SHT_STRTAB, SHT_SYMTAB, SYM_SIZE,
};
use crate::module::SymbolResolver;

/// Encode one 24-byte symbol table entry.
pub(crate) fn sym_entry(name_off: u32, info: u8, shndx: u16, value: u64) -> [u8; SYM_SIZE] {
    let mut out = [0u8; SYM_SIZE];
    out[0..4].copy_from_slice(&name_off.to_le_bytes());
    out[4] = info;
    out[5] = 0;
    out[6..8].copy_from_slice(&shndx.to_le_bytes());
    out[8..16].copy_from_slice(&value.to_le_bytes());
    // st_size stays zero.
    out
}

/// Encode one 24-byte relocation-with-addend entry.
pub(crate) fn rela_entry(offset: u64, sym: u32, kind: u32, addend: i64) -> [u8; RELA_SIZE] {
    let mut out = [0u8; RELA_SIZE];
    out[0..8].copy_from_slice(&offset.to_le_bytes());
    let info = (u64::from(sym) << 32) | u64::from(kind);
    out[8..16].copy_from_slice(&info.to_le_bytes());
    out[16..24].copy_from_slice(&addend.to_le_bytes());
    out
}

/// Build a string table holding `names`, returning the table bytes and
/// each name's offset.
pub(crate) fn strtab_with(names: &[&str]) -> (Vec<u8>, Vec<u32>) {
    let mut table = vec![0u8];
    let mut offsets = Vec::with_capacity(names.len());
    for name in names {
        offsets.push(table.len() as u32);
        table.extend_from_slice(name.as_bytes());
        table.push(0);
    }
    (table, offsets)
}

struct SectionSpec {
    name: String,
    sh_type: u32,
    flags: u64,
    content: Vec<u8>,
    size: u64,
    link: u32,
    info: u32,
    entsize: u64,
    addralign: u64,
}

struct SegmentSpec {
    p_type: u32,
    vaddr: u64,
    content: Vec<u8>,
    memsz: u64,
}

/// Low-level synthetic ELF64 image builder.
///
/// Produces `ehdr | segment contents | phdr table | section contents |
/// shdr table`. When any section is declared, a null section and a
/// trailing `.shstrtab` are added automatically.
pub(crate) struct ElfBuilder {
    segments: Vec<SegmentSpec>,
    sections: Vec<SectionSpec>,
    entry: u64,
}

impl ElfBuilder {
    pub(crate) fn new() -> Self {
        Self {
            segments: Vec::new(),
            sections: Vec::new(),
            entry: 0,
        }
    }

    pub(crate) fn entry(mut self, addr: u64) -> Self {
        self.entry = addr;
        self
    }

    pub(crate) fn segment(mut self, p_type: u32, vaddr: u64, content: &[u8], memsz: u64) -> Self {
        self.segments.push(SegmentSpec {
            p_type,
            vaddr,
            content: content.to_vec(),
            memsz,
        });
        self
    }

    pub(crate) fn section(
        mut self,
        name: &str,
        sh_type: u32,
        flags: u64,
        content: Vec<u8>,
        addralign: u64,
    ) -> Self {
        let size = content.len() as u64;
        self.sections.push(SectionSpec {
            name: name.to_string(),
            sh_type,
            flags,
            content,
            size,
            link: 0,
            info: 0,
            entsize: 0,
            addralign,
        });
        self
    }

    pub(crate) fn nobits(mut self, name: &str, flags: u64, size: u64, addralign: u64) -> Self {
        self.sections.push(SectionSpec {
            name: name.to_string(),
            sh_type: SHT_NOBITS,
            flags,
            content: Vec::new(),
            size,
            link: 0,
            info: 0,
            entsize: 0,
            addralign,
        });
        self
    }

    /// Append a relocation section targeting final section index `info`,
    /// linked to the symbol table that `with_symtab` will append next.
    pub(crate) fn rela_section(mut self, name: &str, info: u32, entries: Vec<u8>) -> Self {
        // Final indices: null + existing + this one, then symtab follows.
        let symtab_index = self.sections.len() as u32 + 2;
        let size = entries.len() as u64;
        self.sections.push(SectionSpec {
            name: name.to_string(),
            sh_type: SHT_RELA,
            flags: 0,
            content: entries,
            size,
            link: symtab_index,
            info,
            entsize: RELA_SIZE as u64,
            addralign: 8,
        });
        self
    }

    /// Append `.symtab` and `.strtab` with the given raw contents.
    pub(crate) fn with_symtab(mut self, symtab: &[u8], strtab: &[u8]) -> Self {
        // Final indices: null + existing sections, symtab next, strtab after.
        let strtab_index = self.sections.len() as u32 + 2;
        self.sections.push(SectionSpec {
            name: ".symtab".to_string(),
            sh_type: SHT_SYMTAB,
            flags: 0,
            content: symtab.to_vec(),
            size: symtab.len() as u64,
            link: strtab_index,
            info: 0,
            entsize: SYM_SIZE as u64,
            addralign: 8,
        });
        self.sections.push(SectionSpec {
            name: ".strtab".to_string(),
            sh_type: SHT_STRTAB,
            flags: 0,
            content: strtab.to_vec(),
            size: strtab.len() as u64,
            link: 0,
            info: 0,
            entsize: 0,
            addralign: 1,
        });
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        let mut sections = self.sections;
        let has_sections = !sections.is_empty();

        // Assemble .shstrtab and per-section name offsets.
        let mut name_offsets = vec![0u32; sections.len() + 2];
        if has_sections {
            let mut shstr = vec![0u8];
            for (i, spec) in sections.iter().enumerate() {
                name_offsets[i + 1] = shstr.len() as u32;
                shstr.extend_from_slice(spec.name.as_bytes());
                shstr.push(0);
            }
            let shstr_name_off = shstr.len() as u32;
            shstr.extend_from_slice(b".shstrtab\0");
            name_offsets[sections.len() + 1] = shstr_name_off;
            let size = shstr.len() as u64;
            sections.push(SectionSpec {
                name: ".shstrtab".to_string(),
                sh_type: SHT_STRTAB,
                flags: 0,
                content: shstr,
                size,
                link: 0,
                info: 0,
                entsize: 0,
                addralign: 1,
            });
        }

        // Lay out: header, segment contents, phdr table, section contents,
        // shdr table.
        let mut offset = EHDR_SIZE;
        let mut seg_offsets = Vec::with_capacity(self.segments.len());
        for seg in &self.segments {
            seg_offsets.push(offset);
            offset += seg.content.len();
        }
        let phoff = if self.segments.is_empty() { 0 } else { offset };
        offset += self.segments.len() * PHDR_SIZE;

        let mut sec_offsets = Vec::with_capacity(sections.len());
        for spec in &sections {
            sec_offsets.push(offset);
            offset += spec.content.len();
        }
        let shoff = if has_sections { offset } else { 0 };
        let shnum = if has_sections { sections.len() + 1 } else { 0 };
        offset += shnum * SHDR_SIZE;

        let mut image = vec![0u8; offset];

        // ELF header.
        image[0..4].copy_from_slice(&ELF_MAGIC);
        image[4] = ELFCLASS64;
        image[5] = ELFDATA2LSB;
        image[6] = EV_CURRENT;
        image[7] = ELFOSABI_SYSV;
        // e_ident[8] (ABI version) and padding stay zero.
        let e_type: u16 = if self.segments.is_empty() { 1 } else { 2 };
        image[16..18].copy_from_slice(&e_type.to_le_bytes());
        image[18..20].copy_from_slice(&EM_X86_64.to_le_bytes());
        image[20..24].copy_from_slice(&1u32.to_le_bytes());
        image[24..32].copy_from_slice(&self.entry.to_le_bytes());
        image[32..40].copy_from_slice(&(phoff as u64).to_le_bytes());
        image[40..48].copy_from_slice(&(shoff as u64).to_le_bytes());
        image[52..54].copy_from_slice(&(EHDR_SIZE as u16).to_le_bytes());
        image[54..56].copy_from_slice(&(PHDR_SIZE as u16).to_le_bytes());
        image[56..58].copy_from_slice(&(self.segments.len() as u16).to_le_bytes());
        image[58..60].copy_from_slice(&(SHDR_SIZE as u16).to_le_bytes());
        image[60..62].copy_from_slice(&(shnum as u16).to_le_bytes());
        let shstrndx = if has_sections { shnum as u16 - 1 } else { 0 };
        image[62..64].copy_from_slice(&shstrndx.to_le_bytes());

        // Segment contents and program headers.
        for (i, seg) in self.segments.iter().enumerate() {
            image[seg_offsets[i]..seg_offsets[i] + seg.content.len()]
                .copy_from_slice(&seg.content);
            let ph = phoff + i * PHDR_SIZE;
            image[ph..ph + 4].copy_from_slice(&seg.p_type.to_le_bytes());
            image[ph + 4..ph + 8].copy_from_slice(&7u32.to_le_bytes()); // rwx
            image[ph + 8..ph + 16].copy_from_slice(&(seg_offsets[i] as u64).to_le_bytes());
            image[ph + 16..ph + 24].copy_from_slice(&seg.vaddr.to_le_bytes());
            image[ph + 24..ph + 32].copy_from_slice(&seg.vaddr.to_le_bytes());
            image[ph + 32..ph + 40].copy_from_slice(&(seg.content.len() as u64).to_le_bytes());
            image[ph + 40..ph + 48].copy_from_slice(&seg.memsz.to_le_bytes());
            image[ph + 48..ph + 56].copy_from_slice(&4096u64.to_le_bytes());
        }

        // Section contents and section headers (index 0 stays null).
        for (i, spec) in sections.iter().enumerate() {
            image[sec_offsets[i]..sec_offsets[i] + spec.content.len()]
                .copy_from_slice(&spec.content);
            let sh = shoff + (i + 1) * SHDR_SIZE;
            image[sh..sh + 4].copy_from_slice(&name_offsets[i + 1].to_le_bytes());
            image[sh + 4..sh + 8].copy_from_slice(&spec.sh_type.to_le_bytes());
            image[sh + 8..sh + 16].copy_from_slice(&spec.flags.to_le_bytes());
            // sh_addr stays zero for relocatable fixtures.
            image[sh + 24..sh + 32].copy_from_slice(&(sec_offsets[i] as u64).to_le_bytes());
            image[sh + 32..sh + 40].copy_from_slice(&spec.size.to_le_bytes());
            image[sh + 40..sh + 44].copy_from_slice(&spec.link.to_le_bytes());
            image[sh + 44..sh + 48].copy_from_slice(&spec.info.to_le_bytes());
            image[sh + 48..sh + 56].copy_from_slice(&spec.addralign.to_le_bytes());
            image[sh + 56..sh + 64].copy_from_slice(&spec.entsize.to_le_bytes());
        }

        image
    }
}

/// Higher-level builder for relocatable module fixtures: `.text`,
/// optional `.data`/`.bss`, symbols, and relocations against `.data`.
pub(crate) struct ModuleImageBuilder {
    text: Vec<u8>,
    data: Option<Vec<u8>>,
    bss: Option<u64>,
    symbols: Vec<(String, u8, u16, u64)>,
    relas: Vec<(u64, String, u32, i64)>,
}

impl ModuleImageBuilder {
    pub(crate) fn new() -> Self {
        Self {
            text: vec![0x90; 16],
            data: None,
            bss: None,
            symbols: Vec::new(),
            relas: Vec::new(),
        }
    }

    pub(crate) fn text(mut self, bytes: Vec<u8>) -> Self {
        self.text = bytes;
        self
    }

    pub(crate) fn data(mut self, bytes: Vec<u8>) -> Self {
        self.data = Some(bytes);
        self
    }

    pub(crate) fn bss(mut self, size: u64) -> Self {
        self.bss = Some(size);
        self
    }

    /// Declare a symbol defined in final section `shndx`.
    pub(crate) fn symbol(mut self, name: &str, binding: u8, shndx: u16, value: u64) -> Self {
        self.symbols.push((name.to_string(), binding, shndx, value));
        self
    }

    /// Declare an external (undefined) symbol.
    pub(crate) fn undef_symbol(mut self, name: &str, binding: u8) -> Self {
        self.symbols.push((name.to_string(), binding, 0, 0));
        self
    }

    /// Add a relocation patching `.data` at `offset` against `sym_name`.
    pub(crate) fn rela_data(mut self, offset: u64, sym_name: &str, kind: u32, addend: i64) -> Self {
        self.relas.push((offset, sym_name.to_string(), kind, addend));
        self
    }

    pub(crate) fn build(self) -> Vec<u8> {
        use crate::elf::{SHF_ALLOC, SHT_PROGBITS};

        let names: Vec<&str> = self.symbols.iter().map(|s| s.0.as_str()).collect();
        let (strtab, offsets) = strtab_with(&names);

        let mut symtab = sym_entry(0, 0, 0, 0).to_vec();
        for (i, (_, binding, shndx, value)) in self.symbols.iter().enumerate() {
            symtab.extend_from_slice(&sym_entry(
                offsets[i],
                (binding << 4) | 2,
                *shndx,
                *value,
            ));
        }

        let sym_index_of = |name: &str| -> u32 {
            1 + self
                .symbols
                .iter()
                .position(|s| s.0 == name)
                .expect("relocation names an undeclared symbol") as u32
        };

        let mut builder = ElfBuilder::new().section(
            ".text",
            SHT_PROGBITS,
            SHF_ALLOC,
            self.text.clone(),
            16,
        );
        // Final section indices: null = 0, .text = 1, .data = 2.
        let mut data_index = None;
        if let Some(data) = &self.data {
            builder = builder.section(".data", SHT_PROGBITS, SHF_ALLOC, data.clone(), 8);
            data_index = Some(2u32);
        }
        if let Some(size) = self.bss {
            builder = builder.nobits(".bss", SHF_ALLOC, size, 8);
        }

        if !self.relas.is_empty() {
            let target = data_index.expect("rela_data needs a .data section");
            let mut entries = Vec::with_capacity(self.relas.len() * RELA_SIZE);
            for (offset, name, kind, addend) in &self.relas {
                entries.extend_from_slice(&rela_entry(*offset, sym_index_of(name), *kind, *addend));
            }
            builder = builder.rela_section(".rela.data", target, entries);
        }

        builder.with_symtab(&symtab, &strtab).build()
    }
}

struct MappedRegion {
    start: u64,
    buf: alloc::boxed::Box<[u8]>,
}

/// Heap-backed fake address space for segment-mapper tests.
pub(crate) struct FakeAddressSpace {
    maps: spin::Mutex<Vec<MappedRegion>>,
    reserved: spin::Mutex<Vec<(u64, usize, MemoryRegionKind)>>,
}

impl FakeAddressSpace {
    pub(crate) fn new() -> Self {
        Self {
            maps: spin::Mutex::new(Vec::new()),
            reserved: spin::Mutex::new(Vec::new()),
        }
    }

    /// Bytes of the mapping that starts at `start`, if any.
    pub(crate) fn mapped_bytes(&self, start: VirtAddr) -> Option<Vec<u8>> {
        self.maps
            .lock()
            .iter()
            .find(|r| r.start == start.as_u64())
            .map(|r| r.buf.to_vec())
    }

    pub(crate) fn mapped_count(&self) -> usize {
        self.maps.lock().len()
    }

    pub(crate) fn reserved_regions(&self) -> usize {
        self.reserved.lock().len()
    }
}

impl AddressSpace for FakeAddressSpace {
    fn map_pages(&self, start: VirtAddr, pages: usize, _flags: PageFlags) -> MemResult<*mut u8> {
        let mut buf = vec![0u8; pages * 4096].into_boxed_slice();
        let ptr = buf.as_mut_ptr();
        self.maps.lock().push(MappedRegion {
            start: start.as_u64(),
            buf,
        });
        Ok(ptr)
    }

    fn reserve_pages(
        &self,
        start: VirtAddr,
        pages: usize,
        kind: MemoryRegionKind,
        _flags: PageFlags,
    ) -> MemResult<()> {
        self.reserved.lock().push((start.as_u64(), pages, kind));
        Ok(())
    }
}

struct Block {
    addr: u64,
    size: usize,
    buf: alloc::boxed::Box<[u8]>,
    freed: bool,
}

/// Heap-backed fake module-memory allocator.
///
/// Fresh blocks are poisoned with `0xa5` so tests can tell "the loader
/// zero-filled this" from "the allocator handed out zeroed memory".
pub(crate) struct FakeModuleMemory {
    blocks: spin::Mutex<Vec<Block>>,
}

impl FakeModuleMemory {
    pub(crate) fn new() -> Self {
        Self {
            blocks: spin::Mutex::new(Vec::new()),
        }
    }

    /// Current live (not freed) block count.
    pub(crate) fn live_blocks(&self) -> usize {
        self.blocks.lock().iter().filter(|b| !b.freed).count()
    }

    /// Every allocation ever made, freed or not.
    pub(crate) fn total_allocations(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Bytes of the live block at `addr`, if any.
    pub(crate) fn bytes_at(&self, addr: VirtAddr) -> Option<Vec<u8>> {
        self.blocks
            .lock()
            .iter()
            .find(|b| b.addr == addr.as_u64() && !b.freed)
            .map(|b| b.buf.to_vec())
    }
}

impl ModuleMemory for FakeModuleMemory {
    fn allocate(&self, size: usize, _align: usize) -> Option<VirtAddr> {
        let mut buf = vec![0xa5u8; size].into_boxed_slice();
        let addr = buf.as_mut_ptr() as u64;
        self.blocks.lock().push(Block {
            addr,
            size,
            buf,
            freed: false,
        });
        Some(VirtAddr::new(addr))
    }

    fn free(&self, addr: VirtAddr, size: usize) {
        let mut blocks = self.blocks.lock();
        if let Some(block) = blocks
            .iter_mut()
            .find(|b| b.addr == addr.as_u64() && !b.freed)
        {
            assert_eq!(block.size, size, "free size must match allocation");
            block.freed = true;
        } else {
            panic!("free of unknown or already-freed block {:#x}", addr.as_u64());
        }
    }
}

/// Map-backed kernel symbol resolver for tests.
pub(crate) struct MapResolver {
    map: BTreeMap<String, u64>,
}

impl MapResolver {
    pub(crate) fn empty() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    pub(crate) fn with(entries: &[(&str, u64)]) -> Self {
        let mut map = BTreeMap::new();
        for (name, addr) in entries {
            map.insert((*name).to_string(), *addr);
        }
        Self { map }
    }
}

impl SymbolResolver for MapResolver {
    fn resolve(&self, name: &str) -> Option<VirtAddr> {
        self.map.get(name).map(|&addr| VirtAddr::new(addr))
    }
}
