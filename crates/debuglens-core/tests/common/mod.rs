//! Shared fixtures: a byte-level ELF64 writer and call-counting callbacks.

#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use debuglens_core::callbacks::{DebugLink, LocatedImage, ModuleCallbacks, ModuleInfo, SectionLoad, UserData};
use debuglens_core::error::{CallbackError, CallbackResult};
use object::elf;

pub const SYM_SIZE: u64 = 24;
pub const RELA_SIZE: u64 = 24;
pub const REL_SIZE: u64 = 16;

/// Byte offset of `DW_AT_low_pc` inside [`debug_info_unit`].
pub const LOW_PC_OFFSET: usize = 12;

/// ELF symbol to place in a symbol table.
#[derive(Debug, Clone)]
pub struct Sym
{
    pub name: &'static str,
    pub info: u8,
    pub shndx: u16,
    pub value: u64,
    pub size: u64,
}

impl Sym
{
    pub fn func(name: &'static str, shndx: u16, value: u64, size: u64) -> Self
    {
        Self {
            name,
            info: (elf::STB_GLOBAL << 4) | elf::STT_FUNC,
            shndx,
            value,
            size,
        }
    }

    pub fn section(shndx: u16) -> Self
    {
        Self {
            name: "",
            info: elf::STT_SECTION,
            shndx,
            value: 0,
            size: 0,
        }
    }

    pub fn absolute(name: &'static str, value: u64) -> Self
    {
        Self {
            name,
            info: (elf::STB_GLOBAL << 4) | elf::STT_NOTYPE,
            shndx: elf::SHN_ABS,
            value,
            size: 0,
        }
    }

    pub fn undefined(name: &'static str) -> Self
    {
        Self {
            name,
            info: (elf::STB_GLOBAL << 4) | elf::STT_NOTYPE,
            shndx: elf::SHN_UNDEF,
            value: 0,
            size: 0,
        }
    }
}

#[derive(Debug, Clone)]
struct Section
{
    name: String,
    kind: u32,
    flags: u64,
    addr: u64,
    link: u32,
    info: u32,
    entsize: u64,
    data: Vec<u8>,
}

/// Writes ELF64 images: header, program headers, section data, section headers.
#[derive(Debug, Clone)]
pub struct ElfBuilder
{
    big_endian: bool,
    e_type: u16,
    machine: u16,
    loads: Vec<(u64, u64)>,
    sections: Vec<Section>,
}

impl ElfBuilder
{
    pub fn new(e_type: u16, machine: u16) -> Self
    {
        Self {
            big_endian: false,
            e_type,
            machine,
            loads: Vec::new(),
            sections: Vec::new(),
        }
    }

    /// Shared object for x86-64.
    pub fn shared() -> Self
    {
        Self::new(elf::ET_DYN, elf::EM_X86_64)
    }

    /// Relocatable object for x86-64.
    pub fn relocatable() -> Self
    {
        Self::new(elf::ET_REL, elf::EM_X86_64)
    }

    pub fn big_endian(mut self) -> Self
    {
        self.big_endian = true;
        self
    }

    /// Add a `PT_LOAD` segment.
    pub fn load(mut self, vaddr: u64, align: u64) -> Self
    {
        self.loads.push((vaddr, align));
        self
    }

    /// Index the next added section will get.
    pub fn next_index(&self) -> u16
    {
        u16::try_from(self.sections.len() + 1).unwrap()
    }

    pub fn section(&mut self, name: &str, kind: u32, flags: u64, data: Vec<u8>) -> u16
    {
        self.raw_section(name, kind, flags, 0, 0, 0, data)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn raw_section(&mut self, name: &str, kind: u32, flags: u64, link: u32, info: u32, entsize: u64, data: Vec<u8>) -> u16
    {
        let index = self.next_index();
        self.sections.push(Section {
            name: name.to_string(),
            kind,
            flags,
            addr: 0,
            link,
            info,
            entsize,
            data,
        });
        index
    }

    /// `SHF_ALLOC | SHF_EXECINSTR` code section.
    pub fn text(&mut self, size: usize) -> u16
    {
        self.section(
            ".text",
            elf::SHT_PROGBITS,
            u64::from(elf::SHF_ALLOC | elf::SHF_EXECINSTR),
            vec![0x90; size],
        )
    }

    pub fn debug(&mut self, name: &str, data: Vec<u8>) -> u16
    {
        self.section(name, elf::SHT_PROGBITS, 0, data)
    }

    /// String table plus `SHT_SYMTAB` or `SHT_DYNSYM`; returns the symbol table index.
    ///
    /// The null symbol is inserted automatically, so `symbols[i]` gets index `i + 1`.
    pub fn symbols(&mut self, kind: u32, symbols: &[Sym]) -> u16
    {
        let (table, strings) = if kind == elf::SHT_DYNSYM {
            (".dynsym", ".dynstr")
        } else {
            (".symtab", ".strtab")
        };

        let mut strtab = vec![0u8];
        let mut entries = self.writer();
        entries.zeros(SYM_SIZE as usize);
        for symbol in symbols {
            let name = if symbol.name.is_empty() {
                0
            } else {
                let offset = strtab.len();
                strtab.extend_from_slice(symbol.name.as_bytes());
                strtab.push(0);
                offset
            };
            entries.u32(u32::try_from(name).unwrap());
            entries.u8(symbol.info);
            entries.u8(0);
            entries.u16(symbol.shndx);
            entries.u64(symbol.value);
            entries.u64(symbol.size);
        }

        let strtab_index = self.section(strings, elf::SHT_STRTAB, 0, strtab);
        self.raw_section(table, kind, 0, u32::from(strtab_index), 1, SYM_SIZE, entries.bytes)
    }

    /// `SHT_RELA` section applying `(offset, symbol, type, addend)` entries to `target`.
    pub fn rela(&mut self, target: u16, symtab: u16, entries: &[(u64, u64, u32, i64)]) -> u16
    {
        let name = format!(".rela{}", self.sections[usize::from(target) - 1].name);
        let mut out = self.writer();
        for &(offset, symbol, r_type, addend) in entries {
            out.u64(offset);
            out.u64((symbol << 32) | u64::from(r_type));
            out.u64(addend as u64);
        }
        self.raw_section(&name, elf::SHT_RELA, 0, u32::from(symtab), u32::from(target), RELA_SIZE, out.bytes)
    }

    /// `SHT_REL` section applying `(offset, symbol, type)` entries to `target`.
    pub fn rel(&mut self, target: u16, symtab: u16, entries: &[(u64, u64, u32)]) -> u16
    {
        let name = format!(".rel{}", self.sections[usize::from(target) - 1].name);
        let mut out = self.writer();
        for &(offset, symbol, r_type) in entries {
            out.u64(offset);
            out.u64((symbol << 32) | u64::from(r_type));
        }
        self.raw_section(&name, elf::SHT_REL, 0, u32::from(symtab), u32::from(target), REL_SIZE, out.bytes)
    }

    /// `.gnu_debuglink` naming `file_name` with checksum `crc`.
    pub fn debuglink(&mut self, file_name: &str, crc: u32) -> u16
    {
        let mut out = self.writer();
        out.bytes.extend_from_slice(file_name.as_bytes());
        out.u8(0);
        while out.bytes.len() % 4 != 0 {
            out.u8(0);
        }
        out.u32(crc);
        self.section(".gnu_debuglink", elf::SHT_PROGBITS, 0, out.bytes)
    }

    /// Writer using this image's byte order.
    pub fn writer(&self) -> Writer
    {
        Writer {
            big_endian: self.big_endian,
            bytes: Vec::new(),
        }
    }

    pub fn build(&self) -> Vec<u8>
    {
        let mut sections = self.sections.clone();
        let mut shstrtab = vec![0u8];
        let mut names = Vec::with_capacity(sections.len() + 1);
        for section in &sections {
            names.push(u32::try_from(shstrtab.len()).unwrap());
            shstrtab.extend_from_slice(section.name.as_bytes());
            shstrtab.push(0);
        }
        names.push(u32::try_from(shstrtab.len()).unwrap());
        shstrtab.extend_from_slice(b".shstrtab\0");
        sections.push(Section {
            name: ".shstrtab".to_string(),
            kind: elf::SHT_STRTAB,
            flags: 0,
            addr: 0,
            link: 0,
            info: 0,
            entsize: 0,
            data: shstrtab,
        });

        let phoff = 64u64;
        let mut offset = phoff + 56 * self.loads.len() as u64;
        let mut offsets = Vec::with_capacity(sections.len());
        for section in &sections {
            offset = align8(offset);
            offsets.push(offset);
            offset += section.data.len() as u64;
        }
        let shoff = align8(offset);
        let shnum = u16::try_from(sections.len() + 1).unwrap();

        let mut out = self.writer();
        out.bytes.extend_from_slice(&[0x7f, b'E', b'L', b'F', elf::ELFCLASS64]);
        out.u8(if self.big_endian { elf::ELFDATA2MSB } else { elf::ELFDATA2LSB });
        out.u8(elf::EV_CURRENT);
        out.zeros(9);
        out.u16(self.e_type);
        out.u16(self.machine);
        out.u32(u32::from(elf::EV_CURRENT));
        out.u64(0);
        out.u64(if self.loads.is_empty() { 0 } else { phoff });
        out.u64(shoff);
        out.u32(0);
        out.u16(64);
        out.u16(56);
        out.u16(u16::try_from(self.loads.len()).unwrap());
        out.u16(64);
        out.u16(shnum);
        out.u16(shnum - 1);

        for &(vaddr, align) in &self.loads {
            out.u32(elf::PT_LOAD);
            out.u32(elf::PF_R | elf::PF_X);
            out.u64(0);
            out.u64(vaddr);
            out.u64(vaddr);
            out.u64(0);
            out.u64(0x1000);
            out.u64(align);
        }

        for (section, &start) in sections.iter().zip(&offsets) {
            out.zeros(usize::try_from(start).unwrap() - out.bytes.len());
            out.bytes.extend_from_slice(&section.data);
        }
        out.zeros(usize::try_from(shoff).unwrap() - out.bytes.len());

        out.zeros(64);
        for ((section, &start), &name) in sections.iter().zip(&offsets).zip(&names) {
            out.u32(name);
            out.u32(section.kind);
            out.u64(section.flags);
            out.u64(section.addr);
            out.u64(start);
            out.u64(section.data.len() as u64);
            out.u32(section.link);
            out.u32(section.info);
            out.u64(1);
            out.u64(section.entsize);
        }

        out.bytes
    }
}

fn align8(value: u64) -> u64
{
    (value + 7) & !7
}

/// Byte-order aware append buffer.
#[derive(Debug)]
pub struct Writer
{
    big_endian: bool,
    pub bytes: Vec<u8>,
}

impl Writer
{
    pub fn u8(&mut self, value: u8)
    {
        self.bytes.push(value);
    }

    pub fn u16(&mut self, value: u16)
    {
        let bytes = if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
        self.bytes.extend_from_slice(&bytes);
    }

    pub fn u32(&mut self, value: u32)
    {
        let bytes = if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
        self.bytes.extend_from_slice(&bytes);
    }

    pub fn u64(&mut self, value: u64)
    {
        let bytes = if self.big_endian { value.to_be_bytes() } else { value.to_le_bytes() };
        self.bytes.extend_from_slice(&bytes);
    }

    pub fn zeros(&mut self, count: usize)
    {
        self.bytes.resize(self.bytes.len() + count, 0);
    }
}

/// Minimal DWARF 4 compile unit: one DIE with an 8-byte `DW_AT_low_pc` of `low_pc`.
pub fn debug_info_unit(big_endian: bool, low_pc: u64) -> Vec<u8>
{
    let mut out = Writer {
        big_endian,
        bytes: Vec::new(),
    };
    out.u32(16);
    out.u16(4);
    out.u32(0);
    out.u8(8);
    out.u8(1);
    out.u64(low_pc);
    out.bytes
}

/// Abbreviation table matching [`debug_info_unit`].
pub fn debug_abbrev() -> Vec<u8>
{
    // code 1: DW_TAG_compile_unit, no children, DW_AT_low_pc / DW_FORM_addr
    vec![1, 0x11, 0, 0x11, 0x01, 0, 0, 0]
}

pub fn read_u64(data: &[u8], offset: usize, big_endian: bool) -> u64
{
    let bytes: [u8; 8] = data[offset..offset + 8].try_into().unwrap();
    if big_endian {
        u64::from_be_bytes(bytes)
    } else {
        u64::from_le_bytes(bytes)
    }
}

/// In-memory callbacks that count every call.
#[derive(Debug, Default)]
pub struct FakeCallbacks
{
    pub main: Option<Vec<u8>>,
    pub debug: Option<Vec<u8>>,
    pub sections: HashMap<String, SectionLoad>,
    pub resolves_sections: bool,
    pub find_elf_calls: Cell<usize>,
    pub find_debuginfo_calls: Cell<usize>,
    pub section_address_calls: Cell<usize>,
    pub seen_debuglink: RefCell<Option<DebugLink>>,
    pub seen_main_name: RefCell<Option<PathBuf>>,
}

impl FakeCallbacks
{
    pub fn with_main(main: Vec<u8>) -> Self
    {
        Self {
            main: Some(main),
            ..Self::default()
        }
    }

    pub fn with_debug(mut self, debug: Vec<u8>) -> Self
    {
        self.debug = Some(debug);
        self
    }

    /// Enable `section_address` and place `name` at `load`.
    pub fn place(mut self, name: &str, load: SectionLoad) -> Self
    {
        self.resolves_sections = true;
        self.sections.insert(name.to_string(), load);
        self
    }
}

impl ModuleCallbacks for FakeCallbacks
{
    fn find_elf(&self, module: &ModuleInfo, _user_data: &mut UserData) -> CallbackResult<LocatedImage>
    {
        self.find_elf_calls.set(self.find_elf_calls.get() + 1);
        let bytes = self.main.clone().ok_or_else(CallbackError::not_found)?;
        Ok(LocatedImage::from_bytes(bytes, Some(PathBuf::from(&module.name))))
    }

    fn find_debuginfo(
        &self,
        module: &ModuleInfo,
        _user_data: &mut UserData,
        main_name: Option<&Path>,
        debuglink: Option<&DebugLink>,
    ) -> CallbackResult<LocatedImage>
    {
        self.find_debuginfo_calls.set(self.find_debuginfo_calls.get() + 1);
        *self.seen_debuglink.borrow_mut() = debuglink.cloned();
        *self.seen_main_name.borrow_mut() = main_name.map(Path::to_path_buf);
        let bytes = self.debug.clone().ok_or_else(CallbackError::not_found)?;
        Ok(LocatedImage::from_bytes(bytes, Some(PathBuf::from(format!("{}.debug", module.name)))))
    }

    fn resolves_section_addresses(&self) -> bool
    {
        self.resolves_sections
    }

    fn section_address(&self, _module: &ModuleInfo, _user_data: &mut UserData, section: &str) -> CallbackResult<SectionLoad>
    {
        self.section_address_calls.set(self.section_address_calls.get() + 1);
        self.sections.get(section).copied().ok_or_else(CallbackError::not_found)
    }
}
