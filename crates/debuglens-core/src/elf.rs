//! # ELF Images
//!
//! Owned view of an ELF image as handed over by a callback.
//!
//! The image keeps its raw bytes (the relocation engine rewrites debug sections in
//! place) next to a snapshot of the header, the first loadable segment and the
//! section headers, all parsed with `object`'s low-level ELF reader. Symbol and
//! relocation entries are decoded lazily with [`EntryReader`], honouring the image's
//! class and byte order.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use object::elf;
use object::read::elf::{FileHeader, ProgramHeader, Rel, Rela, SectionHeader, Sym};
use object::{pod, Endianness, FileKind, Pod, U32};

use crate::error::{DebuglensError, DebuglensResult};

/// ELF file class (address width).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfClass
{
    Elf32,
    Elf64,
}

/// Snapshot of one section header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionInfo
{
    pub index: usize,
    pub name: String,
    /// `sh_type`
    pub kind: u32,
    pub flags: u64,
    pub address: u64,
    pub offset: u64,
    pub size: u64,
    pub link: u32,
    pub info: u32,
    pub entsize: u64,
}

impl SectionInfo
{
    /// Whether the section occupies memory at run time (`SHF_ALLOC`).
    pub fn is_alloc(&self) -> bool
    {
        self.flags & u64::from(elf::SHF_ALLOC) != 0
    }

    /// Whether the section contents are stored compressed (`SHF_COMPRESSED`).
    pub fn is_compressed(&self) -> bool
    {
        self.flags & u64::from(elf::SHF_COMPRESSED) != 0
    }

    /// Number of fixed-size entries, as declared by `sh_size / sh_entsize`.
    pub fn entry_count(&self) -> DebuglensResult<usize>
    {
        if self.entsize == 0 {
            return Err(DebuglensError::Truncated("section declares a zero entry size"));
        }
        usize::try_from(self.size / self.entsize).map_err(|_| DebuglensError::Truncated("section entry count"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LoadSegment
{
    vaddr: u64,
    align: u64,
}

/// Header-level facts about an image.
#[derive(Debug, Clone)]
pub struct ElfLayout
{
    pub class: ElfClass,
    pub endian: Endianness,
    /// `e_type`
    pub kind: u16,
    /// `e_machine`
    pub machine: u16,
    mips64el: bool,
    first_load: Option<LoadSegment>,
    sections: Arc<[SectionInfo]>,
}

impl ElfLayout
{
    fn parse(data: &[u8]) -> DebuglensResult<Self>
    {
        match FileKind::parse(data) {
            Ok(FileKind::Elf32) => read_layout::<elf::FileHeader32<Endianness>>(data, ElfClass::Elf32),
            Ok(FileKind::Elf64) => read_layout::<elf::FileHeader64<Endianness>>(data, ElfClass::Elf64),
            _ => Err(DebuglensError::NotElf),
        }
    }

    /// Shared handle to the section header table.
    pub fn sections(&self) -> Arc<[SectionInfo]>
    {
        Arc::clone(&self.sections)
    }

    /// Entry decoder matching this image's class and byte order.
    pub(crate) fn entries(&self) -> EntryReader
    {
        EntryReader {
            class: self.class,
            endian: self.endian,
            mips64el: self.mips64el,
        }
    }
}

fn read_layout<Elf: FileHeader<Endian = Endianness>>(data: &[u8], class: ElfClass) -> DebuglensResult<ElfLayout>
{
    let header = Elf::parse(data).map_err(DebuglensError::elf("reading ELF header"))?;
    let endian = header.endian().map_err(DebuglensError::elf("reading ELF header"))?;

    let first_load = header
        .program_headers(endian, data)
        .map_err(DebuglensError::elf("reading program headers"))?
        .iter()
        .find(|phdr| phdr.p_type(endian) == elf::PT_LOAD)
        .map(|phdr| LoadSegment {
            vaddr: phdr.p_vaddr(endian).into(),
            align: phdr.p_align(endian).into(),
        });

    let table = header
        .sections(endian, data)
        .map_err(DebuglensError::elf("reading section headers"))?;
    let mut sections = Vec::with_capacity(table.len());
    for (index, section) in table.iter().enumerate() {
        let name = table
            .section_name(endian, section)
            .map_err(DebuglensError::elf("reading section names"))?;
        sections.push(SectionInfo {
            index,
            name: String::from_utf8_lossy(name).into_owned(),
            kind: section.sh_type(endian),
            flags: section.sh_flags(endian).into(),
            address: section.sh_addr(endian).into(),
            offset: section.sh_offset(endian).into(),
            size: section.sh_size(endian).into(),
            link: section.sh_link(endian),
            info: section.sh_info(endian),
            entsize: section.sh_entsize(endian).into(),
        });
    }

    Ok(ElfLayout {
        class,
        endian,
        kind: header.e_type(endian),
        machine: header.e_machine(endian),
        mips64el: header.is_mips64el(endian),
        first_load,
        sections: sections.into(),
    })
}

/// An opened ELF image: owned bytes plus parsed layout.
pub struct ElfImage
{
    data: Vec<u8>,
    layout: ElfLayout,
}

impl ElfImage
{
    /// Parse the header tables of `data`.
    ///
    /// ## Errors
    ///
    /// - `NotElf` if the bytes are another object format
    /// - `Elf` if the ELF header, program headers or section headers are malformed
    pub fn parse(data: Vec<u8>) -> DebuglensResult<Self>
    {
        let layout = ElfLayout::parse(&data)?;
        Ok(Self { data, layout })
    }

    pub fn layout(&self) -> &ElfLayout
    {
        &self.layout
    }

    /// Raw image bytes, including any relocations applied so far.
    pub fn data(&self) -> &[u8]
    {
        &self.data
    }

    /// Whether this is an unlinked object (`ET_REL`) whose sections have no addresses yet.
    pub fn is_relocatable(&self) -> bool
    {
        self.layout.kind == elf::ET_REL
    }

    pub fn sections(&self) -> &[SectionInfo]
    {
        &self.layout.sections
    }

    pub fn section(&self, index: usize) -> Option<&SectionInfo>
    {
        self.layout.sections.get(index)
    }

    /// First section called `name`, in header order.
    pub fn section_by_name(&self, name: &str) -> Option<&SectionInfo>
    {
        self.layout.sections.iter().find(|section| section.name == name)
    }

    /// File bytes of `section`; `SHT_NOBITS` sections have none.
    ///
    /// ## Errors
    ///
    /// Returns `Truncated` if the section extends past the end of the image.
    pub fn section_data(&self, section: &SectionInfo) -> DebuglensResult<&[u8]>
    {
        let range = section_range(section, self.data.len())?;
        Ok(&self.data[range])
    }

    /// Layout and mutable bytes of `section`, borrowed together.
    pub(crate) fn section_data_mut(&mut self, index: usize) -> DebuglensResult<(&ElfLayout, &mut [u8])>
    {
        let section = self
            .layout
            .sections
            .get(index)
            .ok_or(DebuglensError::BadSectionIndex(index))?;
        let range = section_range(section, self.data.len())?;
        Ok((&self.layout, &mut self.data[range]))
    }

    /// Load bias of this image when its module starts at `base`.
    ///
    /// Uses the first `PT_LOAD` segment:
    /// `(base & ~(align - 1)) - (p_vaddr & ~(align - 1))`, and zero without one.
    pub fn load_bias(&self, base: u64) -> u64
    {
        self.layout.first_load.map_or(0, |segment| {
            let mask = !segment.align.wrapping_sub(1);
            (base & mask).wrapping_sub(segment.vaddr & mask)
        })
    }
}

impl fmt::Debug for ElfImage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("ElfImage")
            .field("len", &self.data.len())
            .field("class", &self.layout.class)
            .field("kind", &self.layout.kind)
            .field("machine", &self.layout.machine)
            .field("sections", &self.layout.sections.len())
            .finish()
    }
}

fn section_range(section: &SectionInfo, image_len: usize) -> DebuglensResult<Range<usize>>
{
    if section.kind == elf::SHT_NOBITS {
        return Ok(0..0);
    }
    let start = usize::try_from(section.offset).map_err(|_| DebuglensError::Truncated("section offset"))?;
    let size = usize::try_from(section.size).map_err(|_| DebuglensError::Truncated("section size"))?;
    let end = start
        .checked_add(size)
        .filter(|end| *end <= image_len)
        .ok_or(DebuglensError::Truncated("section data"))?;
    Ok(start..end)
}

/// Symbol table entry as stored in the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawSymbol
{
    pub name: u32,
    pub value: u64,
    pub size: u64,
    pub shndx: u16,
}

/// `Elf_Rel` / `Elf_Rela` entry; `addend` is only present for the `RELA` form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawRelocation
{
    pub offset: u64,
    pub symbol: usize,
    pub r_type: u32,
    pub addend: Option<i64>,
}

/// Decodes fixed-layout ELF entries for one class and byte order.
///
/// Entries are read through `object`'s `Sym`, `Rel` and `Rela` record types, which
/// also know the MIPS64 little-endian `r_info` layout.
#[derive(Debug, Clone, Copy)]
pub(crate) struct EntryReader
{
    class: ElfClass,
    endian: Endianness,
    mips64el: bool,
}

impl EntryReader
{
    /// Word `index` of an `SHT_SYMTAB_SHNDX` table.
    pub(crate) fn extended_index(self, table: &[u8], index: usize) -> Option<u32>
    {
        record::<U32<Endianness>>(table, index.checked_mul(4)?).map(|word| word.get(self.endian))
    }

    /// Decode the symbol at byte `offset` of a symbol table.
    pub(crate) fn symbol(self, data: &[u8], offset: usize) -> Option<RawSymbol>
    {
        match self.class {
            ElfClass::Elf32 => record::<elf::Sym32<Endianness>>(data, offset).map(|sym| self.raw_symbol(sym)),
            ElfClass::Elf64 => record::<elf::Sym64<Endianness>>(data, offset).map(|sym| self.raw_symbol(sym)),
        }
    }

    /// Decode the relocation at byte `offset`; `with_addend` selects the `RELA` layout.
    pub(crate) fn relocation(self, data: &[u8], offset: usize, with_addend: bool) -> Option<RawRelocation>
    {
        match (self.class, with_addend) {
            (ElfClass::Elf32, false) => record::<elf::Rel32<Endianness>>(data, offset).map(|rel| self.rel(rel)),
            (ElfClass::Elf64, false) => record::<elf::Rel64<Endianness>>(data, offset).map(|rel| self.rel(rel)),
            (ElfClass::Elf32, true) => record::<elf::Rela32<Endianness>>(data, offset).map(|rela| self.rela(rela)),
            (ElfClass::Elf64, true) => record::<elf::Rela64<Endianness>>(data, offset).map(|rela| self.rela(rela)),
        }
    }

    fn raw_symbol<S: Sym<Endian = Endianness>>(self, sym: &S) -> RawSymbol
    {
        RawSymbol {
            name: sym.st_name(self.endian),
            value: sym.st_value(self.endian).into(),
            size: sym.st_size(self.endian).into(),
            shndx: sym.st_shndx(self.endian),
        }
    }

    fn rel<R: Rel<Endian = Endianness>>(self, rel: &R) -> RawRelocation
    {
        RawRelocation {
            offset: rel.r_offset(self.endian).into(),
            symbol: rel.r_sym(self.endian) as usize,
            r_type: rel.r_type(self.endian),
            addend: None,
        }
    }

    fn rela<R: Rela<Endian = Endianness>>(self, rela: &R) -> RawRelocation
    {
        RawRelocation {
            offset: rela.r_offset(self.endian).into(),
            symbol: rela.r_sym(self.endian, self.mips64el) as usize,
            r_type: rela.r_type(self.endian, self.mips64el),
            addend: Some(rela.r_addend(self.endian).into()),
        }
    }
}

/// Record of type `T` starting at byte `offset` of `data`.
fn record<T: Pod>(data: &[u8], offset: usize) -> Option<&T>
{
    let (record, _) = pod::from_bytes::<T>(data.get(offset..)?).ok()?;
    Some(record)
}
