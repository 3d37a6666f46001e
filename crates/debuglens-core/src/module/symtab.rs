//! # Symbol Tables
//!
//! Discovery of a module's symbol table and the snapshot kept once it is found.
//!
//! ## Selection
//!
//! Section headers are scanned in order:
//!
//! - `SHT_SYMTAB` wins outright
//! - `SHT_DYNSYM` is kept as a fallback while no full table has been seen
//! - `SHT_SYMTAB_SHNDX` (extended section indices) is always remembered
//!
//! The main image is scanned first; the separate debug file only when the main image
//! lacks a full table. A dynamic table alone is accepted.
//!
//! ## Snapshot
//!
//! The winning table, its string table and the extended-index table are copied out
//! of the image. Relocation rewrites image bytes while symbols are being read, so
//! the snapshot must not borrow from the image.

use std::sync::Arc;

use object::elf;
use tracing::warn;

use super::ImageSlot;
use crate::elf::{ElfImage, EntryReader, RawSymbol, SectionInfo};
use crate::error::{DebuglensError, DebuglensResult};
use crate::relocation::SectionResolver;
use crate::types::{ModuleSymbol, SymbolName, SymbolSection};

/// Which kind of symbol table a module ended up with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolTableKind
{
    /// `.symtab`: every symbol, including local and static ones.
    Full,
    /// `.dynsym`: only the symbols needed for dynamic linking.
    Dynamic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Candidate
{
    pub slot: ImageSlot,
    pub section: usize,
}

/// Result of scanning one or more images for symbol tables.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SymtabScan
{
    table: Option<(Candidate, SymbolTableKind)>,
    xindex: Option<Candidate>,
}

impl SymtabScan
{
    /// Record the symbol-table sections of `image`, stored in `slot`.
    pub(crate) fn scan(&mut self, slot: ImageSlot, image: &ElfImage)
    {
        for section in image.sections() {
            let candidate = Candidate {
                slot,
                section: section.index,
            };
            match section.kind {
                elf::SHT_SYMTAB => self.table = Some((candidate, SymbolTableKind::Full)),
                elf::SHT_DYNSYM if !self.has_full_table() => {
                    self.table = Some((candidate, SymbolTableKind::Dynamic));
                }
                elf::SHT_SYMTAB_SHNDX => self.xindex = Some(candidate),
                _ => {}
            }
        }
    }

    pub(crate) fn has_full_table(&self) -> bool
    {
        matches!(self.table, Some((_, SymbolTableKind::Full)))
    }

    pub(crate) fn table(&self) -> Option<(Candidate, SymbolTableKind)>
    {
        self.table
    }

    /// Extended-index table, only when it lives next to the chosen symbol table.
    pub(crate) fn xindex_for(&self, table: Candidate) -> Option<Candidate>
    {
        self.xindex.filter(|xindex| xindex.slot == table.slot)
    }
}

/// Cached symbol table of a module.
#[derive(Debug)]
pub struct SymbolTable
{
    source: ImageSlot,
    kind: SymbolTableKind,
    count: usize,
    stride: usize,
    entries: Vec<u8>,
    xindex: Option<Vec<u8>>,
    strings: Vec<u8>,
    reader: EntryReader,
    sections: Arc<[SectionInfo]>,
    bias: u64,
}

impl SymbolTable
{
    /// Copy the table chosen by `scan` out of `image`.
    ///
    /// ## Errors
    ///
    /// - `BadSectionIndex` if the linked string table is missing or is not `SHT_STRTAB`
    /// - `Truncated` if the string table is empty or a section lies outside the image
    pub(crate) fn snapshot(scan: &SymtabScan, image: &ElfImage, bias: u64) -> DebuglensResult<Self>
    {
        let (candidate, kind) = scan.table().ok_or(DebuglensError::NoSymtab)?;
        let section = image
            .section(candidate.section)
            .ok_or(DebuglensError::BadSectionIndex(candidate.section))?;

        let link = section.link as usize;
        let strtab = image
            .section(link)
            .filter(|strtab| strtab.kind == elf::SHT_STRTAB)
            .ok_or(DebuglensError::BadSectionIndex(link))?;
        let strings = image.section_data(strtab)?;
        if strings.is_empty() {
            return Err(DebuglensError::Truncated("symbol string table is empty"));
        }

        let xindex = match scan.xindex_for(candidate) {
            Some(xindex) => {
                let xindex = image
                    .section(xindex.section)
                    .ok_or(DebuglensError::BadSectionIndex(xindex.section))?;
                Some(image.section_data(xindex)?.to_vec())
            }
            None => None,
        };

        let count = section.entry_count()?;
        let stride = usize::try_from(section.entsize).map_err(|_| DebuglensError::Truncated("symbol entry size"))?;

        Ok(Self {
            source: candidate.slot,
            kind,
            count,
            stride,
            entries: image.section_data(section)?.to_vec(),
            xindex,
            strings: strings.to_vec(),
            reader: image.layout().entries(),
            sections: image.layout().sections(),
            bias,
        })
    }

    /// Image the table was read from.
    pub fn source(&self) -> ImageSlot
    {
        self.source
    }

    pub fn kind(&self) -> SymbolTableKind
    {
        self.kind
    }

    /// Number of entries, including the null symbol at index 0.
    pub fn len(&self) -> usize
    {
        self.count
    }

    pub fn is_empty(&self) -> bool
    {
        self.count == 0
    }

    /// Load bias of the image that supplied the table.
    pub fn bias(&self) -> u64
    {
        self.bias
    }

    /// Section headers of the image that supplied the table.
    pub(crate) fn sections(&self) -> &[SectionInfo]
    {
        &self.sections
    }

    pub(crate) fn raw(&self, index: usize) -> DebuglensResult<RawSymbol>
    {
        if index >= self.count {
            return Err(DebuglensError::BadSymbolIndex(index));
        }
        let offset = index
            .checked_mul(self.stride)
            .ok_or(DebuglensError::BadSymbolIndex(index))?;
        self.reader
            .symbol(&self.entries, offset)
            .ok_or(DebuglensError::Truncated("symbol table"))
    }

    /// Decode where symbol `index` lives, following `SHN_XINDEX` through the extended table.
    ///
    /// ## Errors
    ///
    /// `BadSectionIndex` for other reserved indices, or for `SHN_XINDEX` without a usable
    /// extended-index entry.
    pub(crate) fn section_of(&self, index: usize, raw: &RawSymbol) -> DebuglensResult<SymbolSection>
    {
        match raw.shndx {
            elf::SHN_UNDEF => Ok(SymbolSection::Undefined),
            elf::SHN_ABS => Ok(SymbolSection::Absolute),
            elf::SHN_COMMON => Ok(SymbolSection::Common),
            elf::SHN_XINDEX => {
                let extended = self
                    .xindex
                    .as_deref()
                    .and_then(|table| self.reader.extended_index(table, index))
                    .ok_or(DebuglensError::BadSectionIndex(usize::from(elf::SHN_XINDEX)))?;
                Ok(SymbolSection::Index(extended as usize))
            }
            shndx if shndx >= elf::SHN_LORESERVE => Err(DebuglensError::BadSectionIndex(usize::from(shndx))),
            shndx => Ok(SymbolSection::Index(usize::from(shndx))),
        }
    }

    /// NUL-terminated string at `raw.name` in the string table.
    ///
    /// ## Errors
    ///
    /// `BadStringOffset` if the offset lies outside the string table.
    pub(crate) fn name(&self, raw: &RawSymbol) -> DebuglensResult<String>
    {
        let offset = raw.name as usize;
        let tail = self
            .strings
            .get(offset..)
            .filter(|tail| !tail.is_empty())
            .ok_or(DebuglensError::BadStringOffset(u64::from(raw.name)))?;
        let len = tail.iter().position(|&byte| byte == 0).unwrap_or(tail.len());
        Ok(String::from_utf8_lossy(&tail[..len]).into_owned())
    }

    /// Find the symbol whose `[value, value + size)` range contains `address`.
    ///
    /// `address` is a runtime address; the table's bias is removed first. `sections`
    /// is required for relocatable modules, whose symbol values are section-relative:
    /// undefined and common symbols are skipped and section load addresses are added
    /// before the range test.
    pub(crate) fn lookup(&self, address: u64, mut sections: Option<&mut SectionResolver<'_>>) -> DebuglensResult<Option<ModuleSymbol>>
    {
        let address = address.wrapping_sub(self.bias);

        for index in 1..self.count {
            let raw = self.raw(index)?;
            let mut value = raw.value;

            if let Some(resolver) = sections.as_deref_mut() {
                match self.section_of(index, &raw)? {
                    SymbolSection::Undefined | SymbolSection::Common => continue,
                    SymbolSection::Absolute => {}
                    SymbolSection::Index(section) => value = value.wrapping_add(resolver.load_address(section)?),
                }
            }

            if address.wrapping_sub(value) < raw.size {
                return Ok(Some(ModuleSymbol {
                    name: SymbolName::from_raw(self.name(&raw)?),
                    value,
                    size: raw.size,
                    section: self.section_of(index, &raw)?,
                }));
            }
        }

        Ok(None)
    }
}

/// Turn a finished scan into the verdict of the symbol-table stage.
///
/// `debug_failure` is the error of the debug-file stage when the main image had no
/// full table and the debug file could not be resolved. A failing callback only means
/// there is no debug file; any other failure is reported when nothing was found.
pub(crate) fn choose(scan: &SymtabScan, debug_failure: Option<DebuglensError>) -> DebuglensResult<Candidate>
{
    match (scan.table(), debug_failure) {
        (Some((candidate, SymbolTableKind::Full)), _) => Ok(candidate),
        (Some((candidate, SymbolTableKind::Dynamic)), _) => {
            warn!("no full symbol table found, falling back to the dynamic symbol table");
            Ok(candidate)
        }
        (None, Some(err)) if !matches!(err, DebuglensError::CallbackFailed { .. }) => Err(err),
        (None, _) => Err(DebuglensError::NoSymtab),
    }
}
