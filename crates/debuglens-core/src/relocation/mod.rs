//! # Relocation Engine
//!
//! Makes the debug sections of a relocatable object (`ET_REL`) readable as if the
//! object had been linked at its load addresses.
//!
//! ## Algorithm
//!
//! Every `SHT_REL`/`SHT_RELA` section of the target image is visited in header order.
//! Sections whose target (`sh_info`) is not a debug section are skipped. For each
//! entry:
//!
//! 1. Resolve the symbol: index 0 is zero, `SHN_ABS` is used as is, undefined and
//!    common symbols fail, anything else gets its section's load address added
//! 2. Classify the relocation type into a [`RelocWidth`] through the backend
//! 3. Patch the field in place (`RELA`: `S + A`, `REL`: stored value `+ S`)
//!
//! The first failing entry aborts the pass. Sections processed before it stay
//! relocated; there is no rollback.

pub mod backend;
pub mod value;

use std::collections::HashMap;

use object::elf;
use tracing::{debug, trace, warn};

pub use backend::{RelocationBackend, backend_for_machine};
pub use value::RelocWidth;

use crate::callbacks::{ModuleCallbacks, ModuleInfo, SectionLoad, UserData};
use crate::elf::{ElfImage, RawRelocation, SectionInfo};
use crate::error::{DebuglensError, DebuglensResult};
use crate::module::ImageSlot;
use crate::module::symtab::SymbolTable;
use crate::types::SymbolSection;

/// Per-module cache of section load addresses reported by the embedder.
pub(crate) type SectionLoadCache = HashMap<(ImageSlot, usize), SectionLoad>;

/// Resolves load addresses of the sections of one image through the
/// `section_address` callback, asking at most once per section.
pub(crate) struct SectionResolver<'a>
{
    pub module: &'a ModuleInfo,
    pub user_data: &'a mut UserData,
    pub callbacks: &'a dyn ModuleCallbacks,
    pub slot: ImageSlot,
    pub sections: &'a [SectionInfo],
    pub cache: &'a mut SectionLoadCache,
}

impl SectionResolver<'_>
{
    /// Load address of section `index`.
    ///
    /// Allocated sections without an address are resolved by the embedder; every
    /// other section keeps its header address. A section reported as not loaded
    /// counts as address zero and is not asked about again.
    ///
    /// ## Errors
    ///
    /// - `BadSectionIndex` if the image has no such section
    /// - `CallbackFailed` if the embedder cannot place the section
    pub(crate) fn load_address(&mut self, index: usize) -> DebuglensResult<u64>
    {
        let section = self
            .sections
            .get(index)
            .ok_or(DebuglensError::BadSectionIndex(index))?;
        if !section.is_alloc() || section.address != 0 {
            return Ok(section.address);
        }

        let key = (self.slot, index);
        if let Some(load) = self.cache.get(&key) {
            return Ok(load.address());
        }

        let load = self
            .callbacks
            .section_address(self.module, self.user_data, &section.name)?;
        debug!(module = %self.module.name, section = %section.name, ?load, "resolved section load address");
        self.cache.insert(key, load);
        Ok(load.address())
    }
}

/// Inputs of one relocation pass over an image.
pub(crate) struct RelocationPass<'a>
{
    pub backend: &'a dyn RelocationBackend,
    pub symbols: &'a SymbolTable,
    pub sections: SectionResolver<'a>,
}

impl RelocationPass<'_>
{
    /// Apply every relocation that targets a debug section of `image`.
    ///
    /// ## Errors
    ///
    /// `NoDwarf` if the image has no relocation section for a debug section;
    /// otherwise the first failure of an individual relocation. Compressed targets are
    /// left untouched.
    pub(crate) fn run(&mut self, image: &mut ElfImage) -> DebuglensResult<()>
    {
        let mut result = Err(DebuglensError::NoDwarf);
        let sections = image.layout().sections();

        for section in sections
            .iter()
            .filter(|section| section.kind == elf::SHT_REL || section.kind == elf::SHT_RELA)
        {
            let target_index = section.info as usize;
            let target = sections
                .get(target_index)
                .ok_or(DebuglensError::BadSectionIndex(target_index))?;
            if !self.backend.is_debug_section(&target.name) {
                trace!(section = %section.name, target = %target.name, "skipping non-debug relocations");
                continue;
            }
            result = Ok(());
            if target.is_compressed() {
                warn!(section = %section.name, target = %target.name, "leaving compressed debug section unrelocated");
                continue;
            }

            let entries = read_relocations(image, section)?;
            trace!(section = %section.name, target = %target.name, count = entries.len(), "applying relocations");

            let (layout, data) = image.section_data_mut(target_index)?;
            let endian = layout.endian;
            for entry in &entries {
                self.apply(entry, data, endian, target)?;
            }
        }

        result
    }

    fn apply(&mut self, entry: &RawRelocation, data: &mut [u8], endian: object::Endianness, target: &SectionInfo) -> DebuglensResult<()>
    {
        let symbol = self.symbol_value(entry.symbol)?;
        let width = self
            .backend
            .simple_type(entry.r_type)
            .ok_or(DebuglensError::UnsupportedRelocationType(entry.r_type))?;

        width
            .apply(data, entry.offset, endian, symbol, entry.addend)
            .map(|_| ())
            .ok_or_else(|| DebuglensError::BadRelocationOffset {
                offset: entry.offset,
                section: target.name.clone(),
            })
    }

    fn symbol_value(&mut self, index: usize) -> DebuglensResult<u64>
    {
        // Strip replaces references to discarded section symbols with index 0.
        if index == 0 {
            return Ok(0);
        }

        let raw = self.symbols.raw(index)?;
        match self.symbols.section_of(index, &raw)? {
            SymbolSection::Absolute => Ok(raw.value),
            SymbolSection::Undefined | SymbolSection::Common => Err(DebuglensError::UndefinedSymbol(index)),
            SymbolSection::Index(section) => Ok(raw.value.wrapping_add(self.sections.load_address(section)?)),
        }
    }
}

fn read_relocations(image: &ElfImage, section: &SectionInfo) -> DebuglensResult<Vec<RawRelocation>>
{
    let data = image.section_data(section)?;
    let count = section.entry_count()?;
    let stride = usize::try_from(section.entsize).map_err(|_| DebuglensError::Truncated("relocation entry size"))?;
    let reader = image.layout().entries();
    let with_addend = section.kind == elf::SHT_RELA;

    (0..count)
        .map(|index| {
            index
                .checked_mul(stride)
                .and_then(|offset| reader.relocation(data, offset, with_addend))
                .ok_or(DebuglensError::Truncated("relocation section"))
        })
        .collect()
}
