//! DWARF handle of a module, built over owned copies of the (relocated) debug sections.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use addr2line::Context;
use gimli::{Dwarf, EndianArcSlice, RunTimeEndian, SectionId};
use object::{Object, ObjectSection};
use once_cell::sync::OnceCell;

use super::ImageSlot;
use crate::elf::ElfImage;
use crate::error::{DebuglensError, DebuglensResult};
use crate::types::SourceLocation;

/// Reader over an owned, shareable section buffer.
pub type OwnedReader = EndianArcSlice<RunTimeEndian>;
/// DWARF sections of a module backed by [`OwnedReader`].
pub type OwnedDwarf = Dwarf<OwnedReader>;

const DWARF_SECTIONS: &[&str] = &[
    ".debug_abbrev",
    ".debug_addr",
    ".debug_aranges",
    ".debug_info",
    ".debug_line",
    ".debug_line_str",
    ".debug_ranges",
    ".debug_rnglists",
    ".debug_str",
    ".debug_str_offsets",
    ".debug_types",
    ".debug_loc",
    ".debug_loclists",
    ".debug_frame",
    ".debug_macro",
    ".debug_cu_index",
    ".debug_tu_index",
];

fn load_section_bytes(file: &object::File<'_>, name: &str) -> DebuglensResult<Option<Arc<[u8]>>>
{
    let Some(section) = file.section_by_name(name) else {
        return Ok(None);
    };
    let data = section
        .uncompressed_data()
        .map_err(DebuglensError::elf("reading debug section"))?;
    Ok(Some(match data {
        Cow::Borrowed(bytes) => Arc::<[u8]>::from(bytes),
        Cow::Owned(vec) => vec.into(),
    }))
}

/// Debugging information of a module, ready for consumers.
pub struct DebugInfo
{
    source: ImageSlot,
    bias: u64,
    endian: RunTimeEndian,
    sections: HashMap<&'static str, Arc<[u8]>>,
    dwarf: OwnedDwarf,
    context: OnceCell<Context<OwnedReader>>,
}

impl DebugInfo
{
    /// Open the DWARF sections of `image`, which must already be relocated if needed.
    ///
    /// ## Errors
    ///
    /// - `NoDwarf` if the image has no (or an empty) `.debug_info`
    /// - `Dwarf` if the first unit header cannot be read
    /// - `Elf` if a compressed section cannot be inflated
    pub(crate) fn load(image: &ElfImage, source: ImageSlot, bias: u64) -> DebuglensResult<Self>
    {
        let file = object::File::parse(image.data()).map_err(DebuglensError::elf("reopening image"))?;
        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };

        let mut sections = HashMap::new();
        for name in DWARF_SECTIONS {
            if let Some(bytes) = load_section_bytes(&file, name)? {
                sections.insert(*name, bytes);
            }
        }
        if sections.get(".debug_info").map_or(true, |info| info.is_empty()) {
            return Err(DebuglensError::NoDwarf);
        }

        let dwarf = load_dwarf(&sections, endian).map_err(DebuglensError::dwarf("loading sections"))?;
        dwarf
            .units()
            .next()
            .map_err(DebuglensError::dwarf("reading the first unit header"))?;

        Ok(Self {
            source,
            bias,
            endian,
            sections,
            dwarf,
            context: OnceCell::new(),
        })
    }

    /// Image the debugging information was read from.
    pub fn source(&self) -> ImageSlot
    {
        self.source
    }

    /// Difference between runtime addresses and the addresses used in the DWARF.
    pub fn bias(&self) -> u64
    {
        self.bias
    }

    pub fn dwarf(&self) -> &OwnedDwarf
    {
        &self.dwarf
    }

    /// Bytes of a loaded debug section, after relocation.
    pub fn section(&self, name: &str) -> Option<&[u8]>
    {
        self.sections.get(name).map(|bytes| &bytes[..])
    }

    /// Source location of the runtime `address`, if the line tables cover it.
    ///
    /// ## Errors
    ///
    /// Returns `Dwarf` if the line program or unit ranges are malformed.
    pub fn source_location(&self, address: u64) -> DebuglensResult<Option<SourceLocation>>
    {
        let context = self.context()?;
        let probe = address.wrapping_sub(self.bias);
        let location = context
            .find_location(probe)
            .map_err(DebuglensError::dwarf("finding source location"))?;

        Ok(location.and_then(|loc| {
            loc.file.map(|file| SourceLocation {
                file: file.to_string(),
                line: loc.line,
                column: loc.column,
            })
        }))
    }

    fn context(&self) -> DebuglensResult<&Context<OwnedReader>>
    {
        self.context.get_or_try_init(|| {
            let dwarf = load_dwarf(&self.sections, self.endian).map_err(DebuglensError::dwarf("loading sections"))?;
            Context::from_dwarf(dwarf).map_err(DebuglensError::dwarf("building line context"))
        })
    }
}

impl fmt::Debug for DebugInfo
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let mut names: Vec<_> = self.sections.keys().collect();
        names.sort();
        f.debug_struct("DebugInfo")
            .field("source", &self.source)
            .field("bias", &format_args!("0x{:x}", self.bias))
            .field("sections", &names)
            .finish_non_exhaustive()
    }
}

fn load_dwarf(sections: &HashMap<&'static str, Arc<[u8]>>, endian: RunTimeEndian) -> Result<OwnedDwarf, gimli::Error>
{
    Dwarf::load(|id: SectionId| {
        let data = sections
            .get(id.name())
            .cloned()
            .unwrap_or_else(|| Arc::<[u8]>::from(Vec::new()));
        Ok::<_, gimli::Error>(EndianArcSlice::new(data, endian))
    })
}
