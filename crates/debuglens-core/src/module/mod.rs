//! # Modules
//!
//! A [`Module`] is one loaded program image (executable, shared object or kernel
//! module) together with everything resolved about it so far.
//!
//! ## Resolution stages
//!
//! Each stage runs on first demand and caches its verdict forever, success or failure:
//!
//! 1. **Main image**: `find_elf`, then parse the ELF headers and compute the load bias
//! 2. **Debug file**: read `.gnu_debuglink`, then `find_debuginfo`
//! 3. **Symbol table**: scan the main image, then the debug file if needed
//! 4. **DWARF**: open the main image, falling back to the debug file; relocatable
//!    modules are relocated first
//!
//! A failed stage is never retried; asking again returns the cached error without
//! calling back into the embedder.
//!
//! ## Relocatable modules
//!
//! For `ET_REL` images (kernel modules) symbol values and debug sections refer to
//! section-relative offsets. Section load addresses come from
//! [`ModuleCallbacks::section_address`] and are cached per section.

pub mod debuglink;
pub mod dwarf;
mod outcome;
pub mod symtab;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use self::debuglink::{DEBUGLINK_SECTION, parse_debuglink};
use self::dwarf::DebugInfo;
use self::outcome::Outcome;
use self::symtab::{SymbolTable, SymtabScan};
use crate::callbacks::{DebugLink, LocatedImage, ModuleCallbacks, ModuleInfo, UserData};
use crate::elf::ElfImage;
use crate::error::{DebuglensError, DebuglensResult};
use crate::relocation::{RelocationBackend, RelocationPass, SectionLoadCache, SectionResolver, backend_for_machine};
use crate::types::{ModuleSymbol, SourceLocation};

/// Which of a module's two images a piece of data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageSlot
{
    /// The main image returned by `find_elf`.
    Main,
    /// The separate debug file returned by `find_debuginfo`.
    Debug,
}

/// An opened image of a module.
#[derive(Debug)]
pub struct FileBinding
{
    name: Option<PathBuf>,
    image: ElfImage,
    bias: u64,
}

impl FileBinding
{
    fn open(located: LocatedImage, base: u64) -> DebuglensResult<Self>
    {
        let (bytes, name) = located.into_bytes()?;
        let image = ElfImage::parse(bytes)?;
        let bias = image.load_bias(base);
        Ok(Self { name, image, bias })
    }

    /// File name reported by the callback, if any.
    pub fn name(&self) -> Option<&Path>
    {
        self.name.as_deref()
    }

    pub fn image(&self) -> &ElfImage
    {
        &self.image
    }

    /// Runtime address minus file address for this image.
    pub fn bias(&self) -> u64
    {
        self.bias
    }
}

/// Where a module's debugging information is read from.
#[derive(Debug)]
enum DebugImage
{
    /// The main image carries its own DWARF; no separate file was searched for.
    SameAsMain,
    /// A separate file returned by `find_debuginfo`.
    Separate(FileBinding),
}

impl DebugImage
{
    fn slot(&self) -> ImageSlot
    {
        match self {
            DebugImage::SameAsMain => ImageSlot::Main,
            DebugImage::Separate(_) => ImageSlot::Debug,
        }
    }
}

/// Embedder-facing state shared by every stage.
struct Host
{
    info: ModuleInfo,
    user_data: UserData,
    callbacks: Arc<dyn ModuleCallbacks>,
}

/// A loaded module and its lazily resolved images, symbols and debug information.
///
/// Fields are declared in reverse order of acquisition, so they are released in
/// that order when the module is dropped.
pub struct Module
{
    dwarf: Outcome<DebugInfo>,
    symtab: Outcome<SymbolTable>,
    backend: Option<Box<dyn RelocationBackend>>,
    debug: Outcome<DebugImage>,
    main: Outcome<FileBinding>,
    section_loads: SectionLoadCache,
    lazy_units: bool,
    host: Host,
}

impl Module
{
    pub fn new(info: ModuleInfo, callbacks: Arc<dyn ModuleCallbacks>) -> Self
    {
        Self {
            dwarf: Outcome::default(),
            symtab: Outcome::default(),
            backend: None,
            debug: Outcome::default(),
            main: Outcome::default(),
            section_loads: SectionLoadCache::new(),
            lazy_units: false,
            host: Host {
                info,
                user_data: None,
                callbacks,
            },
        }
    }

    pub fn info(&self) -> &ModuleInfo
    {
        &self.host.info
    }

    pub fn name(&self) -> &str
    {
        &self.host.info.name
    }

    /// Per-module slot handed to every callback.
    pub fn user_data(&self) -> &UserData
    {
        &self.host.user_data
    }

    pub fn user_data_mut(&mut self) -> &mut UserData
    {
        &mut self.host.user_data
    }

    /// Whether the main image is an unlinked object; `None` until it has been opened.
    pub fn is_relocatable(&self) -> Option<bool>
    {
        self.main.ready().map(|main| main.image.is_relocatable())
    }

    /// Whether DWARF was opened but its compilation units were not enumerated yet.
    pub fn has_unvisited_units(&self) -> bool
    {
        self.lazy_units
    }

    /// Main image of the module and its bias.
    ///
    /// ## Errors
    ///
    /// The cached failure of `find_elf` or of parsing its result.
    pub fn elf(&mut self) -> DebuglensResult<&FileBinding>
    {
        let host = &mut self.host;
        self.main.get_or_resolve(|| open_main(host)).map(|main| &*main)
    }

    /// Image the module's debugging information is read from.
    ///
    /// This is the main image itself, bias included, once [`Module::dwarf`] found DWARF
    /// there; otherwise the separate debug file located through `find_debuginfo`.
    ///
    /// ## Errors
    ///
    /// `CallbackFailed` when the embedder found no debug file, or the cached failure of
    /// the main image.
    pub fn debug_file(&mut self) -> DebuglensResult<&FileBinding>
    {
        let Module { main, debug, host, .. } = self;
        let main = main.get_or_resolve(|| open_main(host))?;
        match debug.get_or_resolve(|| open_debug(host, main))? {
            DebugImage::SameAsMain => Ok(&*main),
            DebugImage::Separate(binding) => Ok(&*binding),
        }
    }

    /// Symbol table of the module.
    ///
    /// ## Errors
    ///
    /// - `NoSymtab` if neither image has a symbol table
    /// - the cached failure of the main image or of the string-table checks
    pub fn symbols(&mut self) -> DebuglensResult<&SymbolTable>
    {
        let Module {
            main, debug, symtab, host, ..
        } = self;
        let main = main.get_or_resolve(|| open_main(host))?;
        symtab.get_or_resolve(|| locate_symtab(host, main, debug)).map(|table| &*table)
    }

    /// DWARF of the module, relocated if the module is relocatable.
    ///
    /// ## Errors
    ///
    /// - `NoDwarf` if neither image carries debugging information
    /// - `MissingSectionAddressCallback` for relocatable modules without
    ///   [`ModuleCallbacks::section_address`]
    /// - any failure of the symbol table or of the relocation pass
    pub fn dwarf(&mut self) -> DebuglensResult<&DebugInfo>
    {
        let Module {
            dwarf,
            symtab,
            backend,
            debug,
            main,
            section_loads,
            lazy_units,
            host,
        } = self;

        dwarf
            .get_or_resolve(|| {
                let info = DwarfLoader {
                    host,
                    main,
                    debug,
                    symtab,
                    backend,
                    section_loads,
                }
                .find()?;
                *lazy_units = true;
                Ok(info)
            })
            .map(|info| &*info)
    }

    /// Symbol whose address range contains the runtime `address`.
    ///
    /// Returns `Ok(None)` when no symbol covers the address.
    ///
    /// ## Errors
    ///
    /// The symbol-table failure, `BadStringOffset` for a corrupt name, or, for
    /// relocatable modules, a failure to resolve a section load address.
    pub fn symbol_for_address(&mut self, address: u64) -> DebuglensResult<Option<ModuleSymbol>>
    {
        let Module {
            main,
            debug,
            symtab,
            section_loads,
            host,
            ..
        } = self;
        let main = main.get_or_resolve(|| open_main(host))?;
        let relocatable = main.image.is_relocatable();
        let symbols = symtab.get_or_resolve(|| locate_symtab(host, main, debug))?;

        if !relocatable {
            return symbols.lookup(address, None);
        }
        let mut sections = SectionResolver {
            module: &host.info,
            user_data: &mut host.user_data,
            callbacks: host.callbacks.as_ref(),
            slot: symbols.source(),
            sections: symbols.sections(),
            cache: section_loads,
        };
        symbols.lookup(address, Some(&mut sections))
    }

    /// Source file and line of the runtime `address`.
    ///
    /// ## Errors
    ///
    /// The DWARF failure (`NoDwarf` when there is none) or a malformed line program.
    pub fn source_location(&mut self, address: u64) -> DebuglensResult<Option<SourceLocation>>
    {
        self.dwarf()?.source_location(address)
    }
}

impl fmt::Debug for Module
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Module")
            .field("info", &self.host.info)
            .field("main", &self.main.ready().map(FileBinding::name))
            .field("debug", &self.debug.ready().map(DebugImage::slot))
            .field("debug_error", &self.debug.failure())
            .field("symtab", &self.symtab.is_resolved())
            .field("symtab_error", &self.symtab.failure())
            .field("dwarf", &self.dwarf.is_resolved())
            .field("dwarf_error", &self.dwarf.failure())
            .field("backend", &self.backend)
            .finish_non_exhaustive()
    }
}

fn open_main(host: &mut Host) -> DebuglensResult<FileBinding>
{
    let located = host.callbacks.find_elf(&host.info, &mut host.user_data)?;
    let main = FileBinding::open(located, host.info.low_addr)?;
    debug!(
        module = %host.info.name,
        file = ?main.name,
        bias = format_args!("0x{:x}", main.bias),
        relocatable = main.image.is_relocatable(),
        "opened main image"
    );
    Ok(main)
}

fn read_debuglink(main: &FileBinding) -> Option<DebugLink>
{
    let section = main.image.section_by_name(DEBUGLINK_SECTION)?;
    let parsed = main
        .image
        .section_data(section)
        .and_then(|data| parse_debuglink(data, main.image.layout().endian));
    match parsed {
        Ok(link) => Some(link),
        Err(err) => {
            warn!(error = %err, "ignoring malformed {DEBUGLINK_SECTION} section");
            None
        }
    }
}

fn open_debug(host: &mut Host, main: &FileBinding) -> DebuglensResult<DebugImage>
{
    let debuglink = read_debuglink(main);
    let located = host
        .callbacks
        .find_debuginfo(&host.info, &mut host.user_data, main.name(), debuglink.as_ref())?;
    let binding = FileBinding::open(located, host.info.low_addr)?;
    debug!(
        module = %host.info.name,
        file = ?binding.name,
        bias = format_args!("0x{:x}", binding.bias),
        "opened debug file"
    );
    Ok(DebugImage::Separate(binding))
}

fn locate_symtab(host: &mut Host, main: &FileBinding, debug: &mut Outcome<DebugImage>) -> DebuglensResult<SymbolTable>
{
    let mut scan = SymtabScan::default();
    scan.scan(ImageSlot::Main, &main.image);

    let mut debug_file = None;
    let mut debug_failure = None;
    if !scan.has_full_table() {
        match debug.get_or_resolve(|| open_debug(host, main)) {
            Ok(DebugImage::Separate(binding)) => {
                scan.scan(ImageSlot::Debug, &binding.image);
                debug_file = Some(&*binding);
            }
            Ok(DebugImage::SameAsMain) => {}
            Err(err) => debug_failure = Some(err),
        }
    }

    let candidate = symtab::choose(&scan, debug_failure)?;
    let source = match candidate.slot {
        ImageSlot::Main => main,
        ImageSlot::Debug => debug_file.ok_or(DebuglensError::NoSymtab)?,
    };
    let table = SymbolTable::snapshot(&scan, &source.image, source.bias)?;
    debug!(
        module = %host.info.name,
        source = ?table.source(),
        kind = ?table.kind(),
        entries = table.len(),
        "loaded symbol table"
    );
    Ok(table)
}

/// Borrowed view of every stage the DWARF loader may drive.
struct DwarfLoader<'a>
{
    host: &'a mut Host,
    main: &'a mut Outcome<FileBinding>,
    debug: &'a mut Outcome<DebugImage>,
    symtab: &'a mut Outcome<SymbolTable>,
    backend: &'a mut Option<Box<dyn RelocationBackend>>,
    section_loads: &'a mut SectionLoadCache,
}

impl DwarfLoader<'_>
{
    /// Main image first; the debug file only when the main image has no DWARF.
    ///
    /// DWARF found in the main image makes it the module's debug image, unless a
    /// separate file was already bound by the symbol-table stage.
    fn find(mut self) -> DebuglensResult<DebugInfo>
    {
        match self.load(ImageSlot::Main) {
            Ok(info) => {
                self.debug.settle(DebugImage::SameAsMain);
                return Ok(info);
            }
            Err(DebuglensError::NoDwarf) => {}
            Err(err) => return Err(err),
        }

        let host = &mut *self.host;
        let main = self.main.get_or_resolve(|| open_main(host))?;
        let opened = self.debug.get_or_resolve(|| open_debug(host, main)).map(|_| ());
        match opened {
            Ok(()) => self.load(ImageSlot::Debug),
            Err(DebuglensError::CallbackFailed { .. }) => Err(DebuglensError::NoDwarf),
            Err(err) => Err(err),
        }
    }

    /// Open DWARF on one image, relocating it first for relocatable modules.
    fn load(&mut self, slot: ImageSlot) -> DebuglensResult<DebugInfo>
    {
        let host = &mut *self.host;
        let main = self.main.get_or_resolve(|| open_main(host))?;

        if main.image.is_relocatable() {
            if !host.callbacks.resolves_section_addresses() {
                return Err(DebuglensError::MissingSectionAddressCallback);
            }
            let machine = main.image.layout().machine;
            let backend = match self.backend.take() {
                Some(backend) => backend,
                None => backend_for_machine(machine).ok_or(DebuglensError::UnsupportedMachine(machine))?,
            };
            let backend = self.backend.insert(backend);

            let symbols = self.symtab.get_or_resolve(|| locate_symtab(host, main, self.debug))?;
            let target = match slot {
                ImageSlot::Main => main,
                ImageSlot::Debug => match self.debug.get_or_resolve(|| open_debug(host, main))? {
                    DebugImage::Separate(binding) => binding,
                    DebugImage::SameAsMain => return Err(DebuglensError::NoDwarf),
                },
            };

            let mut pass = RelocationPass {
                backend: &**backend,
                symbols,
                sections: SectionResolver {
                    module: &host.info,
                    user_data: &mut host.user_data,
                    callbacks: host.callbacks.as_ref(),
                    slot: symbols.source(),
                    sections: symbols.sections(),
                    cache: &mut *self.section_loads,
                },
            };
            pass.run(&mut target.image)?;
            debug!(module = %host.info.name, target = ?slot, "relocated debug sections");
            return DebugInfo::load(&target.image, slot, target.bias);
        }

        let target = match slot {
            ImageSlot::Main => &*main,
            ImageSlot::Debug => match self.debug.get_or_resolve(|| open_debug(host, main))? {
                DebugImage::Separate(binding) => &*binding,
                DebugImage::SameAsMain => return Err(DebuglensError::NoDwarf),
            },
        };
        DebugInfo::load(&target.image, slot, target.bias)
    }
}
