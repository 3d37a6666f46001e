//! # Callback Contract
//!
//! The resolver never searches the file system or the debuggee on its own. Every
//! external fact comes from an embedder-supplied [`ModuleCallbacks`] table:
//!
//! - **find_elf**: produce the bytes of a module's main image
//! - **find_debuginfo**: produce a separate debug-info file, given the `.gnu_debuglink` hint
//! - **section_address**: report where a section of a relocatable module was loaded
//!
//! Each callback is invoked at most once per fact and module; the outcome is cached
//! by the [`Module`](crate::module::Module) whether it succeeded or not.

use std::any::Any;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use crate::error::{CallbackError, CallbackResult};

/// Per-module slot the embedder can use to stash state between callbacks.
pub type UserData = Option<Box<dyn Any>>;

/// Identity of a module as reported to the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleInfo
{
    /// Name the module was reported under (often, but not necessarily, a path).
    pub name: String,
    /// Lowest runtime address covered by the module.
    pub low_addr: u64,
    /// One past the highest runtime address covered by the module.
    pub high_addr: u64,
}

impl ModuleInfo
{
    pub fn new(name: impl Into<String>, low_addr: u64, high_addr: u64) -> Self
    {
        Self {
            name: name.into(),
            low_addr,
            high_addr,
        }
    }

    /// Whether `address` lies in `[low_addr, high_addr)`.
    pub fn contains(&self, address: u64) -> bool
    {
        address >= self.low_addr && address < self.high_addr
    }

    /// Whether the two address ranges share at least one byte.
    pub fn overlaps(&self, low_addr: u64, high_addr: u64) -> bool
    {
        self.low_addr < high_addr && low_addr < self.high_addr
    }
}

/// Contents of a `.gnu_debuglink` section.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DebugLink
{
    /// File name of the separate debug file (usually a bare basename).
    pub file_name: String,
    /// CRC-32 of the entire debug file, as stored by the linker.
    pub crc: u32,
}

/// Where the bytes of a located image come from.
#[derive(Debug)]
pub enum ImageSource
{
    /// An open file; it is read completely when the image is opened.
    File(File),
    /// Bytes already in memory.
    Memory(Vec<u8>),
}

/// Image handed back by [`ModuleCallbacks::find_elf`] or [`ModuleCallbacks::find_debuginfo`].
#[derive(Debug)]
pub struct LocatedImage
{
    pub source: ImageSource,
    /// Resolved file name, if the callback knows one.
    pub name: Option<PathBuf>,
}

impl LocatedImage
{
    /// Open `path` and remember it as the image name.
    ///
    /// ## Errors
    ///
    /// Returns the OS error of the failed `open` as a [`CallbackError`].
    pub fn open(path: impl AsRef<Path>) -> CallbackResult<Self>
    {
        let path = path.as_ref();
        let file = File::open(path)?;
        Ok(Self {
            source: ImageSource::File(file),
            name: Some(path.to_path_buf()),
        })
    }

    pub fn from_bytes(bytes: Vec<u8>, name: Option<PathBuf>) -> Self
    {
        Self {
            source: ImageSource::Memory(bytes),
            name,
        }
    }

    /// Consume the handle and return the image bytes.
    pub(crate) fn into_bytes(self) -> CallbackResult<(Vec<u8>, Option<PathBuf>)>
    {
        let bytes = match self.source {
            ImageSource::Memory(bytes) => bytes,
            ImageSource::File(mut file) => {
                let mut bytes = Vec::new();
                file.read_to_end(&mut bytes)?;
                bytes
            }
        };
        Ok((bytes, self.name))
    }
}

/// Load state of a section in a relocatable module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionLoad
{
    /// The section was placed at this runtime address.
    Loaded(u64),
    /// The section occupies no memory (it was discarded or is not allocated).
    NotLoaded,
}

impl SectionLoad
{
    /// Address to add to section-relative values; unloaded sections count as zero.
    pub fn address(self) -> u64
    {
        match self {
            SectionLoad::Loaded(address) => address,
            SectionLoad::NotLoaded => 0,
        }
    }
}

/// Callback table supplied by the embedder.
///
/// Implementations are trusted to be synchronous and to terminate. A callback
/// reporting `Err` is a definitive answer for that module: it will not be asked again.
pub trait ModuleCallbacks
{
    /// Locate the main image of `module`.
    ///
    /// ## Errors
    ///
    /// Return a [`CallbackError`] when the image cannot be found or opened.
    fn find_elf(&self, module: &ModuleInfo, user_data: &mut UserData) -> CallbackResult<LocatedImage>;

    /// Locate the separate debug-info file of `module`.
    ///
    /// `main_name` is the name the main image was resolved to and `debuglink` the
    /// parsed `.gnu_debuglink` hint, when the main image has one.
    ///
    /// ## Errors
    ///
    /// Return a [`CallbackError`] when no debug file exists; the resolver treats that as
    /// "no separate debug information", not as a hard failure of the module.
    fn find_debuginfo(
        &self,
        module: &ModuleInfo,
        user_data: &mut UserData,
        main_name: Option<&Path>,
        debuglink: Option<&DebugLink>,
    ) -> CallbackResult<LocatedImage>;

    /// Whether [`ModuleCallbacks::section_address`] is implemented.
    ///
    /// Relocatable modules cannot be used without it.
    fn resolves_section_addresses(&self) -> bool
    {
        false
    }

    /// Report the load address of `section` in a relocatable module.
    ///
    /// ## Errors
    ///
    /// The default implementation always fails.
    fn section_address(&self, _module: &ModuleInfo, _user_data: &mut UserData, _section: &str) -> CallbackResult<SectionLoad>
    {
        Err(CallbackError::not_found())
    }
}
