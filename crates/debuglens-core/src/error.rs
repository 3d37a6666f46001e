//! # Error Types
//!
//! Error handling for module resolution and relocation.
//!
//! We use `thiserror` to automatically generate `Error` trait implementations
//! and nice error messages.
//!
//! Every resolution stage of a [`Module`](crate::module::Module) caches its first
//! definitive outcome. A failure is therefore stored and handed back verbatim on
//! every later query, which is why [`DebuglensError`] is `Clone`: the wrapped
//! parser errors from `object` and `gimli` are plain `Copy` values and the
//! embedder's failure is reduced to an optional OS error code.

use std::io;

use thiserror::Error;

/// Main error type for module resolution
///
/// ## Error Categories
///
/// 1. **Configuration errors**: MissingSectionAddressCallback
/// 2. **Callback errors**: CallbackFailed
/// 3. **Parser errors**: Elf, Dwarf, UnsupportedMachine
/// 4. **Format errors**: UnsupportedRelocationType, BadRelocationOffset, BadStringOffset,
///    UndefinedSymbol, BadSymbolIndex, BadSectionIndex, Truncated, NotElf
/// 5. **Absence outcomes**: NoDwarf, NoSymtab (see [`DebuglensError::is_absence`])
/// 6. **Registry errors**: Overlap, AddressOutOfRange
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DebuglensError
{
    /// The module is relocatable but the callback table cannot resolve section addresses
    ///
    /// Debug sections of a relocatable object only make sense once every section they
    /// refer to has a load address, and only the embedder knows those addresses.
    #[error("Callbacks missing for relocatable module")]
    MissingSectionAddressCallback,

    /// An embedder callback reported failure
    ///
    /// `os_code` carries the system error number when the failure came from the OS
    /// (for example opening or reading a file).
    #[error("Callback returned failure{}", os_error_suffix(.os_code))]
    CallbackFailed
    {
        /// Raw OS error code, if any
        os_code: Option<i32>,
    },

    /// The ELF parser rejected the image
    #[error("ELF error while {context}: {source}")]
    Elf
    {
        /// Operation that was being performed
        context: &'static str,
        /// Underlying parser error
        #[source]
        source: object::Error,
    },

    /// The DWARF reader rejected the debugging information
    #[error("DWARF error while {context}: {source}")]
    Dwarf
    {
        /// Operation that was being performed
        context: &'static str,
        /// Underlying reader error
        #[source]
        source: gimli::Error,
    },

    /// No relocation backend exists for the image's machine
    #[error("No architecture backend for ELF machine {0}")]
    UnsupportedMachine(u16),

    /// The backend does not know how to apply this relocation type to debug data
    #[error("Unsupported relocation type {0}")]
    UnsupportedRelocationType(u32),

    /// A relocation would write outside the data of its target section
    #[error("Relocation offset 0x{offset:x} is bogus for section {section}")]
    BadRelocationOffset
    {
        /// `r_offset` of the failing entry
        offset: u64,
        /// Name of the section the relocation applies to
        section: String,
    },

    /// A symbol name offset points outside the string table
    #[error("String table offset {0} out of range")]
    BadStringOffset(u64),

    /// A relocation refers to an undefined or common symbol
    #[error("Relocation refers to undefined symbol {0}")]
    UndefinedSymbol(usize),

    /// A relocation refers to a symbol index past the end of the symbol table
    #[error("Symbol index {0} out of range")]
    BadSymbolIndex(usize),

    /// A symbol refers to a section that does not exist
    #[error("Section index {0} out of range")]
    BadSectionIndex(usize),

    /// A table or header is shorter than its declared layout
    #[error("Image truncated: {0}")]
    Truncated(&'static str),

    /// The bytes handed over by a callback are not an ELF image
    #[error("Not a valid ELF file")]
    NotElf,

    /// Neither the main image nor a separate debug file carries DWARF
    #[error("No DWARF information found")]
    NoDwarf,

    /// Neither the main image nor a separate debug file carries a symbol table
    #[error("No symbol table found")]
    NoSymtab,

    /// A reported module overlaps an existing one
    #[error("Address range of {name} overlaps an existing module")]
    Overlap
    {
        /// Name of the module being reported
        name: String,
    },

    /// No reported module covers the address
    #[error("Address 0x{0:016x} out of range")]
    AddressOutOfRange(u64),
}

impl DebuglensError
{
    /// Whether this outcome means "the information is not there" rather than a failure.
    ///
    /// Callers can degrade gracefully on absence, e.g. still show symbol names when
    /// [`NoDwarf`](DebuglensError::NoDwarf) is reported.
    #[must_use]
    pub fn is_absence(&self) -> bool
    {
        matches!(self, DebuglensError::NoDwarf | DebuglensError::NoSymtab)
    }

    pub(crate) fn elf(context: &'static str) -> impl FnOnce(object::Error) -> Self
    {
        move |source| DebuglensError::Elf { context, source }
    }

    pub(crate) fn dwarf(context: &'static str) -> impl FnOnce(gimli::Error) -> Self
    {
        move |source| DebuglensError::Dwarf { context, source }
    }
}

fn os_error_suffix(os_code: &Option<i32>) -> String
{
    os_code.map(|code| format!(" (os error {code})")).unwrap_or_default()
}

impl From<CallbackError> for DebuglensError
{
    fn from(err: CallbackError) -> Self
    {
        DebuglensError::CallbackFailed { os_code: err.os_code }
    }
}

/// Failure reported by an embedder callback.
///
/// Converting from `std::io::Error` keeps the raw OS error, so callbacks can use `?`
/// on file operations.
#[derive(Error, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[error("callback failed")]
pub struct CallbackError
{
    /// Raw OS error code, if the failure came from the OS
    pub os_code: Option<i32>,
}

impl CallbackError
{
    /// A failure with no OS error attached (e.g. "nothing found").
    #[must_use]
    pub fn not_found() -> Self
    {
        Self { os_code: None }
    }
}

impl From<io::Error> for CallbackError
{
    fn from(err: io::Error) -> Self
    {
        Self {
            os_code: err.raw_os_error(),
        }
    }
}

/// Convenience type alias for `Result<T, DebuglensError>`
///
/// ```rust
/// use debuglens_core::error::DebuglensResult;
/// fn foo() -> DebuglensResult<()>
/// {
///     Ok(())
/// }
/// ```
pub type DebuglensResult<T> = std::result::Result<T, DebuglensError>;

/// Result type returned by embedder callbacks
pub type CallbackResult<T> = std::result::Result<T, CallbackError>;
