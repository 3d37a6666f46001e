//! Symbol and source location types.

use std::fmt;

use rustc_demangle::try_demangle;

/// Programming language associated with a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolLanguage
{
    /// Rust symbol (detected via mangling or namespace patterns).
    Rust,
    /// C++ symbol (Itanium mangling without Rust extensions).
    Cpp,
    /// C symbol or unmangled global.
    C,
    /// Unknown or mixed language.
    Unknown,
}

impl fmt::Display for SymbolLanguage
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        let label = match self {
            SymbolLanguage::Rust => "rust",
            SymbolLanguage::Cpp => "c++",
            SymbolLanguage::C => "c",
            SymbolLanguage::Unknown => "unknown",
        };
        write!(f, "{label}")
    }
}

/// A symbol name with demangling metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolName
{
    raw: String,
    demangled: Option<String>,
    language: SymbolLanguage,
}

impl SymbolName
{
    /// Construct from a raw linkage name.
    pub fn new(raw: String, demangled: Option<String>, language: SymbolLanguage) -> Self
    {
        Self {
            raw,
            demangled,
            language,
        }
    }

    /// Build a name from a raw string-table entry, demangling it when possible.
    ///
    /// - Rust symbols: start with `_R` or `_ZN`, or contain `::`
    /// - C++ symbols: start with `_Z` (Itanium mangling)
    /// - Everything else is reported as unknown
    pub fn from_raw(raw: String) -> Self
    {
        let demangled = try_demangle(&raw).ok().map(|d| d.to_string());
        let language = if raw.starts_with("_R") || raw.starts_with("_ZN") || raw.contains("::") {
            SymbolLanguage::Rust
        } else if raw.starts_with("_Z") {
            SymbolLanguage::Cpp
        } else {
            SymbolLanguage::Unknown
        };

        Self::new(raw, demangled, language)
    }

    /// Raw (mangled) name emitted in the object file.
    pub fn raw(&self) -> &str
    {
        &self.raw
    }

    /// Demangled human-friendly name if available.
    pub fn demangled(&self) -> Option<&str>
    {
        self.demangled.as_deref()
    }

    /// Preferred presentation (demangled fallback to raw).
    pub fn display_name(&self) -> &str
    {
        self.demangled.as_deref().unwrap_or(&self.raw)
    }

    /// Language classification for the symbol.
    pub fn language(&self) -> SymbolLanguage
    {
        self.language
    }
}

impl fmt::Display for SymbolName
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.display_name())
    }
}

/// Where an ELF symbol lives, decoded from its section index.
///
/// Extended indices are already resolved through the section-index table, so
/// `Index` always holds the real section number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolSection
{
    /// `SHN_UNDEF`: defined elsewhere, has no address in this module.
    Undefined,
    /// `SHN_ABS`: the value is already absolute.
    Absolute,
    /// `SHN_COMMON`: tentative definition without storage.
    Common,
    /// A concrete section of the image that supplied the symbol table.
    Index(usize),
}

/// Symbol found by an address lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleSymbol
{
    /// Symbol name from the string table.
    pub name: SymbolName,
    /// Absolute value, already relocated for relocatable modules (file address, bias not applied).
    pub value: u64,
    /// Size in bytes (`st_size`).
    pub size: u64,
    /// Section the symbol belongs to.
    pub section: SymbolSection,
}

/// Source code location for an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLocation
{
    /// Absolute or compilation-directory-relative path.
    pub file: String,
    /// Line number, if known.
    pub line: Option<u32>,
    /// Column number, if known.
    pub column: Option<u32>,
}

impl SourceLocation
{
    /// Helper to build a location when only a file is known.
    pub fn from_file(file: impl Into<String>) -> Self
    {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }
}
