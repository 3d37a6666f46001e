//! Common module for library exports

pub use crate::callbacks::{DebugLink, ImageSource, LocatedImage, ModuleCallbacks, ModuleInfo, SectionLoad, UserData};
pub use crate::error::{CallbackError, CallbackResult, DebuglensError, DebuglensResult};
pub use crate::locator::{LocatorConfig, StandardLocator};
pub use crate::module::symtab::{SymbolTable, SymbolTableKind};
pub use crate::module::{ImageSlot, Module};
pub use crate::session::Session;
pub use crate::types::{Address, ModuleSymbol, SourceLocation, SymbolName, SymbolSection};
