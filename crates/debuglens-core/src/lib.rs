//! # debuglens-core
//!
//! Lazy resolution of the ELF images, symbol tables and DWARF data of the modules
//! loaded into a debuggee.
//!
//! A debugger reports each module (name and address range) and then asks questions
//! about it. Everything behind those questions is resolved on first use and cached,
//! failures included:
//! - The main ELF image and its load bias, located through embedder callbacks
//! - An optional separate debug file, found through the `.gnu_debuglink` hint
//! - The best available symbol table (`.symtab` preferred over `.dynsym`)
//! - DWARF sections, relocated in place first when the module is a relocatable object
//!
//! ## Getting started
//!
//! Embedders implement [`ModuleCallbacks`] or use
//! [`StandardLocator`](locator::StandardLocator) when module names are local file
//! paths, then register modules with a [`Session`].
//!
//! ## Architecture support
//!
//! Relocation of debug sections supports x86-64, i386, AArch64, ARM, RISC-V,
//! PowerPC and s390 (see [`relocation::backend`]). Other machines can still be
//! queried for symbols; only relocatable objects need a backend.

pub mod callbacks;
pub mod elf;
pub mod error;
pub mod locator;
pub mod module;
pub mod prelude;
pub mod relocation;
pub mod session;
pub mod types;

pub use callbacks::{DebugLink, LocatedImage, ModuleCallbacks, ModuleInfo, SectionLoad, UserData};
// Re-export commonly used types
pub use error::{CallbackError, CallbackResult, DebuglensError, DebuglensResult};
pub use module::Module;
pub use session::Session;
