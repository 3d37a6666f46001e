//! # Session
//!
//! Registry of the modules reported for one debuggee.
//!
//! A `Session` owns the callback table and every reported [`Module`]. Address
//! queries pick the module whose `[low, high)` range covers the address and
//! delegate to it.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use debuglens_core::locator::StandardLocator;
//! use debuglens_core::session::Session;
//! use debuglens_core::types::Address;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let mut session = Session::new(Arc::new(StandardLocator::default()));
//!     session.report_module("/usr/lib/libz.so.1", 0x7f00_0000_0000, 0x7f00_0002_0000)?;
//!
//!     if let Some(symbol) = session.symbol_for_address(Address::from(0x7f00_0000_1234))? {
//!         println!("{} @ {:#x}", symbol.name, symbol.value);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Thread Safety
//!
//! A session is not thread-safe. Wrap it in a `Mutex` if several threads need it;
//! concurrent first resolution of the same module is not guarded internally.

use std::sync::Arc;

use tracing::debug;

use crate::callbacks::{ModuleCallbacks, ModuleInfo};
use crate::error::{DebuglensError, DebuglensResult};
use crate::module::Module;
use crate::types::{Address, ModuleSymbol, SourceLocation};

/// Modules of one debuggee plus the callbacks used to resolve them.
pub struct Session
{
    modules: Vec<Module>,
    callbacks: Arc<dyn ModuleCallbacks>,
}

impl Session
{
    #[must_use]
    pub fn new(callbacks: Arc<dyn ModuleCallbacks>) -> Self
    {
        Self {
            modules: Vec::new(),
            callbacks,
        }
    }

    /// Register a module covering `[low_addr, high_addr)`.
    ///
    /// Reporting the same name and range again returns the existing module with all
    /// of its cached state.
    ///
    /// ## Errors
    ///
    /// Returns `Overlap` if the range intersects a different module.
    pub fn report_module(&mut self, name: &str, low_addr: u64, high_addr: u64) -> DebuglensResult<&mut Module>
    {
        let info = ModuleInfo::new(name, low_addr, high_addr);

        if let Some(index) = self.modules.iter().position(|module| *module.info() == info) {
            return Ok(&mut self.modules[index]);
        }
        if self
            .modules
            .iter()
            .any(|module| module.info().overlaps(low_addr, high_addr))
        {
            return Err(DebuglensError::Overlap { name: info.name });
        }

        debug!(module = name, low = format_args!("0x{low_addr:x}"), high = format_args!("0x{high_addr:x}"), "reported module");
        let module = Module::new(info, Arc::clone(&self.callbacks));
        let index = self
            .modules
            .partition_point(|existing| existing.info().low_addr < low_addr);
        self.modules.insert(index, module);
        Ok(&mut self.modules[index])
    }

    /// Drop the module called `name` and everything resolved for it.
    ///
    /// Returns whether a module was removed.
    pub fn remove_module(&mut self, name: &str) -> bool
    {
        let before = self.modules.len();
        self.modules.retain(|module| module.name() != name);
        before != self.modules.len()
    }

    /// Reported modules, ordered by start address.
    pub fn modules(&self) -> &[Module]
    {
        &self.modules
    }

    pub fn module(&mut self, name: &str) -> Option<&mut Module>
    {
        self.modules.iter_mut().find(|module| module.name() == name)
    }

    /// Module whose range covers `address`.
    pub fn module_for_address(&mut self, address: Address) -> Option<&mut Module>
    {
        self.modules
            .iter_mut()
            .find(|module| module.info().contains(address.value()))
    }

    /// Symbol covering `address` in the module that contains it.
    ///
    /// ## Errors
    ///
    /// `AddressOutOfRange` if no module covers the address; otherwise the module's
    /// symbol-table failure.
    pub fn symbol_for_address(&mut self, address: Address) -> DebuglensResult<Option<ModuleSymbol>>
    {
        self.module_for_address(address)
            .ok_or(DebuglensError::AddressOutOfRange(address.value()))?
            .symbol_for_address(address.value())
    }

    /// Source location of `address` in the module that contains it.
    ///
    /// ## Errors
    ///
    /// `AddressOutOfRange` if no module covers the address; otherwise the module's
    /// DWARF failure.
    pub fn source_location(&mut self, address: Address) -> DebuglensResult<Option<SourceLocation>>
    {
        self.module_for_address(address)
            .ok_or(DebuglensError::AddressOutOfRange(address.value()))?
            .source_location(address.value())
    }
}
