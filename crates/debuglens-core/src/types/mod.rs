//! # Types
//!
//! Plain value types shared by the resolver, the relocation engine and embedders.

pub mod address;
pub mod symbols;

// Re-export all public types
pub use address::Address;
pub use symbols::{ModuleSymbol, SourceLocation, SymbolLanguage, SymbolName, SymbolSection};
