//! Tests for lazy module resolution and its outcome caches

mod common;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use common::{ElfBuilder, FakeCallbacks, SYM_SIZE, Sym};
use debuglens_core::callbacks::ModuleInfo;
use debuglens_core::error::DebuglensError;
use debuglens_core::module::symtab::SymbolTableKind;
use debuglens_core::module::{ImageSlot, Module};
use debuglens_core::types::SymbolSection;
use object::elf;

fn module(callbacks: &Arc<FakeCallbacks>, low: u64) -> Module
{
    Module::new(ModuleInfo::new("/lib/libdemo.so", low, low + 0x10000), callbacks.clone())
}

fn image_with_function(builder: &mut ElfBuilder) -> u16
{
    let text = builder.text(0x40);
    builder.symbols(elf::SHT_SYMTAB, &[Sym::func("foo", text, 0x1000, 0x10)])
}

#[test]
fn test_failed_find_elf_is_cached()
{
    let callbacks = Arc::new(FakeCallbacks::default());
    let mut module = module(&callbacks, 0x10000);

    assert_eq!(module.elf().unwrap_err(), DebuglensError::CallbackFailed { os_code: None });
    assert_eq!(module.elf().unwrap_err(), DebuglensError::CallbackFailed { os_code: None });
    assert_eq!(module.symbols().unwrap_err(), DebuglensError::CallbackFailed { os_code: None });
    assert_eq!(module.dwarf().unwrap_err(), DebuglensError::CallbackFailed { os_code: None });

    assert_eq!(callbacks.find_elf_calls.get(), 1);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 0);
    assert_eq!(module.is_relocatable(), None);
}

#[test]
fn test_non_elf_bytes_are_rejected()
{
    let callbacks = Arc::new(FakeCallbacks::with_main(b"#!/bin/sh\necho hello\n".to_vec()));
    let mut module = module(&callbacks, 0x10000);

    assert_eq!(module.elf().unwrap_err(), DebuglensError::NotElf);
    assert_eq!(module.elf().unwrap_err(), DebuglensError::NotElf);
    assert_eq!(callbacks.find_elf_calls.get(), 1);
}

#[test]
fn test_bias_from_first_load_segment()
{
    let image = ElfBuilder::shared().load(0x400_000, 0x1000).load(0x600_000, 0x1000).build();
    let callbacks = Arc::new(FakeCallbacks::with_main(image));
    let mut module = module(&callbacks, 0x7f00_0000_0800);

    let main = module.elf().unwrap();
    assert_eq!(main.bias(), 0x7f00_0000_0000u64.wrapping_sub(0x400_000));
    assert_eq!(main.name(), Some(PathBuf::from("/lib/libdemo.so").as_path()));
    assert_eq!(module.is_relocatable(), Some(false));
}

#[test]
fn test_bias_is_zero_without_load_segment()
{
    let callbacks = Arc::new(FakeCallbacks::with_main(ElfBuilder::shared().build()));
    let mut module = module(&callbacks, 0x5000_0000);

    assert_eq!(module.elf().unwrap().bias(), 0);
}

#[test]
fn test_debuglink_is_passed_to_find_debuginfo()
{
    let mut builder = ElfBuilder::shared();
    builder.debuglink("libdemo.so.debug", 0xdead_beef);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0x10000);

    assert!(module.debug_file().is_err());
    assert!(module.debug_file().is_err());
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);

    let link = callbacks.seen_debuglink.borrow().clone().unwrap();
    assert_eq!(link.file_name, "libdemo.so.debug");
    assert_eq!(link.crc, 0xdead_beef);
    assert_eq!(*callbacks.seen_main_name.borrow(), Some(PathBuf::from("/lib/libdemo.so")));
}

#[test]
fn test_full_table_wins_over_earlier_dynsym()
{
    let mut builder = ElfBuilder::shared();
    let text = builder.text(0x40);
    builder.symbols(elf::SHT_DYNSYM, &[Sym::func("exported", text, 0x1000, 0x10)]);
    builder.symbols(
        elf::SHT_SYMTAB,
        &[Sym::func("exported", text, 0x1000, 0x10), Sym::func("helper", text, 0x1010, 0x8)],
    );
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0x10000);

    let symbols = module.symbols().unwrap();
    assert_eq!(symbols.kind(), SymbolTableKind::Full);
    assert_eq!(symbols.source(), ImageSlot::Main);
    assert_eq!(symbols.len(), 3);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 0);
}

#[test]
fn test_full_table_in_debug_file_beats_main_dynsym()
{
    let mut main = ElfBuilder::shared();
    let text = main.text(0x40);
    main.symbols(elf::SHT_DYNSYM, &[Sym::func("exported", text, 0x1000, 0x10)]);

    let mut debug = ElfBuilder::shared();
    let text = debug.text(0x40);
    debug.symbols(
        elf::SHT_SYMTAB,
        &[Sym::func("exported", text, 0x1000, 0x10), Sym::func("helper", text, 0x1010, 0x8)],
    );

    let callbacks = Arc::new(FakeCallbacks::with_main(main.build()).with_debug(debug.build()));
    let mut module = module(&callbacks, 0);

    let symbols = module.symbols().unwrap();
    assert_eq!(symbols.kind(), SymbolTableKind::Full);
    assert_eq!(symbols.source(), ImageSlot::Debug);

    let helper = module.symbol_for_address(0x1014).unwrap().unwrap();
    assert_eq!(helper.name.raw(), "helper");
}

#[test]
fn test_dynsym_is_accepted_without_debug_file()
{
    let mut builder = ElfBuilder::shared();
    let text = builder.text(0x40);
    builder.symbols(elf::SHT_DYNSYM, &[Sym::func("exported", text, 0x1000, 0x10)]);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    let symbols = module.symbols().unwrap();
    assert_eq!(symbols.kind(), SymbolTableKind::Dynamic);
    assert_eq!(symbols.source(), ImageSlot::Main);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_missing_symbol_table_is_cached()
{
    let callbacks = Arc::new(FakeCallbacks::with_main(ElfBuilder::shared().build()));
    let mut module = module(&callbacks, 0);

    assert_eq!(module.symbols().unwrap_err(), DebuglensError::NoSymtab);
    assert_eq!(module.symbols().unwrap_err(), DebuglensError::NoSymtab);
    assert_eq!(module.symbol_for_address(0x1000).unwrap_err(), DebuglensError::NoSymtab);
    assert!(module.symbols().unwrap_err().is_absence());
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_broken_debug_file_is_reported_when_nothing_else_is_found()
{
    let callbacks = Arc::new(FakeCallbacks::with_main(ElfBuilder::shared().build()).with_debug(b"garbage".to_vec()));
    let mut module = module(&callbacks, 0);

    assert_eq!(module.symbols().unwrap_err(), DebuglensError::NotElf);
    assert_eq!(module.debug_file().unwrap_err(), DebuglensError::NotElf);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_symbol_for_address_uses_half_open_ranges()
{
    let mut builder = ElfBuilder::shared();
    image_with_function(&mut builder);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    let foo = module.symbol_for_address(0x1005).unwrap().unwrap();
    assert_eq!(foo.name.raw(), "foo");
    assert_eq!(foo.value, 0x1000);
    assert_eq!(foo.size, 0x10);
    assert_eq!(foo.section, SymbolSection::Index(1));

    assert!(module.symbol_for_address(0x1000).unwrap().is_some());
    assert!(module.symbol_for_address(0x1010).unwrap().is_none());
    assert!(module.symbol_for_address(0x0fff).unwrap().is_none());
}

#[test]
fn test_symbol_for_address_removes_bias()
{
    let mut builder = ElfBuilder::shared().load(0, 0x1000);
    image_with_function(&mut builder);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0x7f00_0000_0000);

    let foo = module.symbol_for_address(0x7f00_0000_100f).unwrap().unwrap();
    assert_eq!(foo.name.raw(), "foo");
    assert!(module.symbol_for_address(0x100f).unwrap().is_none());
}

#[test]
fn test_big_endian_symbol_table()
{
    let mut builder = ElfBuilder::new(elf::ET_DYN, elf::EM_PPC64).big_endian();
    image_with_function(&mut builder);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    let foo = module.symbol_for_address(0x1008).unwrap().unwrap();
    assert_eq!(foo.name.raw(), "foo");
    assert_eq!(foo.size, 0x10);
}

#[test]
fn test_dwarf_absent_everywhere()
{
    let callbacks = Arc::new(FakeCallbacks::with_main(ElfBuilder::shared().build()));
    let mut module = module(&callbacks, 0);

    assert_eq!(module.dwarf().unwrap_err(), DebuglensError::NoDwarf);
    assert_eq!(module.source_location(0x1000).unwrap_err(), DebuglensError::NoDwarf);
    assert!(!module.has_unvisited_units());
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_dwarf_from_separate_debug_file()
{
    let mut debug = ElfBuilder::shared().load(0, 0x1000);
    debug.debug(".debug_info", common::debug_info_unit(false, 0x1000));
    debug.debug(".debug_abbrev", common::debug_abbrev());
    let main = ElfBuilder::shared().load(0, 0x1000).build();

    let callbacks = Arc::new(FakeCallbacks::with_main(main).with_debug(debug.build()));
    let mut module = module(&callbacks, 0x20000);

    let dwarf = module.dwarf().unwrap();
    assert_eq!(dwarf.source(), ImageSlot::Debug);
    assert_eq!(dwarf.bias(), 0x20000);
    assert!(dwarf.section(".debug_abbrev").is_some());
    assert!(module.has_unvisited_units());
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_dwarf_in_main_image_skips_debug_file()
{
    let mut main = ElfBuilder::shared();
    main.debug(".debug_info", common::debug_info_unit(false, 0x1000));
    main.debug(".debug_abbrev", common::debug_abbrev());
    let callbacks = Arc::new(FakeCallbacks::with_main(main.build()));
    let mut module = module(&callbacks, 0);

    assert_eq!(module.dwarf().unwrap().source(), ImageSlot::Main);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 0);
}

#[test]
fn test_main_image_with_dwarf_is_its_own_debug_file()
{
    let mut main = ElfBuilder::shared().load(0, 0x1000);
    main.debug(".debug_info", common::debug_info_unit(false, 0x1000));
    main.debug(".debug_abbrev", common::debug_abbrev());
    let debug = ElfBuilder::shared().load(0x400_000, 0x1000).build();

    let callbacks = Arc::new(FakeCallbacks::with_main(main.build()).with_debug(debug));
    let mut module = module(&callbacks, 0x20000);

    assert_eq!(module.dwarf().unwrap().source(), ImageSlot::Main);
    let main_bias = module.elf().unwrap().bias();

    let debug_file = module.debug_file().unwrap();
    assert_eq!(debug_file.bias(), main_bias);
    assert_eq!(debug_file.name(), Some(Path::new("/lib/libdemo.so")));

    assert_eq!(module.symbols().unwrap_err(), DebuglensError::NoSymtab);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 0);
}

#[test]
fn test_debug_file_bound_before_dwarf_is_kept()
{
    let mut main = ElfBuilder::shared().load(0, 0x1000);
    main.debug(".debug_info", common::debug_info_unit(false, 0x1000));
    main.debug(".debug_abbrev", common::debug_abbrev());
    let debug = ElfBuilder::shared().load(0x400_000, 0x1000).build();

    let callbacks = Arc::new(FakeCallbacks::with_main(main.build()).with_debug(debug));
    let mut module = module(&callbacks, 0x20000);

    let separate_bias = module.debug_file().unwrap().bias();
    assert_eq!(separate_bias, 0x20000u64.wrapping_sub(0x400_000));
    assert_eq!(module.dwarf().unwrap().source(), ImageSlot::Main);
    assert_eq!(module.debug_file().unwrap().bias(), separate_bias);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 1);
}

#[test]
fn test_symbol_table_linked_to_non_string_section()
{
    let mut builder = ElfBuilder::shared();
    let text = builder.text(0x40);
    let mut entries = builder.writer();
    entries.zeros(SYM_SIZE as usize);
    builder.raw_section(".symtab", elf::SHT_SYMTAB, 0, u32::from(text), 1, SYM_SIZE, entries.bytes);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    let expected = DebuglensError::BadSectionIndex(usize::from(text));
    assert_eq!(module.symbols().unwrap_err(), expected);
    assert_eq!(module.symbols().unwrap_err(), expected);
    assert_eq!(module.symbol_for_address(0x1000).unwrap_err(), expected);
    assert_eq!(callbacks.find_debuginfo_calls.get(), 0);
}

#[test]
fn test_empty_string_table_is_rejected()
{
    let mut builder = ElfBuilder::shared();
    let strtab = builder.section(".strtab", elf::SHT_STRTAB, 0, Vec::new());
    let mut entries = builder.writer();
    entries.zeros(SYM_SIZE as usize);
    builder.raw_section(".symtab", elf::SHT_SYMTAB, 0, u32::from(strtab), 1, SYM_SIZE, entries.bytes);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    assert!(matches!(module.symbols().unwrap_err(), DebuglensError::Truncated(_)));
}

#[test]
fn test_symbol_name_past_string_table_end()
{
    let mut builder = ElfBuilder::shared();
    let text = builder.text(0x40);
    let strtab = builder.section(".strtab", elf::SHT_STRTAB, 0, b"\0foo\0".to_vec());
    let mut entries = builder.writer();
    entries.zeros(SYM_SIZE as usize);
    entries.u32(0x100);
    entries.u8((elf::STB_GLOBAL << 4) | elf::STT_FUNC);
    entries.u8(0);
    entries.u16(text);
    entries.u64(0x1000);
    entries.u64(0x10);
    builder.raw_section(".symtab", elf::SHT_SYMTAB, 0, u32::from(strtab), 1, SYM_SIZE, entries.bytes);
    let callbacks = Arc::new(FakeCallbacks::with_main(builder.build()));
    let mut module = module(&callbacks, 0);

    assert_eq!(module.symbols().unwrap().len(), 2);
    assert_eq!(module.symbol_for_address(0x1004).unwrap_err(), DebuglensError::BadStringOffset(0x100));
    assert!(module.symbol_for_address(0x2000).unwrap().is_none());
}

#[test]
fn test_user_data_is_kept_per_module()
{
    let callbacks = Arc::new(FakeCallbacks::default());
    let mut module = module(&callbacks, 0);
    *module.user_data_mut() = Some(Box::new(42u32));

    let stored = module.user_data().as_ref().and_then(|data| data.downcast_ref::<u32>());
    assert_eq!(stored, Some(&42));
}
