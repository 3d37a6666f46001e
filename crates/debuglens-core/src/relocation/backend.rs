//! # Architecture Backends
//!
//! The relocation engine only needs two answers from the target architecture:
//!
//! - **is_debug_section**: does a section carry debugging information
//! - **simple_type**: which plain data store does a relocation type perform
//!
//! Only absolute data relocations are "simple". PC-relative, GOT, TLS and similar
//! types never appear against debug sections of a well-formed object and are
//! reported as unsupported.

use object::elf;

use super::value::RelocWidth;

/// Architecture-specific relocation knowledge.
pub trait RelocationBackend: std::fmt::Debug
{
    /// ELF machine this backend handles (`e_machine`).
    fn machine(&self) -> u16;

    /// Storage written by relocation type `r_type`, if it is a simple data store.
    fn simple_type(&self, r_type: u32) -> Option<RelocWidth>;

    /// Whether relocations against section `name` have to be applied.
    fn is_debug_section(&self, name: &str) -> bool
    {
        name.starts_with(".debug") || name.starts_with(".gnu.linkonce.wi.")
    }
}

/// Backend driven by a static table of `(r_type, width)` pairs.
#[derive(Debug, Clone, Copy)]
struct TableBackend
{
    machine: u16,
    simple: &'static [(u32, RelocWidth)],
}

impl RelocationBackend for TableBackend
{
    fn machine(&self) -> u16
    {
        self.machine
    }

    fn simple_type(&self, r_type: u32) -> Option<RelocWidth>
    {
        self.simple
            .iter()
            .find(|(candidate, _)| *candidate == r_type)
            .map(|(_, width)| *width)
    }
}

const X86_64: &[(u32, RelocWidth)] = &[
    (elf::R_X86_64_64, RelocWidth::Xword),
    (elf::R_X86_64_32, RelocWidth::Word),
    (elf::R_X86_64_32S, RelocWidth::Sword),
    (elf::R_X86_64_16, RelocWidth::Half),
    (elf::R_X86_64_8, RelocWidth::Byte),
];

const I386: &[(u32, RelocWidth)] = &[
    (elf::R_386_32, RelocWidth::Word),
    (elf::R_386_16, RelocWidth::Half),
    (elf::R_386_8, RelocWidth::Byte),
];

const AARCH64: &[(u32, RelocWidth)] = &[
    (elf::R_AARCH64_ABS64, RelocWidth::Xword),
    (elf::R_AARCH64_ABS32, RelocWidth::Word),
    (elf::R_AARCH64_ABS16, RelocWidth::Half),
];

const ARM: &[(u32, RelocWidth)] = &[
    (elf::R_ARM_ABS32, RelocWidth::Word),
    (elf::R_ARM_ABS16, RelocWidth::Half),
    (elf::R_ARM_ABS8, RelocWidth::Byte),
];

const RISCV: &[(u32, RelocWidth)] = &[
    (elf::R_RISCV_64, RelocWidth::Xword),
    (elf::R_RISCV_32, RelocWidth::Word),
];

const PPC: &[(u32, RelocWidth)] = &[
    (elf::R_PPC_ADDR32, RelocWidth::Word),
    (elf::R_PPC_ADDR16, RelocWidth::Half),
];

const PPC64: &[(u32, RelocWidth)] = &[
    (elf::R_PPC64_ADDR64, RelocWidth::Xword),
    (elf::R_PPC64_ADDR32, RelocWidth::Word),
];

const S390: &[(u32, RelocWidth)] = &[
    (elf::R_390_64, RelocWidth::Xword),
    (elf::R_390_32, RelocWidth::Word),
    (elf::R_390_16, RelocWidth::Half),
    (elf::R_390_8, RelocWidth::Byte),
];

/// Backend for ELF machine `machine`, or `None` if the architecture is not supported.
pub fn backend_for_machine(machine: u16) -> Option<Box<dyn RelocationBackend>>
{
    let simple = match machine {
        elf::EM_X86_64 => X86_64,
        elf::EM_386 => I386,
        elf::EM_AARCH64 => AARCH64,
        elf::EM_ARM => ARM,
        elf::EM_RISCV => RISCV,
        elf::EM_PPC => PPC,
        elf::EM_PPC64 => PPC64,
        elf::EM_S390 => S390,
        _ => return None,
    };
    Some(Box::new(TableBackend { machine, simple }))
}
