//! Storage types of simple data relocations and the read/modify/write applied to them.

use object::{Endian, Endianness};

/// Integer storage a simple relocation patches, named after the ELF data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelocWidth
{
    /// `Elf_Byte`
    Byte,
    /// `Elf_Half`
    Half,
    /// `Elf_Word`
    Word,
    /// `Elf_Sword`
    Sword,
    /// `Elf_Xword`
    Xword,
    /// `Elf_Sxword`
    Sxword,
}

impl RelocWidth
{
    /// Size of the patched field in bytes.
    pub fn size(self) -> usize
    {
        match self {
            RelocWidth::Byte => 1,
            RelocWidth::Half => 2,
            RelocWidth::Word | RelocWidth::Sword => 4,
            RelocWidth::Xword | RelocWidth::Sxword => 8,
        }
    }

    /// Read the field at the start of `field`, widened to 64 bits.
    ///
    /// Signed storage is sign-extended so accumulation behaves like arithmetic on the
    /// narrow type; the result is truncated again on [`RelocWidth::write`].
    #[allow(clippy::cast_possible_wrap, clippy::cast_sign_loss)]
    fn read(self, field: &[u8], endian: Endianness) -> u64
    {
        match self {
            RelocWidth::Byte => u64::from(field[0]),
            RelocWidth::Half => u64::from(endian.read_u16_bytes([field[0], field[1]])),
            RelocWidth::Word => u64::from(endian.read_u32_bytes(array(field))),
            RelocWidth::Sword => i64::from(endian.read_u32_bytes(array(field)) as i32) as u64,
            RelocWidth::Xword | RelocWidth::Sxword => endian.read_u64_bytes(array(field)),
        }
    }

    /// Store the low `size()` bytes of `value` at the start of `field`.
    #[allow(clippy::cast_possible_truncation)]
    fn write(self, field: &mut [u8], endian: Endianness, value: u64)
    {
        match self {
            RelocWidth::Byte => field[0] = value as u8,
            RelocWidth::Half => field[..2].copy_from_slice(&endian.write_u16_bytes(value as u16)),
            RelocWidth::Word | RelocWidth::Sword => field[..4].copy_from_slice(&endian.write_u32_bytes(value as u32)),
            RelocWidth::Xword | RelocWidth::Sxword => field[..8].copy_from_slice(&endian.write_u64_bytes(value)),
        }
    }

    /// Patch the field at `offset` of `data` and return the stored value.
    ///
    /// - With an addend (`RELA`): the field becomes `symbol + addend`
    /// - Without one (`REL`): `symbol` is added to the value already stored
    ///
    /// Arithmetic wraps and the result is truncated to the field width. Returns `None`
    /// when `offset + size()` runs past the end of `data`; nothing is written then.
    pub fn apply(self, data: &mut [u8], offset: u64, endian: Endianness, symbol: u64, addend: Option<i64>) -> Option<u64>
    {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(self.size())?;
        let field = data.get_mut(start..end)?;

        let value = match addend {
            Some(addend) => symbol.wrapping_add_signed(addend),
            None => self.read(field, endian).wrapping_add(symbol),
        };
        self.write(field, endian, value);
        Some(value)
    }
}

fn array<const N: usize>(field: &[u8]) -> [u8; N]
{
    let mut bytes = [0u8; N];
    bytes.copy_from_slice(&field[..N]);
    bytes
}
