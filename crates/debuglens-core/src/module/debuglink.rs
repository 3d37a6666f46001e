//! `.gnu_debuglink` section decoding.
//!
//! Layout: NUL-terminated file name, zero padding up to a 4-byte boundary, then a
//! 4-byte CRC-32 in the image's byte order. The CRC always occupies the last four
//! bytes of the section, so the padding length does not have to be trusted.

use object::{Endian, Endianness};

use crate::callbacks::DebugLink;
use crate::error::{DebuglensError, DebuglensResult};

/// Name of the section carrying the debug-link hint.
pub const DEBUGLINK_SECTION: &str = ".gnu_debuglink";

/// Decode the raw bytes of a `.gnu_debuglink` section.
///
/// ## Errors
///
/// Returns `Truncated` when the section has no NUL-terminated name or no room for
/// the trailing CRC after it.
pub fn parse_debuglink(data: &[u8], endian: Endianness) -> DebuglensResult<DebugLink>
{
    let name_len = data
        .iter()
        .position(|&byte| byte == 0)
        .ok_or(DebuglensError::Truncated("debuglink name is not terminated"))?;
    let crc_offset = data
        .len()
        .checked_sub(4)
        .filter(|&offset| offset > name_len)
        .ok_or(DebuglensError::Truncated("debuglink has no CRC"))?;

    let mut crc = [0u8; 4];
    crc.copy_from_slice(&data[crc_offset..]);

    Ok(DebugLink {
        file_name: String::from_utf8_lossy(&data[..name_len]).into_owned(),
        crc: endian.read_u32_bytes(crc),
    })
}
