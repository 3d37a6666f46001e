//! Memory address type.

use std::fmt;
use std::ops::{Add, Sub};

/// Strongly typed runtime address
///
/// This wrapper around `u64` keeps runtime addresses (what the debuggee sees)
/// apart from file addresses, sizes and section offsets, which stay plain `u64`
/// inside the resolver.
///
/// ## Example
///
/// ```rust
/// use debuglens_core::types::Address;
///
/// let addr = Address::from(0x1000);
/// let next_addr = addr + 0x100; // Add offset
/// assert_eq!(next_addr.value(), 0x1100);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(u64);

impl Address
{
    /// The null address (0x0)
    pub const ZERO: Self = Address(0);

    /// Create a new address from a `u64` value
    ///
    /// This is equivalent to `Address::from(value)` but can be used in const contexts.
    pub const fn new(value: u64) -> Self
    {
        Address(value)
    }

    /// Get the raw `u64` value of this address
    pub const fn value(self) -> u64
    {
        self.0
    }

    /// Remove a load bias, turning a runtime address into a file address.
    ///
    /// Biases are computed with wrapping arithmetic, so removing one wraps as well.
    ///
    /// ```rust
    /// use debuglens_core::types::Address;
    ///
    /// assert_eq!(Address::from(0x7000_1234).unbias(0x7000_0000), 0x1234);
    /// ```
    #[must_use]
    pub const fn unbias(self, bias: u64) -> u64
    {
        self.0.wrapping_sub(bias)
    }
}

impl From<u64> for Address
{
    fn from(value: u64) -> Self
    {
        Address(value)
    }
}

impl From<Address> for u64
{
    fn from(address: Address) -> Self
    {
        address.0
    }
}

impl fmt::Display for Address
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "0x{:016x}", self.0)
    }
}

impl Add<u64> for Address
{
    type Output = Address;

    fn add(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for Address
{
    type Output = Address;

    fn sub(self, rhs: u64) -> Self::Output
    {
        Address(self.0.wrapping_sub(rhs))
    }
}
