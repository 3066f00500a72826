//! Identifiers and the error taxonomy shared by every layer of the store.

use std::fmt;

/// Image checksums.
pub mod checksum;

/// Byte offset of a block inside the database image. `Address::NULL` is the
/// null sentinel used by pointer fields.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Address(pub u64);

impl Address {
    /// The null sentinel.
    pub const NULL: Address = Address(0);

    /// Returns true for the null sentinel.
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Returns the address `delta` bytes past this one.
    #[inline]
    pub fn offset(self, delta: u64) -> Address {
        Address(self.0 + delta)
    }
}

/// Discriminator stored in every node record, used to rebuild the right
/// variant on load.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct TypeTag(pub u16);

/// Handle to a struct layout inside a [`crate::nd::Schema`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct StructId(pub u32);

/// Handle to a relationship field declaration inside a [`crate::nd::Schema`].
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct FieldId(pub u32);

/// Errors surfaced by the store.
#[derive(thiserror::Error, Debug)]
pub enum NdError {
    /// File persistence failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// Schema misuse: adding after freeze, wrong record type, unpaired fields.
    #[error("layout: {0}")]
    Layout(String),
    /// A request that cannot be represented.
    #[error("capacity: {0}")]
    Capacity(String),
    /// Relationship bookkeeping disagrees with itself.
    #[error("consistency: {0}")]
    Consistency(String),
    /// The storage medium is damaged.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Invalid configuration content.
    #[error("config: {0}")]
    Config(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, NdError>;

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Address {
    fn from(value: u64) -> Self {
        Address(value)
    }
}

impl From<Address> for u64 {
    fn from(value: Address) -> Self {
        value.0
    }
}

impl From<u16> for TypeTag {
    fn from(value: u16) -> Self {
        TypeTag(value)
    }
}
