//! Byte length accounting.
//!
//! - [`Size`]
//! - [`BufferRequirements`]
//! - [`SizeContext`]
use std::fmt;

use crate::{Error, Result, postgres::DataFormat};

/// How precise a [`Size`] is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SizeKind {
    /// Length is not known without measuring the value.
    Unknown,
    /// Length is exactly the value.
    Exact,
    /// Length is at most the value.
    UpperBound,
}

/// A byte length that may not be known yet.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Size {
    kind: SizeKind,
    value: i32,
}

impl Size {
    /// Zero bytes, exactly.
    pub const ZERO: Size = Size { kind: SizeKind::Exact, value: 0 };

    pub const UNKNOWN: Size = Size { kind: SizeKind::Unknown, value: 0 };

    /// Create an exact size.
    pub const fn create(value: i32) -> Size {
        Size { kind: SizeKind::Exact, value }
    }

    /// Create an upper bound size.
    pub const fn create_upper_bound(value: i32) -> Size {
        Size { kind: SizeKind::UpperBound, value }
    }

    pub const fn kind(&self) -> SizeKind {
        self.kind
    }

    pub const fn is_unknown(&self) -> bool {
        matches!(self.kind, SizeKind::Unknown)
    }

    pub const fn is_exact(&self) -> bool {
        matches!(self.kind, SizeKind::Exact)
    }

    pub const fn is_upper_bound(&self) -> bool {
        matches!(self.kind, SizeKind::UpperBound)
    }

    /// Returns the byte count.
    ///
    /// Returns [`ContractError`][crate::error::ContractError] if size is unknown.
    pub fn value(&self) -> Result<i32> {
        match self.kind {
            SizeKind::Unknown => Err(Error::contract("cannot get the value of an unknown size")),
            _ => Ok(self.value),
        }
    }

    /// Returns the byte count, or [`None`] if size is unknown.
    pub const fn get(&self) -> Option<i32> {
        match self.kind {
            SizeKind::Unknown => None,
            _ => Some(self.value),
        }
    }

    /// Sum two sizes.
    ///
    /// Unknown on either side wins, otherwise any upper bound operand makes the
    /// result an upper bound.
    pub const fn combine(self, other: Size) -> Size {
        match (self.kind, other.kind) {
            (SizeKind::Unknown, _) | (_, SizeKind::Unknown) => Size::UNKNOWN,
            (SizeKind::Exact, SizeKind::Exact) => Size::create(self.value + other.value),
            _ => Size::create_upper_bound(self.value + other.value),
        }
    }

    /// Same as [`Size::combine`] with an exact byte count.
    pub const fn combine_bytes(self, value: i32) -> Size {
        self.combine(Size::create(value))
    }

    /// Turn exact size into upper bound, other kind is unchanged.
    pub const fn to_upper_bound(self) -> Size {
        match self.kind {
            SizeKind::Exact => Size::create_upper_bound(self.value),
            _ => self,
        }
    }
}

impl Default for Size {
    fn default() -> Self {
        Size::UNKNOWN
    }
}

impl From<i32> for Size {
    fn from(value: i32) -> Self {
        Size::create(value)
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            SizeKind::Unknown => f.write_str("unknown"),
            SizeKind::Exact => write!(f, "{}", self.value),
            SizeKind::UpperBound => write!(f, "<={}", self.value),
        }
    }
}

impl fmt::Debug for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Size({self})")
    }
}

/// Contiguous bytes a converter needs resident before it proceeds without suspending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRequirements {
    read: Size,
    write: Size,
}

impl BufferRequirements {
    pub const NONE: BufferRequirements = BufferRequirements::create(Size::ZERO);

    /// Same requirement for both read and write.
    pub const fn create(size: Size) -> BufferRequirements {
        BufferRequirements { read: size, write: size }
    }

    pub const fn create_fixed_size(bytes: i32) -> BufferRequirements {
        BufferRequirements::create(Size::create(bytes))
    }

    pub const fn new(read: Size, write: Size) -> BufferRequirements {
        BufferRequirements { read, write }
    }

    /// Requirement for a value whose length is only known when measured.
    pub const fn value() -> BufferRequirements {
        BufferRequirements::create(Size::UNKNOWN)
    }

    pub const fn read(&self) -> Size {
        self.read
    }

    pub const fn write(&self) -> Size {
        self.write
    }
}

/// Input to [`PgConverter::get_size`][crate::PgConverter::get_size].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeContext {
    pub format: DataFormat,
    /// The write requirement the converter advertised for `format`.
    pub buffer_requirement: Size,
}

impl SizeContext {
    pub const fn new(format: DataFormat, buffer_requirement: Size) -> SizeContext {
        SizeContext { format, buffer_requirement }
    }

    pub const fn binary(buffer_requirement: Size) -> SizeContext {
        SizeContext::new(DataFormat::Binary, buffer_requirement)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn unknown_value_is_contract_error() {
        assert!(Size::UNKNOWN.value().unwrap_err().is_contract());
        assert_eq!(Size::UNKNOWN.get(), None);
        assert_eq!(Size::ZERO.value().unwrap(), 0);
    }

    #[test]
    fn combine() {
        let exact = Size::create(4);
        let bound = Size::create_upper_bound(10);

        assert_eq!(exact.combine(exact), Size::create(8));
        assert_eq!(exact.combine(bound), Size::create_upper_bound(14));
        assert_eq!(bound.combine(exact), Size::create_upper_bound(14));
        assert_eq!(bound.combine(bound), Size::create_upper_bound(20));
        assert!(exact.combine(Size::UNKNOWN).is_unknown());
        assert!(Size::UNKNOWN.combine(bound).is_unknown());
    }

    #[test]
    fn display() {
        assert_eq!(Size::create(4).to_string(), "4");
        assert_eq!(Size::create(4).to_upper_bound().to_string(), "<=4");
        assert_eq!(Size::UNKNOWN.to_string(), "unknown");
    }
}
