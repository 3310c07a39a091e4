//! Postgres type identity.
//!
//! - [`Oid`]
//! - [`DataTypeName`]
//! - [`PgTypeId`]
//! - [`DataFormat`]
//! - [`Field`]
//! - [`TypeCatalog`]
use std::fmt;

use crate::common::ByteStr;

mod pg_type;
mod catalog;

pub use pg_type::{Oid, oids};
pub use catalog::{PgTypeEntry, TypeCatalog, TypeKind};

/// Fully qualified postgres data type name, e.g. `pg_catalog.int4`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DataTypeName(ByteStr);

impl DataTypeName {
    /// Create new name, unqualified name is qualified with `pg_catalog`.
    pub fn new(name: &str) -> DataTypeName {
        match name.contains('.') {
            true => DataTypeName(ByteStr::copy_from_str(name)),
            false => DataTypeName(ByteStr::from(format!("pg_catalog.{name}"))),
        }
    }

    /// Create name from already qualified static string.
    pub const fn from_static(qualified: &'static str) -> DataTypeName {
        DataTypeName(ByteStr::from_static(qualified))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the schema part.
    pub fn schema(&self) -> &str {
        self.0.split_once('.').map(|(s,_)|s).unwrap_or_default()
    }

    /// Returns the name without schema.
    pub fn unqualified_name(&self) -> &str {
        self.0.split_once('.').map(|(_,n)|n).unwrap_or(&self.0)
    }
}

impl From<&str> for DataTypeName {
    fn from(value: &str) -> Self {
        DataTypeName::new(value)
    }
}

impl fmt::Display for DataTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DataTypeName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

/// Wire type identity, either a stable [`Oid`] or a portable [`DataTypeName`].
///
/// Within one [`SerializerOptions`][crate::SerializerOptions] only one form is canonical.
#[derive(Clone, PartialEq, Eq, Hash)]
pub enum PgTypeId {
    Oid(Oid),
    DataTypeName(DataTypeName),
}

impl PgTypeId {
    pub const fn is_oid(&self) -> bool {
        matches!(self, Self::Oid(_))
    }

    pub const fn is_data_type_name(&self) -> bool {
        matches!(self, Self::DataTypeName(_))
    }

    pub const fn oid(&self) -> Option<Oid> {
        match self {
            Self::Oid(oid) => Some(*oid),
            Self::DataTypeName(_) => None,
        }
    }

    pub const fn data_type_name(&self) -> Option<&DataTypeName> {
        match self {
            Self::Oid(_) => None,
            Self::DataTypeName(name) => Some(name),
        }
    }
}

impl From<Oid> for PgTypeId {
    fn from(value: Oid) -> Self {
        Self::Oid(value)
    }
}

impl From<DataTypeName> for PgTypeId {
    fn from(value: DataTypeName) -> Self {
        Self::DataTypeName(value)
    }
}

impl fmt::Display for PgTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oid(oid) => write!(f, "oid {oid}"),
            Self::DataTypeName(name) => write!(f, "{name}"),
        }
    }
}

impl fmt::Debug for PgTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Oid(oid) => write!(f, "PgTypeId({oid})"),
            Self::DataTypeName(name) => write!(f, "PgTypeId({name})"),
        }
    }
}

/// Postgres value format code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataFormat {
    Text,
    #[default]
    Binary,
}

impl DataFormat {
    /// Returns format from protocol format code.
    pub const fn from_code(code: i16) -> Option<DataFormat> {
        match code {
            0 => Some(Self::Text),
            1 => Some(Self::Binary),
            _ => None,
        }
    }

    pub const fn code(&self) -> i16 {
        match self {
            Self::Text => 0,
            Self::Binary => 1,
        }
    }
}

/// A named column descriptor from a table, composite or replication relation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    name: ByteStr,
    type_id: PgTypeId,
    type_modifier: i32,
}

impl Field {
    pub fn new(name: impl Into<ByteStr>, type_id: impl Into<PgTypeId>, type_modifier: i32) -> Field {
        Field { name: name.into(), type_id: type_id.into(), type_modifier }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same field described with another type id.
    pub fn with_type_id(&self, type_id: impl Into<PgTypeId>) -> Field {
        Field { name: self.name.clone(), type_id: type_id.into(), type_modifier: self.type_modifier }
    }

    pub const fn type_id(&self) -> &PgTypeId {
        &self.type_id
    }

    /// Type specific data, `-1` if the type needs none.
    pub const fn type_modifier(&self) -> i32 {
        self.type_modifier
    }
}
