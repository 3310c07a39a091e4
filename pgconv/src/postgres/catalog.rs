use std::collections::HashMap;

use super::{DataTypeName, Oid, PgTypeId, pg_type::BUILTINS};
use crate::{Error, Result};

/// What a catalog type is made of.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Base,
    /// Range over the subtype oid.
    Range(Oid),
    /// One dimensional array of the element oid.
    Array(Oid),
}

/// A type known by a [`TypeCatalog`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PgTypeEntry {
    oid: Oid,
    name: DataTypeName,
    kind: TypeKind,
}

impl PgTypeEntry {
    pub fn new(oid: Oid, name: impl Into<DataTypeName>, kind: TypeKind) -> PgTypeEntry {
        PgTypeEntry { oid, name: name.into(), kind }
    }

    pub fn base(oid: Oid, name: impl Into<DataTypeName>) -> PgTypeEntry {
        PgTypeEntry::new(oid, name, TypeKind::Base)
    }

    pub const fn oid(&self) -> Oid {
        self.oid
    }

    pub const fn name(&self) -> &DataTypeName {
        &self.name
    }

    pub const fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Returns the id of this type in the requested form.
    pub fn type_id(&self, portable: bool) -> PgTypeId {
        match portable {
            true => PgTypeId::DataTypeName(self.name.clone()),
            false => PgTypeId::Oid(self.oid),
        }
    }
}

/// Postgres types known to the serializer.
///
/// Maps between the oid and name forms of a [`PgTypeId`], between ranges and their
/// subtype, and between arrays and their element.
#[derive(Debug, Clone)]
pub struct TypeCatalog {
    by_oid: HashMap<Oid, PgTypeEntry>,
    by_name: HashMap<DataTypeName, Oid>,
    ranges: HashMap<Oid, Oid>,
    arrays: HashMap<Oid, Oid>,
}

impl TypeCatalog {
    /// Create catalog without any type.
    pub fn empty() -> TypeCatalog {
        TypeCatalog {
            by_oid: HashMap::new(),
            by_name: HashMap::new(),
            ranges: HashMap::new(),
            arrays: HashMap::new(),
        }
    }

    /// Create catalog with postgres built-in types.
    pub fn builtin() -> TypeCatalog {
        let mut me = TypeCatalog::empty();
        for &(oid, name, kind) in BUILTINS {
            me.register(PgTypeEntry::new(oid, DataTypeName::from_static(name), kind));
        }
        me
    }

    /// Register a type, replacing existing type with the same oid.
    ///
    /// Extension types like `hstore` have database specific oid and must be
    /// registered before they can be used with numeric type ids.
    pub fn register(&mut self, entry: PgTypeEntry) -> &mut Self {
        match entry.kind {
            TypeKind::Range(sub) => { self.ranges.insert(sub, entry.oid); },
            TypeKind::Array(elem) => { self.arrays.insert(elem, entry.oid); },
            TypeKind::Base => { }
        }
        self.by_name.insert(entry.name.clone(), entry.oid);
        self.by_oid.insert(entry.oid, entry);
        self
    }

    pub fn get(&self, id: &PgTypeId) -> Option<&PgTypeEntry> {
        match id {
            PgTypeId::Oid(oid) => self.by_oid.get(oid),
            PgTypeId::DataTypeName(name) => self.by_oid.get(self.by_name.get(name)?),
        }
    }

    pub fn get_by_oid(&self, oid: Oid) -> Option<&PgTypeEntry> {
        self.by_oid.get(&oid)
    }

    pub fn get_oid(&self, id: &PgTypeId) -> Option<Oid> {
        self.get(id).map(PgTypeEntry::oid)
    }

    pub fn get_name(&self, id: &PgTypeId) -> Option<&DataTypeName> {
        self.get(id).map(PgTypeEntry::name)
    }

    /// Returns the range type whose subtype is `subtype`.
    pub fn range_of(&self, subtype: &PgTypeId) -> Option<&PgTypeEntry> {
        let sub = self.get_oid(subtype)?;
        self.by_oid.get(self.ranges.get(&sub)?)
    }

    /// Returns the subtype of a range type.
    pub fn range_subtype(&self, range: &PgTypeId) -> Option<&PgTypeEntry> {
        match self.get(range)?.kind {
            TypeKind::Range(sub) => self.by_oid.get(&sub),
            _ => None,
        }
    }

    /// Returns the array type whose element is `element`.
    pub fn array_of(&self, element: &PgTypeId) -> Option<&PgTypeEntry> {
        let elem = self.get_oid(element)?;
        self.by_oid.get(self.arrays.get(&elem)?)
    }

    /// Returns the element of an array type.
    pub fn array_element(&self, array: &PgTypeId) -> Option<&PgTypeEntry> {
        match self.get(array)?.kind {
            TypeKind::Array(elem) => self.by_oid.get(&elem),
            _ => None,
        }
    }

    /// Convert `id` into the canonical form.
    ///
    /// Unknown names are kept as is in portable form, an oid is required otherwise.
    pub fn canonical(&self, id: &PgTypeId, portable: bool) -> Result<PgTypeId> {
        if let Some(entry) = self.get(id) {
            return Ok(entry.type_id(portable));
        }
        match (id, portable) {
            (PgTypeId::DataTypeName(_), true) => Ok(id.clone()),
            (PgTypeId::Oid(_), false) => Ok(id.clone()),
            _ => Err(Error::unsupported(format!("data type {id} is not registered in the type catalog"))),
        }
    }
}

impl Default for TypeCatalog {
    fn default() -> Self {
        TypeCatalog::builtin()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::oids;

    #[test]
    fn builtin_relations() {
        let catalog = TypeCatalog::builtin();
        let int4 = PgTypeId::Oid(oids::INT4);

        assert_eq!(catalog.get_name(&int4).unwrap().as_str(), "pg_catalog.int4");
        assert_eq!(catalog.range_of(&int4).unwrap().oid(), oids::INT4RANGE);
        assert_eq!(catalog.array_of(&int4).unwrap().oid(), oids::INT4_ARRAY);

        let range = PgTypeId::DataTypeName(DataTypeName::new("int8range"));
        assert_eq!(catalog.range_subtype(&range).unwrap().oid(), oids::INT8);
        assert!(catalog.range_subtype(&int4).is_none());

        let array = PgTypeId::Oid(oids::TEXT_ARRAY);
        assert_eq!(catalog.array_element(&array).unwrap().oid(), oids::TEXT);
    }

    #[test]
    fn canonical_form() {
        let mut catalog = TypeCatalog::builtin();
        let hstore = PgTypeId::DataTypeName(DataTypeName::new("public.hstore"));

        assert_eq!(catalog.canonical(&PgTypeId::Oid(oids::TEXT), true).unwrap(),
            PgTypeId::DataTypeName(DataTypeName::new("text")));
        assert_eq!(catalog.canonical(&hstore, true).unwrap(), hstore);
        assert!(catalog.canonical(&hstore, false).unwrap_err().is_unsupported());

        catalog.register(PgTypeEntry::base(16_385, "public.hstore"));
        assert_eq!(catalog.canonical(&hstore, false).unwrap(), PgTypeId::Oid(16_385));
    }
}
