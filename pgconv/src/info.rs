//! Binding of a host type to a postgres type.
use std::{fmt, sync::Arc};

use crate::{
    Error, Result,
    converter::DynConverter,
    encoding::TextEncoding,
    postgres::{DataFormat, DataTypeName, Field, PgTypeId, TypeCatalog},
    resolver::{PgConverterResolver, Resolution, validate},
    size::BufferRequirements,
};

/// Settings shared by every type info of one [`SerializerOptions`][crate::SerializerOptions].
#[derive(Debug, Clone)]
pub struct TypeInfoOptions {
    catalog: Arc<TypeCatalog>,
    text_encoding: TextEncoding,
    portable_type_ids: bool,
    validate_resolutions: bool,
}

impl TypeInfoOptions {
    pub fn new(catalog: Arc<TypeCatalog>) -> TypeInfoOptions {
        TypeInfoOptions {
            catalog,
            text_encoding: TextEncoding::default(),
            portable_type_ids: false,
            validate_resolutions: true,
        }
    }

    /// Set text encoding, default to [`TextEncoding::Utf8`].
    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.text_encoding = encoding;
        self
    }

    /// Use [`DataTypeName`] instead of oid as canonical type id, default to `false`.
    pub fn portable_type_ids(mut self, portable: bool) -> Self {
        self.portable_type_ids = portable;
        self
    }

    /// Check every resolution returned by a resolver, default to `true`.
    pub fn validate_resolutions(mut self, validate: bool) -> Self {
        self.validate_resolutions = validate;
        self
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    pub fn encoding(&self) -> TextEncoding {
        self.text_encoding
    }

    pub fn is_portable(&self) -> bool {
        self.portable_type_ids
    }

    pub fn is_validating(&self) -> bool {
        self.validate_resolutions
    }

    /// Convert `id` into the canonical form.
    pub fn canonical(&self, id: &PgTypeId) -> Result<PgTypeId> {
        self.catalog.canonical(id, self.portable_type_ids)
    }

    /// Returns the canonical type id of a data type name.
    pub fn type_id(&self, name: &str) -> Result<PgTypeId> {
        self.canonical(&PgTypeId::DataTypeName(DataTypeName::new(name)))
    }

    /// Returns the range type of `subtype`.
    pub fn range_type_id(&self, subtype: &PgTypeId) -> Result<PgTypeId> {
        self.catalog
            .range_of(subtype)
            .map(|e|e.type_id(self.portable_type_ids))
            .ok_or_else(||Error::unsupported(format!("no range type known for {subtype}")))
    }

    /// Returns the subtype of `range`.
    pub fn range_subtype_id(&self, range: &PgTypeId) -> Result<PgTypeId> {
        self.catalog
            .range_subtype(range)
            .map(|e|e.type_id(self.portable_type_ids))
            .ok_or_else(||Error::unsupported(format!("{range} is not a known range type")))
    }

    /// Returns the array type of `element`.
    pub fn array_type_id(&self, element: &PgTypeId) -> Result<PgTypeId> {
        self.catalog
            .array_of(element)
            .map(|e|e.type_id(self.portable_type_ids))
            .ok_or_else(||Error::unsupported(format!("no array type known for {element}")))
    }

    /// Returns the element type of `array`.
    pub fn element_type_id(&self, array: &PgTypeId) -> Result<PgTypeId> {
        self.catalog
            .array_element(array)
            .map(|e|e.type_id(self.portable_type_ids))
            .ok_or_else(||Error::unsupported(format!("{array} is not a known array type")))
    }
}

impl Default for TypeInfoOptions {
    fn default() -> Self {
        TypeInfoOptions::new(Arc::new(TypeCatalog::builtin()))
    }
}

enum Source<T> {
    Converter(DynConverter<T>),
    Resolver(Arc<dyn PgConverterResolver<T>>),
}

/// How host type `T` is converted, either by a fixed converter or by a resolver.
///
/// Cloning shares the converter or resolver, including resolver caches.
pub struct PgTypeInfo<T> {
    options: Arc<TypeInfoOptions>,
    pg_type_id: Option<PgTypeId>,
    source: Source<T>,
}

impl<T: 'static> PgTypeInfo<T> {
    /// Create type info with a fixed converter.
    pub fn new(options: Arc<TypeInfoOptions>, converter: DynConverter<T>, pg_type_id: PgTypeId) -> Result<Self> {
        let pg_type_id = options.canonical(&pg_type_id)?;
        Ok(PgTypeInfo { options, pg_type_id: Some(pg_type_id), source: Source::Converter(converter) })
    }

    /// Create type info with a resolver.
    ///
    /// `pg_type_id` is the type the resolver always resolves to, if any.
    pub fn with_resolver(
        options: Arc<TypeInfoOptions>,
        resolver: Arc<dyn PgConverterResolver<T>>,
        pg_type_id: Option<PgTypeId>,
    ) -> Result<Self> {
        let pg_type_id = pg_type_id.map(|id|options.canonical(&id)).transpose()?;
        Ok(PgTypeInfo { options, pg_type_id, source: Source::Resolver(resolver) })
    }

    pub fn options(&self) -> &Arc<TypeInfoOptions> {
        &self.options
    }

    /// Returns the fixed type id, [`None`] for undecided resolver info.
    pub fn pg_type_id(&self) -> Option<&PgTypeId> {
        self.pg_type_id.as_ref()
    }

    pub fn is_resolver(&self) -> bool {
        matches!(self.source, Source::Resolver(_))
    }

    /// Returns the fixed converter, [`None`] for resolver info.
    pub fn converter(&self) -> Option<&DynConverter<T>> {
        match &self.source {
            Source::Converter(c) => Some(c),
            Source::Resolver(_) => None,
        }
    }

    /// Returns buffer requirements of the default converter for `format`.
    pub fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match &self.source {
            Source::Converter(c) => c.can_convert(format),
            Source::Resolver(_) => self
                .get_default_resolution(None)
                .ok()
                .and_then(|r|r.converter.can_convert(format)),
        }
    }

    fn fixed(&self, converter: &DynConverter<T>, expected: Option<&PgTypeId>) -> Result<Resolution<T>> {
        let Some(pg_type_id) = self.pg_type_id.clone() else {
            return Err(Error::contract("converter type info without type id"));
        };
        if let Some(expected) = expected {
            if *expected != pg_type_id {
                return Err(Error::unsupported(format!(
                    "{} converts {pg_type_id}, not {expected}", converter.type_name()
                )));
            }
        }
        Ok(Resolution::new(converter.clone(), pg_type_id))
    }

    /// Resolve without a value.
    pub fn get_default_resolution(&self, expected: Option<&PgTypeId>) -> Result<Resolution<T>> {
        match &self.source {
            Source::Converter(c) => self.fixed(c, expected),
            Source::Resolver(r) => {
                let expected = expected.or(self.pg_type_id.as_ref());
                let resolution = r.get_default(expected)?;
                if self.options.validate_resolutions {
                    validate("get_default", &resolution, expected, self.options.portable_type_ids)?;
                }
                Ok(resolution)
            }
        }
    }

    /// Resolve from a value, [`None`] if the value does not decide.
    pub fn get_resolution(&self, value: &T, expected: Option<&PgTypeId>) -> Result<Option<Resolution<T>>> {
        match &self.source {
            Source::Converter(c) => self.fixed(c, expected).map(Some),
            Source::Resolver(r) => {
                let expected = expected.or(self.pg_type_id.as_ref());
                let resolution = r.get(value, expected)?;
                if let (Some(resolution), true) = (&resolution, self.options.validate_resolutions) {
                    validate("get", resolution, expected, self.options.portable_type_ids)?;
                }
                Ok(resolution)
            }
        }
    }

    /// Resolve from a value, falling back to the default resolution.
    pub fn resolve(&self, value: &T, expected: Option<&PgTypeId>) -> Result<Resolution<T>> {
        match self.get_resolution(value, expected)? {
            Some(resolution) => Ok(resolution),
            None => self.get_default_resolution(expected),
        }
    }

    /// Resolve for reading `field`.
    pub fn get_field_resolution(&self, field: &Field) -> Result<Resolution<T>> {
        match &self.source {
            Source::Converter(c) => self.fixed(c, Some(field.type_id())),
            Source::Resolver(r) => {
                let resolution = r.get_field(field)?;
                if self.options.validate_resolutions {
                    validate("get_field", &resolution, Some(field.type_id()), self.options.portable_type_ids)?;
                }
                Ok(resolution)
            }
        }
    }
}

impl<T> Clone for PgTypeInfo<T> {
    fn clone(&self) -> Self {
        PgTypeInfo {
            options: self.options.clone(),
            pg_type_id: self.pg_type_id.clone(),
            source: match &self.source {
                Source::Converter(c) => Source::Converter(c.clone()),
                Source::Resolver(r) => Source::Resolver(r.clone()),
            },
        }
    }
}

impl<T> fmt::Debug for PgTypeInfo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgTypeInfo")
            .field("host_type", &std::any::type_name::<T>())
            .field("pg_type_id", &self.pg_type_id)
            .field("resolver", &matches!(self.source, Source::Resolver(_)))
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{converters::TextConverter, postgres::oids};

    #[test]
    fn fixed_info_canonicalizes() {
        let options = Arc::new(TypeInfoOptions::default().portable_type_ids(true));
        let info = PgTypeInfo::<String>::new(options, Arc::new(TextConverter::default()), oids::TEXT.into()).unwrap();
        assert_eq!(info.pg_type_id(), Some(&PgTypeId::DataTypeName(DataTypeName::new("text"))));

        let res = info.resolve(&String::new(), None).unwrap();
        assert_eq!(res.pg_type_id, PgTypeId::DataTypeName(DataTypeName::new("text")));

        let err = info.get_default_resolution(Some(&DataTypeName::new("varchar").into())).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn catalog_relations() {
        let options = TypeInfoOptions::default();
        let int4 = PgTypeId::Oid(oids::INT4);
        assert_eq!(options.range_type_id(&int4).unwrap(), PgTypeId::Oid(oids::INT4RANGE));
        assert_eq!(options.array_type_id(&int4).unwrap(), PgTypeId::Oid(oids::INT4_ARRAY));
        assert_eq!(options.element_type_id(&oids::INT4_ARRAY.into()).unwrap(), int4);
        assert!(options.range_subtype_id(&int4).unwrap_err().is_unsupported());
        assert_eq!(options.type_id("int8range").unwrap(), PgTypeId::Oid(oids::INT8RANGE));
    }
}
