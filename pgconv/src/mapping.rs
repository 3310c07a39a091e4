//! Host type to postgres type mappings.
//!
//! Plugins describe which host type converts which postgres type as a
//! [`TypeInfoMappingCollection`], type infos are only built when first requested
//! through [`SerializerOptions::type_info`].
use std::{any::Any, fmt, sync::Arc};

use crate::{
    Result, SerializerOptions,
    converter::{DynConverter, HostType},
    converters::{ArrayCompose, NullableCompose, PgRange, RangeCompose},
    info::PgTypeInfo,
    object::{AnyValue, BoxingConverter},
    postgres::{DataTypeName, Field, PgTypeId},
    resolver::{Compose, ComposingResolver, PgConverterResolver, Resolution},
};

/// A [`PgTypeInfo`] with its host type erased.
pub trait AnyTypeInfo: Send + Sync + 'static {
    fn host_type(&self) -> HostType;

    /// Returns the fixed type id, [`None`] for undecided resolver info.
    fn pg_type_id(&self) -> Option<&PgTypeId>;

    fn as_any(&self) -> &dyn Any;

    /// Resolve the default converter, boxed over [`AnyValue`].
    fn object_resolution(&self, expected: Option<&PgTypeId>) -> Result<Resolution<AnyValue>>;

    /// Resolve the converter for reading `field`, boxed over [`AnyValue`].
    fn object_field_resolution(&self, field: &Field) -> Result<Resolution<AnyValue>>;
}

fn boxed<T: Send + Sync + 'static>(resolution: Resolution<T>) -> Resolution<AnyValue> {
    Resolution::new(Arc::new(BoxingConverter::of(resolution.converter)), resolution.pg_type_id)
}

impl<T: Send + Sync + 'static> AnyTypeInfo for PgTypeInfo<T> {
    fn host_type(&self) -> HostType {
        HostType::of::<T>()
    }

    fn pg_type_id(&self) -> Option<&PgTypeId> {
        PgTypeInfo::pg_type_id(self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn object_resolution(&self, expected: Option<&PgTypeId>) -> Result<Resolution<AnyValue>> {
        self.get_default_resolution(expected).map(boxed)
    }

    fn object_field_resolution(&self, field: &Field) -> Result<Resolution<AnyValue>> {
        self.get_field_resolution(field).map(boxed)
    }
}

impl dyn AnyTypeInfo {
    /// Returns the typed info if the host type is `T`.
    pub fn downcast<T: 'static>(&self) -> Option<&PgTypeInfo<T>> {
        self.as_any().downcast_ref()
    }
}

impl fmt::Debug for dyn AnyTypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AnyTypeInfo")
            .field("host_type", &self.host_type())
            .field("pg_type_id", &self.pg_type_id())
            .finish()
    }
}

/// Input of a [`TypeInfoMapping`] factory.
pub struct MappingContext<'a> {
    /// Options the info is built for, other infos can be requested from it.
    pub options: &'a SerializerOptions,
    /// Data type name of the mapping.
    pub data_type_name: &'a DataTypeName,
    /// Whether the data type name was requested, or the mapping matched by host type only.
    pub explicit: bool,
}

impl MappingContext<'_> {
    /// Returns the data type name if it was requested.
    pub fn requested(&self) -> Option<&DataTypeName> {
        self.explicit.then_some(self.data_type_name)
    }

    /// Returns the data type name as a type id.
    pub fn type_id(&self) -> PgTypeId {
        PgTypeId::DataTypeName(self.data_type_name.clone())
    }
}

/// Factory of the type info of a mapping.
pub type TypeInfoFactory = Arc<dyn Fn(&MappingContext) -> Result<Arc<dyn AnyTypeInfo>> + Send + Sync>;

/// Binding of a host type and a data type name to a type info factory.
#[derive(Clone)]
pub struct TypeInfoMapping {
    data_type_name: DataTypeName,
    host_type: HostType,
    is_default: bool,
    factory: TypeInfoFactory,
}

impl TypeInfoMapping {
    pub fn new<T, F>(data_type_name: DataTypeName, is_default: bool, factory: F) -> TypeInfoMapping
    where
        T: Send + Sync + 'static,
        F: Fn(&MappingContext) -> Result<PgTypeInfo<T>> + Send + Sync + 'static,
    {
        TypeInfoMapping {
            data_type_name,
            host_type: HostType::of::<T>(),
            is_default,
            factory: Arc::new(move |ctx|Ok(Arc::new(factory(ctx)?))),
        }
    }

    pub fn data_type_name(&self) -> &DataTypeName {
        &self.data_type_name
    }

    pub fn host_type(&self) -> HostType {
        self.host_type
    }

    /// Whether this mapping is picked when only the data type name is requested.
    pub fn is_default(&self) -> bool {
        self.is_default
    }

    /// Build the type info.
    pub fn create(&self, options: &SerializerOptions, explicit: bool) -> Result<Arc<dyn AnyTypeInfo>> {
        (self.factory)(&MappingContext { options, data_type_name: &self.data_type_name, explicit })
    }
}

impl fmt::Debug for TypeInfoMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeInfoMapping")
            .field("data_type_name", &self.data_type_name)
            .field("host_type", &self.host_type)
            .field("is_default", &self.is_default)
            .finish()
    }
}

/// Source of type infos, searched in order by [`SerializerOptions`].
pub trait PgTypeInfoResolver: Send + Sync + 'static {
    /// Returns the type info of `host` and/or `data_type_name`, [`None`] if unknown.
    fn get_type_info(
        &self,
        host: Option<HostType>,
        data_type_name: Option<&DataTypeName>,
        options: &SerializerOptions,
    ) -> Result<Option<Arc<dyn AnyTypeInfo>>>;
}

/// Ordered list of [`TypeInfoMapping`].
#[derive(Clone, Default, Debug)]
pub struct TypeInfoMappingCollection {
    mappings: Vec<TypeInfoMapping>,
}

impl TypeInfoMappingCollection {
    pub fn new() -> TypeInfoMappingCollection {
        TypeInfoMappingCollection::default()
    }

    pub fn mappings(&self) -> &[TypeInfoMapping] {
        &self.mappings
    }

    pub fn add(&mut self, mapping: TypeInfoMapping) -> &mut Self {
        self.mappings.push(mapping);
        self
    }

    /// Append every mapping of `other`.
    pub fn extend(&mut self, other: TypeInfoMappingCollection) -> &mut Self {
        self.mappings.extend(other.mappings);
        self
    }

    /// Find the first mapping matching the given host type and/or data type name.
    ///
    /// By data type name alone, only the default mapping of that name matches.
    pub fn find(&self, host: Option<HostType>, data_type_name: Option<&DataTypeName>) -> Option<&TypeInfoMapping> {
        self.mappings.iter().find(|m|match (host, data_type_name) {
            (Some(host), Some(name)) => m.host_type == host && m.data_type_name == *name,
            (Some(host), None) => m.host_type == host,
            (None, Some(name)) => m.is_default && m.data_type_name == *name,
            (None, None) => false,
        })
    }

    /// Map `T` to `data_type_name` with a fixed converter, also maps [`Option<T>`].
    pub fn add_type<T, F>(&mut self, data_type_name: &str, is_default: bool, converter: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&SerializerOptions) -> Result<DynConverter<T>> + Send + Sync + 'static,
    {
        let name = DataTypeName::new(data_type_name);
        self.add(TypeInfoMapping::new::<T, _>(name.clone(), is_default, move |ctx|{
            let options = ctx.options.type_info_options().clone();
            PgTypeInfo::new(options, converter(ctx.options)?, ctx.type_id())
        }));
        self.add_nullable::<T>(name, is_default)
    }

    /// Map `T` to `data_type_name` with a value resolver, also maps [`Option<T>`].
    ///
    /// The info is bound to `data_type_name` only when that name is requested,
    /// otherwise the resolver decides the type from the value.
    pub fn add_resolver_type<T, F>(&mut self, data_type_name: &str, is_default: bool, resolver: F) -> &mut Self
    where
        T: Send + Sync + 'static,
        F: Fn(&SerializerOptions) -> Result<Arc<dyn PgConverterResolver<T>>> + Send + Sync + 'static,
    {
        let name = DataTypeName::new(data_type_name);
        self.add(TypeInfoMapping::new::<T, _>(name.clone(), is_default, move |ctx|{
            let options = ctx.options.type_info_options().clone();
            let pg_type_id = ctx.requested().map(|n|PgTypeId::DataTypeName(n.clone()));
            PgTypeInfo::with_resolver(options, resolver(ctx.options)?, pg_type_id)
        }));
        self.add_nullable::<T>(name, is_default)
    }

    /// Map [`PgRange<T>`] to `range_name` over the mapping of `T` to `subtype_name`.
    pub fn add_range_type<T>(&mut self, range_name: &str, subtype_name: &str, is_default: bool) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        let name = DataTypeName::new(range_name);
        let subtype = DataTypeName::new(subtype_name);
        self.add_composed(name.clone(), Some(subtype), is_default, RangeCompose::<T>::new);
        self.add_nullable::<PgRange<T>>(name, is_default)
    }

    /// Map [`Vec<T>`] and [`Vec<Option<T>>`] to `array_name` over the mapping of `T`
    /// to `element_name`.
    pub fn add_array_type<T>(&mut self, array_name: &str, element_name: &str, is_default: bool) -> &mut Self
    where
        T: Send + Sync + 'static,
    {
        let name = DataTypeName::new(array_name);
        let element = DataTypeName::new(element_name);
        self.add_composed(name.clone(), Some(element.clone()), is_default, ArrayCompose::<T>::new);
        self.add_composed(name.clone(), Some(element), false, ArrayCompose::<Option<T>>::new);
        self.add_nullable::<Vec<T>>(name, is_default)
    }

    fn add_nullable<T: Send + Sync + 'static>(&mut self, data_type_name: DataTypeName, is_default: bool) -> &mut Self {
        self.add_composed(data_type_name, None, is_default, NullableCompose::<T>::new)
    }

    /// Map the output of `compose` over the info of its effective type.
    ///
    /// Without `effective_name` the effective info is the one of the same data type
    /// name, and the composite shares its type id.
    fn add_composed<C: Compose>(
        &mut self,
        data_type_name: DataTypeName,
        effective_name: Option<DataTypeName>,
        is_default: bool,
        compose: fn() -> C,
    ) -> &mut Self {
        self.add(TypeInfoMapping::new::<C::Output, _>(data_type_name, is_default, move |ctx|{
            let options = ctx.options.type_info_options().clone();
            let (effective, pg_type_id) = match &effective_name {
                Some(name) => {
                    let effective = ctx.options.get_type_info::<C::Effective>(Some(name))?;
                    (effective, Some(options.canonical(&ctx.type_id())?))
                }
                None => {
                    let effective = ctx.options.get_type_info::<C::Effective>(ctx.requested())?;
                    let pg_type_id = effective.pg_type_id().cloned();
                    (effective, pg_type_id)
                }
            };
            let resolver = ComposingResolver::new(compose(), pg_type_id.clone(), effective)?;
            PgTypeInfo::with_resolver(options, Arc::new(resolver), pg_type_id)
        }))
    }
}

impl PgTypeInfoResolver for TypeInfoMappingCollection {
    fn get_type_info(
        &self,
        host: Option<HostType>,
        data_type_name: Option<&DataTypeName>,
        options: &SerializerOptions,
    ) -> Result<Option<Arc<dyn AnyTypeInfo>>> {
        match self.find(host, data_type_name) {
            Some(mapping) => mapping.create(options, data_type_name.is_some()).map(Some),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::converters::{Int4Converter, Int8Converter, TextConverter};

    fn collection() -> TypeInfoMappingCollection {
        let mut mappings = TypeInfoMappingCollection::new();
        mappings
            .add_type::<i32, _>("int4", true, |_|Ok(Arc::new(Int4Converter)))
            .add_type::<i64, _>("int8", true, |_|Ok(Arc::new(Int8Converter)))
            .add_type::<String, _>("text", true, |o|Ok(Arc::new(TextConverter::new(o.type_info_options().encoding()))))
            .add_type::<String, _>("varchar", false, |o|Ok(Arc::new(TextConverter::new(o.type_info_options().encoding()))))
            .add_range_type::<i32>("int4range", "int4", true)
            .add_array_type::<i32>("_int4", "int4", true);
        mappings
    }

    #[test]
    fn find_by_host_and_name() {
        let mappings = collection();
        let varchar = DataTypeName::new("varchar");

        let m = mappings.find(Some(HostType::of::<String>()), None).unwrap();
        assert_eq!(m.data_type_name().as_str(), "pg_catalog.text");

        let m = mappings.find(Some(HostType::of::<String>()), Some(&varchar)).unwrap();
        assert_eq!(m.data_type_name(), &varchar);
        assert!(mappings.find(None, Some(&varchar)).is_none());

        let m = mappings.find(None, Some(&DataTypeName::new("_int4"))).unwrap();
        assert!(m.host_type().is::<Vec<i32>>());
        assert!(mappings.find(Some(HostType::of::<Option<Vec<i32>>>()), None).is_some());
        assert!(mappings.find(Some(HostType::of::<Vec<Option<i32>>>()), None).is_some());
    }

    #[test]
    fn derived_infos() {
        let options = SerializerOptions::builder().resolvers([collection()]).build();

        let range = options.type_info::<PgRange<i32>>(None).unwrap();
        assert_eq!(range.pg_type_id(), Some(&PgTypeId::Oid(crate::postgres::oids::INT4RANGE)));

        let nullable = options.type_info::<Option<i64>>(Some("int8")).unwrap();
        let res = nullable.resolve(&None, None).unwrap();
        assert_eq!(res.pg_type_id, PgTypeId::Oid(crate::postgres::oids::INT8));

        let by_name = options.object_type_info(None, Some("int4range")).unwrap();
        assert!(by_name.host_type().is::<PgRange<i32>>());
        assert!(by_name.downcast::<PgRange<i32>>().is_some());
    }
}
