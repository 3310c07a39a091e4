//! Converter resolution.
//!
//! - [`Resolution`]
//! - [`PgConverterResolver`]
//! - [`ComposingResolver`] and [`Compose`]
use dashmap::DashMap;
use std::fmt;

use crate::{
    Error, Result,
    common::verbose,
    converter::{DynConverter, HostType, converter_key},
    info::{PgTypeInfo, TypeInfoOptions},
    object::AnyValue,
    postgres::{Field, PgTypeId},
};

/// A converter bound to the canonical postgres type it converts.
pub struct Resolution<T> {
    pub converter: DynConverter<T>,
    pub pg_type_id: PgTypeId,
}

impl<T> Resolution<T> {
    pub fn new(converter: DynConverter<T>, pg_type_id: PgTypeId) -> Resolution<T> {
        Resolution { converter, pg_type_id }
    }
}

impl<T> Clone for Resolution<T> {
    fn clone(&self) -> Self {
        Resolution { converter: self.converter.clone(), pg_type_id: self.pg_type_id.clone() }
    }
}

impl<T: 'static> fmt::Debug for Resolution<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resolution")
            .field("converter", &self.converter.type_name())
            .field("pg_type_id", &self.pg_type_id)
            .finish()
    }
}

/// Pick a converter for host type `T` dynamically.
///
/// Implementations must not create a new converter per call, composing
/// resolvers cache their wrappers by the identity of the returned converter.
pub trait PgConverterResolver<T>: Send + Sync + 'static {
    /// Resolve without a value, only from the postgres type if known.
    fn get_default(&self, pg_type_id: Option<&PgTypeId>) -> Result<Resolution<T>>;

    /// Resolve from a value to be written.
    ///
    /// Returns [`None`] when the value does not decide the resolution, callers then
    /// fall back to [`get_default`][PgConverterResolver::get_default].
    fn get(&self, value: &T, expected: Option<&PgTypeId>) -> Result<Option<Resolution<T>>>;

    /// Resolve for reading a field whose type id is authoritative.
    fn get_field(&self, field: &Field) -> Result<Resolution<T>> {
        self.get_default(Some(field.type_id()))
    }
}

/// Check a resolution returned by a resolver.
///
/// - the converter host type is `T`, unless `T` is [`AnyValue`]
/// - the type id is in the canonical form
/// - the type id echoes `expected` if any
pub(crate) fn validate<T: 'static>(
    method: &str,
    resolution: &Resolution<T>,
    expected: Option<&PgTypeId>,
    portable: bool,
) -> Result<()> {
    let host = resolution.converter.host_type();
    let expected_host = HostType::of::<T>();
    if !expected_host.is::<AnyValue>() && host != expected_host {
        return Err(Error::contract(format!(
            "`{method}` returned a converter for {host} instead of {expected_host}"
        )));
    }

    if resolution.pg_type_id.is_oid() == portable {
        return Err(Error::contract(format!(
            "`{method}` returned {} which is not in canonical form", resolution.pg_type_id
        )));
    }

    if let Some(expected) = expected {
        if *expected != resolution.pg_type_id {
            return Err(Error::contract(format!(
                "`{method}` returned {} while {expected} was expected, \
                a resolver must fail instead of resolving to a different type",
                resolution.pg_type_id,
            )));
        }
    }

    Ok(())
}

/// The composite specific part of a [`ComposingResolver`].
pub trait Compose: Send + Sync + 'static {
    /// Host type of the wrapped converter.
    type Effective: Send + Sync + 'static;
    /// Host type of the composite converter.
    type Output: Send + Sync + 'static;

    /// Map a composite type id to its effective type id.
    fn effective_type_id(&self, options: &TypeInfoOptions, pg_type_id: &PgTypeId) -> Result<PgTypeId>;

    /// Map an effective type id to its composite type id.
    fn type_id(&self, options: &TypeInfoOptions, effective: &PgTypeId) -> Result<PgTypeId>;

    /// Create the composite converter around an effective resolution.
    ///
    /// Called at most once per effective converter.
    fn create_converter(
        &self,
        options: &TypeInfoOptions,
        effective: &Resolution<Self::Effective>,
    ) -> Result<DynConverter<Self::Output>>;

    /// Resolve the effective converter from a composite value.
    fn effective_resolution(
        &self,
        info: &PgTypeInfo<Self::Effective>,
        value: &Self::Output,
        expected: Option<&PgTypeId>,
    ) -> Result<Option<Resolution<Self::Effective>>>;
}

/// Resolver of a composite type over an effective type info.
///
/// Composite converters are cached by the identity of the effective converter they
/// wrap, resolving the same effective converter always returns the same composite
/// converter instance, also when resolving concurrently.
pub struct ComposingResolver<C: Compose> {
    compose: C,
    pg_type_id: Option<PgTypeId>,
    effective: PgTypeInfo<C::Effective>,
    converters: DashMap<usize, (DynConverter<C::Effective>, DynConverter<C::Output>)>,
}

impl<C: Compose> ComposingResolver<C> {
    /// Create new resolver.
    ///
    /// `pg_type_id` is required when the effective info has a fixed type id.
    pub fn new(compose: C, pg_type_id: Option<PgTypeId>, effective: PgTypeInfo<C::Effective>) -> Result<Self> {
        if pg_type_id.is_none() && effective.pg_type_id().is_some() {
            return Err(Error::contract(
                "composing resolver requires a type id when its effective type info has one"
            ));
        }
        Ok(ComposingResolver { compose, pg_type_id, effective, converters: DashMap::new() })
    }

    pub fn effective(&self) -> &PgTypeInfo<C::Effective> {
        &self.effective
    }

    pub fn compose(&self) -> &C {
        &self.compose
    }

    /// Returns the number of cached composite converters.
    pub fn cached(&self) -> usize {
        self.converters.len()
    }

    fn effective_type_id(&self, pg_type_id: &PgTypeId) -> Result<PgTypeId> {
        if self.pg_type_id.as_ref() == Some(pg_type_id) {
            if let Some(id) = self.effective.pg_type_id() {
                return Ok(id.clone());
            }
        }
        self.compose.effective_type_id(self.effective.options(), pg_type_id)
    }

    fn composite_type_id(&self, expected: Option<&PgTypeId>, effective: &PgTypeId) -> Result<PgTypeId> {
        match expected.or(self.pg_type_id.as_ref()) {
            Some(id) => Ok(id.clone()),
            None => self.compose.type_id(self.effective.options(), effective),
        }
    }

    fn get_or_add(&self, effective: &Resolution<C::Effective>) -> Result<DynConverter<C::Output>> {
        let key = converter_key(&effective.converter);
        let entry = self.converters.entry(key).or_try_insert_with(||{
            verbose!(converter = effective.converter.type_name(), "composing converter");
            let converter = self.compose.create_converter(self.effective.options(), effective)?;
            Ok::<_, Error>((effective.converter.clone(), converter))
        })?;
        Ok(entry.1.clone())
    }
}

impl<C: Compose> PgConverterResolver<C::Output> for ComposingResolver<C> {
    fn get_default(&self, pg_type_id: Option<&PgTypeId>) -> Result<Resolution<C::Output>> {
        let effective_id = pg_type_id.map(|id|self.effective_type_id(id)).transpose()?;
        let effective = self.effective.get_default_resolution(effective_id.as_ref())?;
        let converter = self.get_or_add(&effective)?;
        let pg_type_id = self.composite_type_id(pg_type_id, &effective.pg_type_id)?;
        Ok(Resolution::new(converter, pg_type_id))
    }

    fn get(&self, value: &C::Output, expected: Option<&PgTypeId>) -> Result<Option<Resolution<C::Output>>> {
        let effective_id = expected.map(|id|self.effective_type_id(id)).transpose()?;
        let Some(effective) = self.compose.effective_resolution(&self.effective, value, effective_id.as_ref())? else {
            return Ok(None);
        };
        let converter = self.get_or_add(&effective)?;
        let pg_type_id = self.composite_type_id(expected, &effective.pg_type_id)?;
        Ok(Some(Resolution::new(converter, pg_type_id)))
    }

    fn get_field(&self, field: &Field) -> Result<Resolution<C::Output>> {
        let effective_id = self.effective_type_id(field.type_id())?;
        let effective_field = field.with_type_id(effective_id);
        let effective = self.effective.get_field_resolution(&effective_field)?;
        let converter = self.get_or_add(&effective)?;
        Ok(Resolution::new(converter, field.type_id().clone()))
    }
}

impl<C: Compose> fmt::Debug for ComposingResolver<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComposingResolver")
            .field("pg_type_id", &self.pg_type_id)
            .field("effective", &self.effective)
            .field("cached", &self.converters.len())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        PgConverter,
        converters::{Int4Converter, Int8Converter, NullableCompose},
        postgres::oids,
    };
    use std::sync::{Arc, Barrier};

    /// Resolve `i64` to `int4` when it fits, `int8` otherwise.
    struct FittingResolver {
        int4: DynConverter<i64>,
        int8: DynConverter<i64>,
    }

    struct Narrowing;

    impl PgConverter<i64> for Narrowing {
        fn can_convert(&self, format: crate::postgres::DataFormat) -> Option<crate::size::BufferRequirements> {
            PgConverter::<i32>::can_convert(&Int4Converter, format)
        }

        fn get_size(&self, _: crate::size::SizeContext, _: &i64, _: &mut Option<crate::WriteState>) -> Result<crate::size::Size> {
            Ok(crate::size::Size::create(4))
        }

        fn read<'a>(&'a self, mode: crate::IoMode, reader: &'a mut crate::PgReader) -> futures_core::future::BoxFuture<'a, Result<i64>> {
            Box::pin(async move { Int4Converter.read(mode, reader).await.map(i64::from) })
        }

        fn write<'a>(&'a self, mode: crate::IoMode, writer: &'a mut crate::PgWriter, value: &'a i64) -> futures_core::future::BoxFuture<'a, Result<()>> {
            Box::pin(async move {
                let value = i32::try_from(*value).map_err(|_|Error::unsupported("out of range"))?;
                writer.ensure(mode, 4).await?;
                writer.write_i32(value);
                Ok(())
            })
        }
    }

    impl PgConverterResolver<i64> for FittingResolver {
        fn get_default(&self, pg_type_id: Option<&PgTypeId>) -> Result<Resolution<i64>> {
            match pg_type_id {
                None => Ok(Resolution::new(self.int8.clone(), PgTypeId::Oid(oids::INT8))),
                Some(PgTypeId::Oid(oids::INT8)) => Ok(Resolution::new(self.int8.clone(), PgTypeId::Oid(oids::INT8))),
                Some(PgTypeId::Oid(oids::INT4)) => Ok(Resolution::new(self.int4.clone(), PgTypeId::Oid(oids::INT4))),
                Some(id) => Err(Error::unsupported(format!("cannot resolve i64 for {id}"))),
            }
        }

        fn get(&self, value: &i64, expected: Option<&PgTypeId>) -> Result<Option<Resolution<i64>>> {
            if expected.is_some() {
                return self.get_default(expected).map(Some);
            }
            match i32::try_from(*value) {
                Ok(_) => Ok(Some(Resolution::new(self.int4.clone(), PgTypeId::Oid(oids::INT4)))),
                Err(_) => Ok(None),
            }
        }
    }

    fn fitting() -> PgTypeInfo<i64> {
        let resolver = FittingResolver { int4: Arc::new(Narrowing), int8: Arc::new(Int8Converter) };
        PgTypeInfo::with_resolver(Arc::default(), Arc::new(resolver), None).unwrap()
    }

    #[test]
    fn value_resolution_and_fallback() {
        let info = fitting();
        assert_eq!(info.resolve(&7, None).unwrap().pg_type_id, PgTypeId::Oid(oids::INT4));
        assert_eq!(info.resolve(&i64::MAX, None).unwrap().pg_type_id, PgTypeId::Oid(oids::INT8));
        assert!(info.get_resolution(&i64::MAX, None).unwrap().is_none());
    }

    #[test]
    fn composing_cache_identity() {
        let nullable = ComposingResolver::new(NullableCompose::new(), None, fitting()).unwrap();

        let a = nullable.get(&Some(1), None).unwrap().unwrap();
        let b = nullable.get(&Some(2), None).unwrap().unwrap();
        let c = nullable.get(&Some(i64::MAX), None).unwrap();
        let d = nullable.get_default(Some(&PgTypeId::Oid(oids::INT8))).unwrap();

        assert!(Arc::ptr_eq(&a.converter, &b.converter));
        assert!(c.is_none());
        assert!(!Arc::ptr_eq(&a.converter, &d.converter));
        assert_eq!(nullable.cached(), 2);
    }

    #[test]
    fn field_resolution_wraps_the_effective_field() {
        let nullable = ComposingResolver::new(NullableCompose::new(), None, fitting()).unwrap();
        let by_value = nullable.get(&Some(1), None).unwrap().unwrap();

        let field = Field::new(String::from("amount"), oids::INT4, -1);
        let res = nullable.get_field(&field).unwrap();
        assert!(Arc::ptr_eq(&res.converter, &by_value.converter));
        assert_eq!(res.pg_type_id, PgTypeId::Oid(oids::INT4));

        let field = Field::new(String::from("amount"), oids::TEXT, -1);
        assert!(nullable.get_field(&field).unwrap_err().is_unsupported());
    }

    #[test]
    fn concurrent_cache_identity() {
        let nullable = ComposingResolver::new(NullableCompose::new(), None, fitting()).unwrap();
        let barrier = Barrier::new(8);

        let keys = std::thread::scope(|s|{
            let handles = (0..8)
                .map(|_|s.spawn(||{
                    barrier.wait();
                    let res = nullable.get_default(Some(&PgTypeId::Oid(oids::INT4))).unwrap();
                    converter_key(&res.converter)
                }))
                .collect::<Vec<_>>();
            handles.into_iter().map(|h|h.join().unwrap()).collect::<Vec<_>>()
        });

        assert!(keys.windows(2).all(|w|w[0] == w[1]));
        assert_eq!(nullable.cached(), 1);
    }

    #[test]
    fn validation_rejects_mismatch() {
        struct Liar(DynConverter<i64>);

        impl PgConverterResolver<i64> for Liar {
            fn get_default(&self, _: Option<&PgTypeId>) -> Result<Resolution<i64>> {
                Ok(Resolution::new(self.0.clone(), PgTypeId::Oid(oids::INT8)))
            }

            fn get(&self, _: &i64, _: Option<&PgTypeId>) -> Result<Option<Resolution<i64>>> {
                Ok(None)
            }
        }

        let info = PgTypeInfo::with_resolver(
            Arc::default(),
            Arc::new(Liar(Arc::new(Int8Converter))),
            None,
        ).unwrap();

        let err = info.get_default_resolution(Some(&PgTypeId::Oid(oids::INT4))).unwrap_err();
        assert!(err.is_contract());

        let portable = Arc::new(TypeInfoOptions::default().portable_type_ids(true));
        let info = PgTypeInfo::with_resolver(portable, Arc::new(Liar(Arc::new(Int8Converter))), None).unwrap();
        assert!(info.get_default_resolution(None).unwrap_err().is_contract());
    }
}
