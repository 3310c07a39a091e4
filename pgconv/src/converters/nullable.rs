use futures_core::future::BoxFuture;
use std::marker::PhantomData;

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    converter::{DbNullPredicate, DynConverter},
    info::{PgTypeInfo, TypeInfoOptions},
    postgres::{DataFormat, PgTypeId},
    resolver::{Compose, ComposingResolver, Resolution},
    size::{BufferRequirements, Size, SizeContext},
};

/// Converter for [`Option<T>`] over a converter of `T`.
///
/// [`None`] is database null and never reaches the wrapped converter.
pub struct NullableConverter<T> {
    effective: DynConverter<T>,
}

impl<T> NullableConverter<T> {
    pub fn new(effective: DynConverter<T>) -> NullableConverter<T> {
        NullableConverter { effective }
    }

    pub fn effective(&self) -> &DynConverter<T> {
        &self.effective
    }
}

impl<T: Send + Sync + 'static> PgConverter<Option<T>> for NullableConverter<T> {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        let req = self.effective.can_convert(format)?;
        Some(BufferRequirements::new(req.read().to_upper_bound(), req.write()))
    }

    fn db_null_predicate(&self) -> DbNullPredicate {
        DbNullPredicate::Null
    }

    fn is_db_null_value(&self, value: &Option<T>) -> bool {
        value.is_none()
    }

    fn db_null_value(&self) -> Option<Option<T>> {
        Some(None)
    }

    fn get_size(&self, context: SizeContext, value: &Option<T>, state: &mut Option<WriteState>) -> Result<Size> {
        let Some(value) = value else {
            return Err(Error::contract("size requested for a database null value"));
        };
        if context.buffer_requirement.is_exact() {
            return Ok(context.buffer_requirement);
        }
        self.effective.get_size(context, value, state)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<Option<T>>> {
        Box::pin(async move { self.effective.read(mode, reader).await.map(Some) })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a Option<T>) -> BoxFuture<'a, Result<()>> {
        match value {
            Some(value) => self.effective.write(mode, writer, value),
            None => Box::pin(async { Err(Error::contract("write requested for a database null value")) }),
        }
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Option<T>>()
    }
}

impl<T: 'static> std::fmt::Debug for NullableConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NullableConverter({})", self.effective.type_name())
    }
}

/// [`Compose`] of [`NullableConverter`], the type id is the one of `T`.
pub struct NullableCompose<T> {
    _p: PhantomData<fn() -> T>,
}

impl<T> NullableCompose<T> {
    pub const fn new() -> NullableCompose<T> {
        NullableCompose { _p: PhantomData }
    }
}

impl<T> Default for NullableCompose<T> {
    fn default() -> Self {
        NullableCompose::new()
    }
}

/// Resolver for [`Option<T>`] over a type info of `T`.
pub type NullableResolver<T> = ComposingResolver<NullableCompose<T>>;

impl<T: Send + Sync + 'static> Compose for NullableCompose<T> {
    type Effective = T;
    type Output = Option<T>;

    fn effective_type_id(&self, _: &TypeInfoOptions, pg_type_id: &PgTypeId) -> Result<PgTypeId> {
        Ok(pg_type_id.clone())
    }

    fn type_id(&self, _: &TypeInfoOptions, effective: &PgTypeId) -> Result<PgTypeId> {
        Ok(effective.clone())
    }

    fn create_converter(&self, _: &TypeInfoOptions, effective: &Resolution<T>) -> Result<DynConverter<Option<T>>> {
        Ok(std::sync::Arc::new(NullableConverter::new(effective.converter.clone())))
    }

    fn effective_resolution(
        &self,
        info: &PgTypeInfo<T>,
        value: &Option<T>,
        expected: Option<&PgTypeId>,
    ) -> Result<Option<Resolution<T>>> {
        match value {
            Some(value) => info.get_resolution(value, expected),
            None => info.get_default_resolution(expected).map(Some),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        ConverterExt,
        converters::Int4Converter,
        io::run_sync,
        transport::MemoryTransport,
    };
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    /// Counts every call reaching the wrapped converter.
    #[derive(Default)]
    struct Spy {
        calls: AtomicUsize,
    }

    impl PgConverter<i32> for Spy {
        fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
            Int4Converter.can_convert(format)
        }

        fn get_size(&self, context: SizeContext, value: &i32, state: &mut Option<WriteState>) -> Result<Size> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Int4Converter.get_size(context, value, state)
        }

        fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<i32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PgConverter::read(&Int4Converter, mode, reader)
        }

        fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a i32) -> BoxFuture<'a, Result<()>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            PgConverter::write(&Int4Converter, mode, writer, value)
        }
    }

    #[test]
    fn null_never_reaches_effective_converter() {
        let spy = Arc::new(Spy::default());
        let nullable = NullableConverter::new(spy.clone() as DynConverter<i32>);

        let prepared = nullable.prepare(DataFormat::Binary, &None).unwrap();
        assert!(prepared.is_db_null());

        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::new(io);
        run_sync(w.write_prepared(IoMode::Blocking, &nullable, &None, prepared)).unwrap();
        run_sync(w.write_value(IoMode::Blocking, &nullable, &Some(7))).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();

        // exact requirement is the size, only the write reaches the spy
        assert_eq!(spy.calls.load(Ordering::SeqCst), 1);
        assert_eq!(&sink.take()[..], b"\xff\xff\xff\xff\0\0\0\x04\0\0\0\x07");
    }

    #[test]
    fn read_requirement_becomes_upper_bound() {
        let nullable = NullableConverter::new(Arc::new(Int4Converter) as DynConverter<i32>);
        let req = nullable.can_convert(DataFormat::Binary).unwrap();
        assert_eq!(req.read(), Size::create_upper_bound(4));
        assert_eq!(req.write(), Size::create(4));
        assert_eq!(nullable.db_null_value(), Some(None));
    }

    #[test]
    fn reads_null_and_value() {
        let nullable = NullableConverter::new(Arc::new(Int4Converter) as DynConverter<i32>);
        let mut input = (-1i32).to_be_bytes().to_vec();
        input.extend_from_slice(&4i32.to_be_bytes());
        input.extend_from_slice(&42i32.to_be_bytes());

        let mut r = PgReader::new(MemoryTransport::new(input).chunks([1]));
        assert_eq!(run_sync(r.read_value(IoMode::Blocking, &nullable)).unwrap(), None);
        assert_eq!(run_sync(r.read_value(IoMode::Blocking, &nullable)).unwrap(), Some(Some(42)));
    }
}
