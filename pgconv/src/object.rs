//! Type erased converters.
//!
//! Generic row code reads and writes values without knowing their host type
//! statically, through [`ObjectConverter`].
use futures_core::future::BoxFuture;
use std::{any::Any, sync::Arc};

use crate::{
    ConverterExt, Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    converter::{DbNullPredicate, DynConverter, HostType},
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

/// A boxed host value.
pub type AnyValue = Box<dyn Any + Send + Sync>;

/// Converter over type erased host values.
pub trait ObjectConverter: Send + Sync + 'static {
    /// The host type behind the erased values.
    fn object_type(&self) -> HostType;

    fn can_convert_object(&self, format: DataFormat) -> Option<BufferRequirements>;

    /// Returns `true` if `value` is database null.
    fn is_db_null_object(&self, value: &(dyn Any + Send + Sync)) -> Result<bool>;

    fn get_size_as_object(
        &self,
        context: SizeContext,
        value: &(dyn Any + Send + Sync),
        state: &mut Option<WriteState>,
    ) -> Result<Size>;

    fn read_as_object<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<AnyValue>>;

    fn write_as_object<'a>(
        &'a self,
        mode: IoMode,
        writer: &'a mut PgWriter,
        value: &'a (dyn Any + Send + Sync),
    ) -> BoxFuture<'a, Result<()>>;
}

fn downcast<'a, T: 'static>(value: &'a (dyn Any + Send + Sync), converter: &str) -> Result<&'a T> {
    value.downcast_ref::<T>().ok_or_else(||Error::unsupported(format!(
        "{converter} cannot convert a value which is not {}", std::any::type_name::<T>()
    )))
}

impl<T: Send + Sync + 'static> ObjectConverter for DynConverter<T> {
    fn object_type(&self) -> HostType {
        self.host_type()
    }

    fn can_convert_object(&self, format: DataFormat) -> Option<BufferRequirements> {
        self.can_convert(format)
    }

    fn is_db_null_object(&self, value: &(dyn Any + Send + Sync)) -> Result<bool> {
        let value = downcast::<T>(value, self.type_name())?;
        Ok(self.is_db_null(value))
    }

    fn get_size_as_object(
        &self,
        context: SizeContext,
        value: &(dyn Any + Send + Sync),
        state: &mut Option<WriteState>,
    ) -> Result<Size> {
        let value = downcast::<T>(value, self.type_name())?;
        self.get_size(context, value, state)
    }

    fn read_as_object<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<AnyValue>> {
        Box::pin(async move {
            let value = self.read(mode, reader).await?;
            Ok(Box::new(value) as AnyValue)
        })
    }

    fn write_as_object<'a>(
        &'a self,
        mode: IoMode,
        writer: &'a mut PgWriter,
        value: &'a (dyn Any + Send + Sync),
    ) -> BoxFuture<'a, Result<()>> {
        match downcast::<T>(value, self.type_name()) {
            Ok(value) => self.write(mode, writer, value),
            Err(err) => Box::pin(async move { Err(err) }),
        }
    }
}

/// [`PgConverter`] over [`AnyValue`] delegating to an [`ObjectConverter`].
///
/// Reports the host type of the erased converter, so resolvers over [`AnyValue`]
/// keep the identity of the converters they box.
#[derive(Clone)]
pub struct BoxingConverter {
    inner: Arc<dyn ObjectConverter>,
}

impl BoxingConverter {
    pub fn new(inner: Arc<dyn ObjectConverter>) -> BoxingConverter {
        BoxingConverter { inner }
    }

    /// Box a typed converter.
    pub fn of<T: Send + Sync + 'static>(converter: DynConverter<T>) -> BoxingConverter {
        BoxingConverter { inner: Arc::new(converter) }
    }

    pub fn inner(&self) -> &Arc<dyn ObjectConverter> {
        &self.inner
    }
}

impl PgConverter<AnyValue> for BoxingConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        self.inner.can_convert_object(format)
    }

    fn db_null_predicate(&self) -> DbNullPredicate {
        DbNullPredicate::Custom
    }

    fn is_db_null_value(&self, value: &AnyValue) -> bool {
        self.inner.is_db_null_object(&**value).unwrap_or_default()
    }

    fn get_size(&self, context: SizeContext, value: &AnyValue, state: &mut Option<WriteState>) -> Result<Size> {
        self.inner.get_size_as_object(context, &**value, state)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<AnyValue>> {
        self.inner.read_as_object(mode, reader)
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a AnyValue) -> BoxFuture<'a, Result<()>> {
        self.inner.write_as_object(mode, writer, &**value)
    }

    fn host_type(&self) -> HostType {
        self.inner.object_type()
    }

    fn type_name(&self) -> &'static str {
        self.inner.object_type().name()
    }
}

impl std::fmt::Debug for BoxingConverter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "BoxingConverter({})", self.inner.object_type())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        converters::{Int4Converter, TextConverter},
        io::run_sync,
        transport::MemoryTransport,
    };

    #[test]
    fn boxed_roundtrip() {
        let converter = BoxingConverter::of::<String>(Arc::new(TextConverter::default()));
        assert!(converter.host_type().is::<String>());

        let value: AnyValue = Box::new(String::from("boxed"));
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::new(io);
        run_sync(w.write_value(IoMode::Blocking, &converter, &value)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();

        let mut r = PgReader::new(MemoryTransport::new(sink.take()).chunks([2]));
        let out = run_sync(r.read_value(IoMode::Blocking, &converter)).unwrap().unwrap();
        assert_eq!(out.downcast_ref::<String>().map(String::as_str), Some("boxed"));
    }

    #[test]
    fn wrong_host_type_is_unsupported() {
        let converter = BoxingConverter::of::<i32>(Arc::new(Int4Converter));
        let value: AnyValue = Box::new(1i64);
        let err = converter.get_size(SizeContext::binary(Size::UNKNOWN), &value, &mut None).unwrap_err();
        assert!(err.is_unsupported());
    }
}
