use futures_core::future::BoxFuture;
use std::{marker::PhantomData, sync::Arc};

use crate::{
    ConverterExt, Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    converter::DynConverter,
    info::{PgTypeInfo, TypeInfoOptions},
    postgres::{DataFormat, PgTypeId},
    resolver::{Compose, ComposingResolver, Resolution},
    size::{BufferRequirements, Size, SizeContext},
};

const MAX_PREALLOCATED_ELEMENTS: usize = 1024;

/// Measured element, [`None`] for database null.
type ElementState = Option<(Size, Option<WriteState>)>;

/// [`WriteState`] of [`ArrayConverter`].
pub struct ArrayWriteState {
    elements: Vec<ElementState>,
}

/// One dimensional array converter over an element converter, binary format only.
///
/// Database null elements are written through the element converter null
/// predicate, and read back with [`PgConverter::db_null_value`], so reading a
/// null element into a non nullable element type is an error.
pub struct ArrayConverter<T> {
    element: DynConverter<T>,
    element_type_id: PgTypeId,
    requirements: BufferRequirements,
}

impl<T: Send + Sync + 'static> ArrayConverter<T> {
    /// Create new array converter.
    ///
    /// `element_type_id` is written in the array header, its oid must be known by
    /// the writer catalog when it is a data type name.
    pub fn new(element: DynConverter<T>, element_type_id: PgTypeId) -> Result<ArrayConverter<T>> {
        let Some(requirements) = element.can_convert(DataFormat::Binary) else {
            return Err(Error::unsupported(format!(
                "array element converter {} has to support binary format", element.type_name()
            )));
        };
        Ok(ArrayConverter { element, element_type_id, requirements })
    }

    pub fn element(&self) -> &DynConverter<T> {
        &self.element
    }

    pub fn element_type_id(&self) -> &PgTypeId {
        &self.element_type_id
    }

    fn measure(&self, context: SizeContext, value: &T) -> Result<ElementState> {
        let mut state = None;
        let context = SizeContext::new(context.format, self.requirements.write());
        let Some(size) = self.element.get_size_or_db_null(context, value, &mut state)? else {
            return Ok(None);
        };
        if !size.is_exact() {
            return Err(Error::contract(format!(
                "array element converter {} returned non exact size {size}", self.element.type_name()
            )));
        }
        Ok(Some((size, state)))
    }

    async fn read_i32(&self, mode: IoMode, reader: &mut PgReader) -> Result<i32> {
        if reader.should_buffer(4) {
            reader.buffer(mode, 4).await?;
        }
        Ok(reader.read_i32())
    }

    async fn read_element(&self, mode: IoMode, reader: &mut PgReader) -> Result<T> {
        let len = self.read_i32(mode, reader).await?;
        if len == -1 {
            return self.element.db_null_value().ok_or_else(||Error::unsupported(format!(
                "array contains null, but {} cannot represent database null", self.element.type_name()
            )));
        }
        let mut scope = reader.begin_nested_read(mode, len, self.requirements.read()).await?;
        let value = self.element.read(mode, &mut scope).await?;
        scope.finish(mode).await?;
        Ok(value)
    }
}

impl<T: Send + Sync + 'static> PgConverter<Vec<T>> for ArrayConverter<T> {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::value()),
            DataFormat::Text => None,
        }
    }

    fn get_size(&self, context: SizeContext, value: &Vec<T>, state: &mut Option<WriteState>) -> Result<Size> {
        // ndim, has null, element oid
        let mut size = Size::create(12);
        if value.is_empty() {
            return Ok(size);
        }

        // length, lower bound
        size = size.combine_bytes(8);
        let mut elements = Vec::with_capacity(value.len());
        for (i, item) in value.iter().enumerate() {
            let element = self.measure(context, item).map_err(|e|e.with_context(format!("array element #{i}")))?;
            size = match &element {
                Some((element, _)) => size.combine_bytes(4).combine(*element),
                None => size.combine_bytes(4),
            };
            elements.push(element);
        }

        *state = Some(Box::new(ArrayWriteState { elements }));
        Ok(size)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<Vec<T>>> {
        Box::pin(async move {
            if reader.should_buffer(12) {
                reader.buffer(mode, 12).await?;
            }
            let ndim = reader.read_i32();
            let _has_null = reader.read_i32();
            let _element_oid = reader.read_u32();

            match ndim {
                0 => return Ok(vec![]),
                1 => { }
                _ => return Err(Error::unsupported(format!(
                    "cannot read {ndim} dimensional array into {}", self.type_name()
                ))),
            }

            if reader.should_buffer(8) {
                reader.buffer(mode, 8).await?;
            }
            let len = reader.read_i32();
            let _lower_bound = reader.read_i32();
            let len = usize::try_from(len)
                .map_err(|_|Error::unsupported(format!("invalid array length {len}")))?;

            // every element carries at least its length
            let capacity = match reader.scope_remaining() {
                Some(remaining) if len > remaining / 4 => return Err(Error::unsupported(format!(
                    "array length {len} exceeds the {remaining} remaining bytes"
                ))),
                Some(_) => len,
                None => len.min(MAX_PREALLOCATED_ELEMENTS),
            };
            let mut array = Vec::with_capacity(capacity);
            for i in 0..len {
                let element = self.read_element(mode, reader).await
                    .map_err(|e|e.with_context(format!("array element #{i}")))?;
                array.push(element);
            }
            Ok(array)
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a Vec<T>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let elements = match value.is_empty() {
                true => vec![],
                false => writer.take_write_state::<ArrayWriteState>()?.elements,
            };
            if elements.len() != value.len() {
                return Err(Error::contract("array changed between measuring and writing"));
            }
            let has_null = elements.iter().any(Option::is_none);

            writer.ensure(mode, 12).await?;
            writer.write_i32(match value.is_empty() { true => 0, false => 1 });
            writer.write_i32(has_null as i32);
            writer.write_as_oid(&self.element_type_id)?;
            if value.is_empty() {
                return Ok(());
            }

            writer.ensure(mode, 8).await?;
            writer.write_i32(value.len() as i32);
            writer.write_i32(1);

            for (item, element) in value.iter().zip(elements) {
                writer.ensure(mode, 4).await?;
                match element {
                    Some((size, state)) => {
                        writer.write_i32(size.value()?);
                        writer.nested_write(mode, &*self.element, item, size, state).await?;
                    }
                    None => writer.write_i32(-1),
                }
            }
            Ok(())
        })
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<Vec<T>>()
    }
}

impl<T: 'static> std::fmt::Debug for ArrayConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ArrayConverter({}, {})", self.element.type_name(), self.element_type_id)
    }
}

/// [`Compose`] of [`ArrayConverter`].
pub struct ArrayCompose<T> {
    _p: PhantomData<fn() -> T>,
}

impl<T> ArrayCompose<T> {
    pub const fn new() -> ArrayCompose<T> {
        ArrayCompose { _p: PhantomData }
    }
}

impl<T> Default for ArrayCompose<T> {
    fn default() -> Self {
        ArrayCompose::new()
    }
}

/// Resolver for [`Vec<T>`] over a type info of the element.
pub type ArrayResolver<T> = ComposingResolver<ArrayCompose<T>>;

impl<T: Send + Sync + 'static> Compose for ArrayCompose<T> {
    type Effective = T;
    type Output = Vec<T>;

    fn effective_type_id(&self, options: &TypeInfoOptions, pg_type_id: &PgTypeId) -> Result<PgTypeId> {
        options.element_type_id(pg_type_id)
    }

    fn type_id(&self, options: &TypeInfoOptions, effective: &PgTypeId) -> Result<PgTypeId> {
        options.array_type_id(effective)
    }

    fn create_converter(&self, _: &TypeInfoOptions, effective: &Resolution<T>) -> Result<DynConverter<Vec<T>>> {
        Ok(Arc::new(ArrayConverter::new(effective.converter.clone(), effective.pg_type_id.clone())?))
    }

    /// Every element is resolved, so they agree on one element type.
    fn effective_resolution(
        &self,
        info: &PgTypeInfo<T>,
        value: &Vec<T>,
        expected: Option<&PgTypeId>,
    ) -> Result<Option<Resolution<T>>> {
        let mut resolution: Option<Resolution<T>> = None;
        for (i, item) in value.iter().enumerate() {
            let expected = resolution.as_ref().map(|r|&r.pg_type_id).or(expected);
            let Some(current) = info.get_resolution(item, expected)? else {
                continue;
            };
            if let Some(first) = &resolution {
                if first.pg_type_id != current.pg_type_id {
                    return Err(Error::unsupported(format!(
                        "array elements resolved to different types, {} and {}",
                        first.pg_type_id, current.pg_type_id,
                    )).with_context(format!("array element #{i}")));
                }
            }
            resolution = Some(current);
        }
        Ok(resolution)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        FlushMode,
        converters::{Int4Converter, Int8Converter, NullableConverter, TextConverter},
        io::run_sync,
        postgres::oids,
        resolver::PgConverterResolver,
        transport::MemoryTransport,
    };

    fn int4_array() -> ArrayConverter<i32> {
        ArrayConverter::new(Arc::new(Int4Converter), oids::INT4.into()).unwrap()
    }

    fn nullable_int4_array() -> ArrayConverter<Option<i32>> {
        let element = Arc::new(NullableConverter::new(Arc::new(Int4Converter) as DynConverter<i32>));
        ArrayConverter::new(element, oids::INT4.into()).unwrap()
    }

    fn encode<T: Send + Sync + 'static>(converter: &ArrayConverter<T>, value: &Vec<T>) -> Vec<u8> {
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::with_capacity(io, 16).flush_mode(FlushMode::Blocking);
        run_sync(w.write_value(IoMode::Blocking, converter, value)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();
        sink.to_vec()
    }

    #[test]
    fn one_dimensional_layout() {
        let bytes = encode(&int4_array(), &vec![1, 2]);
        let expected = [
            &[0, 0, 0, 36][..],
            &[0, 0, 0, 1], &[0, 0, 0, 0], &[0, 0, 0, 23],
            &[0, 0, 0, 2], &[0, 0, 0, 1],
            &[0, 0, 0, 4], &[0, 0, 0, 1],
            &[0, 0, 0, 4], &[0, 0, 0, 2],
        ].concat();
        assert_eq!(bytes, expected);

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([3]));
        let out = run_sync(r.read_value(IoMode::Blocking, &int4_array())).unwrap();
        assert_eq!(out, Some(vec![1, 2]));
    }

    #[test]
    fn length_beyond_the_value_is_unsupported() {
        let bytes = [
            &[0, 0, 0, 24][..],
            &[0, 0, 0, 1], &[0, 0, 0, 0], &[0, 0, 0, 20],
            &[0x7f, 0xff, 0xff, 0xff], &[0, 0, 0, 1],
            &[0, 0, 0, 0],
        ].concat();
        let converter = ArrayConverter::new(Arc::new(Int8Converter), oids::INT8.into()).unwrap();
        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let err = run_sync(r.read_value(IoMode::Blocking, &converter)).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn empty_array_has_no_dimension() {
        let bytes = encode(&int4_array(), &vec![]);
        assert_eq!(bytes, [0, 0, 0, 12, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 23]);

        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let out = run_sync(r.read_value(IoMode::Blocking, &int4_array())).unwrap();
        assert_eq!(out, Some(vec![]));
    }

    #[test]
    fn null_elements() {
        let value = vec![Some(7), None];
        let bytes = encode(&nullable_int4_array(), &value);
        // has null flag
        assert_eq!(&bytes[8..12], &[0, 0, 0, 1]);
        assert_eq!(&bytes[bytes.len() - 4..], &[0xff, 0xff, 0xff, 0xff]);

        let mut r = PgReader::new(MemoryTransport::new(bytes.clone()));
        let out = run_sync(r.read_value(IoMode::Blocking, &nullable_int4_array())).unwrap();
        assert_eq!(out, Some(value));

        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let err = run_sync(r.read_value(IoMode::Blocking, &int4_array())).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.context(), "array element #1");
    }

    #[test]
    fn multi_dimensional_is_unsupported() {
        let bytes = [&[0, 0, 0, 12][..], &[0, 0, 0, 2], &[0, 0, 0, 0], &[0, 0, 0, 23]].concat();
        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let err = run_sync(r.read_value(IoMode::Blocking, &int4_array())).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[tokio::test]
    async fn text_array_one_byte_suspension() {
        let converter = ArrayConverter::<String>::new(Arc::new(TextConverter::default()), oids::TEXT.into()).unwrap();
        let value = vec!["a".to_string(), String::new(), "ünïcode".to_string()];
        let bytes = encode(&converter, &value);

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([1]).pending(true));
        let out = r.read_value(IoMode::Async, &converter).await.unwrap();
        assert_eq!(out, Some(value));
    }

    #[test]
    fn failed_element_leaves_stream_at_next_value() {
        // first element is a 2 byte payload for a 4 byte converter
        let mut bytes = vec![];
        let array = [
            &[0, 0, 0, 1][..], &[0, 0, 0, 0], &[0, 0, 0, 23],
            &[0, 0, 0, 2], &[0, 0, 0, 1],
            &[0, 0, 0, 2], &[0, 9],
            &[0, 0, 0, 4], &[0, 0, 0, 1],
        ].concat();
        bytes.extend_from_slice(&(array.len() as i32).to_be_bytes());
        bytes.extend_from_slice(&array);
        // sentinel
        bytes.extend_from_slice(&[0, 0, 0, 4, 0, 0, 0x0b, 0xad]);

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([5]));
        let err = run_sync(r.read_value(IoMode::Blocking, &int4_array())).unwrap_err();
        assert!(err.is_contract());
        assert_eq!(err.context(), "array element #0");

        let sentinel = run_sync(r.read_value(IoMode::Blocking, &Int4Converter)).unwrap();
        assert_eq!(sentinel, Some(0x0bad));
    }

    #[test]
    fn resolver_requires_one_element_type() {
        let options = Arc::new(TypeInfoOptions::default());
        let int4 = PgTypeInfo::<i32>::new(options, Arc::new(Int4Converter), oids::INT4.into()).unwrap();
        let resolver = ArrayResolver::new(ArrayCompose::new(), Some(oids::INT4_ARRAY.into()), int4).unwrap();

        let a = resolver.get(&vec![1, 2, 3], None).unwrap().unwrap();
        assert_eq!(a.pg_type_id, PgTypeId::Oid(oids::INT4_ARRAY));
        assert!(resolver.get(&vec![], None).unwrap().is_none());

        let b = resolver.get_default(None).unwrap();
        assert!(Arc::ptr_eq(&a.converter, &b.converter));
        assert_eq!(resolver.cached(), 1);
    }
}
