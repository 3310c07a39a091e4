use futures_core::future::BoxFuture;

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

/// Parse the rest of a text value.
async fn read_text<T>(mode: IoMode, reader: &mut PgReader, pg: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let bytes = reader.read_remaining(mode).await?;
    let text = std::str::from_utf8(&bytes)?;
    text.parse().map_err(|err|Error::unsupported(format!("invalid {pg} text {text:?}: {err}")))
}

macro_rules! text {
    (itoa, $value:expr, |$s:ident| $body:expr) => {{
        let mut buf = itoa::Buffer::new();
        let $s = buf.format($value);
        $body
    }};
    (display, $value:expr, |$s:ident| $body:expr) => {{
        let buf = $value.to_string();
        let $s = buf.as_str();
        $body
    }};
}

macro_rules! fixed {
    ($($(#[$meta:meta])* $name:ident($ty:ty, $pg:literal) => $read:ident, $write:ident, $text:ident;)*) => {
        $(
            $(#[$meta])*
            #[derive(Debug, Clone, Copy, Default)]
            pub struct $name;

            impl PgConverter<$ty> for $name {
                fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
                    match format {
                        DataFormat::Binary => Some(BufferRequirements::create_fixed_size(size_of::<$ty>() as i32)),
                        DataFormat::Text => Some(BufferRequirements::value()),
                    }
                }

                fn get_size(&self, context: SizeContext, value: &$ty, _: &mut Option<WriteState>) -> Result<Size> {
                    match context.format {
                        DataFormat::Binary => Ok(Size::create(size_of::<$ty>() as i32)),
                        DataFormat::Text => Ok(text!($text, *value, |s| Size::create(s.len() as i32))),
                    }
                }

                fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<$ty>> {
                    Box::pin(async move {
                        match reader.format() {
                            DataFormat::Binary => {
                                if reader.should_buffer(size_of::<$ty>()) {
                                    reader.buffer(mode, size_of::<$ty>()).await?;
                                }
                                Ok(reader.$read())
                            }
                            DataFormat::Text => read_text(mode, reader, $pg).await,
                        }
                    })
                }

                fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a $ty) -> BoxFuture<'a, Result<()>> {
                    Box::pin(async move {
                        match writer.current().format {
                            DataFormat::Binary => {
                                if writer.should_flush(Size::create(size_of::<$ty>() as i32))? {
                                    writer.flush(mode).await?;
                                }
                                writer.$write(*value);
                                Ok(())
                            }
                            DataFormat::Text => {
                                let text = text!($text, *value, |s| s.to_owned());
                                writer.write_bytes(mode, text.as_bytes()).await
                            }
                        }
                    })
                }
            }
        )*
    };
}

fixed! {
    /// `int2` converter.
    Int2Converter(i16, "int2") => read_i16, write_i16, itoa;
    /// `int4` converter.
    Int4Converter(i32, "int4") => read_i32, write_i32, itoa;
    /// `int8` converter.
    Int8Converter(i64, "int8") => read_i64, write_i64, itoa;
    /// `oid` converter.
    OidConverter(u32, "oid") => read_u32, write_u32, itoa;
    /// `float4` converter.
    Float4Converter(f32, "float4") => read_f32, write_f32, display;
    /// `float8` converter.
    Float8Converter(f64, "float8") => read_f64, write_f64, display;
}

/// `bool` converter.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoolConverter;

impl PgConverter<bool> for BoolConverter {
    fn can_convert(&self, _: DataFormat) -> Option<BufferRequirements> {
        Some(BufferRequirements::create_fixed_size(1))
    }

    fn get_size(&self, _: SizeContext, _: &bool, _: &mut Option<WriteState>) -> Result<Size> {
        Ok(Size::create(1))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            if reader.should_buffer(1) {
                reader.buffer(mode, 1).await?;
            }
            match (reader.format(), reader.read_u8()) {
                (DataFormat::Binary, b) => Ok(b != 0),
                (DataFormat::Text, b't') => Ok(true),
                (DataFormat::Text, b'f') => Ok(false),
                (DataFormat::Text, b) => Err(Error::unsupported(format!("invalid bool text {:?}", b as char))),
            }
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a bool) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if writer.should_flush(Size::create(1))? {
                writer.flush(mode).await?;
            }
            match writer.current().format {
                DataFormat::Binary => writer.write_u8(*value as u8),
                DataFormat::Text => writer.write_u8(if *value { b't' } else { b'f' }),
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ConverterExt, io::run_sync, transport::MemoryTransport};

    fn roundtrip<T, C>(converter: &C, value: T, format: DataFormat) -> T
    where
        T: Send + Sync,
        C: PgConverter<T>,
    {
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::new(io);
        run_sync(w.write_value_as(IoMode::Blocking, converter, &value, format)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();

        let mut r = PgReader::new(MemoryTransport::new(sink.take()).chunks([1]));
        run_sync(r.read_value_as(IoMode::Blocking, converter, format)).unwrap().unwrap()
    }

    #[test]
    fn binary_and_text_numbers() {
        for format in [DataFormat::Binary, DataFormat::Text] {
            assert_eq!(roundtrip(&Int2Converter, -12i16, format), -12);
            assert_eq!(roundtrip(&Int4Converter, i32::MIN, format), i32::MIN);
            assert_eq!(roundtrip(&Int8Converter, i64::MAX, format), i64::MAX);
            assert_eq!(roundtrip(&OidConverter, 3802u32, format), 3802);
            assert_eq!(roundtrip(&Float4Converter, 1.5f32, format), 1.5);
            assert_eq!(roundtrip(&Float8Converter, -0.25f64, format), -0.25);
            assert!(roundtrip(&BoolConverter, true, format));
            assert!(!roundtrip(&BoolConverter, false, format));
        }
    }

    #[test]
    fn text_size_matches_digits() {
        let ctx = SizeContext::new(DataFormat::Text, Size::UNKNOWN);
        assert_eq!(Int4Converter.get_size(ctx, &-1234, &mut None).unwrap(), Size::create(5));
        let prepared = Int4Converter.prepare(DataFormat::Binary, &7).unwrap();
        assert_eq!(prepared.size(), Some(Size::create(4)));
    }

    #[test]
    fn invalid_text_is_unsupported() {
        let mut input = 3i32.to_be_bytes().to_vec();
        input.extend_from_slice(b"1x2");
        let mut r = PgReader::new(MemoryTransport::new(input));
        let err = run_sync(r.read_value_as(IoMode::Blocking, &Int4Converter, DataFormat::Text)).unwrap_err();
        assert!(err.is_unsupported());
    }
}
