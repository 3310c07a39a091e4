use bytes::Bytes;
use futures_core::future::BoxFuture;
use std::{marker::PhantomData, net::IpAddr};

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    encoding::TextEncoding,
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

/// `text`, `varchar`, `bpchar` and `name` converter.
///
/// Text types share the same representation in both formats.
#[derive(Debug, Clone, Copy, Default)]
pub struct TextConverter {
    encoding: TextEncoding,
}

impl TextConverter {
    pub const fn new(encoding: TextEncoding) -> TextConverter {
        TextConverter { encoding }
    }

    pub const fn encoding(&self) -> TextEncoding {
        self.encoding
    }
}

impl PgConverter<String> for TextConverter {
    fn can_convert(&self, _: DataFormat) -> Option<BufferRequirements> {
        Some(BufferRequirements::value())
    }

    fn get_size(&self, _: SizeContext, value: &String, _: &mut Option<WriteState>) -> Result<Size> {
        let len = self.encoding.encoded_len(value)?;
        i32::try_from(len)
            .map(Size::create)
            .map_err(|_|Error::unsupported("text value too large"))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let bytes = reader.read_remaining(mode).await?;
            self.encoding.decode(bytes)
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a String) -> BoxFuture<'a, Result<()>> {
        Box::pin(writer.write_chars(mode, value, self.encoding))
    }
}

/// `bytea` converter, binary format only.
///
/// Host type is anything constructible from [`Bytes`], like [`Vec<u8>`] or [`Bytes`] itself.
pub struct ByteaConverter<B = Vec<u8>> {
    _p: PhantomData<fn() -> B>,
}

impl<B> ByteaConverter<B> {
    pub const fn new() -> ByteaConverter<B> {
        ByteaConverter { _p: PhantomData }
    }
}

impl<B> Default for ByteaConverter<B> {
    fn default() -> Self {
        ByteaConverter::new()
    }
}

impl<B> std::fmt::Debug for ByteaConverter<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ByteaConverter")
    }
}

impl<B> PgConverter<B> for ByteaConverter<B>
where
    B: AsRef<[u8]> + From<Bytes> + Send + Sync + 'static,
{
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::value()),
            DataFormat::Text => None,
        }
    }

    fn get_size(&self, _: SizeContext, value: &B, _: &mut Option<WriteState>) -> Result<Size> {
        i32::try_from(value.as_ref().len())
            .map(Size::create)
            .map_err(|_|Error::unsupported("bytea value too large"))
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<B>> {
        Box::pin(async move { reader.read_remaining(mode).await.map(B::from) })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a B) -> BoxFuture<'a, Result<()>> {
        Box::pin(writer.write_bytes(mode, value.as_ref()))
    }
}

const PGSQL_AF_INET: u8 = 2;
const PGSQL_AF_INET6: u8 = 3;

/// `inet` converter for a host address, binary format only.
///
/// The whole value is buffered before decoding.
#[derive(Debug, Clone, Copy, Default)]
pub struct InetConverter;

impl PgConverter<IpAddr> for InetConverter {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::new(
                Size::create_upper_bound(20),
                Size::UNKNOWN,
            )),
            DataFormat::Text => None,
        }
    }

    fn get_size(&self, _: SizeContext, value: &IpAddr, _: &mut Option<WriteState>) -> Result<Size> {
        match value {
            IpAddr::V4(_) => Ok(Size::create(8)),
            IpAddr::V6(_) => Ok(Size::create(20)),
        }
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<IpAddr>> {
        Box::pin(async move {
            reader.buffer(mode, 4).await?;
            let family = reader.read_u8();
            let _netmask = reader.read_u8();
            let _is_cidr = reader.read_u8();
            let len = reader.read_u8();
            match (family, len) {
                (PGSQL_AF_INET, 4) => {
                    reader.buffer(mode, 4).await?;
                    Ok(IpAddr::from(reader.read_u32().to_be_bytes()))
                }
                (PGSQL_AF_INET6, 16) => {
                    reader.buffer(mode, 16).await?;
                    let hi = reader.read_i64() as u64 as u128;
                    let lo = reader.read_i64() as u64 as u128;
                    Ok(IpAddr::from((hi << 64 | lo).to_be_bytes()))
                }
                _ => Err(Error::unsupported(format!("invalid inet family {family} with address length {len}"))),
            }
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a IpAddr) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            if writer.should_flush(Size::create(20))? {
                writer.flush(mode).await?;
            }
            match value {
                IpAddr::V4(v4) => {
                    writer.write_u8(PGSQL_AF_INET);
                    writer.write_u8(32);
                    writer.write_u8(0);
                    writer.write_u8(4);
                    writer.write_u32(u32::from(*v4));
                }
                IpAddr::V6(v6) => {
                    writer.write_u8(PGSQL_AF_INET6);
                    writer.write_u8(128);
                    writer.write_u8(0);
                    writer.write_u8(16);
                    let bits = u128::from(*v6);
                    writer.write_u64((bits >> 64) as u64);
                    writer.write_u64(bits as u64);
                }
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{FlushMode, io::run_sync, transport::MemoryTransport};

    fn write<T: Send + Sync, C: PgConverter<T>>(converter: &C, value: &T) -> Bytes {
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::with_capacity(io, 8).flush_mode(FlushMode::Blocking);
        run_sync(w.write_value(IoMode::Blocking, converter, value)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();
        sink.take()
    }

    #[test]
    fn text_streams_through_small_buffer() {
        let value = String::from("the quick brown fox jumps over the lazy dög");
        let bytes = write(&TextConverter::default(), &value);
        assert_eq!(&bytes[..4], &(value.len() as i32).to_be_bytes());

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([3]));
        let out = run_sync(r.read_value(IoMode::Blocking, &TextConverter::default())).unwrap();
        assert_eq!(out.as_deref(), Some(value.as_str()));
    }

    #[test]
    fn latin1_text() {
        let converter = TextConverter::new(TextEncoding::Latin1);
        let bytes = write(&converter, &String::from("né"));
        assert_eq!(&bytes[..], b"\0\0\0\x02n\xe9");

        let err = converter.get_size(SizeContext::binary(Size::UNKNOWN), &String::from("€"), &mut None);
        assert!(err.unwrap_err().is_unsupported());
    }

    #[test]
    fn bytea_into_bytes() {
        let bytes = write(&ByteaConverter::<Vec<u8>>::new(), &vec![0, 1, 2, 255]);
        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let out: Option<Bytes> = run_sync(r.read_value(IoMode::Blocking, &ByteaConverter::<Bytes>::new())).unwrap();
        assert_eq!(&out.unwrap()[..], &[0, 1, 2, 255]);
        assert!(ByteaConverter::<Vec<u8>>::new().can_convert(DataFormat::Text).is_none());
    }

    #[test]
    fn inet_v4_and_v6() {
        for addr in ["10.1.2.3", "2001:db8::ff00:42:8329"] {
            let addr: IpAddr = addr.parse().unwrap();
            let bytes = write(&InetConverter, &addr);
            let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([1]));
            let out = run_sync(r.read_value(IoMode::Blocking, &InetConverter)).unwrap();
            assert_eq!(out, Some(addr));
        }
    }
}
