use futures_core::future::BoxFuture;
use std::{
    collections::{BTreeMap, HashMap},
    hash::BuildHasher,
    marker::PhantomData,
};

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    encoding::TextEncoding,
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

const MAX_PREALLOCATED_ENTRIES: usize = 1024;

/// Host container of an `hstore` value.
pub trait HstoreMap: Send + Sync + 'static {
    fn with_capacity(capacity: usize) -> Self;

    fn entry_count(&self) -> usize;

    /// Iterate entries in write order.
    ///
    /// A [`None`] key cannot be written.
    fn entries(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> + Send;

    fn insert_entry(&mut self, key: String, value: Option<String>);
}

impl<S> HstoreMap for HashMap<String, Option<String>, S>
where
    S: BuildHasher + Default + Send + Sync + 'static,
{
    fn with_capacity(capacity: usize) -> Self {
        HashMap::with_capacity_and_hasher(capacity, S::default())
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> + Send {
        self.iter().map(|(k,v)|(Some(k.as_str()), v.as_deref()))
    }

    fn insert_entry(&mut self, key: String, value: Option<String>) {
        self.insert(key, value);
    }
}

impl HstoreMap for BTreeMap<String, Option<String>> {
    fn with_capacity(_: usize) -> Self {
        BTreeMap::new()
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> + Send {
        self.iter().map(|(k,v)|(Some(k.as_str()), v.as_deref()))
    }

    fn insert_entry(&mut self, key: String, value: Option<String>) {
        self.insert(key, value);
    }
}

/// Entries in wire order, keys may be null on the host side.
impl HstoreMap for Vec<(Option<String>, Option<String>)> {
    fn with_capacity(capacity: usize) -> Self {
        Vec::with_capacity(capacity)
    }

    fn entry_count(&self) -> usize {
        self.len()
    }

    fn entries(&self) -> impl Iterator<Item = (Option<&str>, Option<&str>)> + Send {
        self.iter().map(|(k,v)|(k.as_deref(), v.as_deref()))
    }

    fn insert_entry(&mut self, key: String, value: Option<String>) {
        self.push((Some(key), value));
    }
}

/// [`WriteState`] of [`HstoreConverter`], key and value length of each entry.
///
/// Value length is `-1` for null value.
pub struct HstoreWriteState {
    sizes: Vec<i32>,
}

/// `hstore` converter, binary format only.
pub struct HstoreConverter<M> {
    encoding: TextEncoding,
    _p: PhantomData<fn() -> M>,
}

impl<M> HstoreConverter<M> {
    pub const fn new(encoding: TextEncoding) -> HstoreConverter<M> {
        HstoreConverter { encoding, _p: PhantomData }
    }

    pub const fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    fn text_len(&self, text: &str) -> Result<i32> {
        i32::try_from(self.encoding.encoded_len(text)?)
            .map_err(|_|Error::unsupported("hstore text too large"))
    }

    async fn read_len(&self, mode: IoMode, reader: &mut PgReader) -> Result<i32> {
        if reader.should_buffer(4) {
            reader.buffer(mode, 4).await?;
        }
        Ok(reader.read_i32())
    }

    async fn read_text(&self, mode: IoMode, reader: &mut PgReader, len: i32) -> Result<String> {
        let len = usize::try_from(len)
            .map_err(|_|Error::unsupported(format!("invalid hstore text length {len}")))?;
        let bytes = reader.read_bytes(mode, len).await?;
        self.encoding.decode(bytes)
    }
}

impl<M> Default for HstoreConverter<M> {
    fn default() -> Self {
        HstoreConverter::new(TextEncoding::default())
    }
}

impl<M: HstoreMap> PgConverter<M> for HstoreConverter<M> {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::value()),
            DataFormat::Text => None,
        }
    }

    fn get_size(&self, _: SizeContext, value: &M, state: &mut Option<WriteState>) -> Result<Size> {
        let mut size = Size::create(4);
        let mut sizes = Vec::with_capacity(value.entry_count() * 2);

        for (i, (key, value)) in value.entries().enumerate() {
            let Some(key) = key else {
                return Err(Error::unsupported("hstore key cannot be null").with_context(format!("hstore key #{i}")));
            };
            let key_len = self.text_len(key)?;
            size = size.combine_bytes(4 + key_len);
            sizes.push(key_len);

            match value {
                Some(value) => {
                    let value_len = self.text_len(value)?;
                    size = size.combine_bytes(4 + value_len);
                    sizes.push(value_len);
                }
                None => {
                    size = size.combine_bytes(4);
                    sizes.push(-1);
                }
            }
        }

        *state = Some(Box::new(HstoreWriteState { sizes }));
        Ok(size)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<M>> {
        Box::pin(async move {
            let count = self.read_len(mode, reader).await?;
            let count = usize::try_from(count)
                .map_err(|_|Error::unsupported(format!("invalid hstore entry count {count}")))?;
            // every entry carries at least a key length and a value length
            let capacity = match reader.scope_remaining() {
                Some(remaining) if count > remaining / 8 => return Err(Error::unsupported(format!(
                    "hstore entry count {count} exceeds the {remaining} remaining bytes"
                ))),
                Some(_) => count,
                None => count.min(MAX_PREALLOCATED_ENTRIES),
            };
            let mut map = M::with_capacity(capacity);

            for i in 0..count {
                let key_len = self.read_len(mode, reader).await?;
                if key_len == -1 {
                    return Err(Error::unsupported("hstore key cannot be null").with_context(format!("hstore key #{i}")));
                }
                let key = self.read_text(mode, reader, key_len).await?;

                let value = match self.read_len(mode, reader).await? {
                    -1 => None,
                    len => Some(self.read_text(mode, reader, len).await?),
                };
                map.insert_entry(key, value);
            }

            Ok(map)
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a M) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let HstoreWriteState { sizes } = writer.take_write_state()?;
            if sizes.len() != value.entry_count() * 2 {
                return Err(Error::contract("hstore changed between measuring and writing"));
            }

            writer.ensure(mode, 4).await?;
            writer.write_i32(value.entry_count() as i32);

            for ((key, value), sizes) in value.entries().zip(sizes.chunks_exact(2)) {
                let Some(key) = key else {
                    return Err(Error::unsupported("hstore key cannot be null"));
                };
                writer.ensure(mode, 4).await?;
                writer.write_i32(sizes[0]);
                writer.write_chars(mode, key, self.encoding).await?;

                writer.ensure(mode, 4).await?;
                writer.write_i32(sizes[1]);
                if let Some(value) = value {
                    writer.write_chars(mode, value, self.encoding).await?;
                }
            }
            Ok(())
        })
    }
}

impl<M> std::fmt::Debug for HstoreConverter<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HstoreConverter")
            .field("encoding", &self.encoding)
            .field("host_type", &std::any::type_name::<M>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{ConverterExt, FlushMode, io::run_sync, transport::MemoryTransport};

    type Entries = Vec<(Option<String>, Option<String>)>;

    fn entry(key: &str, value: Option<&str>) -> (Option<String>, Option<String>) {
        (Some(key.into()), value.map(Into::into))
    }

    fn encode<M: HstoreMap>(value: &M) -> Vec<u8> {
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::with_capacity(io, 8).flush_mode(FlushMode::Blocking);
        run_sync(w.write_value(IoMode::Blocking, &HstoreConverter::<M>::default(), value)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();
        sink.to_vec()
    }

    #[test]
    fn null_value_has_no_bytes() {
        let map: Entries = vec![entry("a", None), entry("b", Some("x"))];
        let bytes = encode(&map);
        let expected = [
            &[0, 0, 0, 23][..],
            &[0, 0, 0, 2],
            &[0, 0, 0, 1], b"a", &[0xff, 0xff, 0xff, 0xff],
            &[0, 0, 0, 1], b"b", &[0, 0, 0, 1], b"x",
        ].concat();
        assert_eq!(bytes, expected);

        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let out: HashMap<String, Option<String>> = run_sync(r.read_value(
            IoMode::Blocking,
            &HstoreConverter::default(),
        )).unwrap().unwrap();
        assert_eq!(out.get("a"), Some(&None));
        assert_eq!(out.get("b"), Some(&Some("x".to_string())));
    }

    #[test]
    fn null_key_is_unsupported() {
        let map: Entries = vec![entry("a", Some("1")), (None, Some("2".into()))];
        let err = HstoreConverter::<Entries>::default().prepare(DataFormat::Binary, &map).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(err.context(), "hstore key #1");
    }

    #[tokio::test]
    async fn three_entries_one_byte_suspension() {
        let map: BTreeMap<String, Option<String>> = [
            ("k1".to_string(), Some("v1".to_string())),
            ("k2".to_string(), None),
            ("ключ".to_string(), Some("значение".to_string())),
        ].into_iter().collect();
        let bytes = encode(&map);

        let converter = HstoreConverter::<BTreeMap<String, Option<String>>>::default();
        let mut whole = PgReader::new(MemoryTransport::new(bytes.clone()));
        let whole = whole.read_value(IoMode::Async, &converter).await.unwrap();

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([1]).pending(true));
        let out = r.read_value(IoMode::Async, &converter).await.unwrap();
        assert_eq!(out, whole);
        assert_eq!(out, Some(map));
    }

    #[test]
    fn entry_count_beyond_the_value_is_unsupported() {
        let bytes = [&[0, 0, 0, 4][..], &[0x7f, 0xff, 0xff, 0xff], &[0, 0, 0, 0]].concat();
        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let err = run_sync(r.read_value(
            IoMode::Blocking,
            &HstoreConverter::<HashMap<String, Option<String>>>::default(),
        )).unwrap_err();
        assert!(err.is_unsupported());

        // the stream stays framed after the rejected value
        assert_eq!(run_sync(r.read_bytes(IoMode::Blocking, 4)).unwrap(), &[0, 0, 0, 0][..]);
    }

    #[test]
    fn null_key_on_the_wire_is_unsupported() {
        let bytes = [&[0, 0, 0, 8][..], &[0, 0, 0, 1], &[0xff, 0xff, 0xff, 0xff]].concat();
        let mut r = PgReader::new(MemoryTransport::new(bytes));
        let err = run_sync(r.read_value(IoMode::Blocking, &HstoreConverter::<Entries>::default())).unwrap_err();
        assert!(err.is_unsupported());
    }
}
