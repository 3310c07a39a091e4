use bytes::Bytes;
use futures_core::future::BoxFuture;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::marker::PhantomData;

use crate::{
    Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

const JSONB_VERSION: u8 = 1;

/// Host wrapper of a `json` or `jsonb` value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Json<T>(pub T);

impl<T: Serialize> Serialize for Json<T> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.0.serialize(serializer)
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Json<T> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(Self(T::deserialize(deserializer)?))
    }
}

/// `json` and `jsonb` converter through serde.
///
/// Binary `jsonb` is prefixed with a version byte, the rest is json text.
pub struct JsonConverter<T> {
    jsonb: bool,
    _p: PhantomData<fn() -> T>,
}

impl<T> JsonConverter<T> {
    pub const fn json() -> JsonConverter<T> {
        JsonConverter { jsonb: false, _p: PhantomData }
    }

    pub const fn jsonb() -> JsonConverter<T> {
        JsonConverter { jsonb: true, _p: PhantomData }
    }

    pub const fn is_jsonb(&self) -> bool {
        self.jsonb
    }

    fn has_version(&self, format: DataFormat) -> bool {
        self.jsonb && matches!(format, DataFormat::Binary)
    }
}

/// Serialized json, written as is.
struct JsonWriteState(Bytes);

impl<T> PgConverter<Json<T>> for JsonConverter<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn can_convert(&self, _: DataFormat) -> Option<BufferRequirements> {
        Some(BufferRequirements::value())
    }

    fn get_size(&self, context: SizeContext, value: &Json<T>, state: &mut Option<WriteState>) -> Result<Size> {
        let json = serde_json::to_vec(value)?;
        let len = json.len() + self.has_version(context.format) as usize;
        let size = i32::try_from(len)
            .map(Size::create)
            .map_err(|_|Error::unsupported("json value too large"))?;
        *state = Some(Box::new(JsonWriteState(json.into())));
        Ok(size)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<Json<T>>> {
        Box::pin(async move {
            if self.has_version(reader.format()) {
                if reader.should_buffer(1) {
                    reader.buffer(mode, 1).await?;
                }
                let version = reader.read_u8();
                if version != JSONB_VERSION {
                    return Err(Error::unsupported(format!("unsupported jsonb version {version}")));
                }
            }
            let bytes = reader.read_remaining(mode).await?;
            Ok(serde_json::from_slice(&bytes)?)
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, _: &'a Json<T>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let JsonWriteState(json) = writer.take_write_state()?;
            if self.has_version(writer.current().format) {
                writer.ensure(mode, 1).await?;
                writer.write_u8(JSONB_VERSION);
            }
            writer.write_bytes(mode, &json).await
        })
    }
}

impl<T> std::fmt::Debug for JsonConverter<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonConverter")
            .field("jsonb", &self.jsonb)
            .field("host_type", &std::any::type_name::<T>())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{io::run_sync, transport::MemoryTransport};
    use serde_json::{Value, json};

    #[test]
    fn jsonb_version_byte() {
        let value = Json(json!({ "id": 420, "tags": ["a", null] }));
        let io = MemoryTransport::sink();
        let sink = io.output();
        let mut w = PgWriter::new(io);
        run_sync(w.write_value(IoMode::Blocking, &JsonConverter::jsonb(), &value)).unwrap();
        run_sync(w.write_value_as(IoMode::Blocking, &JsonConverter::jsonb(), &value, DataFormat::Text)).unwrap();
        run_sync(w.send(IoMode::Blocking)).unwrap();

        let bytes = sink.take();
        assert_eq!(bytes[4], JSONB_VERSION);

        let mut r = PgReader::new(MemoryTransport::new(bytes).chunks([3]));
        let binary = run_sync(r.read_value(IoMode::Blocking, &JsonConverter::<Value>::jsonb())).unwrap();
        let text = run_sync(r.read_value_as(IoMode::Blocking, &JsonConverter::<Value>::jsonb(), DataFormat::Text)).unwrap();
        assert_eq!(binary.as_ref(), Some(&value));
        assert_eq!(text, Some(value));
    }

    #[test]
    fn unknown_jsonb_version() {
        let mut r = PgReader::new(MemoryTransport::new(&b"\0\0\0\x03\x02{}"[..]));
        let err = run_sync(r.read_value(IoMode::Blocking, &JsonConverter::<Value>::jsonb())).unwrap_err();
        assert!(err.is_unsupported());
    }
}
