//! Logical replication tuple values.
//!
//! pgoutput sends the columns of an inserted, updated or deleted row as
//! `TupleData`, a column count followed by a kind byte per column:
//!
//! - `n`, null
//! - `u`, unchanged TOASTed value, the actual value is not sent
//! - `t`, text formatted value
//! - `b`, binary formatted value
//!
//! <https://www.postgresql.org/docs/current/protocol-logicalrep-message-formats.html>
use std::fmt;

use crate::{
    Error, IoMode, PgConverter, PgReader, Result, SerializerOptions,
    common::verbose,
    object::AnyValue,
    postgres::{DataFormat, Field},
    reader::ColumnStream,
    row::{DecodeError, field_resolution, null_or, object_field_resolution},
};

/// Kind of a replicated column value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TupleDataKind {
    Null,
    UnchangedToasted,
    Text,
    Binary,
}

impl TupleDataKind {
    pub const fn from_tag(tag: u8) -> Option<TupleDataKind> {
        match tag {
            b'n' => Some(TupleDataKind::Null),
            b'u' => Some(TupleDataKind::UnchangedToasted),
            b't' => Some(TupleDataKind::Text),
            b'b' => Some(TupleDataKind::Binary),
            _ => None,
        }
    }

    pub const fn tag(self) -> u8 {
        match self {
            TupleDataKind::Null => b'n',
            TupleDataKind::UnchangedToasted => b'u',
            TupleDataKind::Text => b't',
            TupleDataKind::Binary => b'b',
        }
    }

    const fn format(self) -> DataFormat {
        match self {
            TupleDataKind::Binary => DataFormat::Binary,
            _ => DataFormat::Text,
        }
    }
}

/// Sequential reader of a `TupleData` section.
///
/// Values are handed out in column order. A value left unread is skipped when
/// the next one is requested or the reader is finished.
pub struct TupleReader<'r> {
    reader: &'r mut PgReader,
    fields: &'r [Field],
    options: &'r SerializerOptions,
    next: usize,
    /// Bytes of the last value not consumed yet.
    unread: usize,
}

impl<'r> TupleReader<'r> {
    /// Start reading `TupleData`, positioned at its column count.
    ///
    /// `fields` are the columns of the relation, from the preceding `Relation` message.
    pub async fn new(
        mode: IoMode,
        reader: &'r mut PgReader,
        fields: &'r [Field],
        options: &'r SerializerOptions,
    ) -> Result<TupleReader<'r>> {
        reader.buffer(mode, 2).await?;
        let count = reader.read_i16();
        if usize::try_from(count).ok() != Some(fields.len()) {
            return Err(DecodeError::ColumnCount { expected: fields.len(), actual: count }.into());
        }
        Ok(TupleReader { reader, fields, options, next: 0, unread: 0 })
    }

    pub fn fields(&self) -> &[Field] {
        self.fields
    }

    /// Returns the next column value, [`None`] after the last column.
    pub async fn next_value(&mut self, mode: IoMode) -> Result<Option<ReplicationValue<'_, 'r>>> {
        self.consume(mode).await?;
        if self.next == self.fields.len() {
            return Ok(None);
        }

        self.reader.buffer(mode, 1).await?;
        let tag = self.reader.read_u8();
        let kind = TupleDataKind::from_tag(tag).ok_or(DecodeError::InvalidTupleKind(tag))?;

        let len = match kind {
            TupleDataKind::Null | TupleDataKind::UnchangedToasted => 0,
            TupleDataKind::Text | TupleDataKind::Binary => {
                self.reader.buffer(mode, 4).await?;
                let len = self.reader.read_i32();
                usize::try_from(len).map_err(|_|DecodeError::InvalidLength(len))?
            }
        };

        let index = self.next;
        self.next += 1;
        self.unread = len;
        verbose!(index, len, "tuple value");
        Ok(Some(ReplicationValue { tuple: self, index, kind, len }))
    }

    /// Skip every remaining value.
    pub async fn finish(mut self, mode: IoMode) -> Result<()> {
        while self.next_value(mode).await?.is_some() { }
        Ok(())
    }

    async fn consume(&mut self, mode: IoMode) -> Result<()> {
        if self.unread != 0 {
            let n = std::mem::take(&mut self.unread);
            self.reader.skip(mode, n).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for TupleReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TupleReader")
            .field("columns", &self.fields.len())
            .field("next", &self.next)
            .field("unread", &self.unread)
            .finish()
    }
}

/// A column value of a replicated row.
///
/// Reading consumes the value, so it is read at most once.
pub struct ReplicationValue<'a, 'r> {
    tuple: &'a mut TupleReader<'r>,
    index: usize,
    kind: TupleDataKind,
    len: usize,
}

impl<'a> ReplicationValue<'a, '_> {
    pub fn field(&self) -> &Field {
        &self.tuple.fields[self.index]
    }

    pub const fn kind(&self) -> TupleDataKind {
        self.kind
    }

    /// Value length, zero for null and unchanged values.
    pub const fn len(&self) -> usize {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub const fn is_db_null(&self) -> bool {
        matches!(self.kind, TupleDataKind::Null)
    }

    /// Returns `true` if the value is an unchanged TOASTed value, which is not sent.
    pub const fn is_unchanged_toasted(&self) -> bool {
        matches!(self.kind, TupleDataKind::UnchangedToasted)
    }

    /// Convert the value.
    ///
    /// Database null is converted to the converter null value, like [`None`] for
    /// [`Option<T>`], otherwise it returns [`DecodeError::Null`].
    pub async fn get<T: Send + Sync + 'static>(self, mode: IoMode) -> Result<T> {
        let (fields, options) = (self.tuple.fields, self.tuple.options);
        let context = format!("column {:?}", fields[self.index].name());
        let res = field_resolution::<T>(options, &fields[self.index]).map_err(|e|e.with_context(context.clone()))?;

        let value = match self.payload() {
            Ok(Some(format)) => self.read(mode, &*res.converter, format).await.map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        value
            .and_then(|value|null_or(value, &*res.converter))
            .map_err(|e|e.with_context(context))
    }

    /// Convert the value with the default converter of its data type.
    ///
    /// Returns [`None`] if the value is database null.
    pub async fn get_object(self, mode: IoMode) -> Result<Option<AnyValue>> {
        let (fields, options) = (self.tuple.fields, self.tuple.options);
        let context = format!("column {:?}", fields[self.index].name());
        let res = object_field_resolution(options, &fields[self.index]).map_err(|e|e.with_context(context.clone()))?;

        let value = match self.payload() {
            Ok(Some(format)) => self.read(mode, &*res.converter, format).await.map(Some),
            Ok(None) => Ok(None),
            Err(err) => Err(err),
        };
        value.map_err(|e|e.with_context(context))
    }

    /// Open a byte stream over the value.
    ///
    /// Returns [`None`] if the value is database null.
    pub async fn stream(self, mode: IoMode) -> Result<Option<ColumnStream<'a>>> {
        if self.payload()?.is_none() {
            return Ok(None);
        }
        let tuple = self.tuple;
        let len = std::mem::take(&mut tuple.unread);
        tuple.reader.open_stream(mode, len).await.map(Some)
    }

    /// Returns the format if the value carries bytes.
    fn payload(&self) -> Result<Option<DataFormat>> {
        match self.kind {
            TupleDataKind::Null => Ok(None),
            TupleDataKind::UnchangedToasted => Err(DecodeError::UnchangedToasted.into()),
            kind => Ok(Some(kind.format())),
        }
    }

    async fn read<T: 'static>(
        self,
        mode: IoMode,
        converter: &dyn PgConverter<T>,
        format: DataFormat,
    ) -> Result<T> {
        let tuple = self.tuple;
        let len = std::mem::take(&mut tuple.unread);
        let requirement = converter
            .can_convert(format)
            .ok_or_else(||Error::unsupported(format!(
                "{} does not support {format:?} format", converter.type_name()
            )))?;

        let mut scope = tuple.reader.begin_nested_read_as(mode, len as i32, requirement.read(), format).await?;
        let value = converter.read(mode, &mut scope).await?;
        scope.finish(mode).await?;
        Ok(value)
    }
}

impl fmt::Debug for ReplicationValue<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicationValue")
            .field("field", self.field())
            .field("kind", &self.kind)
            .field("len", &self.len)
            .finish()
    }
}

#[cfg(test)]
mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::{
        error::ErrorKind,
        io::run_sync,
        postgres::oids,
        transport::MemoryTransport,
    };

    fn fields() -> Vec<Field> {
        vec![
            Field::new("id", oids::INT4, -1),
            Field::new("body", oids::TEXT, -1),
            Field::new("deleted", oids::BOOL, -1),
            Field::new("title", oids::TEXT, -1),
        ]
    }

    fn tuple_data() -> Vec<u8> {
        let mut b = BytesMut::new();
        b.put_i16(4);
        b.put_u8(b'b');
        b.put_i32(4);
        b.put_i32(7);
        b.put_u8(b'u');
        b.put_u8(b'n');
        b.put_u8(b't');
        b.put_i32(5);
        b.put(&b"hello"[..]);
        b.put_u8(b'!');
        b.to_vec()
    }

    #[test]
    fn kinds_and_values() {
        let fields = fields();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(tuple_data()).chunks([1]));
        let mode = IoMode::Blocking;

        run_sync(async {
            let mut tuple = TupleReader::new(mode, &mut r, &fields, &options).await?;

            let id = tuple.next_value(mode).await?.unwrap();
            assert_eq!(id.kind(), TupleDataKind::Binary);
            assert_eq!(id.get::<i32>(mode).await?, 7);

            let body = tuple.next_value(mode).await?.unwrap();
            assert!(body.is_unchanged_toasted());
            let err = body.get::<String>(mode).await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::UnchangedToasted)));
            assert_eq!(err.context(), "column \"body\"");

            let deleted = tuple.next_value(mode).await?.unwrap();
            assert!(deleted.is_db_null());
            assert_eq!(deleted.get::<Option<bool>>(mode).await?, None);

            let title = tuple.next_value(mode).await?.unwrap();
            assert_eq!(title.get::<String>(mode).await?, "hello");

            assert!(tuple.next_value(mode).await?.is_none());
            Ok::<_, Error>(())
        }).unwrap();

        run_sync(r.buffer(mode, 1)).unwrap();
        assert_eq!(r.read_u8(), b'!');
    }

    #[test]
    fn unread_values_are_skipped() {
        let fields = fields();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(tuple_data()).chunks([3]));
        let mode = IoMode::Blocking;

        run_sync(async {
            let mut tuple = TupleReader::new(mode, &mut r, &fields, &options).await?;
            let id = tuple.next_value(mode).await?.unwrap();
            assert_eq!(id.len(), 4);
            drop(id);

            let title = loop {
                let value = tuple.next_value(mode).await?.unwrap();
                if value.field().name() == "title" {
                    break value.get_object(mode).await?;
                }
            };
            assert_eq!(title.and_then(|v|v.downcast::<String>().ok()).as_deref().map(String::as_str), Some("hello"));
            tuple.finish(mode).await
        }).unwrap();

        run_sync(r.buffer(mode, 1)).unwrap();
        assert_eq!(r.read_u8(), b'!');
    }

    #[test]
    fn invalid_kind() {
        let fields = fields();
        let fields = &fields[..1];
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(&b"\0\x01x"[..]));
        let mode = IoMode::Blocking;

        let err = run_sync(async {
            let mut tuple = TupleReader::new(mode, &mut r, fields, &options).await?;
            tuple.next_value(mode).await.map(|_|())
        }).unwrap_err();
        assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::InvalidTupleKind(b'x'))));
    }

    #[tokio::test]
    async fn stream_text_value() {
        let fields = fields();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(tuple_data()).chunks([2]).pending(true));
        let mode = IoMode::Async;

        let mut tuple = TupleReader::new(mode, &mut r, &fields, &options).await.unwrap();
        for _ in 0..3 {
            tuple.next_value(mode).await.unwrap();
        }
        let title = tuple.next_value(mode).await.unwrap().unwrap();
        let mut stream = title.stream(mode).await.unwrap().unwrap();
        let out = stream.read_to_end(mode).await.unwrap();
        assert_eq!(out, &b"hello"[..]);
        drop(stream);
        tuple.finish(mode).await.unwrap();

        r.buffer(mode, 1).await.unwrap();
        assert_eq!(r.read_u8(), b'!');
    }
}
