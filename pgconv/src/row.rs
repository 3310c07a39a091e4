//! Postgres row operation.
//!
//! - [`RowDescription`]
//! - [`FieldDescription`]
//! - [`RowReader`]
//!
//! - [`ColumnIndex`]
//! - [`DecodeError`]
use bytes::{Buf, Bytes, TryGetError};
use std::{borrow::Cow, fmt, str::Utf8Error, string::FromUtf8Error};

use crate::{
    Error, IoMode, PgConverter, PgReader, Result, SerializerOptions,
    common::verbose,
    ext::BytesExt,
    object::AnyValue,
    postgres::{DataFormat, Field, Oid, PgTypeId},
    reader::ColumnStream,
    resolver::Resolution,
};

/// Resolve the converter of `T` for a column.
///
/// The data type name is looked up in the catalog, so nullable and resolver
/// mappings of that name are found.
pub(crate) fn field_resolution<T: Send + Sync + 'static>(
    options: &SerializerOptions,
    field: &Field,
) -> Result<Resolution<T>> {
    let name = options.catalog().get(field.type_id()).map(|e|e.name().clone());
    let info = options.get_type_info::<T>(name.as_ref())?;
    info.get_field_resolution(field)
}

/// Resolve the default converter of a column, boxed.
pub(crate) fn object_field_resolution(options: &SerializerOptions, field: &Field) -> Result<Resolution<AnyValue>> {
    let Some(entry) = options.catalog().get(field.type_id()) else {
        return Err(Error::unsupported(format!(
            "unknown data type {:?} of column {:?}", field.type_id(), field.name()
        )));
    };
    let info = options.object_type_info(None, Some(entry.name().as_str()))?;
    info.object_field_resolution(field)
}

/// Read the value of a column after its length, mapping null to the converter null value.
pub(crate) fn null_or<T: 'static>(value: Option<T>, converter: &dyn PgConverter<T>) -> Result<T> {
    match value {
        Some(value) => Ok(value),
        None => converter.db_null_value().ok_or_else(||DecodeError::Null.into()),
    }
}

fn column_context(field: &Field) -> String {
    format!("column {:?}", field.name())
}

// <https://www.postgresql.org/docs/current/protocol-message-formats.html#PROTOCOL-MESSAGE-FORMATS-ROWDESCRIPTION>

/// A column of a `RowDescription` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDescription {
    field: Field,
    table_oid: Oid,
    column_id: i16,
    type_size: i16,
    format: DataFormat,
}

impl FieldDescription {
    /// Returns the column name, type id and type modifier.
    pub const fn field(&self) -> &Field {
        &self.field
    }

    pub fn name(&self) -> &str {
        self.field.name()
    }

    /// Returns column data type [`Oid`].
    pub fn type_oid(&self) -> Oid {
        match self.field.type_id() {
            PgTypeId::Oid(oid) => *oid,
            PgTypeId::DataTypeName(_) => 0,
        }
    }

    /// Oid of the table the column belongs to, or zero.
    pub const fn table_oid(&self) -> Oid {
        self.table_oid
    }

    /// Attribute number of the column in its table, or zero.
    pub const fn column_id(&self) -> i16 {
        self.column_id
    }

    /// Data type size, negative for variable width types.
    pub const fn type_size(&self) -> i16 {
        self.type_size
    }

    /// Format the column values are sent in.
    pub const fn format(&self) -> DataFormat {
        self.format
    }
}

/// Columns of a result set, parsed from a `RowDescription` message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RowDescription {
    fields: Vec<FieldDescription>,
}

impl RowDescription {
    pub fn new(fields: Vec<FieldDescription>) -> RowDescription {
        RowDescription { fields }
    }

    /// Parse a `RowDescription` message body, without the tag and length.
    pub fn parse(mut body: Bytes) -> Result<RowDescription, DecodeError> {
        let len = body.try_get_i16()?;
        let len = usize::try_from(len).map_err(|_|DecodeError::InvalidLength(len.into()))?;

        let mut fields = Vec::with_capacity(len);
        for _ in 0..len {
            let name = body.get_nul_bytestr()?;
            let table_oid = body.try_get_u32()?;
            let column_id = body.try_get_i16()?;
            let type_oid = body.try_get_u32()?;
            let type_size = body.try_get_i16()?;
            let type_modifier = body.try_get_i32()?;
            let format = body.try_get_i16()?;
            let format = DataFormat::from_code(format).ok_or(DecodeError::InvalidFormat(format))?;

            fields.push(FieldDescription {
                field: Field::new(name, type_oid, type_modifier),
                table_oid,
                column_id,
                type_size,
                format,
            });
        }

        verbose!(len, "row description parsed");
        Ok(RowDescription { fields })
    }

    pub fn fields(&self) -> &[FieldDescription] {
        &self.fields
    }

    /// Returns `true` if row contains no columns.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Returns the number of fields/column.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn get(&self, index: impl ColumnIndex) -> Option<&FieldDescription> {
        let i = index.position(self).ok()?;
        self.fields.get(i)
    }
}

/// Sequential reader of a `DataRow` message.
///
/// Columns are read in ascending order, columns in between are skipped. A
/// column can only be read once. Call [`finish`][RowReader::finish] to skip
/// the rest of the row before reading the next message.
pub struct RowReader<'r> {
    reader: &'r mut PgReader,
    description: &'r RowDescription,
    options: &'r SerializerOptions,
    next: usize,
}

impl<'r> RowReader<'r> {
    /// Start reading a `DataRow` message body, positioned at its column count.
    pub async fn new(
        mode: IoMode,
        reader: &'r mut PgReader,
        description: &'r RowDescription,
        options: &'r SerializerOptions,
    ) -> Result<RowReader<'r>> {
        reader.buffer(mode, 2).await?;
        let count = reader.read_i16();
        if usize::try_from(count).ok() != Some(description.len()) {
            return Err(DecodeError::ColumnCount { expected: description.len(), actual: count }.into());
        }
        Ok(RowReader { reader, description, options, next: 0 })
    }

    pub fn description(&self) -> &RowDescription {
        self.description
    }

    /// Returns the index of the next unread column.
    pub fn position(&self) -> usize {
        self.next
    }

    /// Read and convert a column.
    ///
    /// Database null is converted to the converter null value, like [`None`] for
    /// [`Option<T>`], otherwise it returns [`DecodeError::Null`].
    pub async fn get<T: Send + Sync + 'static>(&mut self, mode: IoMode, index: impl ColumnIndex) -> Result<T> {
        let description = self.description;
        let i = index.position(description)?;
        let field = &description.fields[i];
        let res = field_resolution::<T>(self.options, &field.field)
            .map_err(|e|e.with_context(column_context(&field.field)))?;

        self.advance_to(mode, i).await?;
        let value = self.reader.read_value_as(mode, &*res.converter, field.format).await;
        value
            .and_then(|value|null_or(value, &*res.converter))
            .map_err(|e|e.with_context(column_context(&field.field)))
    }

    /// Read a column with the default converter of its data type.
    ///
    /// Returns [`None`] if the value is database null.
    pub async fn get_object(&mut self, mode: IoMode, index: impl ColumnIndex) -> Result<Option<AnyValue>> {
        let description = self.description;
        let i = index.position(description)?;
        let field = &description.fields[i];
        let res = object_field_resolution(self.options, &field.field)
            .map_err(|e|e.with_context(column_context(&field.field)))?;

        self.advance_to(mode, i).await?;
        self.reader
            .read_value_as(mode, &*res.converter, field.format)
            .await
            .map_err(|e|e.with_context(column_context(&field.field)))
    }

    /// Open a byte stream over a column.
    ///
    /// Returns [`None`] if the value is database null.
    pub async fn stream(&mut self, mode: IoMode, index: impl ColumnIndex) -> Result<Option<ColumnStream<'_>>> {
        let i = index.position(self.description)?;
        self.advance_to(mode, i).await?;

        self.reader.buffer(mode, 4).await?;
        let len = self.reader.read_i32();
        match len {
            -1 => Ok(None),
            i32::MIN..=-2 => Err(DecodeError::InvalidLength(len).into()),
            len => self.reader.open_stream(mode, len as usize).await.map(Some),
        }
    }

    /// Skip every unread column.
    pub async fn finish(mut self, mode: IoMode) -> Result<()> {
        let len = self.description.len();
        self.skip_to(mode, len).await
    }

    /// Skip to `index` and mark it read.
    async fn advance_to(&mut self, mode: IoMode, index: usize) -> Result<()> {
        if index < self.next {
            return Err(DecodeError::ColumnConsumed(index).into());
        }
        self.skip_to(mode, index).await?;
        self.next += 1;
        Ok(())
    }

    async fn skip_to(&mut self, mode: IoMode, index: usize) -> Result<()> {
        while self.next < index {
            self.reader.buffer(mode, 4).await?;
            let len = self.reader.read_i32();
            match len {
                -1 | 0 => {}
                i32::MIN..=-2 => return Err(DecodeError::InvalidLength(len).into()),
                len => self.reader.skip(mode, len as usize).await?,
            }
            verbose!(column = self.next, len, "column skipped");
            self.next += 1;
        }
        Ok(())
    }
}

impl fmt::Debug for RowReader<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowReader")
            .field("columns", &self.description.len())
            .field("next", &self.next)
            .finish()
    }
}

// ===== Traits =====

/// Type that can be used for indexing column.
pub trait ColumnIndex: Sized + sealed::Sealed {
    /// Returns the position of the column.
    fn position(self, description: &RowDescription) -> Result<usize, DecodeError>;
}

impl ColumnIndex for usize {
    fn position(self, description: &RowDescription) -> Result<usize, DecodeError> {
        match self < description.len() {
            true => Ok(self),
            false => Err(DecodeError::IndexOutOfBounds(self)),
        }
    }
}

impl ColumnIndex for &str {
    fn position(self, description: &RowDescription) -> Result<usize, DecodeError> {
        description
            .fields
            .iter()
            .position(|f|f.name() == self)
            .ok_or_else(||DecodeError::ColumnNotFound(String::from(self).into()))
    }
}

mod sealed {
    pub trait Sealed { }
    impl Sealed for usize { }
    impl Sealed for &str { }
}

macro_rules! from {
    (<$ty:ty>$pat:pat => $body:expr) => {
        impl From<$ty> for DecodeError {
            fn from($pat: $ty) -> Self {
                $body
            }
        }
    };
}

/// An error when decoding row, tuple or column.
pub enum DecodeError {
    /// Postgres return non utf8 string.
    Utf8(Utf8Error),
    /// Message ended before all of its fields.
    Truncated,
    /// Negative length other than null.
    InvalidLength(i32),
    /// Unknown format code.
    InvalidFormat(i16),
    /// Unknown replication tuple value kind.
    InvalidTupleKind(u8),
    /// Column count does not match the description.
    ColumnCount { expected: usize, actual: i16 },
    /// Column requested not found.
    ColumnNotFound(Cow<'static,str>),
    /// Index requested is out of bounds.
    IndexOutOfBounds(usize),
    /// Column was already read or skipped.
    ColumnConsumed(usize),
    /// Value is null and the host type has no null value.
    Null,
    /// Replication value is an unchanged TOASTed value, which is not sent.
    UnchangedToasted,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("failed to decode value, ")?;
        match self {
            Self::Utf8(e) => write!(f, "{e}"),
            Self::Truncated => write!(f, "message truncated"),
            Self::InvalidLength(len) => write!(f, "invalid length {len}"),
            Self::InvalidFormat(code) => write!(f, "invalid format code {code}"),
            Self::InvalidTupleKind(kind) => write!(f, "invalid tuple value kind {:?}", *kind as char),
            Self::ColumnCount { expected, actual } => {
                write!(f, "expected {expected} columns, message has {actual}")
            }
            Self::ColumnNotFound(name) => write!(f, "column not found: {name:?}"),
            Self::IndexOutOfBounds(u) => write!(f, "index out of bounds: {u:?}"),
            Self::ColumnConsumed(u) => write!(f, "column {u} already consumed"),
            Self::Null => write!(f, "unexpected NULL value"),
            Self::UnchangedToasted => write!(f, "unchanged TOASTed value, actual value not sent"),
        }
    }
}

from!(<Utf8Error>e => Self::Utf8(e));
from!(<FromUtf8Error>e => Self::Utf8(e.utf8_error()));
from!(<TryGetError>_ => Self::Truncated);

impl std::error::Error for DecodeError { }

impl fmt::Debug for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{self}\"")
    }
}

#[cfg(test)]
pub(crate) mod test {
    use bytes::{BufMut, BytesMut};

    use super::*;
    use crate::{
        error::ErrorKind,
        io::run_sync,
        postgres::oids,
        transport::MemoryTransport,
    };

    pub(crate) fn description(fields: &[(&str, Oid)]) -> Bytes {
        let mut b = BytesMut::new();
        b.put_i16(fields.len() as i16);
        for (i, (name, oid)) in fields.iter().enumerate() {
            b.put(name.as_bytes());
            b.put_u8(0);
            b.put_u32(16_500);
            b.put_i16(i as i16 + 1);
            b.put_u32(*oid);
            b.put_i16(-1);
            b.put_i32(-1);
            b.put_i16(1);
        }
        b.freeze()
    }

    fn data_row(values: &[Option<&[u8]>], sentinel: u8) -> Vec<u8> {
        let mut b = BytesMut::new();
        b.put_i16(values.len() as i16);
        for value in values {
            match value {
                Some(v) => {
                    b.put_i32(v.len() as i32);
                    b.put(*v);
                }
                None => b.put_i32(-1),
            }
        }
        b.put_u8(sentinel);
        b.to_vec()
    }

    fn fixture() -> (RowDescription, Vec<u8>) {
        let desc = RowDescription::parse(description(&[
            ("id", oids::INT4),
            ("name", oids::TEXT),
            ("flag", oids::BOOL),
            ("note", oids::TEXT),
        ])).unwrap();
        let row = data_row(&[Some(&[0, 0, 1, 164]), Some(b"abc"), None, Some(b"x")], b'!');
        (desc, row)
    }

    #[test]
    fn parse_description() {
        let (desc, _) = fixture();
        assert_eq!(desc.len(), 4);
        let name = desc.get("name").unwrap();
        assert_eq!(name.type_oid(), oids::TEXT);
        assert_eq!(name.column_id(), 2);
        assert_eq!(name.format(), DataFormat::Binary);
        assert!(desc.get(4).is_none());

        let body = description(&[("id", oids::INT4)]);
        let err = RowDescription::parse(body.slice(..body.len() - 1)).unwrap_err();
        assert!(matches!(err, DecodeError::Truncated));
    }

    #[test]
    fn skips_unread_columns() {
        let (desc, row) = fixture();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(row).chunks([1]));
        let mode = IoMode::Blocking;

        run_sync(async {
            let mut row = RowReader::new(mode, &mut r, &desc, &options).await?;
            assert_eq!(row.get::<String>(mode, "name").await?, "abc");
            assert_eq!(row.get::<Option<bool>>(mode, 2).await?, None);

            let err = row.get::<i32>(mode, "id").await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::ColumnConsumed(0))));

            row.finish(mode).await
        }).unwrap();

        run_sync(r.buffer(mode, 1)).unwrap();
        assert_eq!(r.read_u8(), b'!');
    }

    #[test]
    fn null_into_non_nullable_is_an_error() {
        let (desc, row) = fixture();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(row));
        let mode = IoMode::Blocking;

        run_sync(async {
            let mut row = RowReader::new(mode, &mut r, &desc, &options).await?;
            let err = row.get::<bool>(mode, "flag").await.unwrap_err();
            assert!(matches!(err.kind(), ErrorKind::Decode(DecodeError::Null)));
            assert_eq!(err.context(), "column \"flag\"");

            let err = row.get::<i64>(mode, "note").await.unwrap_err();
            assert!(err.is_unsupported());
            assert_eq!(row.get::<String>(mode, "note").await?, "x");
            row.finish(mode).await
        }).unwrap();
    }

    #[test]
    fn object_column() {
        let (desc, row) = fixture();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(row));
        let mode = IoMode::Blocking;

        let (id, flag) = run_sync(async {
            let mut row = RowReader::new(mode, &mut r, &desc, &options).await?;
            let id = row.get_object(mode, 0).await?;
            let flag = row.get_object(mode, "flag").await?;
            row.finish(mode).await?;
            Ok::<_, Error>((id, flag))
        }).unwrap();

        assert_eq!(id.and_then(|v|v.downcast::<i32>().ok()).map(|v|*v), Some(420));
        assert!(flag.is_none());
    }

    #[tokio::test]
    async fn stream_column() {
        use tokio::io::AsyncReadExt;

        let (desc, row) = fixture();
        let options = SerializerOptions::default();
        let mut r = PgReader::new(MemoryTransport::new(row).chunks([2]).pending(true));
        let mode = IoMode::Async;

        let mut row = RowReader::new(mode, &mut r, &desc, &options).await.unwrap();
        let mut out = String::new();
        row.stream(mode, 1).await.unwrap().unwrap().read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "abc");
        assert!(row.stream(mode, "flag").await.unwrap().is_none());

        let note = row.stream(mode, 3).await.unwrap().unwrap();
        assert_eq!(note.len(), 1);
        drop(note);
        row.finish(mode).await.unwrap();

        r.buffer(mode, 1).await.unwrap();
        assert_eq!(r.read_u8(), b'!');
    }
}
