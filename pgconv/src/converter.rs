//! The [`PgConverter`] trait.
//!
//! A converter is the codec of one host type against the wire format. Converters
//! are written once as futures parameterized by [`IoMode`], so the blocking and
//! the suspending paths share the same framing code.
use futures_core::future::BoxFuture;
use std::{
    any::{Any, TypeId},
    fmt,
    sync::Arc,
};

use crate::{
    Error, IoMode, PgReader, PgWriter, Result,
    io::run_sync,
    postgres::DataFormat,
    size::{BufferRequirements, Size, SizeContext},
};

/// Per value data computed by [`PgConverter::get_size`] and consumed by
/// [`PgConverter::write`] of the same value.
///
/// Never shared, never reused across values.
pub type WriteState = Box<dyn Any + Send>;

/// A shared converter.
///
/// Composing resolvers cache wrappers by the identity of this allocation, see
/// [`converter_key`].
pub type DynConverter<T> = Arc<dyn PgConverter<T>>;

/// Identity of a shared converter allocation.
pub fn converter_key<T>(converter: &DynConverter<T>) -> usize {
    Arc::as_ptr(converter) as *const () as usize
}

/// How a converter represents database null in its host type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DbNullPredicate {
    /// Host type cannot represent null.
    #[default]
    None,
    /// Host type has a null value, e.g. [`Option::None`].
    Null,
    /// Converter decides per value with [`PgConverter::is_db_null_value`].
    Custom,
}

/// Runtime identity of a host type.
#[derive(Clone, Copy)]
pub struct HostType {
    id: TypeId,
    name: &'static str,
}

impl HostType {
    pub fn of<T: ?Sized + 'static>() -> HostType {
        HostType { id: TypeId::of::<T>(), name: std::any::type_name::<T>() }
    }

    pub const fn id(&self) -> TypeId {
        self.id
    }

    pub const fn name(&self) -> &'static str {
        self.name
    }

    pub fn is<T: ?Sized + 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for HostType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HostType { }

impl std::hash::Hash for HostType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

impl fmt::Debug for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HostType({})", self.name)
    }
}

/// Codec for host type `T`.
///
/// # Contract
///
/// - [`get_size`][PgConverter::get_size] performs no io, the size it returns must
///   match exactly what [`write`][PgConverter::write] emits for the same value and
///   state, or bound it for [`SizeKind::UpperBound`][crate::size::SizeKind::UpperBound].
/// - [`read`][PgConverter::read] is called inside a nested read scope of exactly the value
///   length, unconsumed bytes are skipped by the caller.
/// - Suspension only happens inside cursor primitives.
///
/// Converters that require the whole value resident declare an exact or upper
/// bound read requirement and never suspend.
pub trait PgConverter<T>: Send + Sync + 'static {
    /// Returns the buffer requirements for `format`, or [`None`] if unsupported.
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements>;

    fn db_null_predicate(&self) -> DbNullPredicate {
        DbNullPredicate::None
    }

    /// Returns `true` if `value` is database null.
    ///
    /// Only called when [`db_null_predicate`][PgConverter::db_null_predicate] is not
    /// [`DbNullPredicate::None`].
    fn is_db_null_value(&self, value: &T) -> bool {
        let _ = value;
        false
    }

    /// Returns the host value for a database null read by an enclosing
    /// converter, e.g. a null array element.
    ///
    /// Returns [`None`] if the host type cannot represent null.
    fn db_null_value(&self) -> Option<T> {
        None
    }

    /// Compute the encoded length of `value`.
    fn get_size(&self, context: SizeContext, value: &T, state: &mut Option<WriteState>) -> Result<Size>;

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<T>>;

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a T) -> BoxFuture<'a, Result<()>>;

    /// Returns the host type this converter converts.
    ///
    /// Converters over type erased values report the erased type.
    fn host_type(&self) -> HostType
    where
        T: 'static,
    {
        HostType::of::<T>()
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Result of [`ConverterExt::prepare`].
///
/// Move only, consumed by [`PgWriter::write_prepared`].
pub struct PreparedWrite {
    pub(crate) format: DataFormat,
    pub(crate) size: Option<Size>,
    pub(crate) state: Option<WriteState>,
}

impl PreparedWrite {
    pub const fn format(&self) -> DataFormat {
        self.format
    }

    /// Returns the value size, or [`None`] for database null.
    pub const fn size(&self) -> Option<Size> {
        self.size
    }

    pub const fn is_db_null(&self) -> bool {
        self.size.is_none()
    }
}

impl fmt::Debug for PreparedWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedWrite")
            .field("format", &self.format)
            .field("size", &self.size)
            .field("state", &self.state.is_some())
            .finish()
    }
}

/// An extension trait to provide derived operations for [`PgConverter`].
pub trait ConverterExt<T>: PgConverter<T> {
    /// Returns `true` if `value` is database null.
    fn is_db_null(&self, value: &T) -> bool {
        match self.db_null_predicate() {
            DbNullPredicate::None => false,
            DbNullPredicate::Null | DbNullPredicate::Custom => self.is_db_null_value(value),
        }
    }

    /// Returns [`None`] if `value` is database null, otherwise its size.
    ///
    /// An exact buffer requirement is the size itself, `get_size` is not called.
    fn get_size_or_db_null(
        &self,
        context: SizeContext,
        value: &T,
        state: &mut Option<WriteState>,
    ) -> Result<Option<Size>> {
        if self.is_db_null(value) {
            return Ok(None);
        }
        if context.buffer_requirement.is_exact() {
            return Ok(Some(context.buffer_requirement));
        }
        self.get_size(context, value, state).map(Some)
    }

    /// Same as [`can_convert`][PgConverter::can_convert], returns
    /// [`UnsupportedError`][crate::error::UnsupportedError] if unsupported.
    fn buffer_requirements(&self, format: DataFormat) -> Result<BufferRequirements> {
        self.can_convert(format).ok_or_else(||Error::unsupported(format!(
            "converter for {} does not support {format:?} format", self.type_name()
        )))
    }

    /// Measure `value` for a later [`PgWriter::write_prepared`].
    fn prepare(&self, format: DataFormat, value: &T) -> Result<PreparedWrite> {
        let requirement = self.buffer_requirements(format)?.write();
        let mut state = None;
        let size = self.get_size_or_db_null(SizeContext::new(format, requirement), value, &mut state)?;
        Ok(PreparedWrite { format, size, state })
    }

    /// Read with [`IoMode::Blocking`].
    fn read_sync(&self, reader: &mut PgReader) -> Result<T> {
        run_sync(self.read(IoMode::Blocking, reader))
    }

    /// Write with [`IoMode::Blocking`].
    fn write_sync(&self, writer: &mut PgWriter, value: &T) -> Result<()> {
        run_sync(self.write(IoMode::Blocking, writer, value))
    }
}

impl<T, C> ConverterExt<T> for C where C: PgConverter<T> + ?Sized { }

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_type_identity() {
        let a = HostType::of::<i32>();
        assert!(a.is::<i32>());
        assert!(!a.is::<i64>());
        assert_eq!(a, HostType::of::<i32>());
        assert_eq!(a.to_string(), "i32");
    }

    #[test]
    fn converter_identity() {
        let a: DynConverter<i32> = Arc::new(crate::converters::Int4Converter);
        let b: DynConverter<i32> = Arc::new(crate::converters::Int4Converter);
        assert_eq!(converter_key(&a), converter_key(&a.clone()));
        assert_ne!(converter_key(&a), converter_key(&b));
    }
}
