use futures_core::future::BoxFuture;
use std::{
    fmt,
    marker::PhantomData,
    ops::{self, Bound},
    sync::Arc,
};

use crate::{
    ConverterExt, Error, IoMode, PgConverter, PgReader, PgWriter, Result, WriteState,
    converter::DynConverter,
    info::{PgTypeInfo, TypeInfoOptions},
    postgres::{DataFormat, PgTypeId},
    resolver::{Compose, ComposingResolver, Resolution},
    size::{BufferRequirements, Size, SizeContext},
};

/// Range flags byte.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RangeFlags(u8);

impl RangeFlags {
    pub const NONE: RangeFlags = RangeFlags(0);
    pub const EMPTY: RangeFlags = RangeFlags(0x01);
    pub const LOWER_BOUND_INCLUSIVE: RangeFlags = RangeFlags(0x02);
    pub const UPPER_BOUND_INCLUSIVE: RangeFlags = RangeFlags(0x04);
    pub const LOWER_BOUND_INFINITE: RangeFlags = RangeFlags(0x08);
    pub const UPPER_BOUND_INFINITE: RangeFlags = RangeFlags(0x10);

    pub const fn from_bits(bits: u8) -> RangeFlags {
        RangeFlags(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: RangeFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: RangeFlags) -> RangeFlags {
        RangeFlags(self.0 | other.0)
    }

    pub const fn difference(self, other: RangeFlags) -> RangeFlags {
        RangeFlags(self.0 & !other.0)
    }
}

impl ops::BitOr for RangeFlags {
    type Output = RangeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl fmt::Debug for RangeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeFlags({:#04x})", self.0)
    }
}

/// Postgres range value.
///
/// A bound is [`None`] when it is infinite, or when the database sent a null bound
/// which is not flagged infinite.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PgRange<T> {
    lower: Option<T>,
    upper: Option<T>,
    flags: RangeFlags,
}

impl<T> PgRange<T> {
    /// Create range from raw parts.
    pub const fn new(lower: Option<T>, upper: Option<T>, flags: RangeFlags) -> PgRange<T> {
        PgRange { lower, upper, flags }
    }

    /// The empty range.
    pub const fn empty() -> PgRange<T> {
        PgRange { lower: None, upper: None, flags: RangeFlags::EMPTY }
    }

    /// Create range from [`Bound`]s.
    pub fn from_bounds(lower: Bound<T>, upper: Bound<T>) -> PgRange<T> {
        let mut flags = RangeFlags::NONE;
        let lower = match lower {
            Bound::Included(v) => { flags = flags | RangeFlags::LOWER_BOUND_INCLUSIVE; Some(v) },
            Bound::Excluded(v) => Some(v),
            Bound::Unbounded => { flags = flags | RangeFlags::LOWER_BOUND_INFINITE; None },
        };
        let upper = match upper {
            Bound::Included(v) => { flags = flags | RangeFlags::UPPER_BOUND_INCLUSIVE; Some(v) },
            Bound::Excluded(v) => Some(v),
            Bound::Unbounded => { flags = flags | RangeFlags::UPPER_BOUND_INFINITE; None },
        };
        PgRange { lower, upper, flags }
    }

    pub const fn flags(&self) -> RangeFlags {
        self.flags
    }

    pub const fn lower(&self) -> Option<&T> {
        self.lower.as_ref()
    }

    pub const fn upper(&self) -> Option<&T> {
        self.upper.as_ref()
    }

    pub const fn is_empty(&self) -> bool {
        self.flags.contains(RangeFlags::EMPTY)
    }

    pub const fn lower_infinite(&self) -> bool {
        self.flags.contains(RangeFlags::LOWER_BOUND_INFINITE)
    }

    pub const fn upper_infinite(&self) -> bool {
        self.flags.contains(RangeFlags::UPPER_BOUND_INFINITE)
    }

    pub const fn lower_inclusive(&self) -> bool {
        self.flags.contains(RangeFlags::LOWER_BOUND_INCLUSIVE)
    }

    pub const fn upper_inclusive(&self) -> bool {
        self.flags.contains(RangeFlags::UPPER_BOUND_INCLUSIVE)
    }

    /// Returns the lower [`Bound`], a null bound is [`Bound::Unbounded`].
    pub fn lower_bound(&self) -> Bound<&T> {
        match (&self.lower, self.lower_inclusive()) {
            (Some(v), true) => Bound::Included(v),
            (Some(v), false) => Bound::Excluded(v),
            (None, _) => Bound::Unbounded,
        }
    }

    /// Returns the upper [`Bound`], a null bound is [`Bound::Unbounded`].
    pub fn upper_bound(&self) -> Bound<&T> {
        match (&self.upper, self.upper_inclusive()) {
            (Some(v), true) => Bound::Included(v),
            (Some(v), false) => Bound::Excluded(v),
            (None, _) => Bound::Unbounded,
        }
    }
}

impl<T> From<ops::Range<T>> for PgRange<T> {
    fn from(value: ops::Range<T>) -> Self {
        PgRange::from_bounds(Bound::Included(value.start), Bound::Excluded(value.end))
    }
}

impl<T> From<ops::RangeInclusive<T>> for PgRange<T> {
    fn from(value: ops::RangeInclusive<T>) -> Self {
        let (start, end) = value.into_inner();
        PgRange::from_bounds(Bound::Included(start), Bound::Included(end))
    }
}

impl<T> From<ops::RangeFrom<T>> for PgRange<T> {
    fn from(value: ops::RangeFrom<T>) -> Self {
        PgRange::from_bounds(Bound::Included(value.start), Bound::Unbounded)
    }
}

impl<T> From<ops::RangeTo<T>> for PgRange<T> {
    fn from(value: ops::RangeTo<T>) -> Self {
        PgRange::from_bounds(Bound::Unbounded, Bound::Excluded(value.end))
    }
}

/// Measured bound, [`None`] when the bound emits no value.
type BoundState = Option<(Size, Option<WriteState>)>;

/// [`WriteState`] of [`RangeConverter`].
pub struct RangeWriteState {
    lower: BoundState,
    upper: BoundState,
}

/// Range converter over a subtype converter, binary format only.
pub struct RangeConverter<T> {
    subtype: DynConverter<T>,
    requirements: BufferRequirements,
}

impl<T: Send + Sync + 'static> RangeConverter<T> {
    /// Create new range converter.
    ///
    /// Returns [`UnsupportedError`][crate::error::UnsupportedError] if the subtype
    /// converter does not support binary format.
    pub fn new(subtype: DynConverter<T>) -> Result<RangeConverter<T>> {
        let Some(requirements) = subtype.can_convert(DataFormat::Binary) else {
            return Err(Error::unsupported(format!(
                "range subtype converter {} has to support binary format", subtype.type_name()
            )));
        };
        Ok(RangeConverter { subtype, requirements })
    }

    pub fn subtype(&self) -> &DynConverter<T> {
        &self.subtype
    }

    fn measure(&self, context: SizeContext, bound: Option<&T>) -> Result<BoundState> {
        let Some(value) = bound else {
            return Ok(None);
        };
        let mut state = None;
        let context = SizeContext::new(context.format, self.requirements.write());
        let Some(size) = self.subtype.get_size_or_db_null(context, value, &mut state)? else {
            return Ok(None);
        };
        if !size.is_exact() {
            return Err(Error::contract(format!(
                "range bound converter {} returned non exact size {size}", self.subtype.type_name()
            )));
        }
        Ok(Some((size, state)))
    }

    async fn read_bound(&self, mode: IoMode, reader: &mut PgReader) -> Result<Option<T>> {
        if reader.should_buffer(4) {
            reader.buffer(mode, 4).await?;
        }
        let len = reader.read_i32();
        if len == -1 {
            return Ok(None);
        }
        let mut scope = reader.begin_nested_read(mode, len, self.requirements.read()).await?;
        let value = self.subtype.read(mode, &mut scope).await?;
        scope.finish(mode).await?;
        Ok(Some(value))
    }

    async fn write_bound(&self, mode: IoMode, writer: &mut PgWriter, value: Option<&T>, state: BoundState) -> Result<()> {
        let (Some(value), Some((size, state))) = (value, state) else {
            return Err(Error::contract("range bound was measured without a value"));
        };
        writer.ensure(mode, 4).await?;
        writer.write_i32(size.value()?);
        writer.nested_write(mode, &*self.subtype, value, size, state).await
    }
}

impl<T: Send + Sync + 'static> PgConverter<PgRange<T>> for RangeConverter<T> {
    fn can_convert(&self, format: DataFormat) -> Option<BufferRequirements> {
        match format {
            DataFormat::Binary => Some(BufferRequirements::value()),
            DataFormat::Text => None,
        }
    }

    fn get_size(&self, context: SizeContext, value: &PgRange<T>, state: &mut Option<WriteState>) -> Result<Size> {
        let mut size = Size::create(1);
        if value.is_empty() {
            return Ok(size);
        }

        let lower = match value.lower_infinite() {
            true => None,
            false => self.measure(context, value.lower()).map_err(|e|e.with_context("range lower bound"))?,
        };
        let upper = match value.upper_infinite() {
            true => None,
            false => self.measure(context, value.upper()).map_err(|e|e.with_context("range upper bound"))?,
        };

        for (bound, _) in lower.iter().chain(upper.iter()) {
            size = size.combine_bytes(4).combine(*bound);
        }

        *state = Some(Box::new(RangeWriteState { lower, upper }));
        Ok(size)
    }

    fn read<'a>(&'a self, mode: IoMode, reader: &'a mut PgReader) -> BoxFuture<'a, Result<PgRange<T>>> {
        Box::pin(async move {
            if reader.should_buffer(1) {
                reader.buffer(mode, 1).await?;
            }
            let flags = RangeFlags::from_bits(reader.read_u8());
            if flags.contains(RangeFlags::EMPTY) {
                return Ok(PgRange::empty());
            }

            let lower = match flags.contains(RangeFlags::LOWER_BOUND_INFINITE) {
                true => None,
                false => self.read_bound(mode, reader).await.map_err(|e|e.with_context("range lower bound"))?,
            };
            let upper = match flags.contains(RangeFlags::UPPER_BOUND_INFINITE) {
                true => None,
                false => self.read_bound(mode, reader).await.map_err(|e|e.with_context("range upper bound"))?,
            };

            Ok(PgRange::new(lower, upper, flags))
        })
    }

    fn write<'a>(&'a self, mode: IoMode, writer: &'a mut PgWriter, value: &'a PgRange<T>) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let mut flags = value.flags();
            let (lower, upper) = match value.is_empty() {
                true => (None, None),
                false => {
                    let state = writer.take_write_state::<RangeWriteState>()?;
                    (state.lower, state.upper)
                }
            };

            if !value.is_empty() {
                // null bounds are written as infinite
                if lower.is_none() && !value.lower_infinite() {
                    flags = flags
                        .difference(RangeFlags::LOWER_BOUND_INCLUSIVE)
                        .union(RangeFlags::LOWER_BOUND_INFINITE);
                }
                if upper.is_none() && !value.upper_infinite() {
                    flags = flags
                        .difference(RangeFlags::UPPER_BOUND_INCLUSIVE)
                        .union(RangeFlags::UPPER_BOUND_INFINITE);
                }
            }

            writer.ensure(mode, 1).await?;
            writer.write_u8(flags.bits());
            if value.is_empty() {
                return Ok(());
            }

            if !flags.contains(RangeFlags::LOWER_BOUND_INFINITE) {
                self.write_bound(mode, writer, value.lower(), lower).await
                    .map_err(|e|e.with_context("range lower bound"))?;
            }
            if !flags.contains(RangeFlags::UPPER_BOUND_INFINITE) {
                self.write_bound(mode, writer, value.upper(), upper).await
                    .map_err(|e|e.with_context("range upper bound"))?;
            }
            Ok(())
        })
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<PgRange<T>>()
    }
}

impl<T: 'static> fmt::Debug for RangeConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RangeConverter({})", self.subtype.type_name())
    }
}

/// [`Compose`] of [`RangeConverter`].
pub struct RangeCompose<T> {
    _p: PhantomData<fn() -> T>,
}

impl<T> RangeCompose<T> {
    pub const fn new() -> RangeCompose<T> {
        RangeCompose { _p: PhantomData }
    }
}

impl<T> Default for RangeCompose<T> {
    fn default() -> Self {
        RangeCompose::new()
    }
}

/// Resolver for [`PgRange<T>`] over a type info of the subtype.
pub type RangeResolver<T> = ComposingResolver<RangeCompose<T>>;

impl<T: Send + Sync + 'static> Compose for RangeCompose<T> {
    type Effective = T;
    type Output = PgRange<T>;

    fn effective_type_id(&self, options: &TypeInfoOptions, pg_type_id: &PgTypeId) -> Result<PgTypeId> {
        options.range_subtype_id(pg_type_id)
    }

    fn type_id(&self, options: &TypeInfoOptions, effective: &PgTypeId) -> Result<PgTypeId> {
        options.range_type_id(effective)
    }

    fn create_converter(&self, _: &TypeInfoOptions, effective: &Resolution<T>) -> Result<DynConverter<PgRange<T>>> {
        Ok(Arc::new(RangeConverter::new(effective.converter.clone())?))
    }

    /// Both bounds are resolved, so they agree on one subtype.
    fn effective_resolution(
        &self,
        info: &PgTypeInfo<T>,
        value: &PgRange<T>,
        expected: Option<&PgTypeId>,
    ) -> Result<Option<Resolution<T>>> {
        let mut resolution: Option<Resolution<T>> = None;
        if !value.lower_infinite() {
            if let Some(lower) = value.lower() {
                resolution = info.get_resolution(lower, expected)?;
            }
        }
        if !value.upper_infinite() {
            if let Some(upper) = value.upper() {
                let expected = resolution.as_ref().map(|r|&r.pg_type_id).or(expected);
                if let Some(upper) = info.get_resolution(upper, expected)? {
                    if let Some(lower) = &resolution {
                        if lower.pg_type_id != upper.pg_type_id {
                            return Err(Error::unsupported(format!(
                                "range bounds resolved to different types, lower bound is {} \
                                and upper bound is {}", lower.pg_type_id, upper.pg_type_id,
                            )));
                        }
                    }
                    resolution = Some(upper);
                }
            }
        }
        Ok(resolution)
    }
}
