//! Built-in converters.
//!
//! - primitive: [`BoolConverter`], [`Int2Converter`], [`Int4Converter`], [`Int8Converter`],
//!   [`OidConverter`], [`Float4Converter`], [`Float8Converter`]
//! - text: [`TextConverter`], [`ByteaConverter`], [`InetConverter`]
//! - composite: [`NullableConverter`], [`RangeConverter`], [`HstoreConverter`], [`ArrayConverter`]
//! - `time` feature: [`TimestampConverter`], [`TimestampTzConverter`], [`DateConverter`] and
//!   [`OffsetDateTimeResolver`]
//! - `json` feature: [`JsonConverter`]
mod primitive;
mod text;
mod nullable;
mod range;
mod hstore;
mod array;

#[cfg(feature = "time")]
mod time;
#[cfg(feature = "json")]
mod json;

pub use primitive::{
    BoolConverter, Float4Converter, Float8Converter, Int2Converter, Int4Converter, Int8Converter,
    OidConverter,
};
pub use text::{ByteaConverter, InetConverter, TextConverter};
pub use nullable::{NullableCompose, NullableConverter, NullableResolver};
pub use range::{PgRange, RangeCompose, RangeConverter, RangeFlags, RangeResolver, RangeWriteState};
pub use hstore::{HstoreConverter, HstoreMap, HstoreWriteState};
pub use array::{ArrayCompose, ArrayConverter, ArrayResolver, ArrayWriteState};

#[cfg(feature = "time")]
pub use self::time::{
    DateConverter, OffsetDateTimeResolver, OffsetTimestampConverter, OffsetTimestampTzConverter,
    TimestampConverter, TimestampTzConverter,
};
#[cfg(feature = "json")]
pub use json::{Json, JsonConverter};
