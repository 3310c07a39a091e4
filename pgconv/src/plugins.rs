//! Type info plugins.
//!
//! - [`builtin`], primitive, text, network, range and array types
//! - [`hstore`], the `hstore` extension
//! - [`time`][fn@time], [`time`][::time] crate types, requires `time` feature
//! - [`json`], [`serde`] types as `jsonb` and `json`, requires `json` feature
use std::{collections::HashMap, net::IpAddr, sync::Arc};

use crate::{
    converters::{
        BoolConverter, ByteaConverter, Float4Converter, Float8Converter, HstoreConverter, InetConverter,
        Int2Converter, Int4Converter, Int8Converter, OidConverter, PgRange, TextConverter,
    },
    mapping::{PgTypeInfoResolver, TypeInfoMappingCollection},
};

/// Data type name of the `hstore` extension.
pub const HSTORE: &str = "public.hstore";

/// Host type of `hstore` values.
pub type Hstore = HashMap<String, Option<String>>;

/// Plugins used by default.
pub(crate) fn defaults() -> Vec<Arc<dyn PgTypeInfoResolver>> {
    let mut resolvers: Vec<Arc<dyn PgTypeInfoResolver>> = vec![Arc::new(builtin())];
    #[cfg(feature = "time")]
    resolvers.push(Arc::new(time()));
    #[cfg(feature = "json")]
    resolvers.push(Arc::new(json()));
    resolvers.push(Arc::new(hstore()));
    resolvers
}

/// Built-in postgres types.
pub fn builtin() -> TypeInfoMappingCollection {
    let mut m = TypeInfoMappingCollection::new();

    m.add_type::<bool, _>("bool", true, |_|Ok(Arc::new(BoolConverter)))
        .add_type::<i16, _>("int2", true, |_|Ok(Arc::new(Int2Converter)))
        .add_type::<i32, _>("int4", true, |_|Ok(Arc::new(Int4Converter)))
        .add_type::<i64, _>("int8", true, |_|Ok(Arc::new(Int8Converter)))
        .add_type::<u32, _>("oid", true, |_|Ok(Arc::new(OidConverter)))
        .add_type::<f32, _>("float4", true, |_|Ok(Arc::new(Float4Converter)))
        .add_type::<f64, _>("float8", true, |_|Ok(Arc::new(Float8Converter)))
        .add_type::<Vec<u8>, _>("bytea", true, |_|Ok(Arc::new(ByteaConverter::<Vec<u8>>::new())))
        .add_type::<bytes::Bytes, _>("bytea", false, |_|Ok(Arc::new(ByteaConverter::<bytes::Bytes>::new())))
        .add_type::<IpAddr, _>("inet", true, |_|Ok(Arc::new(InetConverter)));

    for (name, is_default) in [("text", true), ("varchar", true), ("bpchar", true), ("name", true)] {
        m.add_type::<String, _>(name, is_default, |o|Ok(Arc::new(TextConverter::new(o.encoding()))));
    }

    m.add_range_type::<i32>("int4range", "int4", true)
        .add_range_type::<i64>("int8range", "int8", true);

    m.add_array_type::<bool>("_bool", "bool", true)
        .add_array_type::<i16>("_int2", "int2", true)
        .add_array_type::<i32>("_int4", "int4", true)
        .add_array_type::<i64>("_int8", "int8", true)
        .add_array_type::<u32>("_oid", "oid", true)
        .add_array_type::<f32>("_float4", "float4", true)
        .add_array_type::<f64>("_float8", "float8", true)
        .add_array_type::<Vec<u8>>("_bytea", "bytea", true)
        .add_array_type::<IpAddr>("_inet", "inet", true)
        .add_array_type::<String>("_text", "text", true)
        .add_array_type::<String>("_varchar", "varchar", true)
        .add_array_type::<PgRange<i32>>("_int4range", "int4range", true)
        .add_array_type::<PgRange<i64>>("_int8range", "int8range", true);

    m
}

/// The `hstore` extension as [`Hstore`] and [`BTreeMap`][std::collections::BTreeMap].
///
/// The extension oid differs per database, register it in the catalog with
/// [`OptionsBuilder::register_type`][crate::OptionsBuilder::register_type] or
/// use portable type ids.
pub fn hstore() -> TypeInfoMappingCollection {
    use std::collections::BTreeMap;

    let mut m = TypeInfoMappingCollection::new();
    m.add_type::<Hstore, _>(HSTORE, true, |o|Ok(Arc::new(HstoreConverter::<Hstore>::new(o.encoding()))))
        .add_type::<BTreeMap<String, Option<String>>, _>(HSTORE, false, |o|{
            Ok(Arc::new(HstoreConverter::<BTreeMap<String, Option<String>>>::new(o.encoding())))
        });
    m
}

/// [`time`][::time] crate types.
#[cfg(feature = "time")]
pub fn time() -> TypeInfoMappingCollection {
    use crate::converters::{
        DateConverter, OffsetDateTimeResolver, TimestampConverter, TimestampTzConverter,
    };
    use ::time::{Date, OffsetDateTime, PrimitiveDateTime, UtcDateTime};

    let mut m = TypeInfoMappingCollection::new();
    m.add_type::<PrimitiveDateTime, _>("timestamp", true, |_|Ok(Arc::new(TimestampConverter)))
        .add_type::<UtcDateTime, _>("timestamptz", true, |_|Ok(Arc::new(TimestampTzConverter)))
        .add_type::<Date, _>("date", true, |_|Ok(Arc::new(DateConverter)));

    m.add_range_type::<PrimitiveDateTime>("tsrange", "timestamp", true)
        .add_range_type::<UtcDateTime>("tstzrange", "timestamptz", true)
        .add_range_type::<Date>("daterange", "date", true);

    for name in ["timestamptz", "timestamp"] {
        m.add_resolver_type::<OffsetDateTime, _>(name, false, |o|{
            Ok(Arc::new(OffsetDateTimeResolver::new(o.type_info_options())?))
        });
    }

    m.add_array_type::<PrimitiveDateTime>("_timestamp", "timestamp", true)
        .add_array_type::<UtcDateTime>("_timestamptz", "timestamptz", true)
        .add_array_type::<Date>("_date", "date", true);
    m
}

/// [`serde_json::Value`] as `jsonb` and `json`.
///
/// Other serde types are added with [`json_type`].
#[cfg(feature = "json")]
pub fn json() -> TypeInfoMappingCollection {
    let mut m = TypeInfoMappingCollection::new();
    json_type::<serde_json::Value>(&mut m, true);
    m
}

/// Map [`Json<T>`][crate::converters::Json] to `jsonb` and `json`.
#[cfg(feature = "json")]
pub fn json_type<T>(mappings: &mut TypeInfoMappingCollection, is_default: bool) -> &mut TypeInfoMappingCollection
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + 'static,
{
    use crate::converters::{Json, JsonConverter};

    mappings
        .add_type::<Json<T>, _>("jsonb", is_default, |_|Ok(Arc::new(JsonConverter::<T>::jsonb())))
        .add_type::<Json<T>, _>("json", is_default, |_|Ok(Arc::new(JsonConverter::<T>::json())))
        .add_array_type::<Json<T>>("_jsonb", "jsonb", is_default)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::ops::Bound;
    use crate::{
        IoMode, SerializerOptions,
        io::run_sync,
        postgres::{DataTypeName, PgTypeEntry, PgTypeId, oids},
        transport::MemoryTransport,
    };

    #[test]
    fn builtin_defaults_by_name() {
        let options = SerializerOptions::default();
        for (name, oid) in [("int4", oids::INT4), ("_text", oids::TEXT_ARRAY), ("int8range", oids::INT8RANGE)] {
            let info = options.object_type_info(None, Some(name)).unwrap();
            assert_eq!(info.pg_type_id(), Some(&PgTypeId::Oid(oid)), "{name}");
        }
    }

    #[test]
    fn varchar_is_not_text() {
        let options = SerializerOptions::default();
        let text = options.type_info::<String>(None).unwrap();
        let varchar = options.type_info::<String>(Some("varchar")).unwrap();
        assert_eq!(text.pg_type_id(), Some(&PgTypeId::Oid(oids::TEXT)));
        assert_eq!(varchar.pg_type_id(), Some(&PgTypeId::Oid(oids::VARCHAR)));
    }

    #[test]
    fn hstore_needs_registration() {
        let options = SerializerOptions::default();
        let err = options.type_info::<Hstore>(None).unwrap_err();
        assert!(err.is_unsupported());

        let options = SerializerOptions::builder()
            .register_type(PgTypeEntry::base(16_384, DataTypeName::new(HSTORE)))
            .build();
        let info = options.type_info::<Option<Hstore>>(Some(HSTORE)).unwrap();
        assert_eq!(info.pg_type_id(), Some(&PgTypeId::Oid(16_384)));
    }

    #[test]
    fn object_read_of_a_range() {
        let options = SerializerOptions::default();
        let info = options.object_type_info(None, Some("int4range")).unwrap();
        let res = info.object_resolution(None).unwrap();
        assert!(res.converter.host_type().is::<PgRange<i32>>());

        let bytes = [&[0, 0, 0, 17][..], &[0x02], &[0, 0, 0, 4], &[0, 0, 0, 1], &[0, 0, 0, 4], &[0, 0, 0, 5]].concat();
        let mut r = options.reader(MemoryTransport::new(bytes));
        let value = run_sync(r.read_value(IoMode::Blocking, &*res.converter)).unwrap().unwrap();
        assert_eq!(value.downcast_ref::<PgRange<i32>>(), Some(&PgRange::from_bounds(Bound::Included(1), Bound::Excluded(5))));
    }
}
