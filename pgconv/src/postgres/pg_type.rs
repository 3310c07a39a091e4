use super::TypeKind;

/// Postgres object identifier.
///
/// The oid type is implemented as an unsigned four-byte integer.
///
/// <https://www.postgresql.org/docs/current/datatype-oid.html>
pub type Oid = u32;

macro_rules! oid {
    (@kind Base) => { TypeKind::Base };
    (@kind Range $rel:ident) => { TypeKind::Range(oids::$rel) };
    (@kind Array $rel:ident) => { TypeKind::Array(oids::$rel) };
    ($($id:ident = $oid:literal, $name:literal, $kind:ident $(($rel:ident))? $(, $doc:literal)?;)*) => {
        /// Oid of postgres built-in types.
        pub mod oids {
            use super::Oid;
            $(
                $(#[doc = $doc])?
                pub const $id: Oid = $oid;
            )*
        }

        /// `(oid, qualified name, kind)` of every built-in type.
        pub(crate) const BUILTINS: &[(Oid, &str, TypeKind)] = &[
            $((oids::$id, concat!("pg_catalog.", $name), oid!(@kind $kind $($rel)?)),)*
        ];
    };
}

oid! {
    BOOL = 16, "bool", Base, "boolean, `true`/`false`";
    BYTEA = 17, "bytea", Base, "variable-length string, binary values escaped";
    CHAR = 18, "char", Base, "single character";
    NAME = 19, "name", Base, "63-byte type for storing system identifiers";
    INT8 = 20, "int8", Base, "~18 digit integer, 8-byte storage";
    INT2 = 21, "int2", Base, "-32 thousand to 32 thousand, 2-byte storage";
    INT4 = 23, "int4", Base, "-2 billion to 2 billion integer, 4-byte storage";
    TEXT = 25, "text", Base, "variable-length string, no limit specified";
    OID = 26, "oid", Base, "object identifier(oid), maximum 4 billion";
    JSON = 114, "json", Base, "JSON stored as text";
    FLOAT4 = 700, "float4", Base, "single-precision floating point number, 4-byte storage";
    FLOAT8 = 701, "float8", Base, "double-precision floating point number, 8-byte storage";
    UNKNOWN = 705, "unknown", Base;
    INET = 869, "inet", Base, "IP address/netmask, host address, netmask optional";
    BPCHAR = 1042, "bpchar", Base, "char(length), blank-padded string, fixed storage length";
    VARCHAR = 1043, "varchar", Base, "varchar(length), non-blank-padded string, variable storage length";
    DATE = 1082, "date", Base;
    TIME = 1083, "time", Base, "time of day";
    TIMESTAMP = 1114, "timestamp", Base, "date and time";
    TIMESTAMPTZ = 1184, "timestamptz", Base, "date and time with time zone";
    NUMERIC = 1700, "numeric", Base;
    UUID = 2950, "uuid", Base;
    JSONB = 3802, "jsonb", Base, "Binary JSON";

    INT4RANGE = 3904, "int4range", Range(INT4);
    NUMRANGE = 3906, "numrange", Range(NUMERIC);
    TSRANGE = 3908, "tsrange", Range(TIMESTAMP);
    TSTZRANGE = 3910, "tstzrange", Range(TIMESTAMPTZ);
    DATERANGE = 3912, "daterange", Range(DATE);
    INT8RANGE = 3926, "int8range", Range(INT8);

    BOOL_ARRAY = 1000, "_bool", Array(BOOL);
    BYTEA_ARRAY = 1001, "_bytea", Array(BYTEA);
    INT2_ARRAY = 1005, "_int2", Array(INT2);
    INT4_ARRAY = 1007, "_int4", Array(INT4);
    TEXT_ARRAY = 1009, "_text", Array(TEXT);
    VARCHAR_ARRAY = 1015, "_varchar", Array(VARCHAR);
    INT8_ARRAY = 1016, "_int8", Array(INT8);
    FLOAT4_ARRAY = 1021, "_float4", Array(FLOAT4);
    FLOAT8_ARRAY = 1022, "_float8", Array(FLOAT8);
    OID_ARRAY = 1028, "_oid", Array(OID);
    INET_ARRAY = 1041, "_inet", Array(INET);
    TIMESTAMP_ARRAY = 1115, "_timestamp", Array(TIMESTAMP);
    DATE_ARRAY = 1182, "_date", Array(DATE);
    TIMESTAMPTZ_ARRAY = 1185, "_timestamptz", Array(TIMESTAMPTZ);
    JSON_ARRAY = 199, "_json", Array(JSON);
    JSONB_ARRAY = 3807, "_jsonb", Array(JSONB);
    INT4RANGE_ARRAY = 3905, "_int4range", Array(INT4RANGE);
    INT8RANGE_ARRAY = 3927, "_int8range", Array(INT8RANGE);
}
