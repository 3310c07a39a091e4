//! Serializer configuration.
use dashmap::DashMap;
use std::{env::var, fmt, sync::Arc};

use crate::{
    Error, PgReader, PgWriter, Result,
    common::trace,
    converter::HostType,
    encoding::TextEncoding,
    info::{PgTypeInfo, TypeInfoOptions},
    mapping::{AnyTypeInfo, PgTypeInfoResolver},
    plugins,
    postgres::{DataTypeName, PgTypeEntry, TypeCatalog},
    reader::DEFAULT_READ_CAPACITY,
    transport::PgTransport,
    writer::DEFAULT_WRITE_CAPACITY,
};

/// Reader and writer buffer capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
    pub read_capacity: usize,
    pub write_capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { read_capacity: DEFAULT_READ_CAPACITY, write_capacity: DEFAULT_WRITE_CAPACITY }
    }
}

type CacheKey = (Option<HostType>, Option<DataTypeName>);

struct Inner {
    type_info_options: Arc<TypeInfoOptions>,
    resolvers: Vec<Arc<dyn PgTypeInfoResolver>>,
    infos: DashMap<CacheKey, Arc<dyn AnyTypeInfo>>,
    buffers: BufferConfig,
}

/// Type infos of every host type, and how values are encoded.
///
/// Infos are built once per host type and data type name and shared, so
/// converter caches of composing resolvers persist across lookups.
///
/// This type is cheaply cloneable.
#[derive(Clone)]
pub struct SerializerOptions {
    inner: Arc<Inner>,
}

impl SerializerOptions {
    /// Create options builder.
    pub fn builder() -> OptionsBuilder {
        OptionsBuilder::new()
    }

    /// Create options from environment variable, see [`OptionsBuilder::from_env`].
    pub fn from_env() -> Result<SerializerOptions> {
        Ok(OptionsBuilder::from_env()?.build())
    }

    pub fn type_info_options(&self) -> &Arc<TypeInfoOptions> {
        &self.inner.type_info_options
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        self.inner.type_info_options.catalog()
    }

    pub fn encoding(&self) -> TextEncoding {
        self.inner.type_info_options.encoding()
    }

    pub fn buffer_config(&self) -> BufferConfig {
        self.inner.buffers
    }

    /// Create reader with the configured capacity.
    pub fn reader(&self, transport: impl PgTransport + 'static) -> PgReader {
        PgReader::with_capacity(transport, self.inner.buffers.read_capacity)
    }

    /// Create writer with the configured capacity and catalog.
    pub fn writer(&self, transport: impl PgTransport + 'static) -> PgWriter {
        PgWriter::with_capacity(transport, self.inner.buffers.write_capacity).catalog(self.catalog().clone())
    }

    /// Returns the type info of `T`, optionally for a specific data type name.
    ///
    /// Returns [`UnsupportedError`][crate::error::UnsupportedError] when no
    /// plugin maps the host type and data type.
    pub fn type_info<T: Send + Sync + 'static>(&self, data_type_name: Option<&str>) -> Result<PgTypeInfo<T>> {
        let name = data_type_name.map(DataTypeName::new);
        self.get_type_info(name.as_ref())
    }

    /// Same as [`type_info`][SerializerOptions::type_info] with a [`DataTypeName`].
    pub fn get_type_info<T: Send + Sync + 'static>(&self, data_type_name: Option<&DataTypeName>) -> Result<PgTypeInfo<T>> {
        let info = self.find(Some(HostType::of::<T>()), data_type_name)?;
        match info.downcast::<T>() {
            Some(info) => Ok(info.clone()),
            None => Err(Error::contract(format!(
                "type info plugin returned {} while {} was requested",
                info.host_type(),
                HostType::of::<T>(),
            ))),
        }
    }

    /// Returns the host type erased info of a host type and/or a data type name.
    ///
    /// By data type name alone, the default mapping of that name is used.
    pub fn object_type_info(&self, host: Option<HostType>, data_type_name: Option<&str>) -> Result<Arc<dyn AnyTypeInfo>> {
        let name = data_type_name.map(DataTypeName::new);
        self.find(host, name.as_ref())
    }

    fn find(&self, host: Option<HostType>, data_type_name: Option<&DataTypeName>) -> Result<Arc<dyn AnyTypeInfo>> {
        let key = (host, data_type_name.cloned());
        if let Some(info) = self.inner.infos.get(&key) {
            return Ok(info.clone());
        }

        // built outside of the map lock, factories request other infos
        let Some(info) = self.create(host, data_type_name)? else {
            return Err(Error::unsupported(match (host, data_type_name) {
                (Some(host), Some(name)) => format!("no converter for host type {host} and data type {name}"),
                (Some(host), None) => format!("no converter for host type {host}"),
                (None, Some(name)) => format!("no default converter for data type {name}"),
                (None, None) => "no host type or data type given".into(),
            }));
        };

        if let Some(host) = host {
            if host != info.host_type() {
                return Err(Error::contract(format!(
                    "type info plugin returned {} while {host} was requested", info.host_type()
                )));
            }
        }

        trace!("type info created for {:?} {:?}", host, data_type_name);
        Ok(self.inner.infos.entry(key).or_insert(info).clone())
    }

    fn create(&self, host: Option<HostType>, data_type_name: Option<&DataTypeName>) -> Result<Option<Arc<dyn AnyTypeInfo>>> {
        for resolver in &self.inner.resolvers {
            if let Some(info) = resolver.get_type_info(host, data_type_name, self)? {
                return Ok(Some(info));
            }
        }
        Ok(None)
    }
}

impl Default for SerializerOptions {
    fn default() -> Self {
        OptionsBuilder::new().build()
    }
}

impl fmt::Debug for SerializerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerializerOptions")
            .field("type_info_options", &self.inner.type_info_options)
            .field("resolvers", &self.inner.resolvers.len())
            .field("cached", &self.inner.infos.len())
            .field("buffers", &self.inner.buffers)
            .finish()
    }
}

/// [`SerializerOptions`] builder.
pub struct OptionsBuilder {
    catalog: TypeCatalog,
    text_encoding: TextEncoding,
    portable_type_ids: bool,
    validate_resolutions: bool,
    resolvers: Vec<Arc<dyn PgTypeInfoResolver>>,
    buffers: BufferConfig,
}

impl OptionsBuilder {
    /// Create builder with built-in types and every enabled plugin.
    pub fn new() -> OptionsBuilder {
        Self {
            catalog: TypeCatalog::builtin(),
            text_encoding: TextEncoding::default(),
            portable_type_ids: false,
            validate_resolutions: true,
            resolvers: plugins::defaults(),
            buffers: BufferConfig::default(),
        }
    }

    /// Create builder from environment variable.
    ///
    /// It reads:
    /// - `PGCLIENTENCODING`, `UTF8` or `LATIN1`
    pub fn from_env() -> Result<OptionsBuilder> {
        let mut me = OptionsBuilder::new();
        if let Ok(encoding) = var("PGCLIENTENCODING") {
            me.text_encoding = encoding.parse()?;
        }
        Ok(me)
    }

    /// Set text encoding, default to [`TextEncoding::Utf8`].
    pub fn text_encoding(mut self, encoding: TextEncoding) -> Self {
        self.text_encoding = encoding;
        self
    }

    /// Use data type names as canonical type id, default to `false`.
    pub fn portable_type_ids(mut self, value: bool) -> Self {
        self.portable_type_ids = value;
        self
    }

    /// Check every resolution returned by resolvers, default to `true`.
    pub fn validate_resolutions(mut self, value: bool) -> Self {
        self.validate_resolutions = value;
        self
    }

    /// Register a type in the catalog, like an extension type.
    pub fn register_type(mut self, entry: PgTypeEntry) -> Self {
        self.catalog.register(entry);
        self
    }

    /// Replace the type catalog.
    pub fn catalog(mut self, catalog: TypeCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Add a plugin, searched before every previously added plugin.
    pub fn resolver(mut self, resolver: impl PgTypeInfoResolver) -> Self {
        self.resolvers.insert(0, Arc::new(resolver));
        self
    }

    /// Replace every plugin, searched in the given order.
    pub fn resolvers<R: PgTypeInfoResolver>(mut self, resolvers: impl IntoIterator<Item = R>) -> Self {
        self.resolvers = resolvers
            .into_iter()
            .map(|r|Arc::new(r) as Arc<dyn PgTypeInfoResolver>)
            .collect();
        self
    }

    /// Set buffer capacity.
    pub fn buffer_config(mut self, buffers: BufferConfig) -> Self {
        self.buffers = buffers;
        self
    }

    pub fn build(self) -> SerializerOptions {
        let type_info_options = TypeInfoOptions::new(Arc::new(self.catalog))
            .text_encoding(self.text_encoding)
            .portable_type_ids(self.portable_type_ids)
            .validate_resolutions(self.validate_resolutions);

        SerializerOptions {
            inner: Arc::new(Inner {
                type_info_options: Arc::new(type_info_options),
                resolvers: self.resolvers,
                infos: DashMap::new(),
                buffers: self.buffers,
            }),
        }
    }
}

impl Default for OptionsBuilder {
    fn default() -> Self {
        OptionsBuilder::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        converters::PgRange,
        postgres::{PgTypeId, oids},
        size::{Size, SizeContext},
    };

    #[test]
    fn infos_are_cached() {
        let options = SerializerOptions::default();
        let a = options.type_info::<Vec<Option<i32>>>(None).unwrap();
        let b = options.type_info::<Vec<Option<i32>>>(None).unwrap();
        let ra = a.resolve(&vec![Some(1), None], None).unwrap();
        let rb = b.resolve(&vec![None, Some(2)], None).unwrap();
        assert!(Arc::ptr_eq(&ra.converter, &rb.converter));
        assert_eq!(ra.pg_type_id, PgTypeId::Oid(oids::INT4_ARRAY));
    }

    #[test]
    fn miss_names_both_types() {
        let options = SerializerOptions::default();
        let err = options.type_info::<PgRange<bool>>(Some("int4range")).unwrap_err();
        assert!(err.is_unsupported());
        let msg = err.to_string();
        assert!(msg.contains("PgRange<bool>"), "{msg}");
        assert!(msg.contains("pg_catalog.int4range"), "{msg}");
    }

    #[test]
    fn portable_ids() {
        let options = SerializerOptions::builder().portable_type_ids(true).build();
        let info = options.type_info::<i64>(None).unwrap();
        assert_eq!(info.pg_type_id(), Some(&PgTypeId::DataTypeName(DataTypeName::new("int8"))));
    }

    #[test]
    fn encoding_flows_into_text_converters() {
        let options = SerializerOptions::builder().text_encoding(TextEncoding::Latin1).build();
        let info = options.type_info::<String>(None).unwrap();
        let res = info.get_default_resolution(None).unwrap();
        let size = res.converter.get_size(SizeContext::binary(Size::UNKNOWN), &"é".to_string(), &mut None).unwrap();
        assert_eq!(size, Size::create(1));
    }
}
