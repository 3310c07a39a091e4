//! Postgres value conversion engine
//!
//! Converts host values to and from the postgres wire format through buffered
//! cursors, with either blocking or suspending io over the same code.
//!
//! # Examples
//!
//! Reading and writing values:
//!
//! ```
//! use pgconv::{IoMode, SerializerOptions, io::run_sync, transport::MemoryTransport};
//!
//! # fn app() -> pgconv::Result<()> {
//! let options = SerializerOptions::default();
//! let info = options.type_info::<Option<i32>>(None)?;
//! let res = info.resolve(&Some(420), None)?;
//!
//! let io = MemoryTransport::sink();
//! let sink = io.output();
//! let mut w = options.writer(io);
//! run_sync(w.write_value(IoMode::Blocking, &*res.converter, &Some(420)))?;
//! run_sync(w.write_value(IoMode::Blocking, &*res.converter, &None))?;
//! run_sync(w.send(IoMode::Blocking))?;
//!
//! let mut r = options.reader(MemoryTransport::new(sink.take()));
//! let a = run_sync(r.read_value(IoMode::Blocking, &*res.converter))?;
//! let b = run_sync(r.read_value(IoMode::Blocking, &*res.converter))?;
//!
//! assert_eq!(a, Some(Some(420)));
//! assert_eq!(b, None);
//! # Ok(())
//! # }
//! # app().unwrap();
//! ```
//!
//! Ranges, arrays and value driven types:
//!
//! ```
//! use pgconv::{SerializerOptions, converters::PgRange, postgres::{PgTypeId, oids}};
//!
//! # fn app() -> pgconv::Result<()> {
//! let options = SerializerOptions::default();
//!
//! let range = options.type_info::<PgRange<i64>>(None)?;
//! assert_eq!(range.pg_type_id(), Some(&PgTypeId::Oid(oids::INT8RANGE)));
//!
//! let array = options.type_info::<Vec<Option<String>>>(None)?;
//! let res = array.resolve(&vec![Some("a".into()), None], None)?;
//! assert_eq!(res.pg_type_id, PgTypeId::Oid(oids::TEXT_ARRAY));
//! # Ok(())
//! # }
//! # app().unwrap();
//! ```

pub mod common;
mod ext;

// Wire
pub mod postgres;
pub mod size;
pub mod encoding;

// Io
pub mod io;
pub mod transport;
pub mod reader;
pub mod writer;

// Conversion
pub mod converter;
pub mod converters;
pub mod resolver;
pub mod info;
pub mod object;

// Type system
pub mod mapping;
pub mod options;
pub mod plugins;

// Consumers
pub mod row;
pub mod replication;
pub mod context;

pub mod error;


pub use io::IoMode;
pub use converter::{ConverterExt, PgConverter, PreparedWrite, WriteState};
pub use reader::PgReader;
pub use writer::{FlushMode, PgWriter};
pub use resolver::{PgConverterResolver, Resolution};
pub use info::PgTypeInfo;
pub use options::{BufferConfig, OptionsBuilder, SerializerOptions};
pub use row::{DecodeError, RowDescription, RowReader};
pub use replication::{ReplicationValue, TupleReader};
pub use context::SingleThreadContext;
pub use error::{Error, Result};
