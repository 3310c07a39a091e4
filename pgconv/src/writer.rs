//! The [`PgWriter`] cursor.
use bytes::{Buf, BufMut, BytesMut};
use std::{
    any::Any,
    future::poll_fn,
    io,
    sync::Arc,
    task::{Context, Poll, ready},
};

use crate::{
    ConverterExt, Error, IoMode, PgConverter, PreparedWrite, Result, WriteState,
    common::{trace, verbose},
    encoding::{TextEncoder, TextEncoding},
    error::ConnectionBroken,
    postgres::{DataFormat, PgTypeId, TypeCatalog},
    size::{Size, SizeKind},
    transport::PgTransport,
};

/// Default size of the send buffer.
pub const DEFAULT_WRITE_CAPACITY: usize = 8 * 1024;

/// Whether converters may flush in the middle of a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FlushMode {
    /// Flushing is a no-op, the buffer grows instead.
    #[default]
    None,
    /// Only [`IoMode::Blocking`] flushes are allowed.
    Blocking,
    /// Only [`IoMode::Async`] flushes are allowed.
    NonBlocking,
}

/// Format, size and write state of the value currently being written.
#[derive(Default)]
pub struct ValueMetadata {
    pub format: DataFormat,
    pub size: Size,
    pub write_state: Option<WriteState>,
}

impl std::fmt::Debug for ValueMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ValueMetadata")
            .field("format", &self.format)
            .field("size", &self.size)
            .field("write_state", &self.write_state.is_some())
            .finish()
    }
}

/// Write cursor over a flushable send buffer.
///
/// Fixed width writes like [`write_i32`][PgWriter::write_i32] append to the
/// buffer, caller must check [`should_flush`][PgWriter::should_flush] first to
/// respect backpressure.
///
/// A value write that fails or is dropped after its length prefix was emitted
/// leaves the outgoing message unframeable, the writer is broken afterwards.
pub struct PgWriter {
    transport: Box<dyn PgTransport>,
    buf: BytesMut,
    capacity: usize,
    flush_mode: FlushMode,
    flush_suppressed: usize,
    current: ValueMetadata,
    catalog: Option<Arc<TypeCatalog>>,
    /// Bytes appended since creation.
    written: u64,
    in_progress: bool,
    broken: bool,
}

macro_rules! put {
    ($($(#[$meta:meta])* $name:ident => $put:ident($ty:ty);)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self, value: $ty) {
                self.written += size_of::<$ty>() as u64;
                self.buf.$put(value);
            }
        )*
    };
}

impl PgWriter {
    pub fn new(transport: impl PgTransport + 'static) -> PgWriter {
        PgWriter::with_capacity(transport, DEFAULT_WRITE_CAPACITY)
    }

    pub fn with_capacity(transport: impl PgTransport + 'static, capacity: usize) -> PgWriter {
        PgWriter {
            transport: Box::new(transport),
            buf: BytesMut::with_capacity(capacity),
            capacity,
            flush_mode: FlushMode::None,
            flush_suppressed: 0,
            current: ValueMetadata::default(),
            catalog: None,
            written: 0,
            in_progress: false,
            broken: false,
        }
    }

    /// Set the flush mode.
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.flush_mode = mode;
        self
    }

    /// Set the catalog used by [`write_as_oid`][PgWriter::write_as_oid].
    pub fn catalog(mut self, catalog: Arc<TypeCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn set_flush_mode(&mut self, mode: FlushMode) {
        self.flush_mode = mode;
    }

    /// Returns the effective flush mode, [`FlushMode::None`] while flushes are suppressed.
    pub fn current_flush_mode(&self) -> FlushMode {
        match self.flush_suppressed {
            0 => self.flush_mode,
            _ => FlushMode::None,
        }
    }

    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns free bytes before the buffer is full.
    pub fn remaining(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }

    /// Returns buffered bytes not yet sent.
    pub fn buffered(&self) -> &[u8] {
        &self.buf
    }

    /// Returns the number of bytes written since creation.
    pub const fn written(&self) -> u64 {
        self.written
    }

    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    pub fn current(&self) -> &ValueMetadata {
        &self.current
    }

    pub fn current_mut(&mut self) -> &mut ValueMetadata {
        &mut self.current
    }

    /// Take the write state of the current value.
    ///
    /// Returns [`ContractError`][crate::error::ContractError] if there is no state
    /// or the state is of different type.
    pub fn take_write_state<S: Any>(&mut self) -> Result<S> {
        let state = self.current.write_state.take()
            .ok_or_else(||Error::contract("expected a write state for the current value"))?;
        match state.downcast::<S>() {
            Ok(state) => Ok(*state),
            Err(_) => Err(Error::contract(format!(
                "write state of the current value is not {}", std::any::type_name::<S>()
            ))),
        }
    }

    /// Returns `true` if writing `requirement` bytes needs a flush first.
    ///
    /// Unknown requirement falls back to the size of the current value.
    ///
    /// Returns [`ContractError`][crate::error::ContractError] if the byte count
    /// could never fit in the buffer.
    pub fn should_flush(&self, requirement: Size) -> Result<bool> {
        let count = match requirement.kind() {
            SizeKind::Unknown => self.current.size.value()?,
            _ => requirement.value()?,
        };
        let count = usize::try_from(count).unwrap_or_default();
        if count > self.capacity {
            return Err(Error::contract(format!(
                "buffer requirement of {count} bytes is larger than the buffer capacity of {}, \
                this requires a larger buffer instead of flushing", self.capacity
            )));
        }
        Ok(self.remaining() < count)
    }

    /// Make sure `count` bytes fit, flushing if needed.
    pub async fn ensure(&mut self, mode: IoMode, count: usize) -> Result<()> {
        if self.remaining() < count {
            self.flush(mode).await?;
        }
        Ok(())
    }

    /// Send buffered bytes to the transport, honoring the flush mode.
    ///
    /// No-op when flush mode is [`FlushMode::None`] or flushes are suppressed.
    /// Calling with the wrong `mode` for the flush mode is a
    /// [`ContractError`][crate::error::ContractError].
    pub async fn flush(&mut self, mode: IoMode) -> Result<()> {
        match (self.current_flush_mode(), mode) {
            (FlushMode::None, _) => Ok(()),
            (FlushMode::NonBlocking, IoMode::Blocking) => Err(Error::contract(
                "cannot flush blocking on a non-blocking writer, use async io mode instead"
            )),
            (FlushMode::Blocking, IoMode::Async) => Err(Error::contract(
                "cannot flush async on a blocking writer, use blocking io mode instead"
            )),
            _ => self.send(mode).await,
        }
    }

    /// Send every buffered byte to the transport regardless of flush mode.
    pub async fn send(&mut self, mode: IoMode) -> Result<()> {
        if self.broken {
            return Err(ConnectionBroken.into());
        }
        poll_fn(|cx|self.poll_send(mode, cx)).await
    }

    fn poll_send(&mut self, mode: IoMode, cx: &mut Context) -> Poll<Result<()>> {
        while !self.buf.is_empty() {
            let write = match mode {
                IoMode::Blocking => self.transport.write_blocking(&self.buf),
                IoMode::Async => ready!(self.transport.poll_write(cx, &self.buf)),
            };
            match write {
                Ok(0) => return Poll::Ready(Err(self.fail(io::ErrorKind::WriteZero.into()))),
                Ok(n) => {
                    verbose!(n, "sent");
                    self.buf.advance(n);
                }
                Err(err) => return Poll::Ready(Err(self.fail(err))),
            }
        }

        let flush = match mode {
            IoMode::Blocking => self.transport.flush_blocking(),
            IoMode::Async => ready!(self.transport.poll_flush(cx)),
        };
        Poll::Ready(flush.map_err(|err|self.fail(err)))
    }

    fn fail(&mut self, err: io::Error) -> Error {
        trace!("writer transport failed: {err}");
        self.broken = true;
        err.into()
    }

    put! {
        write_u8 => put_u8(u8);
        write_i8 => put_i8(i8);
        write_i16 => put_i16(i16);
        write_u16 => put_u16(u16);
        write_i32 => put_i32(i32);
        write_u32 => put_u32(u32);
        write_i64 => put_i64(i64);
        write_u64 => put_u64(u64);
        write_f32 => put_f32(f32);
        write_f64 => put_f64(f64);
    }

    /// Write the oid of `id`, resolving names through the catalog.
    pub fn write_as_oid(&mut self, id: &PgTypeId) -> Result<()> {
        let oid = match id {
            PgTypeId::Oid(oid) => *oid,
            PgTypeId::DataTypeName(name) => self.catalog
                .as_ref()
                .and_then(|c|c.get_oid(id))
                .ok_or_else(||Error::unsupported(format!("no oid known for data type {name}")))?,
        };
        self.write_u32(oid);
        Ok(())
    }

    /// Write raw bytes, flushing whenever the buffer is full.
    pub async fn write_bytes(&mut self, mode: IoMode, mut bytes: &[u8]) -> Result<()> {
        while !bytes.is_empty() {
            let n = match self.current_flush_mode() {
                FlushMode::None => bytes.len(),
                _ => {
                    if self.remaining() == 0 {
                        self.flush(mode).await?;
                    }
                    self.remaining().min(bytes.len())
                }
            };
            self.buf.put_slice(&bytes[..n]);
            self.written += n as u64;
            bytes = &bytes[n..];
        }
        Ok(())
    }

    /// Encode as much of `text` as fits in the buffer without flushing.
    ///
    /// Returns the encoder to resume with when the text did not fit, or
    /// [`None`] when the text is completely written.
    pub fn write_text_resumable(
        &mut self,
        text: &str,
        encoding: TextEncoding,
        encoder: Option<TextEncoder>,
    ) -> Result<Option<TextEncoder>> {
        let mut encoder = encoder.unwrap_or(TextEncoder::new(encoding));
        let max = match self.current_flush_mode() {
            FlushMode::None => usize::MAX,
            _ => self.remaining(),
        };
        let n = encoder.encode_into(text, &mut self.buf, max)?;
        self.written += n as u64;
        match encoder.is_complete(text) {
            true => Ok(None),
            false => Ok(Some(encoder)),
        }
    }

    /// Encode and write text, flushing whenever the buffer is full.
    pub async fn write_chars(&mut self, mode: IoMode, text: &str, encoding: TextEncoding) -> Result<()> {
        let mut encoder = None;
        loop {
            encoder = match self.write_text_resumable(text, encoding, encoder)? {
                Some(encoder) => Some(encoder),
                None => return Ok(()),
            };
            self.flush(mode).await?;
        }
    }

    /// Write a sub value with the size and state computed for it in advance.
    ///
    /// The size is not recomputed, the emitted byte count is checked against it.
    pub async fn nested_write<T, C>(
        &mut self,
        mode: IoMode,
        converter: &C,
        value: &T,
        size: Size,
        state: Option<WriteState>,
    ) -> Result<()>
    where
        C: PgConverter<T> + ?Sized,
    {
        let format = self.current.format;
        let outer = std::mem::replace(&mut self.current, ValueMetadata { format, size, write_state: state });
        let start = self.written;
        let result = converter.write(mode, self, value).await;
        let emitted = self.written - start;
        self.current = outer;
        result?;

        let consistent = match size.kind() {
            SizeKind::Unknown => true,
            SizeKind::Exact => emitted == size.value()? as u64,
            SizeKind::UpperBound => emitted <= size.value()? as u64,
        };
        if !consistent {
            return Err(Error::contract(format!(
                "{} wrote {emitted} bytes, but its size was {size}", converter.type_name()
            )));
        }
        Ok(())
    }

    /// Write a length prefixed value, `-1` for database null.
    pub async fn write_value<T, C>(&mut self, mode: IoMode, converter: &C, value: &T) -> Result<()>
    where
        C: PgConverter<T> + ?Sized,
    {
        self.write_value_as(mode, converter, value, DataFormat::Binary).await
    }

    /// Same as [`write_value`][PgWriter::write_value] with explicit format.
    pub async fn write_value_as<T, C>(&mut self, mode: IoMode, converter: &C, value: &T, format: DataFormat) -> Result<()>
    where
        C: PgConverter<T> + ?Sized,
    {
        let prepared = converter.prepare(format, value)?;
        self.write_prepared(mode, converter, value, prepared).await
    }

    /// Write a length prefixed value using the result of [`ConverterExt::prepare`].
    pub async fn write_prepared<T, C>(
        &mut self,
        mode: IoMode,
        converter: &C,
        value: &T,
        prepared: PreparedWrite,
    ) -> Result<()>
    where
        C: PgConverter<T> + ?Sized,
    {
        if self.in_progress {
            trace!("previous value write was abandoned midway");
            self.broken = true;
        }
        if self.broken {
            return Err(ConnectionBroken.into());
        }

        let PreparedWrite { format, size, state } = prepared;
        let Some(size) = size else {
            self.ensure(mode, 4).await?;
            self.write_i32(-1);
            return Ok(());
        };

        self.in_progress = true;
        self.current.format = format;
        match size.kind() {
            SizeKind::Unknown => {
                self.in_progress = false;
                return Err(Error::contract(format!(
                    "{} returned unknown size for a top level value", converter.type_name()
                )));
            }
            SizeKind::Exact => {
                self.ensure(mode, 4).await?;
                self.write_i32(size.value()?);
                self.nested_write(mode, converter, value, size, state).await?;
            }
            SizeKind::UpperBound => {
                self.ensure(mode, 4).await?;
                self.flush_suppressed += 1;
                let offset = self.buf.len();
                self.write_i32(0);
                let start = self.written;
                let result = self.nested_write(mode, converter, value, size, state).await;
                self.flush_suppressed -= 1;
                result?;
                let len = (self.written - start) as i32;
                self.buf[offset..offset + 4].copy_from_slice(&len.to_be_bytes());
            }
        }
        self.in_progress = false;
        Ok(())
    }
}

impl std::fmt::Debug for PgWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgWriter")
            .field("buffered", &self.buf.len())
            .field("capacity", &self.capacity)
            .field("flush_mode", &self.flush_mode)
            .field("current", &self.current)
            .field("written", &self.written)
            .field("broken", &self.broken)
            .finish()
    }
}
