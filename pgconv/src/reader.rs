//! The [`PgReader`] cursor.
use bytes::{Buf, Bytes, BytesMut};
use std::{
    future::poll_fn,
    io,
    ops::{Deref, DerefMut},
    task::{Context, Poll, ready},
};

use crate::{
    Error, IoMode, PgConverter, Result,
    common::{trace, verbose},
    error::ConnectionBroken,
    postgres::DataFormat,
    size::Size,
    transport::PgTransport,
};

mod stream;

pub use stream::ColumnStream;

/// Default size of the receive buffer.
pub const DEFAULT_READ_CAPACITY: usize = 8 * 1024;

#[derive(Debug, Clone, Copy)]
struct Scope {
    end: u64,
    format: DataFormat,
}

/// Read cursor over a partially filled receive buffer.
///
/// Fixed width reads like [`read_i32`][PgReader::read_i32] consume the resident
/// bytes and panics when not enough bytes are resident, caller must
/// [`buffer`][PgReader::buffer] first. Everything else suspends or blocks on the
/// transport depending on [`IoMode`].
///
/// Values are read inside a nested scope, see [`begin_nested_read`][PgReader::begin_nested_read].
/// Bytes of a scope that are not consumed are skipped when the scope ends, including
/// when the reading future is dropped midway, so the cursor is always left at the
/// end of the value.
pub struct PgReader {
    transport: Box<dyn PgTransport>,
    buf: BytesMut,
    capacity: usize,
    /// Bytes logically consumed since creation.
    position: u64,
    /// Bytes consumed but not yet received, discarded before the next read.
    pending_skip: u64,
    scopes: Vec<Scope>,
    broken: bool,
}

macro_rules! get {
    ($($(#[$meta:meta])* $name:ident => $get:ident -> $ty:ty;)*) => {
        $(
            $(#[$meta])*
            pub fn $name(&mut self) -> $ty {
                self.position += size_of::<$ty>() as u64;
                self.buf.$get()
            }
        )*
    };
}

impl PgReader {
    pub fn new(transport: impl PgTransport + 'static) -> PgReader {
        PgReader::with_capacity(transport, DEFAULT_READ_CAPACITY)
    }

    pub fn with_capacity(transport: impl PgTransport + 'static, capacity: usize) -> PgReader {
        PgReader {
            transport: Box::new(transport),
            buf: BytesMut::with_capacity(capacity),
            capacity,
            position: 0,
            pending_skip: 0,
            scopes: Vec::new(),
            broken: false,
        }
    }

    /// Returns the number of bytes logically consumed.
    pub const fn position(&self) -> u64 {
        self.position
    }

    /// Returns the number of resident bytes.
    pub fn resident(&self) -> usize {
        self.buf.len()
    }

    /// Returns `true` if the transport failed, no further io is attempted.
    pub const fn is_broken(&self) -> bool {
        self.broken
    }

    /// Format of the value currently being read.
    pub fn format(&self) -> DataFormat {
        self.scopes.last().map_or(DataFormat::Binary, |s|s.format)
    }

    /// Returns bytes left in the current nested scope, if any.
    pub fn scope_remaining(&self) -> Option<usize> {
        self.scopes.last().map(|s|s.end.saturating_sub(self.position) as usize)
    }

    /// Returns `true` if fewer than `n` bytes are resident.
    pub fn should_buffer(&self, n: usize) -> bool {
        self.buf.len() < n
    }

    /// Ensure at least `n` bytes are resident.
    pub async fn buffer(&mut self, mode: IoMode, n: usize) -> Result<()> {
        if let Some(remaining) = self.scope_remaining() {
            if n > remaining {
                return Err(Error::contract(format!(
                    "cannot buffer {n} bytes, only {remaining} bytes left in the value"
                )));
            }
        }
        if n > self.capacity.max(self.buf.capacity()) {
            self.buf.reserve(n - self.buf.len());
        }
        self.settle(mode).await?;
        while self.buf.len() < n {
            self.fill(mode).await?;
        }
        Ok(())
    }

    get! {
        read_u8 => get_u8 -> u8;
        read_i8 => get_i8 -> i8;
        read_i16 => get_i16 -> i16;
        read_u16 => get_u16 -> u16;
        read_i32 => get_i32 -> i32;
        read_u32 => get_u32 -> u32;
        read_i64 => get_i64 -> i64;
        read_f32 => get_f32 -> f32;
        read_f64 => get_f64 -> f64;
    }

    /// Consume exactly `n` bytes.
    pub async fn read_bytes(&mut self, mode: IoMode, n: usize) -> Result<Bytes> {
        self.buffer_check(n)?;
        self.settle(mode).await?;

        if self.buf.len() >= n {
            self.position += n as u64;
            return Ok(self.buf.split_to(n).freeze());
        }

        let mut out = BytesMut::with_capacity(n);
        while out.len() < n {
            if self.buf.is_empty() {
                self.fill(mode).await?;
            }
            let take = (n - out.len()).min(self.buf.len());
            out.extend_from_slice(&self.buf[..take]);
            self.buf.advance(take);
            self.position += take as u64;
        }
        Ok(out.freeze())
    }

    /// Consume the rest of the current nested scope.
    pub async fn read_remaining(&mut self, mode: IoMode) -> Result<Bytes> {
        let n = self.scope_remaining().ok_or_else(||Error::contract("not reading a value"))?;
        self.read_bytes(mode, n).await
    }

    /// Discard exactly `n` bytes.
    pub async fn skip(&mut self, mode: IoMode, n: usize) -> Result<()> {
        self.buffer_check(n)?;
        self.skip_lazy(n as u64);
        self.settle(mode).await
    }

    /// Read a length prefixed value.
    ///
    /// Returns [`None`] when the length is `-1`.
    pub async fn read_value<T, C>(&mut self, mode: IoMode, converter: &C) -> Result<Option<T>>
    where
        C: PgConverter<T> + ?Sized,
    {
        self.read_value_as(mode, converter, DataFormat::Binary).await
    }

    /// Same as [`read_value`][PgReader::read_value] with explicit format.
    pub async fn read_value_as<T, C>(&mut self, mode: IoMode, converter: &C, format: DataFormat) -> Result<Option<T>>
    where
        C: PgConverter<T> + ?Sized,
    {
        self.buffer(mode, 4).await?;
        let len = self.read_i32();
        if len == -1 {
            return Ok(None);
        }

        let requirement = converter
            .can_convert(format)
            .ok_or_else(||Error::unsupported(format!(
                "{} does not support {format:?} format", converter.type_name()
            )))?;

        let mut scope = self.begin_nested_read_as(mode, len, requirement.read(), format).await?;
        let value = converter.read(mode, &mut scope).await?;
        scope.finish(mode).await?;
        Ok(Some(value))
    }

    /// Carve out a region of exactly `len` bytes for a nested converter.
    ///
    /// The returned guard skips any unconsumed byte of the region when dropped,
    /// use [`NestedRead::finish`] to also check for over consumption.
    ///
    /// If `requirement` is known, that many bytes (at most `len`) are buffered first.
    pub async fn begin_nested_read(&mut self, mode: IoMode, len: i32, requirement: Size) -> Result<NestedRead<'_>> {
        let format = self.format();
        self.begin_nested_read_as(mode, len, requirement, format).await
    }

    pub(crate) async fn begin_nested_read_as(
        &mut self,
        mode: IoMode,
        len: i32,
        requirement: Size,
        format: DataFormat,
    ) -> Result<NestedRead<'_>> {
        let Ok(len) = u64::try_from(len) else {
            return Err(Error::unsupported(format!("invalid value length {len}")));
        };
        if let Some(remaining) = self.scope_remaining() {
            if len > remaining as u64 {
                return Err(Error::unsupported(format!(
                    "value length {len} exceeds the {remaining} bytes left in the enclosing value"
                )));
            }
        }

        self.scopes.push(Scope { end: self.position + len, format });
        let mut scope = NestedRead { reader: self, closed: false };

        if let Some(req) = requirement.get() {
            let n = (req.max(0) as u64).min(len) as usize;
            if scope.reader.should_buffer(n) {
                scope.reader.buffer(mode, n).await?;
            }
        }

        verbose!(len, "begin nested read");
        Ok(scope)
    }

    fn buffer_check(&self, n: usize) -> Result<()> {
        if self.broken {
            return Err(ConnectionBroken.into());
        }
        match self.scope_remaining() {
            Some(remaining) if n > remaining => Err(Error::contract(format!(
                "cannot read {n} bytes, only {remaining} bytes left in the value"
            ))),
            _ => Ok(()),
        }
    }

    /// Mark `n` bytes consumed, discarding resident bytes now and the rest before next read.
    fn skip_lazy(&mut self, n: u64) {
        let resident = (self.buf.len() as u64).min(n);
        self.buf.advance(resident as usize);
        self.pending_skip += n - resident;
        self.position += n;
    }

    /// Discard bytes of previously dropped scopes.
    async fn settle(&mut self, mode: IoMode) -> Result<()> {
        if self.broken {
            return Err(ConnectionBroken.into());
        }
        while self.pending_skip != 0 {
            self.fill(mode).await?;
            let n = (self.buf.len() as u64).min(self.pending_skip);
            self.buf.advance(n as usize);
            self.pending_skip -= n;
        }
        Ok(())
    }

    async fn fill(&mut self, mode: IoMode) -> Result<usize> {
        poll_fn(|cx|self.poll_fill(mode, cx)).await
    }

    /// Receive more bytes from the transport.
    ///
    /// Any io error, including end of stream, marks the reader broken.
    pub(crate) fn poll_fill(&mut self, mode: IoMode, cx: &mut Context) -> Poll<Result<usize>> {
        if self.broken {
            return Poll::Ready(Err(ConnectionBroken.into()));
        }
        if self.buf.capacity() - self.buf.len() < self.capacity / 2 {
            self.buf.reserve(self.capacity);
        }

        let read = match mode {
            IoMode::Blocking => self.transport.read_blocking(&mut self.buf),
            IoMode::Async => ready!(self.transport.poll_read(cx, &mut self.buf)),
        };

        match read {
            Ok(0) => {
                self.broken = true;
                trace!("reader transport closed");
                Poll::Ready(Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()))
            }
            Ok(n) => {
                verbose!(n, "received");
                Poll::Ready(Ok(n))
            }
            Err(err) => {
                self.broken = true;
                trace!("reader transport failed: {err}");
                Poll::Ready(Err(err.into()))
            }
        }
    }

    fn end_scope(&mut self) {
        let Some(scope) = self.scopes.pop() else {
            return;
        };
        if self.broken {
            return;
        }
        if let Some(rest) = scope.end.checked_sub(self.position) {
            if rest != 0 {
                verbose!(rest, "skipping unread value bytes");
                self.skip_lazy(rest);
            }
        }
    }
}

impl std::fmt::Debug for PgReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgReader")
            .field("position", &self.position)
            .field("resident", &self.buf.len())
            .field("pending_skip", &self.pending_skip)
            .field("depth", &self.scopes.len())
            .field("broken", &self.broken)
            .finish()
    }
}

/// Guard of a nested read region, returned from [`PgReader::begin_nested_read`].
///
/// Dereference to the [`PgReader`] to read inside the region.
pub struct NestedRead<'a> {
    reader: &'a mut PgReader,
    closed: bool,
}

impl NestedRead<'_> {
    /// End the region, skipping its remainder.
    ///
    /// Returns [`ContractError`][crate::error::ContractError] if the region was over consumed.
    pub async fn finish(mut self, mode: IoMode) -> Result<()> {
        let end = self.reader.scopes.last().map(|s|s.end);
        let position = self.reader.position;
        self.closed = true;
        self.reader.end_scope();

        if let Some(end) = end.filter(|end|position > *end) {
            return Err(Error::contract(format!(
                "converter read {} bytes past the end of the value", position - end
            )));
        }

        self.reader.settle(mode).await
    }
}

impl Deref for NestedRead<'_> {
    type Target = PgReader;

    fn deref(&self) -> &Self::Target {
        self.reader
    }
}

impl DerefMut for NestedRead<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.reader
    }
}

impl Drop for NestedRead<'_> {
    fn drop(&mut self) {
        if !self.closed {
            self.reader.end_scope();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{io::run_sync, transport::MemoryTransport};

    fn frame(values: &[&[u8]]) -> Vec<u8> {
        let mut out = vec![];
        for v in values {
            out.extend_from_slice(&(v.len() as i32).to_be_bytes());
            out.extend_from_slice(v);
        }
        out
    }

    #[test]
    fn fixed_reads_after_buffer() {
        let io = MemoryTransport::new(vec![0, 0, 1, 0, 7]).chunks([1]);
        let mut r = PgReader::new(io);
        assert!(r.should_buffer(5));
        run_sync(r.buffer(IoMode::Blocking, 5)).unwrap();
        assert!(!r.should_buffer(5));
        assert_eq!(r.read_i32(), 256);
        assert_eq!(r.read_u8(), 7);
        assert_eq!(r.position(), 5);
    }

    #[test]
    fn read_bytes_across_chunks() {
        let io = MemoryTransport::new(&b"hello world"[..]).chunks([3]);
        let mut r = PgReader::with_capacity(io, 4);
        let bytes = run_sync(r.read_bytes(IoMode::Blocking, 11)).unwrap();
        assert_eq!(&bytes[..], b"hello world");
    }

    #[test]
    fn dropped_scope_skips_remainder() {
        let io = MemoryTransport::new(frame(&[b"abcdefgh", b"zz"])).chunks([2]);
        let mut r = PgReader::new(io);
        let mode = IoMode::Blocking;

        run_sync(async {
            r.buffer(mode, 4).await?;
            let len = r.read_i32();
            let mut scope = r.begin_nested_read(mode, len, Size::create(1)).await?;
            assert_eq!(scope.scope_remaining(), Some(8));
            assert_eq!(scope.read_u8(), b'a');
            Ok::<_, Error>(())
        }).unwrap();

        assert_eq!(r.position(), 12);
        let next = run_sync(async {
            r.buffer(mode, 4).await?;
            let len = r.read_i32();
            r.read_bytes(mode, len as usize).await
        }).unwrap();
        assert_eq!(&next[..], b"zz");
    }

    #[test]
    fn scope_bounds_are_enforced() {
        let io = MemoryTransport::new(frame(&[b"ab"]));
        let mut r = PgReader::new(io);
        let mode = IoMode::Blocking;

        let err = run_sync(async {
            r.buffer(mode, 4).await?;
            let len = r.read_i32();
            let mut scope = r.begin_nested_read(mode, len, Size::UNKNOWN).await?;
            scope.read_bytes(mode, 3).await
        }).unwrap_err();
        assert!(err.is_contract());
        assert!(!r.is_broken());
    }

    #[test]
    fn eof_breaks_reader() {
        let io = MemoryTransport::new(vec![0, 0]);
        let mut r = PgReader::new(io);
        let err = run_sync(r.buffer(IoMode::Blocking, 4)).unwrap_err();
        assert!(err.is_connection_broken());
        assert!(r.is_broken());

        let err = run_sync(r.read_bytes(IoMode::Blocking, 1)).unwrap_err();
        assert!(err.is_connection_broken());
    }

    #[tokio::test]
    async fn cancelled_read_leaves_value_boundary() {
        let io = MemoryTransport::new(frame(&[b"abcdef", b"ok"])).chunks([1]).pending(true);
        let mut r = PgReader::new(io);
        let mode = IoMode::Async;

        {
            let read = async {
                r.buffer(mode, 4).await?;
                let len = r.read_i32();
                let mut scope = r.begin_nested_read(mode, len, Size::UNKNOWN).await?;
                scope.read_bytes(mode, 6).await
            };
            let mut read = std::pin::pin!(read);
            let mut cx = Context::from_waker(std::task::Waker::noop());
            for _ in 0..8 {
                assert!(read.as_mut().poll(&mut cx).is_pending());
            }
        }

        assert_eq!(r.position(), 10);
        r.buffer(mode, 4).await.unwrap();
        let len = r.read_i32();
        assert_eq!(&r.read_bytes(mode, len as usize).await.unwrap()[..], b"ok");
    }
}
