use bytes::{Buf, Bytes, BytesMut};
use std::{
    future::poll_fn,
    io,
    task::{Context, Poll, Waker, ready},
};

use super::PgReader;
use crate::{Error, IoMode, Result};

/// Length bounded byte stream over one column value.
///
/// When the whole value is resident the stream is seekable, otherwise it only
/// supports forward consumption and seeking within the resident bytes.
///
/// Dropping the stream skips its unread remainder unless the reader is broken.
pub struct ColumnStream<'a> {
    reader: &'a mut PgReader,
    len: u64,
    offset: u64,
    data: Option<Bytes>,
    poisoned: bool,
}

impl PgReader {
    /// Open a stream over the rest of the current value.
    pub async fn column_stream(&mut self, mode: IoMode) -> Result<ColumnStream<'_>> {
        let len = self.scope_remaining().ok_or_else(||Error::contract("not reading a value"))?;
        self.open_stream(mode, len).await
    }

    /// Open a stream over the next `len` bytes, outside of any nested scope.
    pub(crate) async fn open_stream(&mut self, mode: IoMode, len: usize) -> Result<ColumnStream<'_>> {
        self.buffer_check(len)?;
        self.settle(mode).await?;

        let data = match self.buf.len() >= len {
            true => {
                self.position += len as u64;
                Some(self.buf.split_to(len).freeze())
            }
            false => None,
        };

        Ok(ColumnStream { reader: self, len: len as u64, offset: 0, data, poisoned: false })
    }
}

impl ColumnStream<'_> {
    /// Returns the total length of the column.
    pub const fn len(&self) -> u64 {
        self.len
    }

    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the current offset within the column.
    pub const fn position(&self) -> u64 {
        self.offset
    }

    /// Returns `true` if the whole column is resident and can be seek freely.
    pub const fn is_seekable(&self) -> bool {
        self.data.is_some()
    }

    /// Read the rest of the column.
    pub async fn read_to_end(&mut self, mode: IoMode) -> Result<Bytes> {
        let mut out = BytesMut::with_capacity((self.len - self.offset) as usize);
        let mut chunk = [0u8; 1024];
        loop {
            let n = poll_fn(|cx|self.poll_read_inner(mode, cx, &mut chunk)).await?;
            if n == 0 {
                return Ok(out.freeze());
            }
            out.extend_from_slice(&chunk[..n]);
        }
    }

    fn poll_read_inner(&mut self, mode: IoMode, cx: &mut Context, out: &mut [u8]) -> Poll<Result<usize>> {
        if self.poisoned {
            return Poll::Ready(Err(Error::contract("column stream is unusable after a failed read")));
        }

        let left = (self.len - self.offset) as usize;
        if left == 0 || out.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if let Some(data) = &self.data {
            let start = self.offset as usize;
            let n = left.min(out.len());
            out[..n].copy_from_slice(&data[start..start + n]);
            self.offset += n as u64;
            return Poll::Ready(Ok(n));
        }

        if self.reader.buf.is_empty() {
            if let Err(err) = ready!(self.reader.poll_fill(mode, cx)) {
                self.poisoned = true;
                return Poll::Ready(Err(err));
            }
        }

        let n = left.min(out.len()).min(self.reader.buf.len());
        out[..n].copy_from_slice(&self.reader.buf[..n]);
        self.reader.buf.advance(n);
        self.reader.position += n as u64;
        self.offset += n as u64;
        Poll::Ready(Ok(n))
    }

    fn seek_to(&mut self, target: i128) -> io::Result<u64> {
        if target < 0 || target > self.len as i128 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek outside of column"));
        }
        let target = target as u64;

        if self.data.is_some() {
            self.offset = target;
            return Ok(target);
        }

        if target < self.offset {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "cannot seek backward in sequential column"));
        }
        let forward = (target - self.offset) as usize;
        if forward > self.reader.buf.len() {
            return Err(io::Error::new(io::ErrorKind::Unsupported, "cannot seek past buffered bytes in sequential column"));
        }
        self.reader.buf.advance(forward);
        self.reader.position += forward as u64;
        self.offset = target;
        Ok(target)
    }
}

impl io::Read for ColumnStream<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut cx = Context::from_waker(Waker::noop());
        match self.poll_read_inner(IoMode::Blocking, &mut cx, buf) {
            Poll::Ready(result) => result.map_err(io::Error::other),
            Poll::Pending => Err(io::ErrorKind::WouldBlock.into()),
        }
    }
}

impl io::Seek for ColumnStream<'_> {
    fn seek(&mut self, pos: io::SeekFrom) -> io::Result<u64> {
        let target = match pos {
            io::SeekFrom::Start(n) => n as i128,
            io::SeekFrom::End(n) => self.len as i128 + n as i128,
            io::SeekFrom::Current(n) => self.offset as i128 + n as i128,
        };
        self.seek_to(target)
    }
}

#[cfg(feature = "tokio")]
impl tokio::io::AsyncRead for ColumnStream<'_> {
    fn poll_read(
        self: std::pin::Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let me = self.get_mut();
        let n = ready!(me.poll_read_inner(IoMode::Async, cx, buf.initialize_unfilled()))
            .map_err(io::Error::other)?;
        buf.advance(n);
        Poll::Ready(Ok(()))
    }
}

impl Drop for ColumnStream<'_> {
    fn drop(&mut self) {
        if self.data.is_none() && !self.reader.broken {
            self.reader.skip_lazy(self.len - self.offset);
        }
    }
}

impl std::fmt::Debug for ColumnStream<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnStream")
            .field("len", &self.len)
            .field("offset", &self.offset)
            .field("seekable", &self.is_seekable())
            .finish()
    }
}

#[cfg(test)]
mod test {
    use std::io::{Read, Seek, SeekFrom};

    use super::*;
    use crate::{io::run_sync, size::Size, transport::MemoryTransport};

    fn framed(value: &[u8], sentinel: &[u8]) -> Vec<u8> {
        let mut out = (value.len() as i32).to_be_bytes().to_vec();
        out.extend_from_slice(value);
        out.extend_from_slice(sentinel);
        out
    }

    #[test]
    fn resident_column_is_seekable() {
        let mut r = PgReader::new(MemoryTransport::new(framed(b"0123456789", b"!")));
        let mode = IoMode::Blocking;
        run_sync(async {
            r.buffer(mode, 4).await?;
            let len = r.read_i32();
            let mut scope = r.begin_nested_read(mode, len, Size::create(10)).await?;
            let mut stream = scope.column_stream(mode).await?;
            assert!(stream.is_seekable());

            let mut out = [0u8; 3];
            stream.seek(SeekFrom::End(-3)).unwrap();
            stream.read_exact(&mut out).unwrap();
            assert_eq!(&out, b"789");
            stream.seek(SeekFrom::Start(1)).unwrap();
            stream.read_exact(&mut out).unwrap();
            assert_eq!(&out, b"123");
            Ok::<_, Error>(())
        }).unwrap();

        run_sync(r.buffer(IoMode::Blocking, 1)).unwrap();
        assert_eq!(r.read_u8(), b'!');
    }

    #[test]
    fn sequential_column_is_forward_only() {
        let io = MemoryTransport::new(framed(b"0123456789", b"!")).chunks([4, 3]);
        let mut r = PgReader::new(io);
        let mode = IoMode::Blocking;
        run_sync(async {
            r.buffer(mode, 4).await?;
            let len = r.read_i32();
            let mut scope = r.begin_nested_read(mode, len, Size::UNKNOWN).await?;
            let mut stream = scope.column_stream(mode).await?;
            assert!(!stream.is_seekable());

            let mut out = [0u8; 2];
            stream.read_exact(&mut out).unwrap();
            assert_eq!(&out, b"01");
            assert!(stream.seek(SeekFrom::Start(0)).is_err());
            assert!(stream.seek(SeekFrom::Current(8)).is_err());
            assert_eq!(stream.seek(SeekFrom::Current(1)).unwrap(), 3);
            stream.read_exact(&mut out).unwrap();
            assert_eq!(&out, b"34");
            Ok::<_, Error>(())
        }).unwrap();

        run_sync(r.buffer(IoMode::Blocking, 1)).unwrap();
        assert_eq!(r.read_u8(), b'!');
    }

    #[tokio::test]
    async fn async_read_one_byte_at_a_time() {
        use tokio::io::AsyncReadExt;

        let io = MemoryTransport::new(framed(b"streamed", b"!")).chunks([1]).pending(true);
        let mut r = PgReader::new(io);
        let mode = IoMode::Async;

        r.buffer(mode, 4).await.unwrap();
        let len = r.read_i32();
        let mut scope = r.begin_nested_read(mode, len, Size::UNKNOWN).await.unwrap();
        let mut stream = scope.column_stream(mode).await.unwrap();
        let mut out = String::new();
        AsyncReadExt::read_to_string(&mut stream, &mut out).await.unwrap();
        assert_eq!(out, "streamed");
        drop(stream);
        drop(scope);

        r.buffer(mode, 1).await.unwrap();
        assert_eq!(r.read_u8(), b'!');
    }
}
