//! The [`PgTransport`] trait.
//!
//! - [`SyncTransport`], any [`std::io::Read`] + [`std::io::Write`]
//! - [`TokioTransport`], any tokio `AsyncRead` + `AsyncWrite`, requires `tokio` feature
//! - [`MemoryTransport`], in memory chunked replay
use bytes::BytesMut;
use std::{
    io,
    task::{Context, Poll},
};

mod memory;

pub use memory::{MemorySink, MemoryTransport};

/// Size of a single read request to the underlying io.
pub(crate) const READ_CHUNK: usize = 8 * 1024;

/// Byte stream underneath [`PgReader`][crate::PgReader] and [`PgWriter`][crate::PgWriter].
///
/// Every operation has a polling variant used by [`IoMode::Async`][crate::IoMode::Async]
/// and a blocking variant used by [`IoMode::Blocking`][crate::IoMode::Blocking].
pub trait PgTransport: Send {
    /// Poll to read bytes, appending into `buf`.
    ///
    /// Returning `Ok(0)` means the stream is closed.
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>>;

    /// Read bytes, appending into `buf`, blocking the current thread.
    fn read_blocking(&mut self, buf: &mut BytesMut) -> io::Result<usize>;

    /// Poll to write bytes from `buf`, returns number of bytes written.
    fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>>;

    /// Write bytes from `buf`, blocking the current thread.
    fn write_blocking(&mut self, buf: &[u8]) -> io::Result<usize>;

    /// Poll to flush the underlying io.
    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        let _ = cx;
        Poll::Ready(Ok(()))
    }

    /// Flush the underlying io, blocking the current thread.
    fn flush_blocking(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<P> PgTransport for Box<P> where P: PgTransport + ?Sized {
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        P::poll_read(self, cx, buf)
    }

    fn read_blocking(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        P::read_blocking(self, buf)
    }

    fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        P::poll_write(self, cx, buf)
    }

    fn write_blocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        P::write_blocking(self, buf)
    }

    fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
        P::poll_flush(self, cx)
    }

    fn flush_blocking(&mut self) -> io::Result<()> {
        P::flush_blocking(self)
    }
}

/// Read from a std reader into the spare capacity of `buf`.
fn read_into<R: io::Read + ?Sized>(io: &mut R, buf: &mut BytesMut) -> io::Result<usize> {
    let start = buf.len();
    buf.resize(start + READ_CHUNK, 0);
    let read = io.read(&mut buf[start..]);
    let n = *read.as_ref().unwrap_or(&0);
    buf.truncate(start + n);
    read
}

/// [`PgTransport`] over blocking std io.
///
/// Polling never returns [`Poll::Pending`], it blocks the current thread instead.
#[derive(Debug)]
pub struct SyncTransport<S> {
    io: S,
}

impl<S> SyncTransport<S> {
    pub fn new(io: S) -> SyncTransport<S> {
        SyncTransport { io }
    }

    pub fn get_ref(&self) -> &S {
        &self.io
    }

    pub fn into_inner(self) -> S {
        self.io
    }
}

impl<S> PgTransport for SyncTransport<S>
where
    S: io::Read + io::Write + Send,
{
    fn poll_read(&mut self, _: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        Poll::Ready(self.read_blocking(buf))
    }

    fn read_blocking(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        read_into(&mut self.io, buf)
    }

    fn poll_write(&mut self, _: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        Poll::Ready(self.io.write(buf))
    }

    fn write_blocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.io.write(buf)
    }

    fn poll_flush(&mut self, _: &mut Context) -> Poll<io::Result<()>> {
        Poll::Ready(self.io.flush())
    }

    fn flush_blocking(&mut self) -> io::Result<()> {
        self.io.flush()
    }
}

#[cfg(feature = "tokio")]
pub use tokio_io::TokioTransport;

#[cfg(feature = "tokio")]
mod tokio_io {
    use bytes::{BufMut, BytesMut};
    use std::{
        io,
        pin::Pin,
        task::{Context, Poll, ready},
    };
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

    use super::{PgTransport, READ_CHUNK};

    /// [`PgTransport`] over tokio io.
    ///
    /// Blocking operations are not supported and returns [`io::ErrorKind::Unsupported`].
    #[derive(Debug)]
    pub struct TokioTransport<S> {
        io: S,
    }

    impl<S> TokioTransport<S> {
        pub fn new(io: S) -> TokioTransport<S> {
            TokioTransport { io }
        }

        pub fn get_ref(&self) -> &S {
            &self.io
        }

        pub fn into_inner(self) -> S {
            self.io
        }
    }

    fn blocking_unsupported() -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, "blocking io on an async transport")
    }

    impl<S> PgTransport for TokioTransport<S>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send,
    {
        fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
            buf.reserve(READ_CHUNK);

            let n = {
                let dst = buf.chunk_mut();
                let dst = unsafe { dst.as_uninit_slice_mut() };
                let mut rbuf = ReadBuf::uninit(dst);
                let ptr = rbuf.filled().as_ptr();
                ready!(Pin::new(&mut self.io).poll_read(cx, &mut rbuf)?);

                // Ensure the pointer does not change from under us
                assert_eq!(ptr, rbuf.filled().as_ptr());
                rbuf.filled().len()
            };

            // Safety: This is guaranteed to be the number of initialized (and read)
            // bytes due to the invariants provided by `ReadBuf::filled`.
            unsafe {
                buf.advance_mut(n);
            }

            Poll::Ready(Ok(n))
        }

        fn read_blocking(&mut self, _: &mut BytesMut) -> io::Result<usize> {
            Err(blocking_unsupported())
        }

        fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.io).poll_write(cx, buf)
        }

        fn write_blocking(&mut self, _: &[u8]) -> io::Result<usize> {
            Err(blocking_unsupported())
        }

        fn poll_flush(&mut self, cx: &mut Context) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_flush(cx)
        }

        fn flush_blocking(&mut self) -> io::Result<()> {
            Err(blocking_unsupported())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sync_transport_reads_and_writes() {
        let mut io = SyncTransport::new(io::Cursor::new(b"abc".to_vec()));
        let mut buf = BytesMut::new();
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 3);
        assert_eq!(&buf[..], b"abc");
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 0);
        assert_eq!(&buf[..], b"abc");

        assert_eq!(io.write_blocking(b"de").unwrap(), 2);
        assert_eq!(&io.into_inner().into_inner()[..], b"abcde");
    }
}
