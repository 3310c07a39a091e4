use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use std::{
    io,
    sync::Arc,
    task::{Context, Poll},
};

use super::PgTransport;

/// In memory [`PgTransport`].
///
/// Replays `input` in caller chosen chunk sizes and collects written bytes into
/// a shared [`MemorySink`]. Used to force suspension at every possible byte
/// boundary.
///
/// ```
/// use pgconv::transport::MemoryTransport;
///
/// let io = MemoryTransport::new(vec![0, 0, 0, 42])
///     .chunks([1])
///     .pending(true);
/// ```
#[derive(Debug)]
pub struct MemoryTransport {
    input: Bytes,
    chunks: Vec<usize>,
    nth: usize,
    pending: bool,
    ready: bool,
    read_error: bool,
    write_limit: Option<usize>,
    write_error: bool,
    sink: MemorySink,
}

/// Handle to the bytes written into a [`MemoryTransport`].
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    inner: Arc<Mutex<BytesMut>>,
}

impl MemorySink {
    /// Copy all written bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.inner.lock().to_vec()
    }

    /// Take all written bytes.
    pub fn take(&self) -> Bytes {
        self.inner.lock().split().freeze()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

impl MemoryTransport {
    /// Create transport that returns the whole input at once.
    pub fn new(input: impl Into<Bytes>) -> MemoryTransport {
        MemoryTransport {
            input: input.into(),
            chunks: Vec::new(),
            nth: 0,
            pending: false,
            ready: false,
            read_error: false,
            write_limit: None,
            write_error: false,
            sink: MemorySink::default(),
        }
    }

    /// Transport without input, for writing.
    pub fn sink() -> MemoryTransport {
        MemoryTransport::new(Bytes::new())
    }

    /// Set the size of each consecutive read, cycling when exhausted.
    ///
    /// Zero sized chunks are ignored.
    pub fn chunks(mut self, chunks: impl IntoIterator<Item = usize>) -> Self {
        self.chunks = chunks.into_iter().filter(|e| *e != 0).collect();
        self
    }

    /// Return [`Poll::Pending`] once before every chunk when polled.
    pub fn pending(mut self, value: bool) -> Self {
        self.pending = value;
        self
    }

    /// Return an io error instead of end of stream after the input is exhausted.
    pub fn read_error(mut self, value: bool) -> Self {
        self.read_error = value;
        self
    }

    /// Accept at most `limit` bytes per write call.
    pub fn write_limit(mut self, limit: usize) -> Self {
        self.write_limit = Some(limit.max(1));
        self
    }

    /// Fail every write.
    pub fn write_error(mut self, value: bool) -> Self {
        self.write_error = value;
        self
    }

    /// Returns handle to written bytes.
    pub fn output(&self) -> MemorySink {
        self.sink.clone()
    }

    /// Returns the number of input bytes not yet read.
    pub fn remaining(&self) -> usize {
        self.input.len()
    }

    fn next_chunk(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        if self.input.is_empty() {
            return match self.read_error {
                true => Err(io::Error::new(io::ErrorKind::ConnectionReset, "memory transport reset")),
                false => Ok(0),
            };
        }

        let size = match self.chunks.is_empty() {
            true => self.input.len(),
            false => self.chunks[self.nth % self.chunks.len()],
        };
        self.nth += 1;

        let chunk = self.input.split_to(size.min(self.input.len()));
        buf.put_slice(&chunk);
        Ok(chunk.len())
    }

    fn accept(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.write_error {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport closed"));
        }
        let n = self.write_limit.map_or(buf.len(), |limit|limit.min(buf.len()));
        self.sink.inner.lock().put_slice(&buf[..n]);
        Ok(n)
    }

    fn poll_pending(&mut self, cx: &mut Context) -> Poll<()> {
        if self.pending && !self.ready {
            self.ready = true;
            cx.waker().wake_by_ref();
            return Poll::Pending;
        }
        self.ready = false;
        Poll::Ready(())
    }
}

impl PgTransport for MemoryTransport {
    fn poll_read(&mut self, cx: &mut Context, buf: &mut BytesMut) -> Poll<io::Result<usize>> {
        if self.input.is_empty() && !self.read_error {
            return Poll::Ready(Ok(0));
        }
        std::task::ready!(self.poll_pending(cx));
        Poll::Ready(self.next_chunk(buf))
    }

    fn read_blocking(&mut self, buf: &mut BytesMut) -> io::Result<usize> {
        self.next_chunk(buf)
    }

    fn poll_write(&mut self, cx: &mut Context, buf: &[u8]) -> Poll<io::Result<usize>> {
        std::task::ready!(self.poll_pending(cx));
        Poll::Ready(self.accept(buf))
    }

    fn write_blocking(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.accept(buf)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::task::Waker;

    #[test]
    fn replays_in_chunks() {
        let mut io = MemoryTransport::new(&b"abcdef"[..]).chunks([2, 1]);
        let mut buf = BytesMut::new();
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 2);
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 1);
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 2);
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 1);
        assert_eq!(io.read_blocking(&mut buf).unwrap(), 0);
        assert_eq!(&buf[..], b"abcdef");
    }

    #[test]
    fn pending_before_every_chunk() {
        let mut io = MemoryTransport::new(&b"ab"[..]).chunks([1]).pending(true);
        let mut cx = Context::from_waker(Waker::noop());
        let mut buf = BytesMut::new();

        assert!(io.poll_read(&mut cx, &mut buf).is_pending());
        assert!(matches!(io.poll_read(&mut cx, &mut buf), Poll::Ready(Ok(1))));
        assert!(io.poll_read(&mut cx, &mut buf).is_pending());
        assert!(matches!(io.poll_read(&mut cx, &mut buf), Poll::Ready(Ok(1))));
        assert!(matches!(io.poll_read(&mut cx, &mut buf), Poll::Ready(Ok(0))));
    }

    #[test]
    fn partial_writes_reach_sink() {
        let mut io = MemoryTransport::sink().write_limit(3);
        let sink = io.output();
        assert_eq!(io.write_blocking(b"hello").unwrap(), 3);
        assert_eq!(io.write_blocking(b"lo").unwrap(), 2);
        assert_eq!(sink.to_vec(), b"hello");
    }
}
