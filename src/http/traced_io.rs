// Probes that notice when a request has left the client and when the response
// starts to arrive. hyper drives the IO and the body from inside its
// connection future, so the probes only flip flags; the transport turns the
// flags into trace hooks on its own task.

use crate::trace::ClientTrace;
use hyper::body::{Body, Frame, SizeHint};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Stream a traced connection runs over, plain TCP or TLS.
pub trait Io: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> Io for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// Progress of the exchange currently in flight on one connection.
#[derive(Debug, Default)]
pub struct IoProbe {
    body_done: AtomicBool,
    written: AtomicBool,
    first_byte: AtomicBool,
}

impl IoProbe {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Clears all flags before a new exchange starts on the connection.
    pub fn reset(&self) {
        self.body_done.store(false, Ordering::Release);
        self.written.store(false, Ordering::Release);
        self.first_byte.store(false, Ordering::Release);
    }

    fn mark_body_done(&self) {
        self.body_done.store(true, Ordering::Release);
    }

    fn on_flushed(&self) {
        if self.body_done.load(Ordering::Acquire) {
            self.written.store(true, Ordering::Release);
        }
    }

    fn on_read(&self, filled: usize) {
        if filled == 0 || !self.body_done.load(Ordering::Acquire) {
            return;
        }
        // Writers that never flush still count as written once bytes come back.
        self.written.store(true, Ordering::Release);
        self.first_byte.store(true, Ordering::Release);
    }

    pub fn request_written(&self) -> bool {
        self.written.load(Ordering::Acquire)
    }

    pub fn first_byte_received(&self) -> bool {
        self.first_byte.load(Ordering::Acquire)
    }
}

/// Which probe events have already been turned into hooks.
#[derive(Debug, Default)]
pub struct Reported {
    written: bool,
    first_byte: bool,
}

impl Reported {
    /// Raises the hooks for any probe events not reported yet, in lifecycle order.
    pub fn report(&mut self, probe: &IoProbe, trace: &mut dyn ClientTrace) {
        if !self.written && probe.request_written() {
            self.written = true;
            trace.on_request_written();
        }
        if !self.first_byte && probe.first_byte_received() {
            self.first_byte = true;
            trace.on_first_response_byte();
        }
    }
}

/// Connection stream reporting flushes and reads to an [`IoProbe`].
pub struct TracedIo {
    stream: Box<dyn Io>,
    probe: Arc<IoProbe>,
}

impl TracedIo {
    pub fn new(stream: Box<dyn Io>, probe: Arc<IoProbe>) -> Self {
        Self { stream, probe }
    }
}

impl AsyncRead for TracedIo {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let before = buf.filled().len();
        let polled = Pin::new(&mut self.stream).poll_read(cx, buf);
        if let Poll::Ready(Ok(())) = polled {
            self.probe.on_read(buf.filled().len() - before);
        }
        polled
    }
}

impl AsyncWrite for TracedIo {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
        let polled = Pin::new(&mut self.stream).poll_flush(cx);
        if let Poll::Ready(Ok(())) = polled {
            self.probe.on_flushed();
        }
        polled
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<(), io::Error>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }

    fn is_write_vectored(&self) -> bool {
        self.stream.is_write_vectored()
    }

    fn poll_write_vectored(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        Pin::new(&mut self.stream).poll_write_vectored(cx, bufs)
    }
}

/// Request body that tells the probe when hyper has consumed all of it.
pub struct TracedBody<B> {
    inner: B,
    probe: Arc<IoProbe>,
}

impl<B> TracedBody<B> {
    pub fn new(inner: B, probe: Arc<IoProbe>) -> Self {
        Self { inner, probe }
    }
}

impl<B> Body for TracedBody<B>
where
    B: Body + Unpin,
{
    type Data = B::Data;
    type Error = B::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        let polled = Pin::new(&mut self.inner).poll_frame(cx);
        if let Poll::Ready(None) = polled {
            self.probe.mark_body_done();
        }
        polled
    }

    fn is_end_stream(&self) -> bool {
        let end = self.inner.is_end_stream();
        if end {
            self.probe.mark_body_done();
        }
        end
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use http_body_util::{BodyExt, Full};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    #[derive(Default)]
    struct Events(Vec<&'static str>);

    impl ClientTrace for Events {
        fn on_request_written(&mut self) {
            self.0.push("written");
        }

        fn on_first_response_byte(&mut self) {
            self.0.push("first byte");
        }
    }

    #[tokio::test]
    async fn test_flush_before_body_end_is_not_written() {
        let (client, mut server) = tokio::io::duplex(64);
        let probe = IoProbe::new();
        let mut io = TracedIo::new(Box::new(client), probe.clone());

        io.write_all(b"GET / HTTP/1.1\r\n").await.unwrap();
        io.flush().await.unwrap();
        assert!(!probe.request_written());

        let body = TracedBody::new(Full::new(Bytes::from_static(b"x")), probe.clone());
        body.collect().await.unwrap();
        io.flush().await.unwrap();
        assert!(probe.request_written());
        assert!(!probe.first_byte_received());

        server.write_all(b"HTTP/1.1").await.unwrap();
        let mut buf = [0u8; 8];
        io.read_exact(&mut buf).await.unwrap();
        assert!(probe.first_byte_received());
    }

    #[tokio::test]
    async fn test_empty_body_is_done_at_end_stream_check() {
        let probe = IoProbe::new();
        let body = TracedBody::new(Full::new(Bytes::new()), probe.clone());
        assert!(body.is_end_stream());
        assert!(probe.body_done.load(Ordering::Acquire));
    }

    #[test]
    fn test_reported_hooks_fire_once_in_order() {
        let probe = IoProbe::new();
        let mut reported = Reported::default();
        let mut events = Events::default();

        probe.mark_body_done();
        probe.on_read(3);
        reported.report(&probe, &mut events);
        reported.report(&probe, &mut events);

        assert_eq!(events.0, vec!["written", "first byte"]);
    }

    #[test]
    fn test_reset_clears_previous_exchange() {
        let probe = IoProbe::new();
        probe.mark_body_done();
        probe.on_flushed();
        probe.reset();

        assert!(!probe.request_written());
        probe.on_read(10);
        assert!(!probe.first_byte_received());
    }
}
