use std::io::{self, IoSlice};
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use super::trace::{IoTap, TraceEventKind};

/// Transport wrapper that reports when the request first hits the socket,
/// when it is flushed, and when the first response byte arrives.
pub(crate) struct TimedIo<S> {
    inner: S,
    tap: IoTap,
    wrote: bool,
    flushed: bool,
    first_byte: bool,
}

impl<S> TimedIo<S> {
    pub(crate) fn new(inner: S, tap: IoTap) -> Self {
        Self {
            inner,
            tap,
            wrote: false,
            flushed: false,
            first_byte: false,
        }
    }

    fn on_written(&mut self, written: &Poll<io::Result<usize>>) {
        if !self.wrote && matches!(written, Poll::Ready(Ok(n)) if *n > 0) {
            self.wrote = true;
            self.tap.emit(TraceEventKind::WroteHeaders);
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for TimedIo<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let before = buf.filled().len();
        let polled = Pin::new(&mut this.inner).poll_read(cx, buf);
        if !this.first_byte && matches!(polled, Poll::Ready(Ok(()))) && buf.filled().len() > before
        {
            this.first_byte = true;
            this.tap.emit(TraceEventKind::GotFirstResponseByte);
        }
        polled
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for TimedIo<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write(cx, buf);
        this.on_written(&polled);
        polled
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_write_vectored(cx, bufs);
        this.on_written(&polled);
        polled
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let polled = Pin::new(&mut this.inner).poll_flush(cx);
        if this.wrote && !this.flushed {
            if let Poll::Ready(result) = &polled {
                this.flushed = true;
                let error = result.as_ref().err().map(ToString::to_string);
                this.tap.emit(TraceEventKind::WroteRequest { error });
            }
        }
        polled
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
