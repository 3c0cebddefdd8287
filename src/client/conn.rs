//! Opening connections to the daemon.
//!
//! A [`Connector`] is bound to one [`Endpoint`] and ignores the URI it is
//! called with: every request of a client goes to the same socket, pipe or
//! TCP address.

#[cfg(windows)]
mod npipe;
#[cfg(unix)]
mod uds;

use std::{
    future::Future,
    io::{self, IoSlice},
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use http::Uri;
use hyper::rt::{Read, ReadBufCursor, Write};
use hyper_util::{
    client::legacy::connect::{Connected, Connection},
    rt::TokioIo,
};
use pin_project_lite::pin_project;
use tokio::{
    io::{AsyncRead, AsyncWrite, ReadBuf},
    net::TcpStream,
};

use crate::{
    endpoint::{Endpoint, Scheme},
    error::{BoxError, TimedOut},
};

pub(crate) type Connecting = Pin<Box<dyn Future<Output = Result<Conn, BoxError>> + Send>>;

/// Opens connections to one endpoint, bounded by the connect timeout.
#[derive(Clone, Debug)]
pub(crate) struct Connector {
    endpoint: Arc<Endpoint>,
    timeout: Duration,
}

impl Connector {
    pub(crate) fn new(endpoint: Arc<Endpoint>, timeout: Duration) -> Connector {
        Connector { endpoint, timeout }
    }

    /// Opens a fresh connection, outside of any pool.
    pub(crate) async fn connect(&self) -> Result<Conn, BoxError> {
        let endpoint = self.endpoint.clone();
        trace!("connecting to {}", endpoint);
        match tokio::time::timeout(self.timeout, open(&endpoint, self.timeout)).await {
            Ok(Ok(stream)) => {
                trace!("connected to {}", endpoint);
                Ok(Conn {
                    inner: TokioIo::new(stream),
                })
            }
            Ok(Err(e)) => {
                debug!("connecting to {} failed: {}", endpoint, e);
                Err(e.into())
            }
            Err(_elapsed) => {
                debug!("connecting to {} timed out after {:?}", endpoint, self.timeout);
                Err(TimedOut.into())
            }
        }
    }
}

impl tower_service::Service<Uri> for Connector {
    type Response = Conn;
    type Error = BoxError;
    type Future = Connecting;

    #[inline]
    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, _dst: Uri) -> Self::Future {
        let connector = self.clone();
        Box::pin(async move { connector.connect().await })
    }
}

#[cfg_attr(not(windows), allow(unused_variables))]
async fn open(endpoint: &Endpoint, timeout: Duration) -> io::Result<Stream> {
    match endpoint.scheme() {
        Scheme::Tcp => {
            let host = endpoint
                .host()
                .trim_start_matches('[')
                .trim_end_matches(']');
            let port = endpoint
                .port()
                .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "tcp endpoint without port"))?;
            let stream = TcpStream::connect((host, port)).await?;
            stream.set_nodelay(true)?;
            Ok(Stream::Tcp(stream))
        }
        Scheme::Unix => {
            let path = local_path(endpoint)?;
            #[cfg(unix)]
            {
                uds::connect(path).await.map(Stream::Unix)
            }
            #[cfg(not(unix))]
            {
                Err(unsupported(format!(
                    "unix sockets are not available on this platform: {}",
                    path.display()
                )))
            }
        }
        Scheme::NamedPipe => {
            let path = local_path(endpoint)?;
            #[cfg(windows)]
            {
                npipe::connect(path, timeout).await.map(Stream::Pipe)
            }
            #[cfg(not(windows))]
            {
                Err(unsupported(format!(
                    "named pipes are only available on windows: {}",
                    path.display()
                )))
            }
        }
    }
}

fn local_path(endpoint: &Endpoint) -> io::Result<&std::path::Path> {
    endpoint
        .path()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "local endpoint without path"))
}

fn unsupported(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::Unsupported, msg)
}

/// The byte stream underneath a connection.
#[derive(Debug)]
pub(crate) enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(tokio::net::UnixStream),
    #[cfg(windows)]
    Pipe(tokio::net::windows::named_pipe::NamedPipeClient),
}

macro_rules! with_stream {
    ($self:ident, $io:ident => $e:expr) => {
        match $self.get_mut() {
            Stream::Tcp($io) => $e,
            #[cfg(unix)]
            Stream::Unix($io) => $e,
            #[cfg(windows)]
            Stream::Pipe($io) => $e,
        }
    };
}

impl AsyncRead for Stream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        with_stream!(self, io => Pin::new(io).poll_read(cx, buf))
    }
}

impl AsyncWrite for Stream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        with_stream!(self, io => Pin::new(io).poll_write(cx, buf))
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        with_stream!(self, io => Pin::new(io).poll_write_vectored(cx, bufs))
    }

    fn is_write_vectored(&self) -> bool {
        match self {
            Stream::Tcp(io) => io.is_write_vectored(),
            #[cfg(unix)]
            Stream::Unix(io) => io.is_write_vectored(),
            #[cfg(windows)]
            Stream::Pipe(io) => io.is_write_vectored(),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_stream!(self, io => Pin::new(io).poll_flush(cx))
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        with_stream!(self, io => Pin::new(io).poll_shutdown(cx))
    }
}

pin_project! {
    /// A connection handed to hyper.
    #[derive(Debug)]
    pub(crate) struct Conn {
        #[pin]
        inner: TokioIo<Stream>,
    }
}

impl Connection for Conn {
    fn connected(&self) -> Connected {
        Connected::new()
    }
}

impl Read for Conn {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: ReadBufCursor<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.project();
        Read::poll_read(this.inner, cx, buf)
    }
}

impl Write for Conn {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context,
        buf: &[u8],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        Write::poll_write(this.inner, cx, buf)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[IoSlice<'_>],
    ) -> Poll<Result<usize, io::Error>> {
        let this = self.project();
        Write::poll_write_vectored(this.inner, cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.is_write_vectored()
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), io::Error>> {
        let this = self.project();
        Write::poll_flush(this.inner, cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context) -> Poll<Result<(), io::Error>> {
        let this = self.project();
        Write::poll_shutdown(this.inner, cx)
    }
}
