use std::{
    fmt,
    fs::File,
    io::{self, Read},
    pin::Pin,
    task::{ready, Context, Poll},
};

use bytes::Bytes;
use http_body::{Body as HttpBody, Frame, SizeHint};
use tokio::sync::mpsc;

use crate::error::BoxError;

/// Size of one unit read from a blocking source, for request bodies and
/// hijack input alike.
pub(crate) const CHUNK_SIZE: usize = 8192;

/// The body of a `Request`.
///
/// A body is either a fixed buffer, sent in full, or a streaming source
/// implementing [`Read`], which is drained in bounded chunks on a worker
/// thread so a slow source never stalls the I/O thread.
pub struct Body {
    kind: Kind,
}

enum Kind {
    Reader(Box<dyn Read + Send>, Option<u64>),
    Bytes(Bytes),
}

impl Body {
    /// Instantiate a `Body` from a reader.
    ///
    /// # Note
    ///
    /// While allowing for many types to be used, these bodies do not have
    /// a way to reset to the beginning and be reused. They are sent with
    /// chunked transfer encoding since their length is unknown.
    ///
    /// ```rust
    /// # use std::fs::File;
    /// # use docker_transport::Body;
    /// # fn run() -> Result<(), Box<dyn std::error::Error>> {
    /// let file = File::open("context.tar")?;
    /// let body = Body::new(file);
    /// # Ok(())
    /// # }
    /// ```
    pub fn new<R: Read + Send + 'static>(reader: R) -> Body {
        Body {
            kind: Kind::Reader(Box::new(reader), None),
        }
    }

    /// Create a `Body` from a reader with a known length, sent with a
    /// `Content-Length` header.
    ///
    /// The reader must yield exactly `len` bytes; the request fails otherwise.
    pub fn sized<R: Read + Send + 'static>(reader: R, len: u64) -> Body {
        Body {
            kind: Kind::Reader(Box::new(reader), Some(len)),
        }
    }

    /// An empty fixed body.
    pub fn empty() -> Body {
        Body::from(Bytes::new())
    }

    /// Returns the body as a byte slice if it is a fixed buffer.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self.kind {
            Kind::Reader(..) => None,
            Kind::Bytes(ref bytes) => Some(bytes.as_ref()),
        }
    }

    /// The length of the body, when it is known up front.
    pub fn len(&self) -> Option<u64> {
        match self.kind {
            Kind::Reader(_, len) => len,
            Kind::Bytes(ref bytes) => Some(bytes.len() as u64),
        }
    }

    /// Whether the body is known to be empty.
    pub fn is_empty(&self) -> bool {
        self.len() == Some(0)
    }

    /// Converts into the form the connection writes from.
    ///
    /// Must be called from inside the client runtime: a streaming source
    /// starts being drained on the blocking pool right away.
    pub(crate) fn into_async(self) -> AsyncBody {
        match self.kind {
            Kind::Bytes(chunk) => AsyncBody::Full(chunk),
            Kind::Reader(reader, len) => AsyncBody::Channel {
                rx: spawn_reader(reader),
                remaining: len,
            },
        }
    }
}

impl From<Bytes> for Body {
    #[inline]
    fn from(bytes: Bytes) -> Body {
        Body {
            kind: Kind::Bytes(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    #[inline]
    fn from(v: Vec<u8>) -> Body {
        Body::from(Bytes::from(v))
    }
}

impl From<String> for Body {
    #[inline]
    fn from(s: String) -> Body {
        Body::from(Bytes::from(s))
    }
}

impl From<&'static [u8]> for Body {
    #[inline]
    fn from(s: &'static [u8]) -> Body {
        Body::from(Bytes::from_static(s))
    }
}

impl From<&'static str> for Body {
    #[inline]
    fn from(s: &'static str) -> Body {
        Body::from(s.as_bytes())
    }
}

impl From<File> for Body {
    #[inline]
    fn from(f: File) -> Body {
        match f.metadata() {
            Ok(meta) if meta.is_file() => Body::sized(f, meta.len()),
            _ => Body::new(f),
        }
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kind {
            Kind::Reader(_, ref len) => f
                .debug_struct("Body")
                .field("kind", &"Reader")
                .field("len", len)
                .finish(),
            Kind::Bytes(ref bytes) => f
                .debug_struct("Body")
                .field("kind", &"Bytes")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Drains `reader` on the blocking pool into a channel with room for a
/// single chunk, so at most two chunks are in memory at once.
pub(crate) fn spawn_reader<R>(reader: R) -> mpsc::Receiver<io::Result<Bytes>>
where
    R: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel(1);
    tokio::task::spawn_blocking(move || pump_reader(reader, tx));
    rx
}

fn pump_reader<R: Read>(mut reader: R, tx: mpsc::Sender<io::Result<Bytes>>) {
    let mut buf = vec![0; CHUNK_SIZE];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => {
                trace!("blocking source reached end of input");
                return;
            }
            Ok(n) => {
                if tx.blocking_send(Ok(Bytes::copy_from_slice(&buf[..n]))).is_err() {
                    trace!("blocking source abandoned, receiver dropped");
                    return;
                }
            }
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                debug!("blocking source failed: {}", e);
                let _ = tx.blocking_send(Err(e));
                return;
            }
        }
    }
}

/// The async side of a [`Body`], written by hyper.
pub(crate) enum AsyncBody {
    Full(Bytes),
    Channel {
        rx: mpsc::Receiver<io::Result<Bytes>>,
        remaining: Option<u64>,
    },
}

impl AsyncBody {
    pub(crate) fn empty() -> AsyncBody {
        AsyncBody::Full(Bytes::new())
    }
}

impl HttpBody for AsyncBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        match *self {
            AsyncBody::Full(ref mut bytes) => {
                let out = bytes.split_off(0);
                if out.is_empty() {
                    Poll::Ready(None)
                } else {
                    Poll::Ready(Some(Ok(Frame::data(out))))
                }
            }
            AsyncBody::Channel {
                ref mut rx,
                ref mut remaining,
            } => match ready!(rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    if let Some(remaining) = remaining {
                        *remaining = remaining.saturating_sub(chunk.len() as u64);
                    }
                    Poll::Ready(Some(Ok(Frame::data(chunk))))
                }
                Some(Err(e)) => Poll::Ready(Some(Err(e.into()))),
                None => Poll::Ready(None),
            },
        }
    }

    fn size_hint(&self) -> SizeHint {
        match *self {
            AsyncBody::Full(ref bytes) => SizeHint::with_exact(bytes.len() as u64),
            AsyncBody::Channel {
                remaining: Some(len),
                ..
            } => SizeHint::with_exact(len),
            AsyncBody::Channel { .. } => SizeHint::default(),
        }
    }

    fn is_end_stream(&self) -> bool {
        match *self {
            AsyncBody::Full(ref bytes) => bytes.is_empty(),
            AsyncBody::Channel { remaining, .. } => remaining == Some(0),
        }
    }
}
