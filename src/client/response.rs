use std::{
    fmt,
    io::{self, Cursor, Read, Write},
    time::Duration,
};

use bytes::{Buf, Bytes};
use http::{header::CONTENT_LENGTH, HeaderMap, StatusCode};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tokio::sync::mpsc;

use super::{
    client::KeepCoreThreadAlive,
    exec::{Answer, RawBody},
    wait,
};
use crate::Error;

/// A Response to a submitted `Request`.
///
/// The body is read through [`Read`]. Small bodies of known length are
/// already in memory when the response is handed out; larger ones are pulled
/// from the connection as they are read, each read bounded by the client's
/// read timeout. A hijacked response reads whatever the daemon sends until it
/// closes the stream, without a timeout.
pub struct Response {
    status: StatusCode,
    headers: HeaderMap,
    body: ResponseBody,
    timeout: Option<Duration>,
    _thread_handle: KeepCoreThreadAlive,
}

enum ResponseBody {
    Buffered(Cursor<Bytes>),
    Streaming { body: Incoming, chunk: Bytes },
    Hijacked {
        rx: mpsc::Receiver<io::Result<Bytes>>,
        chunk: Bytes,
    },
    Done,
}

impl Response {
    pub(crate) fn new(
        answer: Answer,
        timeout: Option<Duration>,
        thread: KeepCoreThreadAlive,
    ) -> Response {
        let body = match answer.body {
            RawBody::Buffered(bytes) => ResponseBody::Buffered(Cursor::new(bytes)),
            RawBody::Streaming(body) => ResponseBody::Streaming {
                body,
                chunk: Bytes::new(),
            },
            RawBody::Hijacked(rx) => ResponseBody::Hijacked {
                rx,
                chunk: Bytes::new(),
            },
        };
        Response {
            status: answer.status,
            headers: answer.headers,
            body,
            timeout,
            _thread_handle: thread,
        }
    }

    /// Get the `StatusCode` of this `Response`.
    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Get the `Headers` of this `Response`.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the `Headers` of this `Response`.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The first value of a header, matched case-insensitively.
    ///
    /// Values that are not visible ASCII are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Every header as a name with all of its values, names in the order
    /// they first appeared.
    pub fn header_map(&self) -> Vec<(String, Vec<String>)> {
        self.headers
            .keys()
            .map(|name| {
                let values = self
                    .headers
                    .get_all(name)
                    .iter()
                    .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
                    .collect();
                (name.as_str().to_owned(), values)
            })
            .collect()
    }

    /// The body length, if the daemon announced it.
    pub fn content_length(&self) -> Option<u64> {
        match self.body {
            ResponseBody::Buffered(ref cursor) if !self.headers.contains_key(CONTENT_LENGTH) => {
                Some(cursor.get_ref().len() as u64)
            }
            _ => self
                .header(CONTENT_LENGTH.as_str())
                .and_then(|v| v.parse().ok()),
        }
    }

    /// Whether the whole body was read before the response was returned.
    pub fn is_buffered(&self) -> bool {
        matches!(self.body, ResponseBody::Buffered(_))
    }

    /// Whether the body is the raw stream of a hijacked connection.
    pub fn is_hijacked(&self) -> bool {
        matches!(self.body, ResponseBody::Hijacked { .. })
    }

    /// Get the full response body as `Bytes`.
    ///
    /// # Errors
    ///
    /// Fails if a read times out or the connection breaks.
    pub fn bytes(mut self) -> crate::Result<Bytes> {
        if let ResponseBody::Buffered(ref mut cursor) = self.body {
            let pos = cursor.position() as usize;
            return Ok(cursor.get_ref().slice(pos..));
        }
        let mut buf = Vec::new();
        self.read_to_end(&mut buf).map_err(Error::from_io)?;
        Ok(buf.into())
    }

    /// Get the response text, replacing invalid UTF-8 sequences.
    ///
    /// # Errors
    ///
    /// Fails if a read times out or the connection breaks.
    pub fn text(self) -> crate::Result<String> {
        let bytes = self.bytes()?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Copy the response body into a writer.
    ///
    /// Returns the number of bytes copied.
    ///
    /// # Errors
    ///
    /// Fails if a read times out, the connection breaks or the writer fails.
    pub fn copy_to<W: ?Sized>(&mut self, w: &mut W) -> crate::Result<u64>
    where
        W: Write,
    {
        io::copy(self, w).map_err(Error::from_io)
    }

    fn read_streaming(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let timeout = self.timeout;
        let (body, chunk) = match self.body {
            ResponseBody::Streaming {
                ref mut body,
                ref mut chunk,
            } => (body, chunk),
            _ => return Ok(0),
        };

        while !chunk.has_remaining() {
            let next = wait::timeout(
                async {
                    match body.frame().await {
                        Some(Ok(frame)) => Ok(Some(frame)),
                        Some(Err(e)) => Err(Error::transport(e)),
                        None => Ok(None),
                    }
                },
                timeout,
            );
            match next {
                Ok(Some(frame)) => {
                    // Trailers carry no body bytes.
                    if let Ok(data) = frame.into_data() {
                        *chunk = data;
                    }
                }
                Ok(None) => {
                    self.body = ResponseBody::Done;
                    return Ok(0);
                }
                Err(wait::Waited::TimedOut) => return Err(Error::timeout().into_io()),
                Err(wait::Waited::Inner(e)) => return Err(e.into_io()),
            }
        }

        let n = chunk.len().min(buf.len());
        chunk.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }

    fn read_hijacked(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let (rx, chunk) = match self.body {
            ResponseBody::Hijacked {
                ref mut rx,
                ref mut chunk,
            } => (rx, chunk),
            _ => return Ok(0),
        };

        while !chunk.has_remaining() {
            let next = wait::timeout(async { Ok::<_, Error>(rx.recv().await) }, None);
            match next {
                Ok(Some(Ok(data))) if data.is_empty() => {
                    self.body = ResponseBody::Done;
                    return Ok(0);
                }
                Ok(Some(Ok(data))) => *chunk = data,
                Ok(Some(Err(e))) => {
                    self.body = ResponseBody::Done;
                    return Err(Error::transport(e).into_io());
                }
                // Torn down without the end-of-stream chunk, not a clean close.
                Ok(None) => {
                    self.body = ResponseBody::Done;
                    return Err(Error::transport("client closed").into_io());
                }
                Err(wait::Waited::TimedOut) => return Err(Error::timeout().into_io()),
                Err(wait::Waited::Inner(e)) => return Err(e.into_io()),
            }
        }

        let n = chunk.len().min(buf.len());
        chunk.copy_to_slice(&mut buf[..n]);
        Ok(n)
    }
}

impl Read for Response {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        match self.body {
            ResponseBody::Buffered(ref mut cursor) => cursor.read(buf),
            ResponseBody::Streaming { .. } => self.read_streaming(buf),
            ResponseBody::Hijacked { .. } => self.read_hijacked(buf),
            ResponseBody::Done => Ok(0),
        }
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let body = match self.body {
            ResponseBody::Buffered(_) => "buffered",
            ResponseBody::Streaming { .. } => "streaming",
            ResponseBody::Hijacked { .. } => "hijacked",
            ResponseBody::Done => "done",
        };
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .field("body", &body)
            .finish()
    }
}
