use std::{error::Error as StdError, fmt, io};

use bytes::Bytes;
use http::{StatusCode, Uri};

/// A `Result` alias where the `Err` case is `docker_transport::Error`.
pub type Result<T> = std::result::Result<T, Error>;

/// A boxed error type that can be used for dynamic error handling.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// The Errors that may occur when building a `Client` or executing a `Request`.
///
/// Every failure belongs to exactly one kind, queried through the `is_*`
/// predicates:
///
/// - [`is_configuration`](Error::is_configuration): the endpoint string or the
///   client configuration was rejected. Never retried by this crate.
/// - [`is_connect`](Error::is_connect): the daemon was unreachable within the
///   connect timeout.
/// - [`is_timeout`](Error::is_timeout): the request deadline fired. The remote
///   side may or may not have processed the request.
/// - [`is_transport`](Error::is_transport): reading or writing failed after the
///   connection was established, including inside a hijacked session.
/// - [`is_upgrade_refused`](Error::is_upgrade_refused): the daemon answered a
///   hijack request without switching protocols.
pub struct Error {
    inner: Box<Inner>,
}

struct Inner {
    kind: Kind,
    source: Option<BoxError>,
    uri: Option<Uri>,
}

impl Error {
    pub(crate) fn new<E>(kind: Kind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(Inner {
                kind,
                source: source.map(Into::into),
                uri: None,
            }),
        }
    }

    pub(crate) fn configuration<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Configuration, Some(e))
    }

    pub(crate) fn connect<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Connect, Some(e))
    }

    pub(crate) fn timeout() -> Error {
        Error::new(Kind::Timeout, Some(TimedOut))
    }

    pub(crate) fn transport<E: Into<BoxError>>(e: E) -> Error {
        Error::new(Kind::Transport, Some(e))
    }

    pub(crate) fn upgrade_refused(status: StatusCode, body: Bytes) -> Error {
        Error::new(Kind::UpgradeRefused(status, body), None::<Error>)
    }

    /// Classifies a failure reported by the pooled HTTP client.
    pub(crate) fn from_pool(err: hyper_util::client::legacy::Error) -> Error {
        if err.is_connect() {
            Error::connect(err)
        } else {
            Error::transport(err)
        }
    }

    /// Unwraps an `io::Error` that carries one of ours, otherwise treats it as
    /// a transport failure.
    pub(crate) fn from_io(e: io::Error) -> Error {
        if e.get_ref().map(|r| r.is::<Error>()).unwrap_or(false) {
            match e.into_inner().map(|inner| inner.downcast::<Error>()) {
                Some(Ok(err)) => *err,
                Some(Err(other)) => Error::transport(other),
                None => Error::transport("unknown io error"),
            }
        } else if e.kind() == io::ErrorKind::TimedOut {
            Error::new(Kind::Timeout, Some(e))
        } else {
            Error::transport(e)
        }
    }

    pub(crate) fn into_io(self) -> io::Error {
        let kind = match self.inner.kind {
            Kind::Timeout => io::ErrorKind::TimedOut,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, self)
    }
}

impl Error {
    /// Returns a possible URI related to this error.
    pub fn uri(&self) -> Option<&Uri> {
        self.inner.uri.as_ref()
    }

    /// Add a uri related to this error (overwriting any existing)
    pub fn with_uri(mut self, uri: Uri) -> Self {
        self.inner.uri = Some(uri);
        self
    }

    /// Strip the related uri from this error
    pub fn without_uri(mut self) -> Self {
        self.inner.uri = None;
        self
    }

    /// Returns true if the endpoint string or client configuration was rejected.
    pub fn is_configuration(&self) -> bool {
        matches!(self.inner.kind, Kind::Configuration)
    }

    /// Returns true if the daemon could not be reached within the connect timeout.
    pub fn is_connect(&self) -> bool {
        matches!(self.inner.kind, Kind::Connect)
    }

    /// Returns true if the error is related to a timeout.
    ///
    /// This covers the request deadline as well as a connect attempt that ran
    /// out of time (which is also [`is_connect`](Error::is_connect)).
    pub fn is_timeout(&self) -> bool {
        if matches!(self.inner.kind, Kind::Timeout) {
            return true;
        }

        let mut source = self.source();

        while let Some(err) = source {
            if err.is::<TimedOut>() {
                return true;
            }

            if let Some(io) = err.downcast_ref::<io::Error>() {
                if io.kind() == io::ErrorKind::TimedOut {
                    return true;
                }
            }

            source = err.source();
        }

        false
    }

    /// Returns true if reading or writing failed on an established connection.
    pub fn is_transport(&self) -> bool {
        matches!(self.inner.kind, Kind::Transport)
    }

    /// Returns true if the daemon declined to hijack the connection.
    pub fn is_upgrade_refused(&self) -> bool {
        matches!(self.inner.kind, Kind::UpgradeRefused(..))
    }

    /// Returns the status code the daemon answered a refused hijack with.
    pub fn status(&self) -> Option<StatusCode> {
        match self.inner.kind {
            Kind::UpgradeRefused(code, _) => Some(code),
            _ => None,
        }
    }

    /// Returns the body the daemon sent along with a refused hijack.
    ///
    /// The daemon usually explains the refusal here. Bodies longer than 64 KiB
    /// are not kept.
    pub fn body(&self) -> Option<&[u8]> {
        match self.inner.kind {
            Kind::UpgradeRefused(_, ref body) => Some(body),
            _ => None,
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("docker_transport::Error");

        builder.field("kind", &self.inner.kind);

        if let Some(ref uri) = self.inner.uri {
            builder.field("uri", uri);
        }

        if let Some(ref source) = self.inner.source {
            builder.field("source", source);
        }

        builder.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.kind {
            Kind::Configuration => f.write_str("configuration error")?,
            Kind::Connect => f.write_str("error connecting to daemon")?,
            Kind::Timeout => f.write_str("request timed out")?,
            Kind::Transport => f.write_str("transport error")?,
            Kind::UpgradeRefused(ref code, _) => {
                write!(f, "daemon refused connection upgrade ({code})")?
            }
        };

        if let Some(uri) = &self.inner.uri {
            write!(f, " for uri ({uri})")?;
        }

        if let Some(e) = &self.inner.source {
            write!(f, ": {e}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source.as_ref().map(|e| &**e as _)
    }
}

#[derive(Debug)]
pub(crate) enum Kind {
    Configuration,
    Connect,
    Timeout,
    Transport,
    UpgradeRefused(StatusCode, Bytes),
}

#[derive(Debug)]
pub(crate) struct TimedOut;

impl fmt::Display for TimedOut {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("operation timed out")
    }
}

impl StdError for TimedOut {}

#[derive(Debug)]
pub(crate) struct BadScheme(pub(crate) String);

impl fmt::Display for BadScheme {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "unsupported endpoint scheme: {:?}", self.0)
    }
}

impl StdError for BadScheme {}
