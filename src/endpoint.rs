//! Connection strings and the targets they resolve to.
//!
//! A daemon is addressed by one of three connection strings:
//!
//! | Scheme  | Target form                   | Default port/path |
//! |---------|-------------------------------|-------------------|
//! | `unix`  | absolute filesystem path      | none              |
//! | `npipe` | pipe path, separators native  | none              |
//! | `tcp`   | `host:port[/path-prefix]`     | port required     |
//!
//! ```
//! use docker_transport::{Endpoint, Scheme};
//!
//! let endpoint: Endpoint = "tcp://10.0.0.4:2375/docker".parse().unwrap();
//! assert_eq!(endpoint.scheme(), Scheme::Tcp);
//! assert_eq!(endpoint.request_path("/_ping"), "/docker/_ping");
//! ```

use std::{
    env, fmt,
    path::{Path, PathBuf, MAIN_SEPARATOR},
    str::FromStr,
};

use http::uri::Authority;

use crate::error::{BadScheme, Error};

/// Connection string used on Windows when nothing else is configured.
pub const WINDOWS_DOCKER_HOST: &str = "npipe:////./pipe/docker_engine";

/// Connection string used on every other platform when nothing else is configured.
pub const UNIX_DOCKER_HOST: &str = "unix:///var/run/docker.sock";

/// The environment variable consulted by [`Endpoint::from_env`].
pub const DOCKER_HOST_ENV: &str = "DOCKER_HOST";

/// The transport an [`Endpoint`] is reached through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// A Unix domain socket, addressed by filesystem path.
    Unix,
    /// A Windows named pipe, addressed by pipe path.
    NamedPipe,
    /// A plain TCP connection, addressed by host and port.
    Tcp,
}

impl Scheme {
    /// The scheme as written in a connection string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Unix => "unix",
            Scheme::NamedPipe => "npipe",
            Scheme::Tcp => "tcp",
        }
    }

    /// Whether the target is addressed by a path rather than a network address.
    pub fn is_local(&self) -> bool {
        !matches!(self, Scheme::Tcp)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A resolved daemon address.
///
/// For [`Scheme::Tcp`] the host and port are always present; for the local
/// transports the path is always present and the host and port are unused.
/// An `Endpoint` never changes after it is parsed.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: Option<u16>,
    path: Option<PathBuf>,
    prefix: String,
}

impl Endpoint {
    /// Parses a connection string such as `unix:///var/run/docker.sock`.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error for any scheme other than `unix`,
    /// `npipe` and `tcp`, for a `tcp` authority without a port, and for an
    /// empty local path.
    pub fn parse(s: &str) -> crate::Result<Endpoint> {
        let (scheme, rest) = s
            .split_once("://")
            .ok_or_else(|| Error::configuration(format!("missing scheme in {s:?}")))?;

        match scheme.to_ascii_lowercase().as_str() {
            "unix" => Endpoint::unix(rest),
            "npipe" => Endpoint::named_pipe(rest),
            "tcp" => Endpoint::tcp(rest),
            _ => Err(Error::configuration(BadScheme(scheme.to_owned()))),
        }
    }

    /// The endpoint used when nothing is configured for this platform.
    pub fn platform_default() -> Endpoint {
        let s = if cfg!(windows) {
            WINDOWS_DOCKER_HOST
        } else {
            UNIX_DOCKER_HOST
        };
        // Both constants are well formed.
        match Endpoint::parse(s) {
            Ok(endpoint) => endpoint,
            Err(_) => unreachable!("default docker host must parse"),
        }
    }

    /// Reads `DOCKER_HOST`, falling back to [`Endpoint::platform_default`]
    /// when it is unset or empty.
    ///
    /// # Errors
    ///
    /// Fails if `DOCKER_HOST` is set to an unsupported connection string.
    pub fn from_env() -> crate::Result<Endpoint> {
        match env::var(DOCKER_HOST_ENV) {
            Ok(value) if !value.trim().is_empty() => Endpoint::parse(value.trim()),
            _ => Ok(Endpoint::platform_default()),
        }
    }

    fn unix(rest: &str) -> crate::Result<Endpoint> {
        if rest.is_empty() {
            return Err(Error::configuration("empty unix socket path"));
        }
        if !rest.starts_with('/') {
            return Err(Error::configuration(format!(
                "unix socket path must be absolute: {rest:?}"
            )));
        }

        Ok(Endpoint {
            scheme: Scheme::Unix,
            host: String::new(),
            port: None,
            path: Some(PathBuf::from(rest)),
            prefix: String::new(),
        })
    }

    fn named_pipe(rest: &str) -> crate::Result<Endpoint> {
        if rest.trim_matches(|c| c == '/' || c == '\\').is_empty() {
            return Err(Error::configuration("empty named pipe path"));
        }

        let mut pipe: String = rest
            .chars()
            .map(|c| if c == '/' || c == '\\' { MAIN_SEPARATOR } else { c })
            .collect();
        if !pipe.starts_with(MAIN_SEPARATOR) {
            pipe.insert(0, MAIN_SEPARATOR);
        }

        Ok(Endpoint {
            scheme: Scheme::NamedPipe,
            host: String::new(),
            port: None,
            path: Some(PathBuf::from(pipe)),
            prefix: String::new(),
        })
    }

    fn tcp(rest: &str) -> crate::Result<Endpoint> {
        let (authority, prefix) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };

        let authority = Authority::from_str(authority)
            .map_err(|e| Error::configuration(format!("invalid tcp address {authority:?}: {e}")))?;
        let port = authority
            .port_u16()
            .ok_or_else(|| Error::configuration(format!("missing port in tcp address {rest:?}")))?;
        let host = authority.host();
        if host.is_empty() {
            return Err(Error::configuration(format!(
                "missing host in tcp address {rest:?}"
            )));
        }

        Ok(Endpoint {
            scheme: Scheme::Tcp,
            host: host.to_owned(),
            port: Some(port),
            path: None,
            prefix: prefix.trim_end_matches('/').to_owned(),
        })
    }

    /// The transport this endpoint is reached through.
    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    /// The network host; empty for local transports. IPv6 hosts keep their
    /// brackets.
    #[inline]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The network port; `None` for local transports.
    #[inline]
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    /// The socket or pipe path; `None` for TCP.
    #[inline]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// The prefix prepended to every request path; empty when there is none.
    #[inline]
    pub fn path_prefix(&self) -> &str {
        &self.prefix
    }

    /// The value sent in the `Host` header and used as the pool key.
    pub(crate) fn authority(&self) -> String {
        match (self.scheme, self.port) {
            (Scheme::Tcp, Some(port)) => format!("{}:{port}", self.host),
            _ => "localhost".to_owned(),
        }
    }

    /// Joins the path prefix and a request path.
    pub fn request_path(&self, path: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + path.len() + 1);
        out.push_str(&self.prefix);
        if !path.starts_with('/') {
            out.push('/');
        }
        out.push_str(path);
        out
    }

    /// The absolute `http` URI a request path is sent to.
    pub(crate) fn request_uri(&self, path: &str) -> crate::Result<http::Uri> {
        let uri = format!("http://{}{}", self.authority(), self.request_path(path));
        http::Uri::try_from(uri)
            .map_err(|e| Error::configuration(format!("invalid request path {path:?}: {e}")))
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Endpoint::parse(s)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.scheme {
            Scheme::Tcp => write!(f, "tcp://{}{}", self.authority(), self.prefix),
            Scheme::Unix | Scheme::NamedPipe => {
                let path = self
                    .path
                    .as_deref()
                    .map(|p| p.to_string_lossy().replace('\\', "/"))
                    .unwrap_or_default();
                write!(f, "{}://{}", self.scheme, path)
            }
        }
    }
}
