//! Per-client settings.

use std::{path::PathBuf, time::Duration};

use crate::{error::Error, Endpoint};

/// How long establishing a connection may take.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How long a request may wait for its response headers.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

const DEFAULT_POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const DEFAULT_POOL_MAX_IDLE_PER_HOST: usize = 8;
const DEFAULT_MAX_BLOCKING_THREADS: usize = 16;

/// TLS settings for a TCP daemon.
///
/// This crate does not negotiate TLS itself. Asking for verification is
/// rejected when the client is built rather than silently downgraded.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsOptions {
    /// Verify the daemon's certificate.
    pub verify: bool,
    /// Directory holding `ca.pem`, `cert.pem` and `key.pem`.
    pub cert_path: Option<PathBuf>,
}

impl TlsOptions {
    pub(crate) fn check(&self) -> crate::Result<()> {
        if self.verify {
            return Err(Error::configuration(match self.cert_path {
                Some(ref path) => format!(
                    "tls verification with certificates from {} is not supported by this transport",
                    path.display()
                ),
                None => "tls verification is not supported by this transport".to_owned(),
            }));
        }
        Ok(())
    }
}

/// Everything needed to construct one [`Client`](crate::Client).
///
/// The defaults match what a local daemon expects: the platform socket (or
/// `DOCKER_HOST`), a 10 second connect timeout and a 30 second read timeout.
///
/// ```
/// use std::time::Duration;
/// use docker_transport::ClientConfig;
///
/// let config = ClientConfig::default()
///     .docker_host("tcp://127.0.0.1:2375")
///     .connect_timeout(Duration::from_secs(2));
/// assert_eq!(config.endpoint().unwrap().port(), Some(2375));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Whether a registry should build this client at all.
    pub enabled: bool,
    /// Connection string; `DOCKER_HOST` or the platform default when `None`.
    pub docker_host: Option<String>,
    /// Bound on establishing a connection.
    pub connect_timeout: Duration,
    /// Default deadline for a request's response headers.
    pub read_timeout: Duration,
    /// TLS settings, if any were configured.
    pub tls: Option<TlsOptions>,
    /// How long an unused pooled connection is kept open.
    pub pool_idle_timeout: Option<Duration>,
    /// Upper bound on idle pooled connections.
    pub pool_max_idle_per_host: usize,
    /// Size of the pool running blocking reads of request bodies and hijack input.
    pub max_blocking_threads: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            enabled: true,
            docker_host: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            tls: None,
            pool_idle_timeout: Some(DEFAULT_POOL_IDLE_TIMEOUT),
            pool_max_idle_per_host: DEFAULT_POOL_MAX_IDLE_PER_HOST,
            max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
        }
    }
}

impl ClientConfig {
    /// A default config pointing at `docker_host`.
    pub fn new(docker_host: impl Into<String>) -> ClientConfig {
        ClientConfig::default().docker_host(docker_host)
    }

    /// Sets the connection string.
    pub fn docker_host(mut self, docker_host: impl Into<String>) -> ClientConfig {
        self.docker_host = Some(docker_host.into());
        self
    }

    /// Sets whether a registry builds this client.
    pub fn enabled(mut self, enabled: bool) -> ClientConfig {
        self.enabled = enabled;
        self
    }

    /// Sets the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.connect_timeout = timeout;
        self
    }

    /// Sets the default read timeout.
    pub fn read_timeout(mut self, timeout: Duration) -> ClientConfig {
        self.read_timeout = timeout;
        self
    }

    /// Sets the TLS options.
    pub fn tls(mut self, tls: TlsOptions) -> ClientConfig {
        self.tls = Some(tls);
        self
    }

    /// Resolves the connection string.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error if the string (or `DOCKER_HOST`) is
    /// not a supported connection string.
    pub fn endpoint(&self) -> crate::Result<Endpoint> {
        match self.docker_host.as_deref() {
            Some(host) => Endpoint::parse(host),
            None => Endpoint::from_env(),
        }
    }
}
