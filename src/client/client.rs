use std::{
    fmt,
    future::Future,
    sync::Arc,
    thread,
    time::Duration,
};

use http::Method;
use tokio::sync::{mpsc, oneshot};

use super::{
    exec::{Answer, Exec, PoolConfig},
    request::{Request, RequestBuilder},
    response::Response,
    wait,
};
use crate::{sync::Mutex, ClientConfig, Endpoint, Error, TlsOptions};

/// A blocking `Client` to talk to one container daemon.
///
/// The client owns a runtime thread doing all network I/O, and a pool of
/// keep-alive connections to its endpoint. Create one per daemon and
/// **reuse** it; clones share the same thread and pool.
///
/// # Panics
///
/// Every blocking method panics when called from inside an async runtime.
///
/// # Examples
///
/// ```rust,no_run
/// use docker_transport::Client;
/// #
/// # fn run() -> Result<(), docker_transport::Error> {
/// let client = Client::new("unix:///var/run/docker.sock")?;
/// let resp = client.get("/_ping").send()?;
/// assert!(resp.status().is_success());
/// #   Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: ClientHandle,
}

/// A `ClientBuilder` can be used to create a `Client` with custom configuration.
///
/// # Example
///
/// ```
/// # fn run() -> Result<(), docker_transport::Error> {
/// use std::time::Duration;
///
/// let client = docker_transport::Client::builder("tcp://127.0.0.1:2375")
///     .connect_timeout(Duration::from_secs(2))
///     .read_timeout(Duration::from_secs(10))
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct ClientBuilder {
    config: ClientConfig,
}

impl ClientBuilder {
    /// Constructs a new `ClientBuilder` for a connection string.
    pub fn new(docker_host: impl Into<String>) -> ClientBuilder {
        ClientBuilder {
            config: ClientConfig::new(docker_host),
        }
    }

    /// Returns a `Client` that uses this `ClientBuilder` configuration.
    ///
    /// # Errors
    ///
    /// This method fails if the connection string is invalid, TLS
    /// verification was requested, or the runtime thread cannot be started.
    pub fn build(self) -> crate::Result<Client> {
        ClientHandle::new(self.config).map(|inner| Client { inner })
    }

    /// Set a timeout for only the connect phase of a `Client`.
    ///
    /// Default is 10 seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the default deadline for a request's response headers.
    ///
    /// Streaming bodies apply it to each read. Default is 30 seconds.
    pub fn read_timeout(mut self, timeout: Duration) -> ClientBuilder {
        self.config.read_timeout = timeout;
        self
    }

    /// Set the TLS options.
    pub fn tls(mut self, tls: TlsOptions) -> ClientBuilder {
        self.config.tls = Some(tls);
        self
    }

    /// Set an optional timeout for idle sockets being kept-alive.
    ///
    /// Pass `None` to disable timeout. Default is 90 seconds.
    pub fn pool_idle_timeout<D>(mut self, val: D) -> ClientBuilder
    where
        D: Into<Option<Duration>>,
    {
        self.config.pool_idle_timeout = val.into();
        self
    }

    /// Sets the maximum idle connection kept in the pool.
    pub fn pool_max_idle_per_host(mut self, max: usize) -> ClientBuilder {
        self.config.pool_max_idle_per_host = max;
        self
    }

    /// Sets how many threads may read request bodies and hijack input at once.
    pub fn max_blocking_threads(mut self, max: usize) -> ClientBuilder {
        self.config.max_blocking_threads = max;
        self
    }
}

impl fmt::Debug for ClientBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl Client {
    /// Constructs a new `Client` for a connection string, with default
    /// settings.
    ///
    /// # Errors
    ///
    /// This method fails if the connection string is invalid or the runtime
    /// thread cannot be started.
    pub fn new(docker_host: impl Into<String>) -> crate::Result<Client> {
        ClientBuilder::new(docker_host).build()
    }

    /// Creates a `ClientBuilder` to configure a `Client`.
    ///
    /// This is the same as `ClientBuilder::new()`.
    pub fn builder(docker_host: impl Into<String>) -> ClientBuilder {
        ClientBuilder::new(docker_host)
    }

    /// Constructs a `Client` from a full configuration.
    ///
    /// A missing connection string falls back to `DOCKER_HOST`, then to the
    /// platform default.
    ///
    /// # Errors
    ///
    /// Same as [`ClientBuilder::build`].
    pub fn from_config(config: &ClientConfig) -> crate::Result<Client> {
        ClientHandle::new(config.clone()).map(|inner| Client { inner })
    }

    /// The endpoint this client talks to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.inner.endpoint
    }

    /// The deadline applied to requests without a timeout of their own.
    pub fn read_timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Convenience method to make a `GET` request to a path.
    pub fn get(&self, path: &str) -> RequestBuilder {
        self.request(Method::GET, path)
    }

    /// Convenience method to make a `POST` request to a path.
    pub fn post(&self, path: &str) -> RequestBuilder {
        self.request(Method::POST, path)
    }

    /// Convenience method to make a `PUT` request to a path.
    pub fn put(&self, path: &str) -> RequestBuilder {
        self.request(Method::PUT, path)
    }

    /// Convenience method to make a `DELETE` request to a path.
    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.request(Method::DELETE, path)
    }

    /// Convenience method to make a `HEAD` request to a path.
    pub fn head(&self, path: &str) -> RequestBuilder {
        self.request(Method::HEAD, path)
    }

    /// Start building a `Request` with the `Method` and path.
    ///
    /// Returns a `RequestBuilder`, which will allow setting headers and
    /// the request body before sending.
    pub fn request(&self, method: Method, path: &str) -> RequestBuilder {
        RequestBuilder::new(self.clone(), Ok(Request::new(method, path)))
    }

    /// Executes a `Request`.
    ///
    /// A `Request` can be built manually with `Request::new()` or obtained
    /// from a RequestBuilder with `RequestBuilder::build()`.
    ///
    /// The call blocks until the response headers arrive (and a small body
    /// has been read), or until the request's timeout, falling back to the
    /// client's read timeout, passes.
    ///
    /// # Errors
    ///
    /// This method fails if the daemon cannot be reached, the deadline
    /// passes, the exchange breaks, a hijack is refused, or the client was
    /// closed.
    pub fn execute(&self, request: Request) -> crate::Result<Response> {
        self.inner.execute_request(request)
    }

    /// Stops the runtime thread and drops every pooled connection.
    ///
    /// Later requests fail with a transport error, as do reads from
    /// responses that are still streaming. Calling it again does nothing.
    pub fn close(&self) {
        self.inner.inner.close();
    }

    /// Whether [`close`](Client::close) was called.
    pub fn is_closed(&self) -> bool {
        self.inner.inner.sender().is_none()
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Client")
            .field("endpoint", &self.inner.endpoint)
            .field("read_timeout", &self.inner.timeout)
            .finish()
    }
}

#[derive(Clone)]
struct ClientHandle {
    endpoint: Arc<Endpoint>,
    timeout: Duration,
    inner: Arc<InnerClientHandle>,
}

type OneshotResponse = oneshot::Sender<crate::Result<Answer>>;
type ThreadSender = mpsc::UnboundedSender<(Request, OneshotResponse)>;

struct InnerClientHandle {
    tx: Mutex<Option<ThreadSender>>,
    thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl InnerClientHandle {
    fn sender(&self) -> Option<ThreadSender> {
        self.tx.lock().clone()
    }

    fn close(&self) {
        let handle = match self.thread.lock().take() {
            Some(handle) => handle,
            None => return,
        };
        let id = handle.thread().id();

        trace!("closing runtime thread ({:?})", id);
        self.tx.lock().take();
        trace!("signaled close for runtime thread ({:?})", id);
        if id == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            error!("runtime thread ({:?}) panicked", id);
        }
        trace!("closed runtime thread ({:?})", id);
    }
}

impl Drop for InnerClientHandle {
    fn drop(&mut self) {
        self.close();
    }
}

impl ClientHandle {
    fn new(config: ClientConfig) -> crate::Result<ClientHandle> {
        let endpoint = Arc::new(config.endpoint()?);
        if let Some(ref tls) = config.tls {
            tls.check()?;
            if let Some(ref path) = tls.cert_path {
                warn!(
                    "tls certificates in {} are ignored without verification",
                    path.display()
                );
            }
        }

        let timeout = config.read_timeout;
        let connect_timeout = config.connect_timeout;
        let pool = PoolConfig {
            idle_timeout: config.pool_idle_timeout,
            max_idle_per_host: config.pool_max_idle_per_host,
        };
        let blocking_threads = config.max_blocking_threads.max(1);

        let (tx, rx) = mpsc::unbounded_channel::<(Request, OneshotResponse)>();
        let (spawn_tx, spawn_rx) = oneshot::channel::<crate::Result<()>>();
        let exec_endpoint = endpoint.clone();
        let handle = thread::Builder::new()
            .name("docker-transport-runtime".into())
            .spawn(move || {
                use tokio::runtime;
                let rt = match runtime::Builder::new_current_thread()
                    .enable_all()
                    .max_blocking_threads(blocking_threads)
                    .build()
                    .map_err(Error::configuration)
                {
                    Err(e) => {
                        if let Err(e) = spawn_tx.send(Err(e)) {
                            error!("Failed to communicate runtime creation failure: {:?}", e);
                        }
                        return;
                    }
                    Ok(v) => v,
                };

                let f = async move {
                    let exec = Arc::new(Exec::new(exec_endpoint, connect_timeout, pool));
                    if let Err(e) = spawn_tx.send(Ok(())) {
                        error!("Failed to communicate successful startup: {:?}", e);
                        return;
                    }

                    let mut rx = rx;

                    while let Some((req, req_tx)) = rx.recv().await {
                        let exec = exec.clone();
                        tokio::spawn(forward(async move { exec.execute(req).await }, req_tx));
                    }

                    trace!("({:?}) Receiver is shutdown", thread::current().id());
                };

                trace!("({:?}) start runtime::block_on", thread::current().id());
                rt.block_on(f);
                trace!("({:?}) end runtime::block_on", thread::current().id());
                // Blocking readers may sit on input that never ends.
                rt.shutdown_background();
                trace!("({:?}) finished", thread::current().id());
            })
            .map_err(Error::configuration)?;

        // Wait for the runtime thread to start up...
        match wait::timeout(spawn_rx, None) {
            Ok(Ok(())) => (),
            Ok(Err(err)) => return Err(err),
            Err(_canceled) => event_loop_panicked(),
        }

        let inner_handle = Arc::new(InnerClientHandle {
            tx: Mutex::new(Some(tx)),
            thread: Mutex::new(Some(handle)),
        });

        debug!("client started for {}", endpoint);
        Ok(ClientHandle {
            endpoint,
            timeout,
            inner: inner_handle,
        })
    }

    fn execute_request(&self, req: Request) -> crate::Result<Response> {
        let (tx, rx) = oneshot::channel();
        let uri = self.endpoint.request_uri(req.path())?;
        let timeout = req.timeout().copied().unwrap_or(self.timeout);

        let sent = match self.inner.sender() {
            Some(sender) => sender.send((req, tx)).is_ok(),
            None => false,
        };
        if !sent {
            return Err(client_closed().with_uri(uri));
        }

        let f = async move { rx.await.map_err(|_canceled| client_closed()) };
        match wait::timeout(f, Some(timeout)) {
            Ok(Err(err)) => Err(err.with_uri(uri)),
            Ok(Ok(answer)) => Ok(Response::new(
                answer,
                Some(self.timeout),
                KeepCoreThreadAlive(Some(self.inner.clone())),
            )),
            Err(wait::Waited::TimedOut) => {
                debug!("request to {} timed out after {:?}", uri, timeout);
                Err(Error::timeout().with_uri(uri))
            }
            Err(wait::Waited::Inner(err)) => Err(err.with_uri(uri)),
        }
    }
}

async fn forward<F>(fut: F, mut tx: OneshotResponse)
where
    F: Future<Output = crate::Result<Answer>>,
{
    use std::task::Poll;

    futures_util::pin_mut!(fut);

    // "select" on the sender being canceled, and the future completing
    let res = futures_util::future::poll_fn(|cx| {
        match fut.as_mut().poll(cx) {
            Poll::Ready(val) => Poll::Ready(Some(val)),
            Poll::Pending => {
                // the caller gave up waiting
                futures_core::ready!(tx.poll_closed(cx));
                Poll::Ready(None)
            }
        }
    })
    .await;

    match res {
        Some(res) => {
            let _ = tx.send(res);
        }
        None => trace!("request canceled by caller"),
    }
}

/// Held by each `Response` so the runtime outlives bodies still being read.
#[allow(dead_code)]
pub(crate) struct KeepCoreThreadAlive(Option<Arc<InnerClientHandle>>);

impl KeepCoreThreadAlive {
    #[cfg(test)]
    pub(crate) fn empty() -> KeepCoreThreadAlive {
        KeepCoreThreadAlive(None)
    }
}

fn client_closed() -> Error {
    Error::transport("client closed")
}

#[cold]
#[inline(never)]
fn event_loop_panicked() -> ! {
    // The runtime thread only drops the startup sender without sending when
    // it panicked; the panic belongs to the caller.
    panic!("event loop thread panicked");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_endpoint_is_configuration_error() {
        let err = Client::new("ftp://localhost").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn tls_verification_is_refused_at_build() {
        let err = Client::builder("tcp://127.0.0.1:2376")
            .tls(TlsOptions {
                verify: true,
                cert_path: None,
            })
            .build()
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn close_is_idempotent_and_rejects_requests() {
        let client = Client::new("tcp://127.0.0.1:2375").unwrap();
        assert!(!client.is_closed());
        client.close();
        client.close();
        assert!(client.is_closed());

        let err = client.get("/_ping").send().unwrap_err();
        assert!(err.is_transport(), "{err:?}");
        assert!(err.to_string().contains("client closed"), "{err}");
    }

    #[test]
    fn request_timeout_overrides_read_timeout() {
        let client = Client::builder("tcp://127.0.0.1:2375")
            .read_timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        assert_eq!(client.read_timeout(), Duration::from_secs(5));

        let req = client
            .get("/containers/json")
            .timeout(Duration::from_millis(10))
            .build()
            .unwrap();
        assert_eq!(req.timeout(), Some(&Duration::from_millis(10)));
    }
}
