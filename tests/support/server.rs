use std::{
    convert::Infallible, future::Future, net, path::PathBuf, sync::mpsc as std_mpsc, thread,
    time::Duration,
};

use bytes::Bytes;
use http_body_util::Full;
use hyper_util::rt::{TokioExecutor, TokioIo};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpListener,
    runtime,
    sync::oneshot,
};

pub type Body = Full<Bytes>;

pub struct Server {
    docker_host: String,
    addr: Option<net::SocketAddr>,
    panic_rx: std_mpsc::Receiver<()>,
    events_rx: std_mpsc::Receiver<Event>,
    shutdown_tx: Option<oneshot::Sender<()>>,
}

#[non_exhaustive]
#[derive(Debug, PartialEq)]
pub enum Event {
    ConnectionClosed,
}

impl Server {
    #[allow(unused)]
    pub fn addr(&self) -> net::SocketAddr {
        self.addr.expect("tcp server")
    }

    /// Connection string pointing at this server.
    pub fn docker_host(&self) -> &str {
        &self.docker_host
    }

    #[allow(unused)]
    pub fn events(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    /// Waits for the next event, up to `timeout`.
    #[allow(unused)]
    pub fn next_event(&mut self, timeout: Duration) -> Option<Event> {
        self.events_rx.recv_timeout(timeout).ok()
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if !::std::thread::panicking() {
            self.panic_rx
                .recv_timeout(Duration::from_secs(3))
                .expect("test server should not panic");
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(tokio::net::UnixListener),
}

#[allow(unused)]
pub fn http<F, Fut>(func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<Body>> + Send + 'static,
{
    serve(None, func)
}

#[cfg(unix)]
#[allow(unused)]
pub fn unix<F, Fut>(path: PathBuf, func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<Body>> + Send + 'static,
{
    serve(Some(path), func)
}

#[allow(unused)]
pub fn random_sock_path() -> PathBuf {
    use std::hash::BuildHasher;

    let mut buf = std::env::temp_dir();
    // libstd uses system random to create each one
    let rng = std::collections::hash_map::RandomState::new();
    let n = rng.hash_one("docker-transport-sock");
    buf.push(format!("test-docker-sock-{n}"));
    buf
}

fn serve<F, Fut>(unix_path: Option<PathBuf>, func: F) -> Server
where
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<Body>> + Send + 'static,
{
    // Spawn new runtime in thread to prevent reactor execution context conflict
    let test_name = thread::current().name().unwrap_or("<unknown>").to_string();
    thread::spawn(move || {
        let rt = runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("new rt");

        let (listener, docker_host, addr) = rt.block_on(async move {
            match unix_path {
                #[cfg(unix)]
                Some(path) => {
                    let listener = tokio::net::UnixListener::bind(&path).unwrap();
                    let host = format!("unix://{}", path.display());
                    (Listener::Unix(listener), host, None)
                }
                #[cfg(not(unix))]
                Some(_) => unreachable!("unix listeners need a unix host"),
                None => {
                    let listener =
                        TcpListener::bind(&net::SocketAddr::from(([127, 0, 0, 1], 0)))
                            .await
                            .unwrap();
                    let addr = listener.local_addr().unwrap();
                    (Listener::Tcp(listener), format!("tcp://{addr}"), Some(addr))
                }
            }
        });

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let (panic_tx, panic_rx) = std_mpsc::channel();
        let (events_tx, events_rx) = std_mpsc::channel();
        let tname = format!("test({test_name})-support-server");
        thread::Builder::new()
            .name(tname)
            .spawn(move || {
                rt.block_on(async move {
                    let builder = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new());

                    loop {
                        let events_tx = events_tx.clone();
                        let func = func.clone();
                        let builder = builder.clone();
                        match listener {
                            Listener::Tcp(ref listener) => tokio::select! {
                                _ = &mut shutdown_rx => break,
                                accepted = listener.accept() => {
                                    let (io, _) = accepted.expect("accepted");
                                    spawn_connection(io, builder, func, events_tx);
                                }
                            },
                            #[cfg(unix)]
                            Listener::Unix(ref listener) => tokio::select! {
                                _ = &mut shutdown_rx => break,
                                accepted = listener.accept() => {
                                    let (io, _) = accepted.expect("accepted");
                                    spawn_connection(io, builder, func, events_tx);
                                }
                            },
                        }
                    }
                    let _ = panic_tx.send(());
                });
            })
            .expect("thread spawn");
        Server {
            docker_host,
            addr,
            panic_rx,
            events_rx,
            shutdown_tx: Some(shutdown_tx),
        }
    })
    .join()
    .unwrap()
}

fn spawn_connection<I, F, Fut>(
    io: I,
    builder: hyper_util::server::conn::auto::Builder<TokioExecutor>,
    func: F,
    events_tx: std_mpsc::Sender<Event>,
) where
    I: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Fn(http::Request<hyper::body::Incoming>) -> Fut + Clone + Send + 'static,
    Fut: Future<Output = http::Response<Body>> + Send + 'static,
{
    let svc = hyper::service::service_fn(move |req| {
        let fut = func(req);
        async move { Ok::<_, Infallible>(fut.await) }
    });
    tokio::spawn(async move {
        let _ = builder
            .serve_connection_with_upgrades(TokioIo::new(io), svc)
            .await;
        let _ = events_tx.send(Event::ConnectionClosed);
    });
}
