#![deny(missing_docs)]
#![deny(missing_debug_implementations)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(test, deny(warnings))]

//! # docker-transport
//!
//! A blocking HTTP/1.1 transport for talking to a container daemon over a
//! unix socket, a Windows named pipe or plain TCP.
//!
//! - One [`Client`] per daemon, backed by a pool of keep-alive connections
//! - Deadlines on connecting and on waiting for a response
//! - Streaming request and response bodies through [`std::io::Read`]
//! - Hijacked connections for `attach` and `exec` style raw streams
//! - A [`Registry`] of named clients built from configuration
//!
//! ## Endpoints
//!
//! A daemon is named by a connection string:
//!
//! - `unix:///var/run/docker.sock`
//! - `npipe:////./pipe/docker_engine`
//! - `tcp://10.0.0.5:2375/prefix`
//!
//! When none is given, `DOCKER_HOST` is consulted before falling back to the
//! platform default. See [`Endpoint`].
//!
//! ## Making a request
//!
//! ```rust,no_run
//! # fn run() -> Result<(), docker_transport::Error> {
//! let client = docker_transport::Client::new("unix:///var/run/docker.sock")?;
//!
//! let version = client.get("/version").send()?.text()?;
//! println!("version = {version}");
//!
//! let created = client
//!     .post("/containers/create")
//!     .header("content-type", "application/json")
//!     .body(r#"{"Image":"alpine"}"#)
//!     .send()?;
//! assert!(created.status().is_success());
//! # Ok(())
//! # }
//! ```
//!
//! Small responses of known length are read in full before `send` returns.
//! Anything else is read lazily from the [`Response`], each read bounded by
//! the client's read timeout.
//!
//! ## Hijacking
//!
//! Some daemon endpoints switch the connection to a raw byte stream once
//! they answer. Give the request an input to pump, and read the output from
//! the response:
//!
//! ```rust,no_run
//! # use std::io::{self, Read};
//! # fn run() -> Result<(), docker_transport::Error> {
//! # let client = docker_transport::Client::new("unix:///var/run/docker.sock")?;
//! let mut session = client
//!     .post("/containers/abc/attach?stream=1&stdin=1&stdout=1")
//!     .hijack(io::stdin())
//!     .send()?;
//! session.copy_to(&mut io::stdout())?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Optional Features
//!
//! - **tracing** *(enabled by default)*: Emit diagnostics through `tracing`.

pub use http::header;
pub use http::Method;
pub use http::StatusCode;

#[macro_use]
mod trace;

mod client;
mod config;
mod endpoint;
mod error;
mod registry;
mod sync;

pub use self::client::{Body, Client, ClientBuilder, Request, RequestBuilder, Response};
pub use self::config::{ClientConfig, TlsOptions, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT};
pub use self::endpoint::{
    Endpoint, Scheme, DOCKER_HOST_ENV, UNIX_DOCKER_HOST, WINDOWS_DOCKER_HOST,
};
pub use self::error::{BoxError, Error, Result};
pub use self::registry::{Registry, DEFAULT_CLIENT_NAME};

fn _assert_impls() {
    fn assert_send<T: Send>() {}
    fn assert_sync<T: Sync>() {}
    fn assert_clone<T: Clone>() {}

    assert_send::<Client>();
    assert_sync::<Client>();
    assert_clone::<Client>();

    assert_send::<Request>();
    assert_send::<RequestBuilder>();
    assert_send::<Response>();

    assert_send::<Registry>();
    assert_sync::<Registry>();

    assert_send::<Error>();
    assert_sync::<Error>();
}
