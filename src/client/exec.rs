//! The async half of the client, living on the runtime thread.

use std::{io, sync::Arc, time::Duration};

use bytes::Bytes;
use http::{
    header::{CONNECTION, CONTENT_LENGTH, HOST, UPGRADE},
    HeaderMap, HeaderValue, Method, StatusCode,
};
use http_body::Body as _;
use http_body_util::{BodyExt, Limited};
use hyper::body::Incoming;
use hyper_util::{
    client::legacy,
    rt::{TokioExecutor, TokioTimer},
};
use tokio::sync::mpsc;

use super::{
    body::AsyncBody,
    conn::Connector,
    hijack,
    request::{HijackInput, Request},
};
use crate::{Endpoint, Error};

/// Responses whose exact length is at most this many bytes are read in full
/// before the caller gets them.
pub(crate) const BUFFER_LIMIT: u64 = 64 * 1024;

/// What the runtime thread hands back for one request.
pub(crate) struct Answer {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: RawBody,
}

pub(crate) enum RawBody {
    Buffered(Bytes),
    Streaming(Incoming),
    Hijacked(mpsc::Receiver<io::Result<Bytes>>),
}

/// Pool settings for ordinary requests.
#[derive(Clone, Copy, Debug)]
pub(crate) struct PoolConfig {
    pub(crate) idle_timeout: Option<Duration>,
    pub(crate) max_idle_per_host: usize,
}

pub(crate) struct Exec {
    endpoint: Arc<Endpoint>,
    connector: Connector,
    pool: legacy::Client<Connector, AsyncBody>,
}

impl Exec {
    /// Must be called from inside the runtime the pool's timer runs on.
    pub(crate) fn new(endpoint: Arc<Endpoint>, connect_timeout: Duration, pool: PoolConfig) -> Exec {
        let connector = Connector::new(endpoint.clone(), connect_timeout);
        let client = legacy::Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(pool.idle_timeout)
            .pool_max_idle_per_host(pool.max_idle_per_host)
            .build(connector.clone());
        Exec {
            endpoint,
            connector,
            pool: client,
        }
    }

    /// Sends `req` and waits for its response head, buffering small bodies.
    ///
    /// The caller bounds the whole future with the request deadline.
    pub(crate) async fn execute(&self, req: Request) -> crate::Result<Answer> {
        let (method, path, mut headers, body, hijack, _timeout) = req.into_parts();

        if body.is_none() && method == Method::POST && !headers.contains_key(CONTENT_LENGTH) {
            headers.insert(CONTENT_LENGTH, HeaderValue::from_static("0"));
        }
        let body = body.map(|b| b.into_async()).unwrap_or_else(AsyncBody::empty);

        match hijack {
            Some(input) => self.hijack(method, &path, headers, body, input).await,
            None => self.pooled(method, &path, headers, body).await,
        }
    }

    async fn pooled(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
        body: AsyncBody,
    ) -> crate::Result<Answer> {
        let uri = self.endpoint.request_uri(path)?;
        let mut req = http::Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;

        trace!("{} {}", req.method(), req.uri());
        let res = self.pool.request(req).await.map_err(Error::from_pool)?;
        let (parts, body) = res.into_parts();
        debug!("response {} from {}", parts.status, self.endpoint);

        let body = match body.size_hint().exact() {
            Some(len) if len <= BUFFER_LIMIT => {
                let bytes = body.collect().await.map_err(Error::transport)?.to_bytes();
                RawBody::Buffered(bytes)
            }
            _ => RawBody::Streaming(body),
        };

        Ok(Answer {
            status: parts.status,
            headers: parts.headers,
            body,
        })
    }

    /// Runs the handshake on a connection of its own; it never returns to the
    /// pool.
    async fn hijack(
        &self,
        method: Method,
        path: &str,
        mut headers: HeaderMap,
        body: AsyncBody,
        input: HijackInput,
    ) -> crate::Result<Answer> {
        let target = self.endpoint.request_path(path);
        let uri = http::Uri::try_from(target)
            .map_err(|e| Error::configuration(format!("invalid request path {path:?}: {e}")))?;

        let host = HeaderValue::try_from(self.endpoint.authority()).map_err(Error::configuration)?;
        headers.insert(HOST, host);
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(UPGRADE, HeaderValue::from_static("tcp"));

        let mut req = http::Request::new(body);
        *req.method_mut() = method;
        *req.uri_mut() = uri;
        *req.headers_mut() = headers;

        let io = self.connector.connect().await.map_err(Error::connect)?;
        let (mut sender, conn) = hyper::client::conn::http1::handshake::<_, AsyncBody>(io)
            .await
            .map_err(Error::transport)?;
        tokio::spawn(async move {
            if let Err(e) = conn.with_upgrades().await {
                debug!("hijack connection error: {}", e);
            }
        });

        trace!("{} {} (hijack)", req.method(), req.uri());
        let mut res = sender.send_request(req).await.map_err(Error::transport)?;
        let status = res.status();
        if status != StatusCode::SWITCHING_PROTOCOLS {
            debug!("daemon refused hijack with {}", status);
            // Keep what the daemon said; an oversized or broken body is dropped.
            let body = match Limited::new(res.into_body(), BUFFER_LIMIT as usize)
                .collect()
                .await
            {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    debug!("refusal body discarded: {}", e);
                    Bytes::new()
                }
            };
            return Err(Error::upgrade_refused(status, body));
        }

        let upgraded = hyper::upgrade::on(&mut res).await.map_err(Error::transport)?;
        debug!("connection to {} hijacked", self.endpoint);
        let rx = hijack::spawn(upgraded, input);

        Ok(Answer {
            status,
            headers: res.headers().clone(),
            body: RawBody::Hijacked(rx),
        })
    }
}
