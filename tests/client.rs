mod support;
use std::io::{self, Read};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use pretty_env_logger::env_logger;
use support::server;

use docker_transport::{Body, Client, Method, Request, StatusCode};

#[test]
fn ping_round_trip() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "GET");
        assert_eq!(req.uri().path(), "/_ping");
        let host = req.headers()["host"].to_str().unwrap();
        assert!(host.starts_with("127.0.0.1:"), "{host}");

        http::Response::builder()
            .header("api-version", "1.43")
            .header("content-type", "text/plain; charset=utf-8")
            .body(Full::new(Bytes::from_static(b"OK")))
            .unwrap()
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client.get("/_ping").send().unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.is_buffered());
    assert!(!res.is_hijacked());
    assert_eq!(res.content_length(), Some(2));
    assert_eq!(res.header("Api-Version"), Some("1.43"));
    assert_eq!(res.text().unwrap(), "OK");
}

#[test]
fn empty_response_body() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::builder()
            .status(204)
            .body(Full::new(Bytes::new()))
            .unwrap()
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client.delete("/containers/abc").send().unwrap();

    assert_eq!(res.status(), StatusCode::NO_CONTENT);
    assert!(res.is_buffered());
    assert!(res.bytes().unwrap().is_empty());
}

#[test]
fn headers_survive_with_every_value() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        let auth: Vec<_> = req
            .headers()
            .get_all("x-registry-auth")
            .iter()
            .map(|v| v.to_str().unwrap().to_owned())
            .collect();
        assert_eq!(auth, ["first", "second"]);

        http::Response::builder()
            .header("warning", "one")
            .header("warning", "two")
            .body(Full::new(Bytes::new()))
            .unwrap()
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client
        .get("/images/json")
        .header("X-Registry-Auth", "first")
        .header_append("x-registry-auth", "second")
        .send()
        .unwrap();

    let warning = res
        .header_map()
        .into_iter()
        .find(|(name, _)| name == "warning")
        .map(|(_, values)| values);
    assert_eq!(warning, Some(vec!["one".to_owned(), "two".to_owned()]));
}

#[test]
fn post_without_body_sends_zero_length() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "POST");
        assert_eq!(req.headers()["content-length"], "0");
        http::Response::builder()
            .status(204)
            .body(Full::new(Bytes::new()))
            .unwrap()
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client.post("/containers/abc/start").send().unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);
}

#[test]
fn path_prefix_is_prepended() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.uri().path(), "/v1.43/info");
        assert_eq!(req.uri().query(), Some("size=1"));
        http::Response::new(Full::new(Bytes::from_static(b"{}")))
    });

    let client = Client::new(format!("{}/v1.43/", server.docker_host())).unwrap();
    assert_eq!(client.endpoint().path_prefix(), "/v1.43");

    let res = client.get("info?size=1").send().unwrap();
    assert_eq!(res.text().unwrap(), "{}");
}

#[test]
fn request_built_by_hand() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.method(), "PUT");
        assert_eq!(req.headers()["content-type"], "application/x-tar");
        let body = req.into_body().collect().await.unwrap().to_bytes();
        http::Response::new(Full::new(body))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let mut req = Request::new(Method::PUT, "/containers/abc/archive?path=/tmp");
    req.headers_mut()
        .insert("content-type", "application/x-tar".parse().unwrap());
    *req.body_mut() = Some(Body::from("tarball"));

    let res = client.execute(req).unwrap();
    assert_eq!(res.text().unwrap(), "tarball");
}

/// Deterministic bytes, so reordering or loss shows up in the comparison.
struct Pattern {
    remaining: usize,
    next: u32,
}

impl Pattern {
    fn new(len: usize) -> Pattern {
        Pattern {
            remaining: len,
            next: 1,
        }
    }

    fn collect(len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len);
        Pattern::new(len).read_to_end(&mut out).unwrap();
        out
    }
}

impl Read for Pattern {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        // Odd sized reads so chunk boundaries never line up.
        let n = buf.len().min(self.remaining).min(3001);
        for b in &mut buf[..n] {
            self.next = self.next.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            *b = (self.next >> 16) as u8;
        }
        self.remaining -= n;
        Ok(n)
    }
}

const TEN_MB: usize = 10 * 1024 * 1024;

#[test]
fn streaming_request_body_is_delivered_intact() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.headers().get("content-length"), None);
        let body = req.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body.len(), TEN_MB);
        assert!(body[..] == Pattern::collect(TEN_MB)[..], "body corrupted");
        http::Response::new(Full::new(Bytes::from(body.len().to_string())))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client
        .post("/build")
        .body(Body::new(Pattern::new(TEN_MB)))
        .send()
        .unwrap();

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().unwrap(), TEN_MB.to_string());
}

#[test]
fn sized_request_body_sets_content_length() {
    let _ = env_logger::try_init();

    let server = server::http(move |req| async move {
        assert_eq!(req.headers()["content-length"], "100000");
        let body = req.into_body().collect().await.unwrap().to_bytes();
        http::Response::new(Full::new(Bytes::from(body.len().to_string())))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let res = client
        .post("/images/load")
        .body(Body::sized(Pattern::new(100_000), 100_000))
        .send()
        .unwrap();
    assert_eq!(res.text().unwrap(), "100000");
}

#[test]
fn large_response_is_streamed() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::new(Full::new(Bytes::from(Pattern::collect(TEN_MB))))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let mut res = client.get("/images/alpine/get").send().unwrap();

    assert!(!res.is_buffered());
    assert_eq!(res.content_length(), Some(TEN_MB as u64));

    let mut got = Vec::new();
    res.read_to_end(&mut got).unwrap();
    assert_eq!(got.len(), TEN_MB);
    assert!(got == Pattern::collect(TEN_MB), "download corrupted");
}

#[test]
fn failing_request_body_is_a_transport_error() {
    let _ = env_logger::try_init();

    struct Broken(bool);

    impl Read for Broken {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if std::mem::replace(&mut self.0, true) {
                Err(io::Error::new(io::ErrorKind::Other, "disk gone"))
            } else {
                buf[0] = b'x';
                Ok(1)
            }
        }
    }

    let server = server::http(move |req| async move {
        let _ = req.into_body().collect().await;
        http::Response::new(Full::new(Bytes::new()))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let err = client
        .post("/build")
        .body(Body::new(Broken(false)))
        .send()
        .unwrap_err();
    assert!(err.is_transport(), "{err:?}");
}

#[test]
fn unreachable_daemon_is_a_connect_error() {
    let _ = env_logger::try_init();

    // Bind then drop to find a port nobody listens on.
    let addr = std::net::TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap();

    let client = Client::new(format!("tcp://{addr}")).unwrap();
    let err = client.get("/_ping").send().unwrap_err();

    assert!(err.is_connect(), "{err:?}");
    assert_eq!(
        err.uri().map(|u| u.to_string()),
        Some(format!("http://{addr}/_ping"))
    );
}

#[test]
fn connections_are_reused() {
    let _ = env_logger::try_init();

    let mut server = server::http(move |_req| async move {
        http::Response::new(Full::new(Bytes::from_static(b"OK")))
    });

    let client = Client::new(server.docker_host()).unwrap();
    for _ in 0..5 {
        let res = client.get("/_ping").send().unwrap();
        assert_eq!(res.text().unwrap(), "OK");
    }
    assert!(server.events().is_empty());

    client.close();
    assert_eq!(
        server.next_event(std::time::Duration::from_secs(2)),
        Some(server::Event::ConnectionClosed)
    );
}

#[test]
fn closed_client_refuses_requests() {
    let _ = env_logger::try_init();

    let server = server::http(move |_req| async move {
        http::Response::new(Full::new(Bytes::from_static(b"OK")))
    });

    let client = Client::new(server.docker_host()).unwrap();
    let clone = client.clone();
    assert_eq!(client.get("/_ping").send().unwrap().text().unwrap(), "OK");

    client.close();
    client.close();

    let err = clone.get("/_ping").send().unwrap_err();
    assert!(err.is_transport(), "{err:?}");
    assert!(clone.is_closed());
}
