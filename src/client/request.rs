use std::{convert::TryFrom, fmt, io::Read, time::Duration};

use http::{
    header::{HeaderMap, HeaderName, HeaderValue},
    Method,
};

use super::{Body, Client, Response};
use crate::Error;

pub(crate) type HijackInput = Box<dyn Read + Send>;

/// A request which can be executed with `Client::execute()`.
///
/// The path is relative to the daemon; the client adds its endpoint's
/// path prefix. Headers keep the order they were inserted in and are looked
/// up case-insensitively.
pub struct Request {
    method: Method,
    path: String,
    headers: HeaderMap,
    body: Option<Body>,
    hijack: Option<HijackInput>,
    timeout: Option<Duration>,
}

/// A builder to construct the properties of a `Request`.
///
/// To construct a `RequestBuilder`, refer to the `Client` documentation.
#[must_use = "RequestBuilder does nothing until you 'send' it"]
pub struct RequestBuilder {
    client: Client,
    request: crate::Result<Request>,
}

impl Request {
    /// Constructs a new request.
    #[inline]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Request {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
            hijack: None,
            timeout: None,
        }
    }

    /// Get the method.
    #[inline]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Get a mutable reference to the method.
    #[inline]
    pub fn method_mut(&mut self) -> &mut Method {
        &mut self.method
    }

    /// Get the path.
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Get the headers.
    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Get a mutable reference to the headers.
    #[inline]
    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Get the body.
    #[inline]
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Get a mutable reference to the body.
    #[inline]
    pub fn body_mut(&mut self) -> &mut Option<Body> {
        &mut self.body
    }

    /// Get the timeout.
    #[inline]
    pub fn timeout(&self) -> Option<&Duration> {
        self.timeout.as_ref()
    }

    /// Get a mutable reference to the timeout.
    #[inline]
    pub fn timeout_mut(&mut self) -> &mut Option<Duration> {
        &mut self.timeout
    }

    /// Whether the request asks for a hijacked connection.
    #[inline]
    pub fn is_hijack(&self) -> bool {
        self.hijack.is_some()
    }

    /// Asks the daemon to turn the connection into a raw stream once it has
    /// answered, pumping `input` to it.
    ///
    /// The bytes the daemon sends back become the response body.
    pub fn set_hijack<R: Read + Send + 'static>(&mut self, input: R) {
        self.hijack = Some(Box::new(input));
    }

    pub(crate) fn into_parts(
        self,
    ) -> (
        Method,
        String,
        HeaderMap,
        Option<Body>,
        Option<HijackInput>,
        Option<Duration>,
    ) {
        (
            self.method,
            self.path,
            self.headers,
            self.body,
            self.hijack,
            self.timeout,
        )
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("headers", &self.headers)
            .field("body", &self.body)
            .field("hijack", &self.hijack.is_some())
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl RequestBuilder {
    pub(super) fn new(client: Client, request: crate::Result<Request>) -> RequestBuilder {
        RequestBuilder { client, request }
    }

    /// Add a `Header` to this Request.
    ///
    /// If the header is already present, the value will be replaced.
    pub fn header<K, V>(self, key: K, value: V) -> RequestBuilder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.header_operation(key, value, true)
    }

    /// Add a `Header` to append to the request.
    ///
    /// The new header is always appended to the request, even if the header already exists.
    pub fn header_append<K, V>(self, key: K, value: V) -> RequestBuilder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        self.header_operation(key, value, false)
    }

    fn header_operation<K, V>(mut self, key: K, value: V, overwrite: bool) -> RequestBuilder
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<http::Error>,
    {
        let mut error = None;
        if let Ok(ref mut req) = self.request {
            match <HeaderName as TryFrom<K>>::try_from(key) {
                Ok(key) => match <HeaderValue as TryFrom<V>>::try_from(value) {
                    Ok(value) => {
                        if overwrite {
                            req.headers_mut().insert(key, value);
                        } else {
                            req.headers_mut().append(key, value);
                        }
                    }
                    Err(e) => error = Some(Error::configuration(e.into())),
                },
                Err(e) => error = Some(Error::configuration(e.into())),
            };
        }
        if let Some(err) = error {
            self.request = Err(err);
        }
        self
    }

    /// Add a set of Headers to the existing ones on this Request.
    ///
    /// Every value is appended, so repeated names keep all their values.
    pub fn headers(mut self, headers: HeaderMap) -> RequestBuilder {
        if let Ok(ref mut req) = self.request {
            let mut prev: Option<HeaderName> = None;
            for (key, value) in headers {
                if let Some(key) = key {
                    prev = Some(key);
                }
                if let Some(ref key) = prev {
                    req.headers_mut().append(key.clone(), value);
                }
            }
        }
        self
    }

    /// Set the request body.
    pub fn body<T: Into<Body>>(mut self, body: T) -> RequestBuilder {
        if let Ok(ref mut req) = self.request {
            *req.body_mut() = Some(body.into());
        }
        self
    }

    /// Hijack the connection, pumping `input` to the daemon once it switches
    /// protocols. See [`Request::set_hijack`].
    pub fn hijack<R: Read + Send + 'static>(mut self, input: R) -> RequestBuilder {
        if let Ok(ref mut req) = self.request {
            req.set_hijack(input);
        }
        self
    }

    /// Sets the deadline for the response headers of this request, overriding
    /// the client's read timeout.
    pub fn timeout(mut self, timeout: Duration) -> RequestBuilder {
        if let Ok(ref mut req) = self.request {
            *req.timeout_mut() = Some(timeout);
        }
        self
    }

    /// Build a `Request`, which can be inspected, modified and executed with
    /// `Client::execute()`.
    pub fn build(self) -> crate::Result<Request> {
        self.request
    }

    /// Constructs the Request and sends it to the daemon, returning a
    /// Response.
    ///
    /// # Errors
    ///
    /// This method fails if the request could not be built, the daemon was
    /// unreachable, the deadline passed before the response headers arrived,
    /// or the connection failed mid-exchange.
    pub fn send(self) -> crate::Result<Response> {
        self.client.execute(self.request?)
    }
}

impl fmt::Debug for RequestBuilder {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut builder = f.debug_struct("RequestBuilder");
        match self.request {
            Ok(ref req) => builder.field("request", req).finish(),
            Err(ref err) => builder.field("error", err).finish(),
        }
    }
}
