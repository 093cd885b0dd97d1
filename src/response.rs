//! Outgoing HTTP response type.
//!
//! Handlers usually do not build these directly — they return a
//! [`Reply`](crate::reply::Reply) and the normalization middleware does the
//! rest. The exceptions are endpoints that set cookies or redirect with
//! headers attached, which construct a `Response` through the builder.

use bytes::Bytes;
use http_body_util::Full;

use crate::status::{reason, Status};

/// An outgoing HTTP response.
///
/// # Shortcuts (200 OK)
///
/// ```rust
/// use aweb::{Response, Status};
///
/// Response::json(br#"{"id":1}"#.to_vec());
/// Response::html("<h1>hi</h1>");
/// Response::status(Status::NoContent);
/// Response::redirect("/signin");
/// ```
#[derive(Debug)]
pub struct Response {
    body: Vec<u8>,
    headers: Vec<(String, String)>,
    status: u16,
}

impl Response {
    /// `200 OK` — `application/json;charset=utf-8`.
    pub fn json(body: Vec<u8>) -> Self {
        Self::with_content_type("application/json;charset=utf-8", body)
    }

    /// `200 OK` — `text/html;charset=utf-8`.
    pub fn html(body: impl Into<String>) -> Self {
        Self::with_content_type("text/html;charset=utf-8", body.into().into_bytes())
    }

    /// `200 OK` — `application/octet-stream`.
    pub fn octets(body: Vec<u8>) -> Self {
        Self::with_content_type("application/octet-stream", body)
    }

    /// Response with no body.
    pub fn status(code: Status) -> Self {
        Self::status_code(code.into())
    }

    /// Response with no body from a numeric code.
    pub fn status_code(code: u16) -> Self {
        Self { body: Vec::new(), headers: Vec::new(), status: code }
    }

    /// `302 Found` to `location`.
    pub fn redirect(location: &str) -> Self {
        Self::builder()
            .status(Status::Found)
            .header("location", location)
            .no_body()
    }

    /// Builder for responses that need a custom status or extra headers.
    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: Vec::new(), status: Status::Ok.into() }
    }

    fn with_content_type(content_type: &str, body: Vec<u8>) -> Self {
        Self {
            body,
            headers: vec![("content-type".to_owned(), content_type.to_owned())],
            status: Status::Ok.into(),
        }
    }

    pub fn status_u16(&self) -> u16 {
        self.status
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }

    /// Case-insensitive header lookup (first match).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Converts into the `http` response hyper writes to the wire.
    pub(crate) fn into_http(self) -> http::Response<Full<Bytes>> {
        let mut builder = http::Response::builder().status(
            http::StatusCode::from_u16(self.status)
                .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR),
        );
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder
            .body(Full::new(Bytes::from(self.body)))
            .unwrap_or_else(|_| {
                let mut resp = http::Response::new(Full::new(Bytes::new()));
                *resp.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
                resp
            })
    }

    /// Reason phrase for this response's status.
    pub fn reason(&self) -> &'static str {
        reason(self.status)
    }
}

/// Fluent builder for [`Response`]. Defaults to `200 OK`.
pub struct ResponseBuilder {
    headers: Vec<(String, String)>,
    status: u16,
}

impl ResponseBuilder {
    pub fn status(mut self, code: Status) -> Self {
        self.status = code.into();
        self
    }

    pub fn status_code(mut self, code: u16) -> Self {
        self.status = code;
        self
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Appends a `set-cookie` header. `max_age` of zero clears the cookie.
    pub fn cookie(self, name: &str, value: &str, max_age: u64) -> Self {
        let cookie = format!("{name}={value}; Max-Age={max_age}; Path=/; HttpOnly");
        self.header("set-cookie", &cookie)
    }

    /// Terminate with a JSON body.
    pub fn json(self, body: Vec<u8>) -> Response {
        self.finish("application/json;charset=utf-8", body)
    }

    /// Terminate with an HTML body.
    pub fn html(self, body: impl Into<String>) -> Response {
        self.finish("text/html;charset=utf-8", body.into().into_bytes())
    }

    /// Terminate with a plain-text body.
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish("text/plain;charset=utf-8", body.into().into_bytes())
    }

    /// Terminate with no body.
    pub fn no_body(self) -> Response {
        Response { body: Vec::new(), headers: self.headers, status: self.status }
    }

    fn finish(self, content_type: &str, body: Vec<u8>) -> Response {
        let mut headers = vec![("content-type".to_owned(), content_type.to_owned())];
        headers.extend(self.headers);
        Response { body, headers, status: self.status }
    }
}
