//! Parameter declaration and request binding.
//!
//! Every route carries a [`ParamSpec`] declared at registration: which
//! keyword parameters the handler wants, which are required, which have
//! defaults, and whether undeclared keys should be kept. The spec is built
//! once at startup; per request, [`bind`] turns body/query/path data into
//! the argument mapping the handler is invoked with — or a 400 before the
//! handler ever runs.
//!
//! Extraction rules:
//!
//! - POST bodies require a content-type: JSON objects, URL-encoded forms,
//!   and multipart text fields are accepted; anything else is a 400.
//! - GET (and everything non-POST) reads the decoded query string.
//! - A handler declaring no parameters gets the route's path captures as its
//!   mapping, unfiltered.
//! - Otherwise the extracted mapping is filtered to the declared names
//!   (unless a catch-all was declared), path captures are overlaid — winning
//!   on collision, with a warning — defaults are filled, and required
//!   parameters are checked last.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::warn;

use crate::method::Method;
use crate::request::Request;
use crate::response::Response;
use crate::status::Status;

// ── Declarations ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Param {
    name: &'static str,
    required: bool,
    default: Option<&'static str>,
}

/// Declarative parameter spec for one route.
#[derive(Debug, Clone, Default)]
pub struct ParamSpec {
    params: Vec<Param>,
    catch_all: bool,
}

impl ParamSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a parameter that must be supplied, or the request fails
    /// with a 400 naming it.
    pub fn required(self, name: &'static str) -> Self {
        self.add(Param { name, required: true, default: None })
    }

    /// Declares a parameter filled with `default` when absent.
    pub fn optional(self, name: &'static str, default: &'static str) -> Self {
        self.add(Param { name, required: false, default: Some(default) })
    }

    /// Keeps every supplied key instead of filtering to declared names.
    pub fn catch_all(mut self) -> Self {
        self.catch_all = true;
        self
    }

    /// # Panics
    ///
    /// Panics on a duplicate or reserved name. Specs are built at
    /// registration, so a bad declaration fails startup, not a request.
    fn add(mut self, param: Param) -> Self {
        if param.name == "request" {
            panic!("param name `request` is reserved: the request context always accompanies the arguments");
        }
        if self.params.iter().any(|p| p.name == param.name) {
            panic!("duplicate param `{}`", param.name);
        }
        self.params.push(param);
        self
    }

    fn declares_nothing(&self) -> bool {
        self.params.is_empty() && !self.catch_all
    }
}

// ── Bind errors ──────────────────────────────────────────────────────────────

/// Why a request could not be bound to its handler's parameters. All of
/// these are client errors reported before handler invocation.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BindError {
    #[error("missing content-type")]
    MissingContentType,

    #[error("unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("invalid request body: {0}")]
    InvalidBody(String),

    #[error("missing argument: {0}")]
    MissingParam(String),
}

impl BindError {
    pub fn to_response(&self) -> Response {
        Response::builder().status(Status::BadRequest).text(self.to_string())
    }
}

// ── Binding ──────────────────────────────────────────────────────────────────

/// Produces the argument mapping for one request, per the rules above.
pub fn bind(spec: &ParamSpec, req: &Request) -> Result<Map<String, Value>, BindError> {
    if spec.declares_nothing() {
        return Ok(captures_as_map(req.params()));
    }

    let extracted = match req.method() {
        Method::Post => Some(extract_body(req)?),
        _ => req.query().filter(|q| !q.is_empty()).map(decode_form),
    };

    let mut mapping = match extracted {
        None => captures_as_map(req.params()),
        Some(mut kw) => {
            if !spec.catch_all {
                kw.retain(|name, _| spec.params.iter().any(|p| p.name == name));
            }
            for (k, v) in req.params() {
                if kw.contains_key(k) {
                    warn!(param = %k, "path capture overrides supplied argument");
                }
                kw.insert(k.clone(), Value::String(v.clone()));
            }
            kw
        }
    };

    for param in &spec.params {
        if !mapping.contains_key(param.name) {
            if let Some(default) = param.default {
                mapping.insert(param.name.to_owned(), Value::String(default.to_owned()));
            } else if param.required {
                return Err(BindError::MissingParam(param.name.to_owned()));
            }
        }
    }
    Ok(mapping)
}

fn captures_as_map(params: &HashMap<String, String>) -> Map<String, Value> {
    params
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect()
}

fn extract_body(req: &Request) -> Result<Map<String, Value>, BindError> {
    let content_type = req
        .header("content-type")
        .map(str::to_ascii_lowercase)
        .ok_or(BindError::MissingContentType)?;

    if content_type.starts_with("application/json") {
        let value: Value = serde_json::from_slice(req.body())
            .map_err(|e| BindError::InvalidBody(e.to_string()))?;
        match value {
            Value::Object(map) => Ok(map),
            _ => Err(BindError::InvalidBody("JSON body must be an object".into())),
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        let text = std::str::from_utf8(req.body())
            .map_err(|e| BindError::InvalidBody(e.to_string()))?;
        Ok(decode_form(text))
    } else if content_type.starts_with("multipart/form-data") {
        let boundary = content_type
            .split("boundary=")
            .nth(1)
            .map(|b| b.trim_matches('"').to_owned())
            .ok_or_else(|| BindError::InvalidBody("multipart body without boundary".into()))?;
        decode_multipart(req.body(), &boundary)
    } else {
        Err(BindError::UnsupportedContentType(content_type))
    }
}

/// Decodes `k=v&k2=v2` pairs, percent escapes and `+` included. First value
/// wins for a repeated key.
fn decode_form(text: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for pair in text.split('&').filter(|p| !p.is_empty()) {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        let key = percent_decode(k);
        out.entry(key).or_insert_with(|| Value::String(percent_decode(v)));
    }
    out
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            // Decode on raw bytes: slicing the str here could land inside
            // a multibyte character and panic.
            b'%' if i + 2 < bytes.len() => {
                match (hex_val(bytes[i + 1]), hex_val(bytes[i + 2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 3;
                    }
                    _ => {
                        out.push(b'%');
                        i += 1;
                    }
                }
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Pulls the text fields out of a multipart body. File parts are skipped —
/// nothing in this application uploads files.
fn decode_multipart(body: &[u8], boundary: &str) -> Result<Map<String, Value>, BindError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| BindError::InvalidBody("multipart body is not UTF-8".into()))?;
    let delimiter = format!("--{boundary}");
    let mut out = Map::new();
    for part in text.split(delimiter.as_str()).skip(1) {
        if part.starts_with("--") {
            break; // closing delimiter
        }
        let Some((headers, content)) = part.split_once("\r\n\r\n") else {
            continue;
        };
        let disposition = headers
            .lines()
            .find(|l| l.to_ascii_lowercase().starts_with("content-disposition"))
            .unwrap_or("");
        if disposition.contains("filename=") {
            continue;
        }
        let Some(name) = disposition
            .split("name=\"")
            .nth(1)
            .and_then(|rest| rest.split('"').next())
        else {
            continue;
        };
        let value = content.trim_end_matches("\r\n");
        out.insert(name.to_owned(), Value::String(value.to_owned()));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_captures(mut req: Request, caps: &[(&str, &str)]) -> Request {
        req.set_params(
            caps.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        );
        req
    }

    #[test]
    #[should_panic(expected = "duplicate param")]
    fn duplicate_declaration_fails_at_registration() {
        ParamSpec::new().required("page").optional("page", "1");
    }

    #[test]
    #[should_panic(expected = "reserved")]
    fn request_is_a_reserved_name() {
        ParamSpec::new().required("request");
    }

    #[test]
    fn missing_required_names_the_parameter() {
        let spec = ParamSpec::new().required("email").required("passwd");
        let req = Request::new(Method::Post, "/api/authenticate")
            .with_header("content-type", "application/json")
            .with_body(r#"{"email":"a@b.com"}"#);
        assert_eq!(bind(&spec, &req), Err(BindError::MissingParam("passwd".into())));
    }

    #[test]
    fn optional_default_fills_absent_parameter() {
        let spec = ParamSpec::new().optional("page", "1");
        let req = Request::new(Method::Get, "/api/blogs");
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["page"], "1");
    }

    #[test]
    fn query_string_is_decoded_for_get() {
        let spec = ParamSpec::new().optional("page", "1").required("q");
        let req = Request::new(Method::Get, "/search").with_query("q=a%40b+c&page=3&extra=x");
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["q"], "a@b c");
        assert_eq!(args["page"], "3");
        // undeclared keys are dropped without a catch-all
        assert!(!args.contains_key("extra"));
    }

    #[test]
    fn catch_all_keeps_undeclared_keys() {
        let spec = ParamSpec::new().required("q").catch_all();
        let req = Request::new(Method::Get, "/search").with_query("q=1&extra=x");
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["extra"], "x");
    }

    #[test]
    fn no_declared_params_means_path_captures() {
        let spec = ParamSpec::new();
        let req = with_captures(Request::new(Method::Get, "/blog/b1"), &[("id", "b1")]);
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["id"], "b1");
    }

    #[test]
    fn path_captures_win_over_body_keys() {
        let spec = ParamSpec::new().required("content").catch_all();
        let req = with_captures(
            Request::new(Method::Post, "/api/blogs/b9/comments")
                .with_header("content-type", "application/json")
                .with_body(r#"{"content":"hi","id":"spoofed"}"#),
            &[("id", "b9")],
        );
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["id"], "b9");
        assert_eq!(args["content"], "hi");
    }

    #[test]
    fn post_without_content_type_is_rejected() {
        let spec = ParamSpec::new().required("content");
        let req = Request::new(Method::Post, "/x").with_body("content=hi");
        assert_eq!(bind(&spec, &req), Err(BindError::MissingContentType));
    }

    #[test]
    fn post_with_unknown_content_type_is_rejected() {
        let spec = ParamSpec::new().required("content");
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "text/csv")
            .with_body("a,b");
        assert!(matches!(
            bind(&spec, &req),
            Err(BindError::UnsupportedContentType(_))
        ));
    }

    #[test]
    fn json_body_must_be_an_object() {
        let spec = ParamSpec::new().required("content");
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "application/json")
            .with_body("[1,2,3]");
        assert!(matches!(bind(&spec, &req), Err(BindError::InvalidBody(_))));
    }

    #[test]
    fn urlencoded_form_is_decoded() {
        let spec = ParamSpec::new().required("name").required("summary");
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("name=First+Post&summary=it%27s+new");
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["name"], "First Post");
        assert_eq!(args["summary"], "it's new");
    }

    #[test]
    fn percent_before_multibyte_text_stays_literal() {
        let spec = ParamSpec::new().required("q").optional("p", "");
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "application/x-www-form-urlencoded")
            .with_body("q=%中&p=%e4%b8%ad");
        let args = bind(&spec, &req).unwrap();
        // a `%` not followed by two hex digits is kept as-is
        assert_eq!(args["q"], "%中");
        assert_eq!(args["p"], "中");
    }

    #[test]
    fn truncated_percent_escape_stays_literal() {
        let spec = ParamSpec::new().required("q");
        let req = Request::new(Method::Get, "/x").with_query("q=a%4");
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["q"], "a%4");
    }

    #[test]
    fn multipart_text_fields_are_decoded() {
        let spec = ParamSpec::new().required("name");
        let body = "--XX\r\ncontent-disposition: form-data; name=\"name\"\r\n\r\nAnn\r\n--XX--\r\n";
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "multipart/form-data; boundary=XX")
            .with_body(body);
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["name"], "Ann");
    }

    #[test]
    fn json_keeps_non_string_values() {
        let spec = ParamSpec::new().required("admin").catch_all();
        let req = Request::new(Method::Post, "/x")
            .with_header("content-type", "application/json")
            .with_body(r#"{"admin":true,"n":3}"#);
        let args = bind(&spec, &req).unwrap();
        assert_eq!(args["admin"], true);
        assert_eq!(args["n"], 3);
    }
}
