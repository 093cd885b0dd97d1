//! Handler return values and their normalization into responses.
//!
//! Handlers return a [`Reply`] — a closed set of shapes instead of
//! duck-typed values — and the normalization middleware turns it into a
//! [`Response`] with one total match. Precedence, first match wins:
//!
//! 1. already a `Response` — passed through unchanged
//! 2. raw bytes — `application/octet-stream`
//! 3. text — a `redirect:` prefix becomes a 302, anything else an HTML body
//! 4. a mapping — a `__template__` key selects HTML rendering through the
//!    template engine, its absence selects JSON serialization
//! 5. a bare status code in the valid HTTP range — empty response
//! 6. a (status, message) pair — status plus text body
//! 7. anything left (out-of-range codes) — stringified into an HTML body

use serde_json::{Map, Value};

use crate::error::ApiError;
use crate::response::Response;
use crate::status::Status;
use crate::templates::TemplateEngine;

/// The key on a mapping reply that names the template to render.
pub const TEMPLATE_KEY: &str = "__template__";

/// What a handler hands back to the framework.
#[derive(Debug)]
pub enum Reply {
    /// A fully built response: cookies, redirects with headers, etc.
    Response(Response),
    /// Raw binary payload.
    Bytes(Vec<u8>),
    /// Text. `redirect:<target>` redirects; anything else is an HTML body.
    Text(String),
    /// Structured mapping: templated HTML when [`TEMPLATE_KEY`] is present,
    /// JSON otherwise.
    Map(Map<String, Value>),
    /// Bare status code.
    Status(u16),
    /// Status code plus message body.
    Pair(u16, String),
}

impl Reply {
    pub fn text(s: impl Into<String>) -> Self {
        Self::Text(s.into())
    }

    /// A mapping reply rendering `name` with `context`.
    pub fn template(name: &str, mut context: Map<String, Value>) -> Self {
        context.insert(TEMPLATE_KEY.to_owned(), Value::String(name.to_owned()));
        Self::Map(context)
    }

    /// Serializes any record-shaped value into a mapping reply. Non-record
    /// values become their JSON text, which the normalizer treats as HTML —
    /// the stringify fallback.
    pub fn json_of<T: serde::Serialize>(value: &T) -> Result<Self, ApiError> {
        match serde_json::to_value(value).map_err(crate::error::Error::from)? {
            Value::Object(map) => Ok(Self::Map(map)),
            other => Ok(Self::Text(other.to_string())),
        }
    }

    /// Normalizes into a concrete HTTP response.
    pub fn into_response(self, templates: &dyn TemplateEngine) -> Response {
        match self {
            Self::Response(resp) => resp,
            Self::Bytes(body) => Response::octets(body),
            Self::Text(text) => match text.strip_prefix("redirect:") {
                Some(target) => Response::redirect(target),
                None => Response::html(text),
            },
            Self::Map(map) => normalize_map(map, templates),
            Self::Status(code) if valid_status(code) => Response::status_code(code),
            Self::Status(code) => Response::html(code.to_string()),
            Self::Pair(code, message) if valid_status(code) => {
                Response::builder().status_code(code).text(message)
            }
            Self::Pair(code, message) => Response::html(format!("({code}, {message})")),
        }
    }
}

impl From<Response> for Reply {
    fn from(resp: Response) -> Self {
        Self::Response(resp)
    }
}

fn valid_status(code: u16) -> bool {
    (100..600).contains(&code)
}

fn normalize_map(map: Map<String, Value>, templates: &dyn TemplateEngine) -> Response {
    let template = map.get(TEMPLATE_KEY).and_then(Value::as_str).map(str::to_owned);
    match template {
        Some(name) => match templates.render(&name, &map) {
            Ok(html) => Response::html(html),
            Err(e) => {
                tracing::error!(template = %name, "render failed: {e}");
                Response::status(Status::InternalServerError)
            }
        },
        None => match serde_json::to_vec(&map) {
            Ok(body) => Response::json(body),
            Err(e) => {
                tracing::error!("json serialization failed: {e}");
                Response::status(Status::InternalServerError)
            }
        },
    }
}
