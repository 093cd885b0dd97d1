//! Error types.
//!
//! Two layers, kept deliberately apart:
//!
//! - [`Error`] — infrastructure failures: binding a port, a database call,
//!   unreadable configuration. These surface as `500 Internal Server Error`
//!   at the dispatch boundary and are logged there.
//! - [`ApiError`] — the recoverable domain taxonomy handlers raise. The
//!   dispatcher turns these into a JSON `{error, data, message}` body with a
//!   client-appropriate status; they never crash a request, let alone the
//!   process.

use crate::response::Response;
use crate::status::Status;

/// Infrastructure error. Not something a client can fix.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("database: {0}")]
    Db(#[from] sqlx::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("template `{name}`: {message}")]
    Template { name: String, message: String },

    #[error("serialize: {0}")]
    Serialize(#[from] serde_json::Error),

    /// A write affected a row count other than one and the row-count policy
    /// is set to fail rather than log.
    #[error("{op} on {table} affected {affected} rows")]
    RowCount {
        op: &'static str,
        table: &'static str,
        affected: u64,
    },
}

/// Recoverable domain error raised by handlers and caught by the dispatcher.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ApiError {
    /// A field failed validation. Carries the field name so the client can
    /// point at the offending input.
    #[error("{field}: {message}")]
    Value { field: String, message: String },

    /// The referenced entity does not exist.
    #[error("{resource}: not found")]
    NotFound { resource: String },

    /// Anonymous or non-admin caller hit a protected action.
    #[error("permission denied: {message}")]
    Permission { message: String },

    /// Catch-all business-rule violation with a machine-readable code.
    #[error("{code}: {message}")]
    Api { code: String, message: String },
}

impl ApiError {
    pub fn value(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Value { field: field.into(), message: message.into() }
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound { resource: resource.into() }
    }

    pub fn permission(message: impl Into<String>) -> Self {
        Self::Permission { message: message.into() }
    }

    pub fn api(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api { code: code.into(), message: message.into() }
    }

    pub fn status(&self) -> Status {
        match self {
            Self::Value { .. } => Status::BadRequest,
            Self::Api { code, .. } if code.starts_with("internal:") => {
                Status::InternalServerError
            }
            Self::Api { .. } => Status::BadRequest,
            Self::NotFound { .. } => Status::NotFound,
            Self::Permission { .. } => Status::Forbidden,
        }
    }

    /// The `{error, data, message}` wire shape every API consumer sees.
    pub fn to_response(&self) -> Response {
        let (error, data, message) = match self {
            Self::Value { field, message } => ("value:invalid", field.clone(), message.clone()),
            Self::NotFound { resource } => {
                ("value:notfound", resource.clone(), format!("{resource} not found"))
            }
            Self::Permission { message } => {
                ("permission:forbidden", String::new(), message.clone())
            }
            Self::Api { code, message } => (code.as_str(), String::new(), message.clone()),
        };
        let body = serde_json::json!({ "error": error, "data": data, "message": message });
        Response::builder()
            .status(self.status())
            .json(serde_json::to_vec(&body).unwrap_or_default())
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        // Lower-layer failures bubbling through a handler become a generic
        // API error; the dispatcher logs the original before conversion.
        Self::Api { code: "internal:error".into(), message: e.to_string() }
    }
}
