//! Middleware: the ordered chain wrapped around request dispatch.
//!
//! Three stages run in a fixed order around every request:
//!
//! 1. [`Logger`] — records method and path, no effect on flow.
//! 2. [`Auth`] — resolves the session cookie to a user, attaches it to the
//!    request, and bounces non-admin traffic off `/manage*` to `/signin`.
//! 3. [`Normalize`] — turns whatever the dispatcher produced into a real
//!    [`Response`](crate::response::Response).
//!
//! Each stage calls [`Next::run`] and returns its result unchanged on the
//! success path; a stage may short-circuit (the auth redirect) without
//! invoking anything downstream.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::models::User;
use crate::reply::Reply;
use crate::request::Request;
use crate::response::Response;
use crate::server::State;
use crate::session::{self, COOKIE_NAME};

/// One stage of the request-handling chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn handle(&self, req: Request, next: Next<'_>) -> Reply;
}

/// The terminal of the chain: the dispatcher itself.
#[async_trait]
pub(crate) trait Endpoint: Send + Sync {
    async fn call(&self, req: Request) -> Reply;
}

/// The remainder of the chain from one stage's point of view.
pub struct Next<'a> {
    pub(crate) chain: &'a [Arc<dyn Middleware>],
    pub(crate) endpoint: &'a dyn Endpoint,
}

impl Next<'_> {
    /// Runs the rest of the chain to completion.
    pub async fn run(self, req: Request) -> Reply {
        match self.chain.split_first() {
            Some((stage, rest)) => {
                stage.handle(req, Next { chain: rest, endpoint: self.endpoint }).await
            }
            None => self.endpoint.call(req).await,
        }
    }
}

// ── Stage 1: request logging ─────────────────────────────────────────────────

pub struct Logger;

#[async_trait]
impl Middleware for Logger {
    async fn handle(&self, req: Request, next: Next<'_>) -> Reply {
        info!(method = %req.method(), path = %req.path(), "request");
        next.run(req).await
    }
}

// ── Stage 2: session resolution and the admin gate ───────────────────────────

pub struct Auth {
    state: Arc<State>,
}

impl Auth {
    pub fn new(state: Arc<State>) -> Self {
        Self { state }
    }

    /// Resolves a cookie value to its user: well-formed, unexpired, stored
    /// user present, signature matching. Anything else is anonymous; a
    /// database failure is logged and treated the same.
    async fn resolve(&self, cookie: &str) -> Option<User> {
        let parts = session::parse(cookie)?;
        let now = session::epoch_secs();
        if parts.expires < now {
            return None;
        }
        let user: User = match self.state.db.find(parts.uid).await {
            Ok(found) => found?,
            Err(e) => {
                warn!("session user lookup failed: {e}");
                return None;
            }
        };
        if !self.state.sessions.validate(&parts, &user.passwd, now) {
            info!(uid = %parts.uid, "session signature mismatch");
            return None;
        }
        Some(user.masked())
    }
}

#[async_trait]
impl Middleware for Auth {
    async fn handle(&self, mut req: Request, next: Next<'_>) -> Reply {
        if let Some(cookie) = req.cookie(COOKIE_NAME) {
            req.user = self.resolve(cookie).await;
            if let Some(user) = req.user() {
                info!(email = %user.email, "authenticated");
            }
        }
        let admin = req.user().map(|u| u.admin).unwrap_or(false);
        let path = req.path();
        if (path == "/manage" || path.starts_with("/manage/")) && !admin {
            return Reply::Response(Response::redirect("/signin"));
        }
        next.run(req).await
    }
}

// ── Stage 3: response normalization ──────────────────────────────────────────

pub struct Normalize {
    state: Arc<State>,
}

impl Normalize {
    pub fn new(state: Arc<State>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Middleware for Normalize {
    async fn handle(&self, req: Request, next: Next<'_>) -> Reply {
        let reply = next.run(req).await;
        Reply::Response(reply.into_response(self.state.templates.as_ref()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::method::Method;

    struct Echo;

    #[async_trait]
    impl Endpoint for Echo {
        async fn call(&self, req: Request) -> Reply {
            Reply::text(format!("saw {}", req.path()))
        }
    }

    #[tokio::test]
    async fn logger_passes_result_through_unchanged() {
        let chain: Vec<Arc<dyn Middleware>> = vec![Arc::new(Logger)];
        let next = Next { chain: &chain, endpoint: &Echo };
        let reply = next.run(Request::new(Method::Get, "/here")).await;
        match reply {
            Reply::Text(t) => assert_eq!(t, "saw /here"),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
