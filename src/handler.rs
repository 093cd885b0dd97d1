//! Handler trait, invocation arguments, and type erasure.
//!
//! The router stores handlers of different concrete types in one table, so
//! each registered function is erased behind `dyn ErasedHandler`. The chain
//! from user code to vtable call:
//!
//! ```text
//! async fn index(args: Args) -> Result<Reply, ApiError> { … }
//!        ↓ router.on(...)
//! index.into_boxed_handler()            ← Handler blanket impl
//!        ↓ Arc::new(FnHandler(index))   ← stored as BoxedHandler
//! handler.call(args) at request time    ← one Arc clone + one virtual call
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::{Map, Value};

use crate::db::Db;
use crate::error::ApiError;
use crate::models::User;
use crate::reply::Reply;
use crate::request::Request;
use crate::server::State;
use crate::session::Sessions;

// ── Invocation arguments ─────────────────────────────────────────────────────

/// Everything a handler is invoked with: the bound argument mapping, the
/// request context, and the shared application state.
pub struct Args {
    values: Map<String, Value>,
    request: Request,
    state: Arc<State>,
}

impl Args {
    pub(crate) fn new(values: Map<String, Value>, request: Request, state: Arc<State>) -> Self {
        Self { values, request, state }
    }

    /// A bound argument by name.
    pub fn value(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    /// A bound argument as a string slice. JSON-sourced non-string values
    /// return `None` here; fetch them through [`Args::value`].
    pub fn str(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(Value::as_str)
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// The session identity, if the auth middleware resolved one.
    pub fn user(&self) -> Option<&User> {
        self.request.user()
    }

    pub fn db(&self) -> &Db {
        &self.state.db
    }

    pub fn sessions(&self) -> &Sessions {
        &self.state.sessions
    }

    pub fn state(&self) -> &State {
        &self.state
    }
}

// ── Type erasure ─────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to the handler's result.
pub(crate) type BoxFuture =
    Pin<Box<dyn Future<Output = Result<Reply, ApiError>> + Send + 'static>>;

/// Internal dispatch interface. `#[doc(hidden)] pub` because it appears in
/// the public `Handler` trait's return type; external code cannot usefully
/// touch it.
#[doc(hidden)]
pub trait ErasedHandler {
    fn call(&self, args: Args) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedHandler = Arc<dyn ErasedHandler + Send + Sync + 'static>;

/// Implemented for every valid route handler: any
/// `async fn(Args) -> Result<Reply, ApiError>`.
///
/// Sealed — only the blanket impl below can satisfy it, which keeps the
/// accepted signature stable.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut> private::Sealed for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, ApiError>> + Send + 'static,
{
}

impl<F, Fut> Handler for F
where
    F: Fn(Args) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Reply, ApiError>> + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

/// Bridges a concrete handler `F` into the trait-object world.
struct FnHandler<F>(F);

impl<F, Fut> ErasedHandler for FnHandler<F>
where
    F: Fn(Args) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Reply, ApiError>> + Send + 'static,
{
    fn call(&self, args: Args) -> BoxFuture {
        Box::pin((self.0)(args))
    }
}
