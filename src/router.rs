//! Radix-tree request router.
//!
//! One tree per HTTP method, O(path-length) lookup. Each registration pairs
//! a handler with the [`ParamSpec`] describing how its arguments are bound —
//! the spec is validated here, once, never per request.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::bind::ParamSpec;
use crate::handler::{BoxedHandler, Handler};
use crate::method::Method;

/// A registered route: the erased handler plus its parameter declaration.
pub(crate) struct Route {
    pub handler: BoxedHandler,
    pub spec: ParamSpec,
}

/// The application router. Build it once at startup; registrations chain.
pub struct Router {
    routes: HashMap<Method, MatchitRouter<Arc<Route>>>,
}

impl Router {
    pub fn new() -> Self {
        Self { routes: HashMap::new() }
    }

    /// Registers a handler for a method + path pair with its parameter
    /// spec. Path parameters use `{name}` syntax and surface as path
    /// captures in the argument mapping.
    ///
    /// # Panics
    ///
    /// Panics on a conflicting or malformed path — registration happens at
    /// startup and a bad route should stop the process there.
    pub fn on(
        mut self,
        method: Method,
        path: &str,
        handler: impl Handler,
        spec: ParamSpec,
    ) -> Self {
        let route = Arc::new(Route { handler: handler.into_boxed_handler(), spec });
        self.routes
            .entry(method)
            .or_default()
            .insert(path, route)
            .unwrap_or_else(|e| panic!("invalid route `{path}`: {e}"));
        self
    }

    /// Shorthand for a GET route.
    pub fn get(self, path: &str, handler: impl Handler, spec: ParamSpec) -> Self {
        self.on(Method::Get, path, handler, spec)
    }

    /// Shorthand for a POST route.
    pub fn post(self, path: &str, handler: impl Handler, spec: ParamSpec) -> Self {
        self.on(Method::Post, path, handler, spec)
    }

    pub(crate) fn lookup(
        &self,
        method: Method,
        path: &str,
    ) -> Option<(Arc<Route>, HashMap<String, String>)> {
        let tree = self.routes.get(&method)?;
        let matched = tree.at(path).ok()?;
        let params = matched
            .params
            .iter()
            .map(|(k, v)| (k.to_owned(), v.to_owned()))
            .collect();
        Some((Arc::clone(matched.value), params))
    }

    /// Whether any route matches `path` under a different method.
    pub(crate) fn path_exists(&self, path: &str) -> bool {
        self.routes.values().any(|tree| tree.at(path).is_ok())
    }
}

impl Default for Router {
    fn default() -> Self {
        Self::new()
    }
}
