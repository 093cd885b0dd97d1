//! Application assembly, request dispatch, and the HTTP server.
//!
//! # Graceful shutdown
//!
//! On SIGTERM (what an orchestrator sends) or Ctrl-C the server:
//! 1. immediately stops accepting new connections,
//! 2. lets every in-flight connection task run to completion,
//! 3. returns from [`Server::serve`] so `main` exits cleanly.

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use http_body_util::BodyExt;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::db::Db;
use crate::error::Error;
use crate::handler::Args;
use crate::method::Method;
use crate::middleware::{Auth, Endpoint, Logger, Middleware, Next, Normalize};
use crate::reply::Reply;
use crate::request::Request;
use crate::response::Response;
use crate::router::Router;
use crate::session::Sessions;
use crate::status::Status;
use crate::templates::TemplateEngine;

// ── Shared state ─────────────────────────────────────────────────────────────

/// What every handler and middleware stage shares: the row mapper, the
/// session signer, the template seam, and the merged configuration.
pub struct State {
    pub db: Db,
    pub sessions: Sessions,
    pub templates: Arc<dyn TemplateEngine>,
    pub config: Config,
}

// ── App: chain + dispatcher ──────────────────────────────────────────────────

/// The assembled application: router, middleware chain, shared state.
/// [`App::handle`] is the whole request path minus the socket, which is what
/// the integration tests drive directly.
pub struct App {
    chain: Vec<Arc<dyn Middleware>>,
    dispatch: Dispatch,
}

impl App {
    pub fn new(router: Router, state: State) -> Self {
        let state = Arc::new(state);
        let chain: Vec<Arc<dyn Middleware>> = vec![
            Arc::new(Logger),
            Arc::new(Auth::new(Arc::clone(&state))),
            Arc::new(Normalize::new(Arc::clone(&state))),
        ];
        Self { chain, dispatch: Dispatch { router: Arc::new(router), state } }
    }

    pub fn state(&self) -> &State {
        &self.dispatch.state
    }

    /// Runs one request through the full chain.
    pub async fn handle(&self, req: Request) -> Response {
        let next = Next { chain: &self.chain, endpoint: &self.dispatch };
        match next.run(req).await {
            Reply::Response(resp) => resp,
            // Normalize always wraps, but a custom chain might not.
            other => other.into_response(self.dispatch.state.templates.as_ref()),
        }
    }
}

/// The terminal endpoint: route lookup, parameter binding, handler
/// invocation, and the domain-error boundary.
struct Dispatch {
    router: Arc<Router>,
    state: Arc<State>,
}

#[async_trait::async_trait]
impl Endpoint for Dispatch {
    async fn call(&self, mut req: Request) -> Reply {
        let Some((route, params)) = self.router.lookup(req.method(), req.path()) else {
            let status = if self.router.path_exists(req.path()) {
                Status::MethodNotAllowed
            } else {
                Status::NotFound
            };
            return Reply::Response(Response::status(status));
        };
        req.set_params(params);

        let values = match crate::bind::bind(&route.spec, &req) {
            Ok(values) => values,
            Err(e) => {
                warn!(path = %req.path(), "bind failed: {e}");
                return Reply::Response(e.to_response());
            }
        };

        let args = Args::new(values, req, Arc::clone(&self.state));
        match route.handler.call(args).await {
            Ok(reply) => reply,
            Err(api) => {
                if u16::from(api.status()) >= 500 {
                    error!("handler failed: {api}");
                } else {
                    info!("api error: {api}");
                }
                Reply::Response(api.to_response())
            }
        }
    }
}

// ── HTTP server ──────────────────────────────────────────────────────────────

/// The HTTP server.
pub struct Server {
    addr: SocketAddr,
}

impl Server {
    /// Configures the server to bind `addr` when [`serve`](Server::serve)
    /// is called.
    ///
    /// # Panics
    ///
    /// Panics if `addr` is not a valid `host:port` string.
    pub fn bind(addr: &str) -> Self {
        let addr: SocketAddr = addr.parse().expect("invalid socket address");
        Self { addr }
    }

    /// Accepts connections and dispatches them through `app` until a full
    /// graceful shutdown completes.
    pub async fn serve(self, app: App) -> Result<(), Error> {
        let listener = TcpListener::bind(self.addr).await?;
        let app = Arc::new(app);

        info!(addr = %self.addr, "aweb listening");

        // JoinSet tracks every connection task so shutdown can drain them.
        let mut tasks = tokio::task::JoinSet::new();

        let shutdown = shutdown_signal();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                // Check shutdown first so a signal stops the accept loop
                // even when more connections are queued.
                biased;

                () = &mut shutdown => {
                    info!(in_flight = tasks.len(), "shutdown signal received, draining connections");
                    break;
                }

                res = listener.accept() => {
                    let (stream, remote_addr) = match res {
                        Ok(v) => v,
                        Err(e) => {
                            error!("accept error: {e}");
                            continue;
                        }
                    };

                    let app = Arc::clone(&app);
                    let io = TokioIo::new(stream);

                    tasks.spawn(async move {
                        let svc = service_fn(move |req| {
                            let app = Arc::clone(&app);
                            async move { transport(app, req).await }
                        });

                        if let Err(e) = ConnBuilder::new(TokioExecutor::new())
                            .serve_connection(io, svc)
                            .await
                        {
                            error!(peer = %remote_addr, "connection error: {e}");
                        }
                    });
                }

                // Reap finished tasks so the JoinSet stays bounded.
                Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
            }
        }

        while tasks.join_next().await.is_some() {}

        info!("aweb stopped");
        Ok(())
    }
}

/// Adapts one hyper request into the framework's [`Request`], runs it, and
/// adapts the result back. Infallible: every failure becomes a response.
async fn transport(
    app: Arc<App>,
    req: hyper::Request<hyper::body::Incoming>,
) -> Result<http::Response<http_body_util::Full<bytes::Bytes>>, std::convert::Infallible> {
    let Ok(method) = Method::from_str(req.method().as_str()) else {
        return Ok(Response::status(Status::MethodNotAllowed).into_http());
    };
    let path = req.uri().path().to_owned();
    let query = req.uri().query().map(str::to_owned);

    let headers: Vec<(String, String)> = req
        .headers()
        .iter()
        .filter_map(|(k, v)| Some((k.as_str().to_owned(), v.to_str().ok()?.to_owned())))
        .collect();

    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes().to_vec(),
        Err(e) => {
            warn!("body read failed: {e}");
            return Ok(Response::status(Status::BadRequest).into_http());
        }
    };

    let mut request = Request::new(method, path).with_body(body);
    if let Some(q) = query {
        request = request.with_query(q);
    }
    for (k, v) in headers {
        request = request.with_header(&k, &v);
    }

    Ok(app.handle(request).await.into_http())
}

/// Resolves on the first shutdown signal. SIGTERM and Ctrl-C on Unix,
/// Ctrl-C only elsewhere.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let sigterm = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = sigterm => {}
    }
}
