//! # aweb
//!
//! A minimal web framework and the blog application built on it.
//!
//! ## The contract
//!
//! The framework half is glue, deliberately thin: radix-tree routing via
//! [`matchit`], declarative parameter binding (per-route [`ParamSpec`]s
//! validated at registration, arguments pulled from JSON/form bodies, query
//! strings, and path captures per request), a three-stage middleware chain
//! (logging, session auth, response normalization), and a [`Reply`] type
//! that closes over every shape a handler may return. The storage half is a
//! row mapper: explicit [`Schema`](db::Schema) values generate parameterized
//! CRUD SQL executed on a bounded sqlx pool.
//!
//! The blog itself — users, posts, comments, a signed session cookie — lives
//! in [`handlers`] and exercises all of it.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use aweb::{App, Config, Server, State, Sessions};
//! use aweb::db::Db;
//! use aweb::templates::DevTemplates;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), aweb::Error> {
//!     let config = Config::load("config.toml")?;
//!     let db = Db::connect(&config.db).await?;
//!     let state = State {
//!         db,
//!         sessions: Sessions::new(config.session.secret.clone()),
//!         templates: Arc::new(DevTemplates),
//!         config: config.clone(),
//!     };
//!     let app = App::new(aweb::handlers::routes(), state);
//!     Server::bind(&config.server.addr).serve(app).await
//! }
//! ```

mod bind;
mod config;
mod error;
mod handler;
mod method;
mod reply;
mod request;
mod response;
mod router;
mod server;
mod session;
mod status;

pub mod db;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod templates;

pub use bind::{bind, BindError, ParamSpec};
pub use config::{Config, DbConfig, ServerConfig, SessionConfig};
pub use error::{ApiError, Error};
pub use handler::{Args, Handler};
pub use method::Method;
pub use reply::{Reply, TEMPLATE_KEY};
pub use request::Request;
pub use response::{Response, ResponseBuilder};
pub use router::Router;
pub use server::{App, Server, State};
pub use session::{Sessions, COOKIE_NAME, MAX_AGE_SECS};
pub use status::Status;
