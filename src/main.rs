use std::sync::Arc;

use aweb::db::Db;
use aweb::templates::DevTemplates;
use aweb::{App, Config, Error, Server, Sessions, State};

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt().init();

    let config = Config::load("config.toml")?;
    let db = Db::connect(&config.db).await?;
    // First-run convenience for the sqlite file; existing tables are kept.
    db.ensure_tables(&aweb::models::all_schemas()).await?;

    let state = State {
        db,
        sessions: Sessions::new(config.session.secret.clone()),
        templates: Arc::new(DevTemplates),
        config: config.clone(),
    };

    let app = App::new(aweb::handlers::routes(), state);
    Server::bind(&config.server.addr).serve(app).await
}
