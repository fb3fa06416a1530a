use std::sync::Arc;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use whisperhub::{
    app,
    logging::init_tracing,
    push::{HttpPushGateway, NoopPushGateway, PushGateway},
    store::SqliteStore,
    AppState, Collaborators, Config, Hub,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let config = Config::from_env()?;

    let connect_options: SqliteConnectOptions = config
        .database_url
        .parse()
        .context("DATABASE_URL is not a valid sqlite url")?;
    let db_pool = SqlitePoolOptions::new()
        .max_connections(config.database_max_connections)
        .connect_with(connect_options.create_if_missing(true))
        .await
        .context("could not open database")?;

    let store = SqliteStore::new(db_pool);
    store.migrate().await.context("could not create schema")?;

    let push: Arc<dyn PushGateway> = match &config.push_endpoint {
        Some(endpoint) => Arc::new(HttpPushGateway::new(endpoint.clone(), config.push_server_key.clone())),
        None => {
            tracing::warn!("PUSH_ENDPOINT not set, offline recipients will not be notified");
            Arc::new(NoopPushGateway)
        }
    };

    let hub = Hub::new(Collaborators::from_store(store, push), config.push_preview_chars);
    let bind_addr = config.bind_addr;
    let app = app(AppState {
        hub,
        config: Arc::new(config),
    })?;

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;
    tracing::info!(%bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
