pub mod auth;
pub mod config;
pub mod delivery;
pub mod error;
pub mod hub;
pub mod keys;
pub mod logging;
pub mod model;
pub mod protocol;
pub mod push;
pub mod registry;
pub mod routes;
pub mod store;
pub mod topics;

mod appresult;

use std::sync::Arc;

use axum::{extract::FromRef, http::HeaderValue, Router};
use tower_http::cors::{Any, CorsLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use hub::{Collaborators, Hub};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub hub: Hub,
    pub config: Arc<Config>,
}

fn cors(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    Ok(match &config.cors_allow_origin {
        Some(origin) => layer.allow_origin(HeaderValue::from_str(origin)?),
        None => layer.allow_origin(Any),
    })
}

pub fn app(state: AppState) -> anyhow::Result<Router> {
    let cors = cors(&state.config)?;
    Ok(routes::router().with_state(state).layer(cors))
}
