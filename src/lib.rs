pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod protocol;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils {
    pub mod jwt;
}

use std::sync::Arc;

use axum::{http::{HeaderValue, Method}, Extension, Router};
use tower_http::{cors::{AllowOrigin, Any, CorsLayer}, trace::TraceLayer};

use crate::{commands::Dispatcher, config::Config, error::AppResult, state::Hub, store::FlashLog};

/// Everything a running server needs: the router plus the hub task.
pub struct App {
    pub router: Router,
    pub hub:    Hub,
    pub task:   tokio::task::JoinHandle<()>,
}

pub async fn build(cfg: Config) -> AppResult<App> {
    let flash_log = match cfg.database_url.as_deref() {
        Some(url) => Some(FlashLog::connect(url).await?),
        None      => None,
    };
    let (hub, task) = Hub::spawn(Dispatcher::new(cfg.admin_policy, flash_log.clone()), cfg.hub_capacity);

    let router = routes::router()
        .layer(Extension(hub.clone()))
        .layer(Extension(flash_log))
        .layer(cors(&cfg.allowed_origins))
        .layer(Extension(Arc::new(cfg)))
        .layer(TraceLayer::new_for_http());
    Ok(App { router, hub, task })
}

fn cors(origins: &[String]) -> CorsLayer {
    let layer = CorsLayer::new().allow_methods([Method::GET, Method::POST]);
    let list: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
    if list.is_empty() {
        layer.allow_origin(Any)
    } else {
        layer.allow_origin(AllowOrigin::list(list))
    }
}
