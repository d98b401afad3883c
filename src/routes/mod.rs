use axum::Router;

pub mod flash_log;
pub mod health;
pub mod ws;

pub fn router() -> Router {
    Router::new()
        .merge(health::router())
        .nest("/api", flash_log::router())
        .nest("/ws",  ws::router())
}
