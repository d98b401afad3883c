use flash_server::{build, config::{AdminPolicy, Config}, error::AppErr};
use std::time::Duration;

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), AppErr> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cfg  = Config::from_env()?;
    let addr = cfg.socket_addr()?;
    if cfg.admin_policy == AdminPolicy::Open {
        warn!("ADMIN_COMMANDS=open: any client may trigger flashes and notifications");
    }
    if cfg.database_url.is_none() {
        info!("DATABASE_URL not set, flash log disabled");
    }

    let app = build(cfg).await?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("flash server listening on http://{addr}");
    info!("event socket: ws://{addr}/ws/event");

    axum::serve(listener, app.router.into_make_service())
        .with_graceful_shutdown(async { tokio::signal::ctrl_c().await.ok(); })
        .await?;

    // upgraded sockets may still hold hub handles
    drop(app.hub);
    if tokio::time::timeout(Duration::from_secs(5), app.task).await.is_err() {
        warn!("hub did not stop within 5s");
    }
    Ok(())
}
