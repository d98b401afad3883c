use axum::{routing::get, Router, Extension, Json, extract::{Path, Query}};
use serde::Deserialize;

use crate::{
    error::{AppErr, AppResult},
    store::{FlashLog, FlashRecord},
};

const DEFAULT_LIMIT: u32 = 20;
const MAX_LIMIT: u32 = 100;

#[derive(Deserialize)] struct LogQuery { limit:Option<u32> }

pub fn router() -> Router {
    Router::new().route("/events/:id/flash-log", get(recent_flashes))
}

async fn recent_flashes(
    Extension(log): Extension<Option<FlashLog>>,
    Path(event_id): Path<String>,
    Query(q): Query<LogQuery>,
) -> AppResult<Json<Vec<FlashRecord>>> {
    let log   = log.ok_or(AppErr::NoStore)?;
    let limit = q.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
    Ok(Json(log.recent(&event_id, limit).await?))
}
