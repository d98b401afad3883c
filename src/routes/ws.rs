use axum::{
    Router, routing::get, response::IntoResponse,
    extract::{ws::{WebSocketUpgrade, WebSocket, Message}, Query, Extension},
};
use futures_util::{SinkExt, stream::StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{
    config::Config, error::{bad, AppResult},
    protocol::parse_client, state::Hub, utils::jwt::{self, Caller},
};

#[derive(Deserialize)] struct WsQuery { token:Option<String> }

pub fn router() -> Router {
    Router::new().route("/event", get(ws_handler))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(q): Query<WsQuery>,
    Extension(cfg): Extension<std::sync::Arc<Config>>,
    Extension(hub): Extension<Hub>,
) -> AppResult<impl IntoResponse> {
    let caller = match q.token.as_deref() {
        Some(t) => jwt::verify(t, &cfg.jwt_secret).ok_or_else(|| bad("bad token"))?,
        None    => Caller::default(),
    };
    let cap = cfg.mailbox_capacity;
    Ok(ws.max_message_size(cfg.max_frame_bytes)
         .on_upgrade(move |s| device_ws(s, caller, hub, cap)))
}

/* ---------------- per device ---------------- */
async fn device_ws(sock: WebSocket, caller: Caller, hub: Hub, cap: usize) {
    let conn = uuid::Uuid::new_v4();
    let (mut sink, mut stream) = sock.split();
    let (tx, mut rx) = mpsc::channel::<String>(cap);

    info!(%conn, user = ?caller.user_id, "client connected");
    hub.connect(conn, caller, tx).await;

    let mut writer = tokio::spawn(async move {
        while let Some(text) = rx.recv().await {
            if sink.send(Message::Text(text)).await.is_err() { break; }
        }
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(raw))) => match parse_client(&raw) {
                    Some(msg) => hub.command(conn, msg).await,
                    None      => debug!(%conn, "ignored malformed frame"),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => { warn!(%conn, "socket error: {e}"); break; }
            },
            _ = &mut writer => break,
        }
    }

    hub.disconnect(conn).await;
    writer.abort();
    info!(%conn, "client disconnected");
}
