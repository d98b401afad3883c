//! Headless device: joins an event and plays every flash it receives.
//! With `--trigger` it acts as the admin console: sends one flash and exits.
use std::{sync::Arc, time::Duration};

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use flash_server::{
    client::{DeviceSocket, FlashPlayer, Haptics, SocketConfig},
    protocol::ServerMsg,
    utils::jwt::{self, Role},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

struct LogHaptics;
impl Haptics for LogHaptics {
    fn pulse(&self) { info!("bzz"); }
}

#[derive(Parser, Debug)]
#[command(name = "flash_device", about = "Headless flash device and admin trigger")]
struct Args {
    /// e.g. ws://127.0.0.1:3000/ws/event
    url: String,
    event: String,
    user: String,
    #[arg(long, conflicts_with = "sign_as")]
    token: Option<String>,
    /// Mint a token for USER with JWT_SECRET
    #[arg(long, value_enum)]
    sign_as: Option<RoleArg>,
    /// Send one flash of this color and exit
    #[arg(long, value_name = "COLOR")]
    trigger: Option<String>,
    /// Hold time of the triggered flash
    #[arg(long, value_name = "MS", requires = "trigger")]
    ms: Option<u64>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum RoleArg { Guest, Admin }

impl From<RoleArg> for Role {
    fn from(r: RoleArg) -> Self {
        match r {
            RoleArg::Guest => Role::Guest,
            RoleArg::Admin => Role::Admin,
        }
    }
}

impl Args {
    fn token(&self) -> anyhow::Result<Option<String>> {
        match (&self.token, self.sign_as) {
            (Some(t), _) => Ok(Some(t.clone())),
            (None, Some(role)) => {
                let secret = std::env::var("JWT_SECRET").context("--sign-as needs JWT_SECRET")?;
                Ok(Some(jwt::sign(&self.user, role.into(), &secret)?))
            }
            (None, None) => Ok(None),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let url = match args.token()? {
        Some(t) => format!("{}?token={t}", args.url),
        None    => args.url.clone(),
    };
    let (sock, mut events) = DeviceSocket::start(SocketConfig::new(url));

    if let Some(color) = &args.trigger {
        let mut status = sock.status();
        status.wait_for(|s| s.connected || s.gave_up).await?;
        if !sock.is_connected() { bail!("could not connect"); }
        sock.trigger_flash(&args.event, color, args.ms.unwrap_or(500), None);
        // a reply only comes back when the server refuses
        if let Ok(Some(ServerMsg::Error { message })) =
            tokio::time::timeout(Duration::from_millis(500), events.recv()).await {
            bail!("server refused: {message}");
        }
        sock.close();
        return Ok(());
    }

    let session = nanoid::nanoid!(12);
    sock.join_event(&args.event, &args.user, &session);
    info!("joined event {} as {} (session {session})", args.event, args.user);

    let (player, mut frames, _task) = FlashPlayer::spawn(Arc::new(LogHaptics));
    let mut status = sock.status();
    loop {
        tokio::select! {
            msg = events.recv() => {
                let Some(msg) = msg else { break };
                match &msg {
                    ServerMsg::AttendeeCountUpdate { count, .. } => info!("attendees: {count}"),
                    ServerMsg::Notification { title, body, .. } => info!("notification: {title}: {body}"),
                    _ => {}
                }
                player.apply(&msg);
            }
            Ok(()) = frames.changed() => {
                let f = frames.borrow_and_update().clone();
                info!("overlay {:?} {} -> opacity {} over {:?}", f.phase, f.color, f.opacity, f.fade);
            }
            Ok(()) = status.changed() => {
                let s = status.borrow_and_update().clone();
                info!("connected={} error={:?}", s.connected, s.error);
                if s.gave_up { bail!("connection lost"); }
            }
            _ = tokio::signal::ctrl_c() => {
                sock.leave_event(&args.event, &args.user);
                tokio::time::sleep(Duration::from_millis(100)).await;
                sock.close();
                break;
            }
        }
    }
    Ok(())
}
