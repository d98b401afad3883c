pub mod bus;
pub mod presence;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::{
    commands::{Dispatcher, Stats},
    protocol::ClientMsg,
    utils::jwt::Caller,
};
use bus::{ConnId, Mailbox};

/* ------------ hub 指令 ------------ */
pub enum HubCmd {
    Connect    { conn: ConnId, caller: Caller, mailbox: Mailbox },
    Command    { conn: ConnId, msg: ClientMsg },
    Disconnect { conn: ConnId },
    Stats      { reply: oneshot::Sender<Stats> },
}

/// Cloneable handle to the dispatcher task. Every connection task holds one;
/// the hub stops once all of them are gone.
#[derive(Clone)]
pub struct Hub { tx: mpsc::Sender<HubCmd> }

impl Hub {
    /// Starts the single dispatch task that owns presence and rooms.
    pub fn spawn(dispatcher: Dispatcher, capacity: usize) -> (Self, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(capacity);
        let task = tokio::spawn(run(dispatcher, rx));
        (Self { tx }, task)
    }

    pub async fn connect(&self, conn: ConnId, caller: Caller, mailbox: Mailbox) {
        self.send(HubCmd::Connect { conn, caller, mailbox }).await;
    }

    pub async fn command(&self, conn: ConnId, msg: ClientMsg) {
        self.send(HubCmd::Command { conn, msg }).await;
    }

    pub async fn disconnect(&self, conn: ConnId) {
        self.send(HubCmd::Disconnect { conn }).await;
    }

    pub async fn stats(&self) -> Option<Stats> {
        let (reply, rx) = oneshot::channel();
        self.send(HubCmd::Stats { reply }).await;
        rx.await.ok()
    }

    async fn send(&self, cmd: HubCmd) {
        if self.tx.send(cmd).await.is_err() {
            debug!("hub is gone, command dropped");
        }
    }
}

async fn run(mut d: Dispatcher, mut rx: mpsc::Receiver<HubCmd>) {
    info!("hub started");
    while let Some(cmd) = rx.recv().await {
        match cmd {
            HubCmd::Connect { conn, caller, mailbox } => {
                debug!(%conn, user = ?caller.user_id, "connected");
                d.connect(conn, caller, mailbox);
            }
            HubCmd::Command { conn, msg } => d.handle(conn, msg),
            HubCmd::Disconnect { conn } => {
                debug!(%conn, "disconnected");
                d.disconnect(conn);
            }
            HubCmd::Stats { reply } => { reply.send(d.stats()).ok(); }
        }
    }
    d.clear();
    info!("hub stopped");
}
