//! Device connection to the event socket; reconnects and re-sends its joins.
use std::{collections::HashMap, time::Duration};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::protocol::{ClientMsg, FlashColors, ServerMsg};

const DEFAULT_EVENT_CAPACITY: usize = 256;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failed connects before giving up.
    pub attempts: u32,
    pub delay:    Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self { Self { attempts: 5, delay: Duration::from_millis(1000) } }
}

#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// e.g. `ws://host:3000/ws/event?token=...`
    pub url:            String,
    pub retry:          RetryPolicy,
    pub event_capacity: usize,
}

impl SocketConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into(), retry: RetryPolicy::default(), event_capacity: DEFAULT_EVENT_CAPACITY }
    }

    pub fn with_retry(mut self, attempts: u32, delay: Duration) -> Self {
        self.retry = RetryPolicy { attempts, delay };
        self
    }
}

/// What the UI renders for the reconnect indicator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub error:     Option<String>,
    /// Retries are exhausted; the socket will not come back.
    pub gave_up:   bool,
}

enum Outgoing {
    Send(ClientMsg),
    Count { event_id: String, reply: oneshot::Sender<usize> },
    Close,
}

#[derive(Clone)]
pub struct DeviceSocket {
    tx:     mpsc::UnboundedSender<Outgoing>,
    status: watch::Receiver<ConnectionStatus>,
}

impl DeviceSocket {
    /// Server frames arrive on the receiver, minus answered `activeCount` replies.
    pub fn start(cfg: SocketConfig) -> (Self, mpsc::Receiver<ServerMsg>) {
        let (tx, out_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(cfg.event_capacity);
        let (status_tx, status) = watch::channel(ConnectionStatus::default());
        tokio::spawn(Transport::new(cfg, events_tx, status_tx).run(out_rx));
        (Self { tx, status }, events_rx)
    }

    pub fn status(&self) -> watch::Receiver<ConnectionStatus> { self.status.clone() }
    pub fn is_connected(&self) -> bool { self.status.borrow().connected }

    pub fn join_event(&self, event_id: &str, user_id: &str, session_id: &str) {
        self.send(ClientMsg::JoinEvent {
            event_id: event_id.into(), user_id: user_id.into(), session_id: session_id.into(),
        });
    }

    pub fn leave_event(&self, event_id: &str, user_id: &str) {
        self.send(ClientMsg::LeaveEvent { event_id: event_id.into(), user_id: user_id.into() });
    }

    pub fn trigger_flash(&self, event_id: &str, color: &str, duration: u64, pattern: Option<String>) {
        self.send(ClientMsg::TriggerFlash {
            event_id: event_id.into(), color: color.into(), duration, pattern,
        });
    }

    pub fn update_flash_settings(&self, event_id: &str, flash_interval: u64, flash_enabled: bool, colors: FlashColors) {
        self.send(ClientMsg::UpdateFlashSettings {
            event_id: event_id.into(), flash_interval, flash_enabled, colors,
        });
    }

    pub fn send_event_notification(&self, event_id: &str, title: &str, body: &str) {
        self.send(ClientMsg::SendEventNotification {
            event_id: event_id.into(), title: title.into(), body: body.into(),
        });
    }

    /// Waits for the server's reply without a deadline; `None` if the
    /// connection drops first. Wrap in `tokio::time::timeout` as needed.
    pub async fn get_active_count(&self, event_id: &str) -> Option<usize> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(Outgoing::Count { event_id: event_id.into(), reply }).ok()?;
        rx.await.ok()
    }

    pub fn close(&self) { self.tx.send(Outgoing::Close).ok(); }

    fn send(&self, msg: ClientMsg) { self.tx.send(Outgoing::Send(msg)).ok(); }
}

enum Exit { Reconnect, Close }

struct Transport {
    cfg:     SocketConfig,
    events:  mpsc::Sender<ServerMsg>,
    status:  watch::Sender<ConnectionStatus>,
    /// (eventId, userId) → the join to replay after a reconnect
    joined:  HashMap<(String, String), ClientMsg>,
    waiters: HashMap<String, Vec<oneshot::Sender<usize>>>,
}

impl Transport {
    fn new(cfg: SocketConfig, events: mpsc::Sender<ServerMsg>, status: watch::Sender<ConnectionStatus>) -> Self {
        Self { cfg, events, status, joined: HashMap::new(), waiters: HashMap::new() }
    }

    async fn run(mut self, mut out: mpsc::UnboundedReceiver<Outgoing>) {
        let mut failures = 0u32;
        loop {
            let exit = match connect_async(self.cfg.url.as_str()).await {
                Ok((ws, _)) => {
                    failures = 0;
                    info!("socket connected to {}", self.cfg.url);
                    self.set_status(true, None);
                    let exit = self.session(ws, &mut out).await;
                    self.waiters.clear();
                    exit
                }
                Err(e) => {
                    failures += 1;
                    warn!("connect attempt {failures}/{} failed: {e}", self.cfg.retry.attempts);
                    self.set_status(false, Some(e.to_string()));
                    Exit::Reconnect
                }
            };
            if matches!(exit, Exit::Close) { break; }
            if failures >= self.cfg.retry.attempts {
                self.status.send_modify(|s| s.gave_up = true);
                warn!("giving up after {failures} failed attempts");
                break;
            }
            if matches!(self.backoff(&mut out).await, Exit::Close) { break; }
        }
        self.status.send_modify(|s| s.connected = false);
    }

    async fn session(&mut self, ws: WsStream, out: &mut mpsc::UnboundedReceiver<Outgoing>) -> Exit {
        let (mut sink, mut stream) = ws.split();

        let replay: Vec<ClientMsg> = self.joined.values().cloned().collect();
        for msg in replay {
            if send(&mut sink, &msg).await.is_err() {
                self.set_status(false, Some("send failed".into()));
                return Exit::Reconnect;
            }
        }

        loop {
            tokio::select! {
                cmd = out.recv() => match cmd {
                    None | Some(Outgoing::Close) => {
                        sink.close().await.ok();
                        self.set_status(false, None);
                        return Exit::Close;
                    }
                    Some(Outgoing::Send(msg)) => {
                        self.remember(&msg);
                        if send(&mut sink, &msg).await.is_err() { break; }
                    }
                    Some(Outgoing::Count { event_id, reply }) => {
                        let msg = ClientMsg::GetActiveCount { event_id: event_id.clone() };
                        self.waiters.entry(event_id).or_default().push(reply);
                        if send(&mut sink, &msg).await.is_err() { break; }
                    }
                },
                frame = stream.next() => match frame {
                    Some(Ok(Message::Text(raw))) => self.deliver(&raw).await,
                    Some(Ok(Message::Close(_))) | None => {
                        self.set_status(false, Some("connection closed".into()));
                        return Exit::Reconnect;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        self.set_status(false, Some(e.to_string()));
                        return Exit::Reconnect;
                    }
                },
            }
        }
        self.set_status(false, Some("send failed".into()));
        Exit::Reconnect
    }

    /// Sleeps out the retry delay. Joins and leaves issued meanwhile still
    /// update what gets replayed; everything else is dropped.
    async fn backoff(&mut self, out: &mut mpsc::UnboundedReceiver<Outgoing>) -> Exit {
        let wait = tokio::time::sleep(self.cfg.retry.delay);
        tokio::pin!(wait);
        loop {
            tokio::select! {
                _ = &mut wait => return Exit::Reconnect,
                cmd = out.recv() => match cmd {
                    None | Some(Outgoing::Close) => return Exit::Close,
                    Some(Outgoing::Send(msg)) => {
                        self.remember(&msg);
                        debug!("offline, not sent: {msg:?}");
                    }
                    Some(Outgoing::Count { .. }) => debug!("offline, count request dropped"),
                },
            }
        }
    }

    async fn deliver(&mut self, raw: &str) {
        let msg = match serde_json::from_str::<ServerMsg>(raw) {
            Ok(m) => m,
            Err(e) => { debug!("ignored server frame: {e}"); return; }
        };
        if let ServerMsg::ActiveCount { event_id, count } = &msg {
            if let Some(waiting) = self.waiters.get_mut(event_id) {
                if !waiting.is_empty() {
                    waiting.remove(0).send(*count).ok();
                    if waiting.is_empty() { self.waiters.remove(event_id); }
                    return;
                }
            }
        }
        if self.events.send(msg).await.is_err() {
            debug!("event receiver dropped");
        }
    }

    fn remember(&mut self, msg: &ClientMsg) {
        match msg {
            ClientMsg::JoinEvent { event_id, user_id, .. } => {
                self.joined.insert((event_id.clone(), user_id.clone()), msg.clone());
            }
            ClientMsg::LeaveEvent { event_id, user_id } => {
                self.joined.remove(&(event_id.clone(), user_id.clone()));
            }
            _ => {}
        }
    }

    fn set_status(&self, connected: bool, error: Option<String>) {
        self.status.send_modify(|s| { s.connected = connected; s.error = error; });
    }
}

async fn send<S>(sink: &mut S, msg: &ClientMsg) -> Result<(), ()>
where S: futures_util::Sink<Message> + Unpin {
    let text = serde_json::to_string(msg).map_err(|_| ())?;
    sink.send(Message::Text(text)).await.map_err(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    use crate::protocol::parse_client;

    enum Step {
        /// accept TCP, then drop it before the handshake
        Refuse,
        /// complete the handshake, read n frames, hang up
        Hangup(usize),
        Serve,
    }

    /// Reports `(connection index, frame)`; "open" marks a finished handshake.
    async fn scripted_server(script: Vec<Step>) -> (String, mpsc::UnboundedReceiver<(usize, String)>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/ws/event", listener.local_addr().unwrap());
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for (n, step) in script.into_iter().enumerate() {
                let (tcp, _) = listener.accept().await.unwrap();
                let limit = match step {
                    Step::Refuse    => { drop(tcp); continue; }
                    Step::Hangup(k) => Some(k),
                    Step::Serve     => None,
                };
                let mut ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
                tx.send((n, "open".to_string())).ok();
                let mut read = 0;
                while limit.map_or(true, |k| read < k) {
                    match ws.next().await {
                        Some(Ok(Message::Text(t))) => { tx.send((n, t)).ok(); read += 1; }
                        Some(Ok(_)) => {}
                        _ => break,
                    }
                }
            }
        });
        (url, rx)
    }

    async fn frame(seen: &mut mpsc::UnboundedReceiver<(usize, String)>) -> (usize, String) {
        tokio::time::timeout(Duration::from_secs(5), seen.recv()).await.unwrap().unwrap()
    }

    async fn client_frame(seen: &mut mpsc::UnboundedReceiver<(usize, String)>, conn: usize) -> ClientMsg {
        let (n, raw) = frame(seen).await;
        assert_eq!(n, conn);
        parse_client(&raw).unwrap()
    }

    fn join(ev: &str, session: &str) -> ClientMsg {
        ClientMsg::JoinEvent { event_id: ev.into(), user_id: "U1".into(), session_id: session.into() }
    }

    #[tokio::test]
    async fn reconnect_replays_joins_and_drops_offline_commands() {
        let (url, mut seen) = scripted_server(vec![Step::Hangup(1), Step::Serve]).await;
        let (sock, _events) = DeviceSocket::start(SocketConfig::new(url).with_retry(3, Duration::from_millis(300)));
        let mut status = sock.status();

        sock.join_event("E1", "U1", "s1");
        assert_eq!(frame(&mut seen).await, (0, "open".to_string()));
        assert_eq!(client_frame(&mut seen, 0).await, join("E1", "s1"));

        // first connection hung up; we are in the retry delay now
        status.wait_for(|s| !s.connected && s.error.is_some()).await.unwrap();
        sock.trigger_flash("E1", "#FF0000", 100, None);
        sock.join_event("E2", "U1", "s2");

        assert_eq!(frame(&mut seen).await, (1, "open".to_string()));
        let mut replayed = vec![client_frame(&mut seen, 1).await, client_frame(&mut seen, 1).await];
        replayed.sort_by_key(|m| m.event_id().to_owned());
        assert_eq!(replayed, vec![join("E1", "s1"), join("E2", "s2")]);

        // next frame is the leave; the offline flash never went out
        sock.leave_event("E2", "U1");
        assert_eq!(
            client_frame(&mut seen, 1).await,
            ClientMsg::LeaveEvent { event_id: "E2".into(), user_id: "U1".into() },
        );
        assert!(sock.is_connected());
        assert!(!status.borrow().gave_up);
    }

    #[tokio::test]
    async fn successful_connect_resets_failure_count() {
        // two attempts allowed: refuse, flap, refuse must not add up to a give-up
        let script = vec![Step::Refuse, Step::Hangup(0), Step::Refuse, Step::Serve];
        let (url, mut seen) = scripted_server(script).await;
        let (sock, _events) = DeviceSocket::start(SocketConfig::new(url).with_retry(2, Duration::from_millis(20)));

        assert_eq!(frame(&mut seen).await, (1, "open".to_string()));
        assert_eq!(frame(&mut seen).await, (3, "open".to_string()));
        let mut status = sock.status();
        status.wait_for(|s| s.connected || s.gave_up).await.unwrap();
        assert!(!status.borrow().gave_up);
        assert!(sock.is_connected());
    }

    #[test]
    fn leave_forgets_join() {
        let (events, _rx) = mpsc::channel(1);
        let (status, _srx) = watch::channel(ConnectionStatus::default());
        let mut t = Transport::new(SocketConfig::new("ws://unused"), events, status);
        t.remember(&ClientMsg::JoinEvent { event_id: "E1".into(), user_id: "U1".into(), session_id: "a".into() });
        t.remember(&ClientMsg::JoinEvent { event_id: "E1".into(), user_id: "U1".into(), session_id: "b".into() });
        t.remember(&ClientMsg::JoinEvent { event_id: "E2".into(), user_id: "U1".into(), session_id: "c".into() });
        assert_eq!(t.joined.len(), 2);
        t.remember(&ClientMsg::LeaveEvent { event_id: "E1".into(), user_id: "U1".into() });
        assert_eq!(t.joined.len(), 1);
        assert!(t.joined.contains_key(&("E2".to_string(), "U1".to_string())));
    }

    #[tokio::test]
    async fn count_reply_goes_to_waiter_not_event_stream() {
        let (events, mut rx) = mpsc::channel(4);
        let (status, _srx) = watch::channel(ConnectionStatus::default());
        let mut t = Transport::new(SocketConfig::new("ws://unused"), events, status);
        let (reply, answer) = oneshot::channel();
        t.waiters.entry("E1".into()).or_default().push(reply);

        t.deliver(r#"{"type":"activeCount","eventId":"E1","count":3}"#).await;
        assert_eq!(answer.await.unwrap(), 3);
        assert!(t.waiters.is_empty());

        // unsolicited reply is forwarded
        t.deliver(r#"{"type":"activeCount","eventId":"E1","count":4}"#).await;
        assert_eq!(rx.recv().await.unwrap(), ServerMsg::ActiveCount { event_id: "E1".into(), count: 4 });
        t.deliver("{oops").await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn gives_up_after_bounded_retries() {
        // bind then drop to get a port nobody listens on
        let port = {
            let l = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            l.local_addr().unwrap().port()
        };
        let cfg = SocketConfig::new(format!("ws://127.0.0.1:{port}/ws/event"))
            .with_retry(3, Duration::from_millis(10));
        let (sock, _events) = DeviceSocket::start(cfg);
        let mut status = sock.status();
        let s = tokio::time::timeout(Duration::from_secs(5), status.wait_for(|s| s.gave_up))
            .await.unwrap().unwrap().clone();
        assert!(!s.connected);
        assert!(s.error.is_some());
        assert!(!sock.is_connected());
        assert_eq!(sock.get_active_count("E1").await, None);
    }
}
