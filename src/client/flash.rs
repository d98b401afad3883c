//! Device-side flash pulse: `Idle → FadingIn → Holding → FadingOut → Idle`.
use std::{pin::Pin, sync::Arc, time::Duration};

use tokio::{sync::{mpsc, watch}, task::JoinHandle, time::{sleep, Sleep}};
use tracing::debug;

use crate::protocol::ServerMsg;

/// Fade-in and fade-out time.
pub const FADE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase { Idle, FadingIn, Holding, FadingOut }

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    pub generation: u64,
    pub after:      Duration,
}

/// What the overlay should show: animate to `opacity` over `fade`.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub phase:   Phase,
    pub color:   String,
    pub opacity: f32,
    pub fade:    Duration,
}

#[derive(Debug)]
pub struct FlashMachine {
    phase:      Phase,
    color:      String,
    hold:       Duration,
    generation: u64,
    enabled:    bool,
}

impl Default for FlashMachine {
    fn default() -> Self {
        Self { phase: Phase::Idle, color: "#FDB913".into(), hold: Duration::ZERO, generation: 0, enabled: true }
    }
}

impl FlashMachine {
    pub fn new() -> Self { Self::default() }

    pub fn phase(&self) -> Phase { self.phase }
    pub fn color(&self) -> &str { &self.color }

    /// Disabling blocks new flashes and drops a running one straight to Idle.
    /// Returns true when that cut the overlay.
    pub fn set_enabled(&mut self, on: bool) -> bool {
        self.enabled = on;
        if on || self.phase == Phase::Idle { return false; }
        self.phase = Phase::Idle;
        // outstanding timer is now stale
        self.generation += 1;
        true
    }

    /// Starts the pulse, or restarts it from FadingIn when one is running.
    /// `None` while disabled.
    pub fn trigger(&mut self, color: impl Into<String>, hold: Duration) -> Option<Timer> {
        if !self.enabled { return None; }
        self.color = color.into();
        self.hold = hold;
        self.phase = Phase::FadingIn;
        Some(self.arm(FADE))
    }

    pub fn elapsed(&mut self, generation: u64) -> Option<Timer> {
        if generation != self.generation { return None; }
        match self.phase {
            Phase::FadingIn  => { self.phase = Phase::Holding;   Some(self.arm(self.hold)) }
            Phase::Holding   => { self.phase = Phase::FadingOut; Some(self.arm(FADE)) }
            Phase::FadingOut => { self.phase = Phase::Idle; None }
            Phase::Idle      => None,
        }
    }

    pub fn frame(&self) -> Frame {
        let (opacity, fade) = match self.phase {
            Phase::Idle      => (0.0, Duration::ZERO),
            Phase::FadingIn  => (1.0, FADE),
            Phase::Holding   => (1.0, Duration::ZERO),
            Phase::FadingOut => (0.0, FADE),
        };
        Frame { phase: self.phase, color: self.color.clone(), opacity, fade }
    }

    fn arm(&mut self, after: Duration) -> Timer {
        self.generation += 1;
        Timer { generation: self.generation, after }
    }
}

/// Device vibration. Best effort: no result, must not block.
pub trait Haptics: Send + Sync + 'static {
    fn pulse(&self);
}

pub struct NoHaptics;
impl Haptics for NoHaptics { fn pulse(&self) {} }

enum PlayerCmd {
    Flash   { color: String, hold: Duration },
    Enabled (bool),
}

#[derive(Clone)]
pub struct FlashHandle { tx: mpsc::UnboundedSender<PlayerCmd> }

impl FlashHandle {
    pub fn flash(&self, color: impl Into<String>, hold: Duration) {
        self.tx.send(PlayerCmd::Flash { color: color.into(), hold }).ok();
    }

    pub fn set_enabled(&self, on: bool) {
        self.tx.send(PlayerCmd::Enabled(on)).ok();
    }

    /// Feeds a server frame; anything but `flash` / `flashSettingsUpdated` is ignored.
    pub fn apply(&self, msg: &ServerMsg) {
        match msg {
            ServerMsg::Flash { color, duration, .. } => self.flash(color.clone(), Duration::from_millis(*duration)),
            ServerMsg::FlashSettingsUpdated { flash_enabled, .. } => self.set_enabled(*flash_enabled),
            _ => {}
        }
    }
}

pub struct FlashPlayer;

impl FlashPlayer {
    /// Runs until every [`FlashHandle`] is dropped.
    pub fn spawn(haptics: Arc<dyn Haptics>) -> (FlashHandle, watch::Receiver<Frame>, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let machine = FlashMachine::new();
        let (frames, frame_rx) = watch::channel(machine.frame());
        let task = tokio::spawn(play(machine, rx, frames, haptics));
        (FlashHandle { tx }, frame_rx, task)
    }
}

type Pending = Option<(u64, Pin<Box<Sleep>>)>;

async fn play(
    mut m: FlashMachine,
    mut rx: mpsc::UnboundedReceiver<PlayerCmd>,
    frames: watch::Sender<Frame>,
    haptics: Arc<dyn Haptics>,
) {
    // the only timer; replacing it cancels the old one
    let mut pending: Pending = None;
    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                None => break,
                Some(PlayerCmd::Flash { color, hold }) => {
                    if let Some(t) = m.trigger(color, hold) {
                        haptics.pulse();
                        pending = Some(arm(t));
                        frames.send_replace(m.frame());
                    } else {
                        debug!("flash ignored, flashing disabled");
                    }
                }
                Some(PlayerCmd::Enabled(on)) => {
                    if m.set_enabled(on) {
                        pending = None;
                        frames.send_replace(m.frame());
                    }
                }
            },
            generation = expiry(&mut pending) => {
                pending = m.elapsed(generation).map(arm);
                frames.send_replace(m.frame());
            }
        }
    }
}

fn arm(t: Timer) -> (u64, Pin<Box<Sleep>>) { (t.generation, Box::pin(sleep(t.after))) }

async fn expiry(pending: &mut Pending) -> u64 {
    match pending {
        Some((generation, timer)) => { timer.as_mut().await; *generation }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct Buzz(AtomicUsize);
    impl Haptics for Buzz { fn pulse(&self) { self.0.fetch_add(1, Ordering::SeqCst); } }

    fn ms(n: u64) -> Duration { Duration::from_millis(n) }

    #[test]
    fn machine_walks_all_phases() {
        let mut m = FlashMachine::new();
        let t = m.trigger("#FDB913", ms(500)).unwrap();
        assert_eq!((m.phase(), t.after), (Phase::FadingIn, FADE));
        let t = m.elapsed(t.generation).unwrap();
        assert_eq!((m.phase(), t.after), (Phase::Holding, ms(500)));
        let t = m.elapsed(t.generation).unwrap();
        assert_eq!((m.phase(), t.after), (Phase::FadingOut, FADE));
        assert!(m.elapsed(t.generation).is_none());
        assert_eq!(m.phase(), Phase::Idle);
        assert_eq!(m.frame().opacity, 0.0);
    }

    #[test]
    fn restart_invalidates_old_hold_timer() {
        let mut m = FlashMachine::new();
        let t = m.trigger("red", ms(500)).unwrap();
        let hold = m.elapsed(t.generation).unwrap();
        assert_eq!(m.phase(), Phase::Holding);

        let fresh = m.trigger("blue", ms(1000)).unwrap();
        assert_eq!((m.phase(), m.color()), (Phase::FadingIn, "blue"));
        // the superseded hold expiry must not push us to FadingOut
        assert!(m.elapsed(hold.generation).is_none());
        assert_eq!(m.phase(), Phase::FadingIn);
        assert_eq!(m.elapsed(fresh.generation).unwrap().after, ms(1000));
    }

    #[test]
    fn disabled_machine_ignores_flash() {
        let mut m = FlashMachine::new();
        m.set_enabled(false);
        assert!(m.trigger("red", ms(10)).is_none());
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn disabling_mid_pulse_cuts_to_idle() {
        let mut m = FlashMachine::new();
        let t = m.trigger("red", ms(5000)).unwrap();
        let hold = m.elapsed(t.generation).unwrap();
        assert!(m.set_enabled(false));
        assert_eq!((m.phase(), m.frame().opacity), (Phase::Idle, 0.0));
        assert!(m.elapsed(hold.generation).is_none());
        assert!(!m.set_enabled(false));
        assert!(!m.set_enabled(true));
        assert!(m.trigger("blue", ms(10)).is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn player_runs_timed_pulse() {
        let buzz = Arc::new(Buzz::default());
        let (h, frames, _task) = FlashPlayer::spawn(buzz.clone());

        h.flash("#FDB913", ms(500));
        sleep(ms(50)).await;
        assert_eq!(frames.borrow().phase, Phase::FadingIn);
        assert_eq!(frames.borrow().color, "#FDB913");
        sleep(ms(100)).await;   // t=150
        assert_eq!(frames.borrow().phase, Phase::Holding);
        sleep(ms(490)).await;   // t=640
        assert_eq!(frames.borrow().phase, Phase::FadingOut);
        sleep(ms(110)).await;   // t=750
        assert_eq!(frames.borrow().phase, Phase::Idle);
        assert_eq!(buzz.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn new_flash_while_holding_restarts() {
        let buzz = Arc::new(Buzz::default());
        let (h, frames, _task) = FlashPlayer::spawn(buzz.clone());

        h.flash("red", ms(500));
        sleep(ms(300)).await;
        assert_eq!(frames.borrow().phase, Phase::Holding);

        h.flash("blue", ms(1000));   // t=300, old fade-out was due at 600
        sleep(ms(10)).await;
        assert_eq!(frames.borrow().phase, Phase::FadingIn);
        assert_eq!(frames.borrow().color, "blue");
        sleep(ms(340)).await;   // t=650
        assert_eq!(frames.borrow().phase, Phase::Holding);
        assert_eq!(frames.borrow().color, "blue");
        sleep(ms(800)).await;   // t=1450
        assert_eq!(frames.borrow().phase, Phase::FadingOut);
        sleep(ms(100)).await;   // t=1550
        assert_eq!(frames.borrow().phase, Phase::Idle);
        assert_eq!(buzz.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_frame_disables_flashing() {
        let buzz = Arc::new(Buzz::default());
        let (h, frames, _task) = FlashPlayer::spawn(buzz.clone());
        h.apply(&ServerMsg::FlashSettingsUpdated {
            flash_interval: 1000,
            flash_enabled: false,
            colors: crate::protocol::FlashColors { color1: "a".into(), color2: "b".into() },
        });
        h.apply(&ServerMsg::Flash { color: "red".into(), duration: 100, pattern: None, timestamp: 0 });
        sleep(ms(20)).await;
        assert_eq!(frames.borrow().phase, Phase::Idle);
        assert_eq!(buzz.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn settings_frame_mid_hold_clears_overlay() {
        let (h, frames, _task) = FlashPlayer::spawn(Arc::new(NoHaptics));
        h.flash("red", ms(5000));
        sleep(ms(300)).await;
        assert_eq!(frames.borrow().phase, Phase::Holding);

        h.apply(&ServerMsg::FlashSettingsUpdated {
            flash_interval: 1000,
            flash_enabled: false,
            colors: crate::protocol::FlashColors { color1: "a".into(), color2: "b".into() },
        });
        sleep(ms(10)).await;
        assert_eq!(frames.borrow().phase, Phase::Idle);
        assert_eq!(frames.borrow().opacity, 0.0);
        // the old hold expiry does nothing
        sleep(ms(6000)).await;
        assert_eq!(frames.borrow().phase, Phase::Idle);

        h.set_enabled(true);
        h.flash("blue", ms(100));
        sleep(ms(10)).await;
        assert_eq!(frames.borrow().phase, Phase::FadingIn);
    }

    #[tokio::test]
    async fn player_stops_with_last_handle() {
        let (h, _frames, task) = FlashPlayer::spawn(Arc::new(NoHaptics));
        drop(h);
        task.await.unwrap();
    }
}
