//! Heartbeat supervision.
//!
//! The supervisor is a plain value owned by the session, not a task. The
//! session awaits [`HeartbeatSupervisor::wait_tick`] inside its select loop
//! and calls [`HeartbeatSupervisor::on_tick`] when it fires.

use std::time::Duration;

use tokio::time::{self, Instant};

/// What the session must do on a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Send a heartbeat.
    Beat,
    /// The previous beat was never acknowledged. The supervisor has stopped
    /// itself; the connection should be replaced.
    Zombie,
    /// The supervisor is not running.
    Idle,
}

/// Periodic liveness proof with zombie detection.
#[derive(Debug, Clone)]
pub struct HeartbeatSupervisor {
    jitter: f64,
    interval: Option<Duration>,
    next_tick: Option<Instant>,
    acked: bool,
    last_sent_at: Option<Instant>,
    last_ack_at: Option<Instant>,
    latency: Option<Duration>,
}

impl HeartbeatSupervisor {
    /// Create a stopped supervisor. `jitter` (clamped to 0.0–1.0) is the
    /// fraction of the interval by which the first tick may come early.
    pub fn new(jitter: f64) -> Self {
        Self {
            jitter: jitter.clamp(0.0, 1.0),
            interval: None,
            next_tick: None,
            acked: true,
            last_sent_at: None,
            last_ack_at: None,
            latency: None,
        }
    }

    /// (Re)start with `interval`, drawing the first-tick jitter from the
    /// thread RNG.
    pub fn start(&mut self, interval: Duration) {
        self.start_with_random(interval, rand::random::<f64>());
    }

    /// (Re)start with an explicit `random` in `[0, 1)`. Any previous timer is
    /// replaced. The first tick fires after `interval * (1 - jitter * random)`.
    pub fn start_with_random(&mut self, interval: Duration, random: f64) {
        let first = interval.mul_f64(1.0 - self.jitter * random.clamp(0.0, 1.0));
        self.interval = Some(interval);
        self.next_tick = Some(Instant::now() + first);
        self.acked = true;
        self.last_sent_at = None;
    }

    /// Cancel the timer. Idempotent.
    pub fn stop(&mut self) {
        self.interval = None;
        self.next_tick = None;
    }

    /// Whether a timer is armed.
    pub fn is_running(&self) -> bool {
        self.next_tick.is_some()
    }

    /// Resolves at the next tick; never resolves while stopped.
    pub async fn wait_tick(&self) {
        match self.next_tick {
            Some(deadline) => time::sleep_until(deadline).await,
            None => std::future::pending().await,
        }
    }

    /// Advance the timer and report what to do.
    pub fn on_tick(&mut self) -> TickAction {
        let Some(interval) = self.interval else {
            return TickAction::Idle;
        };
        if !self.acked {
            self.stop();
            return TickAction::Zombie;
        }
        self.next_tick = Some(Instant::now() + interval);
        TickAction::Beat
    }

    /// Record that a heartbeat went out.
    pub fn record_sent(&mut self) {
        self.acked = false;
        self.last_sent_at = Some(Instant::now());
    }

    /// Record an acknowledgement. Returns the round trip of the last beat.
    pub fn ack(&mut self) -> Option<Duration> {
        let now = Instant::now();
        self.acked = true;
        self.last_ack_at = Some(now);
        if let Some(sent) = self.last_sent_at {
            self.latency = Some(now.saturating_duration_since(sent));
        }
        self.latency
    }

    /// Treat the connection as live without a round trip.
    pub fn mark_acked(&mut self) {
        self.acked = true;
    }

    /// Whether the last beat has been acknowledged.
    pub fn acked(&self) -> bool {
        self.acked
    }

    /// Current interval, while running.
    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Most recent round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    /// When the last beat went out.
    pub fn last_sent_at(&self) -> Option<Instant> {
        self.last_sent_at
    }

    /// When the last ack came in.
    pub fn last_ack_at(&self) -> Option<Instant> {
        self.last_ack_at
    }
}
