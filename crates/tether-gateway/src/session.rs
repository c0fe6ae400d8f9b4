//! The gateway session state machine.
//!
//! ```text
//! Idle ─connect─▶ Connecting ─open─▶ AwaitingHello ─Hello─▶ Identifying ─READY───▶ Ready
//!                                                   └─────▶ Resuming ───RESUMED─▶ Ready
//! any ─close/zombie/op 7/op 9─▶ Disconnected ─reconnect─▶ Connecting
//! any ─close() or fatal close code─▶ Closed
//! ```
//!
//! Everything runs on the task that calls [`GatewaySession::run`]. The only
//! other task per connection is its reader, which tags each inbound message
//! with the connection epoch; messages from an older epoch are dropped.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use futures::StreamExt;
use futures::stream::BoxStream;
use tether_cache::{CacheCapacity, CacheView, EntityCache};
use tether_protocol::{
    ConnectionProperties, GatewayFrame, HelloPayload, IdentifyPayload, ResumePayload, decode, encode,
};
use tether_settings::{CacheSettings, GatewaySettings, TetherSettings};

use crate::backoff::BackoffPolicy;
use crate::dispatch;
use crate::errors::{GatewayError, Result};
use crate::events::{DispatchEvent, LifecycleEvent};
use crate::heartbeat::{HeartbeatSupervisor, TickAction};
use crate::state::{Phase, SessionState, SessionStatus};
use crate::transport::{Connection, Connector, Transport, TransportEvent};

/// Close code for a deliberate close that ends the session.
pub const NORMAL_CLOSE_CODE: u16 = 1000;
/// Close code for dropping a connection we intend to resume.
pub const RESUMABLE_CLOSE_CODE: u16 = 4000;

const INBOUND_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 16;
const LIFECYCLE_BUFFER: usize = 64;

/// Close codes after which reconnecting cannot succeed: authentication
/// failed, invalid shard, sharding required, invalid API version, invalid or
/// disallowed intents.
pub fn is_fatal_close(code: u16) -> bool {
    matches!(code, 4004 | 4010..=4014)
}

/// Close codes that end the session but allow a fresh Identify: invalid
/// sequence, session timed out.
pub fn clears_session(code: u16) -> bool {
    matches!(code, 4007 | 4009)
}

/// Everything a session needs besides its connector.
#[derive(Clone, Debug)]
pub struct SessionOptions {
    /// Endpoint and identify parameters.
    pub gateway: GatewaySettings,
    /// First-beat jitter fraction.
    pub heartbeat_jitter: f64,
    /// Reconnect backoff.
    pub backoff: BackoffPolicy,
    /// Entity cache bounds.
    pub cache_capacity: CacheCapacity,
}

impl SessionOptions {
    /// Derive options from loaded settings.
    pub fn from_settings(settings: &TetherSettings) -> Self {
        let cache = &settings.cache;
        Self {
            gateway: settings.gateway.clone(),
            heartbeat_jitter: settings.heartbeat.jitter,
            backoff: BackoffPolicy::from(&settings.reconnect),
            cache_capacity: CacheCapacity {
                guilds: CacheSettings::bound(cache.guilds),
                channels: CacheSettings::bound(cache.channels),
                roles: CacheSettings::bound(cache.roles),
                users: CacheSettings::bound(cache.users),
                messages: CacheSettings::bound(cache.messages),
            },
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_settings(&TetherSettings::default())
    }
}

#[derive(Debug)]
enum Command {
    Reconnect,
    Close,
}

#[derive(Debug)]
struct Inbound {
    epoch: u64,
    event: TransportEvent,
}

#[derive(Deserialize)]
struct ReadyInfo {
    session_id: String,
    #[serde(default)]
    resume_gateway_url: Option<String>,
}

/// Remote control for a running [`GatewaySession`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    cache: CacheView,
}

impl SessionHandle {
    /// Ask the session to replace its connection.
    pub async fn reconnect(&self) -> Result<()> {
        self.commands
            .send(Command::Reconnect)
            .await
            .map_err(|_| GatewayError::Closed)
    }

    /// Ask the session to close.
    pub async fn close(&self) -> Result<()> {
        self.commands
            .send(Command::Close)
            .await
            .map_err(|_| GatewayError::Closed)
    }

    /// Latest status snapshot.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Wait until the status satisfies `predicate`.
    pub async fn wait_for(&self, predicate: impl FnMut(&SessionStatus) -> bool) -> Result<SessionStatus> {
        let mut status = self.status.clone();
        let snapshot = status
            .wait_for(predicate)
            .await
            .map_err(|_| GatewayError::Closed)?
            .clone();
        Ok(snapshot)
    }

    /// Lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.lifecycle.subscribe()
    }

    /// Read access to the entity cache.
    pub fn cache(&self) -> &CacheView {
        &self.cache
    }
}

/// One logical gateway session.
pub struct GatewaySession {
    options: SessionOptions,
    connector: Arc<dyn Connector>,
    state: SessionState,
    heartbeat: HeartbeatSupervisor,
    cache: Arc<EntityCache>,
    transport: Option<Box<dyn Transport>>,
    reader: Option<JoinHandle<()>>,
    inbound_tx: mpsc::Sender<Inbound>,
    inbound_rx: mpsc::Receiver<Inbound>,
    commands_tx: mpsc::Sender<Command>,
    commands_rx: mpsc::Receiver<Command>,
    dispatch_tx: mpsc::UnboundedSender<DispatchEvent>,
    dispatch_rx: Option<mpsc::UnboundedReceiver<DispatchEvent>>,
    lifecycle: broadcast::Sender<LifecycleEvent>,
    status_tx: watch::Sender<SessionStatus>,
    reconnecting: bool,
}

impl std::fmt::Debug for GatewaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewaySession")
            .field("state", &self.state)
            .field("heartbeat", &self.heartbeat)
            .field("reconnecting", &self.reconnecting)
            .finish_non_exhaustive()
    }
}

impl GatewaySession {
    /// Create an idle session.
    pub fn new(options: SessionOptions, connector: Arc<dyn Connector>) -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_BUFFER);
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (dispatch_tx, dispatch_rx) = mpsc::unbounded_channel();
        let (lifecycle, _) = broadcast::channel(LIFECYCLE_BUFFER);
        let (status_tx, _) = watch::channel(SessionStatus::default());
        Self {
            heartbeat: HeartbeatSupervisor::new(options.heartbeat_jitter),
            cache: Arc::new(EntityCache::new(options.cache_capacity)),
            options,
            connector,
            state: SessionState::default(),
            transport: None,
            reader: None,
            inbound_tx,
            inbound_rx,
            commands_tx,
            commands_rx,
            dispatch_tx,
            dispatch_rx: Some(dispatch_rx),
            lifecycle,
            status_tx,
            reconnecting: false,
        }
    }

    /// A new remote control.
    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            commands: self.commands_tx.clone(),
            status: self.status_tx.subscribe(),
            lifecycle: self.lifecycle.clone(),
            cache: self.cache.view(),
        }
    }

    /// Take the dispatch event receiver. Until it is taken, dispatch events
    /// are not queued.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<DispatchEvent>> {
        self.dispatch_rx.take()
    }

    /// Read access to the entity cache.
    pub fn cache(&self) -> CacheView {
        self.cache.view()
    }

    /// Current session state.
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// The heartbeat supervisor.
    pub fn heartbeat(&self) -> &HeartbeatSupervisor {
        &self.heartbeat
    }

    /// Whether the session is established.
    pub fn is_ready(&self) -> bool {
        self.state.phase == Phase::Ready
    }

    /// Status snapshot.
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            phase: self.state.phase,
            session_id: self.state.session_id.clone(),
            sequence: self.state.sequence,
            latency: self.heartbeat.latency(),
            epoch: self.state.epoch,
        }
    }

    // ─── Connection lifecycle ──────────────────────────────────────────────

    /// Open a transport and wait for Hello on it.
    ///
    /// Unless a resume is pending the previous session identity is dropped.
    /// Fails with [`GatewayError::Connection`]; retrying is up to the caller.
    pub async fn connect(&mut self) -> Result<()> {
        let url = self.prepare_connect().await?;
        let opened = self.connector.open(&url).await;
        self.finish_connect(opened)
    }

    /// Drop the old connection and pick the URL for the next one.
    async fn prepare_connect(&mut self) -> Result<String> {
        if self.state.phase == Phase::Closed {
            return Err(GatewayError::Closed);
        }
        self.heartbeat.stop();
        self.teardown(RESUMABLE_CLOSE_CODE).await;
        if !self.state.should_resume {
            self.state.clear_session();
        }

        let base = match (&self.state.resume_gateway_url, self.state.should_resume) {
            (Some(resume_url), true) => resume_url.clone(),
            _ => self.options.gateway.url.clone(),
        };
        let url = self.options.gateway.connect_url(&base);
        self.set_phase(Phase::Connecting);
        debug!(%url, resume = self.state.should_resume, "opening transport");
        Ok(url)
    }

    fn finish_connect(&mut self, opened: Result<Connection>) -> Result<()> {
        let connection = match opened {
            Ok(connection) => connection,
            Err(error) => {
                self.set_phase(Phase::Disconnected);
                return Err(match error {
                    GatewayError::Connection(_) => error,
                    other => GatewayError::Connection(other.to_string()),
                });
            }
        };

        self.state.epoch += 1;
        let epoch = self.state.epoch;
        self.transport = Some(connection.transport);
        self.reader = Some(spawn_reader(epoch, connection.inbound, self.inbound_tx.clone()));
        self.set_phase(Phase::AwaitingHello);
        info!(epoch, "transport open, awaiting hello");
        self.emit(LifecycleEvent::Connected { epoch });
        Ok(())
    }

    /// Replace the connection, resuming if there is a session to resume.
    ///
    /// Connection failures are retried with backoff; once retries are
    /// exhausted the last [`GatewayError::Connection`] is returned. A no-op
    /// while a reconnect is already running or after [`close`](Self::close).
    pub async fn reconnect(&mut self) -> Result<()> {
        if self.state.phase == Phase::Closed || self.reconnecting {
            debug!(phase = %self.state.phase, "reconnect ignored");
            return Ok(());
        }
        self.reconnecting = true;
        let result = self.reconnect_with_backoff().await;
        self.reconnecting = false;
        result
    }

    async fn reconnect_with_backoff(&mut self) -> Result<()> {
        self.heartbeat.stop();
        self.teardown(RESUMABLE_CLOSE_CODE).await;
        self.state.should_resume = self.state.session_id.is_some();
        let resume = self.state.should_resume;
        self.set_phase(Phase::Disconnected);
        info!(epoch = self.state.epoch, resume, "reconnecting");
        self.emit(LifecycleEvent::Reconnecting { resume });

        let mut attempt = 0;
        loop {
            let url = self.prepare_connect().await?;
            let connector = Arc::clone(&self.connector);
            let Some(opened) = unless_closed(&mut self.commands_rx, connector.open(&url)).await else {
                info!("close requested while dialing");
                self.close().await;
                return Ok(());
            };
            match self.finish_connect(opened) {
                Ok(()) => return Ok(()),
                Err(GatewayError::Connection(reason)) if attempt < self.options.backoff.max_retries => {
                    let delay = self.options.backoff.delay(attempt);
                    warn!(
                        attempt,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        %reason,
                        "reconnect attempt failed, backing off"
                    );
                    self.fault(GatewayError::Connection(reason));
                    if unless_closed(&mut self.commands_rx, tokio::time::sleep(delay)).await.is_none() {
                        info!("close requested during reconnect backoff");
                        self.close().await;
                        return Ok(());
                    }
                    attempt += 1;
                }
                Err(error) => {
                    error!(attempt, %error, "giving up on reconnect");
                    return Err(error);
                }
            }
        }
    }

    /// Close the session for good.
    pub async fn close(&mut self) {
        if self.state.phase == Phase::Closed {
            return;
        }
        self.heartbeat.stop();
        self.teardown(NORMAL_CLOSE_CODE).await;
        self.set_phase(Phase::Closed);
        info!(epoch = self.state.epoch, "session closed");
        self.emit(LifecycleEvent::Closed);
    }

    /// Drive the session until it is closed.
    ///
    /// Connects first if the session is idle, and reconnects first if an
    /// earlier reconnect gave up. Returns `Ok` after a local close,
    /// [`GatewayError::FatalClose`] when the server ends the session for
    /// good, or [`GatewayError::Connection`] when reconnecting gave up.
    pub async fn run(&mut self) -> Result<()> {
        match self.state.phase {
            Phase::Idle => self.connect().await?,
            Phase::Disconnected => self.reconnect().await?,
            _ => {}
        }
        while self.step().await? {}
        Ok(())
    }

    /// Handle exactly one inbound message, heartbeat tick, or command.
    /// Returns `false` once the session is closed.
    pub async fn step(&mut self) -> Result<bool> {
        if self.state.phase == Phase::Closed {
            return Ok(false);
        }
        tokio::select! {
            Some(inbound) = self.inbound_rx.recv() => self.handle_inbound(inbound).await?,
            () = self.heartbeat.wait_tick() => self.on_heartbeat_tick().await?,
            Some(command) = self.commands_rx.recv() => match command {
                Command::Reconnect => self.reconnect().await?,
                Command::Close => self.close().await,
            },
        }
        Ok(self.state.phase != Phase::Closed)
    }

    // ─── Inbound routing ───────────────────────────────────────────────────

    async fn handle_inbound(&mut self, inbound: Inbound) -> Result<()> {
        // Without a transport the current epoch is already torn down.
        if inbound.epoch != self.state.epoch || self.transport.is_none() {
            debug!(
                epoch = inbound.epoch,
                current = self.state.epoch,
                "dropping message from stale connection"
            );
            return Ok(());
        }
        match inbound.event {
            TransportEvent::Text(raw) => self.handle_frame(&raw).await,
            TransportEvent::Closed { code, reason } => self.on_transport_closed(code, reason).await,
            TransportEvent::Error(reason) => {
                self.fault(GatewayError::Transport(reason.clone()));
                self.on_transport_closed(None, reason).await
            }
        }
    }

    /// Decode one raw frame and act on it. Malformed frames are dropped.
    pub async fn handle_frame(&mut self, raw: &str) -> Result<()> {
        if self.state.phase == Phase::Closed {
            return Err(GatewayError::Closed);
        }
        let frame = match decode(raw) {
            Ok(frame) => frame,
            Err(error) => {
                warn!(epoch = self.state.epoch, %error, "dropping malformed frame");
                self.fault(error.into());
                return Ok(());
            }
        };
        debug!(epoch = self.state.epoch, op = %frame.opcode(), "frame received");
        let result = self.route(frame).await;
        self.recover(result).await
    }

    async fn route(&mut self, frame: GatewayFrame) -> Result<()> {
        let op = frame.opcode();
        match frame {
            GatewayFrame::Hello(hello) => self.on_hello(hello).await,
            GatewayFrame::Dispatch { seq, event, data } => self.on_dispatch(seq, event, data).await,
            GatewayFrame::Heartbeat { .. } => {
                debug!("server requested a heartbeat");
                self.send_heartbeat().await
            }
            GatewayFrame::HeartbeatAck => {
                self.on_heartbeat_ack();
                Ok(())
            }
            GatewayFrame::InvalidSession { resumable } => self.on_invalid_session(resumable).await,
            GatewayFrame::Reconnect => {
                info!(epoch = self.state.epoch, "server requested reconnect");
                self.reconnect().await
            }
            GatewayFrame::Identify(_) | GatewayFrame::Resume(_) => {
                self.violation(format!("client-only opcode {op} received"));
                Ok(())
            }
        }
    }

    /// Turn a failed write into a disconnect.
    async fn recover(&mut self, result: Result<()>) -> Result<()> {
        match result {
            Err(GatewayError::Transport(reason)) => {
                warn!(epoch = self.state.epoch, %reason, "transport write failed");
                self.fault(GatewayError::Transport(reason.clone()));
                self.on_transport_closed(None, reason).await
            }
            other => other,
        }
    }

    async fn on_hello(&mut self, hello: HelloPayload) -> Result<()> {
        if self.state.phase != Phase::AwaitingHello {
            self.violation(format!("hello received while {}", self.state.phase));
            return Ok(());
        }
        if hello.heartbeat_interval == 0 {
            self.violation("hello with zero heartbeat interval".to_string());
            return Ok(());
        }

        let epoch = self.state.epoch;
        let frame = match self.state.resume_target() {
            Some((session_id, seq)) => {
                info!(epoch, session_id, seq, "resuming session");
                GatewayFrame::Resume(ResumePayload {
                    token: self.options.gateway.token.clone(),
                    session_id: session_id.to_owned(),
                    seq,
                })
            }
            None => {
                info!(epoch, "identifying");
                GatewayFrame::Identify(self.identify_payload())
            }
        };
        let resuming = matches!(frame, GatewayFrame::Resume(_));

        self.state.should_resume = false;
        self.heartbeat.start(Duration::from_millis(hello.heartbeat_interval));
        self.heartbeat.mark_acked();
        if resuming {
            self.set_phase(Phase::Resuming);
            self.emit(LifecycleEvent::Resuming);
        } else {
            self.set_phase(Phase::Identifying);
            self.emit(LifecycleEvent::Identifying);
        }
        self.send_frame(&frame).await
    }

    async fn on_dispatch(&mut self, seq: u64, event: String, data: Value) -> Result<()> {
        if !self.state.phase.past_hello() {
            self.violation(format!("dispatch {event} before hello"));
            return Ok(());
        }
        if !self.state.observe_sequence(seq) {
            debug!(seq, current = ?self.state.sequence, event = %event, "sequence did not advance");
        }

        let mut resumed = false;
        match event.as_str() {
            "READY" => match ReadyInfo::deserialize(&data) {
                Ok(ready) => {
                    info!(epoch = self.state.epoch, session_id = %ready.session_id, "session ready");
                    self.state.session_id = Some(ready.session_id.clone());
                    self.state.resume_gateway_url = ready.resume_gateway_url;
                    self.set_phase(Phase::Ready);
                    self.emit(LifecycleEvent::Ready {
                        session_id: ready.session_id,
                    });
                }
                Err(error) => {
                    warn!(%error, "READY without a usable session id");
                    self.fault(GatewayError::MalformedFrame(format!("READY payload: {error}")));
                }
            },
            "RESUMED" => {
                info!(epoch = self.state.epoch, seq, "session resumed");
                self.set_phase(Phase::Ready);
                self.emit(LifecycleEvent::Resumed);
                resumed = true;
            }
            _ => {}
        }

        if !dispatch::apply(&self.cache, &event, &data) {
            debug!(seq, event = %event, "forwarding event without cache update");
        }
        self.publish_status();
        self.emit_dispatch(DispatchEvent {
            name: event,
            seq,
            data,
        });

        if resumed {
            self.send_heartbeat().await?;
        }
        Ok(())
    }

    fn on_heartbeat_ack(&mut self) {
        if let Some(latency) = self.heartbeat.ack() {
            let latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
            debug!(epoch = self.state.epoch, latency_ms, "heartbeat acknowledged");
            self.emit(LifecycleEvent::HeartbeatAck { latency_ms });
        }
        self.publish_status();
    }

    async fn on_invalid_session(&mut self, resumable: bool) -> Result<()> {
        warn!(epoch = self.state.epoch, resumable, "session invalidated");
        self.fault(GatewayError::SessionInvalidated { resumable });
        if !resumable {
            self.invalidate_session();
        }
        self.reconnect().await
    }

    async fn on_transport_closed(&mut self, code: Option<u16>, reason: String) -> Result<()> {
        self.heartbeat.stop();
        self.abort_reader();
        self.transport = None;
        self.set_phase(Phase::Disconnected);
        warn!(epoch = self.state.epoch, ?code, %reason, "transport closed");
        self.emit(LifecycleEvent::Disconnected { code });

        match code {
            Some(code) if is_fatal_close(code) => {
                error!(code, %reason, "fatal close code, not reconnecting");
                self.set_phase(Phase::Closed);
                self.emit(LifecycleEvent::Closed);
                return Err(GatewayError::FatalClose { code, reason });
            }
            Some(code) if clears_session(code) => self.invalidate_session(),
            _ => {}
        }
        self.reconnect().await
    }

    // ─── Heartbeat ─────────────────────────────────────────────────────────

    /// React to a heartbeat timer tick: beat, or replace a zombie connection.
    pub async fn on_heartbeat_tick(&mut self) -> Result<()> {
        match self.heartbeat.on_tick() {
            TickAction::Idle => Ok(()),
            TickAction::Zombie => {
                warn!(epoch = self.state.epoch, "heartbeat not acknowledged, connection is a zombie");
                self.fault(GatewayError::ZombieConnection);
                self.reconnect().await
            }
            TickAction::Beat => {
                let result = self.send_heartbeat().await;
                self.recover(result).await
            }
        }
    }

    /// Send a heartbeat now without moving the timer.
    pub async fn beat_now(&mut self) -> Result<()> {
        let result = self.send_heartbeat().await;
        self.recover(result).await
    }

    async fn send_heartbeat(&mut self) -> Result<()> {
        if self.transport.is_none() {
            return Ok(());
        }
        let frame = GatewayFrame::Heartbeat {
            seq: self.state.sequence,
        };
        self.send_frame(&frame).await?;
        self.heartbeat.record_sent();
        Ok(())
    }

    // ─── Helpers ───────────────────────────────────────────────────────────

    fn identify_payload(&self) -> IdentifyPayload {
        let gateway = &self.options.gateway;
        IdentifyPayload {
            token: gateway.token.clone(),
            intents: gateway.intents,
            properties: ConnectionProperties {
                os: gateway.properties.os.clone(),
                browser: gateway.properties.browser.clone(),
                device: gateway.properties.device.clone(),
            },
            large_threshold: gateway.large_threshold,
        }
    }

    async fn send_frame(&mut self, frame: &GatewayFrame) -> Result<()> {
        let text = match encode(frame) {
            Ok(text) => text,
            Err(error) => {
                error!(op = %frame.opcode(), %error, "failed to encode outbound frame");
                self.fault(error.into());
                return Ok(());
            }
        };
        let Some(transport) = self.transport.as_mut() else {
            debug!(op = %frame.opcode(), "no open transport, dropping outbound frame");
            return Ok(());
        };
        debug!(epoch = self.state.epoch, op = %frame.opcode(), "sending frame");
        transport.send(text).await
    }

    /// Drop the session identity and everything cached under it.
    fn invalidate_session(&mut self) {
        self.state.clear_session();
        self.cache.clear();
        self.publish_status();
    }

    async fn teardown(&mut self, code: u16) {
        self.abort_reader();
        if let Some(mut transport) = self.transport.take() {
            if let Err(error) = transport.close(code).await {
                debug!(code, %error, "closing transport failed");
            }
        }
    }

    fn abort_reader(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        self.state.phase = phase;
        self.publish_status();
    }

    fn publish_status(&self) {
        let _ = self.status_tx.send_replace(self.status());
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.lifecycle.send(event);
    }

    fn fault(&self, error: GatewayError) {
        self.emit(LifecycleEvent::Fault(error));
    }

    fn violation(&self, reason: String) {
        warn!(epoch = self.state.epoch, phase = %self.state.phase, %reason, "protocol violation, frame dropped");
        self.fault(GatewayError::ProtocolViolation(reason));
    }

    fn emit_dispatch(&self, event: DispatchEvent) {
        if self.dispatch_rx.is_some() {
            return;
        }
        if self.dispatch_tx.send(event).is_err() {
            debug!("dispatch receiver dropped");
        }
    }
}

impl Drop for GatewaySession {
    fn drop(&mut self) {
        self.abort_reader();
    }
}

/// Resolve `work` unless a close command arrives first. Reconnect commands
/// are ignored while one is already running.
async fn unless_closed<F: Future>(commands: &mut mpsc::Receiver<Command>, work: F) -> Option<F::Output> {
    tokio::pin!(work);
    loop {
        tokio::select! {
            output = &mut work => return Some(output),
            Some(command) = commands.recv() => match command {
                Command::Close => return None,
                Command::Reconnect => debug!("reconnect requested while reconnecting, ignored"),
            },
        }
    }
}

fn spawn_reader(
    epoch: u64,
    mut inbound: BoxStream<'static, TransportEvent>,
    tx: mpsc::Sender<Inbound>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(event) = inbound.next().await {
            let terminal = event.is_terminal();
            if tx.send(Inbound { epoch, event }).await.is_err() || terminal {
                return;
            }
        }
        let _ = tx
            .send(Inbound {
                epoch,
                event: TransportEvent::Closed {
                    code: None,
                    reason: "stream ended".to_string(),
                },
            })
            .await;
    })
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;
    use tether_cache::Guild;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::transport::memory::{ClientMessage, MemoryConnector, MemoryServer};

    const INTERVAL: Duration = Duration::from_millis(100);

    fn options() -> SessionOptions {
        let mut options = SessionOptions::default();
        options.gateway.url = "ws://gateway.test".into();
        options.gateway.token = "token".into();
        options.heartbeat_jitter = 0.0;
        options.backoff = BackoffPolicy {
            max_retries: 2,
            base_delay_ms: 10,
            max_delay_ms: 100,
            jitter_factor: 0.0,
        };
        options
    }

    struct Harness {
        session: GatewaySession,
        server: MemoryServer,
        servers: UnboundedReceiver<MemoryServer>,
        connector: Arc<MemoryConnector>,
        events: UnboundedReceiver<DispatchEvent>,
    }

    impl Harness {
        async fn connected() -> Self {
            let (connector, mut servers) = MemoryConnector::new();
            let mut session = GatewaySession::new(options(), connector.clone());
            let events = session.events().unwrap();
            session.connect().await.unwrap();
            let server = servers.recv().await.unwrap();
            Self {
                session,
                server,
                servers,
                connector,
                events,
            }
        }

        /// Connected, identified, and `READY` with session `abc` at seq 1.
        async fn ready() -> Self {
            let mut h = Self::connected().await;
            h.hello().await;
            assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Identify(_)));
            h.dispatch(1, "READY", json!({"session_id": "abc", "resume_gateway_url": "ws://resume.test"}))
                .await;
            assert!(h.session.is_ready());
            h
        }

        async fn push(&mut self, frame: GatewayFrame) {
            assert!(self.server.send_frame(&frame));
            assert!(self.session.step().await.unwrap());
        }

        async fn hello(&mut self) {
            self.push(GatewayFrame::Hello(HelloPayload {
                heartbeat_interval: 100,
            }))
            .await;
        }

        async fn dispatch(&mut self, seq: u64, event: &str, data: Value) {
            self.push(GatewayFrame::Dispatch {
                seq,
                event: event.into(),
                data,
            })
            .await;
        }

        async fn next_server(&mut self) -> MemoryServer {
            let server = self.servers.recv().await.unwrap();
            std::mem::replace(&mut self.server, server)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn queued_close_from_torn_down_connection_is_ignored() {
        let mut h = Harness::ready().await;
        assert!(h.server.close(4004, "Authentication failed."));
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        h.connector.fail_next(5);
        assert_matches!(h.session.reconnect().await, Err(GatewayError::Connection(_)));
        assert_eq!(h.session.state().phase, Phase::Disconnected);

        if let Ok(result) = tokio::time::timeout(Duration::from_secs(1), h.session.step()).await {
            assert!(result.unwrap());
        }
        assert_eq!(h.session.state().phase, Phase::Disconnected);
        assert_eq!(h.session.state().session_id.as_deref(), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn hello_is_answered_with_identify() {
        let mut h = Harness::connected().await;
        assert_eq!(h.session.state().phase, Phase::AwaitingHello);
        assert_eq!(h.server.url, "ws://gateway.test/?v=10&encoding=json");

        h.hello().await;
        let identify = assert_matches!(
            h.server.recv_frame().await,
            Some(GatewayFrame::Identify(identify)) => identify
        );
        assert_eq!(identify.token, "token");
        assert_eq!(identify.intents, tether_settings::DEFAULT_INTENTS);
        assert_eq!(h.session.state().phase, Phase::Identifying);
        assert_eq!(h.session.heartbeat().interval(), Some(INTERVAL));
    }

    #[tokio::test(start_paused = true)]
    async fn ready_establishes_session() {
        let h = Harness::ready().await;
        let status = h.session.status();
        assert!(status.ready());
        assert_eq!(status.session_id.as_deref(), Some("abc"));
        assert_eq!(status.sequence, Some(1));
        assert_eq!(
            h.session.state().resume_gateway_url.as_deref(),
            Some("ws://resume.test")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sequence_never_decreases_but_events_still_flow() {
        let mut h = Harness::ready().await;
        h.dispatch(5, "MESSAGE_CREATE", json!({"id": "m1"})).await;
        h.dispatch(3, "MESSAGE_CREATE", json!({"id": "m2"})).await;
        assert_eq!(h.session.state().sequence, Some(5));

        let seqs: Vec<u64> = std::iter::from_fn(|| h.events.try_recv().ok())
            .map(|e| e.seq)
            .collect();
        assert_eq!(seqs, [1, 5, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn dispatch_before_hello_is_dropped() {
        let mut h = Harness::connected().await;
        let mut lifecycle = h.session.handle().subscribe();
        h.dispatch(7, "MESSAGE_CREATE", json!({"id": "m1"})).await;
        assert_eq!(h.session.state().sequence, None);
        assert_eq!(h.session.state().phase, Phase::AwaitingHello);
        assert!(h.events.try_recv().is_err());
        assert_matches!(
            lifecycle.try_recv(),
            Ok(LifecycleEvent::Fault(GatewayError::ProtocolViolation(_)))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_hello_is_a_violation() {
        let mut h = Harness::ready().await;
        h.hello().await;
        assert!(h.session.is_ready());
        assert!(h.server.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_frames_are_dropped() {
        let mut h = Harness::ready().await;
        let mut lifecycle = h.session.handle().subscribe();
        assert!(h.server.send_text("{not json"));
        let _ = h.session.step().await.unwrap();
        assert!(h.server.send_text(r#"{"op": 42, "d": null}"#));
        let _ = h.session.step().await.unwrap();
        assert!(h.session.is_ready());
        assert_matches!(lifecycle.try_recv(), Ok(LifecycleEvent::Fault(GatewayError::MalformedFrame(_))));
        assert_matches!(lifecycle.try_recv(), Ok(LifecycleEvent::Fault(GatewayError::MalformedFrame(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_cycle_measures_latency() {
        let mut h = Harness::ready().await;
        let _ = h.session.step().await.unwrap();
        assert_matches!(
            h.server.recv_frame().await,
            Some(GatewayFrame::Heartbeat { seq: Some(1) })
        );
        assert!(!h.session.heartbeat().acked());

        tokio::time::advance(Duration::from_millis(25)).await;
        h.push(GatewayFrame::HeartbeatAck).await;
        assert!(h.session.heartbeat().acked());
        assert_eq!(h.session.status().latency, Some(Duration::from_millis(25)));
    }

    #[tokio::test(start_paused = true)]
    async fn missed_ack_reconnects_once() {
        let mut h = Harness::ready().await;
        let _ = h.session.step().await.unwrap();
        assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Heartbeat { .. }));

        let _ = h.session.step().await.unwrap();
        let mut old = h.next_server().await;
        assert_eq!(old.recv().await, Some(ClientMessage::Close(RESUMABLE_CLOSE_CODE)));
        assert_eq!(h.connector.dialed().len(), 2);
        assert_eq!(h.session.state().phase, Phase::AwaitingHello);
        assert!(!h.session.heartbeat().is_running());
        assert!(h.session.state().should_resume);
        assert_eq!(h.server.url, "ws://resume.test/?v=10&encoding=json");
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_request_resumes() {
        let mut h = Harness::ready().await;
        h.dispatch(2, "GUILD_CREATE", json!({"id": "g1", "name": "home"})).await;
        h.push(GatewayFrame::Reconnect).await;
        let _ = h.next_server().await;

        h.hello().await;
        let resume = assert_matches!(
            h.server.recv_frame().await,
            Some(GatewayFrame::Resume(resume)) => resume
        );
        assert_eq!(resume.session_id, "abc");
        assert_eq!(resume.seq, 2);
        assert_eq!(h.session.state().phase, Phase::Resuming);
        assert!(!h.session.state().should_resume);

        h.dispatch(3, "RESUMED", json!(null)).await;
        assert!(h.session.is_ready());
        assert_eq!(h.session.state().session_id.as_deref(), Some("abc"));
        assert_eq!(h.session.state().sequence, Some(3));
        assert_matches!(
            h.server.recv_frame().await,
            Some(GatewayFrame::Heartbeat { seq: Some(3) })
        );
        assert!(h.session.cache().contains::<Guild>("g1"));
    }

    #[tokio::test(start_paused = true)]
    async fn non_resumable_invalidation_reidentifies() {
        let mut h = Harness::ready().await;
        h.dispatch(2, "GUILD_CREATE", json!({"id": "g1"})).await;
        h.push(GatewayFrame::InvalidSession { resumable: false }).await;
        assert_eq!(h.session.state().session_id, None);
        assert_eq!(h.session.state().sequence, None);
        assert!(!h.session.cache().contains::<Guild>("g1"));

        let _ = h.next_server().await;
        assert_eq!(h.server.url, "ws://gateway.test/?v=10&encoding=json");
        h.hello().await;
        assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Identify(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn resumable_invalidation_resumes() {
        let mut h = Harness::ready().await;
        h.push(GatewayFrame::InvalidSession { resumable: true }).await;
        let _ = h.next_server().await;
        h.hello().await;
        assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Resume(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn server_heartbeat_request_is_answered_immediately() {
        let mut h = Harness::ready().await;
        h.push(GatewayFrame::Heartbeat { seq: None }).await;
        assert_matches!(
            h.server.recv_frame().await,
            Some(GatewayFrame::Heartbeat { seq: Some(1) })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn fatal_close_code_ends_session() {
        let mut h = Harness::ready().await;
        assert!(h.server.close(4004, "Authentication failed."));
        let err = h.session.step().await.unwrap_err();
        assert_matches!(err, GatewayError::FatalClose { code: 4004, .. });
        assert_eq!(h.session.state().phase, Phase::Closed);
        assert_eq!(h.connector.dialed().len(), 1);
        assert!(!h.session.step().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn session_timeout_close_clears_session() {
        let mut h = Harness::ready().await;
        assert!(h.server.close(4009, "Session timed out."));
        let _ = h.session.step().await.unwrap();
        assert_eq!(h.session.state().session_id, None);
        let _ = h.next_server().await;
        h.hello().await;
        assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Identify(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn ordinary_close_resumes_at_resume_url() {
        let mut h = Harness::ready().await;
        assert!(h.server.close(1006, ""));
        let _ = h.session.step().await.unwrap();
        let _ = h.next_server().await;
        assert_eq!(h.server.url, "ws://resume.test/?v=10&encoding=json");
        h.hello().await;
        assert_matches!(h.server.recv_frame().await, Some(GatewayFrame::Resume(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_peer_triggers_reconnect() {
        let (connector, mut servers) = MemoryConnector::new();
        let mut session = GatewaySession::new(options(), connector.clone());
        session.connect().await.unwrap();
        drop(servers.recv().await.unwrap());

        let _ = session.step().await.unwrap();
        let server = servers.recv().await.unwrap();
        assert_eq!(connector.dialed().len(), 2);
        assert_eq!(server.url, "ws://gateway.test/?v=10&encoding=json");
        assert_eq!(session.state().phase, Phase::AwaitingHello);
        assert_eq!(session.state().epoch, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_epoch_messages_are_ignored() {
        let mut h = Harness::ready().await;
        let stale = Inbound {
            epoch: h.session.state().epoch - 1,
            event: TransportEvent::Closed {
                code: Some(4004),
                reason: String::new(),
            },
        };
        h.session.handle_inbound(stale).await.unwrap();
        assert!(h.session.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn connect_failure_is_reported() {
        let (connector, _servers) = MemoryConnector::new();
        connector.fail_next(1);
        let mut session = GatewaySession::new(options(), connector);
        let err = session.connect().await.unwrap_err();
        assert_matches!(err, GatewayError::Connection(_));
        assert_eq!(session.state().phase, Phase::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_backs_off_then_succeeds() {
        let mut h = Harness::ready().await;
        h.connector.fail_next(2);
        let started = tokio::time::Instant::now();
        h.session.reconnect().await.unwrap();
        assert_eq!(h.connector.dialed().len(), 4);
        assert_eq!(started.elapsed(), Duration::from_millis(10 + 20));
        assert_eq!(h.session.state().phase, Phase::AwaitingHello);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_gives_up_after_max_retries() {
        let mut h = Harness::ready().await;
        h.connector.fail_next(3);
        let err = h.session.reconnect().await.unwrap_err();
        assert_matches!(err, GatewayError::Connection(_));
        assert_eq!(h.connector.dialed().len(), 4);
        assert_eq!(h.session.state().phase, Phase::Disconnected);
        assert_eq!(h.session.state().session_id.as_deref(), Some("abc"));
    }

    #[tokio::test(start_paused = true)]
    async fn close_is_terminal() {
        let mut h = Harness::ready().await;
        h.session.close().await;
        assert_eq!(h.server.recv().await, Some(ClientMessage::Close(NORMAL_CLOSE_CODE)));
        assert_eq!(h.session.state().phase, Phase::Closed);
        assert!(!h.session.heartbeat().is_running());

        h.session.reconnect().await.unwrap();
        assert_eq!(h.connector.dialed().len(), 1);
        assert_matches!(h.session.connect().await, Err(GatewayError::Closed));
        assert_matches!(h.session.handle_frame("{}").await, Err(GatewayError::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn handle_commands_drive_the_session() {
        let mut h = Harness::ready().await;
        let handle = h.session.handle();
        handle.reconnect().await.unwrap();
        let _ = h.session.step().await.unwrap();
        let _ = h.next_server().await;
        assert_eq!(h.connector.dialed().len(), 2);

        handle.close().await.unwrap();
        assert!(!h.session.step().await.unwrap());
        assert_eq!(handle.status().phase, Phase::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn events_are_not_queued_until_taken() {
        let (connector, mut servers) = MemoryConnector::new();
        let mut session = GatewaySession::new(options(), connector);
        session.connect().await.unwrap();
        let server = servers.recv().await.unwrap();
        assert!(server.send_frame(&GatewayFrame::Hello(HelloPayload { heartbeat_interval: 100 })));
        let _ = session.step().await.unwrap();
        assert!(server.send_frame(&GatewayFrame::Dispatch {
            seq: 1,
            event: "READY".into(),
            data: json!({"session_id": "abc"}),
        }));
        let _ = session.step().await.unwrap();
        let mut events = session.events().unwrap();
        assert!(events.try_recv().is_err());
        assert!(session.events().is_none());
    }

    #[test]
    fn close_code_classes() {
        for code in [4004, 4010, 4011, 4012, 4013, 4014] {
            assert!(is_fatal_close(code), "{code}");
        }
        for code in [1000, 1006, 4000, 4007, 4009] {
            assert!(!is_fatal_close(code), "{code}");
        }
        assert!(clears_session(4007));
        assert!(clears_session(4009));
        assert!(!clears_session(4000));
    }

    #[test]
    fn options_map_zero_capacity_to_unbounded() {
        let mut settings = TetherSettings::default();
        settings.cache.messages = 0;
        settings.cache.guilds = 5;
        let options = SessionOptions::from_settings(&settings);
        assert_eq!(options.cache_capacity.messages, None);
        assert_eq!(options.cache_capacity.guilds, Some(5));
    }
}
