//! Log sinks for dispatch and lifecycle events.

use async_trait::async_trait;
use tether_gateway::{DispatchEvent, EventHandler, HandlerError, LifecycleEvent};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Logs every dispatch event.
pub struct LogEvents;

#[async_trait]
impl EventHandler for LogEvents {
    fn name(&self) -> &str {
        "log"
    }

    async fn handle(&self, event: &DispatchEvent) -> Result<(), HandlerError> {
        info!(event = %event.name, seq = event.seq, "dispatch");
        debug!(event = %event.name, data = %event.data, "dispatch payload");
        Ok(())
    }
}

/// Log lifecycle events until the session goes away.
pub async fn log_lifecycle(mut events: broadcast::Receiver<LifecycleEvent>) {
    loop {
        match events.recv().await {
            Ok(LifecycleEvent::Fault(error)) => warn!(%error, "session fault"),
            Ok(LifecycleEvent::HeartbeatAck { latency_ms }) => debug!(latency_ms, "heartbeat ack"),
            Ok(event) => info!(?event, "session lifecycle"),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "lifecycle log fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}
