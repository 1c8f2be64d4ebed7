//! Keepalive pings for WebSocket clients.
//!
//! A client may wait minutes for a load or a long generation without
//! receiving anything. The heartbeat keeps those sockets active and drops
//! registry entries whose socket has gone away in the meantime.

use std::sync::Arc;
use std::time::Duration;

use crate::ws::manager::ConnectionRegistry;

/// Interval between heartbeat pings (in seconds).
const HEARTBEAT_INTERVAL_SECS: u64 = 30;

/// Spawn the heartbeat task. It runs until aborted at shutdown.
pub fn start_heartbeat(registry: Arc<ConnectionRegistry>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));

        loop {
            interval.tick().await;
            if registry.connection_count().await == 0 {
                continue;
            }
            let pinged = registry.ping_all().await;
            tracing::trace!(pinged, "WebSocket heartbeat ping");
        }
    })
}
