//! Idle-session eviction
//!
//! A sub-second sweep over the session registry. Idle sessions are removed
//! from both registries inside one critical section, which keeps the sweep
//! from racing the session's own termination path; the close and the
//! timeout announcement happen after the locks are released.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use crate::protocol::SessionState;
use crate::server::chat_server::ServerState;
use crate::server::session::Session;

/// Sweep frequency
const SWEEP_INTERVAL: Duration = Duration::from_millis(500);

/// Periodically evict sessions idle longer than the configured timeout.
pub(crate) async fn reap_loop(state: Arc<ServerState>) {
    let mut ticker = interval(SWEEP_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = state.stopping.cancelled() => return,
            _ = ticker.tick() => {}
        }

        let now = Instant::now();
        let evicted: Vec<Arc<Session>> = {
            let mut clients = state.clients.write().await;
            let mut names = state.active_names.write().await;

            let idle: Vec<String> = clients
                .iter()
                .filter(|(_, session)| {
                    session.state() == SessionState::Active
                        && now.duration_since(session.last_activity())
                            > state.config.client_timeout
                })
                .map(|(name, _)| name.clone())
                .collect();

            idle.into_iter()
                .filter_map(|name| {
                    names.remove(&name);
                    clients.remove(&name)
                })
                .collect()
        };

        for session in evicted {
            let name = session.name();
            session.set_state(SessionState::Disconnecting);
            session.close();
            session.shutdown_conn().await;
            info!("client {} disconnected: timeout", name);
            state
                .post_system_lossy(&format!("{} has timeout", name))
                .await;
        }
    }
}
