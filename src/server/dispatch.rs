//! Broadcast dispatcher: the single consumer of the message bus
//!
//! Appends each dequeued message to the transcript and fans it out to every
//! active session except, for participant messages, the sender. Per-recipient
//! sends run concurrently so one slow client cannot hold up the rest, but
//! the dispatcher waits for the whole fan-out before taking the next message
//! to keep the global delivery order.

use std::sync::Arc;
use std::time::Duration;

use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{error, warn};

use crate::protocol::{Message, SessionState};
use crate::server::chat_server::ServerState;
use crate::server::session::Session;

/// Deadline for delivering one message to one recipient
const SEND_DEADLINE: Duration = Duration::from_secs(1);

/// Consume the broadcast bus until the stop signal fires.
pub(crate) async fn dispatch_loop(state: Arc<ServerState>, mut rx: mpsc::Receiver<Message>) {
    loop {
        let msg = tokio::select! {
            _ = state.stopping.cancelled() => return,
            next = rx.recv() => match next {
                Some(msg) => msg,
                None => return,
            },
        };

        // Snapshot the recipients under a brief read lock. System messages
        // go to every active session; participant messages skip the sender.
        let recipients: Vec<Arc<Session>> = {
            let clients = state.clients.read().await;
            clients
                .values()
                .filter(|s| s.state() == SessionState::Active)
                .filter(|s| msg.is_system() || s.name() != msg.from)
                .cloned()
                .collect()
        };

        state.transcript.append(msg.clone()).await;
        spawn_log_sink(&state, &msg);

        let mut sends = JoinSet::new();
        for session in recipients {
            let msg = msg.clone();
            sends.spawn(async move {
                match timeout(SEND_DEADLINE, session.send(&msg)).await {
                    Ok(Ok(())) => None,
                    Ok(Err(e)) => {
                        warn!("failed to send message to {}: {}", session.name(), e);
                        Some(session)
                    }
                    Err(_) => {
                        warn!("send timeout for client {}", session.name());
                        Some(session)
                    }
                }
            });
        }

        let mut failed: Vec<Arc<Session>> = Vec::new();
        loop {
            tokio::select! {
                _ = state.stopping.cancelled() => return,
                joined = sends.join_next() => match joined {
                    Some(Ok(Some(session))) => failed.push(session),
                    Some(_) => {}
                    None => break,
                },
            }
        }

        for session in failed {
            state.disconnect_session(&session, "connection failure").await;
        }
    }
}

/// Append the message to the transcript log file, if one is configured.
///
/// Runs on its own task; sink failures are logged and never stall dispatch.
fn spawn_log_sink(state: &Arc<ServerState>, msg: &Message) {
    let Some(path) = state.config.log_file.clone() else {
        return;
    };
    let line = format!("{}\n", msg);
    tokio::spawn(async move {
        let written = async {
            let mut file = OpenOptions::new()
                .append(true)
                .create(true)
                .open(&path)
                .await?;
            file.write_all(line.as_bytes()).await
        }
        .await;
        if let Err(e) = written {
            error!("error writing to log file {}: {}", path.display(), e);
        }
    });
}
