//! TCP chat server: lifecycle, accept loop and shared state
//!
//! `ChatServer` owns the registries, the transcript and the broadcast bus.
//! `start` binds the listener and launches the acceptor, the dispatcher and
//! the reaper; `stop` signals them, drains every active session and clears
//! the registries.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, RwLock};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::protocol::{Message, SessionState};
use crate::server::dispatch::dispatch_loop;
use crate::server::reaper::reap_loop;
use crate::server::session::{run_connection, Session};
use crate::server::transcript::Transcript;

/// Capacity of the broadcast bus
const BROADCAST_BUFFER_SIZE: usize = 100;

/// Deadline for admitting a message to the bus
const ENQUEUE_DEADLINE: Duration = Duration::from_secs(1);

/// Deadline for the per-session farewell write during shutdown
const FAREWELL_DEADLINE: Duration = Duration::from_secs(1);

/// Bounded wait for spawned tasks to drain during shutdown
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// State shared between the acceptor, dispatcher, reaper and every session.
///
/// Any operation that mutates both registries takes the `clients` lock
/// before the `active_names` lock.
pub(crate) struct ServerState {
    /// Server configuration
    pub(crate) config: Config,
    /// Session registry: active display name to session
    pub(crate) clients: RwLock<HashMap<String, Arc<Session>>>,
    /// Name registry: display names currently in use
    pub(crate) active_names: RwLock<HashSet<String>>,
    /// Ordered history of every admitted message
    pub(crate) transcript: Transcript,
    /// Producer side of the broadcast bus
    pub(crate) broadcast_tx: mpsc::Sender<Message>,
    /// One-shot stop signal observed by every loop
    pub(crate) stopping: CancellationToken,
}

impl ServerState {
    /// Reserve `name` and insert the session, as one critical section.
    pub(crate) async fn register_session(
        &self,
        session: &Arc<Session>,
        name: &str,
    ) -> Result<()> {
        let mut clients = self.clients.write().await;
        let mut names = self.active_names.write().await;

        if names.contains(name) {
            return Err(ChatError::capacity("username already taken"));
        }
        clients.insert(name.to_string(), Arc::clone(session));
        names.insert(name.to_string());
        Ok(())
    }

    /// Tear a session down exactly once.
    ///
    /// Whichever caller actually removes the session from the registries
    /// posts the farewell; late callers find it already gone and stay
    /// silent, so a session never produces two departure notices.
    pub(crate) async fn disconnect_session(&self, session: &Arc<Session>, reason: &str) {
        session.set_state(SessionState::Disconnecting);
        let name = session.name();

        let removed = {
            let mut clients = self.clients.write().await;
            let mut names = self.active_names.write().await;
            match clients.get(&name) {
                Some(registered) if Arc::ptr_eq(registered, session) => {
                    clients.remove(&name);
                    names.remove(&name);
                    true
                }
                _ => false,
            }
        };

        session.close();
        session.shutdown_conn().await;

        if removed {
            info!("client {} disconnected: {}", name, reason);
            self.post_system_lossy(&format!("{} has {}", name, reason))
                .await;
        }
    }

    /// Admit a message to the bus, blocking up to the enqueue deadline.
    pub(crate) async fn post_message(&self, msg: Message) -> Result<()> {
        match timeout(ENQUEUE_DEADLINE, self.broadcast_tx.send(msg)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(ChatError::connection("broadcast bus closed")),
            Err(_) => Err(ChatError::connection("broadcast bus full")),
        }
    }

    /// Post a system announcement, dropping it if the bus stays full.
    ///
    /// Losing a farewell notice is preferable to stalling an eviction or
    /// shutdown path.
    pub(crate) async fn post_system_lossy(&self, text: &str) {
        let msg = Message::system(text);
        match timeout(ENQUEUE_DEADLINE, self.broadcast_tx.send(msg)).await {
            Ok(Ok(())) => {}
            _ => warn!("failed to broadcast system message: {}", text),
        }
    }
}

/// Multi-user line-oriented TCP chat relay
pub struct ChatServer {
    state: Arc<ServerState>,
    running: Mutex<bool>,
    local_addr: Mutex<Option<SocketAddr>>,
    broadcast_rx: Mutex<Option<mpsc::Receiver<Message>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl ChatServer {
    /// Create a new server with the given configuration
    pub fn new(config: Config) -> Self {
        let (broadcast_tx, broadcast_rx) = mpsc::channel(BROADCAST_BUFFER_SIZE);
        let state = Arc::new(ServerState {
            config,
            clients: RwLock::new(HashMap::new()),
            active_names: RwLock::new(HashSet::new()),
            transcript: Transcript::new(),
            broadcast_tx,
            stopping: CancellationToken::new(),
        });
        Self {
            state,
            running: Mutex::new(false),
            local_addr: Mutex::new(None),
            broadcast_rx: Mutex::new(Some(broadcast_rx)),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Bind the listener and launch the acceptor, dispatcher and reaper.
    ///
    /// Returns once the listener is live; the server then runs until `stop`.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.lock();
            if *running {
                return Err(ChatError::lifecycle("server is already running"));
            }
            if self.state.stopping.is_cancelled() {
                return Err(ChatError::lifecycle("server has been stopped"));
            }
            *running = true;
        }

        let listener = match TcpListener::bind(&self.state.config.listen_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                *self.running.lock() = false;
                return Err(ChatError::connection(format!(
                    "failed to listen on {}: {}",
                    self.state.config.listen_addr, e
                )));
            }
        };
        let addr = listener.local_addr()?;
        *self.local_addr.lock() = Some(addr);
        info!("server listening on {}", addr);

        let rx = self
            .broadcast_rx
            .lock()
            .take()
            .ok_or_else(|| ChatError::lifecycle("server has been stopped"))?;

        let mut tasks = self.tasks.lock();
        tasks.push(tokio::spawn(accept_loop(Arc::clone(&self.state), listener)));
        tasks.push(tokio::spawn(dispatch_loop(Arc::clone(&self.state), rx)));
        tasks.push(tokio::spawn(reap_loop(Arc::clone(&self.state))));

        Ok(())
    }

    /// Stop the server: signal every loop, send each session a farewell,
    /// close its connection, drain the spawned tasks bounded by a grace
    /// period and clear the registries. Idempotent.
    pub async fn stop(&self) {
        {
            let mut running = self.running.lock();
            if !*running {
                return;
            }
            *running = false;
        }
        self.state.stopping.cancel();

        let sessions: Vec<Arc<Session>> =
            self.state.clients.read().await.values().cloned().collect();
        let mut farewells = JoinSet::new();
        for session in sessions {
            farewells.spawn(async move {
                session.set_state(SessionState::Disconnecting);
                let _ = timeout(
                    FAREWELL_DEADLINE,
                    session.send_system_line("Server shutting down..."),
                )
                .await;
                session.close();
                session.shutdown_conn().await;
            });
        }
        while farewells.join_next().await.is_some() {}

        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        let drained = async {
            for task in tasks {
                let _ = task.await;
            }
        };
        if timeout(SHUTDOWN_GRACE, drained).await.is_err() {
            warn!("shutdown grace period exceeded; abandoning remaining tasks");
        }

        {
            let mut clients = self.state.clients.write().await;
            let mut names = self.state.active_names.write().await;
            clients.clear();
            names.clear();
        }
        info!("server stopped");
    }

    /// Address the listener is bound to, once `start` has succeeded
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// Number of currently registered participants
    pub async fn client_count(&self) -> usize {
        self.state.clients.read().await.len()
    }

    /// Get server statistics
    pub async fn stats(&self) -> ServerStats {
        ServerStats {
            connected_clients: self.client_count().await,
            transcript_len: self.state.transcript.len().await,
            max_clients: self.state.config.max_clients,
            local_addr: self.local_addr(),
        }
    }
}

/// Server statistics
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub connected_clients: usize,
    pub transcript_len: usize,
    pub max_clients: usize,
    pub local_addr: Option<SocketAddr>,
}

/// Accept connections until the stop signal fires.
///
/// Capacity is enforced here: a connection over the limit is dropped before
/// it sees any prompt. Transient accept errors are logged and survived.
async fn accept_loop(state: Arc<ServerState>, listener: TcpListener) {
    let mut sessions = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            _ = state.stopping.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer_addr) = match accepted {
            Ok(pair) => pair,
            Err(e) => {
                if state.stopping.is_cancelled() {
                    break;
                }
                warn!("accept error: {}", e);
                continue;
            }
        };

        {
            let clients = state.clients.read().await;
            if state.config.max_clients > 0 && clients.len() >= state.config.max_clients {
                debug!("server full, rejecting connection from {}", peer_addr);
                drop(clients);
                drop(stream);
                continue;
            }
        }

        sessions.spawn(run_connection(Arc::clone(&state), stream));

        // collect already-finished session tasks so the set stays small
        while sessions.try_join_next().is_some() {}
    }

    info!("stopped accepting new connections");
    drop(listener);
    while sessions.join_next().await.is_some() {}
}
