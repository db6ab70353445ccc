//! Participant session: socket ownership, authentication and the read loop
//!
//! One session per accepted connection. The spawned connection task owns the
//! read half exclusively; the dispatcher and the reaper only ever touch a
//! shared handle for the duration of a single send, state inspection or
//! close.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use chrono::Local;
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::protocol::{Message, SessionState, TIMESTAMP_FORMAT};
use crate::server::chat_server::ServerState;

/// Welcome banner shown once per connection, ending in the name prompt.
const WELCOME_BANNER: &str = r#"Welcome to Linux TCP-Chat!
         _nnnn_
        dGGGGMMb
       @p~qp~~qMb
       M|@||@) M|
       @,----.JM|
      JS^\__/  qKL
     dZP        qKRb
    dZP          qKKb
   fZP            SMMb
   HZM            MMMM
   FqM            MMMM
 __| ".        |\dS"qML
 |    '.       | '  \Zq
_)      \.___.,|     .'
\____   )MMMMMP|   .'
     '-'       '--'
[ENTER YOUR NAME]:"#;

/// Characters rejected in `/name` arguments before regular name validation
const FORBIDDEN_NAME_CHARS: &str = "/\\:*?\"<>|";

/// Mutable session metadata, guarded by one mutex.
///
/// Never held across an await point.
struct SessionInner {
    name: String,
    name_history: Vec<String>,
    state: SessionState,
    last_activity: Instant,
    closed: bool,
}

/// A single participant connection
pub struct Session {
    /// Write half of the socket, shared with the dispatcher fan-out
    writer: tokio::sync::Mutex<OwnedWriteHalf>,
    /// Remote peer address, for logging
    peer_addr: SocketAddr,
    inner: Mutex<SessionInner>,
    /// Fires exactly once, when the session is closed
    done: CancellationToken,
}

impl Session {
    /// Create a session around the write half of an accepted connection
    pub fn new(writer: OwnedWriteHalf, peer_addr: SocketAddr) -> Self {
        Self {
            writer: tokio::sync::Mutex::new(writer),
            peer_addr,
            inner: Mutex::new(SessionInner {
                name: String::new(),
                name_history: Vec::new(),
                state: SessionState::Connecting,
                last_activity: Instant::now(),
                closed: false,
            }),
            done: CancellationToken::new(),
        }
    }

    /// Current display name; empty until authentication succeeds
    pub fn name(&self) -> String {
        self.inner.lock().name.clone()
    }

    /// Current lifecycle state
    pub fn state(&self) -> SessionState {
        self.inner.lock().state
    }

    /// Advance the lifecycle state. Backward transitions are ignored.
    pub fn set_state(&self, state: SessionState) {
        let mut inner = self.inner.lock();
        if state > inner.state {
            inner.state = state;
        }
    }

    /// Remote address of the peer
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Instant of the most recent admitted inbound line
    pub fn last_activity(&self) -> Instant {
        self.inner.lock().last_activity
    }

    /// Reset the inactivity clock
    pub fn touch_activity(&self) {
        self.inner.lock().last_activity = Instant::now();
    }

    /// Set the display name, pushing the previous one onto the history.
    ///
    /// The first assignment (at authentication) does not count as a change.
    pub fn record_name(&self, name: &str) {
        let mut inner = self.inner.lock();
        if !inner.name.is_empty() {
            let old = std::mem::replace(&mut inner.name, name.to_string());
            inner.name_history.push(old);
        } else {
            inner.name = name.to_string();
        }
    }

    /// Number of name changes performed so far
    pub fn name_change_count(&self) -> usize {
        self.inner.lock().name_history.len()
    }

    /// Prior names, oldest first
    pub fn name_history(&self) -> Vec<String> {
        self.inner.lock().name_history.clone()
    }

    /// True once `close` has been called
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Close the session. Idempotent; the `done` signal fires exactly once.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
        }
        self.done.cancel();
    }

    /// Signal observed by the read loop and external waiters
    pub fn done(&self) -> &CancellationToken {
        &self.done
    }

    /// Shut down the write side of the socket, best effort
    pub(crate) async fn shutdown_conn(&self) {
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }

    /// Deliver a formatted message line. Requires the Active state.
    pub async fn send(&self, msg: &Message) -> Result<()> {
        if self.state() != SessionState::Active {
            return Err(ChatError::connection("client not in active state"));
        }
        self.write_raw(&format!("{}\n", msg)).await
    }

    /// Write text to the socket without a state check.
    ///
    /// Used for the banner, prompts, history replay and feedback emitted
    /// before the session turns Active.
    pub(crate) async fn write_raw(&self, text: &str) -> Result<()> {
        let mut writer = self.writer.lock().await;
        writer.write_all(text.as_bytes()).await?;
        Ok(())
    }

    /// Report an error to this participant only, as a SYSTEM-formatted line.
    ///
    /// Never enters the transcript.
    pub(crate) async fn send_system_line(&self, text: &str) -> Result<()> {
        self.write_raw(&format!("{}\n", Message::system(text))).await
    }

    /// Emit the interactive prompt, `[timestamp][name]:` with no newline
    pub(crate) async fn send_prompt(&self) -> Result<()> {
        let prompt = format!(
            "[{}][{}]:",
            Local::now().format(TIMESTAMP_FORMAT),
            self.name()
        );
        self.write_raw(&prompt).await
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name())
            .field("state", &self.state())
            .field("peer_addr", &self.peer_addr)
            .finish()
    }
}

/// Check a display name against the naming rules.
///
/// Applied both at authentication and at `/name`.
pub fn validate_username(name: &str, max_length: usize) -> Result<()> {
    let trimmed = name.trim();

    if trimmed.is_empty() {
        return Err(ChatError::validation("username cannot be empty"));
    }

    if trimmed != name {
        return Err(ChatError::validation(
            "username cannot have leading or trailing spaces",
        ));
    }

    if name.len() > max_length {
        return Err(ChatError::validation(format!(
            "username too long (max {} characters)",
            max_length
        )));
    }

    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ' ')
    {
        return Err(ChatError::validation(
            "username can only contain letters, numbers, spaces, and underscores",
        ));
    }

    Ok(())
}

/// Extract the argument of a `/name` directive.
///
/// Exactly one whitespace-separated argument, free of filesystem-reserved
/// characters. Those characters get their own error even though regular
/// validation would reject them too; the distinction is user-visible.
fn name_directive(line: &str) -> Result<&str> {
    let mut parts = line.split_whitespace();
    let _command = parts.next();
    let name = parts
        .next()
        .ok_or_else(|| ChatError::validation("error changing name: invalid name format"))?;
    if parts.next().is_some() {
        return Err(ChatError::validation(
            "error changing name: invalid name format",
        ));
    }
    if name.chars().any(|c| FORBIDDEN_NAME_CHARS.contains(c)) {
        return Err(ChatError::validation(
            "error changing name: invalid characters in name",
        ));
    }
    Ok(name)
}

/// Run one accepted connection to completion: authenticate, register,
/// replay history, announce, then loop on inbound lines.
pub(crate) async fn run_connection(state: Arc<ServerState>, stream: TcpStream) {
    let peer_addr = match stream.peer_addr() {
        Ok(addr) => addr,
        Err(e) => {
            warn!("could not resolve peer address: {}", e);
            return;
        }
    };
    let (read_half, write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let session = Arc::new(Session::new(write_half, peer_addr));

    debug!("new connection from {}", peer_addr);

    let auth = tokio::select! {
        _ = state.stopping.cancelled() => {
            session.close();
            return;
        }
        result = authenticate(&session, &mut reader, &state.config) => result,
    };

    let name = match auth {
        Ok(name) => name,
        Err(e) => {
            debug!("authentication failed for {}: {}", peer_addr, e);
            let _ = session.send_system_line(e.message()).await;
            session.close();
            session.shutdown_conn().await;
            return;
        }
    };

    session.record_name(&name);
    session.set_state(SessionState::Authenticated);

    // Snapshot strictly before this session becomes visible to the fan-out.
    let history = state.transcript.snapshot().await;

    if let Err(e) = state.register_session(&session, &name).await {
        debug!("registration failed for {}: {}", peer_addr, e);
        let _ = session.send_system_line(e.message()).await;
        session.close();
        session.shutdown_conn().await;
        return;
    }
    info!("new client registered: {} ({})", name, peer_addr);

    for msg in &history {
        if session.write_raw(&format!("{}\n", msg)).await.is_err() {
            state.disconnect_session(&session, "left our chat...").await;
            return;
        }
    }

    let joined = Message::system(format!("{} has joined our chat...", name));
    if state.post_message(joined).await.is_err() {
        state.disconnect_session(&session, "left our chat...").await;
        return;
    }

    session.set_state(SessionState::Active);
    session.touch_activity();

    read_loop(&state, &session, &mut reader).await;
}

/// Emit the banner and read, trim and validate the offered display name.
async fn authenticate(
    session: &Session,
    reader: &mut BufReader<OwnedReadHalf>,
    config: &Config,
) -> Result<String> {
    session
        .write_raw(WELCOME_BANNER)
        .await
        .map_err(|_| ChatError::connection("failed to send welcome banner"))?;

    let mut line = String::new();
    let read = timeout(config.client_timeout, reader.read_line(&mut line))
        .await
        .map_err(|_| ChatError::connection("timed out waiting for username"))?
        .map_err(|_| ChatError::validation("failed to read username"))?;
    if read == 0 {
        return Err(ChatError::connection("connection closed before username"));
    }

    let raw = line.strip_suffix('\n').unwrap_or(&line);
    let raw = raw.strip_suffix('\r').unwrap_or(raw);
    validate_username(raw, config.max_name_length)?;

    Ok(raw.to_string())
}

/// The active read loop: prompt, read one line, apply the directive, rate
/// and size rules, then hand the message to the broadcast bus.
async fn read_loop(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    reader: &mut BufReader<OwnedReadHalf>,
) {
    let config = &state.config;
    // None until the first admitted message, so the first is never throttled
    let mut last_message_sent: Option<Instant> = None;
    let mut line = String::new();
    let mut reason = "left our chat...";

    loop {
        if state.stopping.is_cancelled() {
            break;
        }

        if session.send_prompt().await.is_err() {
            break;
        }

        line.clear();
        let read = tokio::select! {
            _ = state.stopping.cancelled() => break,
            _ = session.done().cancelled() => break,
            result = timeout(config.client_timeout, reader.read_line(&mut line)) => result,
        };

        match read {
            Ok(Ok(0)) => break,
            Ok(Ok(_)) => {}
            Ok(Err(_)) => break,
            Err(_) => {
                // inactivity deadline expired
                reason = "timeout";
                break;
            }
        }

        let message = line.trim();
        if message.is_empty() {
            continue;
        }

        if message == "/quit" {
            break;
        }

        if message.starts_with("/name") {
            if handle_name_change(state, session, message).await.is_err() {
                break;
            }
            continue;
        }

        let now = Instant::now();
        if let Some(prev) = last_message_sent {
            let elapsed = now.duration_since(prev);
            if elapsed < config.message_rate_limit {
                let remaining = config.message_rate_limit - elapsed;
                let feedback = format!(
                    "please wait before sending another message ({:.1} seconds remaining)",
                    remaining.as_secs_f64()
                );
                if session.send_system_line(&feedback).await.is_err() {
                    break;
                }
                continue;
            }
        }

        if message.len() > config.max_message_size {
            let feedback = format!(
                "message too long (maximum {} characters allowed)",
                config.max_message_size
            );
            if session.send_system_line(&feedback).await.is_err() {
                break;
            }
            continue;
        }

        last_message_sent = Some(now);
        session.touch_activity();

        let msg = Message::new(session.name(), message);
        if state.post_message(msg).await.is_err() {
            break;
        }
    }

    state.disconnect_session(session, reason).await;
}

/// Apply the `/name <newname>` sub-protocol.
///
/// Rule violations are reported to the sender only; the returned error
/// signals a dead socket, not a rejected rename.
async fn handle_name_change(
    state: &Arc<ServerState>,
    session: &Arc<Session>,
    line: &str,
) -> Result<()> {
    let new_name = match name_directive(line) {
        Ok(name) => name,
        Err(e) => return session.send_system_line(e.message()).await,
    };

    if session.name_change_count() >= state.config.max_name_changes {
        return session
            .send_system_line("maximum name changes exceeded")
            .await;
    }

    if let Err(e) = validate_username(new_name, state.config.max_name_length) {
        return session
            .send_system_line(&format!("invalid name: {}", e.message()))
            .await;
    }

    // Swap both registry entries in one critical section, clients lock first.
    let old_name = {
        let mut clients = state.clients.write().await;
        let mut names = state.active_names.write().await;

        if names.contains(new_name) {
            drop(names);
            drop(clients);
            return session.send_system_line("username already taken").await;
        }

        let old_name = session.name();
        clients.remove(&old_name);
        names.remove(&old_name);
        clients.insert(new_name.to_string(), Arc::clone(session));
        names.insert(new_name.to_string());
        session.record_name(new_name);
        old_name
    };

    info!("client {} renamed to {}", old_name, new_name);
    state
        .post_system_lossy(&format!(
            "{} changed their name to {}",
            old_name, new_name
        ))
        .await;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Helper: a connected loopback socket pair.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (accepted, connected) = tokio::join!(listener.accept(), TcpStream::connect(addr));
        (accepted.unwrap().0, connected.unwrap())
    }

    /// Helper: a session wrapped around the server side of a socket pair.
    async fn test_session() -> (Arc<Session>, TcpStream) {
        let (server_side, client_side) = socket_pair().await;
        let peer = server_side.peer_addr().unwrap();
        let (_read, write) = server_side.into_split();
        (Arc::new(Session::new(write, peer)), client_side)
    }

    #[tokio::test]
    async fn test_session_starts_connecting_and_unnamed() {
        let (session, _client) = test_session().await;
        assert_eq!(session.state(), SessionState::Connecting);
        assert_eq!(session.name(), "");
        assert_eq!(session.name_change_count(), 0);
    }

    #[tokio::test]
    async fn test_state_transitions_are_monotonic() {
        let (session, _client) = test_session().await;
        session.set_state(SessionState::Active);
        assert_eq!(session.state(), SessionState::Active);

        // backward transition is ignored
        session.set_state(SessionState::Connecting);
        assert_eq!(session.state(), SessionState::Active);

        session.set_state(SessionState::Disconnecting);
        assert_eq!(session.state(), SessionState::Disconnecting);
    }

    #[tokio::test]
    async fn test_first_name_does_not_count_as_change() {
        let (session, _client) = test_session().await;
        session.record_name("alice");
        assert_eq!(session.name(), "alice");
        assert_eq!(session.name_change_count(), 0);

        session.record_name("alicia");
        assert_eq!(session.name(), "alicia");
        assert_eq!(session.name_change_count(), 1);
        assert_eq!(session.name_history(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (session, _client) = test_session().await;
        assert!(!session.is_closed());

        session.close();
        assert!(session.is_closed());
        assert!(session.done().is_cancelled());

        // second close is a no-op, not a panic or an error
        session.close();
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_send_requires_active_state() {
        let (session, _client) = test_session().await;
        let msg = Message::new("bob", "hello");
        let err = session.send(&msg).await.unwrap_err();
        assert!(matches!(err, ChatError::Connection(_)));

        session.set_state(SessionState::Active);
        assert!(session.send(&msg).await.is_ok());
    }

    #[tokio::test]
    async fn test_send_writes_delivery_line() {
        use tokio::io::AsyncReadExt;

        let (session, mut client) = test_session().await;
        session.record_name("alice");
        session.set_state(SessionState::Active);

        let msg = Message::new("bob", "hi alice");
        session.send(&msg).await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(received.ends_with("][bob]:hi alice\n"), "got {:?}", received);
    }

    #[tokio::test]
    async fn test_prompt_has_timestamp_name_and_no_newline() {
        use tokio::io::AsyncReadExt;

        let (session, mut client) = test_session().await;
        session.record_name("alice");
        session.send_prompt().await.unwrap();

        let mut buf = vec![0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        let received = String::from_utf8_lossy(&buf[..n]).to_string();
        assert!(received.ends_with("][alice]:"), "got {:?}", received);
        assert!(!received.ends_with('\n'));
        // leading [YYYY-MM-DD HH:MM:SS]
        assert_eq!(received.find(']').unwrap(), 20);
    }

    #[test]
    fn test_validate_username_accepts_reasonable_names() {
        assert!(validate_username("alice", 32).is_ok());
        assert!(validate_username("alice_42", 32).is_ok());
        assert!(validate_username("Alice Smith", 32).is_ok());
        assert!(validate_username("A", 32).is_ok());
    }

    #[test]
    fn test_validate_username_boundary_length() {
        let exact = "a".repeat(32);
        let over = "a".repeat(33);
        assert!(validate_username(&exact, 32).is_ok());
        assert!(validate_username(&over, 32).is_err());
    }

    #[test]
    fn test_validate_username_rejects_empty_and_whitespace() {
        assert!(validate_username("", 32).is_err());
        assert!(validate_username("   ", 32).is_err());
        assert!(validate_username(" alice", 32).is_err());
        assert!(validate_username("alice ", 32).is_err());
    }

    #[test]
    fn test_validate_username_rejects_forbidden_characters() {
        assert!(validate_username("al\tice", 32).is_err());
        assert!(validate_username("alice!", 32).is_err());
        assert!(validate_username("ali/ce", 32).is_err());
        assert!(validate_username("café", 32).is_err());
    }

    #[test]
    fn test_name_directive_parses_single_argument() {
        assert_eq!(name_directive("/name bob").unwrap(), "bob");
        assert_eq!(name_directive("/name   bob").unwrap(), "bob");
    }

    #[test]
    fn test_name_directive_rejects_wrong_arity() {
        assert!(name_directive("/name").is_err());
        assert!(name_directive("/name bob extra").is_err());
    }

    #[test]
    fn test_name_directive_rejects_reserved_characters() {
        for bad in ["/name a/b", "/name a\\b", "/name a:b", "/name a*b",
                    "/name a?b", "/name a\"b", "/name a<b", "/name a>b",
                    "/name a|b"] {
            let err = name_directive(bad).unwrap_err();
            assert!(
                err.message().contains("invalid characters"),
                "{:?} should hit the character check",
                bad
            );
        }
    }
}
