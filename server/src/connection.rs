//! Per-connection session state.
//!
//! A [`Connection`] is shared between the network task that owns the socket
//! and every lobby operation that needs to address the peer. Mutable session
//! fields live behind a per-connection lock that is only ever held for short
//! read-modify-write sections, never across an `.await`.

use crate::model::{Account, ConnectionId, Persona, PersonaSession, TitleBinding};
use parking_lot::Mutex;
use shared::{Frame, Record};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Delivery failure. Callers log it and move on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SendError {
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

/// Handle of the connection's one matchmaking task.
#[derive(Debug)]
pub struct SearchHandle {
    /// Monotonic per connection, so a finished task cannot clear its successor.
    pub id: u64,
    pub token: CancellationToken,
}

/// Mutable protocol state of one connection.
#[derive(Debug, Default)]
pub struct SessionData {
    /// Set by `auth`.
    pub account: Option<Account>,
    /// Set by `auth`; fixes the `VERS` of the connection.
    pub title: Option<TitleBinding>,
    pub persona: Option<Persona>,
    /// Active persona session, `None` until `pers` succeeds.
    pub persona_session: Option<PersonaSession>,
    /// Login key handed out by `auth`.
    pub lkey: Option<String>,
    /// Ready flag set through `gset`; "1" while hosting a game.
    pub userflags: String,
    /// Persona was selected with the `@` marker.
    pub dedicated_host: bool,
    /// Advertised itself as an available game spawn service.
    pub spawn_service: bool,
    /// Spawn service currently hosting a game.
    pub hosting: bool,
    /// Outstanding `gsea` task.
    pub search: Option<SearchHandle>,
}

impl SessionData {
    /// `VERS` of the bound title.
    pub fn vers(&self) -> Option<&str> {
        self.title.as_ref().map(|t| t.vers.as_str())
    }
}

/// One client socket as seen by the lobby. Frames are queued on an
/// unbounded channel drained by the connection's writer task.
pub struct Connection {
    id: ConnectionId,
    addr: SocketAddr,
    sender: mpsc::UnboundedSender<Frame>,
    closer: CancellationToken,
    next_search_id: AtomicU64,
    state: Mutex<SessionData>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .finish()
    }
}

impl Connection {
    pub fn new(id: ConnectionId, addr: SocketAddr, sender: mpsc::UnboundedSender<Frame>) -> Self {
        Self {
            id,
            addr,
            sender,
            closer: CancellationToken::new(),
            next_search_id: AtomicU64::new(1),
            state: Mutex::new(SessionData {
                userflags: "0".to_string(),
                ..SessionData::default()
            }),
        }
    }

    /// Registry id, also the input of the session key.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Peer address without the port, as reported in `ADDR`.
    pub fn ip(&self) -> String {
        self.addr.ip().to_string()
    }

    /// Queues a newline-terminated record for the peer.
    pub fn send(&self, record: Record) -> Result<(), SendError> {
        self.send_frame(Frame::new(record))
    }

    /// Queues a tab-terminated record (chat delivery).
    pub fn send_tabbed(&self, record: Record) -> Result<(), SendError> {
        self.send_frame(Frame::tabbed(record))
    }

    fn send_frame(&self, frame: Frame) -> Result<(), SendError> {
        if self.closer.is_cancelled() {
            return Err(SendError::Closed(self.id));
        }
        self.sender.send(frame).map_err(|_| SendError::Closed(self.id))
    }

    /// Liveness check used by registry sweeps.
    pub fn is_open(&self) -> bool {
        !self.closer.is_cancelled() && !self.sender.is_closed()
    }

    /// Asks the network task to shut the connection down.
    pub fn close(&self) {
        self.closer.cancel();
    }

    /// Resolves once [`Connection::close`] was called.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closer.cancelled()
    }

    /// Runs `f` under the state lock. `f` must not block or re-enter the lock.
    pub fn with_state<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let mut state = self.state.lock();
        f(&mut state)
    }

    pub fn account(&self) -> Option<Account> {
        self.state.lock().account.clone()
    }

    pub fn title(&self) -> Option<TitleBinding> {
        self.state.lock().title.clone()
    }

    pub fn vers(&self) -> Option<String> {
        self.state.lock().vers().map(str::to_string)
    }

    pub fn persona(&self) -> Option<Persona> {
        self.state.lock().persona.clone()
    }

    pub fn persona_session(&self) -> Option<PersonaSession> {
        self.state.lock().persona_session.clone()
    }

    /// Selected its persona with the `@` marker.
    pub fn is_dedicated_host(&self) -> bool {
        self.state.lock().dedicated_host
    }

    pub fn userflags(&self) -> String {
        self.state.lock().userflags.clone()
    }

    /// Overrides the reported `USERFLAGS`.
    pub fn set_userflags(&self, userflags: impl Into<String>) {
        self.state.lock().userflags = userflags.into();
    }

    /// Installs a new matchmaking task handle, cancelling the previous one
    /// under the same lock. Returns the id of the new task.
    pub fn install_search(&self, token: CancellationToken) -> u64 {
        let id = self.next_search_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.lock();
        if let Some(previous) = state.search.replace(SearchHandle { id, token }) {
            previous.token.cancel();
        }
        id
    }

    /// Cancels the outstanding matchmaking task. Returns false when none ran.
    pub fn cancel_search(&self) -> bool {
        match self.state.lock().search.take() {
            Some(handle) => {
                handle.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Drops the handle of a finished task unless it was already replaced.
    pub fn finish_search(&self, id: u64) {
        let mut state = self.state.lock();
        if state.search.as_ref().is_some_and(|h| h.id == id) {
            state.search = None;
        }
    }

    /// Id of the outstanding matchmaking task.
    pub fn search_task_id(&self) -> Option<u64> {
        self.state.lock().search.as_ref().map(|h| h.id)
    }
}
