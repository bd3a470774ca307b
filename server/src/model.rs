//! Persisted records and their identifiers.

use crate::utils::{sysflags_with_password, Timestamp};

pub type ConnectionId = u64;
pub type AccountId = u64;
pub type PersonaId = u64;
pub type PersonaSessionId = u64;
pub type GameId = u64;
pub type GameConnectionId = u64;
pub type RoomId = u64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub pass: String,
    pub mail: Option<String>,
    pub loc: String,
    pub banned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Persona {
    pub id: PersonaId,
    pub account_id: AccountId,
    pub name: String,
    /// Reputation, 0 to 5 stars.
    pub rp: u32,
    pub deleted_on: Option<Timestamp>,
}

/// Title binding captured at authentication.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TitleBinding {
    pub vers: String,
    pub slus: String,
}

/// One persona's presence for one title on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonaSession {
    pub id: PersonaSessionId,
    pub persona_id: PersonaId,
    pub persona_name: String,
    pub connection_id: ConnectionId,
    pub address: String,
    pub vers: String,
    pub slus: String,
    pub host: bool,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
}

impl PersonaSession {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPersonaSession {
    pub persona_id: PersonaId,
    pub persona_name: String,
    pub connection_id: ConnectionId,
    pub address: String,
    pub vers: String,
    pub slus: String,
    pub host: bool,
    pub start_time: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Game {
    pub id: GameId,
    /// First game of a map-rotation chain.
    pub original_id: Option<GameId>,
    pub vers: String,
    pub slus: String,
    pub name: String,
    pub params: String,
    pub sysflags: String,
    pub pass: Option<String>,
    pub minsize: u32,
    pub maxsize: u32,
    pub started: bool,
    pub room_id: Option<RoomId>,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
}

impl Game {
    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }

    pub fn has_password(&self) -> bool {
        self.pass.as_deref().is_some_and(|p| !p.is_empty())
    }

    /// Identifier shown to clients; stable across map rotations.
    pub fn public_id(&self) -> GameId {
        self.original_id.unwrap_or(self.id)
    }

    pub fn public_sysflags(&self) -> String {
        sysflags_with_password(&self.sysflags, self.has_password())
    }
}

/// Game fields supplied by a create request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewGame {
    pub original_id: Option<GameId>,
    pub vers: String,
    pub slus: String,
    pub name: String,
    pub params: String,
    pub sysflags: String,
    pub pass: Option<String>,
    pub minsize: u32,
    pub maxsize: u32,
    pub started: bool,
    pub room_id: Option<RoomId>,
    pub start_time: Timestamp,
}

/// A persona session's membership window in one game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameConnection {
    pub id: GameConnectionId,
    pub game_id: GameId,
    pub persona_session_id: PersonaSessionId,
    pub persona_id: PersonaId,
    pub host: bool,
    pub start_time: Timestamp,
    pub end_time: Option<Timestamp>,
}

impl GameConnection {
    pub fn is_active(&self) -> bool {
        self.end_time.is_none()
    }
}
