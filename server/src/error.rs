//! Error taxonomy for lobby command handling.
//!
//! User-facing variants map to a four character status suffix appended to
//! the originating command token (`gjoi` + `full` = `gjoifull`).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("record {0} not found")]
    Missing(String),

    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LobbyError {
    #[error("a game named {0:?} already exists")]
    DuplicateName(String),

    #[error("wrong game password")]
    WrongPassword,

    #[error("game is full")]
    GameFull,

    #[error("capacity {0} leaves no seat")]
    NoCapacity(u32),

    #[error("game already started")]
    AlreadyStarted,

    #[error("access denied")]
    AccessDenied,

    #[error("wrong account password")]
    WrongAccountPassword,

    #[error("persona {0:?} is locked")]
    PersonaLocked(String),

    #[error("unknown account {0:?}")]
    UnknownAccount(String),

    #[error("unknown persona {0:?}")]
    UnknownPersona(String),

    #[error("unknown or closed game")]
    UnknownGame,

    #[error("no game spawn service available")]
    NoSpawnService,

    #[error("no matching game")]
    NoMatch,

    #[error("invalid state: {0}")]
    State(&'static str),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl LobbyError {
    /// Status suffix sent back to the requester, `None` for errors answered
    /// with a plain echo of the command.
    pub fn status(&self) -> Option<&'static str> {
        match self {
            LobbyError::DuplicateName(_) => Some("dupl"),
            LobbyError::WrongPassword | LobbyError::WrongAccountPassword => Some("pass"),
            LobbyError::GameFull | LobbyError::NoCapacity(_) => Some("full"),
            LobbyError::AlreadyStarted => Some("asta"),
            LobbyError::AccessDenied => Some("blak"),
            LobbyError::PersonaLocked(_) => Some("lock"),
            LobbyError::UnknownAccount(_) => Some("imst"),
            LobbyError::UnknownGame => Some("ugam"),
            LobbyError::UnknownPersona(_) | LobbyError::NoSpawnService | LobbyError::NoMatch => {
                Some("nfnd")
            }
            LobbyError::State(_) | LobbyError::Store(_) => None,
        }
    }
}

pub type LobbyResult<T> = Result<T, LobbyError>;
