//! Repository seams for the durable records plus the in-memory backend used
//! by the binary and by tests.
//!
//! Every operation that touches a game together with its memberships runs
//! under a single write lock, so readers never observe a game that ended
//! while some of its memberships are still open.

use crate::config::AccountSeed;
use crate::error::{LobbyError, LobbyResult, StoreError, StoreResult};
use crate::model::*;
use crate::utils::Timestamp;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashSet};

/// Outcome of an attempt to open a membership.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined(GameConnection),
    Full,
    Ended,
}

/// Outcome of creating a game together with its first member.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    Created { game: Game, founder: GameConnection },
    /// An open game of the same name exists in the family.
    Duplicate,
    /// `maxsize` leaves no seat for the founder.
    NoRoom,
}

/// A freshly opened persona session and the non-host sessions of the same
/// persona it replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenedSession {
    pub session: PersonaSession,
    pub replaced: Vec<PersonaSession>,
}

/// Records left open by a previous run, closed in one pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Leftovers {
    pub games: usize,
    pub memberships: usize,
    pub persona_sessions: usize,
}

pub trait Store: Send + Sync {
    /// Opens a persona session and ends every other active non-host session
    /// of the persona in the same write. Dedicated-host sessions are kept.
    fn open_persona_session(&self, new: NewPersonaSession) -> StoreResult<OpenedSession>;
    fn find_persona_session(&self, id: PersonaSessionId) -> StoreResult<Option<PersonaSession>>;
    /// Active sessions of a persona, normally at most one.
    fn active_persona_sessions_of(&self, persona_id: PersonaId) -> StoreResult<Vec<PersonaSession>>;
    fn active_persona_sessions(&self) -> StoreResult<Vec<PersonaSession>>;
    /// Returns false when the session had already ended.
    fn end_persona_session(&self, id: PersonaSessionId, at: Timestamp) -> StoreResult<bool>;

    /// Inserts the game unless an open game of the same name exists for any
    /// of the `family` versions, and attaches `founder` to it. The founder's
    /// other active membership, if any, ends in the same write.
    fn insert_game_unique(
        &self,
        new: NewGame,
        family: &[String],
        founder: &PersonaSession,
        host: bool,
    ) -> StoreResult<CreateOutcome>;
    fn find_game(&self, id: GameId) -> StoreResult<Option<Game>>;
    /// Latest game in the chain identified by `ident`.
    fn find_game_by_ident(&self, ident: GameId) -> StoreResult<Option<Game>>;
    fn find_open_game_by_name(&self, name: &str, family: &[String]) -> StoreResult<Option<Game>>;
    /// Open games of the family in id order.
    fn open_games(&self, family: &[String]) -> StoreResult<Vec<Game>>;
    fn update_game_params(&self, id: GameId, params: &str, sysflags: Option<&str>) -> StoreResult<Game>;
    /// Marks the game started and stamps the start time of every active
    /// membership.
    fn start_game(&self, id: GameId, at: Timestamp) -> StoreResult<Game>;
    /// Ends the game and its active memberships. Returns the memberships
    /// that were active; empty when the game had already ended.
    fn end_game(&self, id: GameId, at: Timestamp) -> StoreResult<Vec<GameConnection>>;
    /// Ends the game and re-attaches its active members to a started
    /// successor carrying the new parameters. `None` when the game had
    /// already ended.
    fn rotate_game(&self, id: GameId, params: &str, sysflags: Option<&str>, at: Timestamp)
        -> StoreResult<Option<Game>>;

    /// Opens a membership for `session`, ending the persona's previous
    /// active membership in the same step. Capacity is checked first.
    fn open_membership(
        &self,
        game_id: GameId,
        session: &PersonaSession,
        host: bool,
        at: Timestamp,
    ) -> StoreResult<JoinOutcome>;
    fn end_membership(&self, id: GameConnectionId, at: Timestamp) -> StoreResult<bool>;
    fn active_membership_of(&self, persona_id: PersonaId) -> StoreResult<Option<GameConnection>>;
    /// Active members in membership id order.
    fn active_members(&self, game_id: GameId) -> StoreResult<Vec<GameConnection>>;
    fn memberships_of_game(&self, game_id: GameId) -> StoreResult<Vec<GameConnection>>;
    fn active_memberships(&self) -> StoreResult<Vec<GameConnection>>;

    fn close_leftovers(&self, at: Timestamp) -> StoreResult<Leftovers>;
}

/// Account and persona lookups owned by the identity service.
pub trait IdentityStore: Send + Sync {
    fn find_account_by_name(&self, name: &str) -> StoreResult<Option<Account>>;
    fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>>;
    fn personas_of(&self, account_id: AccountId) -> StoreResult<Vec<Persona>>;
    fn find_persona_by_name(&self, name: &str) -> StoreResult<Option<Persona>>;
    fn is_blacklisted(&self, ip: &str) -> StoreResult<bool>;

    fn authenticate(&self, name: &str, pass: &str) -> LobbyResult<Account> {
        let account = self
            .find_account_by_name(name)?
            .ok_or_else(|| LobbyError::UnknownAccount(name.to_string()))?;
        if account.pass != pass {
            return Err(LobbyError::WrongAccountPassword);
        }
        if account.banned {
            return Err(LobbyError::AccessDenied);
        }
        Ok(account)
    }
}

#[derive(Default)]
struct Tables {
    accounts: Vec<Account>,
    personas: Vec<Persona>,
    blacklist: HashSet<String>,
    persona_sessions: BTreeMap<PersonaSessionId, PersonaSession>,
    games: BTreeMap<GameId, Game>,
    memberships: BTreeMap<GameConnectionId, GameConnection>,
    next_id: u64,
}

impl Tables {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn game(&self, id: GameId) -> StoreResult<&Game> {
        self.games
            .get(&id)
            .ok_or_else(|| StoreError::Missing(format!("game {}", id)))
    }

    fn game_mut(&mut self, id: GameId) -> StoreResult<&mut Game> {
        self.games
            .get_mut(&id)
            .ok_or_else(|| StoreError::Missing(format!("game {}", id)))
    }

    fn active_members(&self, game_id: GameId) -> Vec<GameConnection> {
        self.memberships
            .values()
            .filter(|m| m.game_id == game_id && m.is_active())
            .cloned()
            .collect()
    }

    fn end_game(&mut self, id: GameId, at: Timestamp) -> StoreResult<Vec<GameConnection>> {
        let game = self.game_mut(id)?;
        if !game.is_open() {
            return Ok(Vec::new());
        }
        game.end_time = Some(at);
        let mut ended = Vec::new();
        for membership in self.memberships.values_mut() {
            if membership.game_id == id && membership.is_active() {
                membership.end_time = Some(at);
                ended.push(membership.clone());
            }
        }
        Ok(ended)
    }

    fn end_memberships_of(&mut self, persona_id: PersonaId, at: Timestamp) {
        for membership in self.memberships.values_mut() {
            if membership.persona_id == persona_id && membership.is_active() {
                membership.end_time = Some(at);
            }
        }
    }

    fn insert_membership(
        &mut self,
        game_id: GameId,
        persona_session_id: PersonaSessionId,
        persona_id: PersonaId,
        host: bool,
        at: Timestamp,
    ) -> GameConnection {
        let membership = GameConnection {
            id: self.next_id(),
            game_id,
            persona_session_id,
            persona_id,
            host,
            start_time: at,
            end_time: None,
        };
        self.memberships.insert(membership.id, membership.clone());
        membership
    }
}

/// In-memory backend for [`Store`] and [`IdentityStore`].
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seeded(accounts: &[AccountSeed], blacklist: &[String]) -> Self {
        let store = Self::new();
        for seed in accounts {
            store.add_account(seed);
        }
        store.tables.write().blacklist = blacklist.iter().cloned().collect();
        store
    }

    pub fn add_account(&self, seed: &AccountSeed) -> AccountId {
        let mut tables = self.tables.write();
        let account_id = tables.next_id();
        tables.accounts.push(Account {
            id: account_id,
            name: seed.name.clone(),
            pass: seed.pass.clone(),
            mail: seed.mail.clone(),
            loc: seed.loc.clone(),
            banned: seed.banned,
        });
        for name in &seed.personas {
            let persona_id = tables.next_id();
            tables.personas.push(Persona {
                id: persona_id,
                account_id,
                name: name.clone(),
                rp: 5,
                deleted_on: None,
            });
        }
        account_id
    }

    /// Soft-deletes a persona; returns false when it does not exist.
    pub fn delete_persona(&self, name: &str, at: Timestamp) -> bool {
        let mut tables = self.tables.write();
        match tables.personas.iter_mut().find(|p| p.name == name) {
            Some(persona) => {
                persona.deleted_on = Some(at);
                true
            }
            None => false,
        }
    }
}

fn in_family(vers: &str, family: &[String]) -> bool {
    family.iter().any(|v| v == vers)
}

impl Store for MemoryStore {
    fn open_persona_session(&self, new: NewPersonaSession) -> StoreResult<OpenedSession> {
        let mut tables = self.tables.write();
        let mut replaced = Vec::new();
        for stale in tables.persona_sessions.values_mut() {
            if stale.persona_id == new.persona_id && stale.is_active() && !stale.host {
                stale.end_time = Some(new.start_time);
                replaced.push(stale.clone());
            }
        }
        let session = PersonaSession {
            id: tables.next_id(),
            persona_id: new.persona_id,
            persona_name: new.persona_name,
            connection_id: new.connection_id,
            address: new.address,
            vers: new.vers,
            slus: new.slus,
            host: new.host,
            start_time: new.start_time,
            end_time: None,
        };
        tables.persona_sessions.insert(session.id, session.clone());
        Ok(OpenedSession { session, replaced })
    }

    fn find_persona_session(&self, id: PersonaSessionId) -> StoreResult<Option<PersonaSession>> {
        Ok(self.tables.read().persona_sessions.get(&id).cloned())
    }

    fn active_persona_sessions_of(&self, persona_id: PersonaId) -> StoreResult<Vec<PersonaSession>> {
        Ok(self
            .tables
            .read()
            .persona_sessions
            .values()
            .filter(|s| s.persona_id == persona_id && s.is_active())
            .cloned()
            .collect())
    }

    fn active_persona_sessions(&self) -> StoreResult<Vec<PersonaSession>> {
        Ok(self
            .tables
            .read()
            .persona_sessions
            .values()
            .filter(|s| s.is_active())
            .cloned()
            .collect())
    }

    fn end_persona_session(&self, id: PersonaSessionId, at: Timestamp) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        match tables.persona_sessions.get_mut(&id) {
            Some(session) if session.is_active() => {
                session.end_time = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Missing(format!("persona session {}", id))),
        }
    }

    fn insert_game_unique(
        &self,
        new: NewGame,
        family: &[String],
        founder: &PersonaSession,
        host: bool,
    ) -> StoreResult<CreateOutcome> {
        if new.maxsize == 0 {
            return Ok(CreateOutcome::NoRoom);
        }
        let mut tables = self.tables.write();
        let duplicate = tables
            .games
            .values()
            .any(|g| g.is_open() && g.name == new.name && in_family(&g.vers, family));
        if duplicate {
            return Ok(CreateOutcome::Duplicate);
        }
        let game = Game {
            id: tables.next_id(),
            original_id: new.original_id,
            vers: new.vers,
            slus: new.slus,
            name: new.name,
            params: new.params,
            sysflags: new.sysflags,
            pass: new.pass,
            minsize: new.minsize,
            maxsize: new.maxsize,
            started: new.started,
            room_id: new.room_id,
            start_time: new.start_time,
            end_time: None,
        };
        tables.games.insert(game.id, game.clone());
        tables.end_memberships_of(founder.persona_id, new.start_time);
        let founder = tables.insert_membership(
            game.id,
            founder.id,
            founder.persona_id,
            host,
            new.start_time,
        );
        Ok(CreateOutcome::Created { game, founder })
    }

    fn find_game(&self, id: GameId) -> StoreResult<Option<Game>> {
        Ok(self.tables.read().games.get(&id).cloned())
    }

    fn find_game_by_ident(&self, ident: GameId) -> StoreResult<Option<Game>> {
        Ok(self
            .tables
            .read()
            .games
            .values()
            .filter(|g| g.public_id() == ident)
            .last()
            .cloned())
    }

    fn find_open_game_by_name(&self, name: &str, family: &[String]) -> StoreResult<Option<Game>> {
        Ok(self
            .tables
            .read()
            .games
            .values()
            .find(|g| g.is_open() && g.name == name && in_family(&g.vers, family))
            .cloned())
    }

    fn open_games(&self, family: &[String]) -> StoreResult<Vec<Game>> {
        Ok(self
            .tables
            .read()
            .games
            .values()
            .filter(|g| g.is_open() && in_family(&g.vers, family))
            .cloned()
            .collect())
    }

    fn update_game_params(&self, id: GameId, params: &str, sysflags: Option<&str>) -> StoreResult<Game> {
        let mut tables = self.tables.write();
        let game = tables.game_mut(id)?;
        game.params = params.to_string();
        if let Some(sysflags) = sysflags {
            game.sysflags = sysflags.to_string();
        }
        Ok(game.clone())
    }

    fn start_game(&self, id: GameId, at: Timestamp) -> StoreResult<Game> {
        let mut tables = self.tables.write();
        let game = tables.game_mut(id)?;
        game.started = true;
        let game = game.clone();
        for membership in tables.memberships.values_mut() {
            if membership.game_id == id && membership.is_active() {
                membership.start_time = at;
            }
        }
        Ok(game)
    }

    fn end_game(&self, id: GameId, at: Timestamp) -> StoreResult<Vec<GameConnection>> {
        self.tables.write().end_game(id, at)
    }

    fn rotate_game(
        &self,
        id: GameId,
        params: &str,
        sysflags: Option<&str>,
        at: Timestamp,
    ) -> StoreResult<Option<Game>> {
        let mut tables = self.tables.write();
        let previous = tables.game(id)?.clone();
        if !previous.is_open() {
            return Ok(None);
        }
        let members = tables.end_game(id, at)?;
        let successor = Game {
            id: tables.next_id(),
            original_id: Some(previous.public_id()),
            params: params.to_string(),
            sysflags: sysflags.map(str::to_string).unwrap_or(previous.sysflags.clone()),
            started: true,
            start_time: at,
            end_time: None,
            ..previous
        };
        tables.games.insert(successor.id, successor.clone());
        for member in members {
            tables.insert_membership(
                successor.id,
                member.persona_session_id,
                member.persona_id,
                member.host,
                at,
            );
        }
        Ok(Some(successor))
    }

    fn open_membership(
        &self,
        game_id: GameId,
        session: &PersonaSession,
        host: bool,
        at: Timestamp,
    ) -> StoreResult<JoinOutcome> {
        let mut tables = self.tables.write();
        let game = tables.game(game_id)?;
        if !game.is_open() {
            return Ok(JoinOutcome::Ended);
        }
        let maxsize = game.maxsize as usize;
        let others = tables
            .active_members(game_id)
            .iter()
            .filter(|m| m.persona_id != session.persona_id)
            .count();
        if others >= maxsize {
            return Ok(JoinOutcome::Full);
        }
        tables.end_memberships_of(session.persona_id, at);
        let membership = tables.insert_membership(game_id, session.id, session.persona_id, host, at);
        Ok(JoinOutcome::Joined(membership))
    }

    fn end_membership(&self, id: GameConnectionId, at: Timestamp) -> StoreResult<bool> {
        let mut tables = self.tables.write();
        match tables.memberships.get_mut(&id) {
            Some(membership) if membership.is_active() => {
                membership.end_time = Some(at);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(StoreError::Missing(format!("game connection {}", id))),
        }
    }

    fn active_membership_of(&self, persona_id: PersonaId) -> StoreResult<Option<GameConnection>> {
        Ok(self
            .tables
            .read()
            .memberships
            .values()
            .find(|m| m.persona_id == persona_id && m.is_active())
            .cloned())
    }

    fn active_members(&self, game_id: GameId) -> StoreResult<Vec<GameConnection>> {
        Ok(self.tables.read().active_members(game_id))
    }

    fn memberships_of_game(&self, game_id: GameId) -> StoreResult<Vec<GameConnection>> {
        Ok(self
            .tables
            .read()
            .memberships
            .values()
            .filter(|m| m.game_id == game_id)
            .cloned()
            .collect())
    }

    fn active_memberships(&self) -> StoreResult<Vec<GameConnection>> {
        Ok(self
            .tables
            .read()
            .memberships
            .values()
            .filter(|m| m.is_active())
            .cloned()
            .collect())
    }

    fn close_leftovers(&self, at: Timestamp) -> StoreResult<Leftovers> {
        let mut tables = self.tables.write();
        let mut leftovers = Leftovers::default();
        for game in tables.games.values_mut().filter(|g| g.is_open()) {
            game.end_time = Some(at);
            leftovers.games += 1;
        }
        for membership in tables.memberships.values_mut().filter(|m| m.is_active()) {
            membership.end_time = Some(at);
            leftovers.memberships += 1;
        }
        for session in tables.persona_sessions.values_mut().filter(|s| s.is_active()) {
            session.end_time = Some(at);
            leftovers.persona_sessions += 1;
        }
        Ok(leftovers)
    }
}

impl IdentityStore for MemoryStore {
    fn find_account_by_name(&self, name: &str) -> StoreResult<Option<Account>> {
        Ok(self
            .tables
            .read()
            .accounts
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn find_account(&self, id: AccountId) -> StoreResult<Option<Account>> {
        Ok(self.tables.read().accounts.iter().find(|a| a.id == id).cloned())
    }

    fn personas_of(&self, account_id: AccountId) -> StoreResult<Vec<Persona>> {
        Ok(self
            .tables
            .read()
            .personas
            .iter()
            .filter(|p| p.account_id == account_id)
            .cloned()
            .collect())
    }

    fn find_persona_by_name(&self, name: &str) -> StoreResult<Option<Persona>> {
        Ok(self
            .tables
            .read()
            .personas
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }

    fn is_blacklisted(&self, ip: &str) -> StoreResult<bool> {
        Ok(self.tables.read().blacklist.contains(ip))
    }
}
