//! Game state machine and matchmaking.
//!
//! Games move Open -> Started -> Ended. Peer-to-peer titles are created Open
//! and started by their host; dedicated-host titles are created Started.
//! Every transition is written to the store, game and memberships together,
//! before any peer is notified.

use crate::connection::Connection;
use crate::error::{LobbyError, LobbyResult};
use crate::model::{Game, GameConnection, NewGame, Persona, PersonaSession};
use crate::store::{CreateOutcome, JoinOutcome};
use crate::utils::Timestamp;
use crate::{deliver, Lobby};
use log::{debug, error, info, warn};
use shared::{broadcasts, commands, Record};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Search modes of `gqwk`.
const MODE_FAIL: &str = "0";
const MODE_CREATE: &str = "1";
const MODE_WAIT: &str = "2";
const MODE_CANCEL: &str = "3";

fn parse_u32(value: Option<&str>, default: u32) -> u32 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn with_id(record: &Record, id: &str) -> Record {
    Record {
        id: id.to_string(),
        fields: record.fields.clone(),
    }
}

impl Lobby {
    fn require_session(&self, conn: &Connection) -> LobbyResult<(Persona, PersonaSession)> {
        conn.with_state(|s| match (&s.persona, &s.persona_session) {
            (Some(persona), Some(session)) => Ok((persona.clone(), session.clone())),
            _ => Err(LobbyError::State("no persona selected")),
        })
    }

    /// Banned accounts and blacklisted addresses may not join or spawn games.
    fn check_access(&self, conn: &Connection) -> LobbyResult<()> {
        if self.identity().is_blacklisted(&conn.ip())? {
            return Err(LobbyError::AccessDenied);
        }
        let banned = match conn.account() {
            Some(account) => self
                .identity()
                .find_account(account.id)?
                .map(|a| a.banned)
                .unwrap_or(true),
            None => true,
        };
        if banned {
            return Err(LobbyError::AccessDenied);
        }
        Ok(())
    }

    fn new_game_from(&self, request: &Record, session: &PersonaSession, name: String) -> NewGame {
        let p2p = self.config().is_p2p(&session.vers);
        NewGame {
            original_id: None,
            vers: session.vers.clone(),
            slus: session.slus.clone(),
            name,
            params: request.get("PARAMS").unwrap_or_default().to_string(),
            sysflags: request.get_non_empty("SYSFLAGS").unwrap_or("0").to_string(),
            pass: request.get_non_empty("PASS").map(str::to_string),
            minsize: parse_u32(request.get("MINSIZE"), 1),
            maxsize: parse_u32(request.get("MAXSIZE"), 2),
            started: !p2p,
            room_id: if p2p {
                self.rooms().room_id_for_vers(&session.vers)
            } else {
                None
            },
            start_time: self.now(),
        }
    }

    /// Connections of the game's active members.
    fn member_connections(&self, game: &Game) -> LobbyResult<Vec<Arc<Connection>>> {
        Ok(self
            .store()
            .active_members(game.id)?
            .into_iter()
            .filter_map(|m| self.registry().find_by_persona_session(m.persona_session_id))
            .collect())
    }

    /// Stores a new game with `founder` as its first member.
    fn found_game(
        &self,
        new: NewGame,
        family: &[String],
        founder: &PersonaSession,
        host: bool,
    ) -> LobbyResult<Game> {
        let name = new.name.clone();
        let maxsize = new.maxsize;
        match self.store().insert_game_unique(new, family, founder, host)? {
            CreateOutcome::Created { game, .. } => Ok(game),
            CreateOutcome::Duplicate => Err(LobbyError::DuplicateName(name)),
            CreateOutcome::NoRoom => Err(LobbyError::NoCapacity(maxsize)),
        }
    }

    /// Leave side effects for a membership the store closed when the
    /// persona moved to another game.
    fn release_moved(&self, conn: &Connection, persona: &Persona, previous: Option<GameConnection>) {
        let Some(previous) = previous else {
            return;
        };
        if let Err(e) = self.release_membership(conn, persona, &previous) {
            error!(
                "Could not release game {} of {}: {}",
                previous.game_id, persona.name, e
            );
        }
    }

    fn refreshed(&self, game: &Game) -> LobbyResult<Game> {
        Ok(self.store().find_game(game.id)?.unwrap_or_else(|| game.clone()))
    }

    /// `+agm` and `+mgm` to every connection of the game's title family.
    pub(crate) fn broadcast_game_update(&self, game: &Game) -> LobbyResult<()> {
        let family = self.config().related_vers(&game.vers);
        let added = self.game_record(broadcasts::GAME_ADDED, game)?;
        let members = with_id(&added, broadcasts::GAME_MEMBERS);
        for peer in self.registry().by_titles(&family) {
            deliver(&peer, added.clone());
            deliver(&peer, members.clone());
        }
        Ok(())
    }

    /// Pushes the current game info to its host: `+mgm` now, `+ses` once
    /// the settle delay has passed. No-op when the host is offline.
    pub fn update_host_info(&self, game: &Game) -> LobbyResult<()> {
        let Some(host) = self.host_connection(game)? else {
            debug!("No host online for game {}", game.id);
            return Ok(());
        };
        let info = self.game_record(broadcasts::GAME_MEMBERS, game)?;
        let session = with_id(&info, broadcasts::GAME_SESSION_STARTED);
        deliver(&host, info);
        self.defer(self.timings().settle_delay(), move |_| async move {
            deliver(&host, session);
        });
        Ok(())
    }

    /// `gcre`
    pub fn game_create(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        self.create_game(conn, request, commands::GAME_CREATE)
    }

    fn create_game(&self, conn: &Arc<Connection>, request: &Record, reply_id: &str) -> LobbyResult<()> {
        let (persona, session) = self.require_session(conn)?;
        let name = request
            .get_non_empty("NAME")
            .map(str::to_string)
            .unwrap_or_else(|| persona.name.clone());
        let family = self.config().related_vers(&session.vers);
        let new = self.new_game_from(request, &session, name);
        let previous = self.store().active_membership_of(persona.id)?;
        let game = self.found_game(new, &family, &session, true)?;
        info!("Game {} ({}) created by {}", game.id, game.name, persona.name);

        conn.set_userflags("1");
        self.release_moved(conn, &persona, previous);

        deliver(conn, self.game_record(reply_id, &game)?);
        self.who(conn);

        if self.config().is_p2p(&session.vers) {
            self.usr(conn, conn);
            if let Some(room_id) = game.room_id {
                self.rooms().add_game(room_id, game.id);
                if let Some(room) = self.rooms().snapshot(room_id) {
                    let added = self.game_record(broadcasts::GAME_ADDED, &game)?;
                    for peer in self.registry().by_title(&session.vers) {
                        if peer.persona().is_some_and(|p| room.persona_ids.contains(&p.id)) {
                            deliver(&peer, added.clone());
                        }
                    }
                }
            }
        }

        let creator = Arc::clone(conn);
        self.defer(self.timings().settle_delay(), move |lobby| async move {
            let record = lobby
                .refreshed(&game)
                .and_then(|game| lobby.game_record(broadcasts::GAME_MEMBERS, &game));
            match record {
                Ok(record) => deliver(&creator, record),
                Err(e) => error!("Could not describe game {}: {}", game.id, e),
            }
        });
        Ok(())
    }

    /// `gjoi`: join by `IDENT`, or by `NAME` for titles that send none.
    pub fn game_join(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        let (_, session) = self.require_session(conn)?;
        self.check_access(conn)?;

        let game = match request.get_non_empty("IDENT") {
            Some(ident) => {
                let ident = ident.trim().parse().map_err(|_| LobbyError::UnknownGame)?;
                self.store().find_game_by_ident(ident)?
            }
            None => {
                let name = request.get("NAME").unwrap_or_default();
                self.store()
                    .find_open_game_by_name(name, std::slice::from_ref(&session.vers))?
            }
        };
        let game = game.ok_or(LobbyError::UnknownGame)?;
        self.join_game(conn, request, &game)
    }

    fn join_game(&self, conn: &Arc<Connection>, request: &Record, game: &Game) -> LobbyResult<()> {
        let (persona, session) = self.require_session(conn)?;

        let offered = request.get_non_empty("PASS");
        let expected = game.pass.as_deref().filter(|p| !p.is_empty());
        if offered != expected {
            return Err(LobbyError::WrongPassword);
        }
        if !game.is_open() {
            return Err(LobbyError::UnknownGame);
        }
        if game.started && !self.config().midgame_join_allowed(&game.vers) {
            return Err(LobbyError::AlreadyStarted);
        }

        // The store checks capacity in the same write that moves the persona
        let previous = self
            .store()
            .active_membership_of(persona.id)?
            .filter(|m| m.game_id != game.id);
        let membership = self.open_membership(&session, game)?;
        info!("{} joined game {} ({})", persona.name, game.id, membership.id);
        self.release_moved(conn, &persona, previous);
        deliver(conn, request.clone());

        if self.config().is_p2p(&game.vers) {
            conn.set_userflags("0");
            self.who(conn);

            let members = self.member_connections(game)?;
            for peer in &members {
                for member in &members {
                    self.usr(peer, member);
                }
            }
            self.broadcast_game_update(game)?;
        } else {
            self.update_host_info(game)?;
            let joiner = Arc::clone(conn);
            let game = game.clone();
            self.defer(self.timings().settle_delay(), move |lobby| async move {
                match lobby.game_record(broadcasts::GAME_SESSION_STARTED, &game) {
                    Ok(record) => deliver(&joiner, record),
                    Err(e) => error!("Could not describe game {}: {}", game.id, e),
                }
            });
        }
        Ok(())
    }

    /// `gqwk`: quick match. Mode 2 waits in the background, mode 3 cancels
    /// the wait, modes 0 and 1 try once and fail or create.
    pub fn game_search(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        match request.get("MODE").unwrap_or(MODE_FAIL) {
            MODE_WAIT => {
                self.require_session(conn)?;
                deliver(conn, request.clone());
                self.start_search(conn);
            }
            MODE_CANCEL => {
                deliver(conn, request.clone());
                if conn.cancel_search() {
                    debug!("Game search of connection {} cancelled", conn.id());
                }
            }
            mode => match self.find_match(conn)? {
                Some(game) => self.join_and_start(conn, request, &game)?,
                None if mode == MODE_CREATE => {
                    self.create_game(conn, request, commands::GAME_SEARCH)?;
                }
                None => return Err(LobbyError::NoMatch),
            },
        }
        Ok(())
    }

    /// First open, unstarted, passwordless game of the family with room left
    /// and at least one active member, in store order.
    pub fn find_match(&self, conn: &Connection) -> LobbyResult<Option<Game>> {
        let (persona, session) = self.require_session(conn)?;
        let family = self.config().related_vers(&session.vers);
        for game in self.store().open_games(&family)? {
            if game.started || game.has_password() {
                continue;
            }
            let members = self.store().active_members(game.id)?;
            if members.iter().any(|m| m.persona_id == persona.id) {
                continue;
            }
            if !members.is_empty() && members.len() < game.maxsize as usize {
                return Ok(Some(game));
            }
        }
        Ok(None)
    }

    fn open_membership(&self, session: &PersonaSession, game: &Game) -> LobbyResult<GameConnection> {
        match self.store().open_membership(game.id, session, false, self.now())? {
            JoinOutcome::Joined(membership) => Ok(membership),
            JoinOutcome::Full => Err(LobbyError::GameFull),
            JoinOutcome::Ended => Err(LobbyError::UnknownGame),
        }
    }

    fn join_and_start(&self, conn: &Arc<Connection>, request: &Record, game: &Game) -> LobbyResult<()> {
        self.join_game(conn, request, game)?;
        self.start_current_game(conn)
    }

    /// Installs the connection's matchmaking poller, cancelling the one it
    /// replaces.
    fn start_search(&self, conn: &Arc<Connection>) {
        let token = CancellationToken::new();
        let task_id = conn.install_search(token.clone());
        let interval = self.timings().search_interval();
        let lobby = self.clone();
        let conn = Arc::clone(conn);
        let request = Record::new(commands::GAME_SEARCH);

        tokio::spawn(async move {
            loop {
                if token.is_cancelled() || !conn.is_open() {
                    break;
                }
                debug!("Searching a game for connection {}", conn.id());
                match lobby.find_match(&conn) {
                    Ok(Some(game)) => {
                        if !token.is_cancelled() && conn.is_open() {
                            if let Err(e) = lobby.join_and_start(&conn, &request, &game) {
                                warn!("Matched game {} could not be joined: {}", game.id, e);
                            }
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        error!("Game search for connection {} failed: {}", conn.id(), e);
                        break;
                    }
                }

                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = conn.closed() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
            debug!("Game search task {} of connection {} finished", task_id, conn.id());
            conn.finish_search(task_id);
        });
    }

    /// `gsea`: `COUNT` then one `+gam` row per game.
    pub fn game_list(&self, conn: &Connection, request: &Record) -> LobbyResult<()> {
        let (_, session) = self.require_session(conn)?;
        let family = self.config().related_vers(&session.vers);
        let limit = request
            .get("COUNT")
            .and_then(|c| c.trim().parse::<usize>().ok())
            .unwrap_or(usize::MAX);

        let games: Vec<Game> = self.store().open_games(&family)?.into_iter().take(limit).collect();
        let mut rows = Vec::with_capacity(games.len());
        for game in &games {
            let count = self.store().active_members(game.id)?.len();
            rows.push(
                Record::new(broadcasts::GAME_ROW)
                    .with("IDENT", game.public_id().to_string())
                    .with("NAME", game.name.clone())
                    .with("PARAMS", game.params.clone())
                    .with("SYSFLAGS", game.public_sysflags())
                    .with("COUNT", count.to_string())
                    .with("MAXSIZE", game.maxsize.to_string()),
            );
        }
        deliver(
            conn,
            Record::new(request.id.clone()).with("COUNT", games.len().to_string()),
        );
        for row in rows {
            deliver(conn, row);
        }
        Ok(())
    }

    /// `gsta`
    pub fn game_start(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        deliver(conn, request.clone());
        self.start_current_game(conn)
    }

    /// Starts the caller's P2P game and sends `+ses` to every member.
    fn start_current_game(&self, conn: &Connection) -> LobbyResult<()> {
        let (persona, session) = self.require_session(conn)?;
        if !self.config().is_p2p(&session.vers) {
            return Ok(());
        }
        let Some(membership) = self.store().active_membership_of(persona.id)? else {
            return Ok(());
        };
        let game = self.store().start_game(membership.game_id, self.now())?;
        info!("Game {} ({}) started", game.id, game.name);
        let record = self.game_record(broadcasts::GAME_SESSION_STARTED, &game)?;
        for member in self.member_connections(&game)? {
            deliver(&member, record.clone());
        }
        Ok(())
    }

    /// `gset`: ready flag and parameters for P2P titles, map rotation for
    /// titles that rotate.
    pub fn game_set_params(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        deliver(conn, request.clone());
        let (persona, session) = self.require_session(conn)?;

        if self.config().is_p2p(&session.vers) {
            if let Some(userflags) = request.get("USERFLAGS") {
                conn.set_userflags(userflags);
            }
            let Some(membership) = self.store().active_membership_of(persona.id)? else {
                return Ok(());
            };
            let game = match request.get("PARAMS") {
                Some(params) => self.store().update_game_params(
                    membership.game_id,
                    params,
                    request.get_non_empty("SYSFLAGS"),
                )?,
                None => match self.store().find_game(membership.game_id)? {
                    Some(game) => game,
                    None => return Ok(()),
                },
            };
            let added = self.game_record(broadcasts::GAME_ADDED, &game)?;
            let members = with_id(&added, broadcasts::GAME_MEMBERS);
            for member in self.member_connections(&game)? {
                deliver(&member, added.clone());
                deliver(&member, members.clone());
            }
        }

        if self.config().uses_map_rotation(&session.vers) {
            let hosted = self
                .store()
                .active_membership_of(persona.id)?
                .filter(|m| m.host)
                .map(|m| m.game_id);
            if let Some(game_id) = hosted {
                let params = request.get("PARAMS").unwrap_or_default().to_string();
                let sysflags = request.get_non_empty("SYSFLAGS").map(str::to_string);
                let at = self.now();
                self.defer(self.timings().rotation_delay(), move |lobby| async move {
                    lobby.rotate(game_id, &params, sysflags.as_deref(), at);
                });
            }
        }
        Ok(())
    }

    /// Replaces a game with a started successor carrying new parameters.
    fn rotate(&self, game_id: u64, params: &str, sysflags: Option<&str>, at: Timestamp) {
        match self.store().rotate_game(game_id, params, sysflags, at) {
            Ok(Some(successor)) => {
                info!(
                    "Game {} rotated into {} (chain {})",
                    game_id,
                    successor.id,
                    successor.public_id()
                );
                if let Err(e) = self.update_host_info(&successor) {
                    error!("Could not update host of game {}: {}", successor.id, e);
                }
            }
            Ok(None) => debug!("Game {} ended before its rotation", game_id),
            Err(e) => error!("Rotation of game {} failed: {}", game_id, e),
        }
    }

    /// `glea`
    pub fn game_leave(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        self.leave_current_game(conn)?;
        deliver(conn, request.clone());
        Ok(())
    }

    /// Closes the caller's active membership. A departing P2P host or
    /// dedicated host takes the whole game down with it.
    pub fn leave_current_game(&self, conn: &Connection) -> LobbyResult<()> {
        let Some(persona) = conn.persona() else {
            return Ok(());
        };
        let Some(membership) = self.store().active_membership_of(persona.id)? else {
            return Ok(());
        };
        self.release_membership(conn, &persona, &membership)
    }

    /// Ends `membership` and notifies the game. Also used for memberships
    /// the store already ended, in which case only the notifications and
    /// the host teardown remain.
    fn release_membership(
        &self,
        conn: &Connection,
        persona: &Persona,
        membership: &GameConnection,
    ) -> LobbyResult<()> {
        let game = self.store().find_game(membership.game_id)?;
        let Some(game) = game.filter(Game::is_open) else {
            return Ok(());
        };
        let p2p = self.config().is_p2p(&game.vers);
        let takes_game_down = if p2p {
            membership.host
        } else {
            conn.is_dedicated_host()
        };
        if takes_game_down {
            return self.close_game(conn, &game);
        }

        self.store().end_membership(membership.id, self.now())?;
        info!("{} left game {}", persona.name, game.id);
        if p2p {
            self.broadcast_game_update(&game)
        } else {
            self.update_host_info(&game)
        }
    }

    /// `gdel`
    pub fn game_delete(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        self.delete_current_game(conn)?;
        deliver(conn, request.clone());
        Ok(())
    }

    /// Ends the caller's current game and all its memberships.
    pub fn delete_current_game(&self, conn: &Connection) -> LobbyResult<Option<Game>> {
        let Some(persona) = conn.persona() else {
            return Ok(None);
        };
        let Some(game) = self.current_game(persona.id)? else {
            return Ok(None);
        };
        self.close_game(conn, &game)?;
        Ok(Some(game))
    }

    /// Ends the game with every membership; P2P games also leave their room.
    fn close_game(&self, conn: &Connection, game: &Game) -> LobbyResult<()> {
        let ended = self.store().end_game(game.id, self.now())?;
        info!(
            "Game {} ({}) ended with {} members",
            game.id,
            game.name,
            ended.len()
        );
        if self.config().is_p2p(&game.vers) {
            self.remove_game_from_room(game, Some(conn.id()));
        }
        Ok(())
    }

    /// `gget`
    pub fn game_get_info(&self, conn: &Connection, request: &Record) -> LobbyResult<()> {
        let game = match request.get("IDENT").and_then(|i| i.trim().parse().ok()) {
            Some(ident) => self.store().find_game_by_ident(ident)?,
            None => None,
        };
        let reply = match game {
            Some(game) => self.game_record(&request.id, &game)?,
            None => Record::new(request.id.clone()),
        };
        deliver(conn, reply);
        Ok(())
    }

    /// `gpss`: `A` marks an available spawn service, `G` one that hosts.
    pub fn game_spawn_status(&self, conn: &Connection, request: &Record) -> LobbyResult<()> {
        deliver(conn, request.clone());
        match request.get("STATUS") {
            Some("A") => conn.with_state(|s| {
                s.spawn_service = true;
                s.hosting = false;
            }),
            Some("G") => conn.with_state(|s| s.hosting = true),
            _ => {}
        }
        Ok(())
    }

    /// `gpsc`: create a dedicated-host game. Rotating titles delegate the
    /// creation to a spawn service and attach the requester once the game
    /// shows up; other titles get their game directly.
    pub fn game_spawn_create(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        self.check_access(conn)?;
        let (persona, session) = self.require_session(conn)?;
        let name = request
            .get_non_empty("NAME")
            .map(str::to_string)
            .unwrap_or_else(|| persona.name.clone());
        let family = self.config().related_vers(&session.vers);

        if self.store().find_open_game_by_name(&name, &family)?.is_some() {
            return Err(LobbyError::DuplicateName(name));
        }
        let new = self.new_game_from(request, &session, name.clone());
        if new.maxsize == 0 {
            return Err(LobbyError::NoCapacity(new.maxsize));
        }

        if self.config().uses_map_rotation(&session.vers) {
            let service = self
                .registry()
                .find_available_spawn_service(&family)
                .ok_or(LobbyError::NoSpawnService)?;
            deliver(conn, request.clone());
            deliver(
                &service,
                Record::new(broadcasts::SPAWN_CREATE)
                    .with("NAME", new.name.clone())
                    .with("PARAMS", new.params.clone())
                    .with("SYSFLAGS", new.sysflags.clone())
                    .with("MINSIZE", new.minsize.to_string())
                    .with("MAXSIZE", new.maxsize.to_string())
                    .with("PASS", new.pass.clone().unwrap_or_default()),
            );
            info!("Asked spawn service {} to create {}", service.id(), name);
            self.await_provisioned(conn, name, family);
            return Ok(());
        }

        let previous = self.store().active_membership_of(persona.id)?;
        let game = self.found_game(new, &family, &session, false)?;
        deliver(conn, request.clone());
        self.release_moved(conn, &persona, previous);
        info!("Game {} ({}) created for {}", game.id, game.name, persona.name);
        deliver(conn, self.game_record(broadcasts::GAME_SESSION_STARTED, &game)?);
        Ok(())
    }

    /// Polls for the game a spawn service was asked to create, a bounded
    /// number of times, and attaches the requester when it appears.
    fn await_provisioned(&self, conn: &Arc<Connection>, name: String, family: Vec<String>) {
        let lobby = self.clone();
        let conn = Arc::clone(conn);
        let retries = self.timings().provisioning_retries;
        let interval = self.timings().provisioning_interval();

        tokio::spawn(async move {
            for _ in 0..retries {
                tokio::time::sleep(interval).await;
                if !conn.is_open() {
                    return;
                }
                let game = match lobby.store().find_open_game_by_name(&name, &family) {
                    Ok(Some(game)) => game,
                    Ok(None) => continue,
                    Err(e) => {
                        error!("Lookup of provisioned game {} failed: {}", name, e);
                        continue;
                    }
                };
                if let Err(e) = lobby.attach_provisioned(&conn, &game) {
                    warn!("Could not attach connection {} to game {}: {}", conn.id(), game.id, e);
                    if let Some(status) = e.status() {
                        deliver(&conn, Record::with_status(commands::GAME_SPAWN_CREATE, status));
                    }
                }
                return;
            }
            warn!("Spawn service never provisioned game {}", name);
        });
    }

    fn attach_provisioned(&self, conn: &Connection, game: &Game) -> LobbyResult<()> {
        let (persona, session) = self.require_session(conn)?;
        let previous = self
            .store()
            .active_membership_of(persona.id)?
            .filter(|m| m.game_id != game.id);
        self.open_membership(&session, game)?;
        self.release_moved(conn, &persona, previous);
        deliver(conn, self.game_record(broadcasts::GAME_SESSION_STARTED, game)?);
        self.update_host_info(game)
    }

    /// `rank`: hands the report to the stats engine. P2P games end with the
    /// report and the reporter goes back out of the room.
    pub fn rank_report(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        let (_, session) = self.require_session(conn)?;
        self.stats().record_report(&session.vers, request);
        deliver(conn, request.clone());
        if self.config().is_p2p(&session.vers) {
            self.delete_current_game(conn)?;
            self.remove_persona_from_room(&session.vers, conn);
        }
        Ok(())
    }
}
