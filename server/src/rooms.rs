//! Room directory and room-scoped broadcasts.
//!
//! Rooms are created once from the title catalog and never removed. Each
//! room has its own lock; room locks are never held while the registry is
//! consulted.

use crate::config::TitleConfig;
use crate::connection::Connection;
use crate::error::LobbyResult;
use crate::model::{ConnectionId, Game, GameId, PersonaId, RoomId};
use crate::{deliver, deliver_tabbed, Lobby};
use log::{debug, warn};
use parking_lot::Mutex;
use shared::{broadcasts, Record};
use std::collections::{BTreeSet, HashSet};

/// Maximum population advertised for a room.
const ROOM_CAPACITY: &str = "50";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: RoomId,
    pub name: String,
    pub vers: String,
    /// Every version string served by this room.
    pub family: Vec<String>,
    pub flags: String,
    pub persona_ids: BTreeSet<PersonaId>,
    pub game_ids: BTreeSet<GameId>,
}

impl Room {
    pub fn population(&self) -> usize {
        self.persona_ids.len()
    }

    pub fn serves(&self, vers: &str) -> bool {
        self.family.iter().any(|v| v == vers)
    }
}

pub struct RoomDirectory {
    rooms: Vec<Mutex<Room>>,
}

impl RoomDirectory {
    /// One room per title, ids starting at 1.
    pub fn from_catalog(titles: &[TitleConfig]) -> Self {
        let rooms = titles
            .iter()
            .enumerate()
            .map(|(idx, title)| {
                Mutex::new(Room {
                    id: idx as RoomId + 1,
                    name: title.vers.clone(),
                    vers: title.vers.clone(),
                    family: title.family(),
                    flags: "CK".to_string(),
                    persona_ids: BTreeSet::new(),
                    game_ids: BTreeSet::new(),
                })
            })
            .collect();
        Self { rooms }
    }

    fn room(&self, id: RoomId) -> Option<&Mutex<Room>> {
        if id == 0 {
            return None;
        }
        self.rooms.get(id as usize - 1)
    }

    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    pub fn snapshot(&self, id: RoomId) -> Option<Room> {
        self.room(id).map(|room| room.lock().clone())
    }

    pub fn room_id_for_vers(&self, vers: &str) -> Option<RoomId> {
        self.rooms
            .iter()
            .map(|room| room.lock())
            .find(|room| room.serves(vers))
            .map(|room| room.id)
    }

    pub fn room_of_persona(&self, persona_id: PersonaId) -> Option<Room> {
        self.rooms
            .iter()
            .map(|room| room.lock())
            .find(|room| room.persona_ids.contains(&persona_id))
            .map(|room| room.clone())
    }

    pub fn insert_persona(&self, id: RoomId, persona_id: PersonaId) -> bool {
        match self.room(id) {
            Some(room) => room.lock().persona_ids.insert(persona_id),
            None => false,
        }
    }

    pub fn remove_persona(&self, id: RoomId, persona_id: PersonaId) -> bool {
        match self.room(id) {
            Some(room) => room.lock().persona_ids.remove(&persona_id),
            None => false,
        }
    }

    pub fn add_game(&self, id: RoomId, game_id: GameId) -> bool {
        match self.room(id) {
            Some(room) => room.lock().game_ids.insert(game_id),
            None => false,
        }
    }

    pub fn remove_game(&self, id: RoomId, game_id: GameId) -> bool {
        match self.room(id) {
            Some(room) => room.lock().game_ids.remove(&game_id),
            None => false,
        }
    }

    pub fn population(&self, id: RoomId) -> usize {
        self.room(id).map(|room| room.lock().population()).unwrap_or(0)
    }
}

fn parse_id(value: Option<&str>) -> u64 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(0)
}

impl Lobby {
    /// Moves the connection's persona into `room_id`, or out of every room
    /// when `room_id` is 0.
    pub fn add_persona_to_room(&self, conn: &Connection, room_id: RoomId) {
        let (persona, vers) = match (conn.persona(), conn.vers()) {
            (Some(persona), Some(vers)) => (persona, vers),
            _ => return,
        };
        self.remove_persona_from_room(&vers, conn);
        if let Some(current) = self.rooms().room_of_persona(persona.id) {
            self.rooms().remove_persona(current.id, persona.id);
        }
        if room_id > 0 && self.rooms().insert_persona(room_id, persona.id) {
            debug!("Persona {} entered room {}", persona.name, room_id);
        }
        self.broadcast_population(&vers);
    }

    pub fn remove_persona_from_room(&self, vers: &str, conn: &Connection) {
        let Some(persona) = conn.persona() else {
            return;
        };
        let Some(room_id) = self.rooms().room_id_for_vers(vers) else {
            return;
        };
        if self.rooms().remove_persona(room_id, persona.id) {
            debug!("Persona {} left room {}", persona.name, room_id);
            self.broadcast_population(vers);
        }
    }

    /// Pushes the room population and server status to every connection of
    /// the title, dedicated hosts excepted.
    pub fn broadcast_population(&self, vers: &str) {
        let Some(room) = self
            .rooms()
            .room_id_for_vers(vers)
            .and_then(|id| self.rooms().snapshot(id))
        else {
            return;
        };
        let status = match self.server_status(vers) {
            Ok(status) => status,
            Err(e) => {
                warn!("Could not compute server status for {}: {}", vers, e);
                return;
            }
        };
        let population = Record::new(broadcasts::ROOM_POPULATION)
            .with("Z", format!("{}/{}", room.id, room.population()));

        for conn in self.registry().by_titles(&room.family) {
            let host = conn.with_state(|s| s.persona_session.as_ref().is_some_and(|ps| ps.host));
            if host {
                continue;
            }
            deliver(&conn, population.clone());
            deliver(&conn, status.clone());
        }
    }

    /// Players in lobby and in game for the family of `vers`.
    pub fn server_status(&self, vers: &str) -> LobbyResult<Record> {
        let family = self.config().related_vers(vers);
        let in_game: HashSet<PersonaId> = self
            .store()
            .active_memberships()?
            .into_iter()
            .map(|m| m.persona_id)
            .collect();
        let (mut lobby, mut game) = (0, 0);
        for session in self.store().active_persona_sessions()? {
            if !family.contains(&session.vers) || session.host {
                continue;
            }
            if in_game.contains(&session.persona_id) {
                game += 1;
            } else {
                lobby += 1;
            }
        }
        Ok(Record::new(broadcasts::SERVER_STATUS)
            .with("UIL", lobby.to_string())
            .with("UIG", game.to_string())
            .with("UIR", "0")
            .with("GIP", "0")
            .with("GCR", "0")
            .with("GCM", "0"))
    }

    pub fn send_server_status(&self, conn: &Connection) {
        let Some(vers) = conn.vers() else {
            return;
        };
        match self.server_status(&vers) {
            Ok(status) => deliver(conn, status),
            Err(e) => warn!("Could not compute server status for {}: {}", vers, e),
        }
    }

    pub fn remove_game_from_room(&self, game: &Game, initiator: Option<ConnectionId>) {
        if let Some(room_id) = self.rooms().room_id_for_vers(&game.vers) {
            self.rooms().remove_game(room_id, game.id);
            self.broadcast_game_removal(game, initiator);
        }
    }

    /// Tells every connection of the title that `game` is gone. Peers other
    /// than the initiator that are not busy in another game also get a
    /// membership refresh.
    pub fn broadcast_game_removal(&self, game: &Game, initiator: Option<ConnectionId>) {
        let ident = game.public_id().to_string();
        let family = self.config().related_vers(&game.vers);
        for conn in self.registry().by_titles(&family) {
            deliver(
                &conn,
                Record::new(broadcasts::GAME_REMOVED).with("IDENT", ident.clone()),
            );
            if Some(conn.id()) == initiator {
                continue;
            }
            let current = match conn.persona() {
                Some(persona) => self.store().active_membership_of(persona.id),
                None => Ok(None),
            };
            match current {
                Ok(None) => {}
                Ok(Some(membership)) if membership.game_id == game.id => {}
                Ok(Some(_)) => continue,
                Err(e) => {
                    warn!("Membership lookup failed for connection {}: {}", conn.id(), e);
                    continue;
                }
            }
            deliver(
                &conn,
                Record::new(broadcasts::GAME_MEMBERS_REMOVED).with("IDENT", ident.clone()),
            );
        }
    }

    /// Chat: game members when the sender is in a game, otherwise every
    /// connection of the title that is not in a game.
    pub fn route_chat(&self, conn: &Connection, request: &Record) -> LobbyResult<()> {
        deliver(conn, request.clone());
        let (Some(persona), Some(session)) = (conn.persona(), conn.persona_session()) else {
            return Ok(());
        };
        let message = Record::new(broadcasts::CHAT_DELIVERED)
            .with("F", request.get("ATTR").unwrap_or("Z"))
            .with("T", request.get("TEXT").unwrap_or_default())
            .with("N", persona.name.clone());

        if let Some(membership) = self.store().active_membership_of(persona.id)? {
            for member in self.store().active_members(membership.game_id)? {
                if let Some(peer) = self.registry().find_by_persona_session(member.persona_session_id) {
                    deliver_tabbed(&peer, message.clone());
                }
            }
            return Ok(());
        }

        for peer in self.registry().by_title(&session.vers) {
            let Some(peer_persona) = peer.persona() else {
                continue;
            };
            if self.store().active_membership_of(peer_persona.id)?.is_none() {
                deliver_tabbed(&peer, message.clone());
            }
        }
        Ok(())
    }

    /// `move`: enter the room named by `IDENT`, or leave rooms with 0.
    pub fn room_move(&self, conn: &Connection, request: &Record) -> LobbyResult<()> {
        let room_id = parse_id(request.get("IDENT"));
        self.add_persona_to_room(conn, room_id);

        let room = match self.rooms().snapshot(room_id) {
            Some(room) => room,
            None => {
                deliver(conn, request.clone());
                return Ok(());
            }
        };
        deliver(
            conn,
            Record::new(request.id.clone())
                .with("IDENT", room.id.to_string())
                .with("NAME", room.name.clone())
                .with("COUNT", room.population().to_string())
                .with("FLAGS", room.flags.clone()),
        );

        for game_id in &room.game_ids {
            if let Some(game) = self.store().find_game(*game_id)? {
                deliver(conn, self.game_record(broadcasts::GAME_ADDED, &game)?);
            }
        }

        let Some(vers) = conn.vers() else {
            return Ok(());
        };
        let own_info = self.persona_record(broadcasts::USER_PRESENCE, conn);
        for peer in self.registry().by_title(&vers) {
            let in_room = peer
                .persona()
                .is_some_and(|p| room.persona_ids.contains(&p.id) || peer.id() == conn.id());
            if !in_room {
                continue;
            }
            if let Some(info) = self.persona_record(broadcasts::USER_PRESENCE, &peer) {
                deliver(conn, info);
            }
            if peer.id() != conn.id() {
                if let Some(info) = own_info.clone() {
                    deliver(&peer, info);
                }
            }
        }
        Ok(())
    }

    /// `rcat`: the client is browsing categories, so it is out of any room.
    pub fn room_category(&self, conn: &Connection, request: &Record) {
        deliver(conn, request.clone());
        if let Some(vers) = conn.vers() {
            self.remove_persona_from_room(&vers, conn);
        }
        self.room_info(conn);
    }

    /// `+rom` for the title's room.
    pub fn room_info(&self, conn: &Connection) {
        let Some(room) = conn
            .vers()
            .and_then(|vers| self.rooms().room_id_for_vers(&vers))
            .and_then(|id| self.rooms().snapshot(id))
        else {
            return;
        };
        deliver(
            conn,
            Record::new(broadcasts::ROOM_INFO)
                .with("I", room.id.to_string())
                .with("N", room.name.clone())
                .with("D", room.name.clone())
                .with("T", room.population().to_string())
                .with("L", ROOM_CAPACITY),
        );
    }
}
