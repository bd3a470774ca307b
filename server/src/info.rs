//! Protocol projections of games and personas.

use crate::connection::Connection;
use crate::error::LobbyResult;
use crate::model::Game;
use crate::utils::format_when;
use crate::Lobby;
use log::error;
use rand::Rng;
use shared::Record;
use std::sync::Arc;

/// Placeholder host advertised when a dedicated game has no host connected.
pub const PLACEHOLDER_HOST: &str = "@brobot1";

impl Lobby {
    /// Connection of the game's active host member, if it is still online.
    pub fn host_connection(&self, game: &Game) -> LobbyResult<Option<Arc<Connection>>> {
        let host = self
            .store()
            .active_members(game.id)?
            .into_iter()
            .find(|m| m.host);
        Ok(host.and_then(|m| self.registry().find_by_persona_session(m.persona_session_id)))
    }

    /// Game info fields under the given record id (`+agm`, `+mgm`, `+ses`,
    /// `gget`, `gcre`, `gjoi`).
    pub fn game_record(&self, id: &str, game: &Game) -> LobbyResult<Record> {
        let p2p = self.config().is_p2p(&game.vers);
        let members = self.store().active_members(game.id)?;
        let host = self.host_connection(game)?;

        let host_name = match host.as_ref().and_then(|conn| conn.persona()) {
            Some(persona) if p2p => persona.name,
            Some(persona) => format!("@{}", persona.name),
            None => PLACEHOLDER_HOST.to_string(),
        };
        let count = members.len() + usize::from(host.is_none());
        let seed: u32 = rand::thread_rng().gen_range(1..=u16::MAX as u32);

        let mut record = Record::new(id)
            .with("IDENT", game.public_id().to_string())
            .with("NAME", game.name.clone())
            .with("HOST", host_name)
            .with("PARAMS", game.params.clone())
            .with("PLATPARAMS", "0")
            .with("ROOM", game.room_id.unwrap_or(0).to_string())
            .with("SYSFLAGS", game.public_sysflags())
            .with("COUNT", count.to_string())
            .with("PRIV", "0")
            .with("MINSIZE", game.minsize.to_string())
            .with("MAXSIZE", game.maxsize.to_string())
            .with("NUMPART", "1")
            .with("SEED", seed.to_string())
            .with("WHEN", format_when(&game.start_time))
            .with("SESS", "0");

        let mut idx = 0;
        if host.is_none() {
            record.push(format!("OPID{}", idx), "0");
            record.push(format!("OPPO{}", idx), PLACEHOLDER_HOST);
            record.push(format!("ADDR{}", idx), "127.0.0.1");
            record.push(format!("LADDR{}", idx), "127.0.0.1");
            idx += 1;
        }
        for member in members {
            let Some(session) = self.store().find_persona_session(member.persona_session_id)? else {
                error!("Membership {} points at a missing persona session", member.id);
                continue;
            };
            let prefix = if !p2p && member.host { "@" } else { "" };
            let flags = self
                .registry()
                .find_by_persona_session(session.id)
                .map(|conn| conn.userflags())
                .unwrap_or_else(|| "0".to_string());
            record.push(format!("OPID{}", idx), member.persona_id.to_string());
            record.push(format!("OPPO{}", idx), format!("{}{}", prefix, session.persona_name));
            record.push(format!("ADDR{}", idx), session.address.clone());
            record.push(format!("LADDR{}", idx), session.address);
            record.push(format!("OPFLAG{}", idx), flags);
            idx += 1;
        }
        Ok(record)
    }

    /// Persona presence fields (`+who`, `+usr`). `None` until a persona is
    /// selected.
    pub fn persona_record(&self, id: &str, conn: &Connection) -> Option<Record> {
        let (account, persona, session, dedicated) = conn.with_state(|s| {
            (
                s.account.clone(),
                s.persona.clone(),
                s.persona_session.clone(),
                s.dedicated_host,
            )
        });
        let (account, persona, session) = (account?, persona?, session?);

        let (stats, rank) = self.stats().stats_and_rank(&persona.name, &session.vers);
        let game_id = match self.current_game(persona.id) {
            Ok(game) => game.map(|g| g.public_id()).unwrap_or(0),
            Err(e) => {
                error!("Game lookup failed for persona {}: {}", persona.name, e);
                0
            }
        };
        let prefix = if dedicated { "@" } else { "" };
        let room = self.rooms().room_of_persona(persona.id);
        let ip = conn.ip();

        Some(
            Record::new(id)
                .with("I", account.id.to_string())
                .with("M", format!("{}{}", prefix, account.name))
                .with("N", format!("{}{}", prefix, persona.name))
                .with("F", "U")
                .with("P", "80")
                .with("S", stats)
                .with("X", "0")
                .with("G", game_id.to_string())
                .with("R", rank)
                .with("RP", persona.rp.to_string())
                .with("LO", account.loc.clone())
                .with("A", ip.clone())
                .with("LA", ip)
                .with("RI", room.as_ref().map(|r| r.id).unwrap_or(0).to_string())
                .with(
                    "RT",
                    room.as_ref().map(|r| r.population()).unwrap_or(0).to_string(),
                )
                .with(
                    "RM",
                    room.as_ref().map(|r| r.name.clone()).unwrap_or_else(|| "room".to_string()),
                )
                .with(
                    "RF",
                    room.as_ref().map(|r| r.flags.clone()).unwrap_or_else(|| "CK".to_string()),
                ),
        )
    }

    /// The open game holding the persona's active membership.
    pub fn current_game(&self, persona_id: u64) -> LobbyResult<Option<Game>> {
        let Some(membership) = self.store().active_membership_of(persona_id)? else {
            return Ok(None);
        };
        Ok(self
            .store()
            .find_game(membership.game_id)?
            .filter(Game::is_open))
    }
}
