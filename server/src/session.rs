//! Authentication, persona selection and session teardown.

use crate::connection::Connection;
use crate::error::{LobbyError, LobbyResult};
use crate::model::{NewPersonaSession, PersonaSession, TitleBinding};
use crate::utils::{session_key, strip_host_marker};
use crate::{deliver, Lobby};
use log::{error, info, warn};
use shared::{broadcasts, Record};
use std::sync::Arc;

impl Lobby {
    /// `auth`: resolves the account and binds the requested title.
    pub fn authenticate(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        let (name, _) = strip_host_marker(request.get("NAME").unwrap_or_default());
        let pass = request.get("PASS").unwrap_or_default();

        if self.identity().is_blacklisted(&conn.ip())? {
            warn!("Rejected login of {} from blacklisted {}", name, conn.ip());
            return Err(LobbyError::AccessDenied);
        }
        let account = self.identity().authenticate(&name, pass)?;

        // A connection may authenticate again; its previous persona is done
        self.end_session(conn);

        let title = TitleBinding {
            vers: request.get("VERS").unwrap_or_default().to_string(),
            slus: request.get("SLUS").unwrap_or_default().to_string(),
        };
        let personas: Vec<String> = self
            .identity()
            .personas_of(account.id)?
            .into_iter()
            .filter(|p| p.deleted_on.is_none())
            .map(|p| p.name)
            .collect();

        info!(
            "Connection {} authenticated as {} for {}",
            conn.id(),
            account.name,
            title.vers
        );
        let reply = Record::new(request.id.clone())
            .with("NAME", account.name.clone())
            .with("ADDR", conn.ip())
            .with("PERSONAS", personas.join(","))
            .with("LOC", account.loc.clone())
            .with("MAIL", account.mail.clone().unwrap_or_default())
            .with("SPAM", "NN");
        conn.with_state(|s| {
            s.account = Some(account);
            s.title = Some(title);
        });
        deliver(conn, reply);
        Ok(())
    }

    /// `pers`: binds a persona and opens its persona session.
    pub fn select_persona(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        let (account, title) = match (conn.account(), conn.title()) {
            (Some(account), Some(title)) => (account, title),
            _ => return Err(LobbyError::State("persona selected before authentication")),
        };
        let requested = request.get("PERS").unwrap_or_default();
        let (name, dedicated) = strip_host_marker(requested);

        let persona = self
            .identity()
            .find_persona_by_name(&name)?
            .filter(|p| p.account_id == account.id)
            .ok_or_else(|| LobbyError::UnknownPersona(name.clone()))?;
        if persona.deleted_on.is_some() {
            return Err(LobbyError::PersonaLocked(name));
        }

        self.end_session(conn);
        let now = self.now();
        let opened = self.store().open_persona_session(NewPersonaSession {
            persona_id: persona.id,
            persona_name: persona.name.clone(),
            connection_id: conn.id(),
            address: conn.ip(),
            vers: title.vers.clone(),
            slus: title.slus.clone(),
            host: dedicated,
            start_time: now,
        })?;
        // Dedicated-host sessions of the persona are never replaced
        for stale in opened.replaced {
            self.evict_persona_session(conn, stale);
        }
        let session = opened.session;
        let lkey = session_key(conn.id());
        info!(
            "Connection {} selected persona {} (session {})",
            conn.id(),
            persona.name,
            session.id
        );

        let reply = Record::new(request.id.clone())
            .with("PERS", requested)
            .with("LKEY", lkey.clone())
            .with("EX-ticker", "")
            .with("LOC", account.loc.clone())
            .with("A", conn.ip())
            .with("LA", conn.ip())
            .with("IDLE", "100000");
        conn.with_state(|s| {
            s.persona = Some(persona);
            s.persona_session = Some(session);
            s.lkey = Some(lkey);
            s.dedicated_host = dedicated;
        });
        deliver(conn, reply);

        if self.config().requires_room(&title.vers) {
            if let Some(room_id) = self.rooms().room_id_for_vers(&title.vers) {
                self.add_persona_to_room(conn, room_id);
            }
            self.who(conn);
        }
        self.room_info(conn);
        Ok(())
    }

    /// Disconnects the holder of a persona session replaced by a newer one
    /// for the same persona.
    fn evict_persona_session(&self, requester: &Connection, stale: PersonaSession) {
        warn!(
            "Persona {} already active in session {}, evicting",
            stale.persona_name, stale.id
        );
        let Some(holder) = self
            .registry()
            .get(stale.connection_id)
            .filter(|holder| holder.id() != requester.id())
        else {
            return;
        };
        holder.cancel_search();
        if let Err(e) = self.leave_current_game(&holder) {
            error!("Could not leave game for connection {}: {}", holder.id(), e);
        }
        self.end_session(&holder);
        holder.close();
    }

    /// Ends the connection's persona session, if any, and takes the persona
    /// out of its room. Safe to call on any connection, any number of times.
    pub fn end_session(&self, conn: &Connection) {
        let Some(session) = conn.persona_session() else {
            return;
        };
        match self.store().end_persona_session(session.id, self.now()) {
            Ok(true) => info!("Persona session {} ended", session.id),
            Ok(false) => {}
            Err(e) => error!("Could not end persona session {}: {}", session.id, e),
        }
        self.remove_persona_from_room(&session.vers, conn);
        conn.with_state(|s| {
            s.persona_session = None;
            s.persona = None;
            s.lkey = None;
            s.dedicated_host = false;
        });
    }

    /// Transport close: unregister, stop matchmaking, leave the current game
    /// and end the persona session.
    pub fn connection_closed(&self, conn: &Arc<Connection>) {
        self.registry().unregister(conn.id());
        conn.cancel_search();
        if let Err(e) = self.leave_current_game(conn) {
            error!("Could not leave game for connection {}: {}", conn.id(), e);
        }
        self.end_session(conn);
    }

    /// `+who` for the connection's own persona.
    pub fn who(&self, conn: &Connection) {
        if let Some(info) = self.persona_record(broadcasts::WHO, conn) {
            deliver(conn, info);
        }
    }

    /// `+usr` describing `subject`, sent to `target`.
    pub fn usr(&self, target: &Connection, subject: &Connection) {
        if let Some(info) = self.persona_record(broadcasts::USER_PRESENCE, subject) {
            deliver(target, info);
        }
    }
}
