//! Routes inbound records to their handlers and turns handler errors into
//! protocol replies.

use crate::connection::Connection;
use crate::error::{LobbyError, LobbyResult};
use crate::{deliver, Lobby};
use log::{debug, error, warn};
use shared::{commands, Record};
use std::sync::Arc;

impl Lobby {
    /// Handles one inbound record from `conn`. Never fails: errors are
    /// answered on the connection and logged.
    pub fn handle(&self, conn: &Arc<Connection>, request: Record) {
        debug!("Connection {} sent {}", conn.id(), request.command());
        if let Err(e) = self.route(conn, &request) {
            self.reply_error(conn, &request, e);
        }
    }

    fn route(&self, conn: &Arc<Connection>, request: &Record) -> LobbyResult<()> {
        match request.command() {
            commands::AUTH => self.authenticate(conn, request),
            commands::PERSONA_SELECT => self.select_persona(conn, request),
            commands::GAME_SEARCH => self.game_search(conn, request),
            commands::GAME_LIST => self.game_list(conn, request),
            commands::GAME_CREATE => self.game_create(conn, request),
            commands::GAME_JOIN => self.game_join(conn, request),
            commands::GAME_SPAWN_CREATE => self.game_spawn_create(conn, request),
            commands::GAME_SPAWN_STATUS => self.game_spawn_status(conn, request),
            commands::GAME_START => self.game_start(conn, request),
            commands::GAME_SET_PARAMS => self.game_set_params(conn, request),
            commands::GAME_LEAVE => self.game_leave(conn, request),
            commands::GAME_DELETE => self.game_delete(conn, request),
            commands::GAME_GET_INFO => self.game_get_info(conn, request),
            commands::ROOM_MOVE => self.room_move(conn, request),
            commands::ROOM_CATEGORY => {
                self.room_category(conn, request);
                Ok(())
            }
            commands::ROOM_INFO => {
                self.room_info(conn);
                Ok(())
            }
            commands::CHAT_MESSAGE => self.route_chat(conn, request),
            commands::RANK_REPORT => self.rank_report(conn, request),
            commands::PING => Ok(()),
            other => {
                debug!("Ignoring unknown command {:?} from connection {}", other, conn.id());
                Ok(())
            }
        }
    }

    fn reply_error(&self, conn: &Connection, request: &Record, err: LobbyError) {
        match err.status() {
            Some(status) => {
                warn!(
                    "{} from connection {} refused: {}",
                    request.command(),
                    conn.id(),
                    err
                );
                deliver(conn, Record::with_status(request.command(), status));
            }
            None => {
                if matches!(err, LobbyError::Store(_)) {
                    error!("{} from connection {} failed: {}", request.command(), conn.id(), err);
                } else {
                    warn!("{} from connection {} ignored: {}", request.command(), conn.id(), err);
                }
                deliver(conn, Record::new(request.command()));
            }
        }
    }
}
