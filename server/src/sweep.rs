//! Reconciliation of orphaned sessions, memberships and games.
//!
//! The sweep compares the store against the live registry and closes whatever
//! no connection backs anymore. It runs periodically and is idempotent.

use crate::error::LobbyResult;
use crate::Lobby;
use log::{debug, info};
use std::collections::{BTreeSet, HashSet};

/// What one sweep closed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted_connections: usize,
    pub ended_games: usize,
    pub ended_memberships: usize,
    pub ended_sessions: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == SweepReport::default()
    }
}

impl Lobby {
    /// Ends every game, membership and persona session left open by a
    /// previous run. Called at startup and shutdown.
    pub fn close_leftovers(&self) -> LobbyResult<()> {
        let leftovers = self.store().close_leftovers(self.now())?;
        info!(
            "Closed {} games, {} game connections and {} persona sessions left open",
            leftovers.games, leftovers.memberships, leftovers.persona_sessions
        );
        Ok(())
    }

    pub fn sweep(&self) -> LobbyResult<SweepReport> {
        let mut report = SweepReport {
            evicted_connections: self.registry().sweep_closed().len(),
            ..SweepReport::default()
        };
        let live = self.registry().active_ids();

        self.sweep_memberships(&live, &mut report)?;
        self.sweep_persona_sessions(&live, &mut report)?;
        self.sweep_idle_games(&mut report)?;

        if report.is_empty() {
            debug!("Sweep found nothing to close");
        } else {
            info!("Sweep closed {:?}", report);
        }
        Ok(report)
    }

    /// Memberships whose persona session is gone or has no live connection.
    fn sweep_memberships(&self, live: &HashSet<u64>, report: &mut SweepReport) -> LobbyResult<()> {
        for membership in self.store().active_memberships()? {
            let orphaned = match self.store().find_persona_session(membership.persona_session_id)? {
                Some(session) => !session.is_active() || !live.contains(&session.connection_id),
                None => true,
            };
            if !orphaned {
                continue;
            }
            let Some(game) = self.store().find_game(membership.game_id)? else {
                continue;
            };

            if membership.host {
                let ended = self.store().end_game(game.id, self.now())?;
                if ended.is_empty() {
                    continue;
                }
                info!("Game {} ({}) lost its host", game.id, game.name);
                report.ended_games += 1;
                report.ended_memberships += ended.len();
                if self.config().is_p2p(&game.vers) {
                    self.remove_game_from_room(&game, None);
                }
                continue;
            }

            if !self.store().end_membership(membership.id, self.now())? {
                continue;
            }
            debug!("Ended orphaned game connection {}", membership.id);
            report.ended_memberships += 1;
            if self.config().is_p2p(&game.vers) {
                self.broadcast_game_update(&game)?;
            } else {
                self.update_host_info(&game)?;
            }
        }
        Ok(())
    }

    /// Persona sessions whose connection is no longer registered.
    fn sweep_persona_sessions(&self, live: &HashSet<u64>, report: &mut SweepReport) -> LobbyResult<()> {
        let mut touched = BTreeSet::new();
        for session in self.store().active_persona_sessions()? {
            if live.contains(&session.connection_id) {
                continue;
            }
            if !self.store().end_persona_session(session.id, self.now())? {
                continue;
            }
            debug!("Ended orphaned persona session {}", session.id);
            report.ended_sessions += 1;

            let still_active = !self.store().active_persona_sessions_of(session.persona_id)?.is_empty();
            if !still_active {
                if let Some(room) = self.rooms().room_of_persona(session.persona_id) {
                    self.rooms().remove_persona(room.id, session.persona_id);
                }
            }
            touched.insert(session.vers);
        }
        for vers in touched {
            self.broadcast_population(&vers);
        }
        Ok(())
    }

    /// Dedicated-host games nobody plays in and nobody hosts, idle for longer
    /// than the grace period.
    fn sweep_idle_games(&self, report: &mut SweepReport) -> LobbyResult<()> {
        let cutoff = self.now() - self.timings().idle_game_grace();
        let dedicated: Vec<String> = self
            .config()
            .titles
            .iter()
            .filter(|t| !t.p2p)
            .flat_map(|t| t.family())
            .collect();

        for game in self.store().open_games(&dedicated)? {
            if game.start_time > cutoff {
                continue;
            }
            let memberships = self.store().memberships_of_game(game.id)?;
            if memberships.iter().any(|m| m.host || m.is_active()) {
                continue;
            }
            let last_left = memberships.iter().filter_map(|m| m.end_time).max();
            if last_left.is_some_and(|t| t > cutoff) {
                continue;
            }
            self.store().end_game(game.id, self.now())?;
            info!("Closed idle game {} ({})", game.id, game.name);
            report.ended_games += 1;
        }
        Ok(())
    }
}
