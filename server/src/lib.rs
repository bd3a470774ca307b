//! # Lobby Server Library
//!
//! This library implements the session, matchmaking and room broadcast core of
//! a console-era game lobby. Clients speak a framed key/value protocol (see the
//! `shared` crate); every inbound command is routed to the [`Lobby`], which
//! mutates connection, room and game state and answers one or many peers.
//!
//! ## Core Responsibilities
//!
//! ### Connection Tracking
//! Every accepted socket gets an opaque connection id and a [`connection::Connection`]
//! holding its protocol state. The [`registry::ConnectionRegistry`] is the only
//! owner of those records and resolves peers by id, persona session or title.
//!
//! ### Sessions and Rooms
//! Authentication, persona selection and room membership move a connection from
//! anonymous to identified to in-room. One room exists per configured title
//! family and population changes are pushed to every peer of that title.
//!
//! ### Games and Matchmaking
//! Games are created, joined, searched for, started, rotated and torn down by
//! the game match engine. Games and their memberships always change together
//! in the [`store::Store`] before anything is broadcast.
//!
//! ## Architecture Design
//!
//! ### One Task per Connection
//! Commands from one connection are handled sequentially by that connection's
//! network task. Different connections run concurrently and share the registry,
//! the room directory and the store.
//!
//! ### Cancellable Background Work
//! The matchmaking poller is the only long-lived task a connection may own.
//! Settle, rotation and provisioning delays are scheduled one-shot tasks that
//! tolerate the connection being gone by the time they run.
//!
//! ## Module Organization
//!
//! - `config`: title catalog, timings and seed data
//! - `connection` / `registry`: live connections and their state
//! - `rooms`: room directory, population and chat routing
//! - `session`: authentication, persona selection and teardown
//! - `games`: the game state machine and matchmaking
//! - `sweep`: reconciliation of orphaned sessions and games
//! - `info`: protocol projections of personas and games
//! - `dispatch`: command routing and error replies
//! - `network`: TCP accept loop and per-connection tasks
//! - `store` / `stats`: external collaborators and their in-memory backends

pub mod config;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod games;
pub mod info;
pub mod model;
pub mod network;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod stats;
pub mod store;
pub mod sweep;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod utils;

use config::{ServerConfig, Timings};
use connection::Connection;
use log::error;
use registry::ConnectionRegistry;
use rooms::RoomDirectory;
use shared::Record;
use stats::{NoStats, StatsEngine};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use store::{IdentityStore, MemoryStore, Store};
use utils::{Clock, SystemClock, Timestamp};

/// Shared handle to the lobby state. Cloning is cheap.
#[derive(Clone)]
pub struct Lobby {
    inner: Arc<LobbyInner>,
}

struct LobbyInner {
    config: ServerConfig,
    registry: ConnectionRegistry,
    rooms: RoomDirectory,
    store: Arc<dyn Store>,
    identity: Arc<dyn IdentityStore>,
    stats: Arc<dyn StatsEngine>,
    clock: Arc<dyn Clock>,
}

impl Lobby {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn Store>,
        identity: Arc<dyn IdentityStore>,
        stats: Arc<dyn StatsEngine>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let rooms = RoomDirectory::from_catalog(&config.titles);
        Self {
            inner: Arc::new(LobbyInner {
                config,
                registry: ConnectionRegistry::new(),
                rooms,
                store,
                identity,
                stats,
                clock,
            }),
        }
    }

    /// Lobby backed by a [`MemoryStore`] seeded from the configuration.
    pub fn in_memory(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::seeded(&config.accounts, &config.blacklist));
        Self::new(
            config,
            store.clone(),
            store,
            Arc::new(NoStats),
            Arc::new(SystemClock),
        )
    }

    pub fn config(&self) -> &ServerConfig {
        &self.inner.config
    }

    pub fn timings(&self) -> &Timings {
        &self.inner.config.timings
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.inner.registry
    }

    pub fn rooms(&self) -> &RoomDirectory {
        &self.inner.rooms
    }

    pub fn store(&self) -> &dyn Store {
        self.inner.store.as_ref()
    }

    pub fn identity(&self) -> &dyn IdentityStore {
        self.inner.identity.as_ref()
    }

    pub fn stats(&self) -> &dyn StatsEngine {
        self.inner.stats.as_ref()
    }

    pub fn now(&self) -> Timestamp {
        self.inner.clock.now()
    }

    /// Runs `action` once after `delay`. Not cancellable and never retried.
    pub(crate) fn defer<F, Fut>(&self, delay: Duration, action: F)
    where
        F: FnOnce(Lobby) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let lobby = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            action(lobby).await;
        });
    }
}

/// Sends to one peer. Failures are logged and never abort a broadcast.
pub(crate) fn deliver(conn: &Connection, record: Record) {
    if let Err(e) = conn.send(record) {
        error!("Failed to send to connection {}: {}", conn.id(), e);
    }
}

pub(crate) fn deliver_tabbed(conn: &Connection, record: Record) {
    if let Err(e) = conn.send_tabbed(record) {
        error!("Failed to send to connection {}: {}", conn.id(), e);
    }
}
