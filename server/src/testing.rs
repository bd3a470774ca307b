//! In-process test harness.
//!
//! Drives a [`Lobby`] without sockets: each [`TestClient`] owns a registered
//! [`Connection`] and the receiving end of its outbound queue. Used by the
//! unit tests of this crate and by the workspace integration tests.

use crate::config::{AccountSeed, ServerConfig, TitleConfig, Timings};
use crate::connection::Connection;
use crate::stats::NoStats;
use crate::store::MemoryStore;
use crate::utils::ManualClock;
use crate::Lobby;
use chrono::{TimeZone, Utc};
use shared::{commands, Frame, Record};
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Peer-to-peer title with a lobby room; no joining once started.
pub const P2P_VERS: &str = "NHL07";
/// Dedicated-host title whose host rotates maps.
pub const ROTATION_VERS: &str = "MOHH";
/// Version string used by the dedicated hosts of [`ROTATION_VERS`].
pub const ROTATION_HOST_VERS: &str = "MOHH-UHS";
/// Dedicated-host title without map rotation.
pub const DEDICATED_VERS: &str = "MOHH2";

/// Address refused by the identity store.
pub const BLACKLISTED_IP: &str = "10.9.9.9";
pub const PASSWORD: &str = "pass";

pub fn test_config() -> ServerConfig {
    let account = |name: &str, persona: &str| AccountSeed {
        name: name.to_string(),
        pass: PASSWORD.to_string(),
        loc: "enUS".to_string(),
        mail: Some(format!("{}@example.com", name)),
        banned: false,
        personas: vec![persona.to_string()],
    };
    let mut banned = account("banned", "Banned");
    banned.banned = true;

    ServerConfig {
        titles: vec![
            TitleConfig {
                vers: P2P_VERS.to_string(),
                dedicated_vers: None,
                p2p: true,
                midgame_join: false,
                map_rotation: false,
                auto_room: true,
            },
            TitleConfig {
                vers: ROTATION_VERS.to_string(),
                dedicated_vers: Some(ROTATION_HOST_VERS.to_string()),
                p2p: false,
                midgame_join: true,
                map_rotation: true,
                auto_room: false,
            },
            TitleConfig {
                vers: DEDICATED_VERS.to_string(),
                dedicated_vers: None,
                p2p: false,
                midgame_join: true,
                map_rotation: false,
                auto_room: false,
            },
        ],
        timings: Timings::default(),
        accounts: vec![
            account("alice", "Alice"),
            account("bob", "Bob"),
            account("carol", "Carol"),
            account("dave", "Dave"),
            account("erin", "Erin"),
            account("frank", "Frank"),
            account("host", "Host"),
            account("gps", "GPS"),
            account("ghost", "Ghost"),
            banned,
        ],
        blacklist: vec![BLACKLISTED_IP.to_string()],
    }
}

/// Lobby over a seeded [`MemoryStore`] and a [`ManualClock`].
pub struct Harness {
    pub lobby: Lobby,
    pub store: Arc<MemoryStore>,
    pub clock: Arc<ManualClock>,
    next_port: AtomicU16,
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ServerConfig) -> Self {
        let store = Arc::new(MemoryStore::seeded(&config.accounts, &config.blacklist));
        let start = Utc.with_ymd_and_hms(2007, 3, 1, 12, 0, 0).single().unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        store.delete_persona("Ghost", start);
        let lobby = Lobby::new(
            config,
            store.clone(),
            store.clone(),
            Arc::new(NoStats),
            clock.clone(),
        );
        Self {
            lobby,
            store,
            clock,
            next_port: AtomicU16::new(30000),
        }
    }

    /// Registers a new connection from a local address.
    pub fn connect(&self) -> TestClient {
        self.connect_from("127.0.0.1")
    }

    pub fn connect_from(&self, ip: &str) -> TestClient {
        let ip: IpAddr = ip.parse().unwrap_or(IpAddr::from([127, 0, 0, 1]));
        let addr = SocketAddr::new(ip, self.next_port.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        let conn = Arc::new(Connection::new(self.lobby.registry().next_id(), addr, tx));
        self.lobby.registry().register(Arc::clone(&conn));
        TestClient {
            lobby: self.lobby.clone(),
            conn,
            rx,
        }
    }

    /// Connects, authenticates for `vers` and selects `persona`, then drops
    /// everything received so far.
    pub fn login(&self, account: &str, persona: &str, vers: &str) -> TestClient {
        let mut client = self.connect();
        client.login(account, persona, vers);
        client.drain();
        client
    }

    /// Moves the store clock.
    pub fn advance_clock(&self, by: chrono::Duration) {
        self.clock.advance(by);
    }
}

/// One simulated client.
pub struct TestClient {
    pub lobby: Lobby,
    pub conn: Arc<Connection>,
    rx: mpsc::UnboundedReceiver<Frame>,
}

impl TestClient {
    pub fn send(&self, request: Record) {
        self.lobby.handle(&self.conn, request);
    }

    pub fn login(&mut self, account: &str, persona: &str, vers: &str) {
        self.send(
            Record::new(commands::AUTH)
                .with("NAME", account)
                .with("PASS", PASSWORD)
                .with("VERS", vers)
                .with("SLUS", "BASLUS-00000"),
        );
        self.send(Record::new(commands::PERSONA_SELECT).with("PERS", persona));
    }

    /// Everything queued for this client so far.
    pub fn drain_frames(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    pub fn drain(&mut self) -> Vec<Record> {
        self.drain_frames().into_iter().map(|f| f.record).collect()
    }

    pub fn drain_ids(&mut self) -> Vec<String> {
        self.drain().into_iter().map(|r| r.id).collect()
    }

    /// First queued record with the given id; drains the queue.
    pub fn find(&mut self, id: &str) -> Option<Record> {
        self.drain().into_iter().find(|r| r.id == id)
    }

    /// Simulates the transport closing.
    pub fn disconnect(&self) {
        self.conn.close();
        self.lobby.connection_closed(&self.conn);
    }

    /// Drops the socket without the close handler running, as a crashed
    /// network task would.
    pub fn vanish(&self) {
        self.conn.close();
    }

    pub fn persona_id(&self) -> Option<u64> {
        self.conn.persona().map(|p| p.id)
    }
}

/// Lets deferred tasks run. Use with a paused runtime.
pub async fn settle(by: Duration) {
    tokio::time::sleep(by).await;
}
