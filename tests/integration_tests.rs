//! Integration tests for the lobby server core
//!
//! These tests drive the lobby through its command surface and check both the
//! replies and the persisted state. Time is paused so deferred broadcasts and
//! the matchmaking poller run deterministically.

use server::store::Store;
use server::testing::{
    settle, Harness, TestClient, BLACKLISTED_IP, DEDICATED_VERS, P2P_VERS, PASSWORD,
    ROTATION_HOST_VERS, ROTATION_VERS,
};
use shared::{broadcasts, commands, Record};
use std::time::Duration;

fn ident(record: &Record) -> u64 {
    record.get("IDENT").unwrap().parse().unwrap()
}

/// Creates a game and returns its public id.
fn create(client: &mut TestClient, name: &str, maxsize: u32) -> u64 {
    client.send(
        Record::new(commands::GAME_CREATE)
            .with("NAME", name)
            .with("PARAMS", "1,2,3")
            .with("MINSIZE", "1")
            .with("MAXSIZE", maxsize.to_string()),
    );
    let reply = client.find(commands::GAME_CREATE).expect("gcre reply");
    ident(&reply)
}

fn join(client: &TestClient, game: u64) {
    client.send(Record::new(commands::GAME_JOIN).with("IDENT", game.to_string()));
}

fn active_count(harness: &Harness, game: u64) -> usize {
    harness.store.active_members(game).unwrap().len()
}

/// SESSION LIFECYCLE TESTS
mod session_tests {
    use super::*;

    /// Tests that login binds the persona and puts it in the title's room
    #[tokio::test(start_paused = true)]
    async fn login_binds_persona_and_room() {
        let harness = Harness::new();
        let mut alice = harness.connect();
        alice.login("alice", "Alice", P2P_VERS);

        let replies = alice.drain();
        let auth = replies.iter().find(|r| r.id == commands::AUTH).unwrap();
        assert_eq!(auth.get("NAME"), Some("alice"));
        assert_eq!(auth.get("PERSONAS"), Some("Alice"));

        let pers = replies.iter().find(|r| r.id == commands::PERSONA_SELECT).unwrap();
        assert_eq!(pers.get("PERS"), Some("Alice"));
        assert_eq!(pers.get("LKEY").map(str::len), Some(64));
        assert!(replies.iter().any(|r| r.id == broadcasts::WHO));
        assert!(replies.iter().any(|r| r.id == broadcasts::ROOM_INFO));

        let room = harness.lobby.rooms().room_of_persona(alice.persona_id().unwrap());
        assert_eq!(room.map(|r| r.population()), Some(1));
    }

    /// Tests the authentication refusals and their status suffixes
    #[tokio::test(start_paused = true)]
    async fn authentication_refusals() {
        let harness = Harness::new();
        let mut client = harness.connect();

        let auth = |name: &str, pass: &str| {
            Record::new(commands::AUTH)
                .with("NAME", name)
                .with("PASS", pass)
                .with("VERS", P2P_VERS)
        };
        client.send(auth("alice", "nope"));
        client.send(auth("nobody", PASSWORD));
        client.send(auth("banned", PASSWORD));
        assert_eq!(client.drain_ids(), vec!["authpass", "authimst", "authblak"]);

        let mut outsider = harness.connect_from(BLACKLISTED_IP);
        outsider.send(auth("alice", PASSWORD));
        assert_eq!(outsider.drain_ids(), vec!["authblak"]);
    }

    /// Tests persona selection refusals
    #[tokio::test(start_paused = true)]
    async fn persona_refusals() {
        let harness = Harness::new();
        let mut ghost = harness.connect();
        ghost.send(Record::new(commands::PERSONA_SELECT).with("PERS", "Ghost"));
        assert_eq!(ghost.drain_ids(), vec!["pers"]);

        ghost.login("ghost", "Ghost", P2P_VERS);
        let ids = ghost.drain_ids();
        assert_eq!(ids.last().map(String::as_str), Some("perslock"));

        ghost.send(Record::new(commands::PERSONA_SELECT).with("PERS", "Alice"));
        assert_eq!(ghost.drain_ids(), vec!["persnfnd"]);
    }

    /// Tests that selecting an active persona elsewhere evicts the holder
    #[tokio::test(start_paused = true)]
    async fn persona_selected_twice_evicts_first_holder() {
        let harness = Harness::new();
        let first = harness.login("alice", "Alice", P2P_VERS);
        let persona = first.persona_id().unwrap();

        let second = harness.login("alice", "Alice", P2P_VERS);

        assert!(!first.conn.is_open());
        assert!(first.conn.persona().is_none());
        let active = harness.store.active_persona_sessions_of(persona).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].connection_id, second.conn.id());
    }

    /// Tests that closing the transport ends the session and empties the room
    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_session() {
        let harness = Harness::new();
        let alice = harness.login("alice", "Alice", P2P_VERS);
        let mut bob = harness.login("bob", "Bob", P2P_VERS);
        let persona = alice.persona_id().unwrap();

        alice.disconnect();

        assert!(harness.store.active_persona_sessions_of(persona).unwrap().is_empty());
        assert!(harness.lobby.rooms().room_of_persona(persona).is_none());
        assert!(harness.lobby.registry().get(alice.conn.id()).is_none());
        let pop = bob.find(broadcasts::ROOM_POPULATION).unwrap();
        assert!(pop.get("Z").unwrap().ends_with("/1"));
    }
}

/// SCENARIO TESTS
mod scenario_tests {
    use super::*;

    /// Two creates with the same name: the second is refused
    #[tokio::test(start_paused = true)]
    async fn duplicate_game_name_rejected() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);

        create(&mut a, "Foo", 4);
        b.drain();
        b.send(Record::new(commands::GAME_CREATE).with("NAME", "Foo"));

        assert_eq!(b.drain_ids(), vec!["gcredupl"]);
        let family = vec![P2P_VERS.to_string()];
        let games: Vec<_> = harness
            .store
            .open_games(&family)
            .unwrap()
            .into_iter()
            .filter(|g| g.name == "Foo")
            .collect();
        assert_eq!(games.len(), 1);
    }

    /// A full game refuses a third member without changing its member count
    #[tokio::test(start_paused = true)]
    async fn full_game_rejects_join() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let b = harness.login("bob", "Bob", P2P_VERS);
        let mut c = harness.login("carol", "Carol", P2P_VERS);

        let game = create(&mut a, "Bar", 2);
        join(&b, game);
        assert_eq!(active_count(&harness, game), 2);

        c.drain();
        join(&c, game);
        assert_eq!(c.drain_ids(), vec!["gjoifull"]);
        assert_eq!(active_count(&harness, game), 2);
    }

    /// A cancelled search never joins, even once a game shows up
    #[tokio::test(start_paused = true)]
    async fn cancelled_search_never_joins() {
        let harness = Harness::new();
        let d = harness.login("dave", "Dave", P2P_VERS);
        let mut a = harness.login("alice", "Alice", P2P_VERS);

        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "2"));
        settle(Duration::from_millis(10)).await;
        assert!(d.conn.search_task_id().is_some());

        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "3"));
        settle(Duration::from_millis(10)).await;
        assert!(d.conn.search_task_id().is_none());

        create(&mut a, "Open", 4);
        settle(Duration::from_secs(40)).await;

        let persona = d.persona_id().unwrap();
        assert!(harness.store.active_membership_of(persona).unwrap().is_none());
    }

    /// The host vanishing without a close: the sweep ends its game
    #[tokio::test(start_paused = true)]
    async fn sweep_ends_game_of_vanished_p2p_host() {
        let harness = Harness::new();
        let mut e = harness.login("erin", "Erin", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);

        let game = create(&mut e, "Baz", 4);
        join(&b, game);
        settle(Duration::from_millis(200)).await;
        b.drain();

        e.vanish();
        let report = harness.lobby.sweep().unwrap();
        assert_eq!(report.evicted_connections, 1);
        assert_eq!(report.ended_games, 1);

        let stored = harness.store.find_game(game).unwrap().unwrap();
        assert!(stored.end_time.is_some());
        assert!(harness
            .store
            .memberships_of_game(game)
            .unwrap()
            .iter()
            .all(|m| m.end_time.is_some()));
        let room_id = harness.lobby.rooms().room_id_for_vers(P2P_VERS).unwrap();
        let room = harness.lobby.rooms().snapshot(room_id).unwrap();
        assert!(!room.game_ids.contains(&game));

        let removed = b.find(broadcasts::GAME_REMOVED).unwrap();
        assert_eq!(ident(&removed), game);
    }

    /// A dedicated host changing parameters rotates its game
    #[tokio::test(start_paused = true)]
    async fn map_rotation_replaces_game() {
        let harness = Harness::new();
        let mut f = harness.login("host", "@Host", ROTATION_HOST_VERS);
        let a = harness.login("alice", "Alice", ROTATION_VERS);
        let b = harness.login("bob", "Bob", ROTATION_VERS);

        let original = create(&mut f, "Map1", 8);
        join(&a, original);
        join(&b, original);
        assert_eq!(active_count(&harness, original), 3);

        f.send(Record::new(commands::GAME_SET_PARAMS).with("PARAMS", "next-map"));
        settle(Duration::from_secs(3)).await;

        let old = harness.store.find_game(original).unwrap().unwrap();
        assert!(old.end_time.is_some());
        assert_eq!(active_count(&harness, original), 0);

        let successor = harness.store.find_game_by_ident(original).unwrap().unwrap();
        assert_ne!(successor.id, original);
        assert_eq!(successor.original_id, Some(original));
        assert_eq!(successor.params, "next-map");
        assert!(successor.is_open());

        let members = harness.store.active_members(successor.id).unwrap();
        assert_eq!(members.len(), 3);
        assert!(members.iter().any(|m| m.host));

        f.send(Record::new(commands::GAME_SET_PARAMS).with("PARAMS", "third-map"));
        settle(Duration::from_secs(3)).await;
        let third = harness.store.find_game_by_ident(original).unwrap().unwrap();
        assert_ne!(third.id, successor.id);
        assert_eq!(third.original_id, Some(original));
        assert_eq!(active_count(&harness, third.id), 3);
    }
}

/// GAME ENGINE TESTS
mod game_tests {
    use super::*;

    /// Joining a second game ends the first membership
    #[tokio::test(start_paused = true)]
    async fn second_join_ends_first_membership() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);
        let c = harness.login("carol", "Carol", P2P_VERS);

        let first = create(&mut a, "First", 4);
        let second = create(&mut b, "Second", 4);
        join(&c, first);
        join(&c, second);

        let current = harness
            .store
            .active_membership_of(c.persona_id().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(current.game_id, second);
        assert_eq!(active_count(&harness, first), 1);
    }

    /// A P2P host leaving ends the game, a member leaving does not
    #[tokio::test(start_paused = true)]
    async fn p2p_leave_semantics() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);
        let c = harness.login("carol", "Carol", P2P_VERS);

        let game = create(&mut a, "Leave", 4);
        join(&b, game);
        join(&c, game);
        b.drain();

        b.send(Record::new(commands::GAME_LEAVE));
        assert!(b.drain_ids().contains(&"glea".to_string()));
        assert!(harness.store.find_game(game).unwrap().unwrap().is_open());
        assert_eq!(active_count(&harness, game), 2);

        a.send(Record::new(commands::GAME_LEAVE));
        assert!(!harness.store.find_game(game).unwrap().unwrap().is_open());
        assert_eq!(active_count(&harness, game), 0);
    }

    /// Starting a P2P game notifies members and closes it to late joiners
    #[tokio::test(start_paused = true)]
    async fn start_blocks_midgame_join() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);
        let mut c = harness.login("carol", "Carol", P2P_VERS);

        let game = create(&mut a, "Started", 4);
        join(&b, game);
        b.drain();

        a.send(Record::new(commands::GAME_START));
        assert!(b.find(broadcasts::GAME_SESSION_STARTED).is_some());
        assert!(harness.store.find_game(game).unwrap().unwrap().started);

        c.drain();
        join(&c, game);
        assert_eq!(c.drain_ids(), vec!["gjoiasta"]);
    }

    /// Password protected games refuse a wrong or missing password
    #[tokio::test(start_paused = true)]
    async fn password_checked_on_join() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);

        a.send(
            Record::new(commands::GAME_CREATE)
                .with("NAME", "Locked")
                .with("PASS", "secret")
                .with("MAXSIZE", "4"),
        );
        let game = ident(&a.find(commands::GAME_CREATE).unwrap());
        b.drain();

        join(&b, game);
        b.send(
            Record::new(commands::GAME_JOIN)
                .with("IDENT", game.to_string())
                .with("PASS", "guess"),
        );
        assert_eq!(b.drain_ids(), vec!["gjoipass", "gjoipass"]);

        b.send(
            Record::new(commands::GAME_JOIN)
                .with("IDENT", game.to_string())
                .with("PASS", "secret"),
        );
        assert_eq!(active_count(&harness, game), 2);
    }

    /// A waiting search joins and starts the first game that shows up
    #[tokio::test(start_paused = true)]
    async fn waiting_search_joins_when_game_appears() {
        let harness = Harness::new();
        let mut d = harness.login("dave", "Dave", P2P_VERS);
        let mut a = harness.login("alice", "Alice", P2P_VERS);

        d.drain();
        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "2"));
        assert_eq!(d.drain_ids(), vec!["gqwk"]);
        settle(Duration::from_secs(1)).await;

        let game = create(&mut a, "Quick", 4);
        settle(Duration::from_secs(16)).await;

        let membership = harness
            .store
            .active_membership_of(d.persona_id().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(membership.game_id, game);
        assert!(harness.store.find_game(game).unwrap().unwrap().started);
        assert!(d.find(broadcasts::GAME_SESSION_STARTED).is_some());
        assert!(d.conn.search_task_id().is_none());
    }

    /// A new wait-mode search replaces the running one, and the replaced
    /// poller never joins anything
    #[tokio::test(start_paused = true)]
    async fn new_search_supersedes_previous() {
        let harness = Harness::new();
        let d = harness.login("dave", "Dave", P2P_VERS);
        let mut a = harness.login("alice", "Alice", P2P_VERS);

        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "2"));
        settle(Duration::from_millis(10)).await;
        let first = d.conn.search_task_id().unwrap();

        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "2"));
        settle(Duration::from_millis(10)).await;
        let second = d.conn.search_task_id().unwrap();
        assert_ne!(first, second);

        // Only the current poller is cancelled here
        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "3"));
        settle(Duration::from_millis(10)).await;
        assert!(d.conn.search_task_id().is_none());

        let game = create(&mut a, "Later", 4);
        settle(Duration::from_secs(40)).await;

        let persona = d.persona_id().unwrap();
        assert!(harness.store.active_membership_of(persona).unwrap().is_none());
        assert_eq!(active_count(&harness, game), 1);
        assert!(!harness.store.find_game(game).unwrap().unwrap().started);
    }

    /// A game without seats is refused and leaves its name free
    #[tokio::test(start_paused = true)]
    async fn zero_capacity_create_leaves_name_free() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);

        a.send(
            Record::new(commands::GAME_CREATE)
                .with("NAME", "Zero")
                .with("MAXSIZE", "0"),
        );
        assert_eq!(a.drain_ids(), vec!["gcrefull"]);
        let family = vec![P2P_VERS.to_string()];
        assert!(harness.store.open_games(&family).unwrap().is_empty());

        harness.advance_clock(chrono::Duration::seconds(600));
        tokio_test::assert_ok!(harness.lobby.sweep());

        let game = create(&mut a, "Zero", 4);
        assert_eq!(active_count(&harness, game), 1);
    }

    /// A dedicated host leaving takes its game down with every member
    #[tokio::test(start_paused = true)]
    async fn dedicated_host_leave_ends_game() {
        let harness = Harness::new();
        let mut f = harness.login("host", "@Host", ROTATION_HOST_VERS);
        let a = harness.login("alice", "Alice", ROTATION_VERS);

        let game = create(&mut f, "Srv", 8);
        join(&a, game);
        assert_eq!(active_count(&harness, game), 2);
        f.drain();

        f.send(Record::new(commands::GAME_LEAVE));
        assert!(f.drain_ids().contains(&"glea".to_string()));
        assert!(!harness.store.find_game(game).unwrap().unwrap().is_open());
        assert_eq!(active_count(&harness, game), 0);
        assert!(harness
            .store
            .active_membership_of(a.persona_id().unwrap())
            .unwrap()
            .is_none());
    }

    /// A dedicated host deleting its game ends it for every member
    #[tokio::test(start_paused = true)]
    async fn dedicated_host_delete_ends_game() {
        let harness = Harness::new();
        let mut f = harness.login("host", "@Host", DEDICATED_VERS);
        let b = harness.login("bob", "Bob", DEDICATED_VERS);

        let game = create(&mut f, "Del", 8);
        join(&b, game);
        f.drain();

        f.send(Record::new(commands::GAME_DELETE));
        assert!(f.find(commands::GAME_DELETE).is_some());
        let stored = harness.store.find_game(game).unwrap().unwrap();
        assert!(stored.end_time.is_some());
        assert!(harness
            .store
            .memberships_of_game(game)
            .unwrap()
            .iter()
            .all(|m| m.end_time.is_some()));
    }

    /// A player leaving a dedicated game refreshes the host's view
    #[tokio::test(start_paused = true)]
    async fn player_leave_refreshes_dedicated_host() {
        let harness = Harness::new();
        let mut f = harness.login("host", "@Host", ROTATION_HOST_VERS);
        let a = harness.login("alice", "Alice", ROTATION_VERS);
        let b = harness.login("bob", "Bob", ROTATION_VERS);

        let game = create(&mut f, "Srv", 8);
        join(&a, game);
        join(&b, game);
        settle(Duration::from_secs(1)).await;
        f.drain();

        a.send(Record::new(commands::GAME_LEAVE));
        let info = f.find(broadcasts::GAME_MEMBERS).unwrap();
        assert_eq!(ident(&info), game);
        assert_eq!(info.get("COUNT"), Some("2"));
        assert_eq!(info.get("OPPO0"), Some("@Host"));
        assert_eq!(info.get("OPPO1"), Some("Bob"));
        assert!(info.get("OPPO2").is_none());
        assert!(harness.store.find_game(game).unwrap().unwrap().is_open());

        settle(Duration::from_secs(1)).await;
        let session = f.find(broadcasts::GAME_SESSION_STARTED).unwrap();
        assert_eq!(session.get("COUNT"), Some("2"));
    }

    /// One-shot search modes fail or create when nothing matches
    #[tokio::test(start_paused = true)]
    async fn one_shot_search_modes() {
        let harness = Harness::new();
        let mut d = harness.login("dave", "Dave", P2P_VERS);

        d.send(Record::new(commands::GAME_SEARCH).with("MODE", "0"));
        assert_eq!(d.drain_ids(), vec!["gqwknfnd"]);

        d.send(
            Record::new(commands::GAME_SEARCH)
                .with("MODE", "1")
                .with("MAXSIZE", "4"),
        );
        let reply = d.find(commands::GAME_SEARCH).unwrap();
        assert_eq!(reply.get("NAME"), Some("Dave"));
        let current = harness
            .store
            .active_membership_of(d.persona_id().unwrap())
            .unwrap()
            .unwrap();
        assert!(current.host);
    }

    /// Game listing honours COUNT
    #[tokio::test(start_paused = true)]
    async fn game_list_rows() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);
        let mut c = harness.login("carol", "Carol", P2P_VERS);
        create(&mut a, "One", 4);
        create(&mut b, "Two", 4);
        c.drain();

        c.send(Record::new(commands::GAME_LIST).with("COUNT", "1"));
        let replies = c.drain();
        assert_eq!(replies[0].id, "gsea");
        assert_eq!(replies[0].get("COUNT"), Some("1"));
        let rows: Vec<_> = replies.iter().filter(|r| r.id == broadcasts::GAME_ROW).collect();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].get("NAME"), Some("One"));
    }

    /// Game info for a known and an unknown id
    #[tokio::test(start_paused = true)]
    async fn game_info_projection() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let game = create(&mut a, "Info", 4);

        a.send(Record::new(commands::GAME_GET_INFO).with("IDENT", game.to_string()));
        let info = a.find(commands::GAME_GET_INFO).unwrap();
        assert_eq!(info.get("NAME"), Some("Info"));
        assert_eq!(info.get("HOST"), Some("Alice"));
        assert_eq!(info.get("OPPO0"), Some("Alice"));

        a.send(Record::new(commands::GAME_GET_INFO).with("IDENT", "9999"));
        let empty = a.find(commands::GAME_GET_INFO).unwrap();
        assert!(empty.fields.is_empty());
    }
}

/// DEDICATED HOST PROVISIONING TESTS
mod spawn_tests {
    use super::*;

    /// A spawn service is asked to create the game and the requester is
    /// attached once it appears
    #[tokio::test(start_paused = true)]
    async fn spawn_create_through_service() {
        let harness = Harness::new();
        let mut gps = harness.login("gps", "@GPS", ROTATION_HOST_VERS);
        let mut alice = harness.login("alice", "Alice", ROTATION_VERS);

        gps.send(Record::new(commands::GAME_SPAWN_STATUS).with("STATUS", "A"));
        gps.drain();

        alice.send(
            Record::new(commands::GAME_SPAWN_CREATE)
                .with("NAME", "Server")
                .with("MAXSIZE", "16"),
        );
        assert_eq!(alice.drain_ids(), vec!["gpsc"]);
        let order = gps.find(broadcasts::SPAWN_CREATE).unwrap();
        assert_eq!(order.get("NAME"), Some("Server"));
        assert_eq!(order.get("MAXSIZE"), Some("16"));

        gps.send(Record::new(commands::GAME_SPAWN_STATUS).with("STATUS", "G"));
        create(&mut gps, "Server", 16);
        settle(Duration::from_secs(1)).await;

        let membership = harness
            .store
            .active_membership_of(alice.persona_id().unwrap())
            .unwrap()
            .unwrap();
        assert!(!membership.host);
        assert!(alice.find(broadcasts::GAME_SESSION_STARTED).is_some());
    }

    /// Without an idle spawn service the request is refused
    #[tokio::test(start_paused = true)]
    async fn spawn_create_without_service() {
        let harness = Harness::new();
        let mut alice = harness.login("alice", "Alice", ROTATION_VERS);
        alice.send(Record::new(commands::GAME_SPAWN_CREATE).with("NAME", "Server"));
        assert_eq!(alice.drain_ids(), vec!["gpscnfnd"]);
    }

    /// Titles without rotation get their game directly
    #[tokio::test(start_paused = true)]
    async fn spawn_create_direct() {
        let harness = Harness::new();
        let mut alice = harness.login("alice", "Alice", DEDICATED_VERS);
        alice.send(Record::new(commands::GAME_SPAWN_CREATE).with("NAME", "Direct"));

        let ids = alice.drain_ids();
        assert_eq!(ids, vec!["gpsc", "+ses"]);
        let family = vec![DEDICATED_VERS.to_string()];
        let game = harness
            .store
            .find_open_game_by_name("Direct", &family)
            .unwrap()
            .unwrap();
        assert!(game.started);
        assert_eq!(active_count(&harness, game.id), 1);
    }
}

/// SWEEP TESTS
mod sweep_tests {
    use super::*;

    /// An abandoned dedicated game is closed only after the grace period
    #[tokio::test(start_paused = true)]
    async fn idle_dedicated_game_closed_after_grace() {
        let harness = Harness::new();
        let alice = harness.login("alice", "Alice", DEDICATED_VERS);
        alice.send(Record::new(commands::GAME_SPAWN_CREATE).with("NAME", "Idle"));
        let family = vec![DEDICATED_VERS.to_string()];
        let game = harness
            .store
            .find_open_game_by_name("Idle", &family)
            .unwrap()
            .unwrap();
        alice.send(Record::new(commands::GAME_LEAVE));

        harness.advance_clock(chrono::Duration::seconds(10));
        tokio_test::assert_ok!(harness.lobby.sweep());
        assert!(harness.store.find_game(game.id).unwrap().unwrap().is_open());

        harness.advance_clock(chrono::Duration::seconds(81));
        let report = harness.lobby.sweep().unwrap();
        assert_eq!(report.ended_games, 1);
        assert!(!harness.store.find_game(game.id).unwrap().unwrap().is_open());
    }

    /// Sessions of vanished connections are ended by the sweep
    #[tokio::test(start_paused = true)]
    async fn sweep_ends_orphaned_persona_session() {
        let harness = Harness::new();
        let alice = harness.login("alice", "Alice", P2P_VERS);
        let persona = alice.persona_id().unwrap();

        alice.vanish();
        let report = harness.lobby.sweep().unwrap();
        assert_eq!(report.ended_sessions, 1);
        assert!(harness.store.active_persona_sessions_of(persona).unwrap().is_empty());
        assert!(harness.lobby.rooms().room_of_persona(persona).is_none());

        let again = harness.lobby.sweep().unwrap();
        assert!(again.is_empty());
    }
}

/// ROOM AND CHAT TESTS
mod room_tests {
    use super::*;
    use shared::Terminator;

    /// Lobby chat reaches players not in a game, with tab terminators
    #[tokio::test(start_paused = true)]
    async fn lobby_chat_skips_players_in_game() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", P2P_VERS);
        let mut b = harness.login("bob", "Bob", P2P_VERS);
        let mut c = harness.login("carol", "Carol", P2P_VERS);
        create(&mut c, "Busy", 4);
        settle(Duration::from_millis(200)).await;
        b.drain();
        c.drain();

        a.send(Record::new(commands::CHAT_MESSAGE).with("TEXT", "hello"));

        let frames = b.drain_frames();
        let chat = frames
            .iter()
            .find(|f| f.record.id == broadcasts::CHAT_DELIVERED)
            .unwrap();
        assert_eq!(chat.terminator, Terminator::Tab);
        assert_eq!(chat.record.get("T"), Some("hello"));
        assert_eq!(chat.record.get("N"), Some("Alice"));
        assert!(c.find(broadcasts::CHAT_DELIVERED).is_none());
    }

    /// Moving into a room answers with the room and its members
    #[tokio::test(start_paused = true)]
    async fn room_move_lists_members() {
        let harness = Harness::new();
        let mut a = harness.login("alice", "Alice", ROTATION_VERS);
        let mut b = harness.login("bob", "Bob", ROTATION_VERS);
        let room = harness.lobby.rooms().room_id_for_vers(ROTATION_VERS).unwrap();

        a.send(Record::new(commands::ROOM_MOVE).with("IDENT", room.to_string()));
        a.drain();
        b.send(Record::new(commands::ROOM_MOVE).with("IDENT", room.to_string()));

        let replies = b.drain();
        let reply = replies.iter().find(|r| r.id == commands::ROOM_MOVE).unwrap();
        assert_eq!(reply.get("COUNT"), Some("2"));
        let names: Vec<_> = replies
            .iter()
            .filter(|r| r.id == broadcasts::USER_PRESENCE)
            .filter_map(|r| r.get("N"))
            .collect();
        assert!(names.contains(&"Alice"));
        assert!(a.find(broadcasts::USER_PRESENCE).is_some());
    }
}

/// TRANSPORT TESTS
mod transport_tests {
    use super::*;
    use futures::{SinkExt, StreamExt};
    use server::network::Server;
    use shared::{Frame, LobbyCodec};
    use tokio::net::TcpStream;
    use tokio_util::codec::Framed;

    /// Tests a full authentication over a real TCP socket
    #[tokio::test]
    async fn authenticate_over_tcp() {
        let harness = Harness::new();
        let server = Server::bind("127.0.0.1:0", harness.lobby.clone())
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut framed = Framed::new(stream, LobbyCodec);
        framed
            .send(Frame::new(
                Record::new(commands::AUTH)
                    .with("NAME", "alice")
                    .with("PASS", PASSWORD)
                    .with("VERS", P2P_VERS),
            ))
            .await
            .unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(reply.id, "auth");
        assert_eq!(reply.get("NAME"), Some("alice"));
        assert_eq!(reply.get("ADDR"), Some("127.0.0.1"));
    }
}
