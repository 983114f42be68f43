// Room relay scenarios: roster replication and the embedded-game path

mod common;

use std::time::Duration;

use p2party::{
    Config, Game, MemoryTransport, PeerId, Profile, Role, Room, RoomId, User, Versioned,
};
use tokio::sync::watch;

use common::{init_tracing, TicTacToe, TttAction, TttState};

const WAIT: Duration = Duration::from_secs(5);

fn profile(id: &str, name: &str) -> Profile {
    Profile {
        id: PeerId::from(id),
        name: name.to_string(),
        color: "#3f51b5".to_string(),
        emoji: "\u{1f3b2}".to_string(),
    }
}

async fn wait_watch<T: Clone + Send + Sync + 'static>(
    mut watch: watch::Receiver<T>,
    predicate: impl FnMut(&T) -> bool,
) -> T {
    tokio::time::timeout(WAIT, watch.wait_for(predicate))
        .await
        .expect("state did not settle in time")
        .expect("channel ended")
        .clone()
}

#[tokio::test]
async fn roster_replicates_and_duplicate_joins_are_ignored() {
    init_tracing();
    let hub = MemoryTransport::new();
    let room_id = RoomId::from("PARTY");
    let config = Config::default();

    let host_room = Room::spawn(
        profile("HOST", "hera"),
        room_id.clone(),
        Role::Host,
        hub.clone(),
        &config,
    )
    .unwrap();
    let client_room = Room::spawn(
        profile("AAAA", "ares"),
        room_id.clone(),
        Role::Client,
        hub.clone(),
        &config,
    )
    .unwrap();

    let roster = wait_watch(host_room.room_changes(), |v| v.state.users.len() == 2).await;
    assert!(roster.state.user(&PeerId::from("HOST")).unwrap().is_host);
    assert!(!roster.state.user(&PeerId::from("AAAA")).unwrap().is_host);

    let mirrored = wait_watch(client_room.room_changes(), {
        let roster = roster.clone();
        move |v| *v == roster
    })
    .await;
    assert_eq!(mirrored, roster);

    // A duplicate join changes nothing; the next profile update lands on
    // the version right after the join, proving no reduction in between.
    client_room
        .session()
        .action(p2party::RoomAction::UserJoin {
            user: client_room.self_user().clone(),
        })
        .unwrap();
    let mut updated = client_room.self_user().clone();
    updated.name = "artemis".to_string();
    client_room.update_user(updated).unwrap();

    let after = wait_watch(host_room.room_changes(), |v| {
        v.state
            .user(&PeerId::from("AAAA"))
            .is_some_and(|u| u.name == "artemis")
    })
    .await;
    assert_eq!(after.version, roster.version.next());
    assert_eq!(after.state.users.len(), 2);
}

#[tokio::test]
async fn departed_peers_are_flagged_disconnected() {
    init_tracing();
    let hub = MemoryTransport::new();
    let room_id = RoomId::from("PARTY");
    let config = Config::default();

    let host_room = Room::spawn(
        profile("HOST", "hera"),
        room_id.clone(),
        Role::Host,
        hub.clone(),
        &config,
    )
    .unwrap();
    let client_room = Room::spawn(
        profile("AAAA", "ares"),
        room_id.clone(),
        Role::Client,
        hub.clone(),
        &config,
    )
    .unwrap();

    wait_watch(host_room.room_changes(), |v| v.state.users.len() == 2).await;

    client_room.leave().unwrap();
    let after = wait_watch(host_room.room_changes(), |v| {
        v.state
            .user(&PeerId::from("AAAA"))
            .is_some_and(|u| !u.is_connected)
    })
    .await;
    // Departed users stay on the roster for when they come back.
    assert_eq!(after.state.users.len(), 2);
}

#[tokio::test]
async fn dropped_peers_are_flagged_disconnected() {
    init_tracing();
    let hub = MemoryTransport::new();
    let room_id = RoomId::from("PARTY");
    let config = Config::default();

    let host_room = Room::spawn(
        profile("HOST", "hera"),
        room_id.clone(),
        Role::Host,
        hub.clone(),
        &config,
    )
    .unwrap();
    let client_room = Room::spawn(
        profile("AAAA", "ares"),
        room_id.clone(),
        Role::Client,
        hub.clone(),
        &config,
    )
    .unwrap();

    wait_watch(host_room.room_changes(), |v| v.state.users.len() == 2).await;

    // No goodbye, the tab just closes. The host notices the dead channel
    // and flags the user itself.
    drop(client_room);
    let after = wait_watch(host_room.room_changes(), |v| {
        v.state
            .user(&PeerId::from("AAAA"))
            .is_some_and(|u| !u.is_connected)
    })
    .await;
    assert_eq!(after.state.users.len(), 2);
}

async fn embedded_pair() -> (Room, Room, Game<TicTacToe>, Game<TicTacToe>) {
    let hub = MemoryTransport::new();
    let room_id = RoomId::from("PARTY");
    let config = Config::default();

    let host_room = Room::spawn(
        profile("HOST", "hera"),
        room_id.clone(),
        Role::Host,
        hub.clone(),
        &config,
    )
    .unwrap();
    let client_room = Room::spawn(
        profile("AAAA", "ares"),
        room_id.clone(),
        Role::Client,
        hub.clone(),
        &config,
    )
    .unwrap();

    host_room.set_game("tic-tac-toe").unwrap();
    let roster = wait_watch(host_room.room_changes(), |v| {
        v.state.users.len() == 2 && v.state.game == "tic-tac-toe"
    })
    .await;
    wait_watch(client_room.room_changes(), {
        let roster = roster.clone();
        move |v| *v == roster
    })
    .await;
    let users: Vec<User> = roster.state.users.clone();

    let host_game = Game::embedded(
        TicTacToe,
        PeerId::from("HOST"),
        "tic-tac-toe",
        host_room.attach_game("tic-tac-toe"),
        users.clone(),
    );
    let client_game = Game::embedded(
        TicTacToe,
        PeerId::from("AAAA"),
        "tic-tac-toe",
        client_room.attach_game("tic-tac-toe"),
        users,
    );

    (host_room, client_room, host_game, client_game)
}

#[tokio::test]
async fn embedded_games_sync_users_then_converge_on_moves() {
    init_tracing();
    let (_host_room, _client_room, host_game, client_game) = embedded_pair().await;

    // The roster hook runs before anything else: both players appear, in
    // join order, with their symbols.
    let synced = wait_watch(host_game.state_changes(), |v: &Versioned<TttState>| {
        v.state.players.len() == 2
    })
    .await;
    assert_eq!(synced.state.players[0].id, "HOST");
    assert_eq!(synced.state.players[0].symbol, "X");
    assert_eq!(synced.state.players[1].symbol, "O");
    wait_watch(client_game.state_changes(), |v| v.state.players.len() == 2).await;

    // A client move crosses frame, relay, peers, the host's frame, and
    // comes back authoritative.
    client_game.action(TttAction::Move { x: 0, y: 0 }).unwrap();
    let settled = wait_watch(host_game.state_changes(), |v: &Versioned<TttState>| {
        v.state.board[0][0] == "X"
    })
    .await;

    let mirrored = wait_watch(client_game.state_changes(), {
        let settled = settled.clone();
        move |v| *v == settled
    })
    .await;
    assert_eq!(mirrored, settled);
    assert_eq!(mirrored.state.turn, "O");
}

#[tokio::test]
async fn occupied_cell_moves_are_rejected_end_to_end() {
    init_tracing();
    let (_host_room, _client_room, host_game, client_game) = embedded_pair().await;

    wait_watch(client_game.state_changes(), |v: &Versioned<TttState>| {
        v.state.players.len() == 2
    })
    .await;

    // The host takes the corner; once the client sees it, a second move
    // into the same cell predicts optimistically and then gets rejected.
    host_game.action(TttAction::Move { x: 0, y: 0 }).unwrap();
    let taken = wait_watch(client_game.state_changes(), |v: &Versioned<TttState>| {
        v.state.board[0][0] == "X"
    })
    .await;

    client_game.action(TttAction::Move { x: 2, y: 2 }).unwrap();
    let both = wait_watch(client_game.state_changes(), |v: &Versioned<TttState>| {
        v.state.mark_count() == 2
    })
    .await;
    assert_eq!(both.state.board[2][2], "O");
    assert_eq!(both.version, taken.version.next());

    // Same cell again: the prediction is discarded and the state returns
    // to the authoritative snapshot unchanged.
    client_game.action(TttAction::Move { x: 2, y: 2 }).unwrap();
    let rolled_back = wait_watch(client_game.state_changes(), {
        let both = both.clone();
        move |v| *v == both
    })
    .await;
    assert_eq!(rolled_back, both);
    assert_eq!(host_game.current().version, both.version);
}
