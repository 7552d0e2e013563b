//! End-to-end relay behaviour over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pewpew_net::{Envelope, RelayClient, RelayServer, ServerConfig};
use pewpew_relay::{DEFAULT_GROUP, RelayOptions, UuidGenerator};
use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

const QUIET: Duration = Duration::from_millis(150);
const PATIENCE: Duration = Duration::from_secs(2);

async fn start_server() -> (SocketAddr, Arc<RelayServer>) {
    let server = Arc::new(RelayServer::new(
        ServerConfig::default(),
        Arc::new(UuidGenerator),
        RelayOptions::default(),
    ));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let srv = Arc::clone(&server);
    tokio::spawn(async move {
        srv.run_with_listener(listener).await.unwrap();
    });
    (addr, server)
}

async fn expect(client: &mut RelayClient) -> Envelope {
    client
        .recv_timeout(PATIENCE)
        .await
        .unwrap()
        .expect("expected an event")
}

async fn expect_nothing(client: &mut RelayClient) {
    let got = client.recv_timeout(QUIET).await.unwrap();
    assert!(got.is_none(), "unexpected event: {got:?}");
}

async fn wait_for_members(server: &RelayServer, count: usize) {
    for _ in 0..200 {
        if server.relay().members(DEFAULT_GROUP).await.len() == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("group never reached {count} members");
}

async fn signed_up(addr: SocketAddr, name: &str) -> (RelayClient, Envelope) {
    let mut client = RelayClient::connect(addr).await.unwrap();
    client.send("signup", json!({ "name": name })).await.unwrap();
    let joined = expect(&mut client).await;
    assert_eq!(joined.event, "joined-successfully");
    (client, joined)
}

#[tokio::test]
async fn two_players_sign_up_hit_and_leave() {
    let (addr, server) = start_server().await;
    let mut a = RelayClient::connect(addr).await.unwrap();
    let mut b = RelayClient::connect(addr).await.unwrap();

    a.send("signup", json!({ "name": "Rae" })).await.unwrap();
    let joined = expect(&mut a).await;
    assert_eq!(joined.event, "joined-successfully");
    assert_eq!(joined.data["name"], "Rae");
    assert!(joined.data["id"].as_str().is_some_and(|id| !id.is_empty()));
    let a_socket = joined.data["socketId"].clone();
    expect_nothing(&mut b).await;

    b.send("signup", json!({ "name": "Kit" })).await.unwrap();
    let b_joined = expect(&mut b).await;
    assert_eq!(b_joined.event, "joined-successfully");
    let announced = expect(&mut a).await;
    assert_eq!(announced.event, "player-joined");
    assert_eq!(announced.data, b_joined.data);
    assert_ne!(announced.data["socketId"], a_socket);

    a.send("player-hit", json!({ "target": b_joined.data["id"] }))
        .await
        .unwrap();
    let hit = expect(&mut b).await;
    assert_eq!(hit.event, "player-hit");
    assert_eq!(hit.data["target"], b_joined.data["id"]);
    expect_nothing(&mut a).await;

    b.close().await.unwrap();
    wait_for_members(&server, 1).await;

    a.send("player-update", json!({ "x": 1 })).await.unwrap();
    expect_nothing(&mut a).await;
    assert_eq!(server.relay().stats().await.sessions, 1);
}

#[tokio::test]
async fn sword_is_echoed_and_update_is_not() {
    let (addr, _server) = start_server().await;
    let (mut a, _) = signed_up(addr, "Rae").await;
    let (mut b, _) = signed_up(addr, "Kit").await;
    assert_eq!(expect(&mut a).await.event, "player-joined");

    a.send("player-use-sword", json!({ "angle": 45 })).await.unwrap();
    assert_eq!(expect(&mut a).await.event, "player-use-sword");
    assert_eq!(expect(&mut b).await.event, "player-use-sword");

    a.send("player-update", json!({ "x": 2, "y": 3 })).await.unwrap();
    let update = expect(&mut b).await;
    assert_eq!(update.data, json!({ "x": 2, "y": 3 }));
    expect_nothing(&mut a).await;
}

#[tokio::test]
async fn hello_and_duplicate_signup_are_answered_privately() {
    let (addr, _server) = start_server().await;
    let (mut a, first) = signed_up(addr, "Rae").await;
    let (mut b, _) = signed_up(addr, "Kit").await;
    expect(&mut a).await;

    a.send("hello", json!({ "message": "relay" })).await.unwrap();
    let reply = expect(&mut a).await;
    assert_eq!(reply.event, "hello-reply");
    assert_eq!(reply.data["message"], "hello, relay");

    a.send("signup", json!("Impostor")).await.unwrap();
    let rejected = expect(&mut a).await;
    assert_eq!(rejected.event, "signup-failed");
    assert!(rejected.data["reason"].as_str().is_some());

    expect_nothing(&mut b).await;

    a.send("hello", json!("again")).await.unwrap();
    assert_eq!(expect(&mut a).await.data["message"], "hello, again");
    assert_eq!(first.data["name"], "Rae");
}

#[tokio::test]
async fn bad_frames_close_only_their_connection() {
    let (addr, server) = start_server().await;
    let (mut a, _) = signed_up(addr, "Rae").await;

    let mut oversized = TcpStream::connect(addr).await.unwrap();
    oversized
        .write_all(&(2 * 1024 * 1024u32).to_le_bytes())
        .await
        .unwrap();
    let mut buf = [0u8; 16];
    let n = tokio::time::timeout(PATIENCE, oversized.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0, "oversized frame should close the connection");

    let mut garbage = TcpStream::connect(addr).await.unwrap();
    let junk = b"not json";
    garbage
        .write_all(&(junk.len() as u32).to_le_bytes())
        .await
        .unwrap();
    garbage.write_all(junk).await.unwrap();
    let n = tokio::time::timeout(PATIENCE, garbage.read(&mut buf))
        .await
        .unwrap()
        .unwrap_or(0);
    assert_eq!(n, 0, "undecodable frame should close the connection");

    a.send("hello", json!({ "message": "still here" })).await.unwrap();
    assert_eq!(expect(&mut a).await.event, "hello-reply");
    assert_eq!(server.relay().members(DEFAULT_GROUP).await.len(), 1);
}

#[tokio::test]
async fn many_players_join_concurrently() {
    const N: usize = 12;
    let (addr, server) = start_server().await;
    let (mut watcher, _) = signed_up(addr, "Watcher").await;

    let mut joins = Vec::new();
    for i in 0..N {
        joins.push(tokio::spawn(async move {
            let (client, joined) = signed_up(addr, &format!("player-{i}")).await;
            (client, joined.data["id"].as_str().unwrap().to_string())
        }));
    }

    let mut clients = Vec::new();
    let mut ids = std::collections::HashSet::new();
    for join in joins {
        let (client, id) = join.await.unwrap();
        clients.push(client);
        ids.insert(id);
    }
    assert_eq!(ids.len(), N);

    let mut announced = std::collections::HashSet::new();
    for _ in 0..N {
        let event = expect(&mut watcher).await;
        assert_eq!(event.event, "player-joined");
        announced.insert(event.data["id"].as_str().unwrap().to_string());
    }
    assert_eq!(announced, ids);
    wait_for_members(&server, N + 1).await;
}
