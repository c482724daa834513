//! End-to-end tests over real TCP: bind a server on an ephemeral port
//! and drive it with raw protocol frames, the way a client binary would.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use gridlock::{CredentialStore, GameServer, ServerConfig};

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

async fn spawn_server(name: &str) -> (SocketAddr, PathBuf) {
    let db = std::env::temp_dir().join(format!("gridlock-e2e-{name}-{}.json", std::process::id()));
    std::fs::write(&db, "[]").unwrap();
    let config = ServerConfig {
        port: 0,
        user_database: db.clone(),
    };
    let store = CredentialStore::load(&db).unwrap();
    let server = GameServer::bind(&config, store).await.unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    (addr, db)
}

struct Client {
    stream: TcpStream,
    lines: Vec<String>,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            lines: Vec::new(),
        }
    }

    async fn send(&mut self, frame: &str) {
        self.stream
            .write_all(format!("{frame}\n").as_bytes())
            .await
            .unwrap();
    }

    /// Next server frame; every outbound frame is newline-terminated.
    async fn recv(&mut self) -> String {
        loop {
            if !self.lines.is_empty() {
                return self.lines.remove(0);
            }
            let mut chunk = [0u8; 4096];
            let n = timeout(RECV_TIMEOUT, self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for a frame")
                .unwrap();
            assert!(n > 0, "server closed the connection unexpectedly");
            let text = String::from_utf8(chunk[..n].to_vec()).unwrap();
            self.lines
                .extend(text.split('\n').filter(|l| !l.is_empty()).map(String::from));
        }
    }

    /// Register and log in as `user` in one go.
    async fn auth(&mut self, user: &str) {
        self.send(&format!("REGISTER:{user}:pw")).await;
        assert_eq!(self.recv().await, "REGISTER:ACKSTATUS:0");
        self.send(&format!("LOGIN:{user}:pw")).await;
        assert_eq!(self.recv().await, "LOGIN:ACKSTATUS:0");
    }
}

#[tokio::test]
async fn test_full_match_to_win() {
    let (addr, db) = spawn_server("match").await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.auth("alice").await;
    bob.auth("bob").await;

    alice.send("CREATE:Room1").await;
    assert_eq!(alice.recv().await, "CREATE:ACKSTATUS:0");

    bob.send("ROOMLIST:PLAYER").await;
    assert_eq!(bob.recv().await, "ROOMLIST:ACKSTATUS:0:Room1");

    bob.send("JOIN:Room1:PLAYER").await;
    assert_eq!(bob.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(alice.recv().await, "BEGIN:alice:bob");
    assert_eq!(bob.recv().await, "BEGIN:alice:bob");

    // Alice takes the top row; bob answers in the middle.
    let moves = [
        ("PLACE:0:0", "100000000"),
        ("PLACE:0:1", "100200000"),
        ("PLACE:1:0", "110200000"),
        ("PLACE:1:1", "110220000"),
    ];
    for (i, (frame, board)) in moves.iter().enumerate() {
        let mover = if i % 2 == 0 { &mut alice } else { &mut bob };
        mover.send(frame).await;
        assert_eq!(alice.recv().await, format!("BOARDSTATUS:{board}"));
        assert_eq!(bob.recv().await, format!("BOARDSTATUS:{board}"));
    }

    alice.send("PLACE:2:0").await;
    assert_eq!(alice.recv().await, "GAMEEND:111220000:0:alice");
    assert_eq!(bob.recv().await, "GAMEEND:111220000:0:alice");

    // Both sessions are back in the lobby and the room is gone.
    alice.send("ROOMLIST:VIEWER").await;
    assert_eq!(alice.recv().await, "ROOMLIST:ACKSTATUS:0:");
    bob.send("PLACE:0:0").await;
    assert_eq!(bob.recv().await, "NOROOM");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_auth_gating_and_unknown_commands() {
    let (addr, db) = spawn_server("gating").await;
    let mut c = Client::connect(addr).await;

    // Auth outranks NOROOM for in-room commands outside a room.
    c.send("PLACE:1:1").await;
    assert_eq!(c.recv().await, "BADAUTH");
    c.send("CREATE:Room1").await;
    assert_eq!(c.recv().await, "BADAUTH");

    c.send("DANCE").await;
    assert_eq!(c.recv().await, "UNKNOWN");

    c.auth("carol").await;
    c.send("FORFEIT").await;
    assert_eq!(c.recv().await, "NOROOM");

    // Malformed frames get the command's own error code.
    c.send("LOGIN:carol").await;
    assert_eq!(c.recv().await, "LOGIN:ACKSTATUS:3");
    c.send("JOIN:nowhere:PLAYER").await;
    assert_eq!(c.recv().await, "JOIN:ACKSTATUS:1");
    c.send("CREATE:bad name!").await;
    assert_eq!(c.recv().await, "CREATE:ACKSTATUS:1");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_move_sent_before_opponent_joins_is_held() {
    let (addr, db) = spawn_server("held").await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.auth("alice").await;
    bob.auth("bob").await;

    alice.send("CREATE:Room1").await;
    assert_eq!(alice.recv().await, "CREATE:ACKSTATUS:0");

    // No opponent yet; the move waits instead of being rejected.
    alice.send("PLACE:1:1").await;

    bob.send("JOIN:Room1:PLAYER").await;
    assert_eq!(bob.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(alice.recv().await, "BEGIN:alice:bob");
    assert_eq!(bob.recv().await, "BEGIN:alice:bob");

    // The held move applies as soon as the match starts.
    assert_eq!(alice.recv().await, "BOARDSTATUS:000010000");
    assert_eq!(bob.recv().await, "BOARDSTATUS:000010000");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_player_disconnect_forfeits_to_survivor() {
    let (addr, db) = spawn_server("disconnect").await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.auth("alice").await;
    bob.auth("bob").await;

    alice.send("CREATE:Room1").await;
    assert_eq!(alice.recv().await, "CREATE:ACKSTATUS:0");
    bob.send("JOIN:Room1:PLAYER").await;
    assert_eq!(bob.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(alice.recv().await, "BEGIN:alice:bob");
    assert_eq!(bob.recv().await, "BEGIN:alice:bob");

    drop(alice);
    assert_eq!(bob.recv().await, "GAMEEND:000000000:2:bob");

    // Room is torn down.
    bob.send("ROOMLIST:VIEWER").await;
    assert_eq!(bob.recv().await, "ROOMLIST:ACKSTATUS:0:");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_viewer_snapshot_and_live_updates() {
    let (addr, db) = spawn_server("viewer").await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    let mut eve = Client::connect(addr).await;
    alice.auth("alice").await;
    bob.auth("bob").await;
    eve.auth("eve").await;

    alice.send("CREATE:Room1").await;
    assert_eq!(alice.recv().await, "CREATE:ACKSTATUS:0");
    bob.send("JOIN:Room1:PLAYER").await;
    assert_eq!(bob.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(alice.recv().await, "BEGIN:alice:bob");
    assert_eq!(bob.recv().await, "BEGIN:alice:bob");

    alice.send("PLACE:1:1").await;
    assert_eq!(alice.recv().await, "BOARDSTATUS:000010000");
    assert_eq!(bob.recv().await, "BOARDSTATUS:000010000");

    // Late viewer gets the running-match snapshot, then live frames.
    eve.send("JOIN:Room1:VIEWER").await;
    assert_eq!(eve.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(eve.recv().await, "INPROGRESS:alice:bob");
    assert_eq!(eve.recv().await, "BOARDSTATUS:000010000");

    bob.send("PLACE:0:0").await;
    assert_eq!(eve.recv().await, "BOARDSTATUS:200010000");

    // Viewer moves are ignored, not applied.
    eve.send("PLACE:2:2").await;
    alice.send("PLACE:2:2").await;
    assert_eq!(eve.recv().await, "BOARDSTATUS:200010001");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_forfeit_ends_match_for_everyone() {
    let (addr, db) = spawn_server("forfeit").await;
    let mut alice = Client::connect(addr).await;
    let mut bob = Client::connect(addr).await;
    alice.auth("alice").await;
    bob.auth("bob").await;

    alice.send("CREATE:Room1").await;
    assert_eq!(alice.recv().await, "CREATE:ACKSTATUS:0");
    bob.send("JOIN:Room1:PLAYER").await;
    assert_eq!(bob.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(alice.recv().await, "BEGIN:alice:bob");
    assert_eq!(bob.recv().await, "BEGIN:alice:bob");

    alice.send("PLACE:0:0").await;
    assert_eq!(alice.recv().await, "BOARDSTATUS:100000000");
    assert_eq!(bob.recv().await, "BOARDSTATUS:100000000");

    bob.send("FORFEIT").await;
    assert_eq!(alice.recv().await, "GAMEEND:100000000:2:alice");
    assert_eq!(bob.recv().await, "GAMEEND:100000000:2:alice");

    std::fs::remove_file(&db).ok();
}

#[tokio::test]
async fn test_second_login_rebinds_username() {
    let (addr, db) = spawn_server("rebind").await;
    let mut c = Client::connect(addr).await;
    c.auth("first").await;

    c.send("REGISTER:second:pw").await;
    assert_eq!(c.recv().await, "REGISTER:ACKSTATUS:0");
    c.send("LOGIN:second:pw").await;
    assert_eq!(c.recv().await, "LOGIN:ACKSTATUS:0");

    // Rooms created now carry the new identity.
    c.send("CREATE:Room1").await;
    assert_eq!(c.recv().await, "CREATE:ACKSTATUS:0");

    let mut d = Client::connect(addr).await;
    d.auth("other").await;
    d.send("JOIN:Room1:PLAYER").await;
    assert_eq!(d.recv().await, "JOIN:ACKSTATUS:0");
    assert_eq!(d.recv().await, "BEGIN:second:other");

    std::fs::remove_file(&db).ok();
}
