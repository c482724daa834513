//! Client Sessions
//!
//! One session per TCP connection. A session moves through
//! `Unauthenticated -> Authenticated -> InRoom -> Closed`: the lobby loop
//! decodes frames and dispatches lobby commands, and on a successful
//! create/join control transfers to the in-room loop, which blocks on
//! either the next inbound frame or the room's notifier until the room
//! reaches a terminal state or the connection drops.
//!
//! A frame read by the in-room loop after the room has already closed is
//! requeued into the session's own pending queue and handled by the
//! lobby loop next — each connection carries its own queue, so
//! simultaneous room teardowns cannot corrupt one another's input.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncRead;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::network::auth::{self, CredentialStore, StoreError};
use crate::network::protocol::{
    ClientCommand, FrameReader, Keyword, ProtocolError, RoomMode, ServerFrame,
};
use crate::network::room::{
    CreateError, DisconnectOutcome, JoinError, PlaceOutcome, Room, RoomMember, RoomRegistry,
};

/// Whether the session keeps running after handling a frame.
enum Flow {
    Continue,
    Closed,
}

/// Outcome of one in-room frame.
enum RoomFlow {
    /// Stay in the room loop.
    Stay,
    /// Room is done; fall back to the lobby loop.
    Leave,
}

/// Per-connection session state machine.
pub struct Session<R> {
    peer: SocketAddr,
    reader: FrameReader<R>,
    /// Outbound channel; also this connection's identity within a room.
    sender: mpsc::Sender<ServerFrame>,
    registry: Arc<RoomRegistry>,
    store: Arc<CredentialStore>,
    username: Option<String>,
    /// Frames handed back by the in-room loop, consumed before the socket.
    pending: VecDeque<String>,
}

impl<R: AsyncRead + Unpin> Session<R> {
    /// Create a session over an established connection.
    pub fn new(
        peer: SocketAddr,
        reader: FrameReader<R>,
        sender: mpsc::Sender<ServerFrame>,
        registry: Arc<RoomRegistry>,
        store: Arc<CredentialStore>,
    ) -> Self {
        Self {
            peer,
            reader,
            sender,
            registry,
            store,
            username: None,
            pending: VecDeque::new(),
        }
    }

    /// Drive the session until the client disconnects.
    pub async fn run(&mut self) {
        loop {
            let frame = match self.next_frame().await {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(peer = %self.peer, "client disconnected");
                    break;
                }
                Err(e) => {
                    debug!(peer = %self.peer, "read error: {e}");
                    break;
                }
            };
            if let Flow::Closed = self.handle_lobby_frame(&frame).await {
                break;
            }
        }
    }

    /// Next inbound frame: the pending queue first, then the socket.
    async fn next_frame(&mut self) -> std::io::Result<Option<String>> {
        if let Some(frame) = self.pending.pop_front() {
            return Ok(Some(frame));
        }
        self.reader.next_frame().await
    }

    async fn send(&self, frame: ServerFrame) {
        let _ = self.sender.send(frame).await;
    }

    async fn ack(&self, keyword: Keyword, status: u8) {
        self.send(ServerFrame::Ack {
            keyword,
            status,
            data: None,
        })
        .await;
    }

    // ------------------------------------------------------------------
    // Lobby
    // ------------------------------------------------------------------

    async fn handle_lobby_frame(&mut self, frame: &str) -> Flow {
        debug!(peer = %self.peer, frame, "lobby frame");
        match ClientCommand::parse(frame) {
            Ok(ClientCommand::Login { username, password }) => {
                self.handle_login(username, password).await;
                Flow::Continue
            }
            Ok(ClientCommand::Register { username, password }) => {
                self.handle_register(username, password).await;
                Flow::Continue
            }
            Ok(ClientCommand::Create { room }) => self.handle_create(room).await,
            Ok(ClientCommand::RoomList { mode }) => {
                self.handle_roomlist(mode).await;
                Flow::Continue
            }
            Ok(ClientCommand::Join { room, mode }) => self.handle_join(room, mode).await,
            Ok(ClientCommand::Place { .. } | ClientCommand::Forfeit) => {
                // In-room commands outside a room; auth outranks NOROOM.
                if self.username.is_none() {
                    self.send(ServerFrame::BadAuth).await;
                } else {
                    self.send(ServerFrame::NoRoom).await;
                }
                Flow::Continue
            }
            Err(ProtocolError::UnknownCommand(keyword)) => {
                debug!(peer = %self.peer, %keyword, "unknown command");
                self.send(ServerFrame::Unknown).await;
                Flow::Continue
            }
            Err(ProtocolError::Malformed(keyword)) => {
                self.handle_malformed(keyword).await;
                Flow::Continue
            }
        }
    }

    /// Malformed-frame codes from the lobby command table. Auth is
    /// checked before arity for the authenticated commands.
    async fn handle_malformed(&mut self, keyword: Keyword) {
        match keyword {
            Keyword::Login => self.ack(Keyword::Login, 3).await,
            Keyword::Register => self.ack(Keyword::Register, 2).await,
            Keyword::Create => {
                if self.username.is_none() {
                    self.send(ServerFrame::BadAuth).await;
                } else {
                    self.ack(Keyword::Create, 4).await;
                }
            }
            Keyword::RoomList => {
                if self.username.is_none() {
                    self.send(ServerFrame::BadAuth).await;
                } else {
                    self.ack(Keyword::RoomList, 1).await;
                }
            }
            Keyword::Join => {
                if self.username.is_none() {
                    self.send(ServerFrame::BadAuth).await;
                } else {
                    self.ack(Keyword::Join, 3).await;
                }
            }
            Keyword::Place | Keyword::Forfeit => {
                if self.username.is_none() {
                    self.send(ServerFrame::BadAuth).await;
                } else {
                    self.send(ServerFrame::NoRoom).await;
                }
            }
        }
    }

    async fn handle_login(&mut self, username: String, password: String) {
        let status = match self.store.find(&username).await {
            None => 1,
            Some(hash) => match auth::verify_password(&password, &hash) {
                Ok(true) => {
                    info!(peer = %self.peer, %username, "logged in");
                    self.username = Some(username);
                    0
                }
                Ok(false) => 2,
                Err(e) => {
                    warn!(%username, "stored password hash is unusable: {e}");
                    2
                }
            },
        };
        self.ack(Keyword::Login, status).await;
    }

    async fn handle_register(&mut self, username: String, password: String) {
        let status = if self.store.find(&username).await.is_some() {
            1
        } else {
            match auth::hash_password(&password) {
                Ok(hash) => match self.store.append(&username, &hash).await {
                    Ok(()) => {
                        info!(peer = %self.peer, %username, "registered");
                        0
                    }
                    Err(StoreError::UserExists) => 1,
                    Err(e) => {
                        warn!(%username, "registration failed: {e}");
                        2
                    }
                },
                Err(e) => {
                    warn!(%username, "password hashing failed: {e}");
                    2
                }
            }
        };
        self.ack(Keyword::Register, status).await;
    }

    async fn handle_create(&mut self, room: String) -> Flow {
        let Some(username) = self.username.clone() else {
            self.send(ServerFrame::BadAuth).await;
            return Flow::Continue;
        };
        let member = RoomMember {
            username,
            sender: self.sender.clone(),
        };
        // The success ack is queued by the registry before the room
        // becomes visible, so no broadcast can overtake it.
        match self.registry.create(&room, member).await {
            Ok(room) => self.run_room(room).await,
            Err(CreateError::InvalidName) => {
                self.ack(Keyword::Create, 1).await;
                Flow::Continue
            }
            Err(CreateError::NameExists) => {
                self.ack(Keyword::Create, 2).await;
                Flow::Continue
            }
            Err(CreateError::AtCapacity) => {
                self.ack(Keyword::Create, 3).await;
                Flow::Continue
            }
        }
    }

    async fn handle_roomlist(&mut self, mode: RoomMode) {
        if self.username.is_none() {
            self.send(ServerFrame::BadAuth).await;
            return;
        }
        let names = self.registry.list(mode).await;
        self.send(ServerFrame::Ack {
            keyword: Keyword::RoomList,
            status: 0,
            data: Some(names.join(",")),
        })
        .await;
    }

    async fn handle_join(&mut self, room: String, mode: RoomMode) -> Flow {
        let Some(username) = self.username.clone() else {
            self.send(ServerFrame::BadAuth).await;
            return Flow::Continue;
        };
        let member = RoomMember {
            username,
            sender: self.sender.clone(),
        };
        let result = match mode {
            RoomMode::Player => self.registry.join_player(&room, member).await,
            RoomMode::Viewer => self.registry.join_viewer(&room, member).await,
        };
        match result {
            Ok(room) => self.run_room(room).await,
            Err(JoinError::NotFound) => {
                self.ack(Keyword::Join, 1).await;
                Flow::Continue
            }
            Err(JoinError::Full) => {
                self.ack(Keyword::Join, 2).await;
                Flow::Continue
            }
        }
    }

    // ------------------------------------------------------------------
    // In-room
    // ------------------------------------------------------------------

    /// Turn loop for one room. Blocks on the next inbound frame or the
    /// room's notifier; returns to the lobby when the room is terminal,
    /// or closes the session when the connection drops.
    async fn run_room(&mut self, room: Arc<RwLock<Room>>) -> Flow {
        let notify = room.read().await.notify_handle();
        loop {
            // Register interest before checking, so a notification
            // between the check and the await is not lost.
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if room.read().await.is_terminal() {
                return Flow::Continue;
            }

            tokio::select! {
                result = self.next_frame() => match result {
                    Ok(Some(frame)) => {
                        if let RoomFlow::Leave = self.handle_room_frame(&room, frame).await {
                            return Flow::Continue;
                        }
                    }
                    Ok(None) | Err(_) => {
                        self.room_disconnect(&room).await;
                        return Flow::Closed;
                    }
                },
                _ = &mut notified => {}
            }
        }
    }

    async fn handle_room_frame(&mut self, room: &Arc<RwLock<Room>>, frame: String) -> RoomFlow {
        // The room may have closed while this frame was in flight; hand
        // it back so the lobby loop processes it instead.
        if room.read().await.is_terminal() {
            self.pending.push_back(frame);
            return RoomFlow::Leave;
        }
        match ClientCommand::parse(&frame) {
            Ok(ClientCommand::Place { col, row }) => {
                self.room_place(room, &frame, col, row).await
            }
            Ok(ClientCommand::Forfeit) => self.room_forfeit(room, &frame).await,
            Ok(_) => {
                debug!(peer = %self.peer, "lobby command ignored while in room");
                RoomFlow::Stay
            }
            Err(ProtocolError::UnknownCommand(keyword)) => {
                debug!(peer = %self.peer, %keyword, "unknown command");
                self.send(ServerFrame::Unknown).await;
                RoomFlow::Stay
            }
            Err(e @ ProtocolError::Malformed(_)) => {
                debug!(peer = %self.peer, "dropping bad in-room frame: {e}");
                RoomFlow::Stay
            }
        }
    }

    /// Apply a move. A move sent before the second player joins is held
    /// on the room's notifier until the match begins.
    async fn room_place(
        &mut self,
        room: &Arc<RwLock<Room>>,
        frame: &str,
        col: usize,
        row: usize,
    ) -> RoomFlow {
        let notify = room.read().await.notify_handle();
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut guard = room.write().await;
            if !guard.is_player(&self.sender) {
                debug!(peer = %self.peer, "viewer move ignored");
                return RoomFlow::Stay;
            }
            match guard.apply_place(&self.sender, col, row).await {
                PlaceOutcome::NotStarted => {
                    // Socket goes unread while the move is held; a
                    // disconnect here is only observed after the room's
                    // next state transition.
                    drop(guard);
                    notified.await;
                }
                PlaceOutcome::Closed => {
                    // Room turned terminal after the dispatch check;
                    // hand the frame back to the lobby loop.
                    self.pending.push_back(frame.to_string());
                    return RoomFlow::Leave;
                }
                PlaceOutcome::Rejected | PlaceOutcome::Continued => return RoomFlow::Stay,
                PlaceOutcome::Ended(_) => {
                    let name = guard.name().to_string();
                    drop(guard);
                    self.registry.remove(&name).await;
                    return RoomFlow::Leave;
                }
            }
        }
    }

    /// Surrender. Held like a move if the match has not started yet.
    async fn room_forfeit(&mut self, room: &Arc<RwLock<Room>>, frame: &str) -> RoomFlow {
        let notify = room.read().await.notify_handle();
        loop {
            let notified = notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let mut guard = room.write().await;
            if !guard.is_player(&self.sender) {
                debug!(peer = %self.peer, "viewer forfeit ignored");
                return RoomFlow::Stay;
            }
            if guard.is_terminal() {
                // Room turned terminal after the dispatch check; hand
                // the frame back to the lobby loop.
                drop(guard);
                self.pending.push_back(frame.to_string());
                return RoomFlow::Leave;
            }
            if guard.player_count() < 2 {
                drop(guard);
                notified.await;
                continue;
            }
            let name = guard.name().to_string();
            if guard.forfeit(&self.sender).await.is_some() {
                drop(guard);
                self.registry.remove(&name).await;
                return RoomFlow::Leave;
            }
            return RoomFlow::Stay;
        }
    }

    /// Convert a dropped connection into the room outcome and clean up.
    async fn room_disconnect(&mut self, room: &Arc<RwLock<Room>>) {
        let (outcome, name) = {
            let mut guard = room.write().await;
            let name = guard.name().to_string();
            (guard.handle_disconnect(&self.sender).await, name)
        };
        match outcome {
            DisconnectOutcome::Forfeit | DisconnectOutcome::Abandoned => {
                self.registry.remove(&name).await;
            }
            DisconnectOutcome::ViewerLeft | DisconnectOutcome::AlreadyClosed => {}
        }
    }
}
