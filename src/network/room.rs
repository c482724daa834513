//! Rooms and the Room Registry
//!
//! A room is a named two-player match container with optional viewers: the
//! board, the turn counter, the membership lists, and the per-room
//! notification primitive all live here, behind one lock per room. The
//! registry is the process-wide name -> room table, capacity-bounded.
//!
//! Lock order is always registry map first, then room. Turn waiting is a
//! blocking wait on the room's [`Notify`], signalled by every state
//! transition; nothing in this module polls.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, Notify, RwLock};
use tracing::{debug, info};

use crate::game::board::{Board, Mark};
use crate::network::protocol::{Keyword, RoomMode, ServerFrame};

/// Registry capacity.
pub const MAX_ROOMS: usize = 256;

/// Room lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// One player, waiting for an opponent.
    AwaitingPlayer2,
    /// Two players, turn loop active.
    InProgress,
    /// Outcome broadcast; room is being removed.
    Terminal,
}

/// Terminal match outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameOutcome {
    /// Three in a row.
    Win {
        /// Winning player.
        winner: String,
    },
    /// Full board, no line.
    Draw,
    /// Surrender or disconnect.
    Forfeit {
        /// The player who did not forfeit.
        winner: String,
    },
}

/// Result of a placement attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaceOutcome {
    /// Second player has not joined yet; hold the move and wait.
    NotStarted,
    /// Room already reached a terminal state.
    Closed,
    /// Out of turn, occupied cell, out-of-range, or not a player.
    /// No state change, no turn advance.
    Rejected,
    /// Move applied, game continues.
    Continued,
    /// Move applied and ended the match.
    Ended(GameOutcome),
}

/// Result of a member's connection dropping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectOutcome {
    /// A player dropped mid-match; the survivor won by forfeit.
    Forfeit,
    /// The sole player left before an opponent arrived.
    Abandoned,
    /// A viewer left; the match is unaffected.
    ViewerLeft,
    /// The room was already terminal.
    AlreadyClosed,
}

/// A connection participating in a room.
pub struct RoomMember {
    /// Authenticated username.
    pub username: String,
    /// Outbound frame channel for this connection.
    pub sender: mpsc::Sender<ServerFrame>,
}

/// One match: membership, board, and turn state.
pub struct Room {
    name: String,
    /// Ordered players; index 0 is the creator and plays crosses.
    players: Vec<RoomMember>,
    viewers: Vec<RoomMember>,
    board: Board,
    /// Monotonic count of accepted moves; parity selects the active player.
    turn: u32,
    state: RoomState,
    notify: Arc<Notify>,
}

impl Room {
    fn new(name: String, owner: RoomMember) -> Self {
        Self {
            name,
            players: vec![owner],
            viewers: Vec::new(),
            board: Board::new(),
            turn: 0,
            state: RoomState::AwaitingPlayer2,
            notify: Arc::new(Notify::new()),
        }
    }

    /// Room name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RoomState {
        self.state
    }

    /// Whether the room reached a terminal outcome.
    pub fn is_terminal(&self) -> bool {
        self.state == RoomState::Terminal
    }

    /// Turn counter.
    pub fn turn(&self) -> u32 {
        self.turn
    }

    /// Number of seated players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Number of viewers.
    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// 9-character board-status string.
    pub fn board_status(&self) -> String {
        self.board.status_string()
    }

    /// Handle to the room's state-change notifier.
    pub fn notify_handle(&self) -> Arc<Notify> {
        self.notify.clone()
    }

    fn active_index(&self) -> usize {
        (self.turn % 2) as usize
    }

    fn active_mark(&self) -> Mark {
        if self.turn % 2 == 0 {
            Mark::Cross
        } else {
            Mark::Nought
        }
    }

    /// Whether the connection behind `sender` holds a player seat.
    pub fn is_player(&self, sender: &mpsc::Sender<ServerFrame>) -> bool {
        self.players.iter().any(|p| p.sender.same_channel(sender))
    }

    /// Queue a frame to every player and viewer. Dead channels are skipped;
    /// their sessions are torn down by their own read loops.
    pub async fn broadcast(&self, frame: ServerFrame) {
        for member in self.players.iter().chain(self.viewers.iter()) {
            let _ = member.sender.send(frame.clone()).await;
        }
    }

    async fn broadcast_except(&self, frame: ServerFrame, except: &mpsc::Sender<ServerFrame>) {
        for member in self.players.iter().chain(self.viewers.iter()) {
            if !member.sender.same_channel(except) {
                let _ = member.sender.send(frame.clone()).await;
            }
        }
    }

    /// Seat the second player, start the match, and announce it to every
    /// current member with a single `BEGIN` broadcast. The join ack is
    /// queued to the joiner first, so it precedes the `BEGIN` on that
    /// connection's outbound channel.
    async fn add_player(&mut self, member: RoomMember) {
        debug_assert_eq!(self.players.len(), 1);
        debug_assert_eq!(self.state, RoomState::AwaitingPlayer2);
        let _ = member
            .sender
            .send(ServerFrame::Ack {
                keyword: Keyword::Join,
                status: 0,
                data: None,
            })
            .await;
        self.players.push(member);
        self.state = RoomState::InProgress;
        let frame = ServerFrame::Begin {
            player1: self.players[0].username.clone(),
            player2: self.players[1].username.clone(),
        };
        info!(room = %self.name, "match started: {} vs {}",
            self.players[0].username, self.players[1].username);
        self.broadcast(frame).await;
        self.notify.notify_waiters();
    }

    /// Add a viewer. If the match is already running, that viewer alone
    /// gets an `INPROGRESS` snapshot followed by the current board, both
    /// queued behind the join ack.
    async fn add_viewer(&mut self, member: RoomMember) {
        let _ = member
            .sender
            .send(ServerFrame::Ack {
                keyword: Keyword::Join,
                status: 0,
                data: None,
            })
            .await;
        if self.state == RoomState::InProgress {
            let _ = member
                .sender
                .send(ServerFrame::InProgress {
                    player1: self.players[0].username.clone(),
                    player2: self.players[1].username.clone(),
                })
                .await;
            let _ = member
                .sender
                .send(ServerFrame::BoardStatus {
                    board: self.board_status(),
                })
                .await;
        }
        self.viewers.push(member);
    }

    /// Apply a `PLACE` from the connection behind `sender`.
    pub async fn apply_place(
        &mut self,
        sender: &mpsc::Sender<ServerFrame>,
        col: usize,
        row: usize,
    ) -> PlaceOutcome {
        match self.state {
            RoomState::Terminal => return PlaceOutcome::Closed,
            RoomState::AwaitingPlayer2 => return PlaceOutcome::NotStarted,
            RoomState::InProgress => {}
        }

        let idx = self.active_index();
        if !self.players[idx].sender.same_channel(sender) {
            debug!(room = %self.name, "move rejected: not the active connection");
            return PlaceOutcome::Rejected;
        }

        let mark = self.active_mark();
        if let Err(e) = self.board.place(col, row, mark) {
            debug!(room = %self.name, col, row, "move rejected: {e}");
            return PlaceOutcome::Rejected;
        }

        // Win for the just-placed mark, then draw only if no win.
        let outcome = if self.board.wins(mark) {
            Some(GameOutcome::Win {
                winner: self.players[idx].username.clone(),
            })
        } else if self.board.is_full() {
            Some(GameOutcome::Draw)
        } else {
            None
        };

        self.turn += 1;
        let board = self.board_status();

        match outcome {
            None => {
                self.broadcast(ServerFrame::BoardStatus { board }).await;
                self.notify.notify_waiters();
                PlaceOutcome::Continued
            }
            Some(outcome) => {
                self.finish(outcome.clone(), None).await;
                PlaceOutcome::Ended(outcome)
            }
        }
    }

    /// Explicit surrender by the connection behind `sender`. The other
    /// player wins. `None` if the sender is not a seated player or the
    /// room is already terminal.
    pub async fn forfeit(&mut self, sender: &mpsc::Sender<ServerFrame>) -> Option<GameOutcome> {
        if self.is_terminal() || !self.is_player(sender) {
            return None;
        }
        let winner = self
            .players
            .iter()
            .find(|p| !p.sender.same_channel(sender))?
            .username
            .clone();
        let outcome = GameOutcome::Forfeit { winner };
        self.finish(outcome.clone(), None).await;
        Some(outcome)
    }

    /// Convert a dropped connection into a room outcome: a player's
    /// disconnect is a self-inflicted forfeit, a viewer's disconnect only
    /// trims the viewer list.
    pub async fn handle_disconnect(
        &mut self,
        sender: &mpsc::Sender<ServerFrame>,
    ) -> DisconnectOutcome {
        if self.is_player(sender) {
            if self.is_terminal() {
                return DisconnectOutcome::AlreadyClosed;
            }
            if let Some(winner) = self
                .players
                .iter()
                .find(|p| !p.sender.same_channel(sender))
                .map(|p| p.username.clone())
            {
                info!(room = %self.name, %winner, "player disconnected, forfeiting");
                self.finish(GameOutcome::Forfeit { winner }, Some(sender)).await;
                DisconnectOutcome::Forfeit
            } else {
                // Sole player left before an opponent arrived; nothing
                // meaningful to announce, just close the room.
                info!(room = %self.name, "room abandoned before start");
                self.state = RoomState::Terminal;
                self.notify.notify_waiters();
                DisconnectOutcome::Abandoned
            }
        } else {
            self.viewers.retain(|v| !v.sender.same_channel(sender));
            DisconnectOutcome::ViewerLeft
        }
    }

    /// Broadcast the terminal frame and mark the room closed. The caller
    /// removes the room from the registry afterwards.
    async fn finish(&mut self, outcome: GameOutcome, skip: Option<&mpsc::Sender<ServerFrame>>) {
        let (code, winner) = match &outcome {
            GameOutcome::Win { winner } => (0, Some(winner.clone())),
            GameOutcome::Draw => (1, None),
            GameOutcome::Forfeit { winner } => (2, Some(winner.clone())),
        };
        let frame = ServerFrame::GameEnd {
            board: self.board_status(),
            code,
            winner,
        };
        self.state = RoomState::Terminal;
        info!(room = %self.name, "match over: {outcome:?}");
        match skip {
            Some(sender) => self.broadcast_except(frame, sender).await,
            None => self.broadcast(frame).await,
        }
        self.notify.notify_waiters();
    }
}

/// Room creation errors, mapped to `CREATE` ack codes by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CreateError {
    /// Empty name or character outside letters/digits/space/`_`/`-`.
    #[error("invalid room name")]
    InvalidName,
    /// Name already taken.
    #[error("room name already exists")]
    NameExists,
    /// Registry holds the maximum number of rooms.
    #[error("room registry at capacity")]
    AtCapacity,
}

/// Room joining errors, mapped to `JOIN` ack codes by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// No such room for the requested mode.
    #[error("room not found")]
    NotFound,
    /// Room exists but both seats are taken.
    #[error("room is full")]
    Full,
}

/// Whether `name` is an acceptable room name.
pub fn is_valid_room_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '_' | '-'))
}

/// Process-wide table of room name -> room, owned by the server and
/// shared with every session.
pub struct RoomRegistry {
    rooms: RwLock<BTreeMap<String, Arc<RwLock<Room>>>>,
}

impl RoomRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a room with `owner` as sole player. The success ack is
    /// queued to the owner before the room becomes visible, so no room
    /// broadcast can overtake it.
    pub async fn create(
        &self,
        name: &str,
        owner: RoomMember,
    ) -> Result<Arc<RwLock<Room>>, CreateError> {
        let mut rooms = self.rooms.write().await;
        if rooms.len() >= MAX_ROOMS {
            return Err(CreateError::AtCapacity);
        }
        if rooms.contains_key(name) {
            return Err(CreateError::NameExists);
        }
        if !is_valid_room_name(name) {
            return Err(CreateError::InvalidName);
        }
        let _ = owner
            .sender
            .send(ServerFrame::Ack {
                keyword: Keyword::Create,
                status: 0,
                data: None,
            })
            .await;
        let room = Arc::new(RwLock::new(Room::new(name.to_string(), owner)));
        rooms.insert(name.to_string(), room.clone());
        info!(room = %name, total = rooms.len(), "room created");
        Ok(room)
    }

    /// Names of joinable rooms. `Player` mode lists rooms with an open
    /// seat; `Viewer` mode lists every room.
    pub async fn list(&self, mode: RoomMode) -> Vec<String> {
        let rooms = self.rooms.read().await;
        let mut names = Vec::new();
        for (name, room) in rooms.iter() {
            let include = match mode {
                RoomMode::Player => room.read().await.player_count() == 1,
                RoomMode::Viewer => true,
            };
            if include {
                names.push(name.clone());
            }
        }
        names
    }

    /// Seat `member` as the second player, starting the match.
    pub async fn join_player(
        &self,
        name: &str,
        member: RoomMember,
    ) -> Result<Arc<RwLock<Room>>, JoinError> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(name).ok_or(JoinError::NotFound)?;
        let mut guard = room.write().await;
        if guard.is_terminal() {
            return Err(JoinError::NotFound);
        }
        if guard.player_count() != 1 {
            return Err(JoinError::Full);
        }
        guard.add_player(member).await;
        Ok(room.clone())
    }

    /// Add `member` to the viewer list. Always allowed while the room
    /// exists, whether or not the match has started.
    pub async fn join_viewer(
        &self,
        name: &str,
        member: RoomMember,
    ) -> Result<Arc<RwLock<Room>>, JoinError> {
        let rooms = self.rooms.read().await;
        let room = rooms.get(name).ok_or(JoinError::NotFound)?;
        let mut guard = room.write().await;
        if guard.is_terminal() {
            return Err(JoinError::NotFound);
        }
        guard.add_viewer(member).await;
        Ok(room.clone())
    }

    /// Delete a room. Idempotent.
    pub async fn remove(&self, name: &str) {
        let mut rooms = self.rooms.write().await;
        if rooms.remove(name).is_some() {
            debug!(room = %name, total = rooms.len(), "room removed");
        }
    }

    /// Number of live rooms.
    pub async fn len(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Whether no rooms exist.
    pub async fn is_empty(&self) -> bool {
        self.rooms.read().await.is_empty()
    }
}

impl Default for RoomRegistry {
    fn default() -> Self {
        Self::new()
    }
}
