//! Protocol Frames
//!
//! Wire format for client-server communication over plain TCP. One text
//! frame per logical command, fields joined by `:`, no length prefix.
//! Inbound data is split on newlines; a non-empty remainder at a read
//! boundary is a complete frame (clients send one unterminated frame per
//! write). Every outbound frame is newline-terminated so concatenated
//! writes stay splittable on the client side.

use std::collections::VecDeque;
use std::fmt;
use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

/// Largest read the server performs at once. Frames are a few dozen
/// bytes, so a single read is expected to carry whole frames.
pub const MAX_FRAME_SZ: usize = 8192;

/// Command keywords understood by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// Authenticate an existing account.
    Login,
    /// Create a new account.
    Register,
    /// Create a room.
    Create,
    /// List joinable rooms.
    RoomList,
    /// Join a room as player or viewer.
    Join,
    /// Place a mark.
    Place,
    /// Surrender the match.
    Forfeit,
}

impl Keyword {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "LOGIN" => Some(Self::Login),
            "REGISTER" => Some(Self::Register),
            "CREATE" => Some(Self::Create),
            "ROOMLIST" => Some(Self::RoomList),
            "JOIN" => Some(Self::Join),
            "PLACE" => Some(Self::Place),
            "FORFEIT" => Some(Self::Forfeit),
            _ => None,
        }
    }

    /// Wire spelling of the keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Login => "LOGIN",
            Self::Register => "REGISTER",
            Self::Create => "CREATE",
            Self::RoomList => "ROOMLIST",
            Self::Join => "JOIN",
            Self::Place => "PLACE",
            Self::Forfeit => "FORFEIT",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Room listing / joining mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomMode {
    /// Rooms with an open player slot.
    Player,
    /// Any room, joined as a spectator.
    Viewer,
}

impl RoomMode {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "PLAYER" => Some(Self::Player),
            "VIEWER" => Some(Self::Viewer),
            _ => None,
        }
    }
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    /// Keyword not in the command vocabulary.
    #[error("unknown command keyword: {0:?}")]
    UnknownCommand(String),
    /// Known keyword with a bad field count or bad field values.
    #[error("malformed {0} frame")]
    Malformed(Keyword),
}

/// A decoded client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `LOGIN:<user>:<pass>`
    Login {
        /// Account name.
        username: String,
        /// Plaintext password to verify.
        password: String,
    },
    /// `REGISTER:<user>:<pass>`
    Register {
        /// Account name.
        username: String,
        /// Plaintext password to hash and store.
        password: String,
    },
    /// `CREATE:<roomName>`
    Create {
        /// Requested room name.
        room: String,
    },
    /// `ROOMLIST:<PLAYER|VIEWER>`
    RoomList {
        /// Listing mode.
        mode: RoomMode,
    },
    /// `JOIN:<roomName>:<PLAYER|VIEWER>`
    Join {
        /// Target room name.
        room: String,
        /// Joining mode.
        mode: RoomMode,
    },
    /// `PLACE:<col>:<row>`
    Place {
        /// Column, 0-based.
        col: usize,
        /// Row, 0-based.
        row: usize,
    },
    /// `FORFEIT`
    Forfeit,
}

impl ClientCommand {
    /// Decode one frame into a command.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let fields: Vec<&str> = frame.split(':').collect();
        let keyword = Keyword::parse(fields[0])
            .ok_or_else(|| ProtocolError::UnknownCommand(fields[0].to_string()))?;
        let args = &fields[1..];
        let malformed = || ProtocolError::Malformed(keyword);

        match keyword {
            Keyword::Login => match args {
                [user, pass] => Ok(Self::Login {
                    username: (*user).to_string(),
                    password: (*pass).to_string(),
                }),
                _ => Err(malformed()),
            },
            Keyword::Register => match args {
                [user, pass] => Ok(Self::Register {
                    username: (*user).to_string(),
                    password: (*pass).to_string(),
                }),
                _ => Err(malformed()),
            },
            Keyword::Create => match args {
                [room] => Ok(Self::Create {
                    room: (*room).to_string(),
                }),
                _ => Err(malformed()),
            },
            Keyword::RoomList => match args {
                [mode] => RoomMode::parse(mode)
                    .map(|mode| Self::RoomList { mode })
                    .ok_or_else(malformed),
                _ => Err(malformed()),
            },
            Keyword::Join => match args {
                [room, mode] => RoomMode::parse(mode)
                    .map(|mode| Self::Join {
                        room: (*room).to_string(),
                        mode,
                    })
                    .ok_or_else(malformed),
                _ => Err(malformed()),
            },
            Keyword::Place => match args {
                [col, row] => {
                    let col = col.parse::<usize>().map_err(|_| malformed())?;
                    let row = row.parse::<usize>().map_err(|_| malformed())?;
                    Ok(Self::Place { col, row })
                }
                _ => Err(malformed()),
            },
            Keyword::Forfeit => match args {
                [] => Ok(Self::Forfeit),
                _ => Err(malformed()),
            },
        }
    }
}

/// A frame sent from server to client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// `<CMD>:ACKSTATUS:<code>[:<data>]`
    Ack {
        /// Command being acknowledged.
        keyword: Keyword,
        /// Numeric outcome code.
        status: u8,
        /// Optional payload (e.g. comma-joined room list; may be empty).
        data: Option<String>,
    },
    /// Command required authentication and none is present.
    BadAuth,
    /// In-room command sent while not in a room.
    NoRoom,
    /// Keyword not recognized.
    Unknown,
    /// Match is starting: `BEGIN:<player1>:<player2>`.
    Begin {
        /// First player (crosses).
        player1: String,
        /// Second player (noughts).
        player2: String,
    },
    /// Snapshot for a late viewer: `INPROGRESS:<player1>:<player2>`.
    InProgress {
        /// First player (crosses).
        player1: String,
        /// Second player (noughts).
        player2: String,
    },
    /// Board after an accepted move: `BOARDSTATUS:<9-digits>`.
    BoardStatus {
        /// 9-character board-status string.
        board: String,
    },
    /// Terminal outcome: `GAMEEND:<9-digits>:<code>[:<username>]`.
    GameEnd {
        /// 9-character board-status string.
        board: String,
        /// 0 = win, 1 = draw, 2 = forfeit.
        code: u8,
        /// Winner, for codes 0 and 2.
        winner: Option<String>,
    },
}

impl ServerFrame {
    /// Encode the frame, newline-terminated.
    pub fn encode(&self) -> String {
        let mut out = match self {
            Self::Ack {
                keyword,
                status,
                data,
            } => {
                let mut s = format!("{keyword}:ACKSTATUS:{status}");
                if let Some(data) = data {
                    s.push(':');
                    s.push_str(data);
                }
                s
            }
            Self::BadAuth => "BADAUTH".to_string(),
            Self::NoRoom => "NOROOM".to_string(),
            Self::Unknown => "UNKNOWN".to_string(),
            Self::Begin { player1, player2 } => format!("BEGIN:{player1}:{player2}"),
            Self::InProgress { player1, player2 } => {
                format!("INPROGRESS:{player1}:{player2}")
            }
            Self::BoardStatus { board } => format!("BOARDSTATUS:{board}"),
            Self::GameEnd {
                board,
                code,
                winner,
            } => {
                let mut s = format!("GAMEEND:{board}:{code}");
                if let Some(winner) = winner {
                    s.push(':');
                    s.push_str(winner);
                }
                s
            }
        };
        out.push('\n');
        out
    }
}

/// Buffered frame splitter over a raw byte stream.
///
/// Splits newline-joined frames apart and treats the remainder at each
/// read boundary as a complete frame of its own. Empty frames are
/// skipped. Cancel-safe: bytes consumed from the socket land in the
/// internal queue before the next await point.
///
/// The protocol has no length framing, so a frame TCP-segmented across
/// two reads cannot be reassembled and parses as garbage. Clients write
/// one frame per send and frames fit in a single segment, so each read
/// is assumed to deliver whole frames.
pub struct FrameReader<R> {
    reader: R,
    frames: VecDeque<String>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// Wrap a read half.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            frames: VecDeque::new(),
        }
    }

    /// Next frame, `Ok(None)` on clean EOF.
    pub async fn next_frame(&mut self) -> io::Result<Option<String>> {
        loop {
            if let Some(frame) = self.frames.pop_front() {
                return Ok(Some(frame));
            }
            let mut chunk = [0u8; MAX_FRAME_SZ];
            let n = self.reader.read(&mut chunk).await?;
            if n == 0 {
                return Ok(None);
            }
            let text = String::from_utf8_lossy(&chunk[..n]);
            for segment in text.split('\n') {
                let segment = segment.trim();
                if !segment.is_empty() {
                    self.frames.push_back(segment.to_string());
                }
            }
        }
    }
}
