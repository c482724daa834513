//! # Gridlock Server
//!
//! A multiplayer tic-tac-toe server over plain TCP. Clients speak a
//! colon-delimited text protocol to register, authenticate, create and
//! join named rooms, and play matches that spectators can watch live.
//!
//! ## Architecture
//!
//! ```text
//!                    ┌──────────────┐
//!                    │  GameServer  │  accept loop
//!                    └──────┬───────┘
//!                           │ spawns per connection
//!              ┌────────────┴────────────┐
//!              ▼                         ▼
//!       ┌─────────────┐          ┌─────────────┐
//!       │   Session   │   ...    │   Session   │  lobby / room loop
//!       └──────┬──────┘          └──────┬──────┘
//!              │ create/join/place      │
//!              ▼                        ▼
//!       ┌─────────────────────────────────────┐
//!       │            RoomRegistry             │  name -> Room
//!       │   ┌────────┐  ┌────────┐            │
//!       │   │  Room  │  │  Room  │   ...      │  board + turn + members
//!       │   └────────┘  └────────┘            │
//!       └─────────────────────────────────────┘
//! ```
//!
//! Each session owns its connection's read half; all writes to a
//! connection go through its outbound channel, so frames from room
//! broadcasts and direct replies arrive in a single well-defined order.

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

pub use game::board::{Board, Mark, BOARD_SIZE};
pub use network::auth::CredentialStore;
pub use network::room::{RoomRegistry, MAX_ROOMS};
pub use network::server::{GameServer, ServerConfig};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
