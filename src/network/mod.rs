//! Networking: wire protocol, sessions, rooms, auth, and the TCP server.

pub mod auth;
pub mod protocol;
pub mod room;
pub mod server;
pub mod session;
