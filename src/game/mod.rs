//! Game logic, independent of networking.

pub mod board;
