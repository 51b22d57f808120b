//! Server runtime: listener, per-connection sessions, shared room state

pub mod chat_server;
pub(crate) mod connection;
pub mod registry;

pub use chat_server::ChatServer;
pub use registry::{ClientHandle, LeaveOutcome, Registry, Room};
