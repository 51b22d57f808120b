//! Roomtalk - multi-user TCP chat server
//!
//! Clients connect over plain TCP, pick a display name, list or create
//! rooms, join one room at a time, and exchange text messages broadcast to
//! their co-members. The wire protocol is length-prefixed frames (2-byte
//! big-endian length) whose payloads are encoded either as self-describing
//! JSON objects or as a two-frame binary form; the encoding is chosen once
//! at server start and applies to every client of that run.
//!
//! ## Architecture
//!
//! - **Frame layer**: [`protocol::frame`] turns the byte stream into
//!   discrete payloads and back.
//! - **Message codec**: [`protocol::codec`] maps frame payloads to typed
//!   requests and replies under the selected [`WireFormat`].
//! - **Sessions**: one reader task and one writer task per connection,
//!   preserving per-client ordering without a shared queue.
//! - **Shared state**: the room registry and client map behind a single
//!   mutex, held across every broadcast fan-out.
//!
//! ## Example
//!
//! ```rust,ignore
//! use roomtalk::{ChatServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> roomtalk::Result<()> {
//!     let server = ChatServer::bind(&ServerConfig::default())?;
//!     server.run().await
//! }
//! ```

pub mod config;
pub mod error;
pub mod protocol;
pub mod server;

pub use config::{parse_args, Cli, ServerConfig};
pub use error::{ChatError, Result};
pub use protocol::{ClientRequest, MessageCodec, MessageType, ServerReply, WireFormat};
pub use server::ChatServer;
