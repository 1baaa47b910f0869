//! Many-to-many WebSocket Broadcast Hub
//!
//! Connections join named rooms ("cables"); every message a member sends is
//! fanned out to the other members of the same room. Rooms are created on the
//! first join and destroyed when their last member leaves.
//!
//! # Architecture
//! Uses the Actor pattern with bounded `mpsc` channels:
//! - `CableServer` is the dispatcher, sole owner of the room table and lifecycle
//! - Each room runs a worker task that alone owns its membership
//! - Each connection runs a read pump and a write pump
//! - No locks needed - all state access goes through message passing
//!
//! A member whose outbound queue is full at fan-out time is dropped from its
//! room, so one slow reader never stalls the others.
//!
//! # Example
//! ```ignore
//! use tokio::net::TcpListener;
//! use tokio_util::sync::CancellationToken;
//! use cable_hub::{handle_connection, CableServer, Config, Hooks};
//!
//! #[tokio::main]
//! async fn main() {
//!     let listener = TcpListener::bind("127.0.0.1:8080").await.unwrap();
//!     let (server, handle) = CableServer::new(Config::default(), Hooks::new()).unwrap();
//!
//!     tokio::spawn(server.run(CancellationToken::new()));
//!
//!     while let Ok((stream, _)) = listener.accept().await {
//!         tokio::spawn(handle_connection(stream, handle.clone()));
//!     }
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod hooks;
pub mod message;
mod room;
pub mod server;
pub mod transport;
pub mod types;

// Re-export main types for convenience
pub use client::ClientInfo;
pub use config::Config;
pub use error::CableError;
pub use handler::handle_connection;
pub use hooks::{Admission, Hooks};
pub use message::{Message, OpCode};
pub use server::{CableHandle, CableServer, ReadyState, ServerCommand};
pub use tokio_tungstenite::tungstenite::handshake::server::Request;
pub use transport::Transport;
pub use types::{unique_name, ClientId};
