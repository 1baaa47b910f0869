//! Lifecycle hooks
//!
//! A table of callbacks, one active handler per event, fixed when the server
//! is built. Every hook defaults to a no-op.
//!
//! Hooks other than `on_accept` run on the room worker's task. A slow hook
//! holds up that room: `on_message` in particular runs before fan-out, so
//! delivery to the room waits for it to return.

use std::fmt;
use std::sync::Arc;

use tokio_tungstenite::tungstenite::handshake::server::Request;

use crate::client::ClientInfo;
use crate::error::CableError;
use crate::message::Message;
use crate::types::unique_name;

/// Where an accepted connection goes and how it is named
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub room: String,
    pub name: String,
}

impl Admission {
    pub fn new(room: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            name: name.into(),
        }
    }

    /// Default admission: the request path is the room, the name is anonymous
    pub fn from_request(request: &Request) -> Self {
        Self::new(request.uri().path(), unique_name())
    }
}

type AcceptHook = Arc<dyn Fn(&Request) -> Option<Admission> + Send + Sync>;
type RoomHook = Arc<dyn Fn(&str) + Send + Sync>;
type ClientHook = Arc<dyn Fn(&ClientInfo) + Send + Sync>;
type MessageHook = Arc<dyn Fn(&Message) + Send + Sync>;
type CloseHook = Arc<dyn Fn(&ClientInfo, Option<&CableError>) + Send + Sync>;
type ServerHook = Arc<dyn Fn() + Send + Sync>;

/// Callback table shared by the dispatcher and all room workers
///
/// Setters consume and return the table; calling a setter again replaces
/// the previous handler.
#[derive(Clone)]
pub struct Hooks {
    accept: Option<AcceptHook>,
    room_ready: RoomHook,
    conn_ready: ClientHook,
    message: MessageHook,
    conn_close: CloseHook,
    room_close: RoomHook,
    server_close: ServerHook,
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            accept: None,
            room_ready: Arc::new(|_| {}),
            conn_ready: Arc::new(|_| {}),
            message: Arc::new(|_| {}),
            conn_close: Arc::new(|_, _| {}),
            room_close: Arc::new(|_| {}),
            server_close: Arc::new(|| {}),
        }
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hooks")
            .field("accept", &self.accept.is_some())
            .finish_non_exhaustive()
    }
}

impl Hooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether to accept an upgrade request, and into which room
    ///
    /// Returning None rejects the connection.
    pub fn on_accept<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request) -> Option<Admission> + Send + Sync + 'static,
    {
        self.accept = Some(Arc::new(f));
        self
    }

    /// First member of a room instance is being admitted
    pub fn on_room_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.room_ready = Arc::new(f);
        self
    }

    /// Connection admitted and its pumps started
    pub fn on_conn_ready<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientInfo) + Send + Sync + 'static,
    {
        self.conn_ready = Arc::new(f);
        self
    }

    /// Every message entering a room, before fan-out
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Message) + Send + Sync + 'static,
    {
        self.message = Arc::new(f);
        self
    }

    /// Connection left its room, with the error that ended it if any
    pub fn on_conn_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&ClientInfo, Option<&CableError>) + Send + Sync + 'static,
    {
        self.conn_close = Arc::new(f);
        self
    }

    /// Room instance emptied
    pub fn on_room_close<F>(mut self, f: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.room_close = Arc::new(f);
        self
    }

    /// Shutdown finished; fires exactly once
    pub fn on_server_close<F>(mut self, f: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.server_close = Arc::new(f);
        self
    }

    pub(crate) fn accept(&self, request: &Request) -> Option<Admission> {
        match &self.accept {
            Some(accept) => accept(request),
            None => Some(Admission::from_request(request)),
        }
    }

    pub(crate) fn room_ready(&self, room: &str) {
        (self.room_ready)(room)
    }

    pub(crate) fn conn_ready(&self, client: &ClientInfo) {
        (self.conn_ready)(client)
    }

    pub(crate) fn message(&self, message: &Message) {
        (self.message)(message)
    }

    pub(crate) fn conn_close(&self, client: &ClientInfo, error: Option<&CableError>) {
        (self.conn_close)(client, error)
    }

    pub(crate) fn room_close(&self, room: &str) {
        (self.room_close)(room)
    }

    pub(crate) fn server_close(&self) {
        (self.server_close)()
    }
}
