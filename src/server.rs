//! Dispatcher actor
//!
//! `CableServer` owns the room table and the server lifecycle. It is the only
//! task that creates or forgets room workers; everything else reaches it
//! through a `CableHandle`, which sends requests over bounded channels.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::ClientInfo;
use crate::config::Config;
use crate::error::CableError;
use crate::hooks::Hooks;
use crate::message::{Message, OpCode};
use crate::room::{Join, Room, RoomEvent, RoomHandle, Unregister};
use crate::transport::Transport;
use crate::types::ClientId;

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Built, `run` not yet called
    Opening,
    /// Accepting joins and broadcasts
    Running,
    /// Cancelled, waiting for every room to empty
    Closing,
    /// Terminal
    Closed,
}

/// Broadcast requests sent from handles to the CableServer actor
#[derive(Debug)]
pub enum ServerCommand {
    /// Deliver to one room, if it exists
    Broadcast { room: String, message: Message },
    /// Deliver to every room
    BroadcastAll { message: Message },
}

/// The dispatcher actor
///
/// Built together with its handle by `CableServer::new`, then driven by
/// `run` on a single task.
pub struct CableServer {
    config: Arc<Config>,
    hooks: Arc<Hooks>,
    /// Live room workers: room name -> handle
    rooms: HashMap<String, RoomHandle>,
    state: ReadyState,
    next_generation: u64,
    register_rx: mpsc::Receiver<Join>,
    command_rx: mpsc::Receiver<ServerCommand>,
    unregister_rx: mpsc::Receiver<Unregister>,
    unregister_tx: mpsc::Sender<Unregister>,
}

/// Cloneable entry point to a `CableServer`
#[derive(Clone, Debug)]
pub struct CableHandle {
    register_tx: mpsc::Sender<Join>,
    command_tx: mpsc::Sender<ServerCommand>,
    hooks: Arc<Hooks>,
}

impl CableServer {
    /// Create a server and a handle to reach it
    ///
    /// Fails with `CableError::Config` when `config` does not validate.
    pub fn new(config: Config, hooks: Hooks) -> Result<(Self, CableHandle), CableError> {
        config.validate()?;

        let (register_tx, register_rx) = mpsc::channel(config.register_buffer);
        let (command_tx, command_rx) = mpsc::channel(config.broadcast_buffer);
        let (unregister_tx, unregister_rx) = mpsc::channel(config.register_buffer);
        let hooks = Arc::new(hooks);

        let server = Self {
            config: Arc::new(config),
            hooks: hooks.clone(),
            rooms: HashMap::new(),
            state: ReadyState::Opening,
            next_generation: 0,
            register_rx,
            command_rx,
            unregister_rx,
            unregister_tx,
        };
        let handle = CableHandle {
            register_tx,
            command_tx,
            hooks,
        };
        Ok((server, handle))
    }

    /// Lifecycle state as seen from outside the actor
    ///
    /// `run` consumes the server, so this only ever observes `Opening`; the
    /// later states are tracked inside the running loop.
    pub fn state(&self) -> ReadyState {
        self.state
    }

    /// Run the dispatcher event loop
    ///
    /// Returns only after `shutdown` has been cancelled and every room has
    /// emptied. The server-closed hook fires once, just before returning.
    pub async fn run(mut self, shutdown: CancellationToken) {
        self.state = ReadyState::Running;
        info!("CableServer started");

        loop {
            tokio::select! {
                // Unregister must come first so a room that is closing is
                // forgotten before a join for the same name is routed.
                biased;
                Some(unregister) = self.unregister_rx.recv() => {
                    self.handle_unregister(unregister, &shutdown);
                    if self.state == ReadyState::Closing && self.rooms.is_empty() {
                        break;
                    }
                }
                _ = shutdown.cancelled(), if self.state == ReadyState::Running => {
                    info!("CableServer closing, {} rooms open", self.rooms.len());
                    self.state = ReadyState::Closing;
                    if self.rooms.is_empty() {
                        break;
                    }
                }
                Some(join) = self.register_rx.recv() => self.handle_register(join, &shutdown),
                Some(cmd) = self.command_rx.recv() => self.handle_command(cmd).await,
            }
        }

        self.hooks.server_close();
        self.state = ReadyState::Closed;
        info!("CableServer closed");
    }

    /// Forget a room instance and re-route the joins it handed back
    fn handle_unregister(&mut self, unregister: Unregister, shutdown: &CancellationToken) {
        let Unregister {
            room,
            generation,
            orphans,
        } = unregister;

        let current = self.rooms.get(&room).map(|handle| handle.generation);
        if current == Some(generation) {
            self.rooms.remove(&room);
            debug!("Room {} (#{}) removed, total rooms: {}", room, generation, self.rooms.len());
        }

        for join in orphans {
            self.handle_register(join, shutdown);
        }
    }

    /// Route a join to its room, creating the room worker if needed
    fn handle_register(&mut self, join: Join, shutdown: &CancellationToken) {
        if self.state != ReadyState::Running {
            self.reject(join, CableError::ServerClosed);
            return;
        }

        let room = join.client.room.clone();
        if !self.rooms.contains_key(&room) {
            self.spawn_room(&room, shutdown);
        }

        let Some(handle) = self.rooms.get(&room) else {
            return;
        };
        let join = match handle.join.try_send(join) {
            Ok(()) => return,
            Err(TrySendError::Full(join)) => {
                self.reject(join, CableError::ResourceExhausted("room join queue"));
                return;
            }
            // The worker emptied and stopped taking joins; start a new instance.
            Err(TrySendError::Closed(join)) => join,
        };

        self.spawn_room(&room, shutdown);
        let Some(handle) = self.rooms.get(&room) else {
            return;
        };
        if let Err(e) = handle.join.try_send(join) {
            let join = match e {
                TrySendError::Full(join) | TrySendError::Closed(join) => join,
            };
            self.reject(join, CableError::ResourceExhausted("room join queue"));
        }
    }

    /// Refuse a join the caller was already told succeeded
    ///
    /// The connection-closed hook reports the reason; dropping the join
    /// closes the transport.
    fn reject(&self, join: Join, error: CableError) {
        warn!("Join for {} rejected: {}", join.client.id, error);
        self.hooks.conn_close(&join.client, Some(&error));
    }

    fn spawn_room(&mut self, room: &str, shutdown: &CancellationToken) {
        self.next_generation += 1;
        let handle = Room::spawn(
            room.to_string(),
            self.next_generation,
            self.config.clone(),
            self.hooks.clone(),
            self.unregister_tx.clone(),
            shutdown.clone(),
        );
        self.rooms.insert(room.to_string(), handle);
        debug!("Room {} (#{}) created, total rooms: {}", room, self.next_generation, self.rooms.len());
    }

    /// Forward a broadcast request to its room or rooms
    ///
    /// A single-room broadcast waits for space in the room's queue. A closing
    /// worker closes that queue before it reports back, so the wait never
    /// blocks on a room that is itself waiting on the dispatcher.
    /// `BroadcastAll` never waits and skips rooms whose queue is full.
    async fn handle_command(&mut self, cmd: ServerCommand) {
        match cmd {
            ServerCommand::Broadcast { room, message } => {
                let Some(handle) = self.rooms.get(&room) else {
                    debug!("Broadcast to missing room {}", room);
                    return;
                };
                if handle.events.send(RoomEvent::Broadcast(message)).await.is_err() {
                    debug!("Broadcast to closing room {} skipped", room);
                }
            }
            ServerCommand::BroadcastAll { message } => {
                for (room, handle) in &self.rooms {
                    let message = RoomEvent::Broadcast(message.for_room(room));
                    if handle.events.try_send(message).is_err() {
                        debug!("Broadcast to room {} dropped", room);
                    }
                }
            }
        }
    }
}

impl CableHandle {
    /// Admit an upgraded connection into `room` under `name`
    ///
    /// Fails with `ResourceExhausted` when the register queue is full; the
    /// transport is dropped, which closes it.
    pub fn connect(
        &self,
        transport: Transport,
        room: impl Into<String>,
        name: impl Into<String>,
    ) -> Result<ClientId, CableError> {
        let client = ClientInfo::new(name, room);
        let id = client.id;

        match self.register_tx.try_send(Join { client, transport }) {
            Ok(()) => Ok(id),
            Err(TrySendError::Full(_)) => Err(CableError::ResourceExhausted("register queue")),
            Err(TrySendError::Closed(_)) => Err(CableError::ServerClosed),
        }
    }

    /// Send a message to every member of `room`
    ///
    /// Waits until the dispatcher accepts the request. The dispatcher in turn
    /// waits for room in the target's queue, so a busy room slows callers down
    /// rather than losing messages. A room that does not exist or is closing
    /// when the request is processed is silently skipped.
    pub async fn broadcast(
        &self,
        room: impl Into<String>,
        name: impl Into<String>,
        code: OpCode,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), CableError> {
        let room = room.into();
        let message = Message::new(room.clone(), name, code, data);
        self.command_tx
            .send(ServerCommand::Broadcast { room, message })
            .await
            .map_err(|_| CableError::ServerClosed)
    }

    /// Send a message to every member of every room
    ///
    /// Rooms whose broadcast queue is full at that moment miss the message.
    pub async fn broadcast_all(
        &self,
        name: impl Into<String>,
        code: OpCode,
        data: impl Into<Vec<u8>>,
    ) -> Result<(), CableError> {
        let message = Message::new("", name, code, data);
        self.command_tx
            .send(ServerCommand::BroadcastAll { message })
            .await
            .map_err(|_| CableError::ServerClosed)
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }
}
