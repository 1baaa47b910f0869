//! Room worker
//!
//! One task per room instance. The worker is the only owner of the room's
//! membership: it admits connections, fans messages out to their outbound
//! queues and removes them when their pumps finish. When the last connection
//! leaves, it reports back to the dispatcher and exits.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::{spawn_pumps, ClientInfo};
use crate::config::Config;
use crate::error::CableError;
use crate::hooks::Hooks;
use crate::message::Message;
use crate::transport::Transport;
use crate::types::ClientId;

/// Request to admit a connection into a room
#[derive(Debug)]
pub(crate) struct Join {
    pub client: ClientInfo,
    pub transport: Transport,
}

/// A connection's read pump has finished
#[derive(Debug)]
pub(crate) struct Leave {
    pub id: ClientId,
    pub error: Option<CableError>,
}

/// Events a room worker consumes from its pumps and the dispatcher
///
/// Messages and leaves share one queue so a connection's leave is always
/// handled after the messages it sent.
#[derive(Debug)]
pub(crate) enum RoomEvent {
    Broadcast(Message),
    Leave(Leave),
}

/// Sent to the dispatcher when a room instance has emptied
#[derive(Debug)]
pub(crate) struct Unregister {
    pub room: String,
    pub generation: u64,
    /// Joins that were queued here after the room emptied
    pub orphans: Vec<Join>,
}

/// Dispatcher-side handle to a running room worker
#[derive(Debug)]
pub(crate) struct RoomHandle {
    pub generation: u64,
    pub join: mpsc::Sender<Join>,
    pub events: mpsc::Sender<RoomEvent>,
}

/// An admitted connection
struct Member {
    info: ClientInfo,
    outbound: mpsc::Sender<Message>,
}

/// Room worker state
pub(crate) struct Room {
    name: String,
    generation: u64,
    config: Arc<Config>,
    hooks: Arc<Hooks>,
    /// Connections currently receiving messages
    members: HashMap<ClientId, Member>,
    /// Connections dropped for backpressure whose read pump has not yet left
    detached: HashMap<ClientId, ClientInfo>,
    opened: bool,
    join_rx: mpsc::Receiver<Join>,
    events_rx: mpsc::Receiver<RoomEvent>,
    events_tx: mpsc::Sender<RoomEvent>,
    unregister: mpsc::Sender<Unregister>,
    shutdown: CancellationToken,
}

impl Room {
    /// Start a worker for a new room instance
    pub fn spawn(
        name: String,
        generation: u64,
        config: Arc<Config>,
        hooks: Arc<Hooks>,
        unregister: mpsc::Sender<Unregister>,
        shutdown: CancellationToken,
    ) -> RoomHandle {
        let (join_tx, join_rx) = mpsc::channel(config.register_buffer);
        let (events_tx, events_rx) = mpsc::channel(config.broadcast_buffer);

        let room = Room {
            name,
            generation,
            config,
            hooks,
            members: HashMap::new(),
            detached: HashMap::new(),
            opened: false,
            join_rx,
            events_rx,
            events_tx: events_tx.clone(),
            unregister,
            shutdown,
        };
        tokio::spawn(room.run());

        RoomHandle {
            generation,
            join: join_tx,
            events: events_tx,
        }
    }

    /// Run the room event loop until the last connection leaves
    async fn run(mut self) {
        debug!("Room {} (#{}) started", self.name, self.generation);

        loop {
            tokio::select! {
                Some(event) = self.events_rx.recv() => match event {
                    RoomEvent::Broadcast(message) => self.handle_broadcast(message),
                    RoomEvent::Leave(leave) => {
                        self.handle_leave(leave);
                        if self.is_empty() {
                            break;
                        }
                    }
                },
                Some(join) = self.join_rx.recv() => self.handle_join(join),
                else => break,
            }
        }

        self.close().await;
    }

    /// Number of connections still attached to this room
    fn len(&self) -> usize {
        self.members.len() + self.detached.len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Admit a connection and start its pumps
    fn handle_join(&mut self, join: Join) {
        let Join { client, transport } = join;

        if !self.opened {
            self.opened = true;
            info!("Room {} opened", self.name);
            self.hooks.room_ready(&self.name);
        }

        let (outbound, outbound_rx) = mpsc::channel(self.config.broadcast_buffer);
        spawn_pumps(
            client.clone(),
            transport,
            outbound_rx,
            self.events_tx.clone(),
            self.shutdown.clone(),
            self.config.clone(),
        );

        info!("Client {} ({}) joined room {}", client.id, client.name, self.name);
        self.members.insert(
            client.id,
            Member {
                info: client.clone(),
                outbound,
            },
        );
        debug!("Room {} members: {}", self.name, self.len());

        self.hooks.conn_ready(&client);
    }

    /// Remove a connection whose read pump has finished
    fn handle_leave(&mut self, leave: Leave) {
        // Dropping the member drops its queue sender, which closes the queue.
        let info = match self.members.remove(&leave.id) {
            Some(member) => member.info,
            None => match self.detached.remove(&leave.id) {
                Some(info) => info,
                None => {
                    warn!("Leave from unknown client {} in room {}", leave.id, self.name);
                    return;
                }
            },
        };

        info!("Client {} left room {}", info.id, self.name);
        self.hooks.conn_close(&info, leave.error.as_ref());
    }

    /// Fan a message out to every member except its sender
    fn handle_broadcast(&mut self, message: Message) {
        self.hooks.message(&message);

        let mut slow = Vec::new();
        for (id, member) in &self.members {
            if !self.config.echo_to_sender && message.source() == Some(*id) {
                continue;
            }
            match member.outbound.try_send(message.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => slow.push(*id),
                // Write pump already gone; its read pump will report the leave.
                Err(TrySendError::Closed(_)) => {}
            }
        }

        for id in slow {
            if let Some(member) = self.members.remove(&id) {
                warn!(
                    "Client {} dropped from room {}: outbound queue full",
                    id, self.name
                );
                self.detached.insert(id, member.info);
            }
        }
    }

    /// Report the empty room and hand back any joins still queued here
    async fn close(mut self) {
        info!("Room {} closed", self.name);
        self.hooks.room_close(&self.name);

        // A dispatcher waiting to deliver a broadcast here must see the queue
        // closed before this worker waits on the dispatcher.
        self.events_rx.close();
        self.join_rx.close();
        let mut orphans = Vec::new();
        while let Ok(join) = self.join_rx.try_recv() {
            orphans.push(join);
        }
        if !orphans.is_empty() {
            debug!("Room {} returning {} queued joins", self.name, orphans.len());
        }

        let _ = self
            .unregister
            .send(Unregister {
                room: self.name.clone(),
                generation: self.generation,
                orphans,
            })
            .await;
    }
}
