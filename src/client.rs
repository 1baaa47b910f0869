//! Connection handle and pump pair
//!
//! Each admitted connection runs two tasks. The read pump is the only reader
//! of the transport and forwards data frames to the room. The write pump is
//! the only writer: it drains the outbound queue and sends keep-alive pings.
//! The room worker holds the queue's sender; dropping it is the signal for
//! the write pump to send a close frame and exit.

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, Instant};
use tokio_tungstenite::tungstenite::Message as Frame;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::Config;
use crate::error::CableError;
use crate::message::Message;
use crate::room::{Leave, RoomEvent};
use crate::transport::{FrameSink, FrameStream, Transport};
use crate::types::ClientId;

/// Identity of an admitted connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientInfo {
    /// Unique identifier for this connection
    pub id: ClientId,
    /// Display name
    pub name: String,
    /// Room the connection belongs to
    pub room: String,
}

impl ClientInfo {
    pub fn new(name: impl Into<String>, room: impl Into<String>) -> Self {
        Self {
            id: ClientId::new(),
            name: name.into(),
            room: room.into(),
        }
    }
}

/// Spawn the read and write pumps for an admitted connection
pub(crate) fn spawn_pumps(
    info: ClientInfo,
    transport: Transport,
    outbound: mpsc::Receiver<Message>,
    room: mpsc::Sender<RoomEvent>,
    shutdown: CancellationToken,
    config: Arc<Config>,
) {
    let Transport { sink, stream } = transport;
    let (done_tx, done_rx) = oneshot::channel();

    tokio::spawn(write_pump(
        info.id,
        sink,
        outbound,
        shutdown,
        config.clone(),
        done_tx,
    ));
    tokio::spawn(read_pump(info, stream, room, done_rx, config));
}

/// Pump frames from the connection into the room
///
/// Runs until the peer closes, a read fails, the read deadline lapses or the
/// write pump exits. Always reports a leave to the room before returning,
/// on the same queue as its messages so the leave comes after them.
async fn read_pump(
    info: ClientInfo,
    mut stream: FrameStream,
    room: mpsc::Sender<RoomEvent>,
    mut writer_done: oneshot::Receiver<Option<CableError>>,
    config: Arc<Config>,
) {
    let pong_wait = config.pong_wait();
    let mut deadline = Instant::now() + pong_wait;

    let error = loop {
        let next = tokio::select! {
            next = time::timeout_at(deadline, stream.next()) => next,
            done = &mut writer_done => {
                break done.ok().flatten();
            }
        };

        let frame = match next {
            Err(_) => break Some(CableError::ReadTimeout),
            Ok(None) => break None,
            Ok(Some(Err(e))) => break Some(CableError::from(e)),
            Ok(Some(Ok(frame))) => frame,
        };

        match frame {
            Frame::Pong(_) => {
                deadline = Instant::now() + pong_wait;
            }
            Frame::Close(_) => {
                debug!("Client {} sent close frame", info.id);
                break None;
            }
            frame => {
                let Some(message) = Message::from_frame(info.id, &info.room, &info.name, frame)
                else {
                    continue;
                };
                if room.send(RoomEvent::Broadcast(message)).await.is_err() {
                    debug!("Room {} closed, ending read pump for {}", info.room, info.id);
                    break None;
                }
            }
        }
    };

    if let Some(e) = &error {
        debug!("Read pump for {} ended: {}", info.id, e);
    }
    let _ = room.send(RoomEvent::Leave(Leave { id: info.id, error })).await;
    debug!("Read pump ended for {}", info.id);
}

/// Pump queued messages and keep-alive pings to the connection
async fn write_pump(
    id: ClientId,
    mut sink: FrameSink,
    mut outbound: mpsc::Receiver<Message>,
    shutdown: CancellationToken,
    config: Arc<Config>,
    done: oneshot::Sender<Option<CableError>>,
) {
    let write_wait = config.write_wait();
    let ping_period = config.ping_period();
    let mut ticker = time::interval_at(Instant::now() + ping_period, ping_period);

    let error = loop {
        tokio::select! {
            message = outbound.recv() => match message {
                Some(message) => {
                    if let Err(e) = write_frame(&mut sink, message.into_frame(), write_wait).await {
                        break Some(e);
                    }
                }
                None => {
                    // The room dropped the queue.
                    let _ = write_frame(&mut sink, Frame::Close(None), write_wait).await;
                    break None;
                }
            },
            _ = ticker.tick() => {
                if let Err(e) = write_frame(&mut sink, Frame::Ping(Vec::new()), write_wait).await {
                    break Some(e);
                }
            }
            _ = shutdown.cancelled() => {
                let _ = write_frame(&mut sink, Frame::Close(None), write_wait).await;
                break None;
            }
        }
    };

    debug!("Write pump ended for {}", id);
    let _ = done.send(error);
}

async fn write_frame(
    sink: &mut FrameSink,
    frame: Frame,
    write_wait: std::time::Duration,
) -> Result<(), CableError> {
    time::timeout(write_wait, sink.send(frame))
        .await
        .map_err(|_| CableError::WriteTimeout)??;
    Ok(())
}
