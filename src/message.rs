//! Message definitions
//!
//! A `Message` is what travels through rooms: the payload of one frame plus
//! the room, the sender's display name and its opcode. Opcodes pass through
//! unmodified; their meaning belongs to the WebSocket layer.

use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as Frame;

use crate::types::ClientId;

/// WebSocket opcode of a message payload
///
/// Discriminants are the RFC 6455 opcode values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Text = 1,
    Binary = 2,
    Close = 8,
    Ping = 9,
    Pong = 10,
}

impl OpCode {
    /// Numeric opcode value
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = u8;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(OpCode::Text),
            2 => Ok(OpCode::Binary),
            8 => Ok(OpCode::Close),
            9 => Ok(OpCode::Ping),
            10 => Ok(OpCode::Pong),
            other => Err(other),
        }
    }
}

/// A message broadcast within a room
///
/// Immutable once built. The source connection is kept only to avoid echo
/// and is never exposed outside the crate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub room: String,
    pub name: String,
    pub code: OpCode,
    pub data: Vec<u8>,
    source: Option<ClientId>,
}

impl Message {
    /// Create a server-originated message with no source connection
    pub fn new(
        room: impl Into<String>,
        name: impl Into<String>,
        code: OpCode,
        data: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            room: room.into(),
            name: name.into(),
            code,
            data: data.into(),
            source: None,
        }
    }

    /// Build a message from a data frame read off a connection
    ///
    /// Returns None for control frames, which are handled by the pump itself.
    pub(crate) fn from_frame(source: ClientId, room: &str, name: &str, frame: Frame) -> Option<Self> {
        let (code, data) = match frame {
            Frame::Text(text) => (OpCode::Text, text.into_bytes()),
            Frame::Binary(data) => (OpCode::Binary, data),
            _ => return None,
        };
        Some(Self {
            room: room.to_string(),
            name: name.to_string(),
            code,
            data,
            source: Some(source),
        })
    }

    /// Connection the message was read from, if any
    pub fn source(&self) -> Option<ClientId> {
        self.source
    }

    /// Copy of this message addressed to another room
    pub(crate) fn for_room(&self, room: &str) -> Self {
        Self {
            room: room.to_string(),
            ..self.clone()
        }
    }

    /// Convert into the frame written to the peer
    ///
    /// Text payloads that are not valid UTF-8 are written lossily. A close
    /// payload is read as a big-endian status code followed by the reason.
    pub fn into_frame(self) -> Frame {
        match self.code {
            OpCode::Text => match String::from_utf8(self.data) {
                Ok(text) => Frame::Text(text),
                Err(e) => Frame::Text(String::from_utf8_lossy(e.as_bytes()).into_owned()),
            },
            OpCode::Binary => Frame::Binary(self.data),
            OpCode::Ping => Frame::Ping(self.data),
            OpCode::Pong => Frame::Pong(self.data),
            OpCode::Close => Frame::Close(close_frame(&self.data)),
        }
    }
}

fn close_frame(data: &[u8]) -> Option<CloseFrame<'static>> {
    let (code, reason) = match data {
        [hi, lo, reason @ ..] => (u16::from_be_bytes([*hi, *lo]), reason),
        _ => return None,
    };
    Some(CloseFrame {
        code: CloseCode::from(code),
        reason: String::from_utf8_lossy(reason).into_owned().into(),
    })
}
