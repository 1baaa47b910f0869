//! WebSocket upgrade adapter
//!
//! Performs the WebSocket handshake on an accepted stream, asks the accept
//! hook where the connection belongs, and hands it to the dispatcher.

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, info, warn};

use crate::error::CableError;
use crate::hooks::Admission;
use crate::server::CableHandle;
use crate::transport::Transport;
use crate::types::ClientId;

/// Handle a new stream
///
/// Rejected requests are answered with 403 Forbidden. A full register queue
/// closes the upgraded connection without an application-level message.
pub async fn handle_connection<S>(stream: S, handle: CableHandle) -> Result<ClientId, CableError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut admission: Option<Admission> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        match handle.hooks().accept(request) {
            Some(decision) => {
                admission = Some(decision);
                Ok(response)
            }
            None => {
                debug!("Upgrade for {} rejected by accept hook", request.uri());
                let mut rejection = ErrorResponse::new(Some("Forbidden".to_string()));
                *rejection.status_mut() = StatusCode::FORBIDDEN;
                Err(rejection)
            }
        }
    };

    // WebSocket handshake
    let ws_stream = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let Admission { room, name } = admission.ok_or(CableError::Rejected)?;

    match handle.connect(Transport::new(ws_stream), room.clone(), name.clone()) {
        Ok(id) => {
            info!("Client {} ({}) admitted to room {}", id, name, room);
            Ok(id)
        }
        Err(e) => {
            warn!("Client {} not admitted to room {}: {}", name, room, e);
            Err(e)
        }
    }
}
