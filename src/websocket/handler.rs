use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{
        rejection::QueryRejection,
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use crate::auth::{extract_token, Principal};
use crate::connection::{ConnectionHandle, ConnectionId};
use crate::metrics::ConnectionMetrics;
use crate::server::AppState;

use super::lifecycle::{CloseReason, ConnectionEvent, ConnectionLifecycle, Flow, InboundFrame};
use super::message::OutboundMessage;

/// How long the writer may keep flushing after cleanup before it is aborted
const WRITER_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// WebSocket upgrade handler
///
/// Rejected upgrades get a 401 with a plain-text reason and leave no state
/// behind. Accepted ones carry the affinity cookie on the 101 response.
///
/// A query string that does not parse (a repeated `token`, say) counts as
/// carrying no token, so the client still gets the 401 contract.
#[tracing::instrument(name = "ws.upgrade", skip(ws, state, query, headers, jar))]
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    query: Result<Query<WsQuery>, QueryRejection>,
    headers: HeaderMap,
    jar: CookieJar,
) -> Response {
    let query_token = match query {
        Ok(Query(query)) => query.token,
        Err(e) => {
            tracing::debug!(error = %e, "Unparseable upgrade query, ignoring it");
            None
        }
    };
    let token = extract_token(query_token.as_deref(), &headers);

    let principal = match state.auth.authenticate(token) {
        Ok(principal) => principal,
        Err(e) => {
            ConnectionMetrics::record_auth_rejected(e.reason());
            tracing::warn!(error = %e, "WebSocket upgrade rejected");
            return (StatusCode::UNAUTHORIZED, e.rejection_body()).into_response();
        }
    };

    let assignment = state.sessions.assign(&jar);
    let session_id = assignment.value().to_string();
    let jar = if assignment.is_new() {
        ConnectionMetrics::record_session_issued();
        jar.add(state.sessions.session_cookie(session_id.clone()))
    } else {
        jar
    };

    let connection_id = ConnectionId::generate();
    tracing::info!(
        connection_id = %connection_id,
        principal = %principal.name(),
        new_session = assignment.is_new(),
        "WebSocket upgrade accepted"
    );

    let upgrade = ws.on_upgrade(move |socket| {
        handle_socket(socket, state, connection_id, principal, session_id)
    });

    (jar, upgrade).into_response()
}

/// Drive an established WebSocket until it closes
#[tracing::instrument(
    name = "ws.connection",
    skip(socket, state, principal, session_id),
    fields(
        connection_id = %connection_id,
        otel.kind = "server"
    )
)]
async fn handle_socket(
    socket: WebSocket,
    state: AppState,
    connection_id: ConnectionId,
    principal: Principal,
    session_id: String,
) {
    let (tx, mut rx) = mpsc::channel::<OutboundMessage>(state.settings.websocket.outbound_buffer);
    let handle = Arc::new(ConnectionHandle::new(connection_id, principal, session_id, tx));
    let mut lifecycle = ConnectionLifecycle::new(
        handle.clone(),
        state.registry.clone(),
        state.channels.clone(),
        state.broadcaster.clone(),
    );

    let (mut ws_sender, mut ws_receiver) = socket.split();

    // Sole writer for this socket
    let mut send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let frame = match msg {
                OutboundMessage::Envelope(envelope) => match serde_json::to_string(&envelope) {
                    Ok(text) => Message::Text(text.into()),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to serialize message");
                        continue;
                    }
                },
                OutboundMessage::Serialized(text) => Message::Text(text),
                OutboundMessage::Ping => Message::Ping(Default::default()),
            };

            if ws_sender.send(frame).await.is_err() {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });
    let mut writer_done = false;

    if lifecycle.handle_event(ConnectionEvent::Connect).await == Flow::Continue {
        loop {
            let event = tokio::select! {
                frame = ws_receiver.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        ConnectionEvent::Message(InboundFrame::Text(text.as_str().to_owned()))
                    }
                    Some(Ok(Message::Binary(_))) => ConnectionEvent::Message(InboundFrame::Binary),
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        ConnectionEvent::Message(InboundFrame::Control)
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        ConnectionEvent::Disconnect(CloseReason::ClientClosed)
                    }
                    Some(Err(e)) => ConnectionEvent::Error(e.to_string()),
                },
                _ = handle.close_requested() => {
                    ConnectionEvent::Disconnect(CloseReason::CloseRequested)
                }
                _ = &mut send_task => {
                    writer_done = true;
                    ConnectionEvent::Disconnect(CloseReason::WriterClosed)
                }
            };

            if lifecycle.handle_event(event).await == Flow::Close {
                break;
            }
        }
    }

    // Dropping the last senders lets the writer flush and send a close frame
    drop(lifecycle);
    drop(handle);

    if !writer_done && tokio::time::timeout(WRITER_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        send_task.abort();
    }
}
