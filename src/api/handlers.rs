//! Administrative and session endpoints

use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Path, Query, State,
    },
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::broadcast::PublishResult;
use crate::channel::ChannelError;
use crate::connection::ConnectionId;
use crate::error::{AppError, Result};
use crate::server::AppState;
use crate::session::is_valid_session_value;

/// Username put in development tokens when the caller names none
const DEFAULT_TOKEN_USERNAME: &str = "developer";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageRequest {
    pub connection_id: Option<String>,
    pub payload: Option<Value>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessageResponse {
    pub success: bool,
    pub connection_id: ConnectionId,
    pub message: String,
}

/// POST /api/send-message - direct delivery to one connection on this process
pub async fn send_message(
    State(state): State<AppState>,
    body: std::result::Result<Json<SendMessageRequest>, JsonRejection>,
) -> Result<Json<SendMessageResponse>> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    let (Some(connection_id), Some(payload)) = (request.connection_id, request.payload) else {
        return Err(AppError::Validation(
            "connectionId and payload are required".to_string(),
        ));
    };
    if connection_id.is_empty() || payload.is_null() {
        return Err(AppError::Validation(
            "connectionId and payload are required".to_string(),
        ));
    }

    let connection_id = ConnectionId::from(connection_id);
    state.broadcaster.send_to_connection(&connection_id, payload)?;

    Ok(Json(SendMessageResponse {
        success: true,
        connection_id,
        message: "Message sent successfully".to_string(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct BroadcastRequest {
    pub channel: String,
    pub data: Value,
}

#[derive(Debug, Serialize)]
pub struct BroadcastResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: PublishResult,
}

/// POST /api/broadcast - publish to every subscriber of a channel, cluster-wide
#[tracing::instrument(name = "api.broadcast", skip(state, body))]
pub async fn broadcast(
    State(state): State<AppState>,
    body: std::result::Result<Json<BroadcastRequest>, JsonRejection>,
) -> Result<Json<BroadcastResponse>> {
    let Json(request) = body.map_err(|e| AppError::Validation(e.body_text()))?;

    let result = state.broadcaster.publish(&request.channel, request.data).await?;

    Ok(Json(BroadcastResponse {
        success: true,
        result,
    }))
}

#[derive(Debug, Serialize)]
pub struct ChannelMember {
    pub connection_id: ConnectionId,
    /// Join time, Unix milliseconds
    pub joined_at: i64,
}

#[derive(Debug, Serialize)]
pub struct ChannelMembersResponse {
    pub channel: String,
    pub count: usize,
    pub members: Vec<ChannelMember>,
}

/// GET /api/channels/{channel}/members - membership as recorded in the store
pub async fn channel_members(
    State(state): State<AppState>,
    Path(channel): Path<String>,
) -> Result<Json<ChannelMembersResponse>> {
    let members = state.channels.members(&channel).await.map_err(|e| match e {
        ChannelError::InvalidChannel(name) => {
            AppError::Validation(format!("Invalid channel name: {}", name))
        }
        ChannelError::Store(e) => AppError::Store(e),
        ChannelError::ConnectionClosed => AppError::Internal(e.to_string()),
    })?;

    let mut members: Vec<ChannelMember> = members
        .into_iter()
        .map(|(connection_id, joined_at)| ChannelMember {
            connection_id,
            joined_at,
        })
        .collect();
    members.sort_by_key(|m| m.joined_at);

    Ok(Json(ChannelMembersResponse {
        channel,
        count: members.len(),
        members,
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SetSessionResponse {
    pub message: String,
    pub session_value: String,
}

/// GET /socket/set-session/{value} - pin the affinity cookie to an explicit value
pub async fn set_session(
    State(state): State<AppState>,
    Path(value): Path<String>,
    jar: CookieJar,
) -> Result<(CookieJar, Json<SetSessionResponse>)> {
    if !is_valid_session_value(&value) {
        return Err(AppError::Validation("Invalid session value".to_string()));
    }

    let jar = jar.add(state.sessions.session_cookie(value.clone()));

    Ok((
        jar,
        Json(SetSessionResponse {
            message: "Session cookie set".to_string(),
            session_value: value,
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct TokenQuery {
    pub username: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token: String,
    pub username: String,
    /// Token lifetime in seconds
    pub expires_in: u64,
}

/// GET /token - signed token for development clients. Only routed when
/// `api.token_endpoint` is enabled.
pub async fn issue_token(
    State(state): State<AppState>,
    query: std::result::Result<Query<TokenQuery>, QueryRejection>,
) -> Result<Json<TokenResponse>> {
    let Query(query) = query.map_err(|e| AppError::Validation(e.body_text()))?;
    let username = query
        .username
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TOKEN_USERNAME.to_string());

    let expires_in = state.settings.api.token_ttl_secs;
    let token = state
        .signer
        .issue(&username, expires_in)
        .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))?;

    tracing::info!(username = %username, "Issued development token");

    Ok(Json(TokenResponse {
        token,
        username,
        expires_in,
    }))
}
