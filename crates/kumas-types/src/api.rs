use serde::{Deserialize, Serialize};

use crate::models::{ChatId, Gender, Message, MessageId, UserId, UserSummary};

// -- JWT Claims --

/// Access-token claims. Shared between kumas-api (REST middleware) and the
/// WebSocket upgrade in kumas-server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub id: UserId,
    pub email: String,
    pub name: String,
    pub iat: usize,
    pub exp: usize,
}

/// Refresh-token claims. Signed with a separate secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshClaims {
    pub id: UserId,
    pub iat: usize,
    pub exp: usize,
}

// -- Envelope --

/// Success envelope wrapped around every handler result.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: u16,
    pub result: T,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub code: u16,
    pub name: String,
    pub message: String,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ReissueRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    pub token_type: &'static str,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

// -- Users --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub email: String,
    pub password: String,
    pub name: String,
    pub gender: Gender,
}

#[derive(Debug, Default, Deserialize)]
pub struct UpdateUserRequest {
    pub email: Option<String>,
    pub password: Option<String>,
    pub name: Option<String>,
}

// -- Friends --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FriendRequest {
    pub target_id: UserId,
}

// -- Chats --

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CreateChatRequest {
    pub target_id: UserId,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateChatRequest {
    pub title: String,
}

/// One entry of the chat list, as seen by the requesting member.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: ChatId,
    pub title: Option<String>,
    pub users: Vec<UserSummary>,
    pub last_message: Option<LastMessage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastMessage {
    pub id: MessageId,
    pub content: Option<String>,
    pub image: Option<String>,
    pub deleted: bool,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateMessageRequest {
    pub content: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageQuery {
    #[serde(default)]
    pub skip: u32,
}

pub type MessagePage = Vec<Message>;
