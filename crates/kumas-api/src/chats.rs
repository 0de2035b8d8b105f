use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use kumas_db::models::{ChatMemberRow, MessageRow};
use kumas_db::{Database, queries};
use kumas_types::api::{ChatSummary, Claims, CreateChatRequest, LastMessage, UpdateChatRequest};
use kumas_types::events::GatewayEvent;
use kumas_types::models::{Chat, ChatId, ChatMember, UserId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::{blocking, reply, validate};

/// A pairwise chat as returned by [`create_chat`], with enough of its
/// membership to render it from either side.
#[derive(Debug)]
pub struct OpenedChat {
    pub chat: Chat,
    pub members: Vec<ChatMemberRow>,
    pub last_message: Option<LastMessage>,
    /// False when an existing chat was returned.
    pub created: bool,
}

impl OpenedChat {
    pub fn view_for(&self, viewer: UserId) -> ChatSummary {
        summarize(self.chat.id, &self.members, viewer, self.last_message.clone())
    }
}

/// The chat as `viewer` sees it: their own title and everyone else.
fn summarize(
    chat_id: ChatId,
    members: &[ChatMemberRow],
    viewer: UserId,
    last_message: Option<LastMessage>,
) -> ChatSummary {
    let title = members
        .iter()
        .find(|m| m.user_id == viewer)
        .and_then(|m| m.title.clone());
    let users = members
        .iter()
        .filter(|m| m.user_id != viewer)
        .map(ChatMemberRow::summary)
        .collect();

    ChatSummary {
        id: chat_id,
        title,
        users,
        last_message,
    }
}

/// Every chat the user belongs to, most recent activity first.
pub fn list_chats(db: &Database, user_id: UserId) -> Result<Vec<ChatSummary>, ApiError> {
    let (chats, members, last) = db.with_conn(|conn| {
        Ok((
            queries::list_chats_of_user(conn, user_id)?,
            queries::list_members_of_user_chats(conn, user_id)?,
            queries::last_messages_of_user_chats(conn, user_id)?,
        ))
    })?;

    let mut members_by_chat: HashMap<ChatId, Vec<ChatMemberRow>> = HashMap::new();
    for member in members {
        members_by_chat.entry(member.chat_id).or_default().push(member);
    }
    let mut last_by_chat: HashMap<ChatId, MessageRow> =
        last.into_iter().map(|m| (m.chat_id, m)).collect();

    let mut entries: Vec<(DateTime<Utc>, ChatSummary)> = chats
        .into_iter()
        .map(|row| {
            let chat = row.into_chat();
            let last_message = last_by_chat.remove(&chat.id).map(MessageRow::into_last_message);
            let activity = last_message
                .as_ref()
                .map(|m| m.created_at)
                .unwrap_or(chat.created_at);
            let members = members_by_chat.get(&chat.id).map(Vec::as_slice).unwrap_or(&[]);
            (activity, summarize(chat.id, members, user_id, last_message))
        })
        .collect();

    entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.id.cmp(&a.1.id)));
    Ok(entries.into_iter().map(|(_, summary)| summary).collect())
}

/// Return the caller's existing pairwise chat with `target_id`, or create
/// one with exactly two members.
///
/// Lookup and insert run in one immediate transaction, so concurrent calls
/// for the same pair cannot both create a chat. `committed` sees the result
/// after commit, before the store is unlocked.
pub fn create_chat<C>(db: &Database, user_id: UserId, target_id: UserId, committed: C) -> Result<OpenedChat, ApiError>
where
    C: FnOnce(&OpenedChat),
{
    if user_id == target_id {
        return Err(ApiError::forbidden());
    }

    db.with_tx_then(
        |tx| -> Result<OpenedChat, ApiError> {
            queries::find_user_by_id(tx, target_id)?.ok_or_else(ApiError::not_found)?;

            if let Some(existing) = queries::find_pair_chat(tx, user_id, target_id)? {
                let members = queries::list_members(tx, existing.id)?;
                let last_message = queries::last_message(tx, existing.id)?.map(MessageRow::into_last_message);
                debug!("user {} reopened chat {} with {}", user_id, existing.id, target_id);
                return Ok(OpenedChat {
                    chat: existing.into_chat(),
                    members,
                    last_message,
                    created: false,
                });
            }

            let chat_id = queries::insert_chat(tx, false)?;
            for member in [user_id, target_id] {
                queries::insert_member(tx, chat_id, member, None)
                    .map_err(|e| ApiError::from_store(e, ApiError::forbidden))?;
            }
            let chat = queries::find_chat(tx, chat_id)?
                .ok_or_else(|| anyhow::anyhow!("chat {} missing right after insert", chat_id))?;
            let members = queries::list_members(tx, chat_id)?;

            Ok(OpenedChat {
                chat: chat.into_chat(),
                members,
                last_message: None,
                created: true,
            })
        },
        committed,
    )
}

/// [`create_chat`], announcing a new chat to both members.
pub async fn open_chat(state: &AppState, user_id: UserId, target_id: UserId) -> Result<OpenedChat, ApiError> {
    blocking(state, move |s| {
        create_chat(&s.db, user_id, target_id, |opened| {
            if !opened.created {
                return;
            }
            info!("chat {} created between {} and {}", opened.chat.id, user_id, target_id);
            for member in &opened.members {
                let event = GatewayEvent::ChatCreate {
                    chat: opened.view_for(member.user_id),
                };
                s.dispatcher.send_to_user(member.user_id, &event);
            }
        })
    })
    .await
}

/// Set the caller's private title for a chat.
pub fn update_chat(db: &Database, user_id: UserId, chat_id: ChatId, title: &str) -> Result<ChatMember, ApiError> {
    validate::title(title)?;

    db.with_tx(|tx| {
        if queries::update_member_title(tx, chat_id, user_id, title)? == 0 {
            return Err(ApiError::not_found());
        }
        let member = queries::find_member(tx, chat_id, user_id)?.ok_or_else(ApiError::not_found)?;
        Ok(member.chat_member())
    })
}

/// Leave a chat. Only the caller's membership goes; the chat, its messages
/// and the other members are untouched.
pub fn delete_chat(db: &Database, user_id: UserId, chat_id: ChatId) -> Result<(), ApiError> {
    let removed = db.with_conn(|conn| queries::delete_member(conn, chat_id, user_id))?;
    if removed == 0 {
        return Err(ApiError::not_found());
    }
    debug!("user {} left chat {}", user_id, chat_id);
    Ok(())
}

// -- Handlers --

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let chats = blocking(&state, move |s| list_chats(&s.db, claims.id)).await?;
    Ok(reply(StatusCode::OK, chats))
}

pub async fn create_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let opened = open_chat(&state, claims.id, req.target_id).await?;
    let code = if opened.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok(reply(code, opened.view_for(claims.id)))
}

pub async fn update_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<UpdateChatRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let member = blocking(&state, move |s| update_chat(&s.db, claims.id, chat_id, &req.title)).await?;
    Ok(reply(StatusCode::OK, member))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
) -> Result<impl IntoResponse, ApiError> {
    blocking(&state, move |s| delete_chat(&s.db, claims.id, chat_id)).await?;
    Ok(reply(StatusCode::OK, ()))
}
