use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, trace};

use kumas_db::models::{MessageRow, member_ids};
use kumas_db::{Database, queries};
use kumas_types::api::{Claims, CreateMessageRequest, MessagePage, MessageQuery};
use kumas_types::events::GatewayEvent;
use kumas_types::models::{ChatId, Message, MessageId, UserId};

use crate::error::ApiError;
use crate::state::AppState;
use crate::{blocking, reply, validate};

pub const MESSAGE_PAGE_SIZE: u32 = 100;

/// One page of a chat's history, oldest first. Only current members may read.
pub fn get_messages(db: &Database, user_id: UserId, chat_id: ChatId, skip: u32) -> Result<MessagePage, ApiError> {
    db.with_tx(|tx| {
        queries::find_member(tx, chat_id, user_id)?.ok_or_else(ApiError::not_found)?;
        let rows = queries::list_messages(tx, chat_id, MESSAGE_PAGE_SIZE, skip)?;
        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    })
}

/// Insert a message. Once committed, and before the store is unlocked,
/// `committed` is handed the message and the chat's member ids.
pub fn create_message<C>(
    db: &Database,
    user_id: UserId,
    chat_id: ChatId,
    content: &str,
    committed: C,
) -> Result<Message, ApiError>
where
    C: FnOnce(&Message, &[UserId]),
{
    validate::content(content)?;

    let (message, _) = db.with_tx_then(
        |tx| -> Result<(Message, Vec<UserId>), ApiError> {
            queries::find_chat(tx, chat_id)?.ok_or_else(ApiError::not_found)?;
            let members = member_ids(&queries::list_members(tx, chat_id)?);
            if !members.contains(&user_id) {
                return Err(ApiError::forbidden());
            }

            let id = queries::insert_message(tx, chat_id, user_id, Some(content), None)?;
            queries::touch_chat(tx, chat_id)?;
            let row = queries::find_message(tx, chat_id, id)?
                .ok_or_else(|| anyhow::anyhow!("message {} missing right after insert", id))?;

            Ok((row.into_message(), members))
        },
        |(message, members): &(Message, Vec<UserId>)| committed(message, members.as_slice()),
    )?;
    Ok(message)
}

/// [`create_message`], fanning the message out to every member in the
/// order messages were committed.
pub async fn post_message(state: &AppState, user_id: UserId, chat_id: ChatId, content: String) -> Result<Message, ApiError> {
    blocking(state, move |s| {
        create_message(&s.db, user_id, chat_id, &content, |message, members| {
            let event = GatewayEvent::MessageCreate {
                chat_id,
                message: message.clone(),
            };
            let report = s.dispatcher.deliver(chat_id, members, &event);
            trace!("message {} pushed to {} connection(s)", message.id, report.delivered);
        })
    })
    .await
}

/// Soft-delete a message. Only its author may, and only once.
pub fn delete_message(
    db: &Database,
    user_id: UserId,
    chat_id: ChatId,
    message_id: MessageId,
) -> Result<Message, ApiError> {
    db.with_tx(|tx| {
        let row = queries::find_message(tx, chat_id, message_id)?.ok_or_else(ApiError::not_found)?;
        if row.author_id != user_id || row.state().delete().is_none() {
            return Err(ApiError::forbidden());
        }
        if queries::mark_message_deleted(tx, message_id)? == 0 {
            return Err(ApiError::forbidden());
        }

        let row = queries::find_message(tx, chat_id, message_id)?.ok_or_else(ApiError::not_found)?;
        debug!("message {} in chat {} deleted by {}", message_id, chat_id, user_id);
        Ok(row.into_message())
    })
}

// -- Handlers --

pub async fn list_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Query(query): Query<MessageQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let page = blocking(&state, move |s| get_messages(&s.db, claims.id, chat_id, query.skip)).await?;
    Ok(reply(StatusCode::OK, page))
}

pub async fn create_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(chat_id): Path<ChatId>,
    Json(req): Json<CreateMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let message = post_message(&state, claims.id, chat_id, req.content).await?;
    Ok(reply(StatusCode::CREATED, message))
}

pub async fn delete_handler(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path((chat_id, message_id)): Path<(ChatId, MessageId)>,
) -> Result<impl IntoResponse, ApiError> {
    let message = blocking(&state, move |s| delete_message(&s.db, claims.id, chat_id, message_id)).await?;
    Ok(reply(StatusCode::OK, message))
}
